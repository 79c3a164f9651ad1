//! Tests for audit sinks

use prometheus_task_gate::core::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_sink_records_events() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(AuditEvent::new(1, AuditAction::Submit, 0));
    sink.record(AuditEvent::new(1, AuditAction::Start, 0));
    sink.record(AuditEvent::new(1, AuditAction::Succeed, 12));

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2].action, AuditAction::Succeed);
    assert_eq!(events[2].at_ms, 12);
}

#[test]
fn test_event_ids_are_unique() {
    let a = AuditEvent::new(1, AuditAction::Cancel, 0);
    let b = AuditEvent::new(1, AuditAction::Cancel, 0);
    assert_ne!(a.event_id, b.event_id);
}

#[test]
fn test_event_serializes_to_json() {
    let event = AuditEvent::new(42, AuditAction::Fail, 1_500);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["task_id"], 42);
    assert_eq!(json["action"], "fail");
    assert_eq!(json["at_ms"], 1_500);

    let back: AuditEvent = serde_json::from_value(json).unwrap();
    assert_eq!(back.event_id, event.event_id);
}
