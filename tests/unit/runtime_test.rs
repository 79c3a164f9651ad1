//! Tests for tokio spawner utilities

use prometheus_task_gate::core::{Spawn, TaskContext};
use prometheus_task_gate::builders::SchedulerBuilder;
use prometheus_task_gate::runtime::tokio_spawner::TokioSpawner;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

#[test]
fn test_spawner_for_foreign_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let scheduler = SchedulerBuilder::new(2)
        .build_with(TokioSpawner::new(runtime.handle().clone()))
        .unwrap();

    let handle = scheduler
        .submit(|ctx: TaskContext| async move { Ok::<_, anyhow::Error>(ctx.id()) })
        .unwrap();
    let id = handle.id();
    assert_eq!(runtime.block_on(handle).unwrap(), id);
}
