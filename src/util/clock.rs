//! Time sources and cancellable timers.
//!
//! Every time-based decision in the crate goes through a [`Clock`]: the deadline
//! wrapper arms a [`Timer`], the retry loop sleeps between attempts, and the rate
//! limiter reads [`Clock::now`]. Production code uses [`SystemClock`]; tests
//! either pause tokio time or drive a [`ManualClock`] by hand.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;

/// Milliseconds elapsed since the clock's origin.
pub type Timestamp = u128;

/// A substitutable source of current time and delayed wake-ups.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since this clock's origin.
    fn now(&self) -> Timestamp;

    /// Arm a timer that resolves once `duration` has elapsed.
    fn after(&self, duration: Duration) -> Timer;
}

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cloneable cancellation handle for a [`Timer`].
#[derive(Clone)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ARMED)),
        }
    }

    /// Cancel the timer. Returns `true` only for the call that disarmed it;
    /// cancelling a fired or already cancelled timer is a no-op.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the timer resolved.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Whether the timer was cancelled before resolving.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    fn fire(&self) -> bool {
        self.state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            ARMED => "armed",
            FIRED => "fired",
            _ => "cancelled",
        };
        f.debug_struct("TimerHandle").field("state", &state).finish()
    }
}

/// A delayed wake-up produced by [`Clock::after`].
///
/// Awaiting the timer completes once the delay elapses. After [`Timer::cancel`]
/// the timer never completes, so a cancelled timer should be dropped rather than
/// awaited. Dropping an armed timer releases its registration with the clock.
pub struct Timer {
    handle: TimerHandle,
    delay: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl Timer {
    /// Wrap an arbitrary delay future as a cancellable timer.
    pub fn new<F>(delay: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::with_handle(TimerHandle::new(), delay)
    }

    fn with_handle<F>(handle: TimerHandle, delay: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle,
            delay: Box::pin(delay),
        }
    }

    /// A handle that can cancel this timer from elsewhere.
    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Cancel the timer; idempotent.
    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }

    /// Whether the timer resolved.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.handle.is_fired()
    }

    /// Whether the timer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.handle.state.load(Ordering::Acquire) {
            FIRED => return Poll::Ready(()),
            CANCELLED => return Poll::Pending,
            _ => {}
        }
        match this.delay.as_mut().poll(cx) {
            Poll::Ready(()) if this.handle.fire() => Poll::Ready(()),
            // Lost the race against `cancel`.
            _ => Poll::Pending,
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("handle", &self.handle).finish()
    }
}

/// Real time backed by `tokio::time`.
///
/// Because it uses tokio's clock, tests running with paused time
/// (`#[tokio::test(start_paused = true)]`) see deterministic, auto-advanced time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Create a clock whose origin is the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        self.origin.elapsed().as_millis()
    }

    fn after(&self, duration: Duration) -> Timer {
        Timer::new(tokio::time::sleep(duration))
    }
}

struct SleeperState {
    due: bool,
    waker: Option<Waker>,
}

struct Sleeper {
    wake_at: Timestamp,
    seq: u64,
    handle: TimerHandle,
    state: Mutex<SleeperState>,
}

struct ManualDelay {
    sleeper: Arc<Sleeper>,
}

impl Future for ManualDelay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.sleeper.state.lock();
        if state.due {
            Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[derive(Default)]
struct ManualInner {
    now: Timestamp,
    next_seq: u64,
    sleepers: Vec<Weak<Sleeper>>,
}

/// Virtual clock for deterministic tests.
///
/// Time only moves when [`ManualClock::advance`] is called; timers that become
/// due are woken in deadline order, ties broken by the order they were armed.
#[derive(Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualInner>>,
    fired: Arc<AtomicUsize>,
}

impl ManualClock {
    /// Create a manual clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward and wake every timer that became due.
    pub fn advance(&self, by: Duration) {
        let due = {
            let mut inner = self.inner.lock();
            inner.now += by.as_millis();
            let now = inner.now;
            let mut due = Vec::new();
            inner.sleepers.retain(|weak| match weak.upgrade() {
                Some(sleeper) if sleeper.wake_at <= now => {
                    due.push(sleeper);
                    false
                }
                Some(_) => true,
                None => false,
            });
            due
        };
        self.wake(due);
    }

    /// Number of armed timers that are still alive and not yet due.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner
            .lock()
            .sleepers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|sleeper| sleeper.handle.is_armed())
            .count()
    }

    /// Number of armed timers that have become due so far.
    #[must_use]
    pub fn fired_timers(&self) -> usize {
        self.fired.load(Ordering::Acquire)
    }

    fn wake(&self, mut due: Vec<Arc<Sleeper>>) {
        due.sort_by_key(|sleeper| (sleeper.wake_at, sleeper.seq));
        for sleeper in due {
            if sleeper.handle.is_armed() {
                self.fired.fetch_add(1, Ordering::AcqRel);
            }
            let waker = {
                let mut state = sleeper.state.lock();
                state.due = true;
                state.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.inner.lock().now
    }

    fn after(&self, duration: Duration) -> Timer {
        let handle = TimerHandle::new();
        // Round up so a sub-millisecond delay still waits for the next tick.
        let delay_ms = duration.as_nanos().div_ceil(1_000_000);
        let sleeper = {
            let mut inner = self.inner.lock();
            let sleeper = Arc::new(Sleeper {
                wake_at: inner.now + delay_ms,
                seq: inner.next_seq,
                handle: handle.clone(),
                state: Mutex::new(SleeperState {
                    due: delay_ms == 0,
                    waker: None,
                }),
            });
            inner.next_seq += 1;
            if delay_ms > 0 {
                inner.sleepers.push(Arc::downgrade(&sleeper));
            }
            sleeper
        };
        Timer::with_handle(handle, ManualDelay { sleeper })
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
