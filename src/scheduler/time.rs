use std::time::SystemTime;
#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Wall clock, for converting persisted timestamps (e.g. last access time) into instants.
    fn system_time(&self) -> SystemTime;

    async fn sleep_until(&mut self, deadline: Instant);

    async fn sleep(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        self.sleep_until(deadline).await;
    }

    /// Instant corresponding to a wall clock time, `None` if it lies beyond the latest
    /// representable instant. Times before the earliest one saturate to now, which is in the past
    /// for any caller that asks.
    fn instant_at(&self, time: SystemTime) -> Option<Instant> {
        let now = self.now();
        match time.duration_since(self.system_time()) {
            Ok(ahead) => now.checked_add(ahead),
            Err(behind) => Some(now.checked_sub(behind.duration()).unwrap_or(now)),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Clock whose time only moves when its controller says so. Wall clock and instants advance
/// together.
#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let origin = MockTime {
        instant: Instant::now(),
        system_time: SystemTime::now(),
    };
    let (tx, rx) = watch::channel(origin);

    (MockClock { time: rx }, MockClockController { time: tx, origin })
}

#[cfg(test)]
#[derive(Copy, Clone, Debug)]
struct MockTime {
    instant: Instant,
    system_time: SystemTime,
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    time: watch::Receiver<MockTime>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.time.borrow().instant
    }

    fn system_time(&self) -> SystemTime {
        self.time.borrow().system_time
    }

    /// Once the controller is gone time stands still, so a pending deadline never passes.
    async fn sleep_until(&mut self, deadline: Instant) {
        while self.time.borrow().instant < deadline {
            if self.time.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    time: watch::Sender<MockTime>,
    origin: MockTime,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn current_time(&self) -> Instant {
        self.time.borrow().instant
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.current_time() - self.origin.instant
    }

    /// Sleepers wake once per call, at the new time. Advance in steps no coarser than what a
    /// test wants to observe: a sleeper woken by a large step sees all of it at once.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let current = *self.time.borrow();
        let next = MockTime {
            instant: current.instant + duration,
            system_time: current.system_time + duration,
        };
        // No receivers left only means nobody is watching the time.
        let _ = self.time.send(next);
    }
}
