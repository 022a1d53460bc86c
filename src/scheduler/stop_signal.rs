use tokio_util::sync::CancellationToken;

/// Signals a worker to stop, at the latest when dropped. Aborting also stops.
pub(super) struct Stopper {
    stop: CancellationToken,
    abort: CancellationToken,
}

#[derive(Clone)]
pub(super) struct StopCheck {
    stop: CancellationToken,
    abort: CancellationToken,
}

impl Stopper {
    /// Lets the work in flight finish.
    pub(super) fn stop(&self) {
        self.stop.cancel();
    }

    /// Stops and tells the worker to drop the work in flight.
    pub(super) fn abort(&self) {
        self.abort.cancel();
    }
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl StopCheck {
    pub(super) fn should_stop(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Completes once stop has been signalled.
    pub(super) async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    pub(super) async fn aborted(&self) {
        self.abort.cancelled().await;
    }
}

pub(super) fn new() -> (Stopper, StopCheck) {
    let abort = CancellationToken::new();
    let stop = abort.child_token();

    let stopper = Stopper {
        stop: stop.clone(),
        abort: abort.clone(),
    };
    let stop_check = StopCheck { stop, abort };

    (stopper, stop_check)
}
