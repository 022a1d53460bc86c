use std::future::Future;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Dedicated task that handles submitted events one at a time, in submission order.
///
/// Each event is handled on its own spawned task and joined before the next one starts, so a
/// handler that panics is logged and the worker moves on. Aborting the worker also aborts the
/// handler in flight.
pub(crate) struct SerialWorker<E> {
    logger: slog::Logger,
    sender: Mutex<Option<mpsc::UnboundedSender<E>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    abort: CancellationToken,
}

impl<E: Send + 'static> SerialWorker<E> {
    pub(crate) fn spawn<H, F>(logger: slog::Logger, mut handler: H) -> Self
    where
        H: FnMut(E) -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let abort = CancellationToken::new();
        let task_abort = abort.clone();
        let task_logger = logger.clone();
        let join_handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = task_abort.cancelled() => break,
                };

                let mut handle = tokio::spawn(handler(event));
                tokio::select! {
                    result = &mut handle => {
                        if let Err(e) = result {
                            slog::error!(task_logger, "Worker handler failed: {}", e);
                        }
                    }
                    _ = task_abort.cancelled() => {
                        handle.abort();
                        break;
                    }
                }
            }
            slog::debug!(task_logger, "Worker exiting");
        });

        SerialWorker {
            logger,
            sender: Mutex::new(Some(tx)),
            join_handle: Mutex::new(Some(join_handle)),
            abort,
        }
    }

    /// Returns false once the worker is shut down.
    pub(crate) fn submit(&self, event: E) -> bool {
        let sender = self.sender.lock().expect("SerialWorker sender mutex guard poison");
        match sender.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

impl<E> SerialWorker<E> {
    /// Stops accepting events and waits up to `timeout` for the queued ones to be handled, then
    /// aborts. Idempotent.
    pub(crate) async fn shutdown(&self, timeout: Duration) {
        let join_handle = match self.take_handle() {
            Some(join_handle) => join_handle,
            None => return,
        };

        join_with_timeout(&self.logger, join_handle, self.abort.clone(), timeout).await;
    }

    /// Like `shutdown`, but doesn't wait. The bounded join runs in the background if there is a
    /// runtime to run it on, otherwise the worker is aborted right away.
    pub(crate) fn shutdown_in_background(&self, timeout: Duration) {
        let join_handle = match self.take_handle() {
            Some(join_handle) => join_handle,
            None => return,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let logger = self.logger.clone();
                let abort = self.abort.clone();
                runtime.spawn(async move {
                    join_with_timeout(&logger, join_handle, abort, timeout).await;
                });
            }
            Err(_) => self.abort.cancel(),
        }
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.sender
            .lock()
            .expect("SerialWorker sender mutex guard poison")
            .take();

        self.join_handle
            .lock()
            .expect("SerialWorker join handle mutex guard poison")
            .take()
    }
}

impl<E> Drop for SerialWorker<E> {
    fn drop(&mut self) {
        let running = match self.join_handle.lock() {
            Ok(mut join_handle) => join_handle.take().is_some(),
            Err(_) => true,
        };
        if running {
            self.abort.cancel();
        }
    }
}

async fn join_with_timeout(
    logger: &slog::Logger,
    mut join_handle: JoinHandle<()>,
    abort: CancellationToken,
    timeout: Duration,
) {
    if tokio::time::timeout(timeout, &mut join_handle).await.is_err() {
        slog::warn!(logger, "Worker did not drain within {:?}, aborting", timeout);
        abort.cancel();
        if tokio::time::timeout(timeout, &mut join_handle).await.is_err() {
            join_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_logger;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn handles_in_order_and_survives_panics() {
        // -- setup --
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let worker = SerialWorker::spawn(test_logger(), move |n: u32| {
            let seen = seen_clone.clone();
            async move {
                if n == 2 {
                    panic!("bad event");
                }
                seen.lock().unwrap().push(n);
            }
        });

        // -- execute --
        for n in 1..=4 {
            assert!(worker.submit(n));
        }
        worker.shutdown(Duration::from_secs(5)).await;

        // -- verify --
        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 4]);
        assert!(!worker.submit(5));
        worker.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn stuck_handler_is_aborted() {
        let worker = SerialWorker::spawn(test_logger(), |_: ()| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        worker.submit(());

        tokio::time::timeout(Duration::from_secs(5), worker.shutdown(Duration::from_millis(10)))
            .await
            .expect("Shutdown should be bounded");
    }

    #[tokio::test]
    async fn stuck_handler_stops_running_after_shutdown() {
        // -- setup --
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let worker = SerialWorker::spawn(test_logger(), move |_: ()| {
            let ticks = ticks_clone.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });
        worker.submit(());
        worker.submit(());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // -- execute --
        worker.shutdown(Duration::from_millis(10)).await;

        // -- verify --
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = ticks.load(Ordering::SeqCst);
        assert!(after_shutdown > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn drop_aborts_running_handler() {
        // -- setup --
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks_clone = ticks.clone();
        let worker = SerialWorker::spawn(test_logger(), move |_: ()| {
            let ticks = ticks_clone.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });
        worker.submit(());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // -- execute --
        drop(worker);

        // -- verify --
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }
}
