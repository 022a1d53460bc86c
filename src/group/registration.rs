use std::fmt;

/// Handle to a subscription. Closing it (explicitly or by dropping it) unsubscribes. Closing is
/// idempotent.
pub struct Registration {
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Registration {
    pub fn new<F>(on_close: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Registration {
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Registration for things that never emit events, e.g. a non-clustered group.
    pub fn empty() -> Self {
        Registration { on_close: None }
    }

    pub fn close(mut self) {
        self.run_on_close();
    }

    fn run_on_close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.run_on_close();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("open", &self.on_close.is_some())
            .finish()
    }
}
