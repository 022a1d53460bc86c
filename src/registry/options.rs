use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct RegistryOptions {
    /// Upper bound on draining a listener's or the topology worker's queue when closing.
    pub worker_shutdown_timeout: Option<Duration>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct RegistryOptionsValidated {
    pub worker_shutdown_timeout: Duration,
}

impl TryFrom<RegistryOptions> for RegistryOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RegistryOptions) -> Result<Self, Self::Error> {
        let values = RegistryOptionsValidated {
            worker_shutdown_timeout: options.worker_shutdown_timeout.unwrap_or(Duration::from_secs(5)),
        };

        if values.worker_shutdown_timeout == Duration::from_secs(0) {
            return Err("Worker shutdown timeout must be greater than zero");
        }
        Ok(values)
    }
}
