use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct SchedulerOptions {
    /// Upper bound on waiting for the worker to finish its current task when stopping or closing.
    pub close_timeout: Option<Duration>,
    /// Pause between a failed attempt and the next pass. Zero retries on the next pass.
    pub retry_interval: Option<Duration>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct SchedulerOptionsValidated {
    pub close_timeout: Duration,
    pub retry_interval: Duration,
}

impl SchedulerOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.close_timeout == Duration::from_secs(0) {
            return Err("Close timeout must be greater than zero");
        }

        Ok(())
    }
}

impl TryFrom<SchedulerOptions> for SchedulerOptionsValidated {
    type Error = &'static str;

    fn try_from(options: SchedulerOptions) -> Result<Self, Self::Error> {
        let values = SchedulerOptionsValidated {
            close_timeout: options.close_timeout.unwrap_or(Duration::from_secs(5)),
            retry_interval: options.retry_interval.unwrap_or(Duration::from_secs(0)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[derive(Clone, Default)]
pub struct PrimaryOwnerOptions {
    /// Dispatch attempts per call. Attempts after the first only happen when the owner left the
    /// group while the command was in flight.
    pub max_attempts: Option<usize>,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PrimaryOwnerOptionsValidated {
    pub max_attempts: usize,
}

impl TryFrom<PrimaryOwnerOptions> for PrimaryOwnerOptionsValidated {
    type Error = &'static str;

    fn try_from(options: PrimaryOwnerOptions) -> Result<Self, Self::Error> {
        let values = PrimaryOwnerOptionsValidated {
            max_attempts: options.max_attempts.unwrap_or(3),
        };

        if values.max_attempts == 0 {
            return Err("At least one dispatch attempt is required");
        }
        Ok(values)
    }
}
