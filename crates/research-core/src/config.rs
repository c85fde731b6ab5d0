use std::time::Duration;

use crate::ResearchError;

/// Configuration for the request executor, passed in at construction.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Capacity of each execution's event channel.
    pub event_buffer: usize,
    /// How long a cancelled engine may take to acknowledge before it is dropped.
    pub cancel_grace: Duration,
    pub default_max_concurrent_units: usize,
    pub default_max_iterations: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            event_buffer: 64,
            cancel_grace: Duration::from_secs(5),
            default_max_concurrent_units: 3,
            default_max_iterations: 3,
        }
    }
}

impl ExecutorConfig {
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    pub fn with_cancel_grace(mut self, cancel_grace: Duration) -> Self {
        self.cancel_grace = cancel_grace;
        self
    }

    pub fn validate(&self) -> Result<(), ResearchError> {
        if self.event_buffer == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "event_buffer must be at least 1".into(),
            ));
        }
        if !(1..=5).contains(&self.default_max_concurrent_units)
            || !(1..=5).contains(&self.default_max_iterations)
        {
            return Err(ResearchError::InvalidConfiguration(
                "default limits must be between 1 and 5".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ExecutorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let config = ExecutorConfig::default().with_event_buffer(0);
        assert!(matches!(
            config.validate(),
            Err(ResearchError::InvalidConfiguration(_))
        ));
    }
}
