//! Small shared helpers: seeding, time formatting, remaining-time estimation and host
//! transfers.

use std::time::Duration;

use burn::prelude::*;

use crate::error::{UNet3PlusError, UNet3PlusResult};

/// Seeds the backend's random number generator.
///
/// Call once, before building the model or any data loader; nothing else in the crate
/// reseeds.
pub fn seed_everything<B: Backend>(seed: u64) {
    B::seed(seed);
    tracing::debug!(seed, "seeded backend RNG");
}

/// Formats a duration as `HH:MM:SS`. Hours are not wrapped at 24.
pub fn format_hms(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Estimates remaining training time from the mean epoch duration.
#[derive(Debug, Clone, Default)]
pub struct EtaEstimator {
    total: Duration,
    epochs: u32,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the duration of a finished epoch.
    pub fn record(&mut self, epoch_time: Duration) {
        self.total += epoch_time;
        self.epochs += 1;
    }

    /// Mean epoch duration so far.
    pub fn mean_epoch(&self) -> Duration {
        if self.epochs == 0 {
            Duration::ZERO
        } else {
            self.total / self.epochs
        }
    }

    /// Expected time for `remaining_epochs` more epochs.
    pub fn remaining(&self, remaining_epochs: usize) -> Duration {
        let remaining = u32::try_from(remaining_epochs).unwrap_or(u32::MAX);
        self.mean_epoch().saturating_mul(remaining)
    }
}

/// Copies a tensor to the host as `f32` values.
pub(crate) fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> UNet3PlusResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| UNet3PlusError::TensorDataFailed {
            reason: format!("{e:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_hours_minutes_seconds() {
        assert_eq!(format_hms(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_hms(Duration::from_secs(59)), "00:00:59");
        assert_eq!(format_hms(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_hms(Duration::from_millis(90_999)), "00:01:30");
        assert_eq!(format_hms(Duration::from_secs(100 * 3600)), "100:00:00");
    }

    #[test]
    fn eta_uses_mean_epoch_time() {
        let mut eta = EtaEstimator::new();
        assert_eq!(eta.remaining(10), Duration::ZERO);

        eta.record(Duration::from_secs(10));
        eta.record(Duration::from_secs(20));

        assert_eq!(eta.mean_epoch(), Duration::from_secs(15));
        assert_eq!(eta.remaining(4), Duration::from_secs(60));
        assert_eq!(eta.remaining(0), Duration::ZERO);
    }

    #[test]
    fn eta_never_increases_for_constant_epochs() {
        let mut eta = EtaEstimator::new();
        let total = 5;
        let mut previous = Duration::MAX;
        for epoch in 1..=total {
            eta.record(Duration::from_secs(7));
            let remaining = eta.remaining(total - epoch);
            assert!(remaining <= previous);
            previous = remaining;
        }
        assert_eq!(previous, Duration::ZERO);
    }
}
