use thiserror::Error;

use super::{settings::EstimationSettings, state::StateEstimation};
use crate::Instant;

/// Health reported by a stage for one cycle. Ordered by severity, so the
/// pipeline result is the maximum over its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterResult {
    #[default]
    Uninitialised,
    Ok,
    Warning,
    Critical,
    Error,
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterInitError {
    #[error("Implausible variance {value} for {name}[{index}]")]
    ImplausibleVariance {
        name: &'static str,
        index: usize,
        value: f32,
    },

    #[error("Home location magnetic field is not configured")]
    MissingMagneticField,

    #[error("Invalid value {value} for {name}")]
    InvalidParameter { name: &'static str, value: f32 },
}

/// One step of a filter pipeline.
pub trait StateFilter {
    fn name(&self) -> &'static str;

    /// Resets the stage and loads its configuration. Called every time the
    /// pipeline is rebuilt.
    fn init(&mut self, settings: &EstimationSettings) -> Result<(), FilterInitError>;

    fn filter(&mut self, now: Instant, state: &mut StateEstimation) -> FilterResult;
}

const MIN_VARIANCE: f32 = 1e-15;

/// Rejects variances that are non-finite or too close to zero.
pub fn check_variances(name: &'static str, values: &[f32]) -> Result<(), FilterInitError> {
    match values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < MIN_VARIANCE)
    {
        Some((index, value)) => Err(FilterInitError::ImplausibleVariance {
            name,
            index,
            value: *value,
        }),
        None => Ok(()),
    }
}

/// Accepts finite values in `[min, max)`.
pub fn check_range(name: &'static str, value: f32, min: f32, max: f32) -> Result<(), FilterInitError> {
    if value.is_finite() && value >= min && value < max {
        Ok(())
    } else {
        Err(FilterInitError::InvalidParameter { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_severity_order() {
        assert!(FilterResult::Uninitialised < FilterResult::Ok);
        assert!(FilterResult::Ok < FilterResult::Warning);
        assert!(FilterResult::Warning < FilterResult::Critical);
        assert!(FilterResult::Critical < FilterResult::Error);
    }

    #[test]
    fn test_check_variances() {
        assert_eq!(check_variances("P", &[1.0, 1e-6]), Ok(()));
        assert_eq!(
            check_variances("R", &[1.0, 0.0]),
            Err(FilterInitError::ImplausibleVariance {
                name: "R",
                index: 1,
                value: 0.0
            })
        );
        assert!(check_variances("Q", &[f32::INFINITY]).is_err());
        assert!(check_variances("Q", &[-1.0]).is_err());
        assert!(check_variances("Q", &[f32::NAN]).is_err());
    }
}
