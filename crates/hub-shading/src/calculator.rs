//! Environmental calculator strategy interfaces
//!
//! The control loop depends only on these three traits. Concrete
//! implementations wrapping weather services or solar-geometry models are
//! external collaborators and must bound their own execution time; the
//! static implementations here work without any external service.

use thiserror::Error;

use crate::domain::Shading;

/// Errors raised by calculators during a controller run
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("calculator failed: {0}")]
    Failed(String),

    #[error("position calculator returned {got} positions for {expected} shadings")]
    PositionCountMismatch { expected: usize, got: usize },
}

/// Computes the heat gain the building currently wants, in Watts
///
/// Positive values ask for solar gain (heating), negative values ask for
/// shade (cooling).
pub trait WantedHeatGainCalculator: Send + Sync {
    fn calculate_wanted_heat_gain(&self) -> Result<f64, CalculatorError>;
}

/// Estimates the current cloud cover as a fraction in [0, 1]
pub trait CloudCoverCalculator: Send + Sync {
    fn calculate_cloud_cover(&self) -> Result<f64, CalculatorError>;
}

/// Computes a position per shading
///
/// The output must contain exactly one position in [0, 1] per input
/// shading, in the same order.
pub trait PositionCalculator: Send + Sync {
    fn get_positions(
        &self,
        shadings: &[Shading],
        wanted_heat_gain: f64,
        cloud_cover: f64,
    ) -> Result<Vec<f64>, CalculatorError>;
}

/// Heat-gain calculator returning a configured constant
pub struct FixedHeatGainCalculator {
    wanted_heat_gain: f64,
}

impl FixedHeatGainCalculator {
    pub fn new(wanted_heat_gain: f64) -> Self {
        Self { wanted_heat_gain }
    }
}

impl WantedHeatGainCalculator for FixedHeatGainCalculator {
    fn calculate_wanted_heat_gain(&self) -> Result<f64, CalculatorError> {
        Ok(self.wanted_heat_gain)
    }
}

/// Cloud-cover calculator returning a configured constant
pub struct FixedCloudCoverCalculator {
    cloud_cover: f64,
}

impl FixedCloudCoverCalculator {
    pub fn new(cloud_cover: f64) -> Self {
        Self {
            cloud_cover: cloud_cover.clamp(0.0, 1.0),
        }
    }
}

impl CloudCoverCalculator for FixedCloudCoverCalculator {
    fn calculate_cloud_cover(&self) -> Result<f64, CalculatorError> {
        Ok(self.cloud_cover)
    }
}

/// Position calculator shading against unwanted gain, tempered by clouds
///
/// When heat gain is wanted the shadings open to their minimum position.
/// When shade is wanted they close towards their maximum, scaled down by
/// the cloud-cover fraction since a covered sky already blocks most of
/// the gain. Shadings with an active override keep their current
/// position, clamped into their allowed range.
#[derive(Default)]
pub struct CloudCoverPositionCalculator;

impl CloudCoverPositionCalculator {
    pub fn new() -> Self {
        Self
    }
}

impl PositionCalculator for CloudCoverPositionCalculator {
    fn get_positions(
        &self,
        shadings: &[Shading],
        wanted_heat_gain: f64,
        cloud_cover: f64,
    ) -> Result<Vec<f64>, CalculatorError> {
        let shade_fraction = if wanted_heat_gain >= 0.0 {
            0.0
        } else {
            (1.0 - cloud_cover).clamp(0.0, 1.0)
        };

        Ok(shadings
            .iter()
            .map(|shading| {
                if shading.override_active {
                    return shading
                        .current_position
                        .clamp(shading.min_position, shading.max_position);
                }
                let span = shading.max_position - shading.min_position;
                (shading.min_position + shade_fraction * span).clamp(0.0, 1.0)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Site;

    fn shading(name: &str) -> Shading {
        Shading {
            name: name.to_string(),
            current_position: 0.0,
            min_position: 0.0,
            max_position: 1.0,
            override_active: false,
            area: 1.0,
            transparency: 0.0,
            azimuth: 180.0,
            tilt: 90.0,
            site: Site::default(),
        }
    }

    #[test]
    fn test_opens_when_gain_is_wanted() {
        let calc = CloudCoverPositionCalculator::new();
        let positions = calc
            .get_positions(&[shading("a"), shading("b")], 500.0, 0.0)
            .unwrap();
        assert_eq!(positions, vec![0.0, 0.0]);
    }

    #[test]
    fn test_closes_under_clear_sky_when_shade_is_wanted() {
        let calc = CloudCoverPositionCalculator::new();
        let positions = calc.get_positions(&[shading("a")], -500.0, 0.0).unwrap();
        assert_eq!(positions, vec![1.0]);
    }

    #[test]
    fn test_cloud_cover_tempers_shading() {
        let calc = CloudCoverPositionCalculator::new();
        let positions = calc.get_positions(&[shading("a")], -500.0, 0.75).unwrap();
        assert!((positions[0] - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_override_keeps_current_position() {
        let calc = CloudCoverPositionCalculator::new();
        let mut s = shading("a");
        s.override_active = true;
        s.current_position = 0.4;
        let positions = calc.get_positions(&[s], -500.0, 0.0).unwrap();
        assert_eq!(positions, vec![0.4]);
    }

    #[test]
    fn test_positions_respect_min_max() {
        let calc = CloudCoverPositionCalculator::new();
        let mut s = shading("a");
        s.min_position = 0.2;
        s.max_position = 0.8;
        let closed = calc.get_positions(&[s.clone()], -500.0, 0.0).unwrap();
        assert_eq!(closed, vec![0.8]);
        let open = calc.get_positions(&[s], 500.0, 0.0).unwrap();
        assert_eq!(open, vec![0.2]);
    }

    #[test]
    fn test_output_length_matches_input() {
        let calc = CloudCoverPositionCalculator::new();
        let shadings: Vec<Shading> = (0..5).map(|i| shading(&format!("s{i}"))).collect();
        let positions = calc.get_positions(&shadings, -100.0, 0.5).unwrap();
        assert_eq!(positions.len(), shadings.len());
    }
}
