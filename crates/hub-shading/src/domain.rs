//! Transient shading domain objects
//!
//! Materialized from the state tree at the start of every controller run
//! and handed to the position calculator; never persisted themselves.

/// Site geometry shared by all shadings
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Site {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
}

/// One controllable window covering
///
/// Positions run from 0.0 (fully open) to 1.0 (fully closed). The
/// override flag is advisory: calculators are expected to honor it, the
/// controller does not suppress writes itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Shading {
    pub name: String,
    pub current_position: f64,
    pub min_position: f64,
    pub max_position: f64,
    pub override_active: bool,
    /// Glazed area in m2
    pub area: f64,
    /// Fraction of irradiance passing the closed shading
    pub transparency: f64,
    /// Facade azimuth in degrees
    pub azimuth: f64,
    /// Facade tilt in degrees, 90 is vertical
    pub tilt: f64,
    pub site: Site,
}
