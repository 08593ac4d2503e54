//! Automated shading control
//!
//! This crate implements the hub's shading control loop: a debounced,
//! coalesced scheduler that snapshots shading state, asks pluggable
//! environmental calculators for a wanted heat gain, a cloud-cover
//! estimate and per-shading position targets, and writes the results
//! back through the state tree tagged with its own source id so its own
//! writes never re-trigger it.

pub mod calculator;
pub mod controller;
pub mod domain;

pub use calculator::{
    CalculatorError, CloudCoverCalculator, CloudCoverPositionCalculator, FixedCloudCoverCalculator,
    FixedHeatGainCalculator, PositionCalculator, WantedHeatGainCalculator,
};
pub use controller::{ControllerConfig, ControllerError, ShadingController, CONTROLLER_SOURCE};
pub use domain::{Shading, Site};
