//! X-ray diffraction image reduction
//!
//! Batch orchestration of detector calibration from a calibrant exposure and of the
//! reduction of raw 2D diffraction images into 1D azimuthally integrated patterns
//! (`.xy`) and 2D caked patterns (`.dat`) for downstream fitting tools (xrdfit, MAUD).
//!
//! The integration engine sits behind the [Integrator] trait; [AzimuthalIntegrator]
//! is the built-in pixel histogramming implementation.

pub mod calibrant;
pub mod calibration;
pub mod config;
mod error;
pub mod geometry;
pub mod image;
pub mod integrator;
#[cfg(feature = "plot")]
pub mod plot;
pub mod sweep;
pub mod synthetic;
pub mod units;

pub use calibrant::{Calibrant, KnownCalibrant};
pub use calibration::{calibrate, CalibrationReport, CalibrationRequest, InitialGuess};
pub use config::{load_settings, ReductionConfig, Settings};
pub use error::Error;
pub use geometry::{poni::OverwritePolicy, Detector, Fit2d, Geometry};
pub use image::{read_image, read_mask, Frame, Mask, ReadOptions};
pub use integrator::{
    AzimuthalIntegrator, Integrate1dOptions, Integrate1dResult, Integrate2dOptions,
    Integrate2dResult, Integrator,
};
pub use sweep::{
    azimuthal::azimuthal_integration, caking::caking, caking::CakingVariant, SweepPlan,
    SweepSummary,
};
pub use units::Unit;
