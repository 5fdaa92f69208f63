use crate::{
    calibrant::CalibrantError, calibration::CalibrationError, config::ConfigError,
    geometry::GeometryError, image::ImageError, integrator::IntegrationError, sweep::SweepError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `config` module")]
    Config(#[from] ConfigError),
    #[error("Error in the `image` module")]
    Image(#[from] ImageError),
    #[error("Error in the `geometry` module")]
    Geometry(#[from] GeometryError),
    #[error("Error in the `calibrant` module")]
    Calibrant(#[from] CalibrantError),
    #[error("Error in the `calibration` module")]
    Calibration(#[from] CalibrationError),
    #[error("Error in the `integrator` module")]
    Integration(#[from] IntegrationError),
    #[error("Error in the `sweep` module")]
    Sweep(#[from] SweepError),
}
