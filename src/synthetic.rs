//! Synthetic calibrant frames
//!
//! Debye-Scherrer rings with a Gaussian profile in 2θ on a flat background, for trials
//! of the calibration and of the integration sweeps without beamline data.

use crate::{calibrant::Calibrant, geometry::Geometry, integrator::PixelMap};
use ndarray::Array2;

/// Renders the calibrant rings seen by the detector
///
/// The rings have a standard deviation of `ring_width_deg` in 2θ and a peak value of
/// `amplitude` above `background`. The calibrant wavelength takes precedence over the
/// geometry one; without any wavelength only the background is rendered.
pub fn calibrant_frame(
    geometry: &Geometry,
    calibrant: &Calibrant,
    shape: (usize, usize),
    ring_width_deg: f64,
    amplitude: f64,
    background: f64,
) -> Array2<f64> {
    let rings = match calibrant.wavelength.or(geometry.wavelength) {
        Some(wavelength) => calibrant.clone().with_wavelength(wavelength).two_theta(),
        None => vec![],
    };
    let sigma = ring_width_deg.to_radians();
    let map = PixelMap::new(geometry, shape);
    map.two_theta.mapv(|tth| {
        background
            + rings
                .iter()
                .filter(|&&ring| (tth - ring).abs() < 8. * sigma)
                .map(|ring| amplitude * (-0.5 * ((tth - ring) / sigma).powi(2)).exp())
                .sum::<f64>()
    })
}
