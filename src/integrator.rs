//! Azimuthal integration engine
//!
//! [Integrator] is the boundary with the integration engine: a frame, a mask and the
//! unit and correction selections go in, radial and intensity arrays come out.
//! [AzimuthalIntegrator] implements it by histogramming pixel centres: every valid pixel
//! adds its intensity to the signal of its bin and its corrections (solid angle and
//! polarization) to the normalization of the bin; the bin intensity is the ratio of the
//! two, or 0 for empty bins.

use crate::{geometry::Geometry, image::Mask, units::Unit};
use itertools::Itertools;
use ndarray::{Array1, Array2, Zip};
use std::cell::RefCell;

mod pixel_map;
pub use pixel_map::PixelMap;

#[derive(thiserror::Error, Debug)]
pub enum IntegrationError {
    #[error("Frame shape {frame:?} does not match {what} shape {expected:?}")]
    ShapeMismatch {
        frame: (usize, usize),
        expected: (usize, usize),
        what: &'static str,
    },
    #[error("The number of bins must be greater than 0")]
    NoBins,
    #[error("The wavelength is required for the `{0}` unit")]
    MissingWavelength(Unit),
    #[error("No valid pixel to integrate")]
    NoValidPixel,
    #[error("Invalid azimuth range ({0}, {1})")]
    AzimuthRange(f64, f64),
}
type Result<T> = std::result::Result<T, IntegrationError>;

/// 1D integration options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrate1dOptions {
    pub unit: Unit,
    /// azimuth range in degrees
    pub azimuth_range: (f64, f64),
    pub correct_solid_angle: bool,
    pub polarization_factor: Option<f64>,
}
impl Default for Integrate1dOptions {
    fn default() -> Self {
        Self {
            unit: Unit::TwoThetaDeg,
            azimuth_range: (-180., 180.),
            correct_solid_angle: true,
            polarization_factor: None,
        }
    }
}

/// 2D integration options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integrate2dOptions {
    pub unit: Unit,
    pub correct_solid_angle: bool,
    pub polarization_factor: Option<f64>,
}
impl Default for Integrate2dOptions {
    fn default() -> Self {
        Self {
            unit: Unit::TwoThetaDeg,
            correct_solid_angle: true,
            polarization_factor: None,
        }
    }
}

/// 1D integrated pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Integrate1dResult {
    /// bin centres
    pub radial: Array1<f64>,
    pub intensity: Array1<f64>,
    pub unit: Unit,
}

/// 2D integrated pattern ("cake")
#[derive(Debug, Clone, PartialEq)]
pub struct Integrate2dResult {
    /// radial bin centres
    pub radial: Array1<f64>,
    /// azimuthal bin centres [deg], anticlockwise from -180°
    pub azimuthal: Array1<f64>,
    /// intensity, one row per azimuthal sector
    pub intensity: Array2<f64>,
    pub unit: Unit,
}

/// Integration engine interface
pub trait Integrator {
    /// Integrates the frame over the azimuth into `npt` radial bins
    fn integrate1d(
        &self,
        data: &Array2<f64>,
        npt: usize,
        mask: Option<&Mask>,
        options: &Integrate1dOptions,
    ) -> Result<Integrate1dResult>;
    /// Integrates the frame into `npt_azim` sectors of `npt_rad` radial bins
    fn integrate2d(
        &self,
        data: &Array2<f64>,
        npt_rad: usize,
        npt_azim: usize,
        mask: Option<&Mask>,
        options: &Integrate2dOptions,
    ) -> Result<Integrate2dResult>;
    /// Detector rotation around the beam [rad]
    fn rot3(&self) -> f64;
    fn set_rot3(&mut self, rot3: f64);
}

/// Pixel histogramming integrator
#[derive(Debug)]
pub struct AzimuthalIntegrator {
    geometry: Geometry,
    cache: RefCell<Option<PixelMap>>,
}
impl AzimuthalIntegrator {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            cache: RefCell::new(None),
        }
    }
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }
    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.cache.replace(None);
    }
    fn with_pixel_map<T>(&self, shape: (usize, usize), f: impl FnOnce(&PixelMap) -> T) -> T {
        let mut cache = self.cache.borrow_mut();
        let map = match cache.take() {
            Some(map) if map.shape() == shape => cache.insert(map),
            _ => {
                log::debug!("Computing the pixel map for a {:?} frame", shape);
                cache.insert(PixelMap::new(&self.geometry, shape))
            }
        };
        f(map)
    }
    fn check_shapes(&self, data: &Array2<f64>, mask: Option<&Mask>) -> Result<()> {
        let frame = data.dim();
        if let Some(expected) = self.geometry.detector.max_shape {
            if expected != frame {
                return Err(IntegrationError::ShapeMismatch {
                    frame,
                    expected,
                    what: "detector",
                });
            }
        }
        if let Some(mask) = mask {
            if mask.shape() != frame {
                return Err(IntegrationError::ShapeMismatch {
                    frame,
                    expected: mask.shape(),
                    what: "mask",
                });
            }
        }
        Ok(())
    }
    fn wavelength(&self, unit: Unit) -> Result<f64> {
        match self.geometry.wavelength {
            Some(wavelength) => Ok(wavelength),
            None if unit.needs_wavelength() => Err(IntegrationError::MissingWavelength(unit)),
            None => Ok(f64::NAN),
        }
    }
}

/// Pixel corrections: solid angle times polarization
fn corrections(
    map: &PixelMap,
    correct_solid_angle: bool,
    polarization_factor: Option<f64>,
) -> Array2<f64> {
    let mut norm = if correct_solid_angle {
        map.solid_angle.clone()
    } else {
        Array2::ones(map.shape())
    };
    if let Some(factor) = polarization_factor {
        norm *= &map.polarization(factor);
    }
    norm
}

/// Regular binning of `[min, max]`
struct Bins {
    min: f64,
    width: f64,
    n: usize,
}
impl Bins {
    fn new(min: f64, max: f64, n: usize) -> Self {
        // the upper edge is nudged so that the largest value falls in the last bin
        let span = (max - min).max(f64::EPSILON * max.abs().max(1.));
        let width = span * (1. + f64::EPSILON) / n as f64;
        Self { min, width, n }
    }
    fn index(&self, value: f64) -> usize {
        (((value - self.min) / self.width) as usize).min(self.n - 1)
    }
    fn centres(&self) -> Array1<f64> {
        Array1::from_iter((0..self.n).map(|i| self.min + (i as f64 + 0.5) * self.width))
    }
}

/// Pixels to integrate: finite, not masked and, optionally, within an azimuth range [deg]
fn selection(
    data: &Array2<f64>,
    mask: Option<&Mask>,
    chi: &Array2<f64>,
    azimuth_range: Option<(f64, f64)>,
) -> Array2<bool> {
    Zip::indexed(data)
        .and(chi)
        .map_collect(|(row, col), &value, &chi| {
            value.is_finite()
                && !mask.is_some_and(|mask| mask.is_masked(row, col))
                && azimuth_range.map_or(true, |(min, max)| {
                    let chi = chi.to_degrees();
                    chi >= min && chi <= max
                })
        })
}

fn radial_range(radial: &Array2<f64>, selected: &Array2<bool>) -> Result<(f64, f64)> {
    radial
        .iter()
        .zip(selected.iter())
        .filter_map(|(x, &keep)| keep.then_some(*x))
        .minmax_by(|a, b| a.total_cmp(b))
        .into_option()
        .ok_or(IntegrationError::NoValidPixel)
}

impl Integrator for AzimuthalIntegrator {
    fn integrate1d(
        &self,
        data: &Array2<f64>,
        npt: usize,
        mask: Option<&Mask>,
        options: &Integrate1dOptions,
    ) -> Result<Integrate1dResult> {
        if npt == 0 {
            return Err(IntegrationError::NoBins);
        }
        self.check_shapes(data, mask)?;
        let (chi_min, chi_max) = options.azimuth_range;
        if !(chi_min < chi_max) {
            return Err(IntegrationError::AzimuthRange(chi_min, chi_max));
        }
        let wavelength = self.wavelength(options.unit)?;
        self.with_pixel_map(data.dim(), |map| -> Result<Integrate1dResult> {
            let radial = map.radial(options.unit, wavelength);
            let norm = corrections(map, options.correct_solid_angle, options.polarization_factor);
            let selected = selection(data, mask, &map.chi, Some((chi_min, chi_max)));
            let (min, max) = radial_range(&radial, &selected)?;
            let bins = Bins::new(min, max, npt);
            let mut signal = Array1::<f64>::zeros(npt);
            let mut count = Array1::<f64>::zeros(npt);
            Zip::from(data)
                .and(&radial)
                .and(&norm)
                .and(&selected)
                .for_each(|&value, &x, &n, &keep| {
                    if keep {
                        let i = bins.index(x);
                        signal[i] += value;
                        count[i] += n;
                    }
                });
            let intensity = Zip::from(&signal)
                .and(&count)
                .map_collect(|&s, &c| if c > 0. { s / c } else { 0. });
            Ok(Integrate1dResult {
                radial: bins.centres(),
                intensity,
                unit: options.unit,
            })
        })
    }

    fn integrate2d(
        &self,
        data: &Array2<f64>,
        npt_rad: usize,
        npt_azim: usize,
        mask: Option<&Mask>,
        options: &Integrate2dOptions,
    ) -> Result<Integrate2dResult> {
        if npt_rad == 0 || npt_azim == 0 {
            return Err(IntegrationError::NoBins);
        }
        self.check_shapes(data, mask)?;
        let wavelength = self.wavelength(options.unit)?;
        self.with_pixel_map(data.dim(), |map| -> Result<Integrate2dResult> {
            let radial = map.radial(options.unit, wavelength);
            let norm = corrections(map, options.correct_solid_angle, options.polarization_factor);
            let selected = selection(data, mask, &map.chi, None);
            let (min, max) = radial_range(&radial, &selected)?;
            let radial_bins = Bins::new(min, max, npt_rad);
            let azimuthal_bins = Bins {
                min: -180.,
                width: 360. / npt_azim as f64,
                n: npt_azim,
            };
            let mut signal = Array2::<f64>::zeros((npt_azim, npt_rad));
            let mut count = Array2::<f64>::zeros((npt_azim, npt_rad));
            Zip::from(data)
                .and(&radial)
                .and(&map.chi)
                .and(&norm)
                .and(&selected)
                .for_each(|&value, &x, &chi, &n, &keep| {
                    if keep {
                        let i = azimuthal_bins.index(chi.to_degrees());
                        let j = radial_bins.index(x);
                        signal[[i, j]] += value;
                        count[[i, j]] += n;
                    }
                });
            let intensity = Zip::from(&signal)
                .and(&count)
                .map_collect(|&s, &c| if c > 0. { s / c } else { 0. });
            Ok(Integrate2dResult {
                radial: radial_bins.centres(),
                azimuthal: azimuthal_bins.centres(),
                intensity,
                unit: options.unit,
            })
        })
    }

    fn rot3(&self) -> f64 {
        self.geometry.rot3
    }

    fn set_rot3(&mut self, rot3: f64) {
        if rot3 != self.geometry.rot3 {
            self.geometry.rot3 = rot3;
            self.cache.replace(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Fit2d};

    fn integrator() -> AzimuthalIntegrator {
        let geometry =
            Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(100., 32., 32.))
                .wavelength(1e-10);
        AzimuthalIntegrator::new(geometry)
    }

    #[test]
    fn flat_field_without_corrections() {
        let ai = integrator();
        let data = Array2::from_elem((64, 64), 3.);
        let options = Integrate1dOptions {
            correct_solid_angle: false,
            ..Default::default()
        };
        let result = ai.integrate1d(&data, 20, None, &options).unwrap();
        assert_eq!(result.radial.len(), 20);
        assert!(result
            .intensity
            .iter()
            .all(|&i| i == 0. || (i - 3.).abs() < 1e-12));
        assert!(result.radial.windows(2).into_iter().all(|w| w[1] > w[0]));
    }

    #[test]
    fn solid_angle_correction_flattens_a_cos3_frame() {
        let ai = integrator();
        let map = PixelMap::new(ai.geometry(), (64, 64));
        let data = map.solid_angle.mapv(|sa| 10. * sa);
        let result = ai
            .integrate1d(&data, 16, None, &Integrate1dOptions::default())
            .unwrap();
        assert!(result.intensity.iter().all(|&i| (i - 10.).abs() < 1e-9));
    }

    #[test]
    fn pixel_map_follows_the_frame_shape() {
        let ai = integrator();
        let options = Integrate1dOptions {
            correct_solid_angle: false,
            ..Default::default()
        };
        let large = ai
            .integrate1d(&Array2::from_elem((64, 64), 1.), 8, None, &options)
            .unwrap();
        let small = ai
            .integrate1d(&Array2::from_elem((16, 16), 1.), 8, None, &options)
            .unwrap();
        assert_eq!(ai.cache.borrow().as_ref().map(|map| map.shape()), Some((16, 16)));
        assert!(small.radial[0] > large.radial[0]);
        let again = ai
            .integrate1d(&Array2::from_elem((64, 64), 1.), 8, None, &options)
            .unwrap();
        assert_eq!(again.radial, large.radial);
        assert_eq!(ai.cache.borrow().as_ref().map(|map| map.shape()), Some((64, 64)));
    }

    #[test]
    fn masked_pixels_are_ignored() {
        let ai = integrator();
        let mut data = Array2::from_elem((64, 64), 1.);
        data[[0, 0]] = 1e6;
        let mut mask = Array2::from_elem((64, 64), false);
        mask[[0, 0]] = true;
        let options = Integrate1dOptions {
            correct_solid_angle: false,
            ..Default::default()
        };
        let result = ai
            .integrate1d(&data, 8, Some(&Mask::from_array(mask)), &options)
            .unwrap();
        assert!(result.intensity.iter().all(|&i| i <= 1. + 1e-12));
    }

    #[test]
    fn mask_shape_mismatch() {
        let ai = integrator();
        let data = Array2::zeros((64, 64));
        let mask = Mask::none((32, 64));
        assert!(matches!(
            ai.integrate1d(&data, 8, Some(&mask), &Integrate1dOptions::default()),
            Err(IntegrationError::ShapeMismatch { what: "mask", .. })
        ));
    }

    #[test]
    fn q_requires_wavelength() {
        let geometry =
            Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(100., 32., 32.));
        let ai = AzimuthalIntegrator::new(geometry);
        let options = Integrate1dOptions {
            unit: Unit::QNm,
            ..Default::default()
        };
        assert!(matches!(
            ai.integrate1d(&Array2::zeros((8, 8)), 4, None, &options),
            Err(IntegrationError::MissingWavelength(Unit::QNm))
        ));
    }

    #[test]
    fn cake_shape_and_sectors() {
        let ai = integrator();
        // left half of the detector (χ around ±180°) is bright
        let data = Array2::from_shape_fn((64, 64), |(_, col)| if col < 32 { 5. } else { 1. });
        let options = Integrate2dOptions {
            correct_solid_angle: false,
            ..Default::default()
        };
        let result = ai.integrate2d(&data, 10, 4, None, &options).unwrap();
        assert_eq!(result.intensity.dim(), (4, 10));
        assert_eq!(result.azimuthal.to_vec(), vec![-135., -45., 45., 135.]);
        let sector_max = |i: usize| result.intensity.row(i).fold(0f64, |a, &b| a.max(b));
        assert!((sector_max(0) - 5.).abs() < 1e-12);
        assert!((sector_max(1) - 1.).abs() < 1e-12);
        assert!((sector_max(2) - 1.).abs() < 1e-12);
        assert!((sector_max(3) - 5.).abs() < 1e-12);
    }

    #[test]
    fn rotation_invalidates_the_pixel_map() {
        let mut ai = integrator();
        let data = Array2::from_shape_fn((64, 64), |(row, col)| (row * 64 + col) as f64);
        let options = Integrate2dOptions {
            correct_solid_angle: false,
            ..Default::default()
        };
        let before = ai.integrate2d(&data, 10, 8, None, &options).unwrap();
        ai.set_rot3(0.3);
        assert_eq!(ai.rot3(), 0.3);
        let after = ai.integrate2d(&data, 10, 8, None, &options).unwrap();
        assert_ne!(before.intensity, after.intensity);
    }

    #[test]
    fn no_bins() {
        let ai = integrator();
        assert!(matches!(
            ai.integrate1d(&Array2::zeros((4, 4)), 0, None, &Default::default()),
            Err(IntegrationError::NoBins)
        ));
    }
}
