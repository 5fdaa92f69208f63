//! Automatic control point extraction
//!
//! The rings expected from the current geometry are searched within a window around their
//! nominal 2θ. Each ring window is split into azimuthal sectors and the brightest pixel of
//! a sector becomes a control point if it stands out of the window background.

use super::{CalibrationError, Result};
use crate::{
    calibrant::Calibrant, geometry::Geometry, image::Mask, integrator::PixelMap,
};
use ndarray::Array2;
use std::f64::consts::PI;

/// A ring pixel position in pixel coordinates (pixel centres at half-integers)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub row: f64,
    pub col: f64,
    /// calibrant ring index
    pub ring: usize,
    pub intensity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// number of rings to search for, starting from the innermost
    pub max_rings: usize,
    /// number of azimuthal sectors per ring
    pub sectors: usize,
    /// half-width of the ring window as a fraction of the gap to the nearest ring
    pub window_fraction: f64,
    /// the sector maximum must exceed the window mean by this many standard deviations
    pub threshold_sigma: f64,
    pub min_points_per_ring: usize,
    pub min_rings: usize,
}
impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_rings: 5,
            sectors: 72,
            window_fraction: 0.25,
            threshold_sigma: 1.,
            min_points_per_ring: 5,
            min_rings: 1,
        }
    }
}
impl ExtractOptions {
    pub fn max_rings(self, max_rings: usize) -> Self {
        Self { max_rings, ..self }
    }
}

#[derive(Default, Clone, Copy)]
struct WindowStats {
    n: f64,
    sum: f64,
    sum2: f64,
}
impl WindowStats {
    fn add(&mut self, value: f64) {
        self.n += 1.;
        self.sum += value;
        self.sum2 += value * value;
    }
    fn mean_std(&self) -> (f64, f64) {
        let mean = self.sum / self.n;
        let var = (self.sum2 / self.n - mean * mean).max(0.);
        (mean, var.sqrt())
    }
}

/// Ring windows: (ring index, 2θ, half-width), sorted by 2θ
fn ring_windows(
    ring_two_theta: &[f64],
    max_rings: usize,
    coverage: (f64, f64),
    window_fraction: f64,
) -> Vec<(usize, f64, f64)> {
    ring_two_theta
        .iter()
        .enumerate()
        .filter(|&(_, &tth)| tth >= coverage.0 && tth <= coverage.1)
        .take(max_rings)
        .map(|(i, &tth)| {
            let gap = [
                i.checked_sub(1).map(|j| tth - ring_two_theta[j]),
                ring_two_theta.get(i + 1).map(|next| next - tth),
            ]
            .into_iter()
            .flatten()
            .fold(f64::INFINITY, f64::min);
            let gap = if gap.is_finite() { gap } else { tth };
            (i, tth, window_fraction * gap)
        })
        .collect()
}

/// Intensity weighted centroid of the 3x3 neighbourhood above `background`
fn centroid(data: &Array2<f64>, row: usize, col: usize, background: f64) -> (f64, f64) {
    let (rows, cols) = data.dim();
    let mut w_sum = 0.;
    let mut r_sum = 0.;
    let mut c_sum = 0.;
    for r in row.saturating_sub(1)..(row + 2).min(rows) {
        for c in col.saturating_sub(1)..(col + 2).min(cols) {
            let w = (data[[r, c]] - background).max(0.);
            if w.is_finite() {
                w_sum += w;
                r_sum += w * (r as f64 + 0.5);
                c_sum += w * (c as f64 + 0.5);
            }
        }
    }
    if w_sum > 0. {
        (r_sum / w_sum, c_sum / w_sum)
    } else {
        (row as f64 + 0.5, col as f64 + 0.5)
    }
}

/// Extracts control points on the calibrant rings expected from `geometry`
pub fn extract_control_points(
    data: &Array2<f64>,
    mask: Option<&Mask>,
    geometry: &Geometry,
    calibrant: &Calibrant,
    options: &ExtractOptions,
) -> Result<Vec<ControlPoint>> {
    if let Some(mask) = mask {
        if mask.shape() != data.dim() {
            return Err(CalibrationError::MaskShape {
                mask: mask.shape(),
                frame: data.dim(),
            });
        }
    }
    let wavelength = calibrant
        .wavelength
        .or(geometry.wavelength)
        .ok_or(CalibrationError::MissingWavelength)?;
    let ring_two_theta = calibrant.clone().with_wavelength(wavelength).two_theta();
    let map = PixelMap::new(geometry, data.dim());
    let coverage = map
        .two_theta
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), &x| {
            (min.min(x), max.max(x))
        });
    let windows = ring_windows(
        &ring_two_theta,
        options.max_rings,
        coverage,
        options.window_fraction,
    );
    log::info!(
        "Searching {} rings of {} in 2θ [{:.3}, {:.3}] deg",
        windows.len(),
        calibrant.name,
        coverage.0.to_degrees(),
        coverage.1.to_degrees()
    );

    let n_sectors = options.sectors.max(1);
    let mut stats = vec![WindowStats::default(); windows.len()];
    // brightest pixel (value, row, col) per ring and sector
    let mut best: Vec<Vec<Option<(f64, usize, usize)>>> = vec![vec![None; n_sectors]; windows.len()];
    for ((row, col), &value) in data.indexed_iter() {
        if !value.is_finite() || mask.is_some_and(|mask| mask.is_masked(row, col)) {
            continue;
        }
        let tth = map.two_theta[[row, col]];
        let Some(k) = windows
            .iter()
            .position(|&(_, ring, half)| (tth - ring).abs() <= half)
        else {
            continue;
        };
        stats[k].add(value);
        let chi = map.chi[[row, col]];
        let sector = ((((chi + PI) / (2. * PI)) * n_sectors as f64) as usize).min(n_sectors - 1);
        let slot = &mut best[k][sector];
        if slot.map_or(true, |(v, _, _)| value > v) {
            *slot = Some((value, row, col));
        }
    }

    let mut control_points = vec![];
    let mut n_rings = 0;
    for ((&(ring, tth, _), stats), sectors) in windows.iter().zip(&stats).zip(&best) {
        if stats.n < 1. {
            continue;
        }
        let (mean, std) = stats.mean_std();
        let threshold = mean + options.threshold_sigma * std;
        let ring_points: Vec<ControlPoint> = sectors
            .iter()
            .flatten()
            .filter(|(value, _, _)| *value > threshold)
            .map(|&(value, row, col)| {
                let (row, col) = centroid(data, row, col, mean);
                ControlPoint {
                    row,
                    col,
                    ring,
                    intensity: value,
                }
            })
            .collect();
        log::debug!(
            "ring #{} (2θ={:.4} deg): {} control points",
            ring,
            tth.to_degrees(),
            ring_points.len()
        );
        if ring_points.len() >= options.min_points_per_ring {
            n_rings += 1;
            control_points.extend(ring_points);
        }
    }
    if n_rings < options.min_rings.max(1) {
        return Err(CalibrationError::TooFewRings {
            found: n_rings,
            required: options.min_rings.max(1),
        });
    }
    log::info!(
        "Extracted {} control points on {} rings",
        control_points.len(),
        n_rings
    );
    Ok(control_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_are_fractions_of_ring_gaps() {
        let rings = [0.1, 0.2, 0.4, 0.8];
        let windows = ring_windows(&rings, 3, (0.15, 1.), 0.25);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].0, 1);
        assert!((windows[0].2 - 0.025).abs() < 1e-12);
        assert!((windows[1].2 - 0.05).abs() < 1e-12);
        assert!((windows[2].2 - 0.1).abs() < 1e-12);
    }

    #[test]
    fn centroid_of_symmetric_peak() {
        let mut data = Array2::zeros((5, 5));
        data[[2, 2]] = 4.;
        data[[2, 1]] = 1.;
        data[[2, 3]] = 1.;
        let (row, col) = centroid(&data, 2, 2, 0.);
        assert!((row - 2.5).abs() < 1e-12);
        assert!((col - 2.5).abs() < 1e-12);
    }

    #[test]
    fn mask_shape_is_checked() {
        use crate::{calibrant::KnownCalibrant, geometry::{Detector, Fit2d}};
        let geometry = Geometry::from_fit2d(Detector::new(1e-4, 1e-4), Fit2d::new(100., 32., 32.))
            .wavelength(5e-11);
        let mask = Mask::none((32, 32));
        assert!(matches!(
            extract_control_points(
                &Array2::zeros((64, 64)),
                Some(&mask),
                &geometry,
                &Calibrant::known(KnownCalibrant::LaB6),
                &ExtractOptions::default(),
            ),
            Err(CalibrationError::MaskShape {
                mask: (32, 32),
                frame: (64, 64)
            })
        ));
    }
}
