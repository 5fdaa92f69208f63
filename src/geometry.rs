//! Detector geometry
//!
//! The geometry follows the PONI convention: the point of normal incidence (PONI) is the
//! foot of the perpendicular from the sample to the detector plane, `dist` is the length
//! of that perpendicular and `poni1`/`poni2` are the PONI coordinates along the slow
//! (rows, axis 1) and fast (columns, axis 2) detector axes. The detector is then rotated
//! by `rot1`, `rot2` and `rot3` around axes 1, 2 and the beam. All lengths are in metres
//! and all angles in radians.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod poni;

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("Failed to access the geometry file {0:?}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    #[error("Geometry file {0:?} already exists")]
    AlreadyExists(std::path::PathBuf),
    #[error("Missing `{0}` entry in the geometry file")]
    MissingKey(&'static str),
    #[error("Invalid value for `{0}`: {1:?}")]
    InvalidValue(String, String),
    #[error("Failed to parse the detector configuration")]
    DetectorConfig(#[from] serde_json::Error),
}

/// Flat detector with regular pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    /// pixel size along the rows (slow axis) [m]
    pub pixel1: f64,
    /// pixel size along the columns (fast axis) [m]
    pub pixel2: f64,
    /// detector shape (rows, columns), if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shape: Option<(usize, usize)>,
}
impl Detector {
    pub fn new(pixel1: f64, pixel2: f64) -> Self {
        Self {
            pixel1,
            pixel2,
            max_shape: None,
        }
    }
    pub fn with_shape(self, shape: (usize, usize)) -> Self {
        Self {
            max_shape: Some(shape),
            ..self
        }
    }
}
impl fmt::Display for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detector PixelSize= {:.3e}, {:.3e} m",
            self.pixel1, self.pixel2
        )?;
        if let Some((rows, cols)) = self.max_shape {
            write!(f, " shape=({}, {})", rows, cols)?;
        }
        Ok(())
    }
}

/// Fit2D geometry description
///
/// Distances in millimetres, beam centre in pixels and angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fit2d {
    /// sample to detector distance along the beam [mm]
    pub direct_dist: f64,
    /// column of the direct beam [px]
    pub center_x: f64,
    /// row of the direct beam [px]
    pub center_y: f64,
    /// angle between the beam and the detector normal [deg]
    pub tilt: f64,
    /// orientation of the tilt plane [deg]
    pub tilt_plan_rotation: f64,
}
impl Fit2d {
    pub fn new(direct_dist: f64, center_x: f64, center_y: f64) -> Self {
        Self {
            direct_dist,
            center_x,
            center_y,
            ..Default::default()
        }
    }
}

/// Scattering geometry of a pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelPosition {
    /// scattering angle [rad]
    pub two_theta: f64,
    /// azimuthal angle in ]-π,π] [rad]
    pub chi: f64,
    /// distance to the beam in the plane orthogonal to the beam [m]
    pub radius: f64,
    /// cosine of the incidence angle on the detector
    pub cos_incidence: f64,
}

/// Detector geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub dist: f64,
    pub poni1: f64,
    pub poni2: f64,
    pub rot1: f64,
    pub rot2: f64,
    pub rot3: f64,
    pub wavelength: Option<f64>,
    pub detector: Detector,
}
impl Geometry {
    pub fn new(detector: Detector) -> Self {
        Self {
            dist: 1.,
            poni1: 0.,
            poni2: 0.,
            rot1: 0.,
            rot2: 0.,
            rot3: 0.,
            wavelength: None,
            detector,
        }
    }
    pub fn wavelength(self, wavelength: f64) -> Self {
        Self {
            wavelength: Some(wavelength),
            ..self
        }
    }
    /// Builds the geometry from a Fit2D description
    pub fn from_fit2d(detector: Detector, fit2d: Fit2d) -> Self {
        let mut this = Self::new(detector);
        this.set_fit2d(fit2d);
        this
    }
    /// Resets the distance, PONI and detector tilts from a Fit2D description
    ///
    /// `rot3` and the wavelength are left untouched.
    pub fn set_fit2d(&mut self, fit2d: Fit2d) {
        let (sin_tilt, cos_tilt) = fit2d.tilt.to_radians().sin_cos();
        let (sin_tpr, cos_tpr) = fit2d.tilt_plan_rotation.to_radians().sin_cos();
        let direct_dist = fit2d.direct_dist * 1e-3;
        self.dist = direct_dist * cos_tilt;
        self.rot2 = (sin_tilt * sin_tpr).asin();
        self.rot1 = (sin_tilt * cos_tpr / self.rot2.cos()).clamp(-1., 1.).asin();
        // direct beam impact with respect to the PONI
        let beam1 = direct_dist * sin_tilt * sin_tpr;
        let beam2 = -direct_dist * sin_tilt * cos_tpr;
        self.poni1 = fit2d.center_y * self.detector.pixel1 - beam1;
        self.poni2 = fit2d.center_x * self.detector.pixel2 - beam2;
    }
    /// Returns the Fit2D description of the geometry
    pub fn to_fit2d(&self) -> Fit2d {
        let (sin1, cos1) = self.rot1.sin_cos();
        let (sin2, cos2) = self.rot2.sin_cos();
        let cos_tilt = cos1 * cos2;
        let direct_dist = self.dist / cos_tilt;
        let beam1 = direct_dist * sin2;
        let beam2 = -direct_dist * cos2 * sin1;
        Fit2d {
            direct_dist: direct_dist * 1e3,
            center_x: (self.poni2 + beam2) / self.detector.pixel2,
            center_y: (self.poni1 + beam1) / self.detector.pixel1,
            tilt: cos_tilt.clamp(-1., 1.).acos().to_degrees(),
            tilt_plan_rotation: sin2.atan2(cos2 * sin1).to_degrees(),
        }
    }
    /// Detector to laboratory rotation matrix
    pub fn rotation(&self) -> Matrix3<f64> {
        let (s1, c1) = self.rot1.sin_cos();
        let (s2, c2) = self.rot2.sin_cos();
        let (s3, c3) = self.rot3.sin_cos();
        Matrix3::new(
            c2 * c3,
            c3 * s1 * s2 - c1 * s3,
            -(c1 * c3 * s2 + s1 * s3),
            c2 * s3,
            c1 * c3 + s1 * s2 * s3,
            c3 * s1 - c1 * s2 * s3,
            s2,
            -c2 * s1,
            c1 * c2,
        )
    }
    /// Scattering geometry of the point at (`row`,`col`) in pixel units
    ///
    /// Pixel centres are at half-integer coordinates, see [Geometry::pixel_center].
    pub fn position(&self, row: f64, col: f64) -> PixelPosition {
        self.position_with(&self.rotation(), row, col)
    }
    /// Same as [Geometry::position] with a precomputed [Geometry::rotation]
    pub fn position_with(&self, rotation: &Matrix3<f64>, row: f64, col: f64) -> PixelPosition {
        let d = Vector3::new(
            row * self.detector.pixel1 - self.poni1,
            col * self.detector.pixel2 - self.poni2,
            self.dist,
        );
        let t = rotation * d;
        let radius = t[0].hypot(t[1]);
        PixelPosition {
            two_theta: radius.atan2(t[2]),
            chi: t[0].atan2(t[1]),
            radius,
            cos_incidence: self.dist / d.norm(),
        }
    }
    /// Scattering geometry at the centre of the pixel `[row, col]`
    pub fn pixel_center(&self, row: usize, col: usize) -> PixelPosition {
        self.position(row as f64 + 0.5, col as f64 + 0.5)
    }
    /// Refinable parameters: distance, PONI and detector tilts
    pub fn params(&self) -> [f64; 5] {
        [self.dist, self.poni1, self.poni2, self.rot1, self.rot2]
    }
    pub fn with_params(self, params: [f64; 5]) -> Self {
        let [dist, poni1, poni2, rot1, rot2] = params;
        Self {
            dist,
            poni1,
            poni2,
            rot1,
            rot2,
            ..self
        }
    }
}
impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.detector)?;
        if let Some(wavelength) = self.wavelength {
            writeln!(f, "Wavelength= {:.6e} m", wavelength)?;
        }
        writeln!(
            f,
            "SampleDetDist= {:.6e} m  PONI= {:.6e}, {:.6e} m  rot1={:.6}  rot2={:.6}  rot3={:.6} rad",
            self.dist, self.poni1, self.poni2, self.rot1, self.rot2, self.rot3
        )?;
        let fit2d = self.to_fit2d();
        write!(
            f,
            "DirectBeamDist= {:.3} mm  Center: x={:.3}, y={:.3} pix  Tilt={:.3} deg  tiltPlanRotation= {:.3} deg",
            fit2d.direct_dist, fit2d.center_x, fit2d.center_y, fit2d.tilt, fit2d.tilt_plan_rotation
        )
    }
}
