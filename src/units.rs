//! Radial units of integrated patterns

use serde::{Deserialize, Serialize};
use std::{f64::consts::PI, fmt, str::FromStr};
use strum_macros::EnumIter;

/// Radial unit of an integration result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumIter)]
pub enum Unit {
    /// Scattering angle 2θ in degrees
    #[default]
    #[serde(rename = "2th_deg")]
    TwoThetaDeg,
    /// Scattering angle 2θ in radians
    #[serde(rename = "2th_rad")]
    TwoThetaRad,
    /// Scattering vector modulus in inverse nanometres
    #[serde(rename = "q_nm^-1")]
    QNm,
    /// Distance to the direct beam in the plane orthogonal to the beam, in millimetres
    #[serde(rename = "r_mm")]
    RadiusMm,
}
impl Unit {
    pub fn name(&self) -> &'static str {
        match self {
            Unit::TwoThetaDeg => "2th_deg",
            Unit::TwoThetaRad => "2th_rad",
            Unit::QNm => "q_nm^-1",
            Unit::RadiusMm => "r_mm",
        }
    }
    /// Whether the conversion needs the wavelength
    pub fn needs_wavelength(&self) -> bool {
        matches!(self, Unit::QNm)
    }
    /// Converts a pixel position to the unit
    ///
    /// `two_theta` is in radians, `radius` in metres and `wavelength` in metres.
    pub fn convert(&self, two_theta: f64, radius: f64, wavelength: f64) -> f64 {
        match self {
            Unit::TwoThetaDeg => two_theta.to_degrees(),
            Unit::TwoThetaRad => two_theta,
            Unit::QNm => 4e-9 * PI * (0.5 * two_theta).sin() / wavelength,
            Unit::RadiusMm => radius * 1e3,
        }
    }
}
impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "2th_deg" => Ok(Unit::TwoThetaDeg),
            "2th_rad" => Ok(Unit::TwoThetaRad),
            "q_nm^-1" | "q_nm" => Ok(Unit::QNm),
            "r_mm" => Ok(Unit::RadiusMm),
            other => Err(format!(
                "invalid unit '{other}', expected 2th_deg|2th_rad|q_nm^-1|r_mm"
            )),
        }
    }
}
