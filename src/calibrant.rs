//! Calibrant reference materials
//!
//! A calibrant is the list of d-spacings of its diffraction rings, sorted by decreasing
//! d-spacing. Built-in calibrants are cubic standards whose rings are generated from the
//! lattice parameter and the reflection conditions of the structure. Other calibrants are
//! read from pyFAI `.D` files.

use std::{fmt, fs, path::Path, str::FromStr};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(thiserror::Error, Debug)]
pub enum CalibrantError {
    #[error("Unknown calibrant {0:?}")]
    Unknown(String),
    #[error("Failed to read the calibrant file {0:?}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
    #[error("Invalid d-spacing {1:?} at line {0}")]
    Parse(usize, String),
    #[error("The calibrant {0} has no ring")]
    Empty(String),
}
type Result<T> = std::result::Result<T, CalibrantError>;

/// Reflection conditions of cubic structures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lattice {
    Primitive,
    BodyCentred,
    FaceCentred,
    Diamond,
}
impl Lattice {
    fn allows(&self, h: i32, k: i32, l: i32) -> bool {
        match self {
            Lattice::Primitive => true,
            Lattice::BodyCentred => (h + k + l) % 2 == 0,
            Lattice::FaceCentred => (h % 2 == k % 2) && (k % 2 == l % 2),
            Lattice::Diamond => {
                Lattice::FaceCentred.allows(h, k, l)
                    && !(h % 2 == 0 && (h + k + l) % 4 == 2)
            }
        }
    }
}

/// Built-in calibrants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum KnownCalibrant {
    CeO2,
    LaB6,
    Si,
    Ni,
    Al,
    Au,
    Cu,
    Cr,
}
impl KnownCalibrant {
    /// Cubic lattice parameter [Å] and structure
    pub fn lattice(&self) -> (f64, Lattice) {
        use KnownCalibrant::*;
        match self {
            CeO2 => (5.411651, Lattice::FaceCentred),
            LaB6 => (4.156826, Lattice::Primitive),
            Si => (5.431179, Lattice::Diamond),
            Ni => (3.52387, Lattice::FaceCentred),
            Al => (4.0495, Lattice::FaceCentred),
            Au => (4.07825, Lattice::FaceCentred),
            Cu => (3.61496, Lattice::FaceCentred),
            Cr => (2.8839, Lattice::BodyCentred),
        }
    }
}

/// Largest h²+k²+l² of the generated reflections
const MAX_HKL_NORM: i32 = 200;

/// Cubic d-spacings [Å], sorted by decreasing values
pub fn cubic_d_spacings(a: f64, lattice: Lattice) -> Vec<f64> {
    let h_max = (MAX_HKL_NORM as f64).sqrt() as i32;
    let mut norms: Vec<i32> = (0..=h_max)
        .flat_map(|h| (0..=h).flat_map(move |k| (0..=k).map(move |l| (h, k, l))))
        .filter(|&(h, k, l)| (h, k, l) != (0, 0, 0))
        .filter(|&(h, k, l)| lattice.allows(h, k, l))
        .map(|(h, k, l)| h * h + k * k + l * l)
        .filter(|&n| n <= MAX_HKL_NORM)
        .collect();
    norms.sort_unstable();
    norms.dedup();
    norms.into_iter().map(|n| a / (n as f64).sqrt()).collect()
}

/// Calibrant with an optional wavelength
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrant {
    pub name: String,
    /// ring d-spacings [Å], decreasing
    d_spacings: Vec<f64>,
    /// wavelength [m]
    pub wavelength: Option<f64>,
}
impl Calibrant {
    pub fn new<S: Into<String>>(name: S, mut d_spacings: Vec<f64>) -> Result<Self> {
        let name = name.into();
        d_spacings.retain(|d| d.is_finite() && *d > 0.);
        if d_spacings.is_empty() {
            return Err(CalibrantError::Empty(name));
        }
        d_spacings.sort_by(|a, b| b.total_cmp(a));
        d_spacings.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
        Ok(Self {
            name,
            d_spacings,
            wavelength: None,
        })
    }
    pub fn known(calibrant: KnownCalibrant) -> Self {
        let (a, lattice) = calibrant.lattice();
        Self {
            name: calibrant.to_string(),
            d_spacings: cubic_d_spacings(a, lattice),
            wavelength: None,
        }
    }
    /// Names of the built-in calibrants
    pub fn available() -> Vec<String> {
        KnownCalibrant::iter().map(|c| c.to_string()).collect()
    }
    /// Reads a pyFAI `.D` file: one d-spacing in Å per line, `#` starts a comment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| CalibrantError::Io(path.to_path_buf(), e))?;
        let d_spacings = contents
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let line = line.split('#').next().unwrap_or_default().trim();
                line.split_whitespace().next().map(|value| (i + 1, value))
            })
            .map(|(i, value)| {
                value
                    .parse::<f64>()
                    .map_err(|_| CalibrantError::Parse(i, value.to_string()))
            })
            .collect::<Result<Vec<f64>>>()?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, d_spacings)
    }
    /// Built-in calibrant name or path to a `.D` file
    pub fn resolve(name_or_path: &str) -> Result<Self> {
        if let Ok(known) = KnownCalibrant::from_str(name_or_path) {
            return Ok(Self::known(known));
        }
        let path = Path::new(name_or_path);
        if path.is_file() {
            Self::from_file(path)
        } else {
            Err(CalibrantError::Unknown(name_or_path.to_string()))
        }
    }
    pub fn with_wavelength(self, wavelength: f64) -> Self {
        Self {
            wavelength: Some(wavelength),
            ..self
        }
    }
    pub fn d_spacings(&self) -> &[f64] {
        &self.d_spacings
    }
    pub fn len(&self) -> usize {
        self.d_spacings.len()
    }
    pub fn is_empty(&self) -> bool {
        self.d_spacings.is_empty()
    }
    /// Scattering angles 2θ [rad] of the rings visible at the wavelength, in ring order
    ///
    /// Returns an empty list if the wavelength is not set.
    pub fn two_theta(&self) -> Vec<f64> {
        let Some(wavelength) = self.wavelength else {
            return vec![];
        };
        let wavelength_angstrom = wavelength * 1e10;
        self.d_spacings
            .iter()
            .map(|d| wavelength_angstrom / (2. * d))
            .take_while(|&s| s <= 1.)
            .map(|s| 2. * s.asin())
            .collect()
    }
}
impl fmt::Display for Calibrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Calibrant with {} reflections", self.name, self.len())?;
        if let Some(wavelength) = self.wavelength {
            write!(f, " at wavelength {:e}", wavelength)?;
        }
        Ok(())
    }
}
