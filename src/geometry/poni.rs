//! PONI geometry files
//!
//! Plain text `key: value` files as written by pyFAI (version 2, with a JSON detector
//! configuration). Version 1 files with `PixelSize1`/`PixelSize2` entries are read too.

use super::{Detector, Geometry, GeometryError};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};

type Result<T> = std::result::Result<T, GeometryError>;

/// What to do when the geometry file already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// delete the existing file first
    #[default]
    Replace,
    /// return [GeometryError::AlreadyExists]
    FailIfExists,
}

#[derive(Debug, Serialize, Deserialize)]
struct DetectorConfig {
    pixel1: f64,
    pixel2: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_shape: Option<[usize; 2]>,
}

/// Formats a float the way Python `repr` does for the usual magnitudes
fn repr(value: f64) -> String {
    let abs = value.abs();
    if value == 0. || (1e-4..1e16).contains(&abs) {
        format!("{:?}", value)
    } else {
        format!("{:e}", value)
    }
}

impl Geometry {
    /// Serializes the geometry in the PONI format
    pub fn to_poni(&self) -> String {
        let config = DetectorConfig {
            pixel1: self.detector.pixel1,
            pixel2: self.detector.pixel2,
            max_shape: self.detector.max_shape.map(|(rows, cols)| [rows, cols]),
        };
        let mut poni = String::from("# Nota: C-Order, 1 refers to the Y axis, 2 to the X axis \n");
        poni.push_str(&format!(
            "# Written by {} {}\n",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ));
        poni.push_str("poni_version: 2\n");
        poni.push_str("Detector: Detector\n");
        poni.push_str(&format!(
            "Detector_config: {}\n",
            serde_json::to_string(&config).unwrap_or_default()
        ));
        poni.push_str(&format!("Distance: {}\n", repr(self.dist)));
        poni.push_str(&format!("Poni1: {}\n", repr(self.poni1)));
        poni.push_str(&format!("Poni2: {}\n", repr(self.poni2)));
        poni.push_str(&format!("Rot1: {}\n", repr(self.rot1)));
        poni.push_str(&format!("Rot2: {}\n", repr(self.rot2)));
        poni.push_str(&format!("Rot3: {}\n", repr(self.rot3)));
        if let Some(wavelength) = self.wavelength {
            poni.push_str(&format!("Wavelength: {}\n", repr(wavelength)));
        }
        poni
    }
    /// Parses a PONI document
    pub fn from_poni(contents: &str) -> Result<Self> {
        let entries: HashMap<String, String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
            .collect();
        let number = |key: &'static str| -> Result<f64> {
            let value = entries
                .get(&key.to_lowercase())
                .ok_or(GeometryError::MissingKey(key))?;
            value
                .parse::<f64>()
                .map_err(|_| GeometryError::InvalidValue(key.to_string(), value.clone()))
        };
        let detector = if let Some(config) = entries.get("detector_config") {
            let config: DetectorConfig = serde_json::from_str(config)?;
            Detector {
                pixel1: config.pixel1,
                pixel2: config.pixel2,
                max_shape: config.max_shape.map(|[rows, cols]| (rows, cols)),
            }
        } else {
            Detector::new(number("PixelSize1")?, number("PixelSize2")?)
        };
        Ok(Self {
            dist: number("Distance")?,
            poni1: number("Poni1")?,
            poni2: number("Poni2")?,
            rot1: number("Rot1")?,
            rot2: number("Rot2")?,
            rot3: number("Rot3")?,
            wavelength: entries
                .contains_key("wavelength")
                .then(|| number("Wavelength"))
                .transpose()?,
            detector,
        })
    }
    /// Loads the geometry from a PONI file
    pub fn read_poni<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| GeometryError::Io(path.to_path_buf(), e))?;
        Self::from_poni(&contents)
    }
    /// Writes the geometry to a PONI file
    pub fn write_poni<P: AsRef<Path>>(&self, path: P, policy: OverwritePolicy) -> Result<()> {
        let path = path.as_ref();
        let io_err = |e| GeometryError::Io(path.to_path_buf(), e);
        if policy == OverwritePolicy::Replace {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(io_err(e)),
                _ => (),
            }
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    GeometryError::AlreadyExists(path.to_path_buf())
                } else {
                    io_err(e)
                }
            })?;
        file.write_all(self.to_poni().as_bytes()).map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Fit2d;

    fn geometry() -> Geometry {
        let mut geometry = Geometry::from_fit2d(
            Detector::new(7.5e-5, 7.5e-5).with_shape((2048, 2048)),
            Fit2d::new(180., 1020.5, 1031.25),
        )
        .wavelength(1.2398e-11);
        geometry.rot1 = 1.5e-3;
        geometry.rot2 = -2e-4;
        geometry
    }

    #[test]
    fn poni_round_trip() {
        let geometry = geometry();
        let back = Geometry::from_poni(&geometry.to_poni()).unwrap();
        assert_eq!(back, geometry);
    }

    #[test]
    fn poni_version_1() {
        let poni = "# Calibration done at Mon Jan  1 00:00:00 2024
PixelSize1: 0.0001
PixelSize2: 0.0001
Distance: 0.2
Poni1: 0.1
Poni2: 0.11
Rot1: 0.0
Rot2: 0.0
Rot3: 0.0
Wavelength: 1e-10
";
        let geometry = Geometry::from_poni(poni).unwrap();
        assert_eq!(geometry.detector, Detector::new(1e-4, 1e-4));
        assert_eq!(geometry.poni2, 0.11);
        assert_eq!(geometry.wavelength, Some(1e-10));
    }

    #[test]
    fn missing_distance() {
        let poni = "Detector_config: {\"pixel1\": 1e-4, \"pixel2\": 1e-4}\nPoni1: 0.1\n";
        assert!(matches!(
            Geometry::from_poni(poni),
            Err(GeometryError::MissingKey("Distance"))
        ));
    }

    #[test]
    fn replace_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.poni");
        fs::write(&path, "stale").unwrap();
        let geometry = geometry();
        geometry.write_poni(&path, OverwritePolicy::Replace).unwrap();
        assert_eq!(Geometry::read_poni(&path).unwrap(), geometry);
        // a missing file is not an error either
        fs::remove_file(&path).unwrap();
        geometry.write_poni(&path, OverwritePolicy::Replace).unwrap();
    }

    #[test]
    fn fail_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.poni");
        fs::write(&path, "keep me").unwrap();
        assert!(matches!(
            geometry().write_poni(&path, OverwritePolicy::FailIfExists),
            Err(GeometryError::AlreadyExists(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");
    }
}
