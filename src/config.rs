//! Reduction settings
//!
//! Settings are YAML (`.yaml`, `.yml`) or JSON documents. [load_settings] returns the raw
//! key-value mapping
//! without any validation, [ReductionConfig] is the typed view used by the
//! `xrd-reduce` application, where every missing field takes its default value.
//!
//! ```json
//! {
//!   "input_path": "data/",
//!   "output_path": "reduced/",
//!   "input_experiments": ["sample_A_raw"],
//!   "output_experiments": ["sample_A"],
//!   "glob": "*.tif",
//!   "poni": "calibration.poni",
//!   "mask": "mask.tif",
//!   "calibration": {
//!     "image": "CeO2.tif", "calibrant": "CeO2", "output": "calibration.poni",
//!     "beam_centre_x": 1024.5, "beam_centre_y": 1020.0, "distance_mm": 800.0,
//!     "wavelength": 1.2398e-11, "pixel_x": 2e-4, "pixel_y": 2e-4
//!   },
//!   "caking": { "n_cakes": 72 }
//! }
//! ```

use crate::{calibration::InitialGuess, image::ReadOptions, units::Unit};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to open the settings file {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse the settings file {0:?}")]
    Parse(PathBuf, #[source] serde_json::Error),
    #[error("Failed to parse the YAML settings file {0:?}")]
    ParseYaml(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid settings")]
    Schema(#[from] serde_json::Error),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}
type Result<T> = std::result::Result<T, ConfigError>;

/// Raw settings: a key-value mapping
pub type Settings = BTreeMap<String, serde_json::Value>;

/// Reads a YAML or JSON settings file into a key-value mapping
///
/// Files with a `.yaml` or `.yml` extension are read as YAML, any other as JSON.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let reader = BufReader::new(file);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_reader(reader)
            .map_err(|e| ConfigError::ParseYaml(path.to_path_buf(), e)),
        _ => serde_json::from_reader(reader)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e)),
    }
}

/// Calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// calibrant exposure
    pub image: PathBuf,
    /// built-in calibrant name or path to a `.D` file
    pub calibrant: String,
    /// PONI file to write
    pub output: PathBuf,
    #[serde(flatten)]
    pub guess: InitialGuess,
    #[serde(default = "default_max_rings")]
    pub max_rings: usize,
    /// figure size in inches
    #[serde(default = "default_figure_size")]
    pub figure_size: u32,
    #[serde(default)]
    pub plot_dir: Option<PathBuf>,
}
fn default_max_rings() -> usize {
    5
}
fn default_figure_size() -> u32 {
    10
}

/// 1D azimuthal integration settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub n_points: usize,
    pub polarization_factor: f64,
    pub unit: Unit,
}
impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            n_points: 10_000,
            polarization_factor: 0.99,
            unit: Unit::TwoThetaDeg,
        }
    }
}

/// Caking settings, angular (xrdfit) output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CakingConfig {
    pub n_points: usize,
    pub n_cakes: usize,
    pub polarization_factor: f64,
}
impl Default for CakingConfig {
    fn default() -> Self {
        Self {
            n_points: 1_000,
            n_cakes: 36,
            polarization_factor: 0.99,
        }
    }
}

/// Caking settings, pixel (MAUD) output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub n_points: usize,
    pub n_cakes: usize,
    pub polarization_factor: f64,
    /// pixel size [mm], the detector pixel size of the geometry if not set
    pub pixel_size: Option<f64>,
}
impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            n_points: 1_000,
            n_cakes: 36,
            polarization_factor: 0.99,
            pixel_size: None,
        }
    }
}

/// Typed reduction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub input_experiments: Vec<String>,
    pub output_experiments: Vec<String>,
    /// file pattern within an experiment folder
    pub glob: String,
    /// detector geometry
    pub poni: Option<PathBuf>,
    pub mask: Option<PathBuf>,
    /// log the image reader warnings, silenced otherwise
    pub reader_warnings: bool,
    pub calibration: Option<CalibrationConfig>,
    pub integration: IntegrationConfig,
    pub caking: CakingConfig,
    pub texture: TextureConfig,
}
impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            input_experiments: vec![],
            output_experiments: vec![],
            glob: String::from("*.tif"),
            poni: None,
            mask: None,
            reader_warnings: false,
            calibration: None,
            integration: Default::default(),
            caking: Default::default(),
            texture: Default::default(),
        }
    }
}
impl ReductionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let value = serde_json::Value::Object(
            settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        Ok(serde_json::from_value(value)?)
    }
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_settings(&load_settings(path)?)
    }
    /// Checks the settings needed by the integration and caking sweeps
    pub fn validate_sweep(&self) -> Result<()> {
        if self.input_experiments.is_empty() {
            return Err(ConfigError::Invalid("no input experiment".into()));
        }
        if self.poni.is_none() {
            return Err(ConfigError::Invalid(
                "the detector geometry (`poni`) is required".into(),
            ));
        }
        Ok(())
    }
    /// Image reader options, quiet unless `reader_warnings` is set
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            quiet: !self.reader_warnings,
        }
    }
    /// Output experiment names, the input names if none are given
    pub fn output_experiments(&self) -> &[String] {
        if self.output_experiments.is_empty() {
            &self.input_experiments
        } else {
            &self.output_experiments
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn raw_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"number_of_points": 500, "mask": "mask.tif"}"#).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.len(), 2);
        assert_eq!(settings["number_of_points"], serde_json::json!(500));
    }

    #[test]
    fn missing_file_and_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_settings(dir.path().join("missing.json")),
            Err(ConfigError::Io(..))
        ));
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(ConfigError::Parse(..))));
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "input_experiments: [a, b").unwrap();
        assert!(matches!(load_settings(&path), Err(ConfigError::ParseYaml(..))));
    }

    #[test]
    fn yaml_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(
            &path,
            "input_path: data/\n\
             input_experiments:\n  - sample_A\n  - sample_B\n\
             poni: calibration.poni\n\
             integration:\n  n_points: 2000\n\
             caking:\n  n_cakes: 72\n",
        )
        .unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings["poni"], serde_json::json!("calibration.poni"));
        let config = ReductionConfig::load(&path).unwrap();
        assert_eq!(config.input_path, PathBuf::from("data/"));
        assert_eq!(config.input_experiments, vec!["sample_A", "sample_B"]);
        assert_eq!(config.integration.n_points, 2000);
        assert_eq!(config.caking.n_cakes, 72);
        assert!(config.validate_sweep().is_ok());
    }

    #[test]
    fn image_reads_are_quiet_by_default() {
        assert!(ReductionConfig::default().read_options().quiet);
        let settings: Settings = serde_json::from_str(r#"{"reader_warnings": true}"#).unwrap();
        let config = ReductionConfig::from_settings(&settings).unwrap();
        assert!(!config.read_options().quiet);
    }

    #[test]
    fn typed_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{"input_path": "data", "input_experiments": ["a", "b"], "caking": {"n_cakes": 72}}"#,
        )
        .unwrap();
        let config = ReductionConfig::from_settings(&settings).unwrap();
        assert_eq!(config.glob, "*.tif");
        assert_eq!(config.integration.n_points, 10_000);
        assert_eq!(config.integration.polarization_factor, 0.99);
        assert_eq!(config.caking.n_cakes, 72);
        assert_eq!(config.caking.n_points, 1_000);
        assert_eq!(config.texture.n_cakes, 36);
        assert_eq!(config.output_experiments(), &["a", "b"]);
        assert!(config.validate_sweep().is_err());
    }

    #[test]
    fn calibration_section() {
        let settings: Settings = serde_json::from_str(
            r#"{"calibration": {
                "image": "CeO2.tif", "calibrant": "CeO2", "output": "calibration.poni",
                "beam_centre_x": 1024.5, "beam_centre_y": 1020.0, "distance_mm": 800.0,
                "wavelength": 1.2398e-11, "pixel_x": 2e-4, "pixel_y": 2e-4
            }}"#,
        )
        .unwrap();
        let config = ReductionConfig::from_settings(&settings).unwrap();
        let calibration = config.calibration.unwrap();
        assert_eq!(calibration.max_rings, 5);
        assert_eq!(calibration.guess.distance_mm, 800.);
        assert_eq!(calibration.guess.pixel_y, 2e-4);
    }
}
