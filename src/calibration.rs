//! Detector calibration
//!
//! A calibrant exposure and a Fit2D-style guess of the beam geometry are turned into a
//! refined PONI geometry: control points are extracted automatically on the calibrant
//! rings, the geometry is refined with the wavelength held fixed and the result is
//! written to a PONI file.

use crate::{
    calibrant::{Calibrant, CalibrantError},
    geometry::{poni::OverwritePolicy, Detector, Fit2d, Geometry, GeometryError},
    image::{read_image, ImageError, Mask, ReadOptions},
};
use ndarray::Array2;
use std::path::{Path, PathBuf};

pub mod extract;
pub mod refine;

pub use extract::{extract_control_points, ControlPoint, ExtractOptions};
pub use refine::{refine, RefineOptions, RefinementOutcome};

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("The calibrant wavelength is not set")]
    MissingWavelength,
    #[error("Found control points on {found} rings, at least {required} required")]
    TooFewRings { found: usize, required: usize },
    #[error("Not enough control points ({0}) to refine the geometry")]
    NotEnoughControlPoints(usize),
    #[error("Geometry refinement failed: {0}")]
    Refinement(String),
    #[error("The mask shape {mask:?} does not match the calibrant frame shape {frame:?}")]
    MaskShape {
        mask: (usize, usize),
        frame: (usize, usize),
    },
    #[error("Invalid initial guess: {0}")]
    InitialGuess(String),
    #[error("Failed to read the calibrant image")]
    Image(#[from] ImageError),
    #[error("Failed to save the geometry")]
    Geometry(#[from] GeometryError),
    #[error("Failed to load the calibrant")]
    Calibrant(#[from] CalibrantError),
    #[cfg(feature = "plot")]
    #[error("Failed to draw the calibration figures")]
    Plot(#[from] crate::plot::PlotError),
}
pub type Result<T> = std::result::Result<T, CalibrationError>;

/// Initial guess of the beam geometry
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InitialGuess {
    /// beam centre column [px]
    pub beam_centre_x: f64,
    /// beam centre row [px]
    pub beam_centre_y: f64,
    /// sample to detector distance [mm]
    pub distance_mm: f64,
    /// wavelength [m]
    pub wavelength: f64,
    /// pixel size along the columns [m]
    pub pixel_x: f64,
    /// pixel size along the rows [m]
    pub pixel_y: f64,
}
impl InitialGuess {
    fn validate(&self) -> Result<()> {
        let positive = [
            ("distance", self.distance_mm),
            ("wavelength", self.wavelength),
            ("pixel_x", self.pixel_x),
            ("pixel_y", self.pixel_y),
        ];
        if let Some((name, value)) = positive
            .into_iter()
            .find(|(_, value)| !(value.is_finite() && *value > 0.))
        {
            return Err(CalibrationError::InitialGuess(format!(
                "{name} must be positive, found {value}"
            )));
        }
        Ok(())
    }
    pub fn detector(&self) -> Detector {
        Detector::new(self.pixel_y, self.pixel_x)
    }
    /// Geometry of the guess without detector tilts
    pub fn geometry(&self) -> Geometry {
        Geometry::from_fit2d(
            self.detector(),
            Fit2d::new(self.distance_mm, self.beam_centre_x, self.beam_centre_y),
        )
        .wavelength(self.wavelength)
    }
}

/// Calibration inputs
#[derive(Debug, Clone)]
pub struct CalibrationRequest {
    image: PathBuf,
    guess: InitialGuess,
    calibrant: String,
    max_rings: usize,
    output: PathBuf,
    overwrite: OverwritePolicy,
    figure_size: u32,
    plot_dir: Option<PathBuf>,
    mask: Option<PathBuf>,
    read_options: ReadOptions,
}
impl CalibrationRequest {
    /// Creates a new calibration of the calibrant image `image` written to `output`
    ///
    /// `calibrant` is either a built-in calibrant name or the path to a `.D` file.
    pub fn new<P, Q, S>(image: P, guess: InitialGuess, calibrant: S, output: Q) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        S: Into<String>,
    {
        Self {
            image: image.as_ref().to_path_buf(),
            guess,
            calibrant: calibrant.into(),
            max_rings: 5,
            output: output.as_ref().to_path_buf(),
            overwrite: OverwritePolicy::default(),
            figure_size: 10,
            plot_dir: None,
            mask: None,
            read_options: ReadOptions::default(),
        }
    }
    pub fn max_rings(self, max_rings: usize) -> Self {
        Self { max_rings, ..self }
    }
    pub fn overwrite(self, overwrite: OverwritePolicy) -> Self {
        Self { overwrite, ..self }
    }
    /// Figure size in inches (100 pixels per inch)
    pub fn figure_size(self, figure_size: u32) -> Self {
        Self {
            figure_size,
            ..self
        }
    }
    /// Folder where the diagnostic figures are saved (requires the `plot` feature)
    pub fn plot_dir<P: AsRef<Path>>(self, plot_dir: P) -> Self {
        Self {
            plot_dir: Some(plot_dir.as_ref().to_path_buf()),
            ..self
        }
    }
    pub fn mask<P: AsRef<Path>>(self, mask: P) -> Self {
        Self {
            mask: Some(mask.as_ref().to_path_buf()),
            ..self
        }
    }
    pub fn read_options(self, read_options: ReadOptions) -> Self {
        Self {
            read_options,
            ..self
        }
    }
}

/// Calibration results
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub initial: Geometry,
    pub refined: Geometry,
    pub control_points: Vec<ControlPoint>,
    /// root mean square 2θ residual of the initial geometry [rad]
    pub rms_initial: f64,
    /// root mean square 2θ residual of the refined geometry [rad]
    pub rms_refined: f64,
    /// the PONI file
    pub output: PathBuf,
}

/// A calibrant frame and its geometry
pub struct SingleGeometry {
    pub data: Array2<f64>,
    pub mask: Option<Mask>,
    pub calibrant: Calibrant,
    pub geometry: Geometry,
    pub control_points: Vec<ControlPoint>,
}
impl SingleGeometry {
    pub fn new(data: Array2<f64>, calibrant: Calibrant, geometry: Geometry) -> Self {
        Self {
            data,
            mask: None,
            calibrant,
            geometry,
            control_points: vec![],
        }
    }
    pub fn with_mask(self, mask: Mask) -> Self {
        Self {
            mask: Some(mask),
            ..self
        }
    }
    /// Calibrant ring angles 2θ [rad] at the geometry wavelength
    pub fn ring_two_theta(&self) -> Result<Vec<f64>> {
        let wavelength = self
            .calibrant
            .wavelength
            .or(self.geometry.wavelength)
            .ok_or(CalibrationError::MissingWavelength)?;
        Ok(self.calibrant.clone().with_wavelength(wavelength).two_theta())
    }
    /// Extracts the control points of the first `max_rings` rings
    pub fn extract_cp(&mut self, max_rings: usize) -> Result<&[ControlPoint]> {
        self.control_points = extract_control_points(
            &self.data,
            self.mask.as_ref(),
            &self.geometry,
            &self.calibrant,
            &ExtractOptions::default().max_rings(max_rings),
        )?;
        Ok(&self.control_points)
    }
    /// Refines the geometry on the control points, the wavelength is kept fixed
    pub fn refine(&mut self) -> Result<RefinementOutcome> {
        let outcome = refine(
            &self.geometry,
            &self.control_points,
            &self.ring_two_theta()?,
            &RefineOptions::default(),
        )?;
        self.geometry = outcome.geometry;
        Ok(outcome)
    }
}

#[cfg(feature = "plot")]
fn figures(
    request: &CalibrationRequest,
    sg: &SingleGeometry,
    stage: &str,
    raw: bool,
) -> Result<()> {
    let Some(dir) = request.plot_dir.as_ref() else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).map_err(|e| crate::plot::PlotError::Io(dir.clone(), e))?;
    let size = request.figure_size * 100;
    if raw {
        crate::plot::frame(dir.join("calibrant.png"), &sg.data, size)?;
    }
    crate::plot::fit_overlay(
        dir.join(format!("{stage}-fit.png")),
        &sg.data,
        &sg.geometry,
        &sg.ring_two_theta()?,
        &sg.control_points,
        size,
    )?;
    Ok(())
}
#[cfg(not(feature = "plot"))]
fn figures(request: &CalibrationRequest, _: &SingleGeometry, _: &str, _: bool) -> Result<()> {
    if request.plot_dir.is_some() {
        log::warn!("the `plot` feature is disabled, no figure will be drawn");
    }
    Ok(())
}

/// Calibrates the detector geometry from a calibrant image
///
/// Any existing file at the output path is handled according to the overwrite policy of
/// the request.
pub fn calibrate(request: &CalibrationRequest) -> Result<CalibrationReport> {
    request.guess.validate()?;
    let frame = read_image(&request.image, request.read_options)?;
    log::info!("Size of the detector: {:?}", frame.shape());

    let detector = request.guess.detector().with_shape(frame.shape());
    log::info!("Definition of the detector: {}", detector);
    let calibrant = Calibrant::resolve(&request.calibrant)?.with_wavelength(request.guess.wavelength);
    log::info!("Definition of the calibrant: {}", calibrant);

    let mut initial = request.guess.geometry();
    initial.detector = detector;
    log::info!("Initial guessed detector geometry:\n{}", initial);

    let mut sg = SingleGeometry::new(frame.data, calibrant, initial);
    if let Some(mask) = request.mask.as_ref() {
        sg = sg.with_mask(crate::image::read_mask(mask, request.read_options)?);
    }
    sg.extract_cp(request.max_rings)?;
    figures(request, &sg, "initial", true)?;

    let outcome = sg.refine()?;
    figures(request, &sg, "refined", false)?;
    log::info!(
        "Final calibration parameters (rms 2θ residual {:.3e} -> {:.3e} rad):\n{}",
        outcome.rms_initial,
        outcome.rms_final,
        sg.geometry
    );

    sg.geometry.write_poni(&request.output, request.overwrite)?;
    log::info!("Calibration .poni file written to: {:?}", request.output);

    Ok(CalibrationReport {
        initial,
        refined: sg.geometry,
        control_points: sg.control_points,
        rms_initial: outcome.rms_initial,
        rms_refined: outcome.rms_final,
        output: request.output.clone(),
    })
}
