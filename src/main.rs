use anyhow::Context;
use env_logger::{Builder, Env};
use std::path::PathBuf;
use structopt::StructOpt;
use xrd_reduce::{
    calibrant::Calibrant,
    config::ReductionConfig,
    integrator::{Integrate1dOptions, Integrate2dOptions},
    sweep::{azimuthal, caking},
    AzimuthalIntegrator, CakingVariant, CalibrationRequest, Geometry, OverwritePolicy,
    SweepPlan, Unit,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "xrd-reduce",
    about = "Calibration, azimuthal integration and caking of X-ray diffraction images"
)]
struct Opt {
    /// YAML or JSON settings file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// Log the image reader warnings, silenced otherwise
    #[structopt(long)]
    reader_warnings: bool,
    /// Hide the progress bars
    #[structopt(long)]
    no_progress: bool,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Refines the detector geometry from a calibrant image and saves it to a PONI file
    Calibrate {
        /// PONI file to write
        #[structopt(short, long, parse(from_os_str))]
        output: Option<PathBuf>,
        /// Number of calibrant rings used for the refinement
        #[structopt(long)]
        max_rings: Option<usize>,
        /// Folder of the diagnostic figures (`plot` feature)
        #[structopt(long, parse(from_os_str))]
        plot_dir: Option<PathBuf>,
        /// Fail if the PONI file already exists instead of replacing it
        #[structopt(long)]
        keep_existing: bool,
    },
    /// Integrates the images over the azimuth into `.xy` files
    Integrate {
        /// Number of radial bins
        #[structopt(short, long)]
        n_points: Option<usize>,
        /// Radial unit: 2th_deg, 2th_rad, q_nm^-1 or r_mm
        #[structopt(short, long)]
        unit: Option<Unit>,
    },
    /// Cakes the images into `.dat` files for xrdfit (2θ in degrees)
    Cake {
        /// Number of radial bins
        #[structopt(short, long)]
        n_points: Option<usize>,
        /// Number of azimuthal sectors
        #[structopt(short = "k", long)]
        n_cakes: Option<usize>,
    },
    /// Cakes the images into `.dat` files for MAUD (radius in pixels)
    Texture {
        /// Number of radial bins
        #[structopt(short, long)]
        n_points: Option<usize>,
        /// Number of azimuthal sectors
        #[structopt(short = "k", long)]
        n_cakes: Option<usize>,
        /// Pixel size in mm
        #[structopt(short, long)]
        pixel_size: Option<f64>,
    },
    /// Lists the built-in calibrants
    Calibrants,
}

fn load_config(opt: &Opt) -> anyhow::Result<ReductionConfig> {
    let mut config = match opt.config.as_ref() {
        Some(path) => ReductionConfig::load(path)
            .with_context(|| format!("loading settings {}", path.display()))?,
        None => ReductionConfig::default(),
    };
    config.reader_warnings |= opt.reader_warnings;
    Ok(config)
}

/// Sweep plan, integrator and mask of the settings
fn sweep_setup(
    config: &ReductionConfig,
    progress: bool,
) -> anyhow::Result<(SweepPlan, AzimuthalIntegrator, Option<xrd_reduce::Mask>)> {
    config.validate_sweep()?;
    let poni = config
        .poni
        .as_ref()
        .context("the detector geometry (`poni`) is required")?;
    let geometry = Geometry::read_poni(poni)
        .with_context(|| format!("loading the geometry {}", poni.display()))?;
    log::info!("Detector geometry:\n{}", geometry);
    let mask = config
        .mask
        .as_ref()
        .map(|path| xrd_reduce::read_mask(path, config.read_options()))
        .transpose()?;
    let plan = SweepPlan::new(&config.input_path, &config.output_path)
        .experiments(
            config.input_experiments.iter().cloned(),
            config.output_experiments().iter().cloned(),
        )
        .glob(config.glob.as_str())
        .read_options(config.read_options())
        .progress(progress);
    Ok((plan, AzimuthalIntegrator::new(geometry), mask))
}

fn main() -> anyhow::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let opt = Opt::from_args();
    let progress = !opt.no_progress;

    match &opt.command {
        Command::Calibrants => {
            for name in Calibrant::available() {
                println!("{}", Calibrant::resolve(&name)?);
            }
        }
        Command::Calibrate {
            output,
            max_rings,
            plot_dir,
            keep_existing,
        } => {
            let config = load_config(&opt)?;
            let calibration = config
                .calibration
                .as_ref()
                .context("missing `calibration` section in the settings")?;
            let output = output.as_ref().unwrap_or(&calibration.output);
            let mut request = CalibrationRequest::new(
                &calibration.image,
                calibration.guess,
                calibration.calibrant.as_str(),
                output,
            )
            .max_rings(max_rings.unwrap_or(calibration.max_rings))
            .figure_size(calibration.figure_size)
            .read_options(config.read_options());
            if let Some(dir) = plot_dir.as_ref().or(calibration.plot_dir.as_ref()) {
                request = request.plot_dir(dir);
            }
            if let Some(mask) = config.mask.as_ref() {
                request = request.mask(mask);
            }
            if *keep_existing {
                request = request.overwrite(OverwritePolicy::FailIfExists);
            }
            let report = xrd_reduce::calibrate(&request)?;
            log::info!(
                "{} control points, rms 2θ residual: {:.3e} rad",
                report.control_points.len(),
                report.rms_refined
            );
        }
        Command::Integrate { n_points, unit } => {
            let config = load_config(&opt)?;
            let (plan, integrator, mask) = sweep_setup(&config, progress)?;
            let options = Integrate1dOptions {
                unit: unit.unwrap_or(config.integration.unit),
                polarization_factor: Some(config.integration.polarization_factor),
                ..azimuthal::sweep_options()
            };
            let summary = azimuthal::azimuthal_integration_with(
                &plan,
                &integrator,
                mask.as_ref(),
                n_points.unwrap_or(config.integration.n_points),
                &options,
            )?;
            log::info!("{:?}", summary);
        }
        Command::Cake { n_points, n_cakes } => {
            let config = load_config(&opt)?;
            let (plan, mut integrator, mask) = sweep_setup(&config, progress)?;
            let options = Integrate2dOptions {
                polarization_factor: Some(config.caking.polarization_factor),
                ..caking::sweep_options()
            };
            let summary = caking::caking_with(
                &plan,
                &mut integrator,
                mask.as_ref(),
                n_points.unwrap_or(config.caking.n_points),
                n_cakes.unwrap_or(config.caking.n_cakes),
                CakingVariant::Xrdfit,
                &options,
            )?;
            log::info!("{:?}", summary);
        }
        Command::Texture {
            n_points,
            n_cakes,
            pixel_size,
        } => {
            let config = load_config(&opt)?;
            let (plan, mut integrator, mask) = sweep_setup(&config, progress)?;
            let pixel_size = pixel_size
                .or(config.texture.pixel_size)
                .unwrap_or(integrator.geometry().detector.pixel1 * 1e3);
            let options = Integrate2dOptions {
                polarization_factor: Some(config.texture.polarization_factor),
                ..caking::sweep_options()
            };
            let summary = caking::caking_with(
                &plan,
                &mut integrator,
                mask.as_ref(),
                n_points.unwrap_or(config.texture.n_points),
                n_cakes.unwrap_or(config.texture.n_cakes),
                CakingVariant::Maud { pixel_size },
                &options,
            )?;
            log::info!("{:?}", summary);
        }
    }
    Ok(())
}
