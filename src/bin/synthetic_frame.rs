//! Writes a synthetic calibrant image as a 32 bits floating point TIFF file

use env_logger::{Builder, Env};
use std::path::PathBuf;
use structopt::StructOpt;
use xrd_reduce::{calibrant::Calibrant, image::write_tiff, synthetic, Detector, Fit2d, Geometry};

#[derive(Debug, StructOpt)]
#[structopt(name = "synthetic_frame", about = "Synthetic calibrant image generator")]
struct Opt {
    /// Output TIFF file
    #[structopt(parse(from_os_str))]
    output: PathBuf,
    /// Built-in calibrant name or path to a `.D` file
    #[structopt(short, long, default_value = "CeO2")]
    calibrant: String,
    /// Number of rows
    #[structopt(long, default_value = "1024")]
    rows: usize,
    /// Number of columns
    #[structopt(long, default_value = "1024")]
    cols: usize,
    /// Pixel size [m]
    #[structopt(long, default_value = "1e-4")]
    pixel_size: f64,
    /// Sample to detector distance [mm]
    #[structopt(short, long, default_value = "200")]
    distance: f64,
    /// Beam centre column [px]
    #[structopt(short = "x", long)]
    beam_centre_x: Option<f64>,
    /// Beam centre row [px]
    #[structopt(short = "y", long)]
    beam_centre_y: Option<f64>,
    /// Detector tilt [deg]
    #[structopt(long, default_value = "0")]
    tilt: f64,
    /// Tilt plane rotation [deg]
    #[structopt(long, default_value = "0")]
    tilt_plan_rotation: f64,
    /// Wavelength [m]
    #[structopt(short, long, default_value = "1.2398e-11")]
    wavelength: f64,
    /// Ring width (standard deviation in 2θ) [deg]
    #[structopt(long, default_value = "0.02")]
    ring_width: f64,
    /// Ring peak value above the background
    #[structopt(long, default_value = "1000")]
    amplitude: f64,
    #[structopt(long, default_value = "10")]
    background: f64,
}

fn main() -> anyhow::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    builder.init();

    let opt = Opt::from_args();
    let shape = (opt.rows, opt.cols);
    let fit2d = Fit2d {
        direct_dist: opt.distance,
        center_x: opt.beam_centre_x.unwrap_or(0.5 * opt.cols as f64),
        center_y: opt.beam_centre_y.unwrap_or(0.5 * opt.rows as f64),
        tilt: opt.tilt,
        tilt_plan_rotation: opt.tilt_plan_rotation,
    };
    let detector = Detector::new(opt.pixel_size, opt.pixel_size).with_shape(shape);
    let geometry = Geometry::from_fit2d(detector, fit2d).wavelength(opt.wavelength);
    log::info!("Geometry:\n{}", geometry);
    let calibrant = Calibrant::resolve(&opt.calibrant)?;
    log::info!("{}", calibrant);

    let data = synthetic::calibrant_frame(
        &geometry,
        &calibrant,
        shape,
        opt.ring_width,
        opt.amplitude,
        opt.background,
    );
    write_tiff(&opt.output, &data)?;
    log::info!("Synthetic frame written to {:?}", opt.output);
    Ok(())
}
