//! Calibration figures
//!
//! The calibrant frame is drawn as a log scaled heat map. The fit overlays add the
//! control points, coloured by ring, and the ring loci expected from the geometry.

use crate::{calibration::ControlPoint, geometry::Geometry, integrator::PixelMap};
use ndarray::Array2;
use plotters::prelude::*;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum PlotError {
    #[error("Failed to create the figure folder {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to draw {0:?}: {1}")]
    Drawing(PathBuf, String),
}
type Result<T> = std::result::Result<T, PlotError>;

trait Drawing<T> {
    fn drawing(self, path: &Path) -> Result<T>;
}
impl<T, E: std::fmt::Display> Drawing<T> for std::result::Result<T, E> {
    fn drawing(self, path: &Path) -> Result<T> {
        self.map_err(|e| PlotError::Drawing(path.to_path_buf(), e.to_string()))
    }
}

/// Frame to figure pixel mapping, the largest frame side spans `size` pixels
struct Raster {
    scale: f64,
    width: u32,
    height: u32,
}
impl Raster {
    fn new((rows, cols): (usize, usize), size: u32) -> Self {
        let scale = size.max(1) as f64 / rows.max(cols).max(1) as f64;
        Self {
            scale,
            width: ((cols as f64 * scale).round() as u32).max(1),
            height: ((rows as f64 * scale).round() as u32).max(1),
        }
    }
    /// Frame pixel under the figure pixel (x, y)
    fn frame_index(&self, x: u32, y: u32, (rows, cols): (usize, usize)) -> (usize, usize) {
        let row = ((y as f64 + 0.5) / self.scale) as usize;
        let col = ((x as f64 + 0.5) / self.scale) as usize;
        (row.min(rows - 1), col.min(cols - 1))
    }
    /// Figure position of the frame point (row, col)
    fn figure_coord(&self, row: f64, col: f64) -> (i32, i32) {
        ((col * self.scale) as i32, (row * self.scale) as i32)
    }
}

/// Log scaled frame values in [0,1]
fn log_scale(data: &Array2<f64>) -> Array2<f64> {
    let min = data
        .iter()
        .cloned()
        .filter(|x| x.is_finite())
        .fold(f64::INFINITY, f64::min);
    let scaled = data.mapv(|x| {
        if x.is_finite() {
            (1. + (x - min).max(0.)).ln()
        } else {
            0.
        }
    });
    let max = scaled.iter().cloned().fold(0f64, f64::max);
    if max > 0. {
        scaled / max
    } else {
        scaled
    }
}

fn draw_frame<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    raster: &Raster,
    data: &Array2<f64>,
    path: &Path,
) -> Result<()> {
    let cmap = colorous::VIRIDIS;
    let values = log_scale(data);
    for y in 0..raster.height {
        for x in 0..raster.width {
            let u = values[raster.frame_index(x, y, data.dim())];
            let (r, g, b) = cmap.eval_continuous(u).as_tuple();
            root.draw_pixel((x as i32, y as i32), &RGBColor(r, g, b))
                .drawing(path)?;
        }
    }
    Ok(())
}

/// Draws the calibrant frame into the PNG file `path`
pub fn frame<P: AsRef<Path>>(path: P, data: &Array2<f64>, size: u32) -> Result<()> {
    let path = path.as_ref();
    let raster = Raster::new(data.dim(), size);
    let root = BitMapBackend::new(path, (raster.width, raster.height)).into_drawing_area();
    root.fill(&WHITE).drawing(path)?;
    draw_frame(&root, &raster, data, path)?;
    root.present().drawing(path)?;
    log::info!("Saved {:?}", path);
    Ok(())
}

/// Draws the calibrant frame with the control points and the expected rings
pub fn fit_overlay<P: AsRef<Path>>(
    path: P,
    data: &Array2<f64>,
    geometry: &Geometry,
    ring_two_theta: &[f64],
    control_points: &[ControlPoint],
    size: u32,
) -> Result<()> {
    let path = path.as_ref();
    let shape = data.dim();
    let raster = Raster::new(shape, size);
    let root = BitMapBackend::new(path, (raster.width, raster.height)).into_drawing_area();
    root.fill(&WHITE).drawing(path)?;
    draw_frame(&root, &raster, data, path)?;

    // ring loci: figure pixels where 2θ crosses a ring between neighbours
    let map = PixelMap::new(geometry, shape);
    let tth = |x: u32, y: u32| map.two_theta[raster.frame_index(x, y, shape)];
    for y in 0..raster.height.saturating_sub(1) {
        for x in 0..raster.width.saturating_sub(1) {
            let here = tth(x, y);
            let (right, down) = (tth(x + 1, y), tth(x, y + 1));
            let crossed = ring_two_theta.iter().any(|&ring| {
                (here - ring).signum() != (right - ring).signum()
                    || (here - ring).signum() != (down - ring).signum()
            });
            if crossed {
                root.draw_pixel((x as i32, y as i32), &WHITE).drawing(path)?;
            }
        }
    }

    let colors = colorous::TABLEAU10;
    for cp in control_points {
        let (r, g, b) = colors[cp.ring % colors.len()].as_tuple();
        root.draw(&Circle::new(
            raster.figure_coord(cp.row, cp.col),
            3,
            RGBColor(r, g, b).filled(),
        ))
        .drawing(path)?;
    }
    root.present().drawing(path)?;
    log::info!("Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_keeps_the_aspect_ratio() {
        let raster = Raster::new((500, 1000), 800);
        assert_eq!((raster.width, raster.height), (800, 400));
        assert_eq!(raster.frame_index(799, 399, (500, 1000)), (499, 999));
        assert_eq!(raster.figure_coord(250., 500.), (400, 200));
    }

    #[test]
    fn log_scale_range() {
        let data = ndarray::array![[1., 10.], [100., f64::NAN]];
        let scaled = log_scale(&data);
        assert_eq!(scaled[[0, 0]], 0.);
        assert!((scaled[[1, 0]] - 1.).abs() < 1e-12);
        assert_eq!(scaled[[1, 1]], 0.);
    }

    #[test]
    fn figures_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let data = Array2::from_shape_fn((32, 48), |(r, c)| (r * c) as f64);
        frame(dir.path().join("frame.png"), &data, 96).unwrap();
        assert!(dir.path().join("frame.png").is_file());
    }
}
