//! Diffraction frames and masks
//!
//! Frames are read from single-channel TIFF files (first page) or from 2D NumPy `.npy`
//! arrays. Reader warnings are collected into the frame metadata and logged, unless the
//! read is made with [ReadOptions::quiet].

use ndarray::Array2;
use npyz::{NpyFile, Order, TypeChar};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tiff::{
    decoder::{Decoder, DecodingResult, Limits},
    encoder::{colortype, TiffEncoder},
    ColorType,
};

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("Failed to open {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to decode TIFF file {0:?}")]
    Tiff(PathBuf, #[source] tiff::TiffError),
    #[error("Failed to decode NPY file {0:?}")]
    Npy(PathBuf, #[source] std::io::Error),
    #[error("Unsupported image format: {0:?}")]
    Format(PathBuf),
    #[error("Unsupported color type {1:?} in {0:?}, expected a single channel")]
    ColorType(PathBuf, ColorType),
    #[error("Unsupported array type {1} in {0:?}")]
    DataType(PathBuf, String),
    #[error("Expected a 2D array in {0:?}, found shape {1:?}")]
    Shape(PathBuf, Vec<u64>),
}
type Result<T> = std::result::Result<T, ImageError>;

/// Frame file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Tiff,
    Npy,
}
impl FrameFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(FrameFormat::Tiff),
            "npy" => Some(FrameFormat::Npy),
            _ => None,
        }
    }
}

/// Options of a single read operation
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Do not log the reader warnings
    pub quiet: bool,
}
impl ReadOptions {
    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub path: PathBuf,
    pub format: FrameFormat,
    /// Number of images in the file, only the first one is read
    pub pages: usize,
    pub warnings: Vec<String>,
}

/// A 2D detector frame, indexed as `[row, column]`
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Array2<f64>,
    pub metadata: FrameMetadata,
}
impl Frame {
    /// Frame shape as (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }
}

/// Reads a frame from a TIFF or NPY file
pub fn read_image<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Frame> {
    let path = path.as_ref();
    let frame = match FrameFormat::from_path(path) {
        Some(FrameFormat::Tiff) => read_tiff(path)?,
        Some(FrameFormat::Npy) => read_npy(path)?,
        None => return Err(ImageError::Format(path.to_path_buf())),
    };
    if !options.quiet {
        frame
            .metadata
            .warnings
            .iter()
            .for_each(|warning| log::warn!("{:?}: {}", path, warning));
    }
    Ok(frame)
}

fn read_tiff(path: &Path) -> Result<Frame> {
    let tiff_err = |e| ImageError::Tiff(path.to_path_buf(), e);
    let file = File::open(path).map_err(|e| ImageError::Io(path.to_path_buf(), e))?;
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(tiff_err)?
        .with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    match decoder.colortype().map_err(tiff_err)? {
        ColorType::Gray(_) => (),
        other => return Err(ImageError::ColorType(path.to_path_buf(), other)),
    }
    let values: Vec<f64> = match decoder.read_image().map_err(tiff_err)? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
    };
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(tiff_err)?;
        pages += 1;
    }
    let mut warnings = vec![];
    if pages > 1 {
        warnings.push(format!("{} pages found, only the first one is read", pages));
    }
    let shape = (height as usize, width as usize);
    let data = Array2::from_shape_vec(shape, values).map_err(|_| {
        ImageError::Shape(path.to_path_buf(), vec![height as u64, width as u64])
    })?;
    Ok(Frame {
        data,
        metadata: FrameMetadata {
            path: path.to_path_buf(),
            format: FrameFormat::Tiff,
            pages,
            warnings,
        },
    })
}

fn read_npy(path: &Path) -> Result<Frame> {
    let npy_err = |e| ImageError::Npy(path.to_path_buf(), e);
    let file = File::open(path).map_err(|e| ImageError::Io(path.to_path_buf(), e))?;
    let npy = NpyFile::new(BufReader::new(file)).map_err(npy_err)?;
    let shape = npy.shape().to_vec();
    let (rows, cols) = match shape.as_slice() {
        &[rows, cols] => (rows as usize, cols as usize),
        _ => return Err(ImageError::Shape(path.to_path_buf(), shape)),
    };
    let order = npy.order();
    let type_str = match npy.dtype() {
        npyz::DType::Plain(type_str) => type_str,
        other => return Err(ImageError::DataType(path.to_path_buf(), other.descr())),
    };
    let values: Vec<f64> = match (type_str.type_char(), type_str.size_field()) {
        (TypeChar::Float, 8) => npy.into_vec::<f64>().map_err(npy_err)?,
        (TypeChar::Float, 4) => to_f64(npy.into_vec::<f32>().map_err(npy_err)?),
        (TypeChar::Uint, 1) => to_f64(npy.into_vec::<u8>().map_err(npy_err)?),
        (TypeChar::Uint, 2) => to_f64(npy.into_vec::<u16>().map_err(npy_err)?),
        (TypeChar::Uint, 4) => to_f64(npy.into_vec::<u32>().map_err(npy_err)?),
        (TypeChar::Int, 1) => to_f64(npy.into_vec::<i8>().map_err(npy_err)?),
        (TypeChar::Int, 2) => to_f64(npy.into_vec::<i16>().map_err(npy_err)?),
        (TypeChar::Int, 4) => to_f64(npy.into_vec::<i32>().map_err(npy_err)?),
        (TypeChar::Bool, 1) => npy
            .into_vec::<bool>()
            .map_err(npy_err)?
            .into_iter()
            .map(|x| if x { 1. } else { 0. })
            .collect(),
        _ => {
            return Err(ImageError::DataType(
                path.to_path_buf(),
                type_str.to_string(),
            ))
        }
    };
    let data = match order {
        Order::C => Array2::from_shape_vec((rows, cols), values),
        Order::Fortran => Array2::from_shape_vec((cols, rows), values).map(|a| a.reversed_axes()),
    }
    .map_err(|_| ImageError::Shape(path.to_path_buf(), shape.clone()))?;
    Ok(Frame {
        data,
        metadata: FrameMetadata {
            path: path.to_path_buf(),
            format: FrameFormat::Npy,
            pages: 1,
            warnings: vec![],
        },
    })
}

fn to_f64<T: Into<f64>>(values: Vec<T>) -> Vec<f64> {
    values.into_iter().map(Into::into).collect()
}

/// Writes a frame as a single page 32 bits floating point TIFF file
pub fn write_tiff<P: AsRef<Path>>(path: P, data: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let tiff_err = |e| ImageError::Tiff(path.to_path_buf(), e);
    let file = File::create(path).map_err(|e| ImageError::Io(path.to_path_buf(), e))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(tiff_err)?;
    let (rows, cols) = data.dim();
    let values: Vec<f32> = data.iter().map(|&x| x as f32).collect();
    encoder
        .write_image::<colortype::Gray32Float>(cols as u32, rows as u32, &values)
        .map_err(tiff_err)?;
    Ok(())
}

/// Detector mask: `true` marks a pixel excluded from integration
#[derive(Debug, Clone, PartialEq)]
pub struct Mask(Array2<bool>);
impl Mask {
    /// A mask that excludes nothing
    pub fn none(shape: (usize, usize)) -> Self {
        Self(Array2::from_elem(shape, false))
    }
    /// Every non-zero pixel of the frame is masked
    pub fn from_frame(frame: &Frame) -> Self {
        Self(frame.data.mapv(|x| x != 0.))
    }
    pub fn from_array(mask: Array2<bool>) -> Self {
        Self(mask)
    }
    pub fn shape(&self) -> (usize, usize) {
        self.0.dim()
    }
    pub fn is_masked(&self, row: usize, col: usize) -> bool {
        self.0[[row, col]]
    }
    /// Number of masked pixels
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&x| x).count()
    }
    pub fn as_array(&self) -> &Array2<bool> {
        &self.0
    }
}

/// Reads a mask file, any non-zero pixel is excluded
pub fn read_mask<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Mask> {
    let frame = read_image(path, options)?;
    let mask = Mask::from_frame(&frame);
    log::info!(
        "Mask {:?}: {} pixels excluded out of {}",
        frame.metadata.path,
        mask.count(),
        frame.data.len()
    );
    Ok(mask)
}
