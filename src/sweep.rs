//! Batch reduction of experiment folders
//!
//! A sweep visits every `(input, output)` experiment pair of a [SweepPlan], reads the
//! frames of the input experiment folder that match the file pattern, in lexicographic
//! order, reduces each frame into a numeric table and writes the table to
//! `<output root>/<output experiment>/<mode folder>/<frame stem>.<extension>`.
//! Frames are processed one at a time and nothing is kept from one frame to the next;
//! the first error aborts the sweep.

use crate::{
    image::{read_image, ImageError, ReadOptions},
    integrator::IntegrationError,
};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::{EitherOrBoth, Itertools};
use ndarray::Array2;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub mod azimuthal;
pub mod caking;

#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error("Invalid file pattern")]
    Pattern(#[from] glob::PatternError),
    #[error("Failed to list the experiment files")]
    Glob(#[from] glob::GlobError),
    #[error("Path {0:?} is not valid UTF-8")]
    Path(PathBuf),
    #[error("Failed to write {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Failed to read a frame")]
    Image(#[from] ImageError),
    #[error("Failed to integrate a frame")]
    Integration(#[from] IntegrationError),
    #[error("The number of cakes must be greater than 0")]
    InvalidCakeCount,
    #[error("Invalid pixel size {0}")]
    InvalidPixelSize(f64),
}
pub type Result<T> = std::result::Result<T, SweepError>;

/// Files of `dir` matching `pattern`, sorted lexicographically
pub fn discover<P: AsRef<Path>>(dir: P, pattern: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    // the folder name is literal, only `pattern` holds wildcards
    let literal_dir = dir
        .to_str()
        .map(glob::Pattern::escape)
        .ok_or_else(|| SweepError::Path(dir.to_path_buf()))?;
    let pattern_path = Path::new(&literal_dir).join(pattern);
    let pattern = pattern_path
        .to_str()
        .ok_or_else(|| SweepError::Path(pattern_path.clone()))?;
    let mut paths = glob::glob(pattern)?.collect::<std::result::Result<Vec<PathBuf>, glob::GlobError>>()?;
    paths.sort();
    Ok(paths)
}

/// Pairs the input and output experiments by position
///
/// Lists of different lengths are truncated to the shorter one, the unpaired
/// experiments are reported with a warning.
pub fn pair_experiments<'a>(inputs: &'a [String], outputs: &'a [String]) -> Vec<(&'a str, &'a str)> {
    let mut pairs = vec![];
    for pair in inputs.iter().zip_longest(outputs) {
        match pair {
            EitherOrBoth::Both(input, output) => pairs.push((input.as_str(), output.as_str())),
            EitherOrBoth::Left(input) => {
                log::warn!("input experiment {:?} has no output experiment, skipped", input)
            }
            EitherOrBoth::Right(output) => {
                log::warn!("output experiment {:?} has no input experiment, skipped", output)
            }
        }
    }
    pairs
}

/// Output folder layout of a reduction mode
#[derive(Debug, Clone, PartialEq)]
pub struct SweepLayout {
    pub output_root: PathBuf,
    pub subfolder: &'static str,
    pub extension: &'static str,
}
impl SweepLayout {
    /// `<output_root>/<experiment>/<subfolder>`
    pub fn folder(&self, experiment: &str) -> PathBuf {
        self.output_root.join(experiment).join(self.subfolder)
    }
    /// `<output_root>/<experiment>/<subfolder>/<stem>.<extension>`
    pub fn file(&self, experiment: &str, stem: &str) -> PathBuf {
        self.folder(experiment)
            .join(format!("{}.{}", stem, self.extension))
    }
    /// Creates the experiment folder if it does not exist yet
    pub fn create_folder(&self, experiment: &str) -> Result<PathBuf> {
        let folder = self.folder(experiment);
        if !folder.is_dir() {
            fs::create_dir_all(&folder).map_err(|e| SweepError::Io(folder.clone(), e))?;
            log::info!("Created folder: {:?}", folder);
        }
        Ok(folder)
    }
}

/// Formats a number like NumPy `savetxt` default format (`%.18e`)
pub fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value > 0. { "inf".into() } else { "-inf".into() };
    }
    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

/// Writes the rows of `table` as space delimited text
pub fn write_table<P: AsRef<Path>>(path: P, table: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    let io_err = |e| SweepError::Io(path.to_path_buf(), e);
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    for row in table.rows() {
        let line = row.iter().map(|&x| format_scientific(x)).join(" ");
        writeln!(writer, "{}", line).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)?;
    Ok(())
}

/// Experiments, file pattern and reading options of a sweep
#[derive(Debug, Clone)]
pub struct SweepPlan {
    input_path: PathBuf,
    output_path: PathBuf,
    input_experiments: Vec<String>,
    output_experiments: Vec<String>,
    glob: String,
    read_options: ReadOptions,
    progress: bool,
}
impl SweepPlan {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(input_path: P, output_path: Q) -> Self {
        Self {
            input_path: input_path.as_ref().to_path_buf(),
            output_path: output_path.as_ref().to_path_buf(),
            input_experiments: vec![],
            output_experiments: vec![],
            glob: String::from("*.tif"),
            read_options: ReadOptions::quiet(),
            progress: true,
        }
    }
    /// Sets the positionally paired input and output experiment folders
    pub fn experiments<S: Into<String>, T: Into<String>>(
        self,
        inputs: impl IntoIterator<Item = S>,
        outputs: impl IntoIterator<Item = T>,
    ) -> Self {
        Self {
            input_experiments: inputs.into_iter().map(Into::into).collect(),
            output_experiments: outputs.into_iter().map(Into::into).collect(),
            ..self
        }
    }
    /// File pattern within the input experiment folders
    pub fn glob<S: Into<String>>(self, glob: S) -> Self {
        Self {
            glob: glob.into(),
            ..self
        }
    }
    /// Frame reading options, the reader warnings are silenced by default
    pub fn read_options(self, read_options: ReadOptions) -> Self {
        Self {
            read_options,
            ..self
        }
    }
    pub fn progress(self, progress: bool) -> Self {
        Self { progress, ..self }
    }
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }
    fn progress_bar(&self, len: usize, experiment: &str) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(experiment.to_string());
        pb
    }
    /// Runs `reduce` on every frame and writes the resulting tables with `layout`
    pub(crate) fn run<F>(&self, layout: &SweepLayout, mut reduce: F) -> Result<SweepSummary>
    where
        F: FnMut(&Array2<f64>) -> Result<Array2<f64>>,
    {
        let mut summary = SweepSummary::default();
        for (input, output) in pair_experiments(&self.input_experiments, &self.output_experiments) {
            let paths = discover(self.input_path.join(input), &self.glob)?;
            log::info!("{}: {} files matching {:?}", input, paths.len(), self.glob);
            let pb = self.progress_bar(paths.len(), input);
            let mut n_written = 0;
            for path in paths {
                let frame = read_image(&path, self.read_options)?;
                let table = reduce(&frame.data)?;
                layout.create_folder(output)?;
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let out = layout.file(output, &stem);
                write_table(&out, &table)?;
                log::debug!("{:?} -> {:?}", path, out);
                n_written += 1;
                pb.inc(1);
            }
            pb.finish_and_clear();
            log::info!(
                "Saved {} files to folder: {:?}",
                n_written,
                layout.folder(output)
            );
            summary.experiments += 1;
            summary.files_written += n_written;
        }
        Ok(summary)
    }
}

/// What a sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// experiment pairs visited
    pub experiments: usize,
    pub files_written: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image::write_tiff;

    /// Writes `n` small frames `img000.tif`, `img001.tif`, ... into `dir`
    pub(crate) fn frames<P: AsRef<Path>>(dir: P, n: usize) {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).unwrap();
        for i in 0..n {
            let data = Array2::from_elem((8, 8), i as f64);
            write_tiff(dir.join(format!("img{:03}.tif", i)), &data).unwrap();
        }
    }

    #[test]
    fn numpy_formatting() {
        assert_eq!(format_scientific(1.), "1.000000000000000000e+00");
        // exact binary value, as `np.savetxt`
        assert_eq!(format_scientific(-0.0125), "-1.250000000000000069e-02");
        assert_eq!(format_scientific(-0.0625), "-6.250000000000000000e-02");
        assert_eq!(format_scientific(1.5e10), "1.500000000000000000e+10");
        assert_eq!(format_scientific(f64::NAN), "nan");
    }

    #[test]
    fn output_layout() {
        let layout = SweepLayout {
            output_root: PathBuf::from("out/"),
            subfolder: azimuthal::SUBFOLDER,
            extension: azimuthal::EXTENSION,
        };
        assert_eq!(
            layout.file("sampleA", "img001"),
            PathBuf::from("out/sampleA/azimuthal-integration-test/img001.xy")
        );
    }

    #[test]
    fn folder_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SweepLayout {
            output_root: dir.path().join("out"),
            subfolder: azimuthal::SUBFOLDER,
            extension: azimuthal::EXTENSION,
        };
        let folder = layout.create_folder("sampleA").unwrap();
        assert!(folder.is_dir());
        fs::write(folder.join("img001.xy"), "kept").unwrap();
        assert_eq!(layout.create_folder("sampleA").unwrap(), folder);
        assert_eq!(fs::read_to_string(folder.join("img001.xy")).unwrap(), "kept");
    }

    #[test]
    fn sorted_discovery() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.tif", "a10.tif", "a2.tif", "c.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<String> = discover(dir.path(), "*.tif")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a10.tif", "a2.tif", "b.tif"]);
        assert_eq!(discover(dir.path(), "*.tif").unwrap().len(), 3);
    }

    #[test]
    fn discovery_in_folder_with_wildcard_characters() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = dir.path().join("sample[1]*");
        fs::create_dir(&experiment).unwrap();
        fs::write(experiment.join("a.tif"), "").unwrap();
        let paths = discover(&experiment, "*.tif").unwrap();
        assert_eq!(paths, vec![experiment.join("a.tif")]);
    }

    #[test]
    fn mismatched_experiments_are_truncated() {
        let inputs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outputs = vec!["A".to_string(), "B".to_string()];
        assert_eq!(pair_experiments(&inputs, &outputs), vec![("a", "A"), ("b", "B")]);
        assert_eq!(pair_experiments(&outputs, &inputs), vec![("A", "a"), ("B", "b")]);
    }

    #[test]
    fn table_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.xy");
        write_table(&path, &ndarray::array![[1., 2.], [3., 4.]]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1.000000000000000000e+00 2.000000000000000000e+00\n\
             3.000000000000000000e+00 4.000000000000000000e+00\n"
        );
    }
}
