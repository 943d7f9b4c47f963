//! Volume files.
//!
//! The core only needs two capabilities: read a volume as `f64` samples and
//! write one 3-D map. Both are traits so tests and embedding callers can work
//! from memory; [`NiftiVolumes`] is the file-backed implementation.

use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, ArrayD, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::{Error, Result};

/// Extension used for every written map.
pub const MAP_EXTENSION: &str = "nii.gz";

pub trait VolumeReader {
    /// Samples indexed `[x, y, z(, t)]`.
    fn read_volume(&self, path: &Path) -> Result<ArrayD<f64>>;
}

pub trait MapWriter {
    fn write_map(&self, path: &Path, map: &Array3<f64>) -> Result<()>;
}

/// NIfTI-1 reader/writer (`.nii` and `.nii.gz`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NiftiVolumes;

fn volume_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Volume {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl VolumeReader for NiftiVolumes {
    fn read_volume(&self, path: &Path) -> Result<ArrayD<f64>> {
        if !path.exists() {
            return Err(Error::io(
                "volume not found",
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        let object = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| volume_error(path, e))?;
        object
            .into_volume()
            .into_ndarray::<f64>()
            .map_err(|e| volume_error(path, e))
    }
}

impl MapWriter for NiftiVolumes {
    fn write_map(&self, path: &Path, map: &Array3<f64>) -> Result<()> {
        WriterOptions::new(path)
            .write_nifti(map)
            .map_err(|e| volume_error(path, e))
    }
}

/// Write a 4-D signal volume (`[x, y, z, measurement]`) as NIfTI.
pub fn write_signal(path: &Path, signal: &Array4<f64>) -> Result<()> {
    WriterOptions::new(path)
        .write_nifti(signal)
        .map_err(|e| volume_error(path, e))
}

/// Read a 3-D volume (a trailing axis of length 1 is dropped).
pub fn read_volume3(reader: &dyn VolumeReader, path: &Path) -> Result<Array3<f64>> {
    let mut data = reader.read_volume(path)?;
    while data.ndim() > 3 && data.shape().last() == Some(&1) {
        let last = data.ndim() - 1;
        data = data.index_axis_move(ndarray::Axis(last), 0);
    }
    let shape = data.shape().to_vec();
    data.into_dimensionality::<Ix3>().map_err(|_| Error::ShapeMismatch {
        what: "3-D volume",
        expected: vec![0; 3],
        actual: shape,
    })
}

/// `<dir>/<name>.nii.gz`
pub fn map_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{MAP_EXTENSION}"))
}

/// Map name of a volume file (`LogLikelihood.nii.gz` → `LogLikelihood`).
pub fn map_name(path: &Path) -> Option<String> {
    let file = path.file_name()?.to_str()?;
    file.strip_suffix(".nii.gz")
        .or_else(|| file.strip_suffix(".nii"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_names_strip_nifti_extensions() {
        assert_eq!(map_name(Path::new("/x/Tensor.FA.nii.gz")).as_deref(), Some("Tensor.FA"));
        assert_eq!(map_name(Path::new("S0.s0.nii")).as_deref(), Some("S0.s0"));
        assert_eq!(map_name(Path::new("fit_info.json")), None);
        assert_eq!(map_path(Path::new("out"), "BIC"), Path::new("out/BIC.nii.gz"));
    }

    #[test]
    fn nifti_round_trip_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = map_path(dir.path(), "probe");
        let map = Array3::from_shape_fn((3, 2, 4), |(x, y, z)| (x * 100 + y * 10 + z) as f64);
        NiftiVolumes.write_map(&path, &map).unwrap();
        let back = read_volume3(&NiftiVolumes, &path).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = NiftiVolumes.read_volume(Path::new("/nonexistent/signal.nii.gz")).unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}
