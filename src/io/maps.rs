//! Output persistence: one directory per model.
//!
//! ```text
//! <output>/<model>/<map>.nii.gz
//! <output>/<model>/fit_info.json
//! ```
//!
//! Maps are written to a hidden staging directory next to the final one and
//! renamed into place only once every file was written, so a failed run never
//! leaves a half-written model directory behind.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{NoiseModel, Sentinel};
use crate::error::{Error, Result};
use crate::fit::StatusCounts;
use crate::io::volume::{MapWriter, NiftiVolumes, map_name, map_path, read_volume3};
use crate::maps::VolumeMapSet;

pub const FIT_INFO_FILE: &str = "fit_info.json";

/// Run metadata written next to the maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInfo {
    pub model: String,
    pub devices: Vec<String>,
    pub noise_model: NoiseModel,
    pub noise_std: f64,
    pub sentinel: Sentinel,
    pub voxels: usize,
    pub measurements: usize,
    pub shape: [usize; 3],
    pub status: StatusCounts,
    pub maps: Vec<String>,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

/// Write `maps` and `info` to `<output>/<model>`, replacing any previous run.
pub fn persist_maps(writer: &dyn MapWriter, output: &Path, maps: &VolumeMapSet, info: &FitInfo) -> Result<PathBuf> {
    let final_dir = output.join(&info.model);
    let staging = output.join(format!(".{}.staging-{}", info.model, std::process::id()));

    fs::create_dir_all(output).map_err(|e| Error::io("failed to create output directory", output, e))?;
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| Error::io("failed to clear staging directory", &staging, e))?;
    }
    fs::create_dir_all(&staging).map_err(|e| Error::io("failed to create staging directory", &staging, e))?;

    let written = write_all(writer, &staging, maps, info);
    if let Err(e) = written {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if final_dir.exists() {
        fs::remove_dir_all(&final_dir).map_err(|e| Error::io("failed to replace model directory", &final_dir, e))?;
    }
    fs::rename(&staging, &final_dir).map_err(|e| Error::io("failed to move maps into place", &final_dir, e))?;
    info!(model = %info.model, dir = %final_dir.display(), maps = maps.len(), "maps written");
    Ok(final_dir)
}

fn write_all(writer: &dyn MapWriter, dir: &Path, maps: &VolumeMapSet, info: &FitInfo) -> Result<()> {
    for (name, map) in maps.iter() {
        let path = map_path(dir, name);
        debug!(map = name, path = %path.display(), "writing map");
        writer.write_map(&path, map)?;
    }
    let json = serde_json::to_string_pretty(info)
        .map_err(|e| Error::io("failed to serialize fit info", dir, std::io::Error::other(e)))?;
    let path = dir.join(FIT_INFO_FILE);
    fs::write(&path, json).map_err(|e| Error::io("failed to write fit info", path, e))
}

/// Read every `.nii` / `.nii.gz` map of a model output directory.
pub fn load_volume_maps(dir: &Path) -> Result<VolumeMapSet> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io("failed to list map directory", dir, e))?;
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io("failed to list map directory", dir, e))?.path();
        if let Some(name) = map_name(&path) {
            files.push((name, path));
        }
    }
    files.sort();

    let mut set: Option<VolumeMapSet> = None;
    for (name, path) in files {
        let map = read_volume3(&NiftiVolumes, &path)?;
        let set = set.get_or_insert_with(|| {
            let (nx, ny, nz) = map.dim();
            VolumeMapSet::new([nx, ny, nz])
        });
        set.insert(name, map)?;
    }
    Ok(set.unwrap_or_default())
}

/// Read `fit_info.json` from a model output directory.
pub fn load_fit_info(dir: &Path) -> Result<FitInfo> {
    let path = dir.join(FIT_INFO_FILE);
    let text = fs::read_to_string(&path).map_err(|e| Error::io("failed to read fit info", &path, e))?;
    serde_json::from_str(&text).map_err(|e| Error::io("failed to parse fit info", path, std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn info(model: &str, maps: &VolumeMapSet) -> FitInfo {
        let now = Utc::now();
        FitInfo {
            model: model.into(),
            devices: vec!["cpu".into()],
            noise_model: NoiseModel::OffsetGaussian,
            noise_std: 1.0,
            sentinel: Sentinel::Zero,
            voxels: 2,
            measurements: 3,
            shape: maps.shape(),
            status: StatusCounts::default(),
            maps: maps.names().map(str::to_string).collect(),
            started: now,
            finished: now,
            elapsed_seconds: 0.0,
        }
    }

    fn maps() -> VolumeMapSet {
        let mut set = VolumeMapSet::new([2, 1, 3]);
        set.insert("S0.s0", Array3::from_shape_fn((2, 1, 3), |(x, _, z)| (x * 3 + z) as f64)).unwrap();
        set.insert("LogLikelihood", Array3::from_elem((2, 1, 3), -4.5)).unwrap();
        set
    }

    #[test]
    fn persisted_maps_load_back() {
        let out = tempfile::tempdir().unwrap();
        let maps = maps();
        let dir = persist_maps(&NiftiVolumes, out.path(), &maps, &info("S0", &maps)).unwrap();
        assert_eq!(dir, out.path().join("S0"));
        assert_eq!(load_volume_maps(&dir).unwrap(), maps);
        assert_eq!(load_fit_info(&dir).unwrap().maps, vec!["LogLikelihood", "S0.s0"]);
    }

    #[test]
    fn rerun_replaces_previous_output() {
        let out = tempfile::tempdir().unwrap();
        let maps = maps();
        persist_maps(&NiftiVolumes, out.path(), &maps, &info("S0", &maps)).unwrap();
        fs::write(out.path().join("S0").join("stale.nii"), b"junk").unwrap();
        let dir = persist_maps(&NiftiVolumes, out.path(), &maps, &info("S0", &maps)).unwrap();
        assert!(!dir.join("stale.nii").exists());
        let leftovers: Vec<_> = fs::read_dir(out.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    struct FailingWriter;

    impl MapWriter for FailingWriter {
        fn write_map(&self, path: &Path, _map: &Array3<f64>) -> Result<()> {
            Err(Error::Volume {
                path: path.to_path_buf(),
                message: "disk full".into(),
            })
        }
    }

    #[test]
    fn failed_write_leaves_no_model_directory() {
        let out = tempfile::tempdir().unwrap();
        let maps = maps();
        assert!(persist_maps(&FailingWriter, out.path(), &maps, &info("S0", &maps)).is_err());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
