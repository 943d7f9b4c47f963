//! Map assembly: per-voxel results back into volumes, and ROI extraction.
//!
//! Every map is produced by [`scatter`], which writes value `i` to
//! `batch.spatial_index()[i]` and the sentinel everywhere else. ROIs read
//! voxels back in the same C-order scan that built the batch, so
//! `create_roi(scatter(v), mask) == v` for the mask the batch came from.

pub mod criteria;

use std::collections::BTreeMap;

use ndarray::Array3;

use crate::domain::{FitResult, MaskElement, Sentinel, VoxelBatch};
use crate::error::{Error, Result};
use crate::models::ForwardModel;

pub const LOG_LIKELIHOOD: &str = "LogLikelihood";
pub const RETURN_CODES: &str = "ReturnCodes";
pub const NUMBER_OF_ITERATIONS: &str = "NumberOfIterations";
pub const BIC: &str = "BIC";
pub const AIC: &str = "AIC";
pub const AICC: &str = "AICc";

/// Named volume maps sharing one spatial shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VolumeMapSet {
    shape: [usize; 3],
    maps: BTreeMap<String, Array3<f64>>,
}

impl VolumeMapSet {
    pub fn new(shape: [usize; 3]) -> Self {
        Self {
            shape,
            maps: BTreeMap::new(),
        }
    }

    /// Add a map; its shape must match the set's.
    pub fn insert(&mut self, name: impl Into<String>, map: Array3<f64>) -> Result<()> {
        if map.shape() != self.shape.as_slice() {
            return Err(Error::ShapeMismatch {
                what: "volume map",
                expected: self.shape.to_vec(),
                actual: map.shape().to_vec(),
            });
        }
        self.maps.insert(name.into(), map);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Array3<f64>> {
        self.maps.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.maps.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array3<f64>)> + '_ {
        self.maps.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }
}

/// Write `values[i]` at voxel `i` of `batch`; all other voxels get `sentinel`.
pub fn scatter(values: &[f64], batch: &VoxelBatch, sentinel: Sentinel) -> Result<Array3<f64>> {
    if values.len() != batch.len() {
        return Err(Error::ResultMismatch {
            results: values.len(),
            voxels: batch.len(),
        });
    }
    let [nx, ny, nz] = batch.shape();
    let mut map = Array3::from_elem((nx, ny, nz), sentinel.value());
    for (&value, idx) in values.iter().zip(batch.spatial_index()) {
        map[*idx] = value;
    }
    Ok(map)
}

/// Assemble every output map of one model fit.
pub fn to_maps(
    results: &[FitResult],
    batch: &VoxelBatch,
    model: &dyn ForwardModel,
    sentinel: Sentinel,
) -> Result<VolumeMapSet> {
    if results.len() != batch.len() {
        return Err(Error::ResultMismatch {
            results: results.len(),
            voxels: batch.len(),
        });
    }
    let mut set = VolumeMapSet::new(batch.shape());
    let column = |f: &dyn Fn(&FitResult) -> f64| -> Vec<f64> { results.iter().map(f).collect() };

    for (j, spec) in model.params().iter().enumerate() {
        let values = column(&|r| r.params.get(j).copied().unwrap_or(f64::NAN));
        set.insert(spec.name, scatter(&values, batch, sentinel)?)?;
    }

    let derived: Vec<Vec<f64>> = results.iter().map(|r| model.derived_maps(&r.params)).collect();
    for (j, name) in model.derived_map_names().into_iter().enumerate() {
        let values: Vec<f64> = derived.iter().map(|d| d.get(j).copied().unwrap_or(f64::NAN)).collect();
        set.insert(name, scatter(&values, batch, sentinel)?)?;
    }

    let k = model.n_params();
    let n = batch.n_measurements();
    set.insert(LOG_LIKELIHOOD, scatter(&column(&|r| r.log_likelihood), batch, sentinel)?)?;
    set.insert(RETURN_CODES, scatter(&column(&|r| f64::from(r.status.code())), batch, sentinel)?)?;
    set.insert(NUMBER_OF_ITERATIONS, scatter(&column(&|r| r.iterations as f64), batch, sentinel)?)?;
    set.insert(BIC, scatter(&column(&|r| criteria::bic(r.log_likelihood, k, n)), batch, sentinel)?)?;
    set.insert(AIC, scatter(&column(&|r| criteria::aic(r.log_likelihood, k)), batch, sentinel)?)?;
    set.insert(AICC, scatter(&column(&|r| criteria::aicc(r.log_likelihood, k, n)), batch, sentinel)?)?;
    Ok(set)
}

/// Values of `map` under `mask`, in C scan order.
pub fn create_roi<T: MaskElement>(map: &Array3<f64>, mask: &Array3<T>) -> Result<Vec<f64>> {
    if map.shape() != mask.shape() {
        return Err(Error::ShapeMismatch {
            what: "ROI mask",
            expected: map.shape().to_vec(),
            actual: mask.shape().to_vec(),
        });
    }
    Ok(mask
        .indexed_iter()
        .filter_map(|((x, y, z), m)| m.selects().then(|| map[[x, y, z]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitStatus, Protocol, ProtocolRow};
    use crate::models::S0;

    fn batch() -> VoxelBatch {
        let protocol = Protocol::new(vec![ProtocolRow::new([0.0; 3], 0.0)]);
        let idx = vec![[0, 0, 1], [1, 1, 0]];
        VoxelBatch::new(vec![vec![3.0], vec![4.0]], protocol, idx, [2, 2, 2]).unwrap()
    }

    fn result(s0: f64, status: FitStatus) -> FitResult {
        FitResult {
            params: vec![s0],
            log_likelihood: -1.5,
            status,
            iterations: 4,
        }
    }

    #[test]
    fn scatter_fills_sentinel_outside_batch() {
        let map = scatter(&[7.0, 8.0], &batch(), Sentinel::Nan).unwrap();
        assert_eq!(map[[0, 0, 1]], 7.0);
        assert_eq!(map[[1, 1, 0]], 8.0);
        assert!(map[[0, 0, 0]].is_nan());
        assert_eq!(map.iter().filter(|v| v.is_nan()).count(), 6);
    }

    #[test]
    fn scatter_rejects_length_mismatch() {
        let err = scatter(&[1.0], &batch(), Sentinel::Zero).unwrap_err();
        assert!(matches!(err, Error::ResultMismatch { results: 1, voxels: 2 }));
    }

    #[test]
    fn to_maps_emits_standard_maps() {
        let results = vec![result(3.0, FitStatus::Converged), result(0.0, FitStatus::Degenerate)];
        let maps = to_maps(&results, &batch(), &S0, Sentinel::Zero).unwrap();
        let names: Vec<&str> = maps.names().collect();
        assert_eq!(
            names,
            vec!["AIC", "AICc", "BIC", "LogLikelihood", "NumberOfIterations", "ReturnCodes", "S0.s0"]
        );
        assert_eq!(maps.get(RETURN_CODES).unwrap()[[1, 1, 0]], 2.0);
        assert_eq!(maps.get("S0.s0").unwrap()[[0, 0, 1]], 3.0);
        assert_eq!(maps.get(AIC).unwrap()[[0, 0, 1]], 5.0);
    }

    #[test]
    fn roi_reads_back_scattered_values() {
        let b = batch();
        let map = scatter(&[7.0, 8.0], &b, Sentinel::Zero).unwrap();
        let mut mask = Array3::from_elem((2, 2, 2), 0.0f32);
        mask[[0, 0, 1]] = 1.0;
        mask[[1, 1, 0]] = 1.0;
        assert_eq!(create_roi(&map, &mask).unwrap(), vec![7.0, 8.0]);
    }

    #[test]
    fn roi_rejects_shape_mismatch() {
        let map = Array3::<f64>::zeros((2, 2, 2));
        let mask = Array3::from_elem((2, 2, 3), true);
        assert!(matches!(create_roi(&map, &mask), Err(Error::ShapeMismatch { .. })));
    }
}
