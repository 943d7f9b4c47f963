//! Input assembly: signal + protocol + mask → `VoxelBatch`.
//!
//! Design goals:
//! - **Strict shapes**: protocol/signal and mask/signal mismatches are fatal
//!   here, before any compute resource is touched
//! - **Deterministic order**: voxels are gathered in C scan order (z fastest)
//! - **No fitting logic here**

use std::path::Path;

use ndarray::{Array3, ArrayD, Axis, Ix4, s};
use tracing::info;

use crate::domain::{Protocol, VoxelBatch, selected_indices, to_bool_mask};
use crate::error::{Error, Result};
use crate::io::protocol::load_protocol;
use crate::io::volume::{NiftiVolumes, VolumeReader, read_volume3};

impl VoxelBatch {
    /// Gather the masked voxels of `signal` (`[x, y, z]` or `[x, y, z, m]`).
    ///
    /// Without a mask every voxel is selected. An all-false mask yields an
    /// empty batch.
    pub fn from_arrays(signal: &ArrayD<f64>, protocol: Protocol, mask: Option<&Array3<bool>>) -> Result<Self> {
        let signal4 = match signal.ndim() {
            3 => signal.view().insert_axis(Axis(3)),
            4 => signal.view(),
            _ => {
                return Err(Error::ShapeMismatch {
                    what: "signal (3-D or 4-D)",
                    expected: vec![0; 4],
                    actual: signal.shape().to_vec(),
                });
            }
        };
        let signal4 = signal4
            .into_dimensionality::<Ix4>()
            .map_err(|e| Error::InvalidConfig(format!("signal layout: {e}")))?;
        let (nx, ny, nz, m) = signal4.dim();

        if m != protocol.len() {
            return Err(Error::ProtocolMismatch {
                protocol_rows: protocol.len(),
                signal_volumes: m,
            });
        }

        let spatial_index = match mask {
            Some(mask) => {
                if mask.shape() != [nx, ny, nz].as_slice() {
                    return Err(Error::ShapeMismatch {
                        what: "mask",
                        expected: vec![nx, ny, nz],
                        actual: mask.shape().to_vec(),
                    });
                }
                selected_indices(mask)
            }
            None => selected_indices(&Array3::from_elem((nx, ny, nz), true)),
        };

        let mut flat = Vec::with_capacity(spatial_index.len() * m);
        for &[x, y, z] in &spatial_index {
            flat.extend(signal4.slice(s![x, y, z, ..]).iter().copied());
        }

        Ok(VoxelBatch {
            signal: flat,
            n_measurements: m,
            protocol,
            spatial_index,
            shape: [nx, ny, nz],
        })
    }
}

/// Load signal and optional mask through `reader` and assemble a batch.
pub fn load_input_data_with(
    reader: &dyn VolumeReader,
    signal_path: &Path,
    protocol: Protocol,
    mask_path: Option<&Path>,
) -> Result<VoxelBatch> {
    let signal = reader.read_volume(signal_path)?;
    let mask = mask_path
        .map(|p| read_volume3(reader, p).map(|m| to_bool_mask(&m)))
        .transpose()?;
    let batch = VoxelBatch::from_arrays(&signal, protocol, mask.as_ref())?;
    info!(
        signal = %signal_path.display(),
        voxels = batch.len(),
        measurements = batch.n_measurements(),
        shape = ?batch.shape(),
        "input data loaded"
    );
    Ok(batch)
}

/// Load a NIfTI signal, a `.prtcl` protocol and an optional NIfTI mask.
pub fn load_input_data(signal_path: &Path, protocol_path: &Path, mask_path: Option<&Path>) -> Result<VoxelBatch> {
    let protocol = load_protocol(protocol_path)?;
    load_input_data_with(&NiftiVolumes, signal_path, protocol, mask_path)
}
