use ndarray::{Array3, Array4};
use proptest::prelude::*;
use voxel_fit::domain::{Protocol, ProtocolRow, Sentinel, VoxelBatch};
use voxel_fit::maps::{create_roi, scatter};

fn shape_and_mask() -> impl Strategy<Value = ([usize; 3], Vec<bool>)> {
    (1usize..5, 1usize..5, 1usize..5).prop_flat_map(|(x, y, z)| {
        (Just([x, y, z]), proptest::collection::vec(any::<bool>(), x * y * z))
    })
}

proptest! {
    #[test]
    fn scatter_then_roi_is_identity((shape, flags) in shape_and_mask(), offset in -1e3f64..1e3) {
        let [nx, ny, nz] = shape;
        let mask = Array3::from_shape_vec((nx, ny, nz), flags).unwrap();
        let signal = Array4::from_shape_fn((nx, ny, nz, 2), |(x, y, z, t)| (x * 100 + y * 10 + z + t) as f64);
        let protocol = Protocol::new(vec![ProtocolRow::new([0.0; 3], 0.0); 2]);
        let batch = VoxelBatch::from_arrays(&signal.into_dyn(), protocol, Some(&mask)).unwrap();
        prop_assert_eq!(batch.len(), mask.iter().filter(|m| **m).count());

        let values: Vec<f64> = (0..batch.len()).map(|i| offset + i as f64).collect();
        for sentinel in [Sentinel::Zero, Sentinel::Nan] {
            let map = scatter(&values, &batch, sentinel).unwrap();
            prop_assert_eq!(create_roi(&map, &mask).unwrap(), values.clone());
        }

        // The batch keeps each voxel's own samples.
        for (i, &[x, y, z]) in batch.spatial_index().iter().enumerate() {
            prop_assert_eq!(batch.signal(i)[0], (x * 100 + y * 10 + z) as f64);
        }
    }
}
