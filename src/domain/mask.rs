//! Voxel masks and the scan order shared by batch assembly and ROI extraction.

use ndarray::Array3;

/// An element type usable as a mask: boolean masks, or numeric masks where
/// any finite non-zero value selects the voxel (zero and NaN do not).
pub trait MaskElement {
    fn selects(&self) -> bool;
}

impl MaskElement for bool {
    fn selects(&self) -> bool {
        *self
    }
}

macro_rules! float_mask {
    ($($t:ty),*) => {$(
        impl MaskElement for $t {
            fn selects(&self) -> bool {
                self.is_finite() && *self != 0.0
            }
        }
    )*};
}

macro_rules! int_mask {
    ($($t:ty),*) => {$(
        impl MaskElement for $t {
            fn selects(&self) -> bool {
                *self != 0
            }
        }
    )*};
}

float_mask!(f32, f64);
int_mask!(u8, i8, u16, i16, u32, i32, i64);

/// Indices of selected voxels in C order (z fastest, then y, then x).
pub fn selected_indices<T: MaskElement>(mask: &Array3<T>) -> Vec<[usize; 3]> {
    mask.indexed_iter()
        .filter_map(|((x, y, z), v)| v.selects().then_some([x, y, z]))
        .collect()
}

/// Coerce any mask to booleans.
pub fn to_bool_mask<T: MaskElement>(mask: &Array3<T>) -> Array3<bool> {
    mask.map(MaskElement::selects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_mask_coercion() {
        let mask = Array3::from_shape_vec((1, 1, 4), vec![0.0, 1.0, f64::NAN, -2.5]).unwrap();
        assert_eq!(selected_indices(&mask), vec![[0, 0, 1], [0, 0, 3]]);
    }

    #[test]
    fn scan_order_is_z_fastest() {
        let mask = Array3::from_elem((2, 1, 2), true);
        assert_eq!(
            selected_indices(&mask),
            vec![[0, 0, 0], [0, 0, 1], [1, 0, 0], [1, 0, 1]]
        );
    }

    #[test]
    fn scan_order_ignores_memory_layout() {
        let mut mask = Array3::from_elem((2, 1, 2), 0u8);
        mask[[1, 0, 0]] = 1;
        mask[[0, 0, 1]] = 1;
        let fortran = mask.t().as_standard_layout().t().to_owned();
        assert_eq!(selected_indices(&fortran), selected_indices(&mask));
    }
}
