//! Stride computation utilities.
//!
//! Uses column-major (Fortran) order, the layout of every freshly
//! allocated tensor.

/// Compute column-major strides from shape.
///
/// For shape [d0, d1, d2, ...], returns strides [1, d0, d0*d1, ...].
///
/// # Examples
///
/// ```
/// use ndgrad::strides::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]), vec![1, 3, 12]);
/// assert_eq!(compute_strides(&[5]), vec![1]);
/// assert_eq!(compute_strides(&[]), Vec::<usize>::new());
/// ```
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut stride = 1;

    for &dim in shape.iter() {
        strides.push(stride);
        stride *= dim;
    }

    strides
}

/// Number of storage elements spanned by a strided layout, counted from
/// element 0 of the storage.
///
/// Zero when any dimension is empty.
pub fn storage_extent(shape: &[usize], strides: &[usize], offset: usize) -> usize {
    if shape.contains(&0) {
        return 0;
    }

    let last: usize = shape
        .iter()
        .zip(strides.iter())
        .map(|(&dim, &stride)| (dim - 1) * stride)
        .sum();

    offset + last + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_strides_3d() {
        assert_eq!(compute_strides(&[3, 4, 5]), vec![1, 3, 12]);
    }

    #[test]
    fn test_compute_strides_2d() {
        assert_eq!(compute_strides(&[2, 3]), vec![1, 2]);
    }

    #[test]
    fn test_compute_strides_empty() {
        assert!(compute_strides(&[]).is_empty());
    }

    #[test]
    fn test_storage_extent() {
        assert_eq!(storage_extent(&[3, 4], &[1, 3], 0), 12);
        // Rows 1..3 of columns 2..4 in a 4x5 column-major matrix.
        assert_eq!(storage_extent(&[2, 2], &[1, 4], 9), 9 + 1 + 4 + 1);
        assert_eq!(storage_extent(&[0, 4], &[1, 0], 5), 0);
        assert_eq!(storage_extent(&[], &[], 2), 3);
    }
}
