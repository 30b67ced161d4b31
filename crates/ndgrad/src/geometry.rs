//! Immutable shape/stride/offset snapshots.

use crate::error::AutogradError;
use crate::strides::{compute_strides, storage_extent};
use smallvec::SmallVec;
use std::ops::Range;

/// Shape, strides and storage offset of a tensor at a point in time.
///
/// Views are described entirely by a `Geometry` over their base's storage,
/// which is also what backward nodes capture when they need to rebuild a
/// view later.
///
/// # Example
///
/// ```
/// use ndgrad::Geometry;
///
/// let g = Geometry::contiguous(&[4, 5]);
/// assert_eq!(g.strides(), &[1, 4]);
///
/// let s = g.slice(&[1..3, 2..4]).unwrap();
/// assert_eq!(s.sizes(), &[2, 2]);
/// assert_eq!(s.storage_offset(), 1 + 2 * 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Geometry {
    sizes: SmallVec<[usize; 8]>,
    strides: SmallVec<[usize; 8]>,
    storage_offset: usize,
}

impl Geometry {
    /// Create a geometry from explicit sizes, strides and offset.
    ///
    /// # Errors
    ///
    /// Returns error if `sizes` and `strides` have different lengths.
    pub fn new(
        sizes: &[usize],
        strides: &[usize],
        storage_offset: usize,
    ) -> Result<Self, AutogradError> {
        if sizes.len() != strides.len() {
            return Err(AutogradError::WrongNumberOfIndices {
                expected: sizes.len(),
                actual: strides.len(),
            });
        }

        Ok(Self {
            sizes: sizes.iter().copied().collect(),
            strides: strides.iter().copied().collect(),
            storage_offset,
        })
    }

    /// Column-major geometry of a freshly allocated tensor.
    pub fn contiguous(shape: &[usize]) -> Self {
        Self {
            sizes: shape.iter().copied().collect(),
            strides: compute_strides(shape).into_iter().collect(),
            storage_offset: 0,
        }
    }

    /// Sizes of each dimension.
    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Strides of each dimension, in elements.
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Offset of the first element into the storage.
    #[inline]
    pub fn storage_offset(&self) -> usize {
        self.storage_offset
    }

    /// Number of dimensions.
    #[inline]
    pub fn ndim(&self) -> usize {
        self.sizes.len()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Number of storage elements this geometry needs.
    pub fn storage_extent(&self) -> usize {
        storage_extent(&self.sizes, &self.strides, self.storage_offset)
    }

    /// Geometry of a rectangular sub-region.
    ///
    /// The result shares this geometry's strides; only sizes and offset
    /// change.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Number of ranges doesn't match the number of dimensions
    /// - Any range is out of bounds
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Self, AutogradError> {
        let ndim = self.ndim();
        if ranges.len() != ndim {
            return Err(AutogradError::WrongNumberOfIndices {
                expected: ndim,
                actual: ranges.len(),
            });
        }

        let mut sizes = SmallVec::with_capacity(ndim);
        let mut storage_offset = self.storage_offset;
        for (dim, range) in ranges.iter().enumerate() {
            if range.start > range.end || range.end > self.sizes[dim] {
                return Err(AutogradError::SliceOutOfBounds {
                    start: range.start,
                    end: range.end,
                    dim,
                    size: self.sizes[dim],
                });
            }
            sizes.push(range.end - range.start);
            storage_offset += range.start * self.strides[dim];
        }

        Ok(Self {
            sizes,
            strides: self.strides.clone(),
            storage_offset,
        })
    }
}
