//! Tensor shapes.

use smallvec::SmallVec;
use std::fmt;

use crate::dtype::DataType;
use crate::error::MemError;

/// Ordered dimension sizes of a tensor.
///
/// Uses `SmallVec<[usize; 4]>` so shapes up to rank 4 (the common case for
/// activations and weights) never touch the heap. A rank-0 shape is a
/// scalar with one element; any zero dimension makes the shape empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shape(SmallVec<[usize; 4]>);

impl Shape {
    /// Create a shape from a dimension slice.
    pub fn new(dims: &[usize]) -> Self {
        Self(SmallVec::from_slice(dims))
    }

    /// A rank-0 (scalar) shape.
    pub fn scalar() -> Self {
        Self(SmallVec::new())
    }

    /// Dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements, or `None` if the product overflows `usize`.
    pub fn checked_length(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Number of elements. Saturates at `usize::MAX` on overflow.
    pub fn length(&self) -> usize {
        self.checked_length().unwrap_or(usize::MAX)
    }

    /// Whether the shape describes zero elements.
    pub fn is_empty(&self) -> bool {
        self.0.contains(&0)
    }

    /// Bytes required to store this shape with elements of `dtype`.
    pub fn byte_len(&self, dtype: DataType) -> Result<usize, MemError> {
        self.checked_length()
            .and_then(|n| n.checked_mul(dtype.width()))
            .ok_or_else(|| MemError::SizeOverflow {
                shape: self.to_string(),
                dtype,
            })
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(&dims)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(SmallVec::from_vec(dims))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}
