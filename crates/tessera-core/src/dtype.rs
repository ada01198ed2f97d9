//! Element data types and their storage widths.

use std::fmt;

/// Element type of a tensor buffer.
///
/// The cache keys its reuse table on `(DataType, Shape)`, so two buffers
/// with the same byte size but different element types never share a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// 1-byte boolean.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// IEEE 754 half precision.
    Half,
    /// Brain floating point (16-bit).
    BFloat16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// IEEE 754 single precision.
    Float,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// IEEE 754 double precision.
    Double,
}

impl DataType {
    /// Every supported data type, narrowest first.
    pub const ALL: [DataType; 13] = [
        Self::Bool,
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Half,
        Self::BFloat16,
        Self::Int32,
        Self::UInt32,
        Self::Float,
        Self::Int64,
        Self::UInt64,
        Self::Double,
    ];

    /// Size of a single element in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Half | Self::BFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float => 4,
            Self::Int64 | Self::UInt64 | Self::Double => 8,
        }
    }

    /// Whether this is a floating-point type.
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Half | Self::BFloat16 | Self::Float | Self::Double
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "BOOL",
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int16 => "INT16",
            Self::UInt16 => "UINT16",
            Self::Half => "HALF",
            Self::BFloat16 => "BFLOAT16",
            Self::Int32 => "INT32",
            Self::UInt32 => "UINT32",
            Self::Float => "FLOAT",
            Self::Int64 => "INT64",
            Self::UInt64 => "UINT64",
            Self::Double => "DOUBLE",
        };
        f.write_str(name)
    }
}
