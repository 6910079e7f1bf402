//! Tensor shapes and element types.

use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn byte_width(&self) -> u64 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float16 | DataType::Float32 | DataType::Float64)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "i8",
            DataType::Int16 => "i16",
            DataType::Int32 => "i32",
            DataType::Int64 => "i64",
            DataType::UInt8 => "u8",
            DataType::UInt16 => "u16",
            DataType::UInt32 => "u32",
            DataType::UInt64 => "u64",
            DataType::Float16 => "fp16",
            DataType::Float32 => "fp32",
            DataType::Float64 => "fp64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(DataType::Bool),
            "i8" | "int8" => Ok(DataType::Int8),
            "i16" | "int16" => Ok(DataType::Int16),
            "i32" | "int32" => Ok(DataType::Int32),
            "i64" | "int64" => Ok(DataType::Int64),
            "u8" | "uint8" => Ok(DataType::UInt8),
            "u16" | "uint16" => Ok(DataType::UInt16),
            "u32" | "uint32" => Ok(DataType::UInt32),
            "u64" | "uint64" => Ok(DataType::UInt64),
            "f16" | "fp16" | "float16" => Ok(DataType::Float16),
            "f32" | "fp32" | "float32" => Ok(DataType::Float32),
            "f64" | "fp64" | "float64" => Ok(DataType::Float64),
            _ => Err(format!("unknown data type '{}'", s)),
        }
    }
}

/// One dimension of a tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDim {
    /// Number of elements along this dimension
    pub size: u64,
    /// Distance in elements between consecutive entries along this dimension
    pub stride: i64,
}

impl TensorDim {
    pub fn new(size: u64, stride: i64) -> Self {
        Self { size, stride }
    }
}

/// Shape of a tensor or of a view into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub dtype: DataType,
    pub dims: Vec<TensorDim>,
}

impl TensorShape {
    /// A dense row-major shape: each stride is the product of the trailing sizes.
    ///
    /// Strides that do not fit in an `i64` saturate; use [`TensorShape::try_simple`]
    /// for sizes that come from user input.
    pub fn simple(dtype: DataType, sizes: &[u64]) -> Self {
        let mut dims = vec![TensorDim::new(0, 0); sizes.len()];
        let mut stride: i64 = 1;
        for (i, &size) in sizes.iter().enumerate().rev() {
            dims[i] = TensorDim::new(size, stride);
            if i > 0 {
                stride = stride.saturating_mul(i64::try_from(size).unwrap_or(i64::MAX));
            }
        }
        Self { dtype, dims }
    }

    /// Like [`TensorShape::simple`], failing when a stride overflows `i64`.
    pub fn try_simple(dtype: DataType, sizes: &[u64]) -> Result<Self, String> {
        let mut dims = vec![TensorDim::new(0, 0); sizes.len()];
        let mut stride: i64 = 1;
        for (i, &size) in sizes.iter().enumerate().rev() {
            dims[i] = TensorDim::new(size, stride);
            if i > 0 {
                stride = i64::try_from(size)
                    .ok()
                    .and_then(|size| stride.checked_mul(size))
                    .ok_or_else(|| format!("shape {:?} has a stride that overflows i64", sizes))?;
            }
        }
        Ok(Self { dtype, dims })
    }

    /// A zero-dimensional (scalar) shape.
    pub fn scalar(dtype: DataType) -> Self {
        Self { dtype, dims: Vec::new() }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn sizes(&self) -> Vec<u64> {
        self.dims.iter().map(|d| d.size).collect()
    }

    pub fn strides(&self) -> Vec<i64> {
        self.dims.iter().map(|d| d.stride).collect()
    }

    /// Number of logical elements.
    pub fn elem_count(&self) -> u64 {
        self.dims.iter().map(|d| d.size).fold(1u64, u64::saturating_mul)
    }

    /// Number of elements the view spans in the underlying storage.
    pub fn span(&self) -> u64 {
        if self.dims.iter().any(|d| d.size == 0) {
            return 0;
        }
        self.dims
            .iter()
            .map(|d| d.stride.unsigned_abs().saturating_mul(d.size - 1))
            .fold(1u64, u64::saturating_add)
    }

    /// Bytes needed to back the view.
    pub fn byte_size(&self) -> u64 {
        self.span().saturating_mul(self.dtype.byte_width())
    }

    /// Same strides, every dimension of size `size`.
    pub fn with_uniform_size(&self, size: u64) -> Self {
        Self {
            dtype: self.dtype,
            dims: self.dims.iter().map(|d| TensorDim::new(size, d.stride)).collect(),
        }
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.dtype)?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", d.size, d.stride)?;
        }
        write!(f, ")")
    }
}

impl FromStr for TensorShape {
    type Err = String;

    /// Parse `f32:5x5`, `5x5` (fp32) or `i8:` (scalar).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dtype, dims) = match s.split_once(':') {
            Some((dt, dims)) => (dt.trim().parse::<DataType>()?, dims.trim()),
            None => (DataType::Float32, s.trim()),
        };
        if dims.is_empty() {
            return Ok(TensorShape::scalar(dtype));
        }
        let sizes = dims
            .split(|c: char| c == 'x' || c == 'X' || c == ',')
            .map(|d| d.trim().parse::<u64>().map_err(|e| format!("invalid dimension '{}': {}", d, e)))
            .collect::<Result<Vec<_>, _>>()?;
        TensorShape::try_simple(dtype, &sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_strides() {
        let shape = TensorShape::simple(DataType::Float32, &[2, 3, 4]);
        assert_eq!(shape.strides(), vec![12, 4, 1]);
        assert_eq!(shape.elem_count(), 24);
        assert_eq!(shape.span(), 24);
        assert_eq!(shape.byte_size(), 96);
    }

    #[test]
    fn test_parse_shape() {
        let shape: TensorShape = "f32:5x5".parse().unwrap();
        assert_eq!(shape, TensorShape::simple(DataType::Float32, &[5, 5]));

        let shape: TensorShape = "i8:3,7".parse().unwrap();
        assert_eq!(shape.dtype, DataType::Int8);
        assert_eq!(shape.strides(), vec![7, 1]);

        let shape: TensorShape = "16".parse().unwrap();
        assert_eq!(shape.dtype, DataType::Float32);
        assert_eq!(shape.sizes(), vec![16]);

        assert!("q9:4".parse::<TensorShape>().is_err());
        assert!("f32:4xz".parse::<TensorShape>().is_err());
    }

    #[test]
    fn test_huge_strides_do_not_overflow() {
        // The outermost size never feeds a stride.
        let shape = TensorShape::simple(DataType::Float32, &[1u64 << 32, 1u64 << 31]);
        assert_eq!(shape.strides(), vec![1i64 << 31, 1]);
        assert_eq!(
            TensorShape::try_simple(DataType::Float32, &[1u64 << 32, 1u64 << 31]).unwrap(),
            shape
        );

        let err = TensorShape::try_simple(DataType::Float32, &[2, 1u64 << 32, 1u64 << 32]);
        assert!(err.unwrap_err().contains("overflows"));
        assert!("f32:4x4294967296x4294967296".parse::<TensorShape>().is_err());
        assert!("f32:18446744073709551615x2".parse::<TensorShape>().is_ok());
        assert!("f32:2x18446744073709551615".parse::<TensorShape>().is_err());

        let saturated = TensorShape::simple(DataType::Float32, &[2, 1u64 << 32, 1u64 << 32]);
        assert_eq!(saturated.strides()[0], i64::MAX);
        assert_eq!(saturated.span(), u64::MAX);
    }

    #[test]
    fn test_view_span() {
        let view = TensorShape::simple(DataType::Float64, &[5, 5]).with_uniform_size(2);
        assert_eq!(view.span(), 7);
        assert_eq!(view.byte_size(), 56);
        assert_eq!(view.to_string(), "fp64(2:5, 2:1)");
    }
}
