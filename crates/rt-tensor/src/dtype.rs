use std::fmt;

/// Data types a GPU-resident tensor or weight buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// 16-bit brain float.
    Bf16,
    /// 4-bit k-quant block format.
    Q4K,
}

impl DType {
    /// Size in bytes of a single element for non-quantized types, or the
    /// block size in bytes for quantized types.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::Bf16 => 2,
            // one block covers 256 elements: scale/min pair plus packed
            // 4-bit weights.
            DType::Q4K => 144,
        }
    }

    /// Number of elements covered by one quantization block, or 1 for
    /// non-quantized types.
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 | DType::Bf16 => 1,
            DType::Q4K => 256,
        }
    }

    /// True if this dtype requires block dequantization before use in an
    /// elementwise kernel.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::Q4K)
    }

    /// True if this dtype can overflow the finiteness guard's magnitude
    /// check; only the narrow float format needs the guard instrumented.
    pub fn is_narrow_float(&self) -> bool {
        matches!(self, DType::F16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::Bf16 => write!(f, "bf16"),
            DType::Q4K => write!(f, "q4_k"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::Bf16.size_in_bytes(), 2);
    }

    #[test]
    fn test_quantized() {
        assert!(DType::Q4K.is_quantized());
        assert!(!DType::F32.is_quantized());
        assert_eq!(DType::Q4K.block_size(), 256);
    }

    #[test]
    fn test_narrow_float() {
        assert!(DType::F16.is_narrow_float());
        assert!(!DType::F32.is_narrow_float());
        assert!(!DType::Bf16.is_narrow_float());
    }
}
