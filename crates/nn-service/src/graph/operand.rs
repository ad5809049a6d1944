use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ServiceError, ServiceResult};

/// Enumerates the value types an operand may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandType {
    Float32,
    Int32,
    Uint32,
    TensorFloat32,
    TensorInt32,
    TensorQuant8Asymm,
}

impl OperandType {
    /// Stable wire code used across the IPC boundary.
    pub fn code(self) -> i32 {
        match self {
            OperandType::Float32 => 0,
            OperandType::Int32 => 1,
            OperandType::Uint32 => 2,
            OperandType::TensorFloat32 => 3,
            OperandType::TensorInt32 => 4,
            OperandType::TensorQuant8Asymm => 5,
        }
    }

    pub fn from_code(code: i32) -> ServiceResult<Self> {
        Ok(match code {
            0 => OperandType::Float32,
            1 => OperandType::Int32,
            2 => OperandType::Uint32,
            3 => OperandType::TensorFloat32,
            4 => OperandType::TensorInt32,
            5 => OperandType::TensorQuant8Asymm,
            _ => {
                return Err(ServiceError::unsupported(format!(
                    "unknown operand type code {code}"
                )))
            }
        })
    }

    /// Returns `true` for tensor types; scalars carry no dimensions.
    pub fn is_tensor(self) -> bool {
        matches!(
            self,
            OperandType::TensorFloat32 | OperandType::TensorInt32 | OperandType::TensorQuant8Asymm
        )
    }

    pub fn is_quantized(self) -> bool {
        self == OperandType::TensorQuant8Asymm
    }

    /// Storage size of one element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32 => 4,
            OperandType::TensorQuant8Asymm => 1,
        }
    }
}

/// Ordered tensor extents; empty for scalars.
pub type Dimensions = SmallVec<[u32; 4]>;

/// Typed scalar or tensor slot in a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    pub operand_type: OperandType,
    pub dimensions: Dimensions,
    pub scale: f32,
    pub zero_point: i32,
}

impl Operand {
    pub fn new(
        operand_type: OperandType,
        dimensions: impl IntoIterator<Item = u32>,
        scale: f32,
        zero_point: i32,
    ) -> Self {
        Self {
            operand_type,
            dimensions: dimensions.into_iter().collect(),
            scale,
            zero_point,
        }
    }

    pub fn scalar(operand_type: OperandType) -> Self {
        Self::new(operand_type, [], 0.0, 0)
    }

    pub fn tensor(operand_type: OperandType, dimensions: impl IntoIterator<Item = u32>) -> Self {
        Self::new(operand_type, dimensions, 0.0, 0)
    }

    /// Element count, `None` on overflow. Scalars count as one element.
    pub fn element_count(&self) -> Option<usize> {
        let mut count = 1usize;
        for dim in &self.dimensions {
            count = count.checked_mul(*dim as usize)?;
        }
        Some(count)
    }

    /// Byte size of the operand's payload, `None` on overflow.
    pub fn checked_required_size(&self) -> Option<usize> {
        if !self.operand_type.is_tensor() {
            return Some(self.operand_type.element_size());
        }
        self.element_count()?
            .checked_mul(self.operand_type.element_size())
    }

    /// Byte size of the operand's payload.
    ///
    /// Operands admitted by [`Operand::validate`] never overflow.
    pub fn required_size(&self) -> usize {
        self.checked_required_size().unwrap_or(usize::MAX)
    }

    /// Checks the descriptor invariants enforced when an operand enters a graph.
    pub fn validate(&self) -> ServiceResult<()> {
        if self.operand_type.is_tensor() {
            if self.dimensions.iter().any(|dim| *dim == 0) {
                return Err(ServiceError::bad_data(format!(
                    "tensor operand has a zero extent: {:?}",
                    self.dimensions.as_slice()
                )));
            }
        } else if !self.dimensions.is_empty() {
            return Err(ServiceError::bad_data(format!(
                "scalar operand {:?} must not carry dimensions",
                self.operand_type
            )));
        }

        if self.checked_required_size().is_none() {
            return Err(ServiceError::bad_data(format!(
                "operand size overflows for dimensions {:?}",
                self.dimensions.as_slice()
            )));
        }

        if self.operand_type.is_quantized() {
            if !(self.scale.is_finite() && self.scale > 0.0) {
                return Err(ServiceError::bad_data(format!(
                    "quantized operand requires a positive scale, got {}",
                    self.scale
                )));
            }
            if !(0..=255).contains(&self.zero_point) {
                return Err(ServiceError::bad_data(format!(
                    "quantized zero point {} outside 0..=255",
                    self.zero_point
                )));
            }
        }
        Ok(())
    }
}

/// Renders at most the first 200 elements of an operand payload for trace logs.
pub fn describe_values(operand_type: OperandType, bytes: &[u8]) -> String {
    const MAX_ELEMENTS: usize = 200;

    let rendered: Vec<String> = match operand_type {
        OperandType::Float32 | OperandType::TensorFloat32 => bytes
            .chunks_exact(4)
            .take(MAX_ELEMENTS)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string())
            .collect(),
        OperandType::Int32 | OperandType::TensorInt32 => bytes
            .chunks_exact(4)
            .take(MAX_ELEMENTS)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string())
            .collect(),
        OperandType::Uint32 => bytes
            .chunks_exact(4)
            .take(MAX_ELEMENTS)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string())
            .collect(),
        OperandType::TensorQuant8Asymm => bytes
            .iter()
            .take(MAX_ELEMENTS)
            .map(|b| b.to_string())
            .collect(),
    };
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_size_is_product_times_element_size() {
        let cases = [
            (OperandType::TensorFloat32, vec![2, 2], 16),
            (OperandType::TensorInt32, vec![3, 1, 5], 60),
            (OperandType::TensorQuant8Asymm, vec![7, 3], 21),
            (OperandType::TensorFloat32, vec![1], 4),
        ];
        for (ty, dims, expected) in cases {
            assert_eq!(Operand::tensor(ty, dims).required_size(), expected);
        }
    }

    #[test]
    fn scalar_size_is_element_size() {
        assert_eq!(Operand::scalar(OperandType::Float32).required_size(), 4);
        assert_eq!(Operand::scalar(OperandType::Int32).required_size(), 4);
        assert_eq!(Operand::scalar(OperandType::Uint32).required_size(), 4);
    }

    #[test]
    fn validate_rejects_malformed_descriptors() {
        let scalar_with_dims = Operand::new(OperandType::Int32, [2], 0.0, 0);
        assert!(matches!(
            scalar_with_dims.validate(),
            Err(ServiceError::BadData(_))
        ));

        let zero_extent = Operand::tensor(OperandType::TensorFloat32, [4, 0]);
        assert!(zero_extent.validate().is_err());

        let bad_scale = Operand::new(OperandType::TensorQuant8Asymm, [4], 0.0, 0);
        assert!(bad_scale.validate().is_err());

        let bad_zero_point = Operand::new(OperandType::TensorQuant8Asymm, [4], 0.5, 300);
        assert!(bad_zero_point.validate().is_err());

        let overflow = Operand::tensor(OperandType::TensorFloat32, [u32::MAX, u32::MAX, u32::MAX]);
        assert!(overflow.validate().is_err());

        let quantized = Operand::new(OperandType::TensorQuant8Asymm, [4], 0.5, 128);
        quantized.validate().expect("valid quantized operand");
    }

    #[test]
    fn operand_type_codes_are_stable() {
        for code in 0..6 {
            let ty = OperandType::from_code(code).expect("known code");
            assert_eq!(ty.code(), code);
        }
        assert!(matches!(
            OperandType::from_code(6),
            Err(ServiceError::Unsupported(_))
        ));
    }

    #[test]
    fn describe_values_truncates_long_payloads() {
        let bytes: Vec<u8> = (0..300u32).flat_map(|v| (v as f32).to_le_bytes()).collect();
        let rendered = describe_values(OperandType::TensorFloat32, &bytes);
        assert!(rendered.starts_with("[0, 1, 2"));
        assert!(rendered.ends_with("199]"));
    }
}
