//! Calculator service.
//!
//! ```text
//! message AddRequest { int64 lhs = 1; int64 rhs = 2; }
//! message AddResult  { int64 value = 1; }
//! ```
//!
//! `sub`, `mul` and `div` use messages of the same shape. Results that do
//! not fit in an `int64` fail with [`ExecutionError::Overflow`]; `div`
//! truncates toward zero and rejects a zero divisor.

use crate::registry::{ExecutionError, MethodRegistry};

pub const ADD: &str = "Calculator.Service.add";
pub const SUB: &str = "Calculator.Service.sub";
pub const MUL: &str = "Calculator.Service.mul";
pub const DIV: &str = "Calculator.Service.div";

/// Request payload shared by all calculator methods.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Operands {
    #[prost(int64, tag = "1")]
    pub lhs: i64,
    #[prost(int64, tag = "2")]
    pub rhs: i64,
}

/// Result payload shared by all calculator methods.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Value {
    #[prost(int64, tag = "1")]
    pub value: i64,
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value { value }
    }
}

pub fn add(Operands { lhs, rhs }: Operands) -> Result<Value, ExecutionError> {
    lhs.checked_add(rhs)
        .map(Value::from)
        .ok_or(ExecutionError::Overflow)
}

pub fn sub(Operands { lhs, rhs }: Operands) -> Result<Value, ExecutionError> {
    lhs.checked_sub(rhs)
        .map(Value::from)
        .ok_or(ExecutionError::Overflow)
}

pub fn mul(Operands { lhs, rhs }: Operands) -> Result<Value, ExecutionError> {
    lhs.checked_mul(rhs)
        .map(Value::from)
        .ok_or(ExecutionError::Overflow)
}

pub fn div(Operands { lhs, rhs }: Operands) -> Result<Value, ExecutionError> {
    if rhs == 0 {
        return Err(ExecutionError::DivisionByZero);
    }
    lhs.checked_div(rhs)
        .map(Value::from)
        .ok_or(ExecutionError::Overflow)
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(ADD, add);
    registry.register(SUB, sub);
    registry.register(MUL, mul);
    registry.register(DIV, div);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn ops(lhs: i64, rhs: i64) -> Operands {
        Operands { lhs, rhs }
    }

    #[test]
    fn test_operations() {
        assert_eq!(add(ops(3, 4)), Ok(Value { value: 7 }));
        assert_eq!(sub(ops(3, 4)), Ok(Value { value: -1 }));
        assert_eq!(mul(ops(3, 4)), Ok(Value { value: 12 }));
        assert_eq!(div(ops(12, 4)), Ok(Value { value: 3 }));
    }

    #[test]
    fn test_div_truncates_toward_zero() {
        assert_eq!(div(ops(-9, 4)), Ok(Value { value: -2 }));
        assert_eq!(div(ops(9, -4)), Ok(Value { value: -2 }));
    }

    #[test]
    fn test_div_by_zero() {
        assert_eq!(div(ops(5, 0)), Err(ExecutionError::DivisionByZero));
        assert_eq!(div(ops(0, 0)), Err(ExecutionError::DivisionByZero));
    }

    #[test]
    fn test_overflow() {
        assert_eq!(add(ops(i64::MAX, 1)), Err(ExecutionError::Overflow));
        assert_eq!(sub(ops(i64::MIN, 1)), Err(ExecutionError::Overflow));
        assert_eq!(mul(ops(i64::MAX, 2)), Err(ExecutionError::Overflow));
        assert_eq!(div(ops(i64::MIN, -1)), Err(ExecutionError::Overflow));
    }

    #[test]
    fn test_operands_encoding() {
        // lhs = 3, rhs = 4
        let encoded = ops(3, 4).encode_to_vec();
        assert_eq!(encoded, [0x08, 0x03, 0x10, 0x04]);
        assert_eq!(Operands::decode(encoded.as_slice()).unwrap(), ops(3, 4));

        // negative int64 values take ten bytes
        let negative = ops(-1, i64::MIN);
        let encoded = negative.encode_to_vec();
        assert_eq!(encoded.len(), 22);
        assert_eq!(Operands::decode(encoded.as_slice()).unwrap(), negative);
    }
}
