//! Wire values and signature checking
//!
//! Arguments cross the broker boundary as `serde_json::Value`s. Every
//! method declares its parameter shape as a [`WireType`] sequence; the
//! dispatcher checks the incoming arguments against it before the
//! handler runs, so handlers never see a malformed call.

use serde_json::Value;

use coffer_core::{CofferError, CofferResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Str,
    Bool,
    Uint,
}

impl WireType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            WireType::Str => value.is_string(),
            WireType::Bool => value.is_boolean(),
            WireType::Uint => value.is_u64(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            WireType::Str => "string",
            WireType::Bool => "bool",
            WireType::Uint => "uint",
        }
    }
}

/// Reject calls whose arguments do not match the declared signature.
pub fn check_args(member: &str, expected: &[WireType], args: &[Value]) -> CofferResult<()> {
    if args.len() != expected.len() {
        return Err(CofferError::Validation(format!(
            "{member}: expected {} arguments, got {}",
            expected.len(),
            args.len()
        )));
    }
    for (idx, (ty, value)) in expected.iter().zip(args).enumerate() {
        if !ty.accepts(value) {
            return Err(CofferError::Validation(format!(
                "{member}: argument {idx} must be a {}",
                ty.name()
            )));
        }
    }
    Ok(())
}

/// Typed accessors for validated argument lists. These only fail if a
/// handler is wired to the wrong signature, which the dispatch-table
/// tests catch.
pub fn str_arg(args: &[Value], idx: usize) -> CofferResult<&str> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| CofferError::Validation(format!("argument {idx} must be a string")))
}

pub fn bool_arg(args: &[Value], idx: usize) -> CofferResult<bool> {
    args.get(idx)
        .and_then(Value::as_bool)
        .ok_or_else(|| CofferError::Validation(format!("argument {idx} must be a bool")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_args_accepts_matching_shape() {
        let expected = [WireType::Str, WireType::Bool];
        let args = [json!("key"), json!(true)];
        assert!(check_args("SetAttribute", &expected, &args).is_ok());
    }

    #[test]
    fn test_check_args_rejects_wrong_arity() {
        let result = check_args("GetSecret", &[], &[json!("extra")]);
        assert!(matches!(result, Err(CofferError::Validation(_))));
    }

    #[test]
    fn test_check_args_rejects_wrong_type() {
        let result = check_args("Search", &[WireType::Str], &[json!(42)]);
        assert!(matches!(result, Err(CofferError::Validation(_))));
    }

    #[test]
    fn test_uint_rejects_negative() {
        let result = check_args("Take", &[WireType::Uint], &[json!(-1)]);
        assert!(matches!(result, Err(CofferError::Validation(_))));
    }
}
