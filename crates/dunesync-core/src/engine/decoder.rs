//! Row decoder - turns loosely-typed result rows into [`GasRow`]s

use bigdecimal::BigDecimal;
use dunesync_types::{GasRow, RawRow};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Why a row could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowDecodeError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Decode one row; `address` must be a non-empty string and
/// `total_gas_used` a number or a numeric string
pub fn decode_row(row: &RawRow) -> Result<GasRow, RowDecodeError> {
    let address = match row.get("address") {
        None | Some(Value::Null) => return Err(RowDecodeError::MissingField("address")),
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(other) => {
            return Err(RowDecodeError::InvalidField {
                field: "address",
                reason: format!("expected non-empty string, got {}", other),
            })
        }
    };

    let total_gas_used = match row.get("total_gas_used") {
        None | Some(Value::Null) => return Err(RowDecodeError::MissingField("total_gas_used")),
        Some(Value::Number(n)) => parse_decimal(&n.to_string())?,
        Some(Value::String(s)) => parse_decimal(s.trim())?,
        Some(other) => {
            return Err(RowDecodeError::InvalidField {
                field: "total_gas_used",
                reason: format!("expected number, got {}", other),
            })
        }
    };

    Ok(GasRow {
        address,
        total_gas_used,
    })
}

fn parse_decimal(text: &str) -> Result<BigDecimal, RowDecodeError> {
    BigDecimal::from_str(text).map_err(|e| RowDecodeError::InvalidField {
        field: "total_gas_used",
        reason: format!("{:?} is not a number ({})", text, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    fn decimal(text: &str) -> BigDecimal {
        BigDecimal::from_str(text).unwrap()
    }

    #[test]
    fn test_decode_numeric_forms() {
        let row = decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": 21000 }))).unwrap();
        assert_eq!(row.address, "0xabc");
        assert_eq!(row.total_gas_used, decimal("21000"));

        let row = decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": 21000.5 }))).unwrap();
        assert_eq!(row.total_gas_used, decimal("21000.5"));

        let row = decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": " 123456789012345678901234567890 " })))
            .unwrap();
        assert_eq!(row.total_gas_used, decimal("123456789012345678901234567890"));

        let row = decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": 1.5e21 }))).unwrap();
        assert_eq!(row.total_gas_used, decimal("1500000000000000000000"));
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let row = decode_row(&raw(json!({
            "address": "0xabc",
            "total_gas_used": 1,
            "tx_count": 3
        })))
        .unwrap();
        assert_eq!(row.total_gas_used, decimal("1"));
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            decode_row(&raw(json!({ "total_gas_used": 1 }))),
            Err(RowDecodeError::MissingField("address"))
        );
        assert_eq!(
            decode_row(&raw(json!({ "address": "0xabc" }))),
            Err(RowDecodeError::MissingField("total_gas_used"))
        );
        assert_eq!(
            decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": null }))),
            Err(RowDecodeError::MissingField("total_gas_used"))
        );
    }

    #[test]
    fn test_invalid_fields() {
        assert!(matches!(
            decode_row(&raw(json!({ "address": 42, "total_gas_used": 1 }))),
            Err(RowDecodeError::InvalidField { field: "address", .. })
        ));
        assert!(matches!(
            decode_row(&raw(json!({ "address": "  ", "total_gas_used": 1 }))),
            Err(RowDecodeError::InvalidField { field: "address", .. })
        ));
        assert!(matches!(
            decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": "lots" }))),
            Err(RowDecodeError::InvalidField { field: "total_gas_used", .. })
        ));
        assert!(matches!(
            decode_row(&raw(json!({ "address": "0xabc", "total_gas_used": [1] }))),
            Err(RowDecodeError::InvalidField { field: "total_gas_used", .. })
        ));
    }
}
