//! The expense record returned by the extraction model.
//!
//! The model is asked for strict JSON but nothing enforces the schema, so
//! every field is optional and decoded leniently: a field with the wrong JSON
//! type is coerced when there is a faithful reading of it and dropped
//! otherwise. Only a response that is not a JSON object at all is rejected.

use crate::error::ExtractionFailure;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One expense as read from a receipt. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    /// Purchase date, `DD/MM/YYYY` when the model follows instructions.
    pub fecha: Option<String>,
    /// Total amount.
    pub monto: Option<f64>,
    /// Currency code, expected `ARS` or `USD`.
    pub moneda: Option<String>,
    /// Short description of the item or merchant.
    pub descripcion: Option<String>,
    /// Suggested category name.
    pub categoria: Option<String>,
    /// Payment instrument label (Visa, Mastercard, MercadoPago, …).
    pub metodo_pago: Option<String>,
}

impl ExpenseRecord {
    /// Build a record from an already-parsed JSON document.
    ///
    /// # Errors
    /// [`ExtractionFailure::NotAnObject`] when `value` is not a JSON object.
    pub fn from_json_value(value: &Value) -> Result<Self, ExtractionFailure> {
        let obj = value.as_object().ok_or_else(|| ExtractionFailure::NotAnObject {
            found: json_kind(value).to_string(),
        })?;

        Ok(Self {
            fecha: text_field(obj, "fecha"),
            monto: obj.get("monto").and_then(coerce_amount),
            moneda: text_field(obj, "moneda"),
            descripcion: text_field(obj, "descripcion"),
            categoria: text_field(obj, "categoria"),
            metodo_pago: text_field(obj, "metodo_pago"),
        })
    }

    /// True when the model recognised nothing at all.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

static RE_NOT_AMOUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9.,\-]").unwrap());

/// Read an amount from a JSON number or a formatted string.
///
/// Strings may use either `1.234,56` (es-AR) or `1,234.56` grouping; the
/// rightmost separator is the decimal point when both appear. A lone
/// separator followed by exactly three digits is a thousands separator
/// unless the integer part is zero.
pub fn coerce_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = RE_NOT_AMOUNT.replace_all(raw, "");
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let normalised = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let (decimal, grouping) = if d > c { ('.', ',') } else { (',', '.') };
            cleaned.replace(grouping, "").replace(decimal, ".")
        }
        (Some(_), None) => single_separator(&cleaned, '.'),
        (None, Some(_)) => single_separator(&cleaned, ','),
        (None, None) => cleaned.to_string(),
    };

    normalised.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn single_separator(s: &str, sep: char) -> String {
    let parts: Vec<&str> = s.split(sep).collect();
    // "0.500" is half a unit; only a non-zero integer part can be grouped.
    let integer_is_zero = parts[0].trim_start_matches(['-', '+']).trim_start_matches('0').is_empty();
    let grouped = parts.len() > 2
        || (!integer_is_zero && parts.last().is_some_and(|tail| tail.len() == 3));
    if grouped {
        parts.concat()
    } else {
        s.replace(sep, ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_object() {
        let v = json!({
            "fecha": "12/03/2024",
            "monto": 1530.5,
            "moneda": "ARS",
            "descripcion": "Almuerzo",
            "categoria": "Comida",
            "metodo_pago": "Visa"
        });
        let r = ExpenseRecord::from_json_value(&v).unwrap();
        assert_eq!(r.fecha.as_deref(), Some("12/03/2024"));
        assert_eq!(r.monto, Some(1530.5));
        assert_eq!(r.metodo_pago.as_deref(), Some("Visa"));
    }

    #[test]
    fn nulls_and_missing_fields_are_absent() {
        let v = json!({ "fecha": null, "monto": null, "descripcion": "  " });
        let r = ExpenseRecord::from_json_value(&v).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn wrong_types_degrade() {
        let v = json!({ "fecha": ["12", "03"], "monto": { "total": 3 }, "categoria": 7 });
        let r = ExpenseRecord::from_json_value(&v).unwrap();
        assert_eq!(r.fecha, None);
        assert_eq!(r.monto, None);
        assert_eq!(r.categoria.as_deref(), Some("7"));
    }

    #[test]
    fn array_is_rejected() {
        let err = ExpenseRecord::from_json_value(&json!([1, 2])).unwrap_err();
        assert_eq!(
            err,
            ExtractionFailure::NotAnObject {
                found: "array".into()
            }
        );
    }

    #[test]
    fn amount_strings() {
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("$ 980"), Some(980.0));
        assert_eq!(parse_amount("12,5"), Some(12.5));
        assert_eq!(parse_amount("12.500"), Some(12500.0));
        assert_eq!(parse_amount("1.000.000"), Some(1_000_000.0));
        assert_eq!(parse_amount("45.90"), Some(45.9));
        assert_eq!(parse_amount("USD"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn fractional_amounts_below_one_keep_their_decimals() {
        assert_eq!(parse_amount("0.500"), Some(0.5));
        assert_eq!(parse_amount("0,750"), Some(0.75));
        assert_eq!(parse_amount("$ 0.250"), Some(0.25));
        assert_eq!(parse_amount("1.500"), Some(1500.0));
        assert_eq!(parse_amount("1.234,50"), Some(1234.5));
        assert_eq!(parse_amount("0.000.500"), Some(500.0));
    }

    #[test]
    fn amount_number_and_other_types() {
        assert_eq!(coerce_amount(&json!(0)), Some(0.0));
        assert_eq!(coerce_amount(&json!("  2500 ")), Some(2500.0));
        assert_eq!(coerce_amount(&json!(true)), None);
    }
}
