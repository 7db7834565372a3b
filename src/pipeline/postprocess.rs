//! Post-processing: turn the model's free-form answer into an
//! [`ExpenseRecord`].
//!
//! Even when told to answer with bare JSON, models often wrap the object in
//! a ```` ```json ```` fence, prepend a sentence, or leak a BOM. These
//! rules run in order before a strict JSON parse:
//!
//! 1. Strip invisible Unicode (BOM, zero-width spaces)
//! 2. Unwrap a fenced block (```` ```json … ``` ```` or bare ```` ``` ````)
//! 3. Trim surrounding whitespace
//!
//! Nothing else is repaired: if what remains is not JSON the extraction
//! fails softly and the user retries.

use crate::error::ExtractionFailure;
use crate::record::ExpenseRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Longest slice of a bad response quoted back in an error.
const EXCERPT_CHARS: usize = 120;

/// Clean `raw` and parse it as an expense record.
pub fn parse_response(model: &str, raw: &str) -> Result<ExpenseRecord, ExtractionFailure> {
    let text = strip_code_fences(&remove_invisible_chars(raw));
    if text.is_empty() {
        return Err(ExtractionFailure::EmptyResponse {
            model: model.to_string(),
        });
    }

    let value: Value = serde_json::from_str(&text).map_err(|e| ExtractionFailure::MalformedJson {
        detail: e.to_string(),
        excerpt: excerpt(&text),
    })?;

    ExpenseRecord::from_json_value(&value)
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}'))
        .collect()
}

// ── Rule 2 + 3: Unwrap fences, trim ──────────────────────────────────────

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Remove code-fence markers around the payload.
///
/// A complete fenced block anywhere in the text wins, so a sentence before
/// or after the fence is dropped too. A lone opening or closing marker is
/// stripped from the respective end.
pub fn strip_code_fences(input: &str) -> String {
    if let Some(caps) = RE_FENCED_BLOCK.captures(input) {
        return caps[1].trim().to_string();
    }

    let mut s = input.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim().to_string()
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"fecha": "05/06/2024", "monto": 4200.0, "moneda": "ARS", "descripcion": "Nafta", "categoria": "Transporte", "metodo_pago": "Mastercard"}"#;

    #[test]
    fn fenced_and_plain_parse_identically() {
        let plain = parse_response("m", BODY).unwrap();
        let fenced = parse_response("m", &format!("```json\n{BODY}\n```")).unwrap();
        let bare_fence = parse_response("m", &format!("```\n{BODY}\n```\n")).unwrap();
        assert_eq!(plain, fenced);
        assert_eq!(plain, bare_fence);
        assert_eq!(plain.categoria.as_deref(), Some("Transporte"));
    }

    #[test]
    fn single_line_fence() {
        let r = parse_response("m", &format!("```json {BODY}```")).unwrap();
        assert_eq!(r.monto, Some(4200.0));
    }

    #[test]
    fn prose_around_fence_is_dropped() {
        let text = format!("Aquí está el resultado:\n```json\n{BODY}\n```\nSaludos");
        assert_eq!(parse_response("m", &text).unwrap().fecha.as_deref(), Some("05/06/2024"));
    }

    #[test]
    fn unterminated_fence() {
        let r = parse_response("m", &format!("```json\n{BODY}")).unwrap();
        assert_eq!(r.descripcion.as_deref(), Some("Nafta"));
    }

    #[test]
    fn bom_is_ignored() {
        assert!(parse_response("m", &format!("\u{FEFF}{BODY}")).is_ok());
    }

    #[test]
    fn non_json_is_soft_failure() {
        let err = parse_response("m", "No puedo leer este comprobante.").unwrap_err();
        match err {
            ExtractionFailure::MalformedJson { excerpt, .. } => {
                assert!(excerpt.starts_with("No puedo"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_after_stripping() {
        let err = parse_response("gemini-2.0-flash", "```json\n```").unwrap_err();
        assert_eq!(
            err,
            ExtractionFailure::EmptyResponse {
                model: "gemini-2.0-flash".into()
            }
        );
    }

    #[test]
    fn long_excerpt_is_truncated() {
        let junk = "x".repeat(500);
        assert_eq!(excerpt(&junk).chars().count(), EXCERPT_CHARS + 1);
    }
}
