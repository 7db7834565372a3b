//! Instruction text sent with every receipt image.
//!
//! Kept in one place so prompt changes never touch the call or parsing code,
//! and so tests can check the field names the parser relies on are all
//! requested. Callers can override it via
//! [`crate::config::ScanConfig::prompt`].

/// Default extraction instruction.
///
/// Field names and enum values must stay in sync with
/// [`crate::record::ExpenseRecord`] and [`crate::form`].
pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Analiza este comprobante de pago y extrae la siguiente información en formato JSON puro (sin markdown).
Si algún dato no aparece, usa null o intenta inferirlo por el contexto (ej: si es una hamburguesa, categoría: Comida).

Estructura requerida:
{
    "fecha": "DD/MM/YYYY",
    "monto": 0.00 (número decimal),
    "moneda": "ARS" o "USD",
    "descripcion": "Breve descripción del ítem/comercio",
    "categoria": "Sugerir una (Comida, Servicios, Supermercado, Transporte, Otros)",
    "metodo_pago": "Detectar si dice Visa, Mastercard, MercadoPago, etc."
}

Responde únicamente con el objeto JSON."#;
