//! Binding an [`ExpenseRecord`] to the editable form, and the form to a
//! spreadsheet row.
//!
//! The form is the only place defaults are applied: a record may be missing
//! any field, the form never is. Selector fields (`moneda`, `categoria`)
//! always resolve to a valid option, so their index is always in range.

use crate::record::ExpenseRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Currency selector options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    #[serde(rename = "ARS")]
    Ars,
    #[serde(rename = "USD")]
    Usd,
}

impl Currency {
    /// Options in selector order.
    pub const ALL: [Currency; 2] = [Currency::Ars, Currency::Usd];

    /// `USD` only for an exact `"USD"`; everything else, including a
    /// missing value, selects `ARS`.
    pub fn from_extracted(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("USD") => Currency::Usd,
            _ => Currency::Ars,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ars => "ARS",
            Currency::Usd => "USD",
        }
    }

    /// Position in [`Currency::ALL`].
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|c| c == self).unwrap_or(0)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ARS" => Ok(Currency::Ars),
            "USD" => Ok(Currency::Usd),
            other => Err(format!("unknown currency '{other}' (expected ARS or USD)")),
        }
    }
}

/// Category selector options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Category {
    Comida,
    Servicios,
    Supermercado,
    Transporte,
    #[default]
    Otros,
}

impl Category {
    /// Options in selector order.
    pub const ALL: [Category; 5] = [
        Category::Comida,
        Category::Servicios,
        Category::Supermercado,
        Category::Transporte,
        Category::Otros,
    ];

    /// Exact option name, or `Otros` for anything missing or unrecognised.
    pub fn from_extracted(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .and_then(|name| Self::ALL.into_iter().find(|c| c.as_str() == name))
            .unwrap_or(Category::Otros)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Comida => "Comida",
            Category::Servicios => "Servicios",
            Category::Supermercado => "Supermercado",
            Category::Transporte => "Transporte",
            Category::Otros => "Otros",
        }
    }

    /// Position in [`Category::ALL`].
    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|c| c == self).unwrap_or(Self::ALL.len() - 1)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "unknown category '{wanted}' (expected one of: {})",
                    Self::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}

/// The editable form, fully populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseForm {
    pub fecha: String,
    pub monto: f64,
    pub moneda: Currency,
    pub descripcion: String,
    pub categoria: Category,
    pub metodo_pago: String,
}

impl Default for ExpenseForm {
    fn default() -> Self {
        Self::from_record(&ExpenseRecord::default())
    }
}

impl ExpenseForm {
    /// Bind a record to the form, resolving every missing value.
    pub fn from_record(record: &ExpenseRecord) -> Self {
        Self {
            fecha: record.fecha.clone().unwrap_or_default(),
            monto: record.monto.filter(|m| m.is_finite()).unwrap_or(0.0),
            moneda: Currency::from_extracted(record.moneda.as_deref()),
            descripcion: record.descripcion.clone().unwrap_or_default(),
            categoria: Category::from_extracted(record.categoria.as_deref()),
            metodo_pago: record.metodo_pago.clone().unwrap_or_default(),
        }
    }

    /// Cell values in the given column order.
    pub fn to_row(&self, columns: &[SheetColumn]) -> Vec<Value> {
        columns.iter().map(|col| self.cell(*col)).collect()
    }

    fn cell(&self, column: SheetColumn) -> Value {
        match column {
            SheetColumn::Fecha => Value::from(self.fecha.clone()),
            SheetColumn::Monto => serde_json::Number::from_f64(self.monto)
                .map(Value::Number)
                .unwrap_or_else(|| Value::from(0)),
            SheetColumn::Moneda => Value::from(self.moneda.as_str()),
            SheetColumn::Descripcion => Value::from(self.descripcion.clone()),
            SheetColumn::Categoria => Value::from(self.categoria.as_str()),
            SheetColumn::MetodoPago => Value::from(self.metodo_pago.clone()),
        }
    }
}

/// A spreadsheet column, one per form field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SheetColumn {
    Fecha,
    Monto,
    Moneda,
    Descripcion,
    Categoria,
    MetodoPago,
}

impl SheetColumn {
    /// Fecha, Monto, Moneda, Descripcion, Categoria. No payment method column.
    pub const DEFAULT_LAYOUT: [SheetColumn; 5] = [
        SheetColumn::Fecha,
        SheetColumn::Monto,
        SheetColumn::Moneda,
        SheetColumn::Descripcion,
        SheetColumn::Categoria,
    ];

    /// Parse a comma-separated layout such as `fecha,monto,metodo_pago`.
    pub fn parse_layout(s: &str) -> Result<Vec<SheetColumn>, String> {
        let columns = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<SheetColumn>, String>>()?;
        if columns.is_empty() {
            return Err("column layout is empty".into());
        }
        Ok(columns)
    }

    pub fn header(&self) -> &'static str {
        match self {
            SheetColumn::Fecha => "Fecha",
            SheetColumn::Monto => "Monto",
            SheetColumn::Moneda => "Moneda",
            SheetColumn::Descripcion => "Descripcion",
            SheetColumn::Categoria => "Categoria",
            SheetColumn::MetodoPago => "Metodo de pago",
        }
    }
}

impl FromStr for SheetColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fecha" => Ok(SheetColumn::Fecha),
            "monto" => Ok(SheetColumn::Monto),
            "moneda" => Ok(SheetColumn::Moneda),
            "descripcion" => Ok(SheetColumn::Descripcion),
            "categoria" => Ok(SheetColumn::Categoria),
            "metodo_pago" | "metodo" => Ok(SheetColumn::MetodoPago),
            other => Err(format!("unknown column '{other}'")),
        }
    }
}
