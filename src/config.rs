//! Configuration types for receipt scanning.
//!
//! All scanning behaviour is controlled through [`ScanConfig`], built via its
//! [`ScanConfigBuilder`] or read from the process environment with
//! [`ScanConfig::from_env`]. The Gemini key is the only required value;
//! without a [`SheetConfig`] extraction still works but saving is disabled.

use crate::error::ScanError;
use crate::form::SheetColumn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier used when listing fails or returns nothing usable.
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-2.0-flash";

/// Preference list used when none is configured, highest rank first.
pub const DEFAULT_MODEL_PREFERENCES: &str =
    "gemini-2.0-flash!lite,gemini-1.5-flash!8b,gemini-1.5-pro,gemini-pro";

/// Configuration for a scanning session.
///
/// # Example
/// ```rust
/// use gastoscan::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .api_key("test-key")
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// assert!(config.sheet.is_none());
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// Gemini API key. Required.
    pub api_key: String,

    /// Fixed model identifier. When set, model listing and preference
    /// resolution are skipped.
    pub model: Option<String>,

    /// Ordered preferences for the model resolver, highest rank first.
    pub model_preferences: Vec<ModelPreference>,

    /// Identifier used when listing fails or is empty. Default: `gemini-2.0-flash`.
    pub fallback_model: String,

    /// Resolve the model before every extraction instead of once per session.
    /// Default: false.
    pub resolve_per_call: bool,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction wants the same answer for the same receipt; anything higher
    /// makes the model embellish descriptions and guess categories.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 1024.
    pub max_tokens: usize,

    /// Custom extraction instruction. If None, uses
    /// [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Longest edge, in pixels, of a rasterised PDF page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Download timeout for URL receipts in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Spreadsheet target. `None` disables saving.
    pub sheet: Option<SheetConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: None,
            model_preferences: default_preferences(),
            fallback_model: DEFAULT_FALLBACK_MODEL.to_string(),
            resolve_per_call: false,
            temperature: 0.1,
            max_tokens: 1024,
            prompt: None,
            max_rendered_pixels: 2000,
            download_timeout_secs: 120,
            sheet: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("model_preferences", &self.model_preferences)
            .field("fallback_model", &self.fallback_model)
            .field("resolve_per_call", &self.resolve_per_call)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("sheet", &self.sheet)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

fn default_preferences() -> Vec<ModelPreference> {
    ModelPreference::parse_list(DEFAULT_MODEL_PREFERENCES).unwrap_or_default()
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// Read the configuration from environment variables.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `GEMINI_API_KEY` | Required Gemini credential |
    /// | `GASTOSCAN_MODEL` | Fixed model, skips resolution |
    /// | `GASTOSCAN_MODEL_PREFERENCES` | `frag[!excl…],…` preference list |
    /// | `GASTOSCAN_FALLBACK_MODEL` | Fallback identifier |
    /// | `GCP_SERVICE_ACCOUNT_JSON` | Service-account key; enables saving |
    /// | `GASTOSCAN_SPREADSHEET` | Spreadsheet name (default `GastoScanner`) |
    /// | `GASTOSCAN_SPREADSHEET_ID` | Spreadsheet id, skips the name lookup |
    /// | `GASTOSCAN_WORKSHEET` | Worksheet name (default `Gastos`) |
    /// | `GASTOSCAN_COLUMNS` | Column layout, e.g. `fecha,monto,moneda` |
    ///
    /// # Errors
    /// [`ScanError::MissingApiKey`] when `GEMINI_API_KEY` is unset, and
    /// [`ScanError::InvalidConfig`] for unparsable values.
    pub fn from_env() -> Result<Self, ScanError> {
        let mut builder = Self::builder().api_key(env_nonempty("GEMINI_API_KEY").unwrap_or_default());

        if let Some(model) = env_nonempty("GASTOSCAN_MODEL") {
            builder = builder.model(model);
        }
        if let Some(prefs) = env_nonempty("GASTOSCAN_MODEL_PREFERENCES") {
            let prefs = ModelPreference::parse_list(&prefs).map_err(ScanError::InvalidConfig)?;
            builder = builder.model_preferences(prefs);
        }
        if let Some(fallback) = env_nonempty("GASTOSCAN_FALLBACK_MODEL") {
            builder = builder.fallback_model(fallback);
        }

        if let Some(credentials) = env_nonempty("GCP_SERVICE_ACCOUNT_JSON") {
            let mut sheet = SheetConfig::new(credentials);
            if let Some(name) = env_nonempty("GASTOSCAN_SPREADSHEET") {
                sheet.spreadsheet_name = name;
            }
            sheet.spreadsheet_id = env_nonempty("GASTOSCAN_SPREADSHEET_ID");
            if let Some(ws) = env_nonempty("GASTOSCAN_WORKSHEET") {
                sheet.worksheet = ws;
            }
            if let Some(cols) = env_nonempty("GASTOSCAN_COLUMNS") {
                sheet.columns = SheetColumn::parse_layout(&cols).map_err(ScanError::InvalidConfig)?;
            }
            builder = builder.sheet(sheet);
        }

        builder.build()
    }

    /// True when a spreadsheet target is configured.
    pub fn can_save(&self) -> bool {
        self.sheet.is_some()
    }
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn model_preferences(mut self, prefs: Vec<ModelPreference>) -> Self {
        self.config.model_preferences = prefs;
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = model.into();
        self
    }

    pub fn resolve_per_call(mut self, v: bool) -> Self {
        self.config.resolve_per_call = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(64);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn sheet(mut self, sheet: SheetConfig) -> Self {
        self.config.sheet = Some(sheet);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, ScanError> {
        let c = &self.config;
        if c.api_key.trim().is_empty() {
            return Err(ScanError::MissingApiKey);
        }
        if c.fallback_model.trim().is_empty() {
            return Err(ScanError::InvalidConfig(
                "fallback model must not be empty".into(),
            ));
        }
        if let Some(ref sheet) = c.sheet {
            if sheet.columns.is_empty() {
                return Err(ScanError::InvalidConfig(
                    "spreadsheet column layout must not be empty".into(),
                ));
            }
            if sheet.worksheet.trim().is_empty() {
                return Err(ScanError::InvalidConfig(
                    "worksheet name must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Model preferences ────────────────────────────────────────────────────

/// One entry of the resolver's preference list.
///
/// Matches identifiers that contain `fragment` (case-sensitive) and none of
/// the `excluded` sub-tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPreference {
    pub fragment: String,
    pub excluded: Vec<String>,
}

impl ModelPreference {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            excluded: Vec::new(),
        }
    }

    pub fn excluding(mut self, token: impl Into<String>) -> Self {
        self.excluded.push(token.into());
        self
    }

    pub fn matches(&self, model_id: &str) -> bool {
        model_id.contains(&self.fragment) && !self.excluded.iter().any(|t| model_id.contains(t.as_str()))
    }

    /// Parse `frag[!excl…],frag…` into an ordered list.
    pub fn parse_list(s: &str) -> Result<Vec<ModelPreference>, String> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for ModelPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('!').map(str::trim);
        let fragment = parts.next().unwrap_or_default();
        if fragment.is_empty() {
            return Err(format!("model preference '{s}' has an empty name fragment"));
        }
        Ok(Self {
            fragment: fragment.to_string(),
            excluded: parts.filter(|t| !t.is_empty()).map(String::from).collect(),
        })
    }
}

impl fmt::Display for ModelPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fragment)?;
        for t in &self.excluded {
            write!(f, "!{t}")?;
        }
        Ok(())
    }
}

// ── Spreadsheet target ───────────────────────────────────────────────────

/// Where and how rows are appended.
#[derive(Clone)]
pub struct SheetConfig {
    /// Service-account key JSON.
    pub credentials_json: String,
    /// Spreadsheet title, looked up through Drive. Default: `GastoScanner`.
    pub spreadsheet_name: String,
    /// Spreadsheet id; when set the name lookup is skipped.
    pub spreadsheet_id: Option<String>,
    /// Worksheet (tab) name. Default: `Gastos`.
    pub worksheet: String,
    /// Column order of the target sheet.
    pub columns: Vec<SheetColumn>,
}

impl SheetConfig {
    pub fn new(credentials_json: impl Into<String>) -> Self {
        Self {
            credentials_json: credentials_json.into(),
            spreadsheet_name: "GastoScanner".to_string(),
            spreadsheet_id: None,
            worksheet: "Gastos".to_string(),
            columns: SheetColumn::DEFAULT_LAYOUT.to_vec(),
        }
    }
}

impl fmt::Debug for SheetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetConfig")
            .field("credentials_json", &redact(&self.credentials_json))
            .field("spreadsheet_name", &self.spreadsheet_name)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("worksheet", &self.worksheet)
            .field("columns", &self.columns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_fatal() {
        let err = ScanConfig::builder().build().unwrap_err();
        assert!(matches!(err, ScanError::MissingApiKey));
        let err = ScanConfig::builder().api_key("   ").build().unwrap_err();
        assert!(matches!(err, ScanError::MissingApiKey));
    }

    #[test]
    fn defaults() {
        let c = ScanConfig::builder().api_key("k").build().unwrap();
        assert_eq!(c.fallback_model, "gemini-2.0-flash");
        assert_eq!(c.model_preferences.len(), 4);
        assert_eq!(c.model_preferences[0].excluded, vec!["lite".to_string()]);
        assert!(!c.resolve_per_call);
        assert!(!c.can_save());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = ScanConfig::builder()
            .api_key("super-secret")
            .sheet(SheetConfig::new("{\"private_key\":\"xyz\"}"))
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(!dbg.contains("xyz"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn builder_clamps() {
        let c = ScanConfig::builder()
            .api_key("k")
            .temperature(9.0)
            .max_rendered_pixels(3)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.max_rendered_pixels, 100);
    }

    #[test]
    fn empty_layout_rejected() {
        let mut sheet = SheetConfig::new("{}");
        sheet.columns.clear();
        let err = ScanConfig::builder().api_key("k").sheet(sheet).build().unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn preference_parsing() {
        let prefs = ModelPreference::parse_list("gemini-2.0-flash!lite!exp, gemini-pro ,").unwrap();
        assert_eq!(
            prefs,
            vec![
                ModelPreference::new("gemini-2.0-flash").excluding("lite").excluding("exp"),
                ModelPreference::new("gemini-pro"),
            ]
        );
        assert_eq!(prefs[0].to_string(), "gemini-2.0-flash!lite!exp");
        assert!(ModelPreference::parse_list("!lite").is_err());
    }

    #[test]
    fn preference_matching_is_case_sensitive_with_exclusions() {
        let p = ModelPreference::new("gemini-2.0-flash").excluding("lite");
        assert!(p.matches("gemini-2.0-flash"));
        assert!(p.matches("gemini-2.0-flash-001"));
        assert!(!p.matches("gemini-2.0-flash-lite"));
        assert!(!p.matches("Gemini-2.0-Flash"));
    }
}
