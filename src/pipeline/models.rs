//! Model listing and resolution.
//!
//! [`resolve_model`] is a pure priority selection: walk the preference list
//! in rank order and return the first listed model that satisfies the
//! current preference. Listing goes through the [`ModelCatalog`] trait so
//! the selection never depends on the network.

use crate::config::ModelPreference;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Capability a model must advertise to be considered.
pub const GENERATE_CONTENT: &str = "generateContent";

const GEMINI_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// A model the credential can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Identifier without the `models/` prefix.
    pub id: String,
    /// Methods the model supports, e.g. `generateContent`, `embedContent`.
    pub supported_methods: Vec<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, methods: &[&str]) -> Self {
        Self {
            id: normalise_model_id(&id.into()),
            supported_methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn can_generate(&self) -> bool {
        self.supported_methods.iter().any(|m| m == GENERATE_CONTENT)
    }
}

/// Strip the `models/` resource prefix returned by the listing API.
pub fn normalise_model_id(raw: &str) -> String {
    raw.trim().trim_start_matches("models/").to_string()
}

/// Source of the model list.
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Every model visible to the credential, in listing order.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, String>;
}

/// Outcome of a resolution, kept for logging and display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched the preference at this rank (0 = most preferred).
    Preferred { model: String, rank: usize },
    /// Nothing matched; first listed generation model.
    FirstAvailable { model: String },
    /// Listing failed or had no generation models.
    Fallback { model: String, reason: String },
    /// A fixed model was configured; no listing happened.
    Fixed { model: String },
}

impl Resolution {
    pub fn model(&self) -> &str {
        match self {
            Resolution::Preferred { model, .. }
            | Resolution::FirstAvailable { model }
            | Resolution::Fallback { model, .. }
            | Resolution::Fixed { model } => model,
        }
    }
}

/// Choose a model from an available list.
///
/// Only models advertising `generateContent` take part. Returns the first
/// listed model matching the highest-ranked preference that matches
/// anything; else the first listed model; else `fallback`.
pub fn resolve_model(
    available: &[ModelInfo],
    preferences: &[ModelPreference],
    fallback: &str,
) -> Resolution {
    let candidates: Vec<&str> = available
        .iter()
        .filter(|m| m.can_generate())
        .map(|m| m.id.as_str())
        .collect();

    if candidates.is_empty() {
        return Resolution::Fallback {
            model: fallback.to_string(),
            reason: "no model supports generateContent".into(),
        };
    }

    for (rank, pref) in preferences.iter().enumerate() {
        if let Some(id) = candidates.iter().find(|id| pref.matches(id)) {
            return Resolution::Preferred {
                model: id.to_string(),
                rank,
            };
        }
    }

    Resolution::FirstAvailable {
        model: candidates[0].to_string(),
    }
}

/// List through `catalog`, then [`resolve_model`]. Never fails.
pub async fn resolve_with_catalog(
    catalog: &dyn ModelCatalog,
    preferences: &[ModelPreference],
    fallback: &str,
) -> Resolution {
    let resolution = match catalog.list_models().await {
        Ok(models) => {
            debug!("Model listing returned {} models", models.len());
            resolve_model(&models, preferences, fallback)
        }
        Err(e) => {
            warn!("Model listing failed, using fallback '{}': {}", fallback, e);
            Resolution::Fallback {
                model: fallback.to_string(),
                reason: e,
            }
        }
    };
    info!(model = %resolution.model(), "Resolved model: {:?}", resolution);
    resolution
}

// ── Gemini listing over REST ─────────────────────────────────────────────

/// Lists models from the Gemini `v1beta/models` endpoint.
#[derive(Clone)]
pub struct GeminiModelCatalog {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiModelCatalog {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_MODELS_URL.to_string(),
        }
    }

    /// Point at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<RawModel>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl From<RawModel> for ModelInfo {
    fn from(raw: RawModel) -> Self {
        Self {
            id: normalise_model_id(&raw.name),
            supported_methods: raw.supported_generation_methods,
        }
    }
}

#[async_trait]
impl ModelCatalog for GeminiModelCatalog {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, String> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = {
                let mut query: Vec<(&str, &str)> = vec![("pageSize", "1000")];
                if let Some(ref token) = page_token {
                    query.push(("pageToken", token.as_str()));
                }
                self.client
                    .get(&self.base_url)
                    .header(API_KEY_HEADER, &self.api_key)
                    .query(&query)
            };

            // Errors are reported without the request URL.
            let response = request
                .send()
                .await
                .map_err(|e| format!("request failed: {}", e.without_url()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()));
            }

            let page: ListModelsResponse = response
                .json()
                .await
                .map_err(|e| format!("unexpected listing body: {}", e.without_url()))?;

            models.extend(page.models.into_iter().map(ModelInfo::from));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generative(id: &str) -> ModelInfo {
        ModelInfo::new(id, &[GENERATE_CONTENT, "countTokens"])
    }

    fn prefs() -> Vec<ModelPreference> {
        ModelPreference::parse_list("gemini-2.0-flash!lite,gemini-1.5-flash,gemini-pro").unwrap()
    }

    #[test]
    fn earliest_preference_wins_regardless_of_listing_order() {
        let available = vec![generative("gemini-pro"), generative("gemini-1.5-flash"), generative("gemini-2.0-flash")];
        let r = resolve_model(&available, &prefs(), "fb");
        assert_eq!(
            r,
            Resolution::Preferred {
                model: "gemini-2.0-flash".into(),
                rank: 0
            }
        );
    }

    #[test]
    fn excluded_token_skips_to_next_preference() {
        let available = vec![generative("gemini-2.0-flash-lite"), generative("gemini-1.5-flash-002")];
        let r = resolve_model(&available, &prefs(), "fb");
        assert_eq!(r.model(), "gemini-1.5-flash-002");
    }

    #[test]
    fn first_listed_match_within_a_preference() {
        let available = vec![generative("gemini-1.5-flash-001"), generative("gemini-1.5-flash-002")];
        assert_eq!(resolve_model(&available, &prefs(), "fb").model(), "gemini-1.5-flash-001");
    }

    #[test]
    fn no_match_returns_first_available() {
        let available = vec![generative("learnlm-1.5"), generative("gemma-3-27b")];
        let r = resolve_model(&available, &prefs(), "fb");
        assert_eq!(
            r,
            Resolution::FirstAvailable {
                model: "learnlm-1.5".into()
            }
        );
    }

    #[test]
    fn only_generation_models_count() {
        let available = vec![
            ModelInfo::new("models/gemini-2.0-flash-embed", &["embedContent"]),
            generative("models/gemma-3-27b"),
        ];
        assert_eq!(resolve_model(&available, &prefs(), "fb").model(), "gemma-3-27b");

        let embed_only = vec![ModelInfo::new("text-embedding-004", &["embedContent"])];
        assert!(matches!(
            resolve_model(&embed_only, &prefs(), "fb"),
            Resolution::Fallback { .. }
        ));
    }

    #[test]
    fn empty_listing_falls_back() {
        assert_eq!(resolve_model(&[], &prefs(), "gemini-2.0-flash").model(), "gemini-2.0-flash");
    }

    #[test]
    fn deterministic() {
        let available = vec![generative("gemini-1.5-pro"), generative("gemini-1.5-flash"), generative("other")];
        let first = resolve_model(&available, &prefs(), "fb");
        for _ in 0..10 {
            assert_eq!(resolve_model(&available, &prefs(), "fb"), first);
        }
    }

    #[test]
    fn prefix_is_stripped() {
        assert_eq!(normalise_model_id("models/gemini-pro"), "gemini-pro");
        assert_eq!(normalise_model_id("gemini-pro"), "gemini-pro");
    }

    #[test]
    fn listing_body_parses() {
        let body = r#"{
            "models": [
                {"name": "models/gemini-2.0-flash", "supportedGenerationMethods": ["generateContent"]},
                {"name": "models/embedding-001", "supportedGenerationMethods": ["embedContent"]}
            ],
            "nextPageToken": ""
        }"#;
        let parsed: ListModelsResponse = serde_json::from_str(body).unwrap();
        let models: Vec<ModelInfo> = parsed.models.into_iter().map(ModelInfo::from).collect();
        assert_eq!(models[0].id, "gemini-2.0-flash");
        assert!(models[0].can_generate());
        assert!(!models[1].can_generate());
    }

    #[tokio::test]
    async fn listing_follows_page_tokens_and_sends_key_as_header() {
        let stub = crate::testing::serve(vec![
            (
                200,
                r#"{"models":[{"name":"models/gemini-1.5-flash","supportedGenerationMethods":["generateContent"]}],"nextPageToken":"p2"}"#.into(),
            ),
            (
                200,
                r#"{"models":[{"name":"models/gemini-2.0-flash","supportedGenerationMethods":["generateContent"]}]}"#.into(),
            ),
        ])
        .await;
        let catalog = GeminiModelCatalog::new("AIzaSECRET123")
            .with_base_url(format!("{}/v1beta/models", stub.url));

        let models = catalog.list_models().await.unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["gemini-1.5-flash", "gemini-2.0-flash"]);

        let requests = stub.recorded();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].request_line().contains("pageToken"));
        assert!(requests[1].request_line().contains("pageToken=p2"), "{}", requests[1].request_line());
        for request in &requests {
            assert!(request.request_line().starts_with("GET /v1beta/models?"));
            assert!(!request.request_line().contains("AIzaSECRET123"));
            assert_eq!(request.header("x-goog-api-key"), Some("AIzaSECRET123"));
        }
    }

    #[tokio::test]
    async fn listing_rejects_non_success_status() {
        let denied = r#"{"error":{"message":"API key not valid"}}"#.to_string();
        let stub = crate::testing::serve(vec![(403, denied.clone()), (403, denied)]).await;
        let catalog = GeminiModelCatalog::new("AIzaSECRET123").with_base_url(stub.url.clone());

        let err = catalog.list_models().await.unwrap_err();
        assert!(err.starts_with("HTTP 403"), "got {err}");
        assert!(err.contains("API key not valid"));

        let r = resolve_with_catalog(&catalog, &prefs(), "gemini-2.0-flash").await;
        assert!(matches!(r, Resolution::Fallback { ref model, .. } if model == "gemini-2.0-flash"));
    }

    #[tokio::test]
    async fn connection_error_does_not_reveal_key() {
        let catalog = GeminiModelCatalog::new("AIzaSECRET123")
            .with_base_url("http://127.0.0.1:1/v1beta/models");

        let err = catalog.list_models().await.unwrap_err();
        assert!(err.starts_with("request failed"), "got {err}");
        assert!(!err.contains("AIzaSECRET123"), "key leaked: {err}");

        let r = resolve_with_catalog(&catalog, &prefs(), "gemini-2.0-flash").await;
        match r {
            Resolution::Fallback { reason, .. } => assert!(!reason.contains("AIzaSECRET123")),
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    struct FailingCatalog;

    #[async_trait]
    impl ModelCatalog for FailingCatalog {
        async fn list_models(&self) -> Result<Vec<ModelInfo>, String> {
            Err("HTTP 403".into())
        }
    }

    #[tokio::test]
    async fn listing_failure_falls_back() {
        let r = resolve_with_catalog(&FailingCatalog, &prefs(), "gemini-2.0-flash").await;
        assert_eq!(
            r,
            Resolution::Fallback {
                model: "gemini-2.0-flash".into(),
                reason: "HTTP 403".into()
            }
        );
    }
}
