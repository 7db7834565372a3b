//! Extraction call: send the instruction and the receipt image to the
//! resolved model and parse what comes back.
//!
//! The call itself sits behind [`GenerationService`] so the invoker can be
//! driven without a network. The production implementation,
//! [`ProviderGeneration`], goes through `edgequake-llm`'s Gemini provider
//! with the configured API key.
//!
//! There is exactly one attempt per extraction. A failed call or an
//! unparsable answer becomes an [`ExtractionFailure`]; the user decides
//! whether to try again.

use crate::error::ExtractionFailure;
use crate::pipeline::encode::Receipt;
use crate::pipeline::postprocess::parse_response;
use crate::record::ExpenseRecord;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, GeminiProvider, ImageData, LLMProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A hosted model that answers one instruction about one image.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Return the model's raw text answer.
    async fn generate(&self, model: &str, prompt: &str, image: ImageData) -> Result<String, String>;
}

/// [`GenerationService`] backed by an `edgequake-llm` provider.
///
/// Providers are created per model on first use and reused for the rest of
/// the session.
pub struct ProviderGeneration {
    api_key: String,
    temperature: f32,
    max_tokens: usize,
    fixed: Option<Arc<dyn LLMProvider>>,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl ProviderGeneration {
    pub fn new(api_key: impl Into<String>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            api_key: api_key.into(),
            temperature,
            max_tokens,
            fixed: None,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Use a pre-built provider for every call, whatever model is resolved.
    pub fn with_provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.fixed = Some(provider);
        self
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn LLMProvider>, String> {
        if let Some(ref p) = self.fixed {
            return Ok(Arc::clone(p));
        }

        let mut cache = self
            .providers
            .lock()
            .map_err(|_| "provider cache poisoned".to_string())?;
        if let Some(p) = cache.get(model) {
            return Ok(Arc::clone(p));
        }

        let provider: Arc<dyn LLMProvider> =
            Arc::new(GeminiProvider::new(self.api_key.clone()).with_model(model));
        cache.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl GenerationService for ProviderGeneration {
    async fn generate(&self, model: &str, prompt: &str, image: ImageData) -> Result<String, String> {
        let provider = self.provider_for(model)?;
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];
        let options = self.options();

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| e.to_string())?;

        debug!(
            "{} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Run one extraction against `model`.
pub async fn extract_record(
    service: &dyn GenerationService,
    model: &str,
    prompt: &str,
    receipt: &Receipt,
) -> Result<ExpenseRecord, ExtractionFailure> {
    let start = Instant::now();
    let image = receipt.to_image_data();

    let text = service.generate(model, prompt, image).await.map_err(|detail| {
        warn!(model, "Generation failed: {}", detail);
        ExtractionFailure::Service {
            model: model.to_string(),
            detail,
        }
    })?;

    let result = parse_response(model, &text);
    match &result {
        Ok(record) if record.is_empty() => warn!(model, "Response held no expense fields"),
        Ok(_) => info!(model, elapsed_ms = start.elapsed().as_millis() as u64, "Extraction succeeded"),
        Err(e) => warn!(model, "Unusable response: {}", e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::ReceiptSource;

    struct Canned(Result<String, String>);

    #[async_trait]
    impl GenerationService for Canned {
        async fn generate(&self, _: &str, _: &str, _: ImageData) -> Result<String, String> {
            self.0.clone()
        }
    }

    fn receipt() -> Receipt {
        Receipt {
            name: "t.png".into(),
            source: ReceiptSource::Image,
            mime_type: "image/png",
            bytes: vec![1, 2, 3],
            width: 1,
            height: 1,
        }
    }

    #[test]
    fn options_from_settings() {
        let g = ProviderGeneration::new("k", 0.1, 1024);
        let opts = g.options();
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn provider_uses_configured_key_not_environment() {
        // No GEMINI_API_KEY or Vertex settings needed.
        let g = ProviderGeneration::new("AIza-configured-key", 0.1, 1024);
        let provider = g.provider_for("gemini-2.0-flash").unwrap();
        assert_eq!(provider.model(), "gemini-2.0-flash");

        let again = g.provider_for("gemini-2.0-flash").unwrap();
        assert!(Arc::ptr_eq(&provider, &again));
        let other = g.provider_for("gemini-1.5-pro").unwrap();
        assert_eq!(other.model(), "gemini-1.5-pro");
    }

    #[tokio::test]
    async fn service_error_is_soft() {
        let svc = Canned(Err("429 quota exceeded".into()));
        let err = extract_record(&svc, "gemini-2.0-flash", "p", &receipt()).await.unwrap_err();
        assert_eq!(
            err,
            ExtractionFailure::Service {
                model: "gemini-2.0-flash".into(),
                detail: "429 quota exceeded".into()
            }
        );
    }

    #[tokio::test]
    async fn fenced_answer_is_parsed() {
        let svc = Canned(Ok("```json\n{\"monto\": 10, \"moneda\": \"USD\"}\n```".into()));
        let rec = extract_record(&svc, "m", "p", &receipt()).await.unwrap();
        assert_eq!(rec.monto, Some(10.0));
        assert_eq!(rec.moneda.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn empty_object_is_an_empty_record() {
        let svc = Canned(Ok("{}".into()));
        let rec = extract_record(&svc, "m", "p", &receipt()).await.unwrap();
        assert!(rec.is_empty());

        let svc = Canned(Ok(r#"{"descripcion": "Kiosco"}"#.into()));
        assert!(!extract_record(&svc, "m", "p", &receipt()).await.unwrap().is_empty());
    }
}
