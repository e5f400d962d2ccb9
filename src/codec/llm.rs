//! Language-model calls: provider resolution and a retrying `chat`.
//!
//! All prompt text lives in [`crate::prompts`]; this module only builds
//! messages and deals with transient failures.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids a thundering herd: with 500 ms base and 3 retries the wait
//! sequence is 500 ms → 1 s → 2 s. Each attempt is additionally bounded by
//! `api_timeout_secs`.

use crate::config::LlmSettings;
use crate::error::RoutineError;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

const DEPENDENCY: &str = "language model";
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, RoutineError> {
    ProviderFactory::create_llm_provider(name, model)
        .map_err(|e| RoutineError::unavailable(DEPENDENCY, format!("provider '{name}': {e}")))
}

/// Resolve a provider, from most to least specific:
///
/// 1. the configured provider name (+ model),
/// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`,
/// 3. OpenAI when `OPENAI_API_KEY` is set,
/// 4. whatever [`ProviderFactory::from_env`] detects.
pub fn resolve_provider(settings: &LlmSettings) -> Result<Arc<dyn LLMProvider>, RoutineError> {
    let model = settings.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = settings.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(provider), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !provider.is_empty() && !model.is_empty() {
            return create_provider(&provider, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create_provider("openai", model);
    }

    let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        RoutineError::unavailable(
            DEPENDENCY,
            format!("no provider configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY ({e})"),
        )
    })?;
    info!("Auto-detected LLM provider");
    Ok(provider)
}

fn build_options(settings: &LlmSettings) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    }
}

/// Send `messages`, retrying with backoff. Returns the response text.
///
/// `label` identifies the call in logs ("page 3", "chunk 2/5").
pub async fn chat(
    provider: &Arc<dyn LLMProvider>,
    messages: &[ChatMessage],
    settings: &LlmSettings,
    label: &str,
) -> Result<String, RoutineError> {
    let start = Instant::now();
    let options = build_options(settings);
    let per_call = Duration::from_secs(settings.api_timeout_secs);
    let mut last_err = String::from("no attempt made");

    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(per_call, provider.chat(messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}",
                    label,
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                return Ok(response.content);
            }
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                last_err = e.to_string();
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    label,
                    attempt + 1,
                    settings.api_timeout_secs
                );
                last_err = format!("timed out after {}s", settings.api_timeout_secs);
            }
        }
    }

    Err(RoutineError::processing(format!(
        "{label}: model call failed after {} attempts ({last_err})",
        settings.max_retries + 1
    )))
}

/// System prompt plus a text user turn.
pub fn text_messages(system: &str, user: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// System prompt plus one image. The user text stays empty: the image
/// carries the content, but providers require a user turn.
pub fn vision_messages(system: &str, image: ImageData) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system),
        ChatMessage::user_with_images("", vec![image]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_settings() {
        let settings = LlmSettings::default();
        let opts = build_options(&settings);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn message_layout() {
        let msgs = text_messages("sys", "hello");
        assert_eq!(msgs.len(), 2);
    }
}
