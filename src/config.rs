//! Configuration for the dispatcher and the engines behind its routines.
//!
//! All service behaviour is controlled through [`DispatchConfig`], built via
//! its [`DispatchConfigBuilder`]. Keeping every knob in one struct makes it
//! easy to share between the CLI and embedding services and to log the
//! effective settings at startup.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`crate::dispatch::Dispatcher`].
///
/// # Example
/// ```rust
/// use edgequake_pdfops::DispatchConfig;
///
/// let config = DispatchConfig::builder()
///     .max_in_flight(4)
///     .default_timeout_secs(60)
///     .operation_timeout("extractText", 300)
///     .build()
///     .unwrap();
/// assert_eq!(config.timeout_for("extractText").as_secs(), 300);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Private working directory for staged and produced artifacts.
    ///
    /// `None` creates a process-private temporary directory that is removed
    /// when the store is dropped. When set, the directory is created if
    /// missing; each request still gets its own sub-directory inside it.
    pub work_dir: Option<PathBuf>,

    /// Largest accepted upload in bytes, checked before staging. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Maximum number of requests holding a scope at the same time. Default: 8.
    ///
    /// Temporary disk use is bounded by this count times the upload limit;
    /// further requests wait for a slot before anything is staged.
    pub max_in_flight: usize,

    /// Time bound applied to every routine invocation. Default: 120 s.
    pub default_timeout_secs: u64,

    /// Per-operation overrides of [`Self::default_timeout_secs`].
    pub operation_timeouts: BTreeMap<String, u64>,

    /// Settings for the language model used by OCR, summarisation and translation.
    pub llm: LlmSettings,

    /// Explicit pdfium shared library (file or directory). Falls back to
    /// `PDFIUM_LIB_PATH`, then to the system library.
    pub pdfium_library: Option<PathBuf>,

    /// `qpdf` executable used for password encryption. Default: `qpdf` on `PATH`.
    pub qpdf_binary: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            max_upload_bytes: 50 * 1024 * 1024,
            max_in_flight: 8,
            default_timeout_secs: 120,
            operation_timeouts: BTreeMap::new(),
            llm: LlmSettings::default(),
            pdfium_library: None,
            qpdf_binary: PathBuf::from("qpdf"),
        }
    }
}

impl DispatchConfig {
    /// Create a new builder for `DispatchConfig`.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Effective time bound for `operation`.
    pub fn timeout_for(&self, operation: &str) -> Duration {
        let secs = self
            .operation_timeouts
            .get(operation)
            .copied()
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Check the constraints the builder setters enforce. Fields are public
    /// and deserializable, so a config can reach the dispatcher without
    /// passing through them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_bytes == 0 {
            return Err(ConfigError("max upload size must be ≥ 1 byte".into()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError("max in-flight requests must be ≥ 1".into()));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError("default timeout must be ≥ 1 second".into()));
        }
        if let Some((name, _)) = self.operation_timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError(format!(
                "timeout for operation '{name}' must be ≥ 1 second"
            )));
        }
        if self.llm.api_timeout_secs == 0 {
            return Err(ConfigError("LLM call timeout must be ≥ 1 second".into()));
        }
        if self.llm.concurrency == 0 {
            return Err(ConfigError("LLM concurrency must be ≥ 1".into()));
        }
        if self.qpdf_binary.as_os_str().is_empty() {
            return Err(ConfigError("qpdf binary path must not be empty".into()));
        }
        Ok(())
    }
}

/// Language-model knobs, shared by every routine that calls a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider name (e.g. "openai", "anthropic", "ollama"). `None` auto-detects.
    pub provider_name: Option<String>,

    /// Model identifier. `None` uses the provider default.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription and translation want faithful output, not creativity.
    pub temperature: f32,

    /// Maximum tokens generated per call. Default: 4096.
    pub max_tokens: usize,

    /// Retry attempts on a failed call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Concurrent calls per request (pages or chunks). Default: 4.
    pub concurrency: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            concurrency: 4,
        }
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_in_flight(mut self, n: usize) -> Self {
        self.config.max_in_flight = n.max(1);
        self
    }

    pub fn default_timeout_secs(mut self, secs: u64) -> Self {
        self.config.default_timeout_secs = secs;
        self
    }

    pub fn operation_timeout(mut self, operation: impl Into<String>, secs: u64) -> Self {
        self.config
            .operation_timeouts
            .insert(operation.into(), secs);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.llm.provider_name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.llm.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.llm.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm.api_timeout_secs = secs;
        self
    }

    pub fn llm_concurrency(mut self, n: usize) -> Self {
        self.config.llm.concurrency = n.max(1);
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn qpdf_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.qpdf_binary = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DispatchConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = DispatchConfig::default();
        assert_eq!(c.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(c.max_in_flight, 8);
        assert_eq!(c.timeout_for("compress"), Duration::from_secs(120));
        assert_eq!(c.llm.max_tokens, 4096);
    }

    #[test]
    fn builder_clamps() {
        let c = DispatchConfig::builder()
            .max_in_flight(0)
            .temperature(9.0)
            .llm_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.max_in_flight, 1);
        assert_eq!(c.llm.temperature, 2.0);
        assert_eq!(c.llm.concurrency, 1);
    }

    #[test]
    fn zero_slots_are_rejected() {
        let mut builder = DispatchConfig::builder();
        builder.config.max_in_flight = 0;
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("in-flight"));

        let mut builder = DispatchConfig::builder();
        builder.config.llm.concurrency = 0;
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn deserialized_config_is_checked() {
        let mut c = DispatchConfig::default();
        assert!(c.validate().is_ok());
        c.max_in_flight = 0;
        assert!(c.validate().is_err());

        let mut c = DispatchConfig::default();
        c.llm.concurrency = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn per_operation_timeout_overrides_default() {
        let c = DispatchConfig::builder()
            .default_timeout_secs(30)
            .operation_timeout("translate", 600)
            .build()
            .unwrap();
        assert_eq!(c.timeout_for("translate").as_secs(), 600);
        assert_eq!(c.timeout_for("secure").as_secs(), 30);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(DispatchConfig::builder()
            .default_timeout_secs(0)
            .build()
            .is_err());
        let err = DispatchConfig::builder()
            .operation_timeout("compress", 0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("compress"));
    }

    #[test]
    fn zero_upload_limit_is_rejected() {
        assert!(DispatchConfig::builder().max_upload_bytes(0).build().is_err());
    }
}
