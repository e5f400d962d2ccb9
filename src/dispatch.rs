//! The dispatcher: one request lifecycle for every operation.
//!
//! ```text
//! Received ─▶ Validated ─▶ OptionsResolved ─▶ Staged ─▶ Invoked ─▶ Packaged ─▶ Closed
//!     │            │               │              │          │          │
//!     └────────────┴───────────────┴──────────────┴──────────┴──────────┴─▶ Failed ─▶ Closed
//! ```
//!
//! Validation and option normalisation run before anything touches the
//! disk, so client errors never allocate storage. From `Staged` on, every
//! exit path goes through [`RequestScope::close`]; if the request future is
//! dropped instead (caller gone, runtime shutdown) the scope's `Drop`
//! performs the same cleanup.
//!
//! Admission is bounded by a semaphore of `max_in_flight` permits, acquired
//! before the scope is opened. Worst-case disk use is therefore
//! `max_in_flight × max_upload_bytes` plus routine intermediates.

use crate::config::DispatchConfig;
use crate::error::{DispatchError, SetupError};
use crate::options::{NormalizedOptions, RawOptions};
use crate::package::{self, PackagedResult};
use crate::registry::{OperationSpec, Registry};
use crate::routines::{Engines, RoutineContext};
use crate::store::{Artifact, ArtifactStore, RequestScope};
use crate::validate;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Request-id counter, only used to correlate log lines.
static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// An inbound operation request.
#[derive(Clone)]
pub struct DocumentRequest {
    /// Operation name or alias.
    pub operation: String,
    /// Caller-supplied file name; display only.
    pub file_name: String,
    /// Caller-declared MIME type, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub options: RawOptions,
}

impl fmt::Debug for DocumentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Option values may be secret; list the keys only.
        f.debug_struct("DocumentRequest")
            .field("operation", &self.operation)
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &self.bytes.len())
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DocumentRequest {
    pub fn new(
        operation: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            operation: operation.into(),
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
            options: RawOptions::new(),
        }
    }

    pub fn content_type(mut self, mime: impl Into<String>) -> Self {
        self.content_type = Some(mime.into());
        self
    }

    /// Add a raw option. An empty value counts as absent.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), Some(value.into()));
        self
    }
}

/// Lifecycle states of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Received,
    Validated,
    OptionsResolved,
    Staged,
    Invoked,
    Packaged,
    Failed,
    Closed,
}

impl Lifecycle {
    fn advance(&mut self, next: Lifecycle) {
        debug!("{:?} → {:?}", self, next);
        *self = next;
    }
}

/// Snapshot reported by [`Dispatcher::health`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub work_dir_available: bool,
    pub operations: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub llm_configured: bool,
}

/// Runs requests against a frozen [`Registry`].
///
/// Share it behind an `Arc`; `dispatch` takes `&self` and concurrent calls
/// share nothing mutable except the admission semaphore.
pub struct Dispatcher {
    registry: Arc<Registry>,
    config: DispatchConfig,
    engines: Engines,
    store: ArtifactStore,
    permits: Arc<Semaphore>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("operations", &self.registry.len())
            .field("work_dir", &self.store.root())
            .field("engines", &self.engines)
            .finish()
    }
}

impl Dispatcher {
    /// Open the working directory and get ready to serve requests.
    ///
    /// `config` is validated again here; a config that bypassed the builder
    /// with zero admission slots would otherwise block every request.
    pub fn new(
        registry: Arc<Registry>,
        config: DispatchConfig,
        engines: Engines,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let store = ArtifactStore::open(config.work_dir.as_deref())?;
        info!(
            "Dispatcher ready: {} operations, {} slots, work dir {}",
            registry.len(),
            config.max_in_flight,
            store.root().display()
        );
        Ok(Self {
            permits: Arc::new(Semaphore::new(config.max_in_flight)),
            registry,
            config,
            engines,
            store,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Directory holding the request scopes.
    pub fn work_dir(&self) -> &Path {
        self.store.root()
    }

    pub fn health(&self) -> Health {
        let work_dir_available = self.store.probe().is_ok();
        Health {
            status: if work_dir_available { "ok" } else { "degraded" },
            work_dir_available,
            operations: self.registry.len(),
            in_flight: self
                .config
                .max_in_flight
                .saturating_sub(self.permits.available_permits()),
            max_in_flight: self.config.max_in_flight,
            llm_configured: self.engines.llm.is_some(),
        }
    }

    /// Run one request to completion.
    ///
    /// Every artifact the request created is deleted before this returns,
    /// whatever the outcome.
    pub async fn dispatch(&self, request: DocumentRequest) -> Result<PackagedResult, DispatchError> {
        let id = NEXT_REQUEST.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("dispatch", operation = %request.operation, request = id);
        async {
            let started = Instant::now();
            let mut state = Lifecycle::Received;
            let result = self.drive(&request, &mut state).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(packaged) => info!(
                    "Completed in {}ms: {} ({} bytes{})",
                    elapsed_ms,
                    packaged.filename,
                    packaged.body.len(),
                    if packaged.is_placeholder() { ", placeholder" } else { "" }
                ),
                Err(e) if e.kind().is_client_error() => {
                    warn!(kind = %e.kind(), "Rejected after {}ms: {}", elapsed_ms, e)
                }
                Err(e) => error!(kind = %e.kind(), "Failed after {}ms: {}", elapsed_ms, e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        request: &DocumentRequest,
        state: &mut Lifecycle,
    ) -> Result<PackagedResult, DispatchError> {
        let spec = self.registry.get(&request.operation).ok_or_else(|| {
            DispatchError::InvalidInput(format!("Unknown operation '{}'", request.operation))
        })?;

        validate::validate(
            &request.file_name,
            request.content_type.as_deref(),
            &request.bytes,
            spec.input_kind,
            self.config.max_upload_bytes,
        )?;
        state.advance(Lifecycle::Validated);

        let options = spec.normalize(&request.options)?;
        debug!("Options: {:?}", options);
        state.advance(Lifecycle::OptionsResolved);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DispatchError::ProcessingFailure("dispatcher is shutting down".into()))?;
        let scope = self.store.open_scope()?;

        let outcome = self.run_in_scope(spec, &scope, request, &options, state).await;
        if outcome.is_err() {
            state.advance(Lifecycle::Failed);
        }
        // The body is already in memory, so closing cannot invalidate it.
        scope.close().log();
        state.advance(Lifecycle::Closed);
        outcome
    }

    async fn run_in_scope(
        &self,
        spec: &OperationSpec,
        scope: &RequestScope,
        request: &DocumentRequest,
        options: &NormalizedOptions,
        state: &mut Lifecycle,
    ) -> Result<PackagedResult, DispatchError> {
        let input = scope.stage(&request.bytes, spec.input_kind)?;
        state.advance(Lifecycle::Staged);

        let ctx = RoutineContext {
            operation: spec.name,
            input: &input,
            options,
            output_kind: (spec.output_kind)(options),
            scope,
            engines: &self.engines,
        };
        let limit = self.config.timeout_for(spec.name);
        let (artifact, is_placeholder) = tokio::time::timeout(limit, invoke(spec, &ctx))
            .await
            .map_err(|_| DispatchError::Timeout {
                operation: spec.name.to_string(),
                secs: limit.as_secs(),
            })??;
        check_result(&ctx, &artifact)?;
        state.advance(Lifecycle::Invoked);

        let packaged = package::package(
            &artifact,
            spec,
            &request.file_name,
            request.bytes.len() as u64,
            is_placeholder,
        )?;
        state.advance(Lifecycle::Packaged);
        Ok(packaged)
    }
}

/// Run the routine, substituting its fallback when the operation allows it.
async fn invoke(
    spec: &OperationSpec,
    ctx: &RoutineContext<'_>,
) -> Result<(Artifact, bool), DispatchError> {
    match spec.routine.run(ctx).await {
        Ok(artifact) => Ok((artifact, false)),
        Err(cause) if spec.best_effort && cause.allows_fallback() => {
            warn!("Routine failed, using fallback: {}", cause);
            match spec.routine.fallback(ctx, &cause).await {
                Ok(artifact) => Ok((artifact, true)),
                Err(e) => {
                    warn!("Fallback failed too: {}", e);
                    Err(cause.into())
                }
            }
        }
        Err(cause) => Err(cause.into()),
    }
}

/// A result must be a fresh, live artifact of this scope with the declared kind.
fn check_result(ctx: &RoutineContext<'_>, artifact: &Artifact) -> Result<(), DispatchError> {
    if artifact.id() == ctx.input.id() || !ctx.scope.owns(artifact) {
        return Err(DispatchError::ProcessingFailure(
            "routine did not produce a result artifact".into(),
        ));
    }
    if artifact.kind() != ctx.output_kind {
        return Err(DispatchError::ProcessingFailure(format!(
            "routine produced {} instead of {}",
            artifact.kind(),
            ctx.output_kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, RoutineError};
    use crate::media::MediaKind;
    use crate::registry::RegistryBuilder;
    use crate::routines::Routine;
    use async_trait::async_trait;
    use std::time::Duration;

    const PDF: &[u8] = b"%PDF-1.4\n%fake\n";

    struct Echo;

    #[async_trait]
    impl Routine for Echo {
        async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
            let bytes = ctx.input_bytes().await?;
            ctx.emit(&bytes)
        }
    }

    /// Returns the input itself instead of a fresh artifact.
    struct Lazy;

    #[async_trait]
    impl Routine for Lazy {
        async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
            Ok(ctx.input.clone())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Routine for Sleepy {
        async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
            ctx.scope.allocate(MediaKind::Txt)?;
            tokio::time::sleep(Duration::from_secs(30)).await;
            ctx.emit(b"late")
        }
    }

    fn spec(name: &'static str, routine: Arc<dyn Routine>) -> OperationSpec {
        OperationSpec {
            name,
            aliases: &[],
            summary: "test",
            input_kind: MediaKind::Pdf,
            fields: vec![],
            rules: vec![],
            output_kind: |_| MediaKind::Pdf,
            output_kinds: &[MediaKind::Pdf],
            display_prefix: "out_",
            best_effort: false,
            report_sizes: false,
            routine,
        }
    }

    fn dispatcher(config: DispatchConfig) -> Dispatcher {
        let registry = RegistryBuilder::new()
            .register(spec("echo", Arc::new(Echo)))
            .register(spec("lazy", Arc::new(Lazy)))
            .register(spec("sleepy", Arc::new(Sleepy)))
            .build()
            .unwrap();
        let engines = Engines::offline(&config);
        Dispatcher::new(Arc::new(registry), config, engines).unwrap()
    }

    fn scopes_left(d: &Dispatcher) -> usize {
        std::fs::read_dir(d.work_dir()).unwrap().count()
    }

    #[tokio::test]
    async fn echo_round_trip_cleans_up() {
        let d = dispatcher(DispatchConfig::default());
        let out = d
            .dispatch(DocumentRequest::new("echo", "a.pdf", PDF))
            .await
            .unwrap();
        assert_eq!(out.body, PDF);
        assert_eq!(out.filename, "out_a.pdf");
        assert_eq!(out.metadata["isPlaceholder"], "false");
        assert_eq!(scopes_left(&d), 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_invalid_input() {
        let d = dispatcher(DispatchConfig::default());
        let err = d
            .dispatch(DocumentRequest::new("rotate", "a.pdf", PDF))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn returning_the_input_is_rejected() {
        let d = dispatcher(DispatchConfig::default());
        let err = d
            .dispatch(DocumentRequest::new("lazy", "a.pdf", PDF))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailure);
        assert_eq!(scopes_left(&d), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_closes_scope() {
        let config = DispatchConfig::builder()
            .operation_timeout("sleepy", 1)
            .build()
            .unwrap();
        let d = dispatcher(config);
        let err = d
            .dispatch(DocumentRequest::new("sleepy", "a.pdf", PDF))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("1s"));
        assert_eq!(scopes_left(&d), 0);
    }

    #[tokio::test]
    async fn cancelled_request_still_cleans_up() {
        let d = Arc::new(dispatcher(DispatchConfig::default()));
        let task = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.dispatch(DocumentRequest::new("sleepy", "a.pdf", PDF)).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(d.health().in_flight, 1);
        task.abort();
        let _ = task.await;
        assert_eq!(scopes_left(&d), 0);
        assert_eq!(d.health().in_flight, 0);
    }

    #[test]
    fn health_reports_registry_size() {
        let d = dispatcher(DispatchConfig::default());
        let h = d.health();
        assert_eq!(h.status, "ok");
        assert_eq!(h.operations, 3);
        assert!(!h.llm_configured);
    }

    #[test]
    fn request_debug_hides_option_values() {
        let req = DocumentRequest::new("secure", "a.pdf", PDF).option("password", "hunter2");
        let dbg = format!("{req:?}");
        assert!(dbg.contains("password"));
        assert!(!dbg.contains("hunter2"));
    }
}
