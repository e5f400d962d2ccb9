//! `secure`: watermark a PDF, password-protect it, or both.
//!
//! Watermarking is done in-process with lopdf. Encryption shells out to
//! `qpdf`; the password travels through an argument file inside the request
//! scope and never appears on a command line.
//!
//! This operation has no fallback. A missing `qpdf` surfaces as
//! `DependencyUnavailable` instead of an unprotected document.

use super::{Routine, RoutineContext};
use crate::codec::{self, pdf::WatermarkPosition};
use crate::error::RoutineError;
use crate::media::MediaKind;
use crate::options::{CrossRule, OptionField};
use crate::registry::OperationSpec;
use crate::store::Artifact;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ACTIONS: &[&str] = &["password", "watermark", "both"];
pub const POSITIONS: &[&str] = &["center", "corner", "diagonal", "bottom"];

const MAX_PASSWORD_CHARS: usize = 128;
const MAX_WATERMARK_CHARS: usize = 200;

fn wants_password(action: Option<&str>) -> bool {
    matches!(action, Some("password" | "both"))
}

fn wants_watermark(action: Option<&str>) -> bool {
    matches!(action, Some("watermark" | "both"))
}

pub fn operation() -> OperationSpec {
    OperationSpec {
        name: "secure",
        aliases: &[],
        summary: "Password-protect and/or watermark a PDF",
        input_kind: MediaKind::Pdf,
        fields: vec![
            OptionField::choice("action", ACTIONS).required(),
            OptionField::text("password", MAX_PASSWORD_CHARS).secret(),
            OptionField::text("watermarkText", MAX_WATERMARK_CHARS).aliases(&["watermark_text"]),
            OptionField::choice("watermarkPosition", POSITIONS)
                .aliases(&["watermark_position"])
                .default_value("center"),
        ],
        rules: vec![
            CrossRule {
                violated: |o| wants_password(o.choice("action")) && !o.is_set("password"),
                message: "password is required when action is 'password' or 'both'",
            },
            CrossRule {
                violated: |o| wants_watermark(o.choice("action")) && !o.is_set("watermarkText"),
                message: "watermarkText is required when action is 'watermark' or 'both'",
            },
        ],
        output_kind: |_| MediaKind::Pdf,
        output_kinds: &[MediaKind::Pdf],
        display_prefix: "secured_",
        best_effort: false,
        report_sizes: false,
        routine: Arc::new(Secure),
    }
}

pub struct Secure;

#[async_trait]
impl Routine for Secure {
    async fn run(&self, ctx: &RoutineContext<'_>) -> Result<Artifact, RoutineError> {
        let action = Some(ctx.choice("action")?);

        let watermarked = if wants_watermark(action) {
            let text = ctx
                .options
                .text("watermarkText")
                .unwrap_or_default()
                .to_string();
            let position = WatermarkPosition::parse(ctx.choice("watermarkPosition")?)
                .unwrap_or(WatermarkPosition::Center);
            let original = ctx.input_bytes().await?;
            let bytes = codec::blocking("watermarking", move || {
                codec::pdf::watermark(&original, &text, position)
            })
            .await?;
            debug!("Watermark applied at {:?}", position);
            Some(bytes)
        } else {
            None
        };

        if !wants_password(action) {
            let bytes = watermarked
                .ok_or_else(|| RoutineError::processing("nothing to apply"))?;
            info!("Document watermarked");
            return ctx.emit(&bytes);
        }

        let password = ctx
            .options
            .text("password")
            .ok_or_else(|| RoutineError::processing("option 'password' was not resolved"))?;

        // qpdf needs a file; the watermarked intermediate lives in the scope.
        let intermediate = match &watermarked {
            Some(bytes) => Some(ctx.scope.stage(bytes, MediaKind::Pdf)?),
            None => None,
        };
        let source = intermediate.as_ref().unwrap_or(ctx.input);
        let argfile = ctx.scope.allocate(MediaKind::Txt)?;
        let output = ctx.scope.allocate(MediaKind::Pdf)?;

        let result = codec::qpdf::encrypt(
            &ctx.engines.qpdf_binary,
            argfile.path(),
            source.path(),
            output.path(),
            password,
        )
        .await;

        // The argfile holds the password; drop it before anything else.
        discard(ctx, &argfile);
        if let Some(intermediate) = &intermediate {
            discard(ctx, intermediate);
        }
        if let Err(e) = result {
            discard(ctx, &output);
            return Err(e);
        }

        info!("Document encrypted (AES-256)");
        Ok(output)
    }
}

/// Release a scratch artifact. A failure is logged; the scope removes
/// whatever is left when it closes.
fn discard(ctx: &RoutineContext<'_>, artifact: &Artifact) {
    if let Err(e) = ctx.scope.release(artifact) {
        warn!("Could not release artifact {}: {}", artifact.id(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OptionError;
    use crate::routines::testing::{options, Harness};

    fn raw(pairs: &[(&str, &str)]) -> crate::options::RawOptions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn conditional_fields_are_enforced() {
        let spec = operation();
        let err = spec.normalize(&raw(&[("action", "watermark")])).unwrap_err();
        assert!(matches!(err, OptionError::Constraint(ref m) if m.contains("watermarkText")));

        let err = spec.normalize(&raw(&[("action", "both"), ("watermarkText", "X")])).unwrap_err();
        assert!(matches!(err, OptionError::Constraint(ref m) if m.contains("password")));

        // An empty password counts as absent.
        let err = spec
            .normalize(&raw(&[("action", "password"), ("password", "  ")]))
            .unwrap_err();
        assert!(matches!(err, OptionError::Constraint(_)));

        let ok = spec
            .normalize(&raw(&[("action", "watermark"), ("watermark_text", "DRAFT")]))
            .unwrap();
        assert_eq!(ok.choice("watermarkPosition"), Some("center"));
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let spec = operation();
        let opts = spec
            .normalize(&raw(&[("action", "password"), ("password", "hunter2")]))
            .unwrap();
        assert!(!format!("{opts:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn watermark_only_runs_in_process() {
        let input = codec::pdf::write_text_pdf(None, "Quarterly figures").unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(
            &spec,
            &[("action", "watermark"), ("watermarkText", "CONFIDENTIAL"), ("watermarkPosition", "bottom")],
        );
        let ctx = harness.context(&spec, &opts);

        let out = Secure.run(&ctx).await.unwrap();
        let bytes = std::fs::read(out.path()).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        let text = codec::pdf::page_texts(&bytes).unwrap().join(" ");
        assert!(text.contains("CONFIDENTIAL"), "got: {text}");
        assert_eq!(harness.scope.live_count(), 2);
    }

    #[tokio::test]
    async fn missing_qpdf_fails_and_leaves_only_the_input() {
        let input = codec::pdf::write_text_pdf(None, "secret").unwrap();
        let harness = Harness::new(&input);
        let spec = operation();
        let opts = options(
            &spec,
            &[("action", "both"), ("password", "pw"), ("watermarkText", "DRAFT")],
        );
        let ctx = harness.context(&spec, &opts);

        let err = Secure.run(&ctx).await.unwrap_err();
        assert!(matches!(err, RoutineError::DependencyUnavailable { dependency: "qpdf", .. }));
        assert!(!err.to_string().contains("pw"));
        assert_eq!(harness.scope.live_count(), 1);
        assert!(harness.input.path().exists());
    }

    /// Stand-in for qpdf that turns its argument file into a non-empty
    /// directory, so deleting the argfile fails, and then exits with an error.
    #[cfg(unix)]
    fn stubborn_qpdf(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("qpdf");
        std::fs::write(
            &script,
            "#!/bin/sh\nargfile=\"${1#@}\"\nrm -f \"$argfile\"\nmkdir -p \"$argfile/held\"\necho 'qpdf: bad input' >&2\nexit 2\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn qpdf_failure_is_reported_even_when_cleanup_fails() {
        let bin = tempfile::tempdir().unwrap();
        let input = codec::pdf::write_text_pdf(None, "secret").unwrap();
        let mut harness = Harness::new(&input);
        harness.engines.qpdf_binary = stubborn_qpdf(bin.path());
        let spec = operation();
        let opts = options(
            &spec,
            &[("action", "both"), ("password", "pw"), ("watermarkText", "DRAFT")],
        );
        let ctx = harness.context(&spec, &opts);

        let err = Secure.run(&ctx).await.unwrap_err();
        assert!(matches!(err, RoutineError::ProcessingFailure(_)), "got: {err:?}");
        // The intermediate and the output are still released.
        assert_eq!(harness.scope.live_count(), 1);
    }
}
