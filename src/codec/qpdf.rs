//! Password encryption through the external `qpdf` tool.
//!
//! Arguments go through an `@argfile` so the password never shows up in a
//! process listing. The argfile is created by the caller inside its request
//! scope (mode 0600) and released right after the run.

use crate::error::RoutineError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

const DEPENDENCY: &str = "qpdf";

/// Exit code qpdf uses for "succeeded with warnings".
const EXIT_WARNINGS: i32 = 3;

fn argfile_contents(password: &str, input: &Path, output: &Path) -> String {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let lines: [&str; 10] = [
        "--encrypt",
        password,
        password,
        "256",
        "--print=low",
        "--extract=n",
        "--modify=none",
        "--",
        &input,
        &output,
    ];
    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

/// Encrypt `input` into `output` with AES-256, the same user and owner
/// password, low-resolution printing only, no extraction and no editing.
///
/// The child is killed if this future is dropped.
pub async fn encrypt(
    binary: &Path,
    argfile: &Path,
    input: &Path,
    output: &Path,
    password: &str,
) -> Result<(), RoutineError> {
    if password.contains(['\n', '\r']) {
        return Err(RoutineError::UnsupportedInput(
            "password must not contain line breaks".into(),
        ));
    }
    tokio::fs::write(argfile, argfile_contents(password, input, output))
        .await
        .map_err(|e| RoutineError::processing(format!("could not prepare qpdf arguments ({})", e.kind())))?;

    let mut arg = std::ffi::OsString::from("@");
    arg.push(argfile);
    let result = Command::new(binary)
        .arg(arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    let out = match result {
        Ok(out) => out,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            return Err(RoutineError::unavailable(
                DEPENDENCY,
                "executable not found; install qpdf or configure its path",
            ))
        }
        Err(e) => {
            return Err(RoutineError::processing(format!(
                "could not start qpdf ({})",
                e.kind()
            )))
        }
    };

    let stderr = String::from_utf8_lossy(&out.stderr);
    match out.status.code() {
        Some(0) => {
            debug!("qpdf encrypted document");
            Ok(())
        }
        Some(EXIT_WARNINGS) => {
            warn!("qpdf finished with warnings: {}", stderr.trim());
            Ok(())
        }
        code => {
            warn!("qpdf failed with {:?}: {}", code, stderr.trim());
            Err(RoutineError::processing("encryption failed"))
        }
    }
}
