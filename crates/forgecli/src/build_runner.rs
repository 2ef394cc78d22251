//! Concrete [`forge_core::compiler::BuildRunner`] that shells out to
//! Maven, grounded on the teacher's subprocess-with-timeout pattern in
//! `orchestrator.rs`'s worker invocation (`tokio::time::timeout` wrapping
//! a `tokio::process::Command`).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use forge_core::compiler::{BuildOutcome, BuildRunner};
use forge_core::error::{ForgeError, ForgeResult};

pub struct MavenBuildRunner;

#[async_trait]
impl BuildRunner for MavenBuildRunner {
    async fn build(&self, project_dir: &Path, timeout: Duration) -> ForgeResult<BuildOutcome> {
        let child = Command::new("mvn")
            .args(["clean", "install", "-B"])
            .current_dir(project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ForgeError::Compile(format!("failed to spawn mvn: {e}")))?;

        let wait = async {
            child
                .wait_with_output()
                .await
                .map_err(|e| ForgeError::Compile(format!("mvn wait failed: {e}")))
        };

        let output = match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result?,
            Err(_) => return Err(ForgeError::Timeout(timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let log_path = project_dir.join("maven.log");
        if let Ok(mut log) = tokio::fs::File::create(&log_path).await {
            let _ = log.write_all(stdout.as_bytes()).await;
            let _ = log.write_all(stderr.as_bytes()).await;
        }

        let combined = format!("{stdout}\n{stderr}");
        let success = output.status.success() && !combined.contains("BUILD FAILURE") && !combined.contains("[ERROR]");

        Ok(BuildOutcome {
            success,
            stdout,
            stderr,
        })
    }
}
