use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::recognition::RecognitionOutcome;

/// Runs image recognition against a resource URL.
///
/// Every failure, including a timeout, comes back as a failed outcome rather
/// than an error so the caller can record it on the job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, resource_url: &str) -> RecognitionOutcome;
}

/// Recognizer backed by an external command: `program args... <resource_url>`.
///
/// The command prints the recognized label on stdout, e.g. `dog (score 0.81)`.
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, resource_url: &str) -> Result<std::process::Output, std::io::Error> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(resource_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self, resource_url: &str) -> RecognitionOutcome {
        tracing::debug!(
            program = %self.program,
            resource_url = %resource_url,
            "Invoking recognizer"
        );

        // Dropping the timed-out future drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, self.run(resource_url)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(program = %self.program, error = %e, "Failed to run recognizer");
                return RecognitionOutcome::failed(format!("failed to run recognizer: {e}"));
            }
            Err(_) => {
                tracing::warn!(
                    resource_url = %resource_url,
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Recognizer timed out"
                );
                return RecognitionOutcome::failed(format!(
                    "recognition timed out after {}s",
                    self.timeout.as_secs_f64()
                ));
            }
        };

        outcome_from_output(&output)
    }
}

fn outcome_from_output(output: &std::process::Output) -> RecognitionOutcome {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let stderr = stderr.trim();
        return if stderr.is_empty() {
            RecognitionOutcome::failed(format!("recognizer exited with {}", output.status))
        } else {
            RecognitionOutcome::failed(stderr)
        };
    }

    let result = stdout.trim();
    if result.is_empty() {
        RecognitionOutcome::failed("recognizer produced no output")
    } else {
        RecognitionOutcome::recognized(result)
    }
}
