use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// Control over the machine this worker runs on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostController: Send + Sync {
    /// Ask the host to shut down. Returns once the request is issued, not when it completes.
    async fn shutdown(&self) -> Result<(), HostError>;
}

/// Shuts the host down by spawning a configured command (e.g. `sudo shutdown -h now`).
pub struct CommandHostController {
    program: String,
    args: Vec<String>,
}

impl CommandHostController {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl HostController for CommandHostController {
    async fn shutdown(&self) -> Result<(), HostError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| HostError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        tracing::info!(
            program = %self.program,
            pid = child.id(),
            "Host shutdown command issued"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to spawn shutdown command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
