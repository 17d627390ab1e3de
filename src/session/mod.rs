//! The external process run between the pull and push phases.

use crate::config::SessionConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No session program configured")]
    NotConfigured,

    #[error("Session program not found: {}", .0.display())]
    ProgramNotFound(PathBuf),

    #[error("Failed to launch {}: {source}", .program.display())]
    LaunchError {
        program: PathBuf,
        source: std::io::Error,
    },
}

/// How the session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl SessionOutcome {
    pub fn completed() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
        }
    }
}

#[async_trait]
pub trait SessionRunner: Send + Sync {
    /// Run the session to completion
    async fn run(&self) -> Result<SessionOutcome, SessionError>;
}

/// Launches a program and waits for it to exit
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        let program = config.program.clone().ok_or(SessionError::NotConfigured)?;
        Ok(Self {
            program,
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        })
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl SessionRunner for ProcessLauncher {
    async fn run(&self) -> Result<SessionOutcome, SessionError> {
        // A bare name is resolved through PATH; anything with a separator must exist
        if self.program.components().count() > 1 && !self.program.exists() {
            return Err(SessionError::ProgramNotFound(self.program.clone()));
        }

        let mut command = Command::new(&self.program);
        command.args(&self.args);

        // Default to the program's own folder, like a double-click launch
        let working_dir = self
            .working_dir
            .clone()
            .or_else(|| self.program.parent().map(|p| p.to_path_buf()))
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        info!(program = %self.program.display(), "Starting session");
        let status = command
            .status()
            .await
            .map_err(|source| SessionError::LaunchError {
                program: self.program.clone(),
                source,
            })?;

        let outcome = SessionOutcome {
            success: status.success(),
            exit_code: status.code(),
        };

        if outcome.success {
            info!("Session finished");
        } else {
            warn!(exit_code = ?outcome.exit_code, "Session exited with failure");
        }
        Ok(outcome)
    }
}

/// Runner for `--no-launch`: completes immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSession;

#[async_trait]
impl SessionRunner for NoopSession {
    async fn run(&self) -> Result<SessionOutcome, SessionError> {
        info!("Launch disabled, skipping session");
        Ok(SessionOutcome::completed())
    }
}
