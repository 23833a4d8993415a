use async_trait::async_trait;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("input closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("prompt task failed: {0}")]
    Task(String),
}

/// Interactive front-end used during authorization.
#[async_trait]
pub trait Prompt: Send + Sync {
    async fn prompt_line(&self, label: &str) -> Result<String, PromptError>;
}

/// Reads answers from the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl Prompt for StdinPrompt {
    async fn prompt_line(&self, label: &str) -> Result<String, PromptError> {
        let label = label.to_string();
        tokio::task::spawn_blocking(move || -> Result<String, PromptError> {
            let mut stdout = std::io::stdout();
            write!(stdout, "{label}: ")?;
            stdout.flush()?;

            let mut line = String::new();
            if std::io::stdin().read_line(&mut line)? == 0 {
                return Err(PromptError::Closed);
            }
            Ok(line.trim().to_string())
        })
        .await
        .map_err(|e| PromptError::Task(e.to_string()))?
    }
}
