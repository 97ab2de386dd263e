//! Terminal operator for the register command.
//!
//! Answers pipeline questions with dialoguer prompts. Prompts block on the
//! terminal, so each one runs on the blocking pool; a prompt that errors or
//! is dismissed with Esc counts as cancellation.

use std::io::{self, Write};

use async_trait::async_trait;
use console::style;
use dialoguer::{Confirm, Input, MultiSelect, Password, Select, theme::ColorfulTheme};
use secrecy::SecretString;

use mcpfinder_core::error::Cancelled;
use mcpfinder_core::operator::Operator;

/// Where the operator writes its header and notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeStream {
    Stdout,
    /// Keeps stdout clean for a machine-readable report
    Stderr,
}

/// Operator backed by the terminal.
pub struct TerminalOperator<W: Write + Send = Box<dyn Write + Send>> {
    /// Output writer for notices (for testing)
    writer: W,
}

impl TerminalOperator<Box<dyn Write + Send>> {
    pub fn new(stream: NoticeStream) -> Self {
        let writer: Box<dyn Write + Send> = match stream {
            NoticeStream::Stdout => Box::new(io::stdout()),
            NoticeStream::Stderr => Box::new(io::stderr()),
        };
        Self { writer }
    }
}

impl<W: Write + Send> TerminalOperator<W> {
    /// Create an operator with a custom writer (for testing).
    #[cfg(test)]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    pub fn print_header(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "{}", style(format!("  {title}")).bold().cyan())?;
        writeln!(self.writer)?;
        Ok(())
    }
}

/// Run a blocking prompt off the async runtime.
async fn blocking<T, F>(prompt: F) -> Result<T, Cancelled>
where
    T: Send + 'static,
    F: FnOnce(&ColorfulTheme) -> Result<Option<T>, dialoguer::Error> + Send + 'static,
{
    let answer = tokio::task::spawn_blocking(move || prompt(&ColorfulTheme::default())).await;
    match answer {
        Ok(Ok(Some(value))) => Ok(value),
        Ok(Ok(None)) => Err(Cancelled),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "prompt failed");
            Err(Cancelled)
        }
        Err(e) => {
            tracing::debug!(error = %e, "prompt task failed");
            Err(Cancelled)
        }
    }
}

#[async_trait]
impl<W: Write + Send> Operator for TerminalOperator<W> {
    async fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String, Cancelled> {
        let prompt = prompt.to_string();
        let default = default.map(str::to_string);
        blocking(move |theme| {
            let mut input = Input::<String>::with_theme(theme)
                .with_prompt(prompt)
                .allow_empty(true);
            if let Some(default) = default.filter(|d| !d.is_empty()) {
                input = input.default(default);
            }
            input.interact_text().map(Some)
        })
        .await
    }

    async fn secret(&mut self, prompt: &str) -> Result<SecretString, Cancelled> {
        let prompt = prompt.to_string();
        blocking(move |theme| {
            Password::with_theme(theme)
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map(|value| Some(SecretString::from(value)))
        })
        .await
    }

    async fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, Cancelled> {
        let prompt = prompt.to_string();
        blocking(move |theme| {
            Confirm::with_theme(theme)
                .with_prompt(prompt)
                .default(default)
                .interact_opt()
        })
        .await
    }

    async fn select(
        &mut self,
        prompt: &str,
        items: &[String],
        default: usize,
    ) -> Result<usize, Cancelled> {
        let prompt = prompt.to_string();
        let items = items.to_vec();
        blocking(move |theme| {
            Select::with_theme(theme)
                .with_prompt(prompt)
                .items(&items)
                .default(default)
                .interact_opt()
        })
        .await
    }

    async fn select_many(
        &mut self,
        prompt: &str,
        items: &[String],
    ) -> Result<Vec<usize>, Cancelled> {
        let prompt = format!("{prompt} (space to toggle, enter to confirm)");
        let items = items.to_vec();
        blocking(move |theme| {
            MultiSelect::with_theme(theme)
                .with_prompt(prompt)
                .items(&items)
                .interact_opt()
        })
        .await
    }

    fn notice(&mut self, message: &str) {
        if let Err(e) = writeln!(self.writer, "  {message}") {
            tracing::debug!(error = %e, "failed to write notice");
        }
    }
}
