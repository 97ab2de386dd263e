//! Operator interaction seam.
//!
//! The pipeline asks questions through [`Operator`]; frontends decide how to
//! render them. [`Prompter`] bounds every question with the configured
//! prompt timeout, turning expiry into [`Cancelled`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::Cancelled;

/// Source of operator answers.
///
/// Every method returns `Err(Cancelled)` when the operator aborts.
#[async_trait]
pub trait Operator: Send {
    /// Free-form text; an empty answer yields `default` when one is given.
    async fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String, Cancelled>;

    /// Hidden input for credentials.
    async fn secret(&mut self, prompt: &str) -> Result<SecretString, Cancelled>;

    async fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, Cancelled>;

    /// Pick one item; returns its index.
    async fn select(
        &mut self,
        prompt: &str,
        items: &[String],
        default: usize,
    ) -> Result<usize, Cancelled>;

    /// Pick any number of items; returns their indices.
    async fn select_many(&mut self, prompt: &str, items: &[String])
    -> Result<Vec<usize>, Cancelled>;

    /// Informational output that needs no answer.
    fn notice(&mut self, message: &str);
}

/// Wraps an [`Operator`] with a per-prompt deadline.
pub struct Prompter<'a> {
    operator: &'a mut dyn Operator,
    timeout: Duration,
}

impl<'a> Prompter<'a> {
    pub fn new(operator: &'a mut dyn Operator, timeout: Duration) -> Self {
        Self { operator, timeout }
    }

    async fn bounded<T>(
        timeout: Duration,
        answer: impl Future<Output = Result<T, Cancelled>>,
    ) -> Result<T, Cancelled> {
        match tokio::time::timeout(timeout, answer).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "prompt timed out");
                Err(Cancelled)
            }
        }
    }

    pub async fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String, Cancelled> {
        Self::bounded(self.timeout, self.operator.input(prompt, default)).await
    }

    pub async fn secret(&mut self, prompt: &str) -> Result<SecretString, Cancelled> {
        Self::bounded(self.timeout, self.operator.secret(prompt)).await
    }

    pub async fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, Cancelled> {
        Self::bounded(self.timeout, self.operator.confirm(prompt, default)).await
    }

    pub async fn select(
        &mut self,
        prompt: &str,
        items: &[String],
        default: usize,
    ) -> Result<usize, Cancelled> {
        Self::bounded(self.timeout, self.operator.select(prompt, items, default)).await
    }

    pub async fn select_many(
        &mut self,
        prompt: &str,
        items: &[String],
    ) -> Result<Vec<usize>, Cancelled> {
        Self::bounded(self.timeout, self.operator.select_many(prompt, items)).await
    }

    pub fn notice(&mut self, message: &str) {
        self.operator.notice(message);
    }
}
