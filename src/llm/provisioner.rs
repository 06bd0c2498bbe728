use log::{ debug, info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::pull::PullAction;
use super::registry::{ availability, Availability, ModelCatalog };
use crate::error::ClientError;
use crate::models::ModelRef;

/// Longest a provisioning call may block while waiting for a pulled model.
pub const MAX_POLL_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    attempts: u32,
    interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(2),
        }
    }
}

impl PollSettings {
    pub fn new(attempts: u32, interval: Duration) -> Result<Self, ClientError> {
        if attempts == 0 {
            return Err(ClientError::InvalidConfig("poll attempts must be at least 1".into()));
        }
        let window = interval.saturating_mul(attempts);
        if window > MAX_POLL_WINDOW {
            return Err(
                ClientError::InvalidConfig(
                    format!(
                        "polling {} x {:?} = {:?} exceeds the {:?} limit",
                        attempts,
                        interval,
                        window,
                        MAX_POLL_WINDOW
                    )
                )
            );
        }
        Ok(Self { attempts, interval })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// A model confirmed visible on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub model: ModelRef,
    /// Registry checks it took to see the model; zero when no pull was needed.
    pub polls: u32,
    pub message: String,
}

/// Pulls models and waits for the server to register them.
#[derive(Clone)]
pub struct ModelProvisioner {
    catalog: Arc<dyn ModelCatalog>,
    puller: Arc<dyn PullAction>,
}

impl ModelProvisioner {
    pub fn new(catalog: Arc<dyn ModelCatalog>, puller: Arc<dyn PullAction>) -> Self {
        Self { catalog, puller }
    }

    /// Pulls `model`, then polls the catalog until it shows up.
    ///
    /// A failed pull is reported as [`ClientError::ModelPullFailed`] without
    /// polling. A pull that succeeds but never becomes visible within
    /// `poll.attempts()` checks, or within [`MAX_POLL_WINDOW`] of slow
    /// registry calls, is [`ClientError::ModelNotVisibleAfterPull`].
    pub async fn ensure_model(
        &self,
        model: &ModelRef,
        poll: PollSettings
    ) -> Result<Provisioned, ClientError> {
        if model.is_empty() {
            return Err(ClientError::InvalidInput("Please specify a model name.".into()));
        }

        let outcome = self.puller.pull(model).await;
        if !outcome.success {
            return Err(ClientError::ModelPullFailed {
                model: model.to_string(),
                output: outcome.output,
            });
        }
        debug!("Pull output for '{}': {}", model, outcome.output.trim());

        // Registry calls carry their own retries and timeouts, so the whole
        // polling phase runs against one deadline.
        let deadline = Instant::now() + MAX_POLL_WINDOW;
        let mut checks = 0;
        for attempt in 1..=poll.attempts() {
            let listing = tokio::time::timeout_at(deadline, self.catalog.list_models());
            let installed = match listing.await {
                Ok(installed) => installed,
                Err(_) => {
                    warn!("Registry check {} for '{}' ran past {:?}", attempt, model, MAX_POLL_WINDOW);
                    break;
                }
            };
            checks = attempt;
            debug!("Available models (check {}/{}): {:?}", attempt, poll.attempts(), installed);

            if availability(model, &installed).is_available() {
                info!("Model '{}' visible after {} check(s)", model, attempt);
                return Ok(Provisioned {
                    model: model.clone(),
                    polls: attempt,
                    message: format!("Successfully pulled model '{}'.", model),
                });
            }
            if attempt < poll.attempts() {
                tokio::time::sleep_until((Instant::now() + poll.interval()).min(deadline)).await;
            }
        }

        warn!("Model '{}' pulled but not visible after {} checks", model, checks);
        Err(ClientError::ModelNotVisibleAfterPull {
            model: model.to_string(),
            attempts: checks,
        })
    }

    /// Like [`ensure_model`](Self::ensure_model) but skips the pull when the
    /// model is already installed.
    pub async fn ensure_available(
        &self,
        model: &ModelRef,
        poll: PollSettings
    ) -> Result<Provisioned, ClientError> {
        let installed = self.catalog.list_models().await;
        match availability(model, &installed) {
            Availability::Exact =>
                Ok(Provisioned {
                    model: model.clone(),
                    polls: 0,
                    message: format!("Model '{}' is already available.", model),
                }),
            Availability::Family(found) =>
                Ok(Provisioned {
                    model: model.clone(),
                    polls: 0,
                    message: format!("Model '{}' is already available as '{}'.", model, found),
                }),
            Availability::Missing => self.ensure_model(model, poll).await,
        }
    }
}
