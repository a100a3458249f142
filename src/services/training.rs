use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    error::ClientResult,
    models::{validate_model_id, ModelSnapshot, ModelStatus, TrainingParameters},
    services::dispatcher::{ApiRequest, AuthKey, Dispatcher, Verb},
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 1000;

/// How long to wait for a training run to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

/// Source of delays between status checks
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock delays on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Where a training request ended up from the caller's point of view
///
/// Only `Completed` means the model is usable. `TimedOut` and `Cancelled`
/// are warnings, not errors: the returned snapshot holds the last status
/// observed and the caller may keep refreshing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    /// Submitted without waiting
    Submitted,
    Completed { polls: u32 },
    /// The service finished the run unsuccessfully
    Failed { polls: u32 },
    /// Poll budget exhausted before a terminal status
    TimedOut { polls: u32 },
    /// The caller's token fired before a terminal status
    Cancelled { polls: u32 },
}

impl TrainingState {
    pub fn polls(&self) -> u32 {
        match self {
            TrainingState::Submitted => 0,
            TrainingState::Completed { polls }
            | TrainingState::Failed { polls }
            | TrainingState::TimedOut { polls }
            | TrainingState::Cancelled { polls } => *polls,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TrainingState::TimedOut { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub snapshot: ModelSnapshot,
    pub state: TrainingState,
}

/// Token that cancels itself after `duration`
pub fn cancel_after(duration: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        child.cancel();
    });
    token
}

/// Fetch the current descriptor of a model
pub async fn fetch_status(dispatcher: &dyn Dispatcher, model_id: &str) -> ClientResult<ModelSnapshot> {
    validate_model_id(model_id)?;
    let response = dispatcher
        .dispatch(ApiRequest::new(Verb::Get, model_id, AuthKey::Admin))
        .await?;
    ModelSnapshot::from_response(response)
}

/// Submits training runs and waits for them to settle
pub struct TrainingOrchestrator<'a> {
    dispatcher: &'a dyn Dispatcher,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> TrainingOrchestrator<'a> {
    pub fn new(dispatcher: &'a dyn Dispatcher, clock: &'a dyn Clock, policy: PollPolicy) -> Self {
        Self {
            dispatcher,
            clock,
            policy,
        }
    }

    /// Submit a new model and optionally wait for training to finish
    #[instrument(skip(self, parameters, cancel))]
    pub async fn train(
        &self,
        parameters: &TrainingParameters,
        wait: bool,
        cancel: &CancellationToken,
    ) -> ClientResult<TrainingOutcome> {
        let body = parameters.to_request_body()?;
        let response = self
            .dispatcher
            .dispatch(ApiRequest::new(Verb::Post, "", AuthKey::Admin).with_body(body))
            .await?;
        let snapshot = ModelSnapshot::from_response(response)?;

        tracing::info!(
            model_id = %snapshot.id,
            status = %snapshot.status,
            "Training submitted"
        );

        if !wait {
            return Ok(TrainingOutcome {
                snapshot,
                state: TrainingState::Submitted,
            });
        }

        self.wait_for_completion(snapshot, cancel).await
    }

    /// Poll until the model reaches a terminal status, the attempt budget
    /// runs out, or `cancel` fires
    #[instrument(skip(self, snapshot, cancel), fields(model_id = %snapshot.id))]
    pub async fn wait_for_completion(
        &self,
        snapshot: ModelSnapshot,
        cancel: &CancellationToken,
    ) -> ClientResult<TrainingOutcome> {
        let mut current = snapshot;

        if let Some(state) = settled(current.status, 0) {
            return Ok(TrainingOutcome {
                snapshot: current,
                state,
            });
        }

        for attempt in 1..=self.policy.max_attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(
                        polls = attempt - 1,
                        status = %current.status,
                        "Training wait cancelled"
                    );
                    return Ok(TrainingOutcome {
                        snapshot: current,
                        state: TrainingState::Cancelled { polls: attempt - 1 },
                    });
                }
                _ = self.clock.sleep(self.policy.interval) => {}
            }

            current = fetch_status(self.dispatcher, &current.id).await?;

            tracing::debug!(attempt, status = %current.status, "Polled training status");

            if let Some(state) = settled(current.status, attempt) {
                if let TrainingState::Failed { .. } = state {
                    tracing::warn!(
                        status_message = current.status_message.as_deref().unwrap_or_default(),
                        "Training finished with failure status"
                    );
                } else {
                    tracing::info!(polls = attempt, "Training completed");
                }
                return Ok(TrainingOutcome {
                    snapshot: current,
                    state,
                });
            }
        }

        tracing::warn!(
            polls = self.policy.max_attempts,
            status = %current.status,
            "Training did not finish within the poll budget"
        );

        Ok(TrainingOutcome {
            snapshot: current,
            state: TrainingState::TimedOut {
                polls: self.policy.max_attempts,
            },
        })
    }
}

fn settled(status: ModelStatus, polls: u32) -> Option<TrainingState> {
    status.is_terminal().then(|| match status {
        ModelStatus::Failed => TrainingState::Failed { polls },
        _ => TrainingState::Completed { polls },
    })
}
