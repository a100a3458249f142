use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    config::Config,
    error::{ClientError, ClientResult},
    models::{validate_model_id, ModelSnapshot, ResultTable, TrainingParameters, UserInput},
    services::{
        dispatcher::{ApiRequest, AuthKey, Dispatcher, HttpDispatcher, Verb},
        recommendations::RecommendationBatcher,
        training::{fetch_status, Clock, PollPolicy, TokioClock, TrainingOrchestrator, TrainingState},
    },
};

const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Asks the operator before a destructive call
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirmer for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Confirmation refused; nothing was sent
    Declined,
}

/// Where a handle's model comes from
#[derive(Debug, Clone)]
pub enum ModelSource {
    Existing(String),
    Train {
        parameters: TrainingParameters,
        wait: bool,
    },
}

/// Entry point: one recommendation service and its credentials
#[derive(Clone)]
pub struct RecommendationService {
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    max_concurrent: usize,
}

impl RecommendationService {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            clock: Arc::new(TokioClock),
            policy: PollPolicy::default(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    pub fn from_config(config: &Config) -> ClientResult<Self> {
        let dispatcher = HttpDispatcher::new(
            models_url(&config.service_url),
            config.admin_key.clone(),
            config.recommendation_key.clone(),
            config.request_timeout(),
        )?;

        Ok(Self::new(Arc::new(dispatcher))
            .with_poll_policy(config.poll_policy())
            .with_max_concurrent(config.max_concurrent_requests))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// All models hosted by the service
    #[instrument(skip(self))]
    pub async fn list_models(&self) -> ClientResult<Vec<ModelSnapshot>> {
        let response = self
            .dispatcher
            .dispatch(ApiRequest::new(Verb::Get, "", AuthKey::Admin))
            .await?;

        let list = match response {
            serde_json::Value::Object(mut map) => map
                .remove("models")
                .ok_or_else(|| ClientError::Decode("Model list missing `models`".to_string()))?,
            other => other,
        };

        let models = match list {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(ModelSnapshot::from_response)
                .collect::<ClientResult<Vec<_>>>()?,
            serde_json::Value::Null => Vec::new(),
            other => {
                return Err(ClientError::Decode(format!(
                    "Unexpected model list payload: {}",
                    other
                )))
            }
        };

        tracing::info!(count = models.len(), "Listed models");
        Ok(models)
    }

    /// Handle for a model that already exists on the service
    #[instrument(skip(self))]
    pub async fn attach(&self, model_id: &str) -> ClientResult<ModelHandle> {
        validate_model_id(model_id)?;

        let snapshot = fetch_status(self.dispatcher.as_ref(), model_id).await?;
        tracing::info!(model_id = %snapshot.id, status = %snapshot.status, "Attached to model");
        Ok(self.handle(snapshot))
    }

    /// Submit a new model; with `wait`, poll until training settles
    pub async fn train(
        &self,
        parameters: &TrainingParameters,
        wait: bool,
        cancel: &CancellationToken,
    ) -> ClientResult<(ModelHandle, TrainingState)> {
        let orchestrator =
            TrainingOrchestrator::new(self.dispatcher.as_ref(), self.clock.as_ref(), self.policy);
        let outcome = orchestrator.train(parameters, wait, cancel).await?;
        Ok((self.handle(outcome.snapshot), outcome.state))
    }

    /// Attach to an existing model or train a new one
    ///
    /// The training state is `None` when attaching.
    pub async fn create_or_attach(
        &self,
        source: ModelSource,
        cancel: &CancellationToken,
    ) -> ClientResult<(ModelHandle, Option<TrainingState>)> {
        match source {
            ModelSource::Existing(id) => Ok((self.attach(&id).await?, None)),
            ModelSource::Train { parameters, wait } => {
                let (handle, state) = self.train(&parameters, wait, cancel).await?;
                Ok((handle, Some(state)))
            }
        }
    }

    fn handle(&self, snapshot: ModelSnapshot) -> ModelHandle {
        ModelHandle {
            model_id: snapshot.id.clone(),
            dispatcher: self.dispatcher.clone(),
            clock: self.clock.clone(),
            policy: self.policy,
            max_concurrent: self.max_concurrent,
            snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }
}

/// Model collection endpoint under a service root
pub fn models_url(service_url: &str) -> String {
    format!("{}/api/models", service_url.trim_end_matches('/'))
}

/// A hosted model
///
/// Recommendation calls never touch the cached snapshot. Refreshes swap in a
/// whole new snapshot, so readers always see a consistent record. After
/// `delete` the handle refers to nothing and should be dropped.
#[derive(Clone)]
pub struct ModelHandle {
    model_id: String,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    max_concurrent: usize,
    snapshot: Arc<RwLock<Arc<ModelSnapshot>>>,
}

impl ModelHandle {
    pub fn id(&self) -> &str {
        &self.model_id
    }

    /// Last-known metadata
    pub async fn snapshot(&self) -> Arc<ModelSnapshot> {
        self.snapshot.read().await.clone()
    }

    async fn store(&self, snapshot: ModelSnapshot) -> Arc<ModelSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().await = snapshot.clone();
        snapshot
    }

    /// Fetch current status and metadata from the service
    #[instrument(skip(self), fields(model_id = %self.model_id))]
    pub async fn refresh_status(&self) -> ClientResult<Arc<ModelSnapshot>> {
        let snapshot = fetch_status(self.dispatcher.as_ref(), &self.model_id).await?;
        tracing::debug!(status = %snapshot.status, "Model status refreshed");
        Ok(self.store(snapshot).await)
    }

    /// Poll a previously submitted model until training settles
    pub async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
    ) -> ClientResult<TrainingState> {
        let orchestrator =
            TrainingOrchestrator::new(self.dispatcher.as_ref(), self.clock.as_ref(), self.policy);
        let current = self.snapshot().await.as_ref().clone();
        let outcome = orchestrator.wait_for_completion(current, cancel).await?;
        self.store(outcome.snapshot).await;
        Ok(outcome.state)
    }

    pub async fn user_recommendations(&self, input: UserInput, k: usize) -> ClientResult<ResultTable> {
        self.batcher().user_recommendations(input, k).await
    }

    pub async fn item_recommendations<I, S>(&self, items: I, k: usize) -> ClientResult<ResultTable>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.batcher().item_recommendations(items, k).await
    }

    /// Make this the service's default model
    #[instrument(skip(self), fields(model_id = %self.model_id))]
    pub async fn set_default(&self) -> ClientResult<()> {
        self.dispatcher
            .dispatch(
                ApiRequest::new(Verb::Put, "default", AuthKey::Admin)
                    .with_query("modelId", &self.model_id),
            )
            .await?;
        tracing::info!("Default model updated");
        Ok(())
    }

    /// Delete the model on the service, asking `confirmer` first if given
    #[instrument(skip(self, confirmer), fields(model_id = %self.model_id))]
    pub async fn delete(&self, confirmer: Option<&dyn Confirmer>) -> ClientResult<DeleteOutcome> {
        validate_model_id(&self.model_id)?;
        if let Some(confirmer) = confirmer {
            let prompt = format!("Delete model {}?", self.model_id);
            if !confirmer.confirm(&prompt) {
                tracing::info!("Model deletion declined");
                return Ok(DeleteOutcome::Declined);
            }
        }

        self.dispatcher
            .dispatch(ApiRequest::new(Verb::Delete, self.model_id.as_str(), AuthKey::Admin))
            .await?;

        tracing::info!("Model deleted");
        Ok(DeleteOutcome::Deleted)
    }

    fn batcher(&self) -> RecommendationBatcher<'_> {
        RecommendationBatcher::new(self.dispatcher.as_ref(), &self.model_id, self.max_concurrent)
    }
}
