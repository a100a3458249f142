use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::{ClientError, ClientResult};

pub mod events;
pub mod table;

pub use events::{SubjectRequest, TransactionTable, UsageEvent, UserEvents, UserInput};
pub use table::{Cell, RecommendationRow, ResultTable, ScoredItem};

/// Training status reported by the service
///
/// `Created → Training → Completed | Failed`. Statuses this client does not
/// know about deserialize as `Unknown` rather than failing the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModelStatus {
    Created,
    #[serde(alias = "InProgress")]
    Training,
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ModelStatus {
    /// No further transitions happen once a model reaches one of these
    pub fn is_terminal(self) -> bool {
        matches!(self, ModelStatus::Completed | ModelStatus::Failed)
    }
}

impl Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelStatus::Created => "Created",
            ModelStatus::Training => "Training",
            ModelStatus::Completed => "Completed",
            ModelStatus::Failed => "Failed",
            ModelStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Last-known metadata of a hosted model
///
/// Deserializes straight from the service's model descriptor. A handle never
/// edits one of these in place; a refresh builds a new snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(rename = "modelStatus", default)]
    pub status: ModelStatus,
    #[serde(rename = "modelStatusMessage", default)]
    pub status_message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: BTreeMap<String, Value>,
    /// Opaque training statistics, passed through as returned
    #[serde(default)]
    pub statistics: Option<Value>,
}

impl ModelSnapshot {
    /// Parse a model descriptor returned by the service
    pub fn from_response(value: Value) -> ClientResult<Self> {
        let snapshot: ModelSnapshot = serde_json::from_value(value)
            .map_err(|e| ClientError::Decode(format!("Invalid model descriptor: {}", e)))?;

        if snapshot.id.is_empty() {
            return Err(ClientError::Decode(
                "Model descriptor has an empty id".to_string(),
            ));
        }

        Ok(snapshot)
    }
}

/// Reject ids that cannot stand as a single URL path segment
pub fn validate_model_id(model_id: &str) -> ClientResult<()> {
    if model_id.trim().is_empty() {
        return Err(ClientError::InvalidInput(
            "Model id cannot be empty".to_string(),
        ));
    }
    if model_id.contains(['/', '?', '#', '%']) {
        return Err(ClientError::InvalidInput(format!(
            "Model id `{}` contains a reserved URL character",
            model_id
        )));
    }
    Ok(())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// How co-occurrences are counted during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CooccurrenceUnit {
    User,
    Timestamp,
}

/// Item-to-item similarity measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityFunction {
    Jaccard,
    Cooccurrence,
    Lift,
}

/// Parameters for a new training run
///
/// Every field is optional. The service treats a present key as meaningful,
/// so unset fields are stripped from the request body instead of being sent
/// as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingParameters {
    pub description: Option<String>,
    pub blob_container_name: Option<String>,
    pub usage_relative_path: Option<String>,
    pub catalog_file_relative_path: Option<String>,
    pub evaluation_usage_relative_path: Option<String>,
    pub support_threshold: Option<u32>,
    pub cooccurrence_unit: Option<CooccurrenceUnit>,
    pub similarity_function: Option<SimilarityFunction>,
    pub enable_cold_item_placement: Option<bool>,
    pub enable_cold_to_cold_recommendations: Option<bool>,
    pub enable_user_affinity: Option<bool>,
    pub enable_user_to_item_recommendations: Option<bool>,
    pub allow_seed_items_in_recommendations: Option<bool>,
    pub enable_backfilling: Option<bool>,
    pub decay_period_in_days: Option<u32>,
    /// Settings without a dedicated field, sent as-is
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TrainingParameters {
    /// JSON body for the training request, with unset entries removed
    pub fn to_request_body(&self) -> ClientResult<Value> {
        let mut body = serde_json::to_value(self)?;

        if let Value::Object(map) = &mut body {
            map.retain(|_, v| !v.is_null());
        }

        Ok(body)
    }
}
