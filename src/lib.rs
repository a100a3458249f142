//! Client for a hosted personalized-recommendation service.
//!
//! Trains and manages models through the service's HTTP API and turns
//! per-user and per-item recommendation replies into fixed-width tables.

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use models::{
    Cell, ModelSnapshot, ModelStatus, ResultTable, TrainingParameters, TransactionTable,
    UsageEvent, UserInput,
};
pub use services::{
    ModelHandle, ModelSource, RecommendationService, TrainingState,
};
