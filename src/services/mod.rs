pub mod dispatcher;
pub mod model;
pub mod normalizer;
pub mod recommendations;
pub mod training;

pub use dispatcher::{ApiRequest, AuthKey, Dispatcher, HttpDispatcher, Verb, AUTH_HEADER};
pub use model::{
    models_url, Confirmer, DeleteOutcome, ModelHandle, ModelSource, RecommendationService,
};
pub use normalizer::normalize;
pub use recommendations::RecommendationBatcher;
pub use training::{
    cancel_after, Clock, PollPolicy, TokioClock, TrainingOrchestrator, TrainingOutcome,
    TrainingState,
};
