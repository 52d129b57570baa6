pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod output;
pub mod services;
pub mod store;
pub mod utils;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use jobs::{PipelineJob, PipelineRunStats};
pub use models::Stage;
pub use services::{
    CandidateMerger, CoVisitationBuilder, DiversityReranker, PopularityBuilder, RecallLayer,
    ScoreFusion,
};
pub use store::{EventStore, FileEventStore, InMemoryEventStore, TimeRange};
