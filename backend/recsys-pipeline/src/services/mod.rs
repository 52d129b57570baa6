pub mod diversity;
pub mod fusion;
pub mod ranking;
pub mod recall;

pub use diversity::DiversityReranker;
pub use fusion::ScoreFusion;
pub use ranking::{LinearRanker, Ranker, ScoreTable};
pub use recall::{CandidateMerger, CoVisitationBuilder, PopularityBuilder, RecallLayer};
