// ============================================
// Batch Jobs Module (批次任務模組)
// ============================================
//
// Stage runners for the offline pipeline, triggered from the command line:
//   recsys-pipeline --config <file> <candidates|blend|rerank|submit|run> --stage <val|test>

pub mod pipeline_run;

pub use pipeline_run::{CandidateRow, PipelineJob, PipelineRunStats};
