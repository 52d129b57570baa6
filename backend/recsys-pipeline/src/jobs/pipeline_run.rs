// ============================================
// Pipeline Run (離線推薦批次任務)
// ============================================
//
// One run per evaluation stage (val or test).
//
// Workflow:
// 1. candidates: EventStore -> co-visitation + popularity -> merged candidates
// 2. blend:      candidates + ranker signal -> RRF blended scores
// 3. rerank:     blended scores + catalog -> diversified top-K lists
// 4. submit:     final lists -> submission CSV
//
// Each step publishes its artifact and can be run on its own from the
// artifact of the previous step.
//
// Usage:
//   recsys-pipeline --config config/pipeline.yaml run --stage val

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::models::{
    CandidateScore, CandidateSource, CandidateStats, FusedScore, FusionStats, ItemId, ItemRecord,
    RankedList, RerankStats, Stage, UserId,
};
use crate::output::{write_jsonl_atomic, SubmissionWriter};
use crate::services::diversity::DiversityReranker;
use crate::services::fusion::ScoreFusion;
use crate::services::ranking::{score_candidates, LinearRanker, Ranker, ScoreTable};
use crate::services::recall::RecallLayer;
use crate::store::{read_jsonl, EventStore, FileEventStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Row of `candidates_{stage}.jsonl`. Carries the popularity feature so the
/// blend step can score pairs without re-reading interactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: f64,
    pub source: CandidateSource,
    #[serde(default)]
    pub item_popularity: u64,
}

impl CandidateRow {
    fn candidate(&self) -> CandidateScore {
        CandidateScore {
            user_id: self.user_id,
            item_id: self.item_id,
            score: self.score,
            source: self.source,
        }
    }
}

/// Pipeline run statistics
#[derive(Debug, Clone)]
pub struct PipelineRunStats {
    pub stage: Stage,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub candidates: Option<CandidateStats>,
    pub fusion: Option<FusionStats>,
    pub rerank: Option<RerankStats>,
    pub submission_rows: usize,
    pub total_duration_ms: u64,
}

impl PipelineRunStats {
    fn start(stage: Stage) -> Self {
        Self {
            stage,
            started_at: Some(Utc::now()),
            completed_at: None,
            candidates: None,
            fusion: None,
            rerank: None,
            submission_rows: 0,
            total_duration_ms: 0,
        }
    }
}

/// Pipeline job runner
pub struct PipelineJob {
    config: PipelineConfig,
    ranker: Option<Box<dyn Ranker>>,
}

impl PipelineJob {
    /// Uses the configured linear ranker when `ranker.linear_weights` is set.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let ranker: Option<Box<dyn Ranker>> = match &config.ranker.linear_weights {
            Some(weights) => Some(Box::new(LinearRanker::new(weights.clone())?)),
            None => None,
        };

        Ok(Self { config, ranker })
    }

    /// Replace the in-process ranker.
    pub fn with_ranker(mut self, ranker: Box<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    fn open_store(&self) -> Result<FileEventStore> {
        FileEventStore::open(&self.config.paths.interactions, &self.config.paths.items)
    }

    /// Build, merge and publish candidates from the configured interaction log.
    pub fn candidates(&self, stage: Stage) -> Result<CandidateStats> {
        let store = self.open_store()?;
        let (_, stats) = self.candidates_from(&store, stage)?;
        Ok(stats)
    }

    pub fn candidates_from(
        &self,
        store: &dyn EventStore,
        stage: Stage,
    ) -> Result<(Vec<CandidateRow>, CandidateStats)> {
        let cutoff = self.config.cutoff_ms(stage)?;
        info!(stage = %stage, cutoff = cutoff, "Building candidates");

        let recall = RecallLayer::from_config(&self.config).recall_candidates(store, cutoff)?;
        let rows: Vec<CandidateRow> = recall
            .candidates
            .iter()
            .map(|c| CandidateRow {
                user_id: c.user_id,
                item_id: c.item_id,
                score: c.score,
                source: c.source,
                item_popularity: recall.item_popularity.get(&c.item_id).copied().unwrap_or(0),
            })
            .collect();

        write_jsonl_atomic(&self.config.candidates_path(stage), &rows)?;
        Ok((rows, recall.stats))
    }

    /// Fuse the published candidates with the ranker signal.
    pub fn blend(&self, stage: Stage) -> Result<FusionStats> {
        let rows = self.read_artifact::<CandidateRow>(&self.config.candidates_path(stage))?;
        let (_, stats) = self.blend_rows(&rows, stage)?;
        Ok(stats)
    }

    fn blend_rows(
        &self,
        rows: &[CandidateRow],
        stage: Stage,
    ) -> Result<(Vec<FusedScore>, FusionStats)> {
        let candidates: Vec<CandidateScore> = rows.iter().map(CandidateRow::candidate).collect();

        // Signal B: in-process ranker, else the external score artifact, else none
        let ranker_scores = match self.ranker.as_deref() {
            Some(ranker) => {
                let popularity: HashMap<ItemId, u64> =
                    rows.iter().map(|r| (r.item_id, r.item_popularity)).collect();
                let scores = score_candidates(ranker, &candidates, &popularity)?;
                write_jsonl_atomic(&self.config.inproc_scores_path(stage), &scores)?;
                Some(scores)
            }
            None => ScoreTable::load(&self.config.ranker_scores_path(stage))?,
        };

        let (fused, stats) =
            ScoreFusion::new(self.config.blend.rrf_k).fuse(&candidates, ranker_scores.as_deref())?;

        write_jsonl_atomic(&self.config.blended_path(stage), &fused)?;
        Ok((fused, stats))
    }

    /// Diversify the published blend against the catalog.
    pub fn rerank(&self, stage: Stage) -> Result<RerankStats> {
        let fused = self.read_artifact::<FusedScore>(&self.config.blended_path(stage))?;
        let catalog = self.read_artifact::<ItemRecord>(&self.config.paths.items)?;
        let (_, stats) = self.rerank_fused(&fused, catalog, stage)?;
        Ok(stats)
    }

    fn rerank_fused(
        &self,
        fused: &[FusedScore],
        catalog: Vec<ItemRecord>,
        stage: Stage,
    ) -> Result<(Vec<RankedList>, RerankStats)> {
        let catalog: HashMap<ItemId, ItemRecord> =
            catalog.into_iter().map(|item| (item.item_id, item)).collect();

        let (lists, stats) =
            DiversityReranker::from_config(&self.config).rerank_all(fused, &catalog);

        write_jsonl_atomic(&self.config.final_path(stage), &lists)?;
        Ok((lists, stats))
    }

    /// Write the submission CSV from the published final lists.
    pub fn submit(&self, stage: Stage) -> Result<usize> {
        let lists = self.read_artifact::<RankedList>(&self.config.final_path(stage))?;
        self.write_submission(&lists, stage)
    }

    fn write_submission(&self, lists: &[RankedList], stage: Stage) -> Result<usize> {
        SubmissionWriter::new(self.config.submission.final_topk)
            .write(self.config.submission_path(stage), lists)
    }

    /// All steps end to end against the configured interaction log.
    pub fn run(&self, stage: Stage) -> Result<PipelineRunStats> {
        let store = self.open_store()?;
        self.run_with_store(&store, stage)
    }

    pub fn run_with_store(&self, store: &dyn EventStore, stage: Stage) -> Result<PipelineRunStats> {
        let start_time = Instant::now();
        let mut stats = PipelineRunStats::start(stage);

        info!(stage = %stage, "Starting pipeline run");

        let (rows, candidate_stats) = self.candidates_from(store, stage)?;
        stats.candidates = Some(candidate_stats);

        let (fused, fusion_stats) = self.blend_rows(&rows, stage)?;
        stats.fusion = Some(fusion_stats);

        let (lists, rerank_stats) = self.rerank_fused(&fused, store.items()?, stage)?;
        stats.rerank = Some(rerank_stats);

        stats.submission_rows = self.write_submission(&lists, stage)?;

        stats.completed_at = Some(Utc::now());
        stats.total_duration_ms = start_time.elapsed().as_millis() as u64;

        info!(
            stage = %stage,
            users = stats.submission_rows,
            fusion_mode = stats.fusion.as_ref().map(|f| f.mode.as_str()).unwrap_or("none"),
            duration_ms = stats.total_duration_ms,
            "Pipeline run completed"
        );

        Ok(stats)
    }

    fn read_artifact<T: serde::de::DeserializeOwned>(
        &self,
        path: &std::path::Path,
    ) -> Result<Vec<T>> {
        Ok(read_jsonl(path)?.into_iter().map(|(_, row)| row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE_YAML;
    use crate::error::PipelineError;
    use crate::models::{EventType, FusionMode, InteractionEvent};
    use crate::services::ranking::MockRanker;
    use crate::store::InMemoryEventStore;
    use crate::utils::MS_PER_DAY;
    use std::path::Path;

    fn config_in(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::from_yaml_str(SAMPLE_YAML).unwrap();
        config.paths.interactions = dir.join("interactions.jsonl");
        config.paths.items = dir.join("items.jsonl");
        config.paths.interim_dir = dir.join("interim");
        config.paths.processed_dir = dir.join("processed");
        config.submission.filename_val = dir.join("submission_val.csv");
        config.submission.filename_test = dir.join("submission_test.csv");
        config.submission.final_topk = 3;
        config
    }

    fn store(config: &PipelineConfig) -> InMemoryEventStore {
        let cutoff = config.cutoff_ms(Stage::Val).unwrap();
        let ts = cutoff - MS_PER_DAY;
        let mut events = Vec::new();
        for (user_id, items) in [(1, vec![1, 2, 3]), (2, vec![2, 3, 4]), (3, vec![1, 4])] {
            for (offset, item_id) in items.into_iter().enumerate() {
                events.push(InteractionEvent {
                    user_id,
                    item_id,
                    event_type: EventType::View,
                    timestamp: ts + offset as i64 * 1_000,
                });
            }
        }
        let items = (1..=4)
            .map(|item_id| ItemRecord {
                item_id,
                category_id: Some(item_id % 2),
                brand: Some(format!("brand-{}", item_id % 3)),
                price: None,
            })
            .collect();
        InMemoryEventStore::new(events, items).unwrap()
    }

    #[test]
    fn test_run_without_ranker_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = store(&config);
        let job = PipelineJob::new(config.clone()).unwrap();

        let stats = job.run_with_store(&store, Stage::Val).unwrap();

        assert_eq!(stats.fusion.as_ref().unwrap().mode, FusionMode::Degraded);
        assert_eq!(stats.submission_rows, 3);
        assert!(stats.completed_at.is_some());
        assert!(config.candidates_path(Stage::Val).exists());
        assert!(config.blended_path(Stage::Val).exists());
        assert!(config.final_path(Stage::Val).exists());
    }

    #[test]
    fn test_ranker_invoked_once_per_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = store(&config);

        let expected = PipelineJob::new(config.clone())
            .unwrap()
            .candidates_from(&store, Stage::Val)
            .unwrap()
            .0
            .len();

        let mut ranker = MockRanker::new();
        ranker
            .expect_score()
            .times(expected)
            .returning(|_, item_id, _| Ok(item_id as f64));
        let job = PipelineJob::new(config.clone()).unwrap().with_ranker(Box::new(ranker));

        let stats = job.run_with_store(&store, Stage::Val).unwrap();
        let fusion = stats.fusion.unwrap();

        assert_eq!(fusion.mode, FusionMode::Full);
        assert_eq!(fusion.pairs_with_ranker, expected);
        assert!(config.inproc_scores_path(Stage::Val).exists());
        assert!(!config.ranker_scores_path(Stage::Val).exists());
    }

    #[test]
    fn test_inproc_scores_not_reused_without_ranker() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = store(&config);

        let mut ranker = MockRanker::new();
        ranker.expect_score().returning(|_, item_id, _| Ok(item_id as f64));
        PipelineJob::new(config.clone())
            .unwrap()
            .with_ranker(Box::new(ranker))
            .run_with_store(&store, Stage::Val)
            .unwrap();

        let stats = PipelineJob::new(config.clone())
            .unwrap()
            .run_with_store(&store, Stage::Val)
            .unwrap();

        assert_eq!(stats.fusion.unwrap().mode, FusionMode::Degraded);
    }

    #[test]
    fn test_blend_requires_candidates_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let job = PipelineJob::new(config_in(dir.path())).unwrap();

        let err = job.blend(Stage::Val).unwrap_err();

        assert!(matches!(err, PipelineError::MissingUpstreamArtifact(_)));
    }

    #[test]
    fn test_blend_uses_score_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = store(&config);
        let job = PipelineJob::new(config.clone()).unwrap();
        let (rows, _) = job.candidates_from(&store, Stage::Val).unwrap();

        let scores: Vec<crate::models::ExternalScore> = rows
            .iter()
            .take(2)
            .map(|r| crate::models::ExternalScore {
                user_id: r.user_id,
                item_id: r.item_id,
                score: 1.0,
            })
            .collect();
        write_jsonl_atomic(&config.ranker_scores_path(Stage::Val), &scores).unwrap();

        let stats = job.blend(Stage::Val).unwrap();

        assert_eq!(stats.mode, FusionMode::Full);
        assert_eq!(stats.pairs_with_ranker, 2);
        assert_eq!(stats.fused_pairs, rows.len());
    }
}
