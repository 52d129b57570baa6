use crate::error::{PipelineError, Result};
use crate::models::{EventType, Stage};
use crate::services::ranking::CandidateFeatures;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub time: TimeConfig,
    #[serde(default)]
    pub event_type_weight: HashMap<EventType, f64>,
    pub candidates: CandidatesConfig,
    pub blend: BlendConfig,
    pub diversity: DiversityConfig,
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub ranker: RankerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub interactions: PathBuf,
    pub items: PathBuf,
    pub interim_dir: PathBuf,
    pub processed_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeConfig {
    /// Cutoff of the val stage: `YYYY-MM-DD` (UTC midnight), RFC 3339, or epoch ms.
    pub val_start: String,
    pub test_start: String,
    pub decay_half_life_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidatesConfig {
    pub history_window_days: u32,
    pub topk_per_anchor: usize,
    pub per_user_from_covis: usize,
    pub per_user_from_pop: usize,
    /// Most recent distinct items used as co-visitation anchors
    pub recent_anchors: usize,
    /// Events kept per user (most recent) before the pairwise expansion
    pub max_events_per_user: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlendConfig {
    pub rrf_k: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiversityConfig {
    pub mmr_lambda: f64,
    pub max_per_brand: usize,
    pub max_per_category: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    pub final_topk: usize,
    pub filename_val: PathBuf,
    pub filename_test: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RankerConfig {
    /// In-process linear scorer over `CandidateFeatures`; when absent the score artifact is used.
    #[serde(default)]
    pub linear_weights: Option<Vec<f64>>,
}

impl PipelineConfig {
    /// Load from a YAML file, overlaid with `RECSYS_*` environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        if !path.exists() {
            return Err(PipelineError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let builder = Self::with_defaults(config::Config::builder())?
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("RECSYS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::finish(builder.build()?)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let builder = Self::with_defaults(config::Config::builder())?
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml));

        Self::finish(builder.build()?)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            .set_default("blend.rrf_k", 60)?
            .set_default("candidates.recent_anchors", 20)?
            .set_default("candidates.max_events_per_user", 200)?)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: PipelineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));

        if self.time.decay_half_life_days == 0 {
            return fail("time.decay_half_life_days must be greater than 0".to_string());
        }

        if self.candidates.history_window_days == 0 {
            return fail("candidates.history_window_days must be greater than 0".to_string());
        }

        if self.candidates.topk_per_anchor == 0 {
            return fail("candidates.topk_per_anchor must be greater than 0".to_string());
        }

        if self.candidates.recent_anchors == 0 {
            return fail("candidates.recent_anchors must be greater than 0".to_string());
        }

        if self.candidates.max_events_per_user < 2 {
            return fail("candidates.max_events_per_user must be at least 2".to_string());
        }

        if self.blend.rrf_k == 0 {
            return fail("blend.rrf_k must be greater than 0".to_string());
        }

        let lambda = self.diversity.mmr_lambda;
        if !lambda.is_finite() || !(0.0..=1.0).contains(&lambda) {
            return fail(format!("diversity.mmr_lambda must be in [0, 1], got {}", lambda));
        }

        if self.submission.final_topk == 0 {
            return fail("submission.final_topk must be greater than 0".to_string());
        }

        for (event_type, weight) in &self.event_type_weight {
            if !weight.is_finite() || *weight <= 0.0 {
                return fail(format!(
                    "event_type_weight.{} must be a positive number, got {}",
                    event_type.as_str(),
                    weight
                ));
            }
        }

        if let Some(weights) = &self.ranker.linear_weights {
            if weights.len() != CandidateFeatures::LEN {
                return fail(format!(
                    "ranker.linear_weights must have {} entries, got {}",
                    CandidateFeatures::LEN,
                    weights.len()
                ));
            }
            if weights.iter().any(|w| !w.is_finite()) {
                return fail("ranker.linear_weights must be finite".to_string());
            }
        }

        for stage in [Stage::Val, Stage::Test] {
            self.cutoff_ms(stage)?;
        }

        Ok(())
    }

    /// Exclusive upper bound of the interaction window for a stage, epoch ms.
    pub fn cutoff_ms(&self, stage: Stage) -> Result<i64> {
        let raw = match stage {
            Stage::Val => &self.time.val_start,
            Stage::Test => &self.time.test_start,
        };
        parse_cutoff(raw).map_err(|msg| {
            PipelineError::Configuration(format!("time.{}_start: {}", stage.as_str(), msg))
        })
    }

    pub fn candidates_path(&self, stage: Stage) -> PathBuf {
        self.paths
            .interim_dir
            .join(format!("candidates_{}.jsonl", stage))
    }

    pub fn ranker_scores_path(&self, stage: Stage) -> PathBuf {
        self.paths
            .processed_dir
            .join(format!("scores_{}.jsonl", stage))
    }

    /// Scores from the in-process ranker. Kept apart from `ranker_scores_path`
    /// so a later run without a ranker never picks them up as external input.
    pub fn inproc_scores_path(&self, stage: Stage) -> PathBuf {
        self.paths
            .processed_dir
            .join(format!("inproc_scores_{}.jsonl", stage))
    }

    pub fn blended_path(&self, stage: Stage) -> PathBuf {
        self.paths
            .processed_dir
            .join(format!("blended_{}.jsonl", stage))
    }

    pub fn final_path(&self, stage: Stage) -> PathBuf {
        self.paths
            .processed_dir
            .join(format!("final_{}.jsonl", stage))
    }

    pub fn submission_path(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Val => &self.submission.filename_val,
            Stage::Test => &self.submission.filename_test,
        }
    }
}

fn parse_cutoff(raw: &str) -> std::result::Result<i64, String> {
    let raw = raw.trim();

    if let Ok(ms) = raw.parse::<i64>() {
        if ms < 0 {
            return Err(format!("negative epoch milliseconds: {}", ms));
        }
        return Ok(ms);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.timestamp_millis());
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| format!("cannot parse '{}': {}", raw, e))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date: {}", raw))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}
