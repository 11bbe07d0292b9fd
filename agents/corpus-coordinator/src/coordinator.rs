//! Coordinator core
//!
//! Owns every piece of mutable state behind the single-writer critical
//! section: counters, logs, the instruction table, and the signature
//! buffer. Target generation and TOON encoding happen inside
//! `next_instruction` so counters only advance once a target is produced
//! and logged; submission validation runs outside the section on a staged
//! copy of the locked instruction and commits separately.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::axes::{QuotaProfile, Topic, AXIS_NAMES};
use crate::codec::{normalize_toon, ToonCodec, ToonGateway};
use crate::config::CoordinatorConfig;
use crate::contracts::{
    instruction_id, BucketProgress, CoverageSnapshot, HealthSnapshot, InstructionRecord,
    IssuedInstruction, NextInstructionResponse, SubmissionChecks, SubmissionRecord, SubmitResponse,
};
use crate::error::{CoordinatorError, RejectionKind, Result};
use crate::generator::TargetGenerator;
use crate::names::NamePool;
use crate::prompt;
use crate::scheduler::QuotaScheduler;
use crate::schema::SchemaIndex;
use crate::seeds::{load_seed_cases, SeedCase};
use crate::store::StateStore;
use crate::validator::{normalize_text, ComparisonRef, SubmissionValidator};

/// Everything a submission needs for validation outside the critical section
#[derive(Debug)]
pub struct StagedSubmission {
    pub instruction: InstructionRecord,
    recent: Vec<(String, String)>,
    seeds: Arc<Vec<SeedCase>>,
    validator: SubmissionValidator,
    codec: ToonGateway,
}

impl StagedSubmission {
    /// Decode the locked target and run the hard and soft checks; returns
    /// the normalized text, the locked TOON, and the recorded checks
    pub async fn validate(&self, case_text: &str) -> Result<(String, String, SubmissionChecks)> {
        let case_text = normalize_text(case_text);
        if case_text.is_empty() {
            return Err(CoordinatorError::rejection(
                RejectionKind::InvalidRequest,
                "case_text is empty",
            ));
        }
        let target_toon = normalize_toon(&self.instruction.server_target_toon)?;
        let decoded: Value = self.codec.decode(&target_toon).await?;
        self.validator.enforce(&case_text, &decoded)?;

        let references = self
            .seeds
            .iter()
            .map(|seed| ComparisonRef {
                id: &seed.case_id,
                text: &seed.text,
            })
            .chain(self.recent.iter().map(|(id, text)| ComparisonRef {
                id: id.as_str(),
                text: text.as_str(),
            }));
        let checks = self.validator.screen(&case_text, references);
        Ok((case_text, target_toon, checks))
    }
}

/// The single-writer coordinator state
pub struct Coordinator {
    config: CoordinatorConfig,
    generation_target: u64,
    scheduler: QuotaScheduler,
    generator: TargetGenerator,
    validator: SubmissionValidator,
    store: StateStore,
    codec: ToonGateway,
    seeds: Arc<Vec<SeedCase>>,
    issued: Vec<InstructionRecord>,
    submitted: Vec<SubmissionRecord>,
    submitted_ids: HashSet<String>,
    forced_topic: Option<Topic>,
}

impl Coordinator {
    /// Load the schema, replay the state directory, and reconcile counters;
    /// any failure here is fatal at startup
    pub fn bootstrap(config: CoordinatorConfig, codec: Arc<dyn ToonCodec>) -> Result<Self> {
        let index = Arc::new(SchemaIndex::load(&config.master_schema_file)?);
        info!(
            schema = %config.master_schema_file.display(),
            leaves = index.leaf_count(),
            "master schema indexed"
        );

        let seeds = match &config.corpus_file {
            Some(path) => load_seed_cases(path)?,
            None => Vec::new(),
        };
        let pool = match &config.names_file {
            Some(path) => NamePool::from_file(path)?,
            None => NamePool::builtin(),
        };

        let mut profile = QuotaProfile::with_defaults();
        profile.apply_overrides(&config.share_overrides)?;
        let forced_topic = match &config.force_primary_topic {
            Some(key) => Some(Topic::from_key(key).ok_or_else(|| {
                CoordinatorError::config(format!("unknown force_primary_topic: {key}"))
            })?),
            None => None,
        };

        let store = StateStore::open(&config.state_dir)?;
        let (issued, submitted) = store.load_state()?;
        let mut scheduler = QuotaScheduler::new(profile, config.signature_window);
        scheduler.restore(&issued);
        let submitted_ids: HashSet<String> = submitted
            .iter()
            .map(|record| record.instruction_id.clone())
            .collect();

        let generation_target = config.resolved_generation_target(seeds.len());
        let validator =
            SubmissionValidator::new(config.similarity_threshold, config.similarity_window);
        info!(
            state_dir = %config.state_dir.display(),
            issued = issued.len(),
            submitted = submitted.len(),
            seeds = seeds.len(),
            generation_target,
            "coordinator state replayed"
        );

        let coordinator = Coordinator {
            generator: TargetGenerator::new(index, pool),
            config,
            generation_target,
            scheduler,
            validator,
            store,
            codec: ToonGateway::new(codec),
            seeds: Arc::new(seeds),
            issued,
            submitted,
            submitted_ids,
            forced_topic,
        };
        coordinator.refresh_dashboards()?;
        Ok(coordinator)
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            ok: true,
            target_total_cases: self.config.target_total_cases,
            generation_target: self.generation_target,
            seed_cases: self.seeds.len(),
            issued: self.issued.len() as u64,
            submitted: self.submitted.len() as u64,
        }
    }

    /// Counters and per-axis coverage; hard-negative axes are scaled to the
    /// hard-negative slice of the generation target
    pub fn coverage(&self) -> CoverageSnapshot {
        let generation_target = self.generation_target;
        let hard_share = self
            .scheduler
            .profile()
            .shares("complexity")
            .get("hard_negative")
            .copied()
            .unwrap_or(0.0);
        let hard_base = generation_target as f64 * hard_share;

        let mut axes = std::collections::BTreeMap::new();
        for axis in AXIS_NAMES {
            let base = if axis.starts_with("hard_negative") {
                hard_base
            } else {
                generation_target as f64
            };
            let mut buckets = std::collections::BTreeMap::new();
            for (bucket, share) in self.scheduler.profile().shares(axis) {
                let target_count = round1(base * share);
                let current = self.scheduler.counters().count(axis, bucket);
                buckets.insert(
                    bucket.clone(),
                    BucketProgress {
                        target_share: *share,
                        target_count,
                        current,
                        gap: round1(target_count - current as f64),
                    },
                );
            }
            axes.insert((*axis).to_string(), buckets);
        }

        CoverageSnapshot {
            target_total_cases: self.config.target_total_cases,
            generation_target,
            seed_cases: self.seeds.len(),
            issued: self.issued.len() as u64,
            submitted: self.submitted.len() as u64,
            remaining: generation_target.saturating_sub(self.submitted.len() as u64),
            axes,
        }
    }

    /// Draw axes, generate and lock a target, persist, and return the
    /// public instruction; nothing advances when generation fails
    pub async fn next_instruction(
        &mut self,
        agent_id: Option<String>,
        topic: Option<String>,
    ) -> Result<NextInstructionResponse> {
        if self.generation_target > 0 && self.submitted.len() as u64 >= self.generation_target {
            return Ok(NextInstructionResponse::Exhausted {
                done: true,
                message: "generation_target reached".to_string(),
                coverage: self.coverage(),
            });
        }

        let force_topic = match topic {
            Some(key) => Some(Topic::from_key(key.trim()).ok_or_else(|| {
                CoordinatorError::rejection(
                    RejectionKind::InvalidRequest,
                    format!("unknown topic: {key}"),
                )
            })?),
            None => self.forced_topic,
        };

        let sequence = self.issued.len() as u64 + 1;
        let mut draw_rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(sequence));
        let selection = self.scheduler.draw(&mut draw_rng, force_topic)?;

        let mut last_reason = "no attempt ran".to_string();
        let mut locked: Option<(Value, String)> = None;
        for attempt in 1..=self.config.max_generation_attempts {
            let attempt_seed = self
                .config
                .seed
                .wrapping_mul(1000)
                .wrapping_add(sequence.wrapping_mul(100))
                .wrapping_add(u64::from(attempt));
            let mut rng = StdRng::seed_from_u64(attempt_seed);
            let payload = match self.generator.attempt(&selection, &mut rng) {
                Ok(payload) => payload,
                Err(reason) => {
                    debug!(attempt, %reason, "generation attempt rejected");
                    last_reason = reason;
                    continue;
                }
            };
            match self.codec.encode_verified(&payload).await {
                Ok(toon) => {
                    locked = Some((payload, toon));
                    break;
                }
                Err(err) => {
                    debug!(attempt, error = %err, "codec rejected candidate");
                    last_reason = err.to_string();
                }
            }
        }
        let Some((_, target_toon)) = locked else {
            warn!(signature = %selection.signature(), %last_reason, "generation exhausted");
            return Err(CoordinatorError::GenerationExhausted {
                attempts: self.config.max_generation_attempts,
                reason: last_reason,
            });
        };

        let must_include = prompt::must_include(&selection);
        let must_avoid = prompt::must_avoid(&selection);
        let examples = prompt::pick_reference_examples(
            &self.seeds,
            selection.primary_topic,
            selection.secondary_topic,
            &mut draw_rng,
        );
        let base_prompt = prompt::render_prompt(&selection, &examples, &must_include, &must_avoid);
        let full_prompt = prompt::augment_with_target(&base_prompt, &target_toon);

        let record = InstructionRecord {
            instruction_id: instruction_id(sequence),
            agent_id: agent_id.clone(),
            issued_at: Utc::now(),
            signature: selection.signature(),
            dimensions: selection.clone(),
            server_target_toon: target_toon.clone(),
            prompt: full_prompt.clone(),
            must_include: must_include.clone(),
            must_avoid: must_avoid.clone(),
            submitted: false,
        };

        // Commit order: log first (the durability point), then the audit
        // file, counters, and dashboards.
        self.store.append_instruction(&record)?;
        self.store.write_instruction_file(&record, None)?;
        self.scheduler.commit(&selection);
        self.issued.push(record.clone());
        self.refresh_dashboards()?;
        info!(
            instruction_id = %record.instruction_id,
            signature = %record.signature,
            "instruction issued"
        );

        Ok(NextInstructionResponse::Issued(IssuedInstruction {
            instruction_id: record.instruction_id,
            target_toon,
            prompt: full_prompt,
            must_include,
            must_avoid,
            agent_id,
        }))
    }

    /// Snapshot everything a submission needs so validation can run outside
    /// the critical section
    pub fn stage_submission(&self, instruction_id: &str) -> Result<StagedSubmission> {
        let instruction = self
            .issued
            .iter()
            .find(|record| record.instruction_id == instruction_id)
            .ok_or_else(|| {
                CoordinatorError::rejection(
                    RejectionKind::UnknownInstruction,
                    format!("unknown instruction: {instruction_id}"),
                )
            })?;
        if self.submitted_ids.contains(instruction_id) {
            return Err(CoordinatorError::rejection(
                RejectionKind::AlreadySubmitted,
                format!("instruction already submitted: {instruction_id}"),
            ));
        }
        let recent = self
            .submitted
            .iter()
            .rev()
            .take(self.validator.similarity_window)
            .map(|record| (record.instruction_id.clone(), record.case_text.clone()))
            .collect();
        Ok(StagedSubmission {
            instruction: instruction.clone(),
            recent,
            seeds: Arc::clone(&self.seeds),
            validator: self.validator.clone(),
            codec: self.codec.clone(),
        })
    }

    /// Commit a validated submission; duplicates are re-checked here since
    /// validation ran outside the lock
    pub fn commit_submission(
        &mut self,
        staged: &StagedSubmission,
        agent_id: Option<String>,
        case_text: String,
        target_toon: String,
        checks: SubmissionChecks,
    ) -> Result<SubmitResponse> {
        let id = staged.instruction.instruction_id.clone();
        if self.submitted_ids.contains(&id) {
            return Err(CoordinatorError::rejection(
                RejectionKind::AlreadySubmitted,
                format!("instruction already submitted: {id}"),
            ));
        }
        let record = SubmissionRecord {
            instruction_id: id.clone(),
            agent_id: agent_id.or_else(|| staged.instruction.agent_id.clone()),
            submitted_at: Utc::now(),
            case_text,
            target_toon,
            dimensions: staged.instruction.dimensions.clone(),
            checks: checks.clone(),
        };

        self.store.append_submission(&record)?;
        self.store.write_submission_file(&record)?;
        if let Some(instruction) = self
            .issued
            .iter_mut()
            .find(|instruction| instruction.instruction_id == id)
        {
            instruction.submitted = true;
            let instruction = instruction.clone();
            self.store.write_instruction_file(&instruction, Some(&record))?;
        }
        self.submitted_ids.insert(id.clone());
        self.submitted.push(record);
        self.store
            .write_training_exports(&self.submitted, &self.seeds)?;
        self.refresh_dashboards()?;
        info!(instruction_id = %id, "submission accepted");

        Ok(SubmitResponse {
            accepted: true,
            checks,
        })
    }

    fn refresh_dashboards(&self) -> Result<()> {
        self.store.write_counters(
            self.scheduler.counters(),
            self.issued.len() as u64,
            self.submitted.len() as u64,
        )?;
        self.store.write_summary(&self.coverage())
    }

    /// Read-only view of the issued instruction table
    pub fn issued_records(&self) -> &[InstructionRecord] {
        &self.issued
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IndentCodec;
    use std::path::Path;

    fn test_config(state_dir: &Path, schema_file: &Path) -> CoordinatorConfig {
        CoordinatorConfig {
            state_dir: state_dir.to_path_buf(),
            master_schema_file: schema_file.to_path_buf(),
            target_total_cases: 10,
            seed: 1,
            ..CoordinatorConfig::default()
        }
    }

    fn write_fixture_schema(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("master_schema.json");
        std::fs::write(&path, include_str!("../tests/fixtures/master_schema.json")).unwrap();
        path
    }

    #[tokio::test]
    async fn test_issue_then_commit_advances_counters() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixture_schema(dir.path());
        let config = test_config(&dir.path().join("state"), &schema);
        let mut coordinator = Coordinator::bootstrap(config, Arc::new(IndentCodec)).unwrap();

        let response = coordinator.next_instruction(None, None).await.unwrap();
        let NextInstructionResponse::Issued(issued) = response else {
            panic!("expected an issued instruction");
        };
        assert_eq!(issued.instruction_id, "INS-0001");
        assert!(issued.prompt.contains("TOON:"));
        assert_eq!(coordinator.health().issued, 1);
        assert_eq!(coordinator.health().submitted, 0);

        // Counters on every axis sum to the issued total.
        for axis in ["persona", "voice", "complexity", "primary_topic"] {
            assert_eq!(coordinator.scheduler.counters().total(axis), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_generation_advances_nothing() {
        struct BrokenCodec;
        #[async_trait::async_trait]
        impl ToonCodec for BrokenCodec {
            async fn encode(&self, _payload: &Value) -> Result<String> {
                Err(CoordinatorError::codec("boom"))
            }
            async fn decode(&self, _toon: &str) -> Result<Value> {
                Err(CoordinatorError::codec("boom"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixture_schema(dir.path());
        let mut config = test_config(&dir.path().join("state"), &schema);
        config.max_generation_attempts = 3;
        let mut coordinator = Coordinator::bootstrap(config, Arc::new(BrokenCodec)).unwrap();

        let err = coordinator.next_instruction(None, None).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(coordinator.health().issued, 0);
        assert_eq!(coordinator.scheduler.counters().total("persona"), 0);
        assert!(!dir.path().join("state/issued_instructions.jsonl").exists());
    }

    #[tokio::test]
    async fn test_unknown_topic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let schema = write_fixture_schema(dir.path());
        let config = test_config(&dir.path().join("state"), &schema);
        let mut coordinator = Coordinator::bootstrap(config, Arc::new(IndentCodec)).unwrap();
        let err = coordinator
            .next_instruction(None, Some("cosmologie".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::InvalidRequest));
    }
}
