//! Persistence layer
//!
//! All durable state lives under one directory: two append-only JSONL logs
//! (instructions, submissions), per-record audit files, counters, summary
//! dashboards, and the training exports. Log appends are write-then-fsync;
//! every rewrite goes through a temp file and an atomic rename, so counters
//! and summaries can always be reconstructed by replaying the logs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::contracts::{
    CoverageSnapshot, InstructionRecord, SubmissionRecord, TrainingRecord,
    PAIR_TRAINING_SYSTEM_PROMPT,
};
use crate::error::{CoordinatorError, Result};
use crate::scheduler::AxisCounters;
use crate::seeds::SeedCase;

const ISSUED_FILENAME: &str = "issued_instructions.jsonl";
const SUBMITTED_FILENAME: &str = "generated_cases.jsonl";
const GENERATED_TRAIN_FILENAME: &str = "generated_cases_train_mistral.jsonl";
const FULL_TRAIN_FILENAME: &str = "full_training_cases_mistral.jsonl";
const SUMMARY_JSON_FILENAME: &str = "summary.json";
const SUMMARY_MD_FILENAME: &str = "summary.md";
const COUNTERS_FILENAME: &str = "counters.json";
const LEGACY_LAST_INSTRUCTION: &str = "_last_instruction.json";
const LEGACY_TARGET_FIELD: &str = "target_json";

#[derive(Serialize)]
struct CountersFile<'a> {
    issued: u64,
    submitted: u64,
    #[serde(flatten)]
    counters: &'a AxisCounters,
}

/// Handle over the state directory
pub struct StateStore {
    root: PathBuf,
    instructions_dir: PathBuf,
    submissions_dir: PathBuf,
}

impl StateStore {
    /// Create the directory layout; failure here is fatal at startup
    pub fn open(root: &Path) -> Result<Self> {
        let store = StateStore {
            root: root.to_path_buf(),
            instructions_dir: root.join("instructions"),
            submissions_dir: root.join("submissions"),
        };
        for dir in [&store.root, &store.instructions_dir, &store.submissions_dir] {
            fs::create_dir_all(dir).map_err(|err| {
                CoordinatorError::state(format!("cannot create {}: {err}", dir.display()))
            })?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn issued_path(&self) -> PathBuf {
        self.root.join(ISSUED_FILENAME)
    }

    fn submitted_path(&self) -> PathBuf {
        self.root.join(SUBMITTED_FILENAME)
    }

    /// Replay both logs, sanitizing legacy rows and reconciling the
    /// per-record files; rewrites a log only when sanitization changed it
    pub fn load_state(&self) -> Result<(Vec<InstructionRecord>, Vec<SubmissionRecord>)> {
        let (issued_rows, issued_changed) =
            sanitize_rows(load_jsonl(&self.issued_path())?, "server_target_toon");
        let (submitted_rows, submitted_changed) =
            sanitize_rows(load_jsonl(&self.submitted_path())?, "target_toon");

        let mut issued: Vec<InstructionRecord> = Vec::with_capacity(issued_rows.len());
        let mut dropped_issued = issued_changed;
        for row in issued_rows {
            match serde_json::from_value(row) {
                Ok(record) => issued.push(record),
                Err(err) => {
                    warn!(error = %err, "dropping unreadable instruction row");
                    dropped_issued = true;
                }
            }
        }
        let mut submitted: Vec<SubmissionRecord> = Vec::with_capacity(submitted_rows.len());
        let mut dropped_submitted = submitted_changed;
        for row in submitted_rows {
            match serde_json::from_value(row) {
                Ok(record) => submitted.push(record),
                Err(err) => {
                    warn!(error = %err, "dropping unreadable submission row");
                    dropped_submitted = true;
                }
            }
        }

        // Submission state wins over whatever the instruction row says.
        let submitted_ids: std::collections::HashSet<&str> = submitted
            .iter()
            .map(|record| record.instruction_id.as_str())
            .collect();
        for record in &mut issued {
            record.submitted = submitted_ids.contains(record.instruction_id.as_str());
        }

        if dropped_issued {
            self.rewrite_jsonl(&self.issued_path(), &issued)?;
        }
        if dropped_submitted {
            self.rewrite_jsonl(&self.submitted_path(), &submitted)?;
        }

        // Per-record audit files follow the logs.
        for record in &issued {
            let path = self.instructions_dir.join(format!("{}.json", record.instruction_id));
            if !path.exists() {
                self.write_instruction_file(record, None)?;
            }
        }
        for record in &submitted {
            let path = self.submissions_dir.join(format!("{}.json", record.instruction_id));
            if !path.exists() {
                self.write_submission_file(record)?;
            }
        }

        self.drop_stale_last_instruction();
        Ok((issued, submitted))
    }

    pub fn append_instruction(&self, record: &InstructionRecord) -> Result<()> {
        append_jsonl(&self.issued_path(), record)
    }

    pub fn append_submission(&self, record: &SubmissionRecord) -> Result<()> {
        append_jsonl(&self.submitted_path(), record)
    }

    pub fn write_instruction_file(
        &self,
        record: &InstructionRecord,
        submission: Option<&SubmissionRecord>,
    ) -> Result<()> {
        let mut payload = serde_json::to_value(record)
            .map_err(|err| CoordinatorError::state(format!("serialize instruction: {err}")))?;
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "status".to_string(),
                Value::String(if submission.is_some() { "submitted" } else { "issued" }.to_string()),
            );
            if let Some(submission) = submission {
                map.insert(
                    "submission".to_string(),
                    serde_json::to_value(submission).map_err(|err| {
                        CoordinatorError::state(format!("serialize submission: {err}"))
                    })?,
                );
            }
        }
        let path = self.instructions_dir.join(format!("{}.json", record.instruction_id));
        self.write_atomic(&path, &pretty(&payload)?)
    }

    pub fn write_submission_file(&self, record: &SubmissionRecord) -> Result<()> {
        let payload = serde_json::to_value(record)
            .map_err(|err| CoordinatorError::state(format!("serialize submission: {err}")))?;
        let path = self.submissions_dir.join(format!("{}.json", record.instruction_id));
        self.write_atomic(&path, &pretty(&payload)?)
    }

    pub fn write_counters(
        &self,
        counters: &AxisCounters,
        issued: u64,
        submitted: u64,
    ) -> Result<()> {
        let file = CountersFile {
            issued,
            submitted,
            counters,
        };
        let payload = serde_json::to_value(&file)
            .map_err(|err| CoordinatorError::state(format!("serialize counters: {err}")))?;
        self.write_atomic(&self.root.join(COUNTERS_FILENAME), &pretty(&payload)?)
    }

    pub fn write_summary(&self, snapshot: &CoverageSnapshot) -> Result<()> {
        let payload = serde_json::to_value(snapshot)
            .map_err(|err| CoordinatorError::state(format!("serialize summary: {err}")))?;
        self.write_atomic(&self.root.join(SUMMARY_JSON_FILENAME), &pretty(&payload)?)?;
        self.write_atomic(
            &self.root.join(SUMMARY_MD_FILENAME),
            &render_summary_markdown(snapshot),
        )
    }

    /// Rewrite both training exports: generated pairs, then the merged file
    /// with targeted seed rows first
    pub fn write_training_exports(
        &self,
        submissions: &[SubmissionRecord],
        seeds: &[SeedCase],
    ) -> Result<()> {
        let mut generated = String::new();
        for record in submissions {
            if record.case_text.trim().is_empty() || record.target_toon.trim().is_empty() {
                continue;
            }
            let row = TrainingRecord::pair(
                PAIR_TRAINING_SYSTEM_PROMPT,
                &record.case_text,
                record.target_toon.trim(),
            );
            generated.push_str(&line(&row)?);
        }
        self.write_atomic(&self.root.join(GENERATED_TRAIN_FILENAME), &generated)?;

        let mut merged = String::new();
        for seed in seeds {
            if let Some(target_toon) = &seed.target_toon {
                let row =
                    TrainingRecord::pair(PAIR_TRAINING_SYSTEM_PROMPT, &seed.text, target_toon.trim());
                merged.push_str(&line(&row)?);
            }
        }
        merged.push_str(&generated);
        self.write_atomic(&self.root.join(FULL_TRAIN_FILENAME), &merged)
    }

    fn rewrite_jsonl<T: Serialize>(&self, path: &Path, rows: &[T]) -> Result<()> {
        let mut content = String::new();
        for row in rows {
            content.push_str(&line(row)?);
        }
        self.write_atomic(path, &content)
    }

    /// Write-to-temp, fsync, rename
    fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CoordinatorError::state(format!("bad path {}", path.display())))?;
        let temp_path = path.with_file_name(format!(".{file_name}.tmp"));
        {
            let mut file = File::create(&temp_path).map_err(|err| {
                CoordinatorError::state(format!("cannot create {}: {err}", temp_path.display()))
            })?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path).map_err(|err| {
            CoordinatorError::state(format!("cannot rename into {}: {err}", path.display()))
        })
    }

    /// A stale single-shot file from the legacy schema is deleted outright
    fn drop_stale_last_instruction(&self) {
        let path = self.root.join(LEGACY_LAST_INSTRUCTION);
        if !path.exists() {
            return;
        }
        let stale = match fs::read_to_string(&path) {
            Ok(text) => text.contains(LEGACY_TARGET_FIELD),
            Err(_) => true,
        };
        if stale {
            if let Err(err) = fs::remove_file(&path) {
                warn!(error = %err, "cannot remove stale {LEGACY_LAST_INSTRUCTION}");
            }
        }
    }
}

fn line<T: Serialize>(row: &T) -> Result<String> {
    let mut text = serde_json::to_string(row)
        .map_err(|err| CoordinatorError::state(format!("serialize log row: {err}")))?;
    text.push('\n');
    Ok(text)
}

fn pretty(payload: &Value) -> Result<String> {
    serde_json::to_string_pretty(payload)
        .map_err(|err| CoordinatorError::state(format!("serialize: {err}")))
}

/// Append one record and fsync before reporting the commit
fn append_jsonl<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| CoordinatorError::state(format!("cannot open {}: {err}", path.display())))?;
    file.write_all(line(row)?.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn load_jsonl(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)
        .map_err(|err| CoordinatorError::state(format!("cannot read {}: {err}", path.display())))?;
    let mut rows = Vec::new();
    for raw_line in text.lines() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) if value.is_object() => rows.push(value),
            _ => warn!(file = %path.display(), "skipping unreadable log line"),
        }
    }
    Ok(rows)
}

/// Drop rows carrying the legacy target field or an unusable target string;
/// normalize line endings of the kept targets
fn sanitize_rows(rows: Vec<Value>, target_field: &str) -> (Vec<Value>, bool) {
    let mut changed = false;
    let mut kept = Vec::with_capacity(rows.len());
    for mut row in rows {
        let Some(map) = row.as_object_mut() else {
            changed = true;
            continue;
        };
        if map.contains_key(LEGACY_TARGET_FIELD) {
            changed = true;
            continue;
        }
        let Some(target) = map.get(target_field).and_then(Value::as_str) else {
            changed = true;
            continue;
        };
        let cleaned = target
            .replace("\r\n", "\n")
            .replace('\r', "\n")
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim_matches('\n')
            .to_string();
        if cleaned.is_empty() {
            changed = true;
            continue;
        }
        if cleaned != target {
            map.insert(target_field.to_string(), Value::String(cleaned));
            changed = true;
        }
        kept.push(row);
    }
    (kept, changed)
}

fn render_summary_markdown(snapshot: &CoverageSnapshot) -> String {
    let mut lines = vec![
        "# Corpus Coordinator".to_string(),
        String::new(),
        format!("- target_total_cases: {}", snapshot.target_total_cases),
        format!("- generation_target: {}", snapshot.generation_target),
        format!("- seed_cases: {}", snapshot.seed_cases),
        format!("- issued: {}", snapshot.issued),
        format!("- submitted: {}", snapshot.submitted),
        format!("- remaining: {}", snapshot.remaining),
        String::new(),
        "## Coverage".to_string(),
    ];
    for (axis, buckets) in &snapshot.axes {
        lines.push(String::new());
        lines.push(format!("### {axis}"));
        for (bucket, progress) in buckets {
            lines.push(format!(
                "- {bucket}: current={} target={} gap={}",
                progress.current, progress.target_count, progress.gap
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::*;
    use crate::contracts::SubmissionChecks;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn selection() -> AxisSelection {
        AxisSelection {
            persona: Persona::Enfant,
            voice: Voice::PremierePersonne,
            format: TextFormat::RecitLibre,
            length_band: LengthBand::Moyen,
            noise: NoiseLevel::Propre,
            numeric_density: NumericDensity::UnMontant,
            date_precision: DatePrecision::Exacte,
            complexity: Complexity::Simple,
            primary_topic: Topic::OrdreHeritiers,
            secondary_topic: None,
            hard_negative_mode: None,
            hard_negative_intensity: None,
        }
    }

    fn instruction(id: &str) -> InstructionRecord {
        InstructionRecord {
            instruction_id: id.to_string(),
            agent_id: None,
            issued_at: Utc::now(),
            signature: "sig".to_string(),
            dimensions: selection(),
            server_target_toon: "famille:\n  nom = \"Jean Durand\"".to_string(),
            prompt: "prompt".to_string(),
            must_include: vec![],
            must_avoid: vec![],
            submitted: false,
        }
    }

    fn submission(id: &str) -> SubmissionRecord {
        SubmissionRecord {
            instruction_id: id.to_string(),
            agent_id: None,
            submitted_at: Utc::now(),
            case_text: "M. Durand est décédé.".to_string(),
            target_toon: "famille:\n  nom = \"Jean Durand\"".to_string(),
            dimensions: selection(),
            checks: SubmissionChecks::default(),
        }
    }

    #[test]
    fn test_append_and_replay_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.append_instruction(&instruction("INS-0001")).unwrap();
        store.append_instruction(&instruction("INS-0002")).unwrap();
        store.append_submission(&submission("INS-0001")).unwrap();

        let (issued, submitted) = store.load_state().unwrap();
        assert_eq!(issued.len(), 2);
        assert_eq!(submitted.len(), 1);
        assert!(issued[0].submitted);
        assert!(!issued[1].submitted);
        // Audit files were reconciled from the logs.
        assert!(dir.path().join("instructions/INS-0001.json").exists());
        assert!(dir.path().join("submissions/INS-0001.json").exists());
    }

    #[test]
    fn test_legacy_rows_are_dropped_and_log_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let good = serde_json::to_string(&instruction("INS-0002")).unwrap();
        let legacy = r#"{"instruction_id": "INS-0001", "target_json": {"famille": {}}}"#;
        let empty_target = r#"{"instruction_id": "INS-0003", "server_target_toon": "  "}"#;
        fs::write(
            dir.path().join(ISSUED_FILENAME),
            format!("{legacy}\n{good}\n{empty_target}\n"),
        )
        .unwrap();

        let (issued, _) = store.load_state().unwrap();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].instruction_id, "INS-0002");
        let rewritten = fs::read_to_string(dir.path().join(ISSUED_FILENAME)).unwrap();
        assert_eq!(rewritten.lines().count(), 1);
        assert!(!rewritten.contains("target_json"));
    }

    #[test]
    fn test_stale_last_instruction_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let stale = dir.path().join(LEGACY_LAST_INSTRUCTION);
        fs::write(&stale, r#"{"target_json": {}}"#).unwrap();
        store.load_state().unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_training_exports_include_targeted_seeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let seeds = vec![
            SeedCase {
                case_id: "s1".to_string(),
                source_type: "manual".to_string(),
                source_name: String::new(),
                text: "Cas de référence.".to_string(),
                target_toon: Some("famille:\n  nom = \"X Y\"".to_string()),
            },
            SeedCase {
                case_id: "s2".to_string(),
                source_type: "manual".to_string(),
                source_name: String::new(),
                text: "Sans cible.".to_string(),
                target_toon: None,
            },
        ];
        store
            .write_training_exports(&[submission("INS-0001")], &seeds)
            .unwrap();

        let generated =
            fs::read_to_string(dir.path().join(GENERATED_TRAIN_FILENAME)).unwrap();
        assert_eq!(generated.lines().count(), 1);
        let merged = fs::read_to_string(dir.path().join(FULL_TRAIN_FILENAME)).unwrap();
        assert_eq!(merged.lines().count(), 2);
        let first: Value = serde_json::from_str(merged.lines().next().unwrap()).unwrap();
        assert_eq!(first["messages"][0]["role"], "system");
        assert_eq!(first["messages"][2]["content"], "famille:\n  nom = \"X Y\"");
    }

    #[test]
    fn test_counters_and_summary_are_atomic_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let mut counters = AxisCounters::default();
        counters.record(&selection());
        store.write_counters(&counters, 1, 0).unwrap();
        let raw = fs::read_to_string(dir.path().join(COUNTERS_FILENAME)).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["issued"], 1);
        assert_eq!(parsed["axes"]["persona"]["enfant"], 1);

        let snapshot = CoverageSnapshot {
            target_total_cases: 10,
            generation_target: 10,
            seed_cases: 0,
            issued: 1,
            submitted: 0,
            remaining: 10,
            axes: BTreeMap::new(),
        };
        store.write_summary(&snapshot).unwrap();
        assert!(dir.path().join(SUMMARY_JSON_FILENAME).exists());
        let markdown = fs::read_to_string(dir.path().join(SUMMARY_MD_FILENAME)).unwrap();
        assert!(markdown.starts_with("# Corpus Coordinator"));
    }
}
