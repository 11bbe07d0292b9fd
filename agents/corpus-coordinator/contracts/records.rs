//! Persisted and wire records
//!
//! One instruction line per issuance in `issued_instructions.jsonl`, one
//! submission line per accepted case in `generated_cases.jsonl`. The
//! coverage snapshot is what `/dashboard` serves and what `summary.json`
//! stores.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::axes::AxisSelection;

/// An issued generation instruction with its locked target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionRecord {
    /// Monotonically increasing id with a stable prefix (`INS-0001`)
    pub instruction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// De-duplication key over every selected bucket
    pub signature: String,
    pub dimensions: AxisSelection,
    /// The locked encoded target; source of truth for submissions
    pub server_target_toon: String,
    /// Full generation prompt shown to the agent (TOON block included)
    pub prompt: String,
    pub must_include: Vec<String>,
    pub must_avoid: Vec<String>,
    #[serde(default)]
    pub submitted: bool,
}

/// An accepted submission for an issued instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub instruction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub case_text: String,
    /// Copied from the instruction; never client-supplied
    pub target_toon: String,
    pub dimensions: AxisSelection,
    pub checks: SubmissionChecks,
}

/// Validation metadata recorded with every accepted submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionChecks {
    pub word_count: usize,
    pub char_count: usize,
    pub contains_digits: bool,
    /// Exact normalized duplicate of a seed or earlier submission
    pub exact_duplicate: bool,
    /// Highest Jaccard similarity observed in the comparison window
    pub max_similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closest_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Per-bucket quota progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketProgress {
    pub target_share: f64,
    pub target_count: f64,
    pub current: u64,
    pub gap: f64,
}

/// Counters and per-axis coverage, machine-readable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub target_total_cases: u64,
    pub generation_target: u64,
    pub seed_cases: usize,
    pub issued: u64,
    pub submitted: u64,
    pub remaining: u64,
    pub axes: BTreeMap<String, BTreeMap<String, BucketProgress>>,
}

/// Liveness payload for `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub ok: bool,
    pub target_total_cases: u64,
    pub generation_target: u64,
    pub seed_cases: usize,
    pub issued: u64,
    pub submitted: u64,
}

/// Public shape of a freshly issued instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedInstruction {
    pub instruction_id: String,
    pub target_toon: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_avoid: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Response of `next-instruction`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NextInstructionResponse {
    /// The generation target is reached; counters did not move
    Exhausted {
        done: bool,
        message: String,
        coverage: CoverageSnapshot,
    },
    Issued(IssuedInstruction),
}

/// Response of `submit-case`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub checks: SubmissionChecks,
}

/// One chat message of a training export row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingMessage {
    pub role: String,
    pub content: String,
}

/// One `{messages: [...]}` row of the training exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub messages: Vec<TrainingMessage>,
}

impl TrainingRecord {
    /// Build a system/user/assistant triple where the assistant content is
    /// the locked TOON target
    pub fn pair(system_prompt: &str, case_text: &str, target_toon: &str) -> Self {
        TrainingRecord {
            messages: vec![
                TrainingMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                TrainingMessage {
                    role: "user".to_string(),
                    content: case_text.to_string(),
                },
                TrainingMessage {
                    role: "assistant".to_string(),
                    content: target_toon.to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_record_roles() {
        let record = TrainingRecord::pair("sys", "un cas", "famille:");
        let roles: Vec<&str> = record.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant"]);
        assert_eq!(record.messages[2].content, "famille:");
    }

    #[test]
    fn test_next_instruction_response_shapes() {
        let issued = NextInstructionResponse::Issued(IssuedInstruction {
            instruction_id: "INS-0001".to_string(),
            target_toon: "famille:".to_string(),
            prompt: "p".to_string(),
            must_include: vec![],
            must_avoid: vec![],
            agent_id: None,
        });
        let json = serde_json::to_value(&issued).unwrap();
        assert_eq!(json["instruction_id"], "INS-0001");
        assert!(json.get("done").is_none());
    }
}
