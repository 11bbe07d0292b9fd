//! Corpus Coordinator contract definitions
//!
//! Record types shared between the persistence layer, the HTTP surface, and
//! the training exports. Instructions are created once, marked submitted
//! exactly once, and never mutated afterwards; targets are immutable once
//! locked to an instruction.

pub mod records;

pub use records::{
    BucketProgress, CoverageSnapshot, HealthSnapshot, InstructionRecord, IssuedInstruction,
    NextInstructionResponse, SubmissionChecks, SubmissionRecord, SubmitResponse, TrainingMessage,
    TrainingRecord,
};

/// Fixed system prompt of the pair-training export rows
pub const PAIR_TRAINING_SYSTEM_PROMPT: &str = "Tu extrais les informations d'un énoncé de \
succession en français. Tu réponds uniquement par du TOON valide conforme au schéma cible attendu.";

/// Prefix of every instruction id; the numeric part is zero-padded
pub const INSTRUCTION_ID_PREFIX: &str = "INS-";

/// Build the zero-padded instruction id for a 1-based sequence number
pub fn instruction_id(sequence: u64) -> String {
    format!("{INSTRUCTION_ID_PREFIX}{sequence:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_id_padding() {
        assert_eq!(instruction_id(1), "INS-0001");
        assert_eq!(instruction_id(427), "INS-0427");
        assert_eq!(instruction_id(12000), "INS-12000");
    }
}
