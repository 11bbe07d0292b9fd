//! Corpus Coordinator Agent
//!
//! A local coordinator that drives a fleet of synthetic data-generation
//! agents producing `(free-form French case text, structured target)` pairs
//! for information-extraction fine-tuning.
//!
//! ## Architecture
//!
//! 1. **Schema index** (`schema`): indexes the master schema once at
//!    startup; every leaf path carries its scalar kind and enum set.
//! 2. **Quota scheduler** (`axes`, `scheduler`): deficit-scored bucket
//!    picks per diversity axis, compatibility rules, and a bounded FIFO of
//!    recent signatures.
//! 3. **Target generator** (`generator`): sparse, schema-valid,
//!    business-coherent targets aligned with the drawn axes.
//! 4. **TOON codec** (`codec`): external command-line encoder behind a
//!    round-trip-verifying gateway, with an in-process fallback.
//! 5. **Submission validator** (`validator`): name coverage, leakage scans,
//!    similarity warnings.
//! 6. **Persistence** (`store`): append-only JSONL logs, atomic rewrites,
//!    crash-safe replay.
//! 7. **HTTP surface** (`handler`): health, dashboard, next-instruction,
//!    submit-case.

pub mod axes;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod handler;
pub mod names;
pub mod prompt;
pub mod scheduler;
pub mod schema;
pub mod seeds;
pub mod store;
pub mod validator;

// Contracts module - located at ../contracts relative to src/
#[path = "../contracts/mod.rs"]
pub mod contracts;

pub use axes::{AxisSelection, QuotaProfile};
pub use codec::{CommandCodec, IndentCodec, ToonCodec, ToonGateway};
pub use config::{CliOverrides, ConfigFile, CoordinatorConfig};
pub use contracts::{
    CoverageSnapshot, HealthSnapshot, InstructionRecord, NextInstructionResponse,
    SubmissionRecord, SubmitResponse,
};
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, RejectionKind, Result};
pub use handler::{create_router, AppState};
pub use schema::SchemaIndex;

/// Agent version (from Cargo.toml)
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Agent identifier
pub const AGENT_ID: &str = "corpus-coordinator";
