#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]

//! Decision simulation engine: builds prompts from company context, calls a
//! language model, extracts a normalized risk assessment and stores it with an
//! immutable snapshot of the context used.

/// Company records and context snapshots.
#[path = "../company.rs"]
pub mod company;

/// Assessment shape and normalization.
#[path = "../assessment.rs"]
pub mod assessment;

/// Decision records.
#[path = "../decision.rs"]
pub mod decision;

/// Prompt construction.
#[path = "../prompt.rs"]
pub mod prompt;

/// Candidate JSON extraction from model output.
#[path = "../extractor.rs"]
pub mod extractor;

/// Generation backends, retry and timeout policy.
#[path = "../client.rs"]
pub mod client;

/// Store traits and the in-memory store.
#[path = "../store.rs"]
pub mod store;

/// File-backed store.
#[path = "../file_store.rs"]
pub mod file_store;

/// Display-time projection and rendering.
#[path = "../display.rs"]
pub mod display;

/// Error taxonomy.
#[path = "../error.rs"]
pub mod error;

/// TOML configuration.
#[path = "../config.rs"]
pub mod config;

/// Telemetry for the simulator.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Simulation orchestrator.
#[path = "../main.rs"]
pub mod runtime;

pub use assessment::{normalize, Assessment};
pub use client::{
    GenerationBackend, GenerationClient, GenerationError, HttpGenerationBackend,
    LoopbackGenerationBackend, RetryPolicy, ScriptedGenerationBackend, TransportError,
};
pub use company::{Company, CompanyProfile, ContextSnapshot, NewCompany};
pub use config::SimulatorConfig;
pub use decision::Decision;
pub use display::{render_text, DecisionView, Workspace};
pub use error::{ErrorKind, SimulationError};
pub use extractor::{extract_assessment, ExtractionError};
pub use file_store::FileStore;
pub use runtime::{DecisionSimulator, DecisionSimulatorBuilder};
pub use store::{ContextStore, DecisionStore, MemoryStore, StoreError};
pub use telemetry::{SimulationTelemetry, SimulationTelemetryBuilder};
