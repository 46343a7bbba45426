//! The external indexing engine, seen only through the handful of calls the
//! loader needs: create or delete a partition, and submit a chunk of write
//! actions.

pub mod elastic;
pub mod index_config;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::dispatch::WriteAction;

pub use elastic::{ElasticClient, EngineCredentials};
pub use index_config::{default_index_config, load_index_config};
pub use memory::{MemoryEngine, StoredDocument};

/// Errors surfaced by an [`IndexEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
	/// Setup answered with already-exists / bad-request / not-found. Setup
	/// is best-effort idempotent provisioning, so callers absorb this.
	#[error("setup of partition {partition} answered with status {status}")]
	SetupConflict { partition: String, status: u16 },

	#[error("engine answered with status {status}: {body}")]
	Status { status: u16, body: String },

	#[error("engine request failed")]
	Http(#[from] reqwest::Error),

	#[error("failed to encode or decode an engine payload")]
	Decode(#[from] serde_json::Error),

	#[error("engine request timed out")]
	Timeout,

	#[error("engine configuration error: {0}")]
	Config(String),
}

impl EngineError {
	pub fn is_setup_conflict(&self) -> bool {
		matches!(self, EngineError::SetupConflict { .. })
	}
}

/// One document the engine refused within an otherwise accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
	/// Position of the action within the submitted chunk
	pub position: usize,
	pub status: u16,
	pub reason: String,
}

/// Per-document result of one bulk submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
	pub submitted: usize,
	pub failures: Vec<DocumentFailure>,
}

impl BulkOutcome {
	pub fn stored(&self) -> usize {
		self.submitted.saturating_sub(self.failures.len())
	}

	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}
}

/// Abstraction over the indexing engine so the dispatcher can run against a
/// real cluster or an in-process double.
#[async_trait]
pub trait IndexEngine: Send + Sync + 'static {
	/// Create partition `name`, applying the opaque index configuration.
	async fn create_partition(&self, name: &str, config: &Value) -> Result<(), EngineError>;

	/// Delete partition `name` and everything stored in it.
	async fn delete_partition(&self, name: &str) -> Result<(), EngineError>;

	/// Submit one chunk of write actions. A chunk-level failure is an `Err`;
	/// documents refused individually are reported in the outcome.
	async fn bulk(&self, actions: &[WriteAction]) -> Result<BulkOutcome, EngineError>;
}
