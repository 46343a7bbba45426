//! In-process engine that keeps documents in hash maps.
//!
//! Mirrors the behaviour the loader relies on from a real cluster: creating
//! an existing partition or deleting a missing one is a setup conflict,
//! writes to an unknown partition are refused per document, and writes are
//! upserts keyed by partition and document id.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::dispatch::WriteAction;
use crate::engine::{BulkOutcome, DocumentFailure, EngineError, IndexEngine};
use crate::ingest::CredentialRecord;

/// A document as last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
	pub routing_key: String,
	pub record: CredentialRecord,
}

type RejectFn = Box<dyn Fn(&WriteAction) -> bool + Send + Sync>;

#[derive(Default)]
struct MemoryState {
	configs: HashMap<String, Value>,
	documents: HashMap<String, HashMap<String, StoredDocument>>,
	bulk_calls: usize,
}

#[derive(Default)]
pub struct MemoryEngine {
	state: Mutex<MemoryState>,
	reject: Option<RejectFn>,
}

impl MemoryEngine {
	pub fn new() -> Self {
		Self::default()
	}

	/// Refuse every document for which `predicate` holds, as a cluster would
	/// refuse a document that fails its mapping.
	pub fn rejecting<F>(predicate: F) -> Self
	where
		F: Fn(&WriteAction) -> bool + Send + Sync + 'static,
	{
		Self {
			state: Mutex::default(),
			reject: Some(Box::new(predicate)),
		}
	}

	pub async fn partitions(&self) -> Vec<String> {
		let state = self.state.lock().await;
		let mut names: Vec<String> = state.configs.keys().cloned().collect();
		names.sort();
		names
	}

	pub async fn document(&self, partition: &str, document_id: &str) -> Option<StoredDocument> {
		let state = self.state.lock().await;
		state
			.documents
			.get(partition)
			.and_then(|docs| docs.get(document_id))
			.cloned()
	}

	pub async fn document_count(&self) -> usize {
		let state = self.state.lock().await;
		state.documents.values().map(HashMap::len).sum()
	}

	/// Documents per partition, partitions without documents included.
	pub async fn partition_counts(&self) -> BTreeMap<String, usize> {
		let state = self.state.lock().await;
		state
			.configs
			.keys()
			.map(|name| {
				let n = state.documents.get(name).map_or(0, HashMap::len);
				(name.clone(), n)
			})
			.collect()
	}

	pub async fn bulk_calls(&self) -> usize {
		self.state.lock().await.bulk_calls
	}
}

#[async_trait]
impl IndexEngine for MemoryEngine {
	async fn create_partition(&self, name: &str, config: &Value) -> Result<(), EngineError> {
		let mut state = self.state.lock().await;
		if state.configs.contains_key(name) {
			return Err(EngineError::SetupConflict {
				partition: name.to_string(),
				status: 400,
			});
		}
		state.configs.insert(name.to_string(), config.clone());
		state.documents.insert(name.to_string(), HashMap::new());
		Ok(())
	}

	async fn delete_partition(&self, name: &str) -> Result<(), EngineError> {
		let mut state = self.state.lock().await;
		if state.configs.remove(name).is_none() {
			return Err(EngineError::SetupConflict {
				partition: name.to_string(),
				status: 404,
			});
		}
		state.documents.remove(name);
		Ok(())
	}

	async fn bulk(&self, actions: &[WriteAction]) -> Result<BulkOutcome, EngineError> {
		let mut state = self.state.lock().await;
		state.bulk_calls += 1;

		let mut outcome = BulkOutcome {
			submitted: actions.len(),
			failures: Vec::new(),
		};
		for (position, action) in actions.iter().enumerate() {
			if self.reject.as_ref().is_some_and(|r| r(action)) {
				outcome.failures.push(DocumentFailure {
					position,
					status: 400,
					reason: "document rejected".to_string(),
				});
				continue;
			}
			let Some(docs) = state.documents.get_mut(&action.partition) else {
				outcome.failures.push(DocumentFailure {
					position,
					status: 404,
					reason: format!("no such partition [{}]", action.partition),
				});
				continue;
			};
			docs.insert(
				action.document_id.clone(),
				StoredDocument {
					routing_key: action.routing_key.clone(),
					record: action.payload.clone(),
				},
			);
		}
		Ok(outcome)
	}
}
