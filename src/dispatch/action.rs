use serde::{Deserialize, Serialize};

use crate::dispatch::partition::PartitionSet;
use crate::ingest::CredentialRecord;

/// One self-contained, idempotent write against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAction {
	/// Full partition (index) name, prefix included
	pub partition: String,
	/// `identifier ‖ secret`; re-submitting the same pair overwrites
	pub document_id: String,
	/// Lowercased identifier; keeps one identifier's records together
	pub routing_key: String,
	pub payload: CredentialRecord,
}

impl WriteAction {
	pub fn new(payload: CredentialRecord, partitions: &PartitionSet) -> Self {
		Self {
			partition: partitions.partition_name(&payload.identifier),
			document_id: document_id(&payload.identifier, &payload.secret),
			routing_key: routing_key(&payload.identifier),
			payload,
		}
	}

	/// Engine-facing body of the document.
	pub fn document(&self) -> CredentialDocument {
		CredentialDocument::from(&self.payload)
	}
}

pub fn document_id(identifier: &str, secret: &str) -> String {
	let mut id = String::with_capacity(identifier.len() + secret.len());
	id.push_str(identifier);
	id.push_str(secret);
	id
}

pub fn routing_key(identifier: &str) -> String {
	identifier.to_lowercase()
}

/// Document body as stored by the engine. Field names follow the index
/// mappings in [`crate::engine::default_index_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDocument {
	pub email: String,
	pub username: String,
	pub domain: String,
	pub domain_notld: String,
	pub tld: String,
	pub password: String,
	pub password_length: usize,
	pub source: Option<i64>,
}

impl From<&CredentialRecord> for CredentialDocument {
	fn from(r: &CredentialRecord) -> Self {
		Self {
			email: r.identifier.clone(),
			username: r.local_part.clone(),
			domain: r.full_domain.clone(),
			domain_notld: r.domain_no_tld.clone(),
			tld: r.tld.clone(),
			password: r.secret.clone(),
			password_length: r.secret_length(),
			source: r.source_id,
		}
	}
}
