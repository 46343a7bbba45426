//! Deterministic partition assignment by the identifier's leading character.
//!
//! The partition set is `{misc} ∪ {a..z} ∪ {0..9}`. Leading characters
//! without a dedicated partition, including the reserved punctuation
//! `.`, `_` and `-`, fold into `misc`.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, info};
use serde_json::Value;

use crate::engine::{EngineError, IndexEngine};
use crate::observability::MetricsRegistry;

pub const DEFAULT_INDEX_PREFIX: &str = "pwd_";
pub const MISC: &str = "misc";

/// Leading characters that never get a partition of their own.
pub const RESERVED_LEADING: [char; 3] = ['.', '_', '-'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PartitionKey {
	Char(char),
	Misc,
}

impl fmt::Display for PartitionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PartitionKey::Char(c) => write!(f, "{c}"),
			PartitionKey::Misc => f.write_str(MISC),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
	/// Prepended to every partition key to form the engine-side name
	pub prefix: String,
	/// Leading characters folded into `misc`
	pub excluded_leading: Vec<char>,
}

impl Default for PartitionConfig {
	fn default() -> Self {
		Self {
			prefix: DEFAULT_INDEX_PREFIX.to_string(),
			excluded_leading: RESERVED_LEADING.to_vec(),
		}
	}
}

/// The fixed set of partitions for one run.
#[derive(Debug, Clone)]
pub struct PartitionSet {
	prefix: String,
	keys: BTreeSet<PartitionKey>,
}

impl PartitionSet {
	pub fn new(config: &PartitionConfig) -> Self {
		let mut keys: BTreeSet<PartitionKey> = ('a'..='z')
			.chain('0'..='9')
			.map(PartitionKey::Char)
			.collect();
		keys.retain(|k| match k {
			PartitionKey::Char(c) => !config.excluded_leading.contains(c),
			PartitionKey::Misc => true,
		});
		keys.insert(PartitionKey::Misc);

		Self {
			prefix: config.prefix.clone(),
			keys,
		}
	}

	pub fn keys(&self) -> impl Iterator<Item = PartitionKey> + '_ {
		self.keys.iter().copied()
	}

	pub fn len(&self) -> usize {
		self.keys.len()
	}

	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// Map an identifier to its partition. Total and case-insensitive.
	pub fn assign(&self, identifier: &str) -> PartitionKey {
		let Some(first) = identifier.chars().next() else {
			return PartitionKey::Misc;
		};

		let mut lower = first.to_lowercase();
		match (lower.next(), lower.next()) {
			(Some(c), None) if self.keys.contains(&PartitionKey::Char(c)) => PartitionKey::Char(c),
			_ => PartitionKey::Misc,
		}
	}

	pub fn name_of(&self, key: PartitionKey) -> String {
		format!("{}{}", self.prefix, key)
	}

	/// Engine-side partition name for an identifier.
	pub fn partition_name(&self, identifier: &str) -> String {
		self.name_of(self.assign(identifier))
	}

	pub fn names(&self) -> Vec<String> {
		self.keys().map(|k| self.name_of(k)).collect()
	}

	/// (Re)create every partition in the engine before any write targets it.
	///
	/// Already-exists and bad-request answers are absorbed; the partition may
	/// legitimately survive from an earlier run. With `reset`, each partition
	/// is deleted first. Returns the number of partitions processed.
	pub async fn provision(
		&self,
		engine: &dyn IndexEngine,
		index_config: &Value,
		reset: bool,
		metrics: Option<&MetricsRegistry>,
	) -> Result<usize, EngineError> {
		let absorb = |name: &str, e: EngineError| -> Result<(), EngineError> {
			if e.is_setup_conflict() {
				debug!("partition {} setup absorbed: {}", name, e);
				if let Some(m) = metrics {
					m.setup_conflicts_total.inc();
				}
				Ok(())
			} else {
				Err(e)
			}
		};

		let names = self.names();
		for name in &names {
			if reset {
				match engine.delete_partition(name).await {
					Ok(()) => info!("deleted partition {}", name),
					Err(e) => absorb(name, e)?,
				}
			}
			match engine.create_partition(name, index_config).await {
				Ok(()) => info!("created partition {}", name),
				Err(e) => absorb(name, e)?,
			}
		}
		Ok(names.len())
	}
}
