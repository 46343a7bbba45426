//! Static partition configuration handed to the engine at setup time.
//!
//! The loader treats this as an opaque blob: it is applied once per
//! partition before any write targets it and is never inspected afterwards.

use std::path::Path;

use serde_json::{Value, json};

use crate::engine::EngineError;

/// Built-in configuration: no replicas, refresh disabled during the load,
/// analyzers that pull user / domain / domain-without-tld / tld out of the
/// identifier, and keyword sub-fields for exact matches.
pub fn default_index_config() -> Value {
	json!({
		"settings": {
			"index": {
				"refresh_interval": -1,
				"number_of_replicas": 0
			},
			"analysis": {
				"filter": {
					"tld_filter": {
						"type": "pattern_capture",
						"preserve_original": false,
						"patterns": ["\\.([^\\.]+?)$"]
					}
				},
				"analyzer": {
					"lc_analyzer": {
						"type": "custom",
						"tokenizer": "keyword",
						"filter": ["lowercase"]
					},
					"user_analyzer": {
						"type": "custom",
						"tokenizer": "user_tokenizer",
						"filter": ["lowercase"]
					},
					"domain_analyzer": {
						"type": "custom",
						"tokenizer": "domain_tokenizer",
						"filter": ["lowercase"]
					},
					"domain_notld_analyzer": {
						"type": "custom",
						"tokenizer": "domain_notld_tokenizer",
						"filter": ["lowercase"]
					},
					"tld_analyzer": {
						"type": "custom",
						"tokenizer": "tld_tokenizer",
						"filter": ["lowercase"]
					}
				},
				"tokenizer": {
					"user_tokenizer": {
						"type": "pattern",
						"pattern": "(.+?)@",
						"group": 1
					},
					"domain_tokenizer": {
						"type": "pattern",
						"pattern": "@(.+)",
						"group": 1
					},
					"domain_notld_tokenizer": {
						"type": "pattern",
						"pattern": "@(.+)\\.",
						"group": 1
					},
					"tld_tokenizer": {
						"type": "pattern",
						"pattern": "\\.([^\\.]+?)$",
						"group": 1
					}
				},
				"normalizer": {
					"lc_normalizer": {
						"type": "custom",
						"char_filter": [],
						"filter": ["lowercase"]
					}
				}
			}
		},
		"mappings": {
			"properties": {
				"email": {
					"type": "text",
					"analyzer": "simple",
					"fields": {
						"raw": { "type": "keyword", "normalizer": "lc_normalizer" }
					}
				},
				"username": {
					"type": "text",
					"analyzer": "simple",
					"fields": {
						"raw": { "type": "keyword", "normalizer": "lc_normalizer" }
					}
				},
				"domain": { "type": "keyword", "normalizer": "lc_normalizer" },
				"domain_notld": { "type": "keyword", "normalizer": "lc_normalizer" },
				"tld": { "type": "keyword", "normalizer": "lc_normalizer" },
				"password": {
					"type": "text",
					"analyzer": "simple",
					"fields": {
						"raw": { "type": "keyword" }
					}
				},
				"password_length": { "type": "short" },
				"source": { "type": "short" }
			}
		}
	})
}

/// Load the configuration from a JSON file, or fall back to the built-in one.
pub fn load_index_config(path: Option<&Path>) -> Result<Value, EngineError> {
	let Some(path) = path else {
		return Ok(default_index_config());
	};

	let text = std::fs::read_to_string(path)
		.map_err(|e| EngineError::Config(format!("reading {}: {}", path.display(), e)))?;
	let value: Value = serde_json::from_str(&text)?;
	if !value.is_object() {
		return Err(EngineError::Config(format!(
			"{} does not hold a JSON object",
			path.display()
		)));
	}
	Ok(value)
}
