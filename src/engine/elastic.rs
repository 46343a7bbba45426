//! Engine client speaking the Elasticsearch REST API over `reqwest`.
//!
//! Partitions are indices. Writes go through `_bulk` as NDJSON `index`
//! operations carrying `_index`, `_id` and `routing`, so a repeated
//! identifier/secret pair overwrites its earlier document.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::dispatch::WriteAction;
use crate::engine::{BulkOutcome, DocumentFailure, EngineError, IndexEngine};

/// Credentials for the engine's HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineCredentials {
	/// No authentication required
	#[default]
	None,
	/// HTTP basic authentication
	Basic { username: String, password: String },
	/// Bearer token authentication
	Bearer { token: String },
	/// Elasticsearch API key (already base64-encoded `id:key`)
	ApiKey { key: String },
}

#[derive(Serialize)]
struct BulkTarget<'a> {
	#[serde(rename = "_index")]
	index: &'a str,
	#[serde(rename = "_id")]
	id: &'a str,
	routing: &'a str,
}

#[derive(Serialize)]
struct BulkHeader<'a> {
	index: BulkTarget<'a>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
	#[serde(default)]
	errors: bool,
	#[serde(default)]
	items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
	status: u16,
	#[serde(default)]
	error: Option<Value>,
}

/// Render a chunk as the NDJSON body of a `_bulk` request.
pub fn encode_bulk_body(actions: &[WriteAction]) -> Result<String, EngineError> {
	let mut body = String::with_capacity(actions.len() * 256);
	for action in actions {
		let header = BulkHeader {
			index: BulkTarget {
				index: &action.partition,
				id: &action.document_id,
				routing: &action.routing_key,
			},
		};
		body.push_str(&serde_json::to_string(&header)?);
		body.push('\n');
		body.push_str(&serde_json::to_string(&action.document())?);
		body.push('\n');
	}
	Ok(body)
}

fn failure_reason(error: &Value) -> String {
	match error {
		Value::Object(map) => {
			let kind = map.get("type").and_then(Value::as_str).unwrap_or("error");
			match map.get("reason").and_then(Value::as_str) {
				Some(reason) => format!("{kind}: {reason}"),
				None => kind.to_string(),
			}
		}
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn parse_bulk_response(submitted: usize, body: &[u8]) -> Result<BulkOutcome, EngineError> {
	let resp: BulkResponse = serde_json::from_slice(body)?;
	let mut outcome = BulkOutcome {
		submitted,
		failures: Vec::new(),
	};
	if !resp.errors {
		return Ok(outcome);
	}

	for (position, entry) in resp.items.iter().enumerate() {
		for item in entry.values() {
			if item.status >= 300 || item.error.is_some() {
				outcome.failures.push(DocumentFailure {
					position,
					status: item.status,
					reason: item
						.error
						.as_ref()
						.map(failure_reason)
						.unwrap_or_else(|| format!("status {}", item.status)),
				});
			}
		}
	}
	Ok(outcome)
}

pub struct ElasticClient {
	http: reqwest::Client,
	base_url: Url,
	credentials: EngineCredentials,
}

impl ElasticClient {
	/// `timeout` bounds every request at the HTTP layer; pass `None` to
	/// leave timing to the caller.
	pub fn new(
		base_url: Url,
		credentials: EngineCredentials,
		timeout: Option<Duration>,
	) -> Result<Self, EngineError> {
		if base_url.cannot_be_a_base() {
			return Err(EngineError::Config(format!(
				"{base_url} cannot be used as an engine base URL"
			)));
		}
		let mut base_url = base_url;
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());
			base_url.set_path(&path);
		}

		let mut builder = reqwest::Client::builder()
			.user_agent(concat!("credindex/", env!("CARGO_PKG_VERSION")));
		if let Some(t) = timeout {
			builder = builder.timeout(t);
		}

		Ok(Self {
			http: builder.build()?,
			base_url,
			credentials,
		})
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, EngineError> {
		let url = self
			.base_url
			.join(path)
			.map_err(|e| EngineError::Config(format!("bad engine path {path}: {e}")))?;

		let req = self.http.request(method, url);
		Ok(match &self.credentials {
			EngineCredentials::None => req,
			EngineCredentials::Basic { username, password } => {
				req.basic_auth(username, Some(password))
			}
			EngineCredentials::Bearer { token } => req.bearer_auth(token),
			EngineCredentials::ApiKey { key } => req.header(AUTHORIZATION, format!("ApiKey {key}")),
		})
	}

	async fn setup_result(partition: &str, resp: Response) -> Result<(), EngineError> {
		let status = resp.status();
		if status.is_success() {
			return Ok(());
		}
		if status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND {
			return Err(EngineError::SetupConflict {
				partition: partition.to_string(),
				status: status.as_u16(),
			});
		}
		let body = resp.text().await.unwrap_or_default();
		Err(EngineError::Status {
			status: status.as_u16(),
			body,
		})
	}

	/// Fetch a stored document's source, `None` when it does not exist.
	pub async fn get_document(
		&self,
		partition: &str,
		document_id: &str,
		routing_key: &str,
	) -> Result<Option<Value>, EngineError> {
		let mut url = self
			.base_url
			.join(&format!("{partition}/_doc/"))
			.map_err(|e| EngineError::Config(e.to_string()))?;
		url.path_segments_mut()
			.map_err(|_| EngineError::Config("engine URL has no path".to_string()))?
			.pop_if_empty()
			.push(document_id);
		url.query_pairs_mut().append_pair("routing", routing_key);

		let resp = self.request(Method::GET, url.as_str())?.send().await?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !resp.status().is_success() {
			let status = resp.status().as_u16();
			let body = resp.text().await.unwrap_or_default();
			return Err(EngineError::Status { status, body });
		}
		let body: Value = resp.json().await?;
		Ok(body.get("_source").cloned())
	}

	/// Make everything written so far visible to searches and gets.
	pub async fn refresh(&self, partition: &str) -> Result<(), EngineError> {
		let resp = self
			.request(Method::POST, &format!("{partition}/_refresh"))?
			.send()
			.await?;
		if resp.status().is_success() {
			Ok(())
		} else {
			let status = resp.status().as_u16();
			let body = resp.text().await.unwrap_or_default();
			Err(EngineError::Status { status, body })
		}
	}
}

#[async_trait]
impl IndexEngine for ElasticClient {
	async fn create_partition(&self, name: &str, config: &Value) -> Result<(), EngineError> {
		let resp = self.request(Method::PUT, name)?.json(config).send().await?;
		Self::setup_result(name, resp).await
	}

	async fn delete_partition(&self, name: &str) -> Result<(), EngineError> {
		let resp = self.request(Method::DELETE, name)?.send().await?;
		Self::setup_result(name, resp).await
	}

	async fn bulk(&self, actions: &[WriteAction]) -> Result<BulkOutcome, EngineError> {
		if actions.is_empty() {
			return Ok(BulkOutcome::default());
		}

		let body = encode_bulk_body(actions)?;
		debug!("submitting {} actions ({} bytes)", actions.len(), body.len());
		let resp = self
			.request(Method::POST, "_bulk")?
			.header(CONTENT_TYPE, "application/x-ndjson")
			.body(body)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					EngineError::Timeout
				} else {
					EngineError::Http(e)
				}
			})?;

		let status = resp.status();
		let bytes = resp.bytes().await?;
		if !status.is_success() {
			return Err(EngineError::Status {
				status: status.as_u16(),
				body: String::from_utf8_lossy(&bytes).into_owned(),
			});
		}
		parse_bulk_response(actions.len(), &bytes)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::dispatch::{PartitionConfig, PartitionSet};
	use crate::ingest::CredentialRecord;

	fn actions() -> Vec<WriteAction> {
		let set = PartitionSet::new(&PartitionConfig::default());
		vec![
			WriteAction::new(CredentialRecord::from_parts("Ann@x.org", "p\"w", Some(2)), &set),
			WriteAction::new(CredentialRecord::from_parts("_bob@y.net", "pw2", None), &set),
		]
	}

	#[test]
	fn bulk_body_pairs_header_and_document() {
		let body = encode_bulk_body(&actions()).expect("encode");
		let lines: Vec<&str> = body.lines().collect();
		assert_eq!(lines.len(), 4);
		assert!(body.ends_with('\n'));

		let header: Value = serde_json::from_str(lines[0]).expect("header");
		assert_eq!(header["index"]["_index"], "pwd_a");
		assert_eq!(header["index"]["_id"], "Ann@x.orgp\"w");
		assert_eq!(header["index"]["routing"], "ann@x.org");

		let doc: Value = serde_json::from_str(lines[1]).expect("doc");
		assert_eq!(doc["password"], "p\"w");
		assert_eq!(doc["password_length"], 3);

		let header: Value = serde_json::from_str(lines[2]).expect("header");
		assert_eq!(header["index"]["_index"], "pwd_misc");
		let doc: Value = serde_json::from_str(lines[3]).expect("doc");
		assert!(doc["source"].is_null());
	}

	#[test]
	fn clean_response_has_no_failures() {
		let body = br#"{"took":3,"errors":false,"items":[{"index":{"_id":"a","status":201}},{"index":{"_id":"b","status":200}}]}"#;
		let outcome = parse_bulk_response(2, body).expect("parse");
		assert!(outcome.is_clean());
		assert_eq!(outcome.stored(), 2);
	}

	#[test]
	fn per_document_errors_are_reported() {
		let body = br#"{"took":3,"errors":true,"items":[
			{"index":{"_id":"a","status":201}},
			{"index":{"_id":"b","status":400,"error":{"type":"mapper_parsing_exception","reason":"failed to parse field [source]"}}}
		]}"#;
		let outcome = parse_bulk_response(2, body).expect("parse");
		assert_eq!(outcome.failures.len(), 1);
		assert_eq!(outcome.failures[0].position, 1);
		assert_eq!(outcome.failures[0].status, 400);
		assert_eq!(
			outcome.failures[0].reason,
			"mapper_parsing_exception: failed to parse field [source]"
		);
	}

	#[test]
	fn base_url_gains_trailing_slash() {
		let client = ElasticClient::new(
			Url::parse("http://127.0.0.1:9200/es").expect("url"),
			EngineCredentials::None,
			None,
		)
		.expect("client");
		assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9200/es/");
	}

	#[test]
	fn credentials_deserialize_tagged() {
		let c: EngineCredentials =
			serde_json::from_str(r#"{"type":"basic","username":"u","password":"p"}"#).expect("json");
		assert_eq!(
			c,
			EngineCredentials::Basic {
				username: "u".to_string(),
				password: "p".to_string()
			}
		);
	}
}
