//! Bulk dispatch of decoded records to the indexing engine.
//!
//! One blocking producer pulls records, wraps them in [`WriteAction`]s and
//! groups them into chunks. A fixed pool of worker tasks shares a single
//! bounded channel of chunks; each chunk is delivered to exactly one worker,
//! which submits it with a per-submission timeout. The bounded channel keeps
//! at most about `worker_count * chunk_size` actions in flight.
//!
//! Submission order is not preserved. Every action is an upsert keyed by its
//! document id, so repeated or reordered submissions converge.

pub mod action;
pub mod dead_letter;
pub mod partition;
pub mod rows;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinSet};

use crate::engine::{EngineError, IndexEngine};
use crate::ingest::{CredentialRecord, RowCodec};
use crate::observability::{MetricsRegistry, error_chain};

pub use action::{CredentialDocument, WriteAction, document_id, routing_key};
pub use dead_letter::{DeadLetterSender, DeadLetterSink};
pub use partition::{PartitionConfig, PartitionKey, PartitionSet};
pub use rows::{CountedRecords, DecodedRows, ReadStats};

pub const DEFAULT_CHUNK_SIZE: usize = 60_000;
pub const DEFAULT_WORKER_COUNT: usize = 6;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(480);
pub const DEFAULT_PROGRESS_EVERY: u64 = 100_000;

#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("failed to open {path}")]
	Io { path: PathBuf, source: io::Error },

	#[error("dead-letter sink failed")]
	DeadLetter(#[source] io::Error),

	#[error(transparent)]
	Engine(#[from] EngineError),

	#[error("document {document_id} was rejected: {reason}")]
	DocumentRejected { document_id: String, reason: String },

	#[error("dispatch task failed")]
	Worker(#[from] JoinError),
}

/// Immutable dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
	/// Actions grouped per engine submission
	pub chunk_size: usize,
	/// Parallel submission workers
	pub worker_count: usize,
	/// Upper bound on one submission
	pub request_timeout: Duration,
	/// When set, failed documents and chunks are counted and skipped;
	/// otherwise the first failure aborts the run
	pub tolerate_errors: bool,
	/// Log a progress line every this many input lines; 0 disables it
	pub progress_every: u64,
	/// Append failed documents here in the intermediate row format
	pub dead_letter_path: Option<PathBuf>,
}

impl Default for DispatchConfig {
	fn default() -> Self {
		Self {
			chunk_size: DEFAULT_CHUNK_SIZE,
			worker_count: DEFAULT_WORKER_COUNT,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			tolerate_errors: true,
			progress_every: DEFAULT_PROGRESS_EVERY,
			dead_letter_path: None,
		}
	}
}

/// What one dispatch run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
	/// Input lines (or records, for in-memory sources) pulled
	pub lines_read: u64,
	/// Rows refused by the decoder
	pub rejected_rows: u64,
	/// Write actions built and queued
	pub records: u64,
	pub chunks: u64,
	/// Chunks that failed or timed out as a whole
	pub failed_chunks: u64,
	/// Documents not stored, whole-chunk failures included
	pub failed_documents: u64,
	/// Failed documents written to the dead-letter file
	pub dead_lettered: u64,
	/// The input ended on a read error rather than end of file
	pub truncated: bool,
}

#[derive(Debug, Default)]
struct WorkerTally {
	chunks: u64,
	failed_chunks: u64,
	failed_documents: u64,
}

type ChunkReceiver = Arc<Mutex<mpsc::Receiver<Vec<WriteAction>>>>;

pub struct BulkDispatcher {
	engine: Arc<dyn IndexEngine>,
	partitions: Arc<PartitionSet>,
	codec: RowCodec,
	config: DispatchConfig,
	metrics: Arc<MetricsRegistry>,
}

impl BulkDispatcher {
	pub fn new(
		engine: Arc<dyn IndexEngine>,
		partitions: PartitionSet,
		codec: RowCodec,
		config: DispatchConfig,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self {
			engine,
			partitions: Arc::new(partitions),
			codec,
			config,
			metrics,
		}
	}

	pub fn partitions(&self) -> &PartitionSet {
		&self.partitions
	}

	/// Create (and with `reset`, first delete) every partition.
	pub async fn provision(&self, index_config: &Value, reset: bool) -> Result<usize, EngineError> {
		self.partitions
			.provision(
				self.engine.as_ref(),
				index_config,
				reset,
				Some(self.metrics.as_ref()),
			)
			.await
	}

	/// Load every well-formed row of an intermediate file.
	pub async fn dispatch_file(&self, path: &Path) -> Result<DispatchReport, DispatchError> {
		let file = File::open(path).map_err(|source| DispatchError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		self.dispatch_reader(BufReader::new(file)).await
	}

	/// Load every well-formed row read from `reader`.
	pub async fn dispatch_reader<R>(&self, reader: R) -> Result<DispatchReport, DispatchError>
	where
		R: BufRead + Send + 'static,
	{
		let rows = DecodedRows::new(reader, self.codec, self.config.progress_every);
		let stats = rows.stats();
		self.run(rows, stats).await
	}

	/// Load already decoded records.
	pub async fn dispatch<I>(&self, records: I) -> Result<DispatchReport, DispatchError>
	where
		I: IntoIterator<Item = CredentialRecord>,
		I::IntoIter: Send + 'static,
	{
		let counted = CountedRecords::new(records.into_iter(), self.config.progress_every);
		let stats = counted.stats();
		self.run(counted, stats).await
	}

	async fn run<I>(&self, rows: I, stats: Arc<ReadStats>) -> Result<DispatchReport, DispatchError>
	where
		I: Iterator<Item = CredentialRecord> + Send + 'static,
	{
		let chunk_size = self.config.chunk_size.max(1);
		let worker_count = self.config.worker_count.max(1);

		let dead_letter = match &self.config.dead_letter_path {
			Some(path) => Some(
				DeadLetterSink::open(path, worker_count)
					.await
					.map_err(DispatchError::DeadLetter)?,
			),
			None => None,
		};

		let (tx, rx) = mpsc::channel::<Vec<WriteAction>>(worker_count);
		let rx: ChunkReceiver = Arc::new(Mutex::new(rx));

		let partitions = self.partitions.clone();
		let metrics = self.metrics.clone();
		let producer = tokio::task::spawn_blocking(move || {
			let mut records = 0u64;
			let mut chunk = Vec::with_capacity(chunk_size);
			for record in rows {
				chunk.push(WriteAction::new(record, &partitions));
				records += 1;
				if chunk.len() >= chunk_size {
					metrics.dispatch_records_total.inc_by(chunk.len() as u64);
					let full = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
					if tx.blocking_send(full).is_err() {
						// every worker has stopped
						return records;
					}
				}
			}
			if !chunk.is_empty() {
				metrics.dispatch_records_total.inc_by(chunk.len() as u64);
				let _ = tx.blocking_send(chunk);
			}
			records
		});

		let mut workers = JoinSet::new();
		for id in 0..worker_count {
			let worker = Worker {
				id,
				rx: rx.clone(),
				engine: self.engine.clone(),
				metrics: self.metrics.clone(),
				timeout: self.config.request_timeout,
				tolerate_errors: self.config.tolerate_errors,
				dead_letter: dead_letter.as_ref().map(DeadLetterSink::sender),
			};
			workers.spawn(worker.run());
		}
		drop(rx);

		let mut report = DispatchReport::default();
		let mut first_error: Option<DispatchError> = None;
		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok(Ok(tally)) => {
					report.chunks += tally.chunks;
					report.failed_chunks += tally.failed_chunks;
					report.failed_documents += tally.failed_documents;
				}
				Ok(Err(e)) => {
					if first_error.is_none() {
						workers.abort_all();
						first_error = Some(e);
					}
				}
				Err(e) if e.is_cancelled() => {}
				Err(e) => {
					if first_error.is_none() {
						workers.abort_all();
						first_error = Some(e.into());
					}
				}
			}
		}

		let records = producer.await?;
		if let Some(sink) = dead_letter {
			report.dead_lettered = sink.finish().await.map_err(DispatchError::DeadLetter)?;
		}
		if let Some(e) = first_error {
			return Err(e);
		}

		report.records = records;
		report.lines_read = stats.lines();
		report.rejected_rows = stats.rejected();
		report.truncated = stats.truncated();
		self.metrics.dispatch_lines_total.inc_by(report.lines_read);
		self.metrics
			.dispatch_rejected_rows_total
			.inc_by(report.rejected_rows);

		info!(
			"dispatch finished: {} lines, {} records, {} chunks, {} failed documents",
			report.lines_read, report.records, report.chunks, report.failed_documents
		);
		Ok(report)
	}
}

struct Worker {
	id: usize,
	rx: ChunkReceiver,
	engine: Arc<dyn IndexEngine>,
	metrics: Arc<MetricsRegistry>,
	timeout: Duration,
	tolerate_errors: bool,
	dead_letter: Option<DeadLetterSender>,
}

impl Worker {
	async fn run(self) -> Result<WorkerTally, DispatchError> {
		let mut tally = WorkerTally::default();
		loop {
			let next = { self.rx.lock().await.recv().await };
			let Some(chunk) = next else {
				break;
			};
			tally.chunks += 1;
			self.metrics.dispatch_chunks_total.inc();

			let started = Instant::now();
			let result = tokio::time::timeout(self.timeout, self.engine.bulk(&chunk)).await;
			self.metrics
				.dispatch_chunk_latency_ms
				.observe(started.elapsed().as_millis() as f64);

			match result {
				Ok(Ok(outcome)) => {
					let Some(first) = outcome.failures.first() else {
						continue;
					};
					let failed = outcome.failures.len() as u64;
					tally.failed_documents += failed;
					self.metrics.dispatch_document_failures_total.inc_by(failed);

					let first_id = chunk
						.get(first.position)
						.map(|a| a.document_id.clone())
						.unwrap_or_default();
					if !self.tolerate_errors {
						return Err(DispatchError::DocumentRejected {
							document_id: first_id,
							reason: first.reason.clone(),
						});
					}
					warn!(
						"worker {}: {} of {} documents not stored (first: {})",
						self.id,
						failed,
						chunk.len(),
						first.reason
					);

					let rejected: Vec<CredentialRecord> = outcome
						.failures
						.iter()
						.filter_map(|f| chunk.get(f.position))
						.map(|a| a.payload.clone())
						.collect();
					self.dead_letter(rejected).await;
				}
				Ok(Err(e)) => self.chunk_failed(&mut tally, chunk, e).await?,
				Err(_) => {
					self.chunk_failed(&mut tally, chunk, EngineError::Timeout)
						.await?
				}
			}
		}
		Ok(tally)
	}

	async fn chunk_failed(
		&self,
		tally: &mut WorkerTally,
		chunk: Vec<WriteAction>,
		error: EngineError,
	) -> Result<(), DispatchError> {
		tally.failed_chunks += 1;
		tally.failed_documents += chunk.len() as u64;
		self.metrics.dispatch_chunk_failures_total.inc();
		self.metrics
			.dispatch_document_failures_total
			.inc_by(chunk.len() as u64);

		if !self.tolerate_errors {
			return Err(error.into());
		}
		warn!(
			"worker {}: chunk of {} actions failed: {}",
			self.id,
			chunk.len(),
			error_chain(&error)
		);
		self.dead_letter(chunk.into_iter().map(|a| a.payload).collect())
			.await;
		Ok(())
	}

	async fn dead_letter(&self, records: Vec<CredentialRecord>) {
		if records.is_empty() {
			return;
		}
		if let Some(tx) = &self.dead_letter {
			if tx.send(records).await.is_err() {
				warn!("worker {}: dead-letter sink closed", self.id);
			}
		}
	}
}
