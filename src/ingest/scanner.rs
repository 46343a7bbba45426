//! Streaming line scanner over raw dump files.
//!
//! A file is never held in memory: lines are pulled one at a time and
//! handed out as batches of encoded rows, each at most `max_block` long.
//! Batches come from an ordinary [`Iterator`]; restarting a scan means
//! calling the producing method again.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use log::{error, info, warn};
use thiserror::Error;

use crate::ingest::codec::encode_record;
use crate::ingest::record::parse_raw_line;
use crate::observability::{MetricsRegistry, error_chain};

/// Default ceiling on the number of rows in one batch.
pub const DEFAULT_MAX_BLOCK: usize = 100_000;

/// A bounded run of encoded rows, each newline-terminated.
pub type Batch = Vec<String>;

/// File-level I/O failures.
#[derive(Debug, Error)]
pub enum IngestError {
	#[error("failed to open {path}")]
	Open { path: PathBuf, source: io::Error },

	#[error("failed to read {path}")]
	Read { path: PathBuf, source: io::Error },

	#[error("failed to list {path}")]
	ReadDir { path: PathBuf, source: io::Error },

	#[error("failed to write rows")]
	Write { source: io::Error },
}

/// Immutable scanner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
	pub max_block: usize,
}

impl Default for ScanConfig {
	fn default() -> Self {
		Self {
			max_block: DEFAULT_MAX_BLOCK,
		}
	}
}

/// Totals for one or more scanned inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
	pub files: usize,
	pub failed_files: usize,
	/// Directories that could not be listed
	pub failed_dirs: usize,
	pub lines: u64,
	pub records: u64,
}

impl ScanSummary {
	pub fn merge(&mut self, other: ScanSummary) {
		self.files += other.files;
		self.failed_files += other.failed_files;
		self.failed_dirs += other.failed_dirs;
		self.lines += other.lines;
		self.records += other.records;
	}
}

/// Lazy sequence of batches over one input.
///
/// A read failure (I/O error, corrupt compressed stream) is logged, ends the
/// sequence early and is kept for inspection through [`ScanBatches::failure`].
/// Rows gathered before the failure are still yielded.
pub struct ScanBatches<R> {
	reader: R,
	origin: PathBuf,
	source_id: Option<i64>,
	max_block: usize,
	buf: Vec<u8>,
	done: bool,
	failure: Option<IngestError>,
	lines: u64,
	records: u64,
}

impl<R: BufRead> ScanBatches<R> {
	fn new(reader: R, origin: PathBuf, source_id: Option<i64>, max_block: usize) -> Self {
		Self {
			reader,
			origin,
			source_id,
			max_block: max_block.max(1),
			buf: Vec::with_capacity(256),
			done: false,
			failure: None,
			lines: 0,
			records: 0,
		}
	}

	/// Lines read so far, records or not.
	pub fn lines_read(&self) -> u64 {
		self.lines
	}

	/// Rows emitted so far.
	pub fn records_emitted(&self) -> u64 {
		self.records
	}

	/// The read error that stopped the scan, if any.
	pub fn failure(&self) -> Option<&IngestError> {
		self.failure.as_ref()
	}
}

impl<R: BufRead> Iterator for ScanBatches<R> {
	type Item = Batch;

	fn next(&mut self) -> Option<Batch> {
		if self.done {
			return None;
		}

		let mut batch = Vec::new();
		loop {
			self.buf.clear();
			match self.reader.read_until(b'\n', &mut self.buf) {
				Ok(0) => {
					self.done = true;
					break;
				}
				Ok(_) => {
					self.lines += 1;
					let line = decode_ignoring_invalid(&self.buf);
					if let Some(record) = parse_raw_line(&line, self.source_id) {
						batch.push(encode_record(&record));
						self.records += 1;
						if batch.len() >= self.max_block {
							return Some(batch);
						}
					}
				}
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => {
					let failure = IngestError::Read {
						path: self.origin.clone(),
						source: e,
					};
					error!("{}", error_chain(&failure));
					self.failure = Some(failure);
					self.done = true;
					break;
				}
			}
		}

		if batch.is_empty() { None } else { Some(batch) }
	}
}

/// Decode bytes as UTF-8, dropping undecodable sequences instead of
/// replacing them.
fn decode_ignoring_invalid(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len());
	for chunk in bytes.utf8_chunks() {
		out.push_str(chunk.valid());
	}
	out
}

fn is_gzip(path: &Path) -> bool {
	path.extension()
		.and_then(|e| e.to_str())
		.is_some_and(|e| e.eq_ignore_ascii_case("gz"))
}

/// Turns raw dump files into batches of encoded rows.
#[derive(Clone, Default)]
pub struct LineScanner {
	config: ScanConfig,
	metrics: Option<Arc<MetricsRegistry>>,
}

impl LineScanner {
	pub fn new(config: ScanConfig) -> Self {
		Self {
			config,
			metrics: None,
		}
	}

	/// Record scan counters in `metrics`.
	pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	/// Scan an already open reader. `origin` only labels error messages.
	pub fn scan_reader<R: BufRead>(
		&self,
		reader: R,
		origin: impl Into<PathBuf>,
		source_id: Option<i64>,
	) -> ScanBatches<R> {
		ScanBatches::new(reader, origin.into(), source_id, self.config.max_block)
	}

	/// Open and scan one file. Files ending in `.gz` are decompressed on
	/// the fly.
	pub fn scan_file(
		&self,
		path: &Path,
		source_id: Option<i64>,
	) -> Result<ScanBatches<Box<dyn BufRead + Send>>, IngestError> {
		let file = File::open(path).map_err(|source| IngestError::Open {
			path: path.to_path_buf(),
			source,
		})?;

		let reader: Box<dyn BufRead + Send> = if is_gzip(path) {
			Box::new(BufReader::new(MultiGzDecoder::new(file)))
		} else {
			Box::new(BufReader::new(file))
		};

		Ok(self.scan_reader(reader, path, source_id))
	}

	/// Scan every regular file directly inside `dir`, tagging rows with
	/// `source_id` and appending them to `out`.
	///
	/// A file that cannot be opened or fails mid-read is reported and
	/// skipped; the remaining files are still scanned. Only failing to list
	/// the directory or to write rows aborts the call.
	pub fn scan_dir<W: Write>(
		&self,
		dir: &Path,
		source_id: Option<i64>,
		out: &mut W,
	) -> Result<ScanSummary, IngestError> {
		let source_name = dir
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_else(|| dir.display().to_string());

		let mut files: Vec<PathBuf> = fs::read_dir(dir)
			.map_err(|source| IngestError::ReadDir {
				path: dir.to_path_buf(),
				source,
			})?
			.filter_map(|entry| entry.ok().map(|e| e.path()))
			.collect();
		files.sort();

		let mut summary = ScanSummary::default();
		for path in files {
			if !path.is_file() {
				warn!("skipping {}: not a regular file", path.display());
				continue;
			}
			let file_name = path
				.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_default();
			info!("source {} file {}", source_name, file_name);

			let file_summary = self.scan_into(&path, source_id, out)?;
			summary.merge(file_summary);
			info!("records so far: {}", summary.records);
		}

		info!("total records from {}: {}", source_name, summary.records);
		Ok(summary)
	}

	/// Scan several directories in order into one writer.
	///
	/// A directory that cannot be listed is reported, counted in
	/// `failed_dirs` and skipped. Only a failed write stops the run.
	pub fn scan_dirs<W: Write>(
		&self,
		dirs: &[PathBuf],
		source_id: Option<i64>,
		out: &mut W,
	) -> Result<ScanSummary, IngestError> {
		let mut total = ScanSummary::default();
		for dir in dirs {
			match self.scan_dir(dir, source_id, out) {
				Ok(summary) => total.merge(summary),
				Err(e @ IngestError::Write { .. }) => return Err(e),
				Err(e) => {
					error!("{}", error_chain(&e));
					total.failed_dirs += 1;
				}
			}
		}
		Ok(total)
	}

	/// Scan one file and append its rows to `out`.
	pub fn scan_into<W: Write>(
		&self,
		path: &Path,
		source_id: Option<i64>,
		out: &mut W,
	) -> Result<ScanSummary, IngestError> {
		let mut summary = ScanSummary {
			files: 1,
			..ScanSummary::default()
		};

		let mut batches = match self.scan_file(path, source_id) {
			Ok(b) => b,
			Err(e) => {
				error!("{}", error_chain(&e));
				summary.failed_files = 1;
				self.record(&summary);
				return Ok(summary);
			}
		};

		for batch in batches.by_ref() {
			for row in &batch {
				out.write_all(row.as_bytes())
					.map_err(|source| IngestError::Write { source })?;
			}
		}

		summary.lines = batches.lines_read();
		summary.records = batches.records_emitted();
		if batches.failure().is_some() {
			summary.failed_files = 1;
		}
		self.record(&summary);
		Ok(summary)
	}

	fn record(&self, summary: &ScanSummary) {
		if let Some(m) = &self.metrics {
			m.scan_files_total.inc_by(summary.files as u64);
			m.scan_file_errors_total.inc_by(summary.failed_files as u64);
			m.scan_lines_total.inc_by(summary.lines);
			m.scan_records_total.inc_by(summary.records);
		}
	}
}
