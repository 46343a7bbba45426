//! Pull-based record sources feeding the dispatcher.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{error, info};

use crate::ingest::{CredentialRecord, RowCodec};

/// Counters shared between a record source and the dispatcher.
#[derive(Debug, Default)]
pub struct ReadStats {
	lines: AtomicU64,
	rejected: AtomicU64,
	truncated: AtomicBool,
}

impl ReadStats {
	pub fn lines(&self) -> u64 {
		self.lines.load(Ordering::Relaxed)
	}

	pub fn rejected(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	/// Whether the source stopped on a read error instead of end of input.
	pub fn truncated(&self) -> bool {
		self.truncated.load(Ordering::Relaxed)
	}

	fn tick(&self, progress_every: u64) {
		let n = self.lines.fetch_add(1, Ordering::Relaxed) + 1;
		if progress_every > 0 && n % progress_every == 0 {
			info!("{} lines read", n);
		}
	}

	fn reject(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}
}

/// Decodes an intermediate file row by row. Rows the decoder refuses are
/// skipped silently and only counted.
pub struct DecodedRows<R> {
	reader: R,
	codec: RowCodec,
	buf: Vec<u8>,
	stats: Arc<ReadStats>,
	progress_every: u64,
	done: bool,
}

impl<R: BufRead> DecodedRows<R> {
	pub fn new(reader: R, codec: RowCodec, progress_every: u64) -> Self {
		Self {
			reader,
			codec,
			buf: Vec::with_capacity(256),
			stats: Arc::new(ReadStats::default()),
			progress_every,
			done: false,
		}
	}

	pub fn stats(&self) -> Arc<ReadStats> {
		self.stats.clone()
	}
}

impl<R: BufRead> Iterator for DecodedRows<R> {
	type Item = CredentialRecord;

	fn next(&mut self) -> Option<CredentialRecord> {
		while !self.done {
			self.buf.clear();
			match self.reader.read_until(b'\n', &mut self.buf) {
				Ok(0) => self.done = true,
				Ok(_) => {
					self.stats.tick(self.progress_every);
					let decoded = std::str::from_utf8(&self.buf)
						.ok()
						.and_then(|line| self.codec.decode(line).ok());
					match decoded {
						Some(record) => return Some(record),
						None => self.stats.reject(),
					}
				}
				Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
				Err(e) => {
					error!("error reading rows: {}", e);
					self.stats.truncated.store(true, Ordering::Relaxed);
					self.done = true;
				}
			}
		}
		None
	}
}

/// Wraps an arbitrary record iterator so it reports the same counters.
pub struct CountedRecords<I> {
	inner: I,
	stats: Arc<ReadStats>,
	progress_every: u64,
}

impl<I> CountedRecords<I> {
	pub fn new(inner: I, progress_every: u64) -> Self {
		Self {
			inner,
			stats: Arc::new(ReadStats::default()),
			progress_every,
		}
	}

	pub fn stats(&self) -> Arc<ReadStats> {
		self.stats.clone()
	}
}

impl<I: Iterator<Item = CredentialRecord>> Iterator for CountedRecords<I> {
	type Item = CredentialRecord;

	fn next(&mut self) -> Option<CredentialRecord> {
		let record = self.inner.next()?;
		self.stats.tick(self.progress_every);
		Some(record)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::io::Cursor;

	use crate::ingest::encode_record;

	#[test]
	fn skips_rejected_rows_and_counts_them() {
		let good = encode_record(&CredentialRecord::from_parts("a@b.c", "pw", Some(2)));
		let too_long = encode_record(&CredentialRecord::from_parts("a@b.c", &"x".repeat(200), Some(2)));
		let input = format!("{good}garbage\n\"1\",\"2\"\n{too_long}{good}");

		let rows = DecodedRows::new(Cursor::new(input.into_bytes()), RowCodec::default(), 0);
		let stats = rows.stats();
		let records: Vec<CredentialRecord> = rows.collect();

		assert_eq!(records.len(), 2);
		assert_eq!(stats.lines(), 5);
		assert_eq!(stats.rejected(), 3);
		assert!(!stats.truncated());
	}

	#[test]
	fn invalid_utf8_row_is_rejected() {
		let rows = DecodedRows::new(Cursor::new(b"\"\xff\"\n".to_vec()), RowCodec::default(), 0);
		let stats = rows.stats();
		assert_eq!(rows.count(), 0);
		assert_eq!(stats.rejected(), 1);
	}

	#[test]
	fn counted_records_tally_lines() {
		let recs = vec![
			CredentialRecord::from_parts("a", "1", None),
			CredentialRecord::from_parts("b", "2", None),
		];
		let counted = CountedRecords::new(recs.into_iter(), 1);
		let stats = counted.stats();
		assert_eq!(counted.count(), 2);
		assert_eq!(stats.lines(), 2);
		assert_eq!(stats.rejected(), 0);
	}
}
