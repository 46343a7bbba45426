//! Optional sink for documents the engine did not store.
//!
//! Failed records are appended to a file in the intermediate row format, so
//! the file can be fed straight back to the load stage. A single writer task
//! owns the file; workers only hold channel senders.

use std::io;
use std::path::{Path, PathBuf};

use log::info;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ingest::{CredentialRecord, encode_record};

pub type DeadLetterSender = mpsc::Sender<Vec<CredentialRecord>>;

pub struct DeadLetterSink {
	path: PathBuf,
	tx: DeadLetterSender,
	writer: JoinHandle<io::Result<u64>>,
}

impl DeadLetterSink {
	/// Open (or create) `path` for appending and start the writer task.
	pub async fn open(path: &Path, capacity: usize) -> io::Result<Self> {
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(path)
			.await?;
		let (tx, mut rx) = mpsc::channel::<Vec<CredentialRecord>>(capacity.max(1));

		let writer = tokio::spawn(async move {
			let mut out = BufWriter::new(file);
			let mut written = 0u64;
			while let Some(records) = rx.recv().await {
				for record in &records {
					out.write_all(encode_record(record).as_bytes()).await?;
					written += 1;
				}
			}
			out.flush().await?;
			Ok::<u64, io::Error>(written)
		});

		Ok(Self {
			path: path.to_path_buf(),
			tx,
			writer,
		})
	}

	pub fn sender(&self) -> DeadLetterSender {
		self.tx.clone()
	}

	/// Close the sink once every sender clone is gone and return the number
	/// of records written.
	pub async fn finish(self) -> io::Result<u64> {
		drop(self.tx);
		let written = self.writer.await.map_err(io::Error::other)??;
		if written > 0 {
			info!("{} failed documents written to {}", written, self.path.display());
		}
		Ok(written)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::ingest::RowCodec;

	#[tokio::test]
	async fn failed_records_round_trip_through_the_file() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("dead.csv");

		let sink = DeadLetterSink::open(&path, 4).await.expect("open");
		let tx = sink.sender();
		tx.send(vec![
			CredentialRecord::from_parts("a@b.c", "one", Some(2)),
			CredentialRecord::from_parts("d@e.f", "two", None),
		])
		.await
		.expect("send");
		drop(tx);
		assert_eq!(sink.finish().await.expect("finish"), 2);

		let text = std::fs::read_to_string(&path).expect("read");
		let codec = RowCodec::default();
		let secrets: Vec<String> = text
			.lines()
			.map(|l| codec.decode(l).expect("decode").secret)
			.collect();
		assert_eq!(secrets, vec!["one", "two"]);
	}

	#[tokio::test]
	async fn appends_to_existing_file() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("dead.csv");
		std::fs::write(&path, "previous\n").expect("seed");

		let sink = DeadLetterSink::open(&path, 1).await.expect("open");
		sink.sender()
			.send(vec![CredentialRecord::from_parts("x", "y", None)])
			.await
			.expect("send");
		sink.finish().await.expect("finish");

		let text = std::fs::read_to_string(&path).expect("read");
		assert!(text.starts_with("previous\n"));
		assert_eq!(text.lines().count(), 2);
	}
}
