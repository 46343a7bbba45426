//! Large inputs stay within batch bounds and load completely.

#[cfg(feature = "ingest-tests")]
mod large_file_tests {
	use std::io::Cursor;
	use std::sync::Arc;

	use credindex::dispatch::{BulkDispatcher, DispatchConfig, PartitionConfig, PartitionSet};
	use credindex::engine::{MemoryEngine, default_index_config};
	use credindex::ingest::{LineScanner, RowCodec, ScanConfig};
	use credindex::observability::MetricsRegistry;

	/// 250k raw lines come out as 100k + 100k + 50k batches.
	#[test]
	fn scan_250k_lines_in_bounded_batches() {
		let mut raw = String::new();
		for i in 0..250_000 {
			raw.push_str(&format!("user{i}@example{}.com:pw{i}\n", i % 97));
		}

		let scanner = LineScanner::new(ScanConfig::default());
		let mut batches = scanner.scan_reader(Cursor::new(raw.into_bytes()), "generated", Some(2));
		let sizes: Vec<usize> = batches.by_ref().map(|b| b.len()).collect();
		assert_eq!(sizes, vec![100_000, 100_000, 50_000]);
		assert_eq!(batches.lines_read(), 250_000);
		assert!(batches.failure().is_none());
	}

	/// 120k encoded rows load through many chunks without loss.
	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn load_120k_rows() {
		let mut rows = String::new();
		let scanner = LineScanner::default();
		let mut raw = String::new();
		for i in 0..120_000 {
			raw.push_str(&format!("{}{i}@example.com:pw\n", (b'a' + (i % 26) as u8) as char));
		}
		for batch in scanner.scan_reader(Cursor::new(raw.into_bytes()), "generated", Some(2)) {
			for row in batch {
				rows.push_str(&row);
			}
		}

		let engine = Arc::new(MemoryEngine::new());
		let d = BulkDispatcher::new(
			engine.clone(),
			PartitionSet::new(&PartitionConfig::default()),
			RowCodec::default(),
			DispatchConfig {
				chunk_size: 5_000,
				..DispatchConfig::default()
			},
			Arc::new(MetricsRegistry::new().expect("metrics")),
		);
		d.provision(&default_index_config(), false)
			.await
			.expect("provision");

		let report = d
			.dispatch_reader(Cursor::new(rows.into_bytes()))
			.await
			.expect("dispatch");
		assert_eq!(report.records, 120_000);
		assert_eq!(report.chunks, 24);
		assert_eq!(engine.document_count().await, 120_000);
		assert_eq!(engine.partition_counts().await["pwd_z"], 120_000 / 26);
	}
}
