//! Scan a directory of dumps into an intermediate file, then load that file
//! into the in-memory engine.

mod common;

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::sync::Arc;

use credindex::dispatch::{BulkDispatcher, DispatchConfig, PartitionConfig, PartitionSet};
use credindex::engine::{MemoryEngine, default_index_config};
use credindex::ingest::{LineScanner, RowCodec, ScanConfig};
use credindex::observability::MetricsRegistry;

fn dispatcher(engine: Arc<MemoryEngine>, config: DispatchConfig) -> BulkDispatcher {
	BulkDispatcher::new(
		engine,
		PartitionSet::new(&PartitionConfig::default()),
		RowCodec::default(),
		config,
		Arc::new(MetricsRegistry::new().expect("metrics")),
	)
}

#[tokio::test]
async fn scan_then_load_end_to_end() {
	let dir = tempfile::tempdir().expect("tempdir");
	let dumps = dir.path().join("leak_a");
	std::fs::create_dir(&dumps).expect("mkdir");

	common::write_dump(
		&dumps.join("part1.txt"),
		&[
			"Alice@Example.com:hunter2",
			"bob@mail.example.org:pa:ss:word",
			"nocolon-line",
			"_under@x.io:pw",
			"7even@seven.net:\"quoted\"",
		],
	);
	common::write_gz_dump(
		&dumps.join("part2.txt.gz"),
		&["carol@c.example:secret", "Alice@Example.com:hunter2"],
	);

	let intermediate = dir.path().join("pwd.csv");
	let scanner = LineScanner::new(ScanConfig { max_block: 2 });
	{
		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&intermediate)
			.expect("open output");
		let mut out = BufWriter::new(file);
		let summary = scanner
			.scan_dir(&dumps, Some(7), &mut out)
			.expect("scan dir");
		assert_eq!(summary.files, 2);
		assert_eq!(summary.failed_files, 0);
		assert_eq!(summary.lines, 7);
		assert_eq!(summary.records, 6);
	}

	let engine = Arc::new(MemoryEngine::new());
	let d = dispatcher(
		engine.clone(),
		DispatchConfig {
			chunk_size: 2,
			worker_count: 3,
			..DispatchConfig::default()
		},
	);
	assert_eq!(
		d.provision(&default_index_config(), false)
			.await
			.expect("provision"),
		37
	);

	let report = d.dispatch_file(&intermediate).await.expect("dispatch");
	assert_eq!(report.lines_read, 6);
	assert_eq!(report.rejected_rows, 0);
	assert_eq!(report.records, 6);
	assert_eq!(report.failed_documents, 0);

	// the duplicate Alice line collapses into one document
	assert_eq!(engine.document_count().await, 5);

	let alice = engine
		.document("pwd_a", "Alice@Example.comhunter2")
		.await
		.expect("alice stored");
	assert_eq!(alice.routing_key, "alice@example.com");
	assert_eq!(alice.record.local_part, "Alice");
	assert_eq!(alice.record.tld, "com");
	assert_eq!(alice.record.source_id, Some(7));

	let bob = engine
		.document("pwd_b", "bob@mail.example.orgpa:ss:word")
		.await
		.expect("bob stored");
	assert_eq!(bob.record.secret, "pa:ss:word");
	assert_eq!(bob.record.domain_no_tld, "mail.example");

	assert!(engine.document("pwd_misc", "_under@x.iopw").await.is_some());
	let seven = engine
		.document("pwd_7", "7even@seven.net\"quoted\"")
		.await
		.expect("quoted secret survives the round trip");
	assert_eq!(seven.record.secret, "\"quoted\"");
}

#[tokio::test]
async fn loading_twice_is_idempotent() {
	let dir = tempfile::tempdir().expect("tempdir");
	let dumps = dir.path().join("src");
	std::fs::create_dir(&dumps).expect("mkdir");
	let lines: Vec<String> = (0..500).map(|i| format!("user{i}@d{i}.com:pw{i}")).collect();
	let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
	common::write_dump(&dumps.join("dump.txt"), &refs);

	let intermediate = dir.path().join("pwd.csv");
	let mut out = std::fs::File::create(&intermediate).expect("create");
	LineScanner::default()
		.scan_dir(&dumps, Some(2), &mut out)
		.expect("scan");
	drop(out);

	let engine = Arc::new(MemoryEngine::new());
	let d = dispatcher(
		engine.clone(),
		DispatchConfig {
			chunk_size: 64,
			worker_count: 4,
			..DispatchConfig::default()
		},
	);
	d.provision(&default_index_config(), false)
		.await
		.expect("provision");

	d.dispatch_file(&intermediate).await.expect("first load");
	// second provisioning absorbs every "already exists" conflict
	d.provision(&default_index_config(), false)
		.await
		.expect("provision again");
	let second = d.dispatch_file(&intermediate).await.expect("second load");

	assert_eq!(second.records, 500);
	assert_eq!(engine.document_count().await, 500);
	assert_eq!(engine.partition_counts().await["pwd_u"], 500);
}

#[tokio::test]
async fn reset_clears_previous_documents() {
	let engine = Arc::new(MemoryEngine::new());
	let d = dispatcher(engine.clone(), DispatchConfig::default());
	d.provision(&default_index_config(), false)
		.await
		.expect("provision");

	let records = vec![credindex::ingest::CredentialRecord::from_parts(
		"a@b.c",
		"pw",
		Some(2),
	)];
	d.dispatch(records).await.expect("dispatch");
	assert_eq!(engine.document_count().await, 1);

	d.provision(&default_index_config(), true)
		.await
		.expect("reset");
	assert_eq!(engine.document_count().await, 0);
	assert_eq!(engine.partitions().await.len(), 37);
}

#[tokio::test]
async fn unreadable_directory_does_not_block_the_rest() {
	let dir = tempfile::tempdir().expect("tempdir");
	let good = dir.path().join("good");
	std::fs::create_dir(&good).expect("mkdir");
	common::write_dump(&good.join("x.txt"), &["dana@d.example:pw", "eve@e.example:pw"]);

	let intermediate = dir.path().join("pwd.csv");
	let mut out = std::fs::File::create(&intermediate).expect("create");
	let summary = LineScanner::default()
		.scan_dirs(&[dir.path().join("missing"), good], Some(2), &mut out)
		.expect("scan dirs");
	drop(out);
	assert_eq!(summary.failed_dirs, 1);
	assert_eq!(summary.records, 2);

	let engine = Arc::new(MemoryEngine::new());
	let d = dispatcher(engine.clone(), DispatchConfig::default());
	d.provision(&default_index_config(), false)
		.await
		.expect("provision");
	let report = d.dispatch_file(&intermediate).await.expect("dispatch");
	assert_eq!(report.records, 2);
	assert_eq!(engine.document_count().await, 2);
}
