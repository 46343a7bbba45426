use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "credindex";

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Scan metrics
	pub scan_files_total: IntCounter,
	pub scan_file_errors_total: IntCounter,
	pub scan_lines_total: IntCounter,
	pub scan_records_total: IntCounter,

	// Dispatch metrics
	pub dispatch_lines_total: IntCounter,
	pub dispatch_rejected_rows_total: IntCounter,
	pub dispatch_records_total: IntCounter,
	pub dispatch_chunks_total: IntCounter,
	pub dispatch_chunk_failures_total: IntCounter,
	pub dispatch_document_failures_total: IntCounter,
	pub dispatch_chunk_latency_ms: Histogram,

	// Partition provisioning
	pub setup_conflicts_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
	let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
	registry.register(Box::new(c.clone()))?;
	Ok(c)
}

impl MetricsRegistry {
	pub fn new() -> prometheus::Result<Self> {
		let registry = Registry::new();

		let scan_files_total = counter(&registry, "scan_files_total", "Input files scanned")?;
		let scan_file_errors_total = counter(
			&registry,
			"scan_file_errors_total",
			"Input files that could not be opened or failed mid-read",
		)?;
		let scan_lines_total = counter(&registry, "scan_lines_total", "Raw lines read")?;
		let scan_records_total = counter(
			&registry,
			"scan_records_total",
			"Raw lines normalized into rows",
		)?;

		let dispatch_lines_total = counter(
			&registry,
			"dispatch_lines_total",
			"Intermediate rows read by the dispatcher",
		)?;
		let dispatch_rejected_rows_total = counter(
			&registry,
			"dispatch_rejected_rows_total",
			"Intermediate rows refused by the decoder",
		)?;
		let dispatch_records_total = counter(
			&registry,
			"dispatch_records_total",
			"Write actions handed to the worker pool",
		)?;
		let dispatch_chunks_total = counter(
			&registry,
			"dispatch_chunks_total",
			"Bulk submissions attempted",
		)?;
		let dispatch_chunk_failures_total = counter(
			&registry,
			"dispatch_chunk_failures_total",
			"Bulk submissions that failed or timed out as a whole",
		)?;
		let dispatch_document_failures_total = counter(
			&registry,
			"dispatch_document_failures_total",
			"Documents the engine did not store",
		)?;

		let dispatch_chunk_latency_ms = Histogram::with_opts(
			HistogramOpts::new(
				"dispatch_chunk_latency_ms",
				"Bulk submission latency in milliseconds",
			)
			.namespace(NAMESPACE)
			.buckets(vec![
				10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0, 120000.0, 480000.0,
			]),
		)?;
		registry.register(Box::new(dispatch_chunk_latency_ms.clone()))?;

		let setup_conflicts_total = counter(
			&registry,
			"setup_conflicts_total",
			"Partition setup requests answered with already-exists or bad-request",
		)?;

		Ok(Self {
			registry,
			scan_files_total,
			scan_file_errors_total,
			scan_lines_total,
			scan_records_total,
			dispatch_lines_total,
			dispatch_rejected_rows_total,
			dispatch_records_total,
			dispatch_chunks_total,
			dispatch_chunk_failures_total,
			dispatch_document_failures_total,
			dispatch_chunk_latency_ms,
			setup_conflicts_total,
		})
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				log::warn!("failed to encode metrics: {}", e);
				String::new()
			}
		}
	}

	/// Write the text exposition to `path`, e.g. for a node-exporter
	/// textfile collector.
	pub fn write_textfile(&self, path: &std::path::Path) -> std::io::Result<()> {
		std::fs::write(path, self.encode())
	}
}

/// Initialize the run's metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()?))
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new().expect("registry");
		assert!(!registry.encode().is_empty());
	}

	#[test]
	fn metrics_increment() {
		let registry = super::MetricsRegistry::new().expect("registry");
		registry.scan_lines_total.inc();
		registry.dispatch_records_total.inc_by(10);
		let text = registry.encode();
		assert!(text.contains("credindex_dispatch_records_total 10"));
		assert!(text.contains("credindex_scan_lines_total 1"));
	}

	#[test]
	fn textfile_is_written() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("credindex.prom");
		let registry = super::MetricsRegistry::new().expect("registry");
		registry.write_textfile(&path).expect("write");
		let body = std::fs::read_to_string(&path).expect("read");
		assert!(body.contains("credindex_scan_files_total"));
	}
}
