/// Common test utilities and helpers for integration tests.
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Check if live engine tests are enabled via environment variable.
pub fn is_engine_test_enabled() -> bool {
	env::var("RUN_ENGINE_INTEGRATION_TESTS").is_ok()
}

/// Skip the test with a message if live engine tests are not enabled.
/// Returns true if the test should proceed, false if it should be skipped.
#[allow(dead_code)]
pub fn check_engine_enabled() -> bool {
	if !is_engine_test_enabled() {
		eprintln!("Skipping live engine test; set RUN_ENGINE_INTEGRATION_TESTS=1 to enable");
		return false;
	}
	true
}

/// Engine endpoint for live tests, `CRX_TEST_ENGINE_URL` or the local default.
#[allow(dead_code)]
pub fn engine_url() -> String {
	env::var("CRX_TEST_ENGINE_URL").unwrap_or_else(|_| "http://127.0.0.1:9200".to_string())
}

/// Write a raw dump file, one `identifier:secret` line per entry.
#[allow(dead_code)]
pub fn write_dump(path: &Path, lines: &[&str]) {
	let mut body = lines.join("\n");
	body.push('\n');
	fs::write(path, body).expect("write dump");
}

/// Same as [`write_dump`] but gzip-compressed.
#[allow(dead_code)]
pub fn write_gz_dump(path: &Path, lines: &[&str]) {
	let file = fs::File::create(path).expect("create gz");
	let mut enc = GzEncoder::new(file, Compression::default());
	for line in lines {
		enc.write_all(line.as_bytes()).expect("write gz");
		enc.write_all(b"\n").expect("write gz");
	}
	enc.finish().expect("finish gz");
}
