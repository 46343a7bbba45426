pub mod codec;
pub mod record;
pub mod scanner;

pub use codec::{CodecConfig, DecodeError, RowCodec, encode_record};
pub use record::{CredentialRecord, decompose_identifier, parse_raw_line};
pub use scanner::{Batch, IngestError, LineScanner, ScanBatches, ScanConfig, ScanSummary};

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn module_loaded() {
		// smoke test that module compiles and exports `CredentialRecord`
		let _ = std::mem::size_of::<crate::ingest::CredentialRecord>();
	}
}
