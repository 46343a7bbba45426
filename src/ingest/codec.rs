//! Wire format of the intermediate file shared by the scan and load stages.
//!
//! One record per line, seven columns, every column double-quoted, columns
//! joined by `,` and embedded quotes doubled:
//!
//! ```text
//! "identifier","local_part","full_domain","domain_no_tld","tld","secret","source_id"
//! ```
//!
//! Encoding never fails. Decoding is strict: over-long lines, unquoted lines
//! and lines that do not yield exactly seven columns are rejected.

use csv::{ReaderBuilder, StringRecord};
use thiserror::Error;

use crate::ingest::record::CredentialRecord;

/// Number of columns in an encoded row.
pub const COLUMNS: usize = 7;

/// Default decoder line-length ceiling, in characters.
pub const DEFAULT_MAX_LINE_LEN: usize = 127;

/// Reasons a row is refused by the decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("row is {len} characters long, ceiling is {max}")]
	TooLong { len: usize, max: usize },

	#[error("row is not wrapped in double quotes")]
	Unquoted,

	#[error("row has {found} columns, expected {COLUMNS}")]
	ColumnCount { found: usize },

	#[error("malformed row")]
	Csv(#[from] csv::Error),
}

/// Immutable codec settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
	/// Rows longer than this many characters (terminator included) are rejected
	pub max_line_len: usize,
}

impl Default for CodecConfig {
	fn default() -> Self {
		Self {
			max_line_len: DEFAULT_MAX_LINE_LEN,
		}
	}
}

/// Encoder/decoder pair for the intermediate format.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCodec {
	config: CodecConfig,
}

impl RowCodec {
	pub fn new(config: CodecConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> CodecConfig {
		self.config
	}

	/// Encode a record as one newline-terminated row.
	pub fn encode(&self, record: &CredentialRecord) -> String {
		encode_record(record)
	}

	/// Decode one row. The line may still carry its `\n` or `\r\n`.
	///
	/// The length ceiling applies to the row as read, terminator included,
	/// so a terminated row holds at most `max_line_len - 1` characters of
	/// content.
	///
	/// `secret_length` is never read from the row; it is recomputed from the
	/// decoded secret. An unparseable `source_id` column decodes to `None`
	/// rather than rejecting the row.
	pub fn decode(&self, line: &str) -> Result<CredentialRecord, DecodeError> {
		let raw = line;
		let line = line.strip_suffix('\n').unwrap_or(line);
		let line = line.strip_suffix('\r').unwrap_or(line);

		// a terminator counts as one character, whichever form it takes
		let len = line.chars().count() + usize::from(line.len() != raw.len());
		if len > self.config.max_line_len {
			return Err(DecodeError::TooLong {
				len,
				max: self.config.max_line_len,
			});
		}
		if line.len() < 2 || !line.starts_with('"') || !line.ends_with('"') {
			return Err(DecodeError::Unquoted);
		}

		let mut rdr = ReaderBuilder::new()
			.has_headers(false)
			.flexible(true)
			.from_reader(line.as_bytes());
		let mut row = StringRecord::new();
		if !rdr.read_record(&mut row)? {
			return Err(DecodeError::ColumnCount { found: 0 });
		}
		if row.len() != COLUMNS {
			return Err(DecodeError::ColumnCount { found: row.len() });
		}

		let source_id = row[6].trim().parse::<i64>().ok();
		Ok(CredentialRecord {
			identifier: row[0].to_string(),
			local_part: row[1].to_string(),
			full_domain: row[2].to_string(),
			domain_no_tld: row[3].to_string(),
			tld: row[4].to_string(),
			secret: row[5].to_string(),
			source_id,
		})
	}
}

fn push_quoted(out: &mut String, field: &str) {
	out.push('"');
	for c in field.chars() {
		match c {
			'"' => out.push_str("\"\""),
			'\0' => {}
			c => out.push(c),
		}
	}
	out.push('"');
}

/// Encode a record as one newline-terminated, seven-column quoted row.
pub fn encode_record(record: &CredentialRecord) -> String {
	let source_id = record.source_id.map(|s| s.to_string()).unwrap_or_default();
	let fields: [&str; COLUMNS] = [
		&record.identifier,
		&record.local_part,
		&record.full_domain,
		&record.domain_no_tld,
		&record.tld,
		&record.secret,
		&source_id,
	];

	let mut out = String::with_capacity(fields.iter().map(|f| f.len() + 3).sum::<usize>() + 1);
	for (i, field) in fields.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}
		push_quoted(&mut out, field);
	}
	out.push('\n');
	out
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use crate::ingest::record::parse_raw_line;

	#[test]
	fn encodes_seven_quoted_columns() {
		let rec = parse_raw_line("user@example.com:pw123\n", Some(2)).expect("record");
		assert_eq!(
			encode_record(&rec),
			"\"user@example.com\",\"user\",\"example.com\",\"example\",\"com\",\"pw123\",\"2\"\n"
		);
	}

	#[test]
	fn absent_source_encodes_empty_column() {
		let rec = parse_raw_line("a@b.c:d\n", None).expect("record");
		assert!(encode_record(&rec).ends_with(",\"d\",\"\"\n"));
	}

	#[test]
	fn round_trip_with_quotes_and_separator_in_secret() {
		let codec = RowCodec::default();
		let rec = parse_raw_line("we\"ird@example.org:a\",\"b\"\"c,d\n", Some(7)).expect("record");
		assert_eq!(rec.secret, "a\",\"b\"\"c,d");

		let encoded = codec.encode(&rec);
		let decoded = codec.decode(&encoded).expect("decode");
		assert_eq!(decoded, rec);
		assert_eq!(decoded.secret_length(), rec.secret_length());
	}

	#[test]
	fn rejects_lines_over_the_ceiling() {
		let codec = RowCodec::default();
		let long_secret = "x".repeat(120);
		let rec = parse_raw_line(&format!("a@b.c:{long_secret}\n"), Some(1)).expect("record");
		let encoded = codec.encode(&rec);
		assert!(encoded.trim_end().chars().count() > DEFAULT_MAX_LINE_LEN);
		assert!(matches!(
			codec.decode(&encoded),
			Err(DecodeError::TooLong { .. })
		));

		let roomy = RowCodec::new(CodecConfig { max_line_len: 1024 });
		assert_eq!(roomy.decode(&encoded).expect("decode").secret, long_secret);
	}

	fn row_of_content_len(len: usize) -> String {
		let base = parse_raw_line("a@b.c:\n", Some(1)).expect("record");
		let overhead = encode_record(&base).trim_end().chars().count();
		let secret = "s".repeat(len - overhead);
		let encoded = encode_record(&CredentialRecord::from_parts("a@b.c", &secret, Some(1)));
		assert_eq!(encoded.trim_end().chars().count(), len);
		encoded
	}

	#[test]
	fn terminator_counts_toward_the_ceiling() {
		let codec = RowCodec::default();

		let at_ceiling = row_of_content_len(DEFAULT_MAX_LINE_LEN);
		assert!(matches!(
			codec.decode(&at_ceiling),
			Err(DecodeError::TooLong { len: 128, max: 127 })
		));
		let crlf = format!("{}\r\n", at_ceiling.trim_end());
		assert!(matches!(codec.decode(&crlf), Err(DecodeError::TooLong { len: 128, .. })));

		let fits = row_of_content_len(DEFAULT_MAX_LINE_LEN - 1);
		assert!(codec.decode(&fits).is_ok());
		assert!(codec.decode(&format!("{}\r\n", fits.trim_end())).is_ok());
	}

	#[test]
	fn unterminated_last_row_uses_its_own_length() {
		let codec = RowCodec::default();
		let row = row_of_content_len(DEFAULT_MAX_LINE_LEN);
		assert!(codec.decode(row.trim_end()).is_ok());
	}

	#[test]
	fn rejects_wrong_column_count() {
		let codec = RowCodec::default();
		assert!(matches!(
			codec.decode("\"a\",\"b\",\"c\"\n"),
			Err(DecodeError::ColumnCount { found: 3 })
		));
		assert!(matches!(
			codec.decode("\"1\",\"2\",\"3\",\"4\",\"5\",\"6\",\"7\",\"8\"\n"),
			Err(DecodeError::ColumnCount { found: 8 })
		));
	}

	#[test]
	fn rejects_unquoted_rows() {
		let codec = RowCodec::default();
		assert!(matches!(
			codec.decode("a,b,c,d,e,f,g\n"),
			Err(DecodeError::Unquoted)
		));
		assert!(matches!(codec.decode("\n"), Err(DecodeError::Unquoted)));
	}

	#[test]
	fn unparseable_source_is_absent() {
		let codec = RowCodec::default();
		let rec = codec
			.decode("\"a@b.c\",\"a\",\"b.c\",\"b\",\"c\",\"pw\",\"nope\"\n")
			.expect("decode");
		assert_eq!(rec.source_id, None);
		assert_eq!(rec.secret, "pw");

		let rec = codec
			.decode("\"a@b.c\",\"a\",\"b.c\",\"b\",\"c\",\"pw\",\"42\"\r\n")
			.expect("decode");
		assert_eq!(rec.source_id, Some(42));
	}

	#[test]
	fn decoded_secret_length_is_recomputed() {
		let codec = RowCodec::default();
		let rec = codec
			.decode("\"x\",\"x\",\"\",\"\",\"\",\"héllo\",\"2\"")
			.expect("decode");
		assert_eq!(rec.secret_length(), 5);
	}

	#[test]
	fn encoded_rows_are_valid_csv() {
		let rec = parse_raw_line("q\"uote@x.y:p,w\"\n", Some(3)).expect("record");
		let encoded = encode_record(&rec);
		let mut rdr = csv::ReaderBuilder::new()
			.has_headers(false)
			.from_reader(encoded.as_bytes());
		let row = rdr.records().next().expect("row").expect("csv");
		assert_eq!(row.len(), COLUMNS);
		assert_eq!(&row[0], "q\"uote@x.y");
		assert_eq!(&row[5], "p,w\"");
	}
}
