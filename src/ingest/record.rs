//! The normalized credential record and the purely syntactic decomposition
//! of a raw `identifier:secret` line into it.
//!
//! Nothing here validates addresses. A malformed "email" still produces a
//! best-effort split based on the positions of the first `@` and the last
//! `.` after it.

use serde::{Deserialize, Serialize};

/// One normalized line of a dump.
///
/// Field values are held unescaped; quoting for the intermediate file is
/// the codec's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Everything left of the first colon, NUL bytes removed
	pub identifier: String,
	/// Left of the first `@`, or the whole identifier when there is none
	pub local_part: String,
	/// Right of the first `@`, empty when there is none
	pub full_domain: String,
	/// `full_domain` up to its last `.`
	pub domain_no_tld: String,
	/// `full_domain` after its last `.`, empty when there is no dot
	pub tld: String,
	/// Everything right of the first colon, line terminator stripped
	pub secret: String,
	/// Source tag; `None` when it could not be recovered on reload
	pub source_id: Option<i64>,
}

/// The four identifier-derived columns of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierParts<'a> {
	pub local_part: &'a str,
	pub full_domain: &'a str,
	pub domain_no_tld: &'a str,
	pub tld: &'a str,
}

/// Split an identifier once on the first `@`, then split the remainder once
/// on its last `.`.
///
/// Multi-label suffixes are not special-cased: `b.co.uk` yields
/// `domain_no_tld = "b.co"` and `tld = "uk"`.
pub fn decompose_identifier(identifier: &str) -> IdentifierParts<'_> {
	let Some((local_part, full_domain)) = identifier.split_once('@') else {
		return IdentifierParts {
			local_part: identifier,
			full_domain: "",
			domain_no_tld: "",
			tld: "",
		};
	};

	match full_domain.rsplit_once('.') {
		Some((domain_no_tld, tld)) => IdentifierParts {
			local_part,
			full_domain,
			domain_no_tld,
			tld,
		},
		None => IdentifierParts {
			local_part,
			full_domain,
			domain_no_tld: full_domain,
			tld: "",
		},
	}
}

/// Remove NUL bytes, which the intermediate format never carries.
pub fn strip_nul(value: &str) -> String {
	if value.contains('\0') {
		value.replace('\0', "")
	} else {
		value.to_string()
	}
}

impl CredentialRecord {
	/// Build a record from an already separated identifier and secret.
	pub fn from_parts(identifier: &str, secret: &str, source_id: Option<i64>) -> Self {
		let identifier = strip_nul(identifier);
		let secret = strip_nul(secret);
		let parts = decompose_identifier(&identifier);

		Self {
			local_part: parts.local_part.to_string(),
			full_domain: parts.full_domain.to_string(),
			domain_no_tld: parts.domain_no_tld.to_string(),
			tld: parts.tld.to_string(),
			identifier,
			secret,
			source_id,
		}
	}

	/// Character count of the secret. Always derived, never stored.
	pub fn secret_length(&self) -> usize {
		self.secret.chars().count()
	}
}

/// Parse one raw dump line.
///
/// Only the first colon separates identifier from secret. A line without a
/// colon is not a record and yields `None`.
pub fn parse_raw_line(line: &str, source_id: Option<i64>) -> Option<CredentialRecord> {
	let (identifier, secret) = line.split_once(':')?;
	let secret = secret.strip_suffix('\n').unwrap_or(secret);
	let secret = secret.strip_suffix('\r').unwrap_or(secret);
	Some(CredentialRecord::from_parts(identifier, secret, source_id))
}
