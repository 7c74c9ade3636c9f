// src/error.rs

use thiserror::Error;

/// Typed failures surfaced by the ingestion pipeline and the store.
///
/// Every variant aborts the enclosing transaction; nothing is retried
/// here. Retry and backoff belong to the caller.
#[derive(Debug, Error)]
pub enum IngestError {
	#[error("duplicate key '{key}': insert attempted on an existing unique key")]
	DuplicateKey { key: String },

	#[error("invalid record '{key}': {reason}")]
	Validation { key: String, reason: String },

	#[error("database connection failure: {message}")]
	Connection { message: String },

	#[error("schema error: {message} (run `vulnhub dbinit --all` to initialize tables)")]
	Schema { message: String },
}

impl IngestError {
	pub fn validation(key: impl Into<String>, reason: impl Into<String>) -> Self {
		IngestError::Validation {
			key: key.into(),
			reason: reason.into(),
		}
	}

	/// Classify a rusqlite error in the context of a write keyed by `key`.
	pub fn from_sqlite(err: rusqlite::Error, key: &str) -> Self {
		if let rusqlite::Error::SqliteFailure(failure, _) = &err {
			if failure.code == rusqlite::ErrorCode::ConstraintViolation {
				return IngestError::DuplicateKey {
					key: key.to_string(),
				};
			}
		}
		if err.to_string().contains("no such table") {
			return IngestError::Schema {
				message: err.to_string(),
			};
		}
		IngestError::Connection {
			message: err.to_string(),
		}
	}
}

impl From<r2d2::Error> for IngestError {
	fn from(err: r2d2::Error) -> Self {
		IngestError::Connection {
			message: err.to_string(),
		}
	}
}
