// src/db/store.rs

use std::sync::Arc;

use chrono::NaiveDateTime;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Error as SqliteError, Row, Transaction};

use crate::db::connection::SqlitePool;
use crate::db::schema;
use crate::error::IngestError;
use crate::models::cpe::CpeRecord;
use crate::models::cve::{CveRecord, CvssMetrics};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CVE_COLUMNS: &str = "cveid, software_list, published_date, modified_date, \
	base_score, access_vector, access_complexity, authentication, \
	confidentiality_impact, integrity_impact, availability_impact, source, \
	base_generation_date, cwe_id, vulnerability_source, \
	vulnerability_source_reference, summary";

/// Handle over the pooled connection. Owns nothing global: it is
/// constructed once at startup and passed down to the pipeline and the
/// query facade.
#[derive(Clone)]
pub struct Store {
	pool: Arc<SqlitePool>,
}

impl Store {
	pub fn new(pool: Arc<SqlitePool>) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> Arc<SqlitePool> {
		self.pool.clone()
	}

	fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, IngestError> {
		self.pool.get().map_err(IngestError::from)
	}

	/// Run `f` inside a single transaction. Commits on success; on any
	/// error path the transaction is dropped and rusqlite rolls it back.
	/// Lookups inside `f` see writes made earlier in the same transaction.
	pub fn with_transaction<T>(
		&self,
		f: impl FnOnce(&Transaction) -> Result<T, IngestError>,
	) -> Result<T, IngestError> {
		let mut conn = self.connection()?;
		let tx = conn.transaction().map_err(tx_err)?;
		let value = f(&tx)?;
		tx.commit().map_err(tx_err)?;
		Ok(value)
	}
}

fn tx_err(err: rusqlite::Error) -> IngestError {
	IngestError::from_sqlite(err, "transaction")
}

/// Fetch a CVE row by its unique id within an open transaction.
pub fn get_cve(tx: &Transaction, cve_id: &str) -> Result<Option<CveRecord>, IngestError> {
	let sql = format!("SELECT {} FROM CveItem WHERE cveid = ?1", CVE_COLUMNS);
	let mut stmt = tx
		.prepare(&sql)
		.map_err(|e| IngestError::from_sqlite(e, cve_id))?;
	let mut rows = stmt
		.query(params![cve_id])
		.map_err(|e| IngestError::from_sqlite(e, cve_id))?;

	match rows.next().map_err(|e| IngestError::from_sqlite(e, cve_id))? {
		Some(row) => Ok(Some(
			cve_from_row(row).map_err(|e| IngestError::from_sqlite(e, cve_id))?,
		)),
		None => Ok(None),
	}
}

/// Insert a brand-new CVE row, all fields included.
pub fn insert_cve(tx: &Transaction, record: &CveRecord) -> Result<(), IngestError> {
	let sql = format!(
		"INSERT INTO CveItem ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
		CVE_COLUMNS
	);
	tx.execute(
		&sql,
		params![
			record.cve_id,
			encode_list(&record.software_list),
			format_datetime(record.published_date),
			format_datetime(record.modified_date),
			record.cvss.base_score,
			record.cvss.access_vector,
			record.cvss.access_complexity,
			record.cvss.authentication,
			record.cvss.confidentiality_impact,
			record.cvss.integrity_impact,
			record.cvss.availability_impact,
			record.cvss.source,
			format_datetime(record.cvss.base_generation_date),
			encode_list(&record.cwe_id),
			encode_list(&record.vulnerability_source),
			encode_list(&record.vulnerability_source_reference),
			record.summary,
		],
	)
	.map_err(|e| IngestError::from_sqlite(e, &record.cve_id))?;
	Ok(())
}

/// Merge path for an existing CVE row: every mergeable field takes the
/// incoming value, the CVSS columns are left untouched.
pub fn update_cve_fields(tx: &Transaction, record: &CveRecord) -> Result<(), IngestError> {
	tx.execute(
		"UPDATE CveItem SET
			software_list = ?2,
			published_date = ?3,
			modified_date = ?4,
			cwe_id = ?5,
			vulnerability_source = ?6,
			vulnerability_source_reference = ?7,
			summary = ?8
		 WHERE cveid = ?1",
		params![
			record.cve_id,
			encode_list(&record.software_list),
			format_datetime(record.published_date),
			format_datetime(record.modified_date),
			encode_list(&record.cwe_id),
			encode_list(&record.vulnerability_source),
			encode_list(&record.vulnerability_source_reference),
			record.summary,
		],
	)
	.map_err(|e| IngestError::from_sqlite(e, &record.cve_id))?;
	Ok(())
}

pub fn insert_cpe(tx: &Transaction, record: &CpeRecord) -> Result<(), IngestError> {
	tx.execute(
		"INSERT INTO CpeItem (cpeid, cpetext, cpe_2_3, classification, vendor, product, version, product_ref)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
		params![
			record.cpeid,
			record.cpetext,
			record.cpe_2_3,
			record.classification,
			record.vendor,
			record.product,
			record.version,
			record.product_ref,
		],
	)
	.map_err(|e| IngestError::from_sqlite(e, &record.cpeid))?;
	Ok(())
}

/// Drop and recreate the CPE table inside the open transaction so the
/// replace and the reinsert commit or roll back together.
pub fn recreate_cpe_table(tx: &Transaction) -> Result<(), IngestError> {
	schema::recreate_cpe_table(tx).map_err(|e| IngestError::Schema {
		message: e.to_string(),
	})
}

/// Map a row selected with `CVE_COLUMNS` back into a record.
pub fn cve_from_row(row: &Row) -> rusqlite::Result<CveRecord> {
	Ok(CveRecord {
		cve_id: row.get(0)?,
		software_list: decode_list(row.get(1)?)?,
		published_date: parse_datetime(row.get(2)?),
		modified_date: parse_datetime(row.get(3)?),
		cvss: CvssMetrics {
			base_score: row.get(4)?,
			access_vector: row.get(5)?,
			access_complexity: row.get(6)?,
			authentication: row.get(7)?,
			confidentiality_impact: row.get(8)?,
			integrity_impact: row.get(9)?,
			availability_impact: row.get(10)?,
			source: row.get(11)?,
			base_generation_date: parse_datetime(row.get(12)?),
		},
		cwe_id: decode_list(row.get(13)?)?,
		vulnerability_source: decode_list(row.get(14)?)?,
		vulnerability_source_reference: decode_list(row.get(15)?)?,
		summary: row.get(16)?,
	})
}

/// Array-valued columns are stored as JSON-encoded ordered string arrays.
fn encode_list(values: &[String]) -> String {
	serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(encoded: Option<String>) -> rusqlite::Result<Vec<String>> {
	match encoded {
		Some(text) => serde_json::from_str(&text).map_err(|_| SqliteError::InvalidQuery),
		None => Ok(Vec::new()),
	}
}

fn format_datetime(value: Option<NaiveDateTime>) -> Option<String> {
	value.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_datetime(value: Option<String>) -> Option<NaiveDateTime> {
	value.and_then(|d| NaiveDateTime::parse_from_str(&d, DATE_FORMAT).ok())
}
