// src/repositories/ingestion.rs

use log::{debug, info};
use rusqlite::Transaction;
use tokio::task;

use crate::db::store::{self, Store};
use crate::error::IngestError;
use crate::models::cpe::CpeRecord;
use crate::models::cve::CveRecord;

/// Applies batches of CVE and CPE records to the store with the
/// insert-vs-merge policy and transactional atomicity.
///
/// CVE ingestion upserts: a new `cve_id` is inserted, an existing one is
/// merged with its CVSS columns left at their first-seen values. CPE
/// ingestion is a full replace of the dictionary. No operation retries;
/// connection failures surface to the caller.
#[derive(Clone)]
pub struct IngestionPipeline {
	store: Store,
}

impl IngestionPipeline {
	pub fn new(store: Store) -> Self {
		Self { store }
	}

	/// Upsert a single CVE in its own transaction. Any failure rolls the
	/// record back; no partial field writes become visible.
	pub async fn ingest_cve(&self, record: CveRecord) -> Result<(), IngestError> {
		let store = self.store.clone();
		run_blocking(move || {
			record.validate()?;
			store.with_transaction(|tx| apply_cve(tx, &record))
		})
		.await
	}

	/// Upsert an ordered batch of CVEs as one transaction. A record
	/// inserted earlier in the batch is visible to merge resolution for a
	/// later duplicate, so the outcome is deterministic for a given
	/// ordering. If any record fails, the whole batch rolls back.
	pub async fn ingest_cve_batch(&self, records: Vec<CveRecord>) -> Result<usize, IngestError> {
		let store = self.store.clone();
		run_blocking(move || {
			store.with_transaction(|tx| {
				for record in &records {
					record.validate()?;
					apply_cve(tx, record)?;
				}
				Ok(records.len())
			})
		})
		.await
		.map(|count| {
			info!("Ingested CVE batch of {} records", count);
			count
		})
	}

	/// Replace the whole CPE dictionary: drop and recreate the table,
	/// then insert every record, all inside one transaction. There is no
	/// incremental merge for CPEs; upstream redistributes the dictionary
	/// in full.
	pub async fn ingest_cpe_batch(&self, records: Vec<CpeRecord>) -> Result<usize, IngestError> {
		let store = self.store.clone();
		run_blocking(move || {
			store.with_transaction(|tx| {
				store::recreate_cpe_table(tx)?;
				for record in &records {
					record.validate()?;
					store::insert_cpe(tx, record)?;
				}
				Ok(records.len())
			})
		})
		.await
		.map(|count| {
			info!("Replaced CPE dictionary with {} records", count);
			count
		})
	}
}

/// Insert-vs-merge resolution against the state visible inside the open
/// transaction.
fn apply_cve(tx: &Transaction, record: &CveRecord) -> Result<(), IngestError> {
	match store::get_cve(tx, &record.cve_id)? {
		Some(_) => {
			debug!("Merging existing CVE {}", record.cve_id);
			store::update_cve_fields(tx, record)
		}
		None => store::insert_cve(tx, record),
	}
}

async fn run_blocking<T, F>(f: F) -> Result<T, IngestError>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T, IngestError> + Send + 'static,
{
	task::spawn_blocking(f)
		.await
		.map_err(|e| IngestError::Connection {
			message: format!("blocking task failed: {}", e),
		})?
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{connection, schema};
	use crate::models::cve::CvssMetrics;
	use anyhow::Result;
	use chrono::NaiveDate;
	use std::sync::Arc;
	use tempfile::tempdir;

	async fn setup_pipeline() -> Result<(tempfile::TempDir, Store, IngestionPipeline)> {
		let dir = tempdir()?;
		let db_path = dir.path().join("test.db");
		let pool = Arc::new(connection::establish_pool_with_path(db_path)?);

		let conn = pool.get()?;
		schema::create_tables(&conn)?;
		drop(conn);

		let store = Store::new(pool);
		let pipeline = IngestionPipeline::new(store.clone());
		Ok((dir, store, pipeline))
	}

	fn sample_cve(cve_id: &str, software: &str, base_score: f64, summary: &str) -> CveRecord {
		CveRecord {
			cve_id: cve_id.to_string(),
			software_list: vec![software.to_string()],
			published_date: NaiveDate::from_ymd_opt(2020, 1, 15).and_then(|d| d.and_hms_opt(10, 30, 0)),
			modified_date: NaiveDate::from_ymd_opt(2020, 2, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
			cvss: CvssMetrics {
				base_score: Some(base_score),
				access_vector: Some("NETWORK".to_string()),
				access_complexity: Some("LOW".to_string()),
				authentication: Some("NONE".to_string()),
				confidentiality_impact: Some("PARTIAL".to_string()),
				integrity_impact: Some("PARTIAL".to_string()),
				availability_impact: Some("NONE".to_string()),
				source: Some("nvd@nist.gov".to_string()),
				base_generation_date: None,
			},
			cwe_id: vec!["CWE-79".to_string()],
			vulnerability_source: vec!["MISC".to_string()],
			vulnerability_source_reference: vec!["https://example.com/advisory".to_string()],
			summary: Some(summary.to_string()),
		}
	}

	fn sample_cpe(uri: &str) -> CpeRecord {
		CpeRecord::from_uri(uri, Some("test entry".to_string()), None).unwrap()
	}

	fn lookup(store: &Store, cve_id: &str) -> Option<CveRecord> {
		store
			.with_transaction(|tx| store::get_cve(tx, cve_id))
			.unwrap()
	}

	fn cve_row_count(store: &Store) -> i64 {
		store
			.with_transaction(|tx| {
				tx.query_row("SELECT COUNT(*) FROM CveItem", [], |row| row.get(0))
					.map_err(|e| IngestError::from_sqlite(e, "count"))
			})
			.unwrap()
	}

	fn cpe_ids(store: &Store) -> Vec<String> {
		store
			.with_transaction(|tx| {
				let mut stmt = tx
					.prepare("SELECT cpeid FROM CpeItem ORDER BY cpeid")
					.map_err(|e| IngestError::from_sqlite(e, "cpeids"))?;
				let ids = stmt
					.query_map([], |row| row.get::<_, String>(0))
					.and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
					.map_err(|e| IngestError::from_sqlite(e, "cpeids"))?;
				Ok(ids)
			})
			.unwrap()
	}

	#[tokio::test]
	async fn test_fresh_insert_roundtrip() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let record = sample_cve("CVE-2020-0001", "cpe:/a:x:y:1", 7.5, "s1");
		pipeline.ingest_cve(record.clone()).await?;

		let stored = lookup(&store, "CVE-2020-0001").expect("record not found");
		assert_eq!(stored, record);
		Ok(())
	}

	#[tokio::test]
	async fn test_merge_preserves_cvss_and_updates_rest() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let first = sample_cve("CVE-2020-0001", "cpe:/a:x:y:1", 7.5, "s1");
		let mut second = sample_cve("CVE-2020-0001", "cpe:/a:x:y:2", 1.0, "s2");
		second.cwe_id = vec!["CWE-89".to_string()];

		pipeline.ingest_cve(first.clone()).await?;
		pipeline.ingest_cve(second.clone()).await?;

		let stored = lookup(&store, "CVE-2020-0001").expect("record not found");
		// Score bundle keeps its first-seen values
		assert_eq!(stored.cvss, first.cvss);
		assert_eq!(stored.cvss.base_score, Some(7.5));
		// Everything else reflects the later ingestion
		assert_eq!(stored.software_list, vec!["cpe:/a:x:y:2"]);
		assert_eq!(stored.summary.as_deref(), Some("s2"));
		assert_eq!(stored.cwe_id, vec!["CWE-89"]);
		assert_eq!(cve_row_count(&store), 1);
		Ok(())
	}

	#[tokio::test]
	async fn test_batch_is_idempotent() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let batch = vec![
			sample_cve("CVE-2021-1000", "cpe:/a:a:b:1", 5.0, "first"),
			sample_cve("CVE-2021-1001", "cpe:/a:c:d:2", 9.8, "second"),
		];

		pipeline.ingest_cve_batch(batch.clone()).await?;
		let after_once: Vec<_> = batch
			.iter()
			.map(|r| lookup(&store, &r.cve_id).expect("missing"))
			.collect();

		pipeline.ingest_cve_batch(batch.clone()).await?;
		let after_twice: Vec<_> = batch
			.iter()
			.map(|r| lookup(&store, &r.cve_id).expect("missing"))
			.collect();

		assert_eq!(after_once, after_twice);
		assert_eq!(cve_row_count(&store), 2);
		Ok(())
	}

	#[tokio::test]
	async fn test_batch_rolls_back_on_invalid_record() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let batch = vec![
			sample_cve("CVE-2021-2000", "cpe:/a:a:b:1", 5.0, "ok"),
			sample_cve("BAD-IDENTIFIER", "cpe:/a:c:d:2", 5.0, "broken"),
			sample_cve("CVE-2021-2002", "cpe:/a:e:f:3", 5.0, "never applied"),
		];

		let result = pipeline.ingest_cve_batch(batch).await;
		assert!(matches!(result, Err(IngestError::Validation { .. })));
		assert_eq!(cve_row_count(&store), 0);
		Ok(())
	}

	#[tokio::test]
	async fn test_intra_batch_duplicate_takes_merge_path() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let batch = vec![
			sample_cve("CVE-2022-0100", "cpe:/a:x:y:1", 7.5, "s1"),
			sample_cve("CVE-2022-0100", "cpe:/a:x:y:2", 1.0, "s2"),
		];

		pipeline.ingest_cve_batch(batch).await?;

		let stored = lookup(&store, "CVE-2022-0100").expect("record not found");
		// The first insert is visible inside the batch transaction, so the
		// duplicate merges instead of colliding on the unique key.
		assert_eq!(stored.cvss.base_score, Some(7.5));
		assert_eq!(stored.summary.as_deref(), Some("s2"));
		assert_eq!(cve_row_count(&store), 1);
		Ok(())
	}

	#[tokio::test]
	async fn test_cpe_batch_fully_replaces_prior_population() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		pipeline
			.ingest_cpe_batch(vec![
				sample_cpe("cpe:/a:apache:http_server:2.4.54"),
				sample_cpe("cpe:/o:linux:linux_kernel:5.15"),
			])
			.await?;

		pipeline
			.ingest_cpe_batch(vec![sample_cpe("cpe:/a:nginx:nginx:1.25.0")])
			.await?;

		assert_eq!(cpe_ids(&store), vec!["cpe:/a:nginx:nginx:1.25.0"]);
		Ok(())
	}

	#[tokio::test]
	async fn test_failed_cpe_replace_keeps_prior_population() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		pipeline
			.ingest_cpe_batch(vec![sample_cpe("cpe:/a:apache:http_server:2.4.54")])
			.await?;

		let mut bad = sample_cpe("cpe:/a:nginx:nginx:1.25.0");
		bad.vendor = String::new();

		let result = pipeline.ingest_cpe_batch(vec![bad]).await;
		assert!(matches!(result, Err(IngestError::Validation { .. })));

		// The drop and the reinsert share one transaction, so the failed
		// replace leaves the previous dictionary intact.
		assert_eq!(cpe_ids(&store), vec!["cpe:/a:apache:http_server:2.4.54"]);
		Ok(())
	}

	#[tokio::test]
	async fn test_duplicate_cpe_in_batch_is_rejected() -> Result<()> {
		let (_dir, store, pipeline) = setup_pipeline().await?;

		let result = pipeline
			.ingest_cpe_batch(vec![
				sample_cpe("cpe:/a:apache:http_server:2.4.54"),
				sample_cpe("cpe:/a:apache:http_server:2.4.54"),
			])
			.await;

		assert!(matches!(result, Err(IngestError::DuplicateKey { .. })));
		assert!(cpe_ids(&store).is_empty());
		Ok(())
	}
}
