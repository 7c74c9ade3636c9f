// src/repositories/queries.rs

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rusqlite::params;
use tokio::task;

use crate::db::connection::SqlitePool;
use crate::db::store::{self, Store};
use crate::models::cve::CveRecord;

/// Number of rows returned by the frequency aggregations.
const TOP_N: usize = 10;

const CVE_SELECT: &str = "SELECT cveid, software_list, published_date, modified_date, \
	base_score, access_vector, access_complexity, authentication, \
	confidentiality_impact, integrity_impact, availability_impact, source, \
	base_generation_date, cwe_id, vulnerability_source, \
	vulnerability_source_reference, summary FROM CveItem";

/// Read-only lookups over the store. No transaction scope beyond a
/// single statement is needed here.
pub struct QueryFacade {
	pool: Arc<SqlitePool>,
}

impl QueryFacade {
	pub fn new(store: &Store) -> Self {
		Self { pool: store.pool() }
	}

	/// Exact match on the CVE identifier.
	pub async fn by_cve_id(&self, cve_id: &str, limit: Option<usize>) -> Result<Vec<CveRecord>> {
		let sql = format!("{} WHERE cveid = ?1 LIMIT ?2", CVE_SELECT);
		let term = cve_id.to_string();
		self.fetch_cves(sql, term, limit).await
	}

	/// Containment match of a CPE string against the affected-software
	/// list. The list column holds an encoded string array, so this is a
	/// substring check, not a join.
	pub async fn by_cpe(&self, cpe_uri: &str, limit: Option<usize>) -> Result<Vec<CveRecord>> {
		let sql = format!("{} WHERE software_list LIKE ?1 LIMIT ?2", CVE_SELECT);
		let term = format!("%{}%", cpe_uri);
		self.fetch_cves(sql, term, limit).await
	}

	/// Prefix match of the CVE identifier against a year fragment.
	pub async fn by_year(&self, year: &str, limit: Option<usize>) -> Result<Vec<CveRecord>> {
		if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
			bail!("'{}' is not a valid four-digit year", year);
		}
		let sql = format!("{} WHERE cveid LIKE ?1 LIMIT ?2", CVE_SELECT);
		let term = format!("CVE-{}-%", year);
		self.fetch_cves(sql, term, limit).await
	}

	/// Vendors ranked by how many CPE entries they own, top 10.
	pub async fn vendor_frequency(&self) -> Result<Vec<(String, i64)>> {
		self.frequency("vendor").await
	}

	/// Products ranked by how many CPE entries carry them, top 10.
	pub async fn product_frequency(&self) -> Result<Vec<(String, i64)>> {
		self.frequency("product").await
	}

	async fn fetch_cves(
		&self,
		sql: String,
		term: String,
		limit: Option<usize>,
	) -> Result<Vec<CveRecord>> {
		let pool = self.pool.clone();
		// SQLite treats a negative LIMIT as unlimited
		let limit = limit.map_or(-1, |n| n as i64);

		task::spawn_blocking(move || -> Result<_> {
			let conn = pool.get().context("Failed to get database connection")?;
			let mut stmt = conn.prepare(&sql).context("Failed to prepare statement")?;
			let rows = stmt.query_map(params![term, limit], store::cve_from_row)?;
			rows.collect::<rusqlite::Result<Vec<_>>>()
				.context("Failed to collect CVE records")
		})
		.await
		.context("Failed to execute database operation")?
	}

	async fn frequency(&self, column: &'static str) -> Result<Vec<(String, i64)>> {
		let pool = self.pool.clone();

		task::spawn_blocking(move || -> Result<_> {
			let conn = pool.get().context("Failed to get database connection")?;
			// Ties broken by name so the ordering is stable across runs
			let sql = format!(
				"SELECT {col}, COUNT(*) AS freq FROM CpeItem
				 GROUP BY {col} ORDER BY freq DESC, {col} ASC LIMIT ?1",
				col = column
			);
			let mut stmt = conn.prepare(&sql).context("Failed to prepare statement")?;
			let rows = stmt.query_map([TOP_N as i64], |row| {
				Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
			})?;
			rows.collect::<rusqlite::Result<Vec<_>>>()
				.context("Failed to collect frequency rows")
		})
		.await
		.context("Failed to execute database operation")?
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::{connection, schema};
	use crate::models::cpe::CpeRecord;
	use crate::models::cve::CvssMetrics;
	use crate::repositories::ingestion::IngestionPipeline;
	use tempfile::tempdir;

	async fn setup() -> Result<(tempfile::TempDir, IngestionPipeline, QueryFacade)> {
		let dir = tempdir()?;
		let pool = Arc::new(connection::establish_pool_with_path(
			dir.path().join("test.db"),
		)?);
		let conn = pool.get()?;
		schema::create_tables(&conn)?;
		drop(conn);

		let store = Store::new(pool);
		let facade = QueryFacade::new(&store);
		Ok((dir, IngestionPipeline::new(store), facade))
	}

	fn cve(cve_id: &str, software: &[&str], summary: &str) -> CveRecord {
		CveRecord {
			cve_id: cve_id.to_string(),
			software_list: software.iter().map(|s| s.to_string()).collect(),
			published_date: None,
			modified_date: None,
			cvss: CvssMetrics {
				base_score: Some(7.5),
				..CvssMetrics::default()
			},
			cwe_id: Vec::new(),
			vulnerability_source: Vec::new(),
			vulnerability_source_reference: Vec::new(),
			summary: Some(summary.to_string()),
		}
	}

	#[tokio::test]
	async fn test_lookup_by_cve_id() -> Result<()> {
		let (_dir, pipeline, facade) = setup().await?;
		pipeline
			.ingest_cve(cve("CVE-2020-0001", &["cpe:/a:x:y:1"], "s1"))
			.await?;

		let found = facade.by_cve_id("CVE-2020-0001", Some(5)).await?;
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].summary.as_deref(), Some("s1"));

		let missing = facade.by_cve_id("CVE-2020-9999", Some(5)).await?;
		assert!(missing.is_empty());
		Ok(())
	}

	#[tokio::test]
	async fn test_cpe_substring_match() -> Result<()> {
		let (_dir, pipeline, facade) = setup().await?;
		pipeline
			.ingest_cve_batch(vec![
				cve("CVE-2020-0001", &["cpe:/a:x:y:2"], "s2"),
				cve("CVE-2020-0002", &["cpe:/a:other:thing:1"], "unrelated"),
			])
			.await?;

		let found = facade.by_cpe("cpe:/a:x:y", Some(5)).await?;
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].cve_id, "CVE-2020-0001");
		Ok(())
	}

	#[tokio::test]
	async fn test_year_prefix_match_and_limit() -> Result<()> {
		let (_dir, pipeline, facade) = setup().await?;
		pipeline
			.ingest_cve_batch(vec![
				cve("CVE-2019-0001", &["cpe:/a:a:a:1"], "old"),
				cve("CVE-2020-0001", &["cpe:/a:b:b:1"], "one"),
				cve("CVE-2020-0002", &["cpe:/a:c:c:1"], "two"),
			])
			.await?;

		let all_2020 = facade.by_year("2020", None).await?;
		assert_eq!(all_2020.len(), 2);

		let limited = facade.by_year("2020", Some(1)).await?;
		assert_eq!(limited.len(), 1);

		assert!(facade.by_year("20", Some(5)).await.is_err());
		assert!(facade.by_year("twenty", Some(5)).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn test_vendor_frequency_orders_by_count() -> Result<()> {
		let (_dir, pipeline, facade) = setup().await?;
		pipeline
			.ingest_cpe_batch(vec![
				CpeRecord::from_uri("cpe:/a:apache:http_server:2.4.54", None, None)?,
				CpeRecord::from_uri("cpe:/a:apache:tomcat:9.0.1", None, None)?,
				CpeRecord::from_uri("cpe:/a:nginx:nginx:1.25.0", None, None)?,
			])
			.await?;

		let vendors = facade.vendor_frequency().await?;
		assert_eq!(vendors[0], ("apache".to_string(), 2));
		assert_eq!(vendors[1], ("nginx".to_string(), 1));

		let products = facade.product_frequency().await?;
		assert_eq!(products.len(), 3);
		assert!(products.iter().all(|(_, count)| *count == 1));
		Ok(())
	}
}
