use rusqlite::Connection;
use anyhow::{Result, Context};

const CREATE_CVE_TABLE: &str = "
	CREATE TABLE IF NOT EXISTS CveItem (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		cveid TEXT UNIQUE NOT NULL,
		software_list TEXT NOT NULL,
		published_date TEXT,
		modified_date TEXT,
		base_score REAL,
		access_vector TEXT,
		access_complexity TEXT,
		authentication TEXT,
		confidentiality_impact TEXT,
		integrity_impact TEXT,
		availability_impact TEXT,
		source TEXT,
		base_generation_date TEXT,
		cwe_id TEXT,
		vulnerability_source TEXT,
		vulnerability_source_reference TEXT,
		summary TEXT
	);

	CREATE INDEX IF NOT EXISTS idx_cveitem_cveid ON CveItem(cveid);
";

const CREATE_CPE_TABLE: &str = "
	CREATE TABLE IF NOT EXISTS CpeItem (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		cpeid TEXT UNIQUE NOT NULL,
		cpetext TEXT,
		cpe_2_3 TEXT NOT NULL,
		classification TEXT,
		vendor TEXT NOT NULL,
		product TEXT NOT NULL,
		version TEXT NOT NULL,
		product_ref TEXT
	);

	CREATE INDEX IF NOT EXISTS idx_cpeitem_vendor ON CpeItem(vendor);
	CREATE INDEX IF NOT EXISTS idx_cpeitem_product ON CpeItem(product);
";

pub fn create_tables(conn: &Connection) -> Result<()> {
	conn.execute_batch(CREATE_CVE_TABLE)
		.context("Failed to create CveItem table")?;
	conn.execute_batch(CREATE_CPE_TABLE)
		.context("Failed to create CpeItem table")?;
	Ok(())
}

/// Drop and recreate the CVE table, discarding every stored record.
pub fn recreate_cve_table(conn: &Connection) -> Result<()> {
	conn.execute_batch("DROP TABLE IF EXISTS CveItem;")
		.context("Failed to drop CveItem table")?;
	conn.execute_batch(CREATE_CVE_TABLE)
		.context("Failed to recreate CveItem table")?;
	Ok(())
}

/// Drop and recreate the CPE table, discarding every stored record.
pub fn recreate_cpe_table(conn: &Connection) -> Result<()> {
	conn.execute_batch("DROP TABLE IF EXISTS CpeItem;")
		.context("Failed to drop CpeItem table")?;
	conn.execute_batch(CREATE_CPE_TABLE)
		.context("Failed to recreate CpeItem table")?;
	Ok(())
}
