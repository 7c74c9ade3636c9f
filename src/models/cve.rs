// src/models/cve.rs

use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

lazy_static! {
	static ref CVE_ID_RE: Regex = Regex::new(r"^CVE-\d{4}-\d{4,}$").unwrap();
}

/// CVSS v2 score bundle attached to a CVE.
///
/// Once a record is stored these fields are never overwritten by a later
/// ingestion of the same CVE id: the original severity assessment is kept
/// even if the upstream feed changes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CvssMetrics {
	pub base_score: Option<f64>,
	pub access_vector: Option<String>,
	pub access_complexity: Option<String>,
	pub authentication: Option<String>,
	pub confidentiality_impact: Option<String>,
	pub integrity_impact: Option<String>,
	pub availability_impact: Option<String>,
	pub source: Option<String>,
	pub base_generation_date: Option<NaiveDateTime>,
}

/// A single NVD CVE entry as stored in the `CveItem` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CveRecord {
	pub cve_id: String,
	/// CPE URIs of affected products.
	pub software_list: Vec<String>,
	pub published_date: Option<NaiveDateTime>,
	pub modified_date: Option<NaiveDateTime>,
	pub cvss: CvssMetrics,
	pub cwe_id: Vec<String>,
	pub vulnerability_source: Vec<String>,
	pub vulnerability_source_reference: Vec<String>,
	pub summary: Option<String>,
}

impl CveRecord {
	/// Build a record with the required fields, rejecting malformed ids
	/// up front rather than at write time.
	pub fn new(
		cve_id: impl Into<String>,
		software_list: Vec<String>,
	) -> Result<Self, IngestError> {
		let record = CveRecord {
			cve_id: cve_id.into(),
			software_list,
			published_date: None,
			modified_date: None,
			cvss: CvssMetrics::default(),
			cwe_id: Vec::new(),
			vulnerability_source: Vec::new(),
			vulnerability_source_reference: Vec::new(),
			summary: None,
		};
		record.validate()?;
		Ok(record)
	}

	pub fn validate(&self) -> Result<(), IngestError> {
		if !is_valid_cve_id(&self.cve_id) {
			return Err(IngestError::validation(
				&self.cve_id,
				"CVE identifier must match CVE-YYYY-NNNN",
			));
		}
		Ok(())
	}
}

pub fn is_valid_cve_id(cve_id: &str) -> bool {
	CVE_ID_RE.is_match(cve_id)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_is_valid_cve_id() {
		assert!(is_valid_cve_id("CVE-1999-0001"));
		assert!(is_valid_cve_id("CVE-2023-12345"));
		assert!(!is_valid_cve_id("CVE-99-0001"));
		assert!(!is_valid_cve_id("CVE-2023-ABC"));
		assert!(!is_valid_cve_id("CWE-1999-0001"));
		assert!(!is_valid_cve_id("cve-2023-0001"));
		assert!(!is_valid_cve_id("CVE-2023-001"));
	}

	#[test]
	fn test_new_rejects_malformed_id() {
		let result = CveRecord::new("NOT-A-CVE", vec![]);
		assert!(matches!(result, Err(IngestError::Validation { .. })));
	}

	#[test]
	fn test_new_accepts_well_formed_id() {
		let record = CveRecord::new("CVE-2020-0001", vec!["cpe:/a:x:y:1".to_string()]).unwrap();
		assert_eq!(record.cve_id, "CVE-2020-0001");
		assert_eq!(record.software_list, vec!["cpe:/a:x:y:1"]);
		assert_eq!(record.cvss, CvssMetrics::default());
	}
}
