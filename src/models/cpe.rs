// src/models/cpe.rs

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// A single CPE dictionary entry as stored in the `CpeItem` table.
///
/// `vendor`, `product` and `version` are derived by parsing the URI, not
/// supplied independently, so the row can never disagree with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpeRecord {
	/// CPE 2.2 URI, the unique key.
	pub cpeid: String,
	/// Human-readable title from the dictionary.
	pub cpetext: Option<String>,
	/// CPE 2.3 formatted name kept for forward compatibility.
	pub cpe_2_3: String,
	pub classification: Option<String>,
	pub vendor: String,
	pub product: String,
	pub version: String,
	/// Vendor changelog URL when the dictionary carries one.
	pub product_ref: Option<String>,
}

impl CpeRecord {
	/// Build a record from a CPE 2.2 URI, deriving the component fields
	/// and the 2.3 equivalent. Fails when the URI does not carry a
	/// vendor/product/version triple.
	pub fn from_uri(
		cpeid: impl Into<String>,
		cpetext: Option<String>,
		product_ref: Option<String>,
	) -> Result<Self, IngestError> {
		let cpeid = cpeid.into();
		let components = parse_cpe_uri(&cpeid)
			.ok_or_else(|| IngestError::validation(&cpeid, "not a parseable CPE URI"))?;

		let cpe_2_3 = format!(
			"cpe:2.3:{}:{}:{}:{}:*:*:*:*:*:*:*",
			components.part, components.vendor, components.product, components.version
		);

		Ok(CpeRecord {
			cpeid,
			cpetext,
			cpe_2_3,
			classification: Some(classification_for_part(components.part).to_string()),
			vendor: components.vendor,
			product: components.product,
			version: components.version,
			product_ref,
		})
	}

	pub fn validate(&self) -> Result<(), IngestError> {
		if self.vendor.is_empty() || self.product.is_empty() || self.version.is_empty() {
			return Err(IngestError::validation(
				&self.cpeid,
				"vendor, product and version are required",
			));
		}
		if self.cpe_2_3.is_empty() {
			return Err(IngestError::validation(&self.cpeid, "cpe_2_3 is required"));
		}
		Ok(())
	}
}

/// Vendor/product/version triple parsed out of a CPE URI.
pub struct CpeComponents {
	pub part: char,
	pub vendor: String,
	pub product: String,
	pub version: String,
}

/// Parse either a CPE 2.2 URI (`cpe:/a:vendor:product:version`) or a
/// CPE 2.3 formatted name (`cpe:2.3:a:vendor:product:version:...`).
pub fn parse_cpe_uri(uri: &str) -> Option<CpeComponents> {
	let rest = if let Some(rest) = uri.strip_prefix("cpe:/") {
		rest
	} else if let Some(rest) = uri.strip_prefix("cpe:2.3:") {
		rest
	} else {
		return None;
	};

	let mut parts = rest.split(':');
	let part = parts.next()?;
	if !matches!(part, "a" | "h" | "o") {
		return None;
	}
	let vendor = parts.next()?.to_string();
	let product = parts.next()?.to_string();
	let version = parts.next().unwrap_or("*").to_string();
	if vendor.is_empty() || product.is_empty() || version.is_empty() {
		return None;
	}

	Some(CpeComponents {
		part: part.chars().next()?,
		vendor,
		product,
		version,
	})
}

fn classification_for_part(part: char) -> &'static str {
	match part {
		'a' => "application",
		'h' => "hardware",
		'o' => "operating_system",
		_ => "unknown",
	}
}

/// Derive the CPE 2.2 URI from a 2.3 formatted name.
pub fn cpe22_from_cpe23(cpe_2_3: &str) -> Option<String> {
	let c = parse_cpe_uri(cpe_2_3)?;
	Some(format!(
		"cpe:/{}:{}:{}:{}",
		c.part, c.vendor, c.product, c.version
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_cpe_22_uri() {
		let c = parse_cpe_uri("cpe:/a:apache:http_server:2.4.54").unwrap();
		assert_eq!(c.part, 'a');
		assert_eq!(c.vendor, "apache");
		assert_eq!(c.product, "http_server");
		assert_eq!(c.version, "2.4.54");
	}

	#[test]
	fn test_parse_cpe_23_name() {
		let c = parse_cpe_uri("cpe:2.3:o:linux:linux_kernel:5.15:*:*:*:*:*:*:*").unwrap();
		assert_eq!(c.part, 'o');
		assert_eq!(c.vendor, "linux");
		assert_eq!(c.product, "linux_kernel");
		assert_eq!(c.version, "5.15");
	}

	#[test]
	fn test_parse_rejects_garbage() {
		assert!(parse_cpe_uri("not-a-cpe").is_none());
		assert!(parse_cpe_uri("cpe:/x:vendor:product:1").is_none());
		assert!(parse_cpe_uri("cpe:/a").is_none());
	}

	#[test]
	fn test_from_uri_derives_fields() {
		let record = CpeRecord::from_uri(
			"cpe:/a:apache:http_server:2.4.54",
			Some("Apache HTTP Server 2.4.54".to_string()),
			None,
		)
		.unwrap();
		assert_eq!(record.vendor, "apache");
		assert_eq!(record.product, "http_server");
		assert_eq!(record.version, "2.4.54");
		assert_eq!(record.classification.as_deref(), Some("application"));
		assert_eq!(
			record.cpe_2_3,
			"cpe:2.3:a:apache:http_server:2.4.54:*:*:*:*:*:*:*"
		);
		record.validate().unwrap();
	}

	#[test]
	fn test_cpe22_from_cpe23() {
		assert_eq!(
			cpe22_from_cpe23("cpe:2.3:a:apache:http_server:2.4.54:*:*:*:*:*:*:*").as_deref(),
			Some("cpe:/a:apache:http_server:2.4.54")
		);
	}
}
