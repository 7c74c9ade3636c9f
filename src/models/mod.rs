pub mod cpe;
pub mod cve;
