pub mod logger;
pub mod nvd_api;
