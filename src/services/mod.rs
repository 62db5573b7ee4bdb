pub mod classifier;
pub mod db;
pub mod enrichment;
pub mod quality_service;
