pub mod db;
pub mod export;
pub mod ingest;
pub mod jobs;
pub mod logging;
pub mod order;
pub mod poll;
pub mod risk;
pub mod scoring;
