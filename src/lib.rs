// Snippy - code snippet knowledge service
// Library exports

pub mod agents;
pub mod config;
pub mod embeddings;
pub mod ingestion;
pub mod logging;
pub mod mcp;
pub mod metrics;
pub mod orchestration;
pub mod providers;
pub mod rag;
pub mod retry;
pub mod server;
pub mod storage;
pub mod workflows;
