// Library root: FPL expected-points ensemble, lineup optimizer and the
// cached scout service built on them.

pub mod cache;
pub mod combiner;
pub mod config;
pub mod ensemble;
pub mod export;
pub mod ingest;
pub mod optimizer;
pub mod orchestrator;
pub mod player;
pub mod scout;
