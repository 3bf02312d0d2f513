pub mod cli;
pub mod config;
pub mod currency;
pub mod error;
pub mod node;
pub mod orchestrator;
pub mod progress;
pub mod seed;
pub mod server; // JSON-RPC surface
pub mod session;
pub mod summary;
pub mod wallet;
