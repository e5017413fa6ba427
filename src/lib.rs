#![doc = include_str!("../README.md")]

pub mod audit;
pub mod batch;
pub mod config;
pub mod confirm;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod rollback;
pub mod snapshot;
pub mod trash;

pub use batch::{BatchItem, BatchRequest, BatchSummary, ExecuteOutcome, ItemResult, OpKind};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::*;
pub use executor::CancellationFlag;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
