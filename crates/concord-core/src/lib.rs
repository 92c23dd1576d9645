pub mod canonical;
pub mod config;
pub mod decision;
pub mod detect;
pub mod embeddings;
pub mod errors;
pub mod fingerprint;
pub mod guard;
pub mod judge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod providers;
pub mod resolve;
pub mod storage;
pub mod telemetry;

pub use errors::{ConcordError, ConcordResult};
