//! Judge internals.
//!
//! - run.rs: request validation and the sequential method loop
//! - prompt.rs: prompt text and truncation
//! - client.rs: model call and verdict parsing
//! - structural.rs: exact, canonical JSON and normalized-code methods
//! - lexer.rs: comment/whitespace-insensitive code tokens
//! - similarity.rs: embedding similarity and its calibration
//! - execution.rs: delegation to the execution verifier

pub(crate) mod client;
pub(crate) mod execution;
pub(crate) mod lexer;
pub(crate) mod prompt;
pub(crate) mod run;
pub(crate) mod similarity;
pub(crate) mod structural;

#[cfg(test)]
mod tests;
