//! Name resolution and binding of parsed SQL queries into resolved scan trees.
pub mod analyzer;
pub mod binder;
pub mod catalog;
pub mod config;
pub mod expr;
pub mod functions;
pub mod ident;
pub mod logical;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use analyzer::{Analyzer, AnalyzerOutput, AnalyzerOutputProperties, OutputColumn};
