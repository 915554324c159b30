//! Ordering of WITH entries and checks on recursive references.
pub mod sort;
pub mod validate;
