//! Resolution of parsed queries into scans.
//!
//! Binding happens in a single walk over the AST. Names are looked up
//! through chains of [`name_scope::NameScope`], each SELECT accumulates its
//! items in a [`query_resolution_info::QueryResolutionInfo`] before its scans
//! are built.
pub mod bind_query;
pub mod context;
pub mod expr_binder;
pub mod name_list;
pub mod name_scope;
pub mod query_resolution_info;
pub mod recursive;
