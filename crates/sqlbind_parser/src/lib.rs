//! SQL query parser. Produces the AST consumed by the binder.
pub mod ast;
pub mod keywords;
pub mod parser;
pub mod tokens;

pub use parser::{parse_query, Parser};
