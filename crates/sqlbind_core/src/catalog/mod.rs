pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlbind_error::Result;

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub datatype: DataType,
    /// Pseudo columns can be referenced by name but are not part of `*`.
    pub is_pseudo: bool,
    pub collation: Option<String>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        TableColumn {
            name: name.into(),
            datatype,
            is_pseudo: false,
            collation: None,
        }
    }

    pub fn pseudo(name: impl Into<String>, datatype: DataType) -> Self {
        TableColumn {
            is_pseudo: true,
            ..Self::new(name, datatype)
        }
    }

    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<TableColumn>,
    /// Value tables have exactly one non-pseudo column holding the row value.
    pub is_value_table: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: impl IntoIterator<Item = TableColumn>) -> Self {
        Table {
            name: name.into(),
            columns: columns.into_iter().collect(),
            is_value_table: false,
        }
    }

    pub fn value_table(name: impl Into<String>, datatype: DataType) -> Self {
        Table {
            name: name.into(),
            columns: vec![TableColumn::new("value", datatype)],
            is_value_table: true,
        }
    }
}

/// Kind of argument a table-valued function accepts at some position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TvfArgumentKind {
    Scalar(DataType),
    Relation,
    Model,
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TvfOutput {
    /// Function always produces these columns.
    Fixed(Vec<TableColumn>),
    /// Function produces the columns of the relation argument at this index.
    PassThrough(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFunction {
    pub name: String,
    pub arguments: Vec<TvfArgumentKind>,
    pub output: TvfOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    pub inputs: Vec<TableColumn>,
    pub outputs: Vec<TableColumn>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
}

/// Source of tables and other named objects.
///
/// Lookups return `Ok(None)` for objects that don't exist. Errors are
/// reserved for failures of the catalog itself.
pub trait Catalog: Debug + Sync + Send {
    fn find_table(&self, path: &[String]) -> Result<Option<Arc<Table>>>;

    fn find_table_function(&self, path: &[String]) -> Result<Option<Arc<TableFunction>>>;

    fn find_model(&self, path: &[String]) -> Result<Option<Arc<Model>>>;

    fn find_connection(&self, path: &[String]) -> Result<Option<Arc<Connection>>>;

    /// Suggest a table name similar to `path`, used for error messages only.
    fn suggest_table(&self, _path: &[String]) -> Option<String> {
        None
    }

    fn suggest_table_function(&self, _path: &[String]) -> Option<String> {
        None
    }
}
