use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId(pub u32);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A column produced somewhere in a scan tree.
///
/// Columns are immutable. Two columns are the same column if and only if
/// their ids match, the remaining fields are descriptive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedColumn {
    pub id: ColumnId,
    /// Name of the table or synthetic scope producing this column, e.g.
    /// `$groupby`.
    pub table_name: String,
    pub name: String,
    pub datatype: DataType,
    pub collation: Option<String>,
}

impl PartialEq for ResolvedColumn {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResolvedColumn {}

impl Hash for ResolvedColumn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Display for ResolvedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.table_name, self.name, self.id)
    }
}

/// Allocates columns with monotonically increasing ids.
///
/// One factory per analysis, ids are never reused.
#[derive(Debug, Default)]
pub struct ColumnFactory {
    next_id: u32,
}

impl ColumnFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(
        &mut self,
        table_name: impl Into<String>,
        name: impl Into<String>,
        datatype: DataType,
    ) -> ResolvedColumn {
        self.allocate_with_collation(table_name, name, datatype, None)
    }

    pub fn allocate_with_collation(
        &mut self,
        table_name: impl Into<String>,
        name: impl Into<String>,
        datatype: DataType,
        collation: Option<String>,
    ) -> ResolvedColumn {
        self.next_id += 1;
        ResolvedColumn {
            id: ColumnId(self.next_id),
            table_name: table_name.into(),
            name: name.into(),
            datatype,
            collation,
        }
    }

    /// Number of columns allocated so far.
    pub fn allocated(&self) -> u32 {
        self.next_id
    }
}

/// A column along with the expression computing it.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedColumn {
    pub column: ResolvedColumn,
    pub expr: Expression,
}

impl ComputedColumn {
    pub fn new(column: ResolvedColumn, expr: Expression) -> Self {
        ComputedColumn { column, expr }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ids_monotonic() {
        let mut factory = ColumnFactory::new();
        let a = factory.allocate("t", "a", DataType::Int64);
        let b = factory.allocate("t", "a", DataType::Int64);
        assert!(a.id < b.id);
        assert_ne!(a, b);
        assert_eq!(2, factory.allocated());
    }

    #[test]
    fn equality_by_id() {
        let mut factory = ColumnFactory::new();
        let a = factory.allocate("t", "a", DataType::Int64);
        let mut renamed = a.clone();
        renamed.name = "other".to_string();
        assert_eq!(a, renamed);
        assert_eq!("t.a#1", a.to_string());
    }
}
