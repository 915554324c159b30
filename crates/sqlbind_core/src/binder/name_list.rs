use std::sync::Arc;

use sqlbind_error::{Result, SqlError};

use crate::ident::IdString;
use crate::logical::column::ResolvedColumn;
use crate::types::FieldLookup;

/// A named column visible in some scope.
#[derive(Debug, Clone)]
pub struct NamedColumn {
    pub name: IdString,
    pub column: ResolvedColumn,
    /// Name came from an explicit alias or the column's own name, as opposed
    /// to one inferred from an expression.
    pub is_explicit: bool,
    /// Not expanded by `*`.
    pub is_pseudo: bool,
    /// Column holds the entire row of a value table. Its struct fields are
    /// visible as names as well.
    pub is_value_table_column: bool,
}

/// A table alias pointing at the names produced by some FROM item.
#[derive(Debug, Clone)]
pub struct RangeVariable {
    pub name: IdString,
    pub names: Arc<NameList>,
}

/// What a single name resolved to within one name list.
#[derive(Debug, Clone)]
pub enum NameTarget {
    ExplicitColumn(ResolvedColumn),
    ImplicitColumn(ResolvedColumn),
    RangeVariable(Arc<NameList>),
    /// Name is a field of this value table column.
    FieldOf(ResolvedColumn),
    Ambiguous,
}

/// Ordered list of the names produced by a FROM item or a query.
#[derive(Debug, Clone, Default)]
pub struct NameList {
    columns: Vec<NamedColumn>,
    range_variables: Vec<RangeVariable>,
    is_value_table: bool,
}

impl NameList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(
        &mut self,
        name: impl Into<IdString>,
        column: ResolvedColumn,
        is_explicit: bool,
    ) {
        self.columns.push(NamedColumn {
            name: name.into(),
            column,
            is_explicit,
            is_pseudo: false,
            is_value_table_column: false,
        });
    }

    pub fn add_pseudo_column(&mut self, name: impl Into<IdString>, column: ResolvedColumn) {
        self.columns.push(NamedColumn {
            name: name.into(),
            column,
            is_explicit: true,
            is_pseudo: true,
            is_value_table_column: false,
        });
    }

    pub fn add_value_table_column(&mut self, name: impl Into<IdString>, column: ResolvedColumn) {
        self.columns.push(NamedColumn {
            name: name.into(),
            column,
            is_explicit: true,
            is_pseudo: false,
            is_value_table_column: true,
        });
    }

    /// Add a column keeping all of its flags.
    pub fn add_named_column(&mut self, column: NamedColumn) {
        self.columns.push(column);
    }

    /// Add a range variable, erroring if one with the same name already
    /// exists.
    pub fn add_range_variable(
        &mut self,
        name: impl Into<IdString>,
        names: Arc<NameList>,
    ) -> Result<()> {
        let name = name.into();
        if self.find_range_variable(&name).is_some() {
            return Err(SqlError::new(format!(
                "Duplicate table alias {name} in the same FROM clause"
            )));
        }
        self.range_variables.push(RangeVariable { name, names });
        Ok(())
    }

    /// Append all columns and range variables from `other`.
    pub fn merge_from(&mut self, other: &NameList) -> Result<()> {
        self.columns.extend(other.columns.iter().cloned());
        for range_var in &other.range_variables {
            self.add_range_variable(range_var.name.clone(), range_var.names.clone())?;
        }
        Ok(())
    }

    pub fn columns(&self) -> &[NamedColumn] {
        &self.columns
    }

    /// Columns expanded by `*`.
    pub fn visible_columns(&self) -> impl Iterator<Item = &NamedColumn> {
        self.columns.iter().filter(|c| !c.is_pseudo)
    }

    pub fn range_variables(&self) -> &[RangeVariable] {
        &self.range_variables
    }

    pub fn find_range_variable(&self, name: &IdString) -> Option<&RangeVariable> {
        self.range_variables.iter().find(|r| &r.name == name)
    }

    pub fn is_value_table(&self) -> bool {
        self.is_value_table
    }

    pub fn set_value_table(&mut self, is_value_table: bool) {
        self.is_value_table = is_value_table;
    }

    /// The row column of a value table name list.
    pub fn value_column(&self) -> Option<&ResolvedColumn> {
        if !self.is_value_table {
            return None;
        }
        self.visible_columns().next().map(|c| &c.column)
    }

    /// Non-pseudo columns in order.
    pub fn column_list(&self) -> Vec<ResolvedColumn> {
        self.visible_columns().map(|c| c.column.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.visible_columns().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All names that may be referenced, used for suggestions.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.range_variables
            .iter()
            .map(|r| r.name.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
    }

    /// Look up a single name in this list.
    ///
    /// Range variables take precedence over columns. Multiple columns
    /// referring to the same underlying column are not ambiguous.
    pub fn lookup(&self, name: &IdString) -> Option<NameTarget> {
        if name.is_internal() {
            return None;
        }

        if let Some(range_var) = self.find_range_variable(name) {
            return Some(NameTarget::RangeVariable(range_var.names.clone()));
        }

        let mut found: Option<NameTarget> = None;
        let mut found_column: Option<&ResolvedColumn> = None;

        for col in &self.columns {
            if &col.name != name {
                continue;
            }
            match found_column {
                Some(existing) if existing == &col.column => continue,
                Some(_) => return Some(NameTarget::Ambiguous),
                None => {
                    found_column = Some(&col.column);
                    found = Some(if col.is_explicit {
                        NameTarget::ExplicitColumn(col.column.clone())
                    } else {
                        NameTarget::ImplicitColumn(col.column.clone())
                    });
                }
            }
        }

        for col in self.columns.iter().filter(|c| c.is_value_table_column) {
            match col.column.datatype.find_field(name) {
                FieldLookup::NotFound => (),
                FieldLookup::Ambiguous => return Some(NameTarget::Ambiguous),
                FieldLookup::Found(..) => {
                    let same = matches!(
                        &found,
                        Some(NameTarget::FieldOf(existing)) if existing == &col.column
                    );
                    if same {
                        continue;
                    }
                    if found.is_some() {
                        return Some(NameTarget::Ambiguous);
                    }
                    found = Some(NameTarget::FieldOf(col.column.clone()));
                }
            }
        }

        found
    }
}
