use std::sync::Arc;

use indexmap::IndexMap;
use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast::Ident;

use super::name_list::{NameList, NameTarget};
use crate::ident::{IdString, SimilarName};
use crate::logical::column::{ColumnId, ResolvedColumn};

/// A column, or field path within a column, that remains accessible after
/// grouping or DISTINCT, and the column it maps to.
#[derive(Debug, Clone)]
pub struct ValidFieldInfo {
    pub path: Vec<IdString>,
    pub target: ResolvedColumn,
}

/// Mapping from pre-grouping columns (and field paths) to the columns that
/// replace them in a later scope.
#[derive(Debug, Clone, Default)]
pub struct ValidFieldInfoMap {
    entries: IndexMap<ColumnId, Vec<ValidFieldInfo>>,
}

impl ValidFieldInfoMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        source: &ResolvedColumn,
        path: Vec<IdString>,
        target: ResolvedColumn,
    ) {
        let infos = self.entries.entry(source.id).or_default();
        if infos.iter().any(|info| info.path == path) {
            return;
        }
        infos.push(ValidFieldInfo { path, target });
    }

    /// Find the entry for `source` whose path is the longest prefix of
    /// `path`.
    ///
    /// Returns the target column and the number of path elements consumed.
    pub fn find(
        &self,
        source: &ResolvedColumn,
        path: &[IdString],
    ) -> Option<(&ResolvedColumn, usize)> {
        self.entries
            .get(&source.id)?
            .iter()
            .filter(|info| path.starts_with(&info.path))
            .max_by_key(|info| info.path.len())
            .map(|info| (&info.target, info.path.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColumnId, &ValidFieldInfo)> {
        self.entries
            .iter()
            .flat_map(|(id, infos)| infos.iter().map(move |info| (*id, info)))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of resolving an identifier path in a scope.
#[derive(Debug, Clone)]
pub enum PathTarget {
    /// A column, with trailing field names still to be applied to it.
    Column {
        column: ResolvedColumn,
        fields: Vec<Ident>,
        /// Number of correlated scope boundaries crossed, zero for local
        /// columns.
        depth: usize,
    },
    /// A range variable used as a value.
    RangeVariable { names: Arc<NameList>, depth: usize },
    Ambiguous,
    /// Name exists but may not be accessed here.
    AccessError { reason: String },
}

/// Chain of name lists used to resolve identifiers.
///
/// Lookups try the local name list first, then walk outward through
/// `previous`. Crossing a correlated link makes the reference correlated.
#[derive(Debug, Clone)]
pub struct NameScope<'a> {
    previous: Option<&'a NameScope<'a>>,
    previous_is_correlated: bool,
    names: Arc<NameList>,
    /// When set, only the columns and field paths in this map are
    /// accessible from the local name list.
    valid_fields: Option<Arc<ValidFieldInfoMap>>,
    access_error_reason: String,
}

impl NameScope<'static> {
    pub fn empty() -> Self {
        Self::new(Arc::new(NameList::new()))
    }

    pub fn new(names: Arc<NameList>) -> Self {
        NameScope {
            previous: None,
            previous_is_correlated: false,
            names,
            valid_fields: None,
            access_error_reason: String::new(),
        }
    }
}

impl<'a> NameScope<'a> {
    pub fn with_previous(
        names: Arc<NameList>,
        previous: &'a NameScope<'a>,
        correlated: bool,
    ) -> Self {
        NameScope {
            previous: Some(previous),
            previous_is_correlated: correlated,
            names,
            valid_fields: None,
            access_error_reason: String::new(),
        }
    }

    /// Restrict local lookups to the entries in `valid_fields`.
    pub fn with_valid_fields(
        mut self,
        valid_fields: Arc<ValidFieldInfoMap>,
        reason: impl Into<String>,
    ) -> Self {
        self.valid_fields = Some(valid_fields);
        self.access_error_reason = reason.into();
        self
    }

    pub fn names(&self) -> &Arc<NameList> {
        &self.names
    }

    pub fn previous(&self) -> Option<&'a NameScope<'a>> {
        self.previous
    }

    pub fn valid_fields(&self) -> Option<&Arc<ValidFieldInfoMap>> {
        self.valid_fields.as_ref()
    }

    /// Resolve a path of identifiers.
    ///
    /// Returns `Ok(None)` if the first identifier isn't found in any scope.
    /// Errors if the first identifier names a range variable that doesn't
    /// contain the second identifier.
    pub fn resolve_path(&self, path: &[Ident]) -> Result<Option<PathTarget>> {
        let mut scope = Some(self);
        let mut depth = 0;
        while let Some(current) = scope {
            if let Some(target) = current.resolve_local(path, depth)? {
                return Ok(Some(target));
            }
            if current.previous_is_correlated {
                depth += 1;
            }
            scope = current.previous;
        }
        Ok(None)
    }

    fn resolve_local(&self, path: &[Ident], depth: usize) -> Result<Option<PathTarget>> {
        let first = match path.first() {
            Some(first) => first,
            None => return Ok(None),
        };
        let target = match self.names.lookup(&IdString::from(first)) {
            Some(target) => target,
            None => return Ok(None),
        };

        let (source, fields) = match target {
            NameTarget::Ambiguous => return Ok(Some(PathTarget::Ambiguous)),
            NameTarget::ExplicitColumn(col) | NameTarget::ImplicitColumn(col) => (col, &path[1..]),
            NameTarget::FieldOf(col) => (col, path),
            NameTarget::RangeVariable(names) => {
                if path.len() == 1 {
                    if self.valid_fields.is_some() {
                        return Ok(Some(self.access_error()));
                    }
                    return Ok(Some(PathTarget::RangeVariable { names, depth }));
                }

                if let Some(value) = names.value_column() {
                    (value.clone(), &path[1..])
                } else {
                    let second = &path[1];
                    match names.lookup(&IdString::from(second)) {
                        Some(NameTarget::ExplicitColumn(col))
                        | Some(NameTarget::ImplicitColumn(col)) => (col, &path[2..]),
                        Some(NameTarget::FieldOf(col)) => (col, &path[1..]),
                        Some(NameTarget::Ambiguous) => {
                            return Err(SqlError::new(format!(
                                "Name {second} is ambiguous inside {first}"
                            ))
                            .at(second.location));
                        }
                        Some(NameTarget::RangeVariable(_)) | None => {
                            return Err(SqlError::new(format!(
                                "Name {second} not found inside {first}"
                            ))
                            .at(second.location));
                        }
                    }
                }
            }
        };

        let target = match &self.valid_fields {
            Some(valid) => {
                let names: Vec<IdString> = fields.iter().map(IdString::from).collect();
                match valid.find(&source, &names) {
                    Some((target, consumed)) => PathTarget::Column {
                        column: target.clone(),
                        fields: fields[consumed..].to_vec(),
                        depth,
                    },
                    None => self.access_error(),
                }
            }
            None => PathTarget::Column {
                column: source,
                fields: fields.to_vec(),
                depth,
            },
        };

        Ok(Some(target))
    }

    fn access_error(&self) -> PathTarget {
        PathTarget::AccessError {
            reason: self.access_error_reason.clone(),
        }
    }

    /// If the name resolves to something in any scope.
    pub fn contains_name(&self, name: &IdString) -> bool {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.names.lookup(name).is_some() {
                return true;
            }
            scope = current.previous;
        }
        false
    }

    /// Suggest a similar name from any scope.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let mut candidates = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            candidates.extend(current.names.names().map(|s| s.to_string()));
            scope = current.previous;
        }
        SimilarName::find(candidates.iter().map(|s| s.as_str()), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::column::ColumnFactory;
    use crate::testutil::analyze;
    use crate::types::{DataType, StructField};
    use pretty_assertions::assert_eq;

    fn idents(parts: &[&str]) -> Vec<Ident> {
        parts.iter().map(|p| Ident::new(*p)).collect()
    }

    fn table_names(factory: &mut ColumnFactory, table: &str, cols: &[&str]) -> Arc<NameList> {
        let mut inner = NameList::new();
        for col in cols {
            inner.add_column(*col, factory.allocate(table, *col, DataType::Int64), true);
        }
        let inner = Arc::new(inner);
        let mut list = NameList::new();
        list.merge_from(&inner).unwrap();
        list.add_range_variable(table, inner).unwrap();
        Arc::new(list)
    }

    #[test]
    fn correlated_depth() {
        let mut factory = ColumnFactory::new();
        let outer_names = table_names(&mut factory, "o", &["a"]);
        let inner_names = table_names(&mut factory, "i", &["b"]);

        let outer = NameScope::new(outer_names);
        let inner = NameScope::with_previous(inner_names, &outer, true);

        match inner.resolve_path(&idents(&["a"])).unwrap() {
            Some(PathTarget::Column { column, depth, .. }) => {
                assert_eq!("o.a#1", column.to_string());
                assert_eq!(1, depth);
            }
            other => panic!("unexpected: {other:?}"),
        }

        match inner.resolve_path(&idents(&["i", "b"])).unwrap() {
            Some(PathTarget::Column { depth, fields, .. }) => {
                assert_eq!(0, depth);
                assert!(fields.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(inner.resolve_path(&idents(&["zzz"])).unwrap().is_none());
    }

    #[test]
    fn inner_range_variable_shadows_outer() {
        let mut factory = ColumnFactory::new();
        let outer = NameScope::new(table_names(&mut factory, "t", &["a"]));
        let inner_names = table_names(&mut factory, "t", &["a", "b"]);
        let inner = NameScope::with_previous(inner_names, &outer, true);

        match inner.resolve_path(&idents(&["t", "a"])).unwrap() {
            Some(PathTarget::Column { column, depth, .. }) => {
                assert_eq!("t.a#2", column.to_string());
                assert_eq!(0, depth);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match inner.resolve_path(&idents(&["t"])).unwrap() {
            Some(PathTarget::RangeVariable { names, depth }) => {
                assert_eq!(0, depth);
                assert!(names.lookup(&"b".into()).is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Without the inner binding the outer range variable is visible again.
        match outer.resolve_path(&idents(&["t", "a"])).unwrap() {
            Some(PathTarget::Column { column, depth, .. }) => {
                assert_eq!("t.a#1", column.to_string());
                assert_eq!(0, depth);
            }
            other => panic!("unexpected: {other:?}"),
        }
        let sibling_names = table_names(&mut factory, "u", &["c"]);
        let sibling = NameScope::with_previous(sibling_names, &outer, true);
        match sibling.resolve_path(&idents(&["t", "a"])).unwrap() {
            Some(PathTarget::Column { column, depth, .. }) => {
                assert_eq!("t.a#1", column.to_string());
                assert_eq!(1, depth);
            }
            other => panic!("unexpected: {other:?}"),
        }
        let err = inner.resolve_path(&idents(&["t", "c"])).unwrap_err();
        assert_eq!("Name c not found inside t", err.message());
    }

    #[test]
    fn correlated_subquery_alias_shadows_outer() {
        analyze(
            "SELECT Key FROM KeyValue AS t \
             WHERE EXISTS (SELECT 1 FROM KeyValue3 AS t WHERE t.Other = 1)",
        )
        .unwrap();

        let err = analyze(
            "SELECT Key FROM KeyValue3 AS t \
             WHERE EXISTS (SELECT 1 FROM KeyValue AS t WHERE t.Other = 1)",
        )
        .unwrap_err();
        assert_eq!("Name Other not found inside t", err.message());

        analyze(
            "SELECT Key FROM KeyValue3 AS t \
             WHERE EXISTS (SELECT 1 FROM KeyValue AS u WHERE t.Other = u.Key)",
        )
        .unwrap();
    }

    #[test]
    fn name_not_inside_range_variable() {
        let mut factory = ColumnFactory::new();
        let scope = NameScope::new(table_names(&mut factory, "t", &["a"]));
        let err = scope.resolve_path(&idents(&["t", "b"])).unwrap_err();
        assert_eq!("Name b not found inside t", err.message());
    }

    #[test]
    fn valid_fields_longest_prefix() {
        let mut factory = ColumnFactory::new();
        let s = factory.allocate(
            "t",
            "s",
            DataType::Struct(vec![StructField::new(
                "x",
                DataType::Struct(vec![StructField::new("y", DataType::Int64)]),
            )]),
        );
        let key = factory.allocate("$groupby", "x", DataType::Int64);

        let mut names = NameList::new();
        names.add_column("s", s.clone(), true);

        let mut valid = ValidFieldInfoMap::new();
        valid.insert(&s, vec!["x".into()], key.clone());

        let scope = NameScope::new(Arc::new(names))
            .with_valid_fields(Arc::new(valid), "which is neither grouped nor aggregated");

        match scope.resolve_path(&idents(&["s", "x", "y"])).unwrap() {
            Some(PathTarget::Column { column, fields, .. }) => {
                assert_eq!(key, column);
                let fields: Vec<_> = fields.iter().map(|f| f.value.as_str()).collect();
                assert_eq!(vec!["y"], fields);
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            scope.resolve_path(&idents(&["s"])).unwrap(),
            Some(PathTarget::AccessError { .. })
        ));
    }

    #[test]
    fn suggest_across_scopes() {
        let mut factory = ColumnFactory::new();
        let outer = NameScope::new(table_names(&mut factory, "orders", &["amount"]));
        let inner = NameScope::with_previous(Arc::new(NameList::new()), &outer, true);
        assert_eq!(Some("amount".to_string()), inner.suggest("amout"));
    }
}
