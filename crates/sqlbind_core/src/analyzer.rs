use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;
use tracing::debug;

use crate::binder::bind_query::QueryBinder;
use crate::binder::context::AnalysisContext;
use crate::binder::name_scope::NameScope;
use crate::catalog::{Catalog, Table};
use crate::config::AnalyzerOptions;
use crate::functions::FunctionRegistry;
use crate::ident::IdString;
use crate::logical::column::ResolvedColumn;
use crate::logical::scan::Scan;
use crate::types::coercer::{DefaultCoercer, TypeCoercer};

static DEFAULT_COERCER: DefaultCoercer = DefaultCoercer;

/// Advisory flags describing rewrites the bound query needs before it can
/// be executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerOutputProperties {
    pub has_pivot: bool,
    pub has_unpivot: bool,
    /// UNNEST with more than one argument.
    pub has_multiway_unnest: bool,
    pub has_grouping_sets: bool,
    pub has_recursive_query: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub column: ResolvedColumn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerOutput {
    pub scan: Scan,
    pub output_columns: Vec<OutputColumn>,
    pub is_value_table: bool,
    pub properties: AnalyzerOutputProperties,
}

/// Binds queries against a catalog.
///
/// An analyzer can be reused for any number of queries, each analysis gets
/// its own column ids and WITH aliases.
#[derive(Debug)]
pub struct Analyzer<'a> {
    catalog: &'a dyn Catalog,
    coercer: &'a dyn TypeCoercer,
    functions: &'static FunctionRegistry,
    options: AnalyzerOptions,
    relation_arguments: HashMap<IdString, Arc<Table>>,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Analyzer {
            catalog,
            coercer: &DEFAULT_COERCER,
            functions: FunctionRegistry::builtin(),
            options: AnalyzerOptions::default(),
            relation_arguments: HashMap::new(),
        }
    }

    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_coercer(mut self, coercer: &'a dyn TypeCoercer) -> Self {
        self.coercer = coercer;
        self
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut AnalyzerOptions {
        &mut self.options
    }

    /// Make a relation available by name to FROM clauses, as the table
    /// argument of a table-valued function body would be.
    ///
    /// Relation arguments hide catalog tables of the same name.
    pub fn add_relation_argument(&mut self, table: Table) -> Result<()> {
        let name = IdString::new(table.name.clone());
        if self.relation_arguments.contains_key(&name) {
            return Err(SqlError::new(format!("Duplicate relation argument {name}")));
        }
        self.relation_arguments.insert(name, Arc::new(table));
        Ok(())
    }

    /// Parse and bind a single query.
    pub fn analyze_sql(&self, sql: &str) -> Result<AnalyzerOutput> {
        let query = sqlbind_parser::parse_query(sql)?;
        self.analyze_query(&query)
    }

    pub fn analyze_query(&self, query: &ast::QueryNode) -> Result<AnalyzerOutput> {
        let mut ctx = AnalysisContext::new(
            self.catalog,
            self.coercer,
            self.functions,
            &self.options,
            &self.relation_arguments,
        );
        let scope = NameScope::empty();
        let bound = QueryBinder::new(&scope).bind(&mut ctx, query)?;

        let names = bound.column_names();
        let output_columns: Vec<OutputColumn> = bound
            .column_list
            .iter()
            .enumerate()
            .map(|(idx, column)| OutputColumn {
                name: names
                    .get(idx)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| column.name.clone()),
                column: column.clone(),
            })
            .collect();

        debug!(
            columns = output_columns.len(),
            properties = ?ctx.properties,
            "analyzed query"
        );

        Ok(AnalyzerOutput {
            scan: bound.scan,
            output_columns,
            is_value_table: bound.is_value_table,
            properties: ctx.properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use sqlbind_error::ErrorKind;

    use super::*;
    use crate::catalog::TableColumn;
    use crate::testutil::{TestEnv, analyze, find_scan};
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn output_columns_follow_select_list() {
        let out = analyze("SELECT Value AS v, Key FROM KeyValue").unwrap();
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["v", "Key"], names);
        assert_eq!(DataType::String, out.output_columns[0].column.datatype);
        assert!(!out.is_value_table);
        assert_eq!(AnalyzerOutputProperties::default(), out.properties);
    }

    #[test]
    fn column_ids_restart_per_analysis() {
        let env = TestEnv::new();
        let first = env.analyze("SELECT Key FROM KeyValue").unwrap();
        let second = env.analyze("SELECT Key FROM KeyValue").unwrap();
        assert_eq!(first.output_columns[0].column.id, second.output_columns[0].column.id);
    }

    #[test]
    fn select_as_value() {
        let out = analyze("SELECT AS VALUE Key FROM KeyValue").unwrap();
        assert!(out.is_value_table);
        assert_eq!(1, out.output_columns.len());
    }

    #[test]
    fn parse_errors_are_invalid_queries() {
        let err = analyze("SELECT 1 FROM KeyValue WHERE").unwrap_err();
        assert_eq!(ErrorKind::InvalidQuery, err.kind());
    }

    #[test]
    fn relation_argument_hides_table() {
        let env = TestEnv::new();
        let mut analyzer = env.analyzer();
        analyzer
            .add_relation_argument(Table::new(
                "KeyValue",
                [TableColumn::new("arg", DataType::Double)],
            ))
            .unwrap();

        let out = analyzer.analyze_sql("SELECT arg FROM KeyValue").unwrap();
        assert!(find_scan(&out.scan, "RelationArgumentScan").is_some());
        assert!(find_scan(&out.scan, "TableScan").is_none());

        let err = analyzer
            .add_relation_argument(Table::new("keyvalue", Vec::new()))
            .unwrap_err();
        assert_eq!("Duplicate relation argument keyvalue", err.message());
    }

    #[test]
    fn nesting_limit() {
        let env = TestEnv::with_options(AnalyzerOptions {
            max_nesting_depth: 4,
            ..Default::default()
        });
        let mut sql = "SELECT 1".to_string();
        for _ in 0..8 {
            sql = format!("SELECT ({sql})");
        }
        let err = env.analyze(&sql).unwrap_err();
        assert_eq!(ErrorKind::ResourceExhausted, err.kind());

        env.analyze("SELECT (SELECT 1)").unwrap();
    }

    /// `1 + (1 + (... (1)))`, nested `depth` times.
    fn right_nested_sum(depth: usize) -> String {
        let mut expr = "1".to_string();
        for _ in 0..depth {
            expr = format!("1 + ({expr})");
        }
        format!("SELECT {expr}")
    }

    #[test]
    fn long_expression_chain() {
        let sql = format!("SELECT {}", vec!["1"; 1000].join(" + "));
        let err = analyze(&sql).unwrap_err();
        assert_eq!(ErrorKind::ResourceExhausted, err.kind());
        assert_eq!("Expression nesting exceeds the maximum depth of 128", err.message());

        let sql = format!("SELECT {} AS total", vec!["1"; 100].join(" + "));
        let out = analyze(&sql).unwrap();
        assert_eq!(DataType::Int64, out.output_columns[0].column.datatype);
    }

    #[test]
    fn deeply_nested_parentheses() {
        let err = analyze(&right_nested_sum(500)).unwrap_err();
        assert_eq!(ErrorKind::ResourceExhausted, err.kind());

        let env = TestEnv::with_options(AnalyzerOptions {
            max_expression_depth: 16,
            ..Default::default()
        });
        env.analyze(&right_nested_sum(8)).unwrap();
        let err = env.analyze(&right_nested_sum(40)).unwrap_err();
        assert_eq!(ErrorKind::ResourceExhausted, err.kind());
        assert_eq!("Expression nesting exceeds the maximum depth of 16", err.message());
    }

    #[test]
    fn options_from_json() {
        let env = TestEnv::with_options(
            AnalyzerOptions::from_json(r#"{"enable_pivot": false}"#).unwrap(),
        );
        let err = env
            .analyze("SELECT * FROM KeyValue PIVOT(COUNT(*) FOR Key IN (1, 2))")
            .unwrap_err();
        assert_eq!(ErrorKind::Unimplemented, err.kind());
    }
}
