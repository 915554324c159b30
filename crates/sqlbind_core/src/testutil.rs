//! Shared helpers for unit tests.
use std::sync::Arc;

use hashbrown::HashMap;
use sqlbind_error::Result;
use sqlbind_parser::ast::{self, AstParseable};
use sqlbind_parser::tokens::Tokenizer;
use sqlbind_parser::Parser;

use crate::analyzer::{Analyzer, AnalyzerOutput};
use crate::binder::bind_query::bind_from::FromBinder;
use crate::binder::context::AnalysisContext;
use crate::binder::name_scope::NameScope;
use crate::catalog::memory::MemoryCatalog;
use crate::catalog::{
    Connection,
    Model,
    Table,
    TableColumn,
    TableFunction,
    TvfArgumentKind,
    TvfOutput,
};
use crate::config::AnalyzerOptions;
use crate::functions::FunctionRegistry;
use crate::ident::IdString;
use crate::logical::scan::Scan;
use crate::types::coercer::DefaultCoercer;
use crate::types::{DataType, StructField};

/// A catalog populated with the tables the tests query, plus the options
/// to analyze with.
#[derive(Debug)]
pub struct TestEnv {
    pub catalog: MemoryCatalog,
    pub options: AnalyzerOptions,
    relation_arguments: HashMap<IdString, Arc<Table>>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_options(AnalyzerOptions::default())
    }

    pub fn with_options(options: AnalyzerOptions) -> Self {
        logutil::init_test();
        TestEnv {
            catalog: test_catalog(),
            options,
            relation_arguments: HashMap::new(),
        }
    }

    pub fn analyzer(&self) -> Analyzer<'_> {
        Analyzer::new(&self.catalog).with_options(self.options.clone())
    }

    pub fn analyze(&self, sql: &str) -> Result<AnalyzerOutput> {
        self.analyzer().analyze_sql(sql)
    }

    /// Run `f` with a fresh analysis context over this environment.
    pub fn with_context<T>(&self, f: impl FnOnce(&mut AnalysisContext) -> T) -> T {
        let coercer = DefaultCoercer;
        let mut ctx = AnalysisContext::new(
            &self.catalog,
            &coercer,
            FunctionRegistry::builtin(),
            &self.options,
            &self.relation_arguments,
        );
        f(&mut ctx)
    }

    /// Scope holding the columns of a catalog table, as seen by the WHERE
    /// clause of `SELECT ... FROM <table>`.
    pub fn table_scope(&self, ctx: &mut AnalysisContext, table: &str) -> NameScope<'static> {
        let query = parse_query(&format!("SELECT 1 FROM {table}"));
        let from = match &query.body {
            ast::QueryNodeBody::Select(select) => select.from.clone().unwrap(),
            other => panic!("unexpected body: {other:?}"),
        };
        let outer = NameScope::empty();
        let bound = FromBinder::new(&outer).bind(ctx, &from).unwrap();
        NameScope::new(bound.names)
    }
}

pub fn analyze(sql: &str) -> Result<AnalyzerOutput> {
    TestEnv::new().analyze(sql)
}

pub fn parse_query(sql: &str) -> ast::QueryNode {
    sqlbind_parser::parse_query(sql).unwrap()
}

pub fn parse_expr(sql: &str) -> ast::Expr {
    let toks = Tokenizer::new(sql).tokenize().unwrap();
    let mut parser = Parser::with_tokens(toks);
    ast::Expr::parse(&mut parser).unwrap()
}

/// First scan with the given node name, searching depth first and through
/// subquery expressions.
pub fn find_scan<'a>(scan: &'a Scan, name: &str) -> Option<&'a Scan> {
    let mut found = None;
    let _ = scan.walk(&mut |scan| {
        if found.is_none() && scan.name() == name {
            found = Some(scan);
        }
        Ok(())
    });
    found
}

/// Remove column ids (`#12`) so expected strings don't depend on allocation
/// order.
pub fn strip_ids(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn test_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();

    let key_value = |name: &str| {
        Table::new(
            name,
            [
                TableColumn::new("Key", DataType::Int64),
                TableColumn::new("Value", DataType::String),
            ],
        )
    };
    catalog.add_table(key_value("KeyValue")).unwrap();
    catalog.add_table(key_value("KeyValue2")).unwrap();
    catalog
        .add_table(Table::new(
            "KeyValue3",
            [
                TableColumn::new("Key", DataType::Int64),
                TableColumn::new("Value", DataType::String),
                TableColumn::new("Other", DataType::Int64),
            ],
        ))
        .unwrap();

    let inner = DataType::Struct(vec![
        StructField::new("a", DataType::Int64),
        StructField::new("b", DataType::String),
    ]);
    catalog
        .add_table(Table::new(
            "ComplexTypes",
            [
                TableColumn::new(
                    "TestStruct",
                    DataType::Struct(vec![
                        StructField::new("c", DataType::Int64),
                        StructField::new("d", inner.clone()),
                    ]),
                ),
                TableColumn::new("Int32Array", DataType::Array(Box::new(DataType::Int64))),
                TableColumn::new("JsonCol", DataType::Json),
            ],
        ))
        .unwrap();
    catalog
        .add_table(Table::value_table("StructValueTable", inner))
        .unwrap();
    catalog
        .add_table(Table::new(
            "Pseudo",
            [
                TableColumn::new("Visible", DataType::Int64),
                TableColumn::pseudo("Hidden", DataType::String),
                TableColumn::new("Name", DataType::String).with_collation("und:ci"),
            ],
        ))
        .unwrap();

    catalog
        .add_table_function(TableFunction {
            name: "tvf_fixed".to_string(),
            arguments: vec![TvfArgumentKind::Scalar(DataType::Int64), TvfArgumentKind::Relation],
            output: TvfOutput::Fixed(vec![TableColumn::new("out", DataType::Int64)]),
        })
        .unwrap();
    catalog
        .add_table_function(TableFunction {
            name: "tvf_passthrough".to_string(),
            arguments: vec![TvfArgumentKind::Relation],
            output: TvfOutput::PassThrough(0),
        })
        .unwrap();
    catalog
        .add_table_function(TableFunction {
            name: "tvf_predict".to_string(),
            arguments: vec![
                TvfArgumentKind::Model,
                TvfArgumentKind::Relation,
                TvfArgumentKind::Connection,
            ],
            output: TvfOutput::Fixed(vec![TableColumn::new("prediction", DataType::Double)]),
        })
        .unwrap();
    catalog
        .add_model(Model {
            name: "test_model".to_string(),
            inputs: vec![TableColumn::new("Key", DataType::Int64)],
            outputs: vec![TableColumn::new("prediction", DataType::Double)],
        })
        .unwrap();
    catalog
        .add_connection(Connection {
            name: "test_connection".to_string(),
        })
        .unwrap();

    catalog
}
