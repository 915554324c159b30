use std::sync::Arc;

use hashbrown::HashMap;
use sqlbind_error::{Location, Result, SqlError};

use super::name_list::NameList;
use crate::analyzer::AnalyzerOutputProperties;
use crate::catalog::{Catalog, Table};
use crate::config::AnalyzerOptions;
use crate::expr::ColumnExpr;
use crate::functions::FunctionRegistry;
use crate::ident::IdString;
use crate::logical::column::{ColumnFactory, ResolvedColumn};
use crate::types::DataType;
use crate::types::coercer::TypeCoercer;

/// A WITH entry visible to FROM clauses.
#[derive(Debug, Clone)]
pub struct NamedSubquery {
    pub unique_alias: String,
    /// References produce a `RecursiveRefScan` instead of a `WithRefScan`.
    pub is_recursive: bool,
    pub column_list: Vec<ResolvedColumn>,
    pub names: Arc<NameList>,
}

/// State shared across the binding of a single statement.
#[derive(Debug)]
pub struct AnalysisContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub coercer: &'a dyn TypeCoercer,
    pub functions: &'a FunctionRegistry,
    pub options: &'a AnalyzerOptions,
    /// Named relations provided by the caller, e.g. the table argument of a
    /// function body.
    pub relation_arguments: &'a HashMap<IdString, Arc<Table>>,
    pub properties: AnalyzerOutputProperties,
    column_factory: ColumnFactory,
    /// WITH aliases currently in scope. The last entry for an alias wins, a
    /// None entry is an alias whose definition is being bound.
    named_subqueries: HashMap<IdString, Vec<Option<Arc<NamedSubquery>>>>,
    with_alias_counts: HashMap<IdString, usize>,
    /// One frame per expression subquery being bound, collecting the outer
    /// columns it references.
    correlation_frames: Vec<Vec<ColumnExpr>>,
    depth: usize,
    /// Depth within the expression currently being bound. Restarts at zero
    /// inside each nested query.
    expression_depth: usize,
}

/// Remaining stack below which binding continues on a new segment.
const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_SEGMENT_SIZE: usize = 4 * 1024 * 1024;

/// Run `f`, moving to a fresh stack segment first if little stack remains.
///
/// Used at every level of recursion over queries and expressions.
pub fn maybe_grow<T>(f: impl FnOnce() -> T) -> T {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT_SIZE, f)
}

impl<'a> AnalysisContext<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        coercer: &'a dyn TypeCoercer,
        functions: &'a FunctionRegistry,
        options: &'a AnalyzerOptions,
        relation_arguments: &'a HashMap<IdString, Arc<Table>>,
    ) -> Self {
        AnalysisContext {
            catalog,
            coercer,
            functions,
            options,
            relation_arguments,
            properties: AnalyzerOutputProperties::default(),
            column_factory: ColumnFactory::new(),
            named_subqueries: HashMap::new(),
            with_alias_counts: HashMap::new(),
            correlation_frames: Vec::new(),
            depth: 0,
            expression_depth: 0,
        }
    }

    pub fn allocate_column(
        &mut self,
        table_name: impl Into<String>,
        name: impl Into<String>,
        datatype: DataType,
    ) -> ResolvedColumn {
        self.column_factory.allocate(table_name, name, datatype)
    }

    pub fn allocate_column_with_collation(
        &mut self,
        table_name: impl Into<String>,
        name: impl Into<String>,
        datatype: DataType,
        collation: Option<String>,
    ) -> ResolvedColumn {
        self.column_factory
            .allocate_with_collation(table_name, name, datatype, collation)
    }

    /// Run `f` one nesting level deeper, erroring once the configured
    /// maximum is reached.
    pub fn nested<T>(
        &mut self,
        location: Location,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.depth >= self.options.max_nesting_depth {
            tracing::debug!(depth = self.depth, "query nesting limit reached");
            return Err(SqlError::resource_exhausted(format!(
                "Query nesting exceeds the maximum depth of {}",
                self.options.max_nesting_depth
            ))
            .at(location));
        }
        self.depth += 1;
        let expression_depth = std::mem::take(&mut self.expression_depth);
        let result = maybe_grow(|| f(self));
        self.expression_depth = expression_depth;
        self.depth -= 1;
        result
    }

    /// Run `f` one expression level deeper, erroring once the configured
    /// maximum expression depth is reached.
    pub fn nested_expression<T>(
        &mut self,
        location: Location,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.expression_depth >= self.options.max_expression_depth {
            tracing::debug!(depth = self.expression_depth, "expression nesting limit reached");
            return Err(SqlError::resource_exhausted(format!(
                "Expression nesting exceeds the maximum depth of {}",
                self.options.max_expression_depth
            ))
            .at(location));
        }
        self.expression_depth += 1;
        let result = maybe_grow(|| f(self));
        self.expression_depth -= 1;
        result
    }

    /// Push a being-defined marker for a WITH alias.
    pub fn push_named_subquery(&mut self, alias: IdString) {
        self.named_subqueries.entry(alias).or_default().push(None);
    }

    /// Replace the innermost binding for `alias`.
    pub fn set_named_subquery(&mut self, alias: &IdString, subquery: NamedSubquery) -> Result<()> {
        let slot = self
            .named_subqueries
            .get_mut(alias)
            .and_then(|stack| stack.last_mut())
            .ok_or_else(|| SqlError::internal(format!("WITH alias {alias} was never pushed")))?;
        *slot = Some(Arc::new(subquery));
        Ok(())
    }

    pub fn pop_named_subquery(&mut self, alias: &IdString) -> Result<()> {
        let stack = self
            .named_subqueries
            .get_mut(alias)
            .ok_or_else(|| SqlError::internal(format!("WITH alias {alias} was never pushed")))?;
        if stack.pop().is_none() {
            return Err(SqlError::internal(format!("WITH alias {alias} popped too many times")));
        }
        if stack.is_empty() {
            self.named_subqueries.remove(alias);
        }
        Ok(())
    }

    /// Find the innermost binding for a WITH alias.
    ///
    /// `Some(None)` means the alias is currently being defined.
    pub fn find_named_subquery(&self, alias: &IdString) -> Option<Option<Arc<NamedSubquery>>> {
        self.named_subqueries
            .get(alias)
            .and_then(|stack| stack.last())
            .cloned()
    }

    /// Generate an alias unique within this analysis.
    ///
    /// The first use of `t` keeps its name, later uses become `t_1`, `t_2`
    /// and so on.
    pub fn unique_with_alias(&mut self, alias: &IdString) -> String {
        let count = self.with_alias_counts.entry(alias.clone()).or_insert(0);
        let unique = if *count == 0 {
            alias.to_string()
        } else {
            format!("{alias}_{count}")
        };
        *count += 1;
        unique
    }

    /// Run `f` with a fresh correlation frame, returning the outer columns
    /// referenced while inside it.
    pub fn with_correlation_frame<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<(T, Vec<ColumnExpr>)> {
        self.correlation_frames.push(Vec::new());
        let result = f(self);
        let frame = self.correlation_frames.pop().unwrap_or_default();
        Ok((result?, frame))
    }

    /// Record a reference to a column found `depth` correlated scopes out.
    ///
    /// Each subquery between the reference and the column's scope receives
    /// the column as a parameter. The parameter is itself correlated in all
    /// but the outermost of those subqueries.
    pub fn record_correlated_reference(
        &mut self,
        column: &ResolvedColumn,
        depth: usize,
    ) -> Result<()> {
        if depth == 0 {
            return Ok(());
        }
        let num_frames = self.correlation_frames.len();
        if depth > num_frames {
            return Err(SqlError::internal(format!(
                "Correlated reference to {column} crosses {depth} scopes, only {num_frames} subqueries are being bound"
            )));
        }
        for k in 0..depth {
            let frame = &mut self.correlation_frames[num_frames - 1 - k];
            let param = ColumnExpr {
                column: column.clone(),
                is_correlated: depth - k - 1 > 0,
            };
            if !frame.iter().any(|p| p.column == param.column) {
                frame.push(param);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::types::coercer::DefaultCoercer;
    use pretty_assertions::assert_eq;

    fn with_context<T>(opts: AnalyzerOptions, f: impl FnOnce(&mut AnalysisContext) -> T) -> T {
        let catalog = MemoryCatalog::new();
        let relations = HashMap::new();
        let mut ctx = AnalysisContext::new(
            &catalog,
            &DefaultCoercer,
            FunctionRegistry::builtin(),
            &opts,
            &relations,
        );
        f(&mut ctx)
    }

    #[test]
    fn unique_aliases() {
        with_context(AnalyzerOptions::default(), |ctx| {
            assert_eq!("t", ctx.unique_with_alias(&"t".into()));
            assert_eq!("T_1", ctx.unique_with_alias(&"T".into()));
            assert_eq!("u", ctx.unique_with_alias(&"u".into()));
            assert_eq!("t_2", ctx.unique_with_alias(&"t".into()));
        });
    }

    #[test]
    fn named_subquery_shadowing() {
        with_context(AnalyzerOptions::default(), |ctx| {
            let alias = IdString::new("t");
            let make = |name: &str| NamedSubquery {
                unique_alias: name.to_string(),
                is_recursive: false,
                column_list: Vec::new(),
                names: Arc::new(NameList::new()),
            };

            assert!(ctx.find_named_subquery(&alias).is_none());

            ctx.push_named_subquery(alias.clone());
            assert!(matches!(ctx.find_named_subquery(&alias), Some(None)));
            ctx.set_named_subquery(&alias, make("t")).unwrap();

            ctx.push_named_subquery(alias.clone());
            ctx.set_named_subquery(&alias, make("t_1")).unwrap();
            let inner = ctx.find_named_subquery(&alias).unwrap().unwrap();
            assert_eq!("t_1", inner.unique_alias);

            ctx.pop_named_subquery(&alias).unwrap();
            let outer = ctx.find_named_subquery(&alias).unwrap().unwrap();
            assert_eq!("t", outer.unique_alias);

            ctx.pop_named_subquery(&alias).unwrap();
            assert!(ctx.find_named_subquery(&alias).is_none());
            assert!(ctx.pop_named_subquery(&alias).unwrap_err().is_internal());
        });
    }

    #[test]
    fn nesting_limit() {
        let opts = AnalyzerOptions {
            max_nesting_depth: 2,
            ..Default::default()
        };
        with_context(opts, |ctx| {
            let loc = Location::new(1, 1, 0);
            ctx.nested(loc, |ctx| ctx.nested(loc, |_| Ok(()))).unwrap();
            let err = ctx
                .nested(loc, |ctx| ctx.nested(loc, |ctx| ctx.nested(loc, |_| Ok(()))))
                .unwrap_err();
            assert_eq!(sqlbind_error::ErrorKind::ResourceExhausted, err.kind());
        });
    }

    #[test]
    fn expression_depth_restarts_in_nested_query() {
        let opts = AnalyzerOptions {
            max_expression_depth: 2,
            ..Default::default()
        };
        with_context(opts, |ctx| {
            let loc = Location::new(1, 1, 0);
            let err = ctx
                .nested_expression(loc, |ctx| {
                    ctx.nested_expression(loc, |ctx| ctx.nested_expression(loc, |_| Ok(())))
                })
                .unwrap_err();
            assert_eq!(sqlbind_error::ErrorKind::ResourceExhausted, err.kind());
            assert_eq!("Expression nesting exceeds the maximum depth of 2", err.message());

            ctx.nested_expression(loc, |ctx| {
                ctx.nested_expression(loc, |ctx| {
                    ctx.nested(loc, |ctx| {
                        ctx.nested_expression(loc, |ctx| ctx.nested_expression(loc, |_| Ok(())))
                    })
                })
            })
            .unwrap();
        });
    }

    #[test]
    fn correlated_parameters_per_frame() {
        with_context(AnalyzerOptions::default(), |ctx| {
            let col = ctx.allocate_column("t", "a", DataType::Int64);
            let ((_, inner_params), outer_params) = ctx
                .with_correlation_frame(|ctx| {
                    ctx.with_correlation_frame(|ctx| ctx.record_correlated_reference(&col, 2))
                })
                .unwrap();

            assert_eq!(1, inner_params.len());
            assert!(inner_params[0].is_correlated);
            assert_eq!(1, outer_params.len());
            assert!(!outer_params[0].is_correlated);
        });
    }
}
