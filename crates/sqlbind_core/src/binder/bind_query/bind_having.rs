use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;

use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{
    AliasMode,
    ExprBindInfo,
    ExpressionBinder,
    RecursionContext,
    check_bool,
};
use crate::binder::name_scope::NameScope;
use crate::binder::query_resolution_info::QueryResolutionInfo;
use crate::expr::Expression;

/// Binds HAVING and QUALIFY.
///
/// Both are bound once the SELECT list is finalized so that they may
/// reference its aliases.
#[derive(Debug, Clone, Copy)]
pub struct HavingBinder<'s> {
    /// FROM scope of the select.
    from_scope: &'s NameScope<'s>,
}

impl<'s> HavingBinder<'s> {
    pub fn new(from_scope: &'s NameScope<'s>) -> Self {
        HavingBinder { from_scope }
    }

    /// Check whether an expression would aggregate if bound in the SELECT
    /// list, without registering anything.
    pub fn detect_aggregation<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        expr: &'ast ast::Expr,
        clause: &'static str,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<bool> {
        let checkpoint = query_info.checkpoint();
        let mut info = ExprBindInfo::new(clause)
            .with_query_info(query_info)
            .with_alias_mode(AliasMode::FirstPass);
        let result = ExpressionBinder::new(self.from_scope).bind_expression(
            ctx,
            expr,
            &mut info,
            RecursionContext::new(true, true),
        );
        let has_aggregation = info.has_aggregation;
        query_info.rollback(checkpoint);
        result?;
        Ok(has_aggregation)
    }

    /// Bind HAVING against the post-GROUP BY scope.
    ///
    /// `post_group_scope` is None if the query neither groups nor
    /// aggregates, in which case HAVING is an error.
    pub fn bind_having<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        having: &'ast ast::Expr,
        post_group_scope: Option<&NameScope>,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<Expression> {
        let post_group_scope = match post_group_scope {
            Some(scope) => scope,
            None => {
                let aggregates =
                    self.detect_aggregation(ctx, having, "HAVING clause", query_info)?;
                let msg = if aggregates {
                    "The HAVING clause only allows aggregation if GROUP BY or SELECT list aggregation is present"
                } else {
                    "The HAVING clause requires GROUP BY or aggregation to be present"
                };
                return Err(SqlError::new(msg).at(having.location));
            }
        };

        let mut info = ExprBindInfo::new("HAVING clause")
            .with_query_info(query_info)
            .with_aggregate_scope(self.from_scope)
            .with_alias_mode(AliasMode::PostGroup {
                allow_analytic: false,
            })
            .with_mark_early_compute();
        let expr = ExpressionBinder::new(post_group_scope).bind_expression(
            ctx,
            having,
            &mut info,
            RecursionContext::new(true, false),
        )?;
        check_bool(&expr, "HAVING clause").map_err(|e| e.at(having.location))?;
        Ok(expr)
    }

    /// Bind QUALIFY, which must contain an analytic function.
    ///
    /// Bound against the post-GROUP BY scope when grouping, otherwise the
    /// FROM scope.
    pub fn bind_qualify<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        qualify: &'ast ast::Expr,
        post_group_scope: Option<&NameScope>,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<Expression> {
        let grouped = post_group_scope.is_some();
        let scope = post_group_scope.unwrap_or(self.from_scope);

        let mut info = ExprBindInfo::new("QUALIFY clause")
            .with_query_info(query_info)
            .with_alias_mode(AliasMode::PostGroup {
                allow_analytic: true,
            })
            .with_register_analytic();
        if grouped {
            info = info.with_aggregate_scope(self.from_scope);
        }
        let expr = ExpressionBinder::new(scope).bind_expression(
            ctx,
            qualify,
            &mut info,
            RecursionContext::new(grouped, true),
        )?;
        if !info.has_analytic {
            return Err(SqlError::new(
                "The QUALIFY clause requires analytic function to be present",
            )
            .at(qualify.location));
        }
        check_bool(&expr, "QUALIFY clause").map_err(|e| e.at(qualify.location))?;
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use crate::logical::scan::Scan;
    use crate::testutil::{analyze, find_scan, strip_ids};
    use pretty_assertions::assert_eq;

    #[test]
    fn having_references_aggregate_alias() {
        let out = analyze("SELECT key, COUNT(*) AS c FROM KeyValue GROUP BY key HAVING c > 1")
            .unwrap();
        match find_scan(&out.scan, "FilterScan") {
            Some(Scan::Filter(filter)) => {
                assert_eq!(
                    "$greater($aggregate.$agg1, 1)",
                    strip_ids(&filter.predicate.to_string())
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn having_new_aggregate() {
        let out = analyze("SELECT key FROM KeyValue GROUP BY key HAVING SUM(key) > 10").unwrap();
        match find_scan(&out.scan, "AggregateScan") {
            Some(Scan::Aggregate(agg)) => assert_eq!(1, agg.aggregates.len()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn having_repeats_select_aggregate() {
        let out = analyze("SELECT SUM(key) AS s FROM KeyValue HAVING SUM(key) > 1").unwrap();
        match find_scan(&out.scan, "AggregateScan") {
            Some(Scan::Aggregate(agg)) => assert_eq!(1, agg.aggregates.len()),
            other => panic!("unexpected: {other:?}"),
        }
        match find_scan(&out.scan, "FilterScan") {
            Some(Scan::Filter(filter)) => {
                assert_eq!(
                    "$greater($aggregate.$agg1, 1)",
                    strip_ids(&filter.predicate.to_string())
                );
            }
            other => panic!("unexpected: {other:?}"),
        }

        let out = analyze("SELECT SUM(key) AS s FROM KeyValue HAVING SUM(DISTINCT key) > 1")
            .unwrap();
        match find_scan(&out.scan, "AggregateScan") {
            Some(Scan::Aggregate(agg)) => assert_eq!(2, agg.aggregates.len()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn repeated_analytic_computed_once() {
        let out = analyze(
            "SELECT ROW_NUMBER() OVER (ORDER BY key) AS a, \
             ROW_NUMBER() OVER (ORDER BY key) AS b FROM KeyValue",
        )
        .unwrap();
        match find_scan(&out.scan, "AnalyticScan") {
            Some(Scan::Analytic(analytic)) => assert_eq!(1, analytic.functions.len()),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(2, out.output_columns.len());
    }

    #[test]
    fn having_without_grouping() {
        let err = analyze("SELECT key FROM KeyValue HAVING key > 1").unwrap_err();
        assert_eq!(
            "The HAVING clause requires GROUP BY or aggregation to be present",
            err.message()
        );
        let err = analyze("SELECT key FROM KeyValue HAVING COUNT(*) > 1").unwrap_err();
        assert_eq!(
            "The HAVING clause only allows aggregation if GROUP BY or SELECT list aggregation is present",
            err.message()
        );
    }

    #[test]
    fn having_ungrouped_column() {
        let err = analyze("SELECT key FROM KeyValue GROUP BY key HAVING value = 'a'").unwrap_err();
        assert_eq!(
            "HAVING clause expression references column value which is neither grouped nor aggregated",
            err.message()
        );
    }

    #[test]
    fn qualify_row_number() {
        let out = analyze(
            "SELECT key, ROW_NUMBER() OVER (ORDER BY key) AS rn FROM KeyValue QUALIFY rn = 1",
        )
        .unwrap();
        assert!(find_scan(&out.scan, "AnalyticScan").is_some());
    }

    #[test]
    fn qualify_requires_analytic() {
        let err = analyze("SELECT key FROM KeyValue QUALIFY key = 1").unwrap_err();
        assert_eq!(
            "The QUALIFY clause requires analytic function to be present",
            err.message()
        );
    }
}
