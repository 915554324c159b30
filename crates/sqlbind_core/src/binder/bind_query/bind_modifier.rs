use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;

use super::{BoundQuery, unique_columns};
use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{AliasMode, ExprBindInfo, ExpressionBinder, RecursionContext};
use crate::binder::name_scope::NameScope;
use crate::binder::query_resolution_info::QueryResolutionInfo;
use crate::expr::{Expression, ScalarValue};
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::{LimitOffsetScan, OrderByItem, OrderByScan, ProjectScan, Scan};
use crate::types::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct BoundOrderBy {
    pub items: Vec<OrderByItem>,
    /// Order keys that aren't plain columns, computed by a projection below
    /// the sort.
    pub computed: Vec<ComputedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundLimit {
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
}

impl BoundLimit {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }
}

/// Binds ORDER BY items.
#[derive(Debug, Clone, Copy)]
pub struct ModifierBinder<'s> {
    scope: &'s NameScope<'s>,
}

impl<'s> ModifierBinder<'s> {
    pub fn new(scope: &'s NameScope<'s>) -> Self {
        ModifierBinder { scope }
    }

    /// Bind ORDER BY items against the scope.
    ///
    /// Integer literals refer to `output_columns` by position.
    #[allow(clippy::too_many_arguments)]
    pub fn bind_order_by<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        order_by: &'ast ast::OrderByModifier,
        output_columns: &[ResolvedColumn],
        mut query_info: Option<&mut QueryResolutionInfo<'ast>>,
        aggregate_scope: Option<&NameScope>,
        alias_mode: AliasMode,
        recur: RecursionContext,
    ) -> Result<BoundOrderBy> {
        let mut items = Vec::with_capacity(order_by.order_by_nodes.len());
        let mut computed = Vec::new();

        for (idx, node) in order_by.order_by_nodes.iter().enumerate() {
            let expr = match node.expr.as_integer_literal() {
                Some(ordinal) => {
                    let column = ordinal
                        .checked_sub(1)
                        .and_then(|pos| usize::try_from(pos).ok())
                        .and_then(|pos| output_columns.get(pos))
                        .ok_or_else(|| {
                            SqlError::new(format!(
                                "ORDER BY is out of SELECT column number range: {ordinal}"
                            ))
                            .at(node.expr.location)
                        })?;
                    Expression::column(column.clone())
                }
                None => {
                    let mut info = ExprBindInfo::new("ORDER BY clause")
                        .with_alias_mode(alias_mode)
                        .with_register_analytic();
                    if let Some(query_info) = query_info.as_deref_mut() {
                        info = info.with_query_info(query_info);
                    }
                    if let Some(scope) = aggregate_scope {
                        info = info.with_aggregate_scope(scope);
                    }
                    ExpressionBinder::new(self.scope).bind_expression(
                        ctx,
                        &node.expr,
                        &mut info,
                        recur,
                    )?
                }
            };

            let datatype = expr.datatype();
            if !expr.is_untyped_null() && !ctx.coercer.supports_ordering(&datatype) {
                return Err(SqlError::new(format!(
                    "ORDER BY does not support expressions of type {datatype}"
                ))
                .at(node.expr.location));
            }

            // Constants don't affect the order.
            if expr.is_literal() {
                continue;
            }

            let expr = match expr.as_uncorrelated_column() {
                Some(_) => expr,
                None => {
                    let column = ctx.allocate_column_with_collation(
                        "$orderby",
                        format!("$orderbycol{}", idx + 1),
                        datatype,
                        expr.collation().map(|c| c.to_string()),
                    );
                    computed.push(ComputedColumn::new(column.clone(), expr));
                    Expression::column(column)
                }
            };

            items.push(OrderByItem {
                expr,
                descending: matches!(node.typ, Some(ast::OrderByType::Desc)),
                nulls_first: node.nulls.map(|n| matches!(n, ast::OrderByNulls::First)),
            });
        }

        Ok(BoundOrderBy { items, computed })
    }
}

/// Bind LIMIT and OFFSET, which must be non-negative integer literals.
pub fn bind_limit(limit: &ast::LimitModifier) -> Result<BoundLimit> {
    fn bind_count(expr: Option<&ast::Expr>, clause: &str) -> Result<Option<Expression>> {
        let expr = match expr {
            Some(expr) => expr,
            None => return Ok(None),
        };
        match expr.as_integer_literal() {
            Some(v) if v >= 0 => Ok(Some(Expression::literal(
                ScalarValue::Int64(v),
                DataType::Int64,
            ))),
            Some(_) => Err(SqlError::new(format!(
                "{clause} expects a non-negative integer literal or parameter"
            ))
            .at(expr.location)),
            None => Err(SqlError::new(format!(
                "{clause} expects an integer literal or parameter"
            ))
            .at(expr.location)),
        }
    }

    Ok(BoundLimit {
        limit: bind_count(limit.limit.as_ref(), "LIMIT")?,
        offset: bind_count(limit.offset.as_ref(), "OFFSET")?,
    })
}

/// Sort `input`, computing any non-column keys first.
pub fn plan_order_by(
    input: Scan,
    order_by: BoundOrderBy,
    column_list: Vec<ResolvedColumn>,
) -> Scan {
    let mut input = input;
    if !order_by.computed.is_empty() {
        let mut project_cols = input.column_list().to_vec();
        project_cols.extend(order_by.computed.iter().map(|c| c.column.clone()));
        input = Scan::Project(ProjectScan {
            input: Box::new(input),
            exprs: order_by.computed,
            column_list: project_cols,
            hints: Vec::new(),
        });
    }
    if order_by.items.is_empty() {
        return input;
    }
    Scan::OrderBy(OrderByScan {
        input: Box::new(input),
        items: order_by.items,
        column_list,
    })
}

pub fn plan_limit(input: Scan, limit: BoundLimit) -> Scan {
    if limit.is_empty() {
        return input;
    }
    let column_list = input.column_list().to_vec();
    Scan::LimitOffset(LimitOffsetScan {
        input: Box::new(input),
        limit: limit.limit,
        offset: limit.offset,
        column_list,
    })
}

/// Apply ORDER BY and LIMIT to a query that isn't a plain SELECT, e.g. a
/// set operation.
///
/// Only the query's output names are visible to ORDER BY.
pub fn bind_query_modifiers(
    ctx: &mut AnalysisContext,
    outer: &NameScope,
    bound: BoundQuery,
    order_by: Option<&ast::OrderByModifier>,
    limit: &ast::LimitModifier,
) -> Result<BoundQuery> {
    if order_by.is_none() && limit.is_empty() {
        return Ok(bound);
    }

    let limit = bind_limit(limit)?;
    let mut scan = bound.scan;
    if let Some(order_by) = order_by {
        let scope = NameScope::with_previous(bound.names.clone(), outer, true);
        let order_by = ModifierBinder::new(&scope).bind_order_by(
            ctx,
            order_by,
            &bound.column_list,
            None,
            None,
            AliasMode::None,
            RecursionContext::new(false, false),
        )?;
        scan = plan_order_by(scan, order_by, unique_columns(&bound.column_list));
    }
    scan = plan_limit(scan, limit);

    Ok(BoundQuery { scan, ..bound })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::parse_query;
    use pretty_assertions::assert_eq;

    fn limit_of(sql: &str) -> ast::LimitModifier {
        parse_query(sql).limit
    }

    #[test]
    fn limit_literals() {
        let bound = bind_limit(&limit_of("SELECT 1 LIMIT 10 OFFSET 2")).unwrap();
        assert_eq!("10", bound.limit.unwrap().to_string());
        assert_eq!("2", bound.offset.unwrap().to_string());
    }

    #[test]
    fn limit_rejects_negative() {
        let err = bind_limit(&limit_of("SELECT 1 LIMIT -1")).unwrap_err();
        assert_eq!(
            "LIMIT expects a non-negative integer literal or parameter",
            err.message()
        );
    }

    #[test]
    fn limit_rejects_expression() {
        let err = bind_limit(&limit_of("SELECT 1 LIMIT 1 + 1")).unwrap_err();
        assert_eq!("LIMIT expects an integer literal or parameter", err.message());
    }
}
