use std::sync::Arc;

use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;

use super::bind_distinct::{NOT_VISIBLE_AFTER_DISTINCT, bind_distinct, distinct_valid_fields};
use super::bind_from::FromBinder;
use super::bind_group_by::{GroupByBinder, group_by_valid_fields};
use super::bind_having::HavingBinder;
use super::bind_modifier::{BoundOrderBy, ModifierBinder, bind_limit, plan_limit, plan_order_by};
use super::bind_select_list::SelectListBinder;
use super::{BoundQuery, unique_columns};
use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{
    AliasMode,
    ExprBindInfo,
    ExpressionBinder,
    RecursionContext,
    check_bool,
};
use crate::binder::name_list::NameList;
use crate::binder::name_scope::NameScope;
use crate::binder::query_resolution_info::{
    QueryResolutionInfo,
    SelectColumnProvenance,
    SelectColumnResolution,
};
use crate::expr::{Expression, MakeStructExpr};
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::{
    AggregateScan,
    AnalyticScan,
    FilterScan,
    Hint,
    ProjectScan,
    Scan,
    SingleRowScan,
};
use crate::types::coercer::InputArgumentType;
use crate::types::{DataType, StructField};

/// Reason given when an expression references an ungrouped column.
pub const NEITHER_GROUPED_NOR_AGGREGATED: &str = "which is neither grouped nor aggregated";

/// Binds a single SELECT along with the ORDER BY and LIMIT applied to it.
#[derive(Debug, Clone, Copy)]
pub struct SelectBinder<'s> {
    outer: &'s NameScope<'s>,
}

impl<'s> SelectBinder<'s> {
    pub fn new(outer: &'s NameScope<'s>) -> Self {
        SelectBinder { outer }
    }

    pub fn bind<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        select: &'ast ast::SelectNode,
        order_by: Option<&'ast ast::OrderByModifier>,
        limit: &ast::LimitModifier,
    ) -> Result<BoundQuery> {
        ctx.nested(select.location, |ctx| {
            self.bind_select(ctx, select, order_by, limit)
        })
    }

    fn bind_select<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        select: &'ast ast::SelectNode,
        order_by: Option<&'ast ast::OrderByModifier>,
        limit: &ast::LimitModifier,
    ) -> Result<BoundQuery> {
        let (mut scan, from_names) = match &select.from {
            Some(from) => {
                let bound = FromBinder::new(self.outer).bind(ctx, from)?;
                (bound.scan, bound.names)
            }
            None => {
                check_no_from_clauses(select)?;
                (Scan::SingleRow(SingleRowScan), Arc::new(NameList::new()))
            }
        };
        let from_scope = NameScope::with_previous(from_names.clone(), self.outer, true);

        if let Some(where_expr) = &select.where_expr {
            let mut info = ExprBindInfo::new("WHERE clause");
            let predicate = ExpressionBinder::new(&from_scope).bind_expression(
                ctx,
                where_expr,
                &mut info,
                RecursionContext::new(false, false),
            )?;
            check_bool(&predicate, "WHERE clause").map_err(|e| e.at(where_expr.location))?;
            scan = filter(scan, predicate);
        }

        let mut query_info = QueryResolutionInfo::new();
        let select_list = SelectListBinder::new(&from_scope);
        select_list.bind_first_pass(
            ctx,
            &select.projections,
            select.from.is_some(),
            &mut query_info,
        )?;

        let having_binder = HavingBinder::new(&from_scope);
        if let Some(qualify) = &select.qualify {
            if !ctx.options.enable_qualify {
                return Err(SqlError::new("QUALIFY is not supported").at(qualify.location));
            }
            // Whether QUALIFY aggregates changes the shape of the query, so
            // find out before grouping.
            if select.group_by.is_none() && !query_info.has_group_by_or_aggregation() {
                query_info.qualify_has_aggregation = having_binder.detect_aggregation(
                    ctx,
                    qualify,
                    "QUALIFY clause",
                    &mut query_info,
                )?;
            }
        }

        match &select.group_by {
            Some(group_by) => {
                GroupByBinder::new(&from_scope).bind(ctx, group_by, &mut query_info)?
            }
            None => {
                if should_apply_implicit_group_by_all(&query_info) {
                    return Err(SqlError::internal("Implicit GROUP BY ALL is not enabled"));
                }
            }
        }

        let grouped = query_info.has_group_by_or_aggregation();
        let post_group_scope = if grouped {
            query_info.group_by_resolved = true;
            let fields = group_by_valid_fields(&query_info);
            query_info.group_by_fields = Some(fields.clone());
            Some(
                NameScope::with_previous(from_names.clone(), self.outer, true)
                    .with_valid_fields(fields, NEITHER_GROUPED_NOR_AGGREGATED),
            )
        } else {
            None
        };

        select_list.finalize(ctx, &mut query_info, post_group_scope.as_ref())?;
        if let Some(state) = query_info
            .select_columns
            .iter()
            .find(|state| state.output_column().is_none())
        {
            return Err(SqlError::internal(format!(
                "SELECT list item {} has no output column after finalizing",
                state.alias
            )));
        }

        let having = match &select.having {
            Some(having) => Some(having_binder.bind_having(
                ctx,
                having,
                post_group_scope.as_ref(),
                &mut query_info,
            )?),
            None => None,
        };
        let qualify = match &select.qualify {
            Some(qualify) => Some(having_binder.bind_qualify(
                ctx,
                qualify,
                post_group_scope.as_ref(),
                &mut query_info,
            )?),
            None => None,
        };

        let distinct_keys = if select.distinct {
            Some(bind_distinct(ctx, &mut query_info)?)
        } else {
            None
        };

        let output_columns: Vec<ResolvedColumn> = if select.distinct {
            query_info.distinct_columns.clone()
        } else {
            query_info
                .select_columns
                .iter()
                .filter_map(|state| state.output_column().cloned())
                .collect()
        };

        let order_by = match order_by {
            Some(order_by) if select.distinct => {
                let scope = NameScope::with_previous(from_names.clone(), self.outer, true)
                    .with_valid_fields(
                        distinct_valid_fields(&query_info),
                        NOT_VISIBLE_AFTER_DISTINCT,
                    );
                Some(ModifierBinder::new(&scope).bind_order_by(
                    ctx,
                    order_by,
                    &output_columns,
                    Some(&mut query_info),
                    None,
                    AliasMode::PostDistinct,
                    RecursionContext::new(false, false),
                )?)
            }
            Some(order_by) => {
                let scope = post_group_scope.as_ref().unwrap_or(&from_scope);
                Some(ModifierBinder::new(scope).bind_order_by(
                    ctx,
                    order_by,
                    &output_columns,
                    Some(&mut query_info),
                    grouped.then_some(&from_scope),
                    AliasMode::PostGroup {
                        allow_analytic: true,
                    },
                    RecursionContext::new(grouped, true),
                )?)
            }
            None => None,
        };
        let limit = bind_limit(limit)?;
        let hints = bind_hints(ctx, &select.hints)?;

        tracing::trace!(
            grouped,
            distinct = select.distinct,
            aggregates = query_info.aggregates.len(),
            analytics = query_info.analytics.len(),
            "bound select clauses"
        );

        // Build the scans bottom up.
        if grouped {
            scan = plan_aggregate(scan, &mut query_info);
        }

        let early = early_computed_columns(&query_info);
        if !early.is_empty() {
            let mut column_list = scan.column_list().to_vec();
            column_list.extend(early.iter().map(|c| c.column.clone()));
            scan = Scan::Project(ProjectScan {
                input: Box::new(scan),
                exprs: early.clone(),
                column_list,
                hints: Vec::new(),
            });
        }

        if let Some(having) = having {
            scan = filter(scan, having);
        }

        if !query_info.analytics.is_empty() {
            let functions = std::mem::take(&mut query_info.analytics);
            let mut column_list = scan.column_list().to_vec();
            column_list.extend(functions.iter().map(|c| c.column.clone()));
            scan = Scan::Analytic(AnalyticScan {
                input: Box::new(scan),
                functions,
                column_list,
            });
        }

        let mut exprs: Vec<ComputedColumn> = Vec::new();
        for state in &query_info.select_columns {
            if let SelectColumnResolution::Bound {
                column,
                provenance: SelectColumnProvenance::Computed(expr),
            } = &state.resolution
            {
                let computed = early.iter().chain(exprs.iter()).any(|c| &c.column == column);
                if !computed {
                    exprs.push(ComputedColumn::new(column.clone(), expr.clone()));
                }
            }
        }

        let select_outputs: Vec<ResolvedColumn> = query_info
            .select_columns
            .iter()
            .filter_map(|state| state.output_column().cloned())
            .collect();
        let mut column_list = unique_columns(&select_outputs);
        // Columns still needed above the projection.
        let mut referenced = Vec::new();
        if let Some(qualify) = &qualify {
            referenced.extend(qualify.column_references());
        }
        if let (Some(order_by), false) = (&order_by, select.distinct) {
            referenced.extend(order_by_references(order_by));
        }
        for column in referenced {
            if !column_list.contains(&column) {
                column_list.push(column);
            }
        }

        let has_struct = select.select_as == Some(ast::SelectAs::Struct);
        scan = Scan::Project(ProjectScan {
            input: Box::new(scan),
            exprs,
            column_list,
            hints: if has_struct { Vec::new() } else { hints.clone() },
        });

        if let Some(qualify) = qualify {
            scan = filter(scan, qualify);
        }

        if let Some(keys) = distinct_keys {
            let column_list = keys.iter().map(|k| k.column.clone()).collect();
            scan = Scan::Aggregate(AggregateScan {
                input: Box::new(scan),
                group_by: keys,
                aggregates: Vec::new(),
                grouping_sets: Vec::new(),
                grouping_calls: Vec::new(),
                column_list,
            });
        }

        let unique_outputs = unique_columns(&output_columns);
        if let Some(order_by) = order_by {
            scan = plan_order_by(scan, order_by, unique_outputs.clone());
        }
        if scan.column_list() != unique_outputs.as_slice() {
            scan = Scan::Project(ProjectScan {
                input: Box::new(scan),
                exprs: Vec::new(),
                column_list: unique_outputs,
                hints: Vec::new(),
            });
        }
        scan = plan_limit(scan, limit);

        let column_types: Vec<InputArgumentType> = if select.distinct {
            output_columns
                .iter()
                .map(|c| InputArgumentType::new(c.datatype.clone()))
                .collect()
        } else {
            query_info
                .select_columns
                .iter()
                .filter_map(|state| match &state.resolution {
                    SelectColumnResolution::Bound {
                        provenance: SelectColumnProvenance::Computed(expr),
                        ..
                    } => Some(expr.argument_type()),
                    SelectColumnResolution::Bound { column, .. } => {
                        Some(InputArgumentType::new(column.datatype.clone()))
                    }
                    SelectColumnResolution::Pending(_) => None,
                })
                .collect()
        };

        match select.select_as {
            Some(ast::SelectAs::Struct) => {
                let fields = query_info
                    .select_columns
                    .iter()
                    .zip(&output_columns)
                    .map(|(state, column)| {
                        if state.alias.is_internal() {
                            StructField::anonymous(column.datatype.clone())
                        } else {
                            StructField::new(state.alias.as_str(), column.datatype.clone())
                        }
                    })
                    .collect();
                let datatype = DataType::Struct(fields);
                let column = ctx.allocate_column("$make_struct", "$struct", datatype.clone());
                let expr = Expression::MakeStruct(MakeStructExpr {
                    fields: output_columns
                        .iter()
                        .map(|c| Expression::column(c.clone()))
                        .collect(),
                    datatype: datatype.clone(),
                });
                scan = Scan::Project(ProjectScan {
                    input: Box::new(scan),
                    exprs: vec![ComputedColumn::new(column.clone(), expr)],
                    column_list: vec![column.clone()],
                    hints,
                });

                let mut names = NameList::new();
                names.add_value_table_column("$struct", column.clone());
                names.set_value_table(true);
                Ok(BoundQuery {
                    scan,
                    names: Arc::new(names),
                    column_list: vec![column],
                    column_types: vec![InputArgumentType::new(datatype)],
                    is_value_table: true,
                })
            }
            Some(ast::SelectAs::Value) => {
                let column = match output_columns.as_slice() {
                    [column] => column.clone(),
                    _ => {
                        return Err(SqlError::new(
                            "SELECT AS VALUE query must have exactly one column",
                        )
                        .at(select.location));
                    }
                };
                let mut names = NameList::new();
                names.add_value_table_column("$value", column.clone());
                names.set_value_table(true);
                Ok(BoundQuery {
                    scan,
                    names: Arc::new(names),
                    column_list: vec![column],
                    column_types,
                    is_value_table: true,
                })
            }
            None => {
                let mut names = NameList::new();
                for (state, column) in query_info.select_columns.iter().zip(&output_columns) {
                    names.add_column(state.alias.clone(), column.clone(), state.is_explicit);
                }
                Ok(BoundQuery {
                    scan,
                    names: Arc::new(names),
                    column_list: output_columns,
                    column_types,
                    is_value_table: false,
                })
            }
        }
    }
}

/// Reserved for inferring GROUP BY ALL when a query mixes aggregated and
/// unaggregated items without a GROUP BY. Never applies.
fn should_apply_implicit_group_by_all(_query_info: &QueryResolutionInfo) -> bool {
    false
}

fn check_no_from_clauses(select: &ast::SelectNode) -> Result<()> {
    let clauses = [
        ("WHERE", select.where_expr.as_ref().map(|e| e.location)),
        (
            "GROUP BY",
            select.group_by.as_ref().map(|_| select.location),
        ),
        ("HAVING", select.having.as_ref().map(|e| e.location)),
        ("QUALIFY", select.qualify.as_ref().map(|e| e.location)),
    ];
    for (clause, location) in clauses {
        if let Some(location) = location {
            return Err(SqlError::new(format!(
                "Query without FROM clause cannot have a {clause} clause"
            ))
            .at(location));
        }
    }
    Ok(())
}

fn filter(input: Scan, predicate: Expression) -> Scan {
    let column_list = input.column_list().to_vec();
    Scan::Filter(FilterScan {
        input: Box::new(input),
        predicate,
        column_list,
    })
}

fn plan_aggregate(input: Scan, query_info: &mut QueryResolutionInfo) -> Scan {
    let group_by = query_info.group_by_keys.clone();
    let aggregates = query_info.aggregates.clone();
    let grouping_calls = query_info.grouping_calls.clone();

    let column_list = group_by
        .iter()
        .map(|k| k.column.clone())
        .chain(aggregates.iter().map(|a| a.column.clone()))
        .chain(grouping_calls.iter().map(|g| g.output_column.clone()))
        .collect();

    Scan::Aggregate(AggregateScan {
        input: Box::new(input),
        group_by,
        aggregates,
        grouping_sets: std::mem::take(&mut query_info.grouping_sets),
        grouping_calls,
        column_list,
    })
}

/// Select items computed before HAVING and analytic functions, either
/// because HAVING references them by alias or because an analytic function
/// takes them as input.
fn early_computed_columns(query_info: &QueryResolutionInfo) -> Vec<ComputedColumn> {
    let analytic_inputs: Vec<ResolvedColumn> = query_info
        .analytics
        .iter()
        .flat_map(|a| a.expr.column_references())
        .collect();

    let mut early: Vec<ComputedColumn> = Vec::new();
    for state in &query_info.select_columns {
        if state.has_analytic {
            continue;
        }
        if let SelectColumnResolution::Bound {
            column,
            provenance: SelectColumnProvenance::Computed(expr),
        } = &state.resolution
        {
            let needed = state.needs_early_compute || analytic_inputs.contains(column);
            if needed && !early.iter().any(|c| &c.column == column) {
                early.push(ComputedColumn::new(column.clone(), expr.clone()));
            }
        }
    }
    early
}

/// Columns an ORDER BY reads from its input, excluding the keys it computes
/// itself.
fn order_by_references(order_by: &BoundOrderBy) -> Vec<ResolvedColumn> {
    let mut columns = Vec::new();
    for computed in &order_by.computed {
        columns.extend(computed.expr.column_references());
    }
    for item in &order_by.items {
        for column in item.expr.column_references() {
            if !order_by.computed.iter().any(|c| c.column == column) {
                columns.push(column);
            }
        }
    }
    columns
}

/// Bind `@{name = value}` hints. Values must be literals.
pub(crate) fn bind_hints(ctx: &mut AnalysisContext, hints: &[ast::Hint]) -> Result<Vec<Hint>> {
    let scope = NameScope::empty();
    hints
        .iter()
        .map(|hint| {
            let mut info = ExprBindInfo::new("hint");
            let value = ExpressionBinder::new(&scope).bind_expression(
                ctx,
                &hint.value,
                &mut info,
                RecursionContext::new(false, false),
            )?;
            match value {
                Expression::Literal(lit) => Ok(Hint {
                    name: hint.name.to_string(),
                    value: lit.value,
                }),
                _ => Err(SqlError::new("Hint value must be a literal").at(hint.value.location)),
            }
        })
        .collect()
}
