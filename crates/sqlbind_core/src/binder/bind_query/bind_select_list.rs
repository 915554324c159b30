use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;

use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{ExprBindInfo, ExpressionBinder, RecursionContext, get_field};
use crate::binder::name_list::NameList;
use crate::binder::name_scope::{NameScope, PathTarget};
use crate::binder::query_resolution_info::{
    QueryResolutionInfo,
    SelectColumnProvenance,
    SelectColumnResolution,
    SelectColumnState,
};
use crate::expr::{ColumnExpr, Expression, GetFieldExpr};
use crate::ident::{IdString, did_you_mean};

/// A column produced by expanding `*` or `x.*`.
#[derive(Debug, Clone)]
struct StarColumn {
    name: IdString,
    expr: Expression,
}

/// Binds the SELECT list.
///
/// Items are bound twice. The first pass binds against the FROM scope and
/// registers aggregates. Once grouping is known, `finalize` rebinds items
/// that need it and assigns every item its output column.
#[derive(Debug, Clone, Copy)]
pub struct SelectListBinder<'s> {
    /// FROM scope of the select.
    scope: &'s NameScope<'s>,
}

impl<'s> SelectListBinder<'s> {
    pub fn new(scope: &'s NameScope<'s>) -> Self {
        SelectListBinder { scope }
    }

    pub fn bind_first_pass<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        projections: &'ast [ast::SelectExpr],
        has_from: bool,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<()> {
        for projection in projections {
            match projection {
                ast::SelectExpr::Expr(expr) => self.bind_item(ctx, expr, None, query_info)?,
                ast::SelectExpr::AliasedExpr(expr, alias) => {
                    self.bind_item(ctx, expr, Some(alias), query_info)?
                }
                ast::SelectExpr::Wildcard(wildcard) => {
                    if !has_from {
                        return Err(
                            SqlError::new("SELECT * must have a FROM clause").at(wildcard.location)
                        );
                    }
                    let columns = expand_names(ctx, self.scope.names(), 0)?;
                    self.add_star_columns(ctx, columns, wildcard, query_info)?;
                }
                ast::SelectExpr::QualifiedWildcard(reference, wildcard) => {
                    let columns = self
                        .expand_qualified(ctx, reference)
                        .map_err(|e| e.at(reference.location()))?;
                    self.add_star_columns(ctx, columns, wildcard, query_info)?;
                }
            }
        }

        if query_info.select_columns.is_empty() {
            return Err(SqlError::new(
                "SELECT list must not be empty after applying SELECT * EXCEPT",
            ));
        }

        Ok(())
    }

    fn bind_item<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        expr: &'ast ast::Expr,
        alias: Option<&ast::Ident>,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<()> {
        let position = query_info.select_columns.len() + 1;

        let mut info = ExprBindInfo::new("SELECT list").with_query_info(query_info);
        let bound = ExpressionBinder::new(self.scope).bind_expression(
            ctx,
            expr,
            &mut info,
            RecursionContext::new(true, true),
        )?;
        let has_aggregation = info.has_aggregation;
        let has_analytic = info.has_analytic;
        let has_volatile = info.has_volatile;

        let (alias, is_explicit) = match alias {
            Some(alias) => (IdString::from(alias), true),
            None => match infer_alias(expr) {
                Some(alias) => (alias, false),
                None => (IdString::new(format!("$col{position}")), false),
            },
        };

        query_info.select_columns.push(SelectColumnState {
            ast_expr: Some(expr),
            alias,
            is_explicit,
            has_aggregation,
            has_analytic,
            has_volatile,
            is_group_by_column: false,
            original_expr: bound.clone(),
            resolution: SelectColumnResolution::Pending(bound),
            needs_early_compute: false,
            location: expr.location,
        });

        Ok(())
    }

    fn expand_qualified(
        &self,
        ctx: &mut AnalysisContext,
        reference: &ast::ObjectReference,
    ) -> Result<Vec<StarColumn>> {
        let first = reference.base()?;
        match self.scope.resolve_path(&reference.0)? {
            Some(PathTarget::RangeVariable { names, depth }) => expand_names(ctx, &names, depth),
            Some(PathTarget::Column {
                column,
                fields,
                depth,
            }) => {
                ctx.record_correlated_reference(&column, depth)?;
                let mut expr = Expression::Column(ColumnExpr {
                    column,
                    is_correlated: depth > 0,
                });
                for field in &fields {
                    expr = get_field(expr, field)?;
                }
                let datatype = expr.datatype();
                if !datatype.is_struct() {
                    return Err(SqlError::new(format!(
                        "Dot-star is not supported for type {datatype}"
                    )));
                }
                Ok(expand_struct(&expr))
            }
            Some(PathTarget::Ambiguous) => {
                Err(SqlError::new(format!("Column name {first} is ambiguous")))
            }
            Some(PathTarget::AccessError { reason }) => Err(SqlError::new(format!(
                "SELECT list expression references {reference} {reason}"
            ))),
            None => Err(SqlError::new(format!(
                "Unrecognized name: {first}{}",
                did_you_mean(self.scope.suggest(&first.value))
            ))),
        }
    }

    /// Add the columns of a star expansion after applying EXCEPT and
    /// REPLACE.
    fn add_star_columns<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        columns: Vec<StarColumn>,
        wildcard: &'ast ast::Wildcard,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<()> {
        let mut excluded: Vec<IdString> = Vec::new();
        for ident in &wildcard.exclude_cols {
            let name = IdString::from(ident);
            if excluded.contains(&name) {
                return Err(SqlError::new(format!(
                    "Duplicate column {ident} in SELECT * EXCEPT list"
                ))
                .at(ident.location));
            }
            if !columns.iter().any(|c| c.name == name) {
                return Err(SqlError::new(format!(
                    "Column {ident} in SELECT * EXCEPT list does not exist"
                ))
                .at(ident.location));
            }
            excluded.push(name);
        }

        let mut replaced: Vec<(IdString, &'ast ast::ReplaceColumn)> = Vec::new();
        for replace in &wildcard.replace_cols {
            let name = IdString::from(&replace.col);
            if excluded.contains(&name) {
                return Err(SqlError::new(format!(
                    "Column {} cannot occur in both SELECT * EXCEPT and REPLACE",
                    replace.col
                ))
                .at(replace.col.location));
            }
            if replaced.iter().any(|(existing, _)| existing == &name) {
                return Err(SqlError::new(format!(
                    "Duplicate column {} in SELECT * REPLACE list",
                    replace.col
                ))
                .at(replace.col.location));
            }
            match columns.iter().filter(|c| c.name == name).count() {
                0 => {
                    return Err(SqlError::new(format!(
                        "Column {} in SELECT * REPLACE list does not exist",
                        replace.col
                    ))
                    .at(replace.col.location));
                }
                1 => (),
                _ => {
                    return Err(SqlError::new(format!(
                        "Column {} in SELECT * REPLACE list is ambiguous",
                        replace.col
                    ))
                    .at(replace.col.location));
                }
            }
            replaced.push((name, replace));
        }

        for column in columns {
            if excluded.contains(&column.name) {
                continue;
            }
            if let Some((_, replace)) = replaced.iter().find(|(name, _)| name == &column.name) {
                self.bind_item(ctx, &replace.expr, Some(&replace.col), query_info)?;
                continue;
            }

            let resolution = match column.expr.as_uncorrelated_column() {
                Some(col) => SelectColumnResolution::Bound {
                    column: col.clone(),
                    provenance: SelectColumnProvenance::StarExpansion,
                },
                None => SelectColumnResolution::Pending(column.expr.clone()),
            };
            query_info.select_columns.push(SelectColumnState {
                ast_expr: None,
                alias: column.name,
                is_explicit: true,
                has_aggregation: false,
                has_analytic: false,
                has_volatile: false,
                is_group_by_column: false,
                original_expr: column.expr,
                resolution,
                needs_early_compute: false,
                location: wildcard.location,
            });
        }

        Ok(())
    }

    /// Assign every item its output column.
    ///
    /// `post_group_scope` is set when the query groups or aggregates. Items
    /// are then rebound against it, falling back to a GROUP BY key that
    /// computes the item's first pass expression.
    pub fn finalize<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        query_info: &mut QueryResolutionInfo<'ast>,
        post_group_scope: Option<&NameScope>,
    ) -> Result<()> {
        for idx in 0..query_info.select_columns.len() {
            let state = &query_info.select_columns[idx];
            let ast_expr = state.ast_expr;
            let alias = state.alias.clone();
            let has_analytic = state.has_analytic;
            let original = state.original_expr.clone();
            let resolution = state.resolution.clone();
            let location = state.location;

            let resolution = match (resolution, post_group_scope) {
                (
                    SelectColumnResolution::Bound {
                        provenance: SelectColumnProvenance::GroupByKey,
                        ..
                    },
                    _,
                ) => continue,
                (resolution @ SelectColumnResolution::Bound { .. }, None) => resolution,
                (SelectColumnResolution::Bound { column, .. }, Some(_)) => {
                    match grouped_column_for(query_info, &original) {
                        Some(key) => SelectColumnResolution::Bound {
                            column: key,
                            provenance: SelectColumnProvenance::GroupByKey,
                        },
                        None => return Err(not_grouped(&column.name).at(location)),
                    }
                }
                (SelectColumnResolution::Pending(expr), None) => {
                    let expr = match (ast_expr, has_analytic) {
                        (Some(ast_expr), true) => {
                            let mut info = ExprBindInfo::new("SELECT list")
                                .with_query_info(query_info)
                                .with_register_analytic();
                            ExpressionBinder::new(self.scope).bind_expression(
                                ctx,
                                ast_expr,
                                &mut info,
                                RecursionContext::new(true, true),
                            )?
                        }
                        _ => expr,
                    };
                    output_resolution(ctx, query_info, &alias, expr)
                }
                (SelectColumnResolution::Pending(expr), Some(post_group_scope)) => {
                    let expr = match ast_expr {
                        Some(ast_expr) => {
                            let mut info = ExprBindInfo::new("SELECT list")
                                .with_query_info(query_info)
                                .with_aggregate_scope(self.scope)
                                .with_register_analytic();
                            let rebound = ExpressionBinder::new(post_group_scope)
                                .bind_expression(
                                    ctx,
                                    ast_expr,
                                    &mut info,
                                    RecursionContext::new(true, true),
                                );
                            match rebound {
                                Ok(expr) => expr,
                                Err(err) => {
                                    if has_analytic {
                                        return Err(err);
                                    }
                                    match query_info.find_group_by_key(&original) {
                                        Some(key) => Expression::column(key.clone()),
                                        None => return Err(err),
                                    }
                                }
                            }
                        }
                        // Struct fields from `x.*`.
                        None => {
                            if expr.column_references().is_empty() {
                                expr
                            } else {
                                match grouped_column_for(query_info, &expr) {
                                    Some(key) => Expression::column(key),
                                    None => return Err(not_grouped(alias.as_str()).at(location)),
                                }
                            }
                        }
                    };
                    output_resolution(ctx, query_info, &alias, expr)
                }
            };

            tracing::trace!(%alias, ?resolution, "finalized select item");

            let state = &mut query_info.select_columns[idx];
            state.is_group_by_column = matches!(
                resolution,
                SelectColumnResolution::Bound {
                    provenance: SelectColumnProvenance::GroupByKey,
                    ..
                }
            );
            state.resolution = resolution;
        }

        Ok(())
    }
}

fn not_grouped(column: &str) -> SqlError {
    SqlError::new(format!(
        "SELECT list expression references column {column} which is neither grouped nor aggregated"
    ))
}

/// Find the GROUP BY key producing `expr`, either a key computing the same
/// expression or a grouped field path.
fn grouped_column_for(
    query_info: &QueryResolutionInfo,
    expr: &Expression,
) -> Option<crate::logical::column::ResolvedColumn> {
    if let Some(key) = query_info.find_group_by_key(expr) {
        return Some(key.clone());
    }
    let (column, path) = expr.as_field_path()?;
    let path: Vec<IdString> = path.into_iter().map(IdString::new).collect();
    let fields = query_info.group_by_fields.as_ref()?;
    match fields.find(column, &path) {
        Some((target, consumed)) if consumed == path.len() => Some(target.clone()),
        _ => None,
    }
}

/// Output column for a finalized item expression.
///
/// Plain columns are passed through, anything else gets a new column
/// computed by the select projection.
fn output_resolution(
    ctx: &mut AnalysisContext,
    query_info: &QueryResolutionInfo,
    alias: &IdString,
    expr: Expression,
) -> SelectColumnResolution {
    if let Some(column) = expr.as_uncorrelated_column() {
        let provenance = if query_info.group_by_keys.iter().any(|k| &k.column == column) {
            SelectColumnProvenance::GroupByKey
        } else {
            SelectColumnProvenance::ColumnReference
        };
        return SelectColumnResolution::Bound {
            column: column.clone(),
            provenance,
        };
    }

    let column = ctx.allocate_column_with_collation(
        "$query",
        alias.as_str(),
        expr.datatype(),
        expr.collation().map(|c| c.to_string()),
    );
    SelectColumnResolution::Bound {
        column,
        provenance: SelectColumnProvenance::Computed(expr),
    }
}

/// Name for a SELECT item without an alias.
fn infer_alias(expr: &ast::Expr) -> Option<IdString> {
    match &expr.kind {
        ast::ExprKind::Ident(ident) => Some(IdString::from(ident)),
        ast::ExprKind::CompoundIdent(idents) => idents.last().map(IdString::from),
        ast::ExprKind::FieldAccess { field, .. } => Some(IdString::from(field)),
        _ => None,
    }
}

/// Columns produced by `*` over a name list.
///
/// Value table columns of struct type expand to their fields.
fn expand_names(
    ctx: &mut AnalysisContext,
    names: &NameList,
    depth: usize,
) -> Result<Vec<StarColumn>> {
    let mut columns = Vec::new();
    for named in names.visible_columns() {
        ctx.record_correlated_reference(&named.column, depth)?;
        let expr = Expression::Column(ColumnExpr {
            column: named.column.clone(),
            is_correlated: depth > 0,
        });
        if named.is_value_table_column && named.column.datatype.is_struct() {
            columns.extend(expand_struct(&expr));
        } else {
            columns.push(StarColumn {
                name: named.name.clone(),
                expr,
            });
        }
    }
    Ok(columns)
}

fn expand_struct(expr: &Expression) -> Vec<StarColumn> {
    let datatype = expr.datatype();
    let fields = datatype.struct_fields().unwrap_or_default();
    fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let name = match &field.name {
                Some(name) => IdString::new(name.clone()),
                None => IdString::new(format!("$field{}", idx + 1)),
            };
            StarColumn {
                expr: Expression::GetField(GetFieldExpr {
                    expr: Box::new(expr.clone()),
                    field_idx: idx,
                    field_name: name.to_string(),
                    datatype: field.datatype.clone(),
                }),
                name,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::testutil::analyze;
    use pretty_assertions::assert_eq;

    fn output_names(sql: &str) -> Vec<String> {
        analyze(sql)
            .unwrap()
            .output_columns
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn star_expands_in_order() {
        assert_eq!(vec!["Key", "Value"], output_names("SELECT * FROM KeyValue"));
    }

    #[test]
    fn star_except_and_replace() {
        assert_eq!(
            vec!["Value"],
            output_names("SELECT * EXCEPT (key) FROM KeyValue")
        );
        let out = analyze("SELECT * REPLACE (key + 1 AS key) FROM KeyValue").unwrap();
        assert_eq!("key", out.output_columns[0].name);
        assert_eq!("$query", out.output_columns[0].column.table_name);
    }

    #[test]
    fn star_except_unknown_column() {
        let err = analyze("SELECT * EXCEPT (nope) FROM KeyValue").unwrap_err();
        assert_eq!(
            "Column nope in SELECT * EXCEPT list does not exist",
            err.message()
        );
    }

    #[test]
    fn star_except_and_replace_same_column() {
        let err = analyze("SELECT * EXCEPT (key) REPLACE (1 AS key) FROM KeyValue").unwrap_err();
        assert_eq!(
            "Column key cannot occur in both SELECT * EXCEPT and REPLACE",
            err.message()
        );
    }

    #[test]
    fn dot_star_on_struct() {
        assert_eq!(
            vec!["c", "d"],
            output_names("SELECT TestStruct.* FROM ComplexTypes")
        );
    }

    #[test]
    fn dot_star_on_non_struct() {
        let err = analyze("SELECT Int32Array.* FROM ComplexTypes").unwrap_err();
        assert_eq!("Dot-star is not supported for type ARRAY<INT64>", err.message());
    }

    #[test]
    fn star_without_from() {
        let err = analyze("SELECT *").unwrap_err();
        assert_eq!("SELECT * must have a FROM clause", err.message());
    }

    #[test]
    fn anonymous_items_get_internal_names() {
        assert_eq!(vec!["$col1", "key"], output_names("SELECT 1 + 1, key FROM KeyValue"));
    }

    #[test]
    fn ungrouped_star_column() {
        let err = analyze("SELECT * FROM KeyValue GROUP BY key").unwrap_err();
        assert_eq!(
            "SELECT list expression references column Value which is neither grouped nor aggregated",
            err.message()
        );
    }
}
