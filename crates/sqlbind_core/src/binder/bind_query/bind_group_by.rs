use std::sync::Arc;

use sqlbind_error::{Location, Result, SqlError};
use sqlbind_parser::ast;

use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{ExprBindInfo, ExpressionBinder, RecursionContext};
use crate::binder::name_scope::{NameScope, ValidFieldInfoMap};
use crate::binder::query_resolution_info::{
    QueryResolutionInfo,
    SelectColumnProvenance,
    SelectColumnResolution,
};
use crate::expr::Expression;
use crate::ident::IdString;
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::GroupingSetItem;

/// Binds GROUP BY, producing the grouping keys in the query info.
#[derive(Debug, Clone, Copy)]
pub struct GroupByBinder<'s> {
    /// FROM scope of the select.
    scope: &'s NameScope<'s>,
}

impl<'s> GroupByBinder<'s> {
    pub fn new(scope: &'s NameScope<'s>) -> Self {
        GroupByBinder { scope }
    }

    pub fn bind<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        group_by: &'ast ast::GroupByNode,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<()> {
        query_info.has_group_by = true;
        match group_by {
            ast::GroupByNode::All { location } => {
                self.bind_group_by_all(ctx, *location, query_info)
            }
            ast::GroupByNode::Exprs { exprs } => self.bind_exprs(ctx, exprs, query_info),
        }
    }

    fn bind_exprs<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        exprs: &'ast [ast::GroupByExpr],
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<()> {
        let structured = exprs.iter().find_map(|expr| match expr {
            ast::GroupByExpr::Rollup(_, loc)
            | ast::GroupByExpr::Cube(_, loc)
            | ast::GroupByExpr::GroupingSets(_, loc) => Some(*loc),
            ast::GroupByExpr::Expr(_) | ast::GroupByExpr::Empty(_) => None,
        });

        if let Some(location) = structured {
            if !ctx.options.enable_grouping_sets {
                return Err(
                    SqlError::new("GROUPING SETS, ROLLUP, and CUBE are not supported").at(location)
                );
            }
            if exprs.len() > 1 {
                return Err(SqlError::new(
                    "ROLLUP, CUBE, and GROUPING SETS cannot be combined with other GROUP BY items",
                )
                .at(location));
            }
            ctx.properties.has_grouping_sets = true;
        }

        for expr in exprs {
            match expr {
                ast::GroupByExpr::Expr(expr) => {
                    self.bind_key(ctx, expr, query_info)?;
                }
                ast::GroupByExpr::Empty(_) => (),
                ast::GroupByExpr::Rollup(elements, loc) => {
                    let cols = self.bind_elements(ctx, elements, query_info)?;
                    let item = GroupingSetItem::Rollup(cols);
                    check_grouping_set_count(ctx, &[item.clone()], *loc)?;
                    query_info.grouping_sets.push(item);
                }
                ast::GroupByExpr::Cube(elements, loc) => {
                    let cols = self.bind_elements(ctx, elements, query_info)?;
                    let item = GroupingSetItem::Cube(cols);
                    check_grouping_set_count(ctx, &[item.clone()], *loc)?;
                    query_info.grouping_sets.push(item);
                }
                ast::GroupByExpr::GroupingSets(sets, loc) => {
                    let mut items = Vec::with_capacity(sets.len());
                    for set in sets {
                        let item = match set {
                            ast::GroupingSet::Set(exprs) => {
                                let mut cols = Vec::with_capacity(exprs.len());
                                for expr in exprs {
                                    let col = self.bind_key(ctx, expr, query_info)?;
                                    if !cols.contains(&col) {
                                        cols.push(col);
                                    }
                                }
                                GroupingSetItem::Set(cols)
                            }
                            ast::GroupingSet::Rollup(elements) => GroupingSetItem::Rollup(
                                self.bind_elements(ctx, elements, query_info)?,
                            ),
                            ast::GroupingSet::Cube(elements) => GroupingSetItem::Cube(
                                self.bind_elements(ctx, elements, query_info)?,
                            ),
                        };
                        items.push(item);
                    }
                    check_grouping_set_count(ctx, &items, *loc)?;
                    query_info.grouping_sets.extend(items);
                }
            }
        }

        Ok(())
    }

    fn bind_elements<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        elements: &'ast [ast::GroupingElement],
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<Vec<Vec<ResolvedColumn>>> {
        let mut out = Vec::with_capacity(elements.len());
        for element in elements {
            let mut cols = Vec::new();
            for expr in element.exprs() {
                let col = self.bind_key(ctx, expr, query_info)?;
                if !cols.contains(&col) {
                    cols.push(col);
                }
            }
            out.push(cols);
        }
        Ok(out)
    }

    /// Bind a single GROUP BY expression.
    ///
    /// In order, the expression is tried as a SELECT list alias, as a
    /// SELECT list ordinal, then as an expression over the FROM scope.
    fn bind_key<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        expr: &'ast ast::Expr,
        query_info: &mut QueryResolutionInfo<'ast>,
    ) -> Result<ResolvedColumn> {
        if let Some(path) = expr.as_path() {
            let first = IdString::from(&path[0]);
            let matches = query_info.find_select_aliases(&first);
            if !matches.is_empty() {
                if path.len() > 1 {
                    if !self.scope.contains_name(&first) {
                        return Err(SqlError::new(format!(
                            "Cannot GROUP BY field references of SELECT list alias {}",
                            path[0]
                        ))
                        .at(expr.location));
                    }
                } else {
                    let first_match = &query_info.select_columns[matches[0]];
                    let ambiguous = matches[1..].iter().any(|idx| {
                        query_info.select_columns[*idx].ast_expr != first_match.ast_expr
                    });
                    if ambiguous {
                        return Err(SqlError::new(format!(
                            "Column {} is ambiguous in GROUP BY",
                            path[0]
                        ))
                        .at(expr.location));
                    }
                    return self
                        .bind_select_item_as_key(ctx, matches[0], query_info)
                        .map_err(|e| e.at(expr.location));
                }
            }
        }

        if let Some(ordinal) = expr.as_integer_literal() {
            let idx = ordinal
                .checked_sub(1)
                .and_then(|idx| usize::try_from(idx).ok())
                .filter(|idx| *idx < query_info.select_columns.len())
                .ok_or_else(|| {
                    SqlError::new(format!(
                        "GROUP BY is out of SELECT column number range: {ordinal}"
                    ))
                    .at(expr.location)
                })?;
            return self
                .bind_select_item_as_key(ctx, idx, query_info)
                .map_err(|e| e.at(expr.location));
        }

        let mut info = ExprBindInfo::new("GROUP BY clause");
        let bound = ExpressionBinder::new(self.scope).bind_expression(
            ctx,
            expr,
            &mut info,
            RecursionContext::new(false, false),
        )?;
        let name = match expr.as_path() {
            Some(path) => path.last().map(IdString::from),
            None => None,
        };
        add_key(ctx, bound, name.as_ref(), query_info).map_err(|e| e.at(expr.location))
    }

    /// Group by the first pass expression of a SELECT list item, making the
    /// item output the key.
    fn bind_select_item_as_key(
        &self,
        ctx: &mut AnalysisContext,
        idx: usize,
        query_info: &mut QueryResolutionInfo,
    ) -> Result<ResolvedColumn> {
        let state = &query_info.select_columns[idx];
        if state.has_aggregation {
            return Err(SqlError::new(format!(
                "GROUP BY refers to SELECT list item {} which contains an aggregate function",
                idx + 1
            )));
        }
        if state.has_analytic {
            return Err(SqlError::new(format!(
                "GROUP BY refers to SELECT list item {} which contains an analytic function",
                idx + 1
            )));
        }

        let expr = state.original_expr.clone();
        let alias = state.alias.clone();
        let key = add_key(ctx, expr, Some(&alias), query_info)?;

        let state = &mut query_info.select_columns[idx];
        state.is_group_by_column = true;
        state.resolution = SelectColumnResolution::Bound {
            column: key.clone(),
            provenance: SelectColumnProvenance::GroupByKey,
        };
        Ok(key)
    }

    /// Derive grouping keys from the SELECT list.
    ///
    /// Field paths are grouped first, shortest first, skipping paths covered
    /// by an already chosen path. Remaining non-aggregate items are grouped
    /// whole unless every column they reference is already a key.
    fn bind_group_by_all(
        &self,
        ctx: &mut AnalysisContext,
        location: Location,
        query_info: &mut QueryResolutionInfo,
    ) -> Result<()> {
        if !ctx.options.enable_group_by_all {
            return Err(SqlError::new("GROUP BY ALL is not supported").at(location));
        }

        let mut paths: Vec<(usize, ResolvedColumn, Vec<IdString>)> = Vec::new();
        let mut others: Vec<usize> = Vec::new();
        for (idx, state) in query_info.select_columns.iter().enumerate() {
            if state.has_aggregation || state.has_analytic {
                continue;
            }
            if state.original_expr.column_references().is_empty() {
                continue;
            }
            match state.original_expr.as_field_path() {
                Some((column, path)) => paths.push((
                    idx,
                    column.clone(),
                    path.into_iter().map(IdString::new).collect(),
                )),
                None => others.push(idx),
            }
        }

        paths.sort_by_key(|(_, _, path)| path.len());
        let mut chosen: Vec<(ResolvedColumn, Vec<IdString>)> = Vec::new();
        for (idx, column, path) in paths {
            let covered = chosen
                .iter()
                .any(|(col, prefix)| col == &column && path.starts_with(prefix));
            if covered {
                continue;
            }
            self.bind_select_item_as_key(ctx, idx, query_info)?;
            chosen.push((column, path));
        }

        for idx in others {
            let refs = query_info.select_columns[idx].original_expr.column_references();
            let covered = refs.iter().all(|col| {
                chosen
                    .iter()
                    .any(|(chosen_col, chosen_path)| chosen_col == col && chosen_path.is_empty())
            });
            if !covered {
                self.bind_select_item_as_key(ctx, idx, query_info)?;
            }
        }

        tracing::debug!(
            keys = query_info.group_by_keys.len(),
            "derived GROUP BY ALL keys"
        );

        Ok(())
    }
}

/// Add a grouping key, reusing an existing key computing the same
/// expression.
fn add_key(
    ctx: &mut AnalysisContext,
    expr: Expression,
    name: Option<&IdString>,
    query_info: &mut QueryResolutionInfo,
) -> Result<ResolvedColumn> {
    let datatype = expr.datatype();
    if !expr.is_untyped_null() && !ctx.coercer.supports_grouping(&datatype) {
        return Err(SqlError::new(format!(
            "Grouping by expressions of type {datatype} is not allowed"
        )));
    }

    if let Some(existing) = query_info.find_group_by_key(&expr) {
        return Ok(existing.clone());
    }

    let name = match name {
        Some(name) if !name.is_internal() => name.to_string(),
        _ => format!("$groupbycol{}", query_info.group_by_keys.len() + 1),
    };
    let column = ctx.allocate_column_with_collation(
        "$groupby",
        name,
        datatype,
        expr.collation().map(|c| c.to_string()),
    );
    tracing::trace!(%column, %expr, "added GROUP BY key");
    query_info
        .group_by_keys
        .push(ComputedColumn::new(column.clone(), expr));
    Ok(column)
}

fn check_grouping_set_count(
    ctx: &AnalysisContext,
    items: &[GroupingSetItem],
    location: Location,
) -> Result<()> {
    let count = items.iter().fold(0usize, |acc, item| {
        let n = match item {
            GroupingSetItem::Set(_) => 1,
            GroupingSetItem::Rollup(elements) => elements.len().saturating_add(1),
            GroupingSetItem::Cube(elements) => u32::try_from(elements.len())
                .ok()
                .and_then(|n| 1usize.checked_shl(n))
                .unwrap_or(usize::MAX),
        };
        acc.saturating_add(n)
    });
    let max = ctx.options.max_grouping_sets;
    if count > max {
        return Err(SqlError::resource_exhausted(format!(
            "Too many grouping sets: {count} exceeds the maximum of {max}"
        ))
        .at(location));
    }
    Ok(())
}

/// Columns and field paths accessible after grouping.
pub fn group_by_valid_fields(query_info: &QueryResolutionInfo) -> Arc<ValidFieldInfoMap> {
    let mut valid = ValidFieldInfoMap::new();
    for key in &query_info.group_by_keys {
        if let Some((column, path)) = key.expr.as_field_path() {
            let path = path.into_iter().map(IdString::new).collect();
            valid.insert(column, path, key.column.clone());
        }
    }
    Arc::new(valid)
}

#[cfg(test)]
mod tests {
    use crate::config::AnalyzerOptions;
    use crate::logical::scan::Scan;
    use crate::testutil::{TestEnv, analyze, find_scan, strip_ids};
    use pretty_assertions::assert_eq;

    fn group_keys(sql: &str) -> Vec<String> {
        let out = analyze(sql).unwrap();
        match find_scan(&out.scan, "AggregateScan") {
            Some(Scan::Aggregate(agg)) => agg
                .group_by
                .iter()
                .map(|k| strip_ids(&format!("{} := {}", k.column, k.expr)))
                .collect(),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn group_by_alias_ordinal_and_expression() {
        assert_eq!(
            vec!["$groupby.k := KeyValue.Key"],
            group_keys("SELECT key AS k, COUNT(*) FROM KeyValue GROUP BY k")
        );
        assert_eq!(
            vec!["$groupby.k := KeyValue.Key"],
            group_keys("SELECT key AS k, COUNT(*) FROM KeyValue GROUP BY 1")
        );
        assert_eq!(
            vec!["$groupby.value := KeyValue.Value"],
            group_keys("SELECT COUNT(*) FROM KeyValue GROUP BY value")
        );
    }

    #[test]
    fn duplicate_keys_collapse() {
        assert_eq!(1, group_keys("SELECT key FROM KeyValue GROUP BY key, 1, KeyValue.key").len());
    }

    #[test]
    fn ordinal_out_of_range() {
        let err = analyze("SELECT key FROM KeyValue GROUP BY 2").unwrap_err();
        assert_eq!("GROUP BY is out of SELECT column number range: 2", err.message());
    }

    #[test]
    fn group_by_aggregate_alias() {
        let err = analyze("SELECT COUNT(*) AS c FROM KeyValue GROUP BY c").unwrap_err();
        assert_eq!(
            "GROUP BY refers to SELECT list item 1 which contains an aggregate function",
            err.message()
        );
    }

    #[test]
    fn rollup_requires_option() {
        let env = TestEnv::with_options(AnalyzerOptions {
            enable_grouping_sets: false,
            ..Default::default()
        });
        let err = env
            .analyze("SELECT key, COUNT(*) FROM KeyValue GROUP BY ROLLUP(key)")
            .unwrap_err();
        assert_eq!("GROUPING SETS, ROLLUP, and CUBE are not supported", err.message());
    }

    #[test]
    fn cube_grouping_set_limit() {
        let env = TestEnv::with_options(AnalyzerOptions {
            max_grouping_sets: 2,
            ..Default::default()
        });
        let err = env
            .analyze("SELECT key, value FROM KeyValue GROUP BY CUBE(key, value)")
            .unwrap_err();
        assert_eq!(
            "Too many grouping sets: 4 exceeds the maximum of 2",
            err.message()
        );
        let out = TestEnv::new()
            .analyze("SELECT key, value FROM KeyValue GROUP BY CUBE(key, value)")
            .unwrap();
        assert!(out.properties.has_grouping_sets);
    }

    #[test]
    fn group_by_all_picks_non_aggregates() {
        assert_eq!(
            vec!["$groupby.key := KeyValue.Key"],
            group_keys("SELECT key, COUNT(*) FROM KeyValue GROUP BY ALL")
        );
    }

    #[test]
    fn group_by_all_skips_covered_field_paths() {
        let keys = group_keys(
            "SELECT TestStruct, TestStruct.c, COUNT(*) FROM ComplexTypes GROUP BY ALL",
        );
        assert_eq!(1, keys.len());
        assert!(keys[0].contains("TestStruct"));
    }
}
