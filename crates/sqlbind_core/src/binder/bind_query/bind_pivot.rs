use std::sync::Arc;

use sqlbind_error::{Location, Result, SqlError};
use sqlbind_parser::ast;

use super::bind_from::{BoundFrom, FromBinder, bind_constant, with_range_variable};
use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{ExprBindInfo, ExpressionBinder, RecursionContext};
use crate::binder::name_list::{NameList, NameTarget};
use crate::binder::name_scope::NameScope;
use crate::expr::{ColumnExpr, Expression, ScalarValue};
use crate::ident::IdString;
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::{PivotColumn, PivotScan, Scan, UnpivotScan};
use crate::types::DataType;

impl FromBinder<'_> {
    pub(super) fn bind_pivot(
        &self,
        ctx: &mut AnalysisContext,
        pivot: &ast::FromPivot,
        alias: Option<&ast::Ident>,
        location: Location,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        if !ctx.options.enable_pivot {
            return Err(SqlError::unimplemented("PIVOT is not supported").at(location));
        }
        ctx.properties.has_pivot = true;

        let input = self.bind_node(ctx, &pivot.input, lateral)?;
        let scope = NameScope::with_previous(input.names.clone(), self.outer, true);

        let needs_alias = pivot.aggregates.len() > 1;
        let mut aggregates = Vec::with_capacity(pivot.aggregates.len());
        for agg in &pivot.aggregates {
            let mut info = ExprBindInfo::new("PIVOT expression");
            let bound = ExpressionBinder::new(&scope).bind_expression(
                ctx,
                &agg.expr,
                &mut info,
                RecursionContext::new(true, false),
            )?;
            if !matches!(bound, Expression::Aggregate(_)) {
                return Err(SqlError::new("PIVOT expression must be an aggregate function call")
                    .at(agg.expr.location));
            }
            if needs_alias && agg.alias.is_none() {
                return Err(SqlError::new(
                    "PIVOT expressions must have an alias when more than one is given",
                )
                .at(agg.expr.location));
            }
            aggregates.push(bound);
        }

        let mut info = ExprBindInfo::new("FOR expression");
        let for_expr = ExpressionBinder::new(&scope).bind_expression(
            ctx,
            &pivot.for_expr,
            &mut info,
            RecursionContext::new(false, false),
        )?;
        let for_type = for_expr.datatype();
        if !ctx.coercer.supports_grouping(&for_type) {
            return Err(SqlError::new(format!(
                "FOR expression of type {for_type} cannot be used in PIVOT"
            ))
            .at(pivot.for_expr.location));
        }

        let mut pivot_values = Vec::with_capacity(pivot.values.len());
        let mut value_names = Vec::with_capacity(pivot.values.len());
        for value in &pivot.values {
            let bound = bind_constant(ctx, &value.expr, "PIVOT IN list")?;
            let literal = match &bound {
                Expression::Literal(lit) => lit.value.clone(),
                _ => {
                    return Err(SqlError::new("PIVOT IN list values must be literals")
                        .at(value.expr.location));
                }
            };
            let value_type = bound.argument_type();
            if !ctx.coercer.coerces_to(&value_type, &for_type, false) {
                return Err(SqlError::new(format!(
                    "PIVOT IN list value has type {} which is not compatible with FOR expression type {for_type}",
                    value_type.datatype
                ))
                .at(value.expr.location));
            }
            let bound = if value_type.datatype == for_type {
                bound
            } else {
                Expression::cast(bound, for_type.clone())
            };

            value_names.push(match &value.alias {
                Some(alias) => alias.value.clone(),
                None => literal_name(&literal),
            });
            pivot_values.push(bound);
        }

        // Columns not used by the aggregates or the FOR expression group the
        // output rows.
        let mut used = for_expr.column_references();
        for agg in &aggregates {
            used.extend(agg.column_references());
        }

        let mut names = NameList::new();
        let mut group_by = Vec::new();
        let mut column_list = Vec::new();
        for named in input.names.visible_columns() {
            if used.contains(&named.column) {
                continue;
            }
            if !ctx.coercer.supports_grouping(&named.column.datatype) {
                return Err(SqlError::new(format!(
                    "Column {} of type {} cannot be used as an implicit grouping column in PIVOT",
                    named.name, named.column.datatype
                ))
                .at(location));
            }
            let column = ctx.allocate_column_with_collation(
                "$groupby",
                named.name.as_str(),
                named.column.datatype.clone(),
                named.column.collation.clone(),
            );
            group_by.push(ComputedColumn::new(
                column.clone(),
                Expression::column(named.column.clone()),
            ));
            names.add_column(named.name.clone(), column.clone(), true);
            column_list.push(column);
        }

        let mut pivot_columns = Vec::with_capacity(aggregates.len() * pivot_values.len());
        let aggregate_asts = aggregates.iter().zip(&pivot.aggregates);
        for (aggregate_index, (agg, agg_ast)) in aggregate_asts.enumerate() {
            for (value_index, value_name) in value_names.iter().enumerate() {
                let name = match &agg_ast.alias {
                    Some(alias) => format!("{}_{value_name}", alias.value),
                    None => value_name.clone(),
                };
                let column = ctx.allocate_column("$pivot", name.as_str(), agg.datatype());
                names.add_column(name.as_str(), column.clone(), true);
                pivot_columns.push(PivotColumn {
                    column: column.clone(),
                    aggregate_index,
                    value_index,
                });
                column_list.push(column);
            }
        }

        let scan = Scan::Pivot(PivotScan {
            input: Box::new(input.scan),
            for_expr,
            pivot_values,
            aggregates,
            group_by,
            pivot_columns,
            column_list,
        });
        Ok(BoundFrom {
            scan,
            names: finish_names(names, alias)?,
        })
    }

    pub(super) fn bind_unpivot(
        &self,
        ctx: &mut AnalysisContext,
        unpivot: &ast::FromUnpivot,
        alias: Option<&ast::Ident>,
        location: Location,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        if !ctx.options.enable_unpivot {
            return Err(SqlError::unimplemented("UNPIVOT is not supported").at(location));
        }
        ctx.properties.has_unpivot = true;

        let input = self.bind_node(ctx, &unpivot.input, lateral)?;
        let width = unpivot.value_columns.len();

        let mut unpivot_args: Vec<Vec<ColumnExpr>> =
            Vec::with_capacity(unpivot.column_groups.len());
        let mut value_types: Vec<DataType> = Vec::with_capacity(width);
        let mut used: Vec<ResolvedColumn> = Vec::new();
        let mut labels = Vec::with_capacity(unpivot.column_groups.len());

        for group in &unpivot.column_groups {
            if group.columns.len() != width {
                return Err(SqlError::new(format!(
                    "Each UNPIVOT column group must have {width} columns, found {}",
                    group.columns.len()
                ))
                .at(location));
            }

            let mut args = Vec::with_capacity(width);
            for (idx, ident) in group.columns.iter().enumerate() {
                let column = unpivot_input_column(&input.names, ident)?;
                if used.contains(&column) {
                    return Err(SqlError::new(format!(
                        "Column {ident} appears in more than one UNPIVOT column group"
                    ))
                    .at(ident.location));
                }
                match value_types.get(idx) {
                    Some(expected) if expected != &column.datatype => {
                        return Err(SqlError::new(format!(
                            "The datatype of column {ident} ({}) does not match other datatypes in the IN clause. Expected {expected}",
                            column.datatype
                        ))
                        .at(ident.location));
                    }
                    Some(_) => (),
                    None => value_types.push(column.datatype.clone()),
                }
                used.push(column.clone());
                args.push(ColumnExpr {
                    column,
                    is_correlated: false,
                });
            }

            let label = match &group.label {
                Some(expr) => match bind_constant(ctx, expr, "UNPIVOT label")? {
                    Expression::Literal(lit)
                        if matches!(lit.value, ScalarValue::String(_) | ScalarValue::Int64(_)) =>
                    {
                        lit.value
                    }
                    _ => {
                        return Err(SqlError::new(
                            "UNPIVOT labels must be STRING or INT64 literals",
                        )
                        .at(expr.location));
                    }
                },
                None => ScalarValue::String(
                    group
                        .columns
                        .iter()
                        .map(|c| c.value.as_str())
                        .collect::<Vec<_>>()
                        .join("_"),
                ),
            };
            labels.push((label, group.label.as_ref().map(|l| l.location)));
            unpivot_args.push(args);
        }

        let label_type = match labels.first() {
            Some((ScalarValue::Int64(_), _)) => DataType::Int64,
            _ => DataType::String,
        };
        for (label, loc) in &labels {
            let matches = match label {
                ScalarValue::Int64(_) => label_type == DataType::Int64,
                _ => label_type == DataType::String,
            };
            if !matches {
                return Err(SqlError::new("UNPIVOT labels must all have the same type")
                    .at(loc.unwrap_or(location)));
            }
        }

        let mut names = NameList::new();
        let mut column_list = Vec::new();
        let mut projected_input_columns = Vec::new();
        for named in input.names.visible_columns() {
            if used.contains(&named.column) {
                continue;
            }
            names.add_column(named.name.clone(), named.column.clone(), true);
            projected_input_columns.push(named.column.clone());
            column_list.push(named.column.clone());
        }

        let mut value_columns = Vec::with_capacity(width);
        for (ident, datatype) in unpivot.value_columns.iter().zip(value_types) {
            let name = IdString::from(ident);
            if names.lookup(&name).is_some() {
                return Err(SqlError::new(format!(
                    "Duplicate column name {ident} in UNPIVOT output"
                ))
                .at(ident.location));
            }
            let column = ctx.allocate_column("$unpivot", ident.value.as_str(), datatype);
            names.add_column(name, column.clone(), true);
            value_columns.push(column.clone());
            column_list.push(column);
        }

        let label_name = IdString::from(&unpivot.name_column);
        if names.lookup(&label_name).is_some() {
            return Err(SqlError::new(format!(
                "Duplicate column name {} in UNPIVOT output",
                unpivot.name_column
            ))
            .at(unpivot.name_column.location));
        }
        let label_column =
            ctx.allocate_column("$unpivot", unpivot.name_column.value.as_str(), label_type);
        names.add_column(label_name, label_column.clone(), true);
        column_list.push(label_column.clone());

        let scan = Scan::Unpivot(UnpivotScan {
            input: Box::new(input.scan),
            value_columns,
            label_column,
            label_list: labels.into_iter().map(|(label, _)| label).collect(),
            unpivot_args,
            projected_input_columns,
            include_nulls: unpivot.include_nulls,
            column_list,
        });
        Ok(BoundFrom {
            scan,
            names: finish_names(names, alias)?,
        })
    }
}

/// Column name for a pivot value without an alias.
fn literal_name(value: &ScalarValue) -> String {
    match value {
        ScalarValue::String(s) => s.clone(),
        ScalarValue::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn unpivot_input_column(names: &NameList, ident: &ast::Ident) -> Result<ResolvedColumn> {
    match names.lookup(&IdString::from(ident)) {
        Some(NameTarget::ExplicitColumn(col)) | Some(NameTarget::ImplicitColumn(col)) => Ok(col),
        Some(NameTarget::Ambiguous) => {
            Err(SqlError::new(format!("Column name {ident} is ambiguous")).at(ident.location))
        }
        _ => Err(SqlError::new(format!("Unrecognized name: {ident}")).at(ident.location)),
    }
}

fn finish_names(names: NameList, alias: Option<&ast::Ident>) -> Result<Arc<NameList>> {
    match alias {
        Some(alias) => with_range_variable(names, IdString::from(alias)),
        None => Ok(Arc::new(names)),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::AnalyzerOptions;
    use crate::logical::scan::Scan;
    use crate::testutil::{TestEnv, analyze, find_scan};
    use pretty_assertions::assert_eq;

    #[test]
    fn pivot_columns_and_grouping() {
        let out = analyze(
            "SELECT * FROM KeyValue PIVOT(COUNT(key) AS c FOR value IN ('a', 'b' AS bee))",
        )
        .unwrap();
        assert!(out.properties.has_pivot);
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["c_a", "c_bee"], names);

        match find_scan(&out.scan, "PivotScan") {
            Some(Scan::Pivot(pivot)) => {
                assert!(pivot.group_by.is_empty());
                assert_eq!(2, pivot.pivot_columns.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pivot_implicit_group_by() {
        let out = analyze(
            "SELECT * FROM KeyValue3 PIVOT(SUM(key) FOR value IN ('x', 'y')) AS p",
        )
        .unwrap();
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Other", "x", "y"], names);
    }

    #[test]
    fn pivot_requires_aggregate() {
        let err = analyze("SELECT * FROM KeyValue PIVOT(key FOR value IN ('a'))").unwrap_err();
        assert_eq!(
            "PIVOT expression must be an aggregate function call",
            err.message()
        );
    }

    #[test]
    fn pivot_disabled() {
        let env = TestEnv::with_options(AnalyzerOptions {
            enable_pivot: false,
            ..Default::default()
        });
        let err = env
            .analyze("SELECT * FROM KeyValue PIVOT(COUNT(key) FOR value IN ('a'))")
            .unwrap_err();
        assert_eq!("PIVOT is not supported", err.message());
    }

    #[test]
    fn unpivot_columns() {
        let out = analyze(
            "SELECT * FROM KeyValue3 UNPIVOT(v FOR which IN (key AS 'k', Other AS 'o'))",
        )
        .unwrap();
        assert!(out.properties.has_unpivot);
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Value", "v", "which"], names);
    }

    #[test]
    fn unpivot_type_mismatch() {
        let err =
            analyze("SELECT * FROM KeyValue UNPIVOT(v FOR which IN (key, value))").unwrap_err();
        assert_eq!(
            "The datatype of column value (STRING) does not match other datatypes in the IN clause. Expected INT64",
            err.message()
        );
    }
}
