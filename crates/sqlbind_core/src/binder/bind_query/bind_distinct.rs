use std::sync::Arc;

use sqlbind_error::{OptionExt, Result, SqlError};

use crate::binder::context::AnalysisContext;
use crate::binder::name_scope::ValidFieldInfoMap;
use crate::binder::query_resolution_info::QueryResolutionInfo;
use crate::expr::Expression;
use crate::ident::IdString;
use crate::logical::column::ComputedColumn;

/// Reason given when ORDER BY references a column hidden by DISTINCT.
pub const NOT_VISIBLE_AFTER_DISTINCT: &str = "which is not visible after SELECT DISTINCT";

/// Allocate a DISTINCT output column per SELECT item.
///
/// Returns the grouping keys of the DISTINCT aggregation. Items sharing an
/// output column share a DISTINCT column.
pub fn bind_distinct(
    ctx: &mut AnalysisContext,
    query_info: &mut QueryResolutionInfo,
) -> Result<Vec<ComputedColumn>> {
    let mut keys: Vec<ComputedColumn> = Vec::new();
    let mut distinct_columns = Vec::with_capacity(query_info.select_columns.len());

    for state in &query_info.select_columns {
        let output = state.output_column().required("select item column")?;
        if !ctx.coercer.supports_grouping(&output.datatype) {
            return Err(SqlError::new(format!(
                "Column {} of type {} cannot be used in SELECT DISTINCT",
                display_alias(&state.alias),
                output.datatype
            ))
            .at(state.location));
        }

        let existing = keys
            .iter()
            .find(|key| key.expr.as_uncorrelated_column() == Some(output));
        let column = match existing {
            Some(key) => key.column.clone(),
            None => {
                let column = ctx.allocate_column_with_collation(
                    "$distinct",
                    state.alias.as_str(),
                    output.datatype.clone(),
                    output.collation.clone(),
                );
                keys.push(ComputedColumn::new(
                    column.clone(),
                    Expression::column(output.clone()),
                ));
                column
            }
        };
        distinct_columns.push(column);
    }

    query_info.distinct_columns = distinct_columns;
    Ok(keys)
}

/// Columns and field paths still accessible after DISTINCT, each mapped to
/// its DISTINCT column.
pub fn distinct_valid_fields(query_info: &QueryResolutionInfo) -> Arc<ValidFieldInfoMap> {
    let grouped = query_info.has_group_by_or_aggregation();
    let mut valid = ValidFieldInfoMap::new();

    for (state, distinct) in query_info
        .select_columns
        .iter()
        .zip(&query_info.distinct_columns)
    {
        let output = match state.output_column() {
            Some(output) => output,
            None => continue,
        };
        valid.insert(output, Vec::new(), distinct.clone());

        if grouped {
            for key in query_info.group_by_keys.iter().filter(|k| &k.column == output) {
                if let Some((column, path)) = key.expr.as_field_path() {
                    let path = path.into_iter().map(IdString::new).collect();
                    valid.insert(column, path, distinct.clone());
                }
            }
        } else if let Some((column, path)) = state.original_expr.as_field_path() {
            let path = path.into_iter().map(IdString::new).collect();
            valid.insert(column, path, distinct.clone());
        }
    }

    Arc::new(valid)
}

fn display_alias(alias: &IdString) -> String {
    if alias.is_internal() {
        "(unnamed)".to_string()
    } else {
        alias.to_string()
    }
}

#[cfg(test)]
mod tests {
    use crate::logical::scan::Scan;
    use crate::testutil::{analyze, find_scan};
    use pretty_assertions::assert_eq;

    #[test]
    fn distinct_aggregates_output() {
        let out = analyze("SELECT DISTINCT key, value FROM KeyValue").unwrap();
        match find_scan(&out.scan, "AggregateScan") {
            Some(Scan::Aggregate(agg)) => {
                assert_eq!(2, agg.group_by.len());
                assert!(agg.aggregates.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!("$distinct", out.output_columns[0].column.table_name);
    }

    #[test]
    fn order_by_after_distinct() {
        analyze("SELECT DISTINCT key FROM KeyValue ORDER BY key").unwrap();
        analyze("SELECT DISTINCT key AS k FROM KeyValue ORDER BY KeyValue.key").unwrap();

        let err = analyze("SELECT DISTINCT key FROM KeyValue ORDER BY value").unwrap_err();
        assert_eq!(
            "ORDER BY clause expression references column value which is not visible after SELECT DISTINCT",
            err.message()
        );
    }

    #[test]
    fn distinct_ungroupable_type() {
        let err = analyze("SELECT DISTINCT JsonCol FROM ComplexTypes").unwrap_err();
        assert_eq!(
            "Column JsonCol of type JSON cannot be used in SELECT DISTINCT",
            err.message()
        );
    }
}
