use std::fmt::{self, Write as _};

use super::column::{ComputedColumn, ResolvedColumn};
use super::scan::{GroupingSetItem, Hint, Scan, TvfArgument};
use crate::expr::Expression;

impl Scan {
    /// Render the scan tree as indented text.
    ///
    /// Subquery scans are rendered beneath the node holding the subquery
    /// expression.
    pub fn debug_string(&self) -> String {
        let mut buf = String::new();
        // Writing to a string can't fail.
        let _ = self.write_explain(&mut buf, 0);
        buf
    }

    fn write_explain(&self, buf: &mut String, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        writeln!(buf, "{pad}{}", self.name())?;
        let entry_pad = "  ".repeat(indent + 1);

        let mut entry = |key: &str, value: String| writeln!(buf, "{entry_pad}{key}: {value}");

        match self {
            Scan::SingleRow(_) => (),
            Scan::Table(s) => {
                entry("table", s.table.name.clone())?;
                entry("alias", s.alias.clone())?;
                if !s.hints.is_empty() {
                    entry("hints", fmt_hints(&s.hints))?;
                }
            }
            Scan::Filter(s) => entry("predicate", s.predicate.to_string())?,
            Scan::Project(s) => {
                if !s.exprs.is_empty() {
                    entry("exprs", fmt_computed(&s.exprs))?;
                }
                if !s.hints.is_empty() {
                    entry("hints", fmt_hints(&s.hints))?;
                }
            }
            Scan::Aggregate(s) => {
                if !s.group_by.is_empty() {
                    entry("group_by", fmt_computed(&s.group_by))?;
                }
                if !s.aggregates.is_empty() {
                    entry("aggregates", fmt_computed(&s.aggregates))?;
                }
                if !s.grouping_sets.is_empty() {
                    let sets: Vec<_> = s.grouping_sets.iter().map(fmt_grouping_set).collect();
                    entry("grouping_sets", sets.join(", "))?;
                }
                for call in &s.grouping_calls {
                    entry(
                        "grouping_call",
                        format!("{} := GROUPING({})", call.output_column, call.key_column),
                    )?;
                }
            }
            Scan::Analytic(s) => entry("functions", fmt_computed(&s.functions))?,
            Scan::Join(s) => {
                entry("join_type", s.join_type.to_string())?;
                if let Some(cond) = &s.condition {
                    entry("condition", cond.to_string())?;
                }
            }
            Scan::Array(s) => {
                entry("array_exprs", fmt_exprs(&s.array_exprs))?;
                entry("element_columns", fmt_columns(&s.element_columns))?;
                if let Some(offset) = &s.offset_column {
                    entry("offset_column", offset.to_string())?;
                }
                if s.is_outer {
                    entry("is_outer", "true".to_string())?;
                }
                if let Some(cond) = &s.join_condition {
                    entry("join_condition", cond.to_string())?;
                }
            }
            Scan::OrderBy(s) => {
                let items: Vec<_> = s.items.iter().map(|item| item.to_string()).collect();
                entry("items", items.join(", "))?;
            }
            Scan::LimitOffset(s) => {
                if let Some(limit) = &s.limit {
                    entry("limit", limit.to_string())?;
                }
                if let Some(offset) = &s.offset {
                    entry("offset", offset.to_string())?;
                }
            }
            Scan::SetOperation(s) => {
                entry("op_type", s.op_type.to_string())?;
                entry("column_match_mode", format!("{:?}", s.column_match_mode))?;
                entry(
                    "column_propagation_mode",
                    format!("{:?}", s.column_propagation_mode),
                )?;
                for item in &s.inputs {
                    entry("input_columns", fmt_columns(&item.output_column_list))?;
                }
            }
            Scan::Recursive(s) => {
                entry("op_type", s.op_type.to_string())?;
                entry(
                    "recursive_columns",
                    fmt_columns(&s.recursive_term.output_column_list),
                )?;
            }
            Scan::RecursiveRef(s) => entry("alias", s.unique_alias.clone())?,
            Scan::With(s) => {
                let aliases: Vec<_> = s.entries.iter().map(|e| e.unique_alias.as_str()).collect();
                entry("entries", aliases.join(", "))?;
                if s.recursive {
                    entry("recursive", "true".to_string())?;
                }
            }
            Scan::WithRef(s) => entry("alias", s.unique_alias.clone())?,
            Scan::Pivot(s) => {
                entry("for_expr", s.for_expr.to_string())?;
                entry("pivot_values", fmt_exprs(&s.pivot_values))?;
                entry("aggregates", fmt_exprs(&s.aggregates))?;
                if !s.group_by.is_empty() {
                    entry("group_by", fmt_computed(&s.group_by))?;
                }
            }
            Scan::Unpivot(s) => {
                entry("value_columns", fmt_columns(&s.value_columns))?;
                entry("label_column", s.label_column.to_string())?;
                let labels: Vec<_> = s.label_list.iter().map(|l| l.to_string()).collect();
                entry("labels", labels.join(", "))?;
                if s.include_nulls {
                    entry("include_nulls", "true".to_string())?;
                }
            }
            Scan::Sample(s) => {
                entry("method", format!("{:?}", s.method))?;
                entry("size", format!("{} {:?}", s.size, s.unit))?;
                if let Some(repeatable) = &s.repeatable {
                    entry("repeatable", repeatable.to_string())?;
                }
            }
            Scan::Tvf(s) => {
                entry("function", s.function.name.clone())?;
                for arg in &s.args {
                    match arg {
                        TvfArgument::Expr(expr) => entry("arg", expr.to_string())?,
                        TvfArgument::Relation { column_list, .. } => {
                            entry("arg", format!("TABLE({})", fmt_columns(column_list)))?
                        }
                        TvfArgument::Model(m) => entry("arg", format!("MODEL {}", m.name))?,
                        TvfArgument::Connection(c) => {
                            entry("arg", format!("CONNECTION {}", c.name))?
                        }
                    }
                }
            }
            Scan::RelationArgument(s) => entry("name", s.name.clone())?,
        }

        entry("columns", fmt_columns(self.column_list()))?;

        let mut subqueries = Vec::new();
        let _ = self.for_each_expr(|expr| {
            expr.for_each_subquery(&mut |subquery| {
                subqueries.push(subquery);
                Ok(())
            })
        });
        for subquery in subqueries {
            subquery.scan.write_explain(buf, indent + 2)?;
        }

        for child in self.children() {
            child.write_explain(buf, indent + 1)?;
        }

        Ok(())
    }
}

fn fmt_columns(cols: &[ResolvedColumn]) -> String {
    let cols: Vec<_> = cols.iter().map(|c| c.to_string()).collect();
    format!("[{}]", cols.join(", "))
}

fn fmt_exprs(exprs: &[Expression]) -> String {
    let exprs: Vec<_> = exprs.iter().map(|e| e.to_string()).collect();
    exprs.join(", ")
}

fn fmt_computed(cols: &[ComputedColumn]) -> String {
    let cols: Vec<_> = cols
        .iter()
        .map(|c| format!("{} := {}", c.column, c.expr))
        .collect();
    cols.join(", ")
}

fn fmt_hints(hints: &[Hint]) -> String {
    let hints: Vec<_> = hints
        .iter()
        .map(|h| format!("{} = {}", h.name, h.value))
        .collect();
    hints.join(", ")
}

fn fmt_grouping_set(item: &GroupingSetItem) -> String {
    let fmt_multi = |elems: &[Vec<ResolvedColumn>]| -> String {
        let elems: Vec<_> = elems
            .iter()
            .map(|elem| {
                if elem.len() == 1 {
                    elem[0].to_string()
                } else {
                    let cols: Vec<_> = elem.iter().map(|c| c.to_string()).collect();
                    format!("({})", cols.join(", "))
                }
            })
            .collect();
        elems.join(", ")
    };

    match item {
        GroupingSetItem::Set(cols) => {
            let cols: Vec<_> = cols.iter().map(|c| c.to_string()).collect();
            format!("({})", cols.join(", "))
        }
        GroupingSetItem::Rollup(elems) => format!("ROLLUP({})", fmt_multi(elems)),
        GroupingSetItem::Cube(elems) => format!("CUBE({})", fmt_multi(elems)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{Table, TableColumn};
    use crate::logical::column::ColumnFactory;
    use crate::logical::scan::{FilterScan, TableScan};
    use crate::expr::ScalarValue;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn explain_filter_over_table() {
        let mut factory = ColumnFactory::new();
        let a = factory.allocate("t", "a", DataType::Int64);
        let table = Arc::new(Table::new("t", [TableColumn::new("a", DataType::Int64)]));
        let scan = Scan::Filter(FilterScan {
            input: Box::new(Scan::Table(TableScan {
                table,
                alias: "t".to_string(),
                column_list: vec![a.clone()],
                column_index_list: vec![0],
                hints: Vec::new(),
            })),
            predicate: Expression::function(
                "$greater",
                vec![
                    Expression::column(a.clone()),
                    Expression::literal(ScalarValue::Int64(1), DataType::Int64),
                ],
                DataType::Bool,
            ),
            column_list: vec![a],
        });

        let expected = "\
FilterScan
  predicate: $greater(t.a#1, 1)
  columns: [t.a#1]
  TableScan
    table: t
    alias: t
    columns: [t.a#1]
";
        assert_eq!(expected, scan.debug_string());
    }
}
