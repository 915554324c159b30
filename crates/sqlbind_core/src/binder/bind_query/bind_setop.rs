use std::sync::Arc;

use sqlbind_error::{Location, Result, SqlError};
use sqlbind_parser::ast;
use tracing::debug;

use super::{BoundQuery, QueryBinder};
use crate::binder::context::AnalysisContext;
use crate::binder::name_list::NameList;
use crate::binder::name_scope::NameScope;
use crate::expr::Expression;
use crate::ident::IdString;
use crate::logical::column::ComputedColumn;
use crate::logical::scan::{
    ColumnMatchMode,
    ColumnPropagationMode,
    ProjectScan,
    Scan,
    SetOperationItem,
    SetOperationScan,
    SetOperationType,
};
use crate::types::DataType;
use crate::types::coercer::InputArgumentType;

/// Binds UNION, INTERSECT and EXCEPT.
#[derive(Debug, Clone, Copy)]
pub struct SetOpBinder<'s> {
    outer: &'s NameScope<'s>,
}

impl<'s> SetOpBinder<'s> {
    pub fn new(outer: &'s NameScope<'s>) -> Self {
        SetOpBinder { outer }
    }

    pub fn bind(&self, ctx: &mut AnalysisContext, setop: &ast::SetOp) -> Result<BoundQuery> {
        let op_type = set_operation_type(setop);
        let operands = flatten_set_operation(setop)?;

        let mut inputs = Vec::with_capacity(operands.len());
        for operand in operands {
            inputs.push(QueryBinder::new(self.outer).bind_body(ctx, operand)?);
        }

        combine_set_operation(ctx, op_type, setop.corresponding.as_ref(), setop.location, inputs)
    }
}

pub fn set_operation_type(setop: &ast::SetOp) -> SetOperationType {
    match (setop.operation, setop.all) {
        (ast::SetOperation::Union, true) => SetOperationType::UnionAll,
        (ast::SetOperation::Union, false) => SetOperationType::UnionDistinct,
        (ast::SetOperation::Intersect, true) => SetOperationType::IntersectAll,
        (ast::SetOperation::Intersect, false) => SetOperationType::IntersectDistinct,
        (ast::SetOperation::Except, true) => SetOperationType::ExceptAll,
        (ast::SetOperation::Except, false) => SetOperationType::ExceptDistinct,
    }
}

/// Collect the operands of a chain of identical set operations.
///
/// `a UNION ALL b UNION ALL c` is a single operation with three inputs.
/// Mixing operations requires parentheses.
pub fn flatten_set_operation(setop: &ast::SetOp) -> Result<Vec<&ast::QueryNodeBody>> {
    fn same_operation(a: &ast::SetOp, b: &ast::SetOp) -> bool {
        a.operation == b.operation && a.all == b.all && a.corresponding == b.corresponding
    }

    fn collect<'a>(
        root: &ast::SetOp,
        body: &'a ast::QueryNodeBody,
        out: &mut Vec<&'a ast::QueryNodeBody>,
    ) -> Result<()> {
        match body {
            ast::QueryNodeBody::Set(inner) => {
                if !same_operation(root, inner) {
                    return Err(SqlError::new(
                        "Different set operations cannot be used in the same query without using parentheses for grouping",
                    )
                    .at(inner.location));
                }
                collect(root, &inner.left, out)?;
                collect(root, &inner.right, out)
            }
            other => {
                out.push(other);
                Ok(())
            }
        }
    }

    let mut operands = Vec::new();
    collect(setop, &setop.left, &mut operands)?;
    collect(setop, &setop.right, &mut operands)?;
    Ok(operands)
}

/// Which input column feeds each output column, per input. None pads the
/// input with NULL.
type ColumnMapping = Vec<Vec<Option<usize>>>;

/// Combine bound inputs into a single set operation.
pub fn combine_set_operation(
    ctx: &mut AnalysisContext,
    op_type: SetOperationType,
    corresponding: Option<&ast::Corresponding>,
    location: Location,
    inputs: Vec<BoundQuery>,
) -> Result<BoundQuery> {
    let is_value_table = inputs.first().map(|i| i.is_value_table).unwrap_or(false);
    for (idx, input) in inputs.iter().enumerate() {
        if input.is_value_table != is_value_table {
            return Err(SqlError::new(format!(
                "Queries in {op_type} must all be value tables or all be non-value tables; query {} differs from query 1",
                idx + 1
            ))
            .at(location));
        }
    }

    let (names, mapping, match_mode, propagation_mode) = match corresponding {
        Some(corresponding) => {
            if !ctx.options.enable_corresponding {
                return Err(
                    SqlError::unimplemented("CORRESPONDING is not supported").at(location)
                );
            }
            if is_value_table {
                return Err(SqlError::new(format!(
                    "Value tables are not allowed in {op_type} with CORRESPONDING"
                ))
                .at(location));
            }
            let (names, mapping) = corresponding_mapping(op_type, corresponding, &inputs)
                .map_err(|e| e.at(location))?;
            let match_mode = if corresponding.by.is_some() {
                ColumnMatchMode::CorrespondingBy
            } else {
                ColumnMatchMode::Corresponding
            };
            let propagation_mode = match corresponding.mode {
                ast::CorrespondingMode::Inner => ColumnPropagationMode::Inner,
                ast::CorrespondingMode::Strict => ColumnPropagationMode::Strict,
                ast::CorrespondingMode::Left => ColumnPropagationMode::Left,
                ast::CorrespondingMode::Full => ColumnPropagationMode::Full,
            };
            (names, mapping, match_mode, propagation_mode)
        }
        None => {
            let (names, mapping) =
                positional_mapping(op_type, &inputs).map_err(|e| e.at(location))?;
            (
                names,
                mapping,
                ColumnMatchMode::ByPosition,
                ColumnPropagationMode::Strict,
            )
        }
    };

    debug!(
        %op_type,
        columns = names.len(),
        inputs = inputs.len(),
        ?match_mode,
        "matched set operation columns"
    );

    let mut output_types = Vec::with_capacity(names.len());
    for (pos, name) in names.iter().enumerate() {
        let types: Vec<InputArgumentType> = inputs
            .iter()
            .zip(&mapping)
            .filter_map(|(input, map)| map[pos].map(|idx| input.column_types[idx].clone()))
            .collect();
        let supertype = ctx.coercer.common_supertype(&types).ok_or_else(|| {
            let list: Vec<String> = types.iter().map(|t| t.datatype.to_string()).collect();
            let column = match corresponding {
                Some(_) => name.to_string(),
                None => (pos + 1).to_string(),
            };
            SqlError::new(format!(
                "Column {column} in {op_type} has incompatible types: {}",
                list.join(", ")
            ))
            .at(location)
        })?;
        if op_type != SetOperationType::UnionAll && !ctx.coercer.supports_grouping(&supertype) {
            return Err(SqlError::new(format!(
                "Column {} in {op_type} has type that does not support set operation comparisons: {supertype}",
                pos + 1
            ))
            .at(location));
        }
        output_types.push(supertype);
    }

    let table_name = op_type.column_table_name();
    let mut items = Vec::with_capacity(inputs.len());
    let mut collations: Vec<Option<String>> = vec![None; names.len()];
    for (idx, (input, map)) in inputs.into_iter().zip(&mapping).enumerate() {
        for (pos, source) in map.iter().enumerate() {
            if let Some(source) = source {
                if idx == 0 || collations[pos].is_none() {
                    collations[pos] = input.column_list[*source].collation.clone();
                }
            }
        }
        items.push(coerce_input(ctx, table_name, idx, input, map, &output_types));
    }

    let mut column_list = Vec::with_capacity(names.len());
    let mut out_names = NameList::new();
    for ((name, datatype), collation) in names.iter().zip(output_types).zip(collations) {
        let column =
            ctx.allocate_column_with_collation(table_name, name.as_str(), datatype, collation);
        if is_value_table {
            out_names.add_value_table_column(name.clone(), column.clone());
        } else {
            out_names.add_column(name.clone(), column.clone(), true);
        }
        column_list.push(column);
    }
    out_names.set_value_table(is_value_table);

    let column_types = column_list
        .iter()
        .map(|col| InputArgumentType::new(col.datatype.clone()))
        .collect();
    let scan = Scan::SetOperation(SetOperationScan {
        op_type,
        inputs: items,
        column_match_mode: match_mode,
        column_propagation_mode: propagation_mode,
        column_list: column_list.clone(),
    });

    Ok(BoundQuery {
        scan,
        names: Arc::new(out_names),
        column_list,
        column_types,
        is_value_table,
    })
}

fn positional_mapping(
    op_type: SetOperationType,
    inputs: &[BoundQuery],
) -> Result<(Vec<IdString>, ColumnMapping)> {
    let first = inputs
        .first()
        .ok_or_else(|| SqlError::internal("Set operation without inputs"))?;
    let width = first.column_list.len();
    for (idx, input) in inputs.iter().enumerate().skip(1) {
        if input.column_list.len() != width {
            return Err(SqlError::new(format!(
                "Queries in {op_type} have mismatched column count; query 1 has {width} columns, query {} has {} columns",
                idx + 1,
                input.column_list.len()
            )));
        }
    }

    let names = output_names(first);
    let mapping = inputs
        .iter()
        .map(|_| (0..width).map(Some).collect())
        .collect();
    Ok((names, mapping))
}

/// Names of a query's output columns by position.
fn output_names(query: &BoundQuery) -> Vec<IdString> {
    let mut names = query.column_names();
    // Value tables carry an internal name for their single column.
    names.resize(query.column_list.len(), IdString::new("$col"));
    names
}

fn corresponding_mapping(
    op_type: SetOperationType,
    corresponding: &ast::Corresponding,
    inputs: &[BoundQuery],
) -> Result<(Vec<IdString>, ColumnMapping)> {
    let mode = corresponding.mode;
    let mut input_names = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        let names = output_names(input);
        for (pos, name) in names.iter().enumerate() {
            if name.is_internal() {
                return Err(SqlError::new(format!(
                    "Anonymous columns are not allowed in {op_type} with CORRESPONDING; column {} of query {} has no name",
                    pos + 1,
                    idx + 1
                )));
            }
            if names[..pos].contains(name) {
                return Err(SqlError::new(format!(
                    "Duplicate column name {name} in query {} of {op_type} with CORRESPONDING",
                    idx + 1
                )));
            }
        }
        input_names.push(names);
    }

    let position = |names: &[IdString], name: &IdString| names.iter().position(|n| n == name);

    let output: Vec<IdString> = match &corresponding.by {
        Some(by) => {
            let by: Vec<IdString> = by.iter().map(IdString::from).collect();
            for (pos, name) in by.iter().enumerate() {
                if by[..pos].contains(name) {
                    return Err(SqlError::new(format!(
                        "Duplicate column name {name} in CORRESPONDING BY"
                    )));
                }
            }
            for (idx, names) in input_names.iter().enumerate() {
                let required = match mode {
                    ast::CorrespondingMode::Inner | ast::CorrespondingMode::Strict => true,
                    ast::CorrespondingMode::Left => idx == 0,
                    ast::CorrespondingMode::Full => false,
                };
                if required {
                    if let Some(missing) = by.iter().find(|name| position(names, name).is_none()) {
                        return Err(SqlError::new(format!(
                            "Column {missing} in CORRESPONDING BY not found in query {}",
                            idx + 1
                        )));
                    }
                }
                if mode == ast::CorrespondingMode::Strict && names.len() != by.len() {
                    return Err(SqlError::new(format!(
                        "Query {} in {op_type} CORRESPONDING STRICT BY has columns not in the BY list",
                        idx + 1
                    )));
                }
                if !by.iter().any(|name| position(names, name).is_some()) {
                    return Err(SqlError::new(format!(
                        "Query {} in {op_type} shares no columns with the CORRESPONDING BY list",
                        idx + 1
                    )));
                }
            }
            by
        }
        None => {
            let first = &input_names[0];
            match mode {
                ast::CorrespondingMode::Inner => {
                    let common: Vec<IdString> = first
                        .iter()
                        .filter(|name| input_names.iter().all(|names| names.contains(name)))
                        .cloned()
                        .collect();
                    if common.is_empty() {
                        return Err(SqlError::new(format!(
                            "Queries in {op_type} with CORRESPONDING have no columns in common"
                        )));
                    }
                    common
                }
                ast::CorrespondingMode::Strict => {
                    for (idx, names) in input_names.iter().enumerate().skip(1) {
                        let same = names.len() == first.len()
                            && names.iter().all(|name| first.contains(name));
                        if !same {
                            return Err(SqlError::new(format!(
                                "Queries in {op_type} with CORRESPONDING STRICT must have the same column names; query {} differs from query 1",
                                idx + 1
                            )));
                        }
                    }
                    first.clone()
                }
                ast::CorrespondingMode::Left => {
                    for (idx, names) in input_names.iter().enumerate().skip(1) {
                        if !names.iter().any(|name| first.contains(name)) {
                            return Err(SqlError::new(format!(
                                "Query {} in {op_type} with CORRESPONDING LEFT has no columns in common with query 1",
                                idx + 1
                            )));
                        }
                    }
                    first.clone()
                }
                ast::CorrespondingMode::Full => {
                    let mut all: Vec<IdString> = Vec::new();
                    for names in &input_names {
                        for name in names {
                            if !all.contains(name) {
                                all.push(name.clone());
                            }
                        }
                    }
                    all
                }
            }
        }
    };

    let mapping = input_names
        .iter()
        .map(|names| output.iter().map(|name| position(names, name)).collect())
        .collect();
    Ok((output, mapping))
}

/// Select, cast and pad one input's columns to the output shape.
///
/// A projection is only added when some column needs a cast or padding.
fn coerce_input(
    ctx: &mut AnalysisContext,
    table_name: &str,
    input_idx: usize,
    input: BoundQuery,
    mapping: &[Option<usize>],
    output_types: &[DataType],
) -> SetOperationItem {
    let wrapper_table = format!("{table_name}{}", input_idx + 1);
    let mut exprs = Vec::new();
    let mut output_column_list = Vec::with_capacity(mapping.len());

    for (source, datatype) in mapping.iter().zip(output_types) {
        match source {
            Some(idx) => {
                let column = &input.column_list[*idx];
                if &column.datatype == datatype {
                    output_column_list.push(column.clone());
                } else {
                    let cast = ctx.allocate_column(
                        format!("{wrapper_table}_cast"),
                        column.name.as_str(),
                        datatype.clone(),
                    );
                    exprs.push(ComputedColumn::new(
                        cast.clone(),
                        Expression::cast(Expression::column(column.clone()), datatype.clone()),
                    ));
                    output_column_list.push(cast);
                }
            }
            None => {
                let null = ctx.allocate_column(
                    format!("{wrapper_table}_null"),
                    "$null",
                    datatype.clone(),
                );
                exprs.push(ComputedColumn::new(
                    null.clone(),
                    Expression::typed_null(datatype.clone()),
                ));
                output_column_list.push(null);
            }
        }
    }

    let scan = if exprs.is_empty() {
        input.scan
    } else {
        debug!(input = input_idx + 1, computed = exprs.len(), "wrapping set operation input");
        let mut column_list = input.scan.column_list().to_vec();
        column_list.extend(exprs.iter().map(|e| e.column.clone()));
        Scan::Project(ProjectScan {
            input: Box::new(input.scan),
            exprs,
            column_list,
            hints: Vec::new(),
        })
    };

    SetOperationItem {
        scan,
        output_column_list,
    }
}

/// Cast a query's columns to the given types, used for the recursive term
/// of a recursive query.
pub fn coerce_to_types(
    ctx: &mut AnalysisContext,
    table_name: &str,
    input_idx: usize,
    input: BoundQuery,
    output_types: &[DataType],
) -> SetOperationItem {
    let mapping: Vec<Option<usize>> = (0..input.column_list.len()).map(Some).collect();
    coerce_input(ctx, table_name, input_idx, input, &mapping, output_types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerOptions;
    use crate::testutil::{TestEnv, analyze};
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
    fn union_all_by_position() {
        let sql = "SELECT key, value FROM KeyValue UNION ALL SELECT 1, 'a'";
        assert_eq!(vec!["key", "value"], output_names(sql));

        let out = analyze(sql).unwrap();
        assert_eq!("$union_all", out.output_columns[0].column.table_name);
        match &out.scan {
            Scan::SetOperation(setop) => {
                assert_eq!(SetOperationType::UnionAll, setop.op_type);
                assert_eq!(ColumnMatchMode::ByPosition, setop.column_match_mode);
                // Literals already have the output types, nothing is cast.
                for item in &setop.inputs {
                    assert!(
                        item.output_column_list
                            .iter()
                            .all(|col| !col.table_name.ends_with("_cast"))
                    );
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn chain_flattens() {
        let out = analyze("SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3").unwrap();
        match &out.scan {
            Scan::SetOperation(setop) => assert_eq!(3, setop.inputs.len()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn mixed_operations_need_parentheses() {
        let err = analyze("SELECT 1 UNION ALL SELECT 2 EXCEPT DISTINCT SELECT 3").unwrap_err();
        assert_eq!(
            "Different set operations cannot be used in the same query without using parentheses for grouping",
            err.message()
        );
        analyze("(SELECT 1 UNION ALL SELECT 2) EXCEPT DISTINCT SELECT 3").unwrap();
    }

    #[test]
    fn column_count_mismatch() {
        let err = analyze("SELECT 1, 2 UNION ALL SELECT 1, 2, 3").unwrap_err();
        assert_eq!(
            "Queries in UNION ALL have mismatched column count; query 1 has 2 columns, query 2 has 3 columns",
            err.message()
        );
    }

    #[test]
    fn incompatible_types() {
        let err = analyze("SELECT key FROM KeyValue UNION ALL SELECT value FROM KeyValue")
            .unwrap_err();
        assert_eq!(
            "Column 1 in UNION ALL has incompatible types: INT64, STRING",
            err.message()
        );
    }

    #[test]
    fn supertype_inserts_cast() {
        let out = analyze("SELECT key FROM KeyValue UNION ALL SELECT 1.5").unwrap();
        assert_eq!(DataType::Double, out.output_columns[0].column.datatype);
        match &out.scan {
            Scan::SetOperation(setop) => match &setop.inputs[0].scan {
                Scan::Project(project) => {
                    assert_eq!("$union_all1_cast", project.exprs[0].column.table_name);
                }
                other => panic!("unexpected: {other:?}"),
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn distinct_requires_groupable_types() {
        let err = analyze(
            "SELECT JsonCol FROM ComplexTypes UNION DISTINCT SELECT JsonCol FROM ComplexTypes",
        )
        .unwrap_err();
        assert_eq!(
            "Column 1 in UNION DISTINCT has type that does not support set operation comparisons: JSON",
            err.message()
        );
        analyze("SELECT JsonCol FROM ComplexTypes UNION ALL SELECT JsonCol FROM ComplexTypes")
            .unwrap();
    }

    const BRANCH_1: &str = "SELECT 1 AS A, 'x' AS B";
    const BRANCH_2: &str = "SELECT 'y' AS B, 2.5 AS C, 3 AS A";

    #[test]
    fn corresponding_inner() {
        let sql = format!("{BRANCH_1} UNION ALL CORRESPONDING {BRANCH_2}");
        assert_eq!(vec!["A", "B"], output_names(&sql));
    }

    #[test]
    fn corresponding_full() {
        let sql = format!("{BRANCH_1} FULL UNION ALL CORRESPONDING {BRANCH_2}");
        assert_eq!(vec!["A", "B", "C"], output_names(&sql));

        let out = analyze(&sql).unwrap();
        match &out.scan {
            Scan::SetOperation(setop) => {
                assert_eq!(ColumnPropagationMode::Full, setop.column_propagation_mode);
                // First branch is padded with a NULL for C.
                match &setop.inputs[0].scan {
                    Scan::Project(project) => {
                        assert_eq!("$union_all1_null", project.exprs[0].column.table_name);
                    }
                    other => panic!("unexpected: {other:?}"),
                }
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn corresponding_left() {
        let sql = format!("{BRANCH_1} LEFT UNION ALL CORRESPONDING {BRANCH_2}");
        assert_eq!(vec!["A", "B"], output_names(&sql));
    }

    #[test]
    fn corresponding_strict() {
        let sql = format!("{BRANCH_1} UNION ALL STRICT CORRESPONDING {BRANCH_2}");
        let err = analyze(&sql).unwrap_err();
        assert_eq!(
            "Queries in UNION ALL with CORRESPONDING STRICT must have the same column names; query 2 differs from query 1",
            err.message()
        );
    }

    #[test]
    fn corresponding_by() {
        let sql = format!("{BRANCH_1} UNION ALL CORRESPONDING BY (B) {BRANCH_2}");
        assert_eq!(vec!["B"], output_names(&sql));

        let out = analyze(&sql).unwrap();
        match &out.scan {
            Scan::SetOperation(setop) => {
                assert_eq!(ColumnMatchMode::CorrespondingBy, setop.column_match_mode);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn corresponding_disabled() {
        let env = TestEnv::with_options(AnalyzerOptions {
            enable_corresponding: false,
            ..Default::default()
        });
        let err = env
            .analyze(&format!("{BRANCH_1} UNION ALL CORRESPONDING {BRANCH_2}"))
            .unwrap_err();
        assert_eq!("CORRESPONDING is not supported", err.message());
    }

    #[test]
    fn order_by_after_set_operation() {
        let out = analyze(
            "SELECT key FROM KeyValue UNION ALL SELECT key FROM KeyValue2 ORDER BY key LIMIT 1",
        )
        .unwrap();
        assert!(matches!(out.scan, Scan::LimitOffset(_)));
    }
}
