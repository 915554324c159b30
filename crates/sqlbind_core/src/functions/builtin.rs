//! Builtin functions and operators.
use super::{FunctionKind, FunctionSignature, ReturnTypeFn};
use crate::types::DataType;
use crate::types::coercer::{InputArgumentType, TypeCoercer};

const fn scalar(
    name: &'static str,
    display_name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    return_type: ReturnTypeFn,
) -> FunctionSignature {
    FunctionSignature {
        name,
        display_name,
        kind: FunctionKind::Scalar,
        min_args,
        max_args,
        volatile: false,
        return_type,
    }
}

const fn aggregate(
    name: &'static str,
    display_name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    return_type: ReturnTypeFn,
) -> FunctionSignature {
    FunctionSignature {
        kind: FunctionKind::Aggregate,
        ..scalar(name, display_name, min_args, max_args, return_type)
    }
}

const fn analytic(
    name: &'static str,
    display_name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    return_type: ReturnTypeFn,
) -> FunctionSignature {
    FunctionSignature {
        kind: FunctionKind::Analytic,
        ..scalar(name, display_name, min_args, max_args, return_type)
    }
}

const fn volatile(sig: FunctionSignature) -> FunctionSignature {
    FunctionSignature {
        volatile: true,
        ..sig
    }
}

pub const BUILTINS: &[FunctionSignature] = &[
    // Arithmetic
    scalar("$add", "operator +", 2, Some(2), numeric_supertype),
    scalar("$subtract", "operator -", 2, Some(2), numeric_supertype),
    scalar("$multiply", "operator *", 2, Some(2), numeric_supertype),
    scalar("$divide", "operator /", 2, Some(2), divide),
    scalar("$mod", "operator %", 2, Some(2), all_int64),
    scalar("$unary_minus", "operator unary -", 1, Some(1), numeric_supertype),
    scalar("$concat", "operator ||", 2, Some(2), concat_op),
    // Comparison
    scalar("$equal", "operator =", 2, Some(2), comparable_equality),
    scalar("$not_equal", "operator !=", 2, Some(2), comparable_equality),
    scalar("$less", "operator <", 2, Some(2), comparable_ordering),
    scalar("$less_or_equal", "operator <=", 2, Some(2), comparable_ordering),
    scalar("$greater", "operator >", 2, Some(2), comparable_ordering),
    scalar("$greater_or_equal", "operator >=", 2, Some(2), comparable_ordering),
    scalar("$between", "operator BETWEEN", 3, Some(3), comparable_ordering),
    scalar("$in", "operator IN", 2, None, comparable_equality),
    scalar("$like", "operator LIKE", 2, Some(2), all_strings_bool),
    scalar("$is_null", "operator IS NULL", 1, Some(1), always_bool),
    // Logical
    scalar("$and", "operator AND", 2, None, all_bool),
    scalar("$or", "operator OR", 2, None, all_bool),
    scalar("$not", "operator NOT", 1, Some(1), all_bool),
    // Conditionals and constructors
    scalar("$case_with_value", "operator CASE", 4, None, case_with_value),
    scalar("$case_no_value", "operator CASE", 3, None, case_no_value),
    scalar("$make_array", "operator ARRAY", 0, None, make_array),
    scalar("$subscript", "operator []", 2, Some(2), subscript),
    // Scalar functions
    scalar("concat", "CONCAT", 1, None, all_strings),
    scalar("upper", "UPPER", 1, Some(1), all_strings),
    scalar("lower", "LOWER", 1, Some(1), all_strings),
    scalar("length", "LENGTH", 1, Some(1), length),
    scalar("coalesce", "COALESCE", 1, None, supertype),
    scalar("ifnull", "IFNULL", 2, Some(2), supertype),
    scalar("if", "IF", 3, Some(3), if_fn),
    scalar("abs", "ABS", 1, Some(1), numeric_supertype),
    volatile(scalar("rand", "RAND", 0, Some(0), returns_double)),
    volatile(scalar(
        "current_timestamp",
        "CURRENT_TIMESTAMP",
        0,
        Some(0),
        returns_timestamp,
    )),
    // Aggregates
    aggregate("count", "COUNT", 1, Some(1), returns_int64),
    aggregate("$count_star", "COUNT(*)", 0, Some(0), returns_int64),
    aggregate("countif", "COUNTIF", 1, Some(1), countif),
    aggregate("sum", "SUM", 1, Some(1), sum),
    aggregate("avg", "AVG", 1, Some(1), avg),
    aggregate("min", "MIN", 1, Some(1), orderable_identity),
    aggregate("max", "MAX", 1, Some(1), orderable_identity),
    aggregate("any_value", "ANY_VALUE", 1, Some(1), identity),
    aggregate("array_agg", "ARRAY_AGG", 1, Some(1), array_agg),
    aggregate("string_agg", "STRING_AGG", 1, Some(2), all_strings),
    // Analytic
    analytic("rank", "RANK", 0, Some(0), returns_int64),
    analytic("dense_rank", "DENSE_RANK", 0, Some(0), returns_int64),
    analytic("row_number", "ROW_NUMBER", 0, Some(0), returns_int64),
    analytic("lag", "LAG", 1, Some(3), lag_lead),
    analytic("lead", "LEAD", 1, Some(3), lag_lead),
    analytic("first_value", "FIRST_VALUE", 1, Some(1), identity),
    analytic("last_value", "LAST_VALUE", 1, Some(1), identity),
];

fn coerces(coercer: &dyn TypeCoercer, arg: &InputArgumentType, to: &DataType) -> bool {
    coercer.coerces_to(arg, to, false)
}

fn supertype(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    coercer.common_supertype(args)
}

fn identity(args: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    args.first().map(|arg| arg.datatype.clone())
}

fn orderable_identity(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = identity(args, coercer)?;
    coercer.supports_ordering(&datatype).then_some(datatype)
}

fn numeric_supertype(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = coercer.common_supertype(args)?;
    datatype.is_numeric().then_some(datatype)
}

fn divide(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    numeric_supertype(args, coercer)?;
    Some(DataType::Double)
}

fn all_int64(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    args.iter()
        .all(|arg| coerces(coercer, arg, &DataType::Int64))
        .then_some(DataType::Int64)
}

fn all_bool(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    args.iter()
        .all(|arg| coerces(coercer, arg, &DataType::Bool))
        .then_some(DataType::Bool)
}

fn all_strings(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    args.iter()
        .all(|arg| coerces(coercer, arg, &DataType::String))
        .then_some(DataType::String)
}

fn all_strings_bool(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    all_strings(args, coercer).map(|_| DataType::Bool)
}

fn always_bool(_: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    Some(DataType::Bool)
}

fn returns_int64(_: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    Some(DataType::Int64)
}

fn returns_double(_: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    Some(DataType::Double)
}

fn returns_timestamp(_: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    Some(DataType::Timestamp)
}

fn concat_op(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = coercer.common_supertype(args)?;
    match datatype {
        DataType::String | DataType::Bytes | DataType::Array(_) => Some(datatype),
        _ => None,
    }
}

fn comparable_equality(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = coercer.common_supertype(args)?;
    coercer
        .supports_grouping(&datatype)
        .then_some(DataType::Bool)
}

fn comparable_ordering(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = coercer.common_supertype(args)?;
    coercer
        .supports_ordering(&datatype)
        .then_some(DataType::Bool)
}

fn length(args: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    match &args.first()?.datatype {
        DataType::String | DataType::Bytes | DataType::Array(_) => Some(DataType::Int64),
        _ if args[0].is_untyped_null => Some(DataType::Int64),
        _ => None,
    }
}

fn if_fn(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    if !coerces(coercer, &args[0], &DataType::Bool) {
        return None;
    }
    coercer.common_supertype(&args[1..])
}

/// `$case_with_value(operand, when1, then1, ..., else)`
fn case_with_value(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    if args.len() % 2 != 0 {
        return None;
    }
    let pairs = &args[1..args.len() - 1];
    let mut compared = vec![args[0].clone()];
    let mut results = Vec::new();
    for pair in pairs.chunks(2) {
        compared.push(pair[0].clone());
        results.push(pair[1].clone());
    }
    results.push(args[args.len() - 1].clone());

    comparable_equality(&compared, coercer)?;
    coercer.common_supertype(&results)
}

/// `$case_no_value(cond1, then1, ..., else)`
fn case_no_value(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    if args.len() % 2 != 1 {
        return None;
    }
    let pairs = &args[..args.len() - 1];
    let mut results = Vec::new();
    for pair in pairs.chunks(2) {
        if !coerces(coercer, &pair[0], &DataType::Bool) {
            return None;
        }
        results.push(pair[1].clone());
    }
    results.push(args[args.len() - 1].clone());
    coercer.common_supertype(&results)
}

fn make_array(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let element = coercer.common_supertype(args)?;
    if matches!(element, DataType::Array(_)) {
        // Arrays of arrays aren't supported.
        return None;
    }
    Some(DataType::array(element))
}

fn subscript(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let element = args[0].datatype.array_element()?.clone();
    coerces(coercer, &args[1], &DataType::Int64).then_some(element)
}

fn countif(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    all_bool(args, coercer).map(|_| DataType::Int64)
}

fn sum(args: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    match &args[0].datatype {
        _ if args[0].is_untyped_null => Some(DataType::Int64),
        DataType::Int64 => Some(DataType::Int64),
        DataType::Double => Some(DataType::Double),
        _ => None,
    }
}

fn avg(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    sum(args, coercer).map(|_| DataType::Double)
}

fn array_agg(args: &[InputArgumentType], _: &dyn TypeCoercer) -> Option<DataType> {
    match &args[0].datatype {
        DataType::Array(_) => None,
        other => Some(DataType::array(other.clone())),
    }
}

/// `LAG(expr [, offset [, default]])`
fn lag_lead(args: &[InputArgumentType], coercer: &dyn TypeCoercer) -> Option<DataType> {
    let datatype = args[0].datatype.clone();
    if let Some(offset) = args.get(1) {
        if !coerces(coercer, offset, &DataType::Int64) {
            return None;
        }
    }
    if let Some(default) = args.get(2) {
        if !coerces(coercer, default, &datatype) {
            return None;
        }
    }
    Some(datatype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::coercer::DefaultCoercer;
    use pretty_assertions::assert_eq;

    fn typed(datatype: DataType) -> InputArgumentType {
        InputArgumentType::new(datatype)
    }

    #[test]
    fn case_result_supertype() {
        let args = vec![
            typed(DataType::Bool),
            typed(DataType::Int64),
            typed(DataType::Bool),
            typed(DataType::Double),
            InputArgumentType::untyped_null(),
        ];
        assert_eq!(Some(DataType::Double), case_no_value(&args, &DefaultCoercer));
    }

    #[test]
    fn case_with_value_requires_comparable_whens() {
        let args = vec![
            typed(DataType::Int64),
            typed(DataType::String),
            typed(DataType::Int64),
            InputArgumentType::untyped_null(),
        ];
        assert_eq!(None, case_with_value(&args, &DefaultCoercer));
    }

    #[test]
    fn sum_types() {
        assert_eq!(Some(DataType::Int64), sum(&[typed(DataType::Int64)], &DefaultCoercer));
        assert_eq!(Some(DataType::Double), avg(&[typed(DataType::Int64)], &DefaultCoercer));
        assert_eq!(None, sum(&[typed(DataType::String)], &DefaultCoercer));
    }

    #[test]
    fn min_requires_ordering() {
        let json = typed(DataType::Json);
        assert_eq!(None, orderable_identity(&[json], &DefaultCoercer));
    }

    #[test]
    fn make_array_of_mixed_numerics() {
        let args = vec![typed(DataType::Int64), typed(DataType::Double)];
        assert_eq!(
            Some(DataType::array(DataType::Double)),
            make_array(&args, &DefaultCoercer)
        );
    }
}
