pub mod scalar;

use std::fmt;

use sqlbind_error::Result;

pub use self::scalar::ScalarValue;
use crate::logical::column::ResolvedColumn;
use crate::logical::scan::{OrderByItem, Scan};
use crate::types::DataType;
use crate::types::coercer::InputArgumentType;

/// A resolved, typed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(LiteralExpr),
    Column(ColumnExpr),
    Function(FunctionExpr),
    Aggregate(AggregateExpr),
    Analytic(AnalyticExpr),
    Cast(CastExpr),
    GetField(GetFieldExpr),
    MakeStruct(MakeStructExpr),
    Collate(CollateExpr),
    Subquery(SubqueryExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralExpr {
    pub value: ScalarValue,
    pub datatype: DataType,
    /// Bare `NULL` literal without a type of its own.
    pub untyped_null: bool,
}

/// Reference to a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnExpr {
    pub column: ResolvedColumn,
    /// Column comes from an enclosing query rather than the current scan.
    pub is_correlated: bool,
}

/// Call to a scalar function. Operators are represented as functions as
/// well, e.g. `$add`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionExpr {
    pub name: String,
    pub args: Vec<Expression>,
    pub datatype: DataType,
    pub volatile: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub name: String,
    pub args: Vec<Expression>,
    pub distinct: bool,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticExpr {
    pub name: String,
    pub args: Vec<Expression>,
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<OrderByItem>,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastExpr {
    pub expr: Box<Expression>,
    pub to: DataType,
    /// SAFE_CAST, produces NULL on failure.
    pub safe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetFieldExpr {
    pub expr: Box<Expression>,
    pub field_idx: usize,
    pub field_name: String,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeStructExpr {
    pub fields: Vec<Expression>,
    pub datatype: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollateExpr {
    pub expr: Box<Expression>,
    pub collation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryKind {
    Scalar,
    Exists,
    Array,
    /// `<expr> IN (<subquery>)`
    In(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub kind: SubqueryKind,
    /// Columns from enclosing scopes referenced inside the subquery.
    pub parameter_list: Vec<ColumnExpr>,
    pub scan: Box<Scan>,
    pub datatype: DataType,
}

impl Expression {
    pub fn literal(value: ScalarValue, datatype: DataType) -> Self {
        Expression::Literal(LiteralExpr {
            value,
            datatype,
            untyped_null: false,
        })
    }

    pub fn untyped_null() -> Self {
        Expression::Literal(LiteralExpr {
            value: ScalarValue::Null,
            datatype: DataType::Int64,
            untyped_null: true,
        })
    }

    /// A NULL with a known type.
    pub fn typed_null(datatype: DataType) -> Self {
        Expression::literal(ScalarValue::Null, datatype)
    }

    pub fn column(column: ResolvedColumn) -> Self {
        Expression::Column(ColumnExpr {
            column,
            is_correlated: false,
        })
    }

    pub fn function(
        name: impl Into<String>,
        args: Vec<Expression>,
        datatype: DataType,
    ) -> Self {
        Expression::Function(FunctionExpr {
            name: name.into(),
            args,
            datatype,
            volatile: false,
        })
    }

    pub fn cast(expr: Expression, to: DataType) -> Self {
        Expression::Cast(CastExpr {
            expr: Box::new(expr),
            to,
            safe: false,
        })
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::Literal(e) => e.datatype.clone(),
            Self::Column(e) => e.column.datatype.clone(),
            Self::Function(e) => e.datatype.clone(),
            Self::Aggregate(e) => e.datatype.clone(),
            Self::Analytic(e) => e.datatype.clone(),
            Self::Cast(e) => e.to.clone(),
            Self::GetField(e) => e.datatype.clone(),
            Self::MakeStruct(e) => e.datatype.clone(),
            Self::Collate(e) => e.expr.datatype(),
            Self::Subquery(e) => e.datatype.clone(),
        }
    }

    /// Type of this expression when used as an argument to coercion,
    /// remembering literal-ness.
    pub fn argument_type(&self) -> InputArgumentType {
        match self {
            Self::Literal(lit) if lit.untyped_null => InputArgumentType::untyped_null(),
            Self::Literal(lit) => InputArgumentType::literal(lit.datatype.clone()),
            other => InputArgumentType::new(other.datatype()),
        }
    }

    /// Collation attached to this expression, if any.
    pub fn collation(&self) -> Option<&str> {
        match self {
            Self::Collate(e) => Some(e.collation.as_str()),
            Self::Column(e) => e.column.collation.as_deref(),
            Self::Cast(e) => e.expr.collation(),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    pub fn is_untyped_null(&self) -> bool {
        matches!(self, Self::Literal(LiteralExpr { untyped_null: true, .. }))
    }

    /// Get the column if this is a plain, non-correlated column reference.
    pub fn as_uncorrelated_column(&self) -> Option<&ResolvedColumn> {
        match self {
            Self::Column(ColumnExpr {
                column,
                is_correlated: false,
            }) => Some(column),
            _ => None,
        }
    }

    /// If this expression, or any child, is volatile.
    ///
    /// Volatile expressions are never considered equal to one another for
    /// the purposes of deduplication.
    pub fn is_volatile(&self) -> bool {
        if let Self::Function(func) = self {
            if func.volatile {
                return true;
            }
        }
        let mut volatile = false;
        let _ = self.for_each_child(&mut |child| {
            volatile |= child.is_volatile();
            Ok(())
        });
        volatile
    }

    /// If this expression is a column optionally followed by struct field
    /// accesses, return the column and the field names.
    pub fn as_field_path(&self) -> Option<(&ResolvedColumn, Vec<&str>)> {
        match self {
            Self::Column(col) if !col.is_correlated => Some((&col.column, Vec::new())),
            Self::GetField(get) => {
                let (col, mut path) = get.expr.as_field_path()?;
                path.push(get.field_name.as_str());
                Some((col, path))
            }
            _ => None,
        }
    }

    /// Iterate over the direct children of this expression.
    ///
    /// Subquery scans are not children. The left side of an IN subquery is.
    pub fn for_each_child<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a Expression) -> Result<()>,
    {
        match self {
            Self::Literal(_) | Self::Column(_) => (),
            Self::Function(e) => {
                for arg in &e.args {
                    func(arg)?;
                }
            }
            Self::Aggregate(e) => {
                for arg in &e.args {
                    func(arg)?;
                }
            }
            Self::Analytic(e) => {
                for arg in &e.args {
                    func(arg)?;
                }
                for expr in &e.partition_by {
                    func(expr)?;
                }
                for item in &e.order_by {
                    func(&item.expr)?;
                }
            }
            Self::Cast(e) => func(&e.expr)?,
            Self::GetField(e) => func(&e.expr)?,
            Self::MakeStruct(e) => {
                for field in &e.fields {
                    func(field)?;
                }
            }
            Self::Collate(e) => func(&e.expr)?,
            Self::Subquery(e) => {
                if let SubqueryKind::In(expr) = &e.kind {
                    func(expr)?;
                }
            }
        }
        Ok(())
    }

    pub fn for_each_child_mut<F>(&mut self, func: &mut F) -> Result<()>
    where
        F: FnMut(&mut Expression) -> Result<()>,
    {
        match self {
            Self::Literal(_) | Self::Column(_) => (),
            Self::Function(e) => {
                for arg in &mut e.args {
                    func(arg)?;
                }
            }
            Self::Aggregate(e) => {
                for arg in &mut e.args {
                    func(arg)?;
                }
            }
            Self::Analytic(e) => {
                for arg in &mut e.args {
                    func(arg)?;
                }
                for expr in &mut e.partition_by {
                    func(expr)?;
                }
                for item in &mut e.order_by {
                    func(&mut item.expr)?;
                }
            }
            Self::Cast(e) => func(&mut e.expr)?,
            Self::GetField(e) => func(&mut e.expr)?,
            Self::MakeStruct(e) => {
                for field in &mut e.fields {
                    func(field)?;
                }
            }
            Self::Collate(e) => func(&mut e.expr)?,
            Self::Subquery(e) => {
                if let SubqueryKind::In(expr) = &mut e.kind {
                    func(expr)?;
                }
            }
        }
        Ok(())
    }

    /// Collect every non-correlated column referenced by this expression.
    ///
    /// Parameter lists of subqueries are included.
    pub fn column_references(&self) -> Vec<ResolvedColumn> {
        let mut out = Vec::new();
        self.collect_column_references(&mut out);
        out
    }

    fn collect_column_references(&self, out: &mut Vec<ResolvedColumn>) {
        match self {
            Self::Column(col) => {
                if !col.is_correlated && !out.contains(&col.column) {
                    out.push(col.column.clone());
                }
            }
            Self::Subquery(subquery) => {
                for param in &subquery.parameter_list {
                    if !param.is_correlated && !out.contains(&param.column) {
                        out.push(param.column.clone());
                    }
                }
                if let SubqueryKind::In(expr) = &subquery.kind {
                    expr.collect_column_references(out);
                }
            }
            other => {
                let _ = other.for_each_child(&mut |child| {
                    child.collect_column_references(out);
                    Ok(())
                });
            }
        }
    }

    /// Replace every subexpression for which `replace` returns Some,
    /// top-down. Replaced expressions are not descended into.
    pub fn replace_matching<F>(&mut self, replace: &mut F)
    where
        F: FnMut(&Expression) -> Option<Expression>,
    {
        if let Some(new) = replace(self) {
            *self = new;
            return;
        }
        let _ = self.for_each_child_mut(&mut |child| {
            child.replace_matching(replace);
            Ok(())
        });
    }

    /// Visit every subquery scan inside this expression, including nested
    /// ones reachable through children.
    pub fn for_each_subquery<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a SubqueryExpr) -> Result<()>,
    {
        if let Self::Subquery(subquery) = self {
            func(subquery)?;
        }
        self.for_each_child(&mut |child| child.for_each_subquery(&mut *func))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list(f: &mut fmt::Formatter<'_>, exprs: &[Expression]) -> fmt::Result {
            for (idx, expr) in exprs.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{expr}")?;
            }
            Ok(())
        }

        match self {
            Self::Literal(lit) => write!(f, "{}", lit.value),
            Self::Column(col) => {
                if col.is_correlated {
                    write!(f, "outer({})", col.column)
                } else {
                    write!(f, "{}", col.column)
                }
            }
            Self::Function(func) => {
                write!(f, "{}(", func.name)?;
                list(f, &func.args)?;
                write!(f, ")")
            }
            Self::Aggregate(agg) => {
                write!(f, "{}(", agg.name)?;
                if agg.distinct {
                    write!(f, "DISTINCT ")?;
                }
                list(f, &agg.args)?;
                write!(f, ")")
            }
            Self::Analytic(analytic) => {
                write!(f, "{}(", analytic.name)?;
                list(f, &analytic.args)?;
                write!(f, ") OVER (")?;
                if !analytic.partition_by.is_empty() {
                    write!(f, "PARTITION BY ")?;
                    list(f, &analytic.partition_by)?;
                }
                if !analytic.order_by.is_empty() {
                    if !analytic.partition_by.is_empty() {
                        write!(f, " ")?;
                    }
                    write!(f, "ORDER BY ")?;
                    for (idx, item) in analytic.order_by.iter().enumerate() {
                        if idx > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{item}")?;
                    }
                }
                write!(f, ")")
            }
            Self::Cast(cast) => {
                let name = if cast.safe { "SAFE_CAST" } else { "CAST" };
                write!(f, "{name}({} AS {})", cast.expr, cast.to)
            }
            Self::GetField(get) => write!(f, "{}.{}", get.expr, get.field_name),
            Self::MakeStruct(s) => {
                write!(f, "STRUCT(")?;
                list(f, &s.fields)?;
                write!(f, ")")
            }
            Self::Collate(c) => write!(f, "{} COLLATE '{}'", c.expr, c.collation),
            Self::Subquery(subquery) => {
                let kind = match &subquery.kind {
                    SubqueryKind::Scalar => "SCALAR".to_string(),
                    SubqueryKind::Exists => "EXISTS".to_string(),
                    SubqueryKind::Array => "ARRAY".to_string(),
                    SubqueryKind::In(expr) => format!("{expr} IN"),
                };
                write!(f, "{kind} SUBQUERY(")?;
                for (idx, param) in subquery.parameter_list.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param.column)?;
                }
                write!(f, ")")
            }
        }
    }
}
