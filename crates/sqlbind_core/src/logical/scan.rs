use std::fmt;
use std::sync::Arc;

use sqlbind_error::Result;

use super::column::{ComputedColumn, ResolvedColumn};
use crate::catalog::{Connection, Model, Table, TableFunction};
use crate::expr::{ColumnExpr, Expression, ScalarValue};

/// A resolved relational operator tree.
///
/// Every node owns its children and exposes the columns it produces. Columns
/// referenced by a node are always produced by one of its descendants (or
/// are correlated references into an enclosing query).
#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    SingleRow(SingleRowScan),
    Table(TableScan),
    Filter(FilterScan),
    Project(ProjectScan),
    Aggregate(AggregateScan),
    Analytic(AnalyticScan),
    Join(JoinScan),
    Array(ArrayScan),
    OrderBy(OrderByScan),
    LimitOffset(LimitOffsetScan),
    SetOperation(SetOperationScan),
    Recursive(RecursiveScan),
    RecursiveRef(RecursiveRefScan),
    With(WithScan),
    WithRef(WithRefScan),
    Pivot(PivotScan),
    Unpivot(UnpivotScan),
    Sample(SampleScan),
    Tvf(TvfScan),
    RelationArgument(RelationArgumentScan),
}

/// A `name = value` hint attached to a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    pub name: String,
    pub value: ScalarValue,
}

/// Produces one row with no columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SingleRowScan;

#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub table: Arc<Table>,
    /// Alias the table is visible under in the query.
    pub alias: String,
    pub column_list: Vec<ResolvedColumn>,
    /// Index of each output column in the table's column list.
    pub column_index_list: Vec<usize>,
    pub hints: Vec<Hint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterScan {
    pub input: Box<Scan>,
    pub predicate: Expression,
    pub column_list: Vec<ResolvedColumn>,
}

/// Computes new columns on top of its input.
///
/// The column list may contain any input column in addition to the computed
/// ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectScan {
    pub input: Box<Scan>,
    pub exprs: Vec<ComputedColumn>,
    pub column_list: Vec<ResolvedColumn>,
    pub hints: Vec<Hint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupingSetItem {
    Set(Vec<ResolvedColumn>),
    /// Each element may group multiple columns, e.g. `ROLLUP((a, b), c)`.
    Rollup(Vec<Vec<ResolvedColumn>>),
    Cube(Vec<Vec<ResolvedColumn>>),
}

/// `GROUPING(<key>)` computed by an aggregate scan.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingCall {
    pub key_column: ResolvedColumn,
    pub output_column: ResolvedColumn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateScan {
    pub input: Box<Scan>,
    pub group_by: Vec<ComputedColumn>,
    pub aggregates: Vec<ComputedColumn>,
    /// Empty unless ROLLUP, CUBE, or GROUPING SETS were used.
    pub grouping_sets: Vec<GroupingSetItem>,
    pub grouping_calls: Vec<GroupingCall>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticScan {
    pub input: Box<Scan>,
    pub functions: Vec<ComputedColumn>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Full => write!(f, "FULL"),
            Self::Cross => write!(f, "CROSS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinScan {
    pub join_type: JoinType,
    pub left: Box<Scan>,
    pub right: Box<Scan>,
    pub condition: Option<Expression>,
    pub column_list: Vec<ResolvedColumn>,
}

/// Produces one row per array element.
///
/// With an input, the array expressions are evaluated per input row
/// (lateral join), otherwise they must be constant or correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayScan {
    pub input: Option<Box<Scan>>,
    pub array_exprs: Vec<Expression>,
    pub element_columns: Vec<ResolvedColumn>,
    pub offset_column: Option<ResolvedColumn>,
    /// LEFT JOIN semantics, input rows with empty arrays are kept.
    pub is_outer: bool,
    pub join_condition: Option<Expression>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expression,
    pub descending: bool,
    /// None if unspecified.
    pub nulls_first: Option<bool>,
}

impl fmt::Display for OrderByItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.descending {
            write!(f, " DESC")?;
        }
        match self.nulls_first {
            Some(true) => write!(f, " NULLS FIRST"),
            Some(false) => write!(f, " NULLS LAST"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByScan {
    pub input: Box<Scan>,
    pub items: Vec<OrderByItem>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitOffsetScan {
    pub input: Box<Scan>,
    pub limit: Option<Expression>,
    pub offset: Option<Expression>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperationType {
    UnionAll,
    UnionDistinct,
    IntersectAll,
    IntersectDistinct,
    ExceptAll,
    ExceptDistinct,
}

impl SetOperationType {
    pub fn is_distinct(&self) -> bool {
        matches!(
            self,
            Self::UnionDistinct | Self::IntersectDistinct | Self::ExceptDistinct
        )
    }

    pub fn is_except(&self) -> bool {
        matches!(self, Self::ExceptAll | Self::ExceptDistinct)
    }

    /// Table name used for the operation's output columns.
    pub fn column_table_name(&self) -> &'static str {
        match self {
            Self::UnionAll => "$union_all",
            Self::UnionDistinct => "$union_distinct",
            Self::IntersectAll => "$intersect_all",
            Self::IntersectDistinct => "$intersect_distinct",
            Self::ExceptAll => "$except_all",
            Self::ExceptDistinct => "$except_distinct",
        }
    }
}

impl fmt::Display for SetOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnionAll => write!(f, "UNION ALL"),
            Self::UnionDistinct => write!(f, "UNION DISTINCT"),
            Self::IntersectAll => write!(f, "INTERSECT ALL"),
            Self::IntersectDistinct => write!(f, "INTERSECT DISTINCT"),
            Self::ExceptAll => write!(f, "EXCEPT ALL"),
            Self::ExceptDistinct => write!(f, "EXCEPT DISTINCT"),
        }
    }
}

/// How set operation inputs were matched to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnMatchMode {
    ByPosition,
    Corresponding,
    CorrespondingBy,
}

/// Which columns a CORRESPONDING set operation keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnPropagationMode {
    Inner,
    Strict,
    Left,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperationItem {
    pub scan: Scan,
    /// Columns of `scan` matched positionally to the output columns.
    pub output_column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetOperationScan {
    pub op_type: SetOperationType,
    pub inputs: Vec<SetOperationItem>,
    pub column_match_mode: ColumnMatchMode,
    pub column_propagation_mode: ColumnPropagationMode,
    pub column_list: Vec<ResolvedColumn>,
}

/// Body of a recursive WITH entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecursiveScan {
    pub op_type: SetOperationType,
    pub non_recursive_term: Box<SetOperationItem>,
    pub recursive_term: Box<SetOperationItem>,
    pub column_list: Vec<ResolvedColumn>,
}

/// Reference to the recursive WITH entry currently being defined.
#[derive(Debug, Clone, PartialEq)]
pub struct RecursiveRefScan {
    pub unique_alias: String,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithEntry {
    pub unique_alias: String,
    pub scan: Scan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithScan {
    pub entries: Vec<WithEntry>,
    pub query: Box<Scan>,
    pub recursive: bool,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithRefScan {
    pub unique_alias: String,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotColumn {
    pub column: ResolvedColumn,
    pub aggregate_index: usize,
    pub value_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotScan {
    pub input: Box<Scan>,
    pub for_expr: Expression,
    pub pivot_values: Vec<Expression>,
    pub aggregates: Vec<Expression>,
    /// Input columns not used by the pivot, grouped implicitly.
    pub group_by: Vec<ComputedColumn>,
    pub pivot_columns: Vec<PivotColumn>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnpivotScan {
    pub input: Box<Scan>,
    pub value_columns: Vec<ResolvedColumn>,
    pub label_column: ResolvedColumn,
    pub label_list: Vec<ScalarValue>,
    /// One entry per column group, each with one column per value column.
    pub unpivot_args: Vec<Vec<ColumnExpr>>,
    /// Input columns passed through unchanged.
    pub projected_input_columns: Vec<ResolvedColumn>,
    pub include_nulls: bool,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleMethod {
    Bernoulli,
    System,
    Reservoir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleUnit {
    Percent,
    Rows,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleScan {
    pub input: Box<Scan>,
    pub method: SampleMethod,
    pub size: Expression,
    pub unit: SampleUnit,
    pub repeatable: Option<Expression>,
    pub column_list: Vec<ResolvedColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TvfArgument {
    Expr(Expression),
    Relation {
        scan: Scan,
        column_list: Vec<ResolvedColumn>,
    },
    Model(Arc<Model>),
    Connection(Arc<Connection>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TvfScan {
    pub function: Arc<TableFunction>,
    pub args: Vec<TvfArgument>,
    pub alias: String,
    pub column_list: Vec<ResolvedColumn>,
}

/// Scan of a relation passed as an argument to the enclosing table-valued
/// function body.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationArgumentScan {
    pub name: String,
    pub is_value_table: bool,
    pub column_list: Vec<ResolvedColumn>,
}

impl Scan {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SingleRow(_) => "SingleRowScan",
            Self::Table(_) => "TableScan",
            Self::Filter(_) => "FilterScan",
            Self::Project(_) => "ProjectScan",
            Self::Aggregate(_) => "AggregateScan",
            Self::Analytic(_) => "AnalyticScan",
            Self::Join(_) => "JoinScan",
            Self::Array(_) => "ArrayScan",
            Self::OrderBy(_) => "OrderByScan",
            Self::LimitOffset(_) => "LimitOffsetScan",
            Self::SetOperation(_) => "SetOperationScan",
            Self::Recursive(_) => "RecursiveScan",
            Self::RecursiveRef(_) => "RecursiveRefScan",
            Self::With(_) => "WithScan",
            Self::WithRef(_) => "WithRefScan",
            Self::Pivot(_) => "PivotScan",
            Self::Unpivot(_) => "UnpivotScan",
            Self::Sample(_) => "SampleScan",
            Self::Tvf(_) => "TvfScan",
            Self::RelationArgument(_) => "RelationArgumentScan",
        }
    }

    pub fn column_list(&self) -> &[ResolvedColumn] {
        match self {
            Self::SingleRow(_) => &[],
            Self::Table(s) => &s.column_list,
            Self::Filter(s) => &s.column_list,
            Self::Project(s) => &s.column_list,
            Self::Aggregate(s) => &s.column_list,
            Self::Analytic(s) => &s.column_list,
            Self::Join(s) => &s.column_list,
            Self::Array(s) => &s.column_list,
            Self::OrderBy(s) => &s.column_list,
            Self::LimitOffset(s) => &s.column_list,
            Self::SetOperation(s) => &s.column_list,
            Self::Recursive(s) => &s.column_list,
            Self::RecursiveRef(s) => &s.column_list,
            Self::With(s) => &s.column_list,
            Self::WithRef(s) => &s.column_list,
            Self::Pivot(s) => &s.column_list,
            Self::Unpivot(s) => &s.column_list,
            Self::Sample(s) => &s.column_list,
            Self::Tvf(s) => &s.column_list,
            Self::RelationArgument(s) => &s.column_list,
        }
    }

    /// Direct child scans, not including scans inside subquery expressions.
    pub fn children(&self) -> Vec<&Scan> {
        match self {
            Self::SingleRow(_)
            | Self::Table(_)
            | Self::RecursiveRef(_)
            | Self::WithRef(_)
            | Self::RelationArgument(_) => Vec::new(),
            Self::Filter(s) => vec![&s.input],
            Self::Project(s) => vec![&s.input],
            Self::Aggregate(s) => vec![&s.input],
            Self::Analytic(s) => vec![&s.input],
            Self::Join(s) => vec![&s.left, &s.right],
            Self::Array(s) => s.input.iter().map(|s| s.as_ref()).collect(),
            Self::OrderBy(s) => vec![&s.input],
            Self::LimitOffset(s) => vec![&s.input],
            Self::SetOperation(s) => s.inputs.iter().map(|item| &item.scan).collect(),
            Self::Recursive(s) => vec![&s.non_recursive_term.scan, &s.recursive_term.scan],
            Self::With(s) => {
                let mut children: Vec<&Scan> = s.entries.iter().map(|e| &e.scan).collect();
                children.push(&s.query);
                children
            }
            Self::Pivot(s) => vec![&s.input],
            Self::Unpivot(s) => vec![&s.input],
            Self::Sample(s) => vec![&s.input],
            Self::Tvf(s) => s
                .args
                .iter()
                .filter_map(|arg| match arg {
                    TvfArgument::Relation { scan, .. } => Some(scan),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Iterate over every expression held directly by this node.
    pub fn for_each_expr<'a, F>(&'a self, mut func: F) -> Result<()>
    where
        F: FnMut(&'a Expression) -> Result<()>,
    {
        let computed = |cols: &'a [ComputedColumn], func: &mut F| -> Result<()> {
            for col in cols {
                func(&col.expr)?;
            }
            Ok(())
        };

        match self {
            Self::Filter(s) => func(&s.predicate)?,
            Self::Project(s) => computed(&s.exprs, &mut func)?,
            Self::Aggregate(s) => {
                computed(&s.group_by, &mut func)?;
                computed(&s.aggregates, &mut func)?;
            }
            Self::Analytic(s) => computed(&s.functions, &mut func)?,
            Self::Join(s) => {
                if let Some(cond) = &s.condition {
                    func(cond)?;
                }
            }
            Self::Array(s) => {
                for expr in &s.array_exprs {
                    func(expr)?;
                }
                if let Some(cond) = &s.join_condition {
                    func(cond)?;
                }
            }
            Self::OrderBy(s) => {
                for item in &s.items {
                    func(&item.expr)?;
                }
            }
            Self::LimitOffset(s) => {
                if let Some(limit) = &s.limit {
                    func(limit)?;
                }
                if let Some(offset) = &s.offset {
                    func(offset)?;
                }
            }
            Self::Pivot(s) => {
                func(&s.for_expr)?;
                for expr in &s.pivot_values {
                    func(expr)?;
                }
                for expr in &s.aggregates {
                    func(expr)?;
                }
                computed(&s.group_by, &mut func)?;
            }
            Self::Sample(s) => {
                func(&s.size)?;
                if let Some(repeatable) = &s.repeatable {
                    func(repeatable)?;
                }
            }
            Self::Tvf(s) => {
                for arg in &s.args {
                    if let TvfArgument::Expr(expr) = arg {
                        func(expr)?;
                    }
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Walk this scan and all descendants depth first, including scans
    /// inside subquery expressions.
    pub fn walk<'a, F>(&'a self, func: &mut F) -> Result<()>
    where
        F: FnMut(&'a Scan) -> Result<()>,
    {
        func(self)?;
        let mut subqueries = Vec::new();
        self.for_each_expr(|expr| {
            expr.for_each_subquery(&mut |subquery| {
                subqueries.push(subquery.scan.as_ref());
                Ok(())
            })
        })?;
        for subquery in subqueries {
            subquery.walk(func)?;
        }
        for child in self.children() {
            child.walk(func)?;
        }
        Ok(())
    }
}
