use std::sync::Arc;

use hashbrown::HashMap;
use sqlbind_error::Location;
use sqlbind_parser::ast;

use super::name_scope::ValidFieldInfoMap;
use crate::expr::Expression;
use crate::ident::IdString;
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::{GroupingCall, GroupingSetItem};

/// Identity of an AST expression node, used to bind the same aggregate or
/// analytic call to the same column when it's resolved more than once.
pub type AstNodeId = usize;

pub fn ast_node_id(expr: &ast::Expr) -> AstNodeId {
    expr as *const ast::Expr as usize
}

/// How a bound select item got its output column.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumnProvenance {
    /// Produced by `*` or `x.*` expanding to a plain column.
    StarExpansion,
    /// Item is a GROUP BY key.
    GroupByKey,
    /// Item is a reference to an existing column.
    ColumnReference,
    /// Item is computed by the select projection.
    Computed(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumnResolution {
    /// Resolved against the FROM scope, still to be finalized.
    Pending(Expression),
    Bound {
        column: ResolvedColumn,
        provenance: SelectColumnProvenance,
    },
}

/// A single SELECT list item as it moves through the select pipeline.
#[derive(Debug, Clone)]
pub struct SelectColumnState<'ast> {
    /// Expression in the query text, None for items produced by star
    /// expansion.
    pub ast_expr: Option<&'ast ast::Expr>,
    pub alias: IdString,
    pub is_explicit: bool,
    pub has_aggregation: bool,
    pub has_analytic: bool,
    pub has_volatile: bool,
    pub is_group_by_column: bool,
    /// Expression from the first pass, resolved against the FROM scope.
    pub original_expr: Expression,
    pub resolution: SelectColumnResolution,
    /// Compute before HAVING since HAVING references this item by alias.
    pub needs_early_compute: bool,
    pub location: Location,
}

impl SelectColumnState<'_> {
    pub fn output_column(&self) -> Option<&ResolvedColumn> {
        match &self.resolution {
            SelectColumnResolution::Bound { column, .. } => Some(column),
            SelectColumnResolution::Pending(_) => None,
        }
    }

    pub fn is_star_expansion(&self) -> bool {
        self.ast_expr.is_none()
    }
}

/// Snapshot of the accumulator lengths, used to undo speculative binding.
#[derive(Debug, Clone, Copy)]
pub struct QueryResolutionCheckpoint {
    aggregates: usize,
    analytics: usize,
    grouping_calls: usize,
}

/// Accumulates everything resolved for a single SELECT before the scans are
/// built.
#[derive(Debug, Default)]
pub struct QueryResolutionInfo<'ast> {
    pub select_columns: Vec<SelectColumnState<'ast>>,
    /// Query has a GROUP BY clause, possibly `GROUP BY ()`.
    pub has_group_by: bool,
    /// GROUP BY keys are known, GROUPING calls may be bound.
    pub group_by_resolved: bool,
    pub group_by_keys: Vec<ComputedColumn>,
    pub grouping_sets: Vec<GroupingSetItem>,
    pub aggregates: Vec<ComputedColumn>,
    aggregate_map: HashMap<AstNodeId, ResolvedColumn>,
    pub analytics: Vec<ComputedColumn>,
    analytic_map: HashMap<AstNodeId, ResolvedColumn>,
    pub grouping_calls: Vec<GroupingCall>,
    grouping_call_map: HashMap<AstNodeId, ResolvedColumn>,
    /// Fields accessible after grouping.
    pub group_by_fields: Option<Arc<ValidFieldInfoMap>>,
    /// QUALIFY contains aggregation even though nothing else does.
    pub qualify_has_aggregation: bool,
    /// DISTINCT output column per select item.
    pub distinct_columns: Vec<ResolvedColumn>,
}

impl<'ast> QueryResolutionInfo<'ast> {
    pub fn new() -> Self {
        Self::default()
    }

    /// If this query produces an aggregate scan.
    pub fn has_group_by_or_aggregation(&self) -> bool {
        self.has_group_by
            || self.qualify_has_aggregation
            || !self.aggregates.is_empty()
            || self.select_columns.iter().any(|c| c.has_aggregation)
    }

    pub fn is_post_distinct(&self) -> bool {
        !self.distinct_columns.is_empty()
    }

    pub fn find_aggregate(&self, id: AstNodeId) -> Option<&ResolvedColumn> {
        self.aggregate_map.get(&id)
    }

    pub fn add_aggregate(&mut self, id: AstNodeId, computed: ComputedColumn) {
        self.aggregate_map.insert(id, computed.column.clone());
        self.aggregates.push(computed);
    }

    /// Find an already registered aggregate computing an equal expression,
    /// recording `id` as another occurrence of it.
    ///
    /// Volatile expressions never match.
    pub fn reuse_aggregate(&mut self, id: AstNodeId, expr: &Expression) -> Option<ResolvedColumn> {
        let column = find_equal(&self.aggregates, expr)?;
        self.aggregate_map.insert(id, column.clone());
        Some(column)
    }

    pub fn find_analytic(&self, id: AstNodeId) -> Option<&ResolvedColumn> {
        self.analytic_map.get(&id)
    }

    pub fn add_analytic(&mut self, id: AstNodeId, computed: ComputedColumn) {
        self.analytic_map.insert(id, computed.column.clone());
        self.analytics.push(computed);
    }

    /// Analytic counterpart of [`QueryResolutionInfo::reuse_aggregate`].
    pub fn reuse_analytic(&mut self, id: AstNodeId, expr: &Expression) -> Option<ResolvedColumn> {
        let column = find_equal(&self.analytics, expr)?;
        self.analytic_map.insert(id, column.clone());
        Some(column)
    }

    pub fn find_grouping_call(&self, id: AstNodeId) -> Option<&ResolvedColumn> {
        self.grouping_call_map.get(&id)
    }

    pub fn add_grouping_call(&mut self, id: AstNodeId, call: GroupingCall) {
        self.grouping_call_map.insert(id, call.output_column.clone());
        self.grouping_calls.push(call);
    }

    /// Find the GROUP BY key computing an equal expression.
    ///
    /// Volatile expressions never match.
    pub fn find_group_by_key(&self, expr: &Expression) -> Option<&ResolvedColumn> {
        if expr.is_volatile() {
            return None;
        }
        self.group_by_keys
            .iter()
            .find(|key| &key.expr == expr)
            .map(|key| &key.column)
    }

    /// Indices of select items whose non-internal alias matches `name`.
    pub fn find_select_aliases(&self, name: &IdString) -> Vec<usize> {
        self.select_columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.alias.is_internal() && &c.alias == name)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn checkpoint(&self) -> QueryResolutionCheckpoint {
        QueryResolutionCheckpoint {
            aggregates: self.aggregates.len(),
            analytics: self.analytics.len(),
            grouping_calls: self.grouping_calls.len(),
        }
    }

    /// Discard everything registered since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: QueryResolutionCheckpoint) {
        self.aggregates.truncate(checkpoint.aggregates);
        self.analytics.truncate(checkpoint.analytics);
        self.grouping_calls.truncate(checkpoint.grouping_calls);

        let aggregates = &self.aggregates;
        self.aggregate_map
            .retain(|_, col| aggregates.iter().any(|a| &a.column == col));
        let analytics = &self.analytics;
        self.analytic_map
            .retain(|_, col| analytics.iter().any(|a| &a.column == col));
        let calls = &self.grouping_calls;
        self.grouping_call_map
            .retain(|_, col| calls.iter().any(|c| &c.output_column == col));
    }
}

fn find_equal(columns: &[ComputedColumn], expr: &Expression) -> Option<ResolvedColumn> {
    if expr.is_volatile() {
        return None;
    }
    columns
        .iter()
        .find(|computed| &computed.expr == expr)
        .map(|computed| computed.column.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logical::column::ColumnFactory;
    use crate::types::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn rollback_removes_speculative_aggregates() {
        let mut factory = ColumnFactory::new();
        let a = factory.allocate("t", "a", DataType::Int64);
        let agg1 = factory.allocate("$aggregate", "$agg1", DataType::Int64);
        let agg2 = factory.allocate("$aggregate", "$agg2", DataType::Int64);

        let mut info = QueryResolutionInfo::new();
        info.add_aggregate(1, ComputedColumn::new(agg1.clone(), Expression::column(a.clone())));

        let checkpoint = info.checkpoint();
        info.add_aggregate(2, ComputedColumn::new(agg2, Expression::column(a)));
        assert!(info.find_aggregate(2).is_some());

        info.rollback(checkpoint);
        assert_eq!(1, info.aggregates.len());
        assert_eq!(Some(&agg1), info.find_aggregate(1));
        assert!(info.find_aggregate(2).is_none());
    }

    #[test]
    fn equal_aggregates_share_a_column() {
        let mut factory = ColumnFactory::new();
        let a = factory.allocate("t", "a", DataType::Int64);
        let agg1 = factory.allocate("$aggregate", "$agg1", DataType::Int64);
        let sum = Expression::Aggregate(crate::expr::AggregateExpr {
            name: "sum".to_string(),
            args: vec![Expression::column(a)],
            distinct: false,
            datatype: DataType::Int64,
        });

        let mut info = QueryResolutionInfo::new();
        assert!(info.reuse_aggregate(1, &sum).is_none());
        info.add_aggregate(1, ComputedColumn::new(agg1.clone(), sum.clone()));

        assert_eq!(Some(agg1.clone()), info.reuse_aggregate(2, &sum));
        assert_eq!(Some(&agg1), info.find_aggregate(2));
        assert_eq!(1, info.aggregates.len());
    }

    #[test]
    fn volatile_expressions_never_match() {
        let mut factory = ColumnFactory::new();
        let key = factory.allocate("$groupby", "r", DataType::Double);
        let rand = Expression::Function(crate::expr::FunctionExpr {
            name: "rand".to_string(),
            args: Vec::new(),
            datatype: DataType::Double,
            volatile: true,
        });

        let mut info = QueryResolutionInfo::new();
        info.group_by_keys.push(ComputedColumn::new(key.clone(), rand.clone()));
        assert!(info.find_group_by_key(&rand).is_none());

        info.add_analytic(1, ComputedColumn::new(key, rand.clone()));
        assert!(info.reuse_analytic(2, &rand).is_none());
    }
}
