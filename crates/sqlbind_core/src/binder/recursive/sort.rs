use std::collections::BTreeSet;

use sqlbind_error::{Result, SqlError};
use sqlbind_parser::ast;
use tracing::debug;

use crate::binder::context::maybe_grow;
use crate::ident::IdString;

/// Binding order for the entries of a WITH clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortedWithEntries {
    /// Entry indices, each after every entry it references.
    pub order: Vec<usize>,
    /// Entries that reference themselves.
    pub self_recursive: BTreeSet<usize>,
}

/// Order WITH entries so that each comes after the entries it references.
///
/// Among entries that are ready at the same time the one declared first
/// wins. Self references are only allowed in a RECURSIVE clause, longer
/// cycles are always an error.
pub fn sort_with_entries(with: &ast::CommonTableExprDefs) -> Result<SortedWithEntries> {
    let aliases: Vec<IdString> =
        with.ctes.iter().map(|cte| IdString::from(&cte.alias)).collect();

    let mut self_recursive = BTreeSet::new();
    let mut dependencies: Vec<BTreeSet<usize>> = Vec::with_capacity(aliases.len());
    for (idx, cte) in with.ctes.iter().enumerate() {
        let mut refs = BTreeSet::new();
        ReferenceFinder::new(&aliases).query(&cte.body, &[], &mut refs);
        if refs.remove(&idx) {
            if !with.recursive {
                return Err(self_reference_error(&cte.alias).at(cte.location));
            }
            self_recursive.insert(idx);
        }
        dependencies.push(refs);
    }

    let mut order = Vec::with_capacity(aliases.len());
    let mut emitted = vec![false; aliases.len()];
    while order.len() < aliases.len() {
        let ready = (0..aliases.len())
            .find(|&idx| !emitted[idx] && dependencies[idx].iter().all(|dep| emitted[*dep]));
        match ready {
            Some(idx) => {
                emitted[idx] = true;
                order.push(idx);
            }
            None => {
                let cycle = find_cycle(&dependencies, &emitted);
                let names: Vec<String> =
                    cycle.iter().map(|idx| aliases[*idx].to_string()).collect();
                let location = cycle
                    .first()
                    .map(|idx| with.ctes[*idx].location)
                    .unwrap_or_default();
                return Err(SqlError::new(format!(
                    "Unsupported WITH entry dependency cycle: {}",
                    names.join(" => ")
                ))
                .at(location));
            }
        }
    }

    debug!(
        order = ?order.iter().map(|idx| aliases[*idx].as_str()).collect::<Vec<_>>(),
        "sorted WITH entries"
    );

    Ok(SortedWithEntries {
        order,
        self_recursive,
    })
}

fn self_reference_error(alias: &ast::Ident) -> SqlError {
    SqlError::new(format!(
        "WITH entry {alias} references itself, which requires WITH RECURSIVE"
    ))
}

/// Walk dependencies from the lowest unsorted entry until an entry repeats.
///
/// Every unsorted entry has at least one unsorted dependency, so the walk
/// always finds a cycle. The first entry is repeated at the end.
fn find_cycle(dependencies: &[BTreeSet<usize>], emitted: &[bool]) -> Vec<usize> {
    let mut path: Vec<usize> = Vec::new();
    let mut current = (0..emitted.len()).find(|idx| !emitted[*idx]);
    while let Some(idx) = current {
        if let Some(start) = path.iter().position(|p| *p == idx) {
            let mut cycle = path.split_off(start);
            cycle.push(idx);
            return cycle;
        }
        path.push(idx);
        current = dependencies[idx].iter().copied().find(|dep| !emitted[*dep]);
    }
    path
}

/// Finds unshadowed single-part table references to a set of aliases.
#[derive(Debug, Clone, Copy)]
struct ReferenceFinder<'a> {
    aliases: &'a [IdString],
}

impl<'a> ReferenceFinder<'a> {
    fn new(aliases: &'a [IdString]) -> Self {
        ReferenceFinder { aliases }
    }

    fn query(&self, query: &ast::QueryNode, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        maybe_grow(|| self.query_inner(query, shadowed, out))
    }

    fn query_inner(
        &self,
        query: &ast::QueryNode,
        shadowed: &[IdString],
        out: &mut BTreeSet<usize>,
    ) {
        let mut shadowed = shadowed.to_vec();
        if let Some(ctes) = &query.ctes {
            if ctes.recursive {
                shadowed.extend(ctes.ctes.iter().map(|cte| IdString::from(&cte.alias)));
            }
            for cte in &ctes.ctes {
                self.query(&cte.body, &shadowed, out);
                if !ctes.recursive {
                    shadowed.push(IdString::from(&cte.alias));
                }
            }
        }

        self.body(&query.body, &shadowed, out);
        if let Some(order_by) = &query.order_by {
            for node in &order_by.order_by_nodes {
                self.expr(&node.expr, &shadowed, out);
            }
        }
        for expr in [&query.limit.limit, &query.limit.offset].into_iter().flatten() {
            self.expr(expr, &shadowed, out);
        }
    }

    fn body(&self, body: &ast::QueryNodeBody, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        match body {
            ast::QueryNodeBody::Select(select) => self.select(select, shadowed, out),
            ast::QueryNodeBody::Nested(query) => self.query(query, shadowed, out),
            ast::QueryNodeBody::Set(setop) => {
                self.body(&setop.left, shadowed, out);
                self.body(&setop.right, shadowed, out);
            }
        }
    }

    fn select(&self, select: &ast::SelectNode, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        if let Some(from) = &select.from {
            self.from(from, shadowed, out);
        }
        for projection in &select.projections {
            match projection {
                ast::SelectExpr::Expr(expr) | ast::SelectExpr::AliasedExpr(expr, _) => {
                    self.expr(expr, shadowed, out)
                }
                ast::SelectExpr::Wildcard(wildcard)
                | ast::SelectExpr::QualifiedWildcard(_, wildcard) => {
                    for replace in &wildcard.replace_cols {
                        self.expr(&replace.expr, shadowed, out);
                    }
                }
            }
        }
        for expr in [&select.where_expr, &select.having, &select.qualify]
            .into_iter()
            .flatten()
        {
            self.expr(expr, shadowed, out);
        }
        if let Some(ast::GroupByNode::Exprs { exprs }) = &select.group_by {
            for group in exprs {
                match group {
                    ast::GroupByExpr::Expr(expr) => self.expr(expr, shadowed, out),
                    ast::GroupByExpr::Empty(_) => (),
                    ast::GroupByExpr::Rollup(elements, _)
                    | ast::GroupByExpr::Cube(elements, _) => {
                        for expr in elements.iter().flat_map(|e| e.exprs()) {
                            self.expr(expr, shadowed, out);
                        }
                    }
                    ast::GroupByExpr::GroupingSets(sets, _) => {
                        for set in sets {
                            let exprs: Vec<&ast::Expr> = match set {
                                ast::GroupingSet::Set(exprs) => exprs.iter().collect(),
                                ast::GroupingSet::Rollup(elements)
                                | ast::GroupingSet::Cube(elements) => {
                                    elements.iter().flat_map(|e| e.exprs()).collect()
                                }
                            };
                            for expr in exprs {
                                self.expr(expr, shadowed, out);
                            }
                        }
                    }
                }
            }
        }
    }

    fn from(&self, from: &ast::FromNode, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        match &from.body {
            ast::FromNodeBody::BaseTable(table) => self.table(&table.reference, shadowed, out),
            ast::FromNodeBody::Subquery(subquery) => self.query(&subquery.query, shadowed, out),
            ast::FromNodeBody::TableFunction(function) => {
                for arg in &function.args {
                    match arg {
                        ast::TableFunctionArg::Expr(expr) => self.expr(expr, shadowed, out),
                        ast::TableFunctionArg::Table(reference) => {
                            self.table(reference, shadowed, out)
                        }
                        ast::TableFunctionArg::Query(query) => self.query(query, shadowed, out),
                        ast::TableFunctionArg::Model(_)
                        | ast::TableFunctionArg::Connection(_) => (),
                    }
                }
            }
            ast::FromNodeBody::Unnest(unnest) => {
                for expr in &unnest.exprs {
                    self.expr(expr, shadowed, out);
                }
            }
            ast::FromNodeBody::Join(join) => {
                self.from(&join.left, shadowed, out);
                self.from(&join.right, shadowed, out);
                if let ast::JoinCondition::On(expr) = &join.join_condition {
                    self.expr(expr, shadowed, out);
                }
            }
            ast::FromNodeBody::Pivot(pivot) => {
                self.from(&pivot.input, shadowed, out);
                for agg in &pivot.aggregates {
                    self.expr(&agg.expr, shadowed, out);
                }
                self.expr(&pivot.for_expr, shadowed, out);
            }
            ast::FromNodeBody::Unpivot(unpivot) => self.from(&unpivot.input, shadowed, out),
            ast::FromNodeBody::Sample(sample) => self.from(&sample.input, shadowed, out),
        }
    }

    fn table(
        &self,
        reference: &ast::ObjectReference,
        shadowed: &[IdString],
        out: &mut BTreeSet<usize>,
    ) {
        if let [ident] = reference.0.as_slice() {
            let name = IdString::from(ident);
            if shadowed.contains(&name) {
                return;
            }
            if let Some(idx) = self.aliases.iter().position(|alias| alias == &name) {
                out.insert(idx);
            }
        }
    }

    fn expr(&self, expr: &ast::Expr, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        maybe_grow(|| self.expr_inner(expr, shadowed, out))
    }

    fn expr_inner(&self, expr: &ast::Expr, shadowed: &[IdString], out: &mut BTreeSet<usize>) {
        use ast::ExprKind;

        let mut each = |expr: &ast::Expr| self.expr(expr, shadowed, out);
        match &expr.kind {
            ExprKind::Ident(_)
            | ExprKind::CompoundIdent(_)
            | ExprKind::Literal(_)
            | ExprKind::TypedString { .. } => (),
            ExprKind::UnaryExpr { expr, .. }
            | ExprKind::IsNull { expr, .. }
            | ExprKind::Cast { expr, .. }
            | ExprKind::Collate { expr, .. }
            | ExprKind::FieldAccess { expr, .. } => each(expr),
            ExprKind::BinaryExpr { left, right, .. } => {
                each(left);
                each(right);
            }
            ExprKind::Between {
                expr, low, high, ..
            } => {
                each(expr);
                each(low);
                each(high);
            }
            ExprKind::InList { expr, list, .. } => {
                each(expr);
                list.iter().for_each(each);
            }
            ExprKind::Like { expr, pattern, .. } => {
                each(expr);
                each(pattern);
            }
            ExprKind::Subscript { expr, subscript } => {
                each(expr);
                each(subscript);
            }
            ExprKind::Function(function) => {
                for arg in &function.args {
                    if let ast::FunctionArg::Expr(expr) = arg {
                        each(expr);
                    }
                }
                if let Some(window) = &function.over {
                    window.partition_by.iter().for_each(&mut each);
                    for node in &window.order_by {
                        each(&node.expr);
                    }
                }
            }
            ExprKind::Case {
                operand,
                conditions,
                results,
                else_expr,
            } => {
                operand.iter().for_each(|e| each(e));
                conditions.iter().for_each(&mut each);
                results.iter().for_each(&mut each);
                else_expr.iter().for_each(|e| each(e));
            }
            ExprKind::Tuple(exprs) | ExprKind::Array(exprs) => exprs.iter().for_each(each),
            ExprKind::Struct(fields) => {
                for field in fields {
                    each(&field.expr);
                }
            }
            ExprKind::InSubquery { expr, subquery, .. } => {
                each(expr);
                self.query(subquery, shadowed, out);
            }
            ExprKind::Subquery(query)
            | ExprKind::Exists(query)
            | ExprKind::ArraySubquery(query) => self.query(query, shadowed, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::parse_query;
    use pretty_assertions::assert_eq;

    fn sort(sql: &str) -> Result<SortedWithEntries> {
        let query = parse_query(sql);
        sort_with_entries(query.ctes.as_ref().unwrap())
    }

    #[test]
    fn dependencies_come_first() {
        let sorted = sort(
            "WITH RECURSIVE c AS (SELECT * FROM b), b AS (SELECT * FROM a), a AS (SELECT 1) SELECT 1",
        )
        .unwrap();
        assert_eq!(vec![2, 1, 0], sorted.order);
        assert!(sorted.self_recursive.is_empty());
    }

    #[test]
    fn ties_keep_declaration_order() {
        let sorted = sort(
            "WITH RECURSIVE x AS (SELECT * FROM z), y AS (SELECT 1), z AS (SELECT 2) SELECT 1",
        )
        .unwrap();
        assert_eq!(vec![1, 2, 0], sorted.order);
    }

    #[test]
    fn references_inside_subqueries() {
        let sorted = sort(
            "WITH RECURSIVE a AS (SELECT (SELECT COUNT(*) FROM b) AS n), b AS (SELECT 1) SELECT 1",
        )
        .unwrap();
        assert_eq!(vec![1, 0], sorted.order);
    }

    #[test]
    fn shadowed_references_ignored() {
        let sorted = sort(
            "WITH RECURSIVE a AS (WITH b AS (SELECT 2) SELECT * FROM b), b AS (SELECT * FROM a) SELECT 1",
        )
        .unwrap();
        assert_eq!(vec![0, 1], sorted.order);
    }

    #[test]
    fn self_reference() {
        let sorted =
            sort("WITH RECURSIVE t AS (SELECT 1 UNION ALL SELECT * FROM t) SELECT 1").unwrap();
        assert_eq!(vec![0], sorted.order);
        assert_eq!(BTreeSet::from([0]), sorted.self_recursive);

        let err = sort("WITH t AS (SELECT 1 UNION ALL SELECT * FROM t) SELECT 1").unwrap_err();
        assert_eq!(
            "WITH entry t references itself, which requires WITH RECURSIVE",
            err.message()
        );
    }

    #[test]
    fn mutual_recursion_is_a_cycle() {
        for recursive in ["", "RECURSIVE "] {
            let err = sort(&format!(
                "WITH {recursive}a AS (SELECT * FROM b), b AS (SELECT * FROM a) SELECT 1"
            ))
            .unwrap_err();
            assert_eq!("Unsupported WITH entry dependency cycle: a => b => a", err.message());
        }
    }
}
