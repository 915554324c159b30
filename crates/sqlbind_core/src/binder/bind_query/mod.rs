pub mod bind_cte;
pub mod bind_distinct;
pub mod bind_from;
pub mod bind_group_by;
pub mod bind_having;
pub mod bind_modifier;
pub mod bind_pivot;
pub mod bind_select;
pub mod bind_select_list;
pub mod bind_setop;

use std::sync::Arc;

use bind_cte::WithBinder;
use bind_select::SelectBinder;
use bind_setop::SetOpBinder;
use sqlbind_error::Result;
use sqlbind_parser::ast;

use super::context::AnalysisContext;
use super::name_list::NameList;
use super::name_scope::NameScope;
use crate::ident::IdString;
use crate::logical::column::ResolvedColumn;
use crate::logical::scan::Scan;
use crate::types::coercer::InputArgumentType;

/// A fully bound query.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub scan: Scan,
    /// Output names, one visible column per entry in `column_list`.
    pub names: Arc<NameList>,
    /// Output columns in order. May contain the same column more than once.
    pub column_list: Vec<ResolvedColumn>,
    /// Types of the output columns, including whether they're literals.
    pub column_types: Vec<InputArgumentType>,
    pub is_value_table: bool,
}

impl BoundQuery {
    pub fn column_names(&self) -> Vec<IdString> {
        self.names
            .visible_columns()
            .map(|named| named.name.clone())
            .collect()
    }
}

/// Binds a query.
///
/// `outer` is the scope of the enclosing query. Names resolved through it
/// are correlated references.
#[derive(Debug, Clone, Copy)]
pub struct QueryBinder<'s> {
    outer: &'s NameScope<'s>,
}

impl<'s> QueryBinder<'s> {
    pub fn new(outer: &'s NameScope<'s>) -> Self {
        QueryBinder { outer }
    }

    pub fn bind(&self, ctx: &mut AnalysisContext, query: &ast::QueryNode) -> Result<BoundQuery> {
        match &query.ctes {
            Some(ctes) => WithBinder::new(self.outer)
                .bind(ctx, ctes, |ctx| self.bind_body_with_modifiers(ctx, query)),
            None => self.bind_body_with_modifiers(ctx, query),
        }
    }

    fn bind_body_with_modifiers(
        &self,
        ctx: &mut AnalysisContext,
        query: &ast::QueryNode,
    ) -> Result<BoundQuery> {
        match &query.body {
            // SELECT handles its own modifiers since ORDER BY may reference
            // columns that aren't part of the output.
            ast::QueryNodeBody::Select(select) => SelectBinder::new(self.outer).bind(
                ctx,
                select,
                query.order_by.as_ref(),
                &query.limit,
            ),
            body => {
                let bound = self.bind_body(ctx, body)?;
                bind_modifier::bind_query_modifiers(
                    ctx,
                    self.outer,
                    bound,
                    query.order_by.as_ref(),
                    &query.limit,
                )
            }
        }
    }

    /// Bind a query body on its own, without ORDER BY or LIMIT.
    pub fn bind_body(
        &self,
        ctx: &mut AnalysisContext,
        body: &ast::QueryNodeBody,
    ) -> Result<BoundQuery> {
        match body {
            ast::QueryNodeBody::Select(select) => SelectBinder::new(self.outer).bind(
                ctx,
                select,
                None,
                &ast::LimitModifier {
                    limit: None,
                    offset: None,
                },
            ),
            ast::QueryNodeBody::Nested(query) => {
                ctx.nested(query.location, |ctx| self.bind(ctx, query))
            }
            ast::QueryNodeBody::Set(setop) => SetOpBinder::new(self.outer).bind(ctx, setop),
        }
    }
}

/// Columns with duplicates removed, keeping the first occurrence.
pub(crate) fn unique_columns<'a>(
    columns: impl IntoIterator<Item = &'a ResolvedColumn>,
) -> Vec<ResolvedColumn> {
    let mut out: Vec<ResolvedColumn> = Vec::new();
    for col in columns {
        if !out.contains(col) {
            out.push(col.clone());
        }
    }
    out
}
