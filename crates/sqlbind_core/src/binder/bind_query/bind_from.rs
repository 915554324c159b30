use std::sync::Arc;

use sqlbind_error::{Location, Result, SqlError};
use sqlbind_parser::ast;

use super::QueryBinder;
use super::bind_select::bind_hints;
use crate::binder::context::AnalysisContext;
use crate::binder::expr_binder::{ExprBindInfo, ExpressionBinder, RecursionContext, check_bool};
use crate::binder::name_list::{NameList, NameTarget};
use crate::binder::name_scope::NameScope;
use crate::catalog::{Table, TvfArgumentKind, TvfOutput};
use crate::expr::{Expression, ScalarValue};
use crate::ident::{IdString, did_you_mean};
use crate::logical::column::{ComputedColumn, ResolvedColumn};
use crate::logical::scan::{
    ArrayScan,
    JoinScan,
    JoinType,
    ProjectScan,
    RecursiveRefScan,
    RelationArgumentScan,
    SampleMethod,
    SampleScan,
    SampleUnit,
    Scan,
    TableScan,
    TvfArgument,
    TvfScan,
    WithRefScan,
};
use crate::types::DataType;
use crate::types::coercer::InputArgumentType;

/// A bound FROM item.
#[derive(Debug, Clone)]
pub struct BoundFrom {
    pub scan: Scan,
    pub names: Arc<NameList>,
}

/// Array expressions that a FROM item expands into rows.
#[derive(Debug)]
struct ArraySource {
    exprs: Vec<Expression>,
    element_names: Vec<IdString>,
    offset_name: Option<IdString>,
    location: Location,
}

/// Binds a FROM clause.
#[derive(Debug, Clone, Copy)]
pub struct FromBinder<'s> {
    pub(super) outer: &'s NameScope<'s>,
}

impl<'s> FromBinder<'s> {
    pub fn new(outer: &'s NameScope<'s>) -> Self {
        FromBinder { outer }
    }

    pub fn bind(&self, ctx: &mut AnalysisContext, from: &ast::FromNode) -> Result<BoundFrom> {
        let base = NameScope::with_previous(Arc::new(NameList::new()), self.outer, true);
        self.bind_node(ctx, from, &base)
    }

    /// Bind a single FROM item.
    ///
    /// `lateral` holds the names an array path or UNNEST may reference, the
    /// left side of the enclosing join if any followed by the outer query.
    pub(super) fn bind_node(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        if let Some(source) = self.array_source(ctx, from, lateral)? {
            return self.bind_array(ctx, source, None, JoinType::Cross, None, lateral);
        }

        match &from.body {
            ast::FromNodeBody::BaseTable(table) => self.bind_table_path(ctx, from, table),
            ast::FromNodeBody::Subquery(subquery) => {
                self.bind_subquery(ctx, &subquery.query, from.alias.as_ref(), from.location)
            }
            ast::FromNodeBody::TableFunction(function) => {
                self.bind_table_function(ctx, from, function)
            }
            ast::FromNodeBody::Join(join) => self.bind_join(ctx, join, lateral),
            ast::FromNodeBody::Pivot(pivot) => {
                self.bind_pivot(ctx, pivot, from.alias.as_ref(), from.location, lateral)
            }
            ast::FromNodeBody::Unpivot(unpivot) => {
                self.bind_unpivot(ctx, unpivot, from.alias.as_ref(), from.location, lateral)
            }
            ast::FromNodeBody::Sample(sample) => self.bind_sample(ctx, sample, lateral),
            ast::FromNodeBody::Unnest(_) => {
                Err(SqlError::internal("UNNEST should have been bound as an array"))
            }
        }
    }

    /// Returns the arrays produced by this item if it's an UNNEST or a path
    /// rooted at a name visible in `lateral`.
    fn array_source(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        lateral: &NameScope,
    ) -> Result<Option<ArraySource>> {
        match &from.body {
            ast::FromNodeBody::Unnest(unnest) => {
                let mut exprs = Vec::with_capacity(unnest.exprs.len());
                for expr in &unnest.exprs {
                    let bound = bind_array_expr(ctx, lateral, expr, "UNNEST")?;
                    if bound.datatype().array_element().is_none() {
                        return Err(SqlError::new(format!(
                            "Values referenced in UNNEST must be arrays. UNNEST contains expression of type {}",
                            bound.datatype()
                        ))
                        .at(expr.location));
                    }
                    exprs.push(bound);
                }

                let element_names = match (&from.alias, exprs.len()) {
                    (Some(alias), 1) => vec![IdString::from(alias)],
                    (Some(_), _) => {
                        return Err(SqlError::new(
                            "UNNEST with multiple arguments cannot have an alias",
                        )
                        .at(from.location));
                    }
                    (None, n) => (1..=n).map(|i| IdString::new(format!("$unnest{i}"))).collect(),
                };

                Ok(Some(ArraySource {
                    exprs,
                    element_names,
                    offset_name: offset_name(unnest.with_offset.as_ref()),
                    location: from.location,
                }))
            }
            ast::FromNodeBody::BaseTable(table) if table.reference.0.len() >= 2 => {
                let path = &table.reference.0;
                if lateral.resolve_path(&path[..1])?.is_none() {
                    return Ok(None);
                }

                let kind = ast::ExprKind::CompoundIdent(path.clone());
                let expr = ast::Expr::new(kind, path[0].location);
                let bound = bind_array_expr(ctx, lateral, &expr, "FROM clause")?;
                if bound.datatype().array_element().is_none() {
                    return Err(SqlError::new(format!(
                        "Values referenced in FROM clause must be arrays. {} has type {}",
                        table.reference,
                        bound.datatype()
                    ))
                    .at(from.location));
                }
                if !table.hints.is_empty() {
                    return Err(
                        SqlError::new("Hints are not allowed on array scans").at(from.location)
                    );
                }

                let name = match &from.alias {
                    Some(alias) => IdString::from(alias),
                    None => IdString::from(&path[path.len() - 1]),
                };
                Ok(Some(ArraySource {
                    exprs: vec![bound],
                    element_names: vec![name],
                    offset_name: offset_name(table.with_offset.as_ref()),
                    location: from.location,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Build an array scan, optionally joined to `input`.
    fn bind_array(
        &self,
        ctx: &mut AnalysisContext,
        source: ArraySource,
        input: Option<BoundFrom>,
        join_type: JoinType,
        condition: Option<&ast::Expr>,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        if source.exprs.len() > 1 {
            ctx.properties.has_multiway_unnest = true;
        }

        let mut names = match &input {
            Some(input) => (*input.names).clone(),
            None => NameList::new(),
        };
        names.set_value_table(false);

        let mut column_list = match &input {
            Some(input) => input.scan.column_list().to_vec(),
            None => Vec::new(),
        };

        let mut element_columns = Vec::with_capacity(source.exprs.len());
        for (expr, name) in source.exprs.iter().zip(&source.element_names) {
            let element_type = expr.datatype().array_element().cloned().unwrap_or(DataType::Int64);
            let column = ctx.allocate_column("$array", name.as_str(), element_type);
            if !name.is_internal() {
                names.add_column(name.clone(), column.clone(), true);
            }
            element_columns.push(column.clone());
            column_list.push(column);
        }

        let offset_column = match source.offset_name {
            Some(name) => {
                let column = ctx.allocate_column("$array_offset", name.as_str(), DataType::Int64);
                names.add_column(name, column.clone(), true);
                column_list.push(column.clone());
                Some(column)
            }
            None => None,
        };

        let names = Arc::new(names);
        let join_condition = match condition {
            Some(condition) => {
                let scope = NameScope::with_previous(names.clone(), lateral, false);
                Some(bind_join_condition(ctx, &scope, condition)?)
            }
            None => None,
        };

        let scan = Scan::Array(ArrayScan {
            input: input.map(|input| Box::new(input.scan)),
            array_exprs: source.exprs,
            element_columns,
            offset_column,
            is_outer: join_type == JoinType::Left,
            join_condition,
            column_list,
        });
        Ok(BoundFrom { scan, names })
    }

    fn bind_table_path(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        table: &ast::FromBaseTable,
    ) -> Result<BoundFrom> {
        let path = &table.reference.0;
        let alias = match &from.alias {
            Some(alias) => IdString::from(alias),
            None => IdString::from(table.reference.base()?),
        };

        if path.len() == 1 {
            let name = IdString::from(&path[0]);
            match ctx.find_named_subquery(&name) {
                Some(None) => {
                    return Err(SqlError::new(format!(
                        "Recursive reference to {name} is not allowed here"
                    ))
                    .at(from.location));
                }
                Some(Some(subquery)) => {
                    check_no_offset(table, from.location)?;
                    let mut column_list = Vec::with_capacity(subquery.column_list.len());
                    let mut names = NameList::new();
                    let named = subquery.names.visible_columns().collect::<Vec<_>>();
                    for (idx, col) in subquery.column_list.iter().enumerate() {
                        let new_col = ctx.allocate_column_with_collation(
                            subquery.unique_alias.as_str(),
                            col.name.as_str(),
                            col.datatype.clone(),
                            col.collation.clone(),
                        );
                        match named.get(idx) {
                            Some(named) if named.is_value_table_column => {
                                names.add_value_table_column(named.name.clone(), new_col.clone())
                            }
                            Some(named) => {
                                names.add_column(named.name.clone(), new_col.clone(), true)
                            }
                            None => names.add_column(col.name.as_str(), new_col.clone(), true),
                        }
                        column_list.push(new_col);
                    }
                    names.set_value_table(subquery.names.is_value_table());

                    let scan = if subquery.is_recursive {
                        Scan::RecursiveRef(RecursiveRefScan {
                            unique_alias: subquery.unique_alias.clone(),
                            column_list,
                        })
                    } else {
                        Scan::WithRef(WithRefScan {
                            unique_alias: subquery.unique_alias.clone(),
                            column_list,
                        })
                    };
                    return Ok(BoundFrom {
                        scan,
                        names: with_range_variable(names, alias)?,
                    });
                }
                None => (),
            }

            if let Some(relation) = ctx.relation_arguments.get(&name).cloned() {
                check_no_offset(table, from.location)?;
                let (names, column_list) = table_names(ctx, &relation, &relation.name);
                let scan = Scan::RelationArgument(RelationArgumentScan {
                    name: relation.name.clone(),
                    is_value_table: relation.is_value_table,
                    column_list,
                });
                return Ok(BoundFrom {
                    scan,
                    names: with_range_variable(names, alias)?,
                });
            }
        }

        let parts = table.reference.parts();
        if let Some(found) = ctx.catalog.find_table(&parts)? {
            check_no_offset(table, from.location)?;
            let hints = bind_hints(ctx, &table.hints)?;
            let (names, column_list) = table_names(ctx, &found, &found.name);
            let scan = Scan::Table(TableScan {
                table: found.clone(),
                alias: alias.to_string(),
                column_index_list: (0..column_list.len()).collect(),
                column_list,
                hints,
            });
            return Ok(BoundFrom {
                scan,
                names: with_range_variable(names, alias)?,
            });
        }

        if ctx.options.enable_table_path_prefix_match {
            if let Some(bound) = self.bind_table_prefix(ctx, from, table)? {
                return Ok(bound);
            }
        }

        let mut msg = format!(
            "Table not found: {}{}",
            table.reference,
            did_you_mean(ctx.catalog.suggest_table(&parts))
        );
        if path.len() == 1 && self.outer.contains_name(&IdString::from(&path[0])) {
            msg.push_str(&format!(
                "; {} is a name from an enclosing query, use a path like {}.<field> to access an array",
                path[0], path[0]
            ));
        }
        Err(SqlError::not_found(msg).at(from.location))
    }

    /// Match the longest prefix of the path against the catalog, treating
    /// the remainder as an array field path.
    fn bind_table_prefix(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        table: &ast::FromBaseTable,
    ) -> Result<Option<BoundFrom>> {
        let path = &table.reference.0;
        let parts = table.reference.parts();

        for prefix_len in (1..path.len()).rev() {
            let found = match ctx.catalog.find_table(&parts[..prefix_len])? {
                Some(found) => found,
                None => continue,
            };

            let table_alias = IdString::from(&path[prefix_len - 1]);
            let (names, column_list) = table_names(ctx, &found, &found.name);
            let names = with_range_variable(names, table_alias.clone())?;
            let input = BoundFrom {
                scan: Scan::Table(TableScan {
                    table: found.clone(),
                    alias: table_alias.to_string(),
                    column_index_list: (0..column_list.len()).collect(),
                    column_list,
                    hints: Vec::new(),
                }),
                names: names.clone(),
            };

            let scope = NameScope::new(names);
            let mut field_path = vec![path[prefix_len - 1].clone()];
            field_path.extend_from_slice(&path[prefix_len..]);
            let kind = ast::ExprKind::CompoundIdent(field_path);
            let expr = ast::Expr::new(kind, path[0].location);
            let bound = bind_array_expr(ctx, &scope, &expr, "FROM clause")?;
            if bound.datatype().array_element().is_none() {
                return Err(SqlError::new(format!(
                    "Values referenced in FROM clause must be arrays. {} has type {}",
                    table.reference,
                    bound.datatype()
                ))
                .at(from.location));
            }

            let element_name = match &from.alias {
                Some(alias) => IdString::from(alias),
                None => IdString::from(&path[path.len() - 1]),
            };
            let source = ArraySource {
                exprs: vec![bound],
                element_names: vec![element_name],
                offset_name: offset_name(table.with_offset.as_ref()),
                location: from.location,
            };
            let empty = NameScope::empty();
            let mut bound =
                self.bind_array(ctx, source, Some(input), JoinType::Cross, None, &empty)?;

            // Only the array element is visible.
            let mut names = NameList::new();
            for col in bound.names.columns() {
                if matches!(col.column.table_name.as_str(), "$array" | "$array_offset") {
                    names.add_named_column(col.clone());
                }
            }
            bound.names = Arc::new(names);
            return Ok(Some(bound));
        }

        Ok(None)
    }

    fn bind_subquery(
        &self,
        ctx: &mut AnalysisContext,
        query: &ast::QueryNode,
        alias: Option<&ast::Ident>,
        location: Location,
    ) -> Result<BoundFrom> {
        let bound = ctx.nested(location, |ctx| QueryBinder::new(self.outer).bind(ctx, query))?;

        let mut names = NameList::new();
        for named in bound.names.columns() {
            names.add_named_column(named.clone());
        }
        names.set_value_table(bound.is_value_table);

        let names = match alias {
            Some(alias) => with_range_variable(names, IdString::from(alias))?,
            None => Arc::new(names),
        };
        Ok(BoundFrom {
            scan: bound.scan,
            names,
        })
    }

    fn bind_join(
        &self,
        ctx: &mut AnalysisContext,
        join: &ast::FromJoin,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        let left = self.bind_node(ctx, &join.left, lateral)?;
        let join_type = match join.join_type {
            ast::JoinType::Cross | ast::JoinType::Comma => JoinType::Cross,
            ast::JoinType::Inner => JoinType::Inner,
            ast::JoinType::Left => JoinType::Left,
            ast::JoinType::Right => JoinType::Right,
            ast::JoinType::Full => JoinType::Full,
        };

        if matches!(join.join_type, ast::JoinType::Cross | ast::JoinType::Comma)
            && join.join_condition != ast::JoinCondition::None
        {
            return Err(SqlError::new(format!(
                "{} JOIN cannot have an ON or USING clause",
                join.join_type
            ))
            .at(join.right.location));
        }

        let right_lateral = NameScope::with_previous(left.names.clone(), lateral, false);
        if let Some(source) = self.array_source(ctx, &join.right, &right_lateral)? {
            if matches!(join_type, JoinType::Right | JoinType::Full) {
                return Err(SqlError::new(format!(
                    "Array scan is not allowed with {join_type} JOIN"
                ))
                .at(source.location));
            }
            let condition = match &join.join_condition {
                ast::JoinCondition::On(expr) => Some(expr),
                ast::JoinCondition::Using(_) => {
                    return Err(SqlError::new("USING is not supported with array scans")
                        .at(source.location));
                }
                ast::JoinCondition::None => None,
            };
            return self.bind_array(ctx, source, Some(left), join_type, condition, lateral);
        }

        let right = self.bind_node(ctx, &join.right, lateral)?;

        match &join.join_condition {
            ast::JoinCondition::On(expr) => {
                let mut names = (*left.names).clone();
                names
                    .merge_from(&right.names)
                    .map_err(|e| e.at(join.right.location))?;
                names.set_value_table(false);
                let names = Arc::new(names);

                let scope = NameScope::with_previous(names.clone(), lateral, false);
                let condition = bind_join_condition(ctx, &scope, expr)?;
                Ok(BoundFrom {
                    scan: join_scan(join_type, left.scan, right.scan, Some(condition)),
                    names,
                })
            }
            ast::JoinCondition::Using(columns) => {
                self.bind_using(ctx, join_type, left, right, columns)
            }
            ast::JoinCondition::None => {
                if join_type != JoinType::Cross {
                    return Err(SqlError::new(format!(
                        "{} JOIN must have an immediately following ON or USING clause",
                        join.join_type
                    ))
                    .at(join.right.location));
                }
                let mut names = (*left.names).clone();
                names
                    .merge_from(&right.names)
                    .map_err(|e| e.at(join.right.location))?;
                names.set_value_table(false);
                Ok(BoundFrom {
                    scan: join_scan(join_type, left.scan, right.scan, None),
                    names: Arc::new(names),
                })
            }
        }
    }

    fn bind_using(
        &self,
        ctx: &mut AnalysisContext,
        join_type: JoinType,
        left: BoundFrom,
        right: BoundFrom,
        using: &[ast::Ident],
    ) -> Result<BoundFrom> {
        let mut using_names: Vec<IdString> = Vec::with_capacity(using.len());
        let mut equalities = Vec::with_capacity(using.len());
        let mut representatives = Vec::with_capacity(using.len());
        let mut coalesced = Vec::new();

        for ident in using {
            let name = IdString::from(ident);
            if using_names.contains(&name) {
                return Err(SqlError::new(format!("Duplicate column {ident} in USING clause"))
                    .at(ident.location));
            }

            let left_col = using_side_column(&left.names, ident, "left")?;
            let right_col = using_side_column(&right.names, ident, "right")?;

            let types = [
                InputArgumentType::new(left_col.datatype.clone()),
                InputArgumentType::new(right_col.datatype.clone()),
            ];
            let supertype = match ctx.coercer.common_supertype(&types) {
                Some(supertype) if ctx.coercer.supports_grouping(&supertype) => supertype,
                _ => {
                    return Err(SqlError::new(format!(
                        "Column {ident} in USING has incompatible types on either side of the join: {} and {}",
                        left_col.datatype, right_col.datatype
                    ))
                    .at(ident.location));
                }
            };

            let left_expr = coerce_column(&left_col, &supertype);
            let right_expr = coerce_column(&right_col, &supertype);
            equalities.push(Expression::function(
                "$equal",
                vec![left_expr.clone(), right_expr.clone()],
                DataType::Bool,
            ));

            let representative = match join_type {
                JoinType::Right => right_col,
                JoinType::Full => {
                    let column =
                        ctx.allocate_column("$full_join", name.as_str(), supertype.clone());
                    coalesced.push(ComputedColumn::new(
                        column.clone(),
                        Expression::function("coalesce", vec![left_expr, right_expr], supertype),
                    ));
                    column
                }
                _ => left_col,
            };
            representatives.push(representative);
            using_names.push(name);
        }

        let condition = equalities
            .into_iter()
            .reduce(|acc, eq| Expression::function("$and", vec![acc, eq], DataType::Bool));

        let mut names = NameList::new();
        for (name, column) in using_names.iter().zip(&representatives) {
            names.add_column(name.clone(), column.clone(), true);
        }
        for side in [&left.names, &right.names] {
            for named in side.columns() {
                if !using_names.contains(&named.name) {
                    names.add_named_column(named.clone());
                }
            }
        }
        for side in [&left.names, &right.names] {
            for rv in side.range_variables() {
                names.add_range_variable(rv.name.clone(), rv.names.clone())?;
            }
        }

        let mut scan = join_scan(join_type, left.scan, right.scan, condition);
        if !coalesced.is_empty() {
            let mut column_list = scan.column_list().to_vec();
            column_list.extend(coalesced.iter().map(|c| c.column.clone()));
            scan = Scan::Project(ProjectScan {
                input: Box::new(scan),
                exprs: coalesced,
                column_list,
                hints: Vec::new(),
            });
        }

        Ok(BoundFrom {
            scan,
            names: Arc::new(names),
        })
    }

    fn bind_table_function(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        call: &ast::FromTableFunction,
    ) -> Result<BoundFrom> {
        let parts = call.reference.parts();
        let function = match ctx.catalog.find_table_function(&parts)? {
            Some(function) => function,
            None => {
                return Err(SqlError::not_found(format!(
                    "Table-valued function not found: {}{}",
                    call.reference,
                    did_you_mean(ctx.catalog.suggest_table_function(&parts))
                ))
                .at(from.location));
            }
        };

        let bound = self
            .bind_table_function_call(ctx, from, call, function.clone())
            .map_err(|e| {
                e.wrap(format!(
                    "Invalid call to table-valued function {}",
                    function.name
                ))
                .at(from.location)
            })?;
        Ok(bound)
    }

    fn bind_table_function_call(
        &self,
        ctx: &mut AnalysisContext,
        from: &ast::FromNode,
        call: &ast::FromTableFunction,
        function: Arc<crate::catalog::TableFunction>,
    ) -> Result<BoundFrom> {
        if call.args.len() != function.arguments.len() {
            return Err(SqlError::new(format!(
                "Table-valued function {} expects {} arguments, got {}",
                function.name,
                function.arguments.len(),
                call.args.len()
            )));
        }

        let scalar_scope = NameScope::with_previous(Arc::new(NameList::new()), self.outer, true);
        let mut args = Vec::with_capacity(call.args.len());
        let mut relation_names: Vec<Option<Arc<NameList>>> = Vec::with_capacity(call.args.len());

        for (idx, (arg, kind)) in call.args.iter().zip(&function.arguments).enumerate() {
            let position = idx + 1;
            let (bound, names) = match (kind, arg) {
                (TvfArgumentKind::Scalar(datatype), ast::TableFunctionArg::Expr(expr)) => {
                    let mut info = ExprBindInfo::new("table-valued function argument");
                    let bound = ExpressionBinder::new(&scalar_scope).bind_expression(
                        ctx,
                        expr,
                        &mut info,
                        RecursionContext::new(false, false),
                    )?;
                    let actual = bound.argument_type();
                    if !ctx.coercer.coerces_to(&actual, datatype, false) {
                        return Err(SqlError::new(format!(
                            "Argument {position} of {} must be of type {datatype}, got {}",
                            function.name, actual.datatype
                        ))
                        .at(expr.location));
                    }
                    let bound = if &actual.datatype == datatype {
                        bound
                    } else {
                        Expression::cast(bound, datatype.clone())
                    };
                    (TvfArgument::Expr(bound), None)
                }
                (TvfArgumentKind::Relation, ast::TableFunctionArg::Table(reference)) => {
                    let node = ast::FromNode {
                        alias: None,
                        body: ast::FromNodeBody::BaseTable(ast::FromBaseTable {
                            reference: reference.clone(),
                            hints: Vec::new(),
                            with_offset: None,
                        }),
                        location: reference.location(),
                    };
                    let bound = self.bind_node(ctx, &node, &scalar_scope)?;
                    let column_list = bound.scan.column_list().to_vec();
                    (
                        TvfArgument::Relation {
                            scan: bound.scan,
                            column_list,
                        },
                        Some(bound.names),
                    )
                }
                (TvfArgumentKind::Relation, ast::TableFunctionArg::Query(query)) => {
                    let bound = ctx.nested(query.location, |ctx| {
                        QueryBinder::new(self.outer).bind(ctx, query)
                    })?;
                    (
                        TvfArgument::Relation {
                            scan: bound.scan,
                            column_list: bound.column_list,
                        },
                        Some(bound.names),
                    )
                }
                (TvfArgumentKind::Model, ast::TableFunctionArg::Model(reference)) => {
                    let model = ctx.catalog.find_model(&reference.parts())?.ok_or_else(|| {
                        SqlError::not_found(format!("Model not found: {reference}"))
                            .at(reference.location())
                    })?;
                    (TvfArgument::Model(model), None)
                }
                (TvfArgumentKind::Connection, ast::TableFunctionArg::Connection(reference)) => {
                    let connection =
                        ctx.catalog.find_connection(&reference.parts())?.ok_or_else(|| {
                            SqlError::not_found(format!("Connection not found: {reference}"))
                                .at(reference.location())
                        })?;
                    (TvfArgument::Connection(connection), None)
                }
                (kind, _) => {
                    let expected = match kind {
                        TvfArgumentKind::Scalar(datatype) => format!("a scalar of type {datatype}"),
                        TvfArgumentKind::Relation => "a TABLE or query".to_string(),
                        TvfArgumentKind::Model => "a MODEL".to_string(),
                        TvfArgumentKind::Connection => "a CONNECTION".to_string(),
                    };
                    return Err(SqlError::new(format!(
                        "Argument {position} of {} must be {expected}",
                        function.name
                    )));
                }
            };
            args.push(bound);
            relation_names.push(names);
        }

        let alias = match &from.alias {
            Some(alias) => IdString::from(alias),
            None => IdString::from(call.reference.base()?),
        };

        let mut names = NameList::new();
        let mut column_list = Vec::new();
        match &function.output {
            TvfOutput::Fixed(columns) => {
                for col in columns {
                    let column = ctx.allocate_column_with_collation(
                        function.name.as_str(),
                        col.name.as_str(),
                        col.datatype.clone(),
                        col.collation.clone(),
                    );
                    names.add_column(col.name.as_str(), column.clone(), true);
                    column_list.push(column);
                }
            }
            TvfOutput::PassThrough(idx) => {
                let input = relation_names.get(*idx).cloned().flatten().ok_or_else(|| {
                    SqlError::internal(format!(
                        "Table-valued function {} passes through argument {idx} which is not a relation",
                        function.name
                    ))
                })?;
                for named in input.visible_columns() {
                    let column = ctx.allocate_column_with_collation(
                        function.name.as_str(),
                        named.name.as_str(),
                        named.column.datatype.clone(),
                        named.column.collation.clone(),
                    );
                    names.add_column(named.name.clone(), column.clone(), true);
                    column_list.push(column);
                }
            }
        }

        let scan = Scan::Tvf(TvfScan {
            function,
            args,
            alias: alias.to_string(),
            column_list,
        });
        Ok(BoundFrom {
            scan,
            names: with_range_variable(names, alias)?,
        })
    }

    fn bind_sample(
        &self,
        ctx: &mut AnalysisContext,
        sample: &ast::FromSample,
        lateral: &NameScope,
    ) -> Result<BoundFrom> {
        let input = self.bind_node(ctx, &sample.input, lateral)?;

        let method = match sample.method {
            ast::SampleMethod::Bernoulli => SampleMethod::Bernoulli,
            ast::SampleMethod::System => SampleMethod::System,
            ast::SampleMethod::Reservoir => SampleMethod::Reservoir,
        };
        let unit = match sample.unit {
            ast::SampleUnit::Percent => SampleUnit::Percent,
            ast::SampleUnit::Rows => SampleUnit::Rows,
        };
        match (method, unit) {
            (SampleMethod::Reservoir, SampleUnit::Percent) => {
                return Err(SqlError::new("RESERVOIR sampling requires ROWS")
                    .at(sample.size.location));
            }
            (SampleMethod::Bernoulli | SampleMethod::System, SampleUnit::Rows) => {
                return Err(SqlError::new(format!(
                    "{} sampling requires PERCENT",
                    match method {
                        SampleMethod::Bernoulli => "BERNOULLI",
                        _ => "SYSTEM",
                    }
                ))
                .at(sample.size.location));
            }
            _ => (),
        }

        let size = bind_constant(ctx, &sample.size, "TABLESAMPLE")?;
        match unit {
            SampleUnit::Percent => match literal_value(&size).and_then(ScalarValue::try_as_f64) {
                Some(percent) if (0.0..=100.0).contains(&percent) => (),
                _ => {
                    return Err(SqlError::new("PERCENT value must be in the range [0, 100]")
                        .at(sample.size.location));
                }
            },
            SampleUnit::Rows => match literal_value(&size).and_then(ScalarValue::try_as_i64) {
                Some(rows) if rows >= 0 => (),
                _ => {
                    return Err(SqlError::new("TABLESAMPLE ROWS requires a non-negative integer")
                        .at(sample.size.location));
                }
            },
        }

        let repeatable = match &sample.repeatable {
            Some(expr) => {
                let bound = bind_constant(ctx, expr, "REPEATABLE")?;
                match literal_value(&bound).and_then(ScalarValue::try_as_i64) {
                    Some(seed) if seed >= 0 => Some(bound),
                    _ => {
                        return Err(SqlError::new("REPEATABLE must be a non-negative integer")
                            .at(expr.location));
                    }
                }
            }
            None => None,
        };

        let column_list = input.scan.column_list().to_vec();
        Ok(BoundFrom {
            scan: Scan::Sample(SampleScan {
                input: Box::new(input.scan),
                method,
                size,
                unit,
                repeatable,
                column_list,
            }),
            names: input.names,
        })
    }
}

fn offset_name(with_offset: Option<&ast::WithOffset>) -> Option<IdString> {
    with_offset.map(|offset| match &offset.alias {
        Some(alias) => IdString::from(alias),
        None => IdString::new("offset"),
    })
}

fn check_no_offset(table: &ast::FromBaseTable, location: Location) -> Result<()> {
    match &table.with_offset {
        Some(offset) => Err(SqlError::new(format!(
            "WITH OFFSET can only be used with array scans, but {} is a table",
            table.reference
        ))
        .at(if offset.location.is_known() {
            offset.location
        } else {
            location
        })),
        None => Ok(()),
    }
}

/// Allocate columns for a table, returning its names without a range
/// variable.
fn table_names(
    ctx: &mut AnalysisContext,
    table: &Table,
    table_name: &str,
) -> (NameList, Vec<ResolvedColumn>) {
    let mut names = NameList::new();
    let mut column_list = Vec::with_capacity(table.columns.len());

    for col in &table.columns {
        let column = ctx.allocate_column_with_collation(
            table_name,
            col.name.as_str(),
            col.datatype.clone(),
            col.collation.clone(),
        );
        if col.is_pseudo {
            names.add_pseudo_column(col.name.as_str(), column.clone());
        } else if table.is_value_table {
            names.add_value_table_column(col.name.as_str(), column.clone());
        } else {
            names.add_column(col.name.as_str(), column.clone(), true);
        }
        column_list.push(column);
    }
    names.set_value_table(table.is_value_table);

    (names, column_list)
}

/// Add a range variable pointing at `names` to a copy of `names`.
pub(super) fn with_range_variable(names: NameList, alias: IdString) -> Result<Arc<NameList>> {
    let inner = Arc::new(names);
    let mut outer = (*inner).clone();
    outer.set_value_table(false);
    outer.add_range_variable(alias, inner)?;
    Ok(Arc::new(outer))
}

fn using_side_column(names: &NameList, ident: &ast::Ident, side: &str) -> Result<ResolvedColumn> {
    match names.lookup(&IdString::from(ident)) {
        Some(NameTarget::ExplicitColumn(col)) | Some(NameTarget::ImplicitColumn(col)) => Ok(col),
        Some(NameTarget::Ambiguous) => Err(SqlError::new(format!(
            "Column {ident} in USING clause is ambiguous on {side} side of join"
        ))
        .at(ident.location)),
        _ => Err(SqlError::new(format!(
            "Column {ident} in USING clause not found on {side} side of join"
        ))
        .at(ident.location)),
    }
}

fn coerce_column(column: &ResolvedColumn, to: &DataType) -> Expression {
    let expr = Expression::column(column.clone());
    if &column.datatype == to {
        expr
    } else {
        Expression::cast(expr, to.clone())
    }
}

fn join_scan(
    join_type: JoinType,
    left: Scan,
    right: Scan,
    condition: Option<Expression>,
) -> Scan {
    let mut column_list = left.column_list().to_vec();
    column_list.extend_from_slice(right.column_list());
    Scan::Join(JoinScan {
        join_type,
        left: Box::new(left),
        right: Box::new(right),
        condition,
        column_list,
    })
}

fn bind_join_condition(
    ctx: &mut AnalysisContext,
    scope: &NameScope,
    expr: &ast::Expr,
) -> Result<Expression> {
    let mut info = ExprBindInfo::new("ON clause");
    let bound = ExpressionBinder::new(scope).bind_expression(
        ctx,
        expr,
        &mut info,
        RecursionContext::new(false, false),
    )?;
    check_bool(&bound, "JOIN ON clause").map_err(|e| e.at(expr.location))?;
    Ok(bound)
}

fn bind_array_expr(
    ctx: &mut AnalysisContext,
    scope: &NameScope,
    expr: &ast::Expr,
    clause: &'static str,
) -> Result<Expression> {
    let mut info = ExprBindInfo::new(clause);
    ExpressionBinder::new(scope).bind_expression(
        ctx,
        expr,
        &mut info,
        RecursionContext::new(false, false),
    )
}

/// Bind an expression that may not reference any columns.
pub(super) fn bind_constant(
    ctx: &mut AnalysisContext,
    expr: &ast::Expr,
    clause: &'static str,
) -> Result<Expression> {
    let scope = NameScope::empty();
    let mut info = ExprBindInfo::new(clause);
    ExpressionBinder::new(&scope).bind_expression(
        ctx,
        expr,
        &mut info,
        RecursionContext::new(false, false),
    )
}

fn literal_value(expr: &Expression) -> Option<&ScalarValue> {
    match expr {
        Expression::Literal(lit) => Some(&lit.value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use sqlbind_error::ErrorKind;

    use super::*;
    use crate::config::AnalyzerOptions;
    use crate::testutil::{TestEnv, analyze, find_scan, strip_ids};
    use pretty_assertions::assert_eq;

    #[test]
    fn table_alias_and_range_variable() {
        let out = analyze("SELECT kv.key, value FROM KeyValue AS kv").unwrap();
        assert_eq!("key", out.output_columns[0].name);
        assert_eq!("KeyValue", out.output_columns[0].column.table_name);

        let err = analyze("SELECT KeyValue.key FROM KeyValue AS kv").unwrap_err();
        assert_eq!("Unrecognized name: KeyValue", err.message());
    }

    #[test]
    fn table_not_found_suggests() {
        let err = analyze("SELECT * FROM KeyValu").unwrap_err();
        assert_eq!(
            "Table not found: KeyValu; Did you mean KeyValue?",
            err.message()
        );
    }

    #[test]
    fn duplicate_alias_in_from() {
        let err = analyze("SELECT 1 FROM KeyValue, KeyValue").unwrap_err();
        assert_eq!(
            "Duplicate table alias KeyValue in the same FROM clause",
            err.message()
        );
    }

    #[test]
    fn join_on_requires_bool() {
        let err = analyze("SELECT 1 FROM KeyValue a JOIN KeyValue2 b ON a.key").unwrap_err();
        assert_eq!(
            "JOIN ON clause should return type BOOL, but returns INT64",
            err.message()
        );
    }

    #[test]
    fn inner_join_needs_condition() {
        let err = analyze("SELECT 1 FROM KeyValue a JOIN KeyValue2 b").unwrap_err();
        assert_eq!(
            "INNER JOIN must have an immediately following ON or USING clause",
            err.message()
        );
    }

    #[test]
    fn join_using_condition_and_names() {
        let out =
            analyze("SELECT key, a.value, b.value FROM KeyValue a JOIN KeyValue2 b USING (key)")
                .unwrap();
        match find_scan(&out.scan, "JoinScan") {
            Some(Scan::Join(join)) => {
                assert_eq!(
                    "$equal(KeyValue.Key, KeyValue2.Key)",
                    strip_ids(&join.condition.as_ref().unwrap().to_string())
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!("KeyValue", out.output_columns[0].column.table_name);

        let err = analyze("SELECT 1 FROM KeyValue a JOIN KeyValue2 b USING (nope)").unwrap_err();
        assert_eq!(
            "Column nope in USING clause not found on left side of join",
            err.message()
        );
    }

    #[test]
    fn full_join_using_coalesces() {
        let out = analyze("SELECT key FROM KeyValue a FULL JOIN KeyValue2 b USING (key)").unwrap();
        assert_eq!("$full_join", out.output_columns[0].column.table_name);
        match find_scan(&out.scan, "JoinScan") {
            Some(Scan::Join(join)) => assert_eq!(JoinType::Full, join.join_type),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn correlated_array_path() {
        let out = analyze("SELECT e FROM ComplexTypes t, t.Int32Array AS e WITH OFFSET").unwrap();
        match find_scan(&out.scan, "ArrayScan") {
            Some(Scan::Array(array)) => {
                assert!(array.input.is_some());
                assert!(array.offset_column.is_some());
                assert!(!array.is_outer);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!("$array", out.output_columns[0].column.table_name);
    }

    #[test]
    fn array_path_must_be_array() {
        let err = analyze("SELECT 1 FROM ComplexTypes t, t.TestStruct").unwrap_err();
        assert_eq!(
            "Values referenced in FROM clause must be arrays. t.TestStruct has type STRUCT<c INT64, d STRUCT<a INT64, b STRING>>",
            err.message()
        );
    }

    #[test]
    fn left_join_unnest_is_outer() {
        let out = analyze(
            "SELECT x, o FROM ComplexTypes t LEFT JOIN UNNEST(t.Int32Array) AS x WITH OFFSET o ON x > 1",
        )
        .unwrap();
        match find_scan(&out.scan, "ArrayScan") {
            Some(Scan::Array(array)) => {
                assert!(array.is_outer);
                assert!(array.join_condition.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!("$array_offset", out.output_columns[1].column.table_name);

        let err = analyze("SELECT 1 FROM ComplexTypes t RIGHT JOIN UNNEST(t.Int32Array) x ON TRUE")
            .unwrap_err();
        assert_eq!("Array scan is not allowed with RIGHT JOIN", err.message());
    }

    #[test]
    fn multiway_unnest_sets_property() {
        let out = analyze("SELECT 1 FROM UNNEST([1, 2], ['a'])").unwrap();
        assert!(out.properties.has_multiway_unnest);
        let out = analyze("SELECT x FROM UNNEST([1, 2]) AS x").unwrap();
        assert!(!out.properties.has_multiway_unnest);
    }

    #[test]
    fn parenthesized_join_cannot_see_left() {
        let err = analyze(
            "SELECT 1 FROM ComplexTypes t JOIN (KeyValue k CROSS JOIN t.Int32Array) ON TRUE",
        )
        .unwrap_err();
        assert_eq!("Table not found: t.Int32Array", err.message());
    }

    #[test]
    fn subquery_alias() {
        let out = analyze("SELECT s.k FROM (SELECT key AS k FROM KeyValue) AS s").unwrap();
        assert_eq!("k", out.output_columns[0].name);
    }

    #[test]
    fn value_table_fields() {
        let out = analyze("SELECT a, v.b FROM StructValueTable v").unwrap();
        assert_eq!(2, out.output_columns.len());
        assert_eq!("a", out.output_columns[0].name);
    }

    #[test]
    fn offset_on_table_is_error() {
        let err = analyze("SELECT 1 FROM KeyValue WITH OFFSET").unwrap_err();
        assert_eq!(
            "WITH OFFSET can only be used with array scans, but KeyValue is a table",
            err.message()
        );
    }

    #[test]
    fn table_valued_function() {
        let out = analyze("SELECT * FROM tvf_fixed(1, TABLE KeyValue)").unwrap();
        match find_scan(&out.scan, "TvfScan") {
            Some(Scan::Tvf(tvf)) => assert_eq!(2, tvf.args.len()),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!("out", out.output_columns[0].name);

        let out = analyze("SELECT key FROM tvf_passthrough((SELECT key FROM KeyValue))").unwrap();
        assert_eq!("key", out.output_columns[0].name);

        let err = analyze("SELECT * FROM tvf_fixed('a', TABLE KeyValue)").unwrap_err();
        assert_eq!(
            "Invalid call to table-valued function tvf_fixed",
            err.message()
        );

        let err = analyze("SELECT * FROM tvf_fixd(1)").unwrap_err();
        assert_eq!(
            "Table-valued function not found: tvf_fixd; Did you mean tvf_fixed?",
            err.message()
        );
    }

    #[test]
    fn tablesample_validation() {
        let out = analyze("SELECT key FROM KeyValue TABLESAMPLE BERNOULLI (10 PERCENT)").unwrap();
        assert!(find_scan(&out.scan, "SampleScan").is_some());

        let err = analyze("SELECT key FROM KeyValue TABLESAMPLE BERNOULLI (150 PERCENT)")
            .unwrap_err();
        assert_eq!("PERCENT value must be in the range [0, 100]", err.message());

        let err = analyze("SELECT key FROM KeyValue TABLESAMPLE RESERVOIR (10 PERCENT)")
            .unwrap_err();
        assert_eq!("RESERVOIR sampling requires ROWS", err.message());
    }

    #[test]
    fn pseudo_columns_not_in_star() {
        let out = analyze("SELECT * FROM Pseudo").unwrap();
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Visible", "Name"], names);
        assert_eq!(Some("und:ci"), out.output_columns[1].column.collation.as_deref());

        let out = analyze("SELECT Hidden FROM Pseudo").unwrap();
        assert_eq!("Hidden", out.output_columns[0].name);
    }

    #[test]
    fn table_path_prefix_match() {
        let sql = "SELECT e FROM ComplexTypes.Int32Array AS e";
        let err = analyze(sql).unwrap_err();
        assert!(err.message().starts_with("Table not found: ComplexTypes.Int32Array"));

        let env = TestEnv::with_options(AnalyzerOptions {
            enable_table_path_prefix_match: true,
            ..Default::default()
        });
        let out = env.analyze(sql).unwrap();
        assert_eq!("e", out.output_columns[0].name);
        assert_eq!(DataType::Int64, out.output_columns[0].column.datatype);
        assert!(find_scan(&out.scan, "ArrayScan").is_some());
    }

    #[test]
    fn model_and_connection_arguments() {
        let out = analyze(
            "SELECT prediction FROM tvf_predict(MODEL test_model, TABLE KeyValue, CONNECTION test_connection)",
        )
        .unwrap();
        match find_scan(&out.scan, "TvfScan") {
            Some(Scan::Tvf(tvf)) => {
                assert!(matches!(tvf.args[0], TvfArgument::Model(_)));
                assert!(matches!(tvf.args[2], TvfArgument::Connection(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let err = analyze(
            "SELECT 1 FROM tvf_predict(MODEL nope, TABLE KeyValue, CONNECTION test_connection)",
        )
        .unwrap_err();
        assert_eq!("Invalid call to table-valued function tvf_predict", err.message());
        assert_eq!(ErrorKind::NotFound, err.kind());
        let source = std::error::Error::source(&err)
            .and_then(|source| source.downcast_ref::<SqlError>())
            .unwrap();
        assert_eq!("Model not found: nope", source.message());
    }
}
