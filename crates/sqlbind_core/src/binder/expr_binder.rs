use sqlbind_error::{Location, OptionExt, Result, SqlError};
use sqlbind_parser::ast;

use super::bind_query::QueryBinder;
use super::context::AnalysisContext;
use super::name_list::NameList;
use super::name_scope::{NameScope, PathTarget};
use super::query_resolution_info::{
    QueryResolutionInfo,
    SelectColumnProvenance,
    SelectColumnResolution,
    ast_node_id,
};
use crate::expr::{
    AggregateExpr,
    AnalyticExpr,
    CastExpr,
    CollateExpr,
    ColumnExpr,
    Expression,
    FunctionExpr,
    GetFieldExpr,
    MakeStructExpr,
    ScalarValue,
    SubqueryExpr,
    SubqueryKind,
};
use crate::functions::{FunctionKind, FunctionSignature};
use crate::ident::{IdString, did_you_mean};
use crate::logical::column::ComputedColumn;
use crate::logical::scan::{GroupingCall, OrderByItem};
use crate::types::{DataType, FieldLookup, StructField};

/// How SELECT list aliases can be referenced from an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasMode {
    /// Aliases aren't visible.
    None,
    /// Aliases resolve to the items' first pass expressions. Used when
    /// checking an expression for aggregation before the query shape is
    /// known.
    FirstPass,
    /// Like `FirstPass`, but only for names not found in the scope. Used for
    /// aggregate arguments once grouping is known.
    PreGroup,
    /// Aliases take precedence over the scope and resolve to the items'
    /// output columns.
    PostGroup { allow_analytic: bool },
    /// Aliases resolve to the DISTINCT output columns.
    PostDistinct,
}

/// Flags inherited by every child of the expression being bound.
#[derive(Debug, Clone, Copy)]
pub struct RecursionContext {
    pub allow_aggregates: bool,
    pub allow_windows: bool,
    /// Currently inside the arguments of an aggregate function.
    pub in_aggregate_args: bool,
}

impl RecursionContext {
    pub const fn new(allow_aggregates: bool, allow_windows: bool) -> Self {
        RecursionContext {
            allow_aggregates,
            allow_windows,
            in_aggregate_args: false,
        }
    }
}

/// Per-expression binding state, including what was found while binding.
#[derive(Debug)]
pub struct ExprBindInfo<'i, 'ast> {
    /// Clause used in error messages, e.g. "WHERE clause".
    pub clause: &'static str,
    /// Where aggregate and analytic calls are registered. Without it
    /// aggregates stay inline in the returned expression.
    pub query_info: Option<&'i mut QueryResolutionInfo<'ast>>,
    /// Scope for aggregate arguments when it differs from the expression's
    /// own scope, e.g. the FROM scope after grouping.
    pub aggregate_scope: Option<&'i NameScope<'i>>,
    pub alias_mode: AliasMode,
    /// Register analytic calls as columns. Otherwise they're returned
    /// inline.
    pub register_analytic: bool,
    /// Referencing a computed select item by alias marks it for computation
    /// before HAVING.
    pub mark_early_compute: bool,

    pub has_aggregation: bool,
    pub has_analytic: bool,
    pub has_volatile: bool,
}

impl<'i, 'ast> ExprBindInfo<'i, 'ast> {
    pub fn new(clause: &'static str) -> Self {
        ExprBindInfo {
            clause,
            query_info: None,
            aggregate_scope: None,
            alias_mode: AliasMode::None,
            register_analytic: false,
            mark_early_compute: false,
            has_aggregation: false,
            has_analytic: false,
            has_volatile: false,
        }
    }

    pub fn with_query_info(mut self, query_info: &'i mut QueryResolutionInfo<'ast>) -> Self {
        self.query_info = Some(query_info);
        self
    }

    pub fn with_aggregate_scope(mut self, scope: &'i NameScope<'i>) -> Self {
        self.aggregate_scope = Some(scope);
        self
    }

    pub fn with_alias_mode(mut self, mode: AliasMode) -> Self {
        self.alias_mode = mode;
        self
    }

    pub fn with_register_analytic(mut self) -> Self {
        self.register_analytic = true;
        self
    }

    pub fn with_mark_early_compute(mut self) -> Self {
        self.mark_early_compute = true;
        self
    }
}

/// Binds AST expressions against a name scope.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionBinder<'s> {
    scope: &'s NameScope<'s>,
}

impl<'s> ExpressionBinder<'s> {
    pub fn new(scope: &'s NameScope<'s>) -> Self {
        ExpressionBinder { scope }
    }

    pub fn bind_expression<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        expr: &'ast ast::Expr,
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        ctx.nested_expression(expr.location, |ctx| {
            self.bind_expression_inner(ctx, expr, info, recur)
        })
        .map_err(|e| e.at(expr.location))
    }

    fn bind_expression_inner<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        expr: &'ast ast::Expr,
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        match &expr.kind {
            ast::ExprKind::Ident(ident) => {
                self.bind_path(ctx, std::slice::from_ref(ident), info)
            }
            ast::ExprKind::CompoundIdent(idents) => self.bind_path(ctx, idents, info),
            ast::ExprKind::Literal(literal) => bind_literal(literal),
            ast::ExprKind::TypedString { datatype, value } => {
                let datatype = DataType::from_ast(datatype);
                let value = ScalarValue::parse_typed(&datatype, value)?;
                Ok(Expression::literal(value, datatype))
            }
            ast::ExprKind::UnaryExpr { op, expr: child } => match op {
                ast::UnaryOperator::Minus => {
                    if let ast::ExprKind::Literal(ast::Literal::Number(n)) = &child.kind {
                        return bind_number(&format!("-{n}"));
                    }
                    let child = self.bind_expression(ctx, child, info, recur)?;
                    self.call_function(ctx, "$unary_minus", vec![child], info)
                }
                ast::UnaryOperator::Plus => {
                    let child = self.bind_expression(ctx, child, info, recur)?;
                    let datatype = child.datatype();
                    if !datatype.is_numeric() && !child.is_untyped_null() {
                        return Err(SqlError::new(format!(
                            "No matching signature for operator unary + for argument types: {datatype}"
                        )));
                    }
                    Ok(child)
                }
                ast::UnaryOperator::Not => {
                    let child = self.bind_expression(ctx, child, info, recur)?;
                    self.call_function(ctx, "$not", vec![child], info)
                }
            },
            ast::ExprKind::BinaryExpr { left, op, right } => {
                let left = self.bind_expression(ctx, left, info, recur)?;
                let right = self.bind_expression(ctx, right, info, recur)?;
                let name = match op {
                    ast::BinaryOperator::Plus => "$add",
                    ast::BinaryOperator::Minus => "$subtract",
                    ast::BinaryOperator::Multiply => "$multiply",
                    ast::BinaryOperator::Divide => "$divide",
                    ast::BinaryOperator::Modulo => "$mod",
                    ast::BinaryOperator::StringConcat => "$concat",
                    ast::BinaryOperator::Gt => "$greater",
                    ast::BinaryOperator::Lt => "$less",
                    ast::BinaryOperator::GtEq => "$greater_or_equal",
                    ast::BinaryOperator::LtEq => "$less_or_equal",
                    ast::BinaryOperator::Eq => "$equal",
                    ast::BinaryOperator::NotEq => "$not_equal",
                    ast::BinaryOperator::And => "$and",
                    ast::BinaryOperator::Or => "$or",
                };
                self.call_function(ctx, name, vec![left, right], info)
            }
            ast::ExprKind::IsNull {
                expr: child,
                negated,
            } => {
                let child = self.bind_expression(ctx, child, info, recur)?;
                let is_null = self.call_function(ctx, "$is_null", vec![child], info)?;
                self.maybe_negate(ctx, is_null, *negated, info)
            }
            ast::ExprKind::Between {
                expr: child,
                low,
                high,
                negated,
            } => {
                let args = vec![
                    self.bind_expression(ctx, child, info, recur)?,
                    self.bind_expression(ctx, low, info, recur)?,
                    self.bind_expression(ctx, high, info, recur)?,
                ];
                let between = self.call_function(ctx, "$between", args, info)?;
                self.maybe_negate(ctx, between, *negated, info)
            }
            ast::ExprKind::InList {
                expr: child,
                list,
                negated,
            } => {
                let mut args = vec![self.bind_expression(ctx, child, info, recur)?];
                for item in list {
                    args.push(self.bind_expression(ctx, item, info, recur)?);
                }
                let in_list = self.call_function(ctx, "$in", args, info)?;
                self.maybe_negate(ctx, in_list, *negated, info)
            }
            ast::ExprKind::InSubquery {
                expr: child,
                subquery,
                negated,
            } => {
                let lhs = self.bind_expression(ctx, child, info, recur)?;
                let in_subquery = self.bind_subquery(
                    ctx,
                    subquery,
                    SubqueryKind::In(Box::new(lhs)),
                    expr.location,
                )?;
                self.maybe_negate(ctx, in_subquery, *negated, info)
            }
            ast::ExprKind::Like {
                expr: child,
                pattern,
                negated,
            } => {
                let args = vec![
                    self.bind_expression(ctx, child, info, recur)?,
                    self.bind_expression(ctx, pattern, info, recur)?,
                ];
                let like = self.call_function(ctx, "$like", args, info)?;
                self.maybe_negate(ctx, like, *negated, info)
            }
            ast::ExprKind::Function(func) => self.bind_function(ctx, expr, func, info, recur),
            ast::ExprKind::Case {
                operand,
                conditions,
                results,
                else_expr,
            } => {
                let mut args = Vec::with_capacity(conditions.len() * 2 + 2);
                if let Some(operand) = operand {
                    args.push(self.bind_expression(ctx, operand, info, recur)?);
                }
                for (condition, result) in conditions.iter().zip(results) {
                    args.push(self.bind_expression(ctx, condition, info, recur)?);
                    args.push(self.bind_expression(ctx, result, info, recur)?);
                }
                match else_expr {
                    Some(else_expr) => {
                        args.push(self.bind_expression(ctx, else_expr, info, recur)?)
                    }
                    None => args.push(Expression::untyped_null()),
                }
                let name = if operand.is_some() {
                    "$case_with_value"
                } else {
                    "$case_no_value"
                };
                self.call_function(ctx, name, args, info)
            }
            ast::ExprKind::Cast {
                datatype,
                expr: child,
                safe,
            } => {
                let child = self.bind_expression(ctx, child, info, recur)?;
                let to = DataType::from_ast(datatype);
                if !ctx.coercer.coerces_to(&child.argument_type(), &to, true) {
                    return Err(SqlError::new(format!(
                        "Invalid cast from {} to {to}",
                        child.datatype()
                    )));
                }
                Ok(Expression::Cast(CastExpr {
                    expr: Box::new(child),
                    to,
                    safe: *safe,
                }))
            }
            ast::ExprKind::Collate {
                expr: child,
                collation,
            } => {
                let child = self.bind_expression(ctx, child, info, recur)?;
                let datatype = child.datatype();
                if datatype != DataType::String && !child.is_untyped_null() {
                    return Err(SqlError::new(format!(
                        "COLLATE can only be applied to expressions of type STRING, but was used with {datatype}"
                    )));
                }
                Ok(Expression::Collate(CollateExpr {
                    expr: Box::new(child),
                    collation: collation.clone(),
                }))
            }
            ast::ExprKind::Tuple(exprs) => {
                if let [single] = exprs.as_slice() {
                    return self.bind_expression(ctx, single, info, recur);
                }
                let mut fields = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    fields.push(self.bind_expression(ctx, expr, info, recur)?);
                }
                let datatype = DataType::Struct(
                    fields
                        .iter()
                        .map(|f| StructField::anonymous(f.datatype()))
                        .collect(),
                );
                Ok(Expression::MakeStruct(MakeStructExpr { fields, datatype }))
            }
            ast::ExprKind::Struct(struct_fields) => {
                let mut fields = Vec::with_capacity(struct_fields.len());
                let mut types = Vec::with_capacity(struct_fields.len());
                for field in struct_fields {
                    let bound = self.bind_expression(ctx, &field.expr, info, recur)?;
                    let name = match &field.alias {
                        Some(alias) => Some(alias.value.clone()),
                        None => field
                            .expr
                            .as_path()
                            .and_then(|path| path.last())
                            .map(|ident| ident.value.clone()),
                    };
                    types.push(StructField {
                        name,
                        datatype: bound.datatype(),
                    });
                    fields.push(bound);
                }
                Ok(Expression::MakeStruct(MakeStructExpr {
                    fields,
                    datatype: DataType::Struct(types),
                }))
            }
            ast::ExprKind::Array(exprs) => {
                let mut args = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    args.push(self.bind_expression(ctx, expr, info, recur)?);
                }
                self.call_function(ctx, "$make_array", args, info)
            }
            ast::ExprKind::Subquery(query) => {
                self.bind_subquery(ctx, query, SubqueryKind::Scalar, expr.location)
            }
            ast::ExprKind::Exists(query) => {
                self.bind_subquery(ctx, query, SubqueryKind::Exists, expr.location)
            }
            ast::ExprKind::ArraySubquery(query) => {
                self.bind_subquery(ctx, query, SubqueryKind::Array, expr.location)
            }
            ast::ExprKind::Subscript {
                expr: child,
                subscript,
            } => {
                let args = vec![
                    self.bind_expression(ctx, child, info, recur)?,
                    self.bind_expression(ctx, subscript, info, recur)?,
                ];
                self.call_function(ctx, "$subscript", args, info)
            }
            ast::ExprKind::FieldAccess { expr: child, field } => {
                let child = self.bind_expression(ctx, child, info, recur)?;
                get_field(child, field)
            }
        }
    }

    fn call_function(
        &self,
        ctx: &mut AnalysisContext,
        name: &str,
        args: Vec<Expression>,
        info: &mut ExprBindInfo,
    ) -> Result<Expression> {
        let signature = ctx.functions.find_required(name)?;
        let types: Vec<_> = args.iter().map(|arg| arg.argument_type()).collect();
        let datatype = signature.resolve(&types, ctx.coercer)?;
        info.has_volatile |= signature.volatile;
        Ok(Expression::Function(FunctionExpr {
            name: signature.name.to_string(),
            args,
            datatype,
            volatile: signature.volatile,
        }))
    }

    fn maybe_negate(
        &self,
        ctx: &mut AnalysisContext,
        expr: Expression,
        negated: bool,
        info: &mut ExprBindInfo,
    ) -> Result<Expression> {
        if negated {
            self.call_function(ctx, "$not", vec![expr], info)
        } else {
            Ok(expr)
        }
    }

    /// Bind an identifier path, possibly followed by struct field accesses.
    fn bind_path(
        &self,
        ctx: &mut AnalysisContext,
        path: &[ast::Ident],
        info: &mut ExprBindInfo,
    ) -> Result<Expression> {
        let first = path.first().required("identifier path")?;

        if matches!(
            info.alias_mode,
            AliasMode::PostGroup { .. } | AliasMode::PostDistinct
        ) {
            if let Some(expr) = self.bind_alias(path, info)? {
                return Ok(expr);
            }
        }

        match self.scope.resolve_path(path)? {
            Some(PathTarget::Column {
                column,
                fields,
                depth,
            }) => {
                ctx.record_correlated_reference(&column, depth)?;
                let mut expr = Expression::Column(ColumnExpr {
                    column,
                    is_correlated: depth > 0,
                });
                for field in &fields {
                    expr = get_field(expr, field).map_err(|e| e.at(field.location))?;
                }
                Ok(expr)
            }
            Some(PathTarget::RangeVariable { names, depth }) => {
                range_variable_value(ctx, &names, depth)
            }
            Some(PathTarget::Ambiguous) => {
                Err(SqlError::new(format!("Column name {first} is ambiguous")).at(first.location))
            }
            Some(PathTarget::AccessError { reason }) => Err(SqlError::new(format!(
                "{} expression references column {} {reason}",
                info.clause,
                display_path(path),
            ))
            .at(first.location)),
            None => {
                if matches!(info.alias_mode, AliasMode::FirstPass | AliasMode::PreGroup) {
                    if let Some(expr) = self.bind_alias(path, info)? {
                        return Ok(expr);
                    }
                }
                Err(SqlError::new(format!(
                    "Unrecognized name: {first}{}",
                    did_you_mean(self.scope.suggest(&first.value))
                ))
                .at(first.location))
            }
        }
    }

    /// Try to resolve the first identifier of `path` as a SELECT list alias.
    fn bind_alias(
        &self,
        path: &[ast::Ident],
        info: &mut ExprBindInfo,
    ) -> Result<Option<Expression>> {
        let first = path.first().required("identifier path")?;
        let query_info = match info.query_info.as_deref_mut() {
            Some(query_info) => query_info,
            None => return Ok(None),
        };

        let name = IdString::from(first);
        let matches = query_info.find_select_aliases(&name);
        let idx = match matches.first() {
            Some(idx) => *idx,
            None => return Ok(None),
        };
        for &other in &matches[1..] {
            let same = match (
                query_info.select_columns[idx].ast_expr,
                query_info.select_columns[other].ast_expr,
            ) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            if !same {
                return Err(
                    SqlError::new(format!("Alias {first} is ambiguous")).at(first.location)
                );
            }
        }

        let state = &query_info.select_columns[idx];
        let expr = match info.alias_mode {
            AliasMode::None => return Ok(None),
            AliasMode::FirstPass => {
                info.has_aggregation |= state.has_aggregation;
                info.has_analytic |= state.has_analytic;
                state.original_expr.clone()
            }
            AliasMode::PreGroup => {
                if state.has_aggregation {
                    return Err(SqlError::new("Aggregations of aggregations are not allowed")
                        .at(first.location));
                }
                if state.has_analytic {
                    return Err(SqlError::new(
                        "Analytic functions cannot be used inside aggregate function arguments",
                    )
                    .at(first.location));
                }
                state.original_expr.clone()
            }
            AliasMode::PostGroup { allow_analytic } => {
                if state.has_analytic && !allow_analytic {
                    return Err(SqlError::new(format!(
                        "Column {first} contains an analytic function, which is not allowed in {}",
                        info.clause
                    ))
                    .at(first.location));
                }
                info.has_aggregation |= state.has_aggregation;
                info.has_analytic |= state.has_analytic;
                let column = state.output_column().required("select item column")?.clone();
                let computed = matches!(
                    state.resolution,
                    SelectColumnResolution::Bound {
                        provenance: SelectColumnProvenance::Computed(_),
                        ..
                    }
                );
                if info.mark_early_compute && computed {
                    query_info.select_columns[idx].needs_early_compute = true;
                }
                Expression::column(column)
            }
            AliasMode::PostDistinct => {
                let column = query_info
                    .distinct_columns
                    .get(idx)
                    .required("distinct column")?;
                Expression::column(column.clone())
            }
        };

        let mut expr = expr;
        for field in &path[1..] {
            expr = get_field(expr, field).map_err(|e| e.at(field.location))?;
        }
        Ok(Some(expr))
    }

    fn bind_function<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        node: &'ast ast::Expr,
        func: &'ast ast::Function,
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        let name = match func.reference.0.as_slice() {
            [single] => single.value.to_lowercase(),
            _ => {
                return Err(SqlError::not_found(format!(
                    "Function not found: {}",
                    func.reference
                )));
            }
        };

        if name == "grouping" {
            return self.bind_grouping(ctx, node, func, info, recur);
        }

        let is_count_star = matches!(func.args.as_slice(), [ast::FunctionArg::Star]);
        if is_count_star && name != "count" {
            return Err(SqlError::new(format!(
                "Argument * is only allowed in COUNT(*), not {}(*)",
                name.to_uppercase()
            )));
        }
        let lookup_name = if is_count_star { "$count_star" } else { name.as_str() };
        let signature = *ctx.functions.find_required(lookup_name)?;

        let mut args = Vec::with_capacity(func.args.len());
        for arg in &func.args {
            match arg {
                ast::FunctionArg::Expr(expr) => args.push(expr),
                ast::FunctionArg::Star if is_count_star => (),
                ast::FunctionArg::Star => {
                    return Err(SqlError::new(
                        "Argument * is only allowed as the only argument to COUNT",
                    ));
                }
            }
        }

        match (signature.kind, &func.over) {
            (FunctionKind::Scalar, Some(_)) => Err(SqlError::new(format!(
                "Function {} is not an aggregate or analytic function and cannot have an OVER clause",
                name.to_uppercase()
            ))),
            (FunctionKind::Scalar, None) => {
                if func.distinct {
                    return Err(SqlError::new(format!(
                        "DISTINCT is not allowed for scalar function {}",
                        name.to_uppercase()
                    )));
                }
                let mut bound = Vec::with_capacity(args.len());
                for arg in args {
                    bound.push(self.bind_expression(ctx, arg, info, recur)?);
                }
                let types: Vec<_> = bound.iter().map(|arg| arg.argument_type()).collect();
                let datatype = signature.resolve(&types, ctx.coercer)?;
                info.has_volatile |= signature.volatile;
                Ok(Expression::Function(FunctionExpr {
                    name: signature.name.to_string(),
                    args: bound,
                    datatype,
                    volatile: signature.volatile,
                }))
            }
            (FunctionKind::Analytic, None) => Err(SqlError::new(format!(
                "Analytic function {} must have an OVER clause",
                name.to_uppercase()
            ))),
            (FunctionKind::Aggregate, None) => {
                self.bind_aggregate(ctx, node, &signature, func.distinct, &args, info, recur)
            }
            (FunctionKind::Aggregate | FunctionKind::Analytic, Some(window)) => {
                self.bind_analytic(ctx, node, &signature, func, &args, window, info, recur)
            }
        }
    }

    /// Bind arguments of an aggregate or GROUPING call.
    ///
    /// Arguments are resolved against the aggregate scope when one is set,
    /// with select aliases resolving to their first pass expressions.
    fn bind_aggregate_args<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        args: &[&'ast ast::Expr],
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Vec<Expression>> {
        let binder = match info.aggregate_scope {
            Some(scope) => ExpressionBinder::new(scope),
            None => ExpressionBinder::new(self.scope),
        };
        let saved_mode = info.alias_mode;
        if matches!(
            saved_mode,
            AliasMode::PostGroup { .. } | AliasMode::PostDistinct
        ) {
            info.alias_mode = AliasMode::PreGroup;
        }

        let arg_recur = RecursionContext {
            allow_aggregates: recur.allow_aggregates,
            allow_windows: false,
            in_aggregate_args: true,
        };
        let mut bound = Vec::with_capacity(args.len());
        let mut result = Ok(());
        for arg in args {
            match binder.bind_expression(ctx, arg, info, arg_recur) {
                Ok(expr) => bound.push(expr),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        info.alias_mode = saved_mode;
        result.map(|_| bound)
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_aggregate<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        node: &'ast ast::Expr,
        signature: &FunctionSignature,
        distinct: bool,
        args: &[&'ast ast::Expr],
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        if recur.in_aggregate_args {
            return Err(SqlError::new("Aggregations of aggregations are not allowed"));
        }
        if !recur.allow_aggregates {
            return Err(SqlError::new(format!(
                "Aggregate function {} not allowed in {}",
                signature.display_name, info.clause
            )));
        }
        info.has_aggregation = true;

        let id = ast_node_id(node);
        if let Some(column) = info.query_info.as_deref().and_then(|qi| qi.find_aggregate(id)) {
            return Ok(Expression::column(column.clone()));
        }

        let args = self.bind_aggregate_args(ctx, args, info, recur)?;
        let types: Vec<_> = args.iter().map(|arg| arg.argument_type()).collect();
        let datatype = signature.resolve(&types, ctx.coercer)?;
        if distinct {
            if let Some(arg) = args
                .iter()
                .find(|arg| !ctx.coercer.supports_grouping(&arg.datatype()))
            {
                return Err(SqlError::new(format!(
                    "Aggregate functions with DISTINCT cannot be used with arguments of type {}",
                    arg.datatype()
                )));
            }
        }

        let aggregate = Expression::Aggregate(AggregateExpr {
            name: signature.name.to_string(),
            args,
            distinct,
            datatype: datatype.clone(),
        });

        match info.query_info.as_deref_mut() {
            Some(query_info) => {
                if let Some(column) = query_info.reuse_aggregate(id, &aggregate) {
                    return Ok(Expression::column(column));
                }
                let n = query_info.aggregates.len() + 1;
                let column = ctx.allocate_column("$aggregate", format!("$agg{n}"), datatype);
                query_info.add_aggregate(id, ComputedColumn::new(column.clone(), aggregate));
                Ok(Expression::column(column))
            }
            None => Ok(aggregate),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_analytic<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        node: &'ast ast::Expr,
        signature: &FunctionSignature,
        func: &'ast ast::Function,
        args: &[&'ast ast::Expr],
        window: &'ast ast::WindowSpec,
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        if recur.in_aggregate_args {
            return Err(SqlError::new(
                "Analytic functions cannot be used inside aggregate function arguments",
            ));
        }
        if !recur.allow_windows {
            return Err(SqlError::new(format!(
                "Analytic function {} not allowed in {}",
                signature.display_name, info.clause
            )));
        }
        if func.distinct {
            return Err(SqlError::new(format!(
                "DISTINCT is not allowed for analytic function {}",
                signature.display_name
            )));
        }
        info.has_analytic = true;

        let id = ast_node_id(node);
        if info.register_analytic {
            if let Some(column) = info.query_info.as_deref().and_then(|qi| qi.find_analytic(id)) {
                return Ok(Expression::column(column.clone()));
            }
        }

        let inner = RecursionContext {
            allow_aggregates: recur.allow_aggregates,
            allow_windows: false,
            in_aggregate_args: false,
        };

        let mut bound_args = Vec::with_capacity(args.len());
        for arg in args {
            bound_args.push(self.bind_expression(ctx, arg, info, inner)?);
        }

        let mut partition_by = Vec::with_capacity(window.partition_by.len());
        for expr in &window.partition_by {
            let bound = self.bind_expression(ctx, expr, info, inner)?;
            let datatype = bound.datatype();
            if !ctx.coercer.supports_grouping(&datatype) {
                return Err(SqlError::new(format!(
                    "Partitioning by expressions of type {datatype} is not allowed"
                ))
                .at(expr.location));
            }
            partition_by.push(bound);
        }

        let mut order_by = Vec::with_capacity(window.order_by.len());
        for node in &window.order_by {
            let bound = self.bind_expression(ctx, &node.expr, info, inner)?;
            let datatype = bound.datatype();
            if !ctx.coercer.supports_ordering(&datatype) {
                return Err(SqlError::new(format!(
                    "Ordering by expressions of type {datatype} is not allowed"
                ))
                .at(node.expr.location));
            }
            order_by.push(OrderByItem {
                expr: bound,
                descending: matches!(node.typ, Some(ast::OrderByType::Desc)),
                nulls_first: node.nulls.map(|n| matches!(n, ast::OrderByNulls::First)),
            });
        }

        let types: Vec<_> = bound_args.iter().map(|arg| arg.argument_type()).collect();
        let datatype = signature.resolve(&types, ctx.coercer)?;
        let analytic = Expression::Analytic(AnalyticExpr {
            name: signature.name.to_string(),
            args: bound_args,
            partition_by,
            order_by,
            datatype: datatype.clone(),
        });

        if !info.register_analytic {
            return Ok(analytic);
        }
        match info.query_info.as_deref_mut() {
            Some(query_info) => {
                if let Some(column) = query_info.reuse_analytic(id, &analytic) {
                    return Ok(Expression::column(column));
                }
                let n = query_info.analytics.len() + 1;
                let column = ctx.allocate_column("$analytic", format!("$analytic{n}"), datatype);
                query_info.add_analytic(id, ComputedColumn::new(column.clone(), analytic));
                Ok(Expression::column(column))
            }
            None => Ok(analytic),
        }
    }

    /// Bind `GROUPING(<expr>)`.
    ///
    /// Before the GROUP BY keys are known this produces an unregistered
    /// placeholder call.
    fn bind_grouping<'ast>(
        &self,
        ctx: &mut AnalysisContext,
        node: &'ast ast::Expr,
        func: &'ast ast::Function,
        info: &mut ExprBindInfo<'_, 'ast>,
        recur: RecursionContext,
    ) -> Result<Expression> {
        if recur.in_aggregate_args {
            return Err(SqlError::new("Aggregations of aggregations are not allowed"));
        }
        if !recur.allow_aggregates || info.query_info.is_none() {
            return Err(SqlError::new(format!(
                "GROUPING function not allowed in {}",
                info.clause
            )));
        }
        if func.over.is_some() || func.distinct {
            return Err(SqlError::new(
                "GROUPING does not support DISTINCT or an OVER clause",
            ));
        }
        let arg = match func.args.as_slice() {
            [ast::FunctionArg::Expr(arg)] => arg,
            _ => return Err(SqlError::new("GROUPING requires exactly one argument")),
        };
        info.has_aggregation = true;

        let id = ast_node_id(node);
        if let Some(column) = info
            .query_info
            .as_deref()
            .and_then(|qi| qi.find_grouping_call(id))
        {
            return Ok(Expression::column(column.clone()));
        }

        let mut bound = self.bind_aggregate_args(ctx, &[arg], info, recur)?;
        let arg = bound.pop().required("GROUPING argument")?;

        let query_info = info.query_info.as_deref_mut().required("query info")?;
        if !query_info.group_by_resolved {
            return Ok(Expression::function("grouping", vec![arg], DataType::Int64));
        }
        if !query_info.has_group_by {
            return Err(SqlError::new(
                "GROUPING can only be used in queries with GROUP BY",
            ));
        }
        let key_column = query_info.find_group_by_key(&arg).cloned().ok_or_else(|| {
            SqlError::new(
                "GROUPING must have an argument that exists within the group-by expression list",
            )
        })?;

        let n = query_info.grouping_calls.len() + 1;
        let output_column =
            ctx.allocate_column("$grouping_call", format!("$grouping_call{n}"), DataType::Int64);
        query_info.add_grouping_call(
            id,
            GroupingCall {
                key_column,
                output_column: output_column.clone(),
            },
        );
        Ok(Expression::column(output_column))
    }

    fn bind_subquery(
        &self,
        ctx: &mut AnalysisContext,
        query: &ast::QueryNode,
        kind: SubqueryKind,
        location: Location,
    ) -> Result<Expression> {
        let (bound, parameter_list) = ctx.with_correlation_frame(|ctx| {
            ctx.nested(location, |ctx| QueryBinder::new(self.scope).bind(ctx, query))
        })?;

        let datatype = match &kind {
            SubqueryKind::Scalar => match bound.column_list.as_slice() {
                [column] => column.datatype.clone(),
                _ => {
                    return Err(SqlError::new(
                        "Scalar subquery cannot have more than one column unless using SELECT AS STRUCT to build STRUCT values",
                    ));
                }
            },
            SubqueryKind::Array => match bound.column_list.as_slice() {
                [column] => {
                    if matches!(column.datatype, DataType::Array(_)) {
                        return Err(SqlError::new(format!(
                            "Cannot use array subquery with column of type {} because nested arrays are not supported",
                            column.datatype
                        )));
                    }
                    DataType::array(column.datatype.clone())
                }
                _ => {
                    return Err(SqlError::new(
                        "ARRAY subquery cannot have more than one column unless using SELECT AS STRUCT to build STRUCT values",
                    ));
                }
            },
            SubqueryKind::Exists => DataType::Bool,
            SubqueryKind::In(lhs) => {
                let column = match bound.column_list.as_slice() {
                    [column] => column,
                    _ => {
                        return Err(SqlError::new(
                            "Subquery of type IN must have only one output column",
                        ));
                    }
                };
                let supertype = ctx.coercer.common_supertype(&[
                    lhs.argument_type(),
                    crate::types::coercer::InputArgumentType::new(column.datatype.clone()),
                ]);
                match supertype {
                    Some(t) if ctx.coercer.supports_grouping(&t) => (),
                    _ => {
                        return Err(SqlError::new(format!(
                            "Cannot execute IN subquery with uncomparable types {} and {}",
                            lhs.datatype(),
                            column.datatype
                        )));
                    }
                }
                DataType::Bool
            }
        };

        Ok(Expression::Subquery(SubqueryExpr {
            kind,
            parameter_list,
            scan: Box::new(bound.scan),
            datatype,
        }))
    }
}

/// Check that a filter condition produces a BOOL.
pub fn check_bool(expr: &Expression, clause: &str) -> Result<()> {
    if expr.is_untyped_null() {
        return Ok(());
    }
    let datatype = expr.datatype();
    if datatype != DataType::Bool {
        return Err(SqlError::new(format!(
            "{clause} should return type BOOL, but returns {datatype}"
        )));
    }
    Ok(())
}

/// Access a struct field by name.
pub fn get_field(expr: Expression, field: &ast::Ident) -> Result<Expression> {
    let datatype = expr.datatype();
    let (field_idx, field_type) = match datatype.find_field(&IdString::from(field)) {
        FieldLookup::Found(idx, field_type) => (idx, field_type.clone()),
        FieldLookup::Ambiguous => {
            return Err(SqlError::new(format!(
                "Struct field name {field} is ambiguous in {datatype}"
            )));
        }
        FieldLookup::NotFound if datatype.is_struct() => {
            return Err(SqlError::new(format!(
                "Field name {field} does not exist in {datatype}"
            )));
        }
        FieldLookup::NotFound => {
            return Err(SqlError::new(format!(
                "Cannot access field {field} on a value with type {datatype}"
            )));
        }
    };
    Ok(Expression::GetField(GetFieldExpr {
        expr: Box::new(expr),
        field_idx,
        field_name: field.value.clone(),
        datatype: field_type,
    }))
}

/// A range variable used as a value.
///
/// Value tables produce their row column, other tables a struct of their
/// visible columns.
fn range_variable_value(
    ctx: &mut AnalysisContext,
    names: &NameList,
    depth: usize,
) -> Result<Expression> {
    if let Some(value) = names.value_column() {
        ctx.record_correlated_reference(value, depth)?;
        return Ok(Expression::Column(ColumnExpr {
            column: value.clone(),
            is_correlated: depth > 0,
        }));
    }

    let mut fields = Vec::new();
    let mut types = Vec::new();
    for named in names.visible_columns() {
        ctx.record_correlated_reference(&named.column, depth)?;
        fields.push(Expression::Column(ColumnExpr {
            column: named.column.clone(),
            is_correlated: depth > 0,
        }));
        types.push(StructField {
            name: (!named.name.is_internal()).then(|| named.name.to_string()),
            datatype: named.column.datatype.clone(),
        });
    }
    Ok(Expression::MakeStruct(MakeStructExpr {
        fields,
        datatype: DataType::Struct(types),
    }))
}

fn display_path(path: &[ast::Ident]) -> String {
    path.iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn bind_literal(literal: &ast::Literal) -> Result<Expression> {
    match literal {
        ast::Literal::Number(n) => bind_number(n),
        ast::Literal::SingleQuotedString(s) => Ok(Expression::literal(
            ScalarValue::String(s.clone()),
            DataType::String,
        )),
        ast::Literal::Boolean(b) => Ok(Expression::literal(ScalarValue::Bool(*b), DataType::Bool)),
        ast::Literal::Null => Ok(Expression::untyped_null()),
    }
}

fn bind_number(text: &str) -> Result<Expression> {
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Expression::literal(ScalarValue::Int64(v), DataType::Int64));
    }
    let is_float = text.contains(['.', 'e', 'E']);
    if is_float {
        if let Ok(v) = text.parse::<f64>() {
            return Ok(Expression::literal(ScalarValue::Double(v), DataType::Double));
        }
        return Err(SqlError::new(format!("Invalid floating point literal: {text}")));
    }
    Err(SqlError::new(format!("Invalid integer literal: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestEnv, parse_expr};
    use pretty_assertions::assert_eq;

    fn bind_in_scope(env: &TestEnv, table: &str, sql: &str) -> Result<Expression> {
        let expr = parse_expr(sql);
        env.with_context(|ctx| {
            let scope = env.table_scope(ctx, table);
            let mut info = ExprBindInfo::new("WHERE clause");
            ExpressionBinder::new(&scope).bind_expression(
                ctx,
                &expr,
                &mut info,
                RecursionContext::new(false, false),
            )
        })
    }

    #[test]
    fn bind_arithmetic() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "KeyValue", "key + 1.5").unwrap();
        assert_eq!(DataType::Double, expr.datatype());
        assert_eq!("$add(KeyValue.Key#1, 1.5)", expr.to_string());
    }

    #[test]
    fn negative_literal_folded() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "KeyValue", "-9223372036854775808").unwrap();
        assert!(expr.is_literal());
        assert_eq!(DataType::Int64, expr.datatype());
    }

    #[test]
    fn unrecognized_name_suggests() {
        let env = TestEnv::new();
        let err = bind_in_scope(&env, "KeyValue", "valeu").unwrap_err();
        assert_eq!("Unrecognized name: valeu; Did you mean Value?", err.message());
        assert!(err.location().is_some());
    }

    #[test]
    fn range_variable_as_struct() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "KeyValue", "KeyValue").unwrap();
        assert_eq!("STRUCT<Key INT64, Value STRING>", expr.datatype().to_string());
    }

    #[test]
    fn struct_field_access() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "ComplexTypes", "TestStruct.c").unwrap();
        assert_eq!(DataType::Int64, expr.datatype());

        let err = bind_in_scope(&env, "ComplexTypes", "TestStruct.zz").unwrap_err();
        assert_eq!(
            "Field name zz does not exist in STRUCT<c INT64, d STRUCT<a INT64, b STRING>>",
            err.message()
        );
    }

    #[test]
    fn aggregate_not_allowed() {
        let env = TestEnv::new();
        let err = bind_in_scope(&env, "KeyValue", "SUM(key) > 1").unwrap_err();
        assert_eq!("Aggregate function SUM not allowed in WHERE clause", err.message());
    }

    #[test]
    fn analytic_needs_over() {
        let env = TestEnv::new();
        let err = bind_in_scope(&env, "KeyValue", "rank()").unwrap_err();
        assert_eq!("Analytic function RANK must have an OVER clause", err.message());
    }

    #[test]
    fn invalid_cast() {
        let env = TestEnv::new();
        let err = bind_in_scope(&env, "ComplexTypes", "CAST(Int32Array AS INT64)").unwrap_err();
        assert_eq!("Invalid cast from ARRAY<INT64> to INT64", err.message());
    }

    #[test]
    fn bool_check() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "KeyValue", "key").unwrap();
        let err = check_bool(&expr, "WHERE clause").unwrap_err();
        assert_eq!(
            "WHERE clause should return type BOOL, but returns INT64",
            err.message()
        );
        check_bool(&Expression::untyped_null(), "WHERE clause").unwrap();
    }

    #[test]
    fn scalar_subquery_column_count() {
        let env = TestEnv::new();
        let err = bind_in_scope(&env, "KeyValue", "(SELECT 1, 2)").unwrap_err();
        assert!(err.message().starts_with("Scalar subquery cannot have more than one column"));
    }

    #[test]
    fn correlated_subquery_parameters() {
        let env = TestEnv::new();
        let expr = bind_in_scope(&env, "KeyValue", "EXISTS(SELECT key)").unwrap();
        match expr {
            Expression::Subquery(subquery) => {
                assert_eq!(1, subquery.parameter_list.len());
                assert_eq!("Key", subquery.parameter_list[0].column.name);
                assert!(!subquery.parameter_list[0].is_correlated);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
