use std::sync::Arc;

use sqlbind_error::{OptionExt, Result, SqlError};
use sqlbind_parser::ast;
use tracing::debug;

use super::bind_setop::{
    coerce_to_types,
    combine_set_operation,
    flatten_set_operation,
    set_operation_type,
};
use super::{BoundQuery, QueryBinder};
use crate::binder::context::{AnalysisContext, NamedSubquery};
use crate::binder::name_list::NameList;
use crate::binder::name_scope::NameScope;
use crate::binder::recursive::sort::sort_with_entries;
use crate::binder::recursive::validate::validate_recursive_term;
use crate::ident::IdString;
use crate::logical::column::ResolvedColumn;
use crate::logical::scan::{RecursiveScan, Scan, WithEntry, WithScan};
use crate::types::DataType;
use crate::types::coercer::InputArgumentType;

/// Binds a WITH clause and the query it's attached to.
#[derive(Debug, Clone, Copy)]
pub struct WithBinder<'s> {
    outer: &'s NameScope<'s>,
}

impl<'s> WithBinder<'s> {
    pub fn new(outer: &'s NameScope<'s>) -> Self {
        WithBinder { outer }
    }

    /// Bind the entries of `with`, then `body` with the entries in scope.
    ///
    /// Aliases are removed from scope once `body` returns, whether or not
    /// binding succeeded.
    pub fn bind<F>(
        &self,
        ctx: &mut AnalysisContext,
        with: &ast::CommonTableExprDefs,
        body: F,
    ) -> Result<BoundQuery>
    where
        F: FnOnce(&mut AnalysisContext) -> Result<BoundQuery>,
    {
        for (idx, cte) in with.ctes.iter().enumerate() {
            let alias = IdString::from(&cte.alias);
            if with.ctes[..idx].iter().any(|prev| IdString::from(&prev.alias) == alias) {
                return Err(SqlError::new(format!(
                    "Duplicate alias {} for WITH subquery",
                    cte.alias
                ))
                .at(cte.location));
            }
        }
        if with.recursive && !ctx.options.enable_recursive_queries {
            let location = with.ctes.first().map(|cte| cte.location).unwrap_or_default();
            return Err(SqlError::unimplemented("WITH RECURSIVE is not supported").at(location));
        }

        let mut pushed = Vec::with_capacity(with.ctes.len());
        let result = self
            .bind_entries(ctx, with, &mut pushed)
            .and_then(|entries| Ok((entries, body(ctx)?)));
        let popped = pushed
            .iter()
            .rev()
            .try_for_each(|alias| ctx.pop_named_subquery(alias));
        let (entries, query) = result?;
        popped?;

        let column_list = query.scan.column_list().to_vec();
        Ok(BoundQuery {
            scan: Scan::With(WithScan {
                entries,
                query: Box::new(query.scan),
                recursive: with.recursive,
                column_list,
            }),
            ..query
        })
    }

    fn bind_entries(
        &self,
        ctx: &mut AnalysisContext,
        with: &ast::CommonTableExprDefs,
        pushed: &mut Vec<IdString>,
    ) -> Result<Vec<WithEntry>> {
        // Cycles and self references are rejected for every clause, only a
        // RECURSIVE clause binds in dependency order.
        let sorted = sort_with_entries(with)?;
        let order = if with.recursive {
            sorted.order
        } else {
            (0..with.ctes.len()).collect()
        };

        let mut entries = Vec::with_capacity(order.len());
        for idx in order {
            let cte = &with.ctes[idx];
            let alias = IdString::from(&cte.alias);
            let unique_alias = ctx.unique_with_alias(&alias);
            ctx.push_named_subquery(alias.clone());
            pushed.push(alias.clone());

            let bound = if sorted.self_recursive.contains(&idx) {
                ctx.nested(cte.location, |ctx| {
                    self.bind_recursive_entry(ctx, cte, &alias, &unique_alias)
                })?
            } else {
                let binder = QueryBinder::new(self.outer);
                ctx.nested(cte.location, |ctx| binder.bind(ctx, &cte.body))?
            };

            ctx.set_named_subquery(
                &alias,
                NamedSubquery {
                    unique_alias: unique_alias.clone(),
                    is_recursive: false,
                    column_list: bound.column_list.clone(),
                    names: bound.names.clone(),
                },
            )?;
            entries.push(WithEntry {
                unique_alias,
                scan: bound.scan,
            });
        }

        debug!(
            order = ?entries.iter().map(|e| e.unique_alias.as_str()).collect::<Vec<_>>(),
            recursive = with.recursive,
            "bound WITH entries"
        );

        Ok(entries)
    }

    fn bind_recursive_entry(
        &self,
        ctx: &mut AnalysisContext,
        cte: &ast::CommonTableExpr,
        alias: &IdString,
        unique_alias: &str,
    ) -> Result<BoundQuery> {
        let query = &cte.body;
        if let Some(order_by) = &query.order_by {
            return Err(
                SqlError::new("A recursive reference may not appear inside ORDER BY")
                    .at(order_by.location),
            );
        }
        if !query.limit.is_empty() {
            return Err(
                SqlError::new("A recursive reference may not appear inside LIMIT or OFFSET")
                    .at(query.location),
            );
        }

        match &query.ctes {
            Some(ctes) => WithBinder::new(self.outer).bind(ctx, ctes, |ctx| {
                self.bind_recursive_union(ctx, cte, &query.body, alias, unique_alias)
            }),
            None => self.bind_recursive_union(ctx, cte, &query.body, alias, unique_alias),
        }
    }

    /// Bind `<non-recursive terms> UNION [ALL|DISTINCT] <recursive term>`.
    ///
    /// The non-recursive terms fix the output columns. The entry is visible
    /// as a recursive reference to the last term only.
    fn bind_recursive_union(
        &self,
        ctx: &mut AnalysisContext,
        cte: &ast::CommonTableExpr,
        body: &ast::QueryNodeBody,
        alias: &IdString,
        unique_alias: &str,
    ) -> Result<BoundQuery> {
        let setop = match body {
            ast::QueryNodeBody::Set(setop) if setop.operation == ast::SetOperation::Union => setop,
            _ => {
                return Err(SqlError::new(format!(
                    "Recursive WITH entry {} must be a UNION ALL or UNION DISTINCT of a non-recursive term and a recursive term",
                    cte.alias
                ))
                .at(body.location()));
            }
        };
        if setop.corresponding.is_some() {
            return Err(SqlError::new(format!(
                "CORRESPONDING is not allowed in recursive WITH entry {}",
                cte.alias
            ))
            .at(setop.location));
        }

        let op_type = set_operation_type(setop);
        let mut operands = flatten_set_operation(setop)?;
        let recursive_operand = operands.pop().required("recursive term")?;

        let binder = QueryBinder::new(self.outer);
        let mut non_recursive = Vec::with_capacity(operands.len());
        for operand in operands {
            non_recursive.push(binder.bind_body(ctx, operand)?);
        }
        let non_recursive = if non_recursive.len() == 1 {
            non_recursive.pop().required("non-recursive term")?
        } else {
            combine_set_operation(ctx, op_type, None, setop.location, non_recursive)?
        };

        let table_name = op_type.column_table_name();
        let mut output_names = non_recursive.column_names();
        output_names.resize(non_recursive.column_list.len(), IdString::new("$col"));

        let mut column_list = Vec::with_capacity(output_names.len());
        let mut names = NameList::new();
        for (name, input) in output_names.into_iter().zip(&non_recursive.column_list) {
            if op_type.is_distinct() && !ctx.coercer.supports_grouping(&input.datatype) {
                return Err(SqlError::new(format!(
                    "Column {name} in {op_type} has type that does not support set operation comparisons: {}",
                    input.datatype
                ))
                .at(setop.location));
            }
            let column = ctx.allocate_column_with_collation(
                table_name,
                name.as_str(),
                input.datatype.clone(),
                input.collation.clone(),
            );
            if non_recursive.is_value_table {
                names.add_value_table_column(name, column.clone());
            } else {
                names.add_column(name, column.clone(), true);
            }
            column_list.push(column);
        }
        names.set_value_table(non_recursive.is_value_table);
        let names = Arc::new(names);

        ctx.set_named_subquery(
            alias,
            NamedSubquery {
                unique_alias: unique_alias.to_string(),
                is_recursive: true,
                column_list: column_list.clone(),
                names: names.clone(),
            },
        )?;

        let recursive = binder.bind_body(ctx, recursive_operand)?;
        let location = recursive_operand.location();
        check_recursive_columns(ctx, cte, &column_list, names.is_value_table(), &recursive)
            .map_err(|e| e.at(location))?;

        let output_types: Vec<DataType> =
            column_list.iter().map(|col| col.datatype.clone()).collect();
        let non_recursive_term =
            coerce_to_types(ctx, table_name, 0, non_recursive, &output_types);
        let recursive_term = coerce_to_types(ctx, table_name, 1, recursive, &output_types);
        validate_recursive_term(&recursive_term.scan, unique_alias)
            .map_err(|e| e.at(location))?;

        ctx.properties.has_recursive_query = true;

        let column_types = column_list
            .iter()
            .map(|col| InputArgumentType::new(col.datatype.clone()))
            .collect();
        let is_value_table = names.is_value_table();
        Ok(BoundQuery {
            scan: Scan::Recursive(RecursiveScan {
                op_type,
                non_recursive_term: Box::new(non_recursive_term),
                recursive_term: Box::new(recursive_term),
                column_list: column_list.clone(),
            }),
            names,
            column_list,
            column_types,
            is_value_table,
        })
    }
}

/// The recursive term must match the width of the output and coerce to its
/// types without changing collations.
fn check_recursive_columns(
    ctx: &AnalysisContext,
    cte: &ast::CommonTableExpr,
    output: &[ResolvedColumn],
    is_value_table: bool,
    recursive: &BoundQuery,
) -> Result<()> {
    if recursive.column_list.len() != output.len() {
        return Err(SqlError::new(format!(
            "The recursive term of {} has {} columns, but the non-recursive term has {} columns",
            cte.alias,
            recursive.column_list.len(),
            output.len()
        )));
    }
    if recursive.is_value_table != is_value_table {
        return Err(SqlError::new(format!(
            "The recursive term of {} must be a value table only if the non-recursive term is",
            cte.alias
        )));
    }

    for (idx, (column, arg_type)) in output.iter().zip(&recursive.column_types).enumerate() {
        if !ctx.coercer.coerces_to(arg_type, &column.datatype, false) {
            return Err(SqlError::new(format!(
                "Column {} of the recursive term of {} has type {}, which does not coerce to {}",
                idx + 1,
                cte.alias,
                arg_type.datatype,
                column.datatype
            )));
        }
        let collation = recursive.column_list[idx].collation.as_deref();
        if collation != column.collation.as_deref() {
            return Err(SqlError::new(format!(
                "Column {} of the recursive term of {} has collation {}, which does not match the non-recursive term collation {}",
                idx + 1,
                cte.alias,
                collation.unwrap_or("none"),
                column.collation.as_deref().unwrap_or("none")
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerOptions;
    use crate::testutil::{TestEnv, analyze, find_scan};
    use pretty_assertions::assert_eq;

    #[test]
    fn with_entry_is_referenced() {
        let out = analyze("WITH a AS (SELECT Key FROM KeyValue) SELECT Key FROM a").unwrap();
        let with = match &out.scan {
            Scan::With(with) => with,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(!with.recursive);
        let aliases: Vec<_> = with.entries.iter().map(|e| e.unique_alias.as_str()).collect();
        assert_eq!(vec!["a"], aliases);

        let reference = find_scan(&with.query, "WithRefScan").unwrap();
        assert_eq!("a", reference.column_list()[0].table_name);
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["Key"], names);
        assert!(!out.properties.has_recursive_query);
    }

    #[test]
    fn later_entries_see_earlier_ones() {
        analyze("WITH a AS (SELECT 1 AS x), b AS (SELECT x FROM a) SELECT * FROM b").unwrap();
    }

    #[test]
    fn forward_reference_without_recursive() {
        let err = analyze("WITH b AS (SELECT * FROM a), a AS (SELECT 1 AS x) SELECT * FROM b")
            .unwrap_err();
        assert_eq!("Table not found: a", err.message());
    }

    #[test]
    fn cycle_without_recursive() {
        let env = TestEnv::new();
        for sql in [
            "WITH a AS (SELECT * FROM b), b AS (SELECT * FROM a) SELECT 1",
            "WITH RECURSIVE a AS (SELECT * FROM b), b AS (SELECT * FROM a) SELECT 1",
        ] {
            let err = env.analyze(sql).unwrap_err();
            assert_eq!("Unsupported WITH entry dependency cycle: a => b => a", err.message());
        }

        let err = env
            .analyze(
                "WITH a AS (SELECT 1 AS x), b AS (SELECT * FROM c), c AS (SELECT * FROM b) \
                 SELECT * FROM a",
            )
            .unwrap_err();
        assert_eq!("Unsupported WITH entry dependency cycle: b => c => b", err.message());
    }

    #[test]
    fn recursive_clause_sorts_entries() {
        let out = analyze(
            "WITH RECURSIVE b AS (SELECT x FROM a), a AS (SELECT 1 AS x) SELECT * FROM b",
        )
        .unwrap();
        let with = match &out.scan {
            Scan::With(with) => with,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(with.recursive);
        let order: Vec<_> = with.entries.iter().map(|e| e.unique_alias.as_str()).collect();
        assert_eq!(vec!["a", "b"], order);
        // No entry references itself.
        assert!(!out.properties.has_recursive_query);
    }

    #[test]
    fn duplicate_alias() {
        let err = analyze("WITH a AS (SELECT 1), A AS (SELECT 2) SELECT 1").unwrap_err();
        assert_eq!("Duplicate alias A for WITH subquery", err.message());
    }

    #[test]
    fn self_reference_requires_recursive() {
        let err = analyze("WITH t AS (SELECT 1 UNION ALL SELECT * FROM t) SELECT * FROM t")
            .unwrap_err();
        assert_eq!(
            "WITH entry t references itself, which requires WITH RECURSIVE",
            err.message()
        );
    }

    #[test]
    fn inner_with_shadows_outer() {
        let out = analyze(
            "WITH t AS (SELECT 1 AS x) \
             SELECT * FROM (WITH t AS (SELECT 'a' AS y) SELECT * FROM t), t",
        )
        .unwrap();
        let names: Vec<_> = out.output_columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(vec!["y", "x"], names);
        // The inner entry gets its own unique alias.
        let inner = find_scan(&out.scan, "WithScan")
            .and_then(|scan| match scan {
                Scan::With(with) => find_scan(&with.query, "WithScan"),
                _ => None,
            })
            .unwrap();
        match inner {
            Scan::With(with) => assert_eq!("t_1", with.entries[0].unique_alias),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn alias_out_of_scope_after_query() {
        let err = analyze("SELECT * FROM (WITH t AS (SELECT 1) SELECT * FROM t), t").unwrap_err();
        assert_eq!("Table not found: t", err.message());
    }

    #[test]
    fn recursive_union() {
        let out = analyze(
            "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL SELECT n + 1 FROM t WHERE n < 5) \
             SELECT n FROM t",
        )
        .unwrap();
        assert!(out.properties.has_recursive_query);

        let recursive = match find_scan(&out.scan, "RecursiveScan") {
            Some(Scan::Recursive(recursive)) => recursive,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(crate::logical::scan::SetOperationType::UnionAll, recursive.op_type);
        assert_eq!("n", recursive.column_list[0].name);
        assert_eq!(DataType::Int64, recursive.column_list[0].datatype);

        let reference = find_scan(&recursive.recursive_term.scan, "RecursiveRefScan").unwrap();
        match reference {
            Scan::RecursiveRef(reference) => assert_eq!("t", reference.unique_alias),
            other => panic!("unexpected: {other:?}"),
        }
        // References after the definition are ordinary WITH references.
        assert!(find_scan(&out.scan, "WithRefScan").is_some());
    }

    #[test]
    fn recursive_term_is_cast_to_output_type() {
        let out = analyze(
            "WITH RECURSIVE t AS (SELECT 1.5 AS n UNION ALL SELECT 1 FROM t) SELECT n FROM t",
        )
        .unwrap();
        let recursive = match find_scan(&out.scan, "RecursiveScan") {
            Some(Scan::Recursive(recursive)) => recursive,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(DataType::Double, recursive.column_list[0].datatype);
        assert_eq!(
            DataType::Double,
            recursive.recursive_term.output_column_list[0].datatype
        );
    }

    #[test]
    fn recursive_term_type_must_coerce() {
        let err = analyze(
            "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL SELECT 'x' FROM t) SELECT n FROM t",
        )
        .unwrap_err();
        assert_eq!(
            "Column 1 of the recursive term of t has type STRING, which does not coerce to INT64",
            err.message()
        );
    }

    #[test]
    fn recursive_term_width() {
        let err = analyze(
            "WITH RECURSIVE t AS (SELECT 1 AS n UNION ALL SELECT n, n FROM t) SELECT n FROM t",
        )
        .unwrap_err();
        assert_eq!(
            "The recursive term of t has 2 columns, but the non-recursive term has 1 columns",
            err.message()
        );
    }

    #[test]
    fn recursive_order_by_rejected() {
        let err = analyze(
            "WITH RECURSIVE t AS (SELECT 1 UNION ALL SELECT * FROM t ORDER BY 1) SELECT * FROM t",
        )
        .unwrap_err();
        assert_eq!("A recursive reference may not appear inside ORDER BY", err.message());
    }

    #[test]
    fn recursive_reference_in_non_recursive_term() {
        let err = analyze(
            "WITH RECURSIVE t AS (SELECT * FROM t UNION ALL SELECT 1) SELECT * FROM t",
        )
        .unwrap_err();
        assert_eq!("Recursive reference to t is not allowed here", err.message());
    }

    #[test]
    fn recursive_entry_must_be_union() {
        let err = analyze(
            "WITH RECURSIVE t AS (SELECT 1 INTERSECT ALL SELECT * FROM t) SELECT * FROM t",
        )
        .unwrap_err();
        assert_eq!(
            "Recursive WITH entry t must be a UNION ALL or UNION DISTINCT of a non-recursive term and a recursive term",
            err.message()
        );
    }

    #[test]
    fn recursive_disabled() {
        let env = TestEnv::with_options(AnalyzerOptions {
            enable_recursive_queries: false,
            ..Default::default()
        });
        let err = env
            .analyze("WITH RECURSIVE t AS (SELECT 1) SELECT * FROM t")
            .unwrap_err();
        assert_eq!("WITH RECURSIVE is not supported", err.message());
    }
}
