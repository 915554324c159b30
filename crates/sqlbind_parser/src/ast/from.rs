use std::fmt;

use sqlbind_error::{Location, Result, SqlError};

use super::{AstParseable, Expr, Hint, Ident, ObjectReference, QueryNode};
use super::expr::starts_query;
use super::query::is_set_operation_start;
use crate::keywords::{Keyword, RESERVED_FOR_TABLE_ALIAS};
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromNode {
    pub alias: Option<Ident>,
    pub body: FromNodeBody,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromNodeBody {
    /// A table or a path rooted at a column, e.g. `my_table` or `t.arr`.
    BaseTable(FromBaseTable),
    Subquery(FromSubquery),
    TableFunction(FromTableFunction),
    Unnest(FromUnnest),
    Join(FromJoin),
    Pivot(FromPivot),
    Unpivot(FromUnpivot),
    Sample(FromSample),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromBaseTable {
    pub reference: ObjectReference,
    pub hints: Vec<Hint>,
    pub with_offset: Option<WithOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromSubquery {
    pub query: Box<QueryNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromTableFunction {
    pub reference: ObjectReference,
    pub args: Vec<TableFunctionArg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFunctionArg {
    /// A scalar argument.
    Expr(Expr),
    /// `TABLE <path>`
    Table(ObjectReference),
    /// `(SELECT ...)`, used as a relation or a scalar subquery depending on
    /// the function signature.
    Query(Box<QueryNode>),
    /// `MODEL <path>`
    Model(ObjectReference),
    /// `CONNECTION <path>`
    Connection(ObjectReference),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromUnnest {
    pub exprs: Vec<Expr>,
    pub with_offset: Option<WithOffset>,
}

/// `WITH OFFSET [AS <alias>]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithOffset {
    pub alias: Option<Ident>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// `CROSS JOIN`
    Cross,
    /// `<left>, <right>`
    Comma,
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cross => write!(f, "CROSS"),
            Self::Comma => write!(f, "COMMA"),
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Full => write!(f, "FULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinCondition {
    On(Expr),
    Using(Vec<Ident>),
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromJoin {
    pub left: Box<FromNode>,
    pub right: Box<FromNode>,
    pub join_type: JoinType,
    pub join_condition: JoinCondition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotAggregate {
    pub expr: Expr,
    pub alias: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotValue {
    pub expr: Expr,
    pub alias: Option<Ident>,
}

/// `<input> PIVOT(<aggs> FOR <expr> IN (<values>))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromPivot {
    pub input: Box<FromNode>,
    pub aggregates: Vec<PivotAggregate>,
    pub for_expr: Expr,
    pub values: Vec<PivotValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpivotColumnGroup {
    pub columns: Vec<Ident>,
    /// Label to use in the name column, defaults to the column names.
    pub label: Option<Expr>,
}

/// `<input> UNPIVOT [INCLUDE|EXCLUDE NULLS] (<values> FOR <name> IN (<groups>))`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromUnpivot {
    pub input: Box<FromNode>,
    pub include_nulls: bool,
    pub value_columns: Vec<Ident>,
    pub name_column: Ident,
    pub column_groups: Vec<UnpivotColumnGroup>,
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

/// `<input> TABLESAMPLE <method> (<size> PERCENT|ROWS) [REPEATABLE (<seed>)]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromSample {
    pub input: Box<FromNode>,
    pub method: SampleMethod,
    pub size: Expr,
    pub unit: SampleUnit,
    pub repeatable: Option<Expr>,
}

impl AstParseable for FromNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut node = Self::parse_operand(parser)?;

        loop {
            if is_set_operation_start(parser) {
                // `FULL UNION ALL CORRESPONDING`, not a join.
                break;
            }

            let location = parser.location();
            let join_type = if parser.consume_token(&Token::Comma) {
                JoinType::Comma
            } else if parser.parse_keyword(Keyword::CROSS) {
                parser.expect_keyword(Keyword::JOIN)?;
                JoinType::Cross
            } else if parser.parse_keyword(Keyword::JOIN) {
                JoinType::Inner
            } else if parser.parse_keyword(Keyword::INNER) {
                parser.expect_keyword(Keyword::JOIN)?;
                JoinType::Inner
            } else if let Some(kw) =
                parser.parse_one_of_keywords(&[Keyword::LEFT, Keyword::RIGHT, Keyword::FULL])
            {
                parser.parse_keyword(Keyword::OUTER);
                parser.expect_keyword(Keyword::JOIN)?;
                match kw {
                    Keyword::LEFT => JoinType::Left,
                    Keyword::RIGHT => JoinType::Right,
                    _ => JoinType::Full,
                }
            } else {
                break;
            };

            let right = Self::parse_operand(parser)?;

            let join_condition = match join_type {
                JoinType::Cross | JoinType::Comma => JoinCondition::None,
                _ => {
                    if parser.parse_keyword(Keyword::ON) {
                        JoinCondition::On(Expr::parse(parser)?)
                    } else if parser.parse_keyword(Keyword::USING) {
                        JoinCondition::Using(
                            parser.parse_parenthesized_comma_separated(Ident::parse)?,
                        )
                    } else {
                        JoinCondition::None
                    }
                }
            };

            node = FromNode {
                alias: None,
                body: FromNodeBody::Join(FromJoin {
                    left: Box::new(node),
                    right: Box::new(right),
                    join_type,
                    join_condition,
                }),
                location,
            };
        }

        Ok(node)
    }
}

impl FromNode {
    /// Parse a single table expression including any trailing PIVOT, UNPIVOT
    /// or TABLESAMPLE operators.
    fn parse_operand(parser: &mut Parser) -> Result<Self> {
        let mut node = parser.nested(Self::parse_primary)?;

        loop {
            let location = parser.location();
            if parser.parse_keyword(Keyword::PIVOT) {
                let body = FromPivot::parse_body(parser, node)?;
                let alias = Self::maybe_parse_alias(parser)?;
                node = FromNode {
                    alias,
                    body: FromNodeBody::Pivot(body),
                    location,
                };
            } else if parser.parse_keyword(Keyword::UNPIVOT) {
                let body = FromUnpivot::parse_body(parser, node)?;
                let alias = Self::maybe_parse_alias(parser)?;
                node = FromNode {
                    alias,
                    body: FromNodeBody::Unpivot(body),
                    location,
                };
            } else if parser.parse_keyword(Keyword::TABLESAMPLE) {
                let body = FromSample::parse_body(parser, node)?;
                node = FromNode {
                    alias: None,
                    body: FromNodeBody::Sample(body),
                    location,
                };
            } else {
                break;
            }
        }

        Ok(node)
    }

    fn parse_primary(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();

        if parser.consume_token(&Token::LeftParen) {
            if starts_query(parser) {
                // `FROM (SELECT * FROM my_table) AS alias`
                let query = QueryNode::parse(parser)?;
                parser.expect_token(&Token::RightParen)?;
                let alias = Self::maybe_parse_alias(parser)?;
                return Ok(FromNode {
                    alias,
                    body: FromNodeBody::Subquery(FromSubquery {
                        query: Box::new(query),
                    }),
                    location,
                });
            }

            // Parenthesized join, `FROM (a JOIN b ON ...)`
            let node = FromNode::parse(parser)?;
            parser.expect_token(&Token::RightParen)?;
            return Ok(node);
        }

        if parser.parse_keyword(Keyword::UNNEST) {
            let exprs = parser.parse_parenthesized_comma_separated(Expr::parse)?;
            let alias = Self::maybe_parse_alias(parser)?;
            let with_offset = WithOffset::maybe_parse(parser)?;
            return Ok(FromNode {
                alias,
                body: FromNodeBody::Unnest(FromUnnest { exprs, with_offset }),
                location,
            });
        }

        let reference = ObjectReference::parse(parser)?;

        if parser.peek_token() == Some(&Token::LeftParen) {
            let args = parser.nested(|parser| {
                parser.expect_token(&Token::LeftParen)?;
                if parser.consume_token(&Token::RightParen) {
                    return Ok(Vec::new());
                }
                let args = parser.parse_comma_separated(TableFunctionArg::parse)?;
                parser.expect_token(&Token::RightParen)?;
                Ok(args)
            })?;
            let alias = Self::maybe_parse_alias(parser)?;
            return Ok(FromNode {
                alias,
                body: FromNodeBody::TableFunction(FromTableFunction { reference, args }),
                location,
            });
        }

        let hints = Hint::parse_hints(parser)?;
        let alias = Self::maybe_parse_alias(parser)?;
        let with_offset = WithOffset::maybe_parse(parser)?;

        Ok(FromNode {
            alias,
            body: FromNodeBody::BaseTable(FromBaseTable {
                reference,
                hints,
                with_offset,
            }),
            location,
        })
    }

    fn maybe_parse_alias(parser: &mut Parser) -> Result<Option<Ident>> {
        parser.parse_alias(RESERVED_FOR_TABLE_ALIAS)
    }
}

impl WithOffset {
    fn maybe_parse(parser: &mut Parser) -> Result<Option<Self>> {
        let location = parser.location();
        if !parser.parse_keyword_sequence(&[Keyword::WITH, Keyword::OFFSET]) {
            return Ok(None);
        }
        let alias = parser.parse_alias(RESERVED_FOR_TABLE_ALIAS)?;
        Ok(Some(WithOffset { alias, location }))
    }
}

impl AstParseable for TableFunctionArg {
    fn parse(parser: &mut Parser) -> Result<Self> {
        if parser.parse_keyword(Keyword::TABLE) {
            return Ok(TableFunctionArg::Table(ObjectReference::parse(parser)?));
        }
        if parser.parse_keyword(Keyword::MODEL) {
            return Ok(TableFunctionArg::Model(ObjectReference::parse(parser)?));
        }
        if parser.parse_keyword(Keyword::CONNECTION) {
            return Ok(TableFunctionArg::Connection(ObjectReference::parse(parser)?));
        }
        if parser.peek_token() == Some(&Token::LeftParen)
            && (parser.nth_is_keyword(1, Keyword::SELECT)
                || parser.nth_is_keyword(1, Keyword::WITH))
        {
            parser.next();
            let query = QueryNode::parse(parser)?;
            parser.expect_token(&Token::RightParen)?;
            return Ok(TableFunctionArg::Query(Box::new(query)));
        }
        Ok(TableFunctionArg::Expr(Expr::parse(parser)?))
    }
}

impl FromPivot {
    fn parse_body(parser: &mut Parser, input: FromNode) -> Result<Self> {
        parser.expect_token(&Token::LeftParen)?;
        let aggregates = parser.parse_comma_separated(|parser| {
            let expr = Expr::parse(parser)?;
            let alias = parser.parse_alias(&[Keyword::FOR])?;
            Ok(PivotAggregate { expr, alias })
        })?;
        parser.expect_keyword(Keyword::FOR)?;
        let for_expr = Expr::parse_no_containment(parser)?;
        parser.expect_keyword(Keyword::IN)?;
        let values = parser.parse_parenthesized_comma_separated(|parser| {
            let expr = Expr::parse(parser)?;
            let alias = parser.parse_alias(&[])?;
            Ok(PivotValue { expr, alias })
        })?;
        parser.expect_token(&Token::RightParen)?;

        Ok(FromPivot {
            input: Box::new(input),
            aggregates,
            for_expr,
            values,
        })
    }
}

impl FromUnpivot {
    fn parse_body(parser: &mut Parser, input: FromNode) -> Result<Self> {
        let include_nulls = if parser.parse_keyword_sequence(&[Keyword::INCLUDE, Keyword::NULLS]) {
            true
        } else {
            parser.parse_keyword_sequence(&[Keyword::EXCLUDE, Keyword::NULLS]);
            false
        };

        parser.expect_token(&Token::LeftParen)?;
        let value_columns = Self::parse_column_list(parser)?;
        parser.expect_keyword(Keyword::FOR)?;
        let name_column = Ident::parse(parser)?;
        parser.expect_keyword(Keyword::IN)?;
        let column_groups = parser.parse_parenthesized_comma_separated(|parser| {
            let columns = Self::parse_column_list(parser)?;
            let label = if parser.parse_keyword(Keyword::AS) {
                Some(Expr::parse(parser)?)
            } else {
                None
            };
            Ok(UnpivotColumnGroup { columns, label })
        })?;
        parser.expect_token(&Token::RightParen)?;

        Ok(FromUnpivot {
            input: Box::new(input),
            include_nulls,
            value_columns,
            name_column,
            column_groups,
        })
    }

    /// Either a single column, or a parenthesized list of columns.
    fn parse_column_list(parser: &mut Parser) -> Result<Vec<Ident>> {
        if parser.peek_token() == Some(&Token::LeftParen) {
            parser.parse_parenthesized_comma_separated(Ident::parse)
        } else {
            Ok(vec![Ident::parse(parser)?])
        }
    }
}

impl FromSample {
    fn parse_body(parser: &mut Parser, input: FromNode) -> Result<Self> {
        let location = parser.location();
        let method = match parser.parse_one_of_keywords(&[
            Keyword::BERNOULLI,
            Keyword::SYSTEM,
            Keyword::RESERVOIR,
        ]) {
            Some(Keyword::BERNOULLI) => SampleMethod::Bernoulli,
            Some(Keyword::SYSTEM) => SampleMethod::System,
            Some(_) => SampleMethod::Reservoir,
            None => {
                return Err(
                    SqlError::new("Expected sample method BERNOULLI, SYSTEM, or RESERVOIR")
                        .at(location),
                );
            }
        };

        parser.expect_token(&Token::LeftParen)?;
        let size = Expr::parse(parser)?;
        let unit = match parser.parse_one_of_keywords(&[Keyword::PERCENT, Keyword::ROWS]) {
            Some(Keyword::PERCENT) => SampleUnit::Percent,
            Some(_) => SampleUnit::Rows,
            None => return Err(parser.unexpected("PERCENT or ROWS")),
        };
        parser.expect_token(&Token::RightParen)?;

        let repeatable = if parser.parse_keyword(Keyword::REPEATABLE) {
            parser.expect_token(&Token::LeftParen)?;
            let seed = Expr::parse(parser)?;
            parser.expect_token(&Token::RightParen)?;
            Some(seed)
        } else {
            None
        };

        Ok(FromSample {
            input: Box::new(input),
            method,
            size,
            unit,
            repeatable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use pretty_assertions::assert_eq;

    fn base_table(node: &FromNode) -> &FromBaseTable {
        match &node.body {
            FromNodeBody::BaseTable(table) => table,
            other => panic!("not a base table: {other:?}"),
        }
    }

    fn join(node: &FromNode) -> &FromJoin {
        match &node.body {
            FromNodeBody::Join(join) => join,
            other => panic!("not a join: {other:?}"),
        }
    }

    #[test]
    fn base_table_with_alias_and_hint() {
        let node: FromNode = parse_ast("db.t @{index = 'x'} AS a").unwrap();
        let table = base_table(&node);
        assert_eq!(ObjectReference::from_strings(["db", "t"]), table.reference);
        assert_eq!(1, table.hints.len());
        assert_eq!(Some(Ident::new("a")), node.alias);
    }

    #[test]
    fn joins_are_left_deep() {
        let node: FromNode = parse_ast("a JOIN b USING (k) LEFT JOIN c ON a.x = c.x, d").unwrap();
        let outer = join(&node);
        assert_eq!(JoinType::Comma, outer.join_type);
        let middle = join(&outer.left);
        assert_eq!(JoinType::Left, middle.join_type);
        assert!(matches!(middle.join_condition, JoinCondition::On(_)));
        let inner = join(&middle.left);
        assert_eq!(JoinType::Inner, inner.join_type);
        assert_eq!(JoinCondition::Using(vec![Ident::new("k")]), inner.join_condition);
    }

    #[test]
    fn parenthesized_right_join_operand() {
        let node: FromNode = parse_ast("a JOIN (b JOIN c ON true) ON true").unwrap();
        let outer = join(&node);
        assert!(matches!(outer.right.body, FromNodeBody::Join(_)));
    }

    #[test]
    fn subquery_with_alias() {
        let node: FromNode = parse_ast("(SELECT 1) AS s").unwrap();
        assert!(matches!(node.body, FromNodeBody::Subquery(_)));
        assert_eq!(Some(Ident::new("s")), node.alias);
    }

    #[test]
    fn unnest_with_offset() {
        let node: FromNode = parse_ast("UNNEST([1, 2]) AS x WITH OFFSET AS o").unwrap();
        match &node.body {
            FromNodeBody::Unnest(unnest) => {
                assert_eq!(1, unnest.exprs.len());
                assert_eq!(
                    Some(Ident::new("o")),
                    unnest.with_offset.as_ref().unwrap().alias
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(Some(Ident::new("x")), node.alias);
    }

    #[test]
    fn table_function_args() {
        let node: FromNode =
            parse_ast("tvf(1, TABLE t, (SELECT 1), MODEL m, CONNECTION c) AS f").unwrap();
        match &node.body {
            FromNodeBody::TableFunction(tvf) => {
                assert_eq!(5, tvf.args.len());
                assert!(matches!(tvf.args[0], TableFunctionArg::Expr(_)));
                assert!(matches!(tvf.args[1], TableFunctionArg::Table(_)));
                assert!(matches!(tvf.args[2], TableFunctionArg::Query(_)));
                assert!(matches!(tvf.args[3], TableFunctionArg::Model(_)));
                assert!(matches!(tvf.args[4], TableFunctionArg::Connection(_)));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pivot() {
        let node: FromNode =
            parse_ast("t PIVOT(sum(x) AS s FOR y IN ('a', 'b' AS bee)) AS p").unwrap();
        match &node.body {
            FromNodeBody::Pivot(pivot) => {
                assert_eq!(Some(Ident::new("s")), pivot.aggregates[0].alias);
                assert_eq!(2, pivot.values.len());
                assert_eq!(Some(Ident::new("bee")), pivot.values[1].alias);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(Some(Ident::new("p")), node.alias);
    }

    #[test]
    fn unpivot_multi_column() {
        let node: FromNode =
            parse_ast("t UNPIVOT INCLUDE NULLS ((v1, v2) FOR n IN ((a, b) AS 'ab', (c, d)))")
                .unwrap();
        match &node.body {
            FromNodeBody::Unpivot(unpivot) => {
                assert!(unpivot.include_nulls);
                assert_eq!(2, unpivot.value_columns.len());
                assert_eq!(2, unpivot.column_groups.len());
                assert!(unpivot.column_groups[1].label.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tablesample() {
        let node: FromNode = parse_ast("t TABLESAMPLE RESERVOIR (10 ROWS) REPEATABLE (4)").unwrap();
        match &node.body {
            FromNodeBody::Sample(sample) => {
                assert_eq!(SampleMethod::Reservoir, sample.method);
                assert_eq!(SampleUnit::Rows, sample.unit);
                assert!(sample.repeatable.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn full_union_is_not_a_join() {
        let toks = crate::tokens::Tokenizer::new("t FULL UNION ALL CORRESPONDING")
            .tokenize()
            .unwrap();
        let mut parser = Parser::with_tokens(toks);
        let node = FromNode::parse(&mut parser).unwrap();
        base_table(&node);
        assert!(parser.next_is_keyword(Keyword::FULL));
    }
}
