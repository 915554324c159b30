use sqlbind_error::{Location, Result};

use super::{AstParseable, Expr, ExprKind, FromNode, Ident, ObjectReference};
use crate::keywords::{Keyword, RESERVED_FOR_COLUMN_ALIAS};
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectNode {
    /// `SELECT @{...}` hints.
    pub hints: Vec<Hint>,
    /// SELECT DISTINCT
    pub distinct: bool,
    /// `SELECT AS STRUCT` or `SELECT AS VALUE`.
    pub select_as: Option<SelectAs>,
    /// Projection list. May include wildcards.
    pub projections: Vec<SelectExpr>,
    /// FROM
    pub from: Option<FromNode>,
    /// WHERE
    pub where_expr: Option<Expr>,
    /// GROUP BY
    pub group_by: Option<GroupByNode>,
    /// HAVING
    pub having: Option<Expr>,
    /// QUALIFY
    pub qualify: Option<Expr>,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectAs {
    Struct,
    Value,
}

impl AstParseable for SelectNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        parser.expect_keyword(Keyword::SELECT)?;

        let hints = Hint::parse_hints(parser)?;

        let distinct = match parser.parse_one_of_keywords(&[Keyword::ALL, Keyword::DISTINCT]) {
            Some(Keyword::DISTINCT) => true,
            _ => false,
        };

        let select_as = if parser.nth_is_keyword(0, Keyword::AS) {
            if parser.nth_is_keyword(1, Keyword::STRUCT) {
                parser.next();
                parser.next();
                Some(SelectAs::Struct)
            } else if parser.nth_is_keyword(1, Keyword::VALUE) {
                parser.next();
                parser.next();
                Some(SelectAs::Value)
            } else {
                None
            }
        } else {
            None
        };

        let projections = parser.parse_comma_separated(SelectExpr::parse)?;

        let from = if parser.parse_keyword(Keyword::FROM) {
            Some(FromNode::parse(parser)?)
        } else {
            None
        };

        let where_expr = if parser.parse_keyword(Keyword::WHERE) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        let group_by = if parser.parse_keyword_sequence(&[Keyword::GROUP, Keyword::BY]) {
            Some(GroupByNode::parse(parser)?)
        } else {
            None
        };

        let having = if parser.parse_keyword(Keyword::HAVING) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        let qualify = if parser.parse_keyword(Keyword::QUALIFY) {
            Some(Expr::parse(parser)?)
        } else {
            None
        };

        Ok(SelectNode {
            hints,
            distinct,
            select_as,
            projections,
            from,
            where_expr,
            group_by,
            having,
            qualify,
            location,
        })
    }
}

/// A single `name = value` hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub name: ObjectReference,
    pub value: Expr,
}

impl Hint {
    /// Parse an optional `@{name = value, ...}` block.
    pub fn parse_hints(parser: &mut Parser) -> Result<Vec<Hint>> {
        if parser.peek_token() != Some(&Token::AtSign)
            || parser.peek_nth_token(1) != Some(&Token::LeftBrace)
        {
            return Ok(Vec::new());
        }
        parser.next();
        parser.next();

        let hints = parser.parse_comma_separated(|parser| {
            let name = ObjectReference::parse(parser)?;
            parser.expect_token(&Token::Eq)?;
            let value = Expr::parse(parser)?;
            Ok(Hint { name, value })
        })?;
        parser.expect_token(&Token::RightBrace)?;

        Ok(hints)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceColumn {
    pub col: Ident,
    pub expr: Expr,
}

/// `*` with its optional EXCEPT and REPLACE modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wildcard {
    pub exclude_cols: Vec<Ident>,
    pub replace_cols: Vec<ReplaceColumn>,
    pub location: Location,
}

impl Wildcard {
    fn parse_modifiers(parser: &mut Parser, location: Location) -> Result<Self> {
        let exclude_cols = if parser.next_is_keyword(Keyword::EXCEPT)
            && parser.peek_nth_token(1) == Some(&Token::LeftParen)
        {
            parser.next();
            parser.parse_parenthesized_comma_separated(Ident::parse)?
        } else {
            Vec::new()
        };

        let replace_cols = if parser.parse_keyword(Keyword::REPLACE) {
            parser.parse_parenthesized_comma_separated(|parser| {
                let expr = Expr::parse(parser)?;
                parser.expect_keyword(Keyword::AS)?;
                let col = Ident::parse(parser)?;
                Ok(ReplaceColumn { col, expr })
            })?
        } else {
            Vec::new()
        };

        Ok(Wildcard {
            exclude_cols,
            replace_cols,
            location,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectExpr {
    /// An unaliases expression.
    Expr(Expr),
    /// An aliased expression.
    ///
    /// `<expr> AS <alias>`
    AliasedExpr(Expr, Ident),
    /// A qualified wild card.
    ///
    /// `<reference>.*`
    QualifiedWildcard(ObjectReference, Wildcard),
    /// An unqualified wild card.
    ///
    /// `*`
    Wildcard(Wildcard),
}

impl AstParseable for SelectExpr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        if parser.consume_token(&Token::Mul) {
            return Ok(SelectExpr::Wildcard(Wildcard::parse_modifiers(
                parser, location,
            )?));
        }

        if Self::is_qualified_wildcard(parser) {
            let reference = ObjectReference::parse(parser)?;
            parser.expect_token(&Token::Period)?;
            parser.expect_token(&Token::Mul)?;
            let wildcard = Wildcard::parse_modifiers(parser, location)?;
            return Ok(SelectExpr::QualifiedWildcard(reference, wildcard));
        }

        let expr = Expr::parse(parser)?;
        match parser.parse_alias(RESERVED_FOR_COLUMN_ALIAS)? {
            Some(alias) => Ok(SelectExpr::AliasedExpr(expr, alias)),
            None => Ok(SelectExpr::Expr(expr)),
        }
    }
}

impl SelectExpr {
    /// Look ahead for `ident(.ident)*.*`.
    fn is_qualified_wildcard(parser: &Parser) -> bool {
        if !matches!(parser.peek_token(), Some(Token::Word(_))) {
            return false;
        }
        let mut n = 0;
        loop {
            if parser.peek_nth_token(n + 1) != Some(&Token::Period) {
                return false;
            }
            match parser.peek_nth_token(n + 2) {
                Some(Token::Mul) => return true,
                Some(Token::Word(_)) => n += 2,
                _ => return false,
            }
        }
    }

    pub fn get_alias(&self) -> Option<&Ident> {
        match self {
            Self::AliasedExpr(_, alias) => Some(alias),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupByNode {
    All { location: Location },
    Exprs { exprs: Vec<GroupByExpr> },
}

impl AstParseable for GroupByNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        if parser.parse_keyword(Keyword::ALL) {
            return Ok(GroupByNode::All { location });
        }
        let exprs = parser.parse_comma_separated(GroupByExpr::parse)?;
        Ok(GroupByNode::Exprs { exprs })
    }
}

/// An element inside ROLLUP or CUBE.
///
/// `ROLLUP((a, b), c)` has a multi-column element followed by a single column
/// element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingElement {
    Single(Expr),
    Multi(Vec<Expr>),
}

impl GroupingElement {
    pub fn exprs(&self) -> &[Expr] {
        match self {
            Self::Single(expr) => std::slice::from_ref(expr),
            Self::Multi(exprs) => exprs,
        }
    }
}

impl AstParseable for GroupingElement {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let expr = Expr::parse(parser)?;
        Ok(match expr.kind {
            ExprKind::Tuple(exprs) => GroupingElement::Multi(exprs),
            kind => GroupingElement::Single(Expr::new(kind, expr.location)),
        })
    }
}

/// An entry in `GROUPING SETS (...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingSet {
    /// A plain set of columns. Empty for `()`.
    Set(Vec<Expr>),
    Rollup(Vec<GroupingElement>),
    Cube(Vec<GroupingElement>),
}

impl AstParseable for GroupingSet {
    fn parse(parser: &mut Parser) -> Result<Self> {
        if parser.parse_keyword(Keyword::ROLLUP) {
            return Ok(GroupingSet::Rollup(
                parser.parse_parenthesized_comma_separated(GroupingElement::parse)?,
            ));
        }
        if parser.parse_keyword(Keyword::CUBE) {
            return Ok(GroupingSet::Cube(
                parser.parse_parenthesized_comma_separated(GroupingElement::parse)?,
            ));
        }
        if parser.peek_token() == Some(&Token::LeftParen)
            && parser.peek_nth_token(1) == Some(&Token::RightParen)
        {
            parser.next();
            parser.next();
            return Ok(GroupingSet::Set(Vec::new()));
        }
        Ok(match GroupingElement::parse(parser)? {
            GroupingElement::Single(expr) => GroupingSet::Set(vec![expr]),
            GroupingElement::Multi(exprs) => GroupingSet::Set(exprs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupByExpr {
    /// `GROUP BY <expr>`
    Expr(Expr),
    /// `GROUP BY ()`
    Empty(Location),
    /// `GROUP BY ROLLUP (<elements>)`
    Rollup(Vec<GroupingElement>, Location),
    /// `GROUP BY CUBE (<elements>)`
    Cube(Vec<GroupingElement>, Location),
    /// `GROUP BY GROUPING SETS (<sets>)`
    GroupingSets(Vec<GroupingSet>, Location),
}

impl AstParseable for GroupByExpr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        if parser.parse_keyword(Keyword::ROLLUP) {
            let elements = parser.parse_parenthesized_comma_separated(GroupingElement::parse)?;
            return Ok(GroupByExpr::Rollup(elements, location));
        }
        if parser.parse_keyword(Keyword::CUBE) {
            let elements = parser.parse_parenthesized_comma_separated(GroupingElement::parse)?;
            return Ok(GroupByExpr::Cube(elements, location));
        }
        if parser.parse_keyword_sequence(&[Keyword::GROUPING, Keyword::SETS]) {
            let sets = parser.parse_parenthesized_comma_separated(GroupingSet::parse)?;
            return Ok(GroupByExpr::GroupingSets(sets, location));
        }
        if parser.peek_token() == Some(&Token::LeftParen)
            && parser.peek_nth_token(1) == Some(&Token::RightParen)
        {
            parser.next();
            parser.next();
            return Ok(GroupByExpr::Empty(location));
        }
        Ok(GroupByExpr::Expr(Expr::parse(parser)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use crate::ast::Literal;
    use pretty_assertions::assert_eq;

    fn ident(s: &str) -> Expr {
        ExprKind::Ident(Ident::new(s)).into()
    }

    #[test]
    fn select_star_except_replace() {
        let node: SelectNode =
            parse_ast("SELECT * EXCEPT (a, b) REPLACE (c + 1 AS c) FROM t").unwrap();
        match &node.projections[0] {
            SelectExpr::Wildcard(wildcard) => {
                assert_eq!(vec![Ident::new("a"), Ident::new("b")], wildcard.exclude_cols);
                assert_eq!(1, wildcard.replace_cols.len());
                assert_eq!(Ident::new("c"), wildcard.replace_cols[0].col);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn qualified_wildcard() {
        let node: SelectNode = parse_ast("SELECT t.*, s.x.* FROM t").unwrap();
        match &node.projections[0] {
            SelectExpr::QualifiedWildcard(reference, wildcard) => {
                assert_eq!(&ObjectReference::from_strings(["t"]), reference);
                assert!(wildcard.exclude_cols.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
        match &node.projections[1] {
            SelectExpr::QualifiedWildcard(reference, _) => {
                assert_eq!(&ObjectReference::from_strings(["s", "x"]), reference)
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn implicit_alias() {
        let node: SelectNode = parse_ast("SELECT a b, c AS d, e").unwrap();
        assert_eq!(
            vec![
                SelectExpr::AliasedExpr(ident("a"), Ident::new("b")),
                SelectExpr::AliasedExpr(ident("c"), Ident::new("d")),
                SelectExpr::Expr(ident("e")),
            ],
            node.projections
        );
    }

    #[test]
    fn select_as_struct_and_distinct() {
        let node: SelectNode = parse_ast("SELECT DISTINCT AS STRUCT a, b").unwrap();
        assert!(node.distinct);
        assert_eq!(Some(SelectAs::Struct), node.select_as);

        let node: SelectNode = parse_ast("SELECT AS VALUE a").unwrap();
        assert_eq!(Some(SelectAs::Value), node.select_as);
    }

    #[test]
    fn hints() {
        let node: SelectNode = parse_ast("SELECT @{join_method = 'hash', x.y = 1} a").unwrap();
        assert_eq!(2, node.hints.len());
        assert_eq!(ObjectReference::from_strings(["x", "y"]), node.hints[1].name);
        assert_eq!(
            Expr::from(ExprKind::Literal(Literal::SingleQuotedString(
                "hash".to_string()
            ))),
            node.hints[0].value
        );
    }

    #[test]
    fn group_by_all() {
        let node: SelectNode = parse_ast("SELECT a, sum(b) FROM t GROUP BY ALL").unwrap();
        assert!(matches!(node.group_by, Some(GroupByNode::All { .. })));
    }

    #[test]
    fn rollup_multi_column_element() {
        let node: GroupByNode = parse_ast("ROLLUP((a, b), c)").unwrap();
        let exprs = match node {
            GroupByNode::Exprs { exprs } => exprs,
            other => panic!("unexpected: {other:?}"),
        };
        match &exprs[0] {
            GroupByExpr::Rollup(elements, _) => {
                assert_eq!(
                    &vec![
                        GroupingElement::Multi(vec![ident("a"), ident("b")]),
                        GroupingElement::Single(ident("c")),
                    ],
                    elements
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn grouping_sets_with_nested_rollup() {
        let node: GroupByNode = parse_ast("GROUPING SETS ((), a, (a, b), ROLLUP(c))").unwrap();
        let exprs = match node {
            GroupByNode::Exprs { exprs } => exprs,
            other => panic!("unexpected: {other:?}"),
        };
        match &exprs[0] {
            GroupByExpr::GroupingSets(sets, _) => {
                assert_eq!(
                    &vec![
                        GroupingSet::Set(Vec::new()),
                        GroupingSet::Set(vec![ident("a")]),
                        GroupingSet::Set(vec![ident("a"), ident("b")]),
                        GroupingSet::Rollup(vec![GroupingElement::Single(ident("c"))]),
                    ],
                    sets
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn group_by_empty() {
        let node: GroupByNode = parse_ast("()").unwrap();
        assert!(matches!(
            node,
            GroupByNode::Exprs { ref exprs } if matches!(exprs[0], GroupByExpr::Empty(_))
        ));
    }

    #[test]
    fn having_and_qualify() {
        let node: SelectNode =
            parse_ast("SELECT a FROM t GROUP BY a HAVING count(*) > 1 QUALIFY rank() OVER () = 1")
                .unwrap();
        assert!(node.having.is_some());
        assert!(node.qualify.is_some());
    }
}
