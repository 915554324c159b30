use std::fmt;

use sqlbind_error::{Location, Result, SqlError};

use super::{AstParseable, CommonTableExprDefs, Ident, LimitModifier, OrderByModifier, SelectNode};
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNode {
    pub ctes: Option<CommonTableExprDefs>,
    pub body: QueryNodeBody,
    pub order_by: Option<OrderByModifier>,
    pub limit: LimitModifier,
    pub location: Location,
}

impl AstParseable for QueryNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        let ctes = if parser.next_is_keyword(Keyword::WITH) {
            Some(CommonTableExprDefs::parse(parser)?)
        } else {
            None
        };

        let body = QueryNodeBody::parse(parser)?;

        let order_by = if parser.next_is_keyword(Keyword::ORDER) {
            Some(OrderByModifier::parse(parser)?)
        } else {
            None
        };

        let limit = LimitModifier::parse(parser)?;

        Ok(QueryNode {
            ctes,
            body,
            order_by,
            limit,
            location,
        })
    }
}

impl QueryNode {
    /// If this query has no WITH, ORDER BY, or LIMIT wrapping its body.
    pub fn is_bare(&self) -> bool {
        self.ctes.is_none() && self.order_by.is_none() && self.limit.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNodeBody {
    Select(Box<SelectNode>),
    Nested(Box<QueryNode>),
    Set(SetOp),
}

impl QueryNodeBody {
    pub fn location(&self) -> Location {
        match self {
            Self::Select(select) => select.location,
            Self::Nested(query) => query.location,
            Self::Set(set) => set.location,
        }
    }
}

/// A binary set operation.
///
/// Chains of set operations parse left-deep, `a UNION ALL b UNION ALL c`
/// becomes `(a UNION ALL b) UNION ALL c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOp {
    pub left: Box<QueryNodeBody>,
    pub right: Box<QueryNodeBody>,
    pub operation: SetOperation,
    pub all: bool,
    pub corresponding: Option<Corresponding>,
    /// Location of the set operation keyword.
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperation {
    Union,
    Except,
    Intersect,
}

impl fmt::Display for SetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union => write!(f, "UNION"),
            Self::Except => write!(f, "EXCEPT"),
            Self::Intersect => write!(f, "INTERSECT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrespondingMode {
    Inner,
    Strict,
    Left,
    Full,
}

impl fmt::Display for CorrespondingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Strict => write!(f, "STRICT"),
            Self::Left => write!(f, "LEFT"),
            Self::Full => write!(f, "FULL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corresponding {
    pub mode: CorrespondingMode,
    /// Explicit column list from `CORRESPONDING BY (...)`.
    pub by: Option<Vec<Ident>>,
}

impl AstParseable for QueryNodeBody {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut body = Self::parse_operand(parser)?;

        while is_set_operation_start(parser) {
            let location = parser.location();

            let prefix =
                parser.parse_one_of_keywords(&[Keyword::FULL, Keyword::LEFT, Keyword::INNER]);
            if prefix.is_some() {
                parser.parse_keyword(Keyword::OUTER);
            }

            let operation = match parser.parse_one_of_keywords(&[
                Keyword::UNION,
                Keyword::EXCEPT,
                Keyword::INTERSECT,
            ]) {
                Some(Keyword::UNION) => SetOperation::Union,
                Some(Keyword::EXCEPT) => SetOperation::Except,
                Some(Keyword::INTERSECT) => SetOperation::Intersect,
                _ => return Err(parser.unexpected("UNION, EXCEPT, or INTERSECT")),
            };

            let all = match parser.parse_one_of_keywords(&[Keyword::ALL, Keyword::DISTINCT]) {
                Some(Keyword::ALL) => true,
                Some(_) => false,
                None => {
                    return Err(SqlError::new(format!(
                        "{operation} must be followed by ALL or DISTINCT"
                    ))
                    .at(parser.location()));
                }
            };

            let strict_location = parser.location();
            let strict = parser.parse_keyword(Keyword::STRICT);
            let corresponding = if parser.parse_keyword(Keyword::CORRESPONDING) {
                let mode = match (prefix, strict) {
                    (Some(_), true) => {
                        return Err(SqlError::new(
                            "STRICT cannot be combined with FULL, LEFT, or INNER",
                        )
                        .at(strict_location));
                    }
                    (Some(Keyword::FULL), false) => CorrespondingMode::Full,
                    (Some(Keyword::LEFT), false) => CorrespondingMode::Left,
                    (_, true) => CorrespondingMode::Strict,
                    _ => CorrespondingMode::Inner,
                };
                let by = if parser.parse_keyword(Keyword::BY) {
                    Some(parser.parse_parenthesized_comma_separated(Ident::parse)?)
                } else {
                    None
                };
                Some(Corresponding { mode, by })
            } else {
                if strict {
                    return Err(
                        SqlError::new("STRICT requires CORRESPONDING").at(strict_location)
                    );
                }
                if prefix.is_some() {
                    return Err(SqlError::new(format!(
                        "Outer mode on {operation} requires CORRESPONDING"
                    ))
                    .at(location));
                }
                None
            };

            let right = Self::parse_operand(parser)?;

            body = QueryNodeBody::Set(SetOp {
                left: Box::new(body),
                right: Box::new(right),
                operation,
                all,
                corresponding,
                location,
            });
        }

        Ok(body)
    }
}

impl QueryNodeBody {
    fn parse_operand(parser: &mut Parser) -> Result<Self> {
        if parser.next_is_keyword(Keyword::SELECT) {
            Ok(QueryNodeBody::Select(Box::new(SelectNode::parse(parser)?)))
        } else if parser.consume_token(&Token::LeftParen) {
            let nested = parser.nested(QueryNode::parse)?;
            parser.expect_token(&Token::RightParen)?;
            Ok(QueryNodeBody::Nested(Box::new(nested)))
        } else {
            Err(parser.unexpected("SELECT or '('"))
        }
    }
}

/// Check if the parser is positioned at the start of a set operation,
/// including an optional `FULL|LEFT|INNER [OUTER]` prefix.
pub(crate) fn is_set_operation_start(parser: &Parser) -> bool {
    let mut n = 0;
    if parser.nth_is_keyword(n, Keyword::FULL)
        || parser.nth_is_keyword(n, Keyword::LEFT)
        || parser.nth_is_keyword(n, Keyword::INNER)
    {
        n += 1;
        if parser.nth_is_keyword(n, Keyword::OUTER) {
            n += 1;
        }
    }
    parser.nth_is_keyword(n, Keyword::UNION)
        || parser.nth_is_keyword(n, Keyword::EXCEPT)
        || parser.nth_is_keyword(n, Keyword::INTERSECT)
}
