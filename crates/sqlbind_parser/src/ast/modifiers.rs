use sqlbind_error::{Location, Result};

use super::{AstParseable, Expr};
use crate::keywords::Keyword;
use crate::parser::Parser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByModifier {
    pub order_by_nodes: Vec<OrderByNode>,
    pub location: Location,
}

impl AstParseable for OrderByModifier {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        parser.expect_keyword_sequence(&[Keyword::ORDER, Keyword::BY])?;
        let order_by_nodes = parser.parse_comma_separated(OrderByNode::parse)?;
        Ok(OrderByModifier {
            order_by_nodes,
            location,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderByType {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderByNulls {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByNode {
    pub typ: Option<OrderByType>,
    pub nulls: Option<OrderByNulls>,
    pub expr: Expr,
}

impl AstParseable for OrderByNode {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let expr = Expr::parse(parser)?;

        let typ = match parser.parse_one_of_keywords(&[Keyword::ASC, Keyword::DESC]) {
            Some(Keyword::ASC) => Some(OrderByType::Asc),
            Some(Keyword::DESC) => Some(OrderByType::Desc),
            _ => None,
        };

        let nulls = if parser.parse_keyword_sequence(&[Keyword::NULLS, Keyword::FIRST]) {
            Some(OrderByNulls::First)
        } else if parser.parse_keyword_sequence(&[Keyword::NULLS, Keyword::LAST]) {
            Some(OrderByNulls::Last)
        } else {
            None
        };

        Ok(OrderByNode { typ, nulls, expr })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitModifier {
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl LimitModifier {
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }
}

impl AstParseable for LimitModifier {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut limit = None;
        let mut offset = None;

        if parser.parse_keyword(Keyword::LIMIT) {
            limit = Some(Expr::parse(parser)?);
        }

        if parser.parse_keyword(Keyword::OFFSET) {
            offset = Some(Expr::parse(parser)?);
        }

        Ok(LimitModifier { limit, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use crate::ast::{ExprKind, Ident, Literal};
    use pretty_assertions::assert_eq;

    #[test]
    fn order_by_desc_nulls_first() {
        let node: OrderByNode = parse_ast("a DESC NULLS FIRST").unwrap();
        let expected = OrderByNode {
            typ: Some(OrderByType::Desc),
            nulls: Some(OrderByNulls::First),
            expr: ExprKind::Ident(Ident::new("a")).into(),
        };
        assert_eq!(expected, node);
    }

    #[test]
    fn limit_and_offset() {
        let modifier: LimitModifier = parse_ast("LIMIT 10 OFFSET 2").unwrap();
        let expected = LimitModifier {
            limit: Some(ExprKind::Literal(Literal::Number("10".to_string())).into()),
            offset: Some(ExprKind::Literal(Literal::Number("2".to_string())).into()),
        };
        assert_eq!(expected, modifier);
    }

    #[test]
    fn limit_empty() {
        let modifier: LimitModifier = parse_ast("").unwrap();
        assert!(modifier.is_empty());
    }
}
