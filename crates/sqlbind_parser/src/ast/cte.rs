use sqlbind_error::{Location, Result};

use super::{AstParseable, Ident, QueryNode};
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonTableExprDefs {
    pub recursive: bool,
    pub ctes: Vec<CommonTableExpr>,
}

impl AstParseable for CommonTableExprDefs {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_keyword(Keyword::WITH)?;
        let recursive = parser.parse_keyword(Keyword::RECURSIVE);
        let ctes = parser.parse_comma_separated(CommonTableExpr::parse)?;
        Ok(CommonTableExprDefs { recursive, ctes })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonTableExpr {
    pub alias: Ident,
    pub body: Box<QueryNode>,
    pub location: Location,
}

impl AstParseable for CommonTableExpr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        let alias = Ident::parse(parser)?;
        parser.expect_keyword(Keyword::AS)?;
        parser.expect_token(&Token::LeftParen)?;
        let body = parser.nested(QueryNode::parse)?;
        parser.expect_token(&Token::RightParen)?;

        Ok(CommonTableExpr {
            alias,
            body: Box::new(body),
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use pretty_assertions::assert_eq;

    #[test]
    fn recursive_with_two_entries() {
        let defs: CommonTableExprDefs =
            parse_ast("WITH RECURSIVE a AS (SELECT 1), b AS (SELECT 2)").unwrap();
        assert!(defs.recursive);
        let aliases: Vec<_> = defs.ctes.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(vec!["a", "b"], aliases);
    }

    #[test]
    fn missing_as() {
        parse_ast::<CommonTableExprDefs>("WITH a (SELECT 1)").unwrap_err();
    }
}
