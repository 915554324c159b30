use std::fmt;

use sqlbind_error::{ErrorKind, Location, Result, SqlError};

use super::{AstParseable, DataType, Ident, ObjectReference, OrderByNode, QueryNode};
use crate::keywords::{Keyword, is_reserved};
use crate::parser::Parser;
use crate::tokens::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    /// Plus, e.g. `+9`
    Plus,
    /// Minus, e.g. `-9`
    Minus,
    /// Not, e.g. `NOT(true)`
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    /// Plus, e.g. `a + b`
    Plus,
    /// Minus, e.g. `a - b`
    Minus,
    /// Multiply, e.g. `a * b`
    Multiply,
    /// Divide, e.g. `a / b`
    Divide,
    /// Modulo, e.g. `a % b`
    Modulo,
    /// String/Array Concat operator, e.g. `a || b`
    StringConcat,
    /// Greater than, e.g. `a > b`
    Gt,
    /// Less than, e.g. `a < b`
    Lt,
    /// Greater equal, e.g. `a >= b`
    GtEq,
    /// Less equal, e.g. `a <= b`
    LtEq,
    /// Equal, e.g. `a = b`
    Eq,
    /// Not equal, e.g. `a <> b`
    NotEq,
    /// And, e.g. `a AND b`
    And,
    /// Or, e.g. `a OR b`
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::StringConcat => "||",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// Unparsed number literal.
    Number(String),
    /// String literal.
    SingleQuotedString(String),
    /// Boolean literal.
    Boolean(bool),
    /// Null literal
    Null,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::SingleQuotedString(s) => write!(f, "'{s}'"),
            Self::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Null => write!(f, "NULL"),
        }
    }
}

/// An expression along with where it starts in the query.
///
/// Equality only considers the expression itself.
#[derive(Debug, Clone, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Expr {
            kind,
            location: Location::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    /// Column or table identifier.
    Ident(Ident),
    /// Compound identifier.
    ///
    /// `table.col`
    CompoundIdent(Vec<Ident>),
    /// An expression literal,
    Literal(Literal),
    /// A literal with a type prefix, e.g. `DATE '2024-01-01'`.
    TypedString { datatype: DataType, value: String },
    UnaryExpr {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    /// A binary expression.
    BinaryExpr {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    /// `<expr> IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },
    /// `<expr> [NOT] BETWEEN <low> AND <high>`
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `<expr> [NOT] IN (<list>)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// `<expr> [NOT] IN (<subquery>)`
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<QueryNode>,
        negated: bool,
    },
    /// `<expr> [NOT] LIKE <pattern>`
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    /// A function call.
    Function(Function),
    Case {
        operand: Option<Box<Expr>>,
        conditions: Vec<Expr>,
        results: Vec<Expr>,
        else_expr: Option<Box<Expr>>,
    },
    /// `CAST(<expr> AS <type>)` or `SAFE_CAST(<expr> AS <type>)`
    Cast {
        datatype: DataType,
        expr: Box<Expr>,
        safe: bool,
    },
    /// A collation.
    ///
    /// `<expr> COLLATE <collation>`
    Collate { expr: Box<Expr>, collation: String },
    /// Parenthesized list of expressions, e.g. `(a, b)`.
    ///
    /// Produces an anonymous struct.
    Tuple(Vec<Expr>),
    /// `STRUCT(<expr> [AS <name>], ...)`
    Struct(Vec<StructField>),
    /// `[<expr>, ...]` or `ARRAY[<expr>, ...]`
    Array(Vec<Expr>),
    /// Scalar subquery.
    Subquery(Box<QueryNode>),
    /// `EXISTS(<subquery>)`
    Exists(Box<QueryNode>),
    /// `ARRAY(<subquery>)`
    ArraySubquery(Box<QueryNode>),
    /// `<expr>[<subscript>]`
    Subscript {
        expr: Box<Expr>,
        subscript: Box<Expr>,
    },
    /// Field access on an arbitrary expression, e.g. `(<expr>).field`.
    FieldAccess { expr: Box<Expr>, field: Ident },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub expr: Expr,
    pub alias: Option<Ident>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub reference: ObjectReference,
    pub distinct: bool,
    pub args: Vec<FunctionArg>,
    pub over: Option<WindowSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionArg {
    /// `*` as in `COUNT(*)`.
    Star,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByNode>,
}

// Precedences, ordered low to high.
const PREC_OR: u8 = 10;
const PREC_AND: u8 = 20;
const PREC_NOT: u8 = 30;
const PREC_IS: u8 = 40;
const PREC_COMPARISON: u8 = 50; // <=, =, etc
const PREC_CONTAINMENT: u8 = 60; // BETWEEN, IN, LIKE, etc
const PREC_EVERYTHING_ELSE: u8 = 70; // Anything without a specific precedence.
const PREC_ADD_SUB: u8 = 80;
const PREC_MUL_DIV_MOD: u8 = 90;
const PREC_UNARY: u8 = 100;
const PREC_COLLATE: u8 = 120;
const PREC_ARRAY_ELEM: u8 = 130; // [], .field

impl AstParseable for Expr {
    fn parse(parser: &mut Parser) -> Result<Self> {
        Self::parse_subexpr(parser, 0)
    }
}

impl Expr {
    pub fn new(kind: ExprKind, location: Location) -> Self {
        Expr { kind, location }
    }

    /// If this expression is a single integer literal, return it.
    pub fn as_integer_literal(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Literal(Literal::Number(n)) => n.parse::<i64>().ok(),
            ExprKind::UnaryExpr {
                op: UnaryOperator::Minus,
                expr,
            } => match &expr.kind {
                ExprKind::Literal(Literal::Number(n)) => n.parse::<i64>().ok().map(|v| -v),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the identifier path if this is a plain (possibly compound)
    /// identifier.
    pub fn as_path(&self) -> Option<&[Ident]> {
        match &self.kind {
            ExprKind::Ident(ident) => Some(std::slice::from_ref(ident)),
            ExprKind::CompoundIdent(idents) => Some(idents),
            _ => None,
        }
    }

    /// Parse an expression that stops before any IN, BETWEEN, or LIKE.
    pub(crate) fn parse_no_containment(parser: &mut Parser) -> Result<Self> {
        Self::parse_subexpr(parser, PREC_CONTAINMENT)
    }

    fn parse_subexpr(parser: &mut Parser, precedence: u8) -> Result<Self> {
        parser.nested(|parser| {
            let mut expr = Expr::parse_prefix(parser)?;

            loop {
                let next_precedence = Self::get_infix_precedence(parser);
                if precedence >= next_precedence {
                    break;
                }

                expr = Self::parse_infix(parser, expr, next_precedence)?;
            }

            Ok(expr)
        })
    }

    fn parse_prefix(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        let tok = match parser.peek() {
            Some(tok) => tok.token.clone(),
            None => {
                return Err(
                    SqlError::new("Expected prefix expression, found end of query").at(location)
                );
            }
        };

        let kind = match tok {
            Token::Word(w) => match w.keyword {
                Some(Keyword::TRUE) => {
                    parser.next();
                    ExprKind::Literal(Literal::Boolean(true))
                }
                Some(Keyword::FALSE) => {
                    parser.next();
                    ExprKind::Literal(Literal::Boolean(false))
                }
                Some(Keyword::NULL) => {
                    parser.next();
                    ExprKind::Literal(Literal::Null)
                }
                Some(Keyword::NOT) => {
                    parser.next();
                    ExprKind::UnaryExpr {
                        op: UnaryOperator::Not,
                        expr: Box::new(Expr::parse_subexpr(parser, PREC_NOT)?),
                    }
                }
                Some(Keyword::CASE) => {
                    parser.next();
                    Self::parse_case(parser)?
                }
                Some(Keyword::CAST) => {
                    parser.next();
                    Self::parse_cast(parser, false)?
                }
                Some(Keyword::EXISTS) => {
                    parser.next();
                    parser.expect_token(&Token::LeftParen)?;
                    let query = parser.nested(QueryNode::parse)?;
                    parser.expect_token(&Token::RightParen)?;
                    ExprKind::Exists(Box::new(query))
                }
                Some(Keyword::ARRAY) => {
                    parser.next();
                    if parser.consume_token(&Token::LeftParen) {
                        let query = parser.nested(QueryNode::parse)?;
                        parser.expect_token(&Token::RightParen)?;
                        ExprKind::ArraySubquery(Box::new(query))
                    } else {
                        Self::parse_array_literal(parser)?
                    }
                }
                Some(Keyword::STRUCT) => {
                    parser.next();
                    let fields = parser.parse_parenthesized_comma_separated(|parser| {
                        let expr = Expr::parse(parser)?;
                        let alias = if parser.parse_keyword(Keyword::AS) {
                            Some(Ident::parse(parser)?)
                        } else {
                            None
                        };
                        Ok(StructField { expr, alias })
                    })?;
                    ExprKind::Struct(fields)
                }
                Some(kw @ (Keyword::DATE | Keyword::TIMESTAMP | Keyword::JSON))
                    if matches!(parser.peek_nth_token(1), Some(Token::SingleQuotedString(_))) =>
                {
                    parser.next();
                    let value = match parser.next().map(|t| &t.token) {
                        Some(Token::SingleQuotedString(s)) => s.clone(),
                        _ => return Err(parser.unexpected("a string literal")),
                    };
                    let datatype = match kw {
                        Keyword::DATE => DataType::Date,
                        Keyword::TIMESTAMP => DataType::Timestamp,
                        _ => DataType::Json,
                    };
                    ExprKind::TypedString { datatype, value }
                }
                Some(kw) if is_reserved(kw) => {
                    return Err(SqlError::new(format!(
                        "Unexpected keyword {}. Expected an expression.",
                        w.value
                    ))
                    .at(location));
                }
                _ => {
                    if w.quote.is_none()
                        && w.value.eq_ignore_ascii_case("SAFE_CAST")
                        && parser.peek_nth_token(1) == Some(&Token::LeftParen)
                    {
                        parser.next();
                        Self::parse_cast(parser, true)?
                    } else {
                        Self::parse_path_or_function(parser)?
                    }
                }
            },
            Token::SingleQuotedString(s) => {
                parser.next();
                ExprKind::Literal(Literal::SingleQuotedString(s))
            }
            Token::Number(s) => {
                parser.next();
                ExprKind::Literal(Literal::Number(s))
            }
            Token::Minus | Token::Plus => {
                parser.next();
                let op = if tok == Token::Minus {
                    UnaryOperator::Minus
                } else {
                    UnaryOperator::Plus
                };
                ExprKind::UnaryExpr {
                    op,
                    expr: Box::new(Expr::parse_subexpr(parser, PREC_UNARY)?),
                }
            }
            Token::LeftBracket => Self::parse_array_literal(parser)?,
            Token::LeftParen => {
                parser.next();
                Self::parse_parenthesized(parser)?
            }
            other => {
                return Err(SqlError::new(format!(
                    "Unexpected token '{other}'. Expected expression."
                ))
                .at(location));
            }
        };

        Ok(Expr { kind, location })
    }

    /// Parse what follows an opening parenthesis.
    ///
    /// Either a subquery, a nested expression, or a tuple.
    fn parse_parenthesized(parser: &mut Parser) -> Result<ExprKind> {
        if starts_query(parser) {
            if parser.peek_token() != Some(&Token::LeftParen) {
                let query = parser.nested(QueryNode::parse)?;
                parser.expect_token(&Token::RightParen)?;
                return Ok(ExprKind::Subquery(Box::new(query)));
            }

            // Either `((SELECT 1) UNION ALL (SELECT 2))` or an expression
            // containing a subquery like `((SELECT 1) + 1)`.
            let idx = parser.index();
            match parser.nested(QueryNode::parse) {
                Ok(query) if parser.consume_token(&Token::RightParen) => {
                    return Ok(ExprKind::Subquery(Box::new(query)));
                }
                Err(e) if e.kind() == ErrorKind::ResourceExhausted => return Err(e),
                _ => parser.reset_to(idx),
            }
        }

        let mut exprs = parser.parse_comma_separated(Expr::parse)?;
        parser.expect_token(&Token::RightParen)?;

        if exprs.len() == 1 {
            // Parentheses only used for grouping.
            let expr = exprs.pop().map(|e| e.kind);
            return expr.ok_or_else(|| SqlError::internal("Missing parenthesized expression"));
        }

        Ok(ExprKind::Tuple(exprs))
    }

    fn parse_array_literal(parser: &mut Parser) -> Result<ExprKind> {
        parser.expect_token(&Token::LeftBracket)?;
        if parser.consume_token(&Token::RightBracket) {
            return Ok(ExprKind::Array(Vec::new()));
        }
        let exprs = parser.parse_comma_separated(Expr::parse)?;
        parser.expect_token(&Token::RightBracket)?;
        Ok(ExprKind::Array(exprs))
    }

    fn parse_cast(parser: &mut Parser, safe: bool) -> Result<ExprKind> {
        parser.expect_token(&Token::LeftParen)?;
        let expr = Expr::parse(parser)?;
        parser.expect_keyword(Keyword::AS)?;
        let datatype = DataType::parse(parser)?;
        parser.expect_token(&Token::RightParen)?;
        Ok(ExprKind::Cast {
            datatype,
            expr: Box::new(expr),
            safe,
        })
    }

    fn parse_case(parser: &mut Parser) -> Result<ExprKind> {
        let operand = if parser.next_is_keyword(Keyword::WHEN) {
            None
        } else {
            Some(Box::new(Expr::parse(parser)?))
        };

        let mut conditions = Vec::new();
        let mut results = Vec::new();
        while parser.parse_keyword(Keyword::WHEN) {
            conditions.push(Expr::parse(parser)?);
            parser.expect_keyword(Keyword::THEN)?;
            results.push(Expr::parse(parser)?);
        }
        if conditions.is_empty() {
            return Err(parser.unexpected("WHEN"));
        }

        let else_expr = if parser.parse_keyword(Keyword::ELSE) {
            Some(Box::new(Expr::parse(parser)?))
        } else {
            None
        };
        parser.expect_keyword(Keyword::END)?;

        Ok(ExprKind::Case {
            operand,
            conditions,
            results,
            else_expr,
        })
    }

    fn parse_path_or_function(parser: &mut Parser) -> Result<ExprKind> {
        let reference = ObjectReference::parse(parser)?;

        if parser.peek_token() == Some(&Token::LeftParen) {
            let function = Self::parse_function_call(parser, reference)?;
            return Ok(ExprKind::Function(function));
        }

        let mut idents = reference.0;
        if idents.len() == 1 {
            match idents.pop() {
                Some(ident) => Ok(ExprKind::Ident(ident)),
                None => Err(SqlError::internal("Missing identifier")),
            }
        } else {
            Ok(ExprKind::CompoundIdent(idents))
        }
    }

    fn parse_function_call(parser: &mut Parser, reference: ObjectReference) -> Result<Function> {
        parser.expect_token(&Token::LeftParen)?;

        let distinct = parser.parse_keyword(Keyword::DISTINCT);
        let args = if parser.consume_token(&Token::RightParen) {
            Vec::new()
        } else {
            let args = parser.parse_comma_separated(|parser| {
                if parser.consume_token(&Token::Mul) {
                    Ok(FunctionArg::Star)
                } else {
                    Ok(FunctionArg::Expr(Expr::parse(parser)?))
                }
            })?;
            parser.expect_token(&Token::RightParen)?;
            args
        };

        let over = if parser.parse_keyword(Keyword::OVER) {
            Some(WindowSpec::parse(parser)?)
        } else {
            None
        };

        Ok(Function {
            reference,
            distinct,
            args,
            over,
        })
    }

    fn parse_infix(parser: &mut Parser, prefix: Expr, precedence: u8) -> Result<Self> {
        let location = prefix.location;
        let tok = match parser.next() {
            Some(tok) => tok.token.clone(),
            None => {
                return Err(SqlError::new("Expected infix expression, found end of query")
                    .at(location));
            }
        };

        let bin_op: Option<BinaryOperator> = match &tok {
            Token::DoubleEq | Token::Eq => Some(BinaryOperator::Eq),
            Token::Neq => Some(BinaryOperator::NotEq),
            Token::Gt => Some(BinaryOperator::Gt),
            Token::GtEq => Some(BinaryOperator::GtEq),
            Token::Lt => Some(BinaryOperator::Lt),
            Token::LtEq => Some(BinaryOperator::LtEq),
            Token::Plus => Some(BinaryOperator::Plus),
            Token::Minus => Some(BinaryOperator::Minus),
            Token::Mul => Some(BinaryOperator::Multiply),
            Token::Div => Some(BinaryOperator::Divide),
            Token::Mod => Some(BinaryOperator::Modulo),
            Token::Concat => Some(BinaryOperator::StringConcat),
            Token::Word(w) => match w.keyword {
                Some(Keyword::AND) => Some(BinaryOperator::And),
                Some(Keyword::OR) => Some(BinaryOperator::Or),
                _ => None,
            },
            _ => None,
        };

        if let Some(op) = bin_op {
            let right = Expr::parse_subexpr(parser, precedence)?;
            return Ok(Expr::new(
                ExprKind::BinaryExpr {
                    left: Box::new(prefix),
                    op,
                    right: Box::new(right),
                },
                location,
            ));
        }

        let kind = match tok {
            Token::LeftBracket => {
                let subscript = Expr::parse(parser)?;
                parser.expect_token(&Token::RightBracket)?;
                ExprKind::Subscript {
                    expr: Box::new(prefix),
                    subscript: Box::new(subscript),
                }
            }
            Token::Period => {
                let field = Ident::parse(parser)?;
                ExprKind::FieldAccess {
                    expr: Box::new(prefix),
                    field,
                }
            }
            Token::Word(w) => match w.keyword {
                Some(Keyword::IS) => {
                    let negated = parser.parse_keyword(Keyword::NOT);
                    parser.expect_keyword(Keyword::NULL)?;
                    ExprKind::IsNull {
                        expr: Box::new(prefix),
                        negated,
                    }
                }
                Some(Keyword::COLLATE) => {
                    let collation = match parser.next().map(|t| &t.token) {
                        Some(Token::SingleQuotedString(s)) => s.clone(),
                        _ => return Err(parser.unexpected("a collation string")),
                    };
                    ExprKind::Collate {
                        expr: Box::new(prefix),
                        collation,
                    }
                }
                Some(Keyword::NOT) => {
                    match parser.parse_one_of_keywords(&[
                        Keyword::IN,
                        Keyword::BETWEEN,
                        Keyword::LIKE,
                    ]) {
                        Some(kw) => Self::parse_containment(parser, prefix, kw, true)?,
                        None => return Err(parser.unexpected("IN, BETWEEN, or LIKE")),
                    }
                }
                Some(kw @ (Keyword::IN | Keyword::BETWEEN | Keyword::LIKE)) => {
                    Self::parse_containment(parser, prefix, kw, false)?
                }
                _ => {
                    return Err(SqlError::new(format!(
                        "Unable to parse '{}' as an infix operator",
                        w.value
                    ))
                    .at(location));
                }
            },
            other => {
                return Err(SqlError::new(format!(
                    "Unable to parse token '{other}' as an infix operator"
                ))
                .at(location));
            }
        };

        Ok(Expr::new(kind, location))
    }

    fn parse_containment(
        parser: &mut Parser,
        prefix: Expr,
        keyword: Keyword,
        negated: bool,
    ) -> Result<ExprKind> {
        match keyword {
            Keyword::IN => {
                parser.expect_token(&Token::LeftParen)?;
                if starts_query(parser) {
                    let subquery = parser.nested(QueryNode::parse)?;
                    parser.expect_token(&Token::RightParen)?;
                    Ok(ExprKind::InSubquery {
                        expr: Box::new(prefix),
                        subquery: Box::new(subquery),
                        negated,
                    })
                } else {
                    let list = parser.parse_comma_separated(Expr::parse)?;
                    parser.expect_token(&Token::RightParen)?;
                    Ok(ExprKind::InList {
                        expr: Box::new(prefix),
                        list,
                        negated,
                    })
                }
            }
            Keyword::BETWEEN => {
                let low = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
                parser.expect_keyword(Keyword::AND)?;
                let high = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
                Ok(ExprKind::Between {
                    expr: Box::new(prefix),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            _ => {
                let pattern = Expr::parse_subexpr(parser, PREC_CONTAINMENT)?;
                Ok(ExprKind::Like {
                    expr: Box::new(prefix),
                    pattern: Box::new(pattern),
                    negated,
                })
            }
        }
    }

    /// Get the relative precedence of the next operator.
    ///
    /// Returns zero if the next token isn't an infix operator.
    fn get_infix_precedence(parser: &Parser) -> u8 {
        let tok = match parser.peek_token() {
            Some(tok) => tok,
            None => return 0,
        };

        match tok {
            Token::Word(w) => match w.keyword {
                Some(Keyword::OR) => PREC_OR,
                Some(Keyword::AND) => PREC_AND,
                Some(Keyword::NOT) => {
                    // Precedence depends on keyword following it.
                    match parser.peek_nth(1).and_then(|t| t.keyword()) {
                        Some(Keyword::IN | Keyword::BETWEEN | Keyword::LIKE) => PREC_CONTAINMENT,
                        _ => 0,
                    }
                }
                Some(Keyword::IS) => PREC_IS,
                Some(Keyword::IN | Keyword::BETWEEN | Keyword::LIKE) => PREC_CONTAINMENT,
                Some(Keyword::COLLATE) => PREC_COLLATE,
                _ => 0,
            },

            // Equalities
            Token::Eq
            | Token::DoubleEq
            | Token::Neq
            | Token::Lt
            | Token::LtEq
            | Token::Gt
            | Token::GtEq => PREC_COMPARISON,

            // Numeric operators
            Token::Plus | Token::Minus => PREC_ADD_SUB,
            Token::Mul | Token::Div | Token::Mod => PREC_MUL_DIV_MOD,

            // Concat
            Token::Concat => PREC_EVERYTHING_ELSE,

            // Subscript, field access
            Token::LeftBracket | Token::Period => PREC_ARRAY_ELEM,

            _ => 0,
        }
    }
}

/// Check if the tokens following any number of opening parentheses start a
/// query.
pub(crate) fn starts_query(parser: &Parser) -> bool {
    let mut n = 0;
    while parser.peek_nth_token(n) == Some(&Token::LeftParen) {
        n += 1;
    }
    parser.nth_is_keyword(n, Keyword::SELECT) || parser.nth_is_keyword(n, Keyword::WITH)
}

impl AstParseable for WindowSpec {
    fn parse(parser: &mut Parser) -> Result<Self> {
        parser.expect_token(&Token::LeftParen)?;

        let partition_by = if parser.parse_keyword_sequence(&[Keyword::PARTITION, Keyword::BY]) {
            parser.parse_comma_separated(Expr::parse)?
        } else {
            Vec::new()
        };

        let order_by = if parser.parse_keyword_sequence(&[Keyword::ORDER, Keyword::BY]) {
            parser.parse_comma_separated(OrderByNode::parse)?
        } else {
            Vec::new()
        };

        parser.expect_token(&Token::RightParen)?;

        Ok(WindowSpec {
            partition_by,
            order_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use pretty_assertions::assert_eq;

    fn ident(s: &str) -> Expr {
        ExprKind::Ident(Ident::new(s)).into()
    }

    fn number(s: &str) -> Expr {
        ExprKind::Literal(Literal::Number(s.to_string())).into()
    }

    fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        ExprKind::BinaryExpr {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
        .into()
    }

    #[test]
    fn precedence_mul_over_add() {
        let expr: Expr = parse_ast("a + b * 2").unwrap();
        let expected = binary(
            ident("a"),
            BinaryOperator::Plus,
            binary(ident("b"), BinaryOperator::Multiply, number("2")),
        );
        assert_eq!(expected, expr);
    }

    #[test]
    fn left_associative_subtraction() {
        let expr: Expr = parse_ast("a - b - c").unwrap();
        let expected = binary(
            binary(ident("a"), BinaryOperator::Minus, ident("b")),
            BinaryOperator::Minus,
            ident("c"),
        );
        assert_eq!(expected, expr);
    }

    #[test]
    fn between_binds_tighter_than_and() {
        let expr: Expr = parse_ast("a BETWEEN 1 AND 2 AND b").unwrap();
        let between: Expr = ExprKind::Between {
            expr: Box::new(ident("a")),
            low: Box::new(number("1")),
            high: Box::new(number("2")),
            negated: false,
        }
        .into();
        assert_eq!(binary(between, BinaryOperator::And, ident("b")), expr);
    }

    #[test]
    fn compound_ident_and_field_access() {
        let expr: Expr = parse_ast("t.s.f").unwrap();
        assert_eq!(
            Expr::from(ExprKind::CompoundIdent(vec![
                Ident::new("t"),
                Ident::new("s"),
                Ident::new("f")
            ])),
            expr
        );

        let expr: Expr = parse_ast("(x).f").unwrap();
        assert_eq!(
            Expr::from(ExprKind::FieldAccess {
                expr: Box::new(ident("x")),
                field: Ident::new("f"),
            }),
            expr
        );
    }

    #[test]
    fn function_with_window() {
        let expr: Expr = parse_ast("sum(DISTINCT a) OVER (PARTITION BY b ORDER BY c)").unwrap();
        let function = match expr.kind {
            ExprKind::Function(f) => f,
            other => panic!("unexpected: {other:?}"),
        };
        assert!(function.distinct);
        let over = function.over.unwrap();
        assert_eq!(vec![ident("b")], over.partition_by);
        assert_eq!(1, over.order_by.len());
    }

    #[test]
    fn count_star() {
        let expr: Expr = parse_ast("count(*)").unwrap();
        match expr.kind {
            ExprKind::Function(f) => assert_eq!(vec![FunctionArg::Star], f.args),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tuple_and_nested() {
        let expr: Expr = parse_ast("(a, b)").unwrap();
        assert_eq!(
            Expr::from(ExprKind::Tuple(vec![ident("a"), ident("b")])),
            expr
        );

        let expr: Expr = parse_ast("((a))").unwrap();
        assert_eq!(ident("a"), expr);
    }

    #[test]
    fn scalar_subquery() {
        let expr: Expr = parse_ast("(SELECT 1)").unwrap();
        assert!(matches!(expr.kind, ExprKind::Subquery(_)));
    }

    #[test]
    fn not_in_list() {
        let expr: Expr = parse_ast("a NOT IN (1, 2)").unwrap();
        assert_eq!(
            Expr::from(ExprKind::InList {
                expr: Box::new(ident("a")),
                list: vec![number("1"), number("2")],
                negated: true,
            }),
            expr
        );
    }

    #[test]
    fn typed_literals_and_casts() {
        let expr: Expr = parse_ast("DATE '2024-01-01'").unwrap();
        assert_eq!(
            Expr::from(ExprKind::TypedString {
                datatype: DataType::Date,
                value: "2024-01-01".to_string()
            }),
            expr
        );

        let expr: Expr = parse_ast("SAFE_CAST(a AS STRING)").unwrap();
        assert_eq!(
            Expr::from(ExprKind::Cast {
                datatype: DataType::String,
                expr: Box::new(ident("a")),
                safe: true,
            }),
            expr
        );
    }

    #[test]
    fn location_is_start_of_expression() {
        let expr: Expr = parse_ast("  a + 1").unwrap();
        assert_eq!(Location::new(1, 3, 2), expr.location);
    }

    #[test]
    fn integer_literal() {
        assert_eq!(Some(3), parse_ast::<Expr>("3").unwrap().as_integer_literal());
        assert_eq!(Some(-3), parse_ast::<Expr>("-3").unwrap().as_integer_literal());
        assert_eq!(None, parse_ast::<Expr>("3.5").unwrap().as_integer_literal());
    }
}
