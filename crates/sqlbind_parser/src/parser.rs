use sqlbind_error::{Location, Result, SqlError};

use crate::ast::{AstParseable, Ident, QueryNode};
use crate::keywords::{Keyword, RESERVED_KEYWORDS};
use crate::tokens::{Token, TokenWithLocation, Tokenizer};

/// Default limit on how deeply parenthesized expressions and subqueries may
/// nest before parsing fails.
pub const DEFAULT_MAX_PARSE_DEPTH: usize = 128;

const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_SEGMENT_SIZE: usize = 4 * 1024 * 1024;

/// Parse a single query from a string.
///
/// A trailing semicolon is allowed.
pub fn parse_query(sql: &str) -> Result<QueryNode> {
    let toks = Tokenizer::new(sql).tokenize()?;
    let mut parser = Parser::with_tokens(toks);
    let query = QueryNode::parse(&mut parser)?;
    parser.consume_token(&Token::SemiColon);
    if let Some(tok) = parser.peek() {
        return Err(SqlError::new(format!(
            "Expected end of query, found '{}'",
            tok.token
        ))
        .at(tok.location));
    }
    Ok(query)
}

#[derive(Debug)]
pub struct Parser {
    toks: Vec<TokenWithLocation>,
    /// Index of token we should process next.
    idx: usize,
    /// Current nesting depth.
    depth: usize,
    max_depth: usize,
}

impl Parser {
    pub fn with_tokens(toks: Vec<TokenWithLocation>) -> Self {
        Parser {
            toks,
            idx: 0,
            depth: 0,
            max_depth: DEFAULT_MAX_PARSE_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Run `f` one nesting level deeper.
    ///
    /// Errors if the maximum nesting depth is exceeded.
    pub fn nested<T>(&mut self, f: impl FnOnce(&mut Parser) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(SqlError::resource_exhausted(format!(
                "Query exceeds maximum nesting depth of {}",
                self.max_depth
            ))
            .at(self.location()));
        }
        self.depth += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT_SIZE, || f(self));
        self.depth -= 1;
        result
    }

    /// Get the next token, advancing the parser.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&TokenWithLocation> {
        let tok = self.toks.get(self.idx)?;
        self.idx += 1;
        Some(tok)
    }

    pub fn peek(&self) -> Option<&TokenWithLocation> {
        self.toks.get(self.idx)
    }

    pub fn peek_nth(&self, n: usize) -> Option<&TokenWithLocation> {
        self.toks.get(self.idx + n)
    }

    pub fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|t| &t.token)
    }

    pub fn peek_nth_token(&self, n: usize) -> Option<&Token> {
        self.peek_nth(n).map(|t| &t.token)
    }

    /// Location of the next token, or of the end of the last token if we're at
    /// the end of input.
    pub fn location(&self) -> Location {
        match self.peek() {
            Some(tok) => tok.location,
            None => self.toks.last().map(|t| t.location).unwrap_or_default(),
        }
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    /// Reset the parser to a previously saved index.
    pub fn reset_to(&mut self, idx: usize) {
        self.idx = idx;
    }

    pub fn next_is_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_some_and(|t| t.is_keyword(keyword))
    }

    pub fn nth_is_keyword(&self, n: usize, keyword: Keyword) -> bool {
        self.peek_nth(n).is_some_and(|t| t.is_keyword(keyword))
    }

    /// Parse a single keyword.
    pub fn parse_keyword(&mut self, keyword: Keyword) -> bool {
        if self.next_is_keyword(keyword) {
            self.idx += 1;
            return true;
        }
        false
    }

    /// Parse an exact sequence of keywords.
    ///
    /// If the sequence doesn't match, idx is not changed, and false is
    /// returned.
    pub fn parse_keyword_sequence(&mut self, keywords: &[Keyword]) -> bool {
        let matches = keywords
            .iter()
            .enumerate()
            .all(|(n, kw)| self.nth_is_keyword(n, *kw));
        if matches {
            self.idx += keywords.len();
        }
        matches
    }

    pub fn parse_one_of_keywords(&mut self, keywords: &[Keyword]) -> Option<Keyword> {
        let kw = self.peek()?.keyword()?;
        if keywords.contains(&kw) {
            self.idx += 1;
            return Some(kw);
        }
        None
    }

    pub fn expect_keyword(&mut self, keyword: Keyword) -> Result<()> {
        if self.parse_keyword(keyword) {
            return Ok(());
        }
        Err(self.unexpected(&format!("{keyword:?}")))
    }

    pub fn expect_keyword_sequence(&mut self, keywords: &[Keyword]) -> Result<()> {
        for keyword in keywords {
            self.expect_keyword(*keyword)?;
        }
        Ok(())
    }

    /// Consume the next token if it matches the expected token.
    pub fn consume_token(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.idx += 1;
            return true;
        }
        false
    }

    pub fn expect_token(&mut self, expected: &Token) -> Result<()> {
        if self.consume_token(expected) {
            return Ok(());
        }
        Err(self.unexpected(&format!("'{expected}'")))
    }

    /// Build an error for an unexpected next token.
    pub fn unexpected(&self, expected: &str) -> SqlError {
        match self.peek() {
            Some(tok) => SqlError::new(format!("Expected {expected}, found '{}'", tok.token))
                .at(tok.location),
            None => SqlError::new(format!("Expected {expected}, found end of query"))
                .at(self.location()),
        }
    }

    /// Parse a comma separated list of items.
    pub fn parse_comma_separated<T>(
        &mut self,
        mut f: impl FnMut(&mut Parser) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut values = vec![f(self)?];
        while self.consume_token(&Token::Comma) {
            values.push(f(self)?);
        }
        Ok(values)
    }

    /// Parse a comma separated list of items surrounded by parentheses.
    pub fn parse_parenthesized_comma_separated<T>(
        &mut self,
        f: impl FnMut(&mut Parser) -> Result<T>,
    ) -> Result<Vec<T>> {
        self.expect_token(&Token::LeftParen)?;
        let values = self.parse_comma_separated(f)?;
        self.expect_token(&Token::RightParen)?;
        Ok(values)
    }

    /// Parse an optional alias.
    ///
    /// An alias may be preceded by `AS`. Without `AS`, words that are
    /// reserved, or in the additional `reserved` list, are not treated as an
    /// alias.
    pub fn parse_alias(&mut self, reserved: &[Keyword]) -> Result<Option<Ident>> {
        if self.parse_keyword(Keyword::AS) {
            return Ok(Some(Ident::parse(self)?));
        }

        let is_alias = match self.peek_token() {
            Some(Token::Word(w)) => match w.keyword {
                Some(kw) => !RESERVED_KEYWORDS.contains(&kw) && !reserved.contains(&kw),
                None => true,
            },
            _ => false,
        };

        if is_alias {
            Ok(Some(Ident::parse(self)?))
        } else {
            Ok(None)
        }
    }
}
