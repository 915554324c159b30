use std::fmt;

use sqlbind_error::{Location, Result, SqlError};

use crate::keywords::{Keyword, keyword_from_str};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub value: String,
    /// Quote character used, if any.
    pub quote: Option<char>,
    /// Keyword this word matches. Quoted words never match a keyword.
    pub keyword: Option<Keyword>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(Word),
    /// Unparsed number literal.
    Number(String),
    SingleQuotedString(String),
    /// `=`
    Eq,
    /// `==`
    DoubleEq,
    /// `!=` or `<>`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `||`
    Concat,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Period,
    SemiColon,
    /// `@`
    AtSign,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => match w.quote {
                Some(q) => write!(f, "{q}{}{q}", w.value),
                None => write!(f, "{}", w.value),
            },
            Self::Number(n) => write!(f, "{n}"),
            Self::SingleQuotedString(s) => write!(f, "'{s}'"),
            Self::Eq => write!(f, "="),
            Self::DoubleEq => write!(f, "=="),
            Self::Neq => write!(f, "!="),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Mod => write!(f, "%"),
            Self::Concat => write!(f, "||"),
            Self::LeftParen => write!(f, "("),
            Self::RightParen => write!(f, ")"),
            Self::LeftBracket => write!(f, "["),
            Self::RightBracket => write!(f, "]"),
            Self::LeftBrace => write!(f, "{{"),
            Self::RightBrace => write!(f, "}}"),
            Self::Comma => write!(f, ","),
            Self::Period => write!(f, "."),
            Self::SemiColon => write!(f, ";"),
            Self::AtSign => write!(f, "@"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWithLocation {
    pub token: Token,
    pub location: Location,
}

impl TokenWithLocation {
    /// Check if this token is the given keyword.
    pub fn is_keyword(&self, other: Keyword) -> bool {
        self.keyword() == Some(other)
    }

    pub fn keyword(&self) -> Option<Keyword> {
        match &self.token {
            Token::Word(w) => w.keyword,
            _ => None,
        }
    }
}

#[derive(Debug)]
struct State<'a> {
    query: &'a str,
    /// Byte offset of the next char.
    offset: usize,
    line: usize,
    col: usize,
}

impl State<'_> {
    fn peek(&self) -> Option<char> {
        self.query[self.offset..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.query[self.offset..].chars().nth(n)
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn location(&self) -> Location {
        Location::new(self.line, self.col, self.offset)
    }

    /// Consume chars while the predicate holds, returning the consumed slice.
    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &str {
        let start = self.offset;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.next();
        }
        &self.query[start..self.offset]
    }
}

#[derive(Debug)]
pub struct Tokenizer<'a> {
    state: State<'a>,
}

impl<'a> Tokenizer<'a> {
    pub fn new(query: &'a str) -> Self {
        Tokenizer {
            state: State {
                query,
                offset: 0,
                line: 1,
                col: 1,
            },
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<TokenWithLocation>> {
        let mut toks = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let location = self.state.location();
            match self.next_token()? {
                Some(token) => toks.push(TokenWithLocation { token, location }),
                None => break,
            }
        }
        Ok(toks)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match (self.state.peek(), self.state.peek_nth(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.state.next();
                }
                (Some('-'), Some('-')) => {
                    self.state.take_while(|c| c != '\n');
                }
                (Some('/'), Some('*')) => {
                    let location = self.state.location();
                    self.state.next();
                    self.state.next();
                    loop {
                        match self.state.next() {
                            Some('*') if self.state.peek() == Some('/') => {
                                self.state.next();
                                break;
                            }
                            Some(_) => (),
                            None => {
                                return Err(SqlError::new("Unterminated block comment")
                                    .at(location));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        let location = self.state.location();
        let c = match self.state.peek() {
            Some(c) => c,
            None => return Ok(None),
        };

        let tok = match c {
            '\'' => {
                self.state.next();
                Token::SingleQuotedString(self.take_quoted('\'', location)?)
            }
            '"' | '`' => {
                self.state.next();
                let value = self.take_quoted(c, location)?;
                Token::Word(Word {
                    value,
                    quote: Some(c),
                    keyword: None,
                })
            }
            c if c.is_ascii_digit() => {
                let mut num = self.state.take_while(|c| c.is_ascii_digit()).to_string();
                if self.state.peek() == Some('.')
                    && self.state.peek_nth(1).is_some_and(|c| c.is_ascii_digit())
                {
                    self.state.next();
                    num.push('.');
                    num.push_str(self.state.take_while(|c| c.is_ascii_digit()));
                }
                if matches!(self.state.peek(), Some('e' | 'E')) {
                    let sign = self.state.peek_nth(1);
                    let has_exp = match sign {
                        Some('+' | '-') => {
                            self.state.peek_nth(2).is_some_and(|c| c.is_ascii_digit())
                        }
                        Some(c) => c.is_ascii_digit(),
                        None => false,
                    };
                    if has_exp {
                        num.push('e');
                        self.state.next();
                        if let Some(s @ ('+' | '-')) = self.state.peek() {
                            num.push(s);
                            self.state.next();
                        }
                        num.push_str(self.state.take_while(|c| c.is_ascii_digit()));
                    }
                }
                Token::Number(num)
            }
            c if c.is_alphabetic() || c == '_' => {
                let value = self
                    .state
                    .take_while(|c| c.is_alphanumeric() || c == '_')
                    .to_string();
                let keyword = keyword_from_str(&value);
                Token::Word(Word {
                    value,
                    quote: None,
                    keyword,
                })
            }
            _ => {
                self.state.next();
                match c {
                    '=' => {
                        if self.state.peek() == Some('=') {
                            self.state.next();
                            Token::DoubleEq
                        } else {
                            Token::Eq
                        }
                    }
                    '!' => {
                        if self.state.peek() == Some('=') {
                            self.state.next();
                            Token::Neq
                        } else {
                            return Err(SqlError::new("Expected '=' after '!'").at(location));
                        }
                    }
                    '<' => match self.state.peek() {
                        Some('=') => {
                            self.state.next();
                            Token::LtEq
                        }
                        Some('>') => {
                            self.state.next();
                            Token::Neq
                        }
                        _ => Token::Lt,
                    },
                    '>' => {
                        if self.state.peek() == Some('=') {
                            self.state.next();
                            Token::GtEq
                        } else {
                            Token::Gt
                        }
                    }
                    '|' => {
                        if self.state.peek() == Some('|') {
                            self.state.next();
                            Token::Concat
                        } else {
                            return Err(SqlError::new("Expected '|' after '|'").at(location));
                        }
                    }
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Mul,
                    '/' => Token::Div,
                    '%' => Token::Mod,
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    '[' => Token::LeftBracket,
                    ']' => Token::RightBracket,
                    '{' => Token::LeftBrace,
                    '}' => Token::RightBrace,
                    ',' => Token::Comma,
                    '.' => Token::Period,
                    ';' => Token::SemiColon,
                    '@' => Token::AtSign,
                    other => {
                        return Err(
                            SqlError::new(format!("Unexpected character '{other}'")).at(location)
                        );
                    }
                }
            }
        };

        Ok(Some(tok))
    }

    /// Read until the closing quote. A doubled quote char is an escaped quote.
    fn take_quoted(&mut self, quote: char, start: Location) -> Result<String> {
        let mut s = String::new();
        loop {
            match self.state.next() {
                Some(c) if c == quote => {
                    if self.state.peek() == Some(quote) {
                        self.state.next();
                        s.push(quote);
                    } else {
                        return Ok(s);
                    }
                }
                Some('\\') => match self.state.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => break,
                },
                Some(c) => s.push(c),
                None => break,
            }
        }
        Err(SqlError::new("Unterminated quoted string").at(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokens(s: &str) -> Vec<Token> {
        Tokenizer::new(s)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn simple_select() {
        let toks = tokens("select a, 'b' from t;");
        assert_eq!(
            vec![
                Token::Word(Word {
                    value: "select".to_string(),
                    quote: None,
                    keyword: Some(Keyword::SELECT),
                }),
                Token::Word(Word {
                    value: "a".to_string(),
                    quote: None,
                    keyword: None,
                }),
                Token::Comma,
                Token::SingleQuotedString("b".to_string()),
                Token::Word(Word {
                    value: "from".to_string(),
                    quote: None,
                    keyword: Some(Keyword::FROM),
                }),
                Token::Word(Word {
                    value: "t".to_string(),
                    quote: None,
                    keyword: None,
                }),
                Token::SemiColon,
            ],
            toks
        );
    }

    #[test]
    fn quoted_word_is_not_keyword() {
        let toks = tokens("`select`");
        assert_eq!(
            vec![Token::Word(Word {
                value: "select".to_string(),
                quote: Some('`'),
                keyword: None,
            })],
            toks
        );
    }

    #[test]
    fn numbers_and_operators() {
        let toks = tokens("1.5e3 <> 2 -- comment\n /* block */ >= 3");
        assert_eq!(
            vec![
                Token::Number("1.5e3".to_string()),
                Token::Neq,
                Token::Number("2".to_string()),
                Token::GtEq,
                Token::Number("3".to_string()),
            ],
            toks
        );
    }

    #[test]
    fn locations_are_one_based() {
        let toks = Tokenizer::new("select\n  a").tokenize().unwrap();
        assert_eq!(Location::new(1, 1, 0), toks[0].location);
        assert_eq!(Location::new(2, 3, 9), toks[1].location);
    }

    #[test]
    fn unterminated_string() {
        let err = Tokenizer::new("select 'abc").tokenize().unwrap_err();
        assert_eq!(Some(Location::new(1, 8, 7)), err.location());
    }
}
