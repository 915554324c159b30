pub mod cte;
pub use cte::*;
pub mod datatype;
pub use datatype::*;
pub mod expr;
pub use expr::*;
pub mod from;
pub use from::*;
pub mod modifiers;
pub use modifiers::*;
pub mod query;
pub use query::*;
pub mod select;
pub use select::*;

use std::fmt;

use sqlbind_error::{Location, Result, SqlError};

use crate::keywords::is_reserved;
use crate::parser::Parser;
use crate::tokens::Token;

pub trait AstParseable: Sized {
    /// Parse an instance of Self from the provided parser.
    ///
    /// It's assumed that the parser is in the correct state for parsing Self,
    /// and if it isn't, an error should be returned.
    fn parse(parser: &mut Parser) -> Result<Self>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::tokens::Tokenizer;

    /// Parse an AST node directly from a string.
    pub(crate) fn parse_ast<A: AstParseable>(s: &str) -> Result<A> {
        let toks = Tokenizer::new(s).tokenize()?;
        let mut parser = Parser::with_tokens(toks);
        A::parse(&mut parser)
    }
}

/// A single identifier.
///
/// Equality ignores the source location.
#[derive(Debug, Clone, Eq)]
pub struct Ident {
    pub value: String,
    /// If this identifier was quoted in the query.
    pub quoted: bool,
    pub location: Location,
}

impl Ident {
    pub fn new(value: impl Into<String>) -> Self {
        Ident {
            value: value.into(),
            quoted: false,
            location: Location::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Ident {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.quoted == other.quoted
    }
}

impl AstParseable for Ident {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        let tok = match parser.next() {
            Some(tok) => &tok.token,
            None => {
                return Err(
                    SqlError::new("Expected identifier, found end of statement").at(location)
                );
            }
        };

        match tok {
            Token::Word(w) => {
                if let Some(kw) = w.keyword {
                    if is_reserved(kw) {
                        return Err(SqlError::new(format!(
                            "Unexpected keyword {}. Expected an identifier.",
                            w.value
                        ))
                        .at(location));
                    }
                }
                Ok(Ident {
                    value: w.value.clone(),
                    quoted: w.quote.is_some(),
                    location,
                })
            }
            other => Err(SqlError::new(format!(
                "Unexpected token '{other}'. Expected an identifier."
            ))
            .at(location)),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// A dotted path of identifiers, e.g. `catalog.schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference(pub Vec<Ident>);

impl ObjectReference {
    /// Create an object from an iterator of strings.
    ///
    /// Useful in tests, probably unlikely that it should be used anywhere else.
    pub fn from_strings<S>(strings: impl IntoIterator<Item = S>) -> Self
    where
        S: Into<String>,
    {
        ObjectReference(strings.into_iter().map(Ident::new).collect())
    }

    pub fn base(&self) -> Result<&Ident> {
        match self.0.last() {
            Some(ident) => Ok(ident),
            None => Err(SqlError::new("Empty object reference")),
        }
    }

    pub fn location(&self) -> Location {
        self.0.first().map(|i| i.location).unwrap_or_default()
    }

    pub fn parts(&self) -> Vec<String> {
        self.0.iter().map(|i| i.value.clone()).collect()
    }
}

impl AstParseable for ObjectReference {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let mut idents = vec![Ident::parse(parser)?];
        // Consume periods followed by identifiers. A period followed by `*`
        // belongs to a qualified wildcard and is left for the caller.
        while parser.peek_token() == Some(&Token::Period)
            && matches!(parser.peek_nth_token(1), Some(Token::Word(_)))
        {
            parser.next();
            idents.push(Ident::parse(parser)?);
        }
        Ok(ObjectReference(idents))
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strings: Vec<_> = self.0.iter().map(|ident| ident.value.as_str()).collect();
        write!(f, "{}", strings.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::parse_ast;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn object_reference_compound() {
        let reference: ObjectReference = parse_ast("a.b.c").unwrap();
        assert_eq!(ObjectReference::from_strings(["a", "b", "c"]), reference);
    }

    #[test]
    fn object_reference_stops_before_star() {
        let toks = crate::tokens::Tokenizer::new("a.*").tokenize().unwrap();
        let mut parser = Parser::with_tokens(toks);
        let reference = ObjectReference::parse(&mut parser).unwrap();
        assert_eq!(ObjectReference::from_strings(["a"]), reference);
        assert_eq!(Some(&Token::Period), parser.peek_token());
    }

    #[test]
    fn reserved_keyword_not_ident() {
        parse_ast::<Ident>("select").unwrap_err();
        let ident: Ident = parse_ast("`select`").unwrap();
        assert!(ident.quoted);
        assert_eq!("select", ident.value);
    }
}
