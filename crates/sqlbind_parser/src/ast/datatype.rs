use std::fmt;

use sqlbind_error::{Result, SqlError};

use super::{AstParseable, Ident};
use crate::keywords::Keyword;
use crate::parser::Parser;
use crate::tokens::Token;

/// A type name as written in the query, e.g. in a CAST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Int64,
    Double,
    String,
    Bool,
    Bytes,
    Date,
    Timestamp,
    Json,
    Array(Box<DataType>),
    Struct(Vec<StructFieldType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructFieldType {
    pub name: Option<Ident>,
    pub datatype: DataType,
}

impl AstParseable for DataType {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let location = parser.location();
        let word = match parser.next() {
            Some(tok) => match &tok.token {
                Token::Word(w) => w.value.to_ascii_uppercase(),
                other => {
                    return Err(SqlError::new(format!(
                        "Unexpected token '{other}'. Expected a type name."
                    ))
                    .at(location));
                }
            },
            None => return Err(SqlError::new("Expected a type name").at(location)),
        };

        let datatype = match word.as_str() {
            "INT64" | "INT" | "INTEGER" | "BIGINT" => DataType::Int64,
            "FLOAT64" | "DOUBLE" | "FLOAT" => DataType::Double,
            "STRING" | "VARCHAR" | "TEXT" => DataType::String,
            "BOOL" | "BOOLEAN" => DataType::Bool,
            "BYTES" => DataType::Bytes,
            "DATE" => DataType::Date,
            "TIMESTAMP" => DataType::Timestamp,
            "JSON" => DataType::Json,
            "ARRAY" => {
                parser.expect_token(&Token::Lt)?;
                let element = parser.nested(DataType::parse)?;
                parser.expect_token(&Token::Gt)?;
                DataType::Array(Box::new(element))
            }
            "STRUCT" => {
                parser.expect_token(&Token::Lt)?;
                let fields = if parser.consume_token(&Token::Gt) {
                    Vec::new()
                } else {
                    let fields = parser.parse_comma_separated(StructFieldType::parse)?;
                    parser.expect_token(&Token::Gt)?;
                    fields
                };
                DataType::Struct(fields)
            }
            other => {
                return Err(SqlError::new(format!("Unknown type name: {other}")).at(location));
            }
        };

        Ok(datatype)
    }
}

impl AstParseable for StructFieldType {
    fn parse(parser: &mut Parser) -> Result<Self> {
        // Either `name TYPE` or just `TYPE`. A name is only present if the next
        // token is also a word, or a word followed by `<` for a nested type
        // name.
        let has_name = matches!(
            parser.peek_token(),
            Some(Token::Word(w))
                if w.keyword != Some(Keyword::ARRAY) && w.keyword != Some(Keyword::STRUCT)
        )
            && matches!(parser.peek_nth_token(1), Some(Token::Word(_)));
        let name = if has_name {
            Some(Ident::parse(parser)?)
        } else {
            None
        };
        let datatype = parser.nested(DataType::parse)?;
        Ok(StructFieldType { name, datatype })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "INT64"),
            Self::Double => write!(f, "DOUBLE"),
            Self::String => write!(f, "STRING"),
            Self::Bool => write!(f, "BOOL"),
            Self::Bytes => write!(f, "BYTES"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
            Self::Array(inner) => write!(f, "ARRAY<{inner}>"),
            Self::Struct(fields) => {
                write!(f, "STRUCT<")?;
                for (idx, field) in fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(name) = &field.name {
                        write!(f, "{name} ")?;
                    }
                    write!(f, "{}", field.datatype)?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::testutil::parse_ast;
    use pretty_assertions::assert_eq;

    #[test]
    fn simple_types() {
        assert_eq!(DataType::Int64, parse_ast::<DataType>("int64").unwrap());
        assert_eq!(DataType::String, parse_ast::<DataType>("STRING").unwrap());
        assert_eq!(DataType::Date, parse_ast::<DataType>("date").unwrap());
    }

    #[test]
    fn nested_types() {
        let got: DataType = parse_ast("ARRAY<STRUCT<a INT64, STRING>>").unwrap();
        let expected = DataType::Array(Box::new(DataType::Struct(vec![
            StructFieldType {
                name: Some(Ident::new("a")),
                datatype: DataType::Int64,
            },
            StructFieldType {
                name: None,
                datatype: DataType::String,
            },
        ])));
        assert_eq!(expected, got);
    }
}
