pub mod coercer;

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlbind_parser::ast;

use crate::ident::IdString;

/// Data types understood by the binder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
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
    Struct(Vec<StructField>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    /// Field name, None for anonymous fields.
    pub name: Option<String>,
    pub datatype: DataType,
}

impl StructField {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        StructField {
            name: Some(name.into()),
            datatype,
        }
    }

    pub fn anonymous(datatype: DataType) -> Self {
        StructField {
            name: None,
            datatype,
        }
    }
}

/// Result of looking up a field by name in a struct type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLookup<'a> {
    Found(usize, &'a DataType),
    NotFound,
    Ambiguous,
}

impl DataType {
    pub fn array(element: DataType) -> Self {
        DataType::Array(Box::new(element))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Double)
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, DataType::Struct(_))
    }

    pub fn struct_fields(&self) -> Option<&[StructField]> {
        match self {
            DataType::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn array_element(&self) -> Option<&DataType> {
        match self {
            DataType::Array(element) => Some(element),
            _ => None,
        }
    }

    /// Find a struct field by case-insensitive name.
    pub fn find_field(&self, name: &IdString) -> FieldLookup<'_> {
        let fields = match self {
            DataType::Struct(fields) => fields,
            _ => return FieldLookup::NotFound,
        };

        let mut found = FieldLookup::NotFound;
        for (idx, field) in fields.iter().enumerate() {
            let matches = field.name.as_deref().is_some_and(|n| name.eq_str(n));
            if !matches {
                continue;
            }
            if matches!(found, FieldLookup::Found(..)) {
                return FieldLookup::Ambiguous;
            }
            found = FieldLookup::Found(idx, &field.datatype);
        }
        found
    }

    /// Convert a type name from the AST.
    pub fn from_ast(datatype: &ast::DataType) -> Self {
        match datatype {
            ast::DataType::Int64 => DataType::Int64,
            ast::DataType::Double => DataType::Double,
            ast::DataType::String => DataType::String,
            ast::DataType::Bool => DataType::Bool,
            ast::DataType::Bytes => DataType::Bytes,
            ast::DataType::Date => DataType::Date,
            ast::DataType::Timestamp => DataType::Timestamp,
            ast::DataType::Json => DataType::Json,
            ast::DataType::Array(inner) => DataType::array(DataType::from_ast(inner)),
            ast::DataType::Struct(fields) => DataType::Struct(
                fields
                    .iter()
                    .map(|f| StructField {
                        name: f.name.as_ref().map(|n| n.value.clone()),
                        datatype: DataType::from_ast(&f.datatype),
                    })
                    .collect(),
            ),
        }
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
