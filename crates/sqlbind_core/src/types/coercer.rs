use std::fmt::Debug;

use super::DataType;

/// Type of an argument participating in coercion, along with whether it came
/// from a literal.
///
/// Literals coerce more loosely, e.g. a string literal can become a DATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArgumentType {
    pub datatype: DataType,
    pub is_literal: bool,
    /// A bare `NULL` with no type of its own. Coerces to anything.
    pub is_untyped_null: bool,
}

impl InputArgumentType {
    pub fn new(datatype: DataType) -> Self {
        InputArgumentType {
            datatype,
            is_literal: false,
            is_untyped_null: false,
        }
    }

    pub fn literal(datatype: DataType) -> Self {
        InputArgumentType {
            datatype,
            is_literal: true,
            is_untyped_null: false,
        }
    }

    pub fn untyped_null() -> Self {
        InputArgumentType {
            datatype: DataType::Int64,
            is_literal: true,
            is_untyped_null: true,
        }
    }
}

/// Coercion rules the binder relies on.
pub trait TypeCoercer: Debug + Sync + Send {
    /// Find a single type every argument can be implicitly coerced to.
    fn common_supertype(&self, args: &[InputArgumentType]) -> Option<DataType>;

    /// Check if `from` can be converted to `to`.
    fn coerces_to(&self, from: &InputArgumentType, to: &DataType, explicit: bool) -> bool;

    /// If values of this type can be compared for equality when grouping.
    fn supports_grouping(&self, datatype: &DataType) -> bool;

    /// If values of this type can be ordered.
    fn supports_ordering(&self, datatype: &DataType) -> bool;
}

/// Coercion rules for the builtin types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCoercer;

impl DefaultCoercer {
    fn implicit(from: &InputArgumentType, to: &DataType) -> bool {
        if from.is_untyped_null || &from.datatype == to {
            return true;
        }

        match (&from.datatype, to) {
            (DataType::Int64, DataType::Double) => true,
            (DataType::Date, DataType::Timestamp) => true,
            (DataType::String, DataType::Date | DataType::Timestamp) => from.is_literal,
            (DataType::Array(a), DataType::Array(b)) => Self::implicit(
                &InputArgumentType {
                    datatype: a.as_ref().clone(),
                    is_literal: false,
                    is_untyped_null: false,
                },
                b,
            ),
            (DataType::Struct(a), DataType::Struct(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(a, b)| {
                        Self::implicit(&InputArgumentType::new(a.datatype.clone()), &b.datatype)
                    })
            }
            _ => false,
        }
    }

    fn explicit(from: &DataType, to: &DataType) -> bool {
        if from == to {
            return true;
        }

        match (from, to) {
            (DataType::Int64 | DataType::Double, DataType::Int64 | DataType::Double) => true,
            (DataType::Int64, DataType::Bool) | (DataType::Bool, DataType::Int64) => true,
            (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => true,
            (DataType::Bytes, DataType::String) | (DataType::String, DataType::Bytes) => true,
            (DataType::Json, DataType::String) | (DataType::String, DataType::Json) => true,
            (DataType::Array(_) | DataType::Struct(_), DataType::String) => false,
            (_, DataType::String) => true,
            (
                DataType::String,
                DataType::Int64
                | DataType::Double
                | DataType::Bool
                | DataType::Date
                | DataType::Timestamp,
            ) => true,
            (DataType::Array(a), DataType::Array(b)) => Self::explicit(a, b),
            (DataType::Struct(a), DataType::Struct(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b.iter())
                        .all(|(a, b)| Self::explicit(&a.datatype, &b.datatype))
            }
            _ => false,
        }
    }
}

impl TypeCoercer for DefaultCoercer {
    fn common_supertype(&self, args: &[InputArgumentType]) -> Option<DataType> {
        let typed: Vec<_> = args.iter().filter(|arg| !arg.is_untyped_null).collect();
        if typed.is_empty() {
            // All NULL, or nothing at all.
            return Some(DataType::Int64);
        }

        // Try each distinct type as the candidate, first appearance first.
        let mut tried: Vec<&DataType> = Vec::new();
        for candidate in typed.iter().map(|arg| &arg.datatype) {
            if tried.contains(&candidate) {
                continue;
            }
            tried.push(candidate);
            if typed.iter().all(|arg| Self::implicit(arg, candidate)) {
                return Some(candidate.clone());
            }
        }

        None
    }

    fn coerces_to(&self, from: &InputArgumentType, to: &DataType, explicit: bool) -> bool {
        if Self::implicit(from, to) {
            return true;
        }
        explicit && Self::explicit(&from.datatype, to)
    }

    fn supports_grouping(&self, datatype: &DataType) -> bool {
        match datatype {
            DataType::Json | DataType::Array(_) => false,
            DataType::Struct(fields) => fields.iter().all(|f| self.supports_grouping(&f.datatype)),
            _ => true,
        }
    }

    fn supports_ordering(&self, datatype: &DataType) -> bool {
        !matches!(
            datatype,
            DataType::Json | DataType::Struct(_) | DataType::Array(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StructField;
    use pretty_assertions::assert_eq;

    #[test]
    fn supertype_numeric_widening() {
        let got = DefaultCoercer.common_supertype(&[
            InputArgumentType::new(DataType::Int64),
            InputArgumentType::new(DataType::Double),
        ]);
        assert_eq!(Some(DataType::Double), got);
    }

    #[test]
    fn supertype_ignores_untyped_null() {
        let got = DefaultCoercer.common_supertype(&[
            InputArgumentType::untyped_null(),
            InputArgumentType::new(DataType::String),
        ]);
        assert_eq!(Some(DataType::String), got);
    }

    #[test]
    fn supertype_string_literal_to_date() {
        let got = DefaultCoercer.common_supertype(&[
            InputArgumentType::new(DataType::Date),
            InputArgumentType::literal(DataType::String),
        ]);
        assert_eq!(Some(DataType::Date), got);

        let got = DefaultCoercer.common_supertype(&[
            InputArgumentType::new(DataType::Date),
            InputArgumentType::new(DataType::String),
        ]);
        assert_eq!(None, got);
    }

    #[test]
    fn supertype_incompatible() {
        let got = DefaultCoercer.common_supertype(&[
            InputArgumentType::new(DataType::Int64),
            InputArgumentType::new(DataType::String),
        ]);
        assert_eq!(None, got);
    }

    #[test]
    fn explicit_casts() {
        let from = InputArgumentType::new(DataType::String);
        assert!(DefaultCoercer.coerces_to(&from, &DataType::Int64, true));
        assert!(!DefaultCoercer.coerces_to(&from, &DataType::Int64, false));
        assert!(!DefaultCoercer.coerces_to(
            &from,
            &DataType::array(DataType::Int64),
            true
        ));
    }

    #[test]
    fn grouping_and_ordering_support() {
        let s = DataType::Struct(vec![StructField::new("a", DataType::Int64)]);
        assert!(DefaultCoercer.supports_grouping(&s));
        assert!(!DefaultCoercer.supports_ordering(&s));
        assert!(!DefaultCoercer.supports_grouping(&DataType::Json));
        assert!(DefaultCoercer.supports_ordering(&DataType::Double));
    }
}
