pub mod builtin;

use std::fmt;
use std::sync::LazyLock;

use hashbrown::HashMap;
use sqlbind_error::{Result, SqlError};

use crate::ident::SimilarName;
use crate::types::DataType;
use crate::types::coercer::{InputArgumentType, TypeCoercer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Scalar,
    Aggregate,
    /// Window-only functions, e.g. `rank()`. Aggregates may also be used
    /// with an OVER clause.
    Analytic,
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar => write!(f, "scalar"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::Analytic => write!(f, "analytic"),
        }
    }
}

/// Computes the return type for some argument types, None if the arguments
/// don't match the function.
pub type ReturnTypeFn = fn(&[InputArgumentType], &dyn TypeCoercer) -> Option<DataType>;

#[derive(Debug, Clone, Copy)]
pub struct FunctionSignature {
    /// Lowercase name. Operators start with `$`.
    pub name: &'static str,
    /// Name used in error messages, e.g. `operator +`.
    pub display_name: &'static str,
    pub kind: FunctionKind,
    pub min_args: usize,
    /// None for variadic functions.
    pub max_args: Option<usize>,
    /// Produces a different value per evaluation, e.g. `rand()`.
    pub volatile: bool,
    pub return_type: ReturnTypeFn,
}

impl FunctionSignature {
    /// Check the arguments against this function and compute the return
    /// type.
    pub fn resolve(
        &self,
        args: &[InputArgumentType],
        coercer: &dyn TypeCoercer,
    ) -> Result<DataType> {
        let arity_ok =
            args.len() >= self.min_args && self.max_args.is_none_or(|max| args.len() <= max);
        let datatype = if arity_ok {
            (self.return_type)(args, coercer)
        } else {
            None
        };

        match datatype {
            Some(datatype) => Ok(datatype),
            None => {
                let types: Vec<_> = args
                    .iter()
                    .map(|arg| {
                        if arg.is_untyped_null {
                            "NULL".to_string()
                        } else {
                            arg.datatype.to_string()
                        }
                    })
                    .collect();
                Err(SqlError::new(format!(
                    "No matching signature for {} for argument types: {}",
                    self.display_name,
                    if types.is_empty() {
                        "()".to_string()
                    } else {
                        types.join(", ")
                    }
                )))
            }
        }
    }
}

/// Lookup of functions by name.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionSignature>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing every builtin function and operator.
    pub fn builtin() -> &'static FunctionRegistry {
        &BUILTIN_FUNCTIONS
    }

    /// Register a function.
    ///
    /// Panics on duplicate names, the builtin list is static.
    pub fn register(&mut self, signature: FunctionSignature) {
        if self.functions.insert(signature.name, signature).is_some() {
            panic!("duplicate function name: {}", signature.name);
        }
    }

    pub fn find(&self, name: &str) -> Option<&FunctionSignature> {
        self.functions.get(name.to_lowercase().as_str())
    }

    /// Find a function by name, erroring if it doesn't exist.
    pub fn find_required(&self, name: &str) -> Result<&FunctionSignature> {
        match self.find(name) {
            Some(sig) => Ok(sig),
            None => Err(SqlError::new(format!(
                "Function not found: {name}{}",
                crate::ident::did_you_mean(self.suggest(name))
            ))),
        }
    }

    /// Suggest a similarly named function, operators are never suggested.
    pub fn suggest(&self, name: &str) -> Option<String> {
        SimilarName::find(self.functions.keys().copied(), name)
    }
}

static BUILTIN_FUNCTIONS: LazyLock<FunctionRegistry> = LazyLock::new(|| {
    let mut registry = FunctionRegistry::new();
    for signature in builtin::BUILTINS {
        registry.register(*signature);
    }
    registry
});
