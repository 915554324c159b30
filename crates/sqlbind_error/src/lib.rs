//! Error type shared by the parser and the binder.
use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;

pub type Result<T, E = SqlError> = std::result::Result<T, E>;

/// Broad category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The query is malformed or violates a semantic rule.
    InvalidQuery,
    /// A table, function, model, or connection could not be found.
    NotFound,
    /// Query nesting exceeded the configured limit.
    ResourceExhausted,
    /// Syntax or feature we know about but don't support.
    Unimplemented,
    /// Broken invariant inside the analyzer. Never caused by user input.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidQuery => write!(f, "Invalid query"),
            Self::NotFound => write!(f, "Not found"),
            Self::ResourceExhausted => write!(f, "Resource exhausted"),
            Self::Unimplemented => write!(f, "Not implemented"),
            Self::Internal => write!(f, "Internal error"),
        }
    }
}

/// Position in the original SQL text.
///
/// Line and column are 1-based, offset is the 0-based byte offset. A default
/// location (all zeros) is used for nodes that weren't produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Location {
    pub const fn new(line: usize, column: usize, offset: usize) -> Self {
        Location {
            line,
            column,
            offset,
        }
    }

    /// If this location points at a real position in the input.
    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug)]
pub struct SqlError {
    inner: Box<SqlErrorInner>,
}

#[derive(Debug)]
struct SqlErrorInner {
    kind: ErrorKind,
    msg: String,
    location: Option<Location>,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(Cow<'static, str>, String)>,
    backtrace: Backtrace,
}

impl SqlError {
    /// Create a new error for an invalid query.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::InvalidQuery, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::NotFound, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::ResourceExhausted, msg)
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Unimplemented, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        SqlError {
            inner: Box::new(SqlErrorInner {
                kind,
                msg: msg.into(),
                location: None,
                source: None,
                fields: Vec::new(),
                backtrace: Backtrace::capture(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    /// Attach a source location.
    ///
    /// The first location attached wins. Outer callers adding a location to an
    /// error that already points somewhere more precise is a no-op.
    pub fn at(mut self, location: Location) -> Self {
        if self.inner.location.is_none() && location.is_known() {
            self.inner.location = Some(location);
        }
        self
    }

    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: fmt::Display,
    {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    /// Wrap this error with additional context.
    ///
    /// The returned error keeps the kind and location of this error, with this
    /// error becoming its source.
    pub fn wrap(self, msg: impl Into<String>) -> Self {
        let kind = self.inner.kind;
        let location = self.inner.location;
        SqlError {
            inner: Box::new(SqlErrorInner {
                kind,
                msg: msg.into(),
                location,
                source: Some(Box::new(self)),
                fields: Vec::new(),
                backtrace: Backtrace::disabled(),
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn location(&self) -> Option<Location> {
        self.inner.location
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .fields
            .iter()
            .map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    pub fn is_internal(&self) -> bool {
        self.inner.kind == ErrorKind::Internal
    }

    pub fn get_backtrace(&self) -> Option<&Backtrace> {
        match self.inner.backtrace.status() {
            BacktraceStatus::Captured => Some(&self.inner.backtrace),
            _ => None,
        }
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        if let Some(location) = &self.inner.location {
            write!(f, " [at {location}]")?;
        }
        for (key, value) in &self.inner.fields {
            write!(f, "\n{key}: {value}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nCaused by: {source}")?;
        }
        if let Some(backtrace) = self.get_backtrace() {
            write!(f, "\n\nBacktrace:\n{backtrace}")?;
        }
        Ok(())
    }
}

impl Error for SqlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

impl From<fmt::Error> for SqlError {
    fn from(value: fmt::Error) -> Self {
        SqlError::with_source("Format error", Box::new(value))
    }
}

/// Return an unimplemented error with the given message.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)+) => {{
        let msg = format!($($arg)+);
        return Err($crate::SqlError::unimplemented(format!("Not yet implemented: {msg}")));
    }};
}

pub trait ResultExt<T, E> {
    /// Wrap an error with a static context string.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with a context string generated from a function.
    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for std::result::Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SqlError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: Fn() -> String>(self, f: F) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(SqlError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an internal error if the option is None.
    ///
    /// Used for values the analyzer itself is responsible for populating.
    fn required(self, msg: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, msg: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(SqlError::internal(format!("Missing required value: {msg}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_location_wins() {
        let err = SqlError::new("bad")
            .at(Location::new(1, 5, 4))
            .at(Location::new(3, 1, 20));
        assert_eq!(Some(Location::new(1, 5, 4)), err.location());
    }

    #[test]
    fn unknown_location_ignored() {
        let err = SqlError::new("bad").at(Location::default());
        assert_eq!(None, err.location());
    }

    #[test]
    fn wrap_preserves_kind_and_location() {
        let inner = SqlError::not_found("Table not found: t").at(Location::new(2, 3, 10));
        let outer = inner.wrap("while resolving call to table-valued function f");

        assert_eq!(ErrorKind::NotFound, outer.kind());
        assert_eq!(Some(Location::new(2, 3, 10)), outer.location());

        let s = outer.to_string();
        assert!(s.starts_with("while resolving call to table-valued function f"));
        assert!(s.contains("Table not found: t"));
    }

    #[test]
    fn required_is_internal() {
        let v: Option<i32> = None;
        let err = v.required("column").unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn not_implemented_macro() {
        fn f() -> Result<()> {
            not_implemented!("thing {}", 1)
        }
        let err = f().unwrap_err();
        assert_eq!(ErrorKind::Unimplemented, err.kind());
        assert_eq!("Not yet implemented: thing 1", err.message());
    }
}
