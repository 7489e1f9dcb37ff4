//! The error taxonomy propagated across the engine.
//!
//! Every fallible engine operation returns `Result<T, Error>`. Operators
//! never panic on caller-reachable input; a bug that trips an internal
//! invariant surfaces as `Error::Internal` instead.

use thiserror::Error;

use crate::rid::Rid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error near '{token}': {message}")]
    Parse { message: String, token: String },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("concurrency error: {0}")]
    Concurrency(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corruption error: {0}")]
    Corruption(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Error::Parse { message: message.into(), token: String::new() }
    }

    pub fn parse_near<S: Into<String>, T: Into<String>>(message: S, token: T) -> Self {
        Error::Parse { message: message.into(), token: token.into() }
    }

    pub fn catalog<S: Into<String>>(msg: S) -> Self {
        Error::Catalog(msg.into())
    }

    pub fn ty<S: Into<String>>(msg: S) -> Self {
        Error::Type(msg.into())
    }

    pub fn constraint<S: Into<String>>(msg: S) -> Self {
        Error::Constraint(msg.into())
    }

    pub fn concurrency<S: Into<String>>(msg: S) -> Self {
        Error::Concurrency(msg.into())
    }

    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        Error::Corruption(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    pub fn rid_not_found(rid: Rid) -> Self {
        Error::Internal(format!("rid not found: {:?}", rid))
    }

    /// The short tag used as the `<kind>` prefix of a `QueryResult` message,
    /// per the wire protocol's ERROR payload shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "ParseError",
            Error::Catalog(_) => "CatalogError",
            Error::Type(_) => "TypeError",
            Error::Constraint(_) => "ConstraintViolation",
            Error::Concurrency(_) => "ConcurrencyError",
            Error::Io(_) => "IoError",
            Error::Corruption(_) => "CorruptionError",
            Error::ResourceExhausted(_) => "ResourceExhausted",
            Error::Internal(_) => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
