use std::{error::Error as StdError, fmt};

use backtrace::Backtrace;
use thiserror::Error;

pub trait ErrorCode: StdError + 'static {
    fn code(&self) -> &'static str;
}

#[derive(Error, Debug)]
pub enum Code {
    #[error(transparent)]
    Any(#[from] anyhow::Error),
    #[error("Could not acquire a database connection. {0}")]
    Connect(#[source] anyhow::Error),
    #[error("Statement execution failed. {0}")]
    Execute(#[source] anyhow::Error),
    #[error("Could not commit the transaction. {0}")]
    Commit(#[source] anyhow::Error),
    #[error("Could not decode the result row. {0}")]
    Decode(#[source] anyhow::Error),
    #[error("Invalid rule. {0}")]
    InvalidRule(String),
    #[error("invalid filter type. {0}")]
    InvalidFilter(String),
    #[error("cannot save a filtered policy")]
    FilteredSave,
    #[error("Please recheck the configuration.see: {0}")]
    Validates(#[source] validator::ValidationErrors),
}

impl ErrorCode for Code {
    fn code(&self) -> &'static str {
        match self {
            Self::Any(_) => "1010001",
            Self::Connect(_) => "1010002",
            Self::Execute(_) => "1010003",
            Self::Commit(_) => "1010004",
            Self::Decode(_) => "1010005",
            Self::InvalidRule(_) => "1010006",
            Self::InvalidFilter(_) => "1010007",
            Self::FilteredSave => "1010008",
            Self::Validates(_) => "1010009",
        }
    }
}

pub struct WithBacktrace {
    source: Code,
    backtrace: Backtrace,
}

impl WithBacktrace {
    pub fn code(&self) -> &Code {
        &self.source
    }
}

impl fmt::Debug for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithBacktrace")
            .field("source", &self.source)
            .field("backtrace", &self.backtrace)
            .finish()
    }
}

impl fmt::Display for WithBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl StdError for WithBacktrace {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

impl From<Code> for WithBacktrace {
    fn from(code: Code) -> Self {
        WithBacktrace {
            source: code,
            backtrace: Backtrace::new(),
        }
    }
}

impl From<WithBacktrace> for Code {
    fn from(value: WithBacktrace) -> Self {
        value.source
    }
}

impl PartialEq for WithBacktrace {
    fn eq(&self, other: &Self) -> bool {
        self.source.code() == other.source.code()
    }
}

#[inline]
pub fn any<E: StdError>(err: E) -> WithBacktrace {
    Code::Any(anyhow::anyhow!("{}", err.to_string())).into()
}

#[inline]
pub fn anyhow(err: anyhow::Error) -> WithBacktrace {
    Code::Any(err).into()
}

#[inline]
pub fn connect<E>(err: E) -> WithBacktrace
where
    E: StdError + Send + Sync + 'static,
{
    Code::Connect(anyhow::Error::new(err)).into()
}

#[inline]
pub fn execute<E>(err: E) -> WithBacktrace
where
    E: StdError + Send + Sync + 'static,
{
    Code::Execute(anyhow::Error::new(err)).into()
}

#[inline]
pub fn commit<E>(err: E) -> WithBacktrace
where
    E: StdError + Send + Sync + 'static,
{
    Code::Commit(anyhow::Error::new(err)).into()
}

#[inline]
pub fn decode<E>(err: E) -> WithBacktrace
where
    E: StdError + Send + Sync + 'static,
{
    Code::Decode(anyhow::Error::new(err)).into()
}

#[inline]
pub fn invalid_rule<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::InvalidRule(err.to_string()).into()
}

#[inline]
pub fn invalid_filter<S: ToString + ?Sized>(err: &S) -> WithBacktrace {
    Code::InvalidFilter(err.to_string()).into()
}

#[inline]
pub fn filtered_save() -> WithBacktrace {
    Code::FilteredSave.into()
}

#[inline]
pub fn validates(err: validator::ValidationErrors) -> WithBacktrace {
    Code::Validates(err).into()
}
