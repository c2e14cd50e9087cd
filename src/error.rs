//! Unified error type.

use std::borrow::Cow;

/// A boxed error raised by application code inside a middleware.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by scopewire's fallible operations.
///
/// Two families share this type. Configuration-time errors (`Route`,
/// `InvalidMethodName`, `UnknownMethod`, `Config`) come out of builders at
/// startup. Per-request errors come out of a composed middleware chain and
/// reach the server as a single failure value.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    #[error(
        "method to invoke must be a valid method name, such as `list` or `0`, but was `{0}`"
    )]
    InvalidMethodName(String),

    #[error("`{type_name}` has no method named `{method}`")]
    UnknownMethod { type_name: &'static str, method: String },

    #[error("next() called multiple times")]
    NextCalledMultipleTimes,

    #[error("no request scope attached; scope_per_request must run before `{0}`")]
    MissingScope(Cow<'static, str>),

    #[error("no registration for `{type_name}`{}", named(.name))]
    NotRegistered { type_name: &'static str, name: Option<Cow<'static, str>> },

    #[error("failed to construct `{type_name}`: {source}")]
    Construct {
        type_name: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("middleware panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Middleware(BoxError),

    #[error("config: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl Error {
    /// Wraps an application error so it can travel through the chain.
    pub fn middleware(err: impl Into<BoxError>) -> Self {
        Self::Middleware(err.into())
    }

    pub(crate) fn construct<T>(source: impl Into<BoxError>) -> Self {
        Self::Construct { type_name: std::any::type_name::<T>(), source: source.into() }
    }
}

fn named(name: &Option<Cow<'static, str>>) -> String {
    name.as_ref().map(|n| format!(" named `{n}`")).unwrap_or_default()
}

impl From<figment::Error> for Error {
    fn from(e: figment::Error) -> Self {
        Self::Config(Box::new(e))
    }
}
