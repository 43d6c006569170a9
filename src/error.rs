//! Error taxonomy shared by the parser, the rewriting passes, the compiler and
//! the execution boundary.
//!
//! Syntax and semantic errors are the caller's fault and map to client-facing
//! rejections; configuration and backend errors are ours and map to
//! server-facing failures. No error class ever carries a partial result.

use thiserror::Error;

use crate::config::ConfigError;
use crate::token::Span;

/// Malformed query text: unknown function, arity mismatch, bad literal.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} near `{fragment}`")]
pub struct SyntaxError {
    pub message: String,
    /// The offending piece of the query text.
    pub fragment: String,
    /// `None` when the input ended early.
    pub span: Option<Span>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, fragment: impl Into<String>, span: Option<Span>) -> Self {
        Self { message: message.into(), fragment: fragment.into(), span }
    }

    /// Builds an error whose fragment is the slice of `source` under `span`.
    pub fn at(message: impl Into<String>, source: &str, span: Span) -> Self {
        Self::new(message, span.fragment(source), Some(span))
    }

    pub fn end_of_input(message: impl Into<String>) -> Self {
        Self::new(message, "<end of input>", None)
    }
}

/// Well-formed text that does not make sense for the target entity type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}: `{fragment}`")]
pub struct SemanticError {
    pub message: String,
    pub fragment: String,
    pub span: Option<Span>,
}

impl SemanticError {
    pub fn at(message: impl Into<String>, source: &str, span: Span) -> Self {
        Self {
            message: message.into(),
            fragment: span.fragment(source).to_string(),
            span: Some(span),
        }
    }
}

/// The registry or the AST handed to the compiler is inconsistent.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// The search backend rejected or failed to run a request.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("search backend failure: {message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PqlError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Who is responsible for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 4xx: the query must be fixed by the caller.
    Client,
    /// 5xx: the service or its configuration is broken.
    Server,
}

impl PqlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PqlError::Syntax(_) | PqlError::Semantic(_) => ErrorClass::Client,
            PqlError::Configuration(_) | PqlError::Backend(_) => ErrorClass::Server,
        }
    }
}

impl From<ConfigError> for PqlError {
    fn from(err: ConfigError) -> Self {
        PqlError::Configuration(ConfigurationError::new(err.to_string()))
    }
}

pub type Result<T, E = PqlError> = std::result::Result<T, E>;
