//! Error types for the script engine

use crate::context::CtxState;
use thiserror::Error;

/// Boxed error produced outside the engine, by data-link adapters and
/// pooled-resource factories.
pub type LinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or running scripts.
///
/// This enum represents all possible errors raised by the context, the
/// statement tree, the template engine, and the declarative builder. Most
/// methods return `Result<T, EngineError>` to handle these cases. Wrapping
/// variants keep the underlying failure reachable through
/// [`std::error::Error::source`]; [`EngineError::root_cause`] walks that
/// chain to the deepest error.
///
/// # Examples
///
/// ```
/// use dray::{EngineError, ExecContext};
/// use dray::context::Context;
///
/// let mut ctx = ExecContext::new("example");
/// match ctx.get_var("missing") {
///     Err(EngineError::VarNotFound(name)) => assert_eq!(name, "missing"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Error, Debug)]
pub enum EngineError {
    /// Variable lookup failed in the context and its parent chain.
    #[error("Variable '{0}' does not exist")]
    VarNotFound(String),

    /// Object lookup failed in the context and its parent chain.
    #[error("Object '{0}' does not exist")]
    ObjectNotFound(String),

    /// Pooled-resource lookup failed and the broker had nothing to offer.
    #[error("Object '{0}' not found")]
    PooledNotFound(String),

    /// Named cursor lookup failed.
    #[error("There is no cursor '{0}' in current context")]
    CursorNotFound(String),

    /// Statement-provider lookup failed.
    #[error("Statement provider '{0}' does not exist")]
    ProviderNotFound(String),

    /// A provider does not hold the requested statement.
    #[error("Statement '{name}' not found in '{provider}' provider")]
    StatementNotFound {
        /// Name of the provider that was consulted
        provider: String,
        /// Statement name that was requested
        name: String,
    },

    /// The name does not resolve to a pooled data source.
    #[error("Data source '{0}' not found")]
    SourceNotFound(String),

    /// The name does not resolve to a pooled data receiver.
    #[error("Data receiver '{0}' not found")]
    ReceiverNotFound(String),

    /// A pooled resource could not be acquired from its broker or factory.
    ///
    /// The context registers nothing when initialization fails, so a later
    /// retry starts from scratch.
    #[error("Pooled resource '{name}' is unavailable")]
    ResourceUnavailable {
        /// Pool name that failed to initialize
        name: String,
        /// Failure reported by the broker or factory
        #[source]
        source: LinkError,
    },

    /// A lifecycle operation was called in the wrong context state.
    #[error("Illegal context state '{actual}' but expected '{expected}'")]
    IllegalState {
        /// State the operation requires
        expected: CtxState,
        /// State the context was actually in
        actual: CtxState,
    },

    /// Text could not be parsed or formatted (dates, integers, patterns).
    #[error("{0}")]
    Format(String),

    /// The template source is malformed.
    ///
    /// `pos` is the byte offset into the template text where parsing gave up.
    #[error("Template error at position {pos}: {message}")]
    Template {
        /// Byte offset of the offending input
        pos: usize,
        /// What the parser expected or rejected
        message: String,
    },

    /// An expression that must produce text produced SQL null.
    #[error("Expression for {0} evaluated to null")]
    NullValue(String),

    /// A data-link adapter failed; `message` is supplied by the adapter.
    #[error("{message}")]
    Link {
        /// Adapter-supplied description
        message: String,
        /// Underlying adapter error
        #[source]
        source: LinkError,
    },

    /// Opening a cursor on a data source failed.
    #[error("Error opening '{name}' cursor. Request:\n{request}")]
    Request {
        /// Data source name
        name: String,
        /// Query text, truncated when very long
        request: String,
        /// Underlying failure
        #[source]
        source: Box<EngineError>,
    },

    /// A receiver rejected an operation.
    #[error("Error executing on receiver '{name}' operation:\n{operation}")]
    Receiver {
        /// Data receiver name
        name: String,
        /// Operation text that was sent
        operation: String,
        /// Underlying failure
        #[source]
        source: Box<EngineError>,
    },

    /// A statement inside a block failed; the index is 1-based.
    #[error("Error inside block statement #{0}")]
    BlockMember(usize, #[source] Box<EngineError>),

    /// Reading a result-set column failed.
    #[error("Error getting column '{0}'")]
    Column(String, #[source] Box<EngineError>),

    /// A catch statement rethrew the error it intercepted.
    #[error("Script error rethrown by catch")]
    Rethrown(#[source] Box<EngineError>),

    /// A tag constructor rejected its arguments.
    #[error("Error creating statement for tag: {tag}")]
    TagConstructor {
        /// Tag name being built
        tag: String,
        /// What the constructor rejected
        #[source]
        source: Box<EngineError>,
    },

    /// No registered tag and no custom processor produced a value.
    #[error("Cannot generate statement for tag '{0}'")]
    UnknownTag(String),

    /// A stock tag was used without a repository configured.
    #[error("Attempt to get a stock object while repositories is null")]
    NoRepositories,
}

impl EngineError {
    /// Wraps an adapter error with a short description.
    pub fn link(message: impl Into<String>, source: impl Into<LinkError>) -> Self {
        EngineError::Link {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Walks the `source` chain to the deepest underlying error.
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        let mut cur: &(dyn std::error::Error + 'static) = self;
        while let Some(next) = cur.source() {
            cur = next;
        }
        cur
    }

    /// Message of the deepest underlying error.
    ///
    /// This is what a catch statement stores into its error variable.
    pub fn root_message(&self) -> String {
        self.root_cause().to_string()
    }
}
