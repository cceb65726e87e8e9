//! Language collaborators: parsing and evaluation
//!
//! The engine never looks inside declarations or environments. It needs a
//! [`Parser`] that splits a file into top-level items and reports which names
//! each declaration reads and defines, and an [`Evaluator`] that turns a
//! declaration plus an input environment into output text and a new
//! environment.
//!
//! [`calc`] is the built-in reference language used by the binary.

pub mod calc;

use thiserror::Error;

/// A parsed, valid top-level declaration
pub trait Declaration: Send + Sync + 'static {
    /// Raw source text of the declaration, used as its cache identity
    fn source(&self) -> &str;

    /// Names this declaration reads
    fn free_vars(&self) -> Vec<String>;

    /// Names this declaration defines
    fn bound_vars(&self) -> Vec<String>;
}

/// One top-level item of a parsed file
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<D> {
    /// Text that failed to parse, with the parser's message
    Error { source: String, message: String },
    /// A valid declaration
    Decl(D),
}

/// Splits a whole file into an ordered sequence of items
pub trait Parser: Send + 'static {
    type Decl: Declaration;

    fn parse(&self, text: &str) -> Vec<Parsed<Self::Decl>>;
}

/// Error raised by an evaluator for one declaration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Successful evaluation of one declaration
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated<Env> {
    /// Text shown to observers
    pub output: String,
    /// Environment handed to dependents: the declaration's own bindings,
    /// not the inputs it was evaluated against
    pub env: Env,
}

/// Evaluates declarations against environments.
///
/// `evaluate` may block for an unbounded time and is called concurrently
/// from many workers. Each declaration is evaluated at most once.
pub trait Evaluator<D>: Send + Sync + 'static {
    type Env: Clone + Send + Sync + 'static;

    /// Environment every evaluation starts from
    fn base_env(&self) -> Self::Env;

    /// Combine `other` into `acc`. Workers apply this in parent key order.
    fn merge(&self, acc: Self::Env, other: &Self::Env) -> Self::Env;

    /// Environment served by a worker whose evaluation failed
    fn fallback_env(&self) -> Self::Env;

    fn evaluate(&self, decl: &D, env: Self::Env) -> Result<Evaluated<Self::Env>, EvalError>;
}
