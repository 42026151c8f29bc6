use thiserror::Error;

/// Internal consistency violations raised by the lowering passes. None of
/// these are user diagnostics: each one means an earlier stage handed over a
/// tree that breaks an invariant, and compilation of the unit stops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("tuple bind arity mismatch: {lhs} targets bound to {rhs} values")]
    ArityMismatch { lhs: usize, rhs: usize },

    #[error("expected a plain name in {context} but found `{found}`")]
    ExpectedName {
        context: &'static str,
        found: String,
    },

    #[error("call to unregistered procedure `{0}`")]
    UnregisteredProcedure(String),

    #[error("entry procedure `{0}` is not defined in this unit")]
    MissingEntryPoint(String),

    #[error("entry procedure `{name}` is malformed: {reason}")]
    MalformedEntryPoint { name: String, reason: String },

    #[error("application of `{callee}` is malformed: {reason}")]
    MalformedApplication { callee: String, reason: String },

    #[error("`{0}` has no implementation type")]
    MissingImplementationType(String),
}

pub type CompileResult<T> = Result<T, CompileError>;
