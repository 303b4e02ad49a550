//! Crate-wide error taxonomy, mapped to the process's exit codes.

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy per the error-handling design: every variant carries
/// enough context to log a post-mortem, and [`Error::exit_code`] maps it
/// onto the three-way process exit contract of the CLI.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing/contradictory config, unknown distribution, bad period
    /// multiplicity. Fatal, exit 1, no filesystem mutation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `is-resume` requested but a required prior-block artifact is
    /// missing. Fatal, exit 1.
    #[error("resume precondition failed: {0}")]
    ResumePrecondition(String),

    /// Likelihood evaluated to NaN for some subpop. Fatal, exit 2; the
    /// offending tables are left on disk for post-mortem (no GC runs).
    #[error("likelihood NaN for subpop {subpop}: {detail}")]
    NonFiniteLikelihood { subpop: crate::SubpopId, detail: String },

    /// A transient I/O fault survived one retry with backoff. Fatal for
    /// this slot only; other slots are unaffected.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Propagated from a [`crate::simulator::SimulatorAdapter`] whose
    /// contract was violated (not a normal non-zero return, which is
    /// handled as a rejection rather than an error).
    #[error("simulator adapter error: {0}")]
    Simulator(String),

    /// Any other uncaught runtime failure. Exit 2.
    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}

impl Error {
    /// Configuration/resume failures exit 1 and leave no partial state;
    /// everything else that escapes a slot exits 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Configuration(_) | Error::ResumePrecondition(_) => 1,
            _ => 2,
        }
    }
}

pub fn config_err(msg: impl Into<String>) -> Error {
    Error::Configuration(msg.into())
}
