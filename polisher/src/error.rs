//! Errors that stop a run. Failures scoped to one region or one candidate are not here;
//! they are values (`RegionFailure`, `Evaluation::Disqualified`) and the run goes on.
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PoissonError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("malformed parameter file {path:?}: {reason}")]
    Params { path: PathBuf, reason: String },
    #[error(transparent)]
    Region(#[from] definitions::RegionParseError),
    #[error("every candidate failed in training iteration {0}")]
    AllCandidatesFailed(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoissonError>;

impl PoissonError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        PoissonError::Config(msg.into())
    }
}
