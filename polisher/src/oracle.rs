//! The refinement oracle: given a region, the alignment, and the raw evidence, return a corrected sequence.
//! How the correction is done is not our business. We only call it and read what it says.
use definitions::{ParameterSet, Region};
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Read-only inputs shared by every oracle call.
#[derive(Debug, Clone)]
pub struct Inputs {
    /// Reference FASTA.
    pub reference: PathBuf,
    /// Reads aligned to the reference.
    pub alignment: PathBuf,
    /// Root directory of the raw per-read evidence.
    pub evidence: PathBuf,
}

impl Inputs {
    pub fn new<P: Into<PathBuf>>(reference: P, alignment: P, evidence: P) -> Self {
        Self {
            reference: reference.into(),
            alignment: alignment.into(),
            evidence: evidence.into(),
        }
    }
}

/// What the oracle returns. In test mode, it also scores the result against the loaded sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Refined {
    Sequence(String),
    Scored(String, f64),
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("can not launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("exited with {status}: {stderr}")]
    Exit {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unreadable output: {0}")]
    Output(String),
    #[error("no accuracy reported in test mode")]
    MissingAccuracy,
    #[error("{0}")]
    Refine(String),
}

pub trait RefinementOracle: Sync {
    fn refine(
        &self,
        inputs: &Inputs,
        params: &ParameterSet,
        region: &Region,
        test: bool,
        verbose: u8,
    ) -> Result<Refined, OracleError>;
}

impl<F> RefinementOracle for F
where
    F: Fn(&Inputs, &ParameterSet, &Region, bool, u8) -> Result<Refined, OracleError> + Sync,
{
    fn refine(
        &self,
        inputs: &Inputs,
        params: &ParameterSet,
        region: &Region,
        test: bool,
        verbose: u8,
    ) -> Result<Refined, OracleError> {
        self(inputs, params, region, test, verbose)
    }
}

pub const DEFAULT_ORACLE: &str = "poisson-mutate";

/// Run an external program once per region.
/// `PROGRAM REF ALIGNMENT DIR --region REGION [--test] [-v..]`, with the parameters in JSON on the stdin.
/// The program should print `{"sequence": "ACGT..", "accuracy": 0.9}` to the stdout,
/// where the accuracy is needed only in test mode.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
}

impl CommandOracle {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl std::default::Default for CommandOracle {
    fn default() -> Self {
        Self::new(DEFAULT_ORACLE)
    }
}

impl RefinementOracle for CommandOracle {
    fn refine(
        &self,
        inputs: &Inputs,
        params: &ParameterSet,
        region: &Region,
        test: bool,
        verbose: u8,
    ) -> Result<Refined, OracleError> {
        let mut command = Command::new(&self.program);
        command
            .arg(&inputs.reference)
            .arg(&inputs.alignment)
            .arg(&inputs.evidence)
            .arg("--region")
            .arg(region.to_string());
        if test {
            command.arg("--test");
        }
        for _ in 0..verbose {
            command.arg("-v");
        }
        trace!("ORACLE\t{command:?}");
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| OracleError::Launch {
                program: self.program.clone(),
                source,
            })?;
        let params = serde_json::to_vec(params).map_err(|e| OracleError::Output(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            // A child exiting without reading its stdin is reported by its exit status below.
            if let Err(why) = stdin.write_all(&params) {
                debug!("ORACLE\tSTDIN\t{region}\t{why}");
            }
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim().lines().last().unwrap_or("").to_string();
            return Err(OracleError::Exit {
                status: output.status,
                stderr,
            });
        }
        parse_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct OracleOutput {
    sequence: String,
    #[serde(default)]
    accuracy: Option<f64>,
}

fn parse_output(stdout: &[u8]) -> Result<Refined, OracleError> {
    let output: OracleOutput =
        serde_json::from_slice(stdout).map_err(|e| OracleError::Output(e.to_string()))?;
    match output.accuracy {
        Some(acc) if !acc.is_finite() => Err(OracleError::Output(format!("accuracy {acc}"))),
        Some(acc) => Ok(Refined::Scored(output.sequence, acc)),
        None => Ok(Refined::Sequence(output.sequence)),
    }
}
