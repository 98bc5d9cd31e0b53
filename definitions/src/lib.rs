//! Definitions -- the data passed around the poisson polishing pipeline.
//! Every structure here is serializable, so the parameter files, the FASTA headers, and the training history share one vocabulary.
//! The algorithms live in the `polisher` crate; this crate only knows how to name, print, and parse things.
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::collections::BTreeMap;

/// Overlap between consecutive windows when the parameter file does not say otherwise.
pub const DEFAULT_OVERLAP: usize = 1_000;

/// A contiguous span of a reference, refined as one unit.
/// The spelling given by the user is kept, as it becomes the FASTA header of the corrected record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub enum Region {
    /// The whole reference sequence with this name.
    Whole(String),
    /// `[start, end)` on a reference. The name is omitted when only one reference is in play.
    Span {
        reference: Option<String>,
        start: usize,
        end: usize,
    },
}

impl Region {
    pub fn whole(name: &str) -> Self {
        Region::Whole(name.to_string())
    }
    pub fn span(name: &str, start: usize, end: usize) -> Self {
        Region::Span {
            reference: Some(name.to_string()),
            start,
            end,
        }
    }
    pub fn reference(&self) -> Option<&str> {
        match self {
            Region::Whole(name) => Some(name),
            Region::Span { reference, .. } => reference.as_deref(),
        }
    }
    /// Coordinates, if this region is a span.
    pub fn range(&self) -> Option<(usize, usize)> {
        match *self {
            Region::Whole(_) => None,
            Region::Span { start, end, .. } => Some((start, end)),
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Region::Whole(name) => write!(f, "{name}"),
            Region::Span {
                reference: Some(name),
                start,
                end,
            } => write!(f, "{name}:{start}:{end}"),
            Region::Span {
                reference: None,
                start,
                end,
            } => write!(f, "{start}:{end}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionParseError {
    #[error("empty region string")]
    Empty,
    #[error("`{region}`: {field} is not a non-negative integer")]
    Coordinate { region: String, field: String },
    #[error("`{region}`: reference name is empty")]
    MissingName { region: String },
    #[error("`{region}`: start {start} is not smaller than end {end}")]
    EmptySpan {
        region: String,
        start: usize,
        end: usize,
    },
}

impl std::str::FromStr for Region {
    type Err = RegionParseError;
    /// Accepts `name`, `name:start:end`, or `start:end`.
    /// The name itself may contain `:`, as only the last two fields are read as coordinates.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RegionParseError::Empty);
        }
        let mut fields: Vec<&str> = s.rsplitn(3, ':').collect();
        fields.reverse();
        let coordinate = |field: &str| -> Result<usize, RegionParseError> {
            field.parse().map_err(|_| RegionParseError::Coordinate {
                region: s.to_string(),
                field: field.to_string(),
            })
        };
        let (reference, start, end) = match fields.as_slice() {
            [name] => return Ok(Region::Whole(name.to_string())),
            [start, end] => (None, coordinate(start)?, coordinate(end)?),
            [name, start, end] => {
                if name.is_empty() {
                    return Err(RegionParseError::MissingName {
                        region: s.to_string(),
                    });
                }
                (Some(name.to_string()), coordinate(start)?, coordinate(end)?)
            }
            _ => unreachable!(),
        };
        if end <= start {
            return Err(RegionParseError::EmptySpan {
                region: s.to_string(),
                start,
                end,
            });
        }
        Ok(Region::Span {
            reference,
            start,
            end,
        })
    }
}

/// A value of an oracle-specific parameter. The core never interprets these,
/// except that numeric ones may be perturbed during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Knob {
    Int(i64),
    Float(f64),
    Flag(bool),
    Text(String),
}

impl Knob {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Knob::Int(x) => Some(x as f64),
            Knob::Float(x) => Some(x),
            Knob::Flag(_) | Knob::Text(_) => None,
        }
    }
    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }
}

impl std::fmt::Display for Knob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Knob::Int(x) => write!(f, "{x}"),
            Knob::Float(x) => write!(f, "{x}"),
            Knob::Flag(x) => write!(f, "{x}"),
            Knob::Text(x) => write!(f, "{x}"),
        }
    }
}

/// The parameters of the refinement oracle and of the code driving it.
/// A parameter set is a snapshot: training derives new sets, it never edits one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// The upper bound of a window. If absent, every reference is refined as a whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// The overlap between consecutive windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Everything else. Passed to the oracle as-is.
    #[serde(flatten)]
    pub knobs: BTreeMap<String, Knob>,
    #[serde(default)]
    pub train: TrainConfig,
}

fn default_overlap() -> usize {
    DEFAULT_OVERLAP
}

impl std::default::Default for ParameterSet {
    fn default() -> Self {
        Self {
            max_length: None,
            overlap: DEFAULT_OVERLAP,
            knobs: BTreeMap::new(),
            train: TrainConfig::default(),
        }
    }
}

impl ParameterSet {
    pub fn knob(&self, name: &str) -> Option<&Knob> {
        self.knobs.get(name)
    }
    /// Return a copy of this set with `name` set to `value`.
    pub fn with_knob(&self, name: &str, value: Knob) -> Self {
        let mut params = self.clone();
        params.knobs.insert(name.to_string(), value);
        params
    }
    /// Names of the knobs training may vary, in the order they are perturbed.
    /// If `train.tune` is empty, all numeric knobs are tunable.
    pub fn tunable(&self) -> Vec<&str> {
        match self.train.tune.is_empty() {
            true => self
                .knobs
                .iter()
                .filter(|(_, knob)| knob.is_numeric())
                .map(|(name, _)| name.as_str())
                .collect(),
            false => self.train.tune.iter().map(|x| x.as_str()).collect(),
        }
    }
}

/// The `[train]` table of a parameter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Perturbed candidates per iteration, not counting the baseline.
    pub candidates: usize,
    /// Relative bound of a perturbation.
    pub step: f64,
    /// Knobs allowed to vary.
    pub tune: Vec<String>,
    /// Knobs changed by each candidate.
    pub params_per_candidate: usize,
    /// Size of the held-out subset of regions candidates are scored on.
    pub regions: usize,
    pub seed: u64,
    /// Stop after this many iterations without improvement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patience: Option<usize>,
    pub epsilon: f64,
}

impl std::default::Default for TrainConfig {
    fn default() -> Self {
        Self {
            candidates: 8,
            step: 0.1,
            tune: vec![],
            params_per_candidate: 1,
            regions: 10,
            seed: 42,
            patience: None,
            epsilon: 0.0001,
        }
    }
}

/// A corrected region. Failures are not records; see `polisher::consensus::RegionFailure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub region: Region,
    /// Corrected sequence on A,C,G,T.
    pub seq: String,
    /// Only in test mode.
    pub accuracy: Option<f64>,
}

impl CorrectionRecord {
    pub fn new(region: Region, seq: String, accuracy: Option<f64>) -> Self {
        Self {
            region,
            seq,
            accuracy,
        }
    }
}

/// FASTA entry. The header is the region, followed by ` [accuracy]` in test mode.
impl std::fmt::Display for CorrectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.accuracy {
            Some(acc) => {
                // Two decimals at most, trailing zeros dropped, but `1.0` keeps its `.0`.
                let acc = (acc * 100f64).round_ties_even() / 100f64;
                write!(f, ">{} [{:?}]\n{}", self.region, acc, self.seq)
            }
            None => write!(f, ">{}\n{}", self.region, self.seq),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    Scored { accuracy: f64 },
    Disqualified { reason: String },
}

impl Evaluation {
    pub fn accuracy(&self) -> Option<f64> {
        match *self {
            Evaluation::Scored { accuracy } => Some(accuracy),
            Evaluation::Disqualified { .. } => None,
        }
    }
    /// Disqualified candidates score negative infinity.
    pub fn score(&self) -> f64 {
        self.accuracy().unwrap_or(f64::NEG_INFINITY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub parameters: ParameterSet,
    pub evaluation: Evaluation,
}

/// One round of the training. `candidates[0]` is always the baseline,
/// i.e., the parameter set the iteration started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingIteration {
    /// 1-based.
    pub index: usize,
    pub candidates: Vec<CandidateResult>,
    /// Index of the winner in `candidates`.
    pub selected: usize,
}

impl TrainingIteration {
    pub fn baseline(&self) -> &ParameterSet {
        &self.candidates[0].parameters
    }
    pub fn selected_parameters(&self) -> &ParameterSet {
        &self.candidates[self.selected].parameters
    }
    pub fn accuracy(&self) -> f64 {
        self.candidates[self.selected].evaluation.score()
    }
    pub fn disqualified(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.evaluation.accuracy().is_none())
            .count()
    }
}
