//! Names and lengths of the reference sequences, in file order.
use crate::error::{PoissonError, Result};
use crate::plan_regions;
use definitions::{ParameterSet, Region};

#[derive(Debug, Clone)]
pub struct ReferenceIndex {
    records: Vec<(String, usize)>,
}

impl ReferenceIndex {
    pub fn new(records: Vec<(String, usize)>) -> Self {
        Self { records }
    }
    pub fn from_fasta(path: &str) -> Result<Self> {
        debug!("Opening {path}");
        let records: Vec<_> = bio_utils::fasta::parse_into_vec(path)?
            .into_iter()
            .map(|record| {
                let (id, _, seq) = record.into();
                (id, seq.len())
            })
            .collect();
        debug!("REFERENCE\t{}\t{}", path, records.len());
        Ok(Self::new(records))
    }
    pub fn len(&self, name: &str) -> Option<usize> {
        self.records
            .iter()
            .find(|(id, _)| id == name)
            .map(|&(_, len)| len)
    }
    /// Regions to refine when the user did not give any.
    /// References longer than `max_length` are split into windows, the rest are taken whole.
    pub fn default_regions(&self, params: &ParameterSet) -> Result<Vec<Region>> {
        let mut regions = vec![];
        for (id, len) in self.records.iter() {
            if *len == 0 {
                warn!("EMPTY\t{id}\tskipped");
                continue;
            }
            match params.max_length {
                Some(max_length) if max_length < *len => {
                    let windows = plan_regions::plan(*len, max_length, params.overlap)?;
                    debug!("PLAN\t{id}\t{len}\t{}", windows.len());
                    regions.extend(windows.iter().map(|&(s, e)| Region::span(id, s, e)));
                }
                _ => regions.push(Region::whole(id)),
            }
        }
        Ok(regions)
    }
    /// Check that `region` names an existing reference and fits in it.
    pub fn check(&self, region: &Region) -> Result<()> {
        let (name, len) = match region.reference() {
            Some(name) => match self.len(name) {
                Some(len) => (name, len),
                None => {
                    let msg = format!("{region}: no reference named {name}");
                    return Err(PoissonError::config(msg));
                }
            },
            None => match self.records.as_slice() {
                [(name, len)] => (name.as_str(), *len),
                _ => {
                    let msg = format!(
                        "{region}: a region without a name needs exactly one reference, found {}",
                        self.records.len()
                    );
                    return Err(PoissonError::config(msg));
                }
            },
        };
        match region.range() {
            Some((_, end)) if len < end => {
                let msg = format!("{region}: exceeds the length of {name} ({len})");
                Err(PoissonError::config(msg))
            }
            _ => Ok(()),
        }
    }
}
