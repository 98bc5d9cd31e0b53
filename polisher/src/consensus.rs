//! Consensus -- refine regions one by one and write the corrected sequences as FASTA.
//! A region the oracle can not refine is reported and skipped; it never takes the rest of the run down.
use crate::oracle::{Inputs, OracleError, Refined, RefinementOracle};
use definitions::{CorrectionRecord, ParameterSet, Region};
use rayon::prelude::*;
use std::io::Write;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusConfig {
    /// Ask the oracle to score its result, and print the score in the header.
    test: bool,
    verbose: u8,
}

impl ConsensusConfig {
    pub fn new(test: bool, verbose: u8) -> Self {
        Self { test, verbose }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{region}: {reason}")]
pub struct RegionFailure {
    pub region: Region,
    #[source]
    pub reason: OracleError,
}

pub type Correction = std::result::Result<CorrectionRecord, RegionFailure>;

/// Refine one region.
pub fn correct_region<O: RefinementOracle + ?Sized>(
    oracle: &O,
    inputs: &Inputs,
    params: &ParameterSet,
    region: &Region,
    config: &ConsensusConfig,
) -> Correction {
    trace!("POLISH\t{region}");
    let refined = oracle.refine(inputs, params, region, config.test, config.verbose);
    let record = refined.and_then(|refined| match (refined, config.test) {
        (Refined::Scored(_, acc), true) if !acc.is_finite() => {
            Err(OracleError::Output(format!("accuracy {acc}")))
        }
        (Refined::Scored(seq, acc), true) => Ok((seq, Some(acc))),
        (Refined::Sequence(_), true) => Err(OracleError::MissingAccuracy),
        (Refined::Sequence(seq), false) | (Refined::Scored(seq, _), false) => Ok((seq, None)),
    });
    match record {
        Ok((seq, acc)) => Ok(CorrectionRecord::new(region.clone(), seq, acc)),
        Err(reason) => Err(RegionFailure {
            region: region.clone(),
            reason,
        }),
    }
}

/// Lazy sequence of corrections, in the order of the regions.
/// The oracle is called only when the next item is requested.
pub struct Corrections<'a, O: ?Sized> {
    oracle: &'a O,
    inputs: &'a Inputs,
    params: &'a ParameterSet,
    regions: std::slice::Iter<'a, Region>,
    config: ConsensusConfig,
}

impl<'a, O: RefinementOracle + ?Sized> Iterator for Corrections<'a, O> {
    type Item = Correction;
    fn next(&mut self) -> Option<Self::Item> {
        let region = self.regions.next()?;
        let (oracle, inputs, params) = (self.oracle, self.inputs, self.params);
        Some(correct_region(oracle, inputs, params, region, &self.config))
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.regions.size_hint()
    }
}

pub fn corrections<'a, O: RefinementOracle + ?Sized>(
    oracle: &'a O,
    inputs: &'a Inputs,
    params: &'a ParameterSet,
    regions: &'a [Region],
    config: &ConsensusConfig,
) -> Corrections<'a, O> {
    Corrections {
        oracle,
        inputs,
        params,
        regions: regions.iter(),
        config: *config,
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// The number of records written.
    pub written: usize,
    pub failures: Vec<RegionFailure>,
}

/// Refine `regions` and write each record to `wtr` as soon as it is ready, flushing after every record.
/// With a thread pool, regions are refined in batches of the pool's size,
/// and each batch is written in order after all of it is done.
/// Output order is always the order of `regions`.
pub fn correct_regions<O, W>(
    oracle: &O,
    inputs: &Inputs,
    params: &ParameterSet,
    regions: &[Region],
    config: &ConsensusConfig,
    pool: Option<&rayon::ThreadPool>,
    wtr: &mut W,
) -> std::io::Result<RunSummary>
where
    O: RefinementOracle + ?Sized,
    W: Write,
{
    debug!("START\tConsensus\t{}", regions.len());
    let summary = RunSummary::default();
    let summary = match pool {
        None => corrections(oracle, inputs, params, regions, config).try_fold(
            summary,
            |mut summary, correction| {
                emit(correction, wtr, &mut summary)?;
                Ok::<_, std::io::Error>(summary)
            },
        )?,
        Some(pool) => {
            let batch_size = pool.current_num_threads().max(1);
            let mut summary = summary;
            for chunk in regions.chunks(batch_size) {
                let batch: Vec<_> = pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|region| correct_region(oracle, inputs, params, region, config))
                        .collect()
                });
                for correction in batch {
                    emit(correction, wtr, &mut summary)?;
                }
            }
            summary
        }
    };
    debug!(
        "END\tConsensus\t{}\t{}",
        summary.written,
        summary.failures.len()
    );
    Ok(summary)
}

fn emit<W: Write>(
    correction: Correction,
    wtr: &mut W,
    summary: &mut RunSummary,
) -> std::io::Result<()> {
    match correction {
        Ok(record) => {
            writeln!(wtr, "{record}")?;
            wtr.flush()?;
            summary.written += 1;
        }
        Err(failure) => {
            warn!("SKIP\t{}\t{}", failure.region, failure.reason);
            summary.failures.push(failure);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    fn inputs() -> Inputs {
        Inputs::new("ref.fa", "reads.bam", "fast5")
    }
    fn regions() -> Vec<Region> {
        vec![
            Region::span("tig1", 0, 2500),
            Region::span("tig1", 1500, 4000),
            Region::span("tig1", 3000, 5000),
            Region::span("tig1", 4500, 5000),
        ]
    }
    // `SEQ<start>` as the corrected sequence. Fails on `1500:4000`.
    fn flaky(
        _: &Inputs,
        _: &ParameterSet,
        region: &Region,
        test: bool,
        _: u8,
    ) -> Result<Refined, OracleError> {
        if region.range() == Some((1500, 4000)) {
            return Err(OracleError::Refine("insufficient coverage".to_string()));
        }
        let seq = format!("SEQ{}", region.range().unwrap().0);
        match test {
            true => Ok(Refined::Scored(seq, 0.8675)),
            false => Ok(Refined::Sequence(seq)),
        }
    }
    #[derive(Default)]
    struct FlushCounter {
        buffer: Vec<u8>,
        flushed_at: Vec<usize>,
    }
    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed_at.push(self.buffer.len());
            Ok(())
        }
    }
    #[test]
    fn skip_failed_region() {
        let (inputs, params, regions) = (inputs(), ParameterSet::default(), regions());
        let config = ConsensusConfig::new(false, 0);
        let mut wtr = FlushCounter::default();
        let summary =
            correct_regions(&flaky, &inputs, &params, &regions, &config, None, &mut wtr).unwrap();
        assert_eq!(summary.written, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].region, regions[1]);
        let output = String::from_utf8(wtr.buffer).unwrap();
        let answer = ">tig1:0:2500\nSEQ0\n>tig1:3000:5000\nSEQ3000\n>tig1:4500:5000\nSEQ4500\n";
        assert_eq!(output, answer);
        // Flushed after every record.
        let record_ends: Vec<_> = output
            .match_indices('\n')
            .skip(1)
            .step_by(2)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(wtr.flushed_at, record_ends);
    }
    #[test]
    fn test_mode_header() {
        let (inputs, params) = (inputs(), ParameterSet::default());
        let regions = vec![Region::span("tig1", 0, 2500)];
        let config = ConsensusConfig::new(true, 0);
        let mut wtr = vec![];
        let summary =
            correct_regions(&flaky, &inputs, &params, &regions, &config, None, &mut wtr).unwrap();
        assert_eq!(summary.written, 1);
        let output = String::from_utf8(wtr).unwrap();
        assert_eq!(output, ">tig1:0:2500 [0.87]\nSEQ0\n");
    }
    #[test]
    fn test_mode_needs_accuracy() {
        let unscored = |_: &Inputs,
                        _: &ParameterSet,
                        _: &Region,
                        _: bool,
                        _: u8|
         -> Result<Refined, OracleError> {
            Ok(Refined::Sequence("ACGT".to_string()))
        };
        let (inputs, params) = (inputs(), ParameterSet::default());
        let region = Region::whole("tig1");
        let config = ConsensusConfig::new(true, 0);
        let result = correct_region(&unscored, &inputs, &params, &region, &config);
        assert!(matches!(
            result,
            Err(RegionFailure {
                reason: OracleError::MissingAccuracy,
                ..
            })
        ));
        let config = ConsensusConfig::new(false, 0);
        let record = correct_region(&unscored, &inputs, &params, &region, &config).unwrap();
        assert_eq!(record.accuracy, None);
    }
    #[test]
    fn reject_non_finite_accuracy() {
        let (inputs, params) = (inputs(), ParameterSet::default());
        let region = Region::whole("tig1");
        let config = ConsensusConfig::new(true, 0);
        for acc in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let broken = |_: &Inputs,
                          _: &ParameterSet,
                          _: &Region,
                          _: bool,
                          _: u8|
             -> Result<Refined, OracleError> {
                Ok(Refined::Scored("ACGT".to_string(), acc))
            };
            let result = correct_region(&broken, &inputs, &params, &region, &config);
            assert!(matches!(
                result,
                Err(RegionFailure {
                    reason: OracleError::Output(_),
                    ..
                })
            ));
        }
    }
    #[test]
    fn lazy() {
        let calls = AtomicUsize::new(0);
        let counting = |_: &Inputs,
                        _: &ParameterSet,
                        _: &Region,
                        _: bool,
                        _: u8|
         -> Result<Refined, OracleError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Refined::Sequence("A".to_string()))
        };
        let (inputs, params, regions) = (inputs(), ParameterSet::default(), regions());
        let config = ConsensusConfig::default();
        let mut iter = corrections(&counting, &inputs, &params, &regions, &config);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
    #[test]
    fn parallel_keeps_order() {
        // Later regions finish first.
        let slow_head = |_: &Inputs,
                         _: &ParameterSet,
                         region: &Region,
                         _: bool,
                         _: u8|
         -> Result<Refined, OracleError> {
            let (start, _) = region.range().unwrap();
            let wait = 40u64.saturating_sub(start as u64 / 100);
            std::thread::sleep(std::time::Duration::from_millis(wait));
            match start % 700 {
                0 => Err(OracleError::Refine("low quality".to_string())),
                _ => Ok(Refined::Sequence(format!("S{start}"))),
            }
        };
        let (inputs, params) = (inputs(), ParameterSet::default());
        let regions: Vec<_> = (0..20)
            .map(|i| Region::span("tig1", i * 100, i * 100 + 500))
            .collect();
        let config = ConsensusConfig::default();
        let mut sequential = vec![];
        let summary = correct_regions(
            &slow_head,
            &inputs,
            &params,
            &regions,
            &config,
            None,
            &mut sequential,
        )
        .unwrap();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(4)
            .build()
            .unwrap();
        let mut parallel = vec![];
        let par_summary = correct_regions(
            &slow_head,
            &inputs,
            &params,
            &regions,
            &config,
            Some(&pool),
            &mut parallel,
        )
        .unwrap();
        assert_eq!(sequential, parallel);
        assert_eq!(summary.written, par_summary.written);
        let failed: Vec<_> = par_summary.failures.iter().map(|f| &f.region).collect();
        assert_eq!(failed, vec![&regions[0], &regions[7], &regions[14]]);
    }
}
