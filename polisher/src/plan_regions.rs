//! Split a long reference into overlapping windows the oracle can digest.
use crate::error::{PoissonError, Result};

/// Check that windows of `max_length` with `overlap` would advance.
pub fn check_window(max_length: usize, overlap: usize) -> Result<()> {
    match overlap < max_length {
        true => Ok(()),
        false => Err(PoissonError::config(format!(
            "max_length ({max_length}) should be larger than the overlap ({overlap})"
        ))),
    }
}

/// Return `[start, end)` windows covering `[0, len)`, ascending by start.
/// Windows are `max_length` long and consecutive windows share `overlap` bases,
/// until a window reaches the end of the reference.
/// As the start and the end are clamped to `len` independently,
/// the trailing windows may be shorter than `max_length - overlap`.
/// For example, `plan(5000, 2500, 1000)` gives `[0,2500), [1500,4000), [3000,5000), [4500,5000)`.
pub fn plan(len: usize, max_length: usize, overlap: usize) -> Result<Vec<(usize, usize)>> {
    check_window(max_length, overlap)?;
    if len <= max_length {
        return Ok(vec![(0, len)]);
    }
    let step = max_length - overlap;
    let (mut start, mut end) = (0, max_length.min(len));
    let mut windows = Vec::with_capacity(len / step + 1);
    while start < end {
        windows.push((start, end));
        end = (end + step).min(len);
        start = (start + step).min(len);
    }
    Ok(windows)
}
