//! Loading and saving parameter files (TOML).
use crate::error::{PoissonError, Result};
use crate::plan_regions::check_window;
use definitions::ParameterSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Load the parameter file. Without a file, the defaults are used.
pub fn load(path: Option<&Path>) -> Result<ParameterSet> {
    let params = match path {
        Some(path) => {
            debug!("PARAMS\t{path:?}");
            let text = std::fs::read_to_string(path)?;
            from_str(&text).map_err(|reason| PoissonError::Params {
                path: path.to_path_buf(),
                reason,
            })?
        }
        None => ParameterSet::default(),
    };
    validate(&params)?;
    Ok(params)
}

pub fn from_str(text: &str) -> std::result::Result<ParameterSet, String> {
    toml::from_str(text).map_err(|why| why.to_string())
}

pub fn to_string(params: &ParameterSet) -> std::result::Result<String, String> {
    toml::to_string(params).map_err(|why| why.to_string())
}

/// Reject parameters the region planner can not work with.
pub fn validate(params: &ParameterSet) -> Result<()> {
    if let Some(max_length) = params.max_length {
        check_window(max_length, params.overlap)?;
    }
    Ok(())
}

/// Write `params` to `path`. A reader of `path` sees either the old or the new file, never a half-written one.
pub fn save(path: &Path, params: &ParameterSet) -> Result<()> {
    let text = to_string(params).map_err(|reason| PoissonError::Params {
        path: path.to_path_buf(),
        reason,
    })?;
    write_atomically(path, text.as_bytes())?;
    Ok(())
}

pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut wtr = std::fs::File::create(&tmp).map(BufWriter::new)?;
    wtr.write_all(contents)?;
    wtr.into_inner()?.sync_all()?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use definitions::Knob;
    const PARAMS: &str = r#"
max_length = 5000
insertion = 0.25
band_width = 30
model = "r9.4"
use_events = true

[train]
candidates = 4
step = 0.2
tune = ["insertion"]
"#;
    #[test]
    fn parse_params() {
        let params = from_str(PARAMS).unwrap();
        assert_eq!(params.max_length, Some(5000));
        assert_eq!(params.overlap, definitions::DEFAULT_OVERLAP);
        assert_eq!(params.knob("insertion"), Some(&Knob::Float(0.25)));
        assert_eq!(params.knob("band_width"), Some(&Knob::Int(30)));
        assert_eq!(params.knob("model"), Some(&Knob::Text("r9.4".to_string())));
        assert_eq!(params.knob("use_events"), Some(&Knob::Flag(true)));
        assert_eq!(params.train.candidates, 4);
        assert_eq!(params.train.step, 0.2);
        assert_eq!(params.train.regions, 10);
        assert_eq!(params.train.patience, None);
        assert_eq!(params.knobs.len(), 4);
    }
    #[test]
    fn defaults() {
        let params = from_str("").unwrap();
        assert_eq!(params, ParameterSet::default());
        assert!(load(None).is_ok());
    }
    #[test]
    fn malformed() {
        assert!(from_str("max_length = -3").is_err());
        assert!(from_str("max_length = \"long\"").is_err());
        assert!(from_str("[nested]\nkey = 1").is_err());
        let params = from_str("max_length = 900").unwrap();
        assert!(validate(&params).is_err());
        let params = from_str("max_length = 900\noverlap = 100").unwrap();
        assert!(validate(&params).is_ok());
    }
    #[test]
    fn save_and_load() {
        let dir = std::env::temp_dir().join(format!("poisson-params-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trained.toml");
        let params = from_str(PARAMS).unwrap();
        save(&path, &params).unwrap();
        let loaded = load(Some(&path)).unwrap();
        assert_eq!(params, loaded);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
