//! Analysis configuration

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::de::DeParams;
use crate::error::Result;
use crate::filter::FilterParams;
use crate::pca::PcaParams;

/// Every tunable parameter of the three analyses. Missing fields in a
/// config file take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub filter: FilterParams,
    pub pca: PcaParams,
    pub de: DeParams,
}

impl AnalysisConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"filter": {{"min_samples": 5}}, "de": {{"cooks_cutoff": 12.5}}}}"#).unwrap();

        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.filter.min_samples, 5);
        assert_eq!(config.filter.min_count, 10.0);
        assert_eq!(config.pca.n_components, 2);
        assert_eq!(config.de.cooks_cutoff, Some(12.5));
        assert_eq!(config.de.alpha, 0.1);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(AnalysisConfig::from_json_file(file.path()).is_err());
    }
}
