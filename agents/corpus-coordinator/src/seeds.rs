//! Seed corpus ingestion
//!
//! Pre-existing cases count toward the submitted total and feed the merged
//! training export, but never pass through the submission validator.

use std::path::Path;

use serde::Deserialize;

use crate::error::{CoordinatorError, Result};
use crate::validator::normalize_text;

/// One externally supplied case
#[derive(Debug, Clone)]
pub struct SeedCase {
    pub case_id: String,
    pub source_type: String,
    pub source_name: String,
    pub text: String,
    /// Present when the seed row ships its own locked target; only those
    /// rows enter the merged training export
    pub target_toon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    text: Option<String>,
    case_id: Option<String>,
    source_type: Option<String>,
    source_name: Option<String>,
    target_toon: Option<String>,
}

/// Load the seed corpus; rows without a `text` field are skipped
pub fn load_seed_cases(path: &Path) -> Result<Vec<SeedCase>> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        CoordinatorError::config(format!("cannot read seed corpus {}: {err}", path.display()))
    })?;
    let mut seeds = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row: SeedRow = serde_json::from_str(line).map_err(|err| {
            CoordinatorError::config(format!(
                "invalid seed row at {}:{}: {err}",
                path.display(),
                line_no + 1
            ))
        })?;
        let Some(case_text) = row.text.filter(|text| !text.trim().is_empty()) else {
            continue;
        };
        seeds.push(SeedCase {
            case_id: row
                .case_id
                .unwrap_or_else(|| format!("seed_{:04}", seeds.len() + 1)),
            source_type: row.source_type.unwrap_or_else(|| "unknown".to_string()),
            source_name: row.source_name.unwrap_or_default(),
            text: normalize_text(&case_text),
            target_toon: row.target_toon.filter(|toon| !toon.trim().is_empty()),
        });
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_skips_rows_without_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"case_id": "a", "text": "Mon père est décédé."}}"#).unwrap();
        writeln!(file, r#"{{"case_id": "b"}}"#).unwrap();
        writeln!(file, r#"{{"text": "  Succession ouverte à Lyon.  "}}"#).unwrap();
        let seeds = load_seed_cases(file.path()).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].case_id, "a");
        assert_eq!(seeds[1].case_id, "seed_0002");
        assert_eq!(seeds[1].text, "Succession ouverte à Lyon.");
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(load_seed_cases(file.path()).is_err());
    }
}
