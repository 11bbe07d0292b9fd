//! Random personal names
//!
//! The external random-name provider is an optional list file (JSON array of
//! full names, or one name per line). When it is absent or exhausted the
//! pool falls back to built-in French given/family-name combinations, and as
//! a last resort to a deterministic placeholder that is still a concrete
//! name.

use std::collections::HashSet;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{CoordinatorError, Result};

const GIVEN_NAMES: &[&str] = &[
    "Jean", "Marie", "Claire", "Thomas", "Camille", "Hugo", "Lucie", "Nicolas", "Sophie",
    "Julien", "Emma", "Paul", "Lea", "Antoine",
];

const FAMILY_NAMES: &[&str] = &[
    "Durand", "Morel", "Lefevre", "Martin", "Roux", "Bernard", "Petit", "Garcia", "Thomas",
    "Robert", "Leroy", "Girard",
];

/// Pool of plausible French full names
#[derive(Debug, Clone, Default)]
pub struct NamePool {
    external: Vec<String>,
}

impl NamePool {
    /// Built-in fallback pool only
    pub fn builtin() -> Self {
        NamePool::default()
    }

    /// Load an external provider file; JSON arrays and newline lists are
    /// both accepted
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            CoordinatorError::config(format!("cannot read names file {}: {err}", path.display()))
        })?;
        let trimmed = text.trim_start();
        let external: Vec<String> = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<String>>(&text).map_err(|err| {
                CoordinatorError::config(format!("invalid names file {}: {err}", path.display()))
            })?
        } else {
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        };
        if external.is_empty() {
            return Err(CoordinatorError::config(format!(
                "names file {} contains no names",
                path.display()
            )));
        }
        Ok(NamePool { external })
    }

    /// Draw a name not yet in `used`
    pub fn draw(&self, rng: &mut StdRng, used: &mut HashSet<String>) -> String {
        for _ in 0..50 {
            if let Some(candidate) = self.external.choose(rng) {
                let candidate = candidate.trim();
                if !candidate.is_empty() && !used.contains(candidate) {
                    used.insert(candidate.to_string());
                    return candidate.to_string();
                }
            } else {
                break;
            }
        }
        for _ in 0..200 {
            let given = GIVEN_NAMES.choose(rng).expect("non-empty table");
            let family = FAMILY_NAMES.choose(rng).expect("non-empty table");
            let candidate = format!("{given} {family}");
            if !used.contains(&candidate) {
                used.insert(candidate.clone());
                return candidate;
            }
        }
        let fallback = format!("Personne {}", used.len() + 1);
        used.insert(fallback.clone());
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_draws_are_unique() {
        let pool = NamePool::builtin();
        let mut rng = StdRng::seed_from_u64(7);
        let mut used = HashSet::new();
        let names: Vec<String> = (0..20).map(|_| pool.draw(&mut rng, &mut used)).collect();
        let distinct: HashSet<&String> = names.iter().collect();
        assert_eq!(distinct.len(), names.len());
    }

    #[test]
    fn test_external_list_preferred() {
        let pool = NamePool {
            external: vec!["Iris Delcourt".to_string()],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut used = HashSet::new();
        assert_eq!(pool.draw(&mut rng, &mut used), "Iris Delcourt");
        // Exhausted external list falls back to the built-in combinations.
        let second = pool.draw(&mut rng, &mut used);
        assert_ne!(second, "Iris Delcourt");
        assert!(second.contains(' '));
    }
}
