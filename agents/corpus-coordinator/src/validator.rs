//! Submission validation
//!
//! Enforces text/target coherence on submitted cases: every personal name
//! locked in the target must appear in the text, no schema key or
//! enumeration code may leak into it, and near-duplicates of recent cases
//! are flagged (soft) through Jaccard similarity.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::contracts::SubmissionChecks;
use crate::error::{CoordinatorError, RejectionKind, Result};

const SHORT_CASE_CHARS: usize = 60;

fn snake_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z]+_[a-z_]+\b").expect("valid regex"))
}

fn enum_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z]{2,}(?:_[A-Z0-9]{2,})+\b").expect("valid regex"))
}

fn bare_enum_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:CELIBATAIRE|MARIE|PACSE|DIVORCE|VEUF|JOURS|MOIS|ANNEES)\b")
            .expect("valid regex")
    })
}

fn foreign_bool_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:True|False)\b").expect("valid regex"))
}

/// Collapse whitespace and normalize line endings
pub fn normalize_text(value: &str) -> String {
    let unified = value.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut pending_blank = 0usize;
    for line in unified.split('\n') {
        let squeezed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if squeezed.is_empty() {
            pending_blank += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank > 0 {
                out.push('\n');
            }
        }
        pending_blank = 0;
        out.push_str(&squeezed);
    }
    out
}

/// Lowercase, strip diacritics, collapse whitespace; the comparison key for
/// names and duplicate detection
pub fn fold_key(value: &str) -> String {
    let lowered = normalize_text(value).to_lowercase();
    let folded: String = lowered.nfd().filter(|ch| !is_combining_mark(*ch)).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_name(value: &str) -> String {
    let folded = fold_key(value);
    let kept: String = folded
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == ' ' {
                ch
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Personal-name values of a decoded target: every string under a local key
/// named `nom`, `*_nom`, or `*_noms` (string lists included), deduplicated
pub fn collect_named_values(payload: &Value) -> Vec<String> {
    let mut names = Vec::new();
    collect_names(payload, None, &mut names);
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| {
            let key = clean_name(name);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

fn collect_names(node: &Value, parent_key: Option<&str>, names: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                let key_norm = key.to_lowercase();
                if let Value::String(text) = value {
                    if key_norm == "nom" || key_norm.ends_with("_nom") || key_norm.ends_with("_noms")
                    {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            names.push(trimmed.to_string());
                        }
                    }
                }
                collect_names(value, Some(&key_norm), names);
            }
        }
        Value::Array(items) => {
            if parent_key.is_some_and(|key| key.ends_with("_noms")) {
                for item in items {
                    if let Value::String(text) = item {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            names.push(trimmed.to_string());
                        }
                    }
                }
            }
            for item in items {
                collect_names(item, parent_key, names);
            }
        }
        _ => {}
    }
}

fn name_appears(name: &str, folded_text: &str) -> bool {
    let cleaned = clean_name(name);
    if cleaned.is_empty() || folded_text.contains(&cleaned) {
        return true;
    }
    let tokens: Vec<&str> = cleaned.split(' ').filter(|token| token.len() >= 2).collect();
    let Some(last) = tokens.last() else {
        return true;
    };
    // Partial fallback: the last name token alone is enough when long, or
    // when another token of the full name appears too.
    if last.len() >= 4 && folded_text.contains(last) {
        return true;
    }
    folded_text.contains(last)
        && tokens[..tokens.len() - 1]
            .iter()
            .any(|token| folded_text.contains(token))
}

/// Names from the locked target that the case text fails to cover
pub fn missing_names(case_text: &str, decoded_target: &Value) -> Vec<String> {
    let folded = fold_key(case_text);
    collect_named_values(decoded_target)
        .into_iter()
        .filter(|name| !name_appears(name, &folded))
        .collect()
}

/// Hard leakage scan; returns the offending token
pub fn leakage_token(case_text: &str) -> Option<String> {
    if let Some(m) = snake_case_re().find(case_text) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = enum_code_re().find(case_text) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = bare_enum_word_re().find(case_text) {
        return Some(m.as_str().to_string());
    }
    if let Some(m) = foreign_bool_re().find(case_text) {
        return Some(m.as_str().to_string());
    }
    None
}

fn tokenize(text: &str) -> HashSet<String> {
    fold_key(text)
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over normalized word shingles
pub fn jaccard_similarity(left: &str, right: &str) -> f64 {
    let left_tokens = tokenize(left);
    let right_tokens = tokenize(right);
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0.0;
    }
    let intersection = left_tokens.intersection(&right_tokens).count();
    let union = left_tokens.union(&right_tokens).count();
    intersection as f64 / union as f64
}

/// A reference text to compare a fresh submission against
pub struct ComparisonRef<'a> {
    pub id: &'a str,
    pub text: &'a str,
}

/// Soft checks on an accepted case text; never rejects
#[derive(Debug, Clone)]
pub struct SubmissionValidator {
    pub similarity_threshold: f64,
    pub similarity_window: usize,
}

impl SubmissionValidator {
    pub fn new(similarity_threshold: f64, similarity_window: usize) -> Self {
        SubmissionValidator {
            similarity_threshold,
            similarity_window,
        }
    }

    /// Hard gates: leakage scan, then name coverage against the decoded
    /// locked target
    pub fn enforce(&self, case_text: &str, decoded_target: &Value) -> Result<()> {
        if let Some(token) = leakage_token(case_text) {
            return Err(CoordinatorError::rejection(
                RejectionKind::Leakage,
                format!("case text contains a schema or enum token: {token:?}"),
            ));
        }
        let missing = missing_names(case_text, decoded_target);
        if !missing.is_empty() {
            let preview = missing
                .iter()
                .take(3)
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CoordinatorError::rejection(
                RejectionKind::MissingName,
                format!("names absent from the case text: {preview}"),
            ));
        }
        Ok(())
    }

    /// Similarity scan and descriptive stats for the submission record
    pub fn screen<'a, I>(&self, case_text: &str, references: I) -> SubmissionChecks
    where
        I: IntoIterator<Item = ComparisonRef<'a>>,
    {
        let folded = fold_key(case_text);
        let mut checks = SubmissionChecks {
            word_count: case_text.split_whitespace().count(),
            char_count: case_text.chars().count(),
            contains_digits: case_text.chars().any(|ch| ch.is_ascii_digit()),
            ..SubmissionChecks::default()
        };

        for reference in references {
            if fold_key(reference.text) == folded {
                checks.exact_duplicate = true;
                checks.max_similarity = 1.0;
                checks.closest_reference = Some(reference.id.to_string());
                break;
            }
            let score = jaccard_similarity(case_text, reference.text);
            if score > checks.max_similarity {
                checks.max_similarity = score;
                checks.closest_reference = Some(reference.id.to_string());
            }
        }
        checks.max_similarity = (checks.max_similarity * 10_000.0).round() / 10_000.0;

        if checks.exact_duplicate {
            checks.warnings.push("exact duplicate detected".to_string());
        } else if checks.max_similarity >= self.similarity_threshold {
            checks
                .warnings
                .push("very close to an existing case".to_string());
        }
        if checks.char_count < SHORT_CASE_CHARS {
            checks.warnings.push("very short case text".to_string());
        }
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fold_key_strips_diacritics() {
        assert_eq!(fold_key("Éléonore  Lefèvre"), "eleonore lefevre");
        assert_eq!(fold_key("  DÉCÈS\r\nconstaté "), "deces constate");
    }

    #[test]
    fn test_collect_named_values() {
        let target = json!({
            "famille": {
                "defunt": {"nom": "Jean Durand"},
                "partenaire": {"nom": "Marie Roux"},
                "temoins_noms": ["Paul Petit", "Jean Durand"]
            },
            "liberalites": {
                "donations": [{"donateur_nom": "Jean Durand", "beneficiaire_nom": "Lucie Durand"}]
            }
        });
        let names = collect_named_values(&target);
        assert_eq!(
            names,
            ["Jean Durand", "Marie Roux", "Paul Petit", "Lucie Durand"]
        );
    }

    #[test]
    fn test_missing_names_partial_fallback() {
        let target = json!({"famille": {"defunt": {"nom": "Jean-Baptiste Lefèvre"}}});
        // Last name alone satisfies coverage.
        assert!(missing_names("Le décès de M. Lefevre est survenu en mars.", &target).is_empty());
        assert_eq!(
            missing_names("Une succession est ouverte à Lyon.", &target),
            ["Jean-Baptiste Lefèvre"]
        );
    }

    #[test]
    fn test_leakage_tokens() {
        assert_eq!(
            leakage_token("Il était PARTENAIRE_PACS depuis 2019."),
            Some("PARTENAIRE_PACS".to_string())
        );
        assert_eq!(
            leakage_token("le champ statut_matrimonial du dossier"),
            Some("statut_matrimonial".to_string())
        );
        assert_eq!(leakage_token("Elle était VEUF."), Some("VEUF".to_string()));
        assert_eq!(leakage_token("Réponse: True"), Some("True".to_string()));
        assert_eq!(
            leakage_token("Mon père est décédé en mars, il était marié."),
            None
        );
    }

    #[test]
    fn test_jaccard_similarity() {
        let a = "Mon père est décédé en mars à Lyon";
        let b = "Mon père est décédé en avril à Lyon";
        let score = jaccard_similarity(a, b);
        assert!(score > 0.6 && score < 1.0);
        assert_eq!(jaccard_similarity(a, a), 1.0);
        assert_eq!(jaccard_similarity(a, ""), 0.0);
    }

    #[test]
    fn test_enforce_rejects_and_accepts() {
        let validator = SubmissionValidator::new(0.9, 64);
        let target = json!({"famille": {"defunt": {"nom": "Jean Durand"}}});
        assert!(validator
            .enforce("M. Durand est décédé à Lyon en 2024.", &target)
            .is_ok());
        let err = validator
            .enforce("Le défunt avait un statut_matrimonial complexe.", &target)
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::Leakage));
        let err = validator
            .enforce("Une personne est décédée à Lyon.", &target)
            .unwrap_err();
        assert_eq!(err.rejection_kind(), Some(RejectionKind::MissingName));
    }

    #[test]
    fn test_screen_flags_duplicates_and_similarity() {
        let validator = SubmissionValidator::new(0.9, 64);
        let text = "Mon père est décédé en mars, il laisse deux enfants et une maison à Lyon.";
        let checks = validator.screen(
            text,
            vec![ComparisonRef {
                id: "seed_0001",
                text,
            }],
        );
        assert!(checks.exact_duplicate);
        assert_eq!(checks.max_similarity, 1.0);
        assert_eq!(checks.closest_reference.as_deref(), Some("seed_0001"));
        assert!(checks.warnings.iter().any(|w| w.contains("duplicate")));

        let fresh = validator.screen(
            "Ma tante est décédée récemment en laissant un testament olographe contesté.",
            vec![ComparisonRef {
                id: "seed_0001",
                text,
            }],
        );
        assert!(!fresh.exact_duplicate);
        assert!(fresh.max_similarity < 0.5);
    }
}
