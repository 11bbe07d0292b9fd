//! Business-coherence gate
//!
//! Read-only checks mirroring the repair pass: a candidate that still
//! violates an invariant after repair restarts the generation attempt.

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::axes::{AxisSelection, Topic};
use crate::schema::parse_iso_date;

const MAX_AGE: i64 = 110;

fn years_between(start: NaiveDate, end: NaiveDate) -> i64 {
    let mut years = i64::from(end.year() - start.year());
    if (end.month(), end.day()) < (start.month(), start.day()) {
        years -= 1;
    }
    years
}

fn check_person(
    label: &str,
    person: &Value,
    reference_death: Option<NaiveDate>,
    errors: &mut Vec<String>,
) {
    let Value::Object(person) = person else {
        return;
    };
    let age = person
        .get("age_au_deces")
        .and_then(Value::as_f64)
        .map(|age| age.round() as i64);
    let birth = person
        .get("date_naissance")
        .and_then(Value::as_str)
        .and_then(parse_iso_date);
    let minor = person.get("est_mineur").and_then(Value::as_bool);

    if let Some(age) = age {
        if !(0..=MAX_AGE).contains(&age) {
            errors.push(format!("age out of range at {label}"));
        }
        if let Some(minor) = minor {
            if minor != (age < 18) {
                errors.push(format!("est_mineur inconsistent with age at {label}"));
            }
        }
    }
    if let (Some(birth), Some(death)) = (birth, reference_death) {
        if birth > death {
            errors.push(format!("birth date after death at {label}"));
        } else if let Some(age) = age {
            let computed = years_between(birth, death);
            if (age - computed).abs() > 1 {
                errors.push(format!("age/date mismatch at {label}"));
            }
        }
    }
}

/// Collect every coherence violation of the candidate payload
pub fn coherence_violations(payload: &Value, selection: &AxisSelection) -> Vec<String> {
    let mut errors = Vec::new();

    let famille = payload.get("famille");
    let defunt = famille.and_then(|f| f.get("defunt"));
    let partenaire = famille.and_then(|f| f.get("partenaire"));
    let defunt_name = defunt.and_then(|d| d.get("nom")).and_then(Value::as_str);
    let statut = defunt
        .and_then(|d| d.get("statut_matrimonial"))
        .and_then(Value::as_str);
    let partner_link = partenaire
        .and_then(|p| p.get("lien"))
        .and_then(|l| l.get("type"))
        .and_then(Value::as_str);
    let death_date = defunt
        .and_then(|d| d.get("date_deces"))
        .and_then(Value::as_str)
        .and_then(parse_iso_date);

    if defunt_name.map_or(true, |name| name.trim().is_empty()) {
        errors.push("decedent name missing".to_string());
    }
    match statut {
        Some("MARIE") => {
            if partenaire.is_none() {
                errors.push("status MARIE without a partner".to_string());
            } else if partner_link != Some("CONJOINT") {
                errors.push("status MARIE inconsistent with partner link".to_string());
            }
        }
        Some("PACSE") => {
            if partenaire.is_none() {
                errors.push("status PACSE without a partner".to_string());
            } else if partner_link != Some("PARTENAIRE_PACS") {
                errors.push("status PACSE inconsistent with partner link".to_string());
            }
            if defunt.and_then(|d| d.get("regime_matrimonial")).is_some() {
                errors.push("PACS union with a matrimonial regime".to_string());
            }
        }
        Some("VEUF") => {
            if partenaire.is_some() {
                errors.push("widowed decedent with a surviving partner block".to_string());
            }
        }
        Some("CELIBATAIRE") | Some("DIVORCE") => {
            if partner_link == Some("CONJOINT") {
                errors.push("unmarried status with a CONJOINT partner".to_string());
            }
        }
        _ => {}
    }

    if let Some(defunt) = defunt {
        check_person("famille.defunt", defunt, death_date, &mut errors);
    }
    if let Some(partenaire) = partenaire {
        check_person("famille.partenaire", partenaire, death_date, &mut errors);
    }
    for bloc in ["descendants", "ascendants", "collateraux"] {
        let Some(Value::Object(groups)) = famille.and_then(|f| f.get(bloc)) else {
            continue;
        };
        for (group_name, group) in groups {
            let Value::Array(persons) = group else {
                continue;
            };
            for (idx, person) in persons.iter().enumerate() {
                check_person(
                    &format!("famille.{bloc}.{group_name}[{idx}]"),
                    person,
                    death_date,
                    &mut errors,
                );
            }
        }
    }

    let contracts = payload
        .get("assurance_vie")
        .and_then(|av| av.get("contrats"))
        .and_then(Value::as_array);
    if let Some(contracts) = contracts {
        for (idx, contract) in contracts.iter().enumerate() {
            let insured = contract.get("assure_nom").and_then(Value::as_str);
            if let (Some(decedent), Some(insured)) = (defunt_name, insured) {
                if insured != decedent {
                    errors.push(format!("contrats[{idx}] insured is not the decedent"));
                }
            }
            if let Some(Value::Array(payments)) = contract.get("versements") {
                for (pidx, payment) in payments.iter().enumerate() {
                    let age = payment
                        .get("age_assure_au_versement")
                        .and_then(Value::as_f64);
                    let after_70 = payment.get("apres_70_ans").and_then(Value::as_bool);
                    if let (Some(age), Some(after_70)) = (age, after_70) {
                        if (age >= 70.0) != after_70 {
                            errors.push(format!(
                                "contrats[{idx}].versements[{pidx}] apres_70_ans inconsistent"
                            ));
                        }
                    }
                }
            }
        }
    }

    let donations = payload
        .get("liberalites")
        .and_then(|l| l.get("donations"))
        .and_then(Value::as_array);
    if let Some(donations) = donations {
        for (idx, donation) in donations.iter().enumerate() {
            let donor = donation.get("donateur_nom").and_then(Value::as_str);
            let beneficiary = donation.get("beneficiaire_nom").and_then(Value::as_str);
            if let (Some(donor), Some(beneficiary)) = (donor, beneficiary) {
                if donor == beneficiary {
                    errors.push(format!("donations[{idx}] donor equals beneficiary"));
                }
            }
        }
    }

    let patrimoine = payload.get("patrimoine");
    for bloc in ["actifs", "passifs"] {
        let Some(entries) = patrimoine.and_then(|p| p.get(bloc)).and_then(Value::as_array) else {
            continue;
        };
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(value) = entry.get("valeur").and_then(Value::as_f64) {
                if value <= 0.0 {
                    errors.push(format!("{bloc}[{idx}] non-positive value"));
                }
            }
        }
    }

    if super::topics::persona_requires_child(selection.persona) {
        let has_child = famille
            .and_then(|f| f.get("descendants"))
            .and_then(|d| d.get("enfants"))
            .and_then(Value::as_array)
            .is_some_and(|children| !children.is_empty());
        if !has_child {
            errors.push("child persona without a child entry".to_string());
        }
    }

    let assets = patrimoine.and_then(|p| p.get("actifs")).and_then(Value::as_array);
    for topic in [Some(selection.primary_topic), selection.secondary_topic]
        .into_iter()
        .flatten()
    {
        match topic {
            Topic::AssuranceVie => {
                if contracts.map_or(true, |entries| entries.is_empty()) {
                    errors.push("assurance_vie topic without a contract".to_string());
                }
            }
            Topic::DonationsReduction => {
                if donations.map_or(true, |entries| entries.is_empty()) {
                    errors.push("donations_reduction topic without a donation".to_string());
                }
            }
            Topic::EntrepriseDutreil => {
                let has_company = assets.is_some_and(|assets| {
                    assets
                        .iter()
                        .any(|asset| asset.get("entreprise").is_some_and(Value::is_object))
                });
                if !has_company {
                    errors.push("entreprise_dutreil topic without an enterprise block".to_string());
                }
            }
            _ => {}
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::*;
    use serde_json::json;

    fn selection() -> AxisSelection {
        AxisSelection {
            persona: Persona::Tiers,
            voice: Voice::TroisiemePersonne,
            format: TextFormat::RecitLibre,
            length_band: LengthBand::Moyen,
            noise: NoiseLevel::Propre,
            numeric_density: NumericDensity::UnMontant,
            date_precision: DatePrecision::Exacte,
            complexity: Complexity::Simple,
            primary_topic: Topic::OrdreHeritiers,
            secondary_topic: None,
            hard_negative_mode: None,
            hard_negative_intensity: None,
        }
    }

    fn base_payload() -> serde_json::Value {
        json!({
            "famille": {
                "defunt": {
                    "nom": "Jean Durand",
                    "statut_matrimonial": "DIVORCE",
                    "date_deces": "2024-03-10",
                    "date_naissance": "1950-03-10",
                    "age_au_deces": 74
                }
            }
        })
    }

    #[test]
    fn test_clean_payload_passes() {
        assert!(coherence_violations(&base_payload(), &selection()).is_empty());
    }

    #[test]
    fn test_married_without_partner_fails() {
        let mut payload = base_payload();
        payload["famille"]["defunt"]["statut_matrimonial"] = json!("MARIE");
        let errors = coherence_violations(&payload, &selection());
        assert!(errors.iter().any(|e| e.contains("MARIE without a partner")));
    }

    #[test]
    fn test_widowed_with_partner_fails() {
        let mut payload = base_payload();
        payload["famille"]["defunt"]["statut_matrimonial"] = json!("VEUF");
        payload["famille"]["partenaire"] = json!({"nom": "Marie Roux"});
        let errors = coherence_violations(&payload, &selection());
        assert!(errors.iter().any(|e| e.contains("widowed")));
    }

    #[test]
    fn test_age_date_mismatch_fails() {
        let mut payload = base_payload();
        payload["famille"]["defunt"]["age_au_deces"] = json!(40);
        let errors = coherence_violations(&payload, &selection());
        assert!(errors.iter().any(|e| e.contains("age/date mismatch")));
    }

    #[test]
    fn test_insured_must_be_decedent() {
        let mut payload = base_payload();
        payload["assurance_vie"] = json!({"contrats": [{"assure_nom": "Paul Petit"}]});
        let errors = coherence_violations(&payload, &selection());
        assert!(errors.iter().any(|e| e.contains("insured")));
    }

    #[test]
    fn test_topic_requires_its_block() {
        let mut sel = selection();
        sel.primary_topic = Topic::AssuranceVie;
        let errors = coherence_violations(&base_payload(), &sel);
        assert!(errors.iter().any(|e| e.contains("without a contract")));
    }
}
