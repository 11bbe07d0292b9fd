//! Business-invariant repair pass
//!
//! After leaf sampling, the candidate payload is normalized in place:
//! marital status and partner link agree, every person's age and birth date
//! are consistent with the death date, topic-mandatory blocks exist, and
//! branches left without content are deleted.

use chrono::{Datelike, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::axes::{AxisSelection, Topic};
use crate::schema::parse_iso_date;

use super::values::{contract_label, random_iso_date};
use super::{topics, GenerationContext};

const MATRIMONIAL_REGIMES: &[&str] = &[
    "COMMUNAUTE_REDUITE_AUX_ACQUETS",
    "SEPARATION_DE_BIENS",
    "COMMUNAUTE_UNIVERSELLE",
    "PARTICIPATION_AUX_ACQUETS",
];

fn int_between(value: Option<&Value>, default: i64, min: i64, max: i64) -> i64 {
    let coerced = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(default),
        _ => default,
    };
    coerced.clamp(min, max)
}

fn birth_from_age(ref_date: NaiveDate, age: i64) -> NaiveDate {
    let year = (ref_date.year() as i64 - age).max(1900) as i32;
    let day = ref_date.day().min(28);
    NaiveDate::from_ymd_opt(year, ref_date.month(), day)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date"))
}

/// Force one person block into age/date consistency relative to the death
/// date
fn harmonize_person(
    person: &mut Map<String, Value>,
    ref_date: NaiveDate,
    default_age: i64,
    min_age: i64,
    max_age: i64,
    can_be_minor: bool,
) {
    let age = int_between(person.get("age_au_deces"), default_age, min_age, max_age);
    let birth = birth_from_age(ref_date, age);
    person.insert("age_au_deces".to_string(), json!(age));
    person.insert("date_naissance".to_string(), json!(birth.to_string()));
    if person.contains_key("est_mineur") {
        person.insert("est_mineur".to_string(), json!(can_be_minor && age < 18));
    }

    let deceased = person.get("est_decede").and_then(Value::as_bool);
    let option = person
        .get("option_successorale")
        .and_then(Value::as_str)
        .map(str::to_string);
    match deceased {
        Some(true) if option.as_deref() != Some("PREDECEDE") => {
            person.insert("option_successorale".to_string(), json!("PREDECEDE"));
        }
        Some(false) if option.as_deref() == Some("PREDECEDE") => {
            person.insert("option_successorale".to_string(), json!("ACCEPTE"));
        }
        _ => {}
    }
}

fn as_object_mut<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let entry = map.entry(key.to_string()).or_insert_with(|| json!({}));
    if !entry.is_object() {
        *entry = json!({});
    }
    entry.as_object_mut().expect("object just ensured")
}

fn as_array_mut<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Vec<Value> {
    let entry = map.entry(key.to_string()).or_insert_with(|| json!([]));
    if !entry.is_array() {
        *entry = json!([]);
    }
    entry.as_array_mut().expect("array just ensured")
}

/// Run the full repair pass
pub fn repair(
    payload: &mut Value,
    selection: &AxisSelection,
    ctx: &GenerationContext,
    rng: &mut StdRng,
) {
    let Some(root) = payload.as_object_mut() else {
        return;
    };
    let death_date = repair_identity(root, ctx, rng);
    repair_partner(root, ctx, death_date);
    repair_children(root, selection, ctx, death_date, rng);
    repair_relatives(root, death_date);
    repair_life_insurance(root, selection, ctx, death_date, rng);
    repair_enterprise(root, selection);
    repair_donations(root, selection, ctx);
    repair_estate_values(root);
    prune_empty(payload);
}

fn repair_identity(
    root: &mut Map<String, Value>,
    ctx: &GenerationContext,
    rng: &mut StdRng,
) -> NaiveDate {
    let famille = as_object_mut(root, "famille");
    let defunt = as_object_mut(famille, "defunt");
    defunt.insert("nom".to_string(), json!(ctx.decedent));
    defunt.insert("statut_matrimonial".to_string(), json!(ctx.marital_status));

    let death_date = defunt
        .get("date_deces")
        .and_then(Value::as_str)
        .and_then(parse_iso_date)
        .unwrap_or_else(|| {
            parse_iso_date(&random_iso_date(rng, 2023, 2026)).expect("generated date is valid")
        });
    defunt.insert("date_deces".to_string(), json!(death_date.to_string()));
    let default_age = rng.gen_range(62..=90);
    harmonize_person(defunt, death_date, default_age, 35, 105, false);
    if let Some(flag) = defunt.get("est_handicape") {
        let coerced = flag.as_bool().unwrap_or(false);
        defunt.insert("est_handicape".to_string(), json!(coerced));
    }

    // A matrimonial regime only makes sense against a marriage context; a
    // PACS union in particular cannot coexist with a regime liquidation.
    let keep_regime = matches!(ctx.marital_status, "MARIE" | "VEUF");
    if !keep_regime {
        defunt.remove("regime_matrimonial");
    } else if let Some(Value::Object(regime)) = defunt.get_mut("regime_matrimonial") {
        if regime.contains_key("participation") {
            regime.insert("type".to_string(), json!("PARTICIPATION_AUX_ACQUETS"));
        }
        let has_type = regime.get("type").and_then(Value::as_str).is_some();
        if !has_type {
            let forced = if regime
                .get("clause_attribution_integrale")
                .and_then(Value::as_bool)
                .unwrap_or(false)
            {
                "COMMUNAUTE_UNIVERSELLE"
            } else {
                *MATRIMONIAL_REGIMES.choose(rng).expect("non-empty")
            };
            regime.insert("type".to_string(), json!(forced));
        }
    }
    death_date
}

fn repair_partner(root: &mut Map<String, Value>, ctx: &GenerationContext, death_date: NaiveDate) {
    let famille = as_object_mut(root, "famille");
    let in_union = matches!(ctx.marital_status, "MARIE" | "PACSE");
    let decedent_age = famille
        .get("defunt")
        .and_then(|d| d.get("age_au_deces"))
        .and_then(Value::as_i64)
        .unwrap_or(75);

    if ctx.marital_status == "VEUF" {
        // A widowed decedent has no surviving partner block.
        famille.remove("partenaire");
        return;
    }
    if in_union {
        let partenaire = as_object_mut(famille, "partenaire");
        partenaire.insert("nom".to_string(), json!(ctx.partner));
        let lien = as_object_mut(partenaire, "lien");
        let link_type = if ctx.marital_status == "MARIE" {
            "CONJOINT"
        } else {
            "PARTENAIRE_PACS"
        };
        lien.insert("type".to_string(), json!(link_type));
        harmonize_person(partenaire, death_date, (decedent_age - 4).max(18), 18, 105, false);
    } else if let Some(Value::Object(partenaire)) = famille.get_mut("partenaire") {
        partenaire.insert("nom".to_string(), json!(ctx.partner));
        if let Some(Value::Object(lien)) = partenaire.get_mut("lien") {
            let link = lien.get("type").and_then(Value::as_str);
            if matches!(link, Some("CONJOINT") | Some("PARTENAIRE_PACS")) {
                lien.insert("type".to_string(), json!("CONCUBIN"));
            }
        }
        harmonize_person(partenaire, death_date, 60, 18, 100, false);
    }
}

fn repair_children(
    root: &mut Map<String, Value>,
    selection: &AxisSelection,
    ctx: &GenerationContext,
    death_date: NaiveDate,
    rng: &mut StdRng,
) {
    let famille = as_object_mut(root, "famille");
    let decedent_age = famille
        .get("defunt")
        .and_then(|d| d.get("age_au_deces"))
        .and_then(Value::as_i64)
        .unwrap_or(75);

    let needs_children = topics::persona_requires_child(selection.persona)
        || matches!(
            selection.primary_topic,
            Topic::OrdreHeritiers
                | Topic::FamilleRecomposee
                | Topic::DonationsReduction
                | Topic::TestamentLegs
        );
    if !needs_children && !famille.contains_key("descendants") {
        return;
    }

    let descendants = as_object_mut(famille, "descendants");
    let children = as_array_mut(descendants, "enfants");
    if needs_children && children.is_empty() {
        children.push(json!({ "nom": ctx.children[0] }));
    }
    let max_child_age = (decedent_age - 14).clamp(1, 75);
    for (idx, child) in children.iter_mut().enumerate() {
        if !child.is_object() {
            *child = json!({});
        }
        let child = child.as_object_mut().expect("object just ensured");
        child.insert(
            "nom".to_string(),
            json!(ctx.children[idx % ctx.children.len()]),
        );
        let default_age = rng.gen_range(2..=max_child_age.max(3));
        harmonize_person(child, death_date, default_age, 0, max_child_age, true);
        if selection.primary_topic == Topic::FamilleRecomposee {
            child.insert("est_d_une_precedente_union".to_string(), json!(idx == 0));
        }
    }

    if let Some(Value::Array(grandchildren)) = descendants.get_mut("petits_enfants") {
        for grandchild in grandchildren.iter_mut() {
            if !grandchild.is_object() {
                *grandchild = json!({});
            }
            let grandchild = grandchild.as_object_mut().expect("object just ensured");
            let default_age = rng.gen_range(0..=35);
            harmonize_person(grandchild, death_date, default_age, 0, 55, true);
            if !grandchild.contains_key("nom") {
                grandchild.insert("nom".to_string(), json!(ctx.children[1]));
            }
            grandchild
                .entry("parent_nom".to_string())
                .or_insert_with(|| json!(ctx.children[0]));
        }
    }
}

/// Safety pass over ascendant and collateral groups
fn repair_relatives(root: &mut Map<String, Value>, death_date: NaiveDate) {
    let famille = as_object_mut(root, "famille");
    for (bloc, default_age, min_age, max_age, can_be_minor) in [
        ("ascendants", 82, 40, 110, false),
        ("collateraux", 48, 0, 100, true),
    ] {
        let Some(Value::Object(groups)) = famille.get_mut(bloc) else {
            continue;
        };
        for group in groups.values_mut() {
            let Value::Array(persons) = group else {
                continue;
            };
            for person in persons.iter_mut() {
                if let Value::Object(person) = person {
                    let default = int_between(
                        person.get("age_au_deces"),
                        default_age,
                        min_age,
                        max_age,
                    );
                    harmonize_person(person, death_date, default, min_age, max_age, can_be_minor);
                }
            }
        }
    }
}

fn repair_life_insurance(
    root: &mut Map<String, Value>,
    selection: &AxisSelection,
    ctx: &GenerationContext,
    death_date: NaiveDate,
    rng: &mut StdRng,
) {
    let is_topic = selection.primary_topic == Topic::AssuranceVie
        || selection.secondary_topic == Some(Topic::AssuranceVie);
    if is_topic && !root.contains_key("assurance_vie") {
        root.insert("assurance_vie".to_string(), json!({}));
    }
    let Some(Value::Object(av)) = root.get_mut("assurance_vie") else {
        return;
    };
    let contracts = as_array_mut(av, "contrats");
    if is_topic && contracts.is_empty() {
        contracts.push(json!({
            "libelle": contract_label(rng),
            "assure_nom": ctx.decedent,
        }));
    }
    for contract in contracts.iter_mut() {
        if !contract.is_object() {
            *contract = json!({});
        }
        let contract = contract.as_object_mut().expect("object just ensured");
        contract
            .entry("libelle".to_string())
            .or_insert_with(|| json!(contract_label(rng)));
        contract.insert("assure_nom".to_string(), json!(ctx.decedent));

        let subscription = contract
            .get("date_souscription")
            .and_then(Value::as_str)
            .and_then(parse_iso_date)
            .filter(|date| *date < death_date);
        let subscription = subscription.unwrap_or_else(|| {
            let year = rng.gen_range((death_date.year() - 25).max(1970)..death_date.year());
            NaiveDate::from_ymd_opt(year, rng.gen_range(1..=12), rng.gen_range(1..=28))
                .expect("day capped at 28")
        });
        contract.insert("date_souscription".to_string(), json!(subscription.to_string()));

        if let Some(Value::Array(payments)) = contract.get_mut("versements") {
            for payment in payments.iter_mut() {
                if let Value::Object(payment) = payment {
                    let age = int_between(
                        payment.get("age_assure_au_versement"),
                        rng.gen_range(35..=85),
                        18,
                        100,
                    );
                    payment.insert("age_assure_au_versement".to_string(), json!(age));
                    payment.insert("apres_70_ans".to_string(), json!(age >= 70));
                }
            }
        }
    }
}

fn repair_enterprise(root: &mut Map<String, Value>, selection: &AxisSelection) {
    let is_topic = selection.primary_topic == Topic::EntrepriseDutreil
        || selection.secondary_topic == Some(Topic::EntrepriseDutreil);
    if !is_topic {
        return;
    }
    let patrimoine = as_object_mut(root, "patrimoine");
    let assets = as_array_mut(patrimoine, "actifs");
    if assets.is_empty() {
        assets.push(json!({}));
    }
    if !assets[0].is_object() {
        assets[0] = json!({});
    }
    let first = assets[0].as_object_mut().expect("object just ensured");
    first
        .entry("type".to_string())
        .or_insert_with(|| json!("ENTREPRISE"));
    let enterprise = as_object_mut(first, "entreprise");
    enterprise
        .entry("type".to_string())
        .or_insert_with(|| json!("PME"));
    enterprise.insert(
        "est_presente_comme_eligible_dutreil".to_string(),
        json!(true),
    );
}

fn repair_donations(root: &mut Map<String, Value>, selection: &AxisSelection, ctx: &GenerationContext) {
    let is_topic = selection.primary_topic == Topic::DonationsReduction
        || selection.secondary_topic == Some(Topic::DonationsReduction);
    if !is_topic {
        ensure_distinct_donation_parties(root, ctx);
        return;
    }
    let liberalites = as_object_mut(root, "liberalites");
    let donations = as_array_mut(liberalites, "donations");
    if donations.is_empty() {
        donations.push(json!({}));
    }
    if !donations[0].is_object() {
        donations[0] = json!({});
    }
    let first = donations[0].as_object_mut().expect("object just ensured");
    first
        .entry("donateur_nom".to_string())
        .or_insert_with(|| json!(ctx.decedent));
    first
        .entry("beneficiaire_nom".to_string())
        .or_insert_with(|| json!(ctx.children[0]));
    first
        .entry("type".to_string())
        .or_insert_with(|| json!("DONATION_SIMPLE"));
    ensure_distinct_donation_parties(root, ctx);
}

/// A donor never donates to themselves
fn ensure_distinct_donation_parties(root: &mut Map<String, Value>, ctx: &GenerationContext) {
    let Some(Value::Object(liberalites)) = root.get_mut("liberalites") else {
        return;
    };
    let Some(Value::Array(donations)) = liberalites.get_mut("donations") else {
        return;
    };
    for donation in donations.iter_mut() {
        let Value::Object(donation) = donation else {
            continue;
        };
        let donor = donation.get("donateur_nom").and_then(Value::as_str);
        let beneficiary = donation.get("beneficiaire_nom").and_then(Value::as_str);
        if let (Some(donor), Some(beneficiary)) = (donor, beneficiary) {
            if donor == beneficiary {
                let replacement = if ctx.children[0] == donor {
                    &ctx.children[1]
                } else {
                    &ctx.children[0]
                };
                donation.insert("beneficiaire_nom".to_string(), json!(replacement));
            }
        }
    }
}

/// Asset and liability values are strictly positive
fn repair_estate_values(root: &mut Map<String, Value>) {
    let Some(Value::Object(patrimoine)) = root.get_mut("patrimoine") else {
        return;
    };
    for bloc in ["actifs", "passifs"] {
        let Some(Value::Array(entries)) = patrimoine.get_mut(bloc) else {
            continue;
        };
        for entry in entries.iter_mut() {
            let Value::Object(entry) = entry else {
                continue;
            };
            if let Some(value) = entry.get("valeur").and_then(Value::as_f64) {
                if value <= 0.0 {
                    entry.insert("valeur".to_string(), json!((value.abs() as i64) + 1));
                }
            }
        }
    }
}

/// Delete empty branches bottom-up: nulls, empty strings, empty containers
pub fn prune_empty(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    prune_empty(child);
                    if is_empty_node(child) {
                        map.remove(&key);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                prune_empty(item);
            }
            items.retain(|item| !is_empty_node(item));
        }
        _ => {}
    }
}

fn is_empty_node(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::sparse_violations;
    use rand::SeedableRng;

    fn selection(primary: Topic) -> AxisSelection {
        AxisSelection {
            persona: crate::axes::Persona::Enfant,
            voice: crate::axes::Voice::PremierePersonne,
            format: crate::axes::TextFormat::RecitLibre,
            length_band: crate::axes::LengthBand::Moyen,
            noise: crate::axes::NoiseLevel::Propre,
            numeric_density: crate::axes::NumericDensity::UnMontant,
            date_precision: crate::axes::DatePrecision::Exacte,
            complexity: crate::axes::Complexity::Simple,
            primary_topic: primary,
            secondary_topic: None,
            hard_negative_mode: None,
            hard_negative_intensity: None,
        }
    }

    #[test]
    fn test_repair_builds_identity_and_children() {
        let mut rng = StdRng::seed_from_u64(11);
        let ctx = GenerationContext::sample();
        let mut payload = json!({});
        repair(&mut payload, &selection(Topic::OrdreHeritiers), &ctx, &mut rng);

        let defunt = &payload["famille"]["defunt"];
        assert_eq!(defunt["nom"], json!(ctx.decedent));
        assert_eq!(defunt["statut_matrimonial"], json!("MARIE"));
        let birth = parse_iso_date(defunt["date_naissance"].as_str().unwrap()).unwrap();
        let death = parse_iso_date(defunt["date_deces"].as_str().unwrap()).unwrap();
        assert!(birth < death);
        // A MARIE decedent always has a partner with a CONJOINT link.
        assert_eq!(payload["famille"]["partenaire"]["lien"]["type"], json!("CONJOINT"));
        // The child-bearing persona guarantees one child entry.
        assert_eq!(
            payload["famille"]["descendants"]["enfants"][0]["nom"],
            json!(ctx.children[0])
        );
        assert!(sparse_violations(&payload).is_empty());
    }

    #[test]
    fn test_repair_life_insurance_names_the_decedent() {
        let mut rng = StdRng::seed_from_u64(12);
        let ctx = GenerationContext::sample();
        let mut payload = json!({
            "assurance_vie": {
                "contrats": [{
                    "assure_nom": "Quelqu'un D'Autre",
                    "date_souscription": "2030-01-01",
                    "versements": [{"age_assure_au_versement": 72, "apres_70_ans": false}]
                }]
            }
        });
        repair(&mut payload, &selection(Topic::AssuranceVie), &ctx, &mut rng);
        let contract = &payload["assurance_vie"]["contrats"][0];
        assert_eq!(contract["assure_nom"], json!(ctx.decedent));
        let subscription = parse_iso_date(contract["date_souscription"].as_str().unwrap()).unwrap();
        let death =
            parse_iso_date(payload["famille"]["defunt"]["date_deces"].as_str().unwrap()).unwrap();
        assert!(subscription < death);
        assert_eq!(contract["versements"][0]["apres_70_ans"], json!(true));
    }

    #[test]
    fn test_repair_donation_parties_distinct() {
        let mut rng = StdRng::seed_from_u64(13);
        let ctx = GenerationContext::sample();
        let mut payload = json!({
            "liberalites": {
                "donations": [{
                    "donateur_nom": ctx.children[0].clone(),
                    "beneficiaire_nom": ctx.children[0].clone(),
                }]
            }
        });
        repair(&mut payload, &selection(Topic::DonationsReduction), &ctx, &mut rng);
        let donation = &payload["liberalites"]["donations"][0];
        assert_ne!(donation["donateur_nom"], donation["beneficiaire_nom"]);
    }

    #[test]
    fn test_prune_empty_removes_hollow_branches() {
        let mut payload = json!({
            "a": {"b": {}, "c": "", "d": null, "e": "ok"},
            "f": [],
            "g": [{"h": null}]
        });
        prune_empty(&mut payload);
        assert_eq!(payload, json!({"a": {"e": "ok"}}));
    }

    #[test]
    fn test_repair_negative_asset_value() {
        let mut rng = StdRng::seed_from_u64(14);
        let ctx = GenerationContext::sample();
        let mut payload = json!({
            "patrimoine": {"actifs": [{"libelle": "Maison à Lyon", "valeur": -5000}]}
        });
        repair(&mut payload, &selection(Topic::OrdreHeritiers), &ctx, &mut rng);
        assert_eq!(payload["patrimoine"]["actifs"][0]["valeur"], json!(5001));
    }
}
