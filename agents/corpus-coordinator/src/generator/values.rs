//! Typed leaf value generation
//!
//! Values are driven by the leaf's declared kind plus heuristics on the
//! local key name: amounts are currency-like, ages stay in [0, 110], ratios
//! in [0, 1], dates fall in plausible windows. String fallbacks are always
//! concrete (a city, an asset label), never a generic placeholder.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use crate::schema::{FieldPath, LeafSpec, ScalarKind};

use super::GenerationContext;

pub const CITIES: &[&str] = &[
    "Paris", "Lyon", "Marseille", "Nantes", "Bordeaux", "Lille", "Toulouse", "Montpellier",
    "Grenoble",
];

pub const COMPANIES: &[&str] = &[
    "SARL Atelier Delta",
    "SAS Nova Conseil",
    "SCI Les Tilleuls",
    "SARL Horizon Bois",
    "SAS Aquila Services",
];

pub const INSURERS: &[&str] = &[
    "Generali",
    "AXA",
    "MAIF",
    "Credit Agricole Predica",
    "CNP Assurances",
];

const CREDITORS: &[&str] = &["Trésor Public", "Banque Populaire", "URSSAF", "EDF"];

/// Random ISO day within the year window; days capped at 28 to stay valid
pub fn random_iso_date(rng: &mut StdRng, year_min: i32, year_max: i32) -> String {
    let year = rng.gen_range(year_min..=year_max);
    let month = rng.gen_range(1..=12);
    let day = rng.gen_range(1..=28);
    format!("{year:04}-{month:02}-{day:02}")
}

pub fn asset_label(rng: &mut StdRng) -> String {
    let city = CITIES.choose(rng).expect("non-empty");
    match rng.gen_range(0..6) {
        0 => format!("Maison à {city}"),
        1 => format!("Appartement à {city}"),
        2 => format!("Terrain à {city}"),
        3 => format!("Résidence secondaire à {city}"),
        4 => {
            let bank = ["BNP", "SG", "CA", "BP"].choose(rng).expect("non-empty");
            format!("Compte bancaire (banque {bank})")
        }
        _ => format!("Parts {}", COMPANIES.choose(rng).expect("non-empty")),
    }
}

pub fn contract_label(rng: &mut StdRng) -> String {
    format!("Contrat {}", INSURERS.choose(rng).expect("non-empty"))
}

/// Generate a value for one selected leaf
pub fn leaf_value(
    path: &FieldPath,
    spec: &LeafSpec,
    rng: &mut StdRng,
    ctx: &mut GenerationContext,
) -> Value {
    let key = path.leaf_key().unwrap_or_default().to_lowercase();

    if spec.is_enum() {
        return enum_value(path, spec, &key, rng, ctx);
    }
    match spec.kind {
        ScalarKind::Boolean => bool_value(&key, rng),
        ScalarKind::Integer | ScalarKind::Number => numeric_value(path, &key, rng),
        ScalarKind::Date => json!(random_iso_date(rng, 2005, 2026)),
        ScalarKind::Text => text_value(path, &key, rng, ctx),
    }
}

fn enum_value(
    path: &FieldPath,
    spec: &LeafSpec,
    key: &str,
    rng: &mut StdRng,
    ctx: &GenerationContext,
) -> Value {
    let allowed = &spec.allowed_values;
    if key == "statut_matrimonial" && allowed.iter().any(|v| v == ctx.marital_status) {
        return json!(ctx.marital_status);
    }
    if key == "type" && path.contains_key("lien") {
        let preferred = match ctx.marital_status {
            "MARIE" => "CONJOINT",
            "PACSE" => "PARTENAIRE_PACS",
            _ => "CONCUBIN",
        };
        if allowed.iter().any(|v| v == preferred) {
            return json!(preferred);
        }
    }
    json!(allowed.choose(rng).cloned().unwrap_or_default())
}

fn bool_value(key: &str, rng: &mut StdRng) -> Value {
    if key == "existe" {
        return json!(rng.gen_bool(0.78));
    }
    json!(rng.gen_bool(0.55))
}

fn numeric_value(path: &FieldPath, key: &str, rng: &mut StdRng) -> Value {
    let path_norm = path.to_string().to_lowercase();
    if key.contains("age") {
        if path.contains_key("defunt") {
            return json!(rng.gen_range(55..=94));
        }
        return json!(rng.gen_range(18..=92));
    }
    if key.contains("esperance_de_vie") {
        return json!(rng.gen_range(5..=40));
    }
    if key.contains("quote") || key.contains("quotite") || key.contains("part") {
        return json!(round2(rng.gen_range(0.1..=1.0)));
    }
    if key.contains("taux") || key.contains("decote") {
        return json!(round2(rng.gen_range(0.01..=0.15)));
    }
    if key.contains("duree") || key.contains("anciennete") {
        return json!(rng.gen_range(1..=25));
    }
    // Duration blocks are often `{valeur, unite}`; the bare leaf key is `valeur`.
    if key == "valeur"
        && (path_norm.contains("duree") || path_norm.contains("anciennete") || path_norm.contains("soins"))
    {
        return json!(rng.gen_range(1..=36));
    }
    if key.contains("mois") {
        return json!(rng.gen_range(1..=48));
    }
    if key.contains("patrimoine") {
        return json!(rng.gen_range(50_000..=5_000_000));
    }
    if key.contains("montant_mensuel") && path_norm.contains("indemnite_occupation") {
        return json!(rng.gen_range(200..=5_000));
    }
    if key.contains("revenus_mensuels") || key.contains("charges_mensuelles") {
        return json!(rng.gen_range(500..=15_000));
    }
    if key.contains("loyers_encaisses") || key.contains("charges_reglees") {
        return json!(rng.gen_range(0..=250_000));
    }
    if key.contains("valeur")
        || key.contains("montant")
        || key.contains("capital")
        || key.contains("prix")
        || key.contains("cout")
        || key.contains("revenus")
        || key.contains("charges")
        || path_norm.contains("valeurs")
    {
        return json!(rng.gen_range(1_000..=900_000));
    }
    json!(rng.gen_range(1..=1000))
}

fn text_value(path: &FieldPath, key: &str, rng: &mut StdRng, ctx: &mut GenerationContext) -> Value {
    if key == "nom" || key.ends_with("_nom") || key.ends_with("_noms") {
        return json!(ctx.name_for_path(path, rng));
    }
    if key.contains("date") || ((key == "debut" || key == "fin") && path.contains_key("periode")) {
        return json!(random_iso_date(rng, 2005, 2026));
    }
    if key.contains("residence_fiscale") {
        return json!("France");
    }
    if key.contains("residence_habituelle") {
        return json!(*["France", "Belgique", "Espagne", "Suisse"]
            .choose(rng)
            .expect("non-empty"));
    }
    if key.contains("nationalite") {
        return json!(*["Française", "Belge", "Espagnole", "Suisse"]
            .choose(rng)
            .expect("non-empty"));
    }
    if key.contains("loi_designee") || key.contains("loi_applicable") {
        return json!("Loi française");
    }
    if key.contains("libelle") || key.contains("description") {
        if path.contains_key("passifs") {
            return json!(*["Emprunt bancaire", "Impôt", "Facture prestataire"]
                .choose(rng)
                .expect("non-empty"));
        }
        if path.contains_key("contrats") || key.contains("contrat") {
            return json!(contract_label(rng));
        }
        return json!(asset_label(rng));
    }
    if key.contains("localisation") {
        return json!(*CITIES.choose(rng).expect("non-empty"));
    }
    if key.contains("creancier") {
        return json!(*CREDITORS.choose(rng).expect("non-empty"));
    }
    // Last resort: concrete but unspecific.
    json!(*CITIES.choose(rng).expect("non-empty"))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::NamePool;
    use rand::SeedableRng;

    fn ctx() -> GenerationContext {
        GenerationContext::sample()
    }

    #[test]
    fn test_random_iso_date_is_parseable() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let date = random_iso_date(&mut rng, 2005, 2026);
            assert!(crate::schema::parse_iso_date(&date).is_some(), "{date}");
        }
    }

    #[test]
    fn test_age_heuristic_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut ctx = ctx();
        let spec = LeafSpec {
            kind: ScalarKind::Number,
            allowed_values: vec![],
        };
        for _ in 0..50 {
            let path = FieldPath::from_dotted("famille.defunt.age_au_deces");
            let value = leaf_value(&path, &spec, &mut rng, &mut ctx);
            let age = value.as_i64().unwrap();
            assert!((0..=110).contains(&age));
        }
    }

    #[test]
    fn test_ratio_heuristic_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut ctx = ctx();
        let spec = LeafSpec {
            kind: ScalarKind::Number,
            allowed_values: vec![],
        };
        for _ in 0..50 {
            let path = FieldPath::from_dotted("patrimoine.actifs.*.propriete.quote_part");
            let value = leaf_value(&path, &spec, &mut rng, &mut ctx);
            let ratio = value.as_f64().unwrap();
            assert!((0.0..=1.0).contains(&ratio));
        }
    }

    #[test]
    fn test_name_leaves_reuse_context_names() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut ctx = GenerationContext::new(
            &NamePool::builtin(),
            &mut StdRng::seed_from_u64(1),
            "MARIE",
        );
        let spec = LeafSpec {
            kind: ScalarKind::Text,
            allowed_values: vec![],
        };
        let decedent = ctx.decedent.clone();
        let value = leaf_value(
            &FieldPath::from_dotted("famille.defunt.nom"),
            &spec,
            &mut rng,
            &mut ctx,
        );
        assert_eq!(value, json!(decedent));
    }

    #[test]
    fn test_string_fallback_is_concrete() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut ctx = ctx();
        let spec = LeafSpec {
            kind: ScalarKind::Text,
            allowed_values: vec![],
        };
        let value = leaf_value(
            &FieldPath::from_dotted("patrimoine.actifs.*.libelle"),
            &spec,
            &mut rng,
            &mut ctx,
        );
        let text = value.as_str().unwrap();
        assert!(!text.is_empty());
        assert!(!text.to_lowercase().contains("placeholder"));
    }
}
