//! Instruction prompt assembly
//!
//! Builds the French generation brief from the drawn axes: style
//! constraints, topic-mandatory elements, forbidden moves, two reference
//! excerpts from the seed corpus, and finally the locked TOON block with
//! its rewriting rules.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::axes::{AxisSelection, Complexity, Topic};
use crate::generator::topics::blueprint;
use crate::seeds::SeedCase;
use crate::validator::fold_key;

const COMMON_MUST_AVOID: &[&str] = &[
    "Ne pas donner la solution ni conclure sur les droits exacts.",
    "Ne pas fournir d'analyse juridique, de calcul ou de raisonnement explicatif.",
    "Ne pas répondre en liste de points juridiques ou en checklist.",
    "Ne pas recopier mot pour mot les exemples de référence.",
    "Ne pas remplacer la paire demandée par un texte libre, une checklist ou un pseudo-format.",
];

const HARD_NEGATIVE_MUST_AVOID: &str =
    "Ne pas signaler explicitement qu'il s'agit d'un hard negative ou d'un piège.";

const EXCERPT_CHARS: usize = 220;

/// Deduplicated mandatory elements for the drawn axes
pub fn must_include(selection: &AxisSelection) -> Vec<String> {
    let mut elements: Vec<String> = Vec::new();
    let mut push = |item: &str| {
        if !elements.iter().any(|existing| existing == item) {
            elements.push(item.to_string());
        }
    };

    for element in blueprint(selection.primary_topic).elements {
        push(element);
    }
    if let Some(secondary) = selection.secondary_topic {
        for element in blueprint(secondary).elements {
            push(element);
        }
    }
    push(selection.format.requirement());
    push(selection.length_band.requirement());
    push(selection.noise.requirement());
    push(selection.numeric_density.requirement());
    push(selection.date_precision.requirement());
    if let Some(mode) = selection.hard_negative_mode {
        push(mode.requirement());
    }
    if let Some(intensity) = selection.hard_negative_intensity {
        push(intensity.requirement());
    }
    elements
}

/// Forbidden moves; hard negatives must stay undeclared
pub fn must_avoid(selection: &AxisSelection) -> Vec<String> {
    let mut items: Vec<String> = COMMON_MUST_AVOID.iter().map(|s| s.to_string()).collect();
    if selection.complexity == Complexity::HardNegative {
        items.push(HARD_NEGATIVE_MUST_AVOID.to_string());
    }
    items
}

/// Two seed excerpts matching the drawn topics, for style anchoring
pub fn pick_reference_examples<'a>(
    seeds: &'a [SeedCase],
    primary: Topic,
    secondary: Option<Topic>,
    rng: &mut StdRng,
) -> Vec<&'a SeedCase> {
    if seeds.is_empty() {
        return Vec::new();
    }
    let mut keywords: Vec<String> = blueprint(primary)
        .keywords
        .iter()
        .map(|word| fold_key(word))
        .collect();
    if let Some(secondary) = secondary {
        keywords.extend(blueprint(secondary).keywords.iter().map(|word| fold_key(word)));
    }

    let mut candidates: Vec<&SeedCase> = seeds
        .iter()
        .filter(|seed| {
            let folded = fold_key(&seed.text);
            keywords.iter().any(|keyword| folded.contains(keyword))
        })
        .collect();
    if candidates.len() < 2 {
        candidates = seeds.iter().collect();
    }
    candidates.shuffle(rng);
    candidates.truncate(2);
    candidates
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}…")
}

/// The base generation brief, without the TOON block
pub fn render_prompt(
    selection: &AxisSelection,
    examples: &[&SeedCase],
    must_include: &[String],
    must_avoid: &[String],
) -> String {
    let mut lines = vec![
        "Génère uniquement un énoncé (case_text) pour un cas de succession en français.".to_string(),
        format!("Persona : {}.", selection.persona.label()),
        format!("Tournure : {}.", selection.voice.label()),
        format!("Format : {}.", selection.format.label()),
        format!("Longueur visée : {}.", selection.length_band.label()),
        format!("Niveau de bruit : {}.", selection.noise.label()),
        format!("Densité chiffrée : {}.", selection.numeric_density.label()),
        format!("Précision temporelle : {}.", selection.date_precision.label()),
        format!("Niveau : {}.", selection.complexity.label()),
        format!("Sujet principal : {}.", selection.primary_topic.label()),
    ];
    if let Some(secondary) = selection.secondary_topic {
        lines.push(format!("Sujet secondaire : {}.", secondary.label()));
    }
    if let Some(mode) = selection.hard_negative_mode {
        lines.push(format!("Mode hard negative : {}.", mode.label()));
    }
    if let Some(intensity) = selection.hard_negative_intensity {
        lines.push(format!("Intensité hard negative : {}.", intensity.label()));
    }
    lines.push("Contraintes :".to_string());
    for item in must_include {
        lines.push(format!("- {item}"));
    }
    lines.push("À éviter :".to_string());
    for item in must_avoid {
        lines.push(format!("- {item}"));
    }
    lines.push(
        "Sortie attendue : texte brut uniquement (l'énoncé), sans JSON, sans TOON, sans analyse."
            .to_string(),
    );
    if !examples.is_empty() {
        lines.push("Repères de style (à ne pas recopier mot pour mot) :".to_string());
        for example in examples {
            lines.push(format!("- [{}] {}", example.case_id, excerpt(&example.text)));
        }
    }
    lines.join("\n")
}

/// Append the locked target and its rewriting rules to the brief
pub fn augment_with_target(base_prompt: &str, target_toon: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let base = base_prompt.trim();
    if !base.is_empty() {
        lines.push(base.to_string());
        lines.push(String::new());
    }
    for rule in [
        "Source de vérité des faits: le TOON ci-dessous.",
        "Règle A: chaque information présente dans le TOON doit apparaître dans l'énoncé, mais reformulée en français naturel.",
        "  - Ne jamais recopier des codes d'énumération du TOON (ex: PARTENAIRE_PACS, NEVEU_NIECE, PROPRE_DEFUNT, IMPOT_SUCCESSION).",
        "  - Si une valeur ressemble à `MAJUSCULES_AVEC_UNDERSCORE`, tu dois la traduire en mots (sans underscores).",
        "  - Exemples: PARTENAIRE_PACS -> partenaire de PACS ; NEVEU_NIECE -> neveu / nièce ;",
        "    COMMUNAUTE_REDUITE_AUX_ACQUETS -> communauté réduite aux acquêts ; A_TITRE_UNIVERSEL -> à titre universel.",
        "Règle B: ne pas ajouter de nouvelles informations structurées (noms, dates, montants, liens, biens) absentes du TOON.",
        "Règle C: ne pas donner la solution juridique, seulement les faits.",
        "Règle D: ne pas recopier la structure ou les clés du TOON (pas de `snake_case`, pas de `champ: valeur`, pas de JSON/TOON dans la réponse).",
        "Règle E: tu peux utiliser des sigles usuels (PACS, SCI, SARL, AV), mais pas des tokens en MAJUSCULES_AVEC_UNDERSCORE.",
        "Sortie attendue: texte brut uniquement (l'énoncé), sans JSON.",
        "",
        "TOON:",
    ] {
        lines.push(rule.to_string());
    }
    lines.push(target_toon.trim().to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::*;
    use rand::SeedableRng;

    fn selection() -> AxisSelection {
        AxisSelection {
            persona: Persona::Enfant,
            voice: Voice::PremierePersonne,
            format: TextFormat::QuestionDirecte,
            length_band: LengthBand::Moyen,
            noise: NoiseLevel::Propre,
            numeric_density: NumericDensity::UnMontant,
            date_precision: DatePrecision::Exacte,
            complexity: Complexity::HardNegative,
            primary_topic: Topic::AssuranceVie,
            secondary_topic: Some(Topic::DettesPassif),
            hard_negative_mode: Some(HardNegativeMode::FaitsContradictoires),
            hard_negative_intensity: Some(HardNegativeIntensity::Soft),
        }
    }

    #[test]
    fn test_must_include_covers_axes_and_topics() {
        let elements = must_include(&selection());
        assert!(elements.iter().any(|e| e.contains("assurance-vie")));
        assert!(elements.iter().any(|e| e.contains("passif")));
        assert!(elements.iter().any(|e| e.contains("contradiction")));
        let distinct: std::collections::HashSet<&String> = elements.iter().collect();
        assert_eq!(distinct.len(), elements.len());
    }

    #[test]
    fn test_hard_negative_stays_undeclared() {
        let avoid = must_avoid(&selection());
        assert!(avoid.iter().any(|item| item.contains("hard negative")));
    }

    #[test]
    fn test_prompt_mentions_every_axis() {
        let sel = selection();
        let prompt = render_prompt(&sel, &[], &must_include(&sel), &must_avoid(&sel));
        for needle in [
            "Persona :",
            "Tournure :",
            "Sujet principal :",
            "Sujet secondaire :",
            "Mode hard negative :",
            "Contraintes :",
            "À éviter :",
        ] {
            assert!(prompt.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn test_augmented_prompt_ends_with_target() {
        let augmented = augment_with_target("Brief.", "famille:\n  nom = \"Jean Durand\"");
        assert!(augmented.starts_with("Brief."));
        assert!(augmented.contains("Source de vérité"));
        assert!(augmented.ends_with("nom = \"Jean Durand\""));
    }

    #[test]
    fn test_reference_examples_prefer_topic_matches() {
        let seeds = vec![
            SeedCase {
                case_id: "s1".to_string(),
                source_type: "manual".to_string(),
                source_name: String::new(),
                text: "Un contrat d'assurance vie au bénéfice du voisin.".to_string(),
                target_toon: None,
            },
            SeedCase {
                case_id: "s2".to_string(),
                source_type: "manual".to_string(),
                source_name: String::new(),
                text: "Un testament olographe contesté par la fratrie.".to_string(),
                target_toon: None,
            },
            SeedCase {
                case_id: "s3".to_string(),
                source_type: "manual".to_string(),
                source_name: String::new(),
                text: "Une assurance vie avec des primes exagérées.".to_string(),
                target_toon: None,
            },
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_reference_examples(&seeds, Topic::AssuranceVie, None, &mut rng);
        assert_eq!(picked.len(), 2);
        for seed in picked {
            assert!(fold_key(&seed.text).contains("assurance vie"));
        }
    }
}
