//! Topic blueprints and persona anchors
//!
//! The mapping from legal topics to master-schema subtrees is data, not
//! code: each topic names the prefixes it may draw leaves from, the leaf
//! paths it must always populate, and the prompt elements it imposes.

use crate::axes::{Persona, Topic};
use crate::schema::FieldPath;

/// Everything the scheduler, generator, and prompt need to know about a topic
pub struct TopicBlueprint {
    /// Style keywords used to pick matching reference examples
    pub keywords: &'static [&'static str],
    /// Mandatory prompt elements
    pub elements: &'static [&'static str],
    /// Schema prefixes the topic draws leaves from (dotted, `*` for lists)
    pub prefixes: &'static [&'static str],
    /// Leaf paths that must be present for the topic to count as covered
    pub required_leaves: &'static [&'static str],
}

pub fn blueprint(topic: Topic) -> &'static TopicBlueprint {
    match topic {
        Topic::OrdreHeritiers => &TopicBlueprint {
            keywords: &["enfant", "célibataire", "frère", "marié", "représentation"],
            elements: &[
                "préciser les liens de parenté utiles",
                "indiquer s'il existe ou non un testament",
            ],
            prefixes: &[
                "famille.descendants",
                "famille.ascendants",
                "famille.collateraux",
            ],
            required_leaves: &["famille.descendants.enfants.*.nom"],
        },
        Topic::FamilleRecomposee => &TopicBlueprint {
            keywords: &["recompos", "premier lit", "enfant non commun", "beau", "adoption simple"],
            elements: &[
                "inclure au moins un enfant d'une autre union",
                "laisser un point de friction entre branches familiales",
            ],
            prefixes: &[
                "famille.descendants",
                "famille.partenaire",
                "famille.collateraux",
            ],
            required_leaves: &[
                "famille.descendants.enfants.*.nom",
                "famille.descendants.enfants.*.est_d_une_precedente_union",
            ],
        },
        Topic::RegimesMatrimoniaux => &TopicBlueprint {
            keywords: &["communauté", "séparation de biens", "participation", "récompense"],
            elements: &[
                "mentionner le régime matrimonial ou son absence de contrat",
                "faire apparaître un enjeu de propriété entre époux",
            ],
            prefixes: &[
                "famille.defunt.regime_matrimonial",
                "famille.partenaire",
                "patrimoine.actifs",
                "patrimoine.recompenses",
            ],
            required_leaves: &[
                "famille.defunt.regime_matrimonial.type",
                "patrimoine.actifs.*.type",
            ],
        },
        Topic::DonationsReduction => &TopicBlueprint {
            keywords: &["donation", "hors part", "réduction", "rapport", "donation-partage"],
            elements: &[
                "inclure une libéralité antérieure",
                "laisser planer un doute sur son traitement civil",
            ],
            prefixes: &[
                "liberalites.donations",
                "liberalites.testament",
                "liberalites.legs",
            ],
            required_leaves: &[
                "liberalites.donations.*.donateur_nom",
                "liberalites.donations.*.beneficiaire_nom",
                "liberalites.donations.*.type",
            ],
        },
        Topic::AssuranceVie => &TopicBlueprint {
            keywords: &["assurance vie", "AV", "bénéficiaire", "primes exag"],
            elements: &[
                "mentionner un contrat d'assurance-vie ou un bénéficiaire",
                "glisser un doute sur la place du contrat dans le calcul global",
            ],
            prefixes: &["assurance_vie.contrats"],
            required_leaves: &[
                "assurance_vie.contrats.*.libelle",
                "assurance_vie.contrats.*.assure_nom",
            ],
        },
        Topic::IndivisionPartage => &TopicBlueprint {
            keywords: &["indivision", "vendre", "licitation", "occupation"],
            elements: &[
                "faire apparaître au moins deux héritiers en désaccord",
                "inclure un bien difficile à partager",
            ],
            prefixes: &[
                "indivision.gestion",
                "indivision.comptes",
                "operations_de_partage.licitation",
            ],
            required_leaves: &["operations_de_partage.licitation.est_prevue"],
        },
        Topic::EntrepriseDutreil => &TopicBlueprint {
            keywords: &["société", "parts", "Dutreil", "SARL", "SCI", "fonds"],
            elements: &[
                "inclure des titres, une société ou un outil professionnel",
                "laisser un enjeu de valorisation ou de reprise",
            ],
            prefixes: &["patrimoine.actifs", "liberalites.donations"],
            required_leaves: &[
                "patrimoine.actifs.*.type",
                "patrimoine.actifs.*.entreprise.type",
                "patrimoine.actifs.*.entreprise.est_presente_comme_eligible_dutreil",
            ],
        },
        Topic::DemembrementUsufruit => &TopicBlueprint {
            keywords: &["usufruit", "nue-propriété", "quasi-usufruit", "démembrement"],
            elements: &[
                "inclure un usufruit existant ou à choisir",
                "faire apparaître un effet différé ou une créance future",
            ],
            prefixes: &[
                "patrimoine.actifs",
                "operations_de_partage.conversion_usufruit",
            ],
            required_leaves: &["patrimoine.actifs.*.demembrement.droits_du_defunt"],
        },
        Topic::TestamentLegs => &TopicBlueprint {
            keywords: &["testament", "legs", "olographe", "légataire"],
            elements: &[
                "inclure une disposition testamentaire ou un legs",
                "laisser un doute sur la portée ou la validité de la clause",
            ],
            prefixes: &["liberalites.testament", "liberalites.legs"],
            required_leaves: &[
                "liberalites.testament.existe",
                "liberalites.legs.*.beneficiaire_nom",
                "liberalites.legs.*.type",
            ],
        },
        Topic::DettesPassif => &TopicBlueprint {
            keywords: &["dette", "impôts", "URSSAF", "passif", "déficit"],
            elements: &[
                "inclure un passif significatif",
                "faire sentir une tension sur le règlement des dettes",
            ],
            prefixes: &["patrimoine.passifs"],
            required_leaves: &["patrimoine.passifs.*.type", "patrimoine.passifs.*.valeur"],
        },
        Topic::PacsConcubinage => &TopicBlueprint {
            keywords: &["PACS", "concubin", "union libre", "partenaire"],
            elements: &[
                "inclure une relation non matrimoniale",
                "faire apparaître un doute sur la protection du survivant",
            ],
            prefixes: &["famille.partenaire", "famille.droits_du_partenaire"],
            required_leaves: &["famille.partenaire.nom", "famille.partenaire.lien.type"],
        },
        Topic::InternationalProcedure => &TopicBlueprint {
            keywords: &["étranger", "Belgique", "Espagne", "procédure", "mandat", "juge"],
            elements: &[
                "inclure un élément procédural ou international",
                "laisser au moins un point de compétence ou de formalité flou",
            ],
            prefixes: &[
                "contexte.international",
                "contexte.procedure",
                "famille.defunt",
                "famille.partenaire",
            ],
            required_leaves: &[
                "contexte.international.professio_juris.existe",
                "contexte.procedure.divorce_ou_separation_en_cours.existe",
            ],
        },
    }
}

/// Rarely visited prefixes sprinkled in for multi-layer situations
pub const SPARSE_COVERAGE_PREFIXES: &[&str] = &[
    "famille.adoption_simple_du_defunt",
    "liberalites.donation_entre_epoux",
    "patrimoine.ameliorations_bien_propre",
];

/// Extra context prefixes for the harder complexity bands
pub const COMPLEX_CONTEXT_PREFIXES: &[&str] = &["contexte.procedure", "operations_de_partage"];

/// Required leaf paths of a topic, parsed
pub fn required_leaf_paths(topic: Topic) -> Vec<FieldPath> {
    blueprint(topic)
        .required_leaves
        .iter()
        .map(|path| FieldPath::from_dotted(path))
        .collect()
}

/// Schema prefixes of a topic, parsed
pub fn topic_prefixes(topic: Topic) -> Vec<FieldPath> {
    blueprint(topic)
        .prefixes
        .iter()
        .map(|path| FieldPath::from_dotted(path))
        .collect()
}

/// Leaf paths a persona logically entails, independent of topic
pub fn persona_anchor_paths(persona: Persona) -> Vec<FieldPath> {
    let paths: &[&str] = match persona {
        Persona::Enfant => &["famille.descendants.enfants.*.nom"],
        Persona::BeauEnfant => &[
            "famille.descendants.enfants.*.nom",
            "famille.descendants.enfants.*.est_d_une_precedente_union",
        ],
        Persona::PetitEnfant => &[
            "famille.descendants.enfants.*.nom",
            "famille.descendants.petits_enfants.*.nom",
            "famille.descendants.petits_enfants.*.parent_nom",
        ],
        Persona::Fratrie => &["famille.collateraux.freres_soeurs.*.nom"],
        Persona::Concubin => &["famille.partenaire.nom", "famille.partenaire.lien.type"],
        Persona::Associe => &[
            "patrimoine.actifs.*.type",
            "patrimoine.actifs.*.entreprise.type",
        ],
        Persona::Notaire | Persona::Avocat => &["contexte.procedure.professionnel_saisi.existe"],
        Persona::Conjoint
        | Persona::PartenairePacs
        | Persona::Tiers
        | Persona::NarrateurNeutre => &[],
    };
    paths.iter().map(|path| FieldPath::from_dotted(path)).collect()
}

/// Personas whose narrative requires at least one child entry
pub fn persona_requires_child(persona: Persona) -> bool {
    matches!(
        persona,
        Persona::Enfant | Persona::BeauEnfant | Persona::PetitEnfant
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_topic_has_a_blueprint() {
        for topic in Topic::ALL {
            let bp = blueprint(*topic);
            assert!(!bp.prefixes.is_empty(), "{} has no prefixes", topic.key());
            assert!(!bp.elements.is_empty(), "{} has no elements", topic.key());
        }
    }

    #[test]
    fn test_required_paths_parse() {
        let paths = required_leaf_paths(Topic::AssuranceVie);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].to_string(), "assurance_vie.contrats.*.libelle");
    }

    #[test]
    fn test_persona_anchors() {
        assert!(persona_anchor_paths(Persona::PetitEnfant).len() >= 3);
        assert!(persona_anchor_paths(Persona::NarrateurNeutre).is_empty());
        assert!(persona_requires_child(Persona::BeauEnfant));
        assert!(!persona_requires_child(Persona::Notaire));
    }
}
