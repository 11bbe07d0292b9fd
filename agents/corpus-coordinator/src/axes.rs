//! Diversity axes
//!
//! Every instruction is positioned on a fixed set of closed axes. Each axis
//! is a Rust enum whose serde representation is the exact bucket key used in
//! persisted records, counters, and share overrides. Default target shares
//! per axis sum to 1.0; a zero share makes a bucket unreachable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};

macro_rules! axis {
    (
        $(#[$meta:meta])*
        $name:ident, $axis_key:literal {
            $($variant:ident => ($key:literal, $share:literal, $label:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Counter/override key of the axis itself
            pub const AXIS: &'static str = $axis_key;

            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stable bucket key used in records and counters
            pub fn key(self) -> &'static str {
                match self {
                    $(Self::$variant => $key),+
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                match key {
                    $($key => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Default target share of the bucket within its axis
            pub fn default_share(self) -> f64 {
                match self {
                    $(Self::$variant => $share),+
                }
            }

            /// French label injected into generation prompts
            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }
    };
}

axis! {
    /// Who narrates the case
    Persona, "persona" {
        Enfant => ("enfant", 0.18, "un enfant du défunt"),
        Conjoint => ("conjoint", 0.12, "le conjoint survivant"),
        BeauEnfant => ("beau_enfant", 0.09, "un beau-fils ou une belle-fille"),
        Fratrie => ("fratrie", 0.08, "un frère ou une sœur"),
        Notaire => ("notaire", 0.08, "un notaire ou un clerc"),
        Avocat => ("avocat", 0.07, "un avocat en contentieux"),
        PartenairePacs => ("partenaire_pacs", 0.07, "le partenaire de PACS"),
        Concubin => ("concubin", 0.06, "le concubin ou la concubine"),
        Associe => ("associe", 0.07, "un associé ou coindivisaire"),
        PetitEnfant => ("petit_enfant", 0.05, "un petit-enfant"),
        Tiers => ("tiers", 0.05, "un voisin, aidant ou proche extérieur"),
        NarrateurNeutre => ("narrateur_neutre", 0.08, "un narrateur externe neutre"),
    }
}

axis! {
    /// Narrative stance of the text
    Voice, "voice" {
        PremierePersonne => ("premiere_personne", 0.45, "à la première personne"),
        TroisiemePersonne => ("troisieme_personne", 0.35, "à la troisième personne"),
        NoteDossier => ("note_dossier", 0.10, "en note de dossier"),
        ParoleRapportee => ("parole_rapportee", 0.10, "en parole rapportée"),
    }
}

axis! {
    /// Material form of the text
    TextFormat, "format" {
        QuestionDirecte => ("question_directe", 0.22, "question directe courte"),
        MailBrouillon => ("mail_brouillon", 0.18, "mail brouillon ou message client"),
        RecitLibre => ("recit_libre", 0.22, "récit libre"),
        NoteProfessionnelle => ("note_professionnelle", 0.14, "synthèse professionnelle"),
        OralRetranscrit => ("oral_retranscrit", 0.14, "oral retranscrit avec ponctuation irrégulière"),
        MessageConflictuel => ("message_conflictuel", 0.10, "message conflictuel ou familial tendu"),
    }
}

axis! {
    LengthBand, "length_band" {
        Court => ("court", 0.18, "court (1 à 3 phrases)"),
        Moyen => ("moyen", 0.42, "moyen (un paragraphe net)"),
        Long => ("long", 0.32, "long (paragraphe dense ou deux blocs)"),
        TresLong => ("tres_long", 0.08, "très long (cas détaillé quasi dossier)"),
    }
}

axis! {
    NoiseLevel, "noise" {
        Propre => ("propre", 0.42, "français propre, quasiment sans bruit"),
        LegeresFautes => ("legeres_fautes", 0.22, "1 ou 2 fautes crédibles"),
        FautesEtAbreviations => ("fautes_et_abreviations", 0.17, "fautes légères + abréviations réalistes"),
        Ambigu => ("ambigu", 0.16, "formulation floue avec zones d'ombre"),
        TresBrouillon => ("tres_brouillon", 0.03, "message très brouillon mais compréhensible"),
    }
}

axis! {
    NumericDensity, "numeric_density" {
        SansMontant => ("sans_montant", 0.06, "aucun montant obligatoire"),
        UnMontant => ("un_montant", 0.26, "au moins un montant ou une valeur approximative"),
        PlusieursMontants => ("plusieurs_montants", 0.38, "plusieurs montants ou valorisations"),
        MontantsEtDates => ("montants_et_dates", 0.30, "montants + au moins une date utile"),
    }
}

axis! {
    DatePrecision, "date_precision" {
        Aucune => ("aucune", 0.15, "aucune date imposée"),
        Approx => ("approx", 0.20, "repères temporels approximatifs"),
        Exacte => ("exacte", 0.65, "au moins une date exacte"),
    }
}

axis! {
    Complexity, "complexity" {
        Simple => ("simple", 0.20, "cas simple"),
        Intermediaire => ("intermediaire", 0.40, "cas intermédiaire"),
        Complexe => ("complexe", 0.24, "cas complexe"),
        HardNegative => ("hard_negative", 0.16, "hard negative volontaire"),
    }
}

axis! {
    /// Legal core of the case; the secondary layer draws from the same set
    Topic, "primary_topic" {
        OrdreHeritiers => ("ordre_heritiers", 0.08, "ordre des héritiers / dévolution"),
        FamilleRecomposee => ("famille_recomposee", 0.12, "famille recomposée / enfants non communs"),
        RegimesMatrimoniaux => ("regimes_matrimoniaux", 0.08, "régime matrimonial / liquidation préalable"),
        DonationsReduction => ("donations_reduction", 0.10, "donation / rapport / réduction"),
        AssuranceVie => ("assurance_vie", 0.10, "assurance-vie / bénéficiaires / primes"),
        IndivisionPartage => ("indivision_partage", 0.09, "indivision / partage bloqué / licitation"),
        EntrepriseDutreil => ("entreprise_dutreil", 0.08, "entreprise / titres / Dutreil"),
        DemembrementUsufruit => ("demembrement_usufruit", 0.06, "démembrement / usufruit / nue-propriété"),
        TestamentLegs => ("testament_legs", 0.08, "testament / legs / clause contestée"),
        DettesPassif => ("dettes_passif", 0.06, "dettes / passif / déficit"),
        PacsConcubinage => ("pacs_concubinage", 0.07, "PACS / concubinage"),
        InternationalProcedure => ("international_procedure", 0.08, "international / procédure / blocage"),
    }
}

axis! {
    /// Nature of the trap when complexity is hard_negative
    HardNegativeMode, "hard_negative_mode" {
        PasDeDecesClair => ("pas_de_deces_clair", 0.30, "faux ami sans décès clairement exploitable"),
        InfosIncompletes => ("infos_incompletes", 0.30, "dossier incomplet avec infos majeures manquantes"),
        FaitsContradictoires => ("faits_contradictoires", 0.25, "faits contradictoires ou incohérents"),
        HorsPerimetreMalQualifie => ("hors_perimetre_mal_qualifie", 0.15, "hors périmètre ou mal qualifié mais proche de la succession"),
    }
}

axis! {
    HardNegativeIntensity, "hard_negative_intensity" {
        Soft => ("soft", 0.80, "hard negative léger, très proche d'un vrai cas"),
        Hard => ("hard", 0.20, "hard negative dur, plus piégeux et plus bruité"),
    }
}

impl TextFormat {
    /// Mandatory prompt element tied to the selected format
    pub fn requirement(self) -> &'static str {
        match self {
            TextFormat::QuestionDirecte => "terminer comme une vraie question ou une demande de conseil",
            TextFormat::MailBrouillon => "faire sentir un message envoyé vite, sans mise en forme parfaite",
            TextFormat::RecitLibre => "laisser le narrateur dérouler les faits sans structure trop scolaire",
            TextFormat::NoteProfessionnelle => "style sec, quasi-notarial ou cabinet",
            TextFormat::OralRetranscrit => "ponctuation un peu irrégulière, rythme oral",
            TextFormat::MessageConflictuel => "faire sentir un conflit ou une tension explicite",
        }
    }
}

impl LengthBand {
    pub fn requirement(self) -> &'static str {
        match self {
            LengthBand::Court => "viser un cas bref et dense, sans devenir télégraphique",
            LengthBand::Moyen => "viser un niveau de détail intermédiaire, lisible d'un seul bloc",
            LengthBand::Long => "ajouter assez de matière factuelle pour un cas nettement développé",
            LengthBand::TresLong => "viser un cas riche, détaillé et multi-couches, sans donner la solution",
        }
    }
}

impl NoiseLevel {
    pub fn requirement(self) -> &'static str {
        match self {
            NoiseLevel::Propre => "pas d'erreur volontaire obligatoire",
            NoiseLevel::LegeresFautes => "ajouter 1 ou 2 fautes réalistes maximum",
            NoiseLevel::FautesEtAbreviations => "ajouter quelques abréviations réalistes (AV, RP, M., Mme, etc.)",
            NoiseLevel::Ambigu => "laisser au moins un détail flou, approximatif ou contesté",
            NoiseLevel::TresBrouillon => "laisser des morceaux incomplets, hésitants ou mal ponctués",
        }
    }
}

impl NumericDensity {
    pub fn requirement(self) -> &'static str {
        match self {
            NumericDensity::SansMontant => "aucun chiffre n'est obligatoire",
            NumericDensity::UnMontant => "inclure au moins un montant ou une valeur",
            NumericDensity::PlusieursMontants => "inclure plusieurs montants, valeurs ou proportions",
            NumericDensity::MontantsEtDates => "inclure au moins un montant et une date utile, de préférence exacte",
        }
    }
}

impl DatePrecision {
    pub fn requirement(self) -> &'static str {
        match self {
            DatePrecision::Aucune => "aucune date n'est obligatoire si elle n'apporte rien",
            DatePrecision::Approx => "utiliser un repère temporel flou ou approximatif si une date apparaît",
            DatePrecision::Exacte => "inclure au moins une date exacte (jour/mois/année ou format ISO)",
        }
    }
}

impl HardNegativeMode {
    pub fn requirement(self) -> &'static str {
        match self {
            HardNegativeMode::PasDeDecesClair => {
                "le texte doit ressembler à une succession mais sans décès exploitable clairement posé"
            }
            HardNegativeMode::InfosIncompletes => {
                "laisser manquer une donnée-clé (date, lien, testament, régime, composition des héritiers)"
            }
            HardNegativeMode::FaitsContradictoires => {
                "introduire une contradiction factuelle réaliste sans la résoudre"
            }
            HardNegativeMode::HorsPerimetreMalQualifie => {
                "faire croire à une succession alors qu'une partie du problème relève d'autre chose"
            }
        }
    }
}

impl HardNegativeIntensity {
    pub fn requirement(self) -> &'static str {
        match self {
            HardNegativeIntensity::Soft => {
                "ne mettre qu'un défaut principal, le cas doit rester très crédible au premier regard"
            }
            HardNegativeIntensity::Hard => {
                "cumuler au moins deux sources de confusion sans rendre le texte absurde"
            }
        }
    }
}

/// Ordered names of every axis, as used in counters and coverage snapshots
pub const AXIS_NAMES: &[&str] = &[
    Persona::AXIS,
    Voice::AXIS,
    TextFormat::AXIS,
    LengthBand::AXIS,
    NoiseLevel::AXIS,
    NumericDensity::AXIS,
    DatePrecision::AXIS,
    Complexity::AXIS,
    Topic::AXIS,
    HardNegativeMode::AXIS,
    HardNegativeIntensity::AXIS,
];

/// The signature tuple: one bucket per axis for a single instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSelection {
    pub persona: Persona,
    pub voice: Voice,
    pub format: TextFormat,
    pub length_band: LengthBand,
    pub noise: NoiseLevel,
    pub numeric_density: NumericDensity,
    pub date_precision: DatePrecision,
    pub complexity: Complexity,
    pub primary_topic: Topic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_topic: Option<Topic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_negative_mode: Option<HardNegativeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_negative_intensity: Option<HardNegativeIntensity>,
}

impl AxisSelection {
    /// Short-range de-duplication key over every selected bucket
    pub fn signature(&self) -> String {
        let mut parts: Vec<&str> = vec![
            self.persona.key(),
            self.voice.key(),
            self.format.key(),
            self.length_band.key(),
            self.noise.key(),
            self.numeric_density.key(),
            self.date_precision.key(),
            self.complexity.key(),
        ];
        if let Some(intensity) = self.hard_negative_intensity {
            parts.push(intensity.key());
        }
        parts.push(self.primary_topic.key());
        if let Some(secondary) = self.secondary_topic {
            parts.push(secondary.key());
        }
        parts.join("|")
    }

    /// Bucket key selected on the named axis, when one is set
    pub fn bucket(&self, axis: &str) -> Option<&'static str> {
        match axis {
            "persona" => Some(self.persona.key()),
            "voice" => Some(self.voice.key()),
            "format" => Some(self.format.key()),
            "length_band" => Some(self.length_band.key()),
            "noise" => Some(self.noise.key()),
            "numeric_density" => Some(self.numeric_density.key()),
            "date_precision" => Some(self.date_precision.key()),
            "complexity" => Some(self.complexity.key()),
            "primary_topic" => Some(self.primary_topic.key()),
            "hard_negative_mode" => self.hard_negative_mode.map(HardNegativeMode::key),
            "hard_negative_intensity" => {
                self.hard_negative_intensity.map(HardNegativeIntensity::key)
            }
            _ => None,
        }
    }
}

/// Per-axis share tables with config overrides applied
#[derive(Debug, Clone)]
pub struct QuotaProfile {
    shares: BTreeMap<String, BTreeMap<String, f64>>,
}

fn default_axis_shares<T: Copy>(all: &[T], key: fn(T) -> &'static str, share: fn(T) -> f64) -> BTreeMap<String, f64> {
    all.iter()
        .map(|bucket| (key(*bucket).to_string(), share(*bucket)))
        .collect()
}

impl QuotaProfile {
    /// Build the default profile from the axis tables
    pub fn with_defaults() -> Self {
        let mut shares = BTreeMap::new();
        shares.insert(
            Persona::AXIS.to_string(),
            default_axis_shares(Persona::ALL, Persona::key, Persona::default_share),
        );
        shares.insert(
            Voice::AXIS.to_string(),
            default_axis_shares(Voice::ALL, Voice::key, Voice::default_share),
        );
        shares.insert(
            TextFormat::AXIS.to_string(),
            default_axis_shares(TextFormat::ALL, TextFormat::key, TextFormat::default_share),
        );
        shares.insert(
            LengthBand::AXIS.to_string(),
            default_axis_shares(LengthBand::ALL, LengthBand::key, LengthBand::default_share),
        );
        shares.insert(
            NoiseLevel::AXIS.to_string(),
            default_axis_shares(NoiseLevel::ALL, NoiseLevel::key, NoiseLevel::default_share),
        );
        shares.insert(
            NumericDensity::AXIS.to_string(),
            default_axis_shares(
                NumericDensity::ALL,
                NumericDensity::key,
                NumericDensity::default_share,
            ),
        );
        shares.insert(
            DatePrecision::AXIS.to_string(),
            default_axis_shares(
                DatePrecision::ALL,
                DatePrecision::key,
                DatePrecision::default_share,
            ),
        );
        shares.insert(
            Complexity::AXIS.to_string(),
            default_axis_shares(Complexity::ALL, Complexity::key, Complexity::default_share),
        );
        shares.insert(
            Topic::AXIS.to_string(),
            default_axis_shares(Topic::ALL, Topic::key, Topic::default_share),
        );
        shares.insert(
            HardNegativeMode::AXIS.to_string(),
            default_axis_shares(
                HardNegativeMode::ALL,
                HardNegativeMode::key,
                HardNegativeMode::default_share,
            ),
        );
        shares.insert(
            HardNegativeIntensity::AXIS.to_string(),
            default_axis_shares(
                HardNegativeIntensity::ALL,
                HardNegativeIntensity::key,
                HardNegativeIntensity::default_share,
            ),
        );
        Self { shares }
    }

    /// Apply per-axis share overrides; unknown axes or buckets are config errors
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, BTreeMap<String, f64>>,
    ) -> Result<()> {
        for (axis, buckets) in overrides {
            let table = self.shares.get_mut(axis).ok_or_else(|| {
                CoordinatorError::config(format!("unknown axis in share overrides: {axis}"))
            })?;
            for (bucket, share) in buckets {
                if !table.contains_key(bucket) {
                    return Err(CoordinatorError::config(format!(
                        "unknown bucket in share overrides: {axis}/{bucket}"
                    )));
                }
                if !share.is_finite() || *share < 0.0 {
                    return Err(CoordinatorError::config(format!(
                        "invalid share for {axis}/{bucket}: {share}"
                    )));
                }
                table.insert(bucket.clone(), *share);
            }
        }
        Ok(())
    }

    /// Share table for one axis
    pub fn shares(&self, axis: &str) -> &BTreeMap<String, f64> {
        self.shares
            .get(axis)
            .unwrap_or_else(|| panic!("unknown axis: {axis}"))
    }

    pub fn axes(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, f64>)> {
        self.shares.iter()
    }
}
