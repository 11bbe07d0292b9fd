//! Quota scheduler
//!
//! Picks one bucket per axis so that the issued distribution converges
//! toward the configured target shares. Buckets are scored by deficit
//! (`count / share`, lowest wins, random tie-break); compatibility rules
//! filter the candidate sets before selection, and a bounded FIFO of recent
//! signatures avoids near-repetition.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::axes::{
    AxisSelection, Complexity, DatePrecision, HardNegativeIntensity, HardNegativeMode, LengthBand,
    NoiseLevel, NumericDensity, Persona, QuotaProfile, TextFormat, Topic, Voice, AXIS_NAMES,
};
use crate::contracts::InstructionRecord;
use crate::error::{CoordinatorError, Result};

/// How often a secondary topic is layered onto the easier complexity bands
const SECONDARY_TOPIC_PROBA: f64 = 0.55;
/// Redraw attempts when a drawn signature collides with a recent one
const SIGNATURE_RETRY_BUDGET: usize = 4;

/// Issued counters per axis and bucket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisCounters {
    axes: BTreeMap<String, BTreeMap<String, u64>>,
}

impl AxisCounters {
    pub fn count(&self, axis: &str, bucket: &str) -> u64 {
        self.axes
            .get(axis)
            .and_then(|buckets| buckets.get(bucket))
            .copied()
            .unwrap_or(0)
    }

    pub fn axis(&self, axis: &str) -> BTreeMap<String, u64> {
        self.axes.get(axis).cloned().unwrap_or_default()
    }

    pub fn total(&self, axis: &str) -> u64 {
        self.axes
            .get(axis)
            .map(|buckets| buckets.values().sum())
            .unwrap_or(0)
    }

    pub fn record(&mut self, selection: &AxisSelection) {
        for axis in AXIS_NAMES {
            if let Some(bucket) = selection.bucket(axis) {
                *self
                    .axes
                    .entry((*axis).to_string())
                    .or_default()
                    .entry(bucket.to_string())
                    .or_default() += 1;
            }
        }
    }
}

/// Deficit-scored pick: lowest `count / share` wins, ties break uniformly
/// at random; zero-share and excluded buckets are unreachable.
fn pick_under_represented(
    shares: &BTreeMap<String, f64>,
    counts: &BTreeMap<String, u64>,
    rng: &mut StdRng,
    exclude: &[&str],
) -> Result<String> {
    let mut best: Option<(f64, u64, f64, &str)> = None;
    for (bucket, share) in shares {
        if *share <= 0.0 || exclude.contains(&bucket.as_str()) {
            continue;
        }
        let current = counts.get(bucket).copied().unwrap_or(0);
        let score = (current as f64 / share, current, rng.gen::<f64>());
        let candidate = (score.0, score.1, score.2, bucket.as_str());
        let better = match &best {
            None => true,
            Some(incumbent) => {
                (candidate.0, candidate.1, candidate.2)
                    < (incumbent.0, incumbent.1, incumbent.2)
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best.map(|(_, _, _, bucket)| bucket.to_string())
        .ok_or_else(|| CoordinatorError::Internal("no reachable bucket on axis".to_string()))
}

fn pick_bucket<T: Copy>(
    profile: &QuotaProfile,
    counters: &AxisCounters,
    axis: &'static str,
    from_key: fn(&str) -> Option<T>,
    rng: &mut StdRng,
    exclude: &[&str],
) -> Result<T> {
    let key = pick_under_represented(profile.shares(axis), &counters.axis(axis), rng, exclude)?;
    from_key(&key)
        .ok_or_else(|| CoordinatorError::Internal(format!("unknown bucket {key} on {axis}")))
}

/// Scheduler state: share profile, issued counters, recent-signature FIFO
pub struct QuotaScheduler {
    profile: QuotaProfile,
    counters: AxisCounters,
    recent: VecDeque<String>,
    signature_window: usize,
}

impl QuotaScheduler {
    pub fn new(profile: QuotaProfile, signature_window: usize) -> Self {
        QuotaScheduler {
            profile,
            counters: AxisCounters::default(),
            recent: VecDeque::new(),
            signature_window,
        }
    }

    /// Rebuild counters from the issued log; the FIFO stays ephemeral but is
    /// primed with the tail of the log
    pub fn restore(&mut self, issued: &[InstructionRecord]) {
        self.counters = AxisCounters::default();
        self.recent.clear();
        for record in issued {
            self.counters.record(&record.dimensions);
        }
        for record in issued.iter().rev().take(self.signature_window).rev() {
            self.recent.push_back(record.signature.clone());
        }
    }

    pub fn counters(&self) -> &AxisCounters {
        &self.counters
    }

    pub fn profile(&self) -> &QuotaProfile {
        &self.profile
    }

    /// Draw one bucket per axis under the compatibility rules
    pub fn draw(&self, rng: &mut StdRng, force_topic: Option<Topic>) -> Result<AxisSelection> {
        let mut selection = self.draw_once(rng, force_topic)?;

        // Near-repetition avoidance: redraw the freest axis a few times.
        let mut budget = SIGNATURE_RETRY_BUDGET;
        while budget > 0 && self.recent.contains(&selection.signature()) {
            self.redraw_freest_axis(&mut selection, rng, force_topic.is_some())?;
            budget -= 1;
        }
        Ok(selection)
    }

    fn draw_once(&self, rng: &mut StdRng, force_topic: Option<Topic>) -> Result<AxisSelection> {
        // A pinned spousal-liquidation topic needs a marital persona.
        let persona_exclude: &[&str] = if force_topic == Some(Topic::RegimesMatrimoniaux) {
            &["partenaire_pacs", "concubin"]
        } else {
            &[]
        };
        let persona = pick_bucket(
            &self.profile,
            &self.counters,
            Persona::AXIS,
            Persona::from_key,
            rng,
            persona_exclude,
        )?;
        let voice = pick_bucket(
            &self.profile,
            &self.counters,
            Voice::AXIS,
            Voice::from_key,
            rng,
            &[],
        )?;
        let format = pick_bucket(
            &self.profile,
            &self.counters,
            TextFormat::AXIS,
            TextFormat::from_key,
            rng,
            &[],
        )?;
        let length_band = pick_bucket(
            &self.profile,
            &self.counters,
            LengthBand::AXIS,
            LengthBand::from_key,
            rng,
            &[],
        )?;
        let noise = pick_bucket(
            &self.profile,
            &self.counters,
            NoiseLevel::AXIS,
            NoiseLevel::from_key,
            rng,
            &[],
        )?;
        let numeric_density = pick_bucket(
            &self.profile,
            &self.counters,
            NumericDensity::AXIS,
            NumericDensity::from_key,
            rng,
            &[],
        )?;

        // Amounts with dates require a usable temporal anchor.
        let date_exclude: &[&str] = if numeric_density == NumericDensity::MontantsEtDates {
            &["aucune"]
        } else {
            &[]
        };
        let date_precision = pick_bucket(
            &self.profile,
            &self.counters,
            DatePrecision::AXIS,
            DatePrecision::from_key,
            rng,
            date_exclude,
        )?;
        let complexity = pick_bucket(
            &self.profile,
            &self.counters,
            Complexity::AXIS,
            Complexity::from_key,
            rng,
            &[],
        )?;

        // Non-marital personas cannot carry a spousal-liquidation topic.
        let blocked_topics: &[&str] =
            if matches!(persona, Persona::PartenairePacs | Persona::Concubin) {
                &["regimes_matrimoniaux"]
            } else {
                &[]
            };
        let primary_topic = match force_topic {
            Some(topic) => topic,
            None => pick_bucket(
                &self.profile,
                &self.counters,
                Topic::AXIS,
                Topic::from_key,
                rng,
                blocked_topics,
            )?,
        };

        let wants_secondary = matches!(complexity, Complexity::Complexe | Complexity::HardNegative)
            || rng.gen_bool(SECONDARY_TOPIC_PROBA);
        let secondary_topic = if wants_secondary {
            let mut exclude = vec![primary_topic.key()];
            exclude.extend_from_slice(blocked_topics);
            Some(pick_bucket(
                &self.profile,
                &self.counters,
                Topic::AXIS,
                Topic::from_key,
                rng,
                &exclude,
            )?)
        } else {
            None
        };

        let (hard_negative_mode, hard_negative_intensity) = if complexity == Complexity::HardNegative
        {
            let intensity = pick_bucket(
                &self.profile,
                &self.counters,
                HardNegativeIntensity::AXIS,
                HardNegativeIntensity::from_key,
                rng,
                &[],
            )?;
            let mode = pick_bucket(
                &self.profile,
                &self.counters,
                HardNegativeMode::AXIS,
                HardNegativeMode::from_key,
                rng,
                &[],
            )?;
            (Some(mode), Some(intensity))
        } else {
            (None, None)
        };

        Ok(AxisSelection {
            persona,
            voice,
            format,
            length_band,
            noise,
            numeric_density,
            date_precision,
            complexity,
            primary_topic,
            secondary_topic,
            hard_negative_mode,
            hard_negative_intensity,
        })
    }

    /// Redraw the single axis with the most eligible buckets left once the
    /// current pick is excluded
    fn redraw_freest_axis(
        &self,
        selection: &mut AxisSelection,
        rng: &mut StdRng,
        topic_forced: bool,
    ) -> Result<()> {
        let mut candidates: Vec<(&'static str, usize)> = vec![
            (Persona::AXIS, self.eligible_buckets(Persona::AXIS)),
            (Voice::AXIS, self.eligible_buckets(Voice::AXIS)),
            (TextFormat::AXIS, self.eligible_buckets(TextFormat::AXIS)),
            (LengthBand::AXIS, self.eligible_buckets(LengthBand::AXIS)),
            (NoiseLevel::AXIS, self.eligible_buckets(NoiseLevel::AXIS)),
        ];
        if !topic_forced {
            candidates.push((Topic::AXIS, self.eligible_buckets(Topic::AXIS)));
        }
        let Some((axis, _)) = candidates
            .into_iter()
            .filter(|(_, eligible)| *eligible > 1)
            .max_by_key(|(_, eligible)| *eligible)
        else {
            return Ok(());
        };

        match axis {
            "persona" => {
                selection.persona = pick_bucket(
                    &self.profile,
                    &self.counters,
                    Persona::AXIS,
                    Persona::from_key,
                    rng,
                    &[selection.persona.key()],
                )?;
            }
            "voice" => {
                selection.voice = pick_bucket(
                    &self.profile,
                    &self.counters,
                    Voice::AXIS,
                    Voice::from_key,
                    rng,
                    &[selection.voice.key()],
                )?;
            }
            "format" => {
                selection.format = pick_bucket(
                    &self.profile,
                    &self.counters,
                    TextFormat::AXIS,
                    TextFormat::from_key,
                    rng,
                    &[selection.format.key()],
                )?;
            }
            "length_band" => {
                selection.length_band = pick_bucket(
                    &self.profile,
                    &self.counters,
                    LengthBand::AXIS,
                    LengthBand::from_key,
                    rng,
                    &[selection.length_band.key()],
                )?;
            }
            "noise" => {
                selection.noise = pick_bucket(
                    &self.profile,
                    &self.counters,
                    NoiseLevel::AXIS,
                    NoiseLevel::from_key,
                    rng,
                    &[selection.noise.key()],
                )?;
            }
            "primary_topic" => {
                let mut exclude = vec![selection.primary_topic.key()];
                if let Some(secondary) = selection.secondary_topic {
                    exclude.push(secondary.key());
                }
                selection.primary_topic = pick_bucket(
                    &self.profile,
                    &self.counters,
                    Topic::AXIS,
                    Topic::from_key,
                    rng,
                    &exclude,
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    fn eligible_buckets(&self, axis: &str) -> usize {
        self.profile
            .shares(axis)
            .values()
            .filter(|share| **share > 0.0)
            .count()
    }

    /// Commit a successfully issued selection: counters advance and the
    /// signature enters the FIFO
    pub fn commit(&mut self, selection: &AxisSelection) {
        self.counters.record(selection);
        self.recent.push_back(selection.signature());
        while self.recent.len() > self.signature_window {
            self.recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn scheduler() -> QuotaScheduler {
        QuotaScheduler::new(QuotaProfile::with_defaults(), 32)
    }

    #[test]
    fn test_pick_prefers_deficit() {
        let mut shares = BTreeMap::new();
        shares.insert("a".to_string(), 0.5);
        shares.insert("b".to_string(), 0.5);
        let mut counts = BTreeMap::new();
        counts.insert("a".to_string(), 10);
        counts.insert("b".to_string(), 2);
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_under_represented(&shares, &counts, &mut rng, &[]).unwrap();
        assert_eq!(picked, "b");
    }

    #[test]
    fn test_zero_share_is_unreachable() {
        let mut shares = BTreeMap::new();
        shares.insert("a".to_string(), 0.0);
        shares.insert("b".to_string(), 1.0);
        let counts = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..20 {
            let picked = pick_under_represented(&shares, &counts, &mut rng, &[]).unwrap();
            assert_eq!(picked, "b");
        }
    }

    #[test]
    fn test_exclusion_exhaustion_is_an_error() {
        let mut shares = BTreeMap::new();
        shares.insert("a".to_string(), 1.0);
        let counts = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(pick_under_represented(&shares, &counts, &mut rng, &["a"]).is_err());
    }

    #[test]
    fn test_montants_et_dates_forces_usable_dates() {
        let scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..200 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            if selection.numeric_density == NumericDensity::MontantsEtDates {
                assert_ne!(selection.date_precision, DatePrecision::Aucune);
            }
        }
    }

    #[test]
    fn test_non_marital_personas_avoid_regimes() {
        let scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..300 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            if matches!(
                selection.persona,
                Persona::PartenairePacs | Persona::Concubin
            ) {
                assert_ne!(selection.primary_topic, Topic::RegimesMatrimoniaux);
                assert_ne!(selection.secondary_topic, Some(Topic::RegimesMatrimoniaux));
            }
        }
    }

    #[test]
    fn test_hard_negative_axes_only_when_hard_negative() {
        let scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..200 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            let is_hard = selection.complexity == Complexity::HardNegative;
            assert_eq!(selection.hard_negative_mode.is_some(), is_hard);
            assert_eq!(selection.hard_negative_intensity.is_some(), is_hard);
        }
    }

    #[test]
    fn test_complex_bands_always_get_secondary_topic() {
        let scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            if matches!(
                selection.complexity,
                Complexity::Complexe | Complexity::HardNegative
            ) {
                assert!(selection.secondary_topic.is_some());
                assert_ne!(selection.secondary_topic, Some(selection.primary_topic));
            }
        }
    }

    #[test]
    fn test_forced_topic_wins() {
        let scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(8);
        let selection = scheduler.draw(&mut rng, Some(Topic::AssuranceVie)).unwrap();
        assert_eq!(selection.primary_topic, Topic::AssuranceVie);
    }

    #[test]
    fn test_counters_sum_matches_commits() {
        let mut scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            scheduler.commit(&selection);
        }
        for axis in ["persona", "voice", "format", "complexity", "primary_topic"] {
            assert_eq!(scheduler.counters().total(axis), 50, "axis {axis}");
        }
    }

    #[test]
    fn test_distribution_converges_to_shares() {
        let mut scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(10);
        let issued = 600u64;
        for _ in 0..issued {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            scheduler.commit(&selection);
        }
        for (bucket, share) in scheduler.profile().shares("voice").clone() {
            let current = scheduler.counters().count("voice", &bucket) as f64;
            let observed = current / issued as f64;
            let tolerance = (3.0 * (share * (1.0 - share) / issued as f64).sqrt()).max(0.02);
            assert!(
                (observed - share).abs() <= tolerance,
                "voice/{bucket}: observed {observed:.3}, target {share:.3}"
            );
        }
    }

    #[test]
    fn test_signature_fifo_avoids_immediate_repeats() {
        let mut scheduler = scheduler();
        let mut rng = StdRng::seed_from_u64(11);
        let mut repeats = 0;
        let mut last: Option<String> = None;
        for _ in 0..100 {
            let selection = scheduler.draw(&mut rng, None).unwrap();
            let signature = selection.signature();
            if last.as_deref() == Some(signature.as_str()) {
                repeats += 1;
            }
            last = Some(signature);
            scheduler.commit(&selection);
        }
        // The redraw pass keeps consecutive identical signatures rare.
        assert!(repeats <= 2, "{repeats} immediate repeats");
    }
}
