//! Rights of a whole cycle, derived from its snapshot and seed.

use std::collections::BTreeMap;

use stakeindex_core::error::IndexerError;
use stakeindex_core::model::{BakerCycle, BakingRight, Cycle, RightStatus, SnapshotBalance};

use super::sampler::{decode_seed, AliasTable, SeedStream};

const BAKING: &str = "baking";
const ATTESTING: &str = "attesting";

/// Samples rights of one cycle.
pub struct RightsSampler {
    cycle: i64,
    first_level: i64,
    seed: Vec<u8>,
    table: Option<AliasTable>,
}

impl RightsSampler {
    pub fn new(cycle: &Cycle, snapshots: &[SnapshotBalance]) -> Result<Self, IndexerError> {
        let weights: Vec<(i64, i64)> = snapshots.iter().map(|s| (s.baker_id, s.baking_power)).collect();
        Ok(Self {
            cycle: cycle.index,
            first_level: cycle.first_level,
            seed: decode_seed(&cycle.seed)?,
            table: AliasTable::new(&weights),
        })
    }

    /// Baker holding the baking right of `round` at `level`.
    pub fn baker(&self, level: i64, round: i32) -> Option<i64> {
        let table = self.table.as_ref()?;
        let mut stream = SeedStream::new(&self.seed, BAKING, level - self.first_level, round as i64);
        Some(table.sample(&mut stream))
    }

    /// Attestation slots per baker at `level`.
    pub fn committee(&self, level: i64, committee_size: i32) -> BTreeMap<i64, i32> {
        let mut slots = BTreeMap::new();
        if let Some(table) = &self.table {
            for slot in 0..committee_size {
                let mut stream = SeedStream::new(&self.seed, ATTESTING, level - self.first_level, slot as i64);
                *slots.entry(table.sample(&mut stream)).or_insert(0) += 1;
            }
        }
        slots
    }

    pub fn baking_right(&self, level: i64, round: i32, status: RightStatus) -> Option<BakingRight> {
        self.baker(level, round)
            .map(|baker| BakingRight::baking(self.cycle, level, round, baker, status))
    }
}

/// Everything generated for a cycle besides the cycle row itself.
#[derive(Debug, Clone, Default)]
pub struct GeneratedRights {
    pub rights: Vec<BakingRight>,
    pub baker_cycles: Vec<BakerCycle>,
}

/// Round-0 baking rights and attestation committees for `levels` of the
/// cycle, plus one [`BakerCycle`] per snapshot entry carrying its expected
/// counts.
pub fn generate(
    cycle: &Cycle,
    snapshots: &[SnapshotBalance],
    committee_size: i32,
    levels: std::ops::RangeInclusive<i64>,
) -> Result<GeneratedRights, IndexerError> {
    let sampler = RightsSampler::new(cycle, snapshots)?;
    let mut baker_cycles: BTreeMap<i64, BakerCycle> =
        snapshots.iter().map(|s| (s.baker_id, BakerCycle::from_snapshot(s))).collect();
    let mut rights = Vec::new();

    for level in levels {
        if let Some(right) = sampler.baking_right(level, 0, RightStatus::Future) {
            if let Some(bc) = baker_cycles.get_mut(&right.baker_id) {
                bc.future_blocks += 1;
            }
            rights.push(right);
        }
        for (baker, slots) in sampler.committee(level, committee_size) {
            if let Some(bc) = baker_cycles.get_mut(&baker) {
                bc.future_attestations += slots;
            }
            rights.push(BakingRight::attestation(cycle.index, level, baker, slots));
        }
    }

    Ok(GeneratedRights {
        rights,
        baker_cycles: baker_cycles.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakeindex_core::model::RightKind;

    fn cycle() -> Cycle {
        Cycle {
            index: 4,
            first_level: 33,
            last_level: 40,
            snapshot_level: 24,
            seed: "0a0b0c0d".into(),
            total_baking_power: 0,
            total_bakers: 0,
            total_staked: 0,
            total_delegated: 0,
            generated_level: 17,
        }
    }

    fn snap(baker_id: i64, power: i64) -> SnapshotBalance {
        SnapshotBalance {
            cycle: 4,
            baker_id,
            own_staked: power / 2,
            external_staked: 0,
            own_delegated: power / 2,
            external_delegated: 0,
            delegators_count: 0,
            stakers_count: 0,
            baking_power: power,
        }
    }

    #[test]
    fn one_round_zero_right_per_level_and_full_committee() {
        let g = generate(&cycle(), &[snap(1, 100), snap(2, 300)], 16, 33..=40).unwrap();
        let baking = g.rights.iter().filter(|r| r.kind == RightKind::Baking).count();
        assert_eq!(baking, 8);
        for level in 33..=40 {
            let slots: i32 = g
                .rights
                .iter()
                .filter(|r| r.level == level && r.kind == RightKind::Attestation)
                .filter_map(|r| r.slots)
                .sum();
            assert_eq!(slots, 16);
        }
    }

    #[test]
    fn baker_cycle_counts_match_rights() {
        let g = generate(&cycle(), &[snap(1, 100), snap(2, 300), snap(3, 50)], 16, 33..=40).unwrap();
        assert_eq!(g.baker_cycles.len(), 3);
        let blocks: i32 = g.baker_cycles.iter().map(|bc| bc.future_blocks).sum();
        let slots: i32 = g.baker_cycles.iter().map(|bc| bc.future_attestations).sum();
        assert_eq!(blocks, 8);
        assert_eq!(slots, 8 * 16);
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate(&cycle(), &[snap(1, 100), snap(2, 300)], 16, 33..=40).unwrap();
        let b = generate(&cycle(), &[snap(2, 300), snap(1, 100)], 16, 33..=40).unwrap();
        assert_eq!(a.rights, b.rights);
    }

    #[test]
    fn no_bakers_no_rights() {
        let g = generate(&cycle(), &[], 16, 33..=40).unwrap();
        assert!(g.rights.is_empty());
        assert!(g.baker_cycles.is_empty());
    }

    #[test]
    fn higher_rounds_are_sampled_on_demand() {
        let s = RightsSampler::new(&cycle(), &[snap(1, 100), snap(2, 300)]).unwrap();
        let r = s.baking_right(35, 3, RightStatus::Realized).unwrap();
        assert_eq!(r.round, Some(3));
        assert_eq!(r.cycle, 4);
        assert_eq!(s.baker(35, 3), Some(r.baker_id));
    }
}
