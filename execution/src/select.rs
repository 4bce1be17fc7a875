//! Uniform winner selection.

use crate::presence::Candidates;
use raffle_types::ParticipantId;
use rand::Rng;

/// Pick one candidate uniformly at random.
///
/// `candidates` is a captured value: the result is always a member of it, regardless of how
/// the live registry changed after the capture.
pub fn select<R: Rng + ?Sized>(candidates: &Candidates, rng: &mut R) -> ParticipantId {
    let index = rng.gen_range(0..candidates.len());
    candidates.as_slice()[index].clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{presences, snapshot_of};
    use crate::presence::PresenceRegistry;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashMap;

    #[test]
    fn test_single_candidate_always_wins() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = snapshot_of(&["only"]).candidates().unwrap();
        for _ in 0..16 {
            assert_eq!(select(&candidates, &mut rng).as_str(), "only");
        }
    }

    #[test]
    fn test_selection_is_member_of_candidates() {
        let mut rng = StdRng::seed_from_u64(7);
        for size in 1..=12 {
            let ids: Vec<String> = (0..size).map(|i| format!("p{i}")).collect();
            let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let candidates = snapshot_of(&refs).candidates().unwrap();
            for _ in 0..50 {
                let winner = select(&candidates, &mut rng);
                assert!(candidates.contains(&winner));
            }
        }
    }

    #[test]
    fn test_selection_is_roughly_uniform() {
        const TRIALS: usize = 60_000;
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = snapshot_of(&["a", "b", "c", "d", "e", "f"])
            .candidates()
            .unwrap();
        let mut counts: HashMap<ParticipantId, usize> = HashMap::new();
        for _ in 0..TRIALS {
            *counts.entry(select(&candidates, &mut rng)).or_default() += 1;
        }

        assert_eq!(counts.len(), candidates.len());
        let expected = TRIALS as f64 / candidates.len() as f64;
        for (id, count) in counts {
            let deviation = (count as f64 - expected).abs() / expected;
            assert!(deviation < 0.05, "{id} chosen {count} times (expected ~{expected})");
        }
    }

    #[test]
    fn test_capture_outlives_registry_change() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut registry = PresenceRegistry::default();
        registry.apply_sync(presences(&["a", "b", "c"]));

        let captured = registry.snapshot().candidates().unwrap();
        // Everybody disconnects between the emptiness check and the pick.
        registry.apply_sync(Vec::new());
        assert!(registry.snapshot().is_empty());

        let winner = select(&captured, &mut rng);
        assert!(["a", "b", "c"].contains(&winner.as_str()));
    }
}
