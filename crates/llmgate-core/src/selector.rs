use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use rand::Rng;

use crate::resolver::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Lottery,
    Rotor,
}

impl Strategy {
    pub fn from_str_or_lottery(value: &str) -> Self {
        match value {
            "rotor" => Strategy::Rotor,
            _ => Strategy::Lottery,
        }
    }
}

/// Weighted lottery: one sample proportional to `weight`, ties at a
/// cumulative-sum boundary broken by ascending binding id since candidates
/// are walked in id order. All-zero weights are treated as weight 1 each.
pub fn lottery_pick(candidates: &[Candidate]) -> &Candidate {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by_key(|c| c.binding.id);

    let weights: Vec<i64> = ordered
        .iter()
        .map(|c| c.binding.weight.max(0) as i64)
        .collect();
    let total: i64 = weights.iter().sum();
    let weights = if total == 0 {
        vec![1i64; ordered.len()]
    } else {
        weights
    };
    let total: i64 = weights.iter().sum();

    let mut roll = rand::rng().random_range(0..total.max(1));
    for (candidate, weight) in ordered.iter().zip(weights.iter()) {
        if roll < *weight {
            return candidate;
        }
        roll -= weight;
    }
    ordered[ordered.len() - 1]
}

struct RotorState {
    candidate_hash: u64,
    current_weight: Vec<i64>,
}

/// Smooth weighted round robin, keyed by model id. Cursor resets whenever the
/// candidate id set for a model changes (admin mutation, breaker/rate-limit
/// filtering shrinking the pool between requests).
#[derive(Default)]
pub struct RotorTable {
    by_model: Mutex<HashMap<i64, RotorState>>,
}

impl RotorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pick<'a>(&self, model_id: i64, candidates: &'a [Candidate]) -> &'a Candidate {
        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.binding.id);
        let weights: Vec<i64> = ordered
            .iter()
            .map(|c| c.binding.weight.max(1) as i64)
            .collect();
        let hash = hash_ids(&ordered);

        let mut by_model = self.by_model.lock().unwrap();
        let state = by_model.entry(model_id).or_insert_with(|| RotorState {
            candidate_hash: hash,
            current_weight: vec![0; ordered.len()],
        });
        if state.candidate_hash != hash || state.current_weight.len() != ordered.len() {
            state.candidate_hash = hash;
            state.current_weight = vec![0; ordered.len()];
        }

        let total: i64 = weights.iter().sum();
        for (cw, w) in state.current_weight.iter_mut().zip(weights.iter()) {
            *cw += w;
        }
        let (best_index, _) = state
            .current_weight
            .iter()
            .enumerate()
            .max_by_key(|(_, w)| **w)
            .expect("candidates is non-empty");
        state.current_weight[best_index] -= total;

        ordered[best_index]
    }
}

fn hash_ids(ordered: &[&Candidate]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for candidate in ordered {
        candidate.binding.id.hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmgate_storage::snapshot::{BindingRow, ProviderRow};
    use serde_json::json;
    use time::OffsetDateTime;

    fn candidate(id: i64, weight: i32) -> Candidate {
        Candidate {
            binding: BindingRow {
                id,
                model_id: 1,
                provider_id: id,
                provider_model: "m".to_string(),
                cap_tool_call: false,
                cap_structured_output: false,
                cap_image: false,
                with_header: false,
                customer_headers: json!({}),
                status: true,
                weight,
                updated_at: OffsetDateTime::now_utc(),
            },
            provider: ProviderRow {
                id,
                name: format!("p{id}"),
                kind: "openai".to_string(),
                config_json: json!({}),
                console_url: None,
                rpm_limit: 0,
                ip_lock_minutes: 0,
                updated_at: OffsetDateTime::now_utc(),
            },
            stats: crate::resolver::BindingStats {
                success_rate: 1.0,
                breaker_state: crate::breaker::BreakerState::Closed,
            },
        }
    }

    #[test]
    fn lottery_picks_among_candidates_only() {
        let candidates = vec![candidate(1, 1), candidate(2, 1)];
        for _ in 0..20 {
            let picked = lottery_pick(&candidates);
            assert!(picked.binding.id == 1 || picked.binding.id == 2);
        }
    }

    #[test]
    fn lottery_all_zero_weights_still_picks() {
        let candidates = vec![candidate(1, 0), candidate(2, 0)];
        let picked = lottery_pick(&candidates);
        assert!(picked.binding.id == 1 || picked.binding.id == 2);
    }

    #[test]
    fn rotor_distributes_proportionally_to_weight() {
        let table = RotorTable::new();
        let candidates = vec![candidate(1, 2), candidate(2, 1)];
        let mut counts = HashMap::new();
        for _ in 0..9 {
            let picked = table.pick(1, &candidates);
            *counts.entry(picked.binding.id).or_insert(0) += 1;
        }
        assert_eq!(counts.get(&1).copied().unwrap_or(0), 6);
        assert_eq!(counts.get(&2).copied().unwrap_or(0), 3);
    }

    #[test]
    fn rotor_resets_when_candidate_set_changes() {
        let table = RotorTable::new();
        let candidates = vec![candidate(1, 1), candidate(2, 1)];
        table.pick(1, &candidates);
        let new_candidates = vec![candidate(1, 1), candidate(3, 1)];
        // Should not panic and should pick from the new set.
        let picked = table.pick(1, &new_candidates);
        assert!(picked.binding.id == 1 || picked.binding.id == 3);
    }
}
