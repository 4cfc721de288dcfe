//! Step 3 of the retrieval pipeline: Reciprocal Rank Fusion.
//!
//! No teacher precedent (the teacher's search is Postgres FTS only); this is
//! a small deterministic free function, unit-tested against the literal
//! invariants in SPEC_FULL.md §8, in the same style as the teacher's
//! `sync::parser::normalize_subject`.

use crate::search::types::{Branch, RankedHit};
use std::collections::HashMap;

pub const RRF_K: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct FusedHit {
    pub hit: RankedHit,
    pub rrf_score: f64,
    pub lex_score: Option<f64>,
    pub vec_score: Option<f64>,
}

fn rrf_contribution(rank: usize) -> f64 {
    1.0 / (RRF_K + rank as f64 + 1.0)
}

/// Fuse lexical and dense branches. Each input list must already be ordered
/// by rank ascending (rank 0 = best) within its branch. Ties in the merged
/// score are broken by branch rank order, lexical before dense.
pub fn reciprocal_rank_fusion(
    lexical: &[RankedHit],
    dense: &[RankedHit],
) -> Vec<FusedHit> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut best_hit: HashMap<String, RankedHit> = HashMap::new();
    let mut tiebreak: HashMap<String, (Branch, usize)> = HashMap::new();
    let mut lex_scores: HashMap<String, f64> = HashMap::new();
    let mut vec_scores: HashMap<String, f64> = HashMap::new();

    for (branch, hits) in [(Branch::Lexical, lexical), (Branch::Dense, dense)] {
        for hit in hits {
            *scores.entry(hit.message_id.clone()).or_insert(0.0) += rrf_contribution(hit.rank);
            best_hit
                .entry(hit.message_id.clone())
                .or_insert_with(|| hit.clone());
            tiebreak
                .entry(hit.message_id.clone())
                .and_modify(|(b, r)| {
                    if (branch, hit.rank) < (*b, *r) {
                        *b = branch;
                        *r = hit.rank;
                    }
                })
                .or_insert((branch, hit.rank));
            match branch {
                Branch::Lexical => {
                    lex_scores.insert(hit.message_id.clone(), hit.score);
                }
                Branch::Dense => {
                    vec_scores.insert(hit.message_id.clone(), hit.score);
                }
            }
        }
    }

    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(message_id, rrf_score)| FusedHit {
            hit: best_hit.remove(&message_id).expect("hit present for every scored id"),
            rrf_score,
            lex_score: lex_scores.get(&message_id).copied(),
            vec_score: vec_scores.get(&message_id).copied(),
        })
        .collect();

    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap()
            .then_with(|| tiebreak[&a.hit.message_id].cmp(&tiebreak[&b.hit.message_id]))
    });

    apply_post_hoc_bonuses(&mut fused);
    fused
}

/// `+0.05` to the top-ranked item, `+0.02` to ranks 2 and 3 (0-indexed 1, 2),
/// applied before the position-aware blend even though this can invert a
/// tie-break the blend step would otherwise resolve differently (SPEC_FULL.md
/// §4.5 step 3, §9.1).
fn apply_post_hoc_bonuses(fused: &mut [FusedHit]) {
    if let Some(first) = fused.get_mut(0) {
        first.rrf_score += 0.05;
    }
    for hit in fused.iter_mut().skip(1).take(2) {
        hit.rrf_score += 0.02;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hit(message_id: &str, rank: usize) -> RankedHit {
        RankedHit {
            message_id: message_id.to_string(),
            rank,
            score: 1.0,
            subject: String::new(),
            snippet: String::new(),
            from_email: String::new(),
            from_name: String::new(),
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn rrf_monotonicity_for_a_message_in_both_branches() {
        let lexical = vec![hit("m1", 2)];
        let dense = vec![hit("m1", 5)];
        let fused = reciprocal_rank_fusion(&lexical, &dense);
        let expected = 1.0 / (60.0 + 2.0 + 1.0) + 1.0 / (60.0 + 5.0 + 1.0) + 0.05;
        assert_eq!(fused.len(), 1);
        assert!((fused[0].rrf_score - expected).abs() < 1e-9);
    }

    #[test]
    fn post_hoc_bonuses_apply_to_top_three_ranks() {
        let lexical = vec![hit("m1", 0), hit("m2", 1), hit("m3", 2), hit("m4", 3)];
        let fused = reciprocal_rank_fusion(&lexical, &[]);
        assert_eq!(fused[0].hit.message_id, "m1");
        assert_eq!(fused[1].hit.message_id, "m2");
        assert_eq!(fused[2].hit.message_id, "m3");

        let base0 = rrf_contribution(0);
        let base1 = rrf_contribution(1);
        let base2 = rrf_contribution(2);
        assert!((fused[0].rrf_score - (base0 + 0.05)).abs() < 1e-9);
        assert!((fused[1].rrf_score - (base1 + 0.02)).abs() < 1e-9);
        assert!((fused[2].rrf_score - (base2 + 0.02)).abs() < 1e-9);
    }

    #[test]
    fn lexical_wins_tie_over_dense_at_equal_rank() {
        let lexical = vec![hit("a", 4)];
        let dense = vec![hit("b", 4)];
        let fused = reciprocal_rank_fusion(&lexical, &dense);
        // both get the same base rrf contribution; lexical ranks first per
        // the documented tie-break, and thus receives the +0.05 bonus.
        assert_eq!(fused[0].hit.message_id, "a");
    }
}
