//! Step 5 of the retrieval pipeline: position-aware score blending.
//!
//! No teacher precedent; a pure function over the fused+reranked list,
//! unit-tested against the literal position-weighting invariant in
//! SPEC_FULL.md §8.

/// Blend weight pair `(rrf_weight, rerank_weight)` for pre-blend position `i`
/// (0-based), per SPEC_FULL.md §4.5 step 5.
pub fn blend_weights(position: usize) -> (f64, f64) {
    if position < 3 {
        (0.75, 0.25)
    } else if position < 10 {
        (0.60, 0.40)
    } else {
        (0.40, 0.60)
    }
}

pub fn blend_score(position: usize, rrf: f64, rerank: f64) -> f64 {
    let (w_rrf, w_rerank) = blend_weights(position);
    w_rrf * rrf + w_rerank * rerank
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_weighting_matches_the_three_documented_bands() {
        assert_eq!(blend_weights(0), (0.75, 0.25));
        assert_eq!(blend_weights(2), (0.75, 0.25));
        assert_eq!(blend_weights(3), (0.60, 0.40));
        assert_eq!(blend_weights(9), (0.60, 0.40));
        assert_eq!(blend_weights(10), (0.40, 0.60));
    }

    /// "Query 'pricing' matching body 'cost'": dense-only rank-0 hit, RRF
    /// score 1/61 ≈ 0.0164, rerank 8/10 = 0.8, blended at the top band.
    #[test]
    fn dense_only_match_scores_point_21() {
        let rrf = 1.0 / 61.0;
        let rerank = 0.8;
        let final_score = blend_score(0, rrf, rerank);
        assert!((final_score - 0.21).abs() < 0.001);
    }
}
