//! Reciprocal Rank Fusion over the vector and keyword rankings.
//!
//! Each chunk appearing in either ranked list receives
//! `1/(60 + vector_rank) + 1/(60 + keyword_rank)` with 1-based ranks; an
//! absent rank contributes zero. The damping constant 60 is fixed and not
//! tunable at query time. Output ordering is fully deterministic: fused
//! score descending, then chunk ordinal ascending, then chunk id.

use std::collections::HashMap;

/// Standard RRF damping constant.
pub const RRF_DAMPING: f64 = 60.0;

/// A chunk at some position of a ranked candidate list.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    /// Ordinal index within its document, used for deterministic ties.
    pub ordinal: i64,
}

/// A chunk after fusion, with its per-list ranks preserved.
#[derive(Debug, Clone)]
pub struct FusedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub score: f64,
    /// 1-based rank in the vector list, if present there.
    pub vector_rank: Option<usize>,
    /// 1-based rank in the keyword list, if present there.
    pub keyword_rank: Option<usize>,
}

/// The RRF contribution of a pair of optional 1-based ranks.
pub fn rrf_score(vector_rank: Option<usize>, keyword_rank: Option<usize>) -> f64 {
    let v = vector_rank
        .map(|r| 1.0 / (RRF_DAMPING + r as f64))
        .unwrap_or(0.0);
    let k = keyword_rank
        .map(|r| 1.0 / (RRF_DAMPING + r as f64))
        .unwrap_or(0.0);
    v + k
}

/// Fuse two ranked lists into a single deterministic ranking.
///
/// Both inputs must already be ordered best-first; rank is taken from the
/// position in the slice.
pub fn fuse(vector: &[RankedChunk], keyword: &[RankedChunk]) -> Vec<FusedChunk> {
    let mut by_id: HashMap<&str, FusedChunk> = HashMap::new();

    for (i, c) in vector.iter().enumerate() {
        by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| FusedChunk {
                chunk_id: c.chunk_id.clone(),
                document_id: c.document_id.clone(),
                ordinal: c.ordinal,
                score: 0.0,
                vector_rank: None,
                keyword_rank: None,
            })
            .vector_rank = Some(i + 1);
    }

    for (i, c) in keyword.iter().enumerate() {
        by_id
            .entry(c.chunk_id.as_str())
            .or_insert_with(|| FusedChunk {
                chunk_id: c.chunk_id.clone(),
                document_id: c.document_id.clone(),
                ordinal: c.ordinal,
                score: 0.0,
                vector_rank: None,
                keyword_rank: None,
            })
            .keyword_rank = Some(i + 1);
    }

    let mut fused: Vec<FusedChunk> = by_id
        .into_values()
        .map(|mut f| {
            f.score = rrf_score(f.vector_rank, f.keyword_rank);
            f
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.ordinal.cmp(&b.ordinal))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });

    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(id: &str, ordinal: i64) -> RankedChunk {
        RankedChunk {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            ordinal,
        }
    }

    #[test]
    fn score_matches_definition() {
        // vector rank 2, keyword rank 5 => 1/62 + 1/65
        let s = rrf_score(Some(2), Some(5));
        assert!((s - (1.0 / 62.0 + 1.0 / 65.0)).abs() < 1e-12);
    }

    #[test]
    fn absent_rank_contributes_zero() {
        assert!((rrf_score(Some(1), None) - 1.0 / 61.0).abs() < 1e-12);
        assert!((rrf_score(None, Some(1)) - 1.0 / 61.0).abs() < 1e-12);
        assert_eq!(rrf_score(None, None), 0.0);
    }

    #[test]
    fn fusion_is_deterministic() {
        let vector = vec![ranked("a", 0), ranked("b", 1), ranked("c", 2)];
        let keyword = vec![ranked("c", 2), ranked("d", 3)];

        let first = fuse(&vector, &keyword);
        let second = fuse(&vector, &keyword);

        let ids1: Vec<&str> = first.iter().map(|f| f.chunk_id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|f| f.chunk_id.as_str()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn chunk_in_both_lists_outranks_single_list_chunks() {
        let vector = vec![ranked("a", 0), ranked("b", 1)];
        let keyword = vec![ranked("b", 1), ranked("c", 2)];

        let fused = fuse(&vector, &keyword);
        assert_eq!(fused[0].chunk_id, "b");
        assert_eq!(fused[0].vector_rank, Some(2));
        assert_eq!(fused[0].keyword_rank, Some(1));
        assert!(
            (fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12,
            "unexpected fused score: {}",
            fused[0].score
        );
    }

    #[test]
    fn ties_break_by_ordinal_ascending() {
        // a and b each appear only at rank 1 of one list: identical scores.
        let vector = vec![ranked("b", 7)];
        let keyword = vec![ranked("a", 3)];

        let fused = fuse(&vector, &keyword);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].chunk_id, "a");
        assert_eq!(fused[1].chunk_id, "b");
    }

    #[test]
    fn empty_inputs_fuse_to_empty() {
        assert!(fuse(&[], &[]).is_empty());
    }
}
