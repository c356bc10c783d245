//! # Viterbi Decoding for CRF
//!
//! Finds the highest-scoring label sequence given emission scores, pairwise
//! transition scores and start/end scores, honoring a per-position mask.

use crate::error::{ActaError, Result};

/// Viterbi decoder over a fixed set of transition scores.
///
/// Ties are broken towards the lowest label id, both when choosing a
/// predecessor and when choosing the final label.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    start: Vec<f32>,
    end: Vec<f32>,
    /// `transitions[from][to]`
    transitions: Vec<Vec<f32>>,
}

impl ViterbiDecoder {
    /// Create a decoder from start scores, end scores and a square
    /// `[from][to]` transition matrix.
    pub fn new(start: Vec<f32>, end: Vec<f32>, transitions: Vec<Vec<f32>>) -> Result<Self> {
        let num_tags = start.len();
        if end.len() != num_tags
            || transitions.len() != num_tags
            || transitions.iter().any(|row| row.len() != num_tags)
        {
            return Err(ActaError::InvalidConfig(format!(
                "transition scores must all cover {num_tags} tags"
            )));
        }
        Ok(Self {
            start,
            end,
            transitions,
        })
    }

    pub fn num_tags(&self) -> usize {
        self.start.len()
    }

    /// Decode a sequence where every position counts.
    pub fn decode_unmasked(&self, emission_scores: &[Vec<f32>]) -> Result<Vec<usize>> {
        let mask = vec![true; emission_scores.len()];
        self.decode(emission_scores, &mask)
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - `[seq_len][num_tags]` emission scores
    /// * `mask` - `[seq_len]`, first position must be on
    ///
    /// # Returns
    /// One tag per unmasked position, i.e. a path of length
    /// `mask.iter().filter(|m| **m).count()`. Masked positions leave the
    /// running scores untouched, so for a trailing-pad mask this equals the
    /// decode of the truncated sequence.
    pub fn decode(&self, emission_scores: &[Vec<f32>], mask: &[bool]) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        let num_tags = self.num_tags();
        if let Some(row) = emission_scores.iter().find(|row| row.len() != num_tags) {
            return Err(ActaError::InvalidConfig(format!(
                "emission score dimension mismatch: expected {}, got {}",
                num_tags,
                row.len()
            )));
        }
        if mask.len() != seq_len {
            return Err(ActaError::InvalidMask(format!(
                "mask covers {} positions but sequence has {}",
                mask.len(),
                seq_len
            )));
        }
        if !mask[0] {
            return Err(ActaError::InvalidMask(
                "the first timestep of every sequence must be unmasked".into(),
            ));
        }

        // Initialize first position
        let mut score: Vec<f32> = (0..num_tags)
            .map(|tag| self.start[tag] + emission_scores[0][tag])
            .collect();
        let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(seq_len - 1);

        // Forward pass
        for pos in 1..seq_len {
            let mut next = vec![f32::NEG_INFINITY; num_tags];
            let mut best_prevs = vec![0usize; num_tags];

            for curr_tag in 0..num_tags {
                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for prev_tag in 0..num_tags {
                    let candidate = score[prev_tag] + self.transitions[prev_tag][curr_tag];
                    if candidate > best_score {
                        best_score = candidate;
                        best_prev = prev_tag;
                    }
                }

                next[curr_tag] = best_score + emission_scores[pos][curr_tag];
                best_prevs[curr_tag] = best_prev;
            }

            backptr.push(best_prevs);
            if mask[pos] {
                score = next;
            }
        }

        // Find best final tag
        let mut best_final_tag = 0;
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..num_tags {
            let final_score = score[tag] + self.end[tag];
            if final_score > best_final_score {
                best_final_score = final_score;
                best_final_tag = tag;
            }
        }

        // Backtrack from the last unmasked position
        let seq_end = mask.iter().filter(|&&on| on).count() - 1;
        let mut path = Vec::with_capacity(seq_end + 1);
        path.push(best_final_tag);
        let mut curr_tag = best_final_tag;

        for best_prevs in backptr[..seq_end].iter().rev() {
            curr_tag = best_prevs[curr_tag];
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence_score(
        decoder: &ViterbiDecoder,
        emissions: &[Vec<f32>],
        path: &[usize],
    ) -> f32 {
        let mut score = decoder.start[path[0]] + emissions[0][path[0]];
        for pos in 1..path.len() {
            score += decoder.transitions[path[pos - 1]][path[pos]] + emissions[pos][path[pos]];
        }
        score + decoder.end[path[path.len() - 1]]
    }

    fn brute_force_best(decoder: &ViterbiDecoder, emissions: &[Vec<f32>]) -> Vec<usize> {
        let n = decoder.num_tags();
        let len = emissions.len();
        let mut best = (f32::NEG_INFINITY, Vec::new());
        for code in 0..n.pow(len as u32) {
            let path: Vec<usize> = (0..len).map(|pos| (code / n.pow(pos as u32)) % n).collect();
            let score = sequence_score(decoder, emissions, &path);
            if score > best.0 {
                best = (score, path);
            }
        }
        best.1
    }

    fn create_decoder() -> ViterbiDecoder {
        ViterbiDecoder::new(
            vec![0.5, -0.2, 0.1],
            vec![-0.3, 0.4, 0.0],
            vec![
                vec![0.2, -1.0, 0.3],
                vec![0.6, 0.1, -0.4],
                vec![-0.5, 0.9, 0.0],
            ],
        )
        .unwrap()
    }

    fn create_emissions(len: usize) -> Vec<Vec<f32>> {
        (0..len)
            .map(|pos| {
                (0..3)
                    .map(|tag| ((pos * 3 + tag) as f32 * 1.37).sin())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_viterbi_matches_brute_force() {
        let decoder = create_decoder();
        for len in 1..=5 {
            let emissions = create_emissions(len);
            let path = decoder.decode_unmasked(&emissions).unwrap();
            assert_eq!(path, brute_force_best(&decoder, &emissions), "len {len}");
        }
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = create_decoder();
        assert!(decoder.decode_unmasked(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_trailing_mask_matches_truncated() {
        let decoder = create_decoder();
        let emissions = create_emissions(6);
        let mask = [true, true, true, true, false, false];

        let masked = decoder.decode(&emissions, &mask).unwrap();
        let truncated = decoder.decode_unmasked(&emissions[..4]).unwrap();
        assert_eq!(masked, truncated);
    }

    #[test]
    fn test_ties_pick_lowest_tag() {
        let decoder = ViterbiDecoder::new(vec![0.0; 3], vec![0.0; 3], vec![vec![0.0; 3]; 3]).unwrap();
        let emissions = vec![vec![1.0; 3]; 4];
        assert_eq!(decoder.decode_unmasked(&emissions).unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_first_position_masked_is_rejected() {
        let decoder = create_decoder();
        let emissions = create_emissions(2);
        assert!(matches!(
            decoder.decode(&emissions, &[false, true]),
            Err(ActaError::InvalidMask(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let decoder = create_decoder();
        let emissions = vec![vec![0.0; 2]];
        assert!(decoder.decode_unmasked(&emissions).is_err());
        assert!(ViterbiDecoder::new(vec![0.0; 2], vec![0.0; 3], vec![vec![0.0; 2]; 2]).is_err());
    }
}
