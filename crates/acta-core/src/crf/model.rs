use candle_core::{DType, IndexOp, Tensor};
use candle_nn::{Init, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::crf::viterbi::ViterbiDecoder;
use crate::error::{ActaError, Result};

/// How per-sequence negative log-likelihoods are combined into one loss.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum over the batch.
    #[default]
    Sum,
    /// Mean over the batch.
    Mean,
    /// Sum over the batch divided by the number of unmasked tokens.
    TokenMean,
}

/// Linear-chain conditional random field over `num_labels` labels.
///
/// Holds start scores, end scores and a `[from, to]` transition matrix. The
/// log-likelihood is built from tensor ops so it can be backpropagated;
/// decoding runs on the host.
#[derive(Debug, Clone)]
pub struct Crf {
    num_labels: usize,
    start_transitions: Tensor,
    end_transitions: Tensor,
    transitions: Tensor,
}

/// Host-side copy of tags and mask for one call.
struct Supervision {
    tags: Vec<Vec<u32>>,
    mask: Vec<Vec<bool>>,
}

impl Crf {
    /// Create a CRF whose scores are drawn from `U(-0.1, 0.1)` unless `vb`
    /// already holds them.
    pub fn new(num_labels: usize, vb: VarBuilder) -> Result<Self> {
        if num_labels == 0 {
            return Err(ActaError::InvalidConfig("CRF needs at least one label".into()));
        }
        let init = Init::Uniform { lo: -0.1, up: 0.1 };
        let start_transitions = vb.get_with_hints(num_labels, "start_transitions", init)?;
        let end_transitions = vb.get_with_hints(num_labels, "end_transitions", init)?;
        let transitions = vb.get_with_hints((num_labels, num_labels), "transitions", init)?;
        Ok(Self {
            num_labels,
            start_transitions,
            end_transitions,
            transitions,
        })
    }

    /// Assemble a CRF from explicit score tensors.
    pub fn from_tensors(
        start_transitions: Tensor,
        end_transitions: Tensor,
        transitions: Tensor,
    ) -> Result<Self> {
        let num_labels = start_transitions.dim(0)?;
        if start_transitions.rank() != 1
            || end_transitions.dims() != [num_labels]
            || transitions.dims() != [num_labels, num_labels]
        {
            return Err(ActaError::InvalidConfig(format!(
                "CRF scores disagree: start {:?}, end {:?}, transitions {:?}",
                start_transitions.dims(),
                end_transitions.dims(),
                transitions.dims()
            )));
        }
        Ok(Self {
            num_labels,
            start_transitions,
            end_transitions,
            transitions,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn start_transitions(&self) -> &Tensor {
        &self.start_transitions
    }

    pub fn end_transitions(&self) -> &Tensor {
        &self.end_transitions
    }

    /// `[from, to]` transition scores.
    pub fn transitions(&self) -> &Tensor {
        &self.transitions
    }

    /// Log-likelihood of each gold sequence, shape `[batch]`.
    ///
    /// # Arguments
    /// * `emissions` - `[batch, seq_len, num_labels]`
    /// * `tags` - `[batch, seq_len]` gold label ids
    /// * `mask` - optional `[batch, seq_len]`, nonzero where a position counts;
    ///   the first timestep must be on for every sequence
    pub fn log_likelihood(
        &self,
        emissions: &Tensor,
        tags: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, seq_len) = self.check_emissions(emissions)?;
        if tags.dims() != [batch, seq_len] {
            return Err(ActaError::LabelShapeMismatch {
                expected: vec![batch, seq_len],
                found: tags.dims().to_vec(),
            });
        }
        let mask = self.host_mask(mask, batch, seq_len)?;
        let supervision = self.host_tags(tags, mask)?;

        let numerator = self.gold_score(emissions, &supervision)?;
        let denominator = self.log_partition(emissions, &supervision.mask)?;
        Ok((numerator - denominator)?)
    }

    /// Negative log-likelihood reduced to a scalar.
    pub fn neg_log_likelihood(
        &self,
        emissions: &Tensor,
        tags: &Tensor,
        mask: Option<&Tensor>,
        reduction: Reduction,
    ) -> Result<Tensor> {
        let llh = self.log_likelihood(emissions, tags, mask)?;
        let reduced = match reduction {
            Reduction::Sum => llh.sum_all()?,
            Reduction::Mean => llh.mean_all()?,
            Reduction::TokenMean => {
                let (batch, seq_len, _) = emissions.dims3()?;
                let tokens = match mask {
                    Some(mask) => self
                        .host_mask(Some(mask), batch, seq_len)?
                        .iter()
                        .flatten()
                        .filter(|&&on| on)
                        .count(),
                    None => batch * seq_len,
                };
                llh.sum_all()?.affine(1.0 / tokens as f64, 0.0)?
            }
        };
        Ok(reduced.neg()?)
    }

    /// Most likely label sequence for every batch entry.
    ///
    /// Every row has `seq_len` entries: positions past the last unmasked one
    /// are filled with `pad_label`.
    pub fn decode(
        &self,
        emissions: &Tensor,
        mask: Option<&Tensor>,
        pad_label: u32,
    ) -> Result<Vec<Vec<u32>>> {
        let (batch, seq_len) = self.check_emissions(emissions)?;
        let _span = tracing::debug_span!("crf_decode", batch, seq_len).entered();

        let mask = self.host_mask(mask, batch, seq_len)?;
        let decoder = ViterbiDecoder::new(
            self.start_transitions.to_dtype(DType::F32)?.to_vec1::<f32>()?,
            self.end_transitions.to_dtype(DType::F32)?.to_vec1::<f32>()?,
            self.transitions.to_dtype(DType::F32)?.to_vec2::<f32>()?,
        )?;
        let scores = emissions.to_dtype(DType::F32)?.to_vec3::<f32>()?;

        scores
            .iter()
            .zip(&mask)
            .map(|(sequence, sequence_mask)| {
                let path = decoder.decode(sequence, sequence_mask)?;
                let mut row: Vec<u32> = path.into_iter().map(|tag| tag as u32).collect();
                row.resize(seq_len, pad_label);
                Ok(row)
            })
            .collect()
    }

    /// [`decode`](Self::decode) packed into a `[batch, seq_len]` `u32` tensor.
    pub fn decode_tensor(
        &self,
        emissions: &Tensor,
        mask: Option<&Tensor>,
        pad_label: u32,
    ) -> Result<Tensor> {
        let (batch, seq_len) = self.check_emissions(emissions)?;
        let paths = self.decode(emissions, mask, pad_label)?;
        let flat: Vec<u32> = paths.into_iter().flatten().collect();
        Ok(Tensor::from_vec(flat, (batch, seq_len), emissions.device())?)
    }

    fn check_emissions(&self, emissions: &Tensor) -> Result<(usize, usize)> {
        let (batch, seq_len, num_labels) = emissions.dims3()?;
        if num_labels != self.num_labels {
            return Err(ActaError::LabelCountMismatch {
                expected: self.num_labels,
                found: num_labels,
            });
        }
        if seq_len == 0 {
            return Err(ActaError::InvalidMask("sequences must not be empty".into()));
        }
        Ok((batch, seq_len))
    }

    fn host_mask(&self, mask: Option<&Tensor>, batch: usize, seq_len: usize) -> Result<Vec<Vec<bool>>> {
        let Some(mask) = mask else {
            return Ok(vec![vec![true; seq_len]; batch]);
        };
        if mask.dims() != [batch, seq_len] {
            return Err(ActaError::InvalidMask(format!(
                "expected mask of shape {:?}, got {:?}",
                [batch, seq_len],
                mask.dims()
            )));
        }
        let rows = mask.to_dtype(DType::U8)?.to_vec2::<u8>()?;
        if rows.iter().any(|row| row[0] == 0) {
            return Err(ActaError::InvalidMask(
                "the first timestep of every sequence must be unmasked".into(),
            ));
        }
        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().map(|on| on != 0).collect())
            .collect())
    }

    /// Copy tags to the host. Out-of-range ids are rejected where the mask is
    /// on and replaced by `0` where it is off, since those positions never
    /// contribute to the score.
    fn host_tags(&self, tags: &Tensor, mask: Vec<Vec<bool>>) -> Result<Supervision> {
        let raw = tags.to_dtype(DType::I64)?.to_vec2::<i64>()?;
        let mut host = Vec::with_capacity(raw.len());
        for (row, row_mask) in raw.iter().zip(&mask) {
            let mut out = Vec::with_capacity(row.len());
            for (&tag, &on) in row.iter().zip(row_mask) {
                let in_range = tag >= 0 && (tag as usize) < self.num_labels;
                match (in_range, on) {
                    (true, _) => out.push(tag as u32),
                    (false, false) => out.push(0),
                    (false, true) => {
                        return Err(ActaError::InvalidLabel {
                            label: tag,
                            num_labels: self.num_labels,
                        });
                    }
                }
            }
            host.push(out);
        }
        Ok(Supervision { tags: host, mask })
    }

    /// Unnormalized score of the gold path, shape `[batch]`.
    fn gold_score(&self, emissions: &Tensor, supervision: &Supervision) -> Result<Tensor> {
        let (batch, seq_len, _) = emissions.dims3()?;
        let device = emissions.device();
        let n = self.num_labels as u32;

        let mask_f: Vec<f32> = supervision
            .mask
            .iter()
            .flatten()
            .map(|&on| if on { 1.0 } else { 0.0 })
            .collect();
        let mask_f = Tensor::from_vec(mask_f, (batch, seq_len), device)?.to_dtype(emissions.dtype())?;

        let tag_ids: Vec<u32> = supervision.tags.iter().flatten().copied().collect();
        let tag_ids = Tensor::from_vec(tag_ids, (batch, seq_len, 1), device)?;
        let emitted = emissions.contiguous()?.gather(&tag_ids, 2)?.squeeze(2)?;
        let mut score = (emitted * &mask_f)?.sum(1)?;

        let first: Vec<u32> = supervision.tags.iter().map(|row| row[0]).collect();
        let first = Tensor::from_vec(first, batch, device)?;
        score = (score + self.start_transitions.index_select(&first, 0)?)?;

        if seq_len > 1 {
            let pairs: Vec<u32> = supervision
                .tags
                .iter()
                .flat_map(|row| row.windows(2).map(|pair| pair[0] * n + pair[1]))
                .collect();
            let pairs = Tensor::from_vec(pairs, batch * (seq_len - 1), device)?;
            let transitions = self
                .transitions
                .flatten_all()?
                .index_select(&pairs, 0)?
                .reshape((batch, seq_len - 1))?;
            let step_mask = mask_f.narrow(1, 1, seq_len - 1)?;
            score = (score + (transitions * step_mask)?.sum(1)?)?;
        }

        // The last tag is the one at the final unmasked step count.
        let last: Vec<u32> = supervision
            .tags
            .iter()
            .zip(&supervision.mask)
            .map(|(row, row_mask)| {
                let seq_end = row_mask.iter().filter(|&&on| on).count() - 1;
                row[seq_end]
            })
            .collect();
        let last = Tensor::from_vec(last, batch, device)?;
        Ok((score + self.end_transitions.index_select(&last, 0)?)?)
    }

    /// Log partition function via the forward algorithm, shape `[batch]`.
    fn log_partition(&self, emissions: &Tensor, mask: &[Vec<bool>]) -> Result<Tensor> {
        let (batch, seq_len, num_labels) = emissions.dims3()?;
        let device = emissions.device();

        let mask_u8: Vec<u8> = mask.iter().flatten().map(|&on| u8::from(on)).collect();
        let mask_u8 = Tensor::from_vec(mask_u8, (batch, seq_len), device)?;

        // alpha[b, j]: log-sum of all partial paths ending in label j
        let mut alpha = emissions.i((.., 0, ..))?.broadcast_add(&self.start_transitions)?;
        let transitions = self.transitions.unsqueeze(0)?;

        for pos in 1..seq_len {
            let emitted = emissions.i((.., pos, ..))?.unsqueeze(1)?;
            let next = alpha
                .unsqueeze(2)?
                .broadcast_add(&transitions)?
                .broadcast_add(&emitted)?;
            let next = log_sum_exp(&next, 1)?;

            let on = mask_u8
                .i((.., pos))?
                .unsqueeze(1)?
                .broadcast_as((batch, num_labels))?
                .contiguous()?;
            alpha = on.where_cond(&next, &alpha)?;
        }

        let alpha = alpha.broadcast_add(&self.end_transitions)?;
        log_sum_exp(&alpha, 1)
    }
}

/// `log(sum(exp(xs)))` along `dim`, shifted by the maximum for stability.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let summed = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    Ok((summed + max)?.squeeze(dim)?)
}
