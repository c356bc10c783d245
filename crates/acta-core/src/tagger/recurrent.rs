use candle_core::{Module, Tensor};
use candle_nn::rnn::{GRU, GRUConfig, GRUState, RNN, gru};
use candle_nn::VarBuilder;

use crate::error::Result;

/// Bidirectional GRU over `[batch, seq_len, input_size]`.
///
/// Each direction starts from a zero state on every call. The output at each
/// position is the forward state followed by the backward state, so it is
/// `2 * hidden_size` wide.
#[derive(Debug, Clone)]
pub struct BiGru {
    forward: GRU,
    backward: GRU,
    hidden_size: usize,
}

impl BiGru {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let forward = gru(input_size, hidden_size, GRUConfig::default(), vb.pp("forward"))?;
        let backward = gru(input_size, hidden_size, GRUConfig::default(), vb.pp("backward"))?;
        Ok(Self {
            forward,
            backward,
            hidden_size,
        })
    }

    pub fn output_size(&self) -> usize {
        2 * self.hidden_size
    }
}

/// Stack per-step hidden states into `[batch, seq_len, hidden_size]`.
fn stack_states(states: &[GRUState]) -> candle_core::Result<Tensor> {
    let hidden: Vec<Tensor> = states.iter().map(|state| state.h().clone()).collect();
    Tensor::stack(&hidden, 1)
}

fn reverse_time(xs: &Tensor) -> candle_core::Result<Tensor> {
    let seq_len = xs.dim(1)?;
    let order: Vec<u32> = (0..seq_len as u32).rev().collect();
    let order = Tensor::from_vec(order, seq_len, xs.device())?;
    xs.index_select(&order, 1)
}

impl Module for BiGru {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;
        if seq_len == 0 {
            return Tensor::zeros((batch, 0, self.output_size()), xs.dtype(), xs.device());
        }

        let xs = xs.contiguous()?;
        let ahead = stack_states(&self.forward.seq(&xs)?)?;
        let behind = stack_states(&self.backward.seq(&reverse_time(&xs)?)?)?;
        let behind = reverse_time(&behind)?;

        Tensor::cat(&[ahead, behind], 2)
    }
}
