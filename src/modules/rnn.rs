use burn::config::Config;
use burn::module::Module;
use burn::nn::gru::{Gru, GruConfig};
use burn::nn::{Lstm, LstmConfig};
use burn::tensor::{backend::Backend, Tensor};
use std::str::FromStr;

use crate::error::{self, GenAdRecError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellType {
    Lstm,
    Gru,
}

impl FromStr for CellType {
    type Err = GenAdRecError;

    fn from_str(s: &str) -> error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lstm" => Ok(CellType::Lstm),
            "gru" => Ok(CellType::Gru),
            _ => Err(GenAdRecError::UnknownCellType(s.to_string())),
        }
    }
}

/// Sequence-to-sequence recurrent encoder returning the hidden state at
/// every position.
#[derive(Module, Debug)]
pub struct RecurrentEncoder<B: Backend> {
    lstm: Option<Lstm<B>>,
    gru: Option<Gru<B>>,
    batch_first: bool,
}

impl<B: Backend> RecurrentEncoder<B> {
    /// `[B, L, D] -> [B, L, H]`, or `[L, B, D] -> [L, B, H]` when not batch first.
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let x = if self.batch_first { x } else { x.swap_dims(0, 1) };

        let hidden_states = match (&self.lstm, &self.gru) {
            (Some(lstm), _) => {
                let (_, hidden_states) = lstm.forward(x, None);
                hidden_states
            }
            (None, Some(gru)) => gru.forward(x, None),
            (None, None) => unreachable!("recurrent encoder built without a cell"),
        };

        if self.batch_first {
            hidden_states
        } else {
            hidden_states.swap_dims(0, 1)
        }
    }
}

#[derive(Config, Debug)]
pub struct RecurrentEncoderConfig {
    cell_type: String,
    d_input: usize,
    d_hidden: usize,

    #[config(default = true)]
    batch_first: bool,

    #[config(default = true)]
    bias: bool,
}

impl RecurrentEncoderConfig {
    pub fn init<B: Backend>(&self) -> error::Result<RecurrentEncoder<B>> {
        let (lstm, gru) = match self.cell_type.parse::<CellType>()? {
            CellType::Lstm => (
                Some(LstmConfig::new(self.d_input, self.d_hidden, self.bias).init()),
                None,
            ),
            CellType::Gru => (
                None,
                Some(GruConfig::new(self.d_input, self.d_hidden, self.bias).init()),
            ),
        };

        Ok(RecurrentEncoder {
            lstm,
            gru,
            batch_first: self.batch_first,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn both_cells_preserve_sequence_length() {
        for cell in ["lstm", "GRU"] {
            let rnn: RecurrentEncoder<TestBackend> =
                RecurrentEncoderConfig::new(cell.to_string(), 4, 6).init().unwrap();
            let x: Tensor<TestBackend, 3> = Tensor::ones([2, 5, 4]);
            assert_eq!(rnn.forward(x).dims(), [2, 5, 6]);
        }
    }

    #[test]
    fn sequence_first_layout_is_respected() {
        let rnn: RecurrentEncoder<TestBackend> =
            RecurrentEncoderConfig::new("lstm".to_string(), 4, 4)
                .with_batch_first(false)
            .init()
            .unwrap();
        let x: Tensor<TestBackend, 3> = Tensor::ones([5, 2, 4]);
        assert_eq!(rnn.forward(x).dims(), [5, 2, 4]);
    }

    #[test]
    fn unknown_cell_is_rejected() {
        let result =
            RecurrentEncoderConfig::new("transformer".to_string(), 4, 4).init::<TestBackend>();
        assert!(matches!(result, Err(GenAdRecError::UnknownCellType(_))));
    }
}
