pub mod alignment;
pub mod model;

pub use alignment::{last_real_positions, NegativeSampling, SequenceAlignment, SequenceView};
pub use model::{RNNSeqModel, RNNSeqModelConfig, SampledSoftmaxOutput};
