pub mod masked_cross_entropy;
pub mod sampled_softmax;

pub use masked_cross_entropy::{
    cross_entropy, LogitHead, MaskedCrossEntropyLoss, MaskedCrossEntropyLossConfig, IGNORE_TARGET,
};
pub use sampled_softmax::{SampledSoftmaxLoss, SampledSoftmaxLossConfig};
