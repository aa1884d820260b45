use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Bool, Int, Tensor};

use crate::utils::{log_softmax, weighted_average};

/// Target value meaning "no label for this head".
pub const IGNORE_TARGET: i64 = -1;

/// Logits of one categorical head and the classes it may never predict.
#[derive(Clone, Debug)]
pub struct LogitHead<B: Backend> {
    pub logits: Tensor<B, 2>,                   // [N, C]
    pub disallowed: Option<Tensor<B, 2, Bool>>, // [N, C]
}

impl<B: Backend> LogitHead<B> {
    pub fn new(logits: Tensor<B, 2>) -> Self {
        Self {
            logits,
            disallowed: None,
        }
    }

    pub fn with_disallowed(mut self, disallowed: Tensor<B, 2, Bool>) -> Self {
        self.disallowed = Some(disallowed);
        self
    }
}

/// Sum of per-head cross-entropies over a shared `[N, F]` target matrix.
#[derive(Module, Clone, Debug)]
pub struct MaskedCrossEntropyLoss {
    penalize_masked: bool,
}

impl MaskedCrossEntropyLoss {
    pub fn forward<B: Backend, const F: usize>(
        &self,
        heads: [LogitHead<B>; F],
        targets: Tensor<B, 2, Int>, // [N, F]
    ) -> Tensor<B, 1> {
        let [n, n_cols] = targets.dims();
        assert_eq!(n_cols, F, "as many heads as target columns must be provided");

        let mut loss: Option<Tensor<B, 1>> = None;
        for (i, head) in heads.into_iter().enumerate() {
            let target = targets.clone().slice([0..n, i..i + 1]);
            let head_loss = self.head_loss(head, target);
            loss = Some(match loss {
                Some(acc) => acc + head_loss,
                None => head_loss,
            });
        }

        match loss {
            Some(loss) => loss,
            None => Tensor::zeros([1]).to_device(&targets.device()),
        }
    }

    fn head_loss<B: Backend>(&self, head: LogitHead<B>, target: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let LogitHead { logits, disallowed } = head;

        match disallowed {
            None => cross_entropy(logits, target),
            Some(disallowed) => {
                assert_eq!(
                    logits.dims(),
                    disallowed.dims(),
                    "logit and logit_mask must have same shape"
                );

                // Unnormalized: exp(logit) summed over disallowed classes.
                let penalty = if self.penalize_masked {
                    let mass = (logits.clone().exp() * disallowed.clone().float()).sum_dim(1);
                    Some(mass.mean())
                } else {
                    None
                };

                let masked = logits.mask_fill(disallowed, f32::NEG_INFINITY);
                let categorical = cross_entropy(masked, target);

                match penalty {
                    Some(penalty) => penalty + categorical,
                    None => categorical,
                }
            }
        }
    }
}

/// Mean cross-entropy over the rows whose target is not [`IGNORE_TARGET`].
/// A column without any labelled row yields `0`.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, target: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let labelled = target.clone().equal_elem(IGNORE_TARGET).bool_not().float();
    let target = target.clamp_min(0);

    let picked = log_softmax(logits).gather(1, target);
    weighted_average(picked.neg(), labelled)
}

#[derive(Config, Debug)]
pub struct MaskedCrossEntropyLossConfig {
    #[config(default = true)]
    penalize_masked: bool,
}

impl MaskedCrossEntropyLossConfig {
    pub fn init(&self) -> MaskedCrossEntropyLoss {
        MaskedCrossEntropyLoss {
            penalize_masked: self.penalize_masked,
        }
    }
}
