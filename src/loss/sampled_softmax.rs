use burn::config::Config;
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use crate::utils::log_sum_exp;

/// Importance-corrected sampled softmax.
///
/// For each of the `N` examples the logits are `[s⁺, s₁, …, s_M]` where
/// `s⁺ = <pos, target> - log q⁺` and `sⱼ = <pos, negⱼ> - log qⱼ`, and the
/// loss is the cross-entropy of the positive at index 0, averaged over `N`.
///
/// Candidates outside `pos_neg_mask` or with `qⱼ = 0` get a `-inf` logit and
/// carry no probability mass. An example left without any valid negative
/// therefore contributes a loss of exactly `0` and still counts towards the
/// mean. A positive with `q⁺ = 0` uses `min_q_proba` instead.
#[derive(Module, Clone, Debug)]
pub struct SampledSoftmaxLoss {
    min_q_proba: f32,
}

impl SampledSoftmaxLoss {
    pub fn forward<B: Backend>(
        &self,
        pos_emb: Tensor<B, 2>,      // [N, D]
        target_emb: Tensor<B, 2>,   // [N, D]
        neg_emb: Tensor<B, 2>,      // [M, D]
        pos_q_probas: Tensor<B, 1>, // [N]
        neg_q_probas: Tensor<B, 1>, // [M]
        pos_neg_mask: Tensor<B, 2>, // [N, M]
    ) -> Tensor<B, 1> {
        let [n, d] = pos_emb.dims();
        let [m, d_neg] = neg_emb.dims();

        assert_eq!(target_emb.dims(), [n, d], "target_emb must match pos_emb");
        assert_eq!(d_neg, d, "neg_emb must share the embedding dimension");
        assert_eq!(pos_q_probas.dims(), [n], "pos_q_probas must have one entry per example");
        assert_eq!(neg_q_probas.dims(), [m], "neg_q_probas must have one entry per candidate");
        assert_eq!(pos_neg_mask.dims(), [n, m], "pos_neg_mask must be [N, M]");

        if n == 0 {
            debug!("sampled softmax called without positives");
            return (pos_emb.sum() + neg_emb.sum()) * 0.0;
        }

        let pos_log_q = pos_q_probas.clamp_min(self.min_q_proba).log().reshape([n, 1]);
        let pos_logits = (pos_emb.clone() * target_emb).sum_dim(1) - pos_log_q;

        if m == 0 {
            return pos_logits.sum() * 0.0;
        }

        let sampled = neg_q_probas.clone().greater_elem(0.0).float();
        let neg_log_q: Tensor<B, 2> = neg_q_probas
            .clamp_min(self.min_q_proba)
            .log()
            .reshape([1, m])
            .repeat(0, n);
        let valid = pos_neg_mask * sampled.reshape([1, m]).repeat(0, n);
        let invalid = valid.lower_equal_elem(0.0);

        let neg_logits = pos_emb.matmul(neg_emb.transpose()) - neg_log_q;
        let neg_logits = neg_logits.mask_fill(invalid, f32::NEG_INFINITY);

        let logits = Tensor::cat(vec![pos_logits.clone(), neg_logits], 1);
        let loss = log_sum_exp(logits) - pos_logits;

        loss.mean()
    }
}

#[derive(Config, Debug)]
pub struct SampledSoftmaxLossConfig {
    #[config(default = 1e-10)]
    min_q_proba: f32,
}

impl SampledSoftmaxLossConfig {
    pub fn init(&self) -> SampledSoftmaxLoss {
        assert!(self.min_q_proba > 0.0, "min_q_proba must be positive");
        SampledSoftmaxLoss {
            min_q_proba: self.min_q_proba,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::float_tensor;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    fn loss() -> SampledSoftmaxLoss {
        SampledSoftmaxLossConfig::new().init()
    }

    fn softplus(x: f32) -> f32 {
        (1.0 + x.exp()).ln()
    }

    #[test]
    fn single_negative_reduces_to_binary_cross_entropy() {
        let device = Default::default();
        let pos = float_tensor::<TestBackend, 2>(vec![1.0, 2.0], [1, 2], &device);
        let target = float_tensor::<TestBackend, 2>(vec![0.5, 0.5], [1, 2], &device);
        let neg = float_tensor::<TestBackend, 2>(vec![1.0, -1.0, 3.0, 3.0], [2, 2], &device);
        let pos_q = float_tensor::<TestBackend, 1>(vec![0.2], [1], &device);
        let neg_q = float_tensor::<TestBackend, 1>(vec![0.1, 0.3], [2], &device);
        let mask = float_tensor::<TestBackend, 2>(vec![1.0, 0.0], [1, 2], &device);

        let out = loss()
            .forward(pos, target, neg, pos_q, neg_q, mask)
            .into_scalar();

        let s_pos = 1.5 - 0.2f32.ln();
        let s_neg = -1.0 - 0.1f32.ln();
        let expected = softplus(s_neg - s_pos);
        assert!((out - expected).abs() < 1e-5, "{out} != {expected}");
    }

    #[test]
    fn uniform_log_q_shift_leaves_loss_unchanged() {
        let device = Default::default();
        let run = |scale: f32| {
            let pos = float_tensor::<TestBackend, 2>(vec![0.3, -0.2, 0.7, 0.1], [2, 2], &device);
            let target = float_tensor::<TestBackend, 2>(vec![1.0, 0.0, 0.0, 1.0], [2, 2], &device);
            let neg = float_tensor::<TestBackend, 2>(
                vec![0.5, 0.5, -1.0, 2.0, 0.0, -0.3],
                [3, 2],
                &device,
            );
            let pos_q =
                float_tensor::<TestBackend, 1>(vec![0.05 * scale, 0.1 * scale], [2], &device);
            let neg_q = float_tensor::<TestBackend, 1>(
                vec![0.02 * scale, 0.2 * scale, 0.01 * scale],
                [3],
                &device,
            );
            let mask = float_tensor::<TestBackend, 2>(
                vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0],
                [2, 3],
                &device,
            );
            loss()
                .forward(pos, target, neg, pos_q, neg_q, mask)
                .into_scalar()
        };

        let base = run(1.0);
        let shifted = run(0.25);
        assert!((base - shifted).abs() < 1e-5, "{base} != {shifted}");
    }

    #[test]
    fn zero_probability_candidates_are_masked_out() {
        let device = Default::default();
        let pos = float_tensor::<TestBackend, 2>(vec![1.0, 0.0], [1, 2], &device);
        let target = float_tensor::<TestBackend, 2>(vec![0.0, 0.0], [1, 2], &device);
        let neg = float_tensor::<TestBackend, 2>(vec![5.0, 0.0, 0.0, 1.0], [2, 2], &device);
        let pos_q = float_tensor::<TestBackend, 1>(vec![0.5], [1], &device);
        let neg_q = float_tensor::<TestBackend, 1>(vec![0.0, 0.5], [2], &device);
        let mask = float_tensor::<TestBackend, 2>(vec![1.0, 1.0], [1, 2], &device);

        let out = loss()
            .forward(pos, target, neg, pos_q, neg_q, mask)
            .into_scalar();

        // Only the second candidate survives, and it ties with the positive.
        let expected = 2.0f32.ln();
        assert!(out.is_finite());
        assert!((out - expected).abs() < 1e-5, "{out} != {expected}");
    }

    #[test]
    fn example_without_negatives_has_zero_loss_and_finite_gradients() {
        type AutodiffBackend = Autodiff<TestBackend>;
        let device = Default::default();

        let pos = float_tensor::<AutodiffBackend, 2>(vec![1.0, 2.0, -1.0, 0.5], [2, 2], &device)
            .require_grad();
        let target = float_tensor::<AutodiffBackend, 2>(vec![0.1, 0.2, 0.3, 0.4], [2, 2], &device);
        let neg = float_tensor::<AutodiffBackend, 2>(vec![1.0, 1.0, 2.0, -2.0], [2, 2], &device)
            .require_grad();
        let pos_q = float_tensor::<AutodiffBackend, 1>(vec![0.0, 0.1], [2], &device);
        let neg_q = float_tensor::<AutodiffBackend, 1>(vec![0.2, 0.2], [2], &device);
        let mask =
            float_tensor::<AutodiffBackend, 2>(vec![0.0, 0.0, 1.0, 1.0], [2, 2], &device);

        let out = loss().forward(pos.clone(), target, neg.clone(), pos_q, neg_q, mask);
        let value = out.clone().into_scalar();
        assert!(value.is_finite());

        // First example is starved: the mean only carries the second one.
        let s_pos = (-1.0 * 0.3 + 0.5 * 0.4) - 0.1f32.ln();
        let s1 = (-1.0 * 1.0 + 0.5 * 1.0) - 0.2f32.ln();
        let s2 = (-1.0 * 2.0 + 0.5 * -2.0) - 0.2f32.ln();
        let lse = (s_pos.exp() + s1.exp() + s2.exp()).ln();
        let expected = (0.0 + (lse - s_pos)) / 2.0;
        assert!((value - expected).abs() < 1e-4, "{value} != {expected}");

        let grads = out.backward();
        let pos_grad = pos.grad(&grads).expect("pos_emb gradient");
        let neg_grad = neg.grad(&grads).expect("neg_emb gradient");
        assert!(pos_grad.to_data().value.iter().all(|g| g.is_finite()));
        assert!(neg_grad.to_data().value.iter().all(|g| g.is_finite()));
    }

    #[test]
    #[should_panic(expected = "pos_neg_mask must be [N, M]")]
    fn mismatched_mask_panics() {
        let device = Default::default();
        let pos = float_tensor::<TestBackend, 2>(vec![1.0, 0.0], [1, 2], &device);
        let target = float_tensor::<TestBackend, 2>(vec![1.0, 0.0], [1, 2], &device);
        let neg = float_tensor::<TestBackend, 2>(vec![5.0, 0.0, 0.0, 1.0], [2, 2], &device);
        let pos_q = float_tensor::<TestBackend, 1>(vec![0.5], [1], &device);
        let neg_q = float_tensor::<TestBackend, 1>(vec![0.5, 0.5], [2], &device);
        let mask = float_tensor::<TestBackend, 2>(vec![1.0, 1.0, 1.0], [1, 3], &device);

        loss().forward(pos, target, neg, pos_q, neg_q, mask);
    }
}
