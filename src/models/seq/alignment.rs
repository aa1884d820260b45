use burn::tensor::{backend::Backend, Int, Tensor};

use crate::data::{Interaction, TaobaoInteractionsSeqBatch};
use crate::error::{GenAdRecError, Result};
use crate::utils::{bool_values, float_tensor, index_tensor, int_values};

/// Host copy of the `[B, L]` fields that drive target selection and
/// negative masking, row-major.
#[derive(Clone, Debug)]
pub struct SequenceView {
    batch_size: usize,
    seq_len: usize,
    is_click: Vec<i64>,
    timestamp: Vec<i64>,
    is_padding: Vec<bool>,
    adgroup: Vec<i64>,
}

impl SequenceView {
    pub fn new(
        [batch_size, seq_len]: [usize; 2],
        is_click: Vec<i64>,
        timestamp: Vec<i64>,
        is_padding: Vec<bool>,
        adgroup: Vec<i64>,
    ) -> Self {
        let n = batch_size * seq_len;
        assert_eq!(is_click.len(), n, "is_click must have B * L entries");
        assert_eq!(timestamp.len(), n, "timestamp must have B * L entries");
        assert_eq!(is_padding.len(), n, "is_padding must have B * L entries");
        assert_eq!(adgroup.len(), n, "adgroup_id must have B * L entries");

        Self {
            batch_size,
            seq_len,
            is_click,
            timestamp,
            is_padding,
            adgroup,
        }
    }

    pub fn from_batch<B: Backend>(batch: &TaobaoInteractionsSeqBatch<B>) -> Self {
        let adgroup = batch
            .ad_feats
            .adgroup_id
            .as_ref()
            .unwrap_or_else(|| panic!("sequence batches must carry adgroup_id"));

        Self::new(
            batch.dims(),
            int_values(&batch.is_click),
            int_values(&batch.timestamp),
            bool_values(&batch.is_padding),
            int_values(adgroup),
        )
    }

    pub fn dims(&self) -> [usize; 2] {
        [self.batch_size, self.seq_len]
    }

    pub fn is_click(&self) -> &[i64] {
        &self.is_click
    }

    fn flat(&self, row: usize, pos: usize) -> usize {
        row * self.seq_len + pos
    }

    /// Number of non-padded positions in `row`. Padding is trailing.
    pub fn real_len(&self, row: usize) -> usize {
        let start = self.flat(row, 0);
        self.is_padding[start..start + self.seq_len]
            .iter()
            .filter(|padded| !**padded)
            .count()
    }

    fn is_target(&self, idx: usize) -> bool {
        !self.is_padding[idx] && self.is_click[idx] == Interaction::CLICK_CODE
    }
}

/// Which pool candidates may serve as negatives for a click target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegativeSampling {
    /// Only impressions without a click are negatives.
    pub non_click_only: bool,
    /// Candidates may come from other users' rows, otherwise only from the
    /// target's own row.
    pub cross_row: bool,
}

impl Default for NegativeSampling {
    fn default() -> Self {
        Self {
            non_click_only: true,
            cross_row: false,
        }
    }
}

impl NegativeSampling {
    /// Whether in-batch position `candidate` is a valid negative for the
    /// click at `target`, both flat `[B * L]` indices.
    pub fn is_valid(&self, view: &SequenceView, target: usize, candidate: usize) -> bool {
        let same_row = target / view.seq_len == candidate / view.seq_len;

        (self.cross_row || same_row)
            && !view.is_padding[candidate]
            && view.timestamp[candidate] <= view.timestamp[target]
            && view.adgroup[candidate] != view.adgroup[target]
            && (!self.non_click_only || view.is_click[candidate] == Interaction::NON_CLICK_CODE)
    }
}

/// Shifted query/target pairs of a batch and the validity mask of every
/// target against the negative pool.
///
/// Position `t` of a row is a target when it is a real click; its query is
/// the encoder output at `t - 1`. The pool is every position of the batch,
/// flattened row-major to `[B * L]`, followed by the optional extra
/// candidates (ad-group ids of an auxiliary index). Extra candidates are
/// valid unless they share the target's ad-group.
#[derive(Clone, Debug)]
pub struct SequenceAlignment {
    pool_size: usize,
    query_positions: Vec<usize>,
    target_positions: Vec<usize>,
    pos_neg_mask: Vec<f32>,
}

impl SequenceAlignment {
    pub fn new(view: &SequenceView, extra: Option<&[i64]>, sampling: NegativeSampling) -> Self {
        let [batch_size, seq_len] = view.dims();
        let in_batch = batch_size * seq_len;
        let extra = extra.unwrap_or(&[]);
        let pool_size = in_batch + extra.len();

        let mut query_positions = Vec::new();
        let mut target_positions = Vec::new();
        let mut pos_neg_mask = Vec::new();

        for row in 0..batch_size {
            for pos in 1..seq_len {
                let target = view.flat(row, pos);
                if !view.is_target(target) {
                    continue;
                }

                query_positions.push(target - 1);
                target_positions.push(target);

                let target_adgroup = view.adgroup[target];
                pos_neg_mask.extend((0..in_batch).map(|candidate| {
                    if sampling.is_valid(view, target, candidate) {
                        1.0
                    } else {
                        0.0
                    }
                }));
                pos_neg_mask.extend(extra.iter().map(|adgroup| {
                    if *adgroup != target_adgroup {
                        1.0
                    } else {
                        0.0
                    }
                }));
            }
        }

        Self {
            pool_size,
            query_positions,
            target_positions,
            pos_neg_mask,
        }
    }

    pub fn num_targets(&self) -> usize {
        self.target_positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target_positions.is_empty()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn query_positions(&self) -> &[usize] {
        &self.query_positions
    }

    pub fn target_positions(&self) -> &[usize] {
        &self.target_positions
    }

    /// Mask row of the `i`-th target over the pool.
    pub fn mask_row(&self, i: usize) -> &[f32] {
        &self.pos_neg_mask[i * self.pool_size..(i + 1) * self.pool_size]
    }

    /// Targets whose mask row has no valid candidate at all.
    pub fn starved_targets(&self) -> usize {
        (0..self.num_targets())
            .filter(|&i| self.mask_row(i).iter().all(|valid| *valid == 0.0))
            .count()
    }

    /// Query indices `[P]`, target indices `[P]` and mask `[P, pool]`.
    pub fn tensors<B: Backend>(
        &self,
        device: &B::Device,
    ) -> (Tensor<B, 1, Int>, Tensor<B, 1, Int>, Tensor<B, 2>) {
        (
            index_tensor(&self.query_positions, device),
            index_tensor(&self.target_positions, device),
            float_tensor(
                self.pos_neg_mask.clone(),
                [self.num_targets(), self.pool_size],
                device,
            ),
        )
    }
}

/// Per row, the flat index of the prediction (second-to-last real position)
/// and of the target (last real position).
pub fn last_real_positions(view: &SequenceView) -> Result<(Vec<usize>, Vec<usize>)> {
    let [batch_size, _] = view.dims();
    let mut pred = Vec::with_capacity(batch_size);
    let mut target = Vec::with_capacity(batch_size);

    for row in 0..batch_size {
        let len = view.real_len(row);
        if len < 2 {
            return Err(GenAdRecError::SequenceTooShort { row, len });
        }
        pred.push(view.flat(row, len - 2));
        target.push(view.flat(row, len - 1));
    }

    Ok((pred, target))
}
