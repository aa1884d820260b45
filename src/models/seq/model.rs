use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{backend::Backend, Int, Tensor};
use burn::train::metric::{Adaptor, LossInput};
use burn::train::{TrainOutput, TrainStep, ValidStep};
use tracing::{debug, info};

use crate::data::{
    AdBatch, AdFeature, AdFeatureSet, CategoricalFeature, Interaction, TaobaoInteractionsSeqBatch,
    TaobaoSequenceDataset,
};
use crate::error::{self, GenAdRecError};
use crate::loss::{SampledSoftmaxLoss, SampledSoftmaxLossConfig};
use crate::modules::{AdTower, AdTowerConfig, RecurrentEncoder, RecurrentEncoderConfig};
use crate::utils::{index_tensor, int_values};

use super::alignment::{last_real_positions, NegativeSampling, SequenceAlignment, SequenceView};

/// Action slot shared by padded positions and browse events; its embedding
/// is held at zero.
const RESERVED_ACTION_SLOT: i64 = Interaction::PADDING_CODE + 1;

const MAX_ACTION_NORM: f32 = 1.0;

#[derive(Debug)]
pub struct SampledSoftmaxOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub num_targets: usize,
}

impl<B: Backend> Adaptor<LossInput<B>> for SampledSoftmaxOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

/// Next-click model over (ad, action) sequences trained with an
/// importance-corrected sampled softmax.
#[derive(Module, Debug)]
pub struct RNNSeqModel<B: Backend> {
    ad_embedding: AdTower<B>,
    action_embedding: Embedding<B>,
    rnn: RecurrentEncoder<B>,
    sampled_softmax: SampledSoftmaxLoss,
    rnn_batch_first: bool,
    action_slots: usize,
    non_click_negatives_only: bool,
    cross_row_negatives: bool,
}

impl<B: Backend> RNNSeqModel<B> {
    fn negative_sampling(&self) -> NegativeSampling {
        NegativeSampling {
            non_click_only: self.non_click_negatives_only,
            cross_row: self.cross_row_negatives,
        }
    }

    fn assert_action_codes(&self, view: &SequenceView) {
        if let Some(code) = view
            .is_click()
            .iter()
            .find(|&&code| code + 1 < 0 || (code + 1) as usize >= self.action_slots)
        {
            panic!(
                "interaction code {code} has no slot among {} action embeddings",
                self.action_slots
            );
        }
    }

    /// Action embeddings `[B, L, D]`, renormalized to at most unit L2 norm.
    /// The reserved slot maps to zero.
    fn action_embed(&self, is_click: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = is_click.dims();
        let action = is_click.add_scalar(1);
        let keep: Tensor<B, 3> = action
            .clone()
            .equal_elem(RESERVED_ACTION_SLOT)
            .bool_not()
            .float()
            .reshape([batch_size, seq_len, 1]);

        let action_emb = self.action_embedding.forward(action);
        let [_, _, d] = action_emb.dims();
        let norm = (action_emb.clone() * action_emb.clone()).sum_dim(2).sqrt();
        let scale = keep / norm.clamp_min(MAX_ACTION_NORM);

        action_emb * scale.repeat(2, d)
    }

    /// Ad embeddings `[B, L, D]` and the encoder input `ad + action`.
    fn embed(&self, batch: &TaobaoInteractionsSeqBatch<B>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let ad_emb = self.ad_embedding.forward(&batch.ad_feats);
        let input_emb = ad_emb.clone() + self.action_embed(batch.is_click.clone());
        (ad_emb, input_emb)
    }

    /// Runs the encoder on `[B, L, D]` whatever its configured layout.
    fn encode(&self, input_emb: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.rnn_batch_first {
            self.rnn.forward(input_emb)
        } else {
            self.rnn.forward(input_emb.swap_dims(0, 1)).swap_dims(0, 1)
        }
    }

    pub fn forward_loss(&self, batch: TaobaoInteractionsSeqBatch<B>) -> SampledSoftmaxOutput<B> {
        batch.assert_aligned();
        let view = SequenceView::from_batch(&batch);
        self.assert_action_codes(&view);

        let (ad_emb, input_emb) = self.embed(&batch);
        let output = self.encode(input_emb);
        let [batch_size, seq_len, d] = ad_emb.dims();
        let n = batch_size * seq_len;

        let extra = batch.train_index.as_ref().map(|index| {
            let adgroup = index
                .adgroup_id
                .as_ref()
                .unwrap_or_else(|| panic!("train_index must carry adgroup_id"));
            int_values(adgroup)
        });
        let alignment = SequenceAlignment::new(&view, extra.as_deref(), self.negative_sampling());

        if alignment.is_empty() {
            debug!(batch_size, seq_len, "batch has no click targets");
            return SampledSoftmaxOutput {
                loss: output.sum() * 0.0,
                num_targets: 0,
            };
        }
        debug!(
            targets = alignment.num_targets(),
            starved = alignment.starved_targets(),
            pool = alignment.pool_size(),
            "aligned click targets"
        );

        let device = ad_emb.device();
        let flat_ads = ad_emb.reshape([n, d]);
        let flat_out = output.reshape([n, d]);
        let q_probas = batch.ad_feats.rel_ad_freqs.reshape([n]);

        let (query_idx, target_idx, pos_neg_mask) = alignment.tensors::<B>(&device);
        let pos_emb = flat_out.select(0, query_idx);
        let target_emb = flat_ads.clone().select(0, target_idx.clone());
        let pos_q_probas = q_probas.clone().select(0, target_idx);

        let (neg_emb, neg_q_probas) = match batch.train_index {
            Some(index) => {
                let index_q = index.rel_ad_freqs.clone();
                let index_emb = self.ad_forward(index);
                (
                    Tensor::cat(vec![flat_ads, index_emb], 0),
                    Tensor::cat(vec![q_probas, index_q], 0),
                )
            }
            None => (flat_ads, q_probas),
        };

        let loss = self.sampled_softmax.forward(
            pos_emb,
            target_emb,
            neg_emb,
            pos_q_probas,
            neg_q_probas,
            pos_neg_mask,
        );

        SampledSoftmaxOutput {
            loss,
            num_targets: alignment.num_targets(),
        }
    }

    /// Training loss: sampled softmax of every click against its masked pool.
    pub fn forward(&self, batch: TaobaoInteractionsSeqBatch<B>) -> Tensor<B, 1> {
        self.forward_loss(batch).loss
    }

    /// Prediction (encoder output at the second-to-last real position) and
    /// target (ad embedding at the last real position), both `[B, D]`.
    pub fn eval_forward(
        &self,
        batch: TaobaoInteractionsSeqBatch<B>,
    ) -> error::Result<(Tensor<B, 2>, Tensor<B, 2>)> {
        batch.assert_aligned();
        let view = SequenceView::from_batch(&batch);
        self.assert_action_codes(&view);
        let (pred_pos, target_pos) = last_real_positions(&view)?;

        let (ad_emb, input_emb) = self.embed(&batch);
        let output = self.encode(input_emb);
        let [batch_size, seq_len, d] = ad_emb.dims();
        let n = batch_size * seq_len;

        let device = ad_emb.device();
        let pred_emb = output
            .reshape([n, d])
            .select(0, index_tensor(&pred_pos, &device));
        let target_emb = ad_emb
            .reshape([n, d])
            .select(0, index_tensor(&target_pos, &device));

        Ok((pred_emb, target_emb))
    }

    /// Embeds a pool of ads `[K]` into `[K, D]`, e.g. the full catalog.
    pub fn ad_forward(&self, ads: AdBatch<B, 1>) -> Tensor<B, 2> {
        self.ad_embedding.forward(&ads.unsqueeze()).squeeze(0)
    }
}

impl<B: AutodiffBackend> TrainStep<TaobaoInteractionsSeqBatch<B>, SampledSoftmaxOutput<B>>
    for RNNSeqModel<B>
{
    fn step(&self, batch: TaobaoInteractionsSeqBatch<B>) -> TrainOutput<SampledSoftmaxOutput<B>> {
        let item = self.forward_loss(batch);
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<TaobaoInteractionsSeqBatch<B>, SampledSoftmaxOutput<B>>
    for RNNSeqModel<B>
{
    fn step(&self, batch: TaobaoInteractionsSeqBatch<B>) -> SampledSoftmaxOutput<B> {
        self.forward_loss(batch)
    }
}

#[derive(Config, Debug)]
pub struct RNNSeqModelConfig {
    ad_categorical_feats: Vec<CategoricalFeature>,
    cell_type: String,
    rnn_input_size: usize,
    rnn_hidden_size: usize,

    #[config(default = "vec![64]")]
    embedder_hidden_dims: Vec<usize>,

    #[config(default = true)]
    rnn_batch_first: bool,

    #[config(default = 3)]
    action_slots: usize,

    #[config(default = true)]
    non_click_negatives_only: bool,

    #[config(default = false)]
    cross_row_negatives: bool,

    #[config(default = 1e-10)]
    min_q_proba: f32,
}

impl RNNSeqModelConfig {
    /// Sizes the ad tower from the catalog cardinalities of `ad_features` and
    /// the action table from the largest interaction code in `dataset`.
    pub fn from_dataset(
        dataset: &TaobaoSequenceDataset,
        ad_features: &AdFeatureSet,
        cell_type: &str,
        d_model: usize,
    ) -> error::Result<Self> {
        let categorical_feats = dataset.catalog().categorical_features(ad_features)?;
        let action_slots = dataset
            .max_interaction_code()
            .map_or(3, |code| (code + 2).max(3) as usize);

        Ok(Self::new(categorical_feats, cell_type.to_string(), d_model, d_model)
            .with_action_slots(action_slots))
    }

    /// Rejects a dataset whose interaction codes fall outside the action table.
    pub fn validate_dataset(&self, dataset: &TaobaoSequenceDataset) -> error::Result<()> {
        match dataset.max_interaction_code() {
            Some(code) if code + 1 >= self.action_slots as i64 => {
                Err(GenAdRecError::InvalidConfig(format!(
                    "interaction code {code} needs {} action slots, got {}",
                    code + 2,
                    self.action_slots
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn init<B: Backend>(&self) -> error::Result<RNNSeqModel<B>> {
        if self.rnn_input_size != self.rnn_hidden_size {
            return Err(GenAdRecError::InvalidConfig(format!(
                "rnn_hidden_size ({}) must equal rnn_input_size ({})",
                self.rnn_hidden_size, self.rnn_input_size
            )));
        }
        if self.action_slots < 3 {
            return Err(GenAdRecError::InvalidConfig(format!(
                "at least 3 action slots are required, got {}",
                self.action_slots
            )));
        }
        if !(self.min_q_proba > 0.0) {
            return Err(GenAdRecError::InvalidConfig(
                "min_q_proba must be positive".to_string(),
            ));
        }
        if !self
            .ad_categorical_feats
            .iter()
            .any(|feat| feat.feature == AdFeature::Adgroup)
        {
            return Err(GenAdRecError::MissingFeature("adgroup"));
        }

        let ad_embedding =
            AdTowerConfig::new(self.ad_categorical_feats.clone(), self.rnn_input_size)
                .with_hidden_dims(self.embedder_hidden_dims.clone())
                .init()?;
        let action_embedding = EmbeddingConfig::new(self.action_slots, self.rnn_input_size).init();
        let rnn = RecurrentEncoderConfig::new(
            self.cell_type.clone(),
            self.rnn_input_size,
            self.rnn_hidden_size,
        )
        .with_batch_first(self.rnn_batch_first)
        .init()?;
        let sampled_softmax = SampledSoftmaxLossConfig::new()
            .with_min_q_proba(self.min_q_proba)
            .init();

        info!(
            cell_type = %self.cell_type,
            d_model = self.rnn_input_size,
            features = self.ad_categorical_feats.len(),
            "initialized sequence model"
        );

        Ok(RNNSeqModel {
            ad_embedding,
            action_embedding,
            rnn,
            sampled_softmax,
            rnn_batch_first: self.rnn_batch_first,
            action_slots: self.action_slots,
            non_click_negatives_only: self.non_click_negatives_only,
            cross_row_negatives: self.cross_row_negatives,
        })
    }
}
