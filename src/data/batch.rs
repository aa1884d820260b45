use burn::tensor::{backend::Backend, Bool, Int, Tensor};

use super::features::AdFeature;

/// Parallel per-ad fields. `D = 1` is a pool of ads `[K]`, `D = 2` a batch of
/// sequences `[B, L]`. Identifier fields are `None` when the feature was not
/// requested; `rel_ad_freqs` is always present.
#[derive(Clone, Debug)]
pub struct AdBatch<B: Backend, const D: usize> {
    pub adgroup_id: Option<Tensor<B, D, Int>>,
    pub cate_id: Option<Tensor<B, D, Int>>,
    pub brand_id: Option<Tensor<B, D, Int>>,
    pub customer_id: Option<Tensor<B, D, Int>>,
    pub campaign_id: Option<Tensor<B, D, Int>>,
    pub rel_ad_freqs: Tensor<B, D>,
}

impl<B: Backend, const D: usize> AdBatch<B, D> {
    pub fn dims(&self) -> [usize; D] {
        self.rel_ad_freqs.dims()
    }

    pub fn feature(&self, feature: AdFeature) -> Option<&Tensor<B, D, Int>> {
        match feature {
            AdFeature::Adgroup => self.adgroup_id.as_ref(),
            AdFeature::Cate => self.cate_id.as_ref(),
            AdFeature::Brand => self.brand_id.as_ref(),
            AdFeature::Customer => self.customer_id.as_ref(),
            AdFeature::Campaign => self.campaign_id.as_ref(),
        }
    }

    fn map_fields<const D2: usize>(
        self,
        ids: impl Fn(Tensor<B, D, Int>) -> Tensor<B, D2, Int>,
        freqs: impl Fn(Tensor<B, D>) -> Tensor<B, D2>,
    ) -> AdBatch<B, D2> {
        AdBatch {
            adgroup_id: self.adgroup_id.map(&ids),
            cate_id: self.cate_id.map(&ids),
            brand_id: self.brand_id.map(&ids),
            customer_id: self.customer_id.map(&ids),
            campaign_id: self.campaign_id.map(&ids),
            rel_ad_freqs: freqs(self.rel_ad_freqs),
        }
    }
}

impl<B: Backend> AdBatch<B, 1> {
    pub fn num_ads(&self) -> usize {
        self.dims()[0]
    }

    /// Views a pool `[K]` as a single sequence `[1, K]`.
    pub fn unsqueeze(self) -> AdBatch<B, 2> {
        self.map_fields(|ids| ids.unsqueeze(), |freqs| freqs.unsqueeze())
    }
}

impl<B: Backend> AdBatch<B, 2> {
    /// Flattens `[B, L]` into a pool of `B * L` ads, row-major.
    pub fn flatten(self) -> AdBatch<B, 1> {
        let [batch_size, seq_len] = self.dims();
        let n = batch_size * seq_len;
        self.map_fields(|ids| ids.reshape([n]), |freqs| freqs.reshape([n]))
    }
}

/// Per-user attributes, one scalar per user per requested field.
#[derive(Clone, Debug)]
pub struct UserBatch<B: Backend> {
    pub user: Option<Tensor<B, 1, Int>>,
    pub gender: Option<Tensor<B, 1, Int>>,
    pub age: Option<Tensor<B, 1, Int>>,
    pub shopping: Option<Tensor<B, 1, Int>>,
    pub occupation: Option<Tensor<B, 1, Int>>,
}

#[derive(Clone, Debug)]
pub struct TaobaoInteractionsSeqBatch<B: Backend> {
    pub user_feats: UserBatch<B>,                 // [B]
    pub ad_feats: AdBatch<B, 2>,                  // [B, L]
    pub is_click: Tensor<B, 2, Int>,              // [B, L]
    pub timestamp: Tensor<B, 2, Int>,             // [B, L]
    pub is_padding: Tensor<B, 2, Bool>,           // [B, L]
    pub train_index: Option<AdBatch<B, 1>>,       // [K], augmented training only
}

impl<B: Backend> TaobaoInteractionsSeqBatch<B> {
    pub fn dims(&self) -> [usize; 2] {
        self.is_click.dims()
    }

    /// Panics unless every per-position field shares the `[B, L]` shape.
    pub fn assert_aligned(&self) {
        let dims = self.dims();
        assert_eq!(self.ad_feats.dims(), dims, "ad_feats and is_click must have the same shape");
        assert_eq!(self.timestamp.dims(), dims, "timestamp and is_click must have the same shape");
        assert_eq!(
            self.is_padding.dims(),
            dims,
            "is_padding and is_click must have the same shape"
        );
        for feature in [
            AdFeature::Adgroup,
            AdFeature::Cate,
            AdFeature::Brand,
            AdFeature::Customer,
            AdFeature::Campaign,
        ] {
            if let Some(ids) = self.ad_feats.feature(feature) {
                assert_eq!(ids.dims(), dims, "ad feature `{feature}` must have shape [B, L]");
            }
        }
    }
}
