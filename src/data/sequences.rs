use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::batch::{AdBatch, TaobaoInteractionsSeqBatch, UserBatch};
use super::catalog::AdCatalog;
use super::features::{AdFeature, AdFeatureSet, Feature, Interaction, UserFeature, UserFeatureSet};
use crate::error::{self, GenAdRecError};
use crate::utils::{bool_tensor, float_tensor, int_tensor};

/// One user's interaction history, oldest first, without padding.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaobaoSequenceItem {
    pub user: i64,
    #[serde(default)]
    pub gender: i64,
    #[serde(default)]
    pub age: i64,
    #[serde(default)]
    pub shopping: i64,
    #[serde(default)]
    pub occupation: i64,
    pub adgroup: Vec<i64>,
    #[serde(default)]
    pub cate: Vec<i64>,
    #[serde(default)]
    pub brand: Vec<i64>,
    #[serde(default)]
    pub customer: Vec<i64>,
    #[serde(default)]
    pub campaign: Vec<i64>,
    pub rel_ad_freqs: Vec<f32>,
    pub interactions: Vec<i64>,
    pub timestamps: Vec<i64>,
}

impl TaobaoSequenceItem {
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn ad_column(&self, feature: AdFeature) -> &[i64] {
        match feature {
            AdFeature::Adgroup => &self.adgroup,
            AdFeature::Cate => &self.cate,
            AdFeature::Brand => &self.brand,
            AdFeature::Customer => &self.customer,
            AdFeature::Campaign => &self.campaign,
        }
    }

    pub fn user_value(&self, feature: UserFeature) -> i64 {
        match feature {
            UserFeature::User => self.user,
            UserFeature::Gender => self.gender,
            UserFeature::Age => self.age,
            UserFeature::Shopping => self.shopping,
            UserFeature::Occupation => self.occupation,
        }
    }

    fn validate(&self, item: usize, ad_features: &AdFeatureSet) -> error::Result<()> {
        let expected = self.len();
        let ragged = |field: &'static str, len: usize| {
            if len != expected {
                Err(GenAdRecError::RaggedItem {
                    item,
                    field,
                    len,
                    expected,
                })
            } else {
                Ok(())
            }
        };

        ragged("rel_ad_freqs", self.rel_ad_freqs.len())?;
        ragged("timestamps", self.timestamps.len())?;
        for feature in ad_features.iter() {
            let column = self.ad_column(feature);
            if column.is_empty() && expected > 0 {
                return Err(GenAdRecError::MissingFeature(feature.name()));
            }
            ragged(feature.name(), column.len())?;
        }

        for code in &self.interactions {
            Interaction::try_from(*code)?;
        }

        if let Some(position) = self.timestamps.windows(2).position(|pair| pair[1] < pair[0]) {
            return Err(GenAdRecError::UnsortedTimestamps {
                item,
                position: position + 1,
            });
        }

        Ok(())
    }
}

/// Validated interaction histories plus the catalog they index into.
pub struct TaobaoSequenceDataset {
    sequences: InMemDataset<TaobaoSequenceItem>,
    catalog: Arc<AdCatalog>,
}

impl TaobaoSequenceDataset {
    pub fn new(
        items: Vec<TaobaoSequenceItem>,
        catalog: Arc<AdCatalog>,
        ad_features: &AdFeatureSet,
    ) -> error::Result<Self> {
        catalog.validate(ad_features)?;
        for (i, item) in items.iter().enumerate() {
            item.validate(i, ad_features)?;
        }

        Ok(Self {
            sequences: InMemDataset::new(items),
            catalog,
        })
    }

    pub fn load(
        filename: &str,
        catalog: Arc<AdCatalog>,
        ad_features: &AdFeatureSet,
    ) -> error::Result<Self> {
        let rows = InMemDataset::<TaobaoSequenceItem>::from_json_rows(filename)?;
        let items: Vec<TaobaoSequenceItem> = (0..rows.len()).filter_map(|i| rows.get(i)).collect();
        let dataset = Self::new(items, catalog, ad_features)?;

        info!(sequences = dataset.len(), "loaded interaction sequences from {filename}");
        Ok(dataset)
    }

    pub fn catalog(&self) -> &Arc<AdCatalog> {
        &self.catalog
    }

    fn items(&self) -> impl Iterator<Item = TaobaoSequenceItem> + '_ {
        (0..self.sequences.len()).filter_map(|i| self.sequences.get(i))
    }

    pub fn n_users(&self) -> usize {
        self.items().map(|item| item.user + 1).max().unwrap_or(0).max(0) as usize
    }

    pub fn n_ads(&self) -> error::Result<usize> {
        self.catalog.cardinality(AdFeature::Adgroup)
    }

    pub fn n_brands(&self) -> error::Result<usize> {
        self.catalog.cardinality(AdFeature::Brand)
    }

    pub fn n_cates(&self) -> error::Result<usize> {
        self.catalog.cardinality(AdFeature::Cate)
    }

    /// Number of distinct interaction codes seen in the data.
    pub fn n_actions(&self) -> usize {
        self.items()
            .flat_map(|item| item.interactions)
            .collect::<HashSet<i64>>()
            .len()
    }

    /// Largest interaction code in the data, `None` for an empty dataset.
    pub fn max_interaction_code(&self) -> Option<i64> {
        self.items().flat_map(|item| item.interactions).max()
    }
}

impl Dataset<TaobaoSequenceItem> for TaobaoSequenceDataset {
    fn get(&self, index: usize) -> Option<TaobaoSequenceItem> {
        self.sequences.get(index)
    }

    fn len(&self) -> usize {
        self.sequences.len()
    }
}

/// Pads histories into [`TaobaoInteractionsSeqBatch`]es.
pub struct SequenceBatcher<B: Backend> {
    device: B::Device,
    catalog: Arc<AdCatalog>,
    user_features: UserFeatureSet,
    ad_features: AdFeatureSet,
    sequence_len: usize,
    index_size: Option<usize>,
    rng: Mutex<StdRng>,
}

#[derive(Config, Debug)]
pub struct SequenceBatcherConfig {
    #[config(default = "UserFeatureSet::all()")]
    user_features: UserFeatureSet,

    #[config(default = "AdFeatureSet::all()")]
    ad_features: AdFeatureSet,

    #[config(default = 128)]
    sequence_len: usize,

    #[config(default = false)]
    augmented: bool,

    #[config(default = 4096)]
    index_size: usize,

    #[config(default = 42)]
    seed: u64,
}

impl SequenceBatcherConfig {
    pub fn init<B: Backend>(
        &self,
        catalog: Arc<AdCatalog>,
        device: B::Device,
    ) -> error::Result<SequenceBatcher<B>> {
        catalog.validate(&self.ad_features)?;

        if self.sequence_len == 0 {
            return Err(GenAdRecError::InvalidConfig(
                "sequence_len must be positive".to_string(),
            ));
        }

        let index_size = if self.augmented {
            if self.index_size > catalog.support() {
                return Err(GenAdRecError::IndexTooLarge {
                    requested: self.index_size,
                    available: catalog.support(),
                });
            }
            Some(self.index_size)
        } else {
            None
        };

        Ok(SequenceBatcher {
            device,
            catalog,
            user_features: self.user_features.clone(),
            ad_features: self.ad_features.clone(),
            sequence_len: self.sequence_len,
            index_size,
            rng: Mutex::new(StdRng::seed_from_u64(self.seed)),
        })
    }
}

impl<B: Backend> SequenceBatcher<B> {
    /// Keeps the last `sequence_len` positions of every row and right-pads to
    /// the longest kept row.
    fn padded<T: Copy>(&self, rows: &[&[T]], width: usize, pad: T) -> Vec<T> {
        rows.iter()
            .flat_map(|row| {
                let row: &[T] = row;
                let kept = &row[row.len().saturating_sub(self.sequence_len)..];
                kept.iter()
                    .copied()
                    .chain(std::iter::repeat(pad).take(width - kept.len()))
            })
            .collect()
    }

    fn sample_train_index(&self, size: usize) -> AdBatch<B, 1> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.catalog
            .get_index(Some(size), &self.ad_features, &mut *rng, &self.device)
            .unwrap_or_else(|err| panic!("catalog was validated for this index size: {err}"))
    }
}

impl<B: Backend> Batcher<TaobaoSequenceItem, TaobaoInteractionsSeqBatch<B>> for SequenceBatcher<B> {
    fn batch(&self, items: Vec<TaobaoSequenceItem>) -> TaobaoInteractionsSeqBatch<B> {
        let batch_size = items.len();
        let width = items
            .iter()
            .map(|item| item.len().min(self.sequence_len))
            .max()
            .unwrap_or(0);
        let dims = [batch_size, width];

        let ad_ids = |feature: AdFeature| -> Option<Tensor<B, 2, Int>> {
            if !self.ad_features.contains(feature) {
                return None;
            }
            let rows: Vec<&[i64]> = items.iter().map(|item| item.ad_column(feature)).collect();
            Some(int_tensor(self.padded(&rows, width, 0), dims, &self.device))
        };

        let user_ids = |feature: UserFeature| -> Option<Tensor<B, 1, Int>> {
            if !self.user_features.contains(feature) {
                return None;
            }
            let values = items.iter().map(|item| item.user_value(feature)).collect();
            Some(int_tensor(values, [batch_size], &self.device))
        };

        let freqs: Vec<&[f32]> = items.iter().map(|item| item.rel_ad_freqs.as_slice()).collect();
        let codes: Vec<&[i64]> = items.iter().map(|item| item.interactions.as_slice()).collect();
        let times: Vec<&[i64]> = items.iter().map(|item| item.timestamps.as_slice()).collect();
        let padding: Vec<Vec<bool>> = items.iter().map(|item| vec![false; item.len()]).collect();
        let padding: Vec<&[bool]> = padding.iter().map(|row| row.as_slice()).collect();

        TaobaoInteractionsSeqBatch {
            user_feats: UserBatch {
                user: user_ids(UserFeature::User),
                gender: user_ids(UserFeature::Gender),
                age: user_ids(UserFeature::Age),
                shopping: user_ids(UserFeature::Shopping),
                occupation: user_ids(UserFeature::Occupation),
            },
            ad_feats: AdBatch {
                adgroup_id: ad_ids(AdFeature::Adgroup),
                cate_id: ad_ids(AdFeature::Cate),
                brand_id: ad_ids(AdFeature::Brand),
                customer_id: ad_ids(AdFeature::Customer),
                campaign_id: ad_ids(AdFeature::Campaign),
                rel_ad_freqs: float_tensor(self.padded(&freqs, width, 0.0), dims, &self.device),
            },
            is_click: int_tensor(
                self.padded(&codes, width, Interaction::PADDING_CODE),
                dims,
                &self.device,
            ),
            timestamp: int_tensor(self.padded(&times, width, 0), dims, &self.device),
            is_padding: bool_tensor(self.padded(&padding, width, true), dims, &self.device),
            train_index: self.index_size.map(|size| self.sample_train_index(size)),
        }
    }
}
