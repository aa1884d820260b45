use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig};
use burn::tensor::{backend::Backend, Tensor};

use crate::data::{AdBatch, AdFeature, CategoricalFeature, Feature};
use crate::error::{self, GenAdRecError};

use super::mlp::{Mlp, MlpConfig};

/// Embeds every configured categorical ad feature, concatenates the
/// embeddings and projects them through an MLP to `embedding_dim`.
#[derive(Module, Debug)]
pub struct AdTower<B: Backend> {
    adgroup: Option<Embedding<B>>,
    cate: Option<Embedding<B>>,
    brand: Option<Embedding<B>>,
    customer: Option<Embedding<B>>,
    campaign: Option<Embedding<B>>,
    mlp: Mlp<B>,
}

impl<B: Backend> AdTower<B> {
    fn embedders(&self) -> [(AdFeature, Option<&Embedding<B>>); 5] {
        [
            (AdFeature::Adgroup, self.adgroup.as_ref()),
            (AdFeature::Cate, self.cate.as_ref()),
            (AdFeature::Brand, self.brand.as_ref()),
            (AdFeature::Customer, self.customer.as_ref()),
            (AdFeature::Campaign, self.campaign.as_ref()),
        ]
    }

    pub fn forward(&self, ads: &AdBatch<B, 2>) -> Tensor<B, 3> {
        let embs: Vec<Tensor<B, 3>> = self
            .embedders()
            .into_iter()
            .filter_map(|(feature, embedder)| {
                embedder.map(|embedder| {
                    let ids = ads.feature(feature).unwrap_or_else(|| {
                        panic!("ad tower embeds `{feature}` but the batch does not carry it")
                    });
                    embedder.forward(ids.clone())
                })
            })
            .collect();

        // Output is [batch, seq, embedding_dim]
        self.mlp.forward(Tensor::cat(embs, 2))
    }
}

#[derive(Config, Debug)]
pub struct AdTowerConfig {
    categorical_features: Vec<CategoricalFeature>,
    embedding_dim: usize,

    #[config(default = "vec![64]")]
    hidden_dims: Vec<usize>,
}

impl AdTowerConfig {
    pub fn init<B: Backend>(&self) -> error::Result<AdTower<B>> {
        if self.categorical_features.is_empty() {
            return Err(GenAdRecError::InvalidConfig(
                "ad tower needs at least one categorical feature".to_string(),
            ));
        }

        let mut tables: [Option<Embedding<B>>; 5] = [None, None, None, None, None];
        for feat in &self.categorical_features {
            if feat.cardinality == 0 {
                return Err(GenAdRecError::InvalidConfig(format!(
                    "feature `{}` has an empty vocabulary",
                    feat.feature.name()
                )));
            }
            let slot = &mut tables[slot_of(feat.feature)];
            if slot.is_some() {
                return Err(GenAdRecError::InvalidConfig(format!(
                    "feature `{}` is configured twice",
                    feat.feature.name()
                )));
            }
            *slot = Some(EmbeddingConfig::new(feat.cardinality, self.embedding_dim).init());
        }

        let mlp = MlpConfig::new(
            self.categorical_features.len() * self.embedding_dim,
            self.embedding_dim,
        )
        .with_hidden_dims(self.hidden_dims.clone())
        .init();

        let [adgroup, cate, brand, customer, campaign] = tables;
        Ok(AdTower {
            adgroup,
            cate,
            brand,
            customer,
            campaign,
            mlp,
        })
    }
}

fn slot_of(feature: AdFeature) -> usize {
    AdFeature::ALL
        .iter()
        .position(|feat| *feat == feature)
        .unwrap_or_default()
}
