use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::batch::AdBatch;
use super::features::{AdFeature, AdFeatureSet, CategoricalFeature, Feature};
use crate::error::{GenAdRecError, Result};
use crate::utils::{float_tensor, int_tensor};

/// One encoded row of the ad feature table.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AdCatalogRow {
    pub adgroup: i64,
    #[serde(default)]
    pub cate: Option<i64>,
    #[serde(default)]
    pub brand: Option<i64>,
    #[serde(default)]
    pub customer: Option<i64>,
    #[serde(default)]
    pub campaign: Option<i64>,
    #[serde(default)]
    pub rel_ad_freq: Option<f32>,
}

/// Catalog-wide ad features sorted by ad-group id. Built once at load time
/// and shared read-only by the batcher and the caller.
#[derive(Debug, Clone)]
pub struct AdCatalog {
    adgroup: Vec<i64>,
    cate: Option<Vec<i64>>,
    brand: Option<Vec<i64>>,
    customer: Option<Vec<i64>>,
    campaign: Option<Vec<i64>>,
    rel_ad_freqs: Vec<f32>,
    support: Vec<usize>,
}

impl AdCatalog {
    /// Rows with a negative ad-group id are dropped and missing frequencies
    /// count as zero. A column is kept only when every row fills it.
    pub fn from_rows(mut rows: Vec<AdCatalogRow>) -> Self {
        rows.retain(|row| row.adgroup > -1);
        rows.sort_by_key(|row| row.adgroup);

        let column = |get: fn(&AdCatalogRow) -> Option<i64>| -> Option<Vec<i64>> {
            rows.iter().map(get).collect()
        };

        let cate = column(|row| row.cate);
        let brand = column(|row| row.brand);
        let customer = column(|row| row.customer);
        let campaign = column(|row| row.campaign);

        let rel_ad_freqs: Vec<f32> = rows
            .iter()
            .map(|row| row.rel_ad_freq.unwrap_or(0.0).max(0.0))
            .collect();
        let support = rel_ad_freqs
            .iter()
            .enumerate()
            .filter(|(_, freq)| **freq > 0.0)
            .map(|(i, _)| i)
            .collect();

        AdCatalog {
            adgroup: rows.iter().map(|row| row.adgroup).collect(),
            cate,
            brand,
            customer,
            campaign,
            rel_ad_freqs,
            support,
        }
    }

    pub fn load(filename: &str) -> Result<Self> {
        let rows = InMemDataset::<AdCatalogRow>::from_json_rows(filename)?;
        let rows: Vec<AdCatalogRow> = (0..rows.len()).filter_map(|i| rows.get(i)).collect();
        let catalog = Self::from_rows(rows);

        info!(
            ads = catalog.len(),
            sampled = catalog.support.len(),
            "loaded ad catalog from {filename}"
        );
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.adgroup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adgroup.is_empty()
    }

    pub fn column(&self, feature: AdFeature) -> Option<&[i64]> {
        match feature {
            AdFeature::Adgroup => Some(&self.adgroup),
            AdFeature::Cate => self.cate.as_deref(),
            AdFeature::Brand => self.brand.as_deref(),
            AdFeature::Customer => self.customer.as_deref(),
            AdFeature::Campaign => self.campaign.as_deref(),
        }
    }

    pub fn rel_ad_freqs(&self) -> &[f32] {
        &self.rel_ad_freqs
    }

    /// Number of ads that can be drawn by [`AdCatalog::sample_indices`].
    pub fn support(&self) -> usize {
        self.support.len()
    }

    /// Embedding table size for `feature`: largest encoded id plus one.
    pub fn cardinality(&self, feature: AdFeature) -> Result<usize> {
        let column = self
            .column(feature)
            .ok_or(GenAdRecError::MissingFeature(feature.name()))?;
        Ok(column.iter().copied().max().map_or(0, |max| max.max(-1) + 1) as usize)
    }

    /// Rejects a feature set asking for columns the catalog does not have.
    pub fn validate(&self, features: &AdFeatureSet) -> Result<()> {
        for feature in features.iter() {
            if self.column(feature).is_none() {
                return Err(GenAdRecError::MissingFeature(feature.name()));
            }
        }
        Ok(())
    }

    pub fn categorical_features(&self, features: &AdFeatureSet) -> Result<Vec<CategoricalFeature>> {
        features
            .iter()
            .map(|feature| Ok(CategoricalFeature::new(feature, self.cardinality(feature)?)))
            .collect()
    }

    /// Draws `size` distinct ads with probability proportional to
    /// `rel_ad_freq`. Ads with zero mass are never drawn.
    pub fn sample_indices<R: Rng + ?Sized>(&self, rng: &mut R, size: usize) -> Result<Vec<usize>> {
        if size > self.support.len() {
            return Err(GenAdRecError::IndexTooLarge {
                requested: size,
                available: self.support.len(),
            });
        }

        let picked = index::sample_weighted(
            rng,
            self.support.len(),
            |i| self.rel_ad_freqs[self.support[i]],
            size,
        )?;

        Ok(picked.into_iter().map(|i| self.support[i]).collect())
    }

    /// The whole catalog when `size` is `None`, otherwise a weighted sample
    /// of `size` ads. Features outside `features` are left out.
    pub fn get_index<B: Backend, R: Rng + ?Sized>(
        &self,
        size: Option<usize>,
        features: &AdFeatureSet,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<AdBatch<B, 1>> {
        self.validate(features)?;

        let indices: Vec<usize> = match size {
            Some(size) => self.sample_indices(rng, size)?,
            None => (0..self.len()).collect(),
        };
        let k = indices.len();

        let ids = |feature: AdFeature| {
            if !features.contains(feature) {
                return None;
            }
            self.column(feature).map(|column| {
                let values = indices.iter().map(|&i| column[i]).collect();
                int_tensor::<B, 1>(values, [k], device)
            })
        };

        Ok(AdBatch {
            adgroup_id: ids(AdFeature::Adgroup),
            cate_id: ids(AdFeature::Cate),
            brand_id: ids(AdFeature::Brand),
            customer_id: ids(AdFeature::Customer),
            campaign_id: ids(AdFeature::Campaign),
            rel_ad_freqs: float_tensor::<B, 1>(
                indices.iter().map(|&i| self.rel_ad_freqs[i]).collect(),
                [k],
                device,
            ),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::{float_values, int_values};
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    pub(crate) fn rows() -> Vec<AdCatalogRow> {
        (0..8)
            .rev()
            .map(|adgroup| AdCatalogRow {
                adgroup,
                cate: Some(adgroup % 3),
                brand: Some(adgroup % 4),
                customer: None,
                campaign: Some(adgroup / 2),
                rel_ad_freq: match adgroup {
                    0 => None,
                    5 => Some(0.0),
                    _ => Some(0.1),
                },
            })
            .chain(std::iter::once(AdCatalogRow {
                adgroup: -1,
                cate: None,
                brand: None,
                customer: None,
                campaign: None,
                rel_ad_freq: Some(0.3),
            }))
            .collect()
    }

    #[test]
    fn rows_are_sorted_filtered_and_filled() {
        let catalog = AdCatalog::from_rows(rows());

        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.column(AdFeature::Adgroup).unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(catalog.column(AdFeature::Customer).is_none());
        assert_eq!(catalog.rel_ad_freqs()[0], 0.0);
        assert_eq!(catalog.support(), 6);
        assert_eq!(catalog.cardinality(AdFeature::Adgroup).unwrap(), 8);
        assert_eq!(catalog.cardinality(AdFeature::Brand).unwrap(), 4);
        assert!(matches!(
            catalog.cardinality(AdFeature::Customer),
            Err(GenAdRecError::MissingFeature("customer"))
        ));
    }

    #[test]
    fn full_index_leaves_out_unrequested_features() {
        let catalog = AdCatalog::from_rows(rows());
        let features = AdFeatureSet::new(&[AdFeature::Adgroup, AdFeature::Brand]);
        let mut rng = StdRng::seed_from_u64(0);

        let index = catalog
            .get_index::<TestBackend, _>(None, &features, &mut rng, &Default::default())
            .unwrap();

        assert!(index.adgroup_id.is_some());
        assert!(index.brand_id.is_some());
        assert!(index.cate_id.is_none());
        assert!(index.customer_id.is_none());
        assert!(index.campaign_id.is_none());

        let freqs = float_values(&index.rel_ad_freqs);
        assert_eq!(freqs.len(), 8);
        assert!(freqs.iter().all(|f| *f >= 0.0));
        assert!(freqs.iter().sum::<f32>() <= 1.0 + 1e-6);
    }

    #[test]
    fn sampled_index_is_distinct_and_skips_zero_mass() {
        let catalog = AdCatalog::from_rows(rows());
        let features = AdFeatureSet::new(&[AdFeature::Adgroup]);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let index = catalog
                .get_index::<TestBackend, _>(Some(4), &features, &mut rng, &Default::default())
                .unwrap();
            let mut ids = int_values(index.adgroup_id.as_ref().unwrap());
            assert_eq!(ids.len(), 4);
            assert!(!ids.contains(&0) && !ids.contains(&5));
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 4);
        }
    }

    #[test]
    fn oversized_or_missing_requests_are_rejected() {
        let catalog = AdCatalog::from_rows(rows());
        let mut rng = StdRng::seed_from_u64(0);

        let too_many = catalog.get_index::<TestBackend, _>(
            Some(7),
            &AdFeatureSet::new(&[AdFeature::Adgroup]),
            &mut rng,
            &Default::default(),
        );
        assert!(matches!(
            too_many,
            Err(GenAdRecError::IndexTooLarge { requested: 7, available: 6 })
        ));

        let missing = catalog.get_index::<TestBackend, _>(
            None,
            &AdFeatureSet::all(),
            &mut rng,
            &Default::default(),
        );
        assert!(matches!(missing, Err(GenAdRecError::MissingFeature("customer"))));
    }
}
