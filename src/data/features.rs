use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{GenAdRecError, Result};

/// A named categorical column that can be requested from the dataset.
pub trait Feature: Copy + Eq + fmt::Debug + 'static {
    const ALL: &'static [Self];

    fn name(&self) -> &'static str;

    fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|feat| feat.name() == name)
            .ok_or_else(|| GenAdRecError::UnknownFeature(name.to_string()))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdFeature {
    Adgroup,
    Cate,
    Brand,
    Customer,
    Campaign,
}

impl Feature for AdFeature {
    const ALL: &'static [Self] = &[
        AdFeature::Adgroup,
        AdFeature::Cate,
        AdFeature::Brand,
        AdFeature::Customer,
        AdFeature::Campaign,
    ];

    fn name(&self) -> &'static str {
        match self {
            AdFeature::Adgroup => "adgroup",
            AdFeature::Cate => "cate",
            AdFeature::Brand => "brand",
            AdFeature::Customer => "customer",
            AdFeature::Campaign => "campaign",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserFeature {
    User,
    Gender,
    Age,
    Shopping,
    Occupation,
}

impl Feature for UserFeature {
    const ALL: &'static [Self] = &[
        UserFeature::User,
        UserFeature::Gender,
        UserFeature::Age,
        UserFeature::Shopping,
        UserFeature::Occupation,
    ];

    fn name(&self) -> &'static str {
        match self {
            UserFeature::User => "user",
            UserFeature::Gender => "gender",
            UserFeature::Age => "age",
            UserFeature::Shopping => "shopping",
            UserFeature::Occupation => "occupation",
        }
    }
}

macro_rules! impl_from_str {
    ($($feat:ty),*) => {
        $(
            impl FromStr for $feat {
                type Err = GenAdRecError;

                fn from_str(s: &str) -> Result<Self> {
                    <$feat as Feature>::parse(s)
                }
            }

            impl fmt::Display for $feat {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.name())
                }
            }
        )*
    };
}

impl_from_str!(AdFeature, UserFeature);

/// The subset of a feature bundle requested at configuration time. Batches
/// built for this set carry `None` for every feature outside it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FeatureSet<F: Feature> {
    requested: Vec<F>,
}

impl<F: Feature> FeatureSet<F> {
    pub fn all() -> Self {
        Self {
            requested: F::ALL.to_vec(),
        }
    }

    pub fn new(features: &[F]) -> Self {
        // Keep canonical order so batches and towers agree on column order.
        let requested = F::ALL
            .iter()
            .copied()
            .filter(|feat| features.contains(feat))
            .collect();
        Self { requested }
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let features = names
            .iter()
            .map(|name| F::parse(name.as_ref()))
            .collect::<Result<Vec<F>>>()?;
        Ok(Self::new(&features))
    }

    pub fn contains(&self, feature: F) -> bool {
        self.requested.contains(&feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        self.requested.iter().copied()
    }

    pub fn missing(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(|feat| !self.contains(*feat))
    }

    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }
}

impl<F: Feature> Default for FeatureSet<F> {
    fn default() -> Self {
        Self::all()
    }
}

pub type AdFeatureSet = FeatureSet<AdFeature>;
pub type UserFeatureSet = FeatureSet<UserFeature>;

/// A categorical ad feature together with the size of its embedding table.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoricalFeature {
    pub feature: AdFeature,
    pub cardinality: usize,
}

impl CategoricalFeature {
    pub fn new(feature: AdFeature, cardinality: usize) -> Self {
        Self {
            feature,
            cardinality,
        }
    }
}

/// Interaction type codes as stored in the sequence data.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Interaction {
    AdNonClick,
    Browse,
    AdClick,
    Favorite,
    AddToCart,
    Purchase,
}

impl Interaction {
    /// Code of the positions that carry an actual click, the only training targets.
    pub const CLICK_CODE: i64 = 1;
    /// Code of impressions without a click; pure behavioural context.
    pub const NON_CLICK_CODE: i64 = -1;
    /// Code written into padded slots. It maps onto the reserved action slot.
    pub const PADDING_CODE: i64 = 0;

    pub fn code(&self) -> i64 {
        match self {
            Interaction::AdNonClick => -1,
            Interaction::Browse => 0,
            Interaction::AdClick => 1,
            Interaction::Favorite => 2,
            Interaction::AddToCart => 3,
            Interaction::Purchase => 4,
        }
    }

    /// Row of the action embedding table used for this interaction.
    pub fn action_slot(&self) -> usize {
        (self.code() + 1) as usize
    }
}

impl TryFrom<i64> for Interaction {
    type Error = GenAdRecError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            -1 => Ok(Interaction::AdNonClick),
            0 => Ok(Interaction::Browse),
            1 => Ok(Interaction::AdClick),
            2 => Ok(Interaction::Favorite),
            3 => Ok(Interaction::AddToCart),
            4 => Ok(Interaction::Purchase),
            other => Err(GenAdRecError::UnknownInteraction(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_set_keeps_canonical_order() {
        let set = AdFeatureSet::from_names(&["brand", "adgroup"]).unwrap();
        let requested: Vec<_> = set.iter().collect();
        assert_eq!(requested, vec![AdFeature::Adgroup, AdFeature::Brand]);

        let missing: Vec<_> = set.missing().collect();
        assert_eq!(
            missing,
            vec![AdFeature::Cate, AdFeature::Customer, AdFeature::Campaign]
        );
    }

    #[test]
    fn unknown_feature_name_is_rejected() {
        let err = UserFeatureSet::from_names(&["user", "zodiac"]).unwrap_err();
        assert!(matches!(err, GenAdRecError::UnknownFeature(name) if name == "zodiac"));
    }

    #[test]
    fn interaction_codes_round_trip_to_slots() {
        assert_eq!(Interaction::AdNonClick.action_slot(), 0);
        assert_eq!(Interaction::Browse.action_slot(), 1);
        assert_eq!(Interaction::AdClick.action_slot(), 2);
        assert_eq!(Interaction::try_from(4).unwrap(), Interaction::Purchase);
        assert!(Interaction::try_from(7).is_err());
    }
}
