pub mod ad_tower;
pub mod mlp;
pub mod rnn;

pub use ad_tower::{AdTower, AdTowerConfig};
pub use mlp::{Mlp, MlpConfig};
pub use rnn::{CellType, RecurrentEncoder, RecurrentEncoderConfig};
