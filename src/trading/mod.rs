//! Trading logic: strategy resolution, copy sizing, risk limits.

mod risk;
mod sizing;
mod strategy;

pub use risk::RiskLimits;
pub use sizing::{Sizer, SizingConfig};
pub use strategy::{resolve, CopyAction};
