pub mod madgwick;

pub use madgwick::{FusionEngine, MadgwickConfig};
