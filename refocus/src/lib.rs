pub mod combine;
pub mod config;
pub mod maps;
pub mod session;
pub mod stack;

pub use combine::{apply_threshold, compose};
pub use config::{Composition, FrameSelect, RefocusConfig, SolverSettings, ThresholdMode};
pub use maps::{MapBuilder, RefocusMap};
pub use session::{Engine, Session, WeightingMode};

pub use sapiv_core::{Error, Result};
