//! txrisk-scoring
//!
//! The hybrid scoring engine (C5 rules + C6 behavioral/ml + C7 orchestration,
//! §4.4-§4.6). `behavioral` and `ml` are pure functions over a `Features`
//! snapshot; `engine` is the async orchestrator that ties them to the rule
//! engine, the A/B manager, and a caller-supplied persistence port.

pub mod behavioral;
pub mod engine;
pub mod ml;

pub use behavioral::{new_device_high_value, score_behavioral};
pub use engine::{
    score_transaction, NoopCache, ScoreCache, ScoringConfig, ScoringError, ScoringRepo,
    MODEL_VERSION,
};
pub use ml::score_ml;
