//! # Ticker Aggregation Cascade
//!
//! Turns live exchange tickers into bounded OHLCV series at increasing
//! intervals and screens each interval's symbols:
//!
//! ```text
//! exchange ─▶ [15s] ─▶ [1min] ─▶ [30min] ─▶ [1h] ─▶ [1d] ─▶ screened set
//!              │         │          │          │       │
//!              └─────────┴──── SQLite (crash recovery) ┘
//! ```
//!
//! Every stage runs as its own task and hands its newest two bars per symbol
//! plus its screened set to the next stage over a latest-wins channel.
//! A stage screens only symbols its upstream screened, so the final set is
//! the intersection of every stage's trigger.
//!
//! ## Module Organization
//!
//! - `types` - TickSnapshot, Bar, ScreenedSet
//! - `interval` - bar intervals and bucket flooring
//! - `series` - pure merge / resample / trim transforms
//! - `volume` - per-bar volume recovery from rolling 24h volume
//! - `triggers` - screening predicates
//! - `screen` - tradable universe, trigger screening, screened-set rolling
//! - `store` - SQLite persistence
//! - `handoff` - latest-wins stage-to-stage channel
//! - `stage` - one aggregation stage
//! - `orchestrator` - cascade wiring and shutdown
//! - `bootstrap` - history seeding for empty stores
//! - `config` - environment configuration

pub mod bootstrap;
pub mod config;
pub mod handoff;
pub mod interval;
pub mod orchestrator;
pub mod screen;
pub mod series;
pub mod stage;
pub mod store;
pub mod triggers;
pub mod types;
pub mod volume;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig, StageConfig};
pub use interval::Interval;
pub use orchestrator::{PipelineHandle, PipelineOrchestrator};
pub use stage::{AggregationStage, StageError, StageState};
pub use store::SeriesStore;
pub use triggers::{Trigger, TriggerKind};
pub use types::{Bar, ScreenedEntry, ScreenedSet, TickSnapshot};
