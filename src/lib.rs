// src/lib.rs
// Adaptive spaced-repetition scheduler for coding practice

pub mod attribution;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod database;
pub mod decay;
pub mod error;
pub mod focus;
pub mod index;
pub mod ladder;
pub mod limits;
pub mod mastery;
pub mod models;
pub mod pedagogy;
pub mod planner;
pub mod repository;
pub mod resilience;
pub mod sessions;
pub mod settings;
pub mod store;
pub mod summary;
pub mod sweep;

pub use attribution::{AttemptReceipt, SessionOutcome};
pub use catalog::{Catalog, CatalogProblem};
pub use config::SchedulerConfig;
pub use database::SqliteStore;
pub use error::{Result, SchedulerError};
pub use limits::{LimitMode, TimeLimits};
pub use models::{
    Attempt, AttemptInput, Difficulty, FocusDecision, Problem, Session, SessionOrigin,
    SessionStatus, SessionType, TagMastery, Tier,
};
pub use pedagogy::Scheduler;
pub use settings::{SettingsProvider, StaticSettings, UserSettings};
pub use store::{MemoryStore, Store};
pub use summary::SessionSummary;
pub use sweep::{StalledSession, SweepAction};
