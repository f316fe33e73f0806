// src/settings.rs
// User-owned settings consumed by the scheduler

use crate::error::{Result, SchedulerError};
use crate::limits::LimitMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    /// Preferred focus tags, most wanted first.
    pub focus_areas: Vec<String>,
    pub limit_mode: LimitMode,
    /// Overrides the configured guided session length.
    pub session_length: Option<usize>,
}

#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn load(&self) -> Result<UserSettings>;
}

/// Settings held in memory, optionally read from a TOML file.
#[derive(Debug, Default)]
pub struct StaticSettings {
    settings: RwLock<UserSettings>,
}

impl StaticSettings {
    pub fn new(settings: UserSettings) -> Self {
        StaticSettings {
            settings: RwLock::new(settings),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::Config(format!("{}: {}", path.display(), e)))?;
        let settings: UserSettings =
            toml::from_str(&contents).map_err(|e| SchedulerError::Config(e.to_string()))?;
        Ok(Self::new(settings))
    }

    pub fn update(&self, settings: UserSettings) {
        let mut guard = self.settings.write().unwrap_or_else(|p| p.into_inner());
        *guard = settings;
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn load(&self) -> Result<UserSettings> {
        Ok(self
            .settings
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }
}
