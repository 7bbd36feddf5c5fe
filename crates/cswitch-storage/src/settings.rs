//! Keys and value codecs of the `app_settings` table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use cswitch_provider_core::{BlacklistLevelConfig, BlacklistPolicy};

pub const KEY_ENABLE_BLACKLIST: &str = "enable_blacklist";
pub const KEY_FAILURE_THRESHOLD: &str = "blacklist_failure_threshold";
pub const KEY_DURATION_MINUTES: &str = "blacklist_duration_minutes";
pub const KEY_LEVEL_CONFIG: &str = "blacklist_level_config";

pub const ALLOWED_DURATION_MINUTES: [i64; 4] = [5, 15, 30, 60];
pub const MIN_FAILURE_THRESHOLD: u32 = 1;
pub const MAX_FAILURE_THRESHOLD: u32 = 9;

/// Operator-editable blacklist knobs as one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub duration_minutes: i64,
    pub level_config: BlacklistLevelConfig,
}

impl Default for BlacklistSettings {
    fn default() -> Self {
        let policy = BlacklistPolicy::default();
        Self {
            enabled: policy.enabled,
            failure_threshold: policy.fixed_failure_threshold,
            duration_minutes: policy.fixed_duration_minutes,
            level_config: policy.levels,
        }
    }
}

impl BlacklistSettings {
    pub fn into_policy(self) -> BlacklistPolicy {
        BlacklistPolicy {
            enabled: self.enabled,
            levels: self.level_config,
            fixed_failure_threshold: self.failure_threshold,
            fixed_duration_minutes: self.duration_minutes,
        }
    }

    /// Rows seeded into an empty settings table.
    pub fn default_rows() -> Result<Vec<(&'static str, String)>, serde_json::Error> {
        Self::default().to_rows()
    }

    pub fn to_rows(&self) -> Result<Vec<(&'static str, String)>, serde_json::Error> {
        Ok(vec![
            (KEY_ENABLE_BLACKLIST, self.enabled.to_string()),
            (KEY_FAILURE_THRESHOLD, self.failure_threshold.to_string()),
            (KEY_DURATION_MINUTES, self.duration_minutes.to_string()),
            (KEY_LEVEL_CONFIG, serde_json::to_string(&self.level_config)?),
        ])
    }

    /// Builds settings from raw rows. Missing or unreadable values fall back
    /// to defaults and are reported by key.
    pub fn from_rows(rows: &HashMap<String, String>) -> (Self, Vec<&'static str>) {
        let mut settings = Self::default();
        let mut invalid = Vec::new();

        if let Some(raw) = rows.get(KEY_ENABLE_BLACKLIST) {
            match raw.trim().parse::<bool>() {
                Ok(value) => settings.enabled = value,
                Err(_) => invalid.push(KEY_ENABLE_BLACKLIST),
            }
        }
        if let Some(raw) = rows.get(KEY_FAILURE_THRESHOLD) {
            match raw.trim().parse::<u32>() {
                Ok(value) if validate_threshold(value).is_ok() => {
                    settings.failure_threshold = value
                }
                _ => invalid.push(KEY_FAILURE_THRESHOLD),
            }
        }
        if let Some(raw) = rows.get(KEY_DURATION_MINUTES) {
            match raw.trim().parse::<i64>() {
                Ok(value) if validate_duration(value).is_ok() => settings.duration_minutes = value,
                _ => invalid.push(KEY_DURATION_MINUTES),
            }
        }
        if let Some(raw) = rows.get(KEY_LEVEL_CONFIG) {
            match serde_json::from_str::<BlacklistLevelConfig>(raw) {
                Ok(value) => settings.level_config = value,
                Err(_) => invalid.push(KEY_LEVEL_CONFIG),
            }
        }

        (settings, invalid)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_threshold(self.failure_threshold)?;
        validate_duration(self.duration_minutes)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("failure threshold must be within {MIN_FAILURE_THRESHOLD}..={MAX_FAILURE_THRESHOLD}, got {0}")]
    Threshold(u32),
    #[error("blacklist duration must be one of 5/15/30/60 minutes, got {0}")]
    Duration(i64),
}

pub fn validate_threshold(value: u32) -> Result<(), SettingsError> {
    if (MIN_FAILURE_THRESHOLD..=MAX_FAILURE_THRESHOLD).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::Threshold(value))
    }
}

pub fn validate_duration(value: i64) -> Result<(), SettingsError> {
    if ALLOWED_DURATION_MINUTES.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::Duration(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_rows_read_back_as_defaults() {
        let seeded: HashMap<String, String> = BlacklistSettings::default_rows()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let (settings, invalid) = BlacklistSettings::from_rows(&seeded);
        assert!(invalid.is_empty());
        assert_eq!(settings, BlacklistSettings::default());
    }

    #[test]
    fn bad_values_fall_back_and_are_reported() {
        let (settings, invalid) = BlacklistSettings::from_rows(&rows(&[
            (KEY_ENABLE_BLACKLIST, "yes"),
            (KEY_FAILURE_THRESHOLD, "12"),
            (KEY_DURATION_MINUTES, "15"),
            (KEY_LEVEL_CONFIG, "{not json"),
        ]));
        assert!(settings.enabled);
        assert_eq!(settings.failure_threshold, 3);
        assert_eq!(settings.duration_minutes, 15);
        assert_eq!(
            invalid,
            vec![KEY_ENABLE_BLACKLIST, KEY_FAILURE_THRESHOLD, KEY_LEVEL_CONFIG]
        );
    }

    #[test]
    fn partial_level_config_fills_defaults() {
        let (settings, invalid) = BlacklistSettings::from_rows(&rows(&[(
            KEY_LEVEL_CONFIG,
            r#"{"enable_level_blacklist":false,"fallback_mode":"none"}"#,
        )]));
        assert!(invalid.is_empty());
        assert!(!settings.level_config.enable_level_blacklist);
        assert_eq!(settings.level_config.l5_duration_minutes, 1440);
    }

    #[test]
    fn validation_bounds() {
        assert!(validate_threshold(1).is_ok());
        assert!(validate_threshold(9).is_ok());
        assert_eq!(validate_threshold(0), Err(SettingsError::Threshold(0)));
        assert_eq!(validate_duration(45), Err(SettingsError::Duration(45)));
    }
}
