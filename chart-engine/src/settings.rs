use std::{str::FromStr, time::Duration};

use config::{Config, File};
use cron::Schedule;
use serde::{Deserialize, Serialize, de};
use serde_with::{DisplayFromStr, serde_as};

use crate::{
    resolution::{DAY, HOUR},
    rollup::{RollupSource, RollupWindows},
};

const MIN_DAY_WINDOW: u64 = 14 * DAY;
const MAX_DAY_WINDOW: u64 = 30 * DAY;

/// Wrapper under [`serde::de::IgnoredAny`] which implements
/// [`PartialEq`] and [`Eq`] for fields to be ignored.
#[derive(Copy, Clone, Debug, Default, Deserialize)]
struct IgnoredAny(de::IgnoredAny);

impl PartialEq for IgnoredAny {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for IgnoredAny {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    #[default]
    Default,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TracingSettings {
    pub enabled: bool,
    pub format: TracingFormat,
}

impl Default for TracingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            format: Default::default(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde_as(as = "DisplayFromStr")]
    pub update_schedule: Schedule,
    pub concurrent_updates: usize,
    pub force_update_on_start: bool,
    /// Width of hour rollup windows, in seconds
    pub hour_window: u64,
    /// Width of day rollup windows, in seconds
    pub day_window: u64,
    pub tracing: TracingSettings,
    pub sources: Vec<RollupSource>,

    // Is required as we deny unknown fields, but allow users provide
    // path to config through PREFIX__CONFIG env variable. If removed,
    // the setup would fail with `unknown field `config`, expected one of...`
    #[serde(skip_serializing, rename = "config")]
    config_path: IgnoredAny,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // every 10 minutes
            update_schedule: Schedule::from_str("0 */10 * * * * *")
                .expect("default schedule is valid"),
            concurrent_updates: 4,
            force_update_on_start: true,
            hour_window: 7 * DAY,
            day_window: MAX_DAY_WINDOW,
            tracing: Default::default(),
            sources: Default::default(),
            config_path: Default::default(),
        }
    }
}

impl Settings {
    pub fn build() -> anyhow::Result<Self> {
        let config_path = std::env::var("CHART_ENGINE__CONFIG");

        let mut builder = Config::builder();
        if let Ok(config_path) = config_path {
            builder = builder.add_source(File::with_name(&config_path));
        };
        // Use `__` so that it would be possible to address keys with underscores in names
        // (e.g. `hour_window`)
        builder = builder
            .add_source(config::Environment::with_prefix("CHART_ENGINE").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrent_updates == 0 {
            anyhow::bail!("concurrent_updates must be positive");
        }
        if self.hour_window < HOUR {
            anyhow::bail!("hour_window must be at least one hour, got {}s", self.hour_window);
        }
        if !(MIN_DAY_WINDOW..=MAX_DAY_WINDOW).contains(&self.day_window) {
            anyhow::bail!(
                "day_window must be between {MIN_DAY_WINDOW}s and {MAX_DAY_WINDOW}s, got {}s",
                self.day_window
            );
        }
        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                anyhow::bail!("source '{}' is defined twice", source.name);
            }
            if source.metrics.is_empty() {
                anyhow::bail!("source '{}' has no metrics", source.name);
            }
        }
        Ok(())
    }

    pub fn rollup_windows(&self) -> RollupWindows {
        RollupWindows {
            hour: Duration::from_secs(self.hour_window),
            day: Duration::from_secs(self.day_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::MetricKind;
    use pretty_assertions::assert_eq;

    const EXAMPLE_CONFIG: &str = r#"{
        "update_schedule": "0 0 * * * * *",
        "concurrent_updates": 2,
        "day_window": 1728000,
        "tracing": { "format": "json" },
        "sources": [
            {
                "name": "mempool",
                "metrics": [
                    { "key": "size", "kind": "uint" },
                    { "key": "fees", "kind": "null_float" }
                ],
                "with_height": true
            },
            {
                "name": "pool_a",
                "metrics": [{ "key": "hashrate", "kind": "float" }]
            }
        ]
    }"#;

    #[test]
    fn settings_from_json() {
        let settings: Settings = serde_json::from_str(EXAMPLE_CONFIG).unwrap();
        settings.validate().unwrap();
        assert_eq!(
            settings.update_schedule,
            Schedule::from_str("0 0 * * * * *").unwrap()
        );
        assert_eq!(settings.concurrent_updates, 2);
        assert_eq!(settings.hour_window, 7 * DAY);
        assert_eq!(settings.rollup_windows().day, Duration::from_secs(20 * DAY));
        assert_eq!(
            settings.tracing,
            TracingSettings {
                enabled: true,
                format: TracingFormat::Json
            }
        );
        assert_eq!(
            settings.sources[0],
            RollupSource::new(
                "mempool",
                vec![
                    crate::rollup::MetricSpec::new("size", MetricKind::Uint),
                    crate::rollup::MetricSpec::new("fees", MetricKind::NullFloat),
                ]
            )
            .with_height()
        );
        assert!(!settings.sources[1].with_height);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = serde_json::from_str::<Settings>(r#"{ "update_shedule": "0 0 * * * * *" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_path_field_is_ignored() {
        let settings: Settings =
            serde_json::from_str(r#"{ "config": "path/to/file.toml" }"#).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn default_settings_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let invalid = [
            Settings {
                concurrent_updates: 0,
                ..Default::default()
            },
            Settings {
                day_window: 7 * DAY,
                ..Default::default()
            },
            Settings {
                day_window: 31 * DAY,
                ..Default::default()
            },
            Settings {
                hour_window: 60,
                ..Default::default()
            },
        ];
        for settings in invalid {
            assert!(settings.validate().is_err(), "{settings:?}");
        }

        let duplicated = RollupSource::new(
            "pool",
            vec![crate::rollup::MetricSpec::new("hashrate", MetricKind::Float)],
        );
        let settings = Settings {
            sources: vec![duplicated.clone(), duplicated],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn invalid_schedule_fails_to_parse() {
        let result = serde_json::from_str::<Settings>(r#"{ "update_schedule": "every minute" }"#);
        assert!(result.is_err());
    }
}
