//! Engine runtime settings.
//!
//! Defaults are overridden by environment variables; the server binary layers
//! its command-line flags on top.

use std::{env, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use village_schema::Channel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelThresholds {
    pub feed: f64,
    pub chat: f64,
    pub news: f64,
}

impl Default for ChannelThresholds {
    fn default() -> Self {
        Self {
            feed: 0.6,
            chat: 0.4,
            news: 0.8,
        }
    }
}

impl ChannelThresholds {
    pub fn for_channel(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Feed => self.feed,
            Channel::Chat => self.chat,
            Channel::News => self.news,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSettings {
    /// Share of actors (0..=100) that notice any given ambient event.
    pub visibility_pct: u8,
    pub every_ticks: u64,
    pub batch_size: usize,
}

impl Default for AmbientSettings {
    fn default() -> Self {
        Self {
            visibility_pct: 60,
            every_ticks: 30,
            batch_size: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub database_path: PathBuf,
    /// Durable render queue; `None` keeps jobs in process.
    pub queue_path: Option<PathBuf>,
    pub seed: u64,
    pub tick_ms: u64,
    /// Clock origin when the store holds no events yet; wall clock otherwise.
    pub start_time: Option<DateTime<Utc>>,
    pub thresholds: ChannelThresholds,
    pub ambient: AmbientSettings,
    pub news_author_id: String,
    pub event_retry_attempts: u32,
    pub heartbeat_ticks: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("village.db"),
            queue_path: None,
            seed: 1337,
            tick_ms: 1000,
            start_time: None,
            thresholds: ChannelThresholds::default(),
            ambient: AmbientSettings::default(),
            news_author_id: "town_crier".to_string(),
            event_retry_attempts: 3,
            heartbeat_ticks: 60,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Applies every override `lookup` yields. Unparseable values are logged
    /// and the previous value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|raw| !raw.trim().is_empty());

        if let Some(raw) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(raw);
        }
        if let Some(raw) = get("QUEUE_PATH") {
            self.queue_path = Some(PathBuf::from(raw));
        }
        override_parsed(&get, "SIM_SEED", &mut self.seed);
        override_parsed(&get, "SIM_TICK_MS", &mut self.tick_ms);
        if let Some(raw) = get("SIM_START_TIME") {
            match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(parsed) => self.start_time = Some(parsed.with_timezone(&Utc)),
                Err(err) => warn_invalid("SIM_START_TIME", &raw, &err),
            }
        }
        override_parsed(&get, "IMPACT_THRESHOLD_FEED", &mut self.thresholds.feed);
        override_parsed(&get, "IMPACT_THRESHOLD_CHAT", &mut self.thresholds.chat);
        override_parsed(&get, "IMPACT_THRESHOLD_NEWS", &mut self.thresholds.news);
        override_parsed(
            &get,
            "AMBIENT_VISIBILITY_PCT",
            &mut self.ambient.visibility_pct,
        );
        override_parsed(&get, "AMBIENT_EVERY_TICKS", &mut self.ambient.every_ticks);
        override_parsed(&get, "AMBIENT_BATCH_SIZE", &mut self.ambient.batch_size);
        if let Some(raw) = get("NEWS_AUTHOR_ID") {
            self.news_author_id = raw.trim().to_string();
        }
        override_parsed(
            &get,
            "EVENT_RETRY_ATTEMPTS",
            &mut self.event_retry_attempts,
        );

        self.sanitized()
    }

    /// Clamps values into the ranges the engine relies on.
    pub fn sanitized(mut self) -> Self {
        self.tick_ms = self.tick_ms.max(1);
        self.ambient.visibility_pct = self.ambient.visibility_pct.min(100);
        self.ambient.every_ticks = self.ambient.every_ticks.max(1);
        self.ambient.batch_size = self.ambient.batch_size.max(1);
        self.event_retry_attempts = self.event_retry_attempts.max(1);
        self.heartbeat_ticks = self.heartbeat_ticks.max(1);
        for threshold in [
            &mut self.thresholds.feed,
            &mut self.thresholds.chat,
            &mut self.thresholds.news,
        ] {
            if !threshold.is_finite() {
                *threshold = 1.0;
            }
        }
        self
    }
}

fn override_parsed<T, G>(get: &G, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(err) => warn_invalid(key, &raw, &err),
        }
    }
}

fn warn_invalid(key: &str, raw: &str, err: &dyn std::fmt::Display) {
    tracing::warn!(
        target: "village::config",
        key,
        value = raw,
        error = %err,
        "setting.invalid"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn with(pairs: &[(&str, &str)]) -> EngineSettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineSettings::default().with_overrides(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = EngineSettings::default();
        assert_eq!(settings.thresholds.for_channel(Channel::Feed), 0.6);
        assert_eq!(settings.thresholds.for_channel(Channel::Chat), 0.4);
        assert_eq!(settings.thresholds.for_channel(Channel::News), 0.8);
        assert_eq!(settings.ambient, AmbientSettings::default());
        assert_eq!(settings.ambient.visibility_pct, 60);
        assert_eq!(settings.event_retry_attempts, 3);
    }

    #[test]
    fn overrides_are_applied() {
        let settings = with(&[
            ("DATABASE_PATH", "/tmp/v.db"),
            ("SIM_SEED", "7"),
            ("SIM_TICK_MS", "250"),
            ("IMPACT_THRESHOLD_CHAT", "0.55"),
            ("AMBIENT_VISIBILITY_PCT", "35"),
            ("NEWS_AUTHOR_ID", " npc_herman "),
            ("SIM_START_TIME", "2024-06-02T06:00:00Z"),
        ]);
        assert_eq!(settings.database_path, PathBuf::from("/tmp/v.db"));
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.tick_ms, 250);
        assert_eq!(settings.thresholds.chat, 0.55);
        assert_eq!(settings.ambient.visibility_pct, 35);
        assert_eq!(settings.news_author_id, "npc_herman");
        assert!(settings.start_time.is_some());
    }

    #[test]
    fn invalid_values_keep_previous() {
        let settings = with(&[("SIM_SEED", "many"), ("AMBIENT_BATCH_SIZE", "-3")]);
        assert_eq!(settings.seed, EngineSettings::default().seed);
        assert_eq!(settings.ambient.batch_size, 10);
    }

    #[test]
    fn sanitizing_clamps_ranges() {
        let settings = with(&[
            ("SIM_TICK_MS", "0"),
            ("AMBIENT_VISIBILITY_PCT", "250"),
            ("AMBIENT_EVERY_TICKS", "0"),
            ("EVENT_RETRY_ATTEMPTS", "0"),
            ("IMPACT_THRESHOLD_NEWS", "NaN"),
        ]);
        assert_eq!(settings.tick_ms, 1);
        assert_eq!(settings.ambient.visibility_pct, 100);
        assert_eq!(settings.ambient.every_ticks, 1);
        assert_eq!(settings.event_retry_attempts, 1);
        assert_eq!(settings.thresholds.news, 1.0);
    }
}
