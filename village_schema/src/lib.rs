//! Wire types shared between the simulation engine and its collaborators.
//!
//! The engine writes [`Event`] rows and pushes [`RenderJob`]s; the ambient
//! collector writes [`AmbientEvent`] rows. Everything here serializes to the
//! JSON shapes those collaborators consume.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type ActorId = String;
pub type JsonMap = serde_json::Map<String, Value>;

pub const AMBIENT_SEEN_EVENT_TYPE: &str = "AMBIENT_SEEN";
pub const ROUTINE_EVENT_PREFIX: &str = "evt_routine_";
pub const AMBIENT_SEEN_EVENT_PREFIX: &str = "evt_ambient_seen_";

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub fn clamp_signed(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Feed,
    Chat,
    News,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Feed, Channel::Chat, Channel::News];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Feed => "FEED",
            Channel::Chat => "CHAT",
            Channel::News => "NEWS",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown render channel `{0}`")]
pub struct UnknownChannel(pub String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FEED" => Ok(Channel::Feed),
            "CHAT" => Ok(Channel::Chat),
            "NEWS" => Ok(Channel::News),
            _ => Err(UnknownChannel(value.to_string())),
        }
    }
}

/// What an actor decides to do after appraising an ambient fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    PostFeed,
    PostChat,
    Ignore,
}

impl Intent {
    pub fn channel(self) -> Option<Channel> {
        match self {
            Intent::PostFeed => Some(Channel::Feed),
            Intent::PostChat => Some(Channel::Chat),
            Intent::Ignore => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub sim_time: DateTime<Utc>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub actors: Vec<ActorId>,
    #[serde(default)]
    pub targets: Vec<ActorId>,
    #[serde(default)]
    pub publicness: f64,
    #[serde(default)]
    pub severity: f64,
    #[serde(default)]
    pub payload: JsonMap,
}

impl Event {
    /// Deduplicates participant lists (first occurrence wins) and clamps the
    /// normalized fields into range.
    pub fn normalized(mut self) -> Self {
        dedup_in_order(&mut self.actors);
        dedup_in_order(&mut self.targets);
        self.publicness = clamp01(self.publicness);
        self.severity = clamp01(self.severity);
        self
    }

    /// Sorted union of actors and targets.
    pub fn involved(&self) -> BTreeSet<&str> {
        self.actors
            .iter()
            .chain(self.targets.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn primary_actor(&self) -> Option<&str> {
        self.actors.first().map(String::as_str)
    }

    pub fn place_label(&self) -> &str {
        self.place_id.as_deref().unwrap_or("unknown")
    }
}

fn dedup_in_order(ids: &mut Vec<ActorId>) {
    let mut seen = BTreeSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// Normalized external fact (weather, news) produced by the ambient collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientEvent {
    pub id: String,
    pub sim_date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: String,
    pub intensity: f64,
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: JsonMap,
}

fn default_confidence() -> f64 {
    1.0
}

impl AmbientEvent {
    pub fn normalized(mut self) -> Self {
        self.intensity = clamp01(self.intensity);
        self.confidence = clamp01(self.confidence);
        self.sentiment = clamp_signed(self.sentiment);
        self
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }

    /// Short description carried into seen events and reaction prompts.
    pub fn summary(&self) -> &str {
        self.payload
            .get("summary")
            .or_else(|| self.payload.get("summary_fi"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn facts(&self) -> Value {
        self.payload
            .get("facts")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub event: Event,
    pub impact: f64,
    pub sim_time: DateTime<Utc>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_payload: Option<JsonMap>,
}

/// Unit of work for the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub channel: Channel,
    pub author_id: ActorId,
    pub source_event_id: String,
    pub prompt_context: PromptContext,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            id: "evt_1".to_string(),
            sim_time: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            place_id: Some("place_kahvio".to_string()),
            kind: "SMALL_TALK".to_string(),
            actors: vec!["npc_a".into(), "npc_b".into(), "npc_a".into()],
            targets: vec!["npc_c".into(), "npc_a".into()],
            publicness: 1.7,
            severity: -0.2,
            payload: JsonMap::new(),
        }
    }

    #[test]
    fn channel_parses_case_insensitively() {
        assert_eq!("feed".parse::<Channel>(), Ok(Channel::Feed));
        assert_eq!(" NEWS ".parse::<Channel>(), Ok(Channel::News));
        let err = "radio".parse::<Channel>().unwrap_err();
        assert_eq!(err, UnknownChannel("radio".to_string()));
        assert_eq!(err.to_string(), "unknown render channel `radio`");
    }

    #[test]
    fn intent_maps_to_channel() {
        assert_eq!(Intent::PostFeed.channel(), Some(Channel::Feed));
        assert_eq!(Intent::PostChat.channel(), Some(Channel::Chat));
        assert_eq!(Intent::Ignore.channel(), None);
    }

    #[test]
    fn normalization_dedups_and_clamps() {
        let event = sample_event().normalized();
        assert_eq!(event.actors, vec!["npc_a".to_string(), "npc_b".to_string()]);
        assert_eq!(event.targets, vec!["npc_c".to_string(), "npc_a".to_string()]);
        assert_eq!(event.publicness, 1.0);
        assert_eq!(event.severity, 0.0);
        let involved: Vec<&str> = event.involved().into_iter().collect();
        assert_eq!(involved, vec!["npc_a", "npc_b", "npc_c"]);
        assert_eq!(event.primary_actor(), Some("npc_a"));
    }

    #[test]
    fn render_job_serializes_wire_names() {
        let event = sample_event().normalized();
        let job = RenderJob {
            channel: Channel::Chat,
            author_id: "npc_a".to_string(),
            source_event_id: event.id.clone(),
            prompt_context: PromptContext {
                sim_time: event.sim_time,
                event,
                impact: 0.5,
                summary: "SMALL_TALK at place_kahvio".to_string(),
                draft: None,
                ambient_topic: None,
                ambient_payload: None,
            },
        };
        let value = serde_json::to_value(&job).expect("job serializes");
        assert_eq!(value["channel"], json!("CHAT"));
        assert_eq!(value["prompt_context"]["event"]["type"], json!("SMALL_TALK"));
        assert!(value["prompt_context"].get("draft").is_none());

        let back: RenderJob = serde_json::from_value(value).expect("job deserializes");
        assert_eq!(back, job);
    }

    #[test]
    fn ambient_summary_falls_back_to_localized_key() {
        let mut payload = JsonMap::new();
        payload.insert("summary_fi".into(), json!("Lunta sataa"));
        let ambient = AmbientEvent {
            id: "amb_1".into(),
            sim_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            kind: "AMBIENT_WEATHER".into(),
            topic: "weather_snow".into(),
            intensity: 3.0,
            sentiment: -4.0,
            confidence: 0.9,
            expires_at: None,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            payload,
        }
        .normalized();
        assert_eq!(ambient.summary(), "Lunta sataa");
        assert_eq!(ambient.intensity, 1.0);
        assert_eq!(ambient.sentiment, -1.0);
        assert_eq!(ambient.facts(), json!([]));
        assert!(ambient.is_live_at(Utc::now()));
    }
}
