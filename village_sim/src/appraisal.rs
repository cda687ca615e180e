//! Archetype-driven reactions to ambient topics.
//!
//! The table maps `topic -> archetype -> (intent, draft)`. Lookup tries the
//! exact topic first and then the first entry of the same topic family
//! (`weather_*`, `news_*`); at each level the actor's archetype wins over the
//! entry's `default` response.

use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use thiserror::Error;
use village_schema::Intent;

use crate::config::{load_with_env_path, ConfigMetadata};

pub const BUILTIN_APPRAISAL: &str = include_str!("data/appraisal.json");

pub const DEFAULT_ARCHETYPE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appraisal {
    pub intent: Intent,
    pub draft: Option<String>,
}

impl Appraisal {
    pub fn ignore() -> Self {
        Self {
            intent: Intent::Ignore,
            draft: None,
        }
    }

    /// Channel-bearing intent with a non-empty draft.
    pub fn reaction(&self) -> Option<(village_schema::Channel, &str)> {
        let channel = self.intent.channel()?;
        let draft = self.draft.as_deref().map(str::trim).filter(|d| !d.is_empty())?;
        Some((channel, draft))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppraisalTable {
    archetype_mapping: HashMap<String, String>,
    reactions: Vec<TopicReactions>,
    #[serde(skip)]
    known_archetypes: HashSet<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TopicReactions {
    topic: String,
    #[serde(default)]
    responses: HashMap<String, ResponseRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseRule {
    intent: Intent,
    #[serde(default)]
    draft: Option<String>,
}

impl From<&ResponseRule> for Appraisal {
    fn from(rule: &ResponseRule) -> Self {
        Appraisal {
            intent: rule.intent,
            draft: rule.draft.clone(),
        }
    }
}

impl TopicReactions {
    fn respond(&self, archetype: &str) -> Option<Appraisal> {
        self.responses
            .get(archetype)
            .or_else(|| self.responses.get(DEFAULT_ARCHETYPE))
            .map(Appraisal::from)
    }

    fn family(&self) -> String {
        topic_family(&self.topic)
    }
}

fn topic_family(topic: &str) -> String {
    let stem = topic.rsplit_once('_').map_or(topic, |(stem, _)| stem);
    format!("{stem}_")
}

impl AppraisalTable {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            AppraisalTable::from_json_str(BUILTIN_APPRAISAL)
                .expect("builtin appraisal table should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, AppraisalConfigError> {
        let mut table: AppraisalTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppraisalConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| AppraisalConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    fn validate(&mut self) -> Result<(), AppraisalConfigError> {
        let mut topics = HashSet::new();
        self.known_archetypes.clear();
        for entry in &self.reactions {
            if !topics.insert(entry.topic.as_str()) {
                return Err(AppraisalConfigError::DuplicateTopic(entry.topic.clone()));
            }
            self.known_archetypes.extend(entry.responses.keys().cloned());
        }
        self.known_archetypes
            .extend(self.archetype_mapping.values().cloned());
        self.archetype_mapping = self
            .archetype_mapping
            .drain()
            .map(|(from, to)| (from.to_lowercase(), to))
            .collect();
        Ok(())
    }

    /// Maps a catalog archetype to the archetype vocabulary of this table.
    pub fn resolve_archetype(&self, catalog_archetype: &str) -> String {
        self.lookup(catalog_archetype)
            .unwrap_or_else(|| DEFAULT_ARCHETYPE.to_string())
    }

    /// First of an actor's archetypes that the table knows, in listed order.
    pub fn resolve_actor(&self, archetypes: &[String]) -> String {
        archetypes
            .iter()
            .find_map(|archetype| self.lookup(archetype))
            .unwrap_or_else(|| DEFAULT_ARCHETYPE.to_string())
    }

    fn lookup(&self, catalog_archetype: &str) -> Option<String> {
        let key = catalog_archetype.trim().to_lowercase();
        if let Some(mapped) = self.archetype_mapping.get(&key) {
            return Some(mapped.clone());
        }
        self.known_archetypes.contains(&key).then_some(key)
    }

    /// Decides how an actor with a single catalog archetype reacts to `topic`.
    pub fn appraise(&self, topic: &str, catalog_archetype: &str) -> Appraisal {
        self.appraise_resolved(topic, &self.resolve_archetype(catalog_archetype))
    }

    /// Decides how an actor carrying `archetypes` reacts to `topic`.
    pub fn appraise_actor(&self, topic: &str, archetypes: &[String]) -> Appraisal {
        self.appraise_resolved(topic, &self.resolve_actor(archetypes))
    }

    fn appraise_resolved(&self, topic: &str, archetype: &str) -> Appraisal {
        if let Some(exact) = self.reactions.iter().find(|entry| entry.topic == topic) {
            if let Some(appraisal) = exact.respond(archetype) {
                return appraisal;
            }
        }

        self.reactions
            .iter()
            .filter(|entry| topic.starts_with(&entry.family()))
            .find_map(|entry| entry.respond(archetype))
            .unwrap_or_else(Appraisal::ignore)
    }
}

#[derive(Debug, Error)]
pub enum AppraisalConfigError {
    #[error("failed to parse appraisal table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read appraisal table from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("topic {0} is listed more than once")]
    DuplicateTopic(String),
}

pub fn load_appraisal_table_from_env() -> (Arc<AppraisalTable>, ConfigMetadata) {
    load_with_env_path(
        "APPRAISAL_CONFIG_PATH",
        "appraisal",
        AppraisalTable::builtin,
        AppraisalTable::from_file,
    )
}
