//! Activity log entries and the filter applied to them

use std::collections::BTreeSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record that can take part in a merged, time-ordered view
///
/// Implementors must return a stable identifier: two records with the same
/// id describe the same server-side row.
pub trait MergeItem: Clone + Send + Sync + 'static {
    type Id: Eq + Hash + Clone + Send + Sync + std::fmt::Debug;

    fn id(&self) -> Self::Id;

    /// Milliseconds since the Unix epoch
    fn timestamp_ms(&self) -> i64;
}

/// One entry of a guild's activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: i64,
    pub guild_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(
        id: i64,
        guild_id: impl Into<String>,
        action: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            guild_id: guild_id.into(),
            action: action.into(),
            actor_id: None,
            details: serde_json::Value::Null,
            created_at,
        }
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

impl MergeItem for ActivityLogEntry {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn timestamp_ms(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// Active filter of an activity view
///
/// Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub actions: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl ActivityFilter {
    pub fn for_guild(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id.into()),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.insert(action.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn matches(&self, entry: &ActivityLogEntry) -> bool {
        if let Some(guild_id) = &self.guild_id {
            if &entry.guild_id != guild_id {
                return false;
            }
        }
        if !self.actions.is_empty() && !self.actions.contains(&entry.action) {
            return false;
        }
        if let Some(actor_id) = &self.actor_id {
            if entry.actor_id.as_ref() != Some(actor_id) {
                return false;
            }
        }
        true
    }

    /// Filter as ordered `(name, value)` pairs, for building cache keys
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(guild_id) = &self.guild_id {
            params.push(("guildId".to_string(), guild_id.clone()));
        }
        if !self.actions.is_empty() {
            let actions: Vec<&str> = self.actions.iter().map(String::as_str).collect();
            params.push(("actions".to_string(), actions.join(",")));
        }
        if let Some(actor_id) = &self.actor_id {
            params.push(("actorId".to_string(), actor_id.clone()));
        }
        params
    }
}
