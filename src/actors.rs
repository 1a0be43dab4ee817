//! Actor directory: upserts canonical actor records and aliases discovered
//! during session sync, and answers fuzzy lookups for the tool surface.

use std::sync::Arc;

use crate::store::{Actor, ActorAlias, ActorLookupRow, ActorType, Store};

const MAX_LOOKUP_LIMIT: usize = 50;

/// One row from the external session store describing who was on the other
/// end of a channel at sync time.
#[derive(Debug, Clone)]
pub struct ObservedParticipant {
    pub actor_id: String,
    pub origin_label: String,
    pub channel: String,
}

pub struct ActorDirectory {
    store: Arc<dyn Store>,
}

impl ActorDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Upserts a human actor plus its alias row. `alias_norm` is
    /// lowercase-trimmed so lookups are case- and whitespace-insensitive;
    /// aliases observed directly from a channel are trusted at full
    /// confidence.
    pub async fn observe_participant(&self, participant: &ObservedParticipant) -> anyhow::Result<()> {
        self.store
            .upsert_actor(&Actor {
                actor_id: participant.actor_id.clone(),
                actor_type: ActorType::Human,
                display_name: Some(participant.origin_label.clone()),
                metadata: None,
            })
            .await?;

        let alias_norm = normalize_alias(&participant.origin_label);
        self.store
            .upsert_alias(&ActorAlias {
                alias_norm,
                actor_id: participant.actor_id.clone(),
                alias: participant.origin_label.clone(),
                source: participant.channel.clone(),
                confidence: 1.0,
                metadata: None,
            })
            .await
    }

    /// Registers the synthetic actor record for an agent, keyed as
    /// `agent:<agent_id>` so it never collides with a human actor id. Also
    /// upserts an alias on the raw `agent_id` (at full confidence) so lookups
    /// find the agent even when no `display_name` is known.
    pub async fn observe_agent(&self, agent_id: &str, display_name: Option<&str>) -> anyhow::Result<()> {
        let synthetic_id = synthetic_agent_id(agent_id);
        self.store
            .upsert_actor(&Actor {
                actor_id: synthetic_id.clone(),
                actor_type: ActorType::Agent,
                display_name: display_name.map(str::to_string),
                metadata: None,
            })
            .await?;

        self.store
            .upsert_alias(&ActorAlias {
                alias_norm: normalize_alias(agent_id),
                actor_id: synthetic_id,
                alias: agent_id.to_string(),
                source: "agent".to_string(),
                confidence: 1.0,
                metadata: None,
            })
            .await
    }

    pub async fn lookup(&self, query: &str, limit: usize) -> anyhow::Result<Vec<ActorLookupRow>> {
        self.store.lookup_actors(query, limit.min(MAX_LOOKUP_LIMIT)).await
    }
}

pub fn synthetic_agent_id(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

fn normalize_alias(label: &str) -> String {
    label.trim().to_lowercase()
}
