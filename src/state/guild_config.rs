use poise::serenity_prelude::{ChannelId, MessageId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role handed to members when they join the guild
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultRole {
    /// No role is assigned on join
    #[default]
    Disabled,

    /// Members receive this role on join and keep it
    Single { role_id: u64 },

    /// Members receive `provisional` on join; it is swapped for `stable` the
    /// first time they react to a tracked message
    ProvisionalPair { provisional: u64, stable: u64 },
}

impl DefaultRole {
    /// Build from the roles given to the `set_default_role` command
    pub fn from_roles(first: Option<RoleId>, second: Option<RoleId>) -> Self {
        match (first, second) {
            (None, None) => DefaultRole::Disabled,
            (Some(role), None) | (None, Some(role)) => DefaultRole::Single {
                role_id: role.get(),
            },
            (Some(provisional), Some(stable)) => DefaultRole::ProvisionalPair {
                provisional: provisional.get(),
                stable: stable.get(),
            },
        }
    }

    /// Read the legacy `default_role_id` field.
    ///
    /// Older files stored an empty string (disabled), a bare role id, or a
    /// `[provisional, stable]` pair. Anything else, including zero ids,
    /// reads as disabled.
    pub fn from_legacy(value: &serde_json::Value) -> Self {
        fn id(value: &serde_json::Value) -> Option<u64> {
            match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .filter(|id| *id != 0)
        }

        match value {
            serde_json::Value::Array(pair) if pair.len() == 2 => {
                match (id(&pair[0]), id(&pair[1])) {
                    (Some(provisional), Some(stable)) => DefaultRole::ProvisionalPair {
                        provisional,
                        stable,
                    },
                    _ => DefaultRole::Disabled,
                }
            }
            other => id(other)
                .map(|role_id| DefaultRole::Single { role_id })
                .unwrap_or(DefaultRole::Disabled),
        }
    }

    /// Role to grant when a member joins
    pub fn join_role(&self) -> Option<RoleId> {
        match *self {
            DefaultRole::Disabled => None,
            DefaultRole::Single { role_id } => Some(RoleId::new(role_id)),
            DefaultRole::ProvisionalPair { provisional, .. } => Some(RoleId::new(provisional)),
        }
    }

    /// `(provisional, stable)` when a migration pair is configured
    pub fn migration_pair(&self) -> Option<(RoleId, RoleId)> {
        match *self {
            DefaultRole::ProvisionalPair {
                provisional,
                stable,
            } => Some((RoleId::new(provisional), RoleId::new(stable))),
            _ => None,
        }
    }

    /// Every role id referenced by this setting
    pub fn role_ids(&self) -> Vec<RoleId> {
        match *self {
            DefaultRole::Disabled => vec![],
            DefaultRole::Single { role_id } => vec![RoleId::new(role_id)],
            DefaultRole::ProvisionalPair {
                provisional,
                stable,
            } => vec![RoleId::new(provisional), RoleId::new(stable)],
        }
    }
}

impl fmt::Display for DefaultRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultRole::Disabled => write!(f, "disabled"),
            DefaultRole::Single { role_id } => write!(f, "<@&{}>", role_id),
            DefaultRole::ProvisionalPair {
                provisional,
                stable,
            } => write!(f, "<@&{}> until first reaction, then <@&{}>", provisional, stable),
        }
    }
}

/// Bindings attached to one message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReactionMessage {
    /// Channel holding the message; unknown for records migrated from the
    /// legacy layout until an event or command sees the message again
    #[serde(default)]
    pub channel_id: Option<u64>,

    /// Emoji (canonical text form) -> role id
    #[serde(default)]
    pub reactions: BTreeMap<String, u64>,
}

impl ReactionMessage {
    pub fn channel(&self) -> Option<ChannelId> {
        self.channel_id.map(ChannelId::new)
    }
}

/// Configuration of a single guild
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GuildConfig {
    #[serde(default)]
    pub default_role: DefaultRole,

    /// Message id -> bindings on that message. Never holds an empty entry.
    #[serde(default)]
    pub reaction_messages: BTreeMap<u64, ReactionMessage>,
}

impl GuildConfig {
    /// Role bound to `emoji` on `message_id`
    pub fn binding(&self, message_id: MessageId, emoji: &str) -> Option<RoleId> {
        self.reaction_messages
            .get(&message_id.get())
            .and_then(|m| m.reactions.get(emoji))
            .map(|role| RoleId::new(*role))
    }

    pub fn message(&self, message_id: MessageId) -> Option<&ReactionMessage> {
        self.reaction_messages.get(&message_id.get())
    }

    /// Add or replace a binding, returning the role it replaced
    pub fn upsert_binding(
        &mut self,
        message_id: MessageId,
        channel_id: ChannelId,
        emoji: &str,
        role_id: RoleId,
    ) -> Option<RoleId> {
        let entry = self.reaction_messages.entry(message_id.get()).or_default();
        entry.channel_id = Some(channel_id.get());
        entry
            .reactions
            .insert(emoji.to_string(), role_id.get())
            .map(RoleId::new)
    }

    /// Remove a binding; the message entry goes with its last binding
    pub fn remove_binding(&mut self, message_id: MessageId, emoji: &str) -> Option<RoleId> {
        let entry = self.reaction_messages.get_mut(&message_id.get())?;
        let removed = entry.reactions.remove(emoji).map(RoleId::new);
        if entry.reactions.is_empty() {
            self.reaction_messages.remove(&message_id.get());
        }
        removed
    }

    pub fn remove_message(&mut self, message_id: MessageId) -> Option<ReactionMessage> {
        self.reaction_messages.remove(&message_id.get())
    }

    /// Record the channel of a message, returning whether anything changed
    pub fn set_channel(&mut self, message_id: MessageId, channel_id: ChannelId) -> bool {
        match self.reaction_messages.get_mut(&message_id.get()) {
            Some(entry) if entry.channel_id != Some(channel_id.get()) => {
                entry.channel_id = Some(channel_id.get());
                true
            }
            _ => false,
        }
    }

    /// Remove ids that cannot name a Discord entity (zero) from a loaded
    /// record, returning how many were dropped.
    ///
    /// A default role with a zero id is disabled, a binding to role zero is
    /// removed, and a zero channel becomes unknown.
    pub fn drop_zero_ids(&mut self) -> usize {
        let mut dropped = 0;

        let valid_default = match self.default_role {
            DefaultRole::Disabled => true,
            DefaultRole::Single { role_id } => role_id != 0,
            DefaultRole::ProvisionalPair {
                provisional,
                stable,
            } => provisional != 0 && stable != 0,
        };
        if !valid_default {
            self.default_role = DefaultRole::Disabled;
            dropped += 1;
        }

        if self.reaction_messages.remove(&0).is_some() {
            dropped += 1;
        }
        for entry in self.reaction_messages.values_mut() {
            if entry.channel_id == Some(0) {
                entry.channel_id = None;
                dropped += 1;
            }
            let before = entry.reactions.len();
            entry.reactions.retain(|_, role| *role != 0);
            dropped += before - entry.reactions.len();
        }
        self.reaction_messages.retain(|_, entry| !entry.reactions.is_empty());

        dropped
    }

    pub fn binding_count(&self) -> usize {
        self.reaction_messages
            .values()
            .map(|m| m.reactions.len())
            .sum()
    }
}

/// Rewrite a legacy guild record in place.
///
/// `default_role_id` becomes `default_role`, and each `message -> {emoji -> role}`
/// map becomes a [`ReactionMessage`] without a channel. Empty maps are dropped.
pub fn migrate_legacy_guild(record: &mut serde_json::Value) {
    let Some(obj) = record.as_object_mut() else {
        return;
    };

    if let Some(legacy) = obj.remove("default_role_id") {
        let role = DefaultRole::from_legacy(&legacy);
        if let Ok(value) = serde_json::to_value(role) {
            obj.insert("default_role".to_string(), value);
        }
    }

    if let Some(messages) = obj
        .get_mut("reaction_messages")
        .and_then(|m| m.as_object_mut())
    {
        messages.retain(|_, bindings| {
            if bindings.get("reactions").is_some() {
                return true;
            }
            let non_empty = bindings.as_object().is_some_and(|b| !b.is_empty());
            if non_empty {
                *bindings = serde_json::json!({
                    "channel_id": null,
                    "reactions": bindings.take(),
                });
            }
            non_empty
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (MessageId, ChannelId) {
        (MessageId::new(10), ChannelId::new(20))
    }

    #[test]
    fn test_default_role_from_legacy() {
        assert_eq!(DefaultRole::from_legacy(&json!("")), DefaultRole::Disabled);
        assert_eq!(
            DefaultRole::from_legacy(&json!(42)),
            DefaultRole::Single { role_id: 42 }
        );
        assert_eq!(
            DefaultRole::from_legacy(&json!([1, 2])),
            DefaultRole::ProvisionalPair {
                provisional: 1,
                stable: 2
            }
        );
        assert_eq!(DefaultRole::from_legacy(&json!([1])), DefaultRole::Disabled);
        assert_eq!(DefaultRole::from_legacy(&json!(0)), DefaultRole::Disabled);
    }

    #[test]
    fn test_default_role_from_roles() {
        assert_eq!(DefaultRole::from_roles(None, None), DefaultRole::Disabled);
        assert_eq!(
            DefaultRole::from_roles(Some(RoleId::new(5)), None),
            DefaultRole::Single { role_id: 5 }
        );
        let pair = DefaultRole::from_roles(Some(RoleId::new(5)), Some(RoleId::new(6)));
        assert_eq!(pair.join_role(), Some(RoleId::new(5)));
        assert_eq!(pair.migration_pair(), Some((RoleId::new(5), RoleId::new(6))));
    }

    #[test]
    fn test_default_role_serde_is_tagged() {
        let value = serde_json::to_value(DefaultRole::Single { role_id: 7 }).unwrap();
        assert_eq!(value, json!({ "kind": "single", "role_id": 7 }));
    }

    #[test]
    fn test_remove_last_binding_drops_message() {
        let (message, channel) = ids();
        let mut config = GuildConfig::default();
        config.upsert_binding(message, channel, "👍", RoleId::new(1));
        config.upsert_binding(message, channel, "🎉", RoleId::new(2));

        assert_eq!(config.remove_binding(message, "👍"), Some(RoleId::new(1)));
        assert!(config.message(message).is_some());

        assert_eq!(config.remove_binding(message, "🎉"), Some(RoleId::new(2)));
        assert!(config.reaction_messages.is_empty());
    }

    #[test]
    fn test_remove_unknown_binding_keeps_others() {
        let (message, channel) = ids();
        let mut config = GuildConfig::default();
        config.upsert_binding(message, channel, "👍", RoleId::new(1));

        assert_eq!(config.remove_binding(message, "❌"), None);
        assert_eq!(config.binding(message, "👍"), Some(RoleId::new(1)));
    }

    #[test]
    fn test_set_channel_reports_change() {
        let (message, channel) = ids();
        let mut config = GuildConfig::default();
        config.reaction_messages.insert(
            message.get(),
            ReactionMessage {
                channel_id: None,
                reactions: BTreeMap::from([("👍".to_string(), 1)]),
            },
        );

        assert!(config.set_channel(message, channel));
        assert!(!config.set_channel(message, channel));
        assert!(!config.set_channel(MessageId::new(11), channel));
    }

    #[test]
    fn test_drop_zero_ids() {
        let mut config: GuildConfig = serde_json::from_value(json!({
            "default_role": { "kind": "provisional_pair", "provisional": 0, "stable": 4 },
            "reaction_messages": {
                "0": { "channel_id": 1, "reactions": { "👍": 5 } },
                "100": { "channel_id": 0, "reactions": { "👍": 0, "🎉": 6 } },
                "101": { "channel_id": 2, "reactions": { "👍": 0 } }
            }
        }))
        .unwrap();

        assert_eq!(config.drop_zero_ids(), 5);
        assert_eq!(config.default_role, DefaultRole::Disabled);
        assert_eq!(config.reaction_messages.len(), 1);

        let entry = config.message(MessageId::new(100)).unwrap();
        assert_eq!(entry.channel(), None);
        assert_eq!(config.binding(MessageId::new(100), "👍"), None);
        assert_eq!(config.binding(MessageId::new(100), "🎉"), Some(RoleId::new(6)));
        assert_eq!(config.drop_zero_ids(), 0);
    }

    #[test]
    fn test_migrate_legacy_guild() {
        let mut record = json!({
            "default_role_id": [3, 4],
            "reaction_messages": {
                "100": { "👍": 5 },
                "101": {}
            }
        });
        migrate_legacy_guild(&mut record);
        let config: GuildConfig = serde_json::from_value(record).unwrap();

        assert_eq!(
            config.default_role,
            DefaultRole::ProvisionalPair {
                provisional: 3,
                stable: 4
            }
        );
        assert_eq!(config.reaction_messages.len(), 1);
        let entry = config.message(MessageId::new(100)).unwrap();
        assert_eq!(entry.channel_id, None);
        assert_eq!(entry.reactions.get("👍"), Some(&5));
    }
}
