//! Keeps persisted reaction bindings and live Discord state consistent.
//!
//! Each (guild, message, emoji) binding moves between unset and set through
//! the command surface and platform events:
//!
//! * a member adding a bound reaction gets the bound role (after the one-time
//!   provisional -> stable migration when configured),
//! * a member removing it loses the role,
//! * the bot removing its own tracking reaction tears the binding down,
//! * clearing reactions or deleting the message forgets the message.

use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::role_assigner::RoleAssigner;
use crate::error::{BotError, Result};
use crate::platform::{ChatPlatform, PlatformError};
use crate::state::{GuildConfig, GuildLock, SharedConfigStore};

/// A reaction added to or removed from a guild message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    /// Canonical emoji text
    pub emoji: String,
}

/// What an event did to roles or bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The event does not concern a binding
    Ignored,
    Granted(RoleId),
    Revoked(RoleId),
    /// The member's roles already matched
    InSync(RoleId),
    /// The bound role no longer exists in the guild
    RoleMissing(RoleId),
    /// One binding was torn down
    BindingRemoved(RoleId),
    /// Every binding of a message was forgotten
    MessageForgotten,
}

/// Result of a maintenance pass over a guild's bindings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Bindings whose role no longer resolves
    pub removed_bindings: Vec<(MessageId, String, RoleId)>,
    /// Tracked messages that no longer exist
    pub forgotten_messages: Vec<MessageId>,
    /// Default-role settings pointing at deleted roles (left untouched)
    pub missing_default_roles: Vec<RoleId>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.removed_bindings.is_empty()
            && self.forgotten_messages.is_empty()
            && self.missing_default_roles.is_empty()
    }
}

pub struct Reconciler<P> {
    platform: Arc<P>,
    store: SharedConfigStore,
    roles: RoleAssigner<P>,
}

impl<P: ChatPlatform> Reconciler<P> {
    pub fn new(platform: Arc<P>, store: SharedConfigStore) -> Self {
        Self {
            roles: RoleAssigner::new(platform.clone()),
            platform,
            store,
        }
    }

    pub fn store(&self) -> &SharedConfigStore {
        &self.store
    }

    /// Make sure every listed guild has a configuration record
    pub async fn sweep(&self, guild_ids: &[GuildId]) -> usize {
        let mut ensured = 0;
        for guild_id in guild_ids {
            match self.store.ensure(*guild_id).await {
                Ok(_) => ensured += 1,
                Err(e) => warn!("Failed to ensure configuration of guild {}: {}", guild_id, e),
            }
        }
        info!("Startup sweep ensured {}/{} guild(s)", ensured, guild_ids.len());
        ensured
    }

    pub async fn on_guild_join(&self, guild_id: GuildId) -> Result<GuildConfig> {
        self.store.ensure(guild_id).await
    }

    /// Drop the record of a guild the bot was removed from
    pub async fn on_guild_leave(&self, guild_id: GuildId) -> Result<bool> {
        let removed = self.store.remove_guild(guild_id).await?;
        if removed {
            info!("Removed configuration of departed guild {}", guild_id);
        }
        Ok(removed)
    }

    /// Hand a new member the configured join role
    pub async fn on_member_join(&self, guild_id: GuildId, user_id: UserId) -> Result<SyncOutcome> {
        let config = self.store.get(guild_id).await?;
        let Some(role_id) = config.default_role.join_role() else {
            return Ok(SyncOutcome::Ignored);
        };
        self.grant_tolerant(guild_id, user_id, role_id).await
    }

    pub async fn on_reaction_add(&self, event: &ReactionEvent) -> Result<SyncOutcome> {
        if event.user_id == self.platform.bot_user_id() {
            return Ok(SyncOutcome::Ignored);
        }

        let config = self.store.get(event.guild_id).await?;
        let Some(role_id) = config.binding(event.message_id, &event.emoji) else {
            return Ok(SyncOutcome::Ignored);
        };
        self.backfill_channel(&config, event).await;

        if let Some((provisional, stable)) = config.default_role.migration_pair() {
            self.migrate_if_provisional(event, provisional, stable).await;
        }

        self.grant_tolerant(event.guild_id, event.user_id, role_id)
            .await
    }

    /// A member removing a reaction loses the role; the bot removing its own
    /// tracking reaction tears the binding down.
    pub async fn on_reaction_remove(&self, event: &ReactionEvent) -> Result<SyncOutcome> {
        if event.user_id == self.platform.bot_user_id() {
            return self.teardown_binding(event).await;
        }

        let config = self.store.get(event.guild_id).await?;
        let Some(role_id) = config.binding(event.message_id, &event.emoji) else {
            return Ok(SyncOutcome::Ignored);
        };
        self.backfill_channel(&config, event).await;

        match self
            .roles
            .revoke(event.guild_id, event.user_id, role_id)
            .await
        {
            Ok(true) => Ok(SyncOutcome::Revoked(role_id)),
            Ok(false) => Ok(SyncOutcome::InSync(role_id)),
            Err(e) if e.is_not_found() => {
                debug!("Member {} is gone, nothing to revoke", event.user_id);
                Ok(SyncOutcome::InSync(role_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Every user's copy of one emoji was removed from a message
    pub async fn on_emoji_cleared(
        &self,
        guild_id: GuildId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<SyncOutcome> {
        let lock = self.store.lock(guild_id).await;
        match self.store.remove_reaction(&lock, message_id, emoji).await {
            Ok(role_id) => {
                info!(
                    "Reaction {} cleared from message {}, binding to role {} removed",
                    emoji, message_id, role_id
                );
                Ok(SyncOutcome::BindingRemoved(role_id))
            }
            Err(e) if e.is_not_found() => Ok(SyncOutcome::Ignored),
            Err(e) => Err(e),
        }
    }

    /// All reactions were cleared from a message, or the message was deleted
    pub async fn on_message_gone(
        &self,
        guild_id: GuildId,
        message_id: MessageId,
    ) -> Result<SyncOutcome> {
        let lock = self.store.lock(guild_id).await;
        if self.store.remove_message(&lock, message_id).await? {
            info!("Forgot bindings of message {} in guild {}", message_id, guild_id);
            Ok(SyncOutcome::MessageForgotten)
        } else {
            Ok(SyncOutcome::Ignored)
        }
    }

    /// Bind `emoji` on a message to `role_id` and add the tracking reaction.
    ///
    /// Returns the role previously bound to the same emoji, if any.
    pub async fn bind(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        role_id: RoleId,
    ) -> Result<Option<RoleId>> {
        self.store.ensure(guild_id).await?;
        let lock = self.store.lock(guild_id).await;

        if !self.platform.message_exists(channel_id, message_id).await? {
            return Err(BotError::not_found(format!("Message {}", message_id)));
        }
        if !self.platform.role_exists(guild_id, role_id).await? {
            return Err(BotError::RoleNotFound {
                role_id: role_id.get(),
            });
        }

        self.platform
            .add_reaction(channel_id, message_id, emoji)
            .await
            .map_err(|e| match e {
                PlatformError::InvalidEmoji => BotError::invalid_input("Invalid reaction !"),
                other => other.into(),
            })?;

        let replaced = self
            .store
            .upsert_reaction(&lock, message_id, channel_id, emoji, role_id)
            .await?;
        info!(
            "Bound {} on message {} to role {} in guild {}",
            emoji, message_id, role_id, guild_id
        );
        Ok(replaced)
    }

    /// Remove one binding together with its live reactions
    pub async fn unbind(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<RoleId> {
        let lock = self.store.lock(guild_id).await;
        let config = self.store.get(guild_id).await?;
        if config.binding(message_id, emoji).is_none() {
            return Err(BotError::not_found(format!(
                "Reaction {} on message {}",
                emoji, message_id
            )));
        }

        let bot = self.platform.bot_user_id();
        tolerate_missing(
            self.platform
                .remove_reaction(channel_id, message_id, emoji, bot)
                .await,
        )?;
        tolerate_missing(self.platform.clear_emoji(channel_id, message_id, emoji).await)?;

        let role_id = self.store.remove_reaction(&lock, message_id, emoji).await?;
        info!(
            "Unbound {} on message {} (role {}) in guild {}",
            emoji, message_id, role_id, guild_id
        );
        Ok(role_id)
    }

    /// Remove every binding of a message, returning how many were removed
    pub async fn unset_message(&self, guild_id: GuildId, message_id: MessageId) -> Result<usize> {
        let lock = self.store.lock(guild_id).await;
        let config = self.store.get(guild_id).await?;
        let Some(entry) = config.message(message_id) else {
            return Err(BotError::not_found(format!("Message {}", message_id)));
        };

        if let Some(channel_id) = entry.channel() {
            for emoji in entry.reactions.keys() {
                tolerate_missing(self.platform.clear_emoji(channel_id, message_id, emoji).await)?;
            }
        }

        self.store.remove_message(&lock, message_id).await?;
        Ok(entry.reactions.len())
    }

    /// Remove bindings whose role or message no longer exists.
    ///
    /// Live reactions of removed bindings are cleared as well.
    pub async fn prune(&self, guild_id: GuildId) -> Result<PruneReport> {
        let lock = self.store.lock(guild_id).await;
        let config = self.store.get(guild_id).await?;
        let mut report = PruneReport::default();

        for (message, entry) in &config.reaction_messages {
            let message_id = MessageId::new(*message);
            let channel_id = entry.channel();

            if let Some(channel_id) = channel_id {
                if !self.platform.message_exists(channel_id, message_id).await? {
                    self.store.remove_message(&lock, message_id).await?;
                    report.forgotten_messages.push(message_id);
                    continue;
                }
            }

            for (emoji, role) in &entry.reactions {
                let role_id = RoleId::new(*role);
                if self.platform.role_exists(guild_id, role_id).await? {
                    continue;
                }
                if let Some(channel_id) = channel_id {
                    tolerate_missing(
                        self.platform.clear_emoji(channel_id, message_id, emoji).await,
                    )?;
                }
                self.store.remove_reaction(&lock, message_id, emoji).await?;
                report
                    .removed_bindings
                    .push((message_id, emoji.clone(), role_id));
            }
        }

        for role_id in config.default_role.role_ids() {
            if !self.platform.role_exists(guild_id, role_id).await? {
                report.missing_default_roles.push(role_id);
            }
        }

        info!(
            "Pruned guild {}: {} binding(s), {} message(s) removed",
            guild_id,
            report.removed_bindings.len(),
            report.forgotten_messages.len()
        );
        Ok(report)
    }

    async fn teardown_binding(&self, event: &ReactionEvent) -> Result<SyncOutcome> {
        let lock = self.store.lock(event.guild_id).await;
        let config = self.store.get(event.guild_id).await?;
        if config.binding(event.message_id, &event.emoji).is_none() {
            return Ok(SyncOutcome::Ignored);
        }

        tolerate_missing(
            self.platform
                .clear_emoji(event.channel_id, event.message_id, &event.emoji)
                .await,
        )?;
        let role_id = self
            .store
            .remove_reaction(&lock, event.message_id, &event.emoji)
            .await?;

        info!(
            "Tracking reaction {} removed from message {}, binding to role {} torn down",
            event.emoji, event.message_id, role_id
        );
        Ok(SyncOutcome::BindingRemoved(role_id))
    }

    async fn migrate_if_provisional(
        &self,
        event: &ReactionEvent,
        provisional: RoleId,
        stable: RoleId,
    ) {
        match self
            .roles
            .holds(event.guild_id, event.user_id, provisional)
            .await
        {
            Ok(true) => {
                if let Err(e) = self
                    .roles
                    .migrate(event.guild_id, event.user_id, provisional, stable)
                    .await
                {
                    warn!("Migration of user {} incomplete: {}", event.user_id, e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!(
                "Could not read roles of user {} for migration: {}",
                event.user_id, e
            ),
        }
    }

    async fn grant_tolerant(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<SyncOutcome> {
        match self.roles.grant(guild_id, user_id, role_id).await {
            Ok(true) => Ok(SyncOutcome::Granted(role_id)),
            Ok(false) => Ok(SyncOutcome::InSync(role_id)),
            Err(BotError::RoleNotFound { .. }) => {
                warn!(
                    "Role {} of guild {} no longer exists, run prune_bindings",
                    role_id, guild_id
                );
                Ok(SyncOutcome::RoleMissing(role_id))
            }
            Err(e) => Err(e),
        }
    }

    async fn backfill_channel(&self, config: &GuildConfig, event: &ReactionEvent) {
        let known = config
            .message(event.message_id)
            .map(|m| m.channel_id.is_some())
            .unwrap_or(true);
        if known {
            return;
        }
        let lock: GuildLock = self.store.lock(event.guild_id).await;
        if let Err(e) = self
            .store
            .backfill_channel(&lock, event.message_id, event.channel_id)
            .await
        {
            warn!(
                "Failed to record channel of message {}: {}",
                event.message_id, e
            );
        }
    }
}

/// Treat an already-absent target as success
fn tolerate_missing(result: std::result::Result<(), PlatformError>) -> Result<()> {
    match result {
        Ok(()) | Err(PlatformError::NotFound) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
