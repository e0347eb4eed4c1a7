//! Boundary between the reconciliation core and the chat service.
//!
//! Everything the core needs from Discord goes through [`ChatPlatform`], so the
//! managers can run against [`discord::DiscordPlatform`] in production and an
//! in-memory platform in tests.

pub mod discord;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use thiserror::Error;

pub use discord::DiscordPlatform;

/// First second of 2015, the origin of Discord snowflakes (milliseconds)
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Recoverable failures of a platform call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("not found")]
    NotFound,

    #[error("forbidden (check the bot's permissions and role position)")]
    Forbidden,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid emoji")]
    InvalidEmoji,

    #[error("{0}")]
    Other(String),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Operations consumed from the chat service.
///
/// Emoji are passed in their canonical text form (see [`emoji_key`]).
#[async_trait]
pub trait ChatPlatform: Send + Sync + 'static {
    fn bot_user_id(&self) -> UserId;

    async fn role_exists(&self, guild_id: GuildId, role_id: RoleId) -> PlatformResult<bool>;

    async fn member_roles(&self, guild_id: GuildId, user_id: UserId)
        -> PlatformResult<Vec<RoleId>>;

    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()>;

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()>;

    async fn message_exists(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<bool>;

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()>;

    /// Remove one user's copy of a reaction
    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        user_id: UserId,
    ) -> PlatformResult<()>;

    /// Remove every user's copy of one emoji
    async fn clear_emoji(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()>;

    /// Post a plain text message
    async fn send_message(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId)
        -> PlatformResult<()>;

    /// Ids of the messages in `first..=last`, oldest first
    async fn messages_between(
        &self,
        channel_id: ChannelId,
        first: MessageId,
        last: MessageId,
    ) -> PlatformResult<Vec<MessageId>>;

    async fn bulk_delete(&self, channel_id: ChannelId, message_ids: &[MessageId])
        -> PlatformResult<()>;
}

/// Canonical text form of a reaction, used as the key of a binding.
pub fn emoji_key(reaction: &poise::serenity_prelude::ReactionType) -> String {
    reaction.to_string()
}

/// Normalize user input into the canonical emoji form.
pub fn normalize_emoji(input: &str) -> PlatformResult<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PlatformError::InvalidEmoji);
    }
    poise::serenity_prelude::ReactionType::try_from(input)
        .map(|reaction| emoji_key(&reaction))
        .map_err(|_| PlatformError::InvalidEmoji)
}

/// Highest possible snowflake for the given instant.
///
/// Every message created at or before `at` has an id lower or equal to it.
pub fn snowflake_at(at: DateTime<Utc>) -> MessageId {
    let elapsed = (at.timestamp_millis() - DISCORD_EPOCH_MS).max(1) as u64;
    MessageId::new((elapsed << 22) | ((1 << 22) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_unicode_emoji() {
        assert_eq!(normalize_emoji(" 👍 ").as_deref(), Ok("👍"));
    }

    #[test]
    fn test_normalize_custom_emoji() {
        assert_eq!(
            normalize_emoji("<:party:123456789012345678>").as_deref(),
            Ok("<:party:123456789012345678>")
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert_eq!(normalize_emoji("   "), Err(PlatformError::InvalidEmoji));
    }

    #[test]
    fn test_snowflake_at_bounds_message_time() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let bound = snowflake_at(at);
        let created = (at.timestamp_millis() - DISCORD_EPOCH_MS) as u64;

        assert!(bound.get() >> 22 == created);
        assert!(MessageId::new(created << 22) <= bound);
        assert!(MessageId::new((created + 1) << 22) > bound);
    }
}
