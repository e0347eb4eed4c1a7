use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, ChannelId, GetMessages, GuildId, Http, MessageId, ReactionType, RoleId,
    UserId,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ChatPlatform, PlatformError, PlatformResult};

/// Discord error code returned when a reaction uses an unknown emoji
const UNKNOWN_EMOJI: isize = 10014;

/// Discord refuses to bulk delete more than this many messages at once
const BULK_DELETE_LIMIT: usize = 100;

impl From<serenity::Error> for PlatformError {
    fn from(err: serenity::Error) -> Self {
        if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) = &err {
            match response.status_code.as_u16() {
                404 => return PlatformError::NotFound,
                403 => return PlatformError::Forbidden,
                429 => return PlatformError::RateLimited,
                400 if response.error.code == UNKNOWN_EMOJI => {
                    return PlatformError::InvalidEmoji
                }
                _ => {}
            }
        }
        PlatformError::Other(err.to_string())
    }
}

fn parse_reaction(emoji: &str) -> PlatformResult<ReactionType> {
    ReactionType::try_from(emoji).map_err(|_| PlatformError::InvalidEmoji)
}

/// [`ChatPlatform`] backed by serenity's HTTP client
pub struct DiscordPlatform {
    http: Arc<Http>,
    bot_user_id: UserId,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, bot_user_id: UserId) -> Self {
        Self { http, bot_user_id }
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn bot_user_id(&self) -> UserId {
        self.bot_user_id
    }

    async fn role_exists(&self, guild_id: GuildId, role_id: RoleId) -> PlatformResult<bool> {
        let roles = guild_id.roles(&*self.http).await?;
        Ok(roles.contains_key(&role_id))
    }

    async fn member_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Vec<RoleId>> {
        let member = guild_id.member(&*self.http, user_id).await?;
        Ok(member.roles)
    }

    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some("Reaction role"))
            .await?;
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, Some("Reaction role"))
            .await?;
        Ok(())
    }

    async fn message_exists(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<bool> {
        match channel_id.message(&*self.http, message_id).await {
            Ok(_) => Ok(true),
            Err(e) => match PlatformError::from(e) {
                PlatformError::NotFound => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        let reaction = parse_reaction(emoji)?;
        channel_id
            .create_reaction(&*self.http, message_id, reaction)
            .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        user_id: UserId,
    ) -> PlatformResult<()> {
        let reaction = parse_reaction(emoji)?;
        channel_id
            .delete_reaction(&*self.http, message_id, Some(user_id), reaction)
            .await?;
        Ok(())
    }

    async fn clear_emoji(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        let reaction = parse_reaction(emoji)?;
        channel_id
            .delete_reaction_emoji(&*self.http, message_id, reaction)
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()> {
        channel_id.say(&*self.http, content).await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<()> {
        channel_id.delete_message(&*self.http, message_id).await?;
        Ok(())
    }

    async fn messages_between(
        &self,
        channel_id: ChannelId,
        first: MessageId,
        last: MessageId,
    ) -> PlatformResult<Vec<MessageId>> {
        let mut ids = vec![first];
        let mut cursor = first;

        loop {
            let page = channel_id
                .messages(
                    &*self.http,
                    GetMessages::new().after(cursor).limit(BULK_DELETE_LIMIT as u8),
                )
                .await?;

            let Some(newest) = page.iter().map(|m| m.id).max() else {
                break;
            };

            ids.extend(page.iter().map(|m| m.id).filter(|id| *id <= last));

            if newest >= last || page.len() < BULK_DELETE_LIMIT {
                break;
            }
            cursor = newest;
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn bulk_delete(
        &self,
        channel_id: ChannelId,
        message_ids: &[MessageId],
    ) -> PlatformResult<()> {
        for chunk in message_ids.chunks(BULK_DELETE_LIMIT) {
            if chunk.len() == 1 {
                self.delete_message(channel_id, chunk[0]).await?;
                continue;
            }

            // Messages older than two weeks are rejected by the bulk endpoint
            if let Err(e) = channel_id.delete_messages(&*self.http, chunk).await {
                warn!(
                    "Bulk delete of {} messages in {} failed ({}), deleting one by one",
                    chunk.len(),
                    channel_id,
                    e
                );
                for message_id in chunk {
                    match self.delete_message(channel_id, *message_id).await {
                        Ok(()) | Err(PlatformError::NotFound) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        debug!("Deleted {} messages in {}", message_ids.len(), channel_id);
        Ok(())
    }
}
