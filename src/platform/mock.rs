//! In-memory [`ChatPlatform`] for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{ChatPlatform, PlatformError, PlatformResult};

pub const BOT_ID: u64 = 999;

#[derive(Default)]
struct MockState {
    roles: HashSet<(GuildId, RoleId)>,
    members: HashMap<(GuildId, UserId), HashSet<RoleId>>,
    messages: BTreeMap<ChannelId, BTreeSet<MessageId>>,
    /// (message, emoji) -> users that reacted
    reactions: BTreeMap<(MessageId, String), BTreeSet<UserId>>,
    deleted: Vec<MessageId>,
    /// Text posted through `send_message`
    sent: Vec<(ChannelId, String)>,
    failing_revokes: HashSet<RoleId>,
    failing_deletes: bool,
}

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, guild: u64, role: u64) {
        self.state
            .lock()
            .roles
            .insert((GuildId::new(guild), RoleId::new(role)));
    }

    pub fn delete_role(&self, guild: u64, role: u64) {
        self.state
            .lock()
            .roles
            .remove(&(GuildId::new(guild), RoleId::new(role)));
    }

    pub fn add_member(&self, guild: u64, user: u64, roles: &[u64]) {
        self.state.lock().members.insert(
            (GuildId::new(guild), UserId::new(user)),
            roles.iter().copied().map(RoleId::new).collect(),
        );
    }

    pub fn member_role_ids(&self, guild: u64, user: u64) -> BTreeSet<u64> {
        self.state
            .lock()
            .members
            .get(&(GuildId::new(guild), UserId::new(user)))
            .map(|roles| roles.iter().map(|r| r.get()).collect())
            .unwrap_or_default()
    }

    pub fn add_message(&self, channel: u64, message: u64) {
        self.state
            .lock()
            .messages
            .entry(ChannelId::new(channel))
            .or_default()
            .insert(MessageId::new(message));
    }

    pub fn remove_message(&self, channel: u64, message: u64) {
        if let Some(messages) = self.state.lock().messages.get_mut(&ChannelId::new(channel)) {
            messages.remove(&MessageId::new(message));
        }
    }

    pub fn channel_message_ids(&self, channel: u64) -> Vec<u64> {
        self.state
            .lock()
            .messages
            .get(&ChannelId::new(channel))
            .map(|ids| ids.iter().map(|id| id.get()).collect())
            .unwrap_or_default()
    }

    pub fn deleted_message_ids(&self) -> Vec<u64> {
        self.state.lock().deleted.iter().map(|id| id.get()).collect()
    }

    pub fn react(&self, message: u64, emoji: &str, user: u64) {
        self.state
            .lock()
            .reactions
            .entry((MessageId::new(message), emoji.to_string()))
            .or_default()
            .insert(UserId::new(user));
    }

    pub fn reactors(&self, message: u64, emoji: &str) -> BTreeSet<u64> {
        self.state
            .lock()
            .reactions
            .get(&(MessageId::new(message), emoji.to_string()))
            .map(|users| users.iter().map(|u| u.get()).collect())
            .unwrap_or_default()
    }

    pub fn fail_revokes_of(&self, role: u64) {
        self.state.lock().failing_revokes.insert(RoleId::new(role));
    }

    /// Make every message deletion fail as rate limited
    pub fn fail_deletes(&self) {
        self.state.lock().failing_deletes = true;
    }

    pub fn sent_messages(&self, channel: u64) -> Vec<String> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(id, _)| id.get() == channel)
            .map(|(_, content)| content.clone())
            .collect()
    }

    fn require_message(
        state: &MockState,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<()> {
        match state.messages.get(&channel_id) {
            Some(ids) if ids.contains(&message_id) => Ok(()),
            _ => Err(PlatformError::NotFound),
        }
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    fn bot_user_id(&self) -> UserId {
        UserId::new(BOT_ID)
    }

    async fn role_exists(&self, guild_id: GuildId, role_id: RoleId) -> PlatformResult<bool> {
        Ok(self.state.lock().roles.contains(&(guild_id, role_id)))
    }

    async fn member_roles(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Vec<RoleId>> {
        self.state
            .lock()
            .members
            .get(&(guild_id, user_id))
            .map(|roles| roles.iter().copied().collect())
            .ok_or(PlatformError::NotFound)
    }

    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if !state.roles.contains(&(guild_id, role_id)) {
            return Err(PlatformError::NotFound);
        }
        state
            .members
            .get_mut(&(guild_id, user_id))
            .ok_or(PlatformError::NotFound)?
            .insert(role_id);
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.failing_revokes.contains(&role_id) {
            return Err(PlatformError::Forbidden);
        }
        state
            .members
            .get_mut(&(guild_id, user_id))
            .ok_or(PlatformError::NotFound)?
            .remove(&role_id);
        Ok(())
    }

    async fn message_exists(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<bool> {
        let state = self.state.lock();
        Ok(Self::require_message(&state, channel_id, message_id).is_ok())
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::require_message(&state, channel_id, message_id)?;
        state
            .reactions
            .entry((message_id, emoji.to_string()))
            .or_default()
            .insert(UserId::new(BOT_ID));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        user_id: UserId,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::require_message(&state, channel_id, message_id)?;
        let key = (message_id, emoji.to_string());
        let users = state.reactions.get_mut(&key).ok_or(PlatformError::NotFound)?;
        if !users.remove(&user_id) {
            return Err(PlatformError::NotFound);
        }
        if users.is_empty() {
            state.reactions.remove(&key);
        }
        Ok(())
    }

    async fn clear_emoji(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        Self::require_message(&state, channel_id, message_id)?;
        state.reactions.remove(&(message_id, emoji.to_string()));
        Ok(())
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> PlatformResult<()> {
        self.state
            .lock()
            .sent
            .push((channel_id, content.to_string()));
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> PlatformResult<()> {
        {
            let state = self.state.lock();
            Self::require_message(&state, channel_id, message_id)?;
        }
        self.bulk_delete(channel_id, &[message_id]).await
    }

    async fn messages_between(
        &self,
        channel_id: ChannelId,
        first: MessageId,
        last: MessageId,
    ) -> PlatformResult<Vec<MessageId>> {
        let state = self.state.lock();
        Ok(state
            .messages
            .get(&channel_id)
            .map(|ids| ids.range(first..=last).copied().collect())
            .unwrap_or_default())
    }

    async fn bulk_delete(
        &self,
        channel_id: ChannelId,
        message_ids: &[MessageId],
    ) -> PlatformResult<()> {
        let mut state = self.state.lock();
        if state.failing_deletes {
            return Err(PlatformError::RateLimited);
        }
        let MockState {
            messages,
            reactions,
            deleted,
            ..
        } = &mut *state;
        let channel = messages.get_mut(&channel_id).ok_or(PlatformError::NotFound)?;
        for id in message_ids {
            if channel.remove(id) {
                deleted.push(*id);
                reactions.retain(|(message, _), _| message != id);
            }
        }
        Ok(())
    }
}
