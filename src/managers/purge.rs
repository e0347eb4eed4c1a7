use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, MessageId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::platform::{snowflake_at, ChatPlatform, PlatformError};

/// Reaction used both as the confirmation affordance and the confirmation itself
pub const CONFIRM_EMOJI: &str = "✅";

/// Slack added to the local clock when bounding the purge window, so messages
/// stamped by a Discord clock running slightly ahead are still included
const CLOCK_SKEW_MARGIN_MS: i64 = 3_000;

/// Newest message id a confirmation received at `now` covers
pub fn confirmation_bound(now: DateTime<Utc>) -> MessageId {
    snowflake_at(now + chrono::Duration::milliseconds(CLOCK_SKEW_MARGIN_MS))
}

/// A purge waiting for its author's confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPurge {
    pub channel_id: ChannelId,
    /// The command message carrying the confirmation affordance
    pub message_id: MessageId,
    pub created_at: Instant,
}

/// Pending purges, at most one per user
pub struct PurgeRegistry {
    pending: DashMap<UserId, PendingPurge>,
    timeout: Duration,
}

impl PurgeRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a purge, returning the one it superseded
    pub fn begin(&self, user_id: UserId, pending: PendingPurge) -> Option<PendingPurge> {
        self.pending.insert(user_id, pending)
    }

    /// Consume the user's purge if the confirmation targets its message in
    /// its channel and arrives within the timeout.
    ///
    /// Expired records are left in place for [`Self::expire`] to clean up.
    pub fn confirm(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
        now: Instant,
    ) -> Option<PendingPurge> {
        self.pending
            .remove_if(&user_id, |_, pending| {
                pending.channel_id == channel_id
                    && pending.message_id == message_id
                    && now.saturating_duration_since(pending.created_at) <= self.timeout
            })
            .map(|(_, pending)| pending)
    }

    /// Drop the user's purge if it is still the one tagged to `message_id`
    pub fn expire(&self, user_id: UserId, message_id: MessageId) -> Option<PendingPurge> {
        self.pending
            .remove_if(&user_id, |_, pending| pending.message_id == message_id)
            .map(|(_, pending)| pending)
    }

    #[cfg(test)]
    pub fn get(&self, user_id: UserId) -> Option<PendingPurge> {
        self.pending.get(&user_id).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Runs the reaction-confirmed bulk deletion workflow
pub struct PurgeCoordinator<P> {
    platform: Arc<P>,
    registry: Arc<PurgeRegistry>,
}

impl<P: ChatPlatform> PurgeCoordinator<P> {
    pub fn new(platform: Arc<P>, registry: Arc<PurgeRegistry>) -> Self {
        Self { platform, registry }
    }

    pub fn registry(&self) -> &Arc<PurgeRegistry> {
        &self.registry
    }

    /// Register a purge for `user_id` tagged to the command message and put the
    /// confirmation affordance on it. The timeout runs on its own task.
    pub async fn start(
        self: &Arc<Self>,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<()> {
        let pending = PendingPurge {
            channel_id,
            message_id,
            created_at: Instant::now(),
        };
        if let Some(superseded) = self.registry.begin(user_id, pending) {
            debug!(
                "Purge on message {} superseded by {}",
                superseded.message_id, message_id
            );
            self.clear_affordance(&superseded).await;
        }

        if let Err(e) = self
            .platform
            .add_reaction(channel_id, message_id, CONFIRM_EMOJI)
            .await
        {
            self.registry.expire(user_id, message_id);
            return Err(e.into());
        }

        let coordinator = Arc::clone(self);
        let timeout = self.registry.timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if coordinator.expire(user_id, message_id).await {
                info!("Purge by {} timed out", user_id);
            }
        });

        info!(
            "Purge requested by {} in channel {}, waiting {}s for confirmation",
            user_id,
            channel_id,
            timeout.as_secs()
        );
        Ok(())
    }

    /// Discard the user's purge tagged to `message_id` and remove its affordance.
    ///
    /// Returns whether a purge was discarded.
    pub async fn expire(&self, user_id: UserId, message_id: MessageId) -> bool {
        match self.registry.expire(user_id, message_id) {
            Some(pending) => {
                self.clear_affordance(&pending).await;
                true
            }
            None => false,
        }
    }

    /// Handle a reaction that may confirm a pending purge.
    ///
    /// Returns the number of deleted messages when it did.
    pub async fn on_reaction_add(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<Option<usize>> {
        self.confirm(
            user_id,
            channel_id,
            message_id,
            emoji,
            Instant::now(),
            confirmation_bound(Utc::now()),
        )
        .await
    }

    /// Confirm at `now`, deleting every message from the command message up
    /// to `until` (both inclusive)
    pub async fn confirm(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
        now: Instant,
        until: MessageId,
    ) -> Result<Option<usize>> {
        if emoji != CONFIRM_EMOJI || user_id == self.platform.bot_user_id() {
            return Ok(None);
        }
        let Some(pending) = self.registry.confirm(user_id, channel_id, message_id, now) else {
            return Ok(None);
        };

        let until = until.max(pending.message_id);
        match self.delete_window(&pending, until).await {
            Ok(deleted) => {
                info!(
                    "Purge by {} deleted {} message(s) in channel {}",
                    user_id, deleted, channel_id
                );
                Ok(Some(deleted))
            }
            Err(e) => {
                // The record is consumed, so the timeout task will not clean up
                self.clear_affordance(&pending).await;
                let notice = format!("<@{}> Purge failed: {}", user_id, e);
                if let Err(send_err) = self.platform.send_message(channel_id, &notice).await {
                    warn!(
                        "Failed to report purge failure in channel {}: {}",
                        channel_id, send_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn delete_window(&self, pending: &PendingPurge, until: MessageId) -> Result<usize> {
        let message_ids = self
            .platform
            .messages_between(pending.channel_id, pending.message_id, until)
            .await?;
        self.platform
            .bulk_delete(pending.channel_id, &message_ids)
            .await?;
        Ok(message_ids.len())
    }

    async fn clear_affordance(&self, pending: &PendingPurge) {
        let bot = self.platform.bot_user_id();
        match self
            .platform
            .remove_reaction(pending.channel_id, pending.message_id, CONFIRM_EMOJI, bot)
            .await
        {
            Ok(()) | Err(PlatformError::NotFound) => {}
            Err(e) => warn!(
                "Failed to clear purge confirmation on message {}: {}",
                pending.message_id, e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockPlatform, BOT_ID};
    use std::collections::BTreeSet;

    const CHANNEL: u64 = 1;
    const USER: u64 = 2;
    const OTHER_USER: u64 = 3;

    fn coordinator(timeout: Duration) -> (Arc<PurgeCoordinator<MockPlatform>>, Arc<MockPlatform>) {
        let platform = Arc::new(MockPlatform::new());
        for id in 1..=10 {
            platform.add_message(CHANNEL, id);
        }
        let registry = Arc::new(PurgeRegistry::new(timeout));
        (
            Arc::new(PurgeCoordinator::new(platform.clone(), registry)),
            platform,
        )
    }

    fn ids(message: u64) -> (UserId, ChannelId, MessageId) {
        (
            UserId::new(USER),
            ChannelId::new(CHANNEL),
            MessageId::new(message),
        )
    }

    #[test]
    fn test_registry_confirm_checks_message_channel_and_time() {
        let registry = PurgeRegistry::new(Duration::from_secs(120));
        let (user, channel, message) = ids(5);
        let created_at = Instant::now();
        registry.begin(
            user,
            PendingPurge {
                channel_id: channel,
                message_id: message,
                created_at,
            },
        );

        assert!(registry
            .confirm(user, ChannelId::new(9), message, created_at)
            .is_none());
        assert!(registry
            .confirm(user, channel, MessageId::new(6), created_at)
            .is_none());
        assert!(registry
            .confirm(user, channel, message, created_at + Duration::from_secs(121))
            .is_none());
        assert_eq!(registry.len(), 1);

        let confirmed = registry.confirm(user, channel, message, created_at + Duration::from_secs(60));
        assert_eq!(confirmed.map(|p| p.message_id), Some(message));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_newer_purge_wins() {
        let registry = PurgeRegistry::new(Duration::from_secs(120));
        let (user, channel, _) = ids(1);
        let now = Instant::now();
        let old = PendingPurge {
            channel_id: channel,
            message_id: MessageId::new(5),
            created_at: now,
        };
        let new = PendingPurge {
            message_id: MessageId::new(7),
            ..old.clone()
        };

        assert!(registry.begin(user, old.clone()).is_none());
        assert_eq!(registry.begin(user, new.clone()), Some(old));

        // The superseded record can neither be confirmed nor expired
        assert!(registry.confirm(user, channel, MessageId::new(5), now).is_none());
        assert!(registry.expire(user, MessageId::new(5)).is_none());
        assert_eq!(registry.get(user), Some(new));
    }

    #[tokio::test]
    async fn test_confirmed_purge_deletes_window() {
        let (coordinator, platform) = coordinator(Duration::from_secs(120));
        let (user, channel, message) = ids(5);
        coordinator.start(user, channel, message).await.unwrap();
        assert_eq!(platform.reactors(5, CONFIRM_EMOJI), BTreeSet::from([BOT_ID]));

        let deleted = coordinator
            .confirm(user, channel, message, CONFIRM_EMOJI, Instant::now(), MessageId::new(8))
            .await
            .unwrap();

        assert_eq!(deleted, Some(4));
        assert_eq!(platform.deleted_message_ids(), vec![5, 6, 7, 8]);
        assert_eq!(platform.channel_message_ids(CHANNEL), vec![1, 2, 3, 4, 9, 10]);
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_confirmation_from_other_user_or_emoji_is_ignored() {
        let (coordinator, platform) = coordinator(Duration::from_secs(120));
        let (user, channel, message) = ids(5);
        coordinator.start(user, channel, message).await.unwrap();
        let now = Instant::now();
        let until = MessageId::new(10);

        let other = coordinator
            .confirm(UserId::new(OTHER_USER), channel, message, CONFIRM_EMOJI, now, until)
            .await
            .unwrap();
        let wrong_emoji = coordinator
            .confirm(user, channel, message, "👍", now, until)
            .await
            .unwrap();
        let bot = coordinator
            .confirm(UserId::new(BOT_ID), channel, message, CONFIRM_EMOJI, now, until)
            .await
            .unwrap();

        assert_eq!((other, wrong_emoji, bot), (None, None, None));
        assert!(platform.deleted_message_ids().is_empty());
        assert_eq!(coordinator.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_late_confirmation_deletes_nothing_and_expiry_clears_affordance() {
        let (coordinator, platform) = coordinator(Duration::from_secs(120));
        let (user, channel, message) = ids(5);
        coordinator.start(user, channel, message).await.unwrap();
        let late = Instant::now() + Duration::from_secs(121);

        let deleted = coordinator
            .confirm(user, channel, message, CONFIRM_EMOJI, late, MessageId::new(10))
            .await
            .unwrap();
        assert_eq!(deleted, None);
        assert!(platform.deleted_message_ids().is_empty());

        assert!(coordinator.expire(user, message).await);
        assert!(platform.reactors(5, CONFIRM_EMOJI).is_empty());
        assert!(coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_task_clears_affordance() {
        let (coordinator, platform) = coordinator(Duration::from_millis(20));
        let (user, channel, message) = ids(5);
        coordinator.start(user, channel, message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(coordinator.registry().is_empty());
        assert!(platform.reactors(5, CONFIRM_EMOJI).is_empty());
    }

    #[tokio::test]
    async fn test_superseded_purge_loses_affordance() {
        let (coordinator, platform) = coordinator(Duration::from_secs(120));
        let (user, channel, _) = ids(5);
        coordinator.start(user, channel, MessageId::new(5)).await.unwrap();
        coordinator.start(user, channel, MessageId::new(7)).await.unwrap();

        assert!(platform.reactors(5, CONFIRM_EMOJI).is_empty());
        assert_eq!(platform.reactors(7, CONFIRM_EMOJI), BTreeSet::from([BOT_ID]));

        let stale = coordinator
            .confirm(user, channel, MessageId::new(5), CONFIRM_EMOJI, Instant::now(), MessageId::new(10))
            .await
            .unwrap();
        assert_eq!(stale, None);
        assert!(platform.deleted_message_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_purge_clears_affordance_and_reports() {
        let (coordinator, platform) = coordinator(Duration::from_millis(50));
        let (user, channel, message) = ids(5);
        coordinator.start(user, channel, message).await.unwrap();
        platform.fail_deletes();

        let result = coordinator
            .confirm(user, channel, message, CONFIRM_EMOJI, Instant::now(), MessageId::new(8))
            .await;
        assert!(result.is_err());
        assert!(coordinator.registry().is_empty());
        assert!(platform.reactors(5, CONFIRM_EMOJI).is_empty());

        let sent = platform.sent_messages(CHANNEL);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("<@2> Purge failed"));

        // The timeout firing afterwards has nothing left to do
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(platform.reactors(5, CONFIRM_EMOJI).is_empty());
        assert_eq!(platform.channel_message_ids(CHANNEL).len(), 10);
    }

    #[tokio::test]
    async fn test_confirmation_covers_messages_slightly_ahead_of_local_clock() {
        let platform = Arc::new(MockPlatform::new());
        let now = Utc::now();
        let command = snowflake_at(now - chrono::Duration::seconds(5));
        let prompt = snowflake_at(now + chrono::Duration::seconds(1));
        let later = snowflake_at(now + chrono::Duration::seconds(30));
        for id in [command, prompt, later] {
            platform.add_message(CHANNEL, id.get());
        }
        let coordinator = Arc::new(PurgeCoordinator::new(
            platform.clone(),
            Arc::new(PurgeRegistry::new(Duration::from_secs(120))),
        ));
        let user = UserId::new(USER);
        let channel = ChannelId::new(CHANNEL);
        coordinator.start(user, channel, command).await.unwrap();

        let bound = confirmation_bound(now);
        assert!(prompt <= bound && bound < later);

        let deleted = coordinator
            .confirm(user, channel, command, CONFIRM_EMOJI, Instant::now(), bound)
            .await
            .unwrap();
        assert_eq!(deleted, Some(2));
        assert_eq!(platform.channel_message_ids(CHANNEL), vec![later.get()]);
    }

    #[tokio::test]
    async fn test_purges_of_different_users_are_independent() {
        let (coordinator, platform) = coordinator(Duration::from_secs(120));
        let channel = ChannelId::new(CHANNEL);
        coordinator
            .start(UserId::new(USER), channel, MessageId::new(5))
            .await
            .unwrap();
        coordinator
            .start(UserId::new(OTHER_USER), channel, MessageId::new(9))
            .await
            .unwrap();

        let deleted = coordinator
            .confirm(
                UserId::new(OTHER_USER),
                channel,
                MessageId::new(9),
                CONFIRM_EMOJI,
                Instant::now(),
                MessageId::new(10),
            )
            .await
            .unwrap();

        assert_eq!(deleted, Some(2));
        assert_eq!(coordinator.registry().len(), 1);
        assert_eq!(platform.reactors(5, CONFIRM_EMOJI), BTreeSet::from([BOT_ID]));
    }
}
