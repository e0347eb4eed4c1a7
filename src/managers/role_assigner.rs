use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::platform::ChatPlatform;

/// Grants and revokes roles on behalf of the reconciler
pub struct RoleAssigner<P> {
    platform: Arc<P>,
}

impl<P: ChatPlatform> RoleAssigner<P> {
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Whether the member currently holds `role_id`
    pub async fn holds(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let roles = self.platform.member_roles(guild_id, user_id).await?;
        Ok(roles.contains(&role_id))
    }

    /// Give a role to a member.
    ///
    /// Returns whether the member's roles changed. Fails with `RoleNotFound`
    /// if the role no longer exists in the guild.
    pub async fn grant(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<bool> {
        if !self.platform.role_exists(guild_id, role_id).await? {
            return Err(BotError::RoleNotFound {
                role_id: role_id.get(),
            });
        }
        if self.holds(guild_id, user_id, role_id).await? {
            debug!("User {} already holds role {}", user_id, role_id);
            return Ok(false);
        }

        self.platform.grant_role(guild_id, user_id, role_id).await?;
        info!("Assigned role {} to user {} in guild {}", role_id, user_id, guild_id);
        Ok(true)
    }

    /// Take a role from a member. Missing roles and non-holders are no-ops.
    pub async fn revoke(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<bool> {
        if !self.platform.role_exists(guild_id, role_id).await? {
            debug!("Role {} no longer exists in guild {}", role_id, guild_id);
            return Ok(false);
        }
        if !self.holds(guild_id, user_id, role_id).await? {
            return Ok(false);
        }

        self.platform.revoke_role(guild_id, user_id, role_id).await?;
        info!("Removed role {} from user {} in guild {}", role_id, user_id, guild_id);
        Ok(true)
    }

    /// Swap the provisional role for the stable one.
    ///
    /// Both steps are always attempted; the first failure is returned.
    pub async fn migrate(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        provisional: RoleId,
        stable: RoleId,
    ) -> Result<()> {
        let revoked = self.revoke(guild_id, user_id, provisional).await;
        if let Err(e) = &revoked {
            warn!(
                "Failed to remove provisional role {} from user {}: {}",
                provisional, user_id, e
            );
        }

        let granted = self.grant(guild_id, user_id, stable).await;
        if let Err(e) = &granted {
            warn!(
                "Failed to assign stable role {} to user {}: {}",
                stable, user_id, e
            );
        }

        revoked?;
        granted?;
        info!(
            "Migrated user {} from provisional role {} to {}",
            user_id, provisional, stable
        );
        Ok(())
    }
}
