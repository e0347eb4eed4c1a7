use poise::serenity_prelude as serenity;
use tracing::{debug, info, warn};

use crate::managers::SyncOutcome;
use crate::{Data, Error};

/// Handle when the bot joins a new guild or starts up
pub async fn handle_guild_create(guild: &serenity::Guild, data: &Data) -> Result<(), Error> {
    debug!("Processing guild: {} ({})", guild.name, guild.id);
    data.reconciler.on_guild_join(guild.id).await?;
    Ok(())
}

/// Handle when the bot is removed from a guild
pub async fn handle_guild_delete(
    incomplete: &serenity::UnavailableGuild,
    data: &Data,
) -> Result<(), Error> {
    // An outage also produces this event; the configuration must survive it
    if incomplete.unavailable {
        warn!("Guild {} became unavailable", incomplete.id);
        return Ok(());
    }

    info!("Removed from guild {}", incomplete.id);
    data.reconciler.on_guild_leave(incomplete.id).await?;
    Ok(())
}

/// Handle when a new member joins the guild
pub async fn handle_member_add(new_member: &serenity::Member, data: &Data) -> Result<(), Error> {
    if new_member.user.bot {
        return Ok(());
    }

    let outcome = data
        .reconciler
        .on_member_join(new_member.guild_id, new_member.user.id)
        .await?;

    match outcome {
        SyncOutcome::Granted(role_id) => info!(
            "New member {} received default role {} in guild {}",
            new_member.user.name, role_id, new_member.guild_id
        ),
        other => debug!(
            "New member {} in guild {}: {:?}",
            new_member.user.name, new_member.guild_id, other
        ),
    }
    Ok(())
}
