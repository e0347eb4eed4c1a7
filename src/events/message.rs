use poise::serenity_prelude as serenity;
use tracing::debug;

use super::reaction::resolve_guild;
use crate::{Data, Error};

/// Forget the bindings of a deleted message
pub async fn handle_message_delete(
    ctx: &serenity::Context,
    guild_id: Option<serenity::GuildId>,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = resolve_guild(ctx, guild_id, channel_id).await else {
        return Ok(());
    };

    let outcome = data.reconciler.on_message_gone(guild_id, message_id).await?;
    debug!("Message {} deleted: {:?}", message_id, outcome);
    Ok(())
}

/// Forget the bindings of every message in a bulk deletion
pub async fn handle_message_delete_bulk(
    ctx: &serenity::Context,
    guild_id: Option<serenity::GuildId>,
    channel_id: serenity::ChannelId,
    message_ids: &[serenity::MessageId],
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = resolve_guild(ctx, guild_id, channel_id).await else {
        return Ok(());
    };

    for message_id in message_ids {
        data.reconciler.on_message_gone(guild_id, *message_id).await?;
    }
    Ok(())
}
