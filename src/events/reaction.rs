use poise::serenity_prelude as serenity;
use tracing::{debug, error, info};

use crate::managers::ReactionEvent;
use crate::platform::emoji_key;
use crate::{Data, Error};

/// Guild of a channel, from the event itself or the channel lookup
pub async fn resolve_guild(
    ctx: &serenity::Context,
    guild_id: Option<serenity::GuildId>,
    channel_id: serenity::ChannelId,
) -> Option<serenity::GuildId> {
    if guild_id.is_some() {
        return guild_id;
    }
    match channel_id.to_channel(ctx).await {
        Ok(channel) => channel.guild().map(|c| c.guild_id),
        Err(e) => {
            debug!("Could not resolve guild of channel {}: {}", channel_id, e);
            None
        }
    }
}

/// Build a reconciler event, skipping reactions outside guilds
fn reaction_event(reaction: &serenity::Reaction) -> Option<ReactionEvent> {
    Some(ReactionEvent {
        guild_id: reaction.guild_id?,
        channel_id: reaction.channel_id,
        message_id: reaction.message_id,
        user_id: reaction.user_id?,
        emoji: emoji_key(&reaction.emoji),
    })
}

pub async fn handle_reaction_add(reaction: &serenity::Reaction, data: &Data) -> Result<(), Error> {
    let Some(event) = reaction_event(reaction) else {
        return Ok(());
    };

    match data
        .purges
        .on_reaction_add(event.user_id, event.channel_id, event.message_id, &event.emoji)
        .await
    {
        Ok(Some(deleted)) => {
            info!("Purge confirmed by {}: {} message(s) deleted", event.user_id, deleted);
            return Ok(());
        }
        Ok(None) => {}
        Err(e) => error!("Failed to run purge confirmed by {}: {}", event.user_id, e),
    }

    let outcome = data.reconciler.on_reaction_add(&event).await?;
    debug!("Reaction {} added on {}: {:?}", event.emoji, event.message_id, outcome);
    Ok(())
}

pub async fn handle_reaction_remove(
    reaction: &serenity::Reaction,
    data: &Data,
) -> Result<(), Error> {
    let Some(event) = reaction_event(reaction) else {
        return Ok(());
    };

    let outcome = data.reconciler.on_reaction_remove(&event).await?;
    debug!("Reaction {} removed from {}: {:?}", event.emoji, event.message_id, outcome);
    Ok(())
}

/// Every reaction was removed from a message
pub async fn handle_reaction_remove_all(
    ctx: &serenity::Context,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = resolve_guild(ctx, None, channel_id).await else {
        return Ok(());
    };

    let outcome = data.reconciler.on_message_gone(guild_id, message_id).await?;
    debug!("Reactions cleared from {}: {:?}", message_id, outcome);
    Ok(())
}

/// Every user's copy of one emoji was removed from a message
pub async fn handle_reaction_remove_emoji(
    reaction: &serenity::Reaction,
    data: &Data,
) -> Result<(), Error> {
    let Some(guild_id) = reaction.guild_id else {
        return Ok(());
    };

    let emoji = emoji_key(&reaction.emoji);
    let outcome = data
        .reconciler
        .on_emoji_cleared(guild_id, reaction.message_id, &emoji)
        .await?;
    debug!("Reaction {} cleared from {}: {:?}", emoji, reaction.message_id, outcome);
    Ok(())
}
