use tracing::info;

use crate::managers::CONFIRM_EMOJI;
use crate::{Context, Error};

/// Delete messages from this command onwards after confirmation
///
/// React with the confirmation emoji on the command message to delete it and
/// everything posted after it in this channel.
#[poise::command(
    prefix_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES",
    required_bot_permissions = "MANAGE_MESSAGES | ADD_REACTIONS | READ_MESSAGE_HISTORY"
)]
pub async fn purge(ctx: Context<'_>) -> Result<(), Error> {
    let poise::Context::Prefix(prefix_ctx) = ctx else {
        return Err("purge is only available as a prefix command".into());
    };
    let msg = prefix_ctx.msg;

    let purges = &ctx.data().purges;
    purges.start(msg.author.id, msg.channel_id, msg.id).await?;

    let timeout = purges.registry().timeout().as_secs();
    info!(
        "{} started a purge in channel {}",
        ctx.author().name,
        msg.channel_id
    );
    ctx.say(format!(
        "React with {} on your command within {}s to delete it and every message after it.",
        CONFIRM_EMOJI, timeout
    ))
    .await?;
    Ok(())
}
