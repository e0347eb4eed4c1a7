use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let prefix = &ctx.data().settings.prefix;
    let embed = serenity::CreateEmbed::new()
        .title("Bot Commands")
        .description(format!("Prefix commands start with `{}`.", prefix))
        .field("ping", "Check if the bot is running", false)
        .field(
            "set_default_role [role] [stable]",
            "No role disables it. One role is given to every new member. \
             With two roles, new members get the first one and swap it for the \
             second on their first reaction role (Manage Roles)",
            false,
        )
        .field("default_role", "Show the default role setting", false)
        .field(
            "reaction_message add <message_id> <emoji> <role>",
            "Grant <role> to members reacting with <emoji> on a message of this channel (Manage Roles)",
            false,
        )
        .field(
            "reaction_message remove <message_id> <emoji>",
            "Remove one reaction role (Manage Roles)",
            false,
        )
        .field(
            "reaction_message unset <message_id>",
            "Remove every reaction role of a message (Manage Roles)",
            false,
        )
        .field("reaction_message list [message_id]", "List reaction roles (Manage Roles)", false)
        .field(
            "prune_bindings",
            "Remove reaction roles whose role or message was deleted (Manage Roles)",
            false,
        )
        .field(
            "purge",
            "Delete messages from the command onwards after confirmation (Manage Messages)",
            false,
        )
        .field("debug / logs / shutdown", "Diagnostics (Owner)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
