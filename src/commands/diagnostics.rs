use tracing::{info, warn};

use super::require_guild;
use crate::error::BotError;
use crate::{Context, Error};

/// Longest code block that still fits a Discord message
const MAX_BLOCK_LEN: usize = 1900;

fn code_block(language: &str, content: &str) -> String {
    let mut content = content.to_string();
    if content.len() > MAX_BLOCK_LEN {
        let mut cut = MAX_BLOCK_LEN;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("\n...");
    }
    format!("```{}\n{}\n```", language, content)
}

/// Dump this guild's stored configuration
#[poise::command(prefix_command, slash_command, guild_only, owners_only)]
pub async fn debug(
    ctx: Context<'_>,
    #[description = "default_role or reaction_messages"] field: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let config = ctx.data().store.get(guild_id).await?;

    let value = serde_json::to_value(&config)?;
    let value = match field.as_deref() {
        None => value,
        Some(name) => value
            .get(name)
            .cloned()
            .ok_or_else(|| BotError::invalid_input(format!("Unknown field `{}`", name)))?,
    };

    let configured = ctx.data().store.guild_ids().await.len();
    let registry = ctx.data().purges.registry();
    let pending = if registry.is_empty() {
        "no pending purge".to_string()
    } else {
        format!("{} pending purge(s)", registry.len())
    };

    ctx.say(format!(
        "Guild {} ({} configured, {})\n{}",
        guild_id,
        configured,
        pending,
        code_block("json", &serde_json::to_string_pretty(&value)?)
    ))
    .await?;
    Ok(())
}

/// Show recent log lines
#[poise::command(prefix_command, slash_command, owners_only)]
pub async fn logs(
    ctx: Context<'_>,
    #[description = "Number of lines (default 20)"] count: Option<usize>,
    #[description = "Only warnings and errors"] warnings_only: Option<bool>,
) -> Result<(), Error> {
    let count = count.unwrap_or(20).clamp(1, 100);
    let entries = if warnings_only.unwrap_or(false) {
        ctx.data().log_buffer.get_recent_at(count, tracing::Level::WARN)
    } else {
        ctx.data().log_buffer.get_recent(count)
    };

    if entries.is_empty() {
        ctx.say("No log lines captured yet.").await?;
        return Ok(());
    }

    // Keep the newest lines when the block overflows
    let lines: Vec<String> = entries.iter().map(|e| e.format()).collect();
    let mut text = String::new();
    for line in lines.iter().rev() {
        if text.len() + line.len() + 1 > MAX_BLOCK_LEN {
            break;
        }
        text.insert_str(0, &format!("{}\n", line));
    }

    ctx.send(poise::CreateReply::default()
        .content(code_block("", text.trim_end()))
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Stop the bot
#[poise::command(prefix_command, slash_command, owners_only)]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    warn!("Shutdown requested by {} ({})", ctx.author().name, ctx.author().id);
    ctx.say("Shutdown !").await?;

    ctx.framework().shard_manager().shutdown_all().await;
    info!("All shards stopped");
    Ok(())
}
