use poise::serenity_prelude as serenity;
use tracing::info;

use super::require_guild;
use crate::error::BotError;
use crate::managers::reconciler::PruneReport;
use crate::platform::normalize_emoji;
use crate::state::GuildConfig;
use crate::{Context, Error};

/// Discord caps an embed at 25 fields
const MAX_EMBED_FIELDS: usize = 25;

/// Room left under Discord's 2000 character message limit
const MAX_REPLY_LEN: usize = 1900;

fn parse_message_id(input: &str) -> Result<serenity::MessageId, BotError> {
    input
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(serenity::MessageId::new)
        .ok_or_else(|| BotError::invalid_input("Invalid message ID !"))
}

fn parse_emoji(input: &str) -> Result<String, BotError> {
    normalize_emoji(input).map_err(|_| BotError::invalid_input("Invalid reaction !"))
}

/// Manage reaction roles on messages of this channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES",
    subcommands("add", "remove", "unset", "list"),
    subcommand_required
)]
pub async fn reaction_message(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Grant a role to members reacting with an emoji
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "ID of a message in this channel"] message_id: String,
    #[description = "Emoji members react with"] emoji: String,
    #[description = "Role to grant"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let message_id = parse_message_id(&message_id)?;
    let emoji = parse_emoji(&emoji)?;

    let replaced = ctx
        .data()
        .reconciler
        .bind(guild_id, ctx.channel_id(), message_id, &emoji, role.id)
        .await?;

    let response = match replaced {
        Some(old) if old != role.id => {
            format!("Reaction {} now grants ``{}`` (was <@&{}>)", emoji, role.name, old)
        }
        _ => format!("Reaction {} add for ``{}``", emoji, role.name),
    };
    ctx.send(
        poise::CreateReply::default()
            .content(response)
            .allowed_mentions(serenity::CreateAllowedMentions::new()),
    )
    .await?;
    Ok(())
}

/// Stop granting a role for an emoji
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "ID of a message in this channel"] message_id: String,
    #[description = "Emoji to stop tracking"] emoji: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let message_id = parse_message_id(&message_id)?;
    let emoji = parse_emoji(&emoji)?;

    ctx.data()
        .reconciler
        .unbind(guild_id, ctx.channel_id(), message_id, &emoji)
        .await?;

    ctx.say(format!("Reaction {} remove", emoji)).await?;
    Ok(())
}

/// Remove every reaction role of a message
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn unset(
    ctx: Context<'_>,
    #[description = "ID of the message"] message_id: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let message_id = parse_message_id(&message_id)?;

    let removed = ctx
        .data()
        .reconciler
        .unset_message(guild_id, message_id)
        .await?;

    ctx.say(format!("Message remove ({} reaction role(s))", removed))
        .await?;
    Ok(())
}

/// List reaction roles
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn list(
    ctx: Context<'_>,
    #[description = "Only show this message"] message_id: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let filter = message_id.as_deref().map(parse_message_id).transpose()?;
    let config = ctx.data().store.get(guild_id).await?;

    let embed = bindings_embed(&config, filter);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

fn bindings_embed(config: &GuildConfig, filter: Option<serenity::MessageId>) -> serenity::CreateEmbed {
    let mut embed = serenity::CreateEmbed::new()
        .title("Reaction roles")
        .color(0x3498db);

    let messages: Vec<_> = config
        .reaction_messages
        .iter()
        .filter(|(id, _)| filter.map_or(true, |f| f.get() == **id))
        .collect();

    if messages.is_empty() {
        return embed.description("No reaction roles configured.");
    }

    for (message_id, entry) in messages.iter().take(MAX_EMBED_FIELDS) {
        let location = entry
            .channel_id
            .map(|c| format!(" in <#{}>", c))
            .unwrap_or_default();
        let lines: Vec<String> = entry
            .reactions
            .iter()
            .map(|(emoji, role)| format!("{} → <@&{}>", emoji, role))
            .collect();
        embed = embed.field(format!("Message {}{}", message_id, location), lines.join("\n"), false);
    }

    if messages.len() > MAX_EMBED_FIELDS {
        embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
            "{} more message(s) not shown",
            messages.len() - MAX_EMBED_FIELDS
        )));
    }
    embed
}

/// Remove reaction roles whose role or message no longer exists
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn prune_bindings(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.defer().await?;

    let report = ctx.data().reconciler.prune(guild_id).await?;
    info!(
        "{} pruned bindings of guild {}: {:?}",
        ctx.author().name,
        guild_id,
        report
    );

    if report.is_empty() {
        ctx.say("All reaction roles resolve, nothing to prune.").await?;
        return Ok(());
    }

    ctx.say(prune_summary(&report)).await?;
    Ok(())
}

/// Chat reply for a prune, cut on a line boundary to fit one message
fn prune_summary(report: &PruneReport) -> String {
    let mut lines = vec!["**Prune complete:**".to_string(), String::new()];
    if !report.removed_bindings.is_empty() {
        lines.push(format!("Removed bindings ({}):", report.removed_bindings.len()));
        for (message_id, emoji, role_id) in &report.removed_bindings {
            lines.push(format!("  - {} on {} (deleted role {})", emoji, message_id, role_id));
        }
        lines.push(String::new());
    }
    if !report.forgotten_messages.is_empty() {
        lines.push(format!(
            "Forgotten messages ({}):",
            report.forgotten_messages.len()
        ));
        for message_id in &report.forgotten_messages {
            lines.push(format!("  - {}", message_id));
        }
        lines.push(String::new());
    }
    if !report.missing_default_roles.is_empty() {
        lines.push("The default role setting points at deleted role(s), update it with set_default_role:".to_string());
        for role_id in &report.missing_default_roles {
            lines.push(format!("  - {}", role_id));
        }
    }

    let mut response = String::new();
    for (shown, line) in lines.iter().enumerate() {
        if response.len() + line.len() + 1 > MAX_REPLY_LEN {
            response.push_str(&format!("... and {} more line(s)", lines.len() - shown));
            break;
        }
        response.push_str(line);
        response.push('\n');
    }
    response.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_id() {
        assert_eq!(
            parse_message_id(" 1234 ").unwrap(),
            serenity::MessageId::new(1234)
        );
        assert!(matches!(
            parse_message_id("abc"),
            Err(BotError::InvalidInput { .. })
        ));
        assert!(parse_message_id("0").is_err());
    }

    #[test]
    fn test_parse_emoji_rejects_blank() {
        assert_eq!(parse_emoji("🎉").unwrap(), "🎉");
        assert!(matches!(parse_emoji(""), Err(BotError::InvalidInput { .. })));
    }

    #[test]
    fn test_prune_summary_fits_one_message() {
        let report = PruneReport {
            removed_bindings: (1..=200)
                .map(|i| {
                    (
                        serenity::MessageId::new(100_000_000_000_000_000 + i),
                        "🎉".to_string(),
                        serenity::RoleId::new(200_000_000_000_000_000 + i),
                    )
                })
                .collect(),
            forgotten_messages: vec![serenity::MessageId::new(7)],
            missing_default_roles: vec![],
        };

        let summary = prune_summary(&report);
        assert!(summary.len() <= MAX_REPLY_LEN + 40);
        assert!(summary.starts_with("**Prune complete:**"));
        assert!(summary.contains("Removed bindings (200):"));
        assert!(summary.ends_with("more line(s)"));
    }

    #[test]
    fn test_prune_summary_short_report_is_complete() {
        let report = PruneReport {
            removed_bindings: vec![],
            forgotten_messages: vec![serenity::MessageId::new(7)],
            missing_default_roles: vec![serenity::RoleId::new(9)],
        };

        let summary = prune_summary(&report);
        assert!(summary.contains("Forgotten messages (1):\n  - 7"));
        assert!(summary.ends_with("  - 9"));
    }
}
