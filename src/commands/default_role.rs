use poise::serenity_prelude as serenity;
use tracing::info;

use super::require_guild;
use crate::state::DefaultRole;
use crate::{Context, Error};

/// Set the role given to new members
///
/// No role disables it; two roles configure a provisional role that is
/// replaced by the stable one on the member's first reaction role.
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    required_permissions = "MANAGE_ROLES"
)]
pub async fn set_default_role(
    ctx: Context<'_>,
    #[description = "Role for new members (provisional if a stable role is given)"]
    role: Option<serenity::Role>,
    #[description = "Role replacing the provisional one on first reaction"]
    stable: Option<serenity::Role>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;

    let setting = DefaultRole::from_roles(
        role.as_ref().map(|r| r.id),
        stable.as_ref().map(|r| r.id),
    );

    let store = &ctx.data().store;
    store.ensure(guild_id).await?;
    {
        let lock = store.lock(guild_id).await;
        store.set_default_role(&lock, setting).await?;
    }

    let response = match (&role, &stable) {
        (None, None) => "Default role disabled".to_string(),
        (Some(r), None) | (None, Some(r)) => {
            format!("Role ``{}`` set to default role", r.name)
        }
        (Some(provisional), Some(stable)) => format!(
            "New members get ``{}`` until their first reaction role, then ``{}``",
            provisional.name, stable.name
        ),
    };
    info!(
        "{} changed default role of guild {} to {:?}",
        ctx.author().name,
        guild_id,
        setting
    );
    ctx.say(response).await?;
    Ok(())
}

/// Show the role given to new members
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn default_role(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let config = ctx.data().store.get(guild_id).await?;

    let embed = serenity::CreateEmbed::new()
        .title("Default role")
        .description(config.default_role.to_string())
        .color(0x3498db);
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}
