pub mod default_role;
pub mod diagnostics;
pub mod general;
pub mod purge;
pub mod reaction_message;

pub use default_role::{default_role, set_default_role};
pub use diagnostics::{debug, logs, shutdown};
pub use general::{help, ping};
pub use purge::purge;
pub use reaction_message::{prune_bindings, reaction_message};

use crate::error::BotError;
use poise::serenity_prelude as serenity;

/// Guild of the invoking context; commands using it are `guild_only`
fn require_guild(ctx: crate::Context<'_>) -> Result<serenity::GuildId, BotError> {
    ctx.guild_id().ok_or_else(|| BotError::PermissionDenied {
        message: "This command must be used in a guild".to_string(),
    })
}
