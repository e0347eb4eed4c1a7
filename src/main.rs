use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use tracing::{error, info, warn};

/// Discord bot handing out roles on join and through reaction messages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the guild configuration file (overrides STATE_PATH)
    #[arg(long)]
    state_path: Option<std::path::PathBuf>,

    /// Prefix for prefix commands (overrides COMMAND_PREFIX)
    #[arg(long)]
    prefix: Option<String>,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to register commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

mod commands;
mod error;
mod events;
mod logging;
mod managers;
mod platform;
mod settings;
mod state;

use commands::{
    debug, default_role, help, logs, ping, prune_bindings, purge, reaction_message,
    set_default_role, shutdown,
};
use error::BotError;
use events::{
    handle_guild_create, handle_guild_delete, handle_member_add, handle_message_delete,
    handle_message_delete_bulk, handle_reaction_add, handle_reaction_remove,
    handle_reaction_remove_all, handle_reaction_remove_emoji,
};
use logging::SharedLogBuffer;
use managers::{PurgeCoordinator, PurgeRegistry, Reconciler};
use platform::DiscordPlatform;
use settings::Settings;
use state::{ConfigStore, SharedConfigStore};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub settings: Settings,
    pub store: SharedConfigStore,
    pub reconciler: Arc<Reconciler<DiscordPlatform>>,
    pub purges: Arc<PurgeCoordinator<DiscordPlatform>>,
    pub log_buffer: SharedLogBuffer,
}

async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            if let Err(e) = handle_guild_create(guild, data).await {
                error!("Failed to handle guild create: {}", e);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            if let Err(e) = handle_guild_delete(incomplete, data).await {
                error!("Failed to handle guild delete: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = handle_member_add(new_member, data).await {
                error!("Failed to handle new member: {}", e);
            }
        }
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            if let Err(e) = handle_reaction_add(add_reaction, data).await {
                error!("Failed to handle reaction add: {}", e);
            }
        }
        serenity::FullEvent::ReactionRemove { removed_reaction } => {
            if let Err(e) = handle_reaction_remove(removed_reaction, data).await {
                error!("Failed to handle reaction remove: {}", e);
            }
        }
        serenity::FullEvent::ReactionRemoveAll {
            channel_id,
            removed_from_message_id,
        } => {
            if let Err(e) =
                handle_reaction_remove_all(ctx, *channel_id, *removed_from_message_id, data).await
            {
                error!("Failed to handle reaction clear: {}", e);
            }
        }
        serenity::FullEvent::ReactionRemoveEmoji { removed_reactions } => {
            if let Err(e) = handle_reaction_remove_emoji(removed_reactions, data).await {
                error!("Failed to handle emoji clear: {}", e);
            }
        }
        serenity::FullEvent::MessageDelete {
            channel_id,
            deleted_message_id,
            guild_id,
        } => {
            if let Err(e) =
                handle_message_delete(ctx, *guild_id, *channel_id, *deleted_message_id, data).await
            {
                error!("Failed to handle message delete: {}", e);
            }
        }
        serenity::FullEvent::MessageDeleteBulk {
            channel_id,
            multiple_deleted_messages_ids,
            guild_id,
        } => {
            if let Err(e) = handle_message_delete_bulk(
                ctx,
                *guild_id,
                *channel_id,
                multiple_deleted_messages_ids,
                data,
            )
            .await
            {
                error!("Failed to handle bulk message delete: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Text shown to the invoker for a failed command
fn describe_error(error: &Error) -> String {
    match error.downcast_ref::<BotError>() {
        Some(BotError::InvalidInput { message }) => message.clone(),
        Some(BotError::PermissionDenied { .. }) => "Not allowed !".to_string(),
        Some(e) => format!("An error occurred: {}", e),
        None => format!("An error occurred: {}", error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let log_buffer = logging::create_log_buffer(1000);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(args.log_level))
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let token = std::env::var("DISCORD_TOKEN").context("Missing DISCORD_TOKEN environment variable")?;

    let mut settings = Settings::from_env();
    if let Some(path) = args.state_path {
        settings.state_path = path;
    }
    if let Some(prefix) = args.prefix.filter(|p| !p.trim().is_empty()) {
        settings.prefix = prefix;
    }

    // A store that cannot be read must not be replaced by an empty one
    let store_file = settings.store_file();
    info!("Loading guild configuration from {}...", store_file.display());
    let store: SharedConfigStore = Arc::new(
        ConfigStore::load(&store_file)
            .await
            .with_context(|| format!("Failed to load {}", store_file.display()))?,
    );

    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }

    let prefix = settings.prefix.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                ping(),
                help(),
                set_default_role(),
                default_role(),
                reaction_message(),
                prune_bindings(),
                purge(),
                debug(),
                logs(),
                shutdown(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(prefix),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' completed for {}",
                        ctx.command().qualified_name,
                        ctx.author().name
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx.say(describe_error(&error)).await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            warn!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                            let _ = ctx.say(format!("Invalid arguments: {}", error)).await;
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            warn!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say("Not allowed !").await;
                        }
                        poise::FrameworkError::NotAnOwner { ctx, .. } => {
                            warn!("User {} tried to use owner command '{}'", ctx.author().name, ctx.command().qualified_name);
                            let _ = ctx.say("Not allowed !").await;
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            warn!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                            let _ = ctx.say("This command must be used in a guild").await;
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let store = store.clone();
            let log_buffer = log_buffer.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                let platform = Arc::new(DiscordPlatform::new(ctx.http.clone(), ready.user.id));
                let reconciler = Arc::new(Reconciler::new(platform.clone(), store.clone()));
                let purges = Arc::new(PurgeCoordinator::new(
                    platform,
                    Arc::new(PurgeRegistry::new(settings.purge_timeout)),
                ));

                let guild_ids: Vec<serenity::GuildId> = ready.guilds.iter().map(|g| g.id).collect();
                if guild_ids.is_empty() {
                    warn!("Bot is not in any guilds - skipping startup sweep");
                } else {
                    reconciler.sweep(&guild_ids).await;
                }

                let guilds_to_register: Vec<serenity::GuildId> = match target_guild_id {
                    Some(gid) => vec![serenity::GuildId::new(gid)],
                    None => guild_ids,
                };

                if guild_commands || target_guild_id.is_some() {
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                Ok(Data {
                    settings,
                    store,
                    reconciler,
                    purges,
                    log_buffer,
                })
            })
        })
        .build();

    // Reaction events are part of the non-privileged set
    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("Enable MESSAGE_CONTENT and GUILD_MEMBERS under Bot -> Privileged Gateway Intents in the Discord Developer Portal");
            return Err(anyhow::anyhow!("Disallowed gateway intents"));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
