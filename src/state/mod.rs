pub mod config_store;
pub mod guild_config;

pub use config_store::{ConfigStore, GuildLock, SharedConfigStore};
pub use guild_config::{DefaultRole, GuildConfig};
