use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use super::guild_config::{migrate_legacy_guild, DefaultRole, GuildConfig};
use crate::error::{BotError, Result};

/// Current on-disk schema version
const STORE_VERSION: u32 = 2;

/// On-disk layout of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    /// Schema version for migrations
    version: u32,

    /// Last update timestamp
    last_updated: u64,

    /// Guild ID -> configuration
    guilds: BTreeMap<u64, GuildConfig>,
}

/// Exclusive access to one guild's configuration.
///
/// Every mutation takes a `GuildLock`, so a caller can hold it across a whole
/// read / platform call / write sequence without another handler for the same
/// guild interleaving. Locks of different guilds are independent.
pub struct GuildLock {
    guild_id: GuildId,
    _guard: OwnedMutexGuard<()>,
}

impl GuildLock {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }
}

/// Persisted guild configurations, backed by a single JSON file
pub struct ConfigStore {
    path: PathBuf,
    guilds: RwLock<HashMap<GuildId, GuildConfig>>,
    locks: DashMap<GuildId, Arc<Mutex<()>>>,
    /// Serializes snapshot + file write across guilds
    write_lock: Mutex<()>,
}

pub type SharedConfigStore = Arc<ConfigStore>;

impl ConfigStore {
    /// Load the store from `path`, starting empty if the file does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.display().to_string();

        let guilds = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let mut value: serde_json::Value =
                    serde_json::from_str(&content).map_err(|e| BotError::StateParse {
                        path: path_str.clone(),
                        source: e,
                    })?;

                let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
                if version < STORE_VERSION as u64 {
                    info!(
                        "Migrating guild config from version {} to {}",
                        version, STORE_VERSION
                    );
                    value = migrate_legacy_file(value);
                }

                let file: StoreFile =
                    serde_json::from_value(value).map_err(|e| BotError::StateParse {
                        path: path_str.clone(),
                        source: e,
                    })?;

                file.guilds
                    .into_iter()
                    .filter(|(id, _)| *id != 0)
                    .map(|(id, mut config)| {
                        let dropped = config.drop_zero_ids();
                        if dropped > 0 {
                            warn!("Dropped {} zero id(s) from the record of guild {}", dropped, id);
                        }
                        (GuildId::new(id), config)
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No guild config at {}, starting empty", path_str);
                HashMap::new()
            }
            Err(e) => {
                return Err(BotError::StateLoad {
                    path: path_str,
                    source: e,
                })
            }
        };

        info!("Loaded configuration for {} guild(s)", guilds.len());

        Ok(Self {
            path,
            guilds: RwLock::new(guilds),
            locks: DashMap::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Take the per-guild lock. Must not be held while calling [`Self::ensure`]
    /// or [`Self::remove_guild`] for the same guild.
    pub async fn lock(&self, guild_id: GuildId) -> GuildLock {
        let mutex = self
            .locks
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        GuildLock {
            guild_id,
            _guard: mutex.lock_owned().await,
        }
    }

    /// Return the guild's config, creating and persisting a default one if absent
    pub async fn ensure(&self, guild_id: GuildId) -> Result<GuildConfig> {
        let lock = self.lock(guild_id).await;
        if let Some(config) = self.guilds.read().await.get(&guild_id) {
            return Ok(config.clone());
        }

        let config = GuildConfig::default();
        self.commit(&lock, |guilds| {
            guilds.insert(guild_id, config.clone());
            Ok(())
        })
        .await?;

        info!("Created configuration for guild {}", guild_id);
        Ok(config)
    }

    pub async fn get(&self, guild_id: GuildId) -> Result<GuildConfig> {
        self.guilds
            .read()
            .await
            .get(&guild_id)
            .cloned()
            .ok_or(BotError::NotConfigured {
                guild_id: guild_id.get(),
            })
    }

    pub async fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn set_default_role(&self, lock: &GuildLock, role: DefaultRole) -> Result<()> {
        self.update(lock, |config| {
            config.default_role = role;
            Ok(())
        })
        .await?;
        info!("Default role of guild {} set to {:?}", lock.guild_id, role);
        Ok(())
    }

    /// Bind `emoji` on `message_id` to `role_id`, returning the role it replaced
    pub async fn upsert_reaction(
        &self,
        lock: &GuildLock,
        message_id: MessageId,
        channel_id: ChannelId,
        emoji: &str,
        role_id: RoleId,
    ) -> Result<Option<RoleId>> {
        self.update(lock, |config| {
            Ok(config.upsert_binding(message_id, channel_id, emoji, role_id))
        })
        .await
    }

    /// Remove one binding; fails with `NotFound` if it does not exist
    pub async fn remove_reaction(
        &self,
        lock: &GuildLock,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<RoleId> {
        self.update(lock, |config| {
            config.remove_binding(message_id, emoji).ok_or_else(|| {
                BotError::not_found(format!("Reaction {} on message {}", emoji, message_id))
            })
        })
        .await
    }

    /// Remove every binding of a message, returning whether it was tracked
    pub async fn remove_message(&self, lock: &GuildLock, message_id: MessageId) -> Result<bool> {
        if self.get(lock.guild_id).await?.message(message_id).is_none() {
            return Ok(false);
        }
        self.update(lock, |config| Ok(config.remove_message(message_id).is_some()))
            .await
    }

    /// Record the channel of a tracked message if it was not known yet
    pub async fn backfill_channel(
        &self,
        lock: &GuildLock,
        message_id: MessageId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let known = self
            .get(lock.guild_id)
            .await?
            .message(message_id)
            .map(|m| m.channel_id == Some(channel_id.get()))
            .unwrap_or(true);
        if known {
            return Ok(());
        }
        self.update(lock, |config| {
            config.set_channel(message_id, channel_id);
            Ok(())
        })
        .await
    }

    /// Drop a guild's record, returning whether it existed
    pub async fn remove_guild(&self, guild_id: GuildId) -> Result<bool> {
        let lock = self.lock(guild_id).await;
        if !self.guilds.read().await.contains_key(&guild_id) {
            return Ok(false);
        }
        self.commit(&lock, |guilds| Ok(guilds.remove(&guild_id).is_some()))
            .await
    }

    /// Apply `f` to the guild's config and persist the result
    async fn update<T>(
        &self,
        lock: &GuildLock,
        f: impl FnOnce(&mut GuildConfig) -> Result<T>,
    ) -> Result<T> {
        let guild_id = lock.guild_id;
        self.commit(lock, |guilds| {
            let config = guilds.get_mut(&guild_id).ok_or(BotError::NotConfigured {
                guild_id: guild_id.get(),
            })?;
            f(config)
        })
        .await
    }

    /// Mutate a copy of all guilds, write it to disk, then publish it.
    ///
    /// Nothing changes in memory if `f` or the write fails.
    async fn commit<T>(
        &self,
        _lock: &GuildLock,
        f: impl FnOnce(&mut HashMap<GuildId, GuildConfig>) -> Result<T>,
    ) -> Result<T> {
        let _write = self.write_lock.lock().await;
        let mut snapshot = self.guilds.read().await.clone();
        let out = f(&mut snapshot)?;
        self.save(&snapshot).await?;
        *self.guilds.write().await = snapshot;
        Ok(out)
    }

    /// Save to the JSON file atomically
    async fn save(&self, guilds: &HashMap<GuildId, GuildConfig>) -> Result<()> {
        let file = StoreFile {
            version: STORE_VERSION,
            last_updated: current_timestamp(),
            guilds: guilds
                .iter()
                .map(|(id, config)| (id.get(), config.clone()))
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let path_str = self.path.display().to_string();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BotError::StateSave {
                    path: path_str.clone(),
                    source: e,
                })?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str.clone(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| BotError::StateSave {
                path: path_str,
                source: e,
            })?;

        debug!("Saved configuration of {} guild(s)", guilds.len());
        Ok(())
    }
}

/// Bring a pre-versioned file to the current layout
fn migrate_legacy_file(mut value: serde_json::Value) -> serde_json::Value {
    // The oldest files were a bare `guild id -> record` map
    if value.get("guilds").is_none() {
        value = serde_json::json!({ "guilds": value });
    }

    if let Some(guilds) = value.get_mut("guilds").and_then(|g| g.as_object_mut()) {
        for (_, record) in guilds.iter_mut() {
            migrate_legacy_guild(record);
        }
    }

    if let Some(obj) = value.as_object_mut() {
        obj.insert("version".to_string(), STORE_VERSION.into());
        obj.entry("last_updated")
            .or_insert_with(|| current_timestamp().into());
    }
    value
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
