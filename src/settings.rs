use std::path::PathBuf;
use std::time::Duration;

/// Default purge confirmation window
pub const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 120;

/// Runtime settings, read from the environment (`.env` included)
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding `guild_config.json`
    pub state_path: PathBuf,

    /// Prefix for prefix commands
    pub prefix: String,

    /// How long a purge waits for its confirmation
    pub purge_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            state_path: std::env::var("STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("state")),
            prefix: std::env::var("COMMAND_PREFIX")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| "%".to_string()),
            purge_timeout: parse_timeout(std::env::var("PURGE_TIMEOUT_SECS").ok().as_deref()),
        }
    }

    /// Path of the guild configuration file
    pub fn store_file(&self) -> PathBuf {
        self.state_path.join("guild_config.json")
    }
}

fn parse_timeout(value: Option<&str>) -> Duration {
    let secs = value
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_PURGE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None), Duration::from_secs(120));
        assert_eq!(parse_timeout(Some(" 30 ")), Duration::from_secs(30));
        assert_eq!(parse_timeout(Some("0")), Duration::from_secs(120));
        assert_eq!(parse_timeout(Some("soon")), Duration::from_secs(120));
    }

    #[test]
    fn test_store_file_location() {
        let settings = Settings {
            state_path: PathBuf::from("/var/lib/rolekeeper"),
            prefix: "%".to_string(),
            purge_timeout: Duration::from_secs(120),
        };
        assert_eq!(
            settings.store_file(),
            PathBuf::from("/var/lib/rolekeeper/guild_config.json")
        );
    }
}
