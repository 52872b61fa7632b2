// Configuration loading and parsing (league.toml, sync.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub league: LeagueConfig,
    pub feed: FeedConfig,
    pub poller: PollerConfig,
    pub retry: RetryConfig,
    pub db_path: String,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// league.toml structs
// ---------------------------------------------------------------------------

/// Wrapper for the top-level `[league]` table in league.toml.
#[derive(Debug, Clone, Deserialize)]
struct LeagueFile {
    league: LeagueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueConfig {
    pub name: String,
    pub season_year: i32,
    pub regular_season_weeks: u8,
    pub playoff_weeks: u8,
    /// Regular-season finishers (by rank) who keep picking in the playoffs.
    pub playoff_qualifiers: usize,
    /// Playoff-round finishers who pick in the final week.
    pub final_qualifiers: usize,
    #[serde(default = "default_max_group_members")]
    pub max_group_members: usize,
}

fn default_max_group_members() -> usize {
    50
}

// ---------------------------------------------------------------------------
// sync.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire sync.toml file.
#[derive(Debug, Clone, Deserialize)]
struct SyncFile {
    feed: FeedConfig,
    poller: PollerSection,
    retry: RetrySection,
    database: DatabaseSection,
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PollerSection {
    live_interval_secs: u64,
    idle_interval_secs: u64,
    schedule_refresh_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RetrySection {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

/// Poll cadence, assembled from the `[poller]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Interval while any game of the current season is in progress.
    pub live_interval: Duration,
    /// Interval when nothing is live.
    pub idle_interval: Duration,
    pub schedule_refresh: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/league.toml` and
/// `config/sync.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- league.toml (required) ---
    let league_path = config_dir.join("league.toml");
    let league_text = read_file(&league_path)?;
    let league_file: LeagueFile =
        toml::from_str(&league_text).map_err(|e| ConfigError::ParseError {
            path: league_path.clone(),
            source: e,
        })?;

    // --- sync.toml (required) ---
    let sync_path = config_dir.join("sync.toml");
    let sync_text = read_file(&sync_path)?;
    let sync_file: SyncFile = toml::from_str(&sync_text).map_err(|e| ConfigError::ParseError {
        path: sync_path.clone(),
        source: e,
    })?;

    let config = Config {
        league: league_file.league,
        feed: sync_file.feed,
        poller: PollerConfig {
            live_interval: Duration::from_secs(sync_file.poller.live_interval_secs),
            idle_interval: Duration::from_secs(sync_file.poller.idle_interval_secs),
            schedule_refresh: Duration::from_secs(sync_file.poller.schedule_refresh_secs),
        },
        retry: RetryConfig {
            max_retries: sync_file.retry.max_retries,
            base_delay: Duration::from_millis(sync_file.retry.base_delay_ms),
            max_delay: Duration::from_millis(sync_file.retry.max_delay_ms),
        },
        db_path: sync_file.database.path,
        logging: sync_file.logging,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the workspace root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let target = config_dir.join(file_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let league = &config.league;
    if league.regular_season_weeks == 0 {
        return Err(invalid("league.regular_season_weeks", "must be greater than 0"));
    }
    if league.playoff_weeks == 0 {
        return Err(invalid("league.playoff_weeks", "must be greater than 0"));
    }
    let total_weeks = u16::from(league.regular_season_weeks) + u16::from(league.playoff_weeks);
    if total_weeks > u16::from(u8::MAX) {
        return Err(invalid(
            "league.playoff_weeks",
            format!("season would span {total_weeks} weeks"),
        ));
    }
    if league.playoff_qualifiers == 0 {
        return Err(invalid("league.playoff_qualifiers", "must be greater than 0"));
    }
    if league.final_qualifiers == 0 || league.final_qualifiers > league.playoff_qualifiers {
        return Err(invalid(
            "league.final_qualifiers",
            format!(
                "must be between 1 and playoff_qualifiers ({}), got {}",
                league.playoff_qualifiers, league.final_qualifiers
            ),
        ));
    }
    if league.max_group_members < 2 {
        return Err(invalid("league.max_group_members", "must be at least 2"));
    }

    if !config.feed.base_url.starts_with("http") {
        return Err(invalid(
            "feed.base_url",
            format!("must be an http(s) URL, got {:?}", config.feed.base_url),
        ));
    }
    if config.feed.request_timeout_secs == 0 {
        return Err(invalid("feed.request_timeout_secs", "must be greater than 0"));
    }

    let poller = &config.poller;
    if poller.live_interval.is_zero() {
        return Err(invalid("poller.live_interval_secs", "must be greater than 0"));
    }
    if poller.idle_interval < poller.live_interval {
        return Err(invalid(
            "poller.idle_interval_secs",
            "must not be shorter than live_interval_secs",
        ));
    }
    if poller.schedule_refresh.is_zero() {
        return Err(invalid("poller.schedule_refresh_secs", "must be greater than 0"));
    }

    if config.retry.base_delay > config.retry.max_delay {
        return Err(invalid(
            "retry.base_delay_ms",
            "must not exceed max_delay_ms",
        ));
    }

    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: the workspace root holding `defaults/`.
    fn project_root() -> PathBuf {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        assert!(
            root.join("defaults").exists(),
            "cannot locate defaults/ from {}",
            root.display()
        );
        root
    }

    /// Helper: fresh temp dir holding a copy of the default config files.
    fn temp_config(name: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        let config_dir = tmp.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let root = project_root();
        fs::copy(root.join("defaults/league.toml"), config_dir.join("league.toml")).unwrap();
        fs::copy(root.join("defaults/sync.toml"), config_dir.join("sync.toml")).unwrap();
        tmp
    }

    fn replace_in(path: &Path, from: &str, to: &str) {
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains(from), "{from:?} not found in {}", path.display());
        fs::write(path, text.replace(from, to)).unwrap();
    }

    #[test]
    fn load_valid_config_from_default_files() {
        let tmp = temp_config("pickem_config_defaults");
        let config = load_config_from(&tmp).expect("should load valid config");

        assert_eq!(config.league.name, "Sunday Survivors");
        assert_eq!(config.league.regular_season_weeks, 18);
        assert_eq!(config.league.playoff_weeks, 4);
        assert_eq!(config.league.playoff_qualifiers, 4);
        assert_eq!(config.league.final_qualifiers, 2);
        assert_eq!(config.league.max_group_members, 50);

        assert!(config.feed.base_url.contains("football/nfl"));
        assert_eq!(config.feed.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.poller.live_interval, Duration::from_secs(90));
        assert_eq!(config.poller.idle_interval, Duration::from_secs(300));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.db_path, "pickem.db");
        assert_eq!(config.logging.directory, "logs");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_final_qualifiers_above_playoff_qualifiers() {
        let tmp = temp_config("pickem_config_final_qualifiers");
        replace_in(
            &tmp.join("config/league.toml"),
            "final_qualifiers = 2",
            "final_qualifiers = 6",
        );

        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "league.final_qualifiers");
            }
            other => panic!("expected ValidationError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_idle_interval_shorter_than_live() {
        let tmp = temp_config("pickem_config_intervals");
        replace_in(
            &tmp.join("config/sync.toml"),
            "idle_interval_secs = 300",
            "idle_interval_secs = 30",
        );

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError { ref field, .. } if field == "poller.idle_interval_secs"
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_max_group_members_uses_default() {
        let tmp = temp_config("pickem_config_member_default");
        replace_in(&tmp.join("config/league.toml"), "max_group_members = 50\n", "");

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.league.max_group_members, 50);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_sync_toml() {
        let tmp = temp_config("pickem_config_no_sync");
        fs::remove_file(tmp.join("config/sync.toml")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("sync.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("pickem_config_bad_toml");
        fs::write(tmp.join("config/league.toml"), "[league\nname = ").unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_copies_missing_files() {
        let tmp = std::env::temp_dir().join("pickem_config_ensure_copies");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();

        let root = project_root();
        fs::copy(root.join("defaults/league.toml"), defaults_dir.join("league.toml")).unwrap();
        fs::copy(root.join("defaults/sync.toml"), defaults_dir.join("sync.toml")).unwrap();
        fs::write(defaults_dir.join("local.toml.example"), "# template\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 2);
        assert!(tmp.join("config/league.toml").exists());
        assert!(tmp.join("config/sync.toml").exists());
        assert!(!tmp.join("config/local.toml.example").exists());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_skips_existing() {
        let tmp = std::env::temp_dir().join("pickem_config_ensure_skips");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        let config_dir = tmp.join("config");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::create_dir_all(&config_dir).unwrap();

        let root = project_root();
        fs::copy(root.join("defaults/league.toml"), defaults_dir.join("league.toml")).unwrap();
        fs::copy(root.join("defaults/sync.toml"), defaults_dir.join("sync.toml")).unwrap();
        fs::write(config_dir.join("league.toml"), "# custom\n").unwrap();

        let copied = ensure_config_files(&tmp).expect("should succeed");
        assert_eq!(copied.len(), 1);
        assert!(copied[0].ends_with("sync.toml"));
        let content = fs::read_to_string(config_dir.join("league.toml")).unwrap();
        assert_eq!(content, "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_files_errors_when_both_dirs_missing() {
        let tmp = std::env::temp_dir().join("pickem_config_both_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        match ensure_config_files(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("neither defaults/ nor config/"));
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
