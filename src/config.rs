//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::rules::MatchPolicy;

/// How the process is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Loop cycles until terminated.
    Daemon,
    /// Run exactly one cycle and exit.
    Once,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daemon" | "loop" => Ok(Self::Daemon),
            "once" | "oneshot" | "one-shot" => Ok(Self::Once),
            other => Err(format!("unknown mode '{other}' (expected daemon or once)")),
        }
    }
}

/// Which pattern store backs the rule snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSourceKind {
    /// `responses.json` on disk.
    File,
    /// The `rules` table in the libSQL database.
    Database,
}

impl FromStr for RuleSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "db" | "database" => Ok(Self::Database),
            other => Err(format!("unknown rule source '{other}' (expected file or db)")),
        }
    }
}

/// Remote API credentials and paging.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub base_url: String,
    pub page_id: String,
    pub access_token: SecretString,
    pub post_page_limit: u32,
    pub comment_page_limit: u32,
}

/// Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum posts processed concurrently.
    pub workers: usize,
    /// How long the orchestrator waits on one post's task.
    pub task_timeout: Duration,
    /// Minimum age of the rule snapshot before it is reloaded.
    pub reload_interval: Duration,
    /// Sleep after a successful cycle.
    pub cycle_sleep: Duration,
    /// Sleep after a failed cycle.
    pub backoff: Duration,
    pub policy: MatchPolicy,
    /// `{name}` substitution when a comment carries no author.
    pub default_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            task_timeout: Duration::from_secs(300), // 5 minutes
            reload_interval: Duration::from_secs(60),
            cycle_sleep: Duration::from_secs(10),
            backoff: Duration::from_secs(30),
            policy: MatchPolicy::default(),
            default_name: String::new(),
        }
    }
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub mode: RunMode,
    pub rule_source: RuleSourceKind,
    pub graph: GraphConfig,
    pub orchestrator: OrchestratorConfig,
    pub responses_path: PathBuf,
    pub seen_path: PathBuf,
    pub reply_log_path: PathBuf,
    pub db_path: PathBuf,
}

impl BotConfig {
    /// Build config from environment variables (and `.env` if present).
    ///
    /// Refuses to build without page credentials.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let access_token = required("FB_ACCESS_TOKEN")?;
        let page_id = required("FB_PAGE_ID")?;

        let defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            workers: parse_or("AUTOREPLY_WORKERS", defaults.workers).max(1),
            task_timeout: Duration::from_secs(parse_or("AUTOREPLY_TASK_TIMEOUT_SECS", 300)),
            reload_interval: Duration::from_secs(parse_or("AUTOREPLY_RELOAD_INTERVAL_SECS", 60)),
            cycle_sleep: Duration::from_secs(parse_or("AUTOREPLY_CYCLE_SLEEP_SECS", 10)),
            backoff: Duration::from_secs(parse_or("AUTOREPLY_BACKOFF_SECS", 30)),
            policy: parse_enum("AUTOREPLY_MATCH_POLICY", defaults.policy)?,
            default_name: std::env::var("AUTOREPLY_DEFAULT_NAME").unwrap_or_default(),
        };

        Ok(Self {
            mode: parse_enum("AUTOREPLY_MODE", RunMode::Daemon)?,
            rule_source: parse_enum("AUTOREPLY_RULE_SOURCE", RuleSourceKind::File)?,
            graph: GraphConfig {
                base_url: std::env::var("FB_GRAPH_URL")
                    .unwrap_or_else(|_| "https://graph.facebook.com".to_string()),
                page_id,
                access_token: SecretString::from(access_token),
                post_page_limit: parse_or("AUTOREPLY_POST_PAGE_LIMIT", 50),
                comment_page_limit: parse_or("AUTOREPLY_COMMENT_PAGE_LIMIT", 100),
            },
            orchestrator,
            responses_path: path_or("AUTOREPLY_RESPONSES_PATH", "./responses.json"),
            seen_path: path_or("AUTOREPLY_SEEN_PATH", "./seen_comments.json"),
            reply_log_path: path_or("AUTOREPLY_REPLY_LOG_PATH", "./log.txt"),
            db_path: path_or("AUTOREPLY_DB_PATH", "./data/rules.db"),
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_enum<T: FromStr<Err = String>>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: key.to_string(),
                message,
            })
        }
        _ => Ok(default),
    }
}

fn path_or(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_parses_aliases() {
        assert_eq!("daemon".parse::<RunMode>(), Ok(RunMode::Daemon));
        assert_eq!(" ONCE ".parse::<RunMode>(), Ok(RunMode::Once));
        assert_eq!("one-shot".parse::<RunMode>(), Ok(RunMode::Once));
        assert!("sometimes".parse::<RunMode>().is_err());
    }

    #[test]
    fn rule_source_parses() {
        assert_eq!("db".parse::<RuleSourceKind>(), Ok(RuleSourceKind::Database));
        assert_eq!("file".parse::<RuleSourceKind>(), Ok(RuleSourceKind::File));
        assert!("redis".parse::<RuleSourceKind>().is_err());
    }

    #[test]
    fn orchestrator_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.workers, 5);
        assert_eq!(cfg.task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.reload_interval, Duration::from_secs(60));
        assert_eq!(cfg.policy, MatchPolicy::CombineAll);
    }

    #[test]
    fn required_rejects_unset_variable() {
        unsafe { std::env::remove_var("AUTOREPLY_TEST_REQUIRED_UNSET") };
        let err = required("AUTOREPLY_TEST_REQUIRED_UNSET").unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingEnvVar(ref key) if key == "AUTOREPLY_TEST_REQUIRED_UNSET")
        );
    }

    #[test]
    fn required_rejects_blank_variable() {
        unsafe { std::env::set_var("AUTOREPLY_TEST_REQUIRED_BLANK", "   ") };
        let err = required("AUTOREPLY_TEST_REQUIRED_BLANK").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
        unsafe { std::env::remove_var("AUTOREPLY_TEST_REQUIRED_BLANK") };
    }

    #[test]
    fn required_trims_present_variable() {
        unsafe { std::env::set_var("AUTOREPLY_TEST_REQUIRED_SET", "  12345 ") };
        assert_eq!(required("AUTOREPLY_TEST_REQUIRED_SET").unwrap(), "12345");
        unsafe { std::env::remove_var("AUTOREPLY_TEST_REQUIRED_SET") };
    }

    #[test]
    fn invalid_enum_value_is_config_error() {
        unsafe { std::env::set_var("AUTOREPLY_TEST_MODE", "sometimes") };
        let err = parse_enum("AUTOREPLY_TEST_MODE", RunMode::Daemon).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        unsafe { std::env::remove_var("AUTOREPLY_TEST_MODE") };
    }
}
