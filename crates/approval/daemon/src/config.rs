//! Configuration for the approval daemon

use approval_engine::{EngineConfig, StaticDirectory};
use approval_types::{CompanyId, UserId, MAX_SLA_HOURS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Background scan configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Role membership used to resolve role-based approvers
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (for development/testing)
    #[default]
    Memory,

    /// PostgreSQL storage
    Postgres {
        /// Connection URL
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },
}

/// Background scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between full scans
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Actions due within this many hours get a reminder
    #[serde(default = "default_reminder_window")]
    pub reminder_window_hours: i64,

    /// Run the periodic scan at all
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SchedulerConfig {
    /// Reminder look-ahead, clamped to `0..=MAX_SLA_HOURS`
    pub fn reminder_window(&self) -> chrono::Duration {
        let hours = self
            .reminder_window_hours
            .clamp(0, i64::from(MAX_SLA_HOURS));
        chrono::Duration::hours(hours)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            reminder_window_hours: default_reminder_window(),
            enabled: true,
        }
    }
}

/// Static role directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Roles shared by every company
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<UserId>>,

    /// Company-specific role membership, shadowing `roles`
    #[serde(default)]
    pub company_roles: Vec<CompanyRoleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRoleConfig {
    pub company_id: CompanyId,
    pub role: String,
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl DirectoryConfig {
    pub fn build(&self) -> StaticDirectory {
        let shared = self
            .roles
            .iter()
            .fold(StaticDirectory::new(), |dir, (role, members)| {
                dir.with_role(role.clone(), members.clone())
            });
        self.company_roles.iter().fold(shared, |dir, entry| {
            dir.with_company_role(entry.company_id, entry.role.clone(), entry.members.clone())
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    10
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_scan_interval() -> u64 {
    60
}

fn default_reminder_window() -> i64 {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `DOA_*`
    /// environment variables (`DOA_SCHEDULER__SCAN_INTERVAL_SECS=30`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DOA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let max_window = i64::from(MAX_SLA_HOURS);
        if !(0..=max_window).contains(&self.scheduler.reminder_window_hours) {
            return Err(config::ConfigError::Message(format!(
                "scheduler.reminder_window_hours must be between 0 and {max_window}, got {}",
                self.scheduler.reminder_window_hours
            )));
        }
        self.engine
            .validate()
            .map_err(|e| config::ConfigError::Message(format!("engine: {e}")))
    }
}
