use std::{collections::HashSet, path::PathBuf, str::FromStr, time::Duration, vec::Vec};

use serde::{de, Deserialize, Deserializer};

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

fn deserialize_loglevel<'de, D>(deserializer: D) -> Result<log::LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let level_str = String::deserialize(deserializer)?;
    log::LevelFilter::from_str(&level_str).map_err(de::Error::custom)
}

fn default_loglevel() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_batch() -> usize {
    100
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_collectibles() -> bool {
    true
}

fn default_drainer_config() -> DrainerConfig {
    DrainerConfig {
        batch: default_batch(),
        retry_interval: default_retry_interval(),
        poll_interval: default_poll_interval(),
        collectibles: default_collectibles(),
    }
}

/// The multisig group whose outputs we are tracking
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// The identifiers of the custodians, as known by the network service
    pub members: Vec<String>,
    /// How many of the members need to sign to spend an output
    pub threshold: u8,
}

/// Everything we need to know for talking to the network service
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// The URL of the JSONRPC endpoint, eg "http://127.0.0.1:7000"
    pub addr: String,
    /// Optional "user:password" credentials
    pub auth: Option<String>,
    /// Give up on a request after this many seconds
    #[serde(
        rename = "timeout_secs",
        deserialize_with = "deserialize_duration",
        default = "default_request_timeout"
    )]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrainerConfig {
    /// How many outputs to request per page
    #[serde(default = "default_batch")]
    pub batch: usize,
    /// How long to wait before retrying a failed fetch
    #[serde(
        rename = "retry_interval_secs",
        deserialize_with = "deserialize_duration",
        default = "default_retry_interval"
    )]
    pub retry_interval: Duration,
    /// How long to wait between two draining rounds, once caught up
    #[serde(
        rename = "poll_interval_secs",
        deserialize_with = "deserialize_duration",
        default = "default_poll_interval"
    )]
    pub poll_interval: Duration,
    /// Whether to also drain the collectible outputs
    #[serde(default = "default_collectibles")]
    pub collectibles: bool,
}

/// Static informations we require to operate
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub group: GroupConfig,
    #[serde(rename = "network")]
    pub network_config: NetworkConfig,
    #[serde(rename = "drainer", default = "default_drainer_config")]
    pub drainer_config: DrainerConfig,
    /// An optional custom data directory
    pub data_dir: Option<PathBuf>,
    /// Whether to daemonize the process
    pub daemon: Option<bool>,
    /// What messages to log
    #[serde(
        deserialize_with = "deserialize_loglevel",
        default = "default_loglevel"
    )]
    pub log_level: log::LevelFilter,
}

#[derive(PartialEq, Eq, Debug)]
pub enum ConfigError {
    DatadirNotFound,
    FileNotFound,
    ReadingFile(String),
    Unexpected(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            Self::DatadirNotFound => write!(f, "Could not locate the configuration directory."),
            Self::FileNotFound => write!(f, "Could not locate the configuration file."),
            Self::ReadingFile(e) => write!(f, "Failed to read configuration file: {}", e),
            Self::Unexpected(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound,
            _ => Self::ReadingFile(e.to_string()),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Get the absolute path to the mtgsync configuration folder.
///
/// It's a "MtgSync" directory in the XDG standard configuration directory for all OSes but
/// Linux-based ones, for which it's `~/.mtgsync/`.
pub fn config_folder_path() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    let configs_dir = dirs::home_dir();

    #[cfg(not(target_os = "linux"))]
    let configs_dir = dirs::config_dir();

    if let Some(mut path) = configs_dir {
        #[cfg(target_os = "linux")]
        path.push(".mtgsync");

        #[cfg(not(target_os = "linux"))]
        path.push("MtgSync");

        return Some(path);
    }

    None
}

fn config_file_path() -> Option<PathBuf> {
    config_folder_path().map(|mut path| {
        path.push("mtgsync.toml");
        path
    })
}

impl Config {
    /// Get our static configuration out of a mandatory configuration file.
    pub fn from_file(custom_path: Option<PathBuf>) -> Result<Config, ConfigError> {
        let config_file =
            custom_path.unwrap_or(config_file_path().ok_or(ConfigError::DatadirNotFound)?);

        let config = toml::from_slice::<Config>(&std::fs::read(&config_file)?)
            .map_err(|e| ConfigError::ReadingFile(format!("Parsing configuration file: {}", e)))?;
        config.check()?;

        Ok(config)
    }

    /// Sanity check the values we could not enforce at deserialization time.
    pub fn check(&self) -> Result<(), ConfigError> {
        let members = &self.group.members;
        if members.is_empty() {
            return Err(ConfigError::Unexpected(
                "The group must have at least one member".to_string(),
            ));
        }
        let unique: HashSet<&String> = members.iter().collect();
        if unique.len() != members.len() {
            return Err(ConfigError::Unexpected(format!(
                "Duplicate group member in {:?}",
                members
            )));
        }

        let threshold = self.group.threshold as usize;
        if threshold == 0 || threshold > members.len() {
            return Err(ConfigError::Unexpected(format!(
                "Invalid threshold '{}' for a group of {} members",
                threshold,
                members.len()
            )));
        }

        // A page smaller than half a batch means we caught up, which can't happen with less than 2.
        if self.drainer_config.batch < 2 {
            return Err(ConfigError::Unexpected(format!(
                "The drainer batch size must be at least 2, got '{}'",
                self.drainer_config.batch
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{config_file_path, Config, ConfigError};

    use std::time::Duration;

    // Test the format of the configuration file
    #[test]
    fn deserialize_toml_config() {
        // A valid config with all the knobs set
        let toml_str = r#"
            daemon = false
            log_level = "trace"
            data_dir = "/home/wizardsardine/custom/folder/"

            [group]
            members = ["0c6ba8bc-d2bd-4a6e-a2b3-3a7c4d4d5f00", "a4a7ea1b-5c5e-4b82-b6f3-7d3a0e21c8e9", "d6f0e3a8-6c7b-43b1-8a6a-9e2c1f7b5d42"]
            threshold = 2

            [network]
            addr = "http://127.0.0.1:7000"
            auth = "user:pass"
            timeout_secs = 12

            [drainer]
            batch = 500
            retry_interval_secs = 5
            poll_interval_secs = 2
            collectibles = false
        "#;
        let config = toml::from_str::<Config>(toml_str).expect("Deserializing full toml_str");
        config.check().expect("Checking full config");
        assert_eq!(config.log_level, log::LevelFilter::Trace);
        assert_eq!(config.group.threshold, 2);
        assert_eq!(config.network_config.timeout, Duration::from_secs(12));
        assert_eq!(config.drainer_config.batch, 500);
        assert_eq!(config.drainer_config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.drainer_config.poll_interval, Duration::from_secs(2));
        assert!(!config.drainer_config.collectibles);

        // A minimal config, everything else has a default
        let toml_str = r#"
            [group]
            members = ["0c6ba8bc-d2bd-4a6e-a2b3-3a7c4d4d5f00"]
            threshold = 1

            [network]
            addr = "http://127.0.0.1:7000"
        "#;
        let config = toml::from_str::<Config>(toml_str).expect("Deserializing minimal toml_str");
        config.check().expect("Checking minimal config");
        assert_eq!(config.log_level, log::LevelFilter::Info);
        assert!(config.network_config.auth.is_none());
        assert_eq!(config.network_config.timeout, Duration::from_secs(60));
        assert_eq!(config.drainer_config.batch, 100);
        assert_eq!(config.drainer_config.retry_interval, Duration::from_secs(3));
        assert!(config.drainer_config.collectibles);

        // Invalid log level
        let toml_str = r#"
            log_level = "chatty"

            [group]
            members = ["0c6ba8bc-d2bd-4a6e-a2b3-3a7c4d4d5f00"]
            threshold = 1

            [network]
            addr = "http://127.0.0.1:7000"
        "#;
        let config_res: Result<Config, toml::de::Error> = toml::from_str(toml_str);
        config_res.expect_err("Deserializing an invalid log level");

        // Not enough parameters
        let toml_str = r#"
            daemon = false
            log_level = "trace"

            [group]
            members = ["0c6ba8bc-d2bd-4a6e-a2b3-3a7c4d4d5f00"]
            threshold = 1
        "#;
        let config_res: Result<Config, toml::de::Error> = toml::from_str(toml_str);
        config_res.expect_err("Deserializing an invalid toml_str");
    }

    #[test]
    fn config_sanity_checks() {
        let base = |members: &str, threshold: u8, batch: usize| {
            format!(
                r#"
                [group]
                members = {}
                threshold = {}

                [network]
                addr = "http://127.0.0.1:7000"

                [drainer]
                batch = {}
            "#,
                members, threshold, batch
            )
        };

        let config: Config = toml::from_str(&base(r#"["a", "b", "c"]"#, 3, 10)).unwrap();
        config.check().unwrap();

        // Threshold larger than the group
        let config: Config = toml::from_str(&base(r#"["a", "b"]"#, 3, 10)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));

        // Null threshold
        let config: Config = toml::from_str(&base(r#"["a", "b"]"#, 0, 10)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));

        // No member
        let config: Config = toml::from_str(&base("[]", 1, 10)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));

        // Twice the same member
        let config: Config = toml::from_str(&base(r#"["a", "a"]"#, 1, 10)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));

        // Empty pages
        let config: Config = toml::from_str(&base(r#"["a", "b"]"#, 1, 0)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));

        // Single record pages would never be considered caught up
        let config: Config = toml::from_str(&base(r#"["a", "b"]"#, 1, 1)).unwrap();
        assert!(matches!(config.check(), Err(ConfigError::Unexpected(_))));
        let config: Config = toml::from_str(&base(r#"["a", "b"]"#, 1, 2)).unwrap();
        config.check().unwrap();
    }

    #[test]
    fn sample_config_file() {
        let config = Config::from_file(Some("contrib/config.toml".into()))
            .expect("Parsing the sample config");
        assert_eq!(config.group.members.len(), 3);
        assert_eq!(config.drainer_config.batch, 100);

        assert_eq!(
            Config::from_file(Some("contrib/does_not_exist.toml".into())).unwrap_err(),
            ConfigError::FileNotFound
        );
    }

    #[test]
    fn config_directory() {
        let filepath = config_file_path().expect("Getting config file path");

        #[cfg(target_os = "linux")]
        assert!(filepath.as_path().ends_with(".mtgsync/mtgsync.toml"));

        #[cfg(target_os = "macos")]
        assert!(filepath
            .as_path()
            .ends_with("Library/Application Support/MtgSync/mtgsync.toml"));

        #[cfg(target_os = "windows")]
        assert!(filepath
            .as_path()
            .ends_with(r#"AppData\Roaming\MtgSync\mtgsync.toml"#));
    }
}
