//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from the **config/settings.yml**
//! file. Note that we observe this file for changes and reload it once a change is detected.
//! Therefore each user of the config should attach itself to the
//! [Config::notifier](Config::notifier) and re-process the config once a change message is
//! received. The [Node](crate::node::Node) does this to pick up changed peers and memory limits
//! without restarting (and thereby losing all cached values).
//!
//! The file is parsed into a typed [Settings] snapshot. All keys are optional:
//! ```yaml
//! server:
//!     host: 0.0.0.0
//!     port: 8001
//! cluster:
//!     self: http://10.0.0.1:8001
//!     base_path: /api/
//!     replicas: 50
//!     peers:
//!         - http://10.0.0.1:8001
//!         - http://10.0.0.2:8001
//! groups:
//!     scores:
//!         max_memory: 64m
//! ```
//!
//! # Examples
//!
//! ```
//! # use peercache::config::Config;
//! let config = Config::new("settings.yml");
//! config.load_from_string("
//! server:
//!     port: 9001
//! groups:
//!     scores:
//!         max_memory: 1g
//! ", None).unwrap();
//!
//! let settings = config.current();
//! assert_eq!(settings.port, 9001);
//! assert_eq!(settings.self_url, "http://localhost:9001");
//! assert_eq!(settings.max_memory("scores"), 1024 * 1024 * 1024);
//! ```
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

use crate::consistenthash::DEFAULT_REPLICAS;
use crate::http::DEFAULT_BASE_PATH;
use crate::registry::Registry;

/// Specifies the port which is used if no **server.port** is configured.
pub const DEFAULT_PORT: u16 = 8001;

/// Specifies the memory limit of a group which has no **max_memory** configured.
pub const DEFAULT_MAX_MEMORY: usize = 64 * 1024 * 1024;

/// Represents a parsed snapshot of the configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Contains the address the HTTP server binds to (**server.host**).
    pub host: String,

    /// Contains the port the HTTP server binds to (**server.port**).
    pub port: u16,

    /// Contains the url under which this node is known to its peers (**cluster.self**).
    pub self_url: String,

    /// Contains the path prefix of the peer protocol (**cluster.base_path**).
    pub base_path: String,

    /// Contains the number of virtual nodes per peer (**cluster.replicas**).
    pub replicas: usize,

    /// Contains the urls of all peers of the cluster (**cluster.peers**).
    pub peers: Vec<String>,

    /// Contains the memory limit per group (**groups.NAME.max_memory**).
    pub group_memory: HashMap<String, usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            self_url: format!("http://localhost:{}", DEFAULT_PORT),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            peers: Vec::new(),
            group_memory: HashMap::new(),
        }
    }
}

impl Settings {
    /// Parses the settings from the given YAML document.
    ///
    /// Missing keys are filled up with their defaults. Keys with an unexpected type result in an
    /// error.
    pub fn from_yaml(doc: &Yaml) -> anyhow::Result<Settings> {
        let port = match optional_int(&doc["server"]["port"], "server.port")? {
            Some(port) => u16::try_from(port)
                .with_context(|| format!("'server.port' is not a valid port: {}", port))?,
            None => DEFAULT_PORT,
        };

        let replicas = match optional_int(&doc["cluster"]["replicas"], "cluster.replicas")? {
            Some(replicas) if replicas > 0 => replicas as usize,
            Some(replicas) => {
                return Err(anyhow::anyhow!(
                    "'cluster.replicas' has to be positive but is {}",
                    replicas
                ))
            }
            None => DEFAULT_REPLICAS,
        };

        let mut peers = Vec::new();
        match &doc["cluster"]["peers"] {
            Yaml::Array(entries) => {
                for entry in entries {
                    match entry.as_str() {
                        Some(peer) => peers.push(peer.to_owned()),
                        None => {
                            return Err(anyhow::anyhow!(
                                "'cluster.peers' must only contain URLs, but found: {:?}",
                                entry
                            ))
                        }
                    }
                }
            }
            Yaml::BadValue | Yaml::Null => (),
            other => {
                return Err(anyhow::anyhow!(
                    "'cluster.peers' has to be a list but is: {:?}",
                    other
                ))
            }
        }

        let mut group_memory = HashMap::new();
        if let Some(groups) = doc["groups"].as_hash() {
            for (name, group) in groups {
                let name = name.as_str().context("Group names have to be strings!")?;
                let path = format!("groups.{}.max_memory", name);
                let max_memory = match &group["max_memory"] {
                    Yaml::Integer(bytes) => usize::try_from(*bytes)
                        .with_context(|| format!("'{}' must not be negative", path))?,
                    Yaml::String(size) => {
                        parse_size(size).with_context(|| format!("Invalid value for '{}'", path))?
                    }
                    Yaml::BadValue | Yaml::Null => DEFAULT_MAX_MEMORY,
                    other => {
                        return Err(anyhow::anyhow!(
                            "'{}' has to be a size but is: {:?}",
                            path,
                            other
                        ))
                    }
                };
                let _ = group_memory.insert(name.to_owned(), max_memory);
            }
        }

        Ok(Settings {
            host: optional_str(&doc["server"]["host"], "server.host")?
                .unwrap_or("0.0.0.0")
                .to_owned(),
            port,
            self_url: optional_str(&doc["cluster"]["self"], "cluster.self")?
                .map(|url| url.to_owned())
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            base_path: optional_str(&doc["cluster"]["base_path"], "cluster.base_path")?
                .unwrap_or(DEFAULT_BASE_PATH)
                .to_owned(),
            replicas,
            peers,
            group_memory,
        })
    }

    /// Returns the socket address the HTTP server binds to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the memory limit for the given group.
    pub fn max_memory(&self, group: &str) -> usize {
        self.group_memory
            .get(group)
            .copied()
            .unwrap_or(DEFAULT_MAX_MEMORY)
    }
}

fn optional_str<'a>(value: &'a Yaml, path: &str) -> anyhow::Result<Option<&'a str>> {
    match value {
        Yaml::String(str) => Ok(Some(str.as_str())),
        Yaml::BadValue | Yaml::Null => Ok(None),
        other => Err(anyhow::anyhow!(
            "'{}' has to be a string but is: {:?}",
            path,
            other
        )),
    }
}

fn optional_int(value: &Yaml, path: &str) -> anyhow::Result<Option<i64>> {
    match value {
        Yaml::Integer(int) => Ok(Some(*int)),
        Yaml::BadValue | Yaml::Null => Ok(None),
        other => Err(anyhow::anyhow!(
            "'{}' has to be an integer but is: {:?}",
            path,
            other
        )),
    }
}

/// Parses a memory size like **64m** or **1 G**.
///
/// The suffixes **k**, **m**, **g** and **t** (case insensitive) multiply the value by the
/// respective power of 1024. A number without suffix (or with **b**) is taken as bytes.
///
/// # Examples
/// ```
/// # use peercache::config::parse_size;
/// assert_eq!(parse_size("100").unwrap(), 100);
/// assert_eq!(parse_size("8k").unwrap(), 8192);
/// assert_eq!(parse_size("64m").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("2 G").unwrap(), 2 * 1024 * 1024 * 1024);
///
/// assert_eq!(parse_size("1.5m").is_err(), true);
/// assert_eq!(parse_size("3 Y").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([bBkKmMgGtT]?) *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).with_context(|| {
        format!(
            "Cannot parse '{}' into a size. Expected a number and optionally 'k', 'm', 'g' or 't' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1]
        .parse::<usize>()
        .with_context(|| format!("'{}' is too large.", &captures[1]))?;
    let multiplier: usize = match captures[2].to_ascii_lowercase().as_str() {
        "k" => 1 << 10,
        "m" => 1 << 20,
        "g" => 1 << 30,
        "t" => 1 << 40,
        _ => 1,
    };

    number
        .checked_mul(multiplier)
        .with_context(|| format!("'{}' is too large.", str.as_ref()))
}

/// Formats a number of bytes using binary units.
///
/// # Examples
/// ```
/// # use peercache::config::format_size;
/// assert_eq!(format_size(100), "100 bytes");
/// assert_eq!(format_size(1536), "1.5 KiB");
/// assert_eq!(format_size(64 * 1024 * 1024), "64.0 MiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if size_in_bytes < 1024 {
        return format!("{} bytes", size_in_bytes);
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    format!("{:.1} {}", size, UNITS[unit])
}

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// can be obtained via [Node::config](crate::node::Node::config).
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Settings, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded settings.
///
/// Note that this handle should not be kept around for long, as it will not be updated if the
/// underlying config changed.
pub struct Handle {
    config: Arc<(Settings, Option<SystemTime>)>,
}

impl Deref for Handle {
    type Target = Settings;

    fn deref(&self) -> &Self::Target {
        &self.config.0
    }
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Until a file has been loaded, the default settings are used. Note that this will not
    /// install a change listener. This is only done by the [install](install) function.
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Settings::default(), None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded settings.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    #[cfg(not(test))]
    async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!("Config file doesn't exist or is an unmounted docker volume - skipping config load.");
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Writes the given config to disk.
    ///
    /// The data is verified first, so that an invalid config is never written. Note that the
    /// new config becomes active once the change monitor picks up the file (or once
    /// [load](Config::load) is invoked).
    ///
    /// # Example
    ///
    /// ```
    /// # use peercache::config::Config;
    /// # #[tokio::main]
    /// # async fn main() {
    /// let config = Config::new("peercache_test_config.yml");
    ///
    /// // Remove any left over file...
    /// let _ = std::fs::remove_file("peercache_test_config.yml");
    ///
    /// // Write a config file...
    /// assert_eq!(config.store("
    /// server:
    ///     port: 12345
    /// ").await.is_ok(), true);
    ///
    /// // Load it back and verify its contents...
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().port, 12345);
    ///
    /// // Writing an invalid config file is prevented...
    /// assert_eq!(config.store("server: \"test").await.is_err(), true);
    /// assert_eq!(config.store("server:\n    port: many").await.is_err(), true);
    ///
    /// // Therefore the original config is still present...
    /// assert_eq!(config.load().await.is_ok(), true);
    /// assert_eq!(config.current().port, 12345);
    /// # let _ = std::fs::remove_file("peercache_test_config.yml");
    /// # }
    /// ```
    pub async fn store(&self, config: &str) -> anyhow::Result<()> {
        log::info!(
            "Programmatically updating the config file {}...",
            &self.filename
        );

        let _ = parse_settings(config)?;
        tokio::fs::write(&self.filename, config)
            .await
            .context("Failed to write to config file!")?;
        log::info!("Config has been updated successfully!");

        Ok(())
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// If the data cannot be parsed, an error is returned and the previous settings remain
    /// active. Otherwise all listeners are notified.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let settings = parse_settings(data)
            .with_context(|| format!("Cannot parse config file {}", &self.filename))?;

        self.config.store(Arc::new((settings, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.send(());

        Ok(())
    }
}

fn parse_settings(data: &str) -> anyhow::Result<Settings> {
    let docs = YamlLoader::load_from_str(data).context("Invalid YAML")?;
    match docs.first() {
        Some(doc) => Settings::from_yaml(doc),
        None => Ok(Settings::default()),
    }
}

/// Creates a **Config** which is backed by **config/settings.yml**.
///
/// This reads the file and installs a change listener for it. Note that this listener will only
/// watch the "last modified" date of the file and will not perform a structural comparison.
/// The listener stops once the given registry is terminated.
///
/// Note that this method is also called by the [Builder](crate::builder::Builder) unless the
/// **Config** part is disabled.
pub async fn install(registry: Arc<Registry>) -> Arc<Config> {
    // Create the "config" directory in case it doesn't exist...
    let path = Path::new("config").to_path_buf();
    if let Err(error) = tokio::fs::create_dir_all(path.clone()).await {
        log::warn!(
            "Failed to create config base directory {}: {}",
            path.to_string_lossy(),
            error
        )
    }

    let config = Arc::new(Config::new("config/settings.yml"));
    if let Err(error) = config.load().await {
        log::error!("{:#}", error);
    }

    // Install a change listener which runs every 2s...
    run_config_change_monitor(registry, config.clone());

    config
}

#[cfg(test)]
fn run_config_change_monitor(_registry: Arc<Registry>, _config: Arc<Config>) {
    // No automatic updates during testing...
}

#[cfg(not(test))]
fn run_config_change_monitor(registry: Arc<Registry>, config: Arc<Config>) {
    crate::spawn!(async move {
        while registry.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            // This will contain the last modified date of the file on disk or be None if the
            // file is absent...
            let last_modified = config.last_modified().await;

            // Contains the timestamp when the file was loaded the last time or be None if no
            // data has been loaded yet...
            let last_loaded = config.config.load().1;

            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => log::info!("System configuration was re-loaded."),
                    Err(error) => log::error!("Failed to re-load system config: {:#}", error),
                }
            }
        }
    });
}
