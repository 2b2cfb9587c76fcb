use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use toml::Value;

use crate::consumer::DEFAULT_QUEUE;
use crate::identity::DEFAULT_FIRST_PARTY_DOMAIN;
use crate::publisher::DEFAULT_RECEIPT_TIMEOUT;
use crate::relay::DEFAULT_RECONNECT_DELAY;
use crate::wire::session::DEFAULT_CONNECT_TIMEOUT;

pub const CONFIG_ENV_VAR: &str = "BUGZILLA2BUS_CONFIG";
const LOCAL_CONFIG_PATH: &str = "bugzilla2bus.toml";
const SYSTEM_CONFIG_PATH: &str = "/etc/bugzilla2bus/config.toml";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub stomp: StompConfig,
    pub bugzilla: BugzillaConfig,
    pub identity: IdentityConfig,
    pub cache: CacheConfig,
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StompConfig {
    pub uri: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_stomp_heartbeat_ms")]
    pub heartbeat_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct BugzillaConfig {
    #[serde(default = "default_products")]
    pub products: Vec<String>,
    #[serde(default = "default_bz4compat")]
    pub bz4compat: bool,
    #[serde(default = "default_weburl_base")]
    pub weburl_base: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct IdentityConfig {
    pub fasjson_url: String,
    #[serde(default = "default_first_party_domain")]
    pub first_party_domain: String,
    #[serde(default = "default_list_domain")]
    pub list_domain: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    pub backend: String,
    pub expiration_secs: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PublisherConfig {
    pub uri: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default = "default_destination_prefix")]
    pub destination_prefix: String,
    #[serde(default)]
    pub topic_prefix: String,
    #[serde(default = "default_receipt_timeout_ms")]
    pub receipt_timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    pub reconnect_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_owned()
}

fn default_stomp_heartbeat_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    1_000
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_products() -> Vec<String> {
    vec!["Fedora".to_owned(), "Fedora EPEL".to_owned()]
}

fn default_bz4compat() -> bool {
    true
}

fn default_weburl_base() -> String {
    "https://bugzilla.redhat.com/show_bug.cgi".to_owned()
}

fn default_first_party_domain() -> String {
    DEFAULT_FIRST_PARTY_DOMAIN.to_owned()
}

fn default_list_domain() -> String {
    "lists.fedoraproject.org".to_owned()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_destination_prefix() -> String {
    "/topic/".to_owned()
}

fn default_receipt_timeout_ms() -> u64 {
    DEFAULT_RECEIPT_TIMEOUT.as_millis() as u64
}

impl StompConfig {
    pub fn broker_addresses(&self) -> Result<Vec<String>, ConfigError> {
        parse_broker_uri("stomp.uri", &self.uri)
    }

    pub fn login(&self) -> Option<String> {
        non_empty(&self.user)
    }

    pub fn passcode(&self) -> Option<String> {
        non_empty(&self.pass)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PublisherConfig {
    pub fn broker_addresses(&self) -> Result<Vec<String>, ConfigError> {
        parse_broker_uri("publisher.uri", &self.uri)
    }

    pub fn login(&self) -> Option<String> {
        non_empty(&self.user)
    }

    pub fn passcode(&self) -> Option<String> {
        non_empty(&self.pass)
    }

    pub fn topic_prefix(&self) -> Option<String> {
        non_empty(&self.topic_prefix)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

impl AppConfig {
    /// Picks the config file from `--config`/`-c`, then the environment,
    /// then the well-known locations. Remaining args are overrides.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let (explicit_path, overrides) = split_config_path_arg(args)?;
        let path = match explicit_path {
            Some(path) => path,
            None => discover_config_path(env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))?,
        };

        Self::load_from_toml_with_args(path, overrides)
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let path_display = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_display.clone(),
            source,
        })?;

        let mut root_value: Value = toml_content.parse().map_err(|source| ConfigError::TomlParse {
            path: path_display,
            source,
        })?;

        for (key_path, raw_value) in parse_cli_overrides(args)? {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        root_value.try_into().map_err(ConfigError::Deserialize)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config '{path}': {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to deserialize config: {0}")]
    Deserialize(#[source] toml::de::Error),
    #[error("no config file found, looked at: {}", searched.join(", "))]
    NotFound { searched: Vec<String> },
    #[error("missing value for CLI override '--{key}'")]
    MissingValueForArg { key: String },
    #[error("invalid CLI argument format '{arg}', expected '--section.key value'")]
    InvalidArgFormat { arg: String },
    #[error("invalid override key path '{key}'")]
    InvalidPath { key: String },
    #[error("unknown override key path '{key}'")]
    UnknownPath { key: String },
    #[error("override not supported for complex TOML type at '{key}'")]
    UnsupportedOverrideType { key: String },
    #[error("invalid value '{value}' for '{key}', expected type {expected}")]
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    #[error("invalid broker URI '{uri}' in '{key}': {reason}")]
    InvalidBrokerUri {
        key: &'static str,
        uri: String,
        reason: String,
    },
}

fn split_config_path_arg(
    args: impl IntoIterator<Item = String>,
) -> Result<(Option<PathBuf>, Vec<String>), ConfigError> {
    let mut path = None;
    let mut remaining = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        if arg == "--config" || arg == "-c" {
            let value = iter
                .next()
                .ok_or_else(|| ConfigError::MissingValueForArg { key: "config".to_owned() })?;
            path = Some(PathBuf::from(value));
        } else {
            remaining.push(arg);
        }
    }

    Ok((path, remaining))
}

fn discover_config_path(from_env: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = from_env {
        return Ok(path);
    }

    let candidates = [PathBuf::from(LOCAL_CONFIG_PATH), PathBuf::from(SYSTEM_CONFIG_PATH)];
    candidates
        .iter()
        .find(|candidate| candidate.is_file())
        .cloned()
        .ok_or_else(|| ConfigError::NotFound {
            searched: candidates
                .iter()
                .map(|candidate| candidate.to_string_lossy().to_string())
                .collect(),
        })
}

/// Accepts `host:port`, `tcp://host:port` and failover lists such as
/// `failover:(tcp://a:61613,tcp://b:61613)?randomize=false`. Options after
/// `?` are ignored.
fn parse_broker_uri(key: &'static str, uri: &str) -> Result<Vec<String>, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBrokerUri {
        key,
        uri: uri.to_owned(),
        reason: reason.to_owned(),
    };

    let mut list = uri.trim();
    if let Some(rest) = list.strip_prefix("failover:") {
        list = rest;
    }
    if let Some((head, _options)) = list.split_once('?') {
        list = head;
    }
    let list = list.trim_start_matches('(').trim_end_matches(')');

    let mut addresses = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let address = match entry.split_once("://") {
            Some(("tcp" | "stomp", address)) => address,
            Some(("ssl" | "stomp+ssl", _)) => return Err(invalid("TLS transports are not supported")),
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
            None => entry,
        };
        let address = address.trim_end_matches('/');
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                addresses.push(address.to_owned());
            }
            _ => return Err(invalid(&format!("'{entry}' is not host:port"))),
        }
    }

    if addresses.is_empty() {
        return Err(invalid("no broker address given"));
    }
    Ok(addresses)
}

fn parse_cli_overrides(args: impl IntoIterator<Item = String>) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }
    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let (final_key, sections) = parts.split_last().ok_or_else(unknown)?;
    let mut current = root;
    for section in sections {
        current = current
            .as_table_mut()
            .and_then(|table| table.get_mut(*section))
            .ok_or_else(unknown)?;
    }

    let current_value = current
        .as_table_mut()
        .and_then(|table| table.get_mut(*final_key))
        .ok_or_else(unknown)?;
    *current_value = parse_value_using_current_type(key_path, raw_value, current_value)?;

    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => Err(ConfigError::UnsupportedOverrideType {
            key: key_path.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{discover_config_path, parse_broker_uri, split_config_path_arg, AppConfig, ConfigError};

    const SAMPLE: &str = r#"
[logging]
level = "debug"
human_friendly = false

[stomp]
uri = "tcp://localhost:61613"
user = "bz"
pass = ""
queue = "/queue/fedora_from_esb"
heartbeat_ms = 10000

[bugzilla]
products = ["Fedora", "Fedora EPEL"]
bz4compat = true

[identity]
fasjson_url = "https://fasjson.fedoraproject.org"

[cache]
backend = "memory"
expiration_secs = 86400

[publisher]
uri = "failover:(tcp://bus-01:61613,tcp://bus-02:61613)?randomize=false"
topic_prefix = "org.fedoraproject.prod"
receipt_timeout_ms = 5000
"#;

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "bugzilla2bus-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn loads_config_from_toml_without_overrides() {
        let path = write_temp_config(SAMPLE, "default");

        let config = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect("config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.stomp.login().as_deref(), Some("bz"));
        assert_eq!(config.stomp.passcode(), None);
        assert_eq!(config.stomp.read_timeout_ms, 1_000);
        assert_eq!(config.bugzilla.products, vec!["Fedora", "Fedora EPEL"]);
        assert_eq!(config.bugzilla.weburl_base, "https://bugzilla.redhat.com/show_bug.cgi");
        assert_eq!(config.identity.first_party_domain, "fedoraproject.org");
        assert_eq!(config.identity.list_domain, "lists.fedoraproject.org");
        assert_eq!(config.cache.expiration_secs, 86_400);
        assert_eq!(config.publisher.destination_prefix, "/topic/");
        assert_eq!(config.publisher.topic_prefix().as_deref(), Some("org.fedoraproject.prod"));
        assert_eq!(config.relay.reconnect_delay_ms, 3_000);
    }

    #[test]
    fn legacy_shape_is_the_default_when_bz4compat_is_omitted() {
        let path = write_temp_config(&SAMPLE.replace("bz4compat = true\n", ""), "bz4compat-default");

        let config = AppConfig::load_from_toml_with_args(&path, Vec::<String>::new())
            .expect("config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(config.bugzilla.bz4compat);
    }

    #[test]
    fn argv_overrides_matching_toml_paths() {
        let path = write_temp_config(SAMPLE, "override");

        let config = AppConfig::load_from_toml_with_args(
            &path,
            args(&[
                "--logging.level",
                "info",
                "--logging.human_friendly",
                "true",
                "--stomp.heartbeat_ms",
                "250",
                "--bugzilla.bz4compat",
                "false",
            ]),
        )
        .expect("config with overrides should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.human_friendly);
        assert_eq!(config.stomp.heartbeat_ms, 250);
        assert!(!config.bugzilla.bz4compat);
    }

    #[test]
    fn rejects_bad_overrides() {
        let path = write_temp_config(SAMPLE, "bad-overrides");

        let unknown = AppConfig::load_from_toml_with_args(&path, args(&["--logging.nonexistent", "x"]))
            .expect_err("unknown override key should fail");
        let mistyped = AppConfig::load_from_toml_with_args(&path, args(&["--stomp.heartbeat_ms", "soon"]))
            .expect_err("non-integer value should fail");
        let array = AppConfig::load_from_toml_with_args(&path, args(&["--bugzilla.products", "Fedora"]))
            .expect_err("arrays are not overridable");
        let dangling = AppConfig::load_from_toml_with_args(&path, args(&["--logging.level"]))
            .expect_err("missing value should fail");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(unknown, ConfigError::UnknownPath { .. }));
        assert!(matches!(mistyped, ConfigError::InvalidValueForType { expected: "integer", .. }));
        assert!(matches!(array, ConfigError::UnsupportedOverrideType { .. }));
        assert!(matches!(dangling, ConfigError::MissingValueForArg { .. }));
    }

    #[test]
    fn config_flag_is_split_from_overrides() {
        let (path, rest) = split_config_path_arg(args(&["--logging.level", "info", "-c", "/tmp/b2b.toml"]))
            .expect("args should split");

        assert_eq!(path, Some(PathBuf::from("/tmp/b2b.toml")));
        assert_eq!(rest, args(&["--logging.level", "info"]));
        assert!(matches!(
            split_config_path_arg(args(&["--config"])),
            Err(ConfigError::MissingValueForArg { .. })
        ));
    }

    #[test]
    fn discovery_loads_explicit_path_with_overrides() {
        let path = write_temp_config(SAMPLE, "discovery");

        let config = AppConfig::load_with_discovery(vec![
            "--config".to_owned(),
            path.to_string_lossy().to_string(),
            "--cache.backend".to_owned(),
            "null".to_owned(),
        ])
        .expect("explicit config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.cache.backend, "null");
    }

    #[test]
    fn environment_path_wins_over_well_known_locations() {
        let from_env = PathBuf::from("/nonexistent/from-env.toml");
        assert_eq!(
            discover_config_path(Some(from_env.clone())).expect("env path is taken as-is"),
            from_env
        );
    }

    #[test]
    fn parses_plain_and_failover_broker_uris() {
        assert_eq!(
            parse_broker_uri("stomp.uri", "tcp://localhost:61613").expect("tcp uri"),
            vec!["localhost:61613"]
        );
        assert_eq!(
            parse_broker_uri("stomp.uri", "broker:61613").expect("bare address"),
            vec!["broker:61613"]
        );
        assert_eq!(
            parse_broker_uri(
                "stomp.uri",
                "failover:(tcp://bus-01:61613,tcp://bus-02:61613)?randomize=false,startupMaxReconnectAttempts=1"
            )
            .expect("failover uri"),
            vec!["bus-01:61613", "bus-02:61613"]
        );
    }

    #[test]
    fn rejects_unusable_broker_uris() {
        for uri in ["", "ssl://broker:61612", "http://broker:80", "tcp://broker", "tcp://:61613"] {
            assert!(
                matches!(
                    parse_broker_uri("stomp.uri", uri),
                    Err(ConfigError::InvalidBrokerUri { .. })
                ),
                "{uri} should be rejected"
            );
        }
    }
}
