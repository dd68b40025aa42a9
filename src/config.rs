use std::fmt::Formatter;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use resp::{DEFAULT_HOST, DEFAULT_PORT, Endpoint};
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, de};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Name used in logs for the instance configured at the top level.
pub const ROOT_INSTANCE: &str = "root";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file {path:?} failed, {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("parse config failed, {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config, {0}")]
    Invalid(String),
}

#[derive(Deserialize)]
struct HumanDuration(#[serde(with = "humantime_serde")] Duration);

/// One monitored server.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceConfig {
    pub endpoint: Endpoint,

    /// Sent with `AUTH` right after connecting.
    pub auth: Option<String>,

    /// Also run `INFO commandstats`
    pub commandstats: bool,

    /// Show progress messages. Only the top level flag counts, it raises
    /// the log level to `debug` for every instance.
    pub verbose: bool,

    unknown: Vec<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            endpoint: Endpoint::default(),
            auth: None,
            commandstats: false,
            verbose: false,
            unknown: vec![],
        }
    }
}

impl InstanceConfig {
    /// Consume the value of `key` if it is an instance key, returns false
    /// when the key is not recognized and the value is left in `map`.
    ///
    /// Addressing keys are applied in the order they appear, whatever comes
    /// last decides between socket and TCP.
    fn apply<'de, A>(&mut self, key: &str, map: &mut A) -> Result<bool, A::Error>
    where
        A: MapAccess<'de>,
    {
        match key {
            "socket" => {
                self.endpoint = Endpoint::Unix(map.next_value::<PathBuf>()?);
            }
            "host" | "ip" => {
                let host = map.next_value::<String>()?;
                let port = match &self.endpoint {
                    Endpoint::Tcp { port, .. } => *port,
                    Endpoint::Unix(_) => DEFAULT_PORT,
                };

                self.endpoint = Endpoint::Tcp { host, port };
            }
            "port" => {
                let port = map.next_value::<u16>()?;
                let host = match &self.endpoint {
                    Endpoint::Tcp { host, .. } => host.clone(),
                    Endpoint::Unix(_) => DEFAULT_HOST.to_string(),
                };

                self.endpoint = Endpoint::Tcp { host, port };
            }
            "auth" => self.auth = Some(map.next_value::<String>()?),
            "commandstats" => self.commandstats = map.next_value::<bool>()?,
            "verbose" => self.verbose = map.next_value::<bool>()?,
            _ => return Ok(false),
        }

        Ok(true)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                if host.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "host of instance {name:?} is empty"
                    )));
                }
                if *port == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "port of instance {name:?} must not be 0"
                    )));
                }
            }
            Endpoint::Unix(path) => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "socket of instance {name:?} is empty"
                    )));
                }
            }
        }

        if matches!(&self.auth, Some(auth) if auth.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "auth of instance {name:?} is empty"
            )));
        }

        Ok(())
    }
}

impl<'de> Deserialize<'de> for InstanceConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct InstanceVisitor;

        impl<'de> Visitor<'de> for InstanceVisitor {
            type Value = InstanceConfig;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a redis instance config")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(InstanceConfig::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut config = InstanceConfig::default();

                while let Some(key) = map.next_key::<String>()? {
                    if !config.apply(&key, &mut map)? {
                        map.next_value::<IgnoredAny>()?;
                        config.unknown.push(key);
                    }
                }

                Ok(config)
            }
        }

        deserializer.deserialize_map(InstanceVisitor)
    }
}

/// One entry of a collection cycle.
#[derive(Clone, Copy, Debug)]
pub struct Target<'a> {
    /// `None` for the top level instance
    pub name: Option<&'a str>,
    pub instance: &'a InstanceConfig,
}

impl Target<'_> {
    #[inline]
    pub fn label(&self) -> &str {
        self.name.unwrap_or(ROOT_INSTANCE)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub interval: Duration,

    /// Deadline of every connect, read and write.
    pub timeout: Duration,

    /// Host name reported with the values, see `dispatch::hostname`.
    pub hostname: Option<String>,

    /// Built from the instance keys at the top level, only collected when
    /// `instances` is empty.
    pub root: InstanceConfig,

    pub instances: IndexMap<String, InstanceConfig>,

    root_keys: Vec<String>,
    unknown: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: DEFAULT_INTERVAL,
            timeout: resp::DEFAULT_TIMEOUT,
            hostname: None,
            root: InstanceConfig::default(),
            instances: IndexMap::new(),
            root_keys: vec![],
            unknown: vec![],
        }
    }
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ConfigVisitor;

        impl<'de> Visitor<'de> for ConfigVisitor {
            type Value = Config;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a redstat config")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(Config::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut config = Config::default();

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "interval" => config.interval = map.next_value::<HumanDuration>()?.0,
                        "timeout" => config.timeout = map.next_value::<HumanDuration>()?.0,
                        "hostname" => config.hostname = Some(map.next_value::<String>()?),
                        "instances" => {
                            config.instances =
                                map.next_value::<IndexMap<String, InstanceConfig>>()?;
                        }
                        _ => {
                            if config.root.apply(&key, &mut map)? {
                                // verbose also sets the log level, so it is
                                // never ignored
                                if key != "verbose" {
                                    config.root_keys.push(key);
                                }
                            } else {
                                map.next_value::<IgnoredAny>()?;
                                config.unknown.push(key);
                            }
                        }
                    }
                }

                Ok(config)
            }
        }

        deserializer.deserialize_map(ConfigVisitor)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // an empty document or one with only comments
        let value = serde_yaml::from_str::<serde_yaml::Value>(s)?;
        let config = if value.is_null() {
            Config::default()
        } else {
            Config::deserialize(value)?
        };
        config.validate()?;

        Ok(config)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        content.parse()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be greater than 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be greater than 0".into()));
        }
        if matches!(&self.hostname, Some(hostname) if hostname.is_empty() || hostname.contains(['/', '"']))
        {
            return Err(ConfigError::Invalid(
                "hostname must not be empty or contain '/' and '\"'".into(),
            ));
        }

        self.root.validate(ROOT_INSTANCE)?;
        for (name, instance) in &self.instances {
            // the name ends up inside the plugin part of the value
            // identifier, where collectd splits at '/' and the first '-'
            if name.is_empty() || name.contains(['/', '"', '-']) {
                return Err(ConfigError::Invalid(format!(
                    "invalid instance name {name:?}"
                )));
            }

            instance.validate(name)?;
        }

        Ok(())
    }

    /// Whether the top level instance asked for verbose logging.
    #[inline]
    pub fn verbose(&self) -> bool {
        self.root.verbose
    }

    /// Things worth telling the user which do not prevent running.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = self
            .unknown
            .iter()
            .map(|key| format!("unknown config key {key:?}"))
            .collect::<Vec<_>>();

        for (name, instance) in &self.instances {
            warnings.extend(
                instance
                    .unknown
                    .iter()
                    .map(|key| format!("unknown config key {key:?} in instance {name:?}")),
            );

            if instance.verbose {
                warnings.push(format!(
                    "verbose of instance {name:?} is ignored, set it at the top level"
                ));
            }
        }

        if !self.instances.is_empty() && !self.root_keys.is_empty() {
            warnings.push(format!(
                "top level keys {} are ignored because instances are configured",
                self.root_keys.join(", ")
            ));
        }

        warnings
    }

    /// Instances to collect, in declaration order.
    pub fn targets(&self) -> Vec<Target<'_>> {
        if self.instances.is_empty() {
            return vec![Target {
                name: None,
                instance: &self.root,
            }];
        }

        self.instances
            .iter()
            .map(|(name, instance)| Target {
                name: Some(name.as_str()),
                instance,
            })
            .collect()
    }
}
