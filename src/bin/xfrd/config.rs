// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the server configuration file and TSIG key files.

use std::fmt::{self, Write};
use std::fs;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use xfrd::class::Class;
use xfrd::db::ZoneKind;
use xfrd::io::{Limits, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};
use xfrd::message::tsig::{Algorithm, Keyring, TsigKey};
use xfrd::message::MAX_MESSAGE_LEN;
use xfrd::name::Name;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the server configuration from the file given by `path`.
///
/// The `reloading` parameter controls how the configuration is
/// summarized in the log: if reloading, only the zone configuration is
/// summarized. This parameter does *not* otherwise affect processing.
pub fn load_from_path(path: impl AsRef<Path>, reloading: bool) -> Result<Config> {
    let dir = match path.as_ref().parent() {
        Some(p) => p,
        None => return Err(anyhow!("the configuration file path has no parent")),
    };
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let mut config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;

    // When loading the configuration from a path, all zone file paths
    // are interpreted relative to the configuration file's directory.
    for zone_config in &mut config.zones {
        zone_config.resolve_paths(dir);
    }

    if reloading {
        log_zone_summary(&config.zones);
    } else {
        log_config_summary(&config);
    }
    Ok(config)
}

/// Loads a TSIG key file.
pub fn load_key_file(path: impl AsRef<Path>) -> Result<TsigKey> {
    let raw_key = fs::read(path.as_ref()).context("failed to read the key file")?;
    let key: TsigKeyConfig = toml::from_slice(&raw_key).context("failed to parse the key file")?;
    Ok(key.into())
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let mut message = format!(
        "Configuration loaded:\n\
         Bind address:     {}\n\
         Max sessions:     {}\n\
         Max message size: {}\n\
         TSIG keys:        {}\n\
         Zones:            ",
        config.bind,
        config.limits.max_sessions,
        config.limits.max_message_len,
        config.tsig_keys.len(),
    );
    summarize_zones(&config.zones, &mut message);
    debug!("{}", message);
}

/// Summarizes only the zones in the log, if the debug log level is
/// enabled. Used when reloading.
fn log_zone_summary(zones: &[ZoneConfig]) {
    if log_enabled!(Debug) {
        let mut message = String::from("Configuration reloaded:\nZones: ");
        summarize_zones(zones, &mut message);
        debug!("{}", message);
    }
}

/// Produces the zone summary for [`log_config_summary`] and
/// [`log_zone_summary`].
fn summarize_zones(zones: &[ZoneConfig], message: &mut String) {
    if zones.is_empty() {
        message.push_str("none to load");
    } else {
        write!(message, "{} to load", zones.len()).unwrap();
        for zone_config in zones {
            write!(
                message,
                "\n  {}/{} ({})",
                zone_config.name.0, zone_config.class.0, zone_config.kind.0,
            )
            .unwrap();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tsig_keys: Vec<TsigKeyConfig>,
    pub zones: Vec<ZoneConfig>,
}

impl Config {
    /// Builds the keyring from the configured TSIG keys.
    pub fn keyring(&self) -> Keyring {
        let mut keyring = Keyring::new();
        for key_config in &self.tsig_keys {
            keyring.insert(key_config.clone().into());
        }
        keyring
    }
}

const DEFAULT_BIND_IP: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);
const DEFAULT_BIND_PORT: u16 = 53;

fn default_bind() -> SocketAddr {
    SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_BIND_PORT)
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: LIMITS                                      //
////////////////////////////////////////////////////////////////////////

/// Limits on transfers. This mirrors [`Limits`] and can be converted
/// into it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_max_message_len() -> usize {
    MAX_MESSAGE_LEN
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_secs()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_message_len: default_max_message_len(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            max_message_len: config.max_message_len,
            idle_timeout: Duration::from_secs(config.idle_timeout),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: TSIG KEYS                                   //
////////////////////////////////////////////////////////////////////////

/// A TSIG key. This is both an entry of the configuration file's
/// `tsig_keys` list and the whole content of a key file.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TsigKeyConfig {
    pub name: ConfigName,
    pub algorithm: ConfigAlgorithm,
    pub secret: ConfigSecret,
}

impl From<TsigKeyConfig> for TsigKey {
    fn from(config: TsigKeyConfig) -> Self {
        TsigKey::new(config.name.0, config.algorithm.0, config.secret.0)
    }
}

/// A base64-encoded TSIG secret.
#[derive(Clone)]
pub struct ConfigSecret(pub Box<[u8]>);

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ConfigSecret(..)")
    }
}

impl<'de> Deserialize<'de> for ConfigSecret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text.trim())
            .map(|secret| ConfigSecret(secret.into()))
            .map_err(|e| de::Error::custom(format!("invalid base64 TSIG secret: {e}")))
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: ZONES                                       //
////////////////////////////////////////////////////////////////////////

/// The configuration of a single zone.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: ConfigName,
    #[serde(default = "default_zone_class")]
    pub class: ConfigClass,
    #[serde(default = "default_zone_kind")]
    pub kind: ConfigZoneKind,
    pub image: PathBuf,
    pub ixfr_log: Option<PathBuf>,
    #[serde(default = "default_max_log_len")]
    pub max_log_len: usize,
}

impl ZoneConfig {
    /// Makes relative file paths relative to `dir`.
    fn resolve_paths(&mut self, dir: &Path) {
        if self.image.is_relative() {
            self.image = dir.join(&self.image);
        }
        if let Some(ref mut ixfr_log) = self.ixfr_log {
            if ixfr_log.is_relative() {
                *ixfr_log = dir.join(&*ixfr_log);
            }
        }
    }
}

fn default_zone_class() -> ConfigClass {
    ConfigClass(Class::IN)
}

fn default_zone_kind() -> ConfigZoneKind {
    ConfigZoneKind(ZoneKind::Primary)
}

fn default_max_log_len() -> usize {
    64
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER XFRD TYPES FOR SERDE                                 //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type
/// from [`xfrd`], using its [`FromStr`](std::str::FromStr)
/// implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper over an [`xfrd`]
        /// type.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigName, Name, "domain name");
make_serde_wrapper!(ConfigClass, Class, "DNS class");
make_serde_wrapper!(ConfigZoneKind, ZoneKind, "zone kind");
make_serde_wrapper!(ConfigAlgorithm, Algorithm, "TSIG algorithm");

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        bind = "127.0.0.1:5353"

        [limits]
        max_sessions = 4

        [[tsig_keys]]
        name = "transfer.example."
        algorithm = "hmac-sha256"
        secret = "c2VjcmV0LXNlY3JldA=="

        [[zones]]
        name = "example."
        image = "example.img"
        ixfr_log = "/var/lib/xfrd/example.ixfr"

        [[zones]]
        name = "example.net."
        kind = "secondary"
        image = "example.net.img"
        max_log_len = 8
    "#;

    #[test]
    fn example_config_parses() {
        let mut config: Config = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.bind, "127.0.0.1:5353".parse().unwrap());

        let limits = Limits::from(&config.limits);
        assert_eq!(limits.max_sessions, 4);
        assert_eq!(limits.max_message_len, MAX_MESSAGE_LEN);
        assert_eq!(limits.idle_timeout, DEFAULT_IDLE_TIMEOUT);

        let keyring = config.keyring();
        assert_eq!(keyring.len(), 1);
        assert_eq!(&*config.tsig_keys[0].secret.0, b"secret-secret");

        assert_eq!(config.zones.len(), 2);
        assert_eq!(config.zones[0].kind.0, ZoneKind::Primary);
        assert_eq!(config.zones[0].class.0, Class::IN);
        assert_eq!(config.zones[0].max_log_len, 64);
        assert_eq!(config.zones[1].kind.0, ZoneKind::Secondary);
        assert_eq!(config.zones[1].max_log_len, 8);

        for zone_config in &mut config.zones {
            zone_config.resolve_paths(Path::new("/etc/xfrd"));
        }
        assert_eq!(config.zones[0].image, Path::new("/etc/xfrd/example.img"));
        assert_eq!(
            config.zones[0].ixfr_log.as_deref(),
            Some(Path::new("/var/lib/xfrd/example.ixfr"))
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        let bad_secret = r#"
            name = "k."
            algorithm = "hmac-sha1"
            secret = "not base64!"
        "#;
        assert!(toml::from_str::<TsigKeyConfig>(bad_secret).is_err());

        let bad_algorithm = r#"
            name = "k."
            algorithm = "hmac-md5"
            secret = "c2VjcmV0"
        "#;
        assert!(toml::from_str::<TsigKeyConfig>(bad_algorithm).is_err());

        let bad_kind = r#"
            [[zones]]
            name = "example."
            kind = "tertiary"
            image = "example.img"
        "#;
        assert!(toml::from_str::<Config>(bad_kind).is_err());
    }
}
