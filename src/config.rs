use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub interfaces: Vec<InterfaceConfig>,
    pub username: String,
    pub offer_timeout_seconds: u32,
    pub lease_time_seconds: u32,
    pub lease_timeout_seconds: u32,
    pub gw_address: Option<Ipv4Addr>,
    pub netmask: Option<u8>,
    pub max_sessions_per_interface: Option<usize>,
    pub verbose: bool,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
    pub pool_gateway: Ipv4Addr,
}

/// One interface the controller should bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    #[serde(default)]
    pub index: u32,
    /// Comma-separated option string, e.g. `"single"`.
    #[serde(default)]
    pub options: String,
}

/// Options recognised in an interface option string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceOptions {
    /// Restrict the interface to one concurrent session.
    pub single: bool,
}

impl InterfaceOptions {
    /// Parses a comma-separated option string. Empty tokens are ignored.
    pub fn parse(options: &str) -> Result<Self> {
        let mut parsed = Self::default();
        for token in options.split(',').map(str::trim) {
            match token {
                "" => {}
                "single" => parsed.single = true,
                _ => return Err(Error::InvalidOptions(options.to_string())),
            }
        }
        Ok(parsed)
    }
}

/// How a session's username is derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameSource {
    /// Use the session's interface name.
    InterfaceName,
    /// Ask the external username provider, passing the function name.
    External(String),
}

impl UsernameSource {
    pub fn parse(value: &str) -> Result<Self> {
        if value == "ifname" {
            return Ok(Self::InterfaceName);
        }
        match value.strip_prefix("external:") {
            Some(function) if !function.is_empty() => Ok(Self::External(function.to_string())),
            _ => Err(Error::InvalidConfig(format!(
                "unknown username value '{}'",
                value
            ))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            username: "ifname".to_string(),
            offer_timeout_seconds: 3,
            lease_time_seconds: 600,
            lease_timeout_seconds: 660,
            gw_address: None,
            netmask: None,
            max_sessions_per_interface: None,
            verbose: false,
            pool_start: Ipv4Addr::new(10, 0, 0, 2),
            pool_end: Ipv4Addr::new(10, 0, 0, 254),
            pool_gateway: Ipv4Addr::new(10, 0, 0, 1),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if u32::from(self.pool_start) > u32::from(self.pool_end) {
            return Err(Error::InvalidConfig(
                "pool_start must be less than or equal to pool_end".to_string(),
            ));
        }

        if self.offer_timeout_seconds == 0 || self.lease_timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if self.lease_timeout_seconds <= self.lease_time_seconds {
            return Err(Error::InvalidConfig(
                "lease_timeout_seconds must exceed lease_time_seconds".to_string(),
            ));
        }

        if let Some(netmask) = self.netmask
            && !(1..=32).contains(&netmask)
        {
            return Err(Error::InvalidConfig(format!("invalid netmask {}", netmask)));
        }

        UsernameSource::parse(&self.username)?;

        for interface in &self.interfaces {
            InterfaceOptions::parse(&interface.options)?;
        }

        Ok(())
    }

    pub fn username_source(&self) -> Result<UsernameSource> {
        UsernameSource::parse(&self.username)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.offer_timeout_seconds))
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_timeout_seconds))
    }
}
