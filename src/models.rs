use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";

/// How the client proves its identity to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
}

impl AuthMethod {
    /// Only "key" (any case) selects key auth; everything else is password.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("key") {
            Self::Key
        } else {
            Self::Password
        }
    }
}

impl<'de> Deserialize<'de> for AuthMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|m| Self::parse(&m)).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    #[default]
    #[serde(alias = "cover")]
    Overwrite,
    Append,
}

/// Transcript capture settings for an interactive session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mode: LogMode,
}

/// Per-endpoint tunables. Known keys are typed, the rest is carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointOptions {
    #[serde(
        rename = "ServerAliveInterval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_alive_interval: Option<f64>,
    #[serde(
        rename = "StrictHostKeyChecking",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub strict_host_key_checking: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EndpointOptions {
    /// Keepalive cadence; `None` when unset, zero, negative or too large
    /// to be a duration.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.server_alive_interval
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn verify_host_key(&self) -> bool {
        self.strict_host_key_checking.unwrap_or(false)
    }

    /// Fill absent values from `defaults`. Values already set are kept.
    pub fn merge_defaults(&mut self, defaults: &EndpointOptions) {
        if self.server_alive_interval.is_none() {
            self.server_alive_interval = defaults.server_alive_interval;
        }
        if self.strict_host_key_checking.is_none() {
            self.strict_host_key_checking = defaults.strict_host_key_checking;
        }
        for (key, value) in &defaults.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

/// A remote target as resolved from the configuration file.
///
/// Read-only once a session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(rename = "ip")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub method: AuthMethod,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub options: EndpointOptions,
    #[serde(default)]
    pub log: SessionLog,

    #[serde(skip)]
    pub group: Option<String>,
}

impl Endpoint {
    #[cfg(test)]
    pub fn new(name: String, host: String, user: String) -> Self {
        Self {
            name,
            host,
            user,
            ..Default::default()
        }
    }

    /// Port to dial; unset or zero means 22.
    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_PORT,
        }
    }

    /// `host:port`, bracketing bare IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port())
        } else {
            format!("{}:{}", self.host, self.port())
        }
    }

    pub fn key_path(&self) -> &str {
        match self.key.as_deref() {
            Some(key) if !key.trim().is_empty() => key.trim(),
            _ => DEFAULT_KEY_PATH,
        }
    }

    /// Passphrase for an encrypted key. Falls back to the password field,
    /// which older configurations used for this purpose.
    pub fn key_passphrase(&self) -> Option<&str> {
        match self.passphrase.as_deref() {
            Some(pass) if !pass.is_empty() => Some(pass),
            _ if !self.password.is_empty() => Some(self.password.as_str()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.host
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_or_missing_method_is_password() {
        assert_eq!(AuthMethod::parse("KEY"), AuthMethod::Key);
        assert_eq!(AuthMethod::parse("Password"), AuthMethod::Password);
        assert_eq!(AuthMethod::parse("kerberos"), AuthMethod::Password);
        assert_eq!(AuthMethod::parse(""), AuthMethod::Password);

        let endpoint: Endpoint =
            serde_json::from_str(r#"{"ip": "10.0.0.1", "method": "agent"}"#).unwrap();
        assert_eq!(endpoint.method, AuthMethod::Password);
        let endpoint: Endpoint = serde_json::from_str(r#"{"ip": "10.0.0.1"}"#).unwrap();
        assert_eq!(endpoint.method, AuthMethod::Password);
    }

    #[test]
    fn port_defaults_to_22() {
        let mut endpoint = Endpoint::new("web".into(), "10.0.0.1".into(), "root".into());
        assert_eq!(endpoint.address(), "10.0.0.1:22");
        endpoint.port = Some(0);
        assert_eq!(endpoint.port(), 22);
        endpoint.port = Some(2222);
        assert_eq!(endpoint.address(), "10.0.0.1:2222");
        endpoint.host = "::1".into();
        assert_eq!(endpoint.address(), "[::1]:2222");
    }

    #[test]
    fn merge_keeps_explicit_values() {
        let mut own: EndpointOptions =
            serde_json::from_str(r#"{"ServerAliveInterval": 5, "Compression": "no"}"#).unwrap();
        let defaults: EndpointOptions = serde_json::from_str(
            r#"{"ServerAliveInterval": 60, "StrictHostKeyChecking": true, "Compression": "yes", "ForwardAgent": "yes"}"#,
        )
        .unwrap();

        own.merge_defaults(&defaults);

        assert_eq!(own.server_alive_interval, Some(5.0));
        assert_eq!(own.strict_host_key_checking, Some(true));
        assert_eq!(own.extra["Compression"], "no");
        assert_eq!(own.extra["ForwardAgent"], "yes");
    }

    #[test]
    fn zero_interval_disables_keepalive() {
        let mut options = EndpointOptions::default();
        assert_eq!(options.keepalive_interval(), None);
        options.server_alive_interval = Some(0.0);
        assert_eq!(options.keepalive_interval(), None);
        options.server_alive_interval = Some(30.0);
        assert_eq!(options.keepalive_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn oversized_interval_disables_keepalive() {
        let options: EndpointOptions =
            serde_json::from_str(r#"{"ServerAliveInterval": 1e20}"#).unwrap();
        assert_eq!(options.keepalive_interval(), None);

        let options = EndpointOptions {
            server_alive_interval: Some(f64::INFINITY),
            ..Default::default()
        };
        assert_eq!(options.keepalive_interval(), None);
    }

    #[test]
    fn key_defaults_and_passphrase_fallback() {
        let mut endpoint = Endpoint::new("db".into(), "db.local".into(), "admin".into());
        endpoint.key = Some(String::new());
        assert_eq!(endpoint.key_path(), DEFAULT_KEY_PATH);
        assert_eq!(endpoint.key_passphrase(), None);

        endpoint.password = "secret".into();
        assert_eq!(endpoint.key_passphrase(), Some("secret"));
        endpoint.passphrase = Some("unlock".into());
        assert_eq!(endpoint.key_passphrase(), Some("unlock"));
    }

    #[test]
    fn log_mode_accepts_legacy_name() {
        let log: SessionLog =
            serde_json::from_str(r#"{"enable": true, "filename": "/tmp/%n.log", "mode": "cover"}"#)
                .unwrap();
        assert_eq!(log.mode, LogMode::Overwrite);
        let log: SessionLog = serde_json::from_str(r#"{"mode": "append"}"#).unwrap();
        assert_eq!(log.mode, LogMode::Append);
    }
}
