use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::{Endpoint, EndpointOptions};
use crate::transfer::EndpointResolver;

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub show_detail: bool,
    pub servers: Vec<Endpoint>,
    pub groups: Vec<HostGroup>,
    /// Defaults for every server.
    pub options: EndpointOptions,
    /// Extra files holding more top-level servers.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ext_server_configs: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HostGroup {
    pub group_name: String,
    pub prefix: String,
    pub servers: Vec<Endpoint>,
    pub collapse: bool,
    /// Defaults for the servers of this group, applied before the global ones.
    #[serde(skip_serializing_if = "is_empty_options")]
    pub options: EndpointOptions,
}

fn is_empty_options(options: &EndpointOptions) -> bool {
    *options == EndpointOptions::default()
}

/// TOML needs a table at the top, so TOML server files wrap the list.
#[derive(Debug, Deserialize)]
struct ServerFile {
    #[serde(default)]
    servers: Vec<Endpoint>,
}

#[derive(Debug)]
pub struct ConfigManager {
    config_file: PathBuf,
}

impl ConfigManager {
    /// Use `explicit` when given, otherwise `config.json` next to the
    /// executable, otherwise the per-user config directory.
    pub fn new(explicit: Option<PathBuf>) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => path,
            None => Self::discover()?,
        };
        Ok(Self { config_file })
    }

    fn discover() -> Result<PathBuf> {
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("autossh");

        // Create config directory and an empty config if they don't exist
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        if !config_file.exists() {
            let empty = serde_json::to_string_pretty(&AppConfig::default())
                .context("Failed to serialize config")?;
            fs::write(&config_file, empty).context("Failed to write config file")?;
        }
        Ok(config_file)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file
    }

    /// Directory holding the config file; relative paths in it resolve here.
    pub fn config_dir(&self) -> &Path {
        match self.config_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_file.exists() {
            bail!("Config file {} does not exist", self.config_file.display());
        }

        let content = fs::read_to_string(&self.config_file).with_context(|| {
            format!("Failed to read config file {}", self.config_file.display())
        })?;
        let mut config: AppConfig = parse_document(&self.config_file, &content)
            .with_context(|| {
                format!("Failed to parse config file {}", self.config_file.display())
            })?;

        for ext in &config.ext_server_configs {
            let path = self.config_dir().join(ext);
            let servers = load_server_file(&path)?;
            debug!("Loaded {} servers from {}", servers.len(), path.display());
            config.servers.extend(servers);
        }

        Ok(config)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn parse_document<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T> {
    if is_toml(path) {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

fn load_server_file(path: &Path) -> Result<Vec<Endpoint>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Can't read ext server config file {}", path.display()))?;
    let servers = if is_toml(path) {
        parse_document::<ServerFile>(path, &content).map(|file| file.servers)
    } else {
        parse_document::<Vec<Endpoint>>(path, &content)
    };
    servers.with_context(|| format!("Can't parse ext server config file {}", path.display()))
}

/// A server together with the id it was registered under.
#[derive(Debug, Clone)]
pub struct IndexedServer {
    pub id: String,
    pub endpoint: Endpoint,
}

/// Lookup table from ids and aliases to fully resolved endpoints.
#[derive(Debug, Default)]
pub struct ServerIndex {
    entries: Vec<IndexedServer>,
    lookup: HashMap<String, usize>,
}

impl ServerIndex {
    /// Top-level servers are numbered from 1, group servers from 1 behind
    /// the group prefix. Aliases are extra ids for the same server. An id
    /// that is already taken keeps its first owner.
    pub fn build(config: &AppConfig) -> Self {
        let mut index = Self::default();

        for (i, server) in config.servers.iter().enumerate() {
            index.insert((i + 1).to_string(), server.clone(), &config.options);
        }

        for group in &config.groups {
            for (j, server) in group.servers.iter().enumerate() {
                let mut endpoint = server.clone();
                endpoint.group = Some(group.group_name.clone());
                endpoint.options.merge_defaults(&group.options);
                index.insert(format!("{}{}", group.prefix, j + 1), endpoint, &config.options);
            }
        }

        index
    }

    fn insert(&mut self, id: String, mut endpoint: Endpoint, defaults: &EndpointOptions) {
        if self.lookup.contains_key(&id) {
            warn!("Server id {} is taken, skipping {}", id, endpoint.display_name());
            return;
        }

        endpoint.options.merge_defaults(defaults);
        let alias = endpoint.alias.trim().to_string();
        let slot = self.entries.len();
        self.entries.push(IndexedServer {
            id: id.clone(),
            endpoint,
        });
        self.lookup.insert(id, slot);

        if !alias.is_empty() {
            if self.lookup.contains_key(&alias) {
                warn!("Alias {} is taken, ignoring it", alias);
            } else {
                self.lookup.insert(alias, slot);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&IndexedServer> {
        self.lookup.get(id.trim()).map(|&slot| &self.entries[slot])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Servers whose name, alias, host or user contains `pattern`,
    /// ignoring case.
    pub fn filter<'a>(&'a self, pattern: &str) -> Vec<&'a IndexedServer> {
        let pattern = pattern.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|server| {
                let ep = &server.endpoint;
                pattern.is_empty()
                    || [&ep.name, &ep.alias, &ep.host, &ep.user]
                        .iter()
                        .any(|field| field.to_lowercase().contains(&pattern))
            })
            .collect()
    }
}

impl EndpointResolver for ServerIndex {
    fn resolve(&self, id: &str) -> Option<&Endpoint> {
        self.get(id).map(|server| &server.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthMethod, LogMode};
    use tempfile::TempDir;

    const SAMPLE: &str = r#"{
        "show_detail": true,
        "options": {"ServerAliveInterval": 30, "ForwardAgent": "yes"},
        "servers": [
            {"name": "web", "alias": "w", "ip": "10.0.0.1", "user": "root", "password": "pw"},
            {"name": "db", "ip": "10.0.0.2", "port": 2222, "user": "admin", "method": "KEY",
             "key": "~/.ssh/db", "options": {"ServerAliveInterval": 0},
             "log": {"enable": true, "filename": "%n.log", "mode": "cover"}}
        ],
        "groups": [
            {"group_name": "staging", "prefix": "s", "collapse": true,
             "options": {"ServerAliveInterval": 5},
             "servers": [
                {"name": "stage-1", "alias": "w", "ip": "10.1.0.1", "user": "deploy"},
                {"name": "stage-2", "ip": "10.1.0.2", "user": "deploy",
                 "options": {"StrictHostKeyChecking": true}}
             ]}
        ]
    }"#;

    fn write_config(dir: &TempDir, name: &str, content: &str) -> ConfigManager {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        ConfigManager::new(Some(path)).unwrap()
    }

    #[test]
    fn load_and_index() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "config.json", SAMPLE).load_config().unwrap();
        assert!(config.show_detail);

        let index = ServerIndex::build(&config);
        assert_eq!(index.len(), 4);
        let ids: Vec<_> = index.entries.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "s1", "s2"]);

        let web = index.get("w").unwrap();
        assert_eq!(web.id, "1");
        assert_eq!(web.endpoint.options.server_alive_interval, Some(30.0));
        assert_eq!(
            web.endpoint.options.extra.get("ForwardAgent"),
            Some(&serde_json::json!("yes"))
        );

        let db = &index.get("2").unwrap().endpoint;
        assert_eq!(db.method, AuthMethod::Key);
        assert_eq!(db.port(), 2222);
        assert_eq!(db.options.keepalive_interval(), None);
        assert_eq!(db.log.mode, LogMode::Overwrite);
        assert!(db.group.is_none());
    }

    #[test]
    fn group_defaults_come_before_global() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "config.json", SAMPLE).load_config().unwrap();
        let index = ServerIndex::build(&config);

        let stage1 = &index.get("s1").unwrap().endpoint;
        assert_eq!(stage1.group.as_deref(), Some("staging"));
        assert_eq!(stage1.options.server_alive_interval, Some(5.0));
        assert!(!stage1.options.verify_host_key());

        let stage2 = &index.get("s2").unwrap().endpoint;
        assert!(stage2.options.verify_host_key());
        assert!(stage2.options.extra.contains_key("ForwardAgent"));
    }

    #[test]
    fn first_owner_of_an_id_wins() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "config.json", SAMPLE).load_config().unwrap();
        let index = ServerIndex::build(&config);

        // "w" is the alias of both web and stage-1.
        assert_eq!(index.get("w").unwrap().endpoint.name, "web");
        assert_eq!(index.get("s1").unwrap().endpoint.name, "stage-1");
    }

    #[test]
    fn filter_matches_any_field() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "config.json", SAMPLE).load_config().unwrap();
        let index = ServerIndex::build(&config);

        let names = |pattern: &str| -> Vec<String> {
            index
                .filter(pattern)
                .iter()
                .map(|s| s.endpoint.name.clone())
                .collect()
        };
        assert_eq!(names("STAGE"), vec!["stage-1", "stage-2"]);
        assert_eq!(names("10.0.0.2"), vec!["db"]);
        assert_eq!(names("admin"), vec!["db"]);
        assert_eq!(names("").len(), 4);
        assert!(names("nothing-like-this").is_empty());
    }

    #[test]
    fn toml_config_and_ext_servers() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("more.json"),
            r#"[{"name": "extra", "ip": "10.9.0.1", "user": "ops"}]"#,
        )
        .unwrap();
        let manager = write_config(
            &dir,
            "autossh.toml",
            r#"
ext_server_configs = ["more.json"]

[options]
ServerAliveInterval = 15

[[servers]]
name = "toml-host"
ip = "10.8.0.1"
user = "root"
"#,
        );

        let config = manager.load_config().unwrap();
        let index = ServerIndex::build(&config);
        assert_eq!(index.get("1").unwrap().endpoint.name, "toml-host");
        let extra = &index.get("2").unwrap().endpoint;
        assert_eq!(extra.name, "extra");
        assert_eq!(extra.options.server_alive_interval, Some(15.0));
    }

    #[test]
    fn missing_or_broken_files_are_errors() {
        let dir = TempDir::new().unwrap();
        let missing = ConfigManager::new(Some(dir.path().join("absent.json"))).unwrap();
        let err = missing.load_config().unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let broken = write_config(&dir, "broken.json", "{ not json");
        let err = broken.load_config().unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn resolver_uses_ids_and_aliases() {
        let dir = TempDir::new().unwrap();
        let config = write_config(&dir, "config.json", SAMPLE).load_config().unwrap();
        let index = ServerIndex::build(&config);

        assert_eq!(index.resolve("w").map(|e| e.host.as_str()), Some("10.0.0.1"));
        assert_eq!(index.resolve("s2").map(|e| e.host.as_str()), Some("10.1.0.2"));
        assert!(index.resolve("99").is_none());
    }
}
