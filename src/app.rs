use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AppConfig, ConfigManager, IndexedServer, ServerIndex};
use crate::session;
use crate::transfer::{self, ConsoleSink, CopyPlan};

#[derive(Debug)]
pub struct App {
    pub config_manager: ConfigManager,
    pub app_config: AppConfig,
    pub servers: ServerIndex,
}

impl App {
    pub fn new(config_manager: ConfigManager) -> Result<Self> {
        let app_config = config_manager
            .load_config()
            .context("Failed to load config")?;
        let servers = ServerIndex::build(&app_config);
        if servers.is_empty() {
            warn!(
                "No servers configured in {}",
                config_manager.config_path().display()
            );
        }
        info!(
            "Loaded {} servers from {}",
            servers.len(),
            config_manager.config_path().display()
        );

        Ok(Self {
            config_manager,
            app_config,
            servers,
        })
    }

    pub fn list(&self, filter: Option<&str>) {
        let pattern = filter.unwrap_or("");
        let matches = self.servers.filter(pattern);
        if matches.is_empty() {
            println!(
                "No servers found in {}",
                self.config_manager.config_path().display()
            );
            return;
        }

        // A search shows everything it matched, collapsed groups included.
        let collapsed: HashSet<&str> = if pattern.trim().is_empty() {
            self.app_config
                .groups
                .iter()
                .filter(|g| g.collapse)
                .map(|g| g.group_name.as_str())
                .collect()
        } else {
            HashSet::new()
        };

        for line in format_listing(&matches, self.app_config.show_detail, &collapsed) {
            println!("{}", line);
        }
    }

    /// Run an interactive session on the server registered as `id`.
    pub async fn connect(&self, id: &str, cancel: CancellationToken) -> Result<()> {
        let server = self
            .servers
            .get(id)
            .ok_or_else(|| anyhow!("Server {} not found", id))?;

        session::connect(&server.endpoint, cancel)
            .await
            .map_err(|err| {
                let name = server.endpoint.display_name();
                if err.is_credential_problem() {
                    anyhow!("Login to {} failed: {}", name, err)
                } else {
                    anyhow!("Connection to {} failed: {}", name, err)
                }
            })
    }

    /// Copy files; `Ok(false)` when at least one file failed.
    pub async fn copy(&self, args: &[String], recursive: bool) -> Result<bool> {
        let plan = CopyPlan::parse(args, recursive, &self.servers)?;
        let report = transfer::run_copy(&plan, Arc::new(ConsoleSink::default()))
            .await
            .map_err(|err| anyhow!("Copy failed: {}", err))?;

        println!(
            "{} copied, {} failed",
            report.copied.len(),
            report.failures.len()
        );
        Ok(report.is_success())
    }
}

/// One line per server, with a header whenever the group changes. Servers
/// of collapsed groups are folded into their header.
pub fn format_listing(
    servers: &[&IndexedServer],
    show_detail: bool,
    collapsed: &HashSet<&str>,
) -> Vec<String> {
    let id_width = servers.iter().map(|s| s.id.len()).max().unwrap_or(0) + 2;
    let name_width = servers
        .iter()
        .map(|s| s.endpoint.display_name().chars().count())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::new();
    let mut current_group: Option<&str> = None;
    for server in servers {
        let ep = &server.endpoint;
        let group = ep.group.as_deref();

        if group != current_group {
            current_group = group;
            if let Some(name) = group {
                if collapsed.contains(name) {
                    let count = servers
                        .iter()
                        .filter(|s| s.endpoint.group.as_deref() == Some(name))
                        .count();
                    lines.push(format!("[+] {} ({} servers)", name, count));
                } else {
                    lines.push(format!("[-] {}", name));
                }
            }
        }
        if group.is_some_and(|name| collapsed.contains(name)) {
            continue;
        }

        let id = format!("[{}]", server.id);
        let target = if show_detail {
            format!("{}@{}", ep.user, ep.address())
        } else {
            ep.host.clone()
        };
        let indent = if group.is_some() { "    " } else { "" };
        lines.push(format!(
            "{}{:<id_width$} {:<name_width$}  {}",
            indent,
            id,
            ep.display_name(),
            target,
            id_width = id_width,
            name_width = name_width
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Endpoint;

    fn server(id: &str, name: &str, group: Option<&str>) -> IndexedServer {
        let mut endpoint = Endpoint::new(name.into(), "10.0.0.1".into(), "root".into());
        endpoint.group = group.map(str::to_string);
        IndexedServer {
            id: id.into(),
            endpoint,
        }
    }

    #[test]
    fn listing_groups_servers() {
        let servers = [
            server("1", "web", None),
            server("s1", "stage-1", Some("staging")),
            server("s2", "stage-2", Some("staging")),
        ];
        let refs: Vec<_> = servers.iter().collect();

        let lines = format_listing(&refs, true, &HashSet::new());
        assert_eq!(
            lines,
            vec![
                "[1]  web      root@10.0.0.1:22",
                "[-] staging",
                "    [s1] stage-1  root@10.0.0.1:22",
                "    [s2] stage-2  root@10.0.0.1:22",
            ]
        );

        let collapsed: HashSet<&str> = ["staging"].into_iter().collect();
        let lines = format_listing(&refs, false, &collapsed);
        assert_eq!(
            lines,
            vec!["[1]  web      10.0.0.1", "[+] staging (2 servers)"]
        );
    }
}
