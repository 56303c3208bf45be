use std::collections::HashMap;

use crate::error::PlanError;
use crate::models::Endpoint;

/// Looks up endpoints by the identifiers used in `id:path` arguments.
pub trait EndpointResolver {
    fn resolve(&self, id: &str) -> Option<&Endpoint>;
}

impl EndpointResolver for HashMap<String, Endpoint> {
    fn resolve(&self, id: &str) -> Option<&Endpoint> {
        self.get(id)
    }
}

#[derive(Debug, Clone)]
pub struct RemotePath {
    pub raw: String,
    pub id: String,
    pub endpoint: Endpoint,
    pub path: String,
}

/// One side of a copy as written on the command line.
#[derive(Debug, Clone)]
pub enum TransferObject {
    Local { path: String },
    Remote(RemotePath),
}

impl TransferObject {
    /// `id:path` is remote when `id` names a known endpoint; anything else
    /// is a local path.
    pub fn parse(raw: &str, resolver: &dyn EndpointResolver) -> Result<Self, PlanError> {
        if let Some((id, path)) = raw.split_once(':') {
            if let Some(endpoint) = resolver.resolve(id) {
                let path = path.trim();
                if path.is_empty() {
                    return Err(PlanError::EmptyPath {
                        raw: raw.to_string(),
                    });
                }
                return Ok(TransferObject::Remote(RemotePath {
                    raw: raw.to_string(),
                    id: id.to_string(),
                    endpoint: endpoint.clone(),
                    path: path.to_string(),
                }));
            }
        }

        if raw.trim().is_empty() {
            return Err(PlanError::EmptyPath {
                raw: raw.to_string(),
            });
        }
        Ok(TransferObject::Local {
            path: raw.to_string(),
        })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, TransferObject::Remote(_))
    }

    pub fn raw(&self) -> &str {
        match self {
            TransferObject::Local { path } => path,
            TransferObject::Remote(remote) => &remote.raw,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CopyDirection {
    Upload {
        sources: Vec<String>,
        target: RemotePath,
    },
    Download {
        sources: Vec<RemotePath>,
        target: String,
    },
}

/// A validated copy request. Building one performs no I/O.
#[derive(Debug, Clone)]
pub struct CopyPlan {
    pub recursive: bool,
    pub direction: CopyDirection,
}

impl CopyPlan {
    /// `args` are the sources followed by the target. A lone argument is a
    /// source copied into the system temporary directory.
    pub fn parse(
        args: &[String],
        recursive: bool,
        resolver: &dyn EndpointResolver,
    ) -> Result<Self, PlanError> {
        let temp_dir;
        let (sources, target) = match args {
            [] => return Err(PlanError::MissingArguments),
            [only] => {
                temp_dir = std::env::temp_dir().to_string_lossy().into_owned();
                (std::slice::from_ref(only), &temp_dir)
            }
            [sources @ .., target] => (sources, target),
        };

        let target = TransferObject::parse(target, resolver)?;
        let sources = sources
            .iter()
            .map(|raw| TransferObject::parse(raw, resolver))
            .collect::<Result<Vec<_>, _>>()?;

        let first = &sources[0];
        if let Some(other) = sources.iter().find(|s| s.is_remote() != first.is_remote()) {
            return Err(PlanError::MixedSources {
                first: first.raw().to_string(),
                other: other.raw().to_string(),
            });
        }

        let direction = match (first.is_remote(), target) {
            (false, TransferObject::Local { .. }) => return Err(PlanError::BothLocal),
            (true, TransferObject::Remote(_)) => return Err(PlanError::BothRemote),
            (false, TransferObject::Remote(target)) => CopyDirection::Upload {
                sources: sources
                    .into_iter()
                    .map(|s| s.raw().to_string())
                    .collect(),
                target,
            },
            (true, TransferObject::Local { path }) => CopyDirection::Download {
                sources: sources
                    .into_iter()
                    .filter_map(|s| match s {
                        TransferObject::Remote(remote) => Some(remote),
                        TransferObject::Local { .. } => None,
                    })
                    .collect(),
                target: path,
            },
        };

        Ok(Self {
            recursive,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers() -> HashMap<String, Endpoint> {
        let mut map = HashMap::new();
        map.insert(
            "remote1".to_string(),
            Endpoint::new("web".into(), "10.0.0.1".into(), "root".into()),
        );
        map.insert(
            "db".to_string(),
            Endpoint::new("db".into(), "10.0.0.2".into(), "root".into()),
        );
        map
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn known_prefix_is_remote() {
        let servers = servers();
        let obj = TransferObject::parse("remote1:/var/log/app.log", &servers).unwrap();
        match obj {
            TransferObject::Remote(remote) => {
                assert_eq!(remote.id, "remote1");
                assert_eq!(remote.endpoint.host, "10.0.0.1");
                assert_eq!(remote.path, "/var/log/app.log");
            }
            other => panic!("expected remote, got {:?}", other),
        }

        let obj = TransferObject::parse("C:/data/file.txt", &servers).unwrap();
        assert!(!obj.is_remote());
        assert_eq!(obj.raw(), "C:/data/file.txt");

        assert_eq!(
            TransferObject::parse("remote1:  ", &servers).unwrap_err(),
            PlanError::EmptyPath {
                raw: "remote1:  ".into()
            }
        );
    }

    #[test]
    fn mixed_sources_are_rejected() {
        let err = CopyPlan::parse(
            &args(&["local-a.txt", "remote1:/b.txt", "/tmp/out"]),
            false,
            &servers(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PlanError::MixedSources {
                first: "local-a.txt".into(),
                other: "remote1:/b.txt".into()
            }
        );
    }

    #[test]
    fn both_sides_must_differ() {
        let servers = servers();
        assert_eq!(
            CopyPlan::parse(&args(&["a.txt", "b.txt"]), false, &servers).unwrap_err(),
            PlanError::BothLocal
        );
        assert_eq!(
            CopyPlan::parse(&args(&["remote1:/a", "db:/b"]), false, &servers).unwrap_err(),
            PlanError::BothRemote
        );
        assert_eq!(
            CopyPlan::parse(&[], false, &servers).unwrap_err(),
            PlanError::MissingArguments
        );
    }

    #[test]
    fn upload_and_download_plans() {
        let servers = servers();
        let plan = CopyPlan::parse(&args(&["a.txt", "dir", "db:/srv"]), true, &servers).unwrap();
        assert!(plan.recursive);
        match plan.direction {
            CopyDirection::Upload { sources, target } => {
                assert_eq!(sources, vec!["a.txt", "dir"]);
                assert_eq!(target.id, "db");
                assert_eq!(target.path, "/srv");
            }
            other => panic!("expected upload, got {:?}", other),
        }

        let plan = CopyPlan::parse(&args(&["remote1:/etc/hosts"]), false, &servers).unwrap();
        match plan.direction {
            CopyDirection::Download { sources, target } => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].path, "/etc/hosts");
                assert_eq!(target, std::env::temp_dir().to_string_lossy());
            }
            other => panic!("expected download, got {:?}", other),
        }
    }
}
