//! Filesystem shipyard retriever.
//!
//! Layout under the shipyard directory:
//!
//! ```text
//! <project>/shipyard.yaml      pipeline definition
//! <project>/<stage>/.commit    optional revision id of the stage's configuration
//! ```
//!
//! Without a `.commit` file the revision id of a stage is the SHA-256 of
//! the project's `shipyard.yaml`.

use std::path::PathBuf;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use shipyard_core::shipyard::ShipyardRetriever;
use shipyard_types::error::ShipyardError;
use shipyard_types::shipyard::{Shipyard, parse_shipyard};

const SHIPYARD_FILE: &str = "shipyard.yaml";
const COMMIT_FILE: &str = ".commit";

#[derive(Debug, Clone)]
struct CachedShipyard {
    shipyard: Shipyard,
    commit_id: String,
}

/// Reads shipyards from disk and caches the last valid one per project.
pub struct FileShipyardRetriever {
    root: PathBuf,
    cache: DashMap<String, CachedShipyard>,
}

impl FileShipyardRetriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf, ShipyardError> {
        let plain = !project.is_empty()
            && project
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !plain {
            return Err(ShipyardError::NotFound(project.to_string()));
        }
        Ok(self.root.join(project))
    }

    async fn load(&self, project: &str) -> Result<CachedShipyard, ShipyardError> {
        let path = self.project_dir(project)?.join(SHIPYARD_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShipyardError::NotFound(project.to_string()));
            }
            Err(err) => {
                return Err(ShipyardError::Retrieval(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };

        let shipyard = parse_shipyard(&content)?;
        let loaded = CachedShipyard {
            shipyard,
            commit_id: format!("{:x}", Sha256::digest(content.as_bytes())),
        };
        self.cache.insert(project.to_string(), loaded.clone());
        tracing::debug!(project, commit_id = %loaded.commit_id, "loaded shipyard");
        Ok(loaded)
    }

    async fn cached(&self, project: &str) -> Result<CachedShipyard, ShipyardError> {
        if let Some(entry) = self.cache.get(project) {
            return Ok(entry.value().clone());
        }
        self.load(project).await
    }
}

impl ShipyardRetriever for FileShipyardRetriever {
    async fn get_shipyard(&self, project: &str) -> Result<Shipyard, ShipyardError> {
        match self.load(project).await {
            Ok(loaded) => Ok(loaded.shipyard),
            Err(err) => {
                // A broken file must not keep serving the previous definition.
                self.cache.remove(project);
                Err(err)
            }
        }
    }

    async fn get_cached_shipyard(&self, project: &str) -> Result<Shipyard, ShipyardError> {
        Ok(self.cached(project).await?.shipyard)
    }

    async fn get_latest_commit_id(&self, project: &str, stage: &str) -> Result<String, ShipyardError> {
        let stage_commit = self.project_dir(project)?.join(stage).join(COMMIT_FILE);
        match tokio::fs::read_to_string(&stage_commit).await {
            Ok(commit) if !commit.trim().is_empty() => return Ok(commit.trim().to_string()),
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(ShipyardError::Retrieval(format!(
                    "failed to read {}: {err}",
                    stage_commit.display()
                )));
            }
        }
        Ok(self.cached(project).await?.commit_id)
    }
}
