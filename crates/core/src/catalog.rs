use crate::error::CatalogError;
use crate::parser;
use crate::types::{SpaceId, WorkflowDefinition, WorkflowId};
use crate::validation::WorkflowValidator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// SHA-256 digest of a workflow's canonical JSON form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub String);

impl ContentDigest {
    pub fn of(workflow: &WorkflowDefinition) -> Result<Self, serde_json::Error> {
        use sha2::{Digest, Sha256};
        let bytes = serde_json::to_vec(workflow)?;
        Ok(Self(hex::encode(Sha256::digest(&bytes))))
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered version of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: WorkflowId,
    pub space: SpaceId,
    pub name: String,
    pub version: u32,
    pub digest: ContentDigest,
    pub definition: WorkflowDefinition,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub changelog: String,
    pub deprecated: bool,
}

/// Summary row for listing a space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub id: WorkflowId,
    pub name: String,
    pub latest_version: Option<u32>,
    pub versions: usize,
    pub digest: Option<ContentDigest>,
}

type SpaceMap = HashMap<SpaceId, HashMap<String, Vec<CatalogEntry>>>;

/// In-memory, space-partitioned registry of versioned workflow definitions
pub struct WorkflowCatalog {
    spaces: Arc<RwLock<SpaceMap>>,
    validator: WorkflowValidator,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::with_validator(WorkflowValidator::new())
    }

    pub fn with_validator(validator: WorkflowValidator) -> Self {
        Self {
            spaces: Arc::new(RwLock::new(HashMap::new())),
            validator,
        }
    }

    /// Register a workflow in a space.
    ///
    /// Invalid definitions are rejected. Registering content identical to the
    /// latest non-deprecated version returns that version instead of creating
    /// a new one.
    pub async fn register(
        &self,
        space: &SpaceId,
        mut definition: WorkflowDefinition,
        created_by: impl Into<String>,
        changelog: impl Into<String>,
    ) -> Result<CatalogEntry, CatalogError> {
        let report = self.validator.validate(&definition);
        if !report.is_valid() {
            return Err(CatalogError::Invalid {
                name: definition.name.clone(),
                issues: report.errors,
            });
        }

        definition.space = Some(space.clone());
        let digest = ContentDigest::of(&definition)?;
        let name = definition.name.clone();

        let mut spaces = self.spaces.write().await;
        let versions = spaces
            .entry(space.clone())
            .or_default()
            .entry(name.clone())
            .or_default();

        if let Some(latest) = versions.iter().rev().find(|v| !v.deprecated) {
            if latest.digest == digest {
                tracing::debug!(
                    "Workflow {} in space {} unchanged, keeping v{}",
                    name,
                    space,
                    latest.version
                );
                return Ok(latest.clone());
            }
        }

        let id = versions.first().map(|v| v.id).unwrap_or_default();
        let version = versions.len() as u32 + 1;
        let entry = CatalogEntry {
            id,
            space: space.clone(),
            name: name.clone(),
            version,
            digest,
            definition,
            created_at: Utc::now(),
            created_by: created_by.into(),
            changelog: changelog.into(),
            deprecated: false,
        };
        versions.push(entry.clone());

        tracing::info!(
            "Registered workflow version: {} v{} in space {}",
            name,
            version,
            space
        );

        Ok(entry)
    }

    /// Parse a workflow file and register it, noting the file in the changelog
    pub async fn register_file(
        &self,
        space: &SpaceId,
        path: impl AsRef<Path>,
        created_by: impl Into<String>,
    ) -> crate::Result<CatalogEntry> {
        let path = path.as_ref();
        let definition = parser::from_path(path)?;
        let changelog = format!("Loaded from {}", path.display());
        Ok(self.register(space, definition, created_by, changelog).await?)
    }

    /// Latest non-deprecated version
    pub async fn latest(&self, space: &SpaceId, name: &str) -> Option<CatalogEntry> {
        let spaces = self.spaces.read().await;
        spaces
            .get(space)?
            .get(name)?
            .iter()
            .rev()
            .find(|v| !v.deprecated)
            .cloned()
    }

    /// A specific version, deprecated or not
    pub async fn get(&self, space: &SpaceId, name: &str, version: u32) -> Option<CatalogEntry> {
        let spaces = self.spaces.read().await;
        spaces
            .get(space)?
            .get(name)?
            .iter()
            .find(|v| v.version == version)
            .cloned()
    }

    pub async fn versions(&self, space: &SpaceId, name: &str) -> Vec<CatalogEntry> {
        let spaces = self.spaces.read().await;
        spaces
            .get(space)
            .and_then(|workflows| workflows.get(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Workflows in a space, sorted by name
    pub async fn list(&self, space: &SpaceId) -> Vec<CatalogSummary> {
        let spaces = self.spaces.read().await;
        let Some(workflows) = spaces.get(space) else {
            return Vec::new();
        };

        let mut summaries: Vec<CatalogSummary> = workflows
            .iter()
            .filter_map(|(name, versions)| {
                let first = versions.first()?;
                let latest = versions.iter().rev().find(|v| !v.deprecated);
                Some(CatalogSummary {
                    id: first.id,
                    name: name.clone(),
                    latest_version: latest.map(|v| v.version),
                    versions: versions.len(),
                    digest: latest.map(|v| v.digest.clone()),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub async fn spaces(&self) -> Vec<SpaceId> {
        let spaces = self.spaces.read().await;
        let mut ids: Vec<SpaceId> = spaces.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn deprecate(
        &self,
        space: &SpaceId,
        name: &str,
        version: u32,
    ) -> Result<(), CatalogError> {
        let mut spaces = self.spaces.write().await;
        let versions = spaces
            .get_mut(space)
            .and_then(|workflows| workflows.get_mut(name))
            .ok_or_else(|| CatalogError::NotFound {
                space: space.clone(),
                name: name.to_string(),
            })?;

        let entry = versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| CatalogError::VersionNotFound {
                space: space.clone(),
                name: name.to_string(),
                version,
            })?;

        entry.deprecated = true;

        tracing::info!("Deprecated workflow version: {} v{} in space {}", name, version, space);

        Ok(())
    }

    /// Remove a workflow and all of its versions
    pub async fn remove(&self, space: &SpaceId, name: &str) -> Result<(), CatalogError> {
        let mut spaces = self.spaces.write().await;
        let removed = spaces
            .get_mut(space)
            .and_then(|workflows| workflows.remove(name));

        match removed {
            Some(versions) => {
                tracing::info!(
                    "Removed workflow {} ({} version(s)) from space {}",
                    name,
                    versions.len(),
                    space
                );
                Ok(())
            }
            None => Err(CatalogError::NotFound {
                space: space.clone(),
                name: name.to_string(),
            }),
        }
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::new()
    }
}
