// Loading and saving workflow documents

use crate::error::ParseError;
use crate::types::WorkflowDefinition;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Document format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Parse workflow from YAML string
pub fn from_yaml_str(content: &str) -> Result<WorkflowDefinition, ParseError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Parse workflow from JSON string
pub fn from_json_str(content: &str) -> Result<WorkflowDefinition, ParseError> {
    Ok(serde_json::from_str(content)?)
}

/// Parse a workflow file, picking the format from its extension
pub fn from_path(path: impl AsRef<Path>) -> Result<WorkflowDefinition, ParseError> {
    let path = path.as_ref();
    let format = Format::from_path(path).ok_or_else(|| ParseError::UnsupportedFormat {
        path: path.to_path_buf(),
    })?;

    let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!("Parsing workflow file {}", path.display());

    match format {
        Format::Yaml => from_yaml_str(&content),
        Format::Json => from_json_str(&content),
    }
}

/// Find workflow files under `root`, sorted by path.
/// A file path is returned as-is when it has a supported extension.
pub fn discover(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, ParseError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root.as_ref()).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() && Format::from_path(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

pub fn to_yaml(workflow: &WorkflowDefinition) -> Result<String, ParseError> {
    Ok(serde_yaml::to_string(workflow)?)
}

pub fn to_json(workflow: &WorkflowDefinition) -> Result<String, ParseError> {
    Ok(serde_json::to_string_pretty(workflow)?)
}
