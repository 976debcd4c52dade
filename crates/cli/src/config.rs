use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Effective CLI configuration: TOML file, then environment overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// File the configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub argo: ArgoSection,

    #[serde(default)]
    pub workflows: WorkflowsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgoSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowsSection {
    #[serde(default = "default_workflow_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_space")]
    pub default_space: String,
}

fn default_port() -> u16 {
    8080
}

fn default_namespace() -> String {
    "argo".to_string()
}

fn default_workflow_dir() -> PathBuf {
    PathBuf::from("./workflows")
}

fn default_space() -> String {
    tas_workflow_core::SpaceId::DEFAULT.to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for ArgoSection {
    fn default() -> Self {
        Self {
            server_url: None,
            namespace: default_namespace(),
        }
    }
}

impl Default for WorkflowsSection {
    fn default() -> Self {
        Self {
            dir: default_workflow_dir(),
            default_space: default_space(),
        }
    }
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            source: None,
            log_level: None,
            database_url: None,
            server: Default::default(),
            argo: Default::default(),
            workflows: Default::default(),
        }
    }
}

impl CliConfig {
    /// Load from `config_path` if it exists, apply process environment
    /// overrides and check the result.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config = Self::from_file(config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.check()?;
        Ok(config)
    }

    fn from_file(config_path: &Path) -> Result<Self> {
        // Load config file if it exists, otherwise use defaults
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read configuration file {}", config_path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", config_path.display()))?;
        config.source = Some(config_path.to_path_buf());

        Ok(config)
    }

    /// Apply environment overrides. `lookup` returns a variable's value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(url) = lookup("ARGO_SERVER_URL") {
            self.argo.server_url = Some(url);
        }
        if let Some(namespace) = lookup("ARGO_NAMESPACE") {
            self.argo.namespace = namespace;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("SERVER_PORT is not a valid port: {}", port))?;
        }
        if let Some(dir) = lookup("WORKFLOW_DIR") {
            self.workflows.dir = PathBuf::from(dir);
        }
        if let Some(space) = lookup("DEFAULT_SPACE") {
            self.workflows.default_space = space;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = Some(level);
        }
        Ok(())
    }

    /// Syntax checks only; nothing is contacted
    pub fn check(&self) -> Result<()> {
        if let Some(raw) = &self.database_url {
            url::Url::parse(raw).with_context(|| format!("Invalid DATABASE_URL: {}", raw))?;
        }
        if let Some(raw) = &self.argo.server_url {
            let parsed =
                url::Url::parse(raw).with_context(|| format!("Invalid ARGO_SERVER_URL: {}", raw))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("ARGO_SERVER_URL must use http or https: {}", raw);
            }
        }
        if self.argo.namespace.trim().is_empty() {
            bail!("Argo namespace cannot be empty");
        }
        if self.workflows.default_space.trim().is_empty() {
            bail!("Default space cannot be empty");
        }
        Ok(())
    }

    pub fn default_space(&self) -> tas_workflow_core::SpaceId {
        tas_workflow_core::SpaceId::new(self.workflows.default_space.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CliConfig::from_file(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config, CliConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.argo.namespace, "argo");
        assert_eq!(config.workflows.dir, PathBuf::from("./workflows"));
        assert_eq!(config.workflows.default_space, "default");
    }

    #[test]
    fn test_file_values_and_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tas-workflow.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"

[argo]
server_url = "https://argo.internal:2746"

[workflows]
default_space = "research"
"#,
        )
        .unwrap();

        let config = CliConfig::from_file(&path).unwrap();
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.argo.server_url.as_deref(), Some("https://argo.internal:2746"));
        assert_eq!(config.argo.namespace, "argo");
        assert_eq!(config.workflows.default_space, "research");
        assert_eq!(config.workflows.dir, PathBuf::from("./workflows"));
        config.check().unwrap();
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = CliConfig::default();
        config
            .apply_env(env(&[
                ("SERVER_PORT", "9090"),
                ("ARGO_NAMESPACE", "pipelines"),
                ("WORKFLOW_DIR", "/srv/workflows"),
                ("DEFAULT_SPACE", "team-a"),
                ("DATABASE_URL", "postgres://tas@localhost/tas"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.argo.namespace, "pipelines");
        assert_eq!(config.workflows.dir, PathBuf::from("/srv/workflows"));
        assert_eq!(config.default_space().as_str(), "team-a");
        config.check().unwrap();
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = CliConfig::default();
        assert!(config.apply_env(env(&[("SERVER_PORT", "eighty")])).is_err());

        let mut config = CliConfig::default();
        config.argo.server_url = Some("not a url".to_string());
        assert!(config.check().is_err());

        config.argo.server_url = Some("ftp://argo.internal".to_string());
        assert!(config.check().is_err());
    }

    #[test]
    fn test_effective_config_serializes_to_toml() {
        let config = CliConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("namespace = \"argo\""));
        assert!(!text.contains("database_url"));
    }
}
