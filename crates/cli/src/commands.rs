use crate::config::CliConfig;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tas_workflow_core::catalog::{ContentDigest, WorkflowCatalog};
use tas_workflow_core::parser;
use tas_workflow_core::template::TemplateProcessor;
use tas_workflow_core::validation::{ValidationReport, WorkflowValidator};
use tas_workflow_core::workflow::ExecutionPlan;
use tas_workflow_core::{SpaceId, WorkflowDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlanFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

/// Parse a `key=value` command line argument
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

/// Expand directories into the workflow files they contain
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = parser::discover(path)
                .with_context(|| format!("Failed to scan {}", path.display()))?;
            if found.is_empty() {
                tracing::warn!("No workflow files found under {}", path.display());
            }
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn load(path: &Path) -> Result<WorkflowDefinition> {
    parser::from_path(path).with_context(|| format!("Failed to load workflow {}", path.display()))
}

fn ensure_valid(path: &Path, workflow: &WorkflowDefinition) -> Result<()> {
    let report = WorkflowValidator::new().validate(workflow);
    if !report.is_valid() {
        print_report(path, &report);
        bail!(
            "{} is invalid ({} error(s))",
            path.display(),
            report.errors.len()
        );
    }
    Ok(())
}

fn print_report(path: &Path, report: &ValidationReport) {
    let mark = if report.is_valid() { "ok" } else { "FAILED" };
    println!("{}: {}", path.display(), mark);
    for error in &report.errors {
        println!("  error: {}", error);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
}

pub fn validate(paths: &[PathBuf], strict: bool) -> Result<()> {
    let files = collect_files(paths)?;
    let validator = WorkflowValidator::new().with_strict_mode(strict);
    let mut failed = 0;

    for file in &files {
        match parser::from_path(file) {
            Ok(workflow) => {
                let report = validator.validate(&workflow);
                if !report.is_valid() {
                    failed += 1;
                }
                print_report(file, &report);
            }
            Err(e) => {
                failed += 1;
                println!("{}: FAILED", file.display());
                println!("  error: {}", e);
            }
        }
    }

    tracing::info!(
        "Validated {} workflow file(s), {} failed",
        files.len(),
        failed
    );

    if failed > 0 {
        bail!("{} of {} workflow file(s) failed validation", failed, files.len());
    }
    Ok(())
}

pub fn plan(file: &Path, params: &HashMap<String, String>, format: PlanFormat) -> Result<()> {
    println!("{}", plan_output(file, params, format)?);
    Ok(())
}

fn plan_output(file: &Path, params: &HashMap<String, String>, format: PlanFormat) -> Result<String> {
    let workflow = load(file)?;
    ensure_valid(file, &workflow)?;

    let plan = ExecutionPlan::with_parameters(&workflow, params)?;

    Ok(match format {
        PlanFormat::Text => plan.to_string(),
        PlanFormat::Json => serde_json::to_string_pretty(&plan)?,
    })
}

pub fn render(file: &Path, params: &HashMap<String, String>, format: DocumentFormat) -> Result<()> {
    let workflow = load(file)?;
    let rendered = TemplateProcessor::render(&workflow, params)?;

    let output = match format {
        DocumentFormat::Yaml => parser::to_yaml(&rendered)?,
        DocumentFormat::Json => parser::to_json(&rendered)?,
    };
    println!("{}", output.trim_end());
    Ok(())
}

/// Digest as the catalog would compute it for this workflow's space
pub fn workflow_digest(workflow: &WorkflowDefinition, default_space: &SpaceId) -> Result<ContentDigest> {
    let mut workflow = workflow.clone();
    workflow.space.get_or_insert_with(|| default_space.clone());
    Ok(ContentDigest::of(&workflow)?)
}

pub fn digest(file: &Path, config: &CliConfig) -> Result<()> {
    let workflow = load(file)?;
    let digest = workflow_digest(&workflow, &config.default_space())?;
    println!("{}  {}", digest, file.display());
    Ok(())
}

pub async fn catalog(dir: &Path, space: Option<SpaceId>, config: &CliConfig) -> Result<()> {
    let files = collect_files(&[dir.to_path_buf()])?;
    let catalog = WorkflowCatalog::new();
    let mut rejected = 0;

    for file in &files {
        let workflow = match parser::from_path(file) {
            Ok(workflow) => workflow,
            Err(e) => {
                rejected += 1;
                tracing::warn!("Skipping {}: {}", file.display(), e);
                continue;
            }
        };

        let target = space
            .clone()
            .or_else(|| workflow.space.clone())
            .unwrap_or_else(|| config.default_space());
        let changelog = format!("Loaded from {}", file.display());

        if let Err(e) = catalog.register(&target, workflow, "tas-workflow", changelog).await {
            rejected += 1;
            tracing::warn!("Rejected {}: {}", file.display(), e);
        }
    }

    for space in catalog.spaces().await {
        println!("space {}", space);
        for summary in catalog.list(&space).await {
            let latest = summary
                .latest_version
                .map(|v| format!("v{}", v))
                .unwrap_or_else(|| "deprecated".to_string());
            let digest = summary
                .digest
                .as_ref()
                .map(|d| d.short().to_string())
                .unwrap_or_default();
            println!(
                "  {} {} ({} version(s)) {}",
                summary.name, latest, summary.versions, digest
            );
        }
    }

    if rejected > 0 {
        bail!("{} of {} workflow file(s) could not be registered", rejected, files.len());
    }
    Ok(())
}

pub fn show_config(config: &CliConfig) -> Result<()> {
    match &config.source {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# defaults (no configuration file)"),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"
name: greet
parameters:
  who:
    type: string
    required: true
steps:
  - name: hello
    type: tas_llm
    prompt: "Say hello to {{ params.who }}"
    timeout: 30s
"#;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("region=eu=west").unwrap(),
            ("region".to_string(), "eu=west".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_validate_reports_failures() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("good.yaml"), WORKFLOW).unwrap();
        assert!(validate(&[dir.path().to_path_buf()], false).is_ok());

        std::fs::write(dir.path().join("bad.yaml"), "name: bad\nsteps: []\n").unwrap();
        assert!(validate(&[dir.path().to_path_buf()], false).is_err());
    }

    #[test]
    fn test_plan_requires_parameters() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("greet.yaml");
        std::fs::write(&file, WORKFLOW).unwrap();

        assert!(plan(&file, &HashMap::new(), PlanFormat::Text).is_err());

        let params = HashMap::from([("who".to_string(), "world".to_string())]);
        assert!(plan(&file, &params, PlanFormat::Json).is_ok());
        assert!(render(&file, &params, DocumentFormat::Yaml).is_ok());
    }

    #[test]
    fn test_plan_text_reports_duration_once() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("greet.yaml");
        std::fs::write(&file, WORKFLOW).unwrap();
        let params = HashMap::from([("who".to_string(), "world".to_string())]);

        let text = plan_output(&file, &params, PlanFormat::Text).unwrap();
        assert_eq!(text.matches("Worst case duration").count(), 1);
        assert!(text.ends_with("Worst case duration: 30s"));

        let json = plan_output(&file, &params, PlanFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["workflow"], "greet");
    }

    #[test]
    fn test_digest_uses_default_space() {
        let workflow = parser::from_yaml_str(WORKFLOW).unwrap();
        let default = workflow_digest(&workflow, &SpaceId::default()).unwrap();
        let other = workflow_digest(&workflow, &SpaceId::new("other")).unwrap();
        assert_ne!(default, other);

        let mut explicit = workflow.clone();
        explicit.space = Some(SpaceId::default());
        assert_eq!(default, ContentDigest::of(&explicit).unwrap());
    }

    #[tokio::test]
    async fn test_catalog_reports_rejections() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("greet.yaml"), WORKFLOW).unwrap();
        let config = CliConfig::default();
        assert!(catalog(dir.path(), None, &config).await.is_ok());

        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        assert!(catalog(dir.path(), None, &config).await.is_err());
    }
}
