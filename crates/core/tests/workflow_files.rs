use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tas_workflow_core::catalog::WorkflowCatalog;
use tas_workflow_core::parser;
use tas_workflow_core::template::TemplateProcessor;
use tas_workflow_core::validation::WorkflowValidator;
use tas_workflow_core::workflow::ExecutionPlan;
use tas_workflow_core::SpaceId;
use tempfile::TempDir;

const PIPELINE: &str = r#"
name: fan-out
mode: parallel
parameters:
  topic:
    type: string
    required: true
defaults:
  timeout: 30s
steps:
  - name: search_web
    type: http
    url: "https://search.example.com/?q={{ params.topic }}"
  - name: search_docs
    type: tas_rag
    query: "{{ params.topic }}"
  - name: merge
    type: tas_llm
    prompt: "Merge {{ steps.search_web.output }} and {{ steps.search_docs.output }}"
"#;

const BROKEN: &str = r#"
name: broken
steps:
  - name: call
    type: http
    depends_on: [nowhere]
"#;

fn write(dir: &TempDir, relative: &str, content: &str) {
    let path = dir.path().join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_discover_finds_workflow_files_recursively() {
    let dir = TempDir::new().unwrap();
    write(&dir, "fan-out.yaml", PIPELINE);
    write(&dir, "nested/broken.yml", BROKEN);
    write(&dir, "notes.txt", "not a workflow");

    let files = parser::discover(dir.path()).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.extension().unwrap() != "txt"));
}

#[test]
fn test_validate_files_from_disk() {
    let dir = TempDir::new().unwrap();
    write(&dir, "fan-out.yaml", PIPELINE);
    write(&dir, "broken.yaml", BROKEN);
    let validator = WorkflowValidator::new();

    let good = parser::from_path(dir.path().join("fan-out.yaml")).unwrap();
    assert!(validator.validate(&good).is_valid());

    let bad = parser::from_path(dir.path().join("broken.yaml")).unwrap();
    let report = validator.validate(&bad);
    // unknown dependency plus the missing url
    assert_eq!(report.errors.len(), 2);
}

#[test]
fn test_render_then_plan() {
    let wf = parser::from_yaml_str(PIPELINE).unwrap();
    let supplied: HashMap<String, String> =
        [("topic".to_string(), "rust".to_string())].into_iter().collect();

    let rendered = TemplateProcessor::render(&wf, &supplied).unwrap();
    assert_eq!(
        rendered.step("search_web").unwrap().config_str("url"),
        Some("https://search.example.com/?q=rust")
    );

    let plan = ExecutionPlan::build(&rendered, &HashMap::new()).unwrap();
    assert_eq!(plan.stages.len(), 2);
    assert_eq!(plan.stages[0].steps.len(), 2);
    assert_eq!(plan.stages[1].steps[0].name.as_str(), "merge");
    assert_eq!(plan.worst_case_duration(), Some(Duration::from_secs(60)));
}

#[test]
fn test_sample_workflow_is_valid_and_plans() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../workflows/document-pipeline.yaml");
    let wf = parser::from_path(path).unwrap();

    let report = WorkflowValidator::new().with_strict_mode(true).validate(&wf);
    assert!(report.is_valid(), "{:?}", report.errors);

    let supplied: HashMap<String, String> = [
        ("document_id".to_string(), "doc-42".to_string()),
        ("notify".to_string(), "false".to_string()),
    ]
    .into_iter()
    .collect();
    let plan = ExecutionPlan::with_parameters(&wf, &supplied).unwrap();

    assert_eq!(plan.stages.len(), 4);
    assert!(plan.step("notify").unwrap().is_skipped());
}

#[tokio::test]
async fn test_catalog_from_directory() {
    let dir = TempDir::new().unwrap();
    write(&dir, "fan-out.yaml", PIPELINE);
    write(&dir, "broken.yaml", BROKEN);

    let catalog = WorkflowCatalog::new();
    let space = SpaceId::new("team-a");
    let mut rejected = 0;

    for file in parser::discover(dir.path()).unwrap() {
        if catalog.register_file(&space, &file, "ci").await.is_err() {
            rejected += 1;
        }
    }

    assert_eq!(rejected, 1);
    let listed = catalog.list(&space).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "fan-out");
    assert_eq!(listed[0].latest_version, Some(1));
}
