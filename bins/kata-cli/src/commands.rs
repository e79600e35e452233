// CLI commands for judging submissions locally
use anyhow::{Context, Result};
use kata_common::config::SandboxConfig;
use kata_common::types::{InvocationContract, Submission, TaskId, TestCase};
use kata_engine::docker::DockerEngine;
use kata_engine::engine::ExecutionEngine;
use kata_engine::local::LocalNodeEngine;
use kata_engine::{resolver, Judge, JudgeOptions};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Test file with optional per-task declarations
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub contract: Option<InvocationContract>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TestFile {
    Cases(Vec<TestCase>),
    Suite(TestSuite),
}

pub fn parse_test_file(content: &str) -> Result<TestSuite> {
    let parsed: TestFile = serde_json::from_str(content)
        .context("Test file must be an array of test cases or an object with testCases")?;

    Ok(match parsed {
        TestFile::Cases(test_cases) => TestSuite {
            test_cases,
            task_id: None,
            entry: None,
            contract: None,
        },
        TestFile::Suite(suite) => suite,
    })
}

fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => {
            let mut config = SandboxConfig::load(path)?;
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
        None => SandboxConfig::load_default(),
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Judge a submission and print the report; returns whether every test passed
pub async fn run_submission(
    code: &Path,
    tests: &Path,
    entry: Option<String>,
    task_id: Option<String>,
    config_path: Option<&Path>,
    no_fallback: bool,
) -> Result<bool> {
    let source = read_source(code)?;
    let suite = parse_test_file(&read_source(tests)?)
        .with_context(|| format!("Invalid test file {}", tests.display()))?;

    let mut config = load_config(config_path)?;
    if no_fallback {
        config.fallback.enabled = false;
    }

    let judge = Judge::from_config(&config).context("Failed to initialise executors")?;

    let task_id = task_id.map(TaskId::Text).or(suite.task_id);
    let options = JudgeOptions {
        entry: entry.or(suite.entry),
        contract: suite.contract,
    };

    let report = judge
        .judge(&Submission::new(source, task_id), &suite.test_cases, &options)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.all_passed {
        info!(passed = report.passed_count(), total = report.results.len(), executor = ?report.executor, "All test cases passed");
    } else {
        warn!(passed = report.passed_count(), total = report.results.len(), executor = ?report.executor, "Some test cases failed");
    }

    Ok(report.all_passed)
}

/// Print the resolved entry point and every top-level declaration
pub fn resolve_entry(code: &Path) -> Result<()> {
    let source = read_source(code)?;

    let declarations = resolver::declarations(&source);
    for declaration in &declarations {
        info!(kind = %declaration.kind, name = %declaration.name, "Top-level declaration");
    }

    let entry = resolver::resolve(&source)?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Probe both executors; returns whether at least one can run submissions
pub async fn probe_executors(config_path: Option<&Path>) -> Result<bool> {
    let config = load_config(config_path)?;
    let mut usable = false;

    println!("🐳 Docker sandbox");
    match DockerEngine::new(&config) {
        Ok(engine) => match engine.probe().await {
            Ok(()) => {
                usable = true;
                println!("  ✅ reachable, image {} ready", engine.image());
            }
            Err(e) => println!("  ❌ {}", e),
        },
        Err(e) => println!("  ❌ {}", e),
    }

    println!("🟢 Fallback executor ({})", config.fallback.node_path);
    if config.fallback.enabled {
        match LocalNodeEngine::new(&config.fallback).probe().await {
            Ok(()) => {
                usable = true;
                println!("  ⚠️  reachable (runs WITHOUT sandbox isolation, pure protocol only)");
            }
            Err(e) => println!("  ❌ {}", e),
        }
    } else {
        println!("  ⏸️  disabled");
    }

    Ok(usable)
}
