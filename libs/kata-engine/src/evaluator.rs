/// Test Evaluator - Structural Comparison and Aggregation
///
/// **Core Responsibility:**
/// Compare produced values against expected values and build the report.
///
/// **Critical Properties:**
/// - Knows nothing about Docker or local processes
/// - Knows nothing about the harness wire format
/// - Pure function: (test cases, outcomes) → report
///
/// **Comparison Rules (canonical form):**
/// - Object keys: order-insensitive
/// - Arrays: ordered, element-wise
/// - Numbers: integral floats equal the integer (`1.0 == 1`, `-0 == 0`)
/// - `null` and "no value" (`undefined`) are distinct
/// - No coercion: `"5"` never equals `5`

use kata_common::types::{
    ExecutionResult, ExecutorKind, FailureKind, Report, TaskId, TestCase,
};
use serde_json::{Map, Number, Value};

/// Outcome of one test case, as seen after the harness output is decoded
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    /// The entry returned. `None` means it returned `undefined`.
    Returned(Option<Value>),
    /// The invocation threw.
    Threw(String),
    /// The program ended without reporting a result (syntax error, crash, kill).
    Crashed(String),
    TimedOut { timeout_ms: u64 },
    /// The executor does not implement the required protocol.
    Unsupported(String),
    SandboxFailure(String),
}

/// Canonical form used for comparison.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(n)),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut canonical = Map::new();
            for (key, item) in entries {
                canonical.insert(key.clone(), canonicalize(item));
            }
            Value::Object(canonical)
        }
        other => other.clone(),
    }
}

fn canonical_number(n: &Number) -> Number {
    if let Some(f) = n.as_f64() {
        if n.is_f64() && f.fract() == 0.0 {
            if f >= 0.0 && f <= u64::MAX as f64 {
                return Number::from(f as u64);
            }
            if f < 0.0 && f >= i64::MIN as f64 {
                return Number::from(f as i64);
            }
        }
    }
    n.clone()
}

/// Canonical serialization of a value.
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Whether a produced value matches the expected one.
///
/// A missing value (the entry returned `undefined`) never matches.
pub fn outputs_match(output: Option<&Value>, expected: &Value) -> bool {
    match output {
        Some(value) => canonical_string(value) == canonical_string(expected),
        None => false,
    }
}

/// Evaluate a single test case outcome
pub fn evaluate_test(test_case: &TestCase, outcome: TestOutcome) -> ExecutionResult {
    match outcome {
        TestOutcome::Returned(output) => {
            let passed = outputs_match(output.as_ref(), &test_case.expected);
            ExecutionResult {
                input: test_case.input.clone(),
                expected: test_case.expected.clone(),
                output,
                error: None,
                error_kind: None,
                passed,
            }
        }
        TestOutcome::Threw(message) | TestOutcome::Crashed(message) => {
            ExecutionResult::failed(test_case, FailureKind::RuntimeError, message)
        }
        TestOutcome::TimedOut { timeout_ms } => ExecutionResult::failed(
            test_case,
            FailureKind::Timeout,
            format!("Execution timed out after {}ms", timeout_ms),
        ),
        TestOutcome::Unsupported(message) => {
            ExecutionResult::failed(test_case, FailureKind::Unsupported, message)
        }
        TestOutcome::SandboxFailure(message) => {
            ExecutionResult::failed(test_case, FailureKind::SandboxFailure, message)
        }
    }
}

/// Aggregate per-test results into the final report.
///
/// `all_passed` is the conjunction of every `passed` flag, so an empty batch
/// passes vacuously.
pub fn aggregate(
    results: Vec<ExecutionResult>,
    task_id: Option<TaskId>,
    executor: ExecutorKind,
) -> Report {
    let all_passed = results.iter().all(|r| r.passed);
    Report {
        all_passed,
        results,
        task_id,
        executor: Some(executor),
    }
}

/// Evaluate all outcomes, in test case order.
pub fn evaluate(
    test_cases: &[TestCase],
    outcomes: Vec<TestOutcome>,
    task_id: Option<TaskId>,
    executor: ExecutorKind,
) -> Report {
    let results = test_cases
        .iter()
        .zip(outcomes)
        .map(|(test_case, outcome)| evaluate_test(test_case, outcome))
        .collect();
    aggregate(results, task_id, executor)
}
