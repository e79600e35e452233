use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Task identifier as handed over by the task content store.
///
/// The store uses numeric ids, older clients send strings; both are passed
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Number(i64),
    Text(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Number(n) => write!(f, "{}", n),
            TaskId::Text(s) => f.write_str(s),
        }
    }
}

/// A learner submission. Built once per request and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub source: String,
    pub task_id: Option<TaskId>,
}

impl Submission {
    pub fn new(source: impl Into<String>, task_id: Option<TaskId>) -> Self {
        Self {
            source: source.into(),
            task_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    #[serde(default)]
    pub expected: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Function,
    Class,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Function => f.write_str("function"),
            EntryKind::Class => f.write_str("class"),
        }
    }
}

/// The function or class the harness invokes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
    pub name: String,
    pub kind: EntryKind,
}

/// Explicit per-task declaration of how the entry point is exercised.
///
/// When absent, the planner infers the protocol from the entry kind and the
/// shape of each test input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum InvocationContract {
    Pure,
    Stateful {
        /// Operations whose return value is never observed.
        #[serde(default)]
        mutators: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RuntimeError,
    Unsupported,
    SandboxFailure,
}

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub input: Value,
    pub expected: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    pub passed: bool,
}

impl ExecutionResult {
    pub fn failed(test_case: &TestCase, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            input: test_case.input.clone(),
            expected: test_case.expected.clone(),
            output: None,
            error: Some(message.into()),
            error_kind: Some(kind),
            passed: false,
        }
    }
}

/// Which executor produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Sandbox,
    Fallback,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::Sandbox => f.write_str("sandbox"),
            ExecutorKind::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub all_passed: bool,
    pub results: Vec<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorKind>,
}

impl Report {
    /// Report for a submission whose entry point could not be resolved.
    pub fn entry_point_missing(task_id: Option<TaskId>) -> Self {
        Self {
            all_passed: false,
            results: Vec::new(),
            task_id,
            executor: None,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_id_accepts_numbers_and_strings() {
        let n: TaskId = serde_json::from_value(json!(7)).unwrap();
        let s: TaskId = serde_json::from_value(json!("lru-cache")).unwrap();
        assert_eq!(n, TaskId::Number(7));
        assert_eq!(s, TaskId::Text("lru-cache".to_string()));
        assert_eq!(n.to_string(), "7");
    }

    #[test]
    fn test_result_omits_absent_fields() {
        let tc = TestCase {
            input: json!([2, 3]),
            expected: json!(5),
        };
        let result = ExecutionResult::failed(&tc, FailureKind::Timeout, "timed out");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["errorKind"], json!("timeout"));
        assert!(value.get("output").is_none());
        assert_eq!(value["passed"], json!(false));
    }

    #[test]
    fn test_contract_is_tagged_by_protocol() {
        let contract: InvocationContract =
            serde_json::from_value(json!({"protocol": "stateful", "mutators": ["put"]})).unwrap();
        assert_eq!(
            contract,
            InvocationContract::Stateful {
                mutators: vec!["put".to_string()]
            }
        );

        let pure: InvocationContract = serde_json::from_value(json!({"protocol": "pure"})).unwrap();
        assert_eq!(pure, InvocationContract::Pure);
    }

    #[test]
    fn test_missing_expected_defaults_to_null() {
        let tc: TestCase = serde_json::from_value(json!({"input": [1]})).unwrap();
        assert_eq!(tc.expected, Value::Null);
    }

    #[test]
    fn test_entry_point_missing_report() {
        let report = Report::entry_point_missing(Some(TaskId::Number(3)));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value, json!({"allPassed": false, "results": [], "taskId": 3}));
    }
}
