/// Integration tests against real runtimes
///
/// These tests verify the full path from source text to report:
/// 1. Pure and stateful invocations produce the expected values
/// 2. Infinite loops are stopped by the timeout
/// 3. Syntax errors surface as per-test failures
/// 4. Global state does not leak between test cases
///
/// The sandbox tests need a reachable Docker daemon, the fallback tests need
/// `node` on PATH.

#[cfg(test)]
mod runtime_tests {
    use crate::docker::DockerEngine;
    use crate::engine::ExecutionEngine;
    use crate::executor::{Judge, JudgeOptions};
    use crate::local::LocalNodeEngine;
    use kata_common::config::SandboxConfig;
    use kata_common::types::{ExecutorKind, FailureKind, Submission, TestCase};
    use serde_json::{json, Value};
    use std::sync::Arc;

    const LRU_CACHE: &str = r#"
class LRUCache {
  constructor(capacity) {
    this.capacity = capacity;
    this.map = new Map();
  }
  get(key) {
    if (!this.map.has(key)) return -1;
    const value = this.map.get(key);
    this.map.delete(key);
    this.map.set(key, value);
    return value;
  }
  put(key, value) {
    this.map.delete(key);
    if (this.map.size === this.capacity) {
      this.map.delete(this.map.keys().next().value);
    }
    this.map.set(key, value);
  }
}
"#;

    fn config() -> SandboxConfig {
        SandboxConfig {
            timeout_ms: 3000,
            ..SandboxConfig::default()
        }
    }

    fn sandbox_judge() -> Judge {
        let config = config();
        let engine = DockerEngine::new(&config).expect("Failed to connect to Docker");
        Judge::new(Arc::new(engine), None, &config)
    }

    /// Judge whose primary is unreachable so every batch runs on local node
    fn fallback_judge() -> Judge {
        let mut config = config();
        let unreachable = LocalNodeEngine::new(&kata_common::config::FallbackConfig {
            node_path: "/nonexistent/node".to_string(),
            ..config.fallback.clone()
        });
        let local: Arc<dyn ExecutionEngine> = Arc::new(LocalNodeEngine::new(&config.fallback));
        Judge::new(Arc::new(unreachable), Some(local), &config)
    }

    fn case(input: Value, expected: Value) -> TestCase {
        TestCase { input, expected }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_pure_function() {
        let judge = sandbox_judge();
        let submission = Submission::new("function add(a, b) { return a + b; }", None);
        let cases = vec![case(json!([2, 3]), json!(5)), case(json!([-1, 1]), json!(0))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
        assert_eq!(report.executor, Some(ExecutorKind::Sandbox));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_stateful_lru_cache() {
        let judge = sandbox_judge();
        let cases = vec![case(
            json!([2, [["put", 1, 1], ["put", 2, 2], ["get", 1], ["put", 3, 3], ["get", 2]]]),
            json!([null, null, 1, null, -1]),
        )];

        let report = judge
            .judge(&Submission::new(LRU_CACHE, None), &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_infinite_loop_times_out() {
        let judge = sandbox_judge();
        let submission = Submission::new("function spin() { while (true) {} }", None);
        let cases = vec![case(json!([]), json!(null))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(!report.all_passed);
        assert_eq!(report.results[0].error_kind, Some(FailureKind::Timeout));
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_syntax_error() {
        let judge = sandbox_judge();
        let submission = Submission::new("function broken(a) { return a +; }", None);
        let cases = vec![case(json!([1]), json!(1)), case(json!([2]), json!(2))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert_eq!(report.results.len(), 2);
        for result in &report.results {
            assert!(!result.passed);
            assert_eq!(result.error_kind, Some(FailureKind::RuntimeError));
            assert!(result.error.as_deref().unwrap_or("").contains("SyntaxError"));
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_global_state_is_isolated() {
        let judge = sandbox_judge();
        let submission = Submission::new(
            "function bump() { globalThis.counter = (globalThis.counter || 0) + 1; return globalThis.counter; }",
            None,
        );
        let cases = vec![case(json!([]), json!(1)), case(json!([]), json!(1)), case(json!([]), json!(1))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_has_no_network() {
        let judge = sandbox_judge();
        let submission = Submission::new(
            r#"async function lookup() {
  const dns = require("dns").promises;
  try { await dns.lookup("example.com"); return "reachable"; } catch (e) { return "isolated"; }
}"#,
            None,
        );

        let report = judge
            .judge(&submission, &[case(json!([]), json!("isolated"))], &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
    }

    #[tokio::test]
    #[ignore] // Requires node on PATH
    async fn test_fallback_pure_function() {
        let judge = fallback_judge();
        let submission = Submission::new("const unused = 1;\nfunction twice(n) { return n * 2; }", None);
        let cases = vec![case(json!(21), json!(42)), case(json!([0.5]), json!(1))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
        assert_eq!(report.executor, Some(ExecutorKind::Fallback));
    }

    #[tokio::test]
    #[ignore] // Requires node on PATH
    async fn test_fallback_timeout_and_throw() {
        let judge = fallback_judge();
        let submission = Submission::new(
            "function run(mode) { if (mode === 'loop') { for (;;) {} } throw new Error('bad mode ' + mode); }",
            None,
        );
        let cases = vec![case(json!(["loop"]), json!(null)), case(json!(["x"]), json!(null))];

        let report = judge
            .judge(&submission, &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert_eq!(report.results[0].error_kind, Some(FailureKind::Timeout));
        assert_eq!(report.results[1].error.as_deref(), Some("bad mode x"));
    }

    #[tokio::test]
    #[ignore] // Requires node on PATH
    async fn test_fallback_entry_named_like_harness_locals() {
        let judge = fallback_judge();

        for name in ["value", "fail", "marker", "emit"] {
            let source = format!("function {}(x) {{ return x * 2; }}", name);
            let report = judge
                .judge(
                    &Submission::new(source, None),
                    &[case(json!([5]), json!(10))],
                    &JudgeOptions::default(),
                )
                .await
                .expect("Judging failed");

            assert!(report.all_passed, "entry {}: {:?}", name, report);
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_sandbox_chained_mutator_records_null() {
        let judge = sandbox_judge();
        let source = r#"
class Builder {
  constructor(start) { this.parts = [start]; }
  add(part) { this.parts.push(part); return this; }
  build() { return this.parts.join("-"); }
}
"#;
        let cases = vec![case(
            json!(["a", [["add", "b"], ["add", "c"], ["build"]]]),
            json!([null, null, "a-b-c"]),
        )];

        let report = judge
            .judge(&Submission::new(source, None), &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert!(report.all_passed, "report: {:?}", report);
    }

    #[tokio::test]
    #[ignore] // Requires node on PATH
    async fn test_fallback_refuses_stateful() {
        let judge = fallback_judge();
        let cases = vec![case(json!([1, [["put", 1, 1]]]), json!([null]))];

        let report = judge
            .judge(&Submission::new(LRU_CACHE, None), &cases, &JudgeOptions::default())
            .await
            .expect("Judging failed");

        assert_eq!(report.results[0].error_kind, Some(FailureKind::Unsupported));
    }
}
