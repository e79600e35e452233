/// Harness rendering and result decoding
///
/// A harness program is the submitted source followed by a generated
/// epilogue that performs the planned invocation and reports exactly one
/// result line on stdout:
///
/// ```text
/// <marker>{"status":"returned","value":...}
/// <marker>{"status":"returned"}            (entry returned undefined)
/// <marker>{"status":"threw","message":"..."}
/// ```
///
/// The marker carries a fresh nonce per program so that user output cannot be
/// mistaken for the result line. The epilogue exits the process after
/// reporting, which also stops timers the submission may have left behind.
///
/// The entry point is passed into the epilogue as an argument bound to a
/// nonce-suffixed parameter, so it is evaluated in the submission's scope before
/// any harness local exists and a learner function called `value` or `emit`
/// still resolves to the learner's declaration.
///
/// In the stateful protocol an operation records `null` when it is a declared
/// mutator, returns `undefined`, or returns the instance itself (chaining).

use crate::engine::RawOutput;
use crate::evaluator::TestOutcome;
use crate::planner::Plan;
use kata_common::types::EntryDescriptor;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Exit code of a process killed with SIGKILL (OOM killer, memory cgroup)
const EXIT_KILLED: i64 = 137;
const EXIT_SEGFAULT: i64 = 139;

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessProgram {
    pub script: String,
    pub marker: String,
    pub entry: EntryDescriptor,
    pub plan: Plan,
}

impl HarnessProgram {
    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    /// Encode a reply the way the epilogue would print it.
    pub fn result_line(&self, payload: &Value) -> String {
        format!("{}{}", self.marker, payload)
    }
}

pub fn render(
    source: &str,
    entry: &EntryDescriptor,
    plan: &Plan,
) -> Result<HarnessProgram, serde_json::Error> {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    let marker = format!("__KATA_RESULT_{}__", nonce);
    let binding = format!("__kata_entry_{}", nonce);

    let invocation = match plan {
        Plan::Pure { args } => format!(
            "{binding}.apply(null, {args})",
            binding = binding,
            args = serde_json::to_string(args)?,
        ),
        Plan::Stateful {
            constructor_arg,
            operations,
            mutators,
        } => format!(
            r#"(function () {{
    var operations = {operations};
    var mutators = {mutators};
    if (!Array.isArray(operations)) {{
      throw new TypeError("operations must be an array");
    }}
    var instance = new {binding}({constructor_arg});
    var results = [];
    for (var i = 0; i < operations.length; i++) {{
      var op = operations[i];
      if (!Array.isArray(op) || typeof op[0] !== "string") {{
        throw new TypeError("operation " + i + " must be [name, ...args]");
      }}
      var method = instance[op[0]];
      if (typeof method !== "function") {{
        throw new TypeError("unknown operation '" + op[0] + "'");
      }}
      var out = method.apply(instance, op.slice(1));
      var unobserved = mutators.indexOf(op[0]) !== -1 || out === undefined || out === instance;
      results.push(unobserved ? null : out);
    }}
    return results;
  }})()"#,
            binding = binding,
            operations = serde_json::to_string(operations)?,
            mutators = serde_json::to_string(mutators)?,
            constructor_arg = serde_json::to_string(constructor_arg)?,
        ),
    };

    let script = format!(
        r#"{source}
;(function ({binding}) {{
  var marker = {marker};
  var emit = function (payload) {{
    var line;
    try {{
      line = JSON.stringify(payload);
    }} catch (e) {{
      line = JSON.stringify({{ status: "threw", message: "result is not JSON-serializable: " + (e && e.message) }});
    }}
    process.stdout.write("\n" + marker + line + "\n");
    process.exit(0);
  }};
  var fail = function (e) {{
    var message = e !== null && typeof e === "object" && "message" in e ? String(e.message) : String(e);
    emit({{ status: "threw", message: message }});
  }};
  var settle = function (value) {{
    emit(value === undefined ? {{ status: "returned" }} : {{ status: "returned", value: value }});
  }};
  try {{
    var value = {invocation};
    if (value !== null && typeof value === "object" && typeof value.then === "function") {{
      value.then(settle, fail);
    }} else {{
      settle(value);
    }}
  }} catch (e) {{
    fail(e);
  }}
}})({entry});
"#,
        source = source,
        binding = binding,
        entry = entry.name,
        marker = serde_json::to_string(&marker)?,
        invocation = invocation,
    );

    Ok(HarnessProgram {
        script,
        marker,
        entry: entry.clone(),
        plan: plan.clone(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum HarnessMessage {
    Returned {
        #[serde(default, deserialize_with = "present")]
        value: Option<Value>,
    },
    Threw {
        message: String,
    },
}

/// Keeps `"value": null` as `Some(Null)`; only a missing key is `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Decode the raw output of a harness program.
pub fn interpret(output: &RawOutput, program: &HarnessProgram, timeout_ms: u64) -> TestOutcome {
    if output.timed_out {
        return TestOutcome::TimedOut { timeout_ms };
    }

    let result_line = output
        .stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(program.marker.as_str()));

    if let Some(payload) = result_line {
        return match serde_json::from_str::<HarnessMessage>(payload) {
            Ok(HarnessMessage::Returned { value }) => TestOutcome::Returned(value),
            Ok(HarnessMessage::Threw { message }) => TestOutcome::Threw(message),
            Err(e) => TestOutcome::Crashed(format!("Malformed harness result: {}", e)),
        };
    }

    TestOutcome::Crashed(describe_crash(output))
}

/// Explain why a program ended without reporting a result.
fn describe_crash(output: &RawOutput) -> String {
    match output.exit_code {
        Some(EXIT_KILLED) => {
            return "Process killed: likely exceeded the memory limit".to_string();
        }
        Some(EXIT_SEGFAULT) => return "Process killed: segmentation fault".to_string(),
        _ => {}
    }

    if output.truncated {
        return "Output limit exceeded before a result was produced".to_string();
    }

    if let Some(line) = output.stderr.lines().map(str::trim).find(|l| is_error_line(l)) {
        return line.to_string();
    }

    match output.stderr.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        Some(line) => format!("Program exited without producing a result: {}", line),
        None => match output.exit_code {
            Some(code) => format!("Program exited with code {} without producing a result", code),
            None => "Program exited without producing a result".to_string(),
        },
    }
}

/// Lines such as `SyntaxError: Unexpected token '}'` or `Error: boom`.
fn is_error_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            name.ends_with("Error") && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
