/// Invocation Planner
///
/// Decides per test case how the entry point is exercised:
/// - **Stateful**: construct one instance, replay `[opName, ...args]` operations
/// - **Pure**: call the function once with the input spread as arguments
///
/// Without an explicit contract the choice is inferred: a class entry whose
/// input is exactly `[constructorArg, operations]` is stateful, everything
/// else is pure. Planning never fails; malformed shapes surface as runtime
/// errors inside the harness.

use kata_common::types::{EntryDescriptor, EntryKind, InvocationContract};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Pure,
    Stateful,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Pure => f.write_str("pure"),
            Protocol::Stateful => f.write_str("stateful"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    Pure {
        args: Vec<Value>,
    },
    Stateful {
        constructor_arg: Value,
        operations: Value,
        mutators: Vec<String>,
    },
}

impl Plan {
    pub fn protocol(&self) -> Protocol {
        match self {
            Plan::Pure { .. } => Protocol::Pure,
            Plan::Stateful { .. } => Protocol::Stateful,
        }
    }
}

pub fn plan(entry: &EntryDescriptor, input: &Value, contract: Option<&InvocationContract>) -> Plan {
    let (constructor_arg, operations) = match input {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        _ => return pure(input),
    };

    let mutators = match contract {
        Some(InvocationContract::Pure) => return pure(input),
        Some(InvocationContract::Stateful { mutators }) => mutators.clone(),
        None if entry.kind == EntryKind::Class => Vec::new(),
        None => return pure(input),
    };

    Plan::Stateful {
        constructor_arg: constructor_arg.clone(),
        operations: operations.clone(),
        mutators,
    }
}

fn pure(input: &Value) -> Plan {
    let args = match input {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    Plan::Pure { args }
}
