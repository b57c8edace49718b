use crate::types::ActionDescriptor;
use serde_json::Value;

/// The host's shell tool; its target is a command line.
pub const SHELL_TOOL: &str = "Bash";

/// Input field holding the matchable target for each known tool.
fn target_field(tool: &str) -> Option<&'static str> {
    match tool {
        SHELL_TOOL => Some("command"),
        "Read" | "Write" | "Edit" | "MultiEdit" => Some("file_path"),
        "NotebookEdit" => Some("notebook_path"),
        "WebFetch" => Some("url"),
        "WebSearch" => Some("query"),
        "Glob" | "Grep" => Some("pattern"),
        "Task" => Some("prompt"),
        _ => None,
    }
}

/// Pull the tool-specific target out of a host payload's tool input.
///
/// Unknown tools, or known tools whose field is missing, fall back to the
/// compact JSON of the whole input so patterns can still match on it.
pub fn extract_target(tool: &str, input: &Value) -> String {
    if let Some(field) = target_field(tool) {
        if let Some(s) = input.get(field).and_then(Value::as_str) {
            return s.to_string();
        }
    }
    match input {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn descriptor_from_payload(tool: &str, input: &Value) -> ActionDescriptor {
    ActionDescriptor::new(tool, extract_target(tool, input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bash_uses_command() {
        let input = json!({"command": "git status", "description": "x"});
        assert_eq!(extract_target("Bash", &input), "git status");
    }

    #[test]
    fn file_tools_use_path() {
        let input = json!({"file_path": "/repo/src/main.rs", "content": "fn main() {}"});
        assert_eq!(extract_target("Write", &input), "/repo/src/main.rs");
        assert_eq!(extract_target("Read", &input), "/repo/src/main.rs");
    }

    #[test]
    fn unknown_tool_falls_back_to_json() {
        let input = json!({"server": "db", "query": "drop table"});
        let target = extract_target("mcp__db__exec", &input);
        assert!(target.contains("drop table"));
    }

    #[test]
    fn missing_field_falls_back_to_json() {
        let input = json!({"cmd": "ls"});
        assert_eq!(extract_target("Bash", &input), r#"{"cmd":"ls"}"#);
    }

    #[test]
    fn null_input_is_empty() {
        assert_eq!(extract_target("Bash", &Value::Null), "");
    }
}
