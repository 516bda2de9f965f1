//! Tool-call argument remapping between the Claude-side tool contract
//! (`query`/`paths`) and the Antigravity upstream's native agent tool
//! surface (`pattern`/`path`), per spec.md §4.1.10, for a handful of
//! built-in tool families (`grep`, `glob`, `read`, `ls`).
//!
//! `remap_tool_arguments` runs forward, on history replay into the Gemini
//! request (a prior turn's Claude `tool_use.input` becomes a Gemini
//! `functionCall.args`); `unmap_tool_arguments` runs the inverse, on a fresh
//! Gemini `functionCall` part being turned into a Claude `tool_use` block
//! for the client.

use serde_json::{Map, Value};

fn take_and_rename(args: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = args.remove(from) {
        args.entry(to.to_string()).or_insert(value);
    }
}

/// Remaps known tool argument shapes in place. `tool_name` is matched
/// case-insensitively against the known families below; anything else is
/// passed through untouched.
pub fn remap_tool_arguments(tool_name: &str, arguments: &mut Value) {
    let Value::Object(args) = arguments else {
        return;
    };

    match tool_name.to_ascii_lowercase().as_str() {
        "grep" | "glob" => {
            take_and_rename(args, "query", "pattern");
            // `paths` (plural) collapses onto the singular `path` field.
            if let Some(paths) = args.remove("paths") {
                let collapsed = match paths {
                    Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
                    other => other,
                };
                if !collapsed.is_null() {
                    args.entry("path".to_string()).or_insert(collapsed);
                }
            }
        }
        "read" => {
            take_and_rename(args, "path", "file_path");
        }
        "ls" => {
            args.entry("path".to_string())
                .or_insert_with(|| Value::String(".".to_string()));
        }
        _ => {}
    }
}

/// Inverse of [`remap_tool_arguments`]: turns a fresh Gemini `functionCall`'s
/// native argument shape back into the Claude tool contract the client
/// expects.
pub fn unmap_tool_arguments(tool_name: &str, arguments: &mut Value) {
    let Value::Object(args) = arguments else {
        return;
    };

    match tool_name.to_ascii_lowercase().as_str() {
        "grep" | "glob" => {
            take_and_rename(args, "pattern", "query");
            if let Some(path) = args.remove("path") {
                args.entry("paths".to_string())
                    .or_insert_with(|| Value::Array(vec![path]));
            }
        }
        "read" => {
            take_and_rename(args, "file_path", "path");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grep_query_and_paths_remapped() {
        let mut args = json!({"query": "TODO", "paths": ["src/", "tests/"]});
        remap_tool_arguments("grep", &mut args);
        assert_eq!(args["pattern"], json!("TODO"));
        assert_eq!(args["path"], json!("src/"));
        assert!(args.get("query").is_none());
        assert!(args.get("paths").is_none());
    }

    #[test]
    fn glob_uses_same_remap_as_grep() {
        let mut args = json!({"query": "*.rs"});
        remap_tool_arguments("glob", &mut args);
        assert_eq!(args["pattern"], json!("*.rs"));
    }

    #[test]
    fn read_path_becomes_file_path() {
        let mut args = json!({"path": "/tmp/a.txt"});
        remap_tool_arguments("read", &mut args);
        assert_eq!(args["file_path"], json!("/tmp/a.txt"));
        assert!(args.get("path").is_none());
    }

    #[test]
    fn ls_ensures_path_present() {
        let mut args = json!({});
        remap_tool_arguments("ls", &mut args);
        assert_eq!(args["path"], json!("."));

        let mut args_with_path = json!({"path": "src"});
        remap_tool_arguments("ls", &mut args_with_path);
        assert_eq!(args_with_path["path"], json!("src"));
    }

    #[test]
    fn unknown_tool_untouched() {
        let mut args = json!({"query": "value"});
        remap_tool_arguments("write_file", &mut args);
        assert_eq!(args["query"], json!("value"));
    }

    #[test]
    fn unmap_grep_reverses_remap() {
        let mut args = json!({"pattern": "TODO", "path": "src/"});
        unmap_tool_arguments("grep", &mut args);
        assert_eq!(args["query"], json!("TODO"));
        assert_eq!(args["paths"], json!(["src/"]));
    }

    #[test]
    fn unmap_read_reverses_remap() {
        let mut args = json!({"file_path": "/tmp/a.txt"});
        unmap_tool_arguments("read", &mut args);
        assert_eq!(args["path"], json!("/tmp/a.txt"));
        assert!(args.get("file_path").is_none());
    }
}
