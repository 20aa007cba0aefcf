//! Tool-input repair.
//!
//! Models routinely emit absolute paths and display-cased project names.
//! Before a failed validation is surfaced back to the LLM, the input gets
//! one mechanical repair pass: leading slashes stripped from path fields,
//! project-name fields lowercase-hyphenated. Anything still invalid after
//! that is returned to the model as the tool result.

use serde_json::Value;

fn strip_leading_slash(path: &str) -> String {
    path.trim_start_matches('/').to_owned()
}

fn slugify_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// One repair pass over a tool-call input. Returns the repaired value;
/// inputs with nothing to repair come back unchanged.
pub fn repair_input(input: &Value) -> Value {
    let mut repaired = input.clone();
    repair_in_place(&mut repaired);
    repaired
}

fn repair_in_place(value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (key, field) in obj.iter_mut() {
        match (key.as_str(), &mut *field) {
            ("path", Value::String(s)) => *s = strip_leading_slash(s),
            ("project_name" | "projectName", Value::String(s)) => *s = slugify_name(s),
            ("files", Value::Array(items)) => {
                for item in items {
                    repair_in_place(item);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_leading_slash_from_path() {
        let input = json!({"path": "/app/page.tsx", "content": "x"});
        let repaired = repair_input(&input);
        assert_eq!(repaired["path"], "app/page.tsx");
        assert_eq!(repaired["content"], "x");
    }

    #[test]
    fn repairs_nested_batch_entries() {
        let input = json!({"files": [
            {"path": "/a.ts", "content": "1"},
            {"path": "b.ts", "content": "2"}
        ]});
        let repaired = repair_input(&input);
        assert_eq!(repaired["files"][0]["path"], "a.ts");
        assert_eq!(repaired["files"][1]["path"], "b.ts");
    }

    #[test]
    fn slugifies_project_name_fields() {
        let input = json!({"projectName": "My Coffee Shop"});
        let repaired = repair_input(&input);
        assert_eq!(repaired["projectName"], "my-coffee-shop");
    }

    #[test]
    fn clean_input_is_unchanged() {
        let input = json!({"path": "app/page.tsx", "content": "x"});
        assert_eq!(repair_input(&input), input);
    }
}
