//! Service descriptions from function doc strings
//!
//! A doc string whose first line is `yaml` carries a YAML block:
//!
//! ```yaml
//! description: Turn the porch light on
//! fields:
//!   brightness:
//!     description: Percent
//!     example: 80
//! ```
//!
//! Anything else contributes its first line as the description.

use autoscript_service_registry::{FieldDescription, ServiceDescription};
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::warn;

use crate::function::CompiledFunction;

#[derive(Debug, Default, Deserialize)]
struct DocBlock {
    description: Option<String>,
    fields: Option<IndexMap<String, DocField>>,
}

#[derive(Debug, Default, Deserialize)]
struct DocField {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    example: Option<serde_yaml::Value>,
}

fn render_example(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Default field set: one entry per declared parameter except `context`
fn default_fields(function: &CompiledFunction) -> IndexMap<String, FieldDescription> {
    function
        .params
        .iter()
        .filter(|p| p.name != "context")
        .map(|p| (p.name.clone(), FieldDescription::new(format!("argument {}", p.name))))
        .collect()
}

fn parse_yaml_doc(function: &CompiledFunction, body: &str) -> Option<DocBlock> {
    match serde_yaml::from_str::<Option<DocBlock>>(body) {
        Ok(block) => Some(block.unwrap_or_default()),
        Err(err) => {
            warn!(
                "{}: unable to parse yaml doc string: {}; using defaults",
                function.name, err
            );
            None
        }
    }
}

/// Build the description registered alongside `function` as `{domain}.{name}`
pub fn describe(function: &CompiledFunction, domain: &str) -> ServiceDescription {
    let mut description = ServiceDescription::new(domain, &function.name);
    let mut text = None;
    let mut fields = default_fields(function);

    if let Some(doc) = function.doc.as_deref() {
        let doc = doc.trim_start_matches(['\n', '\r']);
        let (first, rest) = doc.split_once('\n').unwrap_or((doc, ""));
        if first.trim() == "yaml" {
            if let Some(block) = parse_yaml_doc(function, rest) {
                text = block.description;
                if let Some(doc_fields) = block.fields {
                    fields = doc_fields
                        .into_iter()
                        .map(|(name, field)| {
                            let entry = FieldDescription {
                                description: field.description.unwrap_or_default(),
                                example: field.example.as_ref().map(render_example),
                            };
                            (name, entry)
                        })
                        .collect();
                }
            }
        } else if !first.trim().is_empty() {
            text = Some(first.trim().to_string());
        }
    }

    description.description =
        Some(text.unwrap_or_else(|| format!("{} function {}()", domain, function.name)));
    description.fields = fields;
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> CompiledFunction {
        CompiledFunction::new(name, |_inv| async { Ok(()) })
    }

    #[test]
    fn test_defaults() {
        let function = noop("func1")
            .param_default("arg1", 1)
            .param_default("arg2", 2)
            .param_default("context", serde_json::Value::Null);
        let desc = describe(&function, "autoscript");

        assert_eq!(desc.description.as_deref(), Some("autoscript function func1()"));
        assert_eq!(
            desc.fields.keys().collect::<Vec<_>>(),
            vec!["arg1", "arg2"]
        );
        assert_eq!(desc.fields["arg2"], FieldDescription::new("argument arg2"));
        assert_eq!(
            serde_json::to_value(&desc.fields["arg1"]).unwrap(),
            serde_json::json!({"description": "argument arg1"})
        );
    }

    #[test]
    fn test_plain_doc_uses_first_line() {
        let function = noop("func2")
            .var_kwargs()
            .doc("\nSays hello.\n\nLonger explanation.\n");
        let desc = describe(&function, "autoscript");
        assert_eq!(desc.description.as_deref(), Some("Says hello."));
        assert!(desc.fields.is_empty());
    }

    #[test]
    fn test_yaml_doc_replaces_fields() {
        let function = noop("func_yaml")
            .param("arg1")
            .param("arg2")
            .doc(
                "yaml\ndescription: This is func_yaml\nfields:\n  arg1:\n    description: This is arg1\n    example: 12\n    ",
            );
        let desc = describe(&function, "autoscript");

        assert_eq!(desc.description.as_deref(), Some("This is func_yaml"));
        assert_eq!(desc.fields.len(), 1);
        assert_eq!(desc.fields["arg1"].description, "This is arg1");
        assert_eq!(desc.fields["arg1"].example.as_deref(), Some("12"));
    }

    #[test]
    fn test_yaml_without_fields_keeps_defaults() {
        let function = noop("f").param("x").doc("yaml\ndescription: only text\n");
        let desc = describe(&function, "custom");
        assert_eq!(desc.description.as_deref(), Some("only text"));
        assert_eq!(desc.fields["x"].description, "argument x");
    }

    #[test]
    fn test_bad_yaml_falls_back() {
        let function = noop("f").param("x").doc("yaml\ndescription: [unclosed\n");
        let desc = describe(&function, "autoscript");
        assert_eq!(desc.description.as_deref(), Some("autoscript function f()"));
        assert_eq!(desc.fields.len(), 1);
    }
}
