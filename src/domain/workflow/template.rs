//! Template resolution for `{{path}}` placeholders
//!
//! Placeholders are resolved independently, left to right. A placeholder whose
//! path is malformed or cannot be walked is left untouched; a path that ends
//! on a missing key resolves to an empty string.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::context::TemplateContext;
use super::path::{PathError, ValuePath};

/// Regex for a placeholder: `{{ path }}`
static PLACEHOLDER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.*?)\}\}").unwrap());

/// Template processing errors (never escape the public resolve calls)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("Cannot resolve placeholder '{placeholder}': {source}")]
    Unresolvable {
        placeholder: String,
        #[source]
        source: PathError,
    },
}

/// Stateless resolver for template strings and parameter bags
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    /// Replace every placeholder in `template` with its formatted value
    pub fn resolve(template: &str, context: &TemplateContext) -> String {
        if !Self::has_placeholders(template) {
            return template.to_string();
        }

        PLACEHOLDER_PATTERN
            .replace_all(template, |caps: &Captures<'_>| {
                let placeholder = &caps[0];
                match Self::resolve_placeholder(&caps[1], context) {
                    Ok(value) => format_value(value).into_owned(),
                    Err(source) => {
                        let error = TemplateError::Unresolvable {
                            placeholder: placeholder.to_string(),
                            source,
                        };
                        debug!(error = %error, "Leaving placeholder unresolved");
                        placeholder.to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Resolve every string leaf of a nested value, leaving other leaves as-is
    pub fn resolve_value(value: &Value, context: &TemplateContext) -> Value {
        match value {
            Value::String(s) => Value::String(Self::resolve(s, context)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| Self::resolve_value(item, context))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), Self::resolve_value(item, context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Check if a string contains any placeholder
    pub fn has_placeholders(template: &str) -> bool {
        PLACEHOLDER_PATTERN.is_match(template)
    }

    /// Extract all placeholder paths, trimmed, in order of appearance
    pub fn extract_paths(template: &str) -> Vec<String> {
        PLACEHOLDER_PATTERN
            .captures_iter(template)
            .map(|caps| caps[1].trim().to_string())
            .collect()
    }

    fn resolve_placeholder<'a>(
        raw_path: &str,
        context: &'a TemplateContext,
    ) -> Result<Option<&'a Value>, PathError> {
        ValuePath::parse(raw_path)?.resolve(context)
    }
}

/// Format a resolved value for insertion into text
pub fn format_value(value: Option<&Value>) -> Cow<'_, str> {
    match value {
        None | Some(Value::Null) => Cow::Borrowed(""),
        Some(Value::String(s)) => Cow::Borrowed(s.as_str()),
        Some(Value::Bool(b)) => Cow::Owned(b.to_string()),
        Some(Value::Number(n)) => Cow::Owned(n.to_string()),

        // For arrays and objects, use JSON representation
        Some(other) => Cow::Owned(serde_json::to_string(other).unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::context::ExecutionScope;
    use serde_json::json;

    fn context(input: Value) -> TemplateContext {
        TemplateContext::new(input, &ExecutionScope::new("wf", "exec", "tenant"))
    }

    #[test]
    fn test_resolve_simple() {
        let ctx = context(json!({"question": "X"}));
        assert_eq!(TemplateEngine::resolve("Q: {{input.question}}", &ctx), "Q: X");
    }

    #[test]
    fn test_resolve_missing_is_empty() {
        let ctx = context(json!({}));
        assert_eq!(TemplateEngine::resolve("{{input.missing}}", &ctx), "");
        assert_eq!(TemplateEngine::resolve("[{{ input.missing }}]", &ctx), "[]");
    }

    #[test]
    fn test_resolve_array_index() {
        let mut ctx = context(json!({}));
        ctx.record_step(
            "s1",
            json!({"results": [{"text": "first"}, {"text": "second"}]}),
            json!({}),
        );

        assert_eq!(
            TemplateEngine::resolve("{{steps.s1.output.results[1].text}}", &ctx),
            "second"
        );
    }

    #[test]
    fn test_resolve_formats_values() {
        let ctx = context(json!({
            "string": "hello",
            "number": 42,
            "float": 0.5,
            "bool": true,
            "null": null,
            "array": [1, 2, 3],
            "object": {"key": "value"}
        }));

        assert_eq!(TemplateEngine::resolve("{{input.string}}", &ctx), "hello");
        assert_eq!(TemplateEngine::resolve("Count: {{input.number}}", &ctx), "Count: 42");
        assert_eq!(TemplateEngine::resolve("{{input.float}}", &ctx), "0.5");
        assert_eq!(TemplateEngine::resolve("Active: {{input.bool}}", &ctx), "Active: true");
        assert_eq!(TemplateEngine::resolve("<{{input.null}}>", &ctx), "<>");
        assert_eq!(TemplateEngine::resolve("{{input.array}}", &ctx), "[1,2,3]");
        assert_eq!(
            TemplateEngine::resolve("Data: {{input.object}}", &ctx),
            "Data: {\"key\":\"value\"}"
        );
    }

    #[test]
    fn test_unresolvable_placeholders_are_kept() {
        let ctx = context(json!({"name": "Alice"}));

        assert_eq!(
            TemplateEngine::resolve("{{input.name.first}} {{env.HOME}} {{}}", &ctx),
            "{{input.name.first}} {{env.HOME}} {{}}"
        );
        assert_eq!(
            TemplateEngine::resolve("{{input.missing.deep}} and {{input.name}}", &ctx),
            "{{input.missing.deep}} and Alice"
        );
    }

    #[test]
    fn test_resolve_multiple_and_context_root() {
        let ctx = context(json!({"a": 1, "b": "two"}));

        assert_eq!(
            TemplateEngine::resolve("{{input.a}}-{{input.b}}-{{input.a}} @ {{context.tenantId}}", &ctx),
            "1-two-1 @ tenant"
        );
    }

    #[test]
    fn test_resolved_text_is_not_reinterpreted() {
        let ctx = context(json!({"evil": "{{input.secret}}", "secret": "s3cr3t"}));

        assert_eq!(TemplateEngine::resolve("{{input.evil}}", &ctx), "{{input.secret}}");
    }

    #[test]
    fn test_no_placeholders() {
        let ctx = context(json!({}));
        assert_eq!(TemplateEngine::resolve("No variables here", &ctx), "No variables here");
    }

    #[test]
    fn test_resolve_value_deep() {
        let ctx = context(json!({"q": "rust", "k": 3}));
        let params = json!({
            "query": "about {{input.q}}",
            "topK": 5,
            "filters": {"lang": "{{input.q}}", "flags": [true, "{{input.k}}"]},
            "nothing": null
        });

        assert_eq!(
            TemplateEngine::resolve_value(&params, &ctx),
            json!({
                "query": "about rust",
                "topK": 5,
                "filters": {"lang": "rust", "flags": [true, "3"]},
                "nothing": null
            })
        );
    }

    #[test]
    fn test_has_placeholders() {
        assert!(TemplateEngine::has_placeholders("{{input.x}}"));
        assert!(TemplateEngine::has_placeholders("Hello {{ steps.a.output }}!"));
        assert!(!TemplateEngine::has_placeholders("No variables"));
        assert!(!TemplateEngine::has_placeholders("{single}"));
    }

    #[test]
    fn test_extract_paths() {
        let paths = TemplateEngine::extract_paths(
            "{{ input.question }} and {{steps.search.output}} then {{input.question}}",
        );

        assert_eq!(
            paths,
            vec!["input.question", "steps.search.output", "input.question"]
        );
    }
}
