//! Candidate function detection from README text and companion source.
//!
//! README heuristics are an ordered list of independent [`Matcher`]s whose
//! results are unioned in first-seen order. Companion source is parsed
//! syntactically via [`crate::core::python`]; which of the two wins is a
//! [`NamePrecedence`] policy.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::python;
use crate::core::types::Framework;

/// Names that README prose uses generically and that are never real targets.
const STOPWORDS: &[&str] = &[
    "module", "key", "class", "object", "property", "input", "output", "returns", "return",
];

/// One README heuristic. Capture group 1 of `regex` is the function name.
pub struct Matcher {
    pub name: &'static str,
    regex: Regex,
}

impl Matcher {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("matcher pattern should compile"),
        }
    }

    pub fn find(&self, text: &str) -> Vec<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

static MATCHERS: LazyLock<Vec<Matcher>> = LazyLock::new(|| {
    vec![
        Matcher::new("def", r"def\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\("),
        Matcher::new("method", r"def\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(self"),
        Matcher::new("inline_code", r"`([a-zA-Z_][a-zA-Z0-9_]*)\s*\([^)]*\)`"),
        Matcher::new("heading", r"###\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\("),
        Matcher::new(
            "line_start",
            r"(?m)^\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\([^)]*\)(?:\s*$|\s*[-:])",
        ),
        Matcher::new("bold", r"\*\*([a-zA-Z_][a-zA-Z0-9_]*)\s*\([^)]*\)\*\*"),
        Matcher::new("list_item", r"[-•]\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\("),
        Matcher::new(
            "route_handler",
            r"[-•]\s*`[A-Z]+\s+/[^`]*`.*?[-–—]\s*`?([a-zA-Z_][a-zA-Z0-9_]*)\s*\(",
        ),
    ]
});

/// README matchers in evaluation order.
pub fn matchers() -> &'static [Matcher] {
    &MATCHERS
}

/// Which name source wins when companion source is supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamePrecedence {
    #[default]
    SourceFirst,
    SpecFirst,
}

/// Where the final name list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameOrigin {
    Source,
    Spec,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub functions: Vec<String>,
    pub framework: Framework,
    pub origin: NameOrigin,
}

/// Detect candidate functions and the framework tag for one run.
///
/// Never fails: unparsable source and README text without matches both
/// degrade to an empty list.
pub fn detect(
    spec_text: &str,
    source_text: Option<&str>,
    max_functions: usize,
    precedence: NamePrecedence,
) -> Detection {
    let framework = source_text.map(detect_framework).unwrap_or_default();
    let from_spec = || names_from_spec(spec_text, max_functions);
    let from_source = || {
        source_text
            .map(|source| names_from_source(source, max_functions))
            .unwrap_or_default()
    };

    let (first, second) = match precedence {
        NamePrecedence::SourceFirst => (
            (from_source(), NameOrigin::Source),
            (from_spec(), NameOrigin::Spec),
        ),
        NamePrecedence::SpecFirst => (
            (from_spec(), NameOrigin::Spec),
            (from_source(), NameOrigin::Source),
        ),
    };
    let (functions, origin) = [first, second]
        .into_iter()
        .find(|(names, _)| !names.is_empty())
        .unwrap_or((Vec::new(), NameOrigin::Empty));

    Detection {
        functions,
        framework,
        origin,
    }
}

/// Run every README matcher and filter the union.
pub fn names_from_spec(spec_text: &str, max_functions: usize) -> Vec<String> {
    let candidates = matchers().iter().flat_map(|m| m.find(spec_text));
    filter_names(candidates, max_functions)
}

/// Top-level and method names declared in Python source; empty on parse failure.
pub fn names_from_source(source: &str, max_functions: usize) -> Vec<String> {
    let Some(module) = python::parse_module(source) else {
        return Vec::new();
    };
    filter_names(module.declared_names(), max_functions)
}

/// Dedup in first-seen order, drop private and stopword names, cap the count.
pub fn filter_names(candidates: impl IntoIterator<Item = String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|name| !name.starts_with('_'))
        .filter(|name| !STOPWORDS.contains(&name.to_lowercase().as_str()))
        .filter(|name| seen.insert(name.clone()))
        .take(max)
        .collect()
}

/// Classify companion source by import signature. First match wins.
pub fn detect_framework(source: &str) -> Framework {
    let lower = source.to_lowercase();
    let signatures: [(Framework, &[&str]); 3] = [
        (Framework::Flask, &["from flask import", "import flask"]),
        (Framework::Django, &["from django", "import django"]),
        (Framework::Fastapi, &["from fastapi import", "import fastapi"]),
    ];
    signatures
        .into_iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(framework, _)| framework)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const README: &str = "\
# Calculator

Use `add(a, b)` to sum numbers.

### subtract(a, b)
Subtracts.

- multiply(x, y): product
- `divide(a, b)` returns a quotient
**power(base, exp)**

```python
def modulo(a, b):
    return a % b

class Acc:
    def reset(self):
        pass
```

- `GET /items` - list handler `list_items()`
";

    #[test]
    fn matchers_union_in_first_seen_order() {
        let names = names_from_spec(README, 20);
        assert_eq!(
            names,
            vec![
                "modulo",
                "reset",
                "add",
                "divide",
                "list_items",
                "subtract",
                "power",
                "multiply"
            ]
        );
    }

    #[test]
    fn route_list_items_name_their_handler() {
        let text = "- `POST /orders` – create_order(payload)\n";
        assert_eq!(names_from_spec(text, 20), vec!["create_order"]);
    }

    #[test]
    fn extraction_is_idempotent() {
        assert_eq!(names_from_spec(README, 20), names_from_spec(README, 20));
    }

    #[test]
    fn filters_private_names_and_stopwords() {
        let text = "`_hidden()` `Return(x)` `key(a)` `Output()` `keep(a)` `keep(b)`";
        assert_eq!(names_from_spec(text, 20), vec!["keep"]);
    }

    #[test]
    fn caps_the_number_of_names() {
        let text: String = (0..50).map(|i| format!("`fn_{i}(x)`\n")).collect();
        let names = names_from_spec(&text, 20);
        assert_eq!(names.len(), 20);
        assert_eq!(names[0], "fn_0");
        assert_eq!(names[19], "fn_19");
    }

    #[test]
    fn dedup_is_case_sensitive() {
        assert_eq!(
            filter_names(["Add".to_string(), "add".to_string(), "add".to_string()], 20),
            vec!["Add", "add"]
        );
    }

    #[test]
    fn framework_detection_is_ordered_and_case_insensitive() {
        assert_eq!(detect_framework("FROM Flask IMPORT Flask"), Framework::Flask);
        assert_eq!(
            detect_framework("from django.http import x\nfrom fastapi import y"),
            Framework::Django
        );
        assert_eq!(
            detect_framework("import fastapi\nimport flask"),
            Framework::Flask
        );
        assert_eq!(detect_framework("from fastapi import FastAPI"), Framework::Fastapi);
        assert_eq!(detect_framework("def add(a, b): return a + b"), Framework::Generic);
    }

    #[test]
    fn source_names_win_by_default() {
        let detection = detect(
            "`from_readme(x)`",
            Some("def add(a, b):\n    return a + b\n"),
            20,
            NamePrecedence::SourceFirst,
        );
        assert_eq!(detection.functions, vec!["add"]);
        assert_eq!(detection.origin, NameOrigin::Source);
    }

    #[test]
    fn spec_first_precedence_prefers_readme_names() {
        let detection = detect(
            "`from_readme(x)`",
            Some("def add(a, b):\n    return a + b\n"),
            20,
            NamePrecedence::SpecFirst,
        );
        assert_eq!(detection.functions, vec!["from_readme"]);
        assert_eq!(detection.origin, NameOrigin::Spec);
    }

    #[test]
    fn unparsable_source_falls_back_to_readme_names() {
        let detection = detect(
            "Use `add(a, b)`.",
            Some("def broken(:\n"),
            20,
            NamePrecedence::SourceFirst,
        );
        assert_eq!(detection.functions, vec!["add"]);
        assert_eq!(detection.origin, NameOrigin::Spec);
        assert_eq!(detection.framework, Framework::Generic);
    }

    #[test]
    fn nothing_found_is_empty_not_an_error() {
        let detection = detect("plain prose", None, 20, NamePrecedence::SourceFirst);
        assert!(detection.functions.is_empty());
        assert_eq!(detection.origin, NameOrigin::Empty);
    }
}
