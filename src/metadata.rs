// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structural facts about a piece of source code

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parser::languages::Language;
use crate::parser::spans::{Span, SpanKind};

static PYTHON_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*((?:from\s+[\w.]+\s+import\s+.+)|(?:import\s+[\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*))[ \t]*$")
        .unwrap()
});

static JAVASCRIPT_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*((?:import\s.+)|(?:(?:const|let|var)\s+.+=\s*require\(\s*['"][^'"]+['"]\s*\).*))$"#)
        .unwrap()
});

static JAVA_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(import\s+(?:static\s+)?[\w.]+(?:\.\*)?\s*;)").unwrap());

static CPP_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*(#[ \t]*include\s*[<"][^>"]+[>"])"#).unwrap());

static PYTHON_CONTROL_FLOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:if|elif|else|for|while|try|except|with)\b").unwrap());

static BRACE_CONTROL_FLOW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:if|else|for|while|do|switch|case|try|catch)\b").unwrap());

/// Names, imports and a rough complexity score for one source text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeMetadata {
    pub function_names: Vec<String>,
    pub class_names: Vec<String>,
    pub imports: Vec<String>,
    pub line_count: usize,
    /// Control-flow keyword occurrences plus defined functions
    pub complexity_score: usize,
}

impl CodeMetadata {
    /// Collects metadata from `text` given its definitions (nested ones
    /// included).
    pub fn extract(text: &str, language: Language, definitions: &[Span]) -> Self {
        let mut function_names = Vec::new();
        let mut class_names = Vec::new();
        for span in definitions {
            match span.kind {
                SpanKind::Function | SpanKind::Method => function_names.push(span.name.clone()),
                SpanKind::Class => class_names.push(span.name.clone()),
            }
        }

        let control_flow = match language {
            Language::Python => &*PYTHON_CONTROL_FLOW,
            Language::JavaScript | Language::Java | Language::Cpp => &*BRACE_CONTROL_FLOW,
        };
        let complexity_score = control_flow.find_iter(text).count() + function_names.len();

        Self {
            imports: extract_imports(text, language),
            line_count: text.lines().count(),
            complexity_score,
            function_names,
            class_names,
        }
    }
}

/// Import or include statements, trimmed, in source order
pub fn extract_imports(text: &str, language: Language) -> Vec<String> {
    let pattern = match language {
        Language::Python => &*PYTHON_IMPORT,
        Language::JavaScript => &*JAVASCRIPT_IMPORT,
        Language::Java => &*JAVA_IMPORT,
        Language::Cpp => &*CPP_INCLUDE,
    };
    pattern
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
