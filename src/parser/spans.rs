// SPDX-License-Identifier: MIT OR Apache-2.0

//! Definition span extraction
//!
//! Finds function, method and class definitions together with their full
//! source text. Tree-sitter is tried first; when the grammar cannot produce
//! a usable tree the source is scanned line by line with permissive regex
//! patterns instead. Extraction never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::parser::languages::Language;

/// Kind of definition a span covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Function,
    Method,
    Class,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpanKind::Function => write!(f, "function"),
            SpanKind::Method => write!(f, "method"),
            SpanKind::Class => write!(f, "class"),
        }
    }
}

/// A definition and the source text it spans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub name: String,
    pub kind: SpanKind,
    /// First line of the definition (1-indexed)
    pub start_line: usize,
    /// Last body line (1-indexed, inclusive)
    pub end_line: usize,
    pub text: String,
    /// True when the definition sits inside another extracted definition
    pub nested: bool,
}

/// Extracts definition spans from source code
pub struct SpanExtractor;

impl Default for SpanExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Top-level definitions in source order. Nested definitions are part of
    /// their parent's text and are not returned separately.
    pub fn extract(&self, source: &str, language: Language) -> Vec<Span> {
        self.extract_all(source, language)
            .into_iter()
            .filter(|span| !span.nested)
            .collect()
    }

    /// Every definition, including methods and nested functions.
    pub fn extract_all(&self, source: &str, language: Language) -> Vec<Span> {
        match self.extract_structural(source, language) {
            Some(spans) => spans,
            None => {
                tracing::debug!(%language, "structural parse unusable, scanning with patterns");
                self.scan_fallback(source, language)
            }
        }
    }

    /// Tree-sitter extraction. Returns None when parsing fails outright or the
    /// tree is broken and yields no definitions.
    pub fn extract_structural(&self, source: &str, language: Language) -> Option<Vec<Span>> {
        let mut parser = language.parser()?;
        let tree = parser.parse(source, None)?;
        let root = tree.root_node();

        let mut spans = Vec::new();
        self.traverse_node(root, source, language, None, &mut spans);

        if root.has_error() && spans.is_empty() {
            return None;
        }
        Some(spans)
    }

    fn traverse_node(
        &self,
        node: Node,
        source: &str,
        lang: Language,
        enclosing: Option<SpanKind>,
        spans: &mut Vec<Span>,
    ) {
        if let Some((kind, name)) = self.match_definition(node, source, lang) {
            let kind = match (kind, enclosing) {
                (SpanKind::Function, Some(SpanKind::Class)) => SpanKind::Method,
                (kind, _) => kind,
            };
            let text = source
                .get(node.start_byte()..node.end_byte())
                .unwrap_or_default()
                .to_string();
            spans.push(Span {
                name,
                kind,
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
                text,
                nested: enclosing.is_some(),
            });

            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.traverse_node(child, source, lang, Some(kind), spans);
            }
            return;
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.traverse_node(child, source, lang, enclosing, spans);
        }
    }

    /// Kind and name of a definition node, if the node is one
    fn match_definition(&self, node: Node, source: &str, lang: Language) -> Option<(SpanKind, String)> {
        let kind = match lang {
            Language::Python => self.match_python_node(node)?,
            Language::JavaScript => self.match_javascript_node(node)?,
            Language::Java => self.match_java_node(node.kind())?,
            Language::Cpp => self.match_cpp_node(node)?,
        };

        let name = match (lang, node.kind()) {
            (Language::Python, "decorated_definition") => {
                let inner = node.child_by_field_name("definition")?;
                field_text(inner, "name", source)?
            }
            (Language::JavaScript, "lexical_declaration" | "variable_declaration") => {
                let declarator = first_named_child_of_kind(node, "variable_declarator")?;
                field_text(declarator, "name", source)?
            }
            (Language::Cpp, "function_definition") => declarator_name(node, source)?,
            _ => field_text(node, "name", source)?,
        };

        Some((kind, name))
    }

    fn match_python_node(&self, node: Node) -> Option<SpanKind> {
        match node.kind() {
            "function_definition" => {
                // Decorated functions are reported through their decorated_definition
                if node.parent().map(|p| p.kind()) == Some("decorated_definition") {
                    None
                } else {
                    Some(SpanKind::Function)
                }
            }
            "class_definition" => {
                if node.parent().map(|p| p.kind()) == Some("decorated_definition") {
                    None
                } else {
                    Some(SpanKind::Class)
                }
            }
            "decorated_definition" => match node.child_by_field_name("definition")?.kind() {
                "function_definition" => Some(SpanKind::Function),
                "class_definition" => Some(SpanKind::Class),
                _ => None,
            },
            _ => None,
        }
    }

    fn match_javascript_node(&self, node: Node) -> Option<SpanKind> {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => Some(SpanKind::Function),
            "class_declaration" => Some(SpanKind::Class),
            "method_definition" => Some(SpanKind::Method),
            "lexical_declaration" | "variable_declaration" => {
                let declarator = first_named_child_of_kind(node, "variable_declarator")?;
                match declarator.child_by_field_name("value")?.kind() {
                    "arrow_function" | "function_expression" | "function" => Some(SpanKind::Function),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn match_java_node(&self, kind: &str) -> Option<SpanKind> {
        match kind {
            "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration" => {
                Some(SpanKind::Class)
            }
            "method_declaration" | "constructor_declaration" => Some(SpanKind::Method),
            _ => None,
        }
    }

    fn match_cpp_node(&self, node: Node) -> Option<SpanKind> {
        match node.kind() {
            "function_definition" => Some(SpanKind::Function),
            // Forward declarations have no body and are not definitions
            "class_specifier" | "struct_specifier" => {
                node.child_by_field_name("body")?;
                Some(SpanKind::Class)
            }
            _ => None,
        }
    }

    /// Pattern-based scan used when tree-sitter cannot help.
    ///
    /// Python bodies end when indentation returns to the definition's level;
    /// brace languages end when the brace depth returns to zero.
    pub fn scan_fallback(&self, source: &str, language: Language) -> Vec<Span> {
        let lines: Vec<&str> = source.lines().collect();
        let patterns = fallback_patterns(language);
        let mut spans = Vec::new();
        // End line (0-indexed) of the innermost enclosing top-level span
        let mut top_level_end: Option<usize> = None;

        for (idx, line) in lines.iter().enumerate() {
            let Some((kind, name)) = match_line(patterns, line) else {
                continue;
            };

            let end = if language.uses_braces() {
                match brace_block_end(&lines, idx) {
                    Some(end) => end,
                    None => continue,
                }
            } else {
                indent_block_end(&lines, idx)
            };

            let nested = top_level_end.is_some_and(|top_end| idx <= top_end);
            if !nested {
                top_level_end = Some(end);
            }

            let start = if language == Language::Python {
                decorator_start(&lines, idx)
            } else {
                idx
            };

            spans.push(Span {
                name,
                kind,
                start_line: start + 1,
                end_line: end + 1,
                text: lines[start..=end].join("\n"),
                nested,
            });
        }

        spans
    }
}

fn field_text(node: Node, field: &str, source: &str) -> Option<String> {
    let child = node.child_by_field_name(field)?;
    child.utf8_text(source.as_bytes()).ok().map(str::to_string)
}

fn first_named_child_of_kind<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|child| child.kind() == kind);
    found
}

/// Walks the declarator chain of a C++ function down to its
/// `function_declarator` and returns the name that one declares.
fn declarator_name(node: Node, source: &str) -> Option<String> {
    let mut current = node.child_by_field_name("declarator")?;
    loop {
        if current.kind() == "function_declarator" {
            let name = current.child_by_field_name("declarator")?;
            return name.utf8_text(source.as_bytes()).ok().map(str::to_string);
        }
        current = match current.child_by_field_name("declarator") {
            Some(inner) => inner,
            // reference_declarator has no field for its inner declarator
            None => current.named_child(0)?,
        };
    }
}

const CONTROL_WORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "else", "do", "new", "sizeof", "delete",
];

static PYTHON_PATTERNS: Lazy<Vec<(Regex, SpanKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"^\s*(?:async\s+)?def\s+(?P<name>\w+)\s*\(").unwrap(),
            SpanKind::Function,
        ),
        (
            Regex::new(r"^\s*class\s+(?P<name>\w+)\s*[:(]").unwrap(),
            SpanKind::Class,
        ),
    ]
});

static JAVASCRIPT_PATTERNS: Lazy<Vec<(Regex, SpanKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[\w$]+)\s*\(").unwrap(),
            SpanKind::Function,
        ),
        (
            Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?class\s+(?P<name>[\w$]+)").unwrap(),
            SpanKind::Class,
        ),
        (
            Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[\w$]+)\s*=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*=>|[\w$]+\s*=>)").unwrap(),
            SpanKind::Function,
        ),
        (
            Regex::new(r"^\s+(?:static\s+)?(?:async\s+)?(?P<name>[\w$]+)\s*\([^)]*\)\s*\{").unwrap(),
            SpanKind::Method,
        ),
    ]
});

static JAVA_PATTERNS: Lazy<Vec<(Regex, SpanKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"^\s*(?:(?:public|private|protected|abstract|final|static|sealed)\s+)*(?:class|interface|enum|record)\s+(?P<name>\w+)").unwrap(),
            SpanKind::Class,
        ),
        (
            Regex::new(r"^\s*(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]*>\s+)?(?:[\w.<>\[\],?]+\s+)?(?P<name>\w+)\s*\([^;]*$").unwrap(),
            SpanKind::Method,
        ),
    ]
});

static CPP_PATTERNS: Lazy<Vec<(Regex, SpanKind)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"^\s*(?:template\s*<[^>]*>\s*)?(?:class|struct)\s+(?P<name>\w+)[^;]*$").unwrap(),
            SpanKind::Class,
        ),
        (
            Regex::new(r"^\s*(?:[\w:<>,]+[\s*&]+)+(?P<name>~?[\w:]+)\s*\([^;]*$").unwrap(),
            SpanKind::Function,
        ),
    ]
});

fn fallback_patterns(language: Language) -> &'static [(Regex, SpanKind)] {
    match language {
        Language::Python => &PYTHON_PATTERNS,
        Language::JavaScript => &JAVASCRIPT_PATTERNS,
        Language::Java => &JAVA_PATTERNS,
        Language::Cpp => &CPP_PATTERNS,
    }
}

fn match_line(patterns: &[(Regex, SpanKind)], line: &str) -> Option<(SpanKind, String)> {
    patterns.iter().find_map(|(re, kind)| {
        let caps = re.captures(line)?;
        let name = caps.name("name")?.as_str();
        if CONTROL_WORDS.contains(&name) {
            return None;
        }
        Some((*kind, name.to_string()))
    })
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Last line of an indentation-delimited block starting at `start`
fn indent_block_end(lines: &[&str], start: usize) -> usize {
    let base = indent_of(lines[start]);
    let mut end = start;
    for (idx, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        end = idx;
    }
    end
}

/// Decorator lines directly above a Python definition belong to it
fn decorator_start(lines: &[&str], def_line: usize) -> usize {
    let base = indent_of(lines[def_line]);
    let mut start = def_line;
    while start > 0 {
        let prev = lines[start - 1];
        if indent_of(prev) == base && prev.trim_start().starts_with('@') {
            start -= 1;
        } else {
            break;
        }
    }
    start
}

/// Last line of a brace-delimited block whose header starts at `start`.
/// Returns None for declarations that end before a body opens.
fn brace_block_end(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                ';' if !opened => return None,
                _ => {}
            }
            if opened && depth <= 0 {
                return Some(idx);
            }
        }
    }
    // Unbalanced input: the block runs to the end of the file
    opened.then(|| lines.len().saturating_sub(1))
}
