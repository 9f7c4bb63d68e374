// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source normalization before chunking
//!
//! Comments are removed so that two copies of the same code with different
//! commentary embed the same way. Docstrings (`"""..."""` in Python, `/** */`
//! blocks elsewhere) are kept because they describe what the code does.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{EmbedError, Result};
use crate::parser::languages::Language;
use crate::parser::spans::{Span, SpanExtractor};

/// Three or more consecutive blank lines
static EXCESS_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){3,}").unwrap());

/// Comment syntax of a language family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommentSyntax {
    /// `#` line comments; docstrings are ordinary triple-quoted strings
    Hash,
    /// `//` and `/* */` comments; `/** */` blocks are documentation.
    /// `text_blocks` enables Java's `"""` multi-line strings.
    CStyle { backtick_strings: bool, text_blocks: bool },
}

impl CommentSyntax {
    fn for_language(language: Language) -> Self {
        match language {
            Language::Python => CommentSyntax::Hash,
            Language::JavaScript => CommentSyntax::CStyle {
                backtick_strings: true,
                text_blocks: false,
            },
            Language::Java => CommentSyntax::CStyle {
                backtick_strings: false,
                text_blocks: true,
            },
            Language::Cpp => CommentSyntax::CStyle {
                backtick_strings: false,
                text_blocks: false,
            },
        }
    }
}

/// Normalizes source text and exposes definition spans
pub struct CodePreprocessor {
    extractor: SpanExtractor,
}

impl Default for CodePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl CodePreprocessor {
    pub fn new() -> Self {
        Self {
            extractor: SpanExtractor::new(),
        }
    }

    /// Normalizes code given a language tag such as `"python"`.
    pub fn normalize_code(&self, text: &str, language: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }
        let language: Language = language.parse()?;
        self.normalize(text, language)
    }

    /// Strips comments, drops trailing whitespace, collapses runs of three or
    /// more blank lines into one and trims the result.
    ///
    /// May return an empty string when the input held nothing but comments.
    pub fn normalize(&self, text: &str, language: Language) -> Result<String> {
        if text.trim().is_empty() {
            return Err(EmbedError::EmptyInput);
        }

        let stripped = strip_comments(text, CommentSyntax::for_language(language));

        // Lines that only held a comment disappear instead of leaving a gap
        let mut lines = Vec::new();
        for (original, cleaned) in text.lines().zip(stripped.lines()) {
            let cleaned = cleaned.trim_end();
            if cleaned.is_empty() && !original.trim().is_empty() {
                continue;
            }
            lines.push(cleaned);
        }

        let joined = lines.join("\n");
        let collapsed = EXCESS_BLANK_LINES.replace_all(&joined, "\n\n");
        Ok(collapsed.trim().to_string())
    }

    /// Top-level function, method and class definitions in source order.
    pub fn extract_spans(&self, text: &str, language: Language) -> Vec<Span> {
        self.extractor.extract(text, language)
    }

    /// All definitions, nested ones included.
    pub fn extract_definitions(&self, text: &str, language: Language) -> Vec<Span> {
        self.extractor.extract_all(text, language)
    }
}

/// Removes comments while leaving string literals and newlines intact, so the
/// output has exactly as many lines as the input.
fn strip_comments(text: &str, syntax: CommentSyntax) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match syntax {
            CommentSyntax::Hash if c == '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            CommentSyntax::CStyle { .. } if c == '/' && next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            CommentSyntax::CStyle { .. } if c == '/' && next == Some('*') => {
                let end = block_comment_end(&chars, i);
                let is_doc = chars.get(i + 2) == Some(&'*') && chars.get(i + 3) != Some(&'/');
                if is_doc {
                    out.extend(&chars[i..end]);
                } else {
                    out.extend(chars[i..end].iter().filter(|&&ch| ch == '\n'));
                }
                i = end;
                continue;
            }
            _ => {}
        }

        let is_quote = match syntax {
            CommentSyntax::Hash => c == '"' || c == '\'',
            CommentSyntax::CStyle { backtick_strings, .. } => {
                c == '"' || c == '\'' || (backtick_strings && c == '`')
            }
        };
        if is_quote {
            let end = string_end(&chars, i, syntax);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Index just past the `*/` closing the block comment opened at `start`
fn block_comment_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}

/// Index just past the string literal opened at `start`
fn string_end(chars: &[char], start: usize, syntax: CommentSyntax) -> usize {
    let quote = chars[start];
    let triple_quotes = match syntax {
        CommentSyntax::Hash => true,
        CommentSyntax::CStyle { text_blocks, .. } => text_blocks && quote == '"',
    };
    let triple = triple_quotes
        && chars.get(start + 1) == Some(&quote)
        && chars.get(start + 2) == Some(&quote);

    if triple {
        let mut i = start + 3;
        while i < chars.len() {
            if chars[i] == '\\' {
                i += 2;
                continue;
            }
            if chars[i] == quote && chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return i + 3;
            }
            i += 1;
        }
        return chars.len();
    }

    let multiline = quote == '`';
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ch if ch == quote => return i + 1,
            // Unterminated single-line string: stop at the line end
            '\n' if !multiline => return i,
            _ => i += 1,
        }
    }
    chars.len()
}
