// SPDX-License-Identifier: MIT OR Apache-2.0

//! Language detection and structural parsing

pub mod languages;
pub mod spans;

pub use languages::Language;
pub use spans::{Span, SpanExtractor, SpanKind};
