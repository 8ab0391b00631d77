//! Cursor context handed to completion providers.

use std::collections::BTreeMap;

use quire_types::{Position, Range};
use serde::{Deserialize, Serialize};
use url::Url;

/// Unit in which a position's `character` counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[default]
    #[serde(rename = "utf-16")]
    Utf16,
    #[serde(rename = "utf-32")]
    Utf32,
}

impl PositionEncoding {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "utf-16" | "utf16" => Some(Self::Utf16),
            "utf-32" | "utf32" => Some(Self::Utf32),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf16 => "utf-16",
            Self::Utf32 => "utf-32",
        }
    }

    fn width(self, ch: char) -> usize {
        match self {
            Self::Utf8 => ch.len_utf8(),
            Self::Utf16 => ch.len_utf16(),
            Self::Utf32 => 1,
        }
    }

    /// Byte offset of `character` within `line`.
    ///
    /// Past the end clamps to the line length; a position inside a multi-unit
    /// character rounds up to the next character boundary.
    #[must_use]
    pub fn byte_offset(self, line: &str, character: u32) -> usize {
        let target = character as usize;
        let mut units = 0;
        for (idx, ch) in line.char_indices() {
            if units >= target {
                return idx;
            }
            units += self.width(ch);
        }
        line.len()
    }

    /// Character offset, in this encoding, of byte `offset` within `line`.
    #[must_use]
    pub fn character(self, line: &str, offset: usize) -> u32 {
        line.get(..offset)
            .unwrap_or(line)
            .chars()
            .map(|ch| self.width(ch))
            .sum::<usize>() as u32
    }
}

/// What the editor told us it supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientCapabilities {
    pub position_encoding: PositionEncoding,
    pub snippet_support: bool,
}

/// A completion request as received from the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub uri: Url,
    pub position: Position,
    /// Character that caused the request, when the editor reports one.
    pub trigger_character: Option<char>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(uri: Url, position: Position) -> Self {
        Self {
            uri,
            position,
            trigger_character: None,
        }
    }

    pub fn with_trigger_character(mut self, ch: char) -> Self {
        self.trigger_character = Some(ch);
        self
    }
}

/// One named group of a trigger match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub text: String,
    pub range: Range,
}

/// The trigger pattern that matched at the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerMatch {
    /// Name of the trigger that matched.
    pub pattern: String,
    /// Every named group that took part in the match.
    pub groups: BTreeMap<String, Capture>,
    /// The part of the line that covered the cursor.
    pub span: Range,
}

/// Everything a provider needs to answer one completion request.
///
/// Built fresh per request; reading it never touches the engine or the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionContext {
    pub uri: Url,
    pub document: String,
    pub position: Position,
    pub trigger_match: TriggerMatch,
    pub language_id: String,
    pub capabilities: ClientCapabilities,
}

impl CompletionContext {
    /// Name of the trigger that produced this context.
    pub fn trigger(&self) -> &str {
        &self.trigger_match.pattern
    }

    pub fn group(&self, name: &str) -> Option<&str> {
        self.trigger_match
            .groups
            .get(name)
            .map(|capture| capture.text.as_str())
    }

    pub fn group_range(&self, name: &str) -> Option<Range> {
        self.trigger_match
            .groups
            .get(name)
            .map(|capture| capture.range)
    }

    /// Whether the cursor sits after the start of group `name`, within it.
    pub fn cursor_in_group(&self, name: &str) -> bool {
        self.group_range(name).is_some_and(|range| {
            range.start.character < self.position.character
                && self.position.character <= range.end.character
        })
    }
}
