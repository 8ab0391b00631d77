//! Deciding whether, and why, completions should be offered at the cursor.
//!
//! A [`CompletionTrigger`] holds an ordered list of [`Trigger`]s. Each trigger
//! is a regular expression run against the cursor's line; the first trigger
//! (in declaration order) with a match covering the cursor wins and its named
//! groups become the [`CompletionContext`] handed to providers.

use std::collections::BTreeMap;

use quire_config::CompletionSettings;
use quire_types::Range;
use regex::{Captures, Regex};

use crate::context::{
    Capture, ClientCapabilities, CompletionContext, CompletionRequest, TriggerMatch,
};

pub const RST_DIRECTIVE: &str = "rst.directive";
pub const RST_DIRECTIVE_OPTION: &str = "rst.directive-option";
pub const RST_ROLE: &str = "rst.role";
pub const MYST_DIRECTIVE: &str = "myst.directive";
pub const MYST_ROLE: &str = "myst.role";

const RST_LANGUAGES: &[&str] = &["restructuredtext", "rst"];
const MYST_LANGUAGES: &[&str] = &["markdown", "myst"];

/// `.. name:: argument`, optionally domain-qualified.
const RST_DIRECTIVE_PATTERN: &str = r"(?x)
    ^(?P<indent>[\ \t]*)
    (?P<directive>
        \.\.[\ ]
        (?P<name>(?P<domain>\w+):[\w-]+|[\w-]*)
        (?:::)?
    )
    (?:[\ ]+(?P<argument>.*))?
    $";

/// An indented `:option: value` field in a directive body.
const RST_OPTION_PATTERN: &str = r"(?x)
    ^(?P<indent>[\ \t]+)
    (?P<field>:(?P<option>[\w-]*):?)
    (?:[\ ]+(?P<value>.*))?
    $";

/// An inline role with an optional target, alias and modifier.
const RST_ROLE_PATTERN: &str = r"(?x)
    (?:^|[^\w:`])
    (?P<role>
        :(?P<name>(?P<domain>\w+):[\w-]+|[\w-]*):?
        (?P<target>`(?:(?P<alias>[^<`]*)<)?(?P<modifier>[!~])?(?P<label>[^`>]*)>?`?)?
    )";

/// A fenced MyST directive opened with backticks, colons or tildes.
const MYST_DIRECTIVE_PATTERN: &str = r"(?x)
    ^(?P<indent>[\ \t]*)
    (?P<directive>
        (?:`{3,}|:{3,}|~{3,})
        \{(?P<name>(?P<domain>\w+):[\w-]+|[\w-]*)\}?
    )
    (?:[\ ]*(?P<argument>.*))?
    $";

/// A MyST inline role.
const MYST_ROLE_PATTERN: &str = r"(?x)
    (?:^|[^\w`])
    (?P<role>
        \{(?P<name>(?P<domain>\w+):[\w-]+|[\w-]*)\}?
        (?P<target>`(?:(?P<alias>[^<`]*)<)?(?P<modifier>[!~])?(?P<label>[^`>]*)>?`?)?
    )";

/// One completion trigger: a pattern plus the documents and keystrokes it
/// applies to.
#[derive(Debug, Clone)]
pub struct Trigger {
    name: String,
    pattern: Regex,
    languages: Vec<String>,
    characters: Vec<char>,
    span_group: Option<String>,
}

impl Trigger {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            languages: Vec::new(),
            characters: Vec::new(),
            span_group: None,
        })
    }

    /// Restrict the trigger to these language ids. None means every language.
    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Characters the editor should treat as completion triggers for this pattern.
    pub fn characters(mut self, characters: &[char]) -> Self {
        self.characters = characters.to_vec();
        self
    }

    /// Use this named group, rather than the whole match, to test the cursor.
    pub fn span_group(mut self, group: impl Into<String>) -> Self {
        self.span_group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn trigger_characters(&self) -> &[char] {
        &self.characters
    }

    pub fn applies_to(&self, language_id: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language_id)
    }

    /// First match on `line` whose span satisfies `start < cursor <= end`.
    fn covering<'h>(&self, line: &'h str, cursor: usize) -> Option<Captures<'h>> {
        self.pattern.captures_iter(line).find(|captures| {
            let span = match &self.span_group {
                Some(group) => captures.name(group),
                None => captures.get(0),
            };
            span.is_some_and(|span| span.start() < cursor && cursor <= span.end())
        })
    }

    fn span_of(&self, captures: &Captures<'_>) -> Option<(usize, usize)> {
        let span = match &self.span_group {
            Some(group) => captures.name(group)?,
            None => captures.get(0)?,
        };
        Some((span.start(), span.end()))
    }
}

/// Ordered trigger list evaluated against each completion request.
#[derive(Debug, Clone)]
pub struct CompletionTrigger {
    triggers: Vec<Trigger>,
}

impl Default for CompletionTrigger {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CompletionTrigger {
    #[must_use]
    pub fn new(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }

    /// reStructuredText and MyST triggers, directives before roles.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_triggers())
    }

    /// Built-in triggers minus the ones the settings leave disabled.
    #[must_use]
    pub fn from_settings(settings: &CompletionSettings) -> Self {
        let triggers = builtin_triggers()
            .into_iter()
            .filter(|trigger| {
                let enabled = settings.is_enabled(trigger.name());
                if !enabled {
                    tracing::debug!(trigger = trigger.name(), "Completion trigger disabled");
                }
                enabled
            })
            .collect();
        Self::new(triggers)
    }

    pub fn push(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Every character any trigger fires on, deduplicated and sorted.
    pub fn trigger_characters(&self) -> Vec<char> {
        let mut characters: Vec<char> = self
            .triggers
            .iter()
            .flat_map(|trigger| trigger.characters.iter().copied())
            .collect();
        characters.sort_unstable();
        characters.dedup();
        characters
    }

    /// Match the cursor's line against each applicable trigger in order.
    ///
    /// A trigger character no trigger declares is logged and ignored: the
    /// request is still matched.
    pub fn evaluate(
        &self,
        request: &CompletionRequest,
        document: &str,
        language_id: &str,
        capabilities: &ClientCapabilities,
    ) -> Option<CompletionContext> {
        let line = line_at(document, request.position.line)?;
        let encoding = capabilities.position_encoding;
        let cursor = encoding.byte_offset(line, request.position.character);

        if let Some(ch) = request.trigger_character
            && !self.triggers.iter().any(|t| t.characters.contains(&ch))
        {
            tracing::debug!(
                trigger_character = %ch,
                uri = %request.uri,
                "Trigger character not declared by any trigger, matching anyway"
            );
        }

        for trigger in self.triggers.iter().filter(|t| t.applies_to(language_id)) {
            let Some(captures) = trigger.covering(line, cursor) else {
                continue;
            };
            let Some((start, end)) = trigger.span_of(&captures) else {
                continue;
            };

            let line_no = request.position.line;
            let to_range = |start: usize, end: usize| {
                Range::on_line(
                    line_no,
                    encoding.character(line, start),
                    encoding.character(line, end),
                )
            };
            let groups: BTreeMap<String, Capture> = trigger
                .pattern
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    let m = captures.name(name)?;
                    Some((
                        name.to_string(),
                        Capture {
                            text: m.as_str().to_string(),
                            range: to_range(m.start(), m.end()),
                        },
                    ))
                })
                .collect();

            tracing::trace!(trigger = trigger.name(), uri = %request.uri, "Completion trigger matched");
            return Some(CompletionContext {
                uri: request.uri.clone(),
                document: document.to_string(),
                position: request.position,
                trigger_match: TriggerMatch {
                    pattern: trigger.name.clone(),
                    groups,
                    span: to_range(start, end),
                },
                language_id: language_id.to_string(),
                capabilities: capabilities.clone(),
            });
        }
        None
    }
}

/// Line `line` of `document` without its terminator.
fn line_at(document: &str, line: u32) -> Option<&str> {
    document
        .split('\n')
        .nth(line as usize)
        .map(|text| text.strip_suffix('\r').unwrap_or(text))
}

fn builtin_triggers() -> Vec<Trigger> {
    vec![
        Trigger::new(RST_DIRECTIVE, RST_DIRECTIVE_PATTERN)
            .expect("valid rst directive regex")
            .languages(RST_LANGUAGES.iter().copied())
            .characters(&['.', ' '])
            .span_group("directive"),
        Trigger::new(RST_DIRECTIVE_OPTION, RST_OPTION_PATTERN)
            .expect("valid rst directive option regex")
            .languages(RST_LANGUAGES.iter().copied())
            .characters(&[':'])
            .span_group("field"),
        Trigger::new(RST_ROLE, RST_ROLE_PATTERN)
            .expect("valid rst role regex")
            .languages(RST_LANGUAGES.iter().copied())
            .characters(&[':', '`'])
            .span_group("role"),
        Trigger::new(MYST_DIRECTIVE, MYST_DIRECTIVE_PATTERN)
            .expect("valid MyST directive regex")
            .languages(MYST_LANGUAGES.iter().copied())
            .characters(&['{'])
            .span_group("directive"),
        Trigger::new(MYST_ROLE, MYST_ROLE_PATTERN)
            .expect("valid MyST role regex")
            .languages(MYST_LANGUAGES.iter().copied())
            .characters(&['{', '`'])
            .span_group("role"),
    ]
}
