//! Reader for INI-style test-case descriptors.
//!
//! Section names are case-sensitive, option keys are folded to lower case.
//! Indented non-empty lines continue the previous value, joined with `\n`.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Descriptor {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Descriptor {
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSyntaxError {
    pub line: usize,
    pub kind: DescriptorSyntaxErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSyntaxErrorKind {
    MissingSectionHeader,
    MalformedSectionHeader(String),
    MissingDelimiter(String),
    EmptyKey,
}

impl Display for DescriptorSyntaxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DescriptorSyntaxErrorKind::MissingSectionHeader => write!(
                f,
                "line {}: option defined before any [SECTION] header",
                self.line
            ),
            DescriptorSyntaxErrorKind::MalformedSectionHeader(raw) => {
                write!(f, "line {}: malformed section header '{}'", self.line, raw)
            }
            DescriptorSyntaxErrorKind::MissingDelimiter(raw) => write!(
                f,
                "line {}: expected 'key = value' or 'key: value', found '{}'",
                self.line, raw
            ),
            DescriptorSyntaxErrorKind::EmptyKey => {
                write!(f, "line {}: option has an empty key", self.line)
            }
        }
    }
}

impl std::error::Error for DescriptorSyntaxError {}

pub fn parse_descriptor(source: &str) -> Result<Descriptor, DescriptorSyntaxError> {
    let mut descriptor = Descriptor::default();
    let mut current_section: Option<String> = None;
    let mut current_key: Option<String> = None;

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = raw_line.trim();

        if trimmed.is_empty() || is_comment(trimmed) {
            // A blank line ends any pending continuation.
            if trimmed.is_empty() {
                current_key = None;
            }
            continue;
        }

        let indented = raw_line.starts_with([' ', '\t']);
        if indented
            && let (Some(section), Some(key)) = (current_section.as_ref(), current_key.as_ref())
            && let Some(value) = descriptor
                .sections
                .get_mut(section)
                .and_then(|options| options.get_mut(key))
        {
            value.push('\n');
            value.push_str(trimmed);
            continue;
        }

        if trimmed.starts_with('[') {
            let Some(name) = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .map(str::trim)
                .filter(|name| !name.is_empty())
            else {
                return Err(DescriptorSyntaxError {
                    line: line_number,
                    kind: DescriptorSyntaxErrorKind::MalformedSectionHeader(trimmed.to_string()),
                });
            };
            descriptor.sections.entry(name.to_string()).or_default();
            current_section = Some(name.to_string());
            current_key = None;
            continue;
        }

        let Some(section) = current_section.as_ref() else {
            return Err(DescriptorSyntaxError {
                line: line_number,
                kind: DescriptorSyntaxErrorKind::MissingSectionHeader,
            });
        };

        let Some(delimiter) = trimmed.find(['=', ':']) else {
            return Err(DescriptorSyntaxError {
                line: line_number,
                kind: DescriptorSyntaxErrorKind::MissingDelimiter(trimmed.to_string()),
            });
        };

        let key = trimmed[..delimiter].trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(DescriptorSyntaxError {
                line: line_number,
                kind: DescriptorSyntaxErrorKind::EmptyKey,
            });
        }
        let value = strip_inline_comment(&trimmed[delimiter + 1..])
            .trim()
            .to_string();

        descriptor
            .sections
            .entry(section.clone())
            .or_default()
            .insert(key.clone(), value);
        current_key = Some(key);
    }

    Ok(descriptor)
}

fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with(';')
}

/// Drops a trailing `;` comment, but only when the first `;` in the value
/// follows whitespace.
fn strip_inline_comment(value: &str) -> &str {
    match value.find(';') {
        Some(position) if value[..position].ends_with(char::is_whitespace) => &value[..position],
        _ => value,
    }
}
