use std::collections::BTreeMap;

use crate::sections::Sections;

pub const DEFAULT_TARGET_COLUMN: usize = 65;
pub const FALLBACK_SPACES: usize = 2;
pub const BLOCK_OPEN: &str = "<pre><code>";
pub const BLOCK_CLOSE: &str = "</code></pre>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts<'a> {
    pub command: &'a str,
    pub comment: Option<&'a str>,
}

/// Splits a line on its first `#`. The command keeps leading indentation but
/// loses trailing whitespace; the comment is trimmed and excludes the `#`.
pub fn split_command(line: &str) -> CommandParts<'_> {
    match line.split_once('#') {
        Some((command, comment)) => CommandParts {
            command: command.trim_end(),
            comment: Some(comment.trim()),
        },
        None => CommandParts {
            command: line.trim_end(),
            comment: None,
        },
    }
}

/// Realigns a trailing comment so that `#` lands on `target_column` (1-based).
///
/// Commands too long to reach the column get exactly two spaces before `#`.
pub fn format_line(line: &str, target_column: usize) -> String {
    let parts = split_command(line);
    if parts.command.is_empty() {
        return line.to_string();
    }
    let Some(comment) = parts.comment else {
        return parts.command.to_string();
    };

    let width = parts.command.chars().count();
    let spaces = match target_column.checked_sub(width + 1) {
        Some(spaces) if spaces >= 1 => spaces,
        _ => FALLBACK_SPACES,
    };
    format!("{}{}# {comment}", parts.command, " ".repeat(spaces))
}

/// Wraps formatted lines in a single code block. Empty input yields no block.
pub fn build_block<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    if lines.is_empty() {
        return None;
    }
    let body = lines
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("{BLOCK_OPEN}\n{body}\n{BLOCK_CLOSE}"))
}

pub fn build_section_blocks(sections: &Sections, target_column: usize) -> BTreeMap<u32, String> {
    let mut blocks = BTreeMap::new();
    for section in sections.iter() {
        let formatted = section
            .lines
            .iter()
            .map(|line| format_line(line, target_column))
            .collect::<Vec<_>>();
        if let Some(block) = build_block(&formatted) {
            blocks.insert(section.number, block);
        }
    }
    blocks
}
