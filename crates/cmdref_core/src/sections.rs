use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SECTION_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.\s*(.+)").expect("section heading pattern is valid")
});

/// Which letters may open a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LetterRule {
    #[default]
    Any,
    Lowercase,
    None,
}

/// Decides which lines inside a section are commands.
///
/// Only the first non-whitespace character and a list of ignored prefixes are
/// consulted, so prose that happens to start with a letter is still accepted.
/// Tighten `letters` or add `skip_prefixes` when that matters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LineClassifier {
    pub letters: LetterRule,
    pub leading: Vec<String>,
    pub skip_prefixes: Vec<String>,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self {
            letters: LetterRule::Any,
            leading: vec!["/".to_string(), ".".to_string(), "~".to_string()],
            skip_prefixes: Vec::new(),
        }
    }
}

impl LineClassifier {
    pub fn is_command(&self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let Some(first) = trimmed.chars().next() else {
            return false;
        };
        if self
            .skip_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && trimmed.starts_with(prefix.as_str()))
        {
            return false;
        }
        let letter_ok = match self.letters {
            LetterRule::Any => first.is_ascii_alphabetic(),
            LetterRule::Lowercase => first.is_ascii_lowercase(),
            LetterRule::None => false,
        };
        letter_ok
            || self
                .leading
                .iter()
                .any(|lead| !lead.is_empty() && trimmed.starts_with(lead.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub number: u32,
    pub title: String,
    pub lines: Vec<String>,
}

/// Numbered sections of the master document, ordered by number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Sections {
    by_number: BTreeMap<u32, Section>,
}

impl Sections {
    pub fn get(&self, number: u32) -> Option<&Section> {
        self.by_number.get(&number)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Section> {
        self.by_number.values()
    }

    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_number.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn total_lines(&self) -> usize {
        self.by_number.values().map(|section| section.lines.len()).sum()
    }
}

/// Returns the section number when `line` is a numbered heading such as `3. Networking`.
pub fn parse_heading(line: &str) -> Option<(u32, &str)> {
    let captures = SECTION_HEADING.captures(line)?;
    let number = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let title = captures.get(2)?.as_str().trim();
    Some((number, title))
}

pub fn parse_sections(text: &str, classifier: &LineClassifier) -> Sections {
    let mut by_number: BTreeMap<u32, Section> = BTreeMap::new();
    let mut current = None::<u32>;

    for line in text.lines() {
        if let Some((number, title)) = parse_heading(line) {
            by_number.entry(number).or_insert_with(|| Section {
                number,
                title: title.to_string(),
                lines: Vec::new(),
            });
            current = Some(number);
            continue;
        }
        let Some(number) = current else {
            continue;
        };
        if !classifier.is_command(line) {
            continue;
        }
        if let Some(section) = by_number.get_mut(&number) {
            section.lines.push(line.trim_end().to_string());
        }
    }

    Sections { by_number }
}

#[cfg(test)]
mod tests {
    use super::{LetterRule, LineClassifier, parse_heading, parse_sections};

    const MASTER: &str = "\
Command Summary
ls ignored before any heading

1. File System
ls -la  # list all files
  cd /var/log   # indented
# Subsection header
/usr/bin/env
./configure
~/bin/tool
123 not a command
-x not a command

2. Processes
uptime
";

    #[test]
    fn parse_heading_extracts_number_and_title() {
        assert_eq!(parse_heading("3. Networking"), Some((3, "Networking")));
        assert_eq!(parse_heading("12.Docker"), Some((12, "Docker")));
        assert_eq!(parse_heading("3."), None);
        assert_eq!(parse_heading(" 3. Indented"), None);
        assert_eq!(parse_heading("99999999999. Overflow"), None);
    }

    #[test]
    fn parse_sections_groups_command_lines() {
        let sections = parse_sections(MASTER, &LineClassifier::default());
        assert_eq!(sections.len(), 2);

        let first = sections.get(1).expect("section 1");
        assert_eq!(first.title, "File System");
        assert_eq!(
            first.lines,
            vec![
                "ls -la  # list all files",
                "  cd /var/log   # indented",
                "/usr/bin/env",
                "./configure",
                "~/bin/tool",
            ]
        );
        assert_eq!(sections.get(2).expect("section 2").lines, vec!["uptime"]);
        assert_eq!(sections.total_lines(), 6);
    }

    #[test]
    fn lines_before_first_heading_are_discarded() {
        let sections = parse_sections("ls\npwd\n", &LineClassifier::default());
        assert!(sections.is_empty());
    }

    #[test]
    fn repeated_heading_keeps_collected_lines() {
        let text = "1. Files\nls\n2. Other\nps\n1. Files again\npwd\n";
        let sections = parse_sections(text, &LineClassifier::default());
        let first = sections.get(1).expect("section 1");
        assert_eq!(first.lines, vec!["ls", "pwd"]);
        assert_eq!(first.title, "Files");
        assert_eq!(sections.numbers().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn heading_without_commands_is_kept_empty() {
        let sections = parse_sections("4. Empty\n\n# nothing here\n", &LineClassifier::default());
        assert!(sections.get(4).expect("section 4").lines.is_empty());
    }

    #[test]
    fn classifier_rules_are_configurable() {
        let lowercase = LineClassifier {
            letters: LetterRule::Lowercase,
            ..LineClassifier::default()
        };
        assert!(lowercase.is_command("ls"));
        assert!(!lowercase.is_command("Note this"));

        let strict = LineClassifier {
            letters: LetterRule::None,
            leading: vec!["$ ".to_string()],
            skip_prefixes: Vec::new(),
        };
        assert!(strict.is_command("$ ls"));
        assert!(!strict.is_command("ls"));

        let skipping = LineClassifier {
            skip_prefixes: vec!["note:".to_string()],
            ..LineClassifier::default()
        };
        assert!(!skipping.is_command("  note: remember to sudo"));
        assert!(skipping.is_command("sudo ls"));
        assert!(!skipping.is_command("   "));
    }
}
