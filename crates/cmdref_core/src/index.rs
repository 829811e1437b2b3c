use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::runtime::normalize_for_display;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const DEFAULT_SEARCH_LIMIT: usize = 100;
pub const MAX_FILTER_CHARS: usize = 100;
pub const MAX_QUERY_CHARS: usize = 200;
const MAX_PAGE_BYTES: u64 = 50 * 1024 * 1024;
const MAX_TITLE_CHARS: usize = 200;
const MAX_CODE_CHARS: usize = 1000;
const COMMAND_BLOCK_CLASS: &str = "command-block";

static CLASS_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\sclass\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("class attribute pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandEntry {
    pub title: String,
    pub code: String,
    pub file: String,
}

impl CommandEntry {
    fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.code.to_lowercase().contains(needle_lower)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub total: usize,
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub file: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub total_results: usize,
    pub results: Vec<CommandEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_commands: usize,
    pub total_files: usize,
    pub by_file: BTreeMap<String, usize>,
    pub files: Vec<String>,
    pub built_at_unix: u64,
}

/// Command blocks scraped from the reference pages.
///
/// Built once and never mutated; call [`CommandIndex::build`] again to pick up
/// edits to the pages.
#[derive(Debug, Clone, Default)]
pub struct CommandIndex {
    entries: Vec<CommandEntry>,
    files: Vec<String>,
    built_at_unix: u64,
}

impl CommandIndex {
    pub fn build(pages: &[PathBuf]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut files = Vec::new();
        for page in pages {
            let Some(content) = read_page(page)? else {
                continue;
            };
            let file = file_name(page);
            let extracted = extract_commands(&content, &file);
            debug!(file = %file, commands = extracted.len(), "indexed page");
            entries.extend(extracted);
            files.push(file);
        }
        Ok(Self::from_entries(entries, files))
    }

    pub fn from_entries(entries: Vec<CommandEntry>, files: Vec<String>) -> Self {
        Self {
            entries,
            files,
            built_at_unix: now_unix(),
        }
    }

    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive substring filter over titles and code.
    pub fn list(&self, filter: Option<&str>, limit: Option<usize>) -> Result<ListResult> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let filter = filter.map(str::trim).filter(|value| !value.is_empty());
        let Some(filter) = filter else {
            return Ok(ListResult {
                total: self.entries.len(),
                commands: self.entries.iter().take(limit).cloned().collect(),
            });
        };
        if filter.chars().count() > MAX_FILTER_CHARS {
            bail!("filter term too long (max {MAX_FILTER_CHARS} characters)");
        }

        let needle = filter.to_lowercase();
        let matched = self
            .entries
            .iter()
            .filter(|entry| entry.matches(&needle))
            .collect::<Vec<_>>();
        Ok(ListResult {
            total: matched.len(),
            commands: matched.into_iter().take(limit).cloned().collect(),
        })
    }

    pub fn search(&self, request: &SearchQuery) -> Result<SearchResult> {
        let query = request
            .query
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if query.chars().count() > MAX_QUERY_CHARS {
            bail!("query too long (max {MAX_QUERY_CHARS} characters)");
        }

        let file_filter = match request.file.as_deref().map(str::trim) {
            Some(file) if !file.is_empty() => {
                let base = file_name(Path::new(file));
                if !base.ends_with(".html") {
                    bail!("invalid file filter: {file} (expected an .html page)");
                }
                Some(base)
            }
            _ => None,
        };

        let needle = query.to_lowercase();
        let matched = self
            .entries
            .iter()
            .filter(|entry| file_filter.as_deref().is_none_or(|file| entry.file == file))
            .filter(|entry| needle.is_empty() || entry.matches(&needle))
            .collect::<Vec<_>>();

        Ok(SearchResult {
            query,
            total_results: matched.len(),
            results: matched
                .into_iter()
                .take(request.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
                .cloned()
                .collect(),
        })
    }

    pub fn stats(&self) -> IndexStats {
        let mut by_file: BTreeMap<String, usize> =
            self.files.iter().map(|file| (file.clone(), 0)).collect();
        for entry in &self.entries {
            *by_file.entry(entry.file.clone()).or_insert(0) += 1;
        }
        IndexStats {
            total_commands: self.entries.len(),
            total_files: self.files.len(),
            by_file,
            files: self.files.clone(),
            built_at_unix: self.built_at_unix,
        }
    }
}

/// Every `.html` file under `root`, sorted by path.
pub fn discover_pages(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pages = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("html") {
            continue;
        }
        pages.push(entry.into_path());
    }
    pages.sort();
    Ok(pages)
}

/// Unreadable, oversized, empty or non-HTML pages are skipped with a warning.
fn read_page(path: &Path) -> Result<Option<String>> {
    let shown = normalize_for_display(path);
    if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
        warn!(path = %shown, "skipping non-HTML file");
        return Ok(None);
    }
    if !path.is_file() {
        warn!(path = %shown, "page not found");
        return Ok(None);
    }
    let size = fs::metadata(path)
        .with_context(|| format!("failed to inspect {}", path.display()))?
        .len();
    if size > MAX_PAGE_BYTES {
        warn!(path = %shown, bytes = size, "page too large, skipping");
        return Ok(None);
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            warn!(path = %shown, %error, "failed to read page");
            return Ok(None);
        }
    };
    if content.trim().is_empty() {
        warn!(path = %shown, "empty page");
        return Ok(None);
    }
    Ok(Some(content))
}

/// Pulls `(title, code)` pairs out of `<div class="command-block">` elements:
/// the first `<h4>` after the div opens, then the first `<code>` after that.
pub fn extract_commands(html: &str, file: &str) -> Vec<CommandEntry> {
    let mut output = Vec::new();
    let mut index = 0usize;

    while let Some(div_start) = find_tag_start(html, "div", index) {
        let Some(div_end) = find_tag_end(html, div_start) else {
            break;
        };
        index = div_end + 1;
        if !has_class(&html[div_start..=div_end], COMMAND_BLOCK_CLASS) {
            continue;
        }

        let Some((title_raw, after_title)) = element_text(html, "h4", index) else {
            break;
        };
        let Some((code_raw, after_code)) = element_text(html, "code", after_title) else {
            break;
        };
        index = after_code;

        let title = clean_text(title_raw);
        let code = clean_text(code_raw);
        if title.is_empty() || code.is_empty() {
            continue;
        }
        if title.chars().count() >= MAX_TITLE_CHARS || code.chars().count() >= MAX_CODE_CHARS {
            continue;
        }
        output.push(CommandEntry {
            title,
            code,
            file: file.to_string(),
        });
    }

    output
}

/// Inner markup of the first `<tag>` at or after `start`, and the offset just
/// past its closing tag.
fn element_text<'a>(html: &'a str, tag_name: &str, start: usize) -> Option<(&'a str, usize)> {
    let open = find_tag_start(html, tag_name, start)?;
    let open_end = find_tag_end(html, open)?;
    let closing = format!("</{tag_name}>");
    let close = index_of_ignore_case(html, &closing, open_end + 1)?;
    Some((&html[open_end + 1..close], close + closing.len()))
}

fn clean_text(raw: &str) -> String {
    decode_html(&strip_tags(raw)).trim().to_string()
}

fn strip_tags(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => output.push(ch),
            _ => {}
        }
    }
    output
}

fn has_class(tag_raw: &str, class: &str) -> bool {
    CLASS_ATTRIBUTE.captures(tag_raw).is_some_and(|captures| {
        captures
            .iter()
            .skip(1)
            .flatten()
            .next()
            .is_some_and(|value| value.as_str().split_whitespace().any(|token| token == class))
    })
}

fn find_tag_start(html: &str, tag_name: &str, start: usize) -> Option<usize> {
    let mut index = start;
    while index < html.len() {
        let lt = html[index..].find('<')?;
        let at = index + lt;
        if is_tag_at(html, at, tag_name) {
            return Some(at);
        }
        index = at + 1;
    }
    None
}

fn is_tag_at(html: &str, at: usize, tag_name: &str) -> bool {
    let bytes = html.as_bytes();
    if bytes.get(at).copied() != Some(b'<') {
        return false;
    }
    let mut index = at + 1;
    if index >= bytes.len() || bytes[index] == b'/' {
        return false;
    }
    for expected in tag_name.as_bytes() {
        let Some(actual) = bytes.get(index) else {
            return false;
        };
        if !actual.eq_ignore_ascii_case(expected) {
            return false;
        }
        index += 1;
    }
    matches!(
        bytes.get(index).copied(),
        Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'>') | Some(b'/')
    )
}

fn find_tag_end(html: &str, start: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    let mut index = start;
    let mut quote = None::<u8>;
    while index < bytes.len() {
        let byte = bytes[index];
        if let Some(active) = quote {
            if byte == active {
                quote = None;
            }
            index += 1;
            continue;
        }
        if byte == b'"' || byte == b'\'' {
            quote = Some(byte);
        } else if byte == b'>' {
            return Some(index);
        }
        index += 1;
    }
    None
}

fn index_of_ignore_case(text: &str, search: &str, start: usize) -> Option<usize> {
    let text_bytes = text.as_bytes();
    let search_bytes = search.as_bytes();
    if search_bytes.is_empty() {
        return Some(start);
    }
    if search_bytes.len() > text_bytes.len() || start >= text_bytes.len() {
        return None;
    }
    let last_start = text_bytes.len() - search_bytes.len();
    (start..=last_start).find(|index| {
        text_bytes[*index..*index + search_bytes.len()].eq_ignore_ascii_case(search_bytes)
    })
}

fn decode_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
