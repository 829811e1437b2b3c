use std::collections::BTreeMap;
use std::ops::{Range, RangeInclusive};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

static NEXT_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<h2[^>]*>").expect("heading pattern is valid"));
static OPENING_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<pre(?:\s[^>]*)?>\s*<code(?:\s[^>]*)?>").expect("fence pattern is valid")
});
static CLOSING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</code>\s*</pre>").expect("fence pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpliceOutcome {
    /// No `<h2>` for this section number; the document was left alone.
    NoHeading,
    Replaced,
    Inserted,
}

impl SpliceOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoHeading => "no_heading",
            Self::Replaced => "replaced",
            Self::Inserted => "inserted",
        }
    }
}

/// Byte spans of one section inside a target document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub heading: Range<usize>,
    /// From the end of the heading to the next `<h2`, or end of document.
    pub body: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSplice {
    pub number: u32,
    pub outcome: SpliceOutcome,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSplice {
    pub text: String,
    pub sections: Vec<SectionSplice>,
    pub changed: bool,
}

fn heading_pattern(number: u32) -> Result<Regex> {
    let number = regex::escape(&number.to_string());
    Regex::new(&format!(
        r"(?i)<h2[^>]*>\s*(?:<[a-z][^>]*>\s*)*{number}\.[\s\S]*?</h2>"
    ))
    .with_context(|| format!("failed to build heading pattern for section {number}"))
}

pub fn locate_region(html: &str, number: u32) -> Result<Option<Region>> {
    let pattern = heading_pattern(number)?;
    let Some(heading) = pattern.find(html) else {
        return Ok(None);
    };
    let start = heading.end();
    let end = NEXT_HEADING
        .find(&html[start..])
        .map(|next| start + next.start())
        .unwrap_or(html.len());
    Ok(Some(Region {
        heading: heading.range(),
        body: start..end,
    }))
}

/// Span of the existing code block inside a region body, relative to the body.
///
/// Runs from the first opening fence to the last closing fence after it, so
/// several legacy blocks in one region collapse into one.
fn fenced_span(body: &str) -> Option<Range<usize>> {
    let open = OPENING_FENCE.find(body)?;
    let close = CLOSING_FENCE.find_iter(&body[open.end()..]).last()?;
    Some(open.start()..open.end() + close.end())
}

pub fn splice_section(html: &str, number: u32, block: &str) -> Result<(String, SpliceOutcome)> {
    let Some(region) = locate_region(html, number)? else {
        return Ok((html.to_string(), SpliceOutcome::NoHeading));
    };

    let body = &html[region.body.clone()];
    let mut output = String::with_capacity(html.len() + block.len() + 1);
    let outcome = match fenced_span(body) {
        Some(span) => {
            let start = region.body.start + span.start;
            let end = region.body.start + span.end;
            output.push_str(&html[..start]);
            output.push_str(block);
            output.push_str(&html[end..]);
            SpliceOutcome::Replaced
        }
        None => {
            output.push_str(&html[..region.body.start]);
            output.push('\n');
            output.push_str(block);
            output.push_str(&html[region.body.start..]);
            SpliceOutcome::Inserted
        }
    };
    Ok((output, outcome))
}

/// Splices every block whose section falls in `owned` into `html`, in
/// ascending section order. Only sections that have a block are visited.
pub fn splice_document(
    html: &str,
    owned: RangeInclusive<u32>,
    blocks: &BTreeMap<u32, String>,
) -> Result<DocumentSplice> {
    let mut text = html.to_string();
    let mut sections = Vec::new();
    for (&number, block) in blocks
        .iter()
        .filter(|(number, _)| owned.contains(*number))
    {
        let (next, outcome) = splice_section(&text, number, block)?;
        let changed = next != text;
        match outcome {
            SpliceOutcome::NoHeading => info!(section = number, "no match"),
            _ => debug!(section = number, outcome = outcome.as_str(), changed, "spliced"),
        }
        sections.push(SectionSplice {
            number,
            outcome,
            changed,
        });
        text = next;
    }

    let changed = text != html;
    Ok(DocumentSplice {
        text,
        sections,
        changed,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{SpliceOutcome, locate_region, splice_document, splice_section};

    const BLOCK: &str = "<pre><code>\nip addr\nss -tulpn\n</code></pre>";

    const PAGE: &str = r#"<html><body>
<h1>Reference</h1>
<h2 id="s2">2. Processes</h2>
<p>ps stuff</p>
<h2 id="s3">3. Networking</h2>
<p>Intro</p>
<pre><code class="bash">
ifconfig
</code></pre>
<p>Outro</p>
<h2 id="s4">4. Storage</h2>
<pre><code>
df -h
</code></pre>
</body></html>
"#;

    #[test]
    fn locate_region_spans_to_next_heading() {
        let region = locate_region(PAGE, 3).expect("locate").expect("found");
        assert!(PAGE[region.heading.clone()].contains("3. Networking"));
        let body = &PAGE[region.body.clone()];
        assert!(body.contains("ifconfig"));
        assert!(!body.contains("df -h"));
        assert!(PAGE[region.body.end..].starts_with("<h2 id=\"s4\">"));
    }

    #[test]
    fn locate_region_does_not_confuse_prefix_numbers() {
        let html = "<h2>10. Ten</h2>x<h2>1. One</h2>y";
        let region = locate_region(html, 1).expect("locate").expect("found");
        assert_eq!(&html[region.body.clone()], "y");
        assert!(locate_region(html, 0).expect("locate").is_none());
    }

    #[test]
    fn locate_region_accepts_case_and_inline_tags() {
        let html = "<H2 class=\"t\">\n  <span>7. Cron</span></H2>body";
        let region = locate_region(html, 7).expect("locate").expect("found");
        assert_eq!(&html[region.body.clone()], "body");
    }

    #[test]
    fn stale_block_is_replaced_and_surroundings_kept() {
        let (updated, outcome) = splice_section(PAGE, 3, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::Replaced);

        let heading_end =
            PAGE.find("3. Networking</h2>").expect("heading") + "3. Networking</h2>".len();
        let next_heading = PAGE.find("<h2 id=\"s4\">").expect("next heading");
        assert_eq!(&updated[..heading_end], &PAGE[..heading_end]);
        let tail = &PAGE[next_heading..];
        assert!(updated.ends_with(tail));
        assert!(updated.contains(
            "<p>Intro</p>\n<pre><code>\nip addr\nss -tulpn\n</code></pre>\n<p>Outro</p>"
        ));
        assert!(!updated.contains("ifconfig"));
    }

    #[test]
    fn missing_block_is_inserted_after_heading() {
        let (updated, outcome) = splice_section(PAGE, 2, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::Inserted);
        assert!(updated.contains(&format!("2. Processes</h2>\n{BLOCK}\n<p>ps stuff</p>")));
    }

    #[test]
    fn missing_heading_leaves_document_alone() {
        let (updated, outcome) = splice_section(PAGE, 9, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::NoHeading);
        assert_eq!(updated, PAGE);
    }

    #[test]
    fn multiple_blocks_collapse_into_one() {
        let html = "<h2>5. Logs</h2>\n<pre><code>a</code></pre>\n<p>mid</p>\n<pre><code>b</code></pre>\nend";
        let (updated, outcome) = splice_section(html, 5, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::Replaced);
        assert_eq!(updated, format!("<h2>5. Logs</h2>\n{BLOCK}\nend"));
    }

    #[test]
    fn closing_fence_before_opening_fence_is_ignored() {
        let html = "<h2>6. Odd</h2>\n</code></pre>\n<pre><code>unterminated";
        let (updated, outcome) = splice_section(html, 6, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::Inserted);
        assert_eq!(
            updated,
            format!("<h2>6. Odd</h2>\n{BLOCK}\n</code></pre>\n<pre><code>unterminated")
        );
    }

    #[test]
    fn splice_is_idempotent() {
        let blocks = BTreeMap::from([(2, BLOCK.to_string()), (3, BLOCK.to_string())]);
        let first = splice_document(PAGE, 1..=4, &blocks).expect("first");
        assert!(first.changed);
        let second = splice_document(&first.text, 1..=4, &blocks).expect("second");
        assert!(!second.changed);
        assert_eq!(second.text, first.text);
        assert!(second.sections.iter().all(|section| !section.changed));
    }

    #[test]
    fn splice_document_skips_numbers_without_blocks() {
        let blocks = BTreeMap::from([
            (4, "<pre><code>\ndf -h\n</code></pre>".to_string()),
            (9, BLOCK.to_string()),
        ]);
        let result = splice_document(PAGE, 1..=9, &blocks).expect("splice");
        assert!(!result.changed);
        assert_eq!(result.text, PAGE);
        let outcomes = result
            .sections
            .iter()
            .map(|section| (section.number, section.outcome))
            .collect::<Vec<_>>();
        assert_eq!(
            outcomes,
            vec![(4, SpliceOutcome::Replaced), (9, SpliceOutcome::NoHeading)]
        );
    }

    #[test]
    fn splice_document_ignores_blocks_outside_owned_range() {
        let blocks = BTreeMap::from([(2, BLOCK.to_string()), (3, BLOCK.to_string())]);
        let result = splice_document(PAGE, 3..=3, &blocks).expect("splice");
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].number, 3);
        assert!(result.text.contains("2. Processes</h2>\n<p>ps stuff</p>"));
    }

    #[test]
    fn full_width_range_only_visits_blocks() {
        let blocks = BTreeMap::from([(3, BLOCK.to_string())]);
        let result = splice_document(PAGE, 1..=u32::MAX, &blocks).expect("splice");
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].outcome, SpliceOutcome::Replaced);
    }

    #[test]
    fn attributed_pre_is_replaced_and_stays_stable() {
        let html = "<h2>3. Networking</h2>\n<pre class=\"bash\"><code>\nifconfig\n</code></pre>\n<h2>4. Next</h2>";
        let blocks = BTreeMap::from([(3, BLOCK.to_string())]);

        let first = splice_document(html, 1..=4, &blocks).expect("first");
        assert_eq!(first.sections[0].outcome, SpliceOutcome::Replaced);
        assert_eq!(
            first.text,
            format!("<h2>3. Networking</h2>\n{BLOCK}\n<h2>4. Next</h2>")
        );

        let second = splice_document(&first.text, 1..=4, &blocks).expect("second");
        assert!(!second.changed);
        assert_eq!(second.text, first.text);
    }

    #[test]
    fn fence_pattern_tolerates_whitespace_between_tags() {
        let html = "<h2>8. Spaced</h2>\n<PRE>\n  <code class=\"sh\">old</code>\n</PRE>\ntail";
        let (updated, outcome) = splice_section(html, 8, BLOCK).expect("splice");
        assert_eq!(outcome, SpliceOutcome::Replaced);
        assert_eq!(updated, format!("<h2>8. Spaced</h2>\n{BLOCK}\ntail"));
    }
}
