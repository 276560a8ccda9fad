//! Section-aware document splitter.
//!
//! Pure and deterministic: the same `(content, options)` always yields the
//! same chunk sequence in the same order. A heading stack tracks enclosing
//! markdown-style headings (`#`, `##`, ...) so each chunk carries the title
//! chain of sections it falls under; within a section, paragraphs are
//! packed up to a token budget and oversized paragraphs fall back to a
//! sliding window.

/// Rough token estimate: whitespace-delimited word count, the same
/// approximation the teacher's chunker uses for its token budget.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

pub const DEFAULT_TOKEN_BUDGET: usize = 512;
const SLIDING_WINDOW_OVERLAP_WORDS: usize = 20;

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub token_budget: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self { token_budget: DEFAULT_TOKEN_BUDGET }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitChunk {
    pub content: String,
    pub title_chain: Vec<String>,
}

struct Section {
    title_chain: Vec<String>,
    body: String,
}

fn heading_level(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = trimmed[hashes..].trim_start();
    if rest.is_empty() {
        return None;
    }
    Some((hashes, rest))
}

/// Splits `content` into sections by walking a heading stack; a document
/// with no headings becomes a single section with an empty title chain.
fn into_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut body = String::new();

    let flush = |stack: &[(usize, String)], body: &mut String, sections: &mut Vec<Section>| {
        if !body.trim().is_empty() {
            sections.push(Section {
                title_chain: stack.iter().map(|(_, t)| t.clone()).collect(),
                body: std::mem::take(body),
            });
        } else {
            body.clear();
        }
    };

    for line in content.lines() {
        if let Some((level, title)) = heading_level(line) {
            flush(&stack, &mut body, &mut sections);
            while stack.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                stack.pop();
            }
            stack.push((level, title.to_string()));
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }
    flush(&stack, &mut body, &mut sections);
    sections
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .collect()
}

/// Sliding window over whitespace-delimited words for a single paragraph
/// that alone exceeds `token_budget`.
fn sliding_window(paragraph: &str, token_budget: usize) -> Vec<String> {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let step = token_budget.saturating_sub(SLIDING_WINDOW_OVERLAP_WORDS).max(1);
    let mut out = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + token_budget).min(words.len());
        out.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    out
}

/// Packs paragraphs into chunks up to `token_budget` estimated tokens each,
/// windowing any paragraph that alone exceeds the budget.
fn pack_paragraphs(paragraphs: Vec<String>, token_budget: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for paragraph in paragraphs {
        let tokens = estimate_tokens(&paragraph);
        if tokens > token_budget {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            chunks.extend(sliding_window(&paragraph, token_budget));
            continue;
        }
        if current_tokens + tokens > token_budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
        current_tokens += tokens;
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Splits `content` into ordered chunks, each carrying the title chain of
/// the section it came from.
pub fn split(content: &str, options: &SplitOptions) -> Vec<SplitChunk> {
    let mut out = Vec::new();
    for section in into_sections(content) {
        let paragraphs = split_paragraphs(&section.body);
        for chunk_text in pack_paragraphs(paragraphs, options.token_budget) {
            out.push(SplitChunk {
                content: chunk_text,
                title_chain: section.title_chain.clone(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_text_gets_empty_title_chain() {
        let chunks = split("first paragraph.\n\nsecond paragraph.", &SplitOptions::default());
        assert!(chunks.iter().all(|c| c.title_chain.is_empty()));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn headings_build_a_title_chain() {
        let doc = "# Intro\n\nhello world\n\n## Details\n\nmore text here\n";
        let chunks = split(doc, &SplitOptions::default());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].title_chain, vec!["Intro".to_string()]);
        assert_eq!(chunks[1].title_chain, vec!["Intro".to_string(), "Details".to_string()]);
    }

    #[test]
    fn sibling_headings_do_not_nest() {
        let doc = "# A\n\ntext a\n\n# B\n\ntext b\n";
        let chunks = split(doc, &SplitOptions::default());
        assert_eq!(chunks[0].title_chain, vec!["A".to_string()]);
        assert_eq!(chunks[1].title_chain, vec!["B".to_string()]);
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sliding_window() {
        let long_paragraph = (0..2000).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = split(&long_paragraph, &SplitOptions { token_budget: 100 });
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(estimate_tokens(&chunk.content) <= 100);
        }
    }

    #[test]
    fn split_is_deterministic() {
        let doc = "# Intro\n\npara one\n\npara two\n\n## Sub\n\npara three\n";
        let a = split(doc, &SplitOptions::default());
        let b = split(doc, &SplitOptions::default());
        assert_eq!(a, b);
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(split("", &SplitOptions::default()).is_empty());
        assert!(split("   \n\n  ", &SplitOptions::default()).is_empty());
    }

    #[test]
    fn chunk_order_follows_document_order() {
        let doc = "# One\n\nfirst\n\n# Two\n\nsecond\n\n# Three\n\nthird\n";
        let chunks = split(doc, &SplitOptions::default());
        let titles: Vec<_> = chunks.iter().map(|c| c.title_chain[0].clone()).collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    proptest! {
        #[test]
        fn split_is_deterministic_for_any_content(content in "[a-zA-Z0-9 \n#.,]{0,500}", budget in 16usize..200) {
            let options = SplitOptions { token_budget: budget };
            let a = split(&content, &options);
            let b = split(&content, &options);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn chunks_never_exceed_the_token_budget(content in "[a-zA-Z0-9 \n#.,]{0,500}", budget in 16usize..200) {
            let options = SplitOptions { token_budget: budget };
            for chunk in split(&content, &options) {
                prop_assert!(estimate_tokens(&chunk.content) <= budget);
            }
        }
    }
}
