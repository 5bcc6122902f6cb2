//! Citation merging.
//!
//! Results are walked in unit creation order. The first occurrence of a URL
//! takes the next index from 1 and later occurrences reuse it, so indices are
//! dense and unique by construction.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::domain::{Citation, MergedReport, ResearchUnit, UnitResult};
use crate::prompts;

static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("valid regex"));

/// Assigns global indices to URLs in first-seen order.
#[derive(Debug, Default)]
struct CitationRegistry {
    by_url: HashMap<String, usize>,
    citations: Vec<Citation>,
}

impl CitationRegistry {
    fn index_for(&mut self, url: &str, title: &str) -> usize {
        let url = url.trim();
        if let Some(&index) = self.by_url.get(url) {
            return index;
        }
        let index = self.citations.len() + 1;
        self.by_url.insert(url.to_string(), index);
        self.citations.push(Citation {
            index,
            url: url.to_string(),
            title: title.trim().to_string(),
        });
        index
    }
}

/// Rewrite local `[k]` markers using `mapping[k - 1]`. Out-of-range markers
/// are left as written.
fn renumber(text: &str, mapping: &[usize]) -> String {
    MARKER
        .replace_all(text, |caps: &Captures| {
            let local = caps[1].parse::<usize>().ok();
            match local.and_then(|k| k.checked_sub(1)).and_then(|i| mapping.get(i)) {
                Some(global) => format!("[{global}]"),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Merge unit results into one report with globally numbered citations.
///
/// `units` fixes the traversal order; results for units that are missing
/// (failed or blocked) are skipped.
pub fn merge(units: &[ResearchUnit], results: &[UnitResult]) -> MergedReport {
    let by_unit: HashMap<&str, &UnitResult> =
        results.iter().map(|r| (r.unit_id.as_str(), r)).collect();

    let mut registry = CitationRegistry::default();
    let mut sections = Vec::new();

    for unit in units {
        let Some(result) = by_unit.get(unit.id.as_str()) else {
            continue;
        };
        let mapping: Vec<usize> = result
            .citations
            .iter()
            .map(|s| registry.index_for(&s.url, &s.title))
            .collect();
        sections.push(format!(
            "## {}\n\n{}",
            unit.sub_question.trim(),
            renumber(result.raw_findings.trim(), &mapping)
        ));
    }

    let citations = registry.citations;
    debug_assert!(citations_are_dense(&citations));

    let mut text = if sections.is_empty() {
        prompts::NO_FINDINGS.to_string()
    } else {
        sections.join("\n\n")
    };
    if !citations.is_empty() {
        text.push_str("\n\n### Sources\n\n");
        for c in &citations {
            text.push_str(&format!("[{}] {}: {}\n", c.index, c.title, c.url));
        }
    }

    MergedReport { text, citations }
}

/// Whether indices are exactly `1..=N` in order and every URL appears once.
pub fn citations_are_dense(citations: &[Citation]) -> bool {
    let indices_ok = citations
        .iter()
        .enumerate()
        .all(|(i, c)| c.index == i + 1);
    let mut urls: Vec<&str> = citations.iter().map(|c| c.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    indices_ok && urls.len() == citations.len()
}
