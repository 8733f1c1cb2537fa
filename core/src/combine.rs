//! Merges author-sourced documents with full-text hits on one score scale.
//!
//! | source | base | bonus |
//! |---|---|---|
//! | by a matched author | 1,000,000 | +10,000 if the title contains the leftover terms |
//! | full-text hit | 100 | +1,000,000 if by the top author, +10,000 as above |
//!
//! A document found both ways keeps the larger score.

use crate::authors::AuthorMatcher;
use crate::{Document, SearchResult};
use std::collections::HashMap;

const AUTHOR_BASE: f64 = 1_000_000.0;
const TEXT_BASE: f64 = 100.0;
const TOP_AUTHOR_BOOST: f64 = 1_000_000.0;
const TITLE_BONUS: f64 = 10_000.0;

pub struct Combiner<'a> {
    ranks: &'a AuthorMatcher,
    top_author: &'a str,
    leftover: String,
}

impl<'a> Combiner<'a> {
    /// `leftover` holds the query words outside the top author's name.
    pub fn new(ranks: &'a AuthorMatcher, top_author: &'a str, leftover: &[String]) -> Self {
        Self { ranks, top_author, leftover: leftover.join(" ").to_lowercase() }
    }

    fn title_bonus(&self, doc: &Document) -> f64 {
        if !self.leftover.is_empty() && doc.title.to_lowercase().contains(&self.leftover) {
            TITLE_BONUS
        } else {
            0.0
        }
    }

    pub fn combine(&self, author_docs: Vec<Document>, text_docs: Vec<Document>) -> Vec<SearchResult> {
        let mut scored: HashMap<String, (Document, f64)> = HashMap::new();
        let mut keep_max = |doc: Document, score: f64| {
            scored
                .entry(doc.key())
                .and_modify(|slot| {
                    if score > slot.1 { slot.1 = score; }
                })
                .or_insert((doc, score));
        };

        for doc in author_docs {
            let score = AUTHOR_BASE + self.title_bonus(&doc);
            keep_max(doc, score);
        }
        for doc in text_docs {
            let mut score = TEXT_BASE + self.title_bonus(&doc);
            if doc.author.to_lowercase() == self.top_author.to_lowercase() {
                score += TOP_AUTHOR_BOOST;
            }
            keep_max(doc, score);
        }

        let mut results: Vec<(String, SearchResult)> = scored
            .into_iter()
            .map(|(key, (document, score))| (key, SearchResult { document, score }))
            .collect();
        results.sort_by(|(ka, a), (kb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    self.ranks
                        .sort_rank(&a.document.author)
                        .cmp(&self.ranks.sort_rank(&b.document.author))
                })
                .then_with(|| ka.cmp(kb))
        });
        results.into_iter().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(author: &str, title: &str) -> Document {
        Document::new(author, title, vec!["line".to_string()])
    }

    #[test]
    fn author_docs_outrank_text_hits() {
        let ranks = AuthorMatcher::default();
        let leftover = vec!["hope".to_string()];
        let c = Combiner::new(&ranks, "Emily Dickinson", &leftover);
        let out = c.combine(
            vec![doc("Emily Dickinson", "Hope is the thing with feathers"), doc("Emily Dickinson", "A Bird came down")],
            vec![doc("Alexander Pope", "Hope"), doc("Emily Dickinson", "Hope is the thing with feathers")],
        );
        let ranked: Vec<(&str, f64)> = out.iter().map(|r| (r.document.title.as_str(), r.score)).collect();
        assert_eq!(
            ranked,
            vec![
                ("Hope is the thing with feathers", 1_010_100.0),
                ("A Bird came down", 1_000_000.0),
                ("Hope", 10_100.0),
            ]
        );
    }

    #[test]
    fn ties_follow_author_rank() {
        let ranks = AuthorMatcher::default();
        let c = Combiner::new(&ranks, "John Keats", &[]);
        let out = c.combine(vec![doc("John Clare", "Z"), doc("John Milton", "Y"), doc("John Keats", "X")], vec![]);
        let authors: Vec<&str> = out.iter().map(|r| r.document.author.as_str()).collect();
        assert_eq!(authors, vec!["John Keats", "John Milton", "John Clare"]);
        assert!(out.iter().all(|r| r.score == 1_000_000.0));
    }

    #[test]
    fn duplicates_collapse_by_key() {
        let ranks = AuthorMatcher::default();
        let c = Combiner::new(&ranks, "Walt Whitman", &[]);
        let out = c.combine(vec![doc("Walt Whitman", "Song of Myself")], vec![doc("walt whitman", "SONG OF MYSELF")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 1_000_100.0);
        assert_eq!(out[0].document.title, "Song of Myself");
    }
}
