use crate::index::{BuildOutcome, IndexBuilder};
use crate::persist::CorpusStore;
use crate::tokenizer::words;
use crate::SearchResult;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    pub text: String,
    /// Also matches every indexed term starting with `text`.
    pub prefix: bool,
}

impl QueryTerm {
    fn new(text: String) -> Self {
        let prefix = text.chars().count() > 2;
        Self { text, prefix }
    }
}

/// A whitespace-tokenized query expanded into single-word, bigram and whole-phrase terms.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    terms: Vec<QueryTerm>,
}

impl ParsedQuery {
    pub fn parse(query: &str) -> Self {
        let tokens: Vec<String> = query.split_whitespace().flat_map(words).collect();
        let mut terms: Vec<QueryTerm> = Vec::with_capacity(tokens.len() * 2 + 1);
        let mut push = |term: QueryTerm| {
            if !terms.contains(&term) {
                terms.push(term);
            }
        };

        for token in &tokens {
            push(QueryTerm::new(token.clone()));
        }
        if tokens.len() > 1 {
            let phrase = tokens.join(" ");
            for pair in tokens.windows(2) {
                let bigram = pair.join(" ");
                if bigram != phrase {
                    push(QueryTerm { text: bigram, prefix: false });
                }
            }
            push(QueryTerm::new(phrase));
        }
        Self { terms }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }
}

/// Free-text search over the builder's current snapshot.
pub struct QueryEngine {
    corpus: Arc<CorpusStore>,
    index: Arc<IndexBuilder>,
}

impl QueryEngine {
    pub fn new(corpus: Arc<CorpusStore>, index: Arc<IndexBuilder>) -> Self {
        Self { corpus, index }
    }

    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let parsed = ParsedQuery::parse(query);
        if parsed.is_empty() {
            tracing::debug!("empty search query");
            return Vec::new();
        }

        let snapshot = match self.index.current() {
            Some(snapshot) if !self.index.is_stale(&snapshot) => snapshot,
            Some(stale) => {
                // one caller rebuilds; the rest search the old snapshot meanwhile
                tracing::debug!(built_at = %stale.built_at(), "search index stale, rebuilding");
                self.index.ensure_index(&self.corpus);
                self.index.current().unwrap_or(stale)
            }
            None => {
                if !self.corpus.is_available() {
                    tracing::debug!("cannot search, no data available");
                    return Vec::new();
                }
                tracing::debug!("search index not ready, building on demand");
                if self.index.ensure_index(&self.corpus) == BuildOutcome::InFlight {
                    self.index.wait_idle();
                }
                match self.index.current() {
                    Some(snapshot) => snapshot,
                    None => {
                        tracing::debug!("search index still not ready");
                        return Vec::new();
                    }
                }
            }
        };

        let results = snapshot.search(&parsed);
        tracing::debug!(query, hits = results.len(), "full text search");
        results
    }

    pub fn index(&self) -> &Arc<IndexBuilder> {
        &self.index
    }
}
