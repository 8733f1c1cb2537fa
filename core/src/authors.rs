//! Known-author reference table and query-to-author matching.

use crate::AuthorRecord;
use std::collections::{BTreeMap, HashMap};

/// Rank used for authors outside [`RANKED_AUTHORS`]: behind every ranked position, but less
/// than one word match, so an unranked author loses ties yet still wins on a stronger match.
pub const UNRANKED: u32 = 1_000;

const PAIR_MATCH: i64 = 100_000;
const WORD_MATCH: i64 = 10_000;
const FULL_NAME_BONUS: i64 = 500_000;
const MIN_MATCH: i64 = 10_000;
const RANK_OFFSET: i64 = 1_000_000;

pub const RANKED_AUTHORS: &[(&str, u32)] = &[
    ("William Shakespeare", 1),
    ("Oscar Wilde", 2),
    ("Emily Dickinson", 3),
    ("Edgar Allan Poe", 4),
    ("Walt Whitman", 5),
    ("Robert Burns", 6),
    ("Elizabeth Barrett Browning", 7),
    ("William Blake", 8),
    ("Lord Alfred Tennyson", 9),
    ("Percy Bysshe Shelley", 10),
    ("John Keats", 11),
    ("Christina Rossetti", 12),
    ("William Wordsworth", 13),
    ("Robert Browning", 14),
    ("Emily Bronte", 15),
    ("Gerard Manley Hopkins", 16),
    ("Ralph Waldo Emerson", 17),
    ("John Milton", 18),
    ("Edmund Spenser", 19),
    ("Andrew Marvell", 20),
];

pub const KNOWN_AUTHORS: &[&str] = &[
    "Adam Lindsay Gordon", "Alan Seeger", "Alexander Pope", "Algernon Charles Swinburne",
    "Ambrose Bierce", "Amy Levy", "Andrew Marvell", "Ann Taylor", "Anne Bradstreet",
    "Anne Bronte", "Anne Killigrew", "Anne Kingsmill Finch", "Annie Louisa Walker",
    "Arthur Hugh Clough", "Ben Jonson", "Charles Kingsley", "Charles Sorley",
    "Charlotte Bronte", "Charlotte Smith", "Christina Rossetti", "Christopher Marlowe",
    "Christopher Smart", "Coventry Patmore", "Edgar Allan Poe", "Edmund Spenser",
    "Edward Fitzgerald", "Edward Lear", "Edward Taylor", "Edward Thomas", "Eliza Cook",
    "Elizabeth Barrett Browning", "Emily Bronte", "Emily Dickinson", "Emma Lazarus",
    "Ernest Dowson", "Eugene Field", "Francis Thompson", "Geoffrey Chaucer",
    "George Eliot", "George Gordon, Lord Byron", "George Herbert", "George Meredith",
    "Gerard Manley Hopkins", "Helen Hunt Jackson", "Henry David Thoreau",
    "Henry Vaughan", "Henry Wadsworth Longfellow", "Hugh Henry Brackenridge",
    "Isaac Watts", "James Henry Leigh Hunt", "James Thomson", "James Whitcomb Riley",
    "Jane Austen", "Jane Taylor", "John Clare", "John Donne", "John Dryden",
    "John Greenleaf Whittier", "John Keats", "John McCrae", "John Milton",
    "John Trumbull", "John Wilmot", "Jonathan Swift", "Joseph Warton", "Joyce Kilmer",
    "Julia Ward Howe", "Jupiter Hammon", "Katherine Philips", "Lady Mary Chudleigh",
    "Lewis Carroll", "Lord Alfred Tennyson", "Louisa May Alcott",
    "Major Henry Livingston, Jr.", "Mark Twain", "Mary Elizabeth Coleridge",
    "Matthew Arnold", "Matthew Prior", "Michael Drayton", "Oliver Goldsmith",
    "Oliver Wendell Holmes", "Oscar Wilde", "Paul Laurence Dunbar",
    "Percy Bysshe Shelley", "Philip Freneau", "Phillis Wheatley",
    "Ralph Waldo Emerson", "Richard Crashaw", "Richard Lovelace", "Robert Browning",
    "Robert Burns", "Robert Herrick", "Robert Louis Stevenson", "Robert Southey",
    "Robinson", "Rupert Brooke", "Samuel Coleridge", "Samuel Johnson",
    "Sarah Flower Adams", "Sidney Lanier", "Sir John Suckling", "Sir Philip Sidney",
    "Sir Thomas Wyatt", "Sir Walter Raleigh", "Sir Walter Scott", "Stephen Crane",
    "Thomas Campbell", "Thomas Chatterton", "Thomas Flatman", "Thomas Gray",
    "Thomas Hood", "Thomas Moore", "Thomas Warton", "Walt Whitman",
    "Walter Savage Landor", "Wilfred Owen", "William Allingham", "William Barnes",
    "William Blake", "William Browne", "William Cowper", "William Cullen Bryant",
    "William Ernest Henley", "William Lisle Bowles", "William Morris",
    "William Shakespeare", "William Topaz McGonagall", "William Vaughn Moody",
    "William Wordsworth",
];

/// Lowercases and strips surrounding punctuation, so "Gordon," matches "gordon".
fn name_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorMatch {
    pub author: &'static str,
    pub score: i64,
    pub base_rank: u32,
}

/// First-letter index over the known authors, each bucket ordered by rank.
pub struct AuthorMatcher {
    by_letter: BTreeMap<char, Vec<AuthorRecord>>,
    ranks: HashMap<String, u32>,
}

impl Default for AuthorMatcher {
    fn default() -> Self {
        Self::new(KNOWN_AUTHORS, RANKED_AUTHORS)
    }
}

impl AuthorMatcher {
    pub fn new(known: &[&'static str], ranked: &[(&'static str, u32)]) -> Self {
        let ranks: HashMap<String, u32> = ranked.iter().map(|(name, rank)| (name.to_lowercase(), *rank)).collect();
        let mut by_letter: BTreeMap<char, Vec<AuthorRecord>> = BTreeMap::new();
        for &name in known {
            let Some(first) = name.chars().next().and_then(|c| c.to_lowercase().next()) else {
                continue;
            };
            let base_rank = ranks.get(&name.to_lowercase()).copied();
            by_letter.entry(first).or_default().push(AuthorRecord { name, base_rank });
        }
        // stable: unranked authors keep table order
        for bucket in by_letter.values_mut() {
            bucket.sort_by_key(|a| a.base_rank.unwrap_or(UNRANKED));
        }
        Self { by_letter, ranks }
    }

    pub fn authors_for_letter(&self, letter: char) -> Vec<&'static str> {
        let Some(key) = letter.to_lowercase().next() else { return Vec::new() };
        self.by_letter
            .get(&key)
            .map(|bucket| bucket.iter().map(|a| a.name).collect())
            .unwrap_or_default()
    }

    pub fn rank_of(&self, author: &str) -> Option<u32> {
        self.ranks.get(&author.to_lowercase()).copied()
    }

    /// Rank used for ordering, with unranked authors last.
    pub fn sort_rank(&self, author: &str) -> u32 {
        self.rank_of(author).unwrap_or(UNRANKED)
    }

    /// Candidate authors for `query`, best first. Empty when nothing scores a real match.
    pub fn match_query(&self, query: &str) -> Vec<AuthorMatch> {
        let terms = name_words(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<&AuthorRecord> = Vec::new();
        for term in &terms {
            let Some(first) = term.chars().next() else { continue };
            if let Some(bucket) = self.by_letter.get(&first) {
                for record in bucket {
                    if !candidates.iter().any(|c| c.name == record.name) {
                        candidates.push(record);
                    }
                }
            }
        }

        let mut matches: Vec<AuthorMatch> = candidates
            .into_iter()
            .filter_map(|record| {
                let score = match_score(&terms, &name_words(record.name));
                if score < MIN_MATCH {
                    return None;
                }
                let base_rank = record.base_rank.unwrap_or(UNRANKED);
                Some(AuthorMatch { author: record.name, score: score + (RANK_OFFSET - base_rank as i64), base_rank })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.base_rank.cmp(&b.base_rank))
                .then_with(|| a.author.cmp(b.author))
        });
        tracing::debug!(?terms, matches = ?matches.iter().map(|m| (m.author, m.score)).collect::<Vec<_>>(), "author matches");
        matches
    }
}

fn match_score(terms: &[String], name: &[String]) -> i64 {
    let mut score = 0;
    for query_pair in terms.windows(2) {
        for name_pair in name.windows(2) {
            if query_pair == name_pair {
                score += PAIR_MATCH;
            }
        }
    }
    let mut matched = 0;
    for word in name {
        if terms.contains(word) {
            matched += 1;
            score += WORD_MATCH;
        }
    }
    if matched == name.len() {
        score += FULL_NAME_BONUS;
    }
    score
}

/// Query words that are not words of `author`'s name, in query order.
pub fn leftover_terms(query: &str, author: &str) -> Vec<String> {
    let name = name_words(author);
    name_words(query).into_iter().filter(|t| !name.contains(t)).collect()
}
