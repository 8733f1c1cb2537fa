use criterion::{black_box, criterion_group, criterion_main, Criterion};
use time::OffsetDateTime;
use verse_core::index::IndexSnapshot;
use verse_core::query::ParsedQuery;
use verse_core::Document;

const WORDS: &[&str] = &[
    "night", "rose", "river", "silver", "dream", "heart", "winter", "light", "shadow", "sea",
    "morning", "grave", "song", "wind", "golden", "bird", "stone", "fire", "garden", "tears",
];

fn synthetic_corpus(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            let word = |k: usize| WORDS[(i * 7 + k * 13) % WORDS.len()];
            let lines = (0..12)
                .map(|l| format!("the {} of {} and the {} {}", word(l), word(l + 1), word(l + 2), word(l + 3)))
                .collect();
            Document::new(format!("Poet {}", i % 40), format!("{} {} {}", word(0), word(5), i), lines)
        })
        .collect()
}

fn bench_index(c: &mut Criterion) {
    let docs = synthetic_corpus(2_000);
    c.bench_function("build_snapshot_2000", |b| {
        b.iter(|| IndexSnapshot::build(black_box(docs.clone()), OffsetDateTime::UNIX_EPOCH))
    });

    let snapshot = IndexSnapshot::build(docs, OffsetDateTime::UNIX_EPOCH);
    let query = ParsedQuery::parse("silver river dre");
    c.bench_function("search_prefix_phrase", |b| b.iter(|| snapshot.search(black_box(&query))));
}

criterion_group!(benches, bench_index);
criterion_main!(benches);
