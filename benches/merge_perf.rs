//! Page merge benchmarks.
//!
//! Run with: `cargo bench --bench merge_perf`

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use feedstore::{
    PageQuery, PageRequest, PageVariant, RemoteAccount, RemoteStatus, Storage, Visibility,
};

const DOMAIN: &str = "bench.social";
const VIEWER: &str = "bench-viewer";
const AUTHORS: u32 = 25;

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base time")
}

fn account(n: u32) -> RemoteAccount {
    RemoteAccount {
        id: format!("acct-{n}"),
        username: format!("user{n}"),
        acct: format!("user{n}@{DOMAIN}"),
        display_name: format!("User {n}"),
        note: String::new(),
        url: None,
        avatar: None,
        header: None,
        locked: false,
        bot: false,
        followers_count: 100,
        following_count: 100,
        statuses_count: 1000,
        created_at: base_time() - Duration::days(400),
    }
}

fn status(n: u32) -> RemoteStatus {
    RemoteStatus {
        id: format!("{n:08}"),
        uri: format!("https://{DOMAIN}/statuses/{n}"),
        url: None,
        created_at: base_time() - Duration::seconds(i64::from(n) * 30),
        edited_at: None,
        content: format!("<p>Benchmark status {n} with some text to merge</p>"),
        spoiler_text: String::new(),
        visibility: Visibility::Public,
        sensitive: false,
        reblogs_count: i64::from(n % 7),
        favourites_count: i64::from(n % 11),
        replies_count: 0,
        in_reply_to_id: None,
        in_reply_to_account_id: None,
        language: Some("en".to_string()),
        account: account(n % AUTHORS),
        reblog: None,
        media_attachments: vec![],
        mentions: vec![],
        tags: vec![],
        poll: None,
        favourited: Some(n % 3 == 0),
        reblogged: None,
        bookmarked: None,
        muted: None,
        pinned: None,
    }
}

/// Newest-first page where every fifth entry is a repost of an older status.
fn page(first: u32, len: u32) -> Vec<RemoteStatus> {
    (first..first + len)
        .map(|n| {
            let mut entry = status(n);
            if n % 5 == 0 {
                entry.reblog = Some(Box::new(status(n + 100_000)));
            }
            entry
        })
        .collect()
}

fn merge(storage: &mut Storage, entities: &[RemoteStatus], anchor: Option<String>) {
    let query = PageQuery { max_id: anchor };
    let outcome = storage
        .merge_page(&PageRequest {
            domain: DOMAIN,
            viewer_id: Some(VIEWER),
            query: &query,
            variant: PageVariant::Home,
            entities,
            observed_at: base_time(),
        })
        .expect("page merge");
    black_box(outcome);
}

fn bench_fresh_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_fresh");
    for len in &[20_u32, 40, 200] {
        let entities = page(0, *len);
        group.throughput(Throughput::Elements(u64::from(*len)));
        group.bench_with_input(BenchmarkId::from_parameter(len), &entities, |b, entities| {
            b.iter_batched(
                || Storage::open_memory().expect("in-memory store"),
                |mut storage| merge(&mut storage, entities, None),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_remerge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_repeat");
    let entities = page(0, 40);
    let mut storage = Storage::open_memory().expect("in-memory store");
    merge(&mut storage, &entities, None);

    group.throughput(Throughput::Elements(40));
    group.bench_function("unchanged_page", |b| {
        b.iter(|| merge(&mut storage, &entities, None));
    });
    group.finish();
}

fn bench_paginated_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_paginated");
    group.sample_size(20);
    group.bench_function("ten_pages_of_40", |b| {
        b.iter_batched(
            || Storage::open_memory().expect("in-memory store"),
            |mut storage| {
                let mut anchor = None;
                for page_no in 0..10 {
                    // Pages overlap by one entry: the anchor itself.
                    let first = page_no * 39;
                    let entities = page(first, 40);
                    merge(&mut storage, &entities, anchor.take());
                    anchor = entities.last().map(|s| s.id.clone());
                }
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_fresh_merge, bench_remerge, bench_paginated_fetch);
criterion_main!(benches);
