use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use treesync_lib::core::{build_plan, compare};
use treesync_lib::Entry;

/// 生成 `count` 个条目，每 20 个文件一个文件夹
fn tree(count: usize, mtime_offset: i64, size_salt: u64) -> Vec<Entry> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut entries = Vec::with_capacity(count + count / 20);
    for i in 0..count {
        let folder = format!("dir{}", i / 20);
        if i % 20 == 0 {
            entries.push(Entry {
                id: format!("f-{}", folder),
                name: folder.clone(),
                path: folder.clone(),
                is_folder: true,
                size: 0,
                modified_time: base,
                content_hash: None,
            });
        }
        let name = format!("file{}.dat", i);
        entries.push(Entry {
            id: format!("{}-{}", folder, i),
            path: format!("{}/{}", folder, name),
            name,
            is_folder: false,
            size: (i as u64 % 7) * 1024 + size_salt * (i as u64 % 3),
            modified_time: base + chrono::Duration::seconds(mtime_offset * (i as i64 % 5)),
            content_hash: Some(format!("{:x}", i)),
        });
    }
    entries
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare");
    for count in [1_000usize, 10_000, 50_000] {
        let source = tree(count, 1, 1);
        let dest = tree(count * 9 / 10, 0, 0);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| compare(black_box(&source), black_box(&dest), true))
        });
    }
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let source = tree(10_000, 1, 1);
    let dest = tree(8_000, 0, 0);
    let comparison = compare(&source, &dest, false);
    c.bench_function("build_plan/10000", |b| b.iter(|| build_plan(black_box(&comparison))));
}

criterion_group!(benches, bench_compare, bench_plan);
criterion_main!(benches);
