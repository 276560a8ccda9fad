use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ingest_split::{split, SplitOptions};

fn sample_document() -> String {
    let mut doc = String::new();
    for section in 0..20 {
        doc.push_str(&format!("# Section {section}\n\n"));
        for para in 0..10 {
            doc.push_str(&format!(
                "Paragraph {para} of section {section}. It has a handful of words to chunk through.\n\n"
            ));
        }
    }
    doc
}

fn bench_split(c: &mut Criterion) {
    let doc = sample_document();
    let options = SplitOptions::default();
    c.bench_function("split_multi_section_document", |b| {
        b.iter(|| split(black_box(&doc), black_box(&options)));
    });
}

criterion_group!(benches, bench_split);
criterion_main!(benches);
