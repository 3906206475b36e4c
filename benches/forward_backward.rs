use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use wordalign::{HmmAligner, JumpTable, SentencePair, TableLexicon, Topology, WordId};

fn fixture(source_len: usize, target_len: usize) -> (SentencePair, TableLexicon, JumpTable) {
    let source: Vec<WordId> = (1..=source_len as WordId).collect();
    let target: Vec<WordId> = (1..=target_len as WordId).collect();
    let mut lexicon = TableLexicon::new();
    for &e in &source {
        for &f in &target {
            lexicon.insert(e, f, if e == f { 0.5 } else { 0.02 });
        }
    }
    let mut jumps = JumpTable::homogeneous(10, false);
    jumps.normalize();
    (SentencePair::new(source, target), lexicon, jumps)
}

fn bench_forward_backward(c: &mut Criterion) {
    let (pair, lexicon, jumps) = fixture(20, 25);
    let mut aligner = HmmAligner::new(Topology::Direct);

    c.bench_function("forward_backward 20x25", |b| {
        b.iter(|| {
            let mut expectations = JumpTable::homogeneous(10, false);
            let mut counts: HashMap<(WordId, WordId), f64> = HashMap::new();
            aligner.build_tables(&pair, &lexicon, &jumps);
            black_box(aligner.forward_backward(&pair, &mut expectations, &mut counts))
        })
    });
}

fn bench_viterbi(c: &mut Criterion) {
    let (pair, lexicon, jumps) = fixture(20, 25);
    let mut aligner = HmmAligner::new(Topology::Direct);
    aligner.build_tables(&pair, &lexicon, &jumps);

    c.bench_function("viterbi 20x25", |b| {
        b.iter(|| black_box(aligner.viterbi_decode(&pair).unwrap()))
    });
}

criterion_group!(benches, bench_forward_backward, bench_viterbi);
criterion_main!(benches);
