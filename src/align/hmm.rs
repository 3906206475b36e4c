//! HMM alignment core: trellis construction, scaled forward-backward
//! expectation, and log-space Viterbi decoding.
//!
//! The trellis treats source positions as hidden states and target words as
//! observations. States and positions are 1-indexed inside the matrices;
//! row and column 0 form the anchor every path leaves from. The forward
//! pass rescales each column to sum to 1 and keeps the scaling factors, so
//! probabilities stay in range for arbitrarily long sentences while the
//! total log-probability remains recoverable as the sum of their logs.

use log::{debug, warn};

use crate::align::jump_table::{Jump, JumpTable};
use crate::align::sentence::{Alignment, SentencePair, NULL_WORD};
use crate::align::{LexicalCounts, Lexicon};
use crate::error::{Error, Result};

/// How transitions into the null state are priced in the null-word
/// topology.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NullTransition {
    /// Fixed probability supplied as configuration.
    Fixed(f32),
    /// Looked up from the jump table's null mass and trained with it.
    Trained,
}

/// State-space layout of the aligner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Topology {
    /// States `1..=L`: every target word aligns to a real source word.
    Direct,
    /// States `1..=L` plus a null copy `L+1..=2L` of every source
    /// position, so a target word can align to no real word.
    NullWord { transition: NullTransition },
}

/// One worker's alignment engine.
///
/// All trellis buffers are resized in place and reused across sentence
/// pairs, so an aligner serves exactly one in-flight computation: it is not
/// thread-safe, must not be shared between workers, and anything read out
/// of its buffers is stale after the next [`HmmAligner::build_tables`]
/// call. Each worker of a batch trainer owns a private instance.
#[derive(Debug)]
pub struct HmmAligner {
    topology: Topology,
    /// `emission[j][s]`: probability of target word `j` under state `s`.
    emission: Vec<Vec<f64>>,
    /// `transition[prev][s]` and the jump-table coordinate it came from,
    /// kept so expectation counts can be routed back into the table.
    transition: Vec<Vec<f64>>,
    coordinate: Vec<Vec<Option<Jump>>>,
    alpha: Vec<Vec<f64>>,
    beta: Vec<Vec<f64>>,
    /// Per-column forward scaling factors.
    normalizer: Vec<f64>,
    viterbi: Vec<Vec<f64>>,
    backtrace: Vec<Vec<usize>>,
    source_len: usize,
    target_len: usize,
}

/// Resize a matrix to `rows x cols` with every cell reset to `fill`,
/// reusing row allocations where possible.
fn reset_matrix<T: Copy>(matrix: &mut Vec<Vec<T>>, rows: usize, cols: usize, fill: T) {
    matrix.resize_with(rows, Vec::new);
    for row in matrix.iter_mut() {
        row.clear();
        row.resize(cols, fill);
    }
}

impl HmmAligner {
    pub fn new(topology: Topology) -> Self {
        HmmAligner {
            topology,
            emission: Vec::new(),
            transition: Vec::new(),
            coordinate: Vec::new(),
            alpha: Vec::new(),
            beta: Vec::new(),
            normalizer: Vec::new(),
            viterbi: Vec::new(),
            backtrace: Vec::new(),
            source_len: 0,
            target_len: 0,
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Number of hidden states for a source sentence of `source_len` words.
    fn state_count(&self, source_len: usize) -> usize {
        match self.topology {
            Topology::Direct => source_len,
            Topology::NullWord { .. } => 2 * source_len,
        }
    }

    /// Build the emission and transition matrices for one sentence pair.
    ///
    /// For source length `L` and target length `M` the emission matrix
    /// becomes `(M+1) x (S+1)` and the transition matrix `(S+1) x (S+1)`,
    /// where `S` is [`Self::state_count`]. The jump table's current
    /// contents are used as-is; no normalization happens here.
    pub fn build_tables<L: Lexicon>(
        &mut self,
        pair: &SentencePair,
        lexicon: &L,
        jumps: &JumpTable,
    ) {
        let l = pair.source_len();
        let m = pair.target_len();
        let s = self.state_count(l);
        self.source_len = l;
        self.target_len = m;

        reset_matrix(&mut self.emission, m + 1, s + 1, 0.0);
        for j in 1..=m {
            let f = pair.target[j - 1];
            for i in 1..=l {
                self.emission[j][i] = f64::from(lexicon.prob(pair.source[i - 1], f));
            }
            if s > l {
                // Null copies all emit through the distinguished null token.
                let null_prob = f64::from(lexicon.prob(NULL_WORD, f));
                for i in l + 1..=s {
                    self.emission[j][i] = null_prob;
                }
            }
        }

        let null_entry = match self.topology {
            Topology::Direct => None,
            Topology::NullWord {
                transition: NullTransition::Fixed(p0),
            } => Some((f64::from(p0), None)),
            Topology::NullWord {
                transition: NullTransition::Trained,
            } => Some((f64::from(jumps.get(Jump::ToNull, l)), Some(Jump::ToNull))),
        };

        reset_matrix(&mut self.transition, s + 1, s + 1, 0.0);
        reset_matrix(&mut self.coordinate, s + 1, s + 1, None);
        for prev in 0..=s {
            // A null copy jumps as if standing on its paired real position.
            let prev_pos = if prev > l { prev - l } else { prev };
            for cur in 1..=s {
                if cur <= l {
                    let jump = Jump::Real(cur as i32 - prev_pos as i32);
                    self.transition[prev][cur] = f64::from(jumps.get(jump, l));
                    self.coordinate[prev][cur] = Some(jump);
                } else if let Some((p0, coord)) = null_entry {
                    // Into a null state: only from its paired real position
                    // or from the null copy itself. Every other null-to-null
                    // hop stays impossible.
                    if prev_pos == cur - l {
                        self.transition[prev][cur] = p0;
                        self.coordinate[prev][cur] = coord;
                    }
                }
            }
        }
    }

    /// Run scaled forward-backward over the pair the tables were last built
    /// for, accumulating expectations.
    ///
    /// Fractional jump counts flow into `jumps` through the coordinates
    /// recorded by [`Self::build_tables`]; fractional lexical counts flow
    /// into `lexical`. Returns the pair's total log-probability, or `None`
    /// when the forward mass of some column collapses to zero. The pair is
    /// then unalignable under the current model and contributes nothing.
    pub fn forward_backward<C: LexicalCounts>(
        &mut self,
        pair: &SentencePair,
        jumps: &mut JumpTable,
        lexical: &mut C,
    ) -> Option<f64> {
        let l = self.source_len;
        let m = self.target_len;
        let s = self.state_count(l);
        debug_assert_eq!(l, pair.source_len());
        debug_assert_eq!(m, pair.target_len());

        reset_matrix(&mut self.alpha, m + 1, s + 1, 0.0);
        reset_matrix(&mut self.beta, m + 1, s + 1, 0.0);
        self.normalizer.clear();
        self.normalizer.resize(m + 1, 1.0);

        // Forward pass with per-column rescaling.
        self.alpha[0][0] = 1.0;
        for j in 1..=m {
            let mut total = 0.0;
            for cur in 1..=s {
                let e = self.emission[j][cur];
                if e == 0.0 {
                    continue;
                }
                let mut mass = 0.0;
                for prev in 0..=s {
                    let a = self.alpha[j - 1][prev];
                    if a == 0.0 {
                        continue;
                    }
                    mass += a * self.transition[prev][cur];
                }
                let v = e * mass;
                self.alpha[j][cur] = v;
                total += v;
            }
            if total <= 0.0 {
                warn!(
                    "unalignable sentence pair ({} source words, {} target words): \
                     forward mass vanished at target position {}",
                    l, m, j
                );
                return None;
            }
            self.normalizer[j] = total;
            let inv = 1.0 / total;
            for cur in 1..=s {
                self.alpha[j][cur] *= inv;
            }
        }

        // Backward pass, reusing the forward normalizers.
        for st in 1..=s {
            self.beta[m][st] = 1.0;
        }
        for j in (1..m).rev() {
            let inv = 1.0 / self.normalizer[j + 1];
            for st in 1..=s {
                let mut mass = 0.0;
                for next in 1..=s {
                    let e = self.emission[j + 1][next];
                    if e == 0.0 {
                        continue;
                    }
                    mass += self.transition[st][next] * e * self.beta[j + 1][next];
                }
                self.beta[j][st] = mass * inv;
            }
        }

        // Posterior state occupancy routes lexical counts.
        for j in 1..=m {
            let f = pair.target[j - 1];
            let mut total_mass = 0.0;
            for st in 1..=s {
                total_mass += self.alpha[j][st] * self.beta[j][st];
            }
            if total_mass <= 0.0 {
                continue;
            }
            let inv_mass = 1.0 / total_mass;
            for st in 1..=s {
                let occupancy = self.alpha[j][st] * self.beta[j][st] * inv_mass;
                if occupancy == 0.0 {
                    continue;
                }
                let e_word = if st > l {
                    NULL_WORD
                } else {
                    pair.source[st - 1]
                };
                lexical.add(e_word, f, occupancy);
            }
        }

        // Expected transition counts route jump counts through the
        // coordinates recorded at table-building time.
        for j in 1..=m {
            let inv_c = 1.0 / self.normalizer[j];
            for cur in 1..=s {
                let e = self.emission[j][cur];
                if e == 0.0 {
                    continue;
                }
                let b = self.beta[j][cur];
                if b == 0.0 {
                    continue;
                }
                for prev in 0..=s {
                    let a = self.alpha[j - 1][prev];
                    if a == 0.0 {
                        continue;
                    }
                    if let Some(coord) = self.coordinate[prev][cur] {
                        let expectation = a * self.transition[prev][cur] * e * b * inv_c;
                        jumps.add(coord, l, expectation as f32);
                    }
                }
            }
        }

        let log_prob: f64 = self.normalizer[1..=m].iter().map(|c| c.ln()).sum();
        debug!(
            "sentence pair ({} source words, {} target words): log-probability {:.4}",
            l, m, log_prob
        );
        Some(log_prob)
    }

    /// Decode the single best alignment for the pair the tables were last
    /// built for.
    ///
    /// Runs entirely in log space. Columns where every transition/emission
    /// combination is impossible fall back to carrying the previous
    /// column's best score into every state, so the remaining positions
    /// still decode; the affected positions inherit the best predecessor.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedTrellis`] if the backtrace walk reaches the anchor
    /// state above the first column. That indicates corrupted tables, not a
    /// property of the input, and must never silently yield a wrong
    /// alignment.
    pub fn viterbi_decode(&mut self, pair: &SentencePair) -> Result<Alignment> {
        let l = self.source_len;
        let m = self.target_len;
        let s = self.state_count(l);
        debug_assert_eq!(l, pair.source_len());
        debug_assert_eq!(m, pair.target_len());

        if m == 0 {
            return Ok(Alignment::from_links(Vec::new()));
        }
        if s == 0 {
            return Err(Error::InvalidInput(
                "cannot decode against an empty source sentence".into(),
            ));
        }

        reset_matrix(&mut self.viterbi, m + 1, s + 1, f64::NEG_INFINITY);
        reset_matrix(&mut self.backtrace, m + 1, s + 1, 0usize);
        self.viterbi[0][0] = 0.0;

        for j in 1..=m {
            let mut column_alive = false;
            for cur in 1..=s {
                let e = self.emission[j][cur];
                if e == 0.0 {
                    continue;
                }
                let mut best = f64::NEG_INFINITY;
                let mut best_prev = 0usize;
                let mut found = false;
                for prev in 0..=s {
                    let base = self.viterbi[j - 1][prev];
                    if base == f64::NEG_INFINITY {
                        continue;
                    }
                    let t = self.transition[prev][cur];
                    if t == 0.0 {
                        continue;
                    }
                    let candidate = base + t.ln();
                    if !found || candidate > best {
                        best = candidate;
                        best_prev = prev;
                        found = true;
                    }
                }
                if found {
                    self.viterbi[j][cur] = best + e.ln();
                    self.backtrace[j][cur] = best_prev;
                    column_alive = true;
                }
            }
            if !column_alive {
                // Dead column: no state is reachable with positive
                // probability. Carry the previous column's best score into
                // every state so the rest of the sentence still decodes.
                let (best_prev, best_score) = column_best(&self.viterbi[j - 1]);
                for cur in 1..=s {
                    self.viterbi[j][cur] = best_score;
                    self.backtrace[j][cur] = best_prev;
                }
            }
        }

        let (mut state, _) = column_best(&self.viterbi[m]);
        let mut links = vec![None; m];
        for j in (1..=m).rev() {
            if state == 0 {
                let shown = (s + 1).min(16);
                return Err(Error::MalformedTrellis(format!(
                    "backtrace reached the anchor state at target position {} \
                     ({} source words, {} target words); scores {:?}, backtrace {:?}",
                    j,
                    l,
                    m,
                    &self.viterbi[j][..shown],
                    &self.backtrace[j][..shown]
                )));
            }
            links[j - 1] = if state <= l { Some(state - 1) } else { None };
            state = self.backtrace[j][state];
        }
        Ok(Alignment::from_links(links))
    }
}

/// Best-scoring state in a trellis column, anchor included.
fn column_best(column: &[f64]) -> (usize, f64) {
    let mut best_state = 0;
    let mut best = column[0];
    for (st, &score) in column.iter().enumerate().skip(1) {
        if score > best {
            best = score;
            best_state = st;
        }
    }
    (best_state, best)
}
