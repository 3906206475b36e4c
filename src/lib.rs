//! HMM-based statistical word alignment.
//!
//! Given a tokenized sentence pair and a lexical translation model, this
//! crate computes the expected alignment distribution via scaled
//! forward-backward recursion (Baum-Welch) and the single best alignment via
//! log-space Viterbi decoding. The transition model is a trainable
//! jump-distance table that serializes to a stable binary layout so counts
//! can be merged and renormalized between training passes.

pub mod align;
pub mod error;

pub use align::{
    Alignment, CorpusStats, HmmAligner, Jump, JumpTable, LexicalCounts, Lexicon,
    NullTransition, SentencePair, TableLexicon, Topology, WordId, NULL_WORD,
};
pub use error::{Error, Result};
