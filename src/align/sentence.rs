//! Sentence-pair and alignment types shared by the alignment models.

use std::fmt;

/// Integer identifier of a word in a vocabulary.
pub type WordId = u32;

/// Distinguished source token standing for "no real source word".
///
/// Vocabulary builders reserve id 0 for it.
pub const NULL_WORD: WordId = 0;

/// A tokenized sentence pair, source and target as vocabulary ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePair {
    pub source: Vec<WordId>,
    pub target: Vec<WordId>,
}

impl SentencePair {
    pub fn new(source: Vec<WordId>, target: Vec<WordId>) -> Self {
        SentencePair { source, target }
    }

    /// Source sentence length `L`.
    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Target sentence length `M`.
    pub fn target_len(&self) -> usize {
        self.target.len()
    }
}

/// One decision per target position: the aligned source position, or
/// unaligned.
///
/// Positions are 0-based. Produced by Viterbi decoding and handed to an
/// external writer; the `Display` form is the conventional
/// `"source-target"` pair list with unaligned positions omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    links: Vec<Option<usize>>,
}

impl Alignment {
    pub(crate) fn from_links(links: Vec<Option<usize>>) -> Self {
        Alignment { links }
    }

    /// Source position aligned to target position `j`, if any.
    ///
    /// # Panics
    ///
    /// Panics if `j` is out of range.
    pub fn link(&self, j: usize) -> Option<usize> {
        self.links[j]
    }

    /// Number of target positions covered.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Iterate `(source_position, target_position)` over aligned positions.
    pub fn aligned_pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(j, link)| link.map(|i| (i, j)))
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (i, j) in self.aligned_pairs() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}-{}", i, j)?;
            first = false;
        }
        Ok(())
    }
}
