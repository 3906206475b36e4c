//! Trainable jump-distance transition table.
//!
//! The HMM prices a transition by the signed distance ("jump") between
//! consecutive alignment positions, optionally conditioned on source
//! sentence length, plus a distinguished probability mass for transitions
//! into the null state. The table accumulates fractional counts during
//! forward-backward training, renormalizes between EM passes, and persists
//! to a fixed binary layout so partial counts from distributed workers can
//! be merged across passes.

use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Additive smoothing constant applied during [`JumpTable::normalize`].
const SMOOTHING_ALPHA: f32 = 1e-5;

/// A transition jump at the table's public boundary.
///
/// The storage layer turns these into row and cell indices; no sentinel
/// jump values appear in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    /// Signed distance between consecutive source positions.
    Real(i32),
    /// Transition into the null state.
    ToNull,
}

/// Probability table over transition jumps.
///
/// Two layouts exist:
/// - *homogeneous*: a single row covering `-max_distance..=max_distance`
///   with the pivot at `max_distance`;
/// - *length-conditioned*: one row per conditioning value `c`, each
///   covering `-c..=max_distance` with cell index `jump + c`.
///
/// Jumps outside a row's range are clamped to the row edge, so very long
/// sentences pool their extreme jumps in the boundary cells.
#[derive(Debug, Clone)]
pub struct JumpTable {
    homogeneous: bool,
    max_distance: i32,
    rows: Vec<Vec<f32>>,
    null_transition: f32,
    models_null: bool,
}

impl JumpTable {
    /// Distance-only table with a single row.
    ///
    /// `models_null` declares that the table carries mass for transitions
    /// into the null state; that mass then participates in normalization.
    pub fn homogeneous(max_distance: usize, models_null: bool) -> Self {
        JumpTable {
            homogeneous: true,
            max_distance: max_distance as i32,
            rows: vec![vec![0.0; 2 * max_distance + 1]],
            null_transition: 0.0,
            models_null,
        }
    }

    /// Length-conditioned table with one row per conditioning value in
    /// `0..=max_conditioning`.
    pub fn conditioned(max_distance: usize, max_conditioning: usize) -> Self {
        let rows = (0..=max_conditioning)
            .map(|c| vec![0.0; c + max_distance + 1])
            .collect();
        JumpTable {
            homogeneous: false,
            max_distance: max_distance as i32,
            rows,
            null_transition: 0.0,
            models_null: false,
        }
    }

    pub fn is_homogeneous(&self) -> bool {
        self.homogeneous
    }

    pub fn max_distance(&self) -> usize {
        self.max_distance as usize
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cell count of row `r`.
    pub fn row_width(&self, r: usize) -> usize {
        self.rows[r].len()
    }

    /// Current mass for transitions into the null state.
    pub fn null_transition_probability(&self) -> f32 {
        self.null_transition
    }

    /// Sum of every cell plus the null mass. Useful for count-conservation
    /// checks in training drivers.
    pub fn total_mass(&self) -> f64 {
        let cells: f64 = self
            .rows
            .iter()
            .map(|row| row.iter().map(|&v| v as f64).sum::<f64>())
            .sum();
        cells + self.null_transition as f64
    }

    /// Resolve a real jump to its row and cell under `conditioning`.
    fn cell(&self, jump: i32, conditioning: usize) -> (usize, usize) {
        if self.homogeneous {
            let width = self.rows[0].len() as i32;
            let idx = (jump + self.max_distance).clamp(0, width - 1) as usize;
            (0, idx)
        } else {
            let row = conditioning.min(self.rows.len() - 1);
            let width = self.rows[row].len() as i32;
            let idx = (jump + row as i32).clamp(0, width - 1) as usize;
            (row, idx)
        }
    }

    /// Stored probability (or raw count mass) for `jump` under
    /// `conditioning`.
    pub fn get(&self, jump: Jump, conditioning: usize) -> f32 {
        match jump {
            Jump::ToNull => self.null_transition,
            Jump::Real(distance) => {
                let (row, idx) = self.cell(distance, conditioning);
                self.rows[row][idx]
            }
        }
    }

    /// Accumulate a fractional count.
    ///
    /// A zero `amount` returns immediately so callers can route sparse
    /// expectation updates without branching.
    pub fn add(&mut self, jump: Jump, conditioning: usize, amount: f32) {
        if amount == 0.0 {
            return;
        }
        match jump {
            Jump::ToNull => self.null_transition += amount,
            Jump::Real(distance) => {
                let (row, idx) = self.cell(distance, conditioning);
                self.rows[row][idx] += amount;
            }
        }
    }

    /// Renormalize every row into a probability distribution.
    ///
    /// Rows with observed mass are smoothed additively and divided through;
    /// rows that never received a count fall back to an exponential-decay
    /// prior over jump distance, so the table is valid from the first EM
    /// iteration onward. For homogeneous tables that model null
    /// transitions, the null mass joins the row sum and is rescaled with it.
    pub fn normalize(&mut self) {
        let with_null = self.models_null && self.homogeneous;
        for r in 0..self.rows.len() {
            let mut sum: f32 = self.rows[r].iter().sum();
            if with_null {
                sum += self.null_transition;
            }
            if sum > 0.0 {
                let cells = self.rows[r].len() + usize::from(with_null);
                let denominator = sum + SMOOTHING_ALPHA * cells as f32;
                for v in self.rows[r].iter_mut() {
                    *v = (*v + SMOOTHING_ALPHA) / denominator;
                }
                if with_null {
                    self.null_transition =
                        (self.null_transition + SMOOTHING_ALPHA) / denominator;
                }
            } else {
                self.decay_fallback(r, with_null);
            }
        }
    }

    /// Fill row `r` with an exponential-decay prior: closer jumps favored,
    /// with a slight preference for short backward jumps.
    fn decay_fallback(&mut self, r: usize, with_null: bool) {
        let pivot = if self.homogeneous {
            self.max_distance
        } else {
            r as i32
        };
        let width = self.rows[r].len();
        let null_weight = if with_null { (-1.0f64).exp() } else { 0.0 };
        let mut sum = null_weight;
        for idx in 0..width {
            let distance = idx as i32 - pivot;
            sum += (-(distance as f64 + 0.5).abs()).exp();
        }
        for idx in 0..width {
            let distance = idx as i32 - pivot;
            self.rows[r][idx] = ((-(distance as f64 + 0.5).abs()).exp() / sum) as f32;
        }
        if with_null {
            self.null_transition = (null_weight / sum) as f32;
        }
    }

    /// Merge another table's counts into this one, cell by cell.
    ///
    /// Both tables must have been built under the same configuration;
    /// merging incompatible shapes is a configuration error, not a
    /// recoverable runtime condition.
    pub fn plus_equals(&mut self, other: &JumpTable) -> Result<()> {
        if self.homogeneous != other.homogeneous
            || self.max_distance != other.max_distance
            || self.rows.len() != other.rows.len()
        {
            return Err(Error::ShapeMismatch(format!(
                "homogeneous {}/{}, max distance {}/{}, rows {}/{}",
                self.homogeneous,
                other.homogeneous,
                self.max_distance,
                other.max_distance,
                self.rows.len(),
                other.rows.len()
            )));
        }
        for (r, (mine, theirs)) in self.rows.iter_mut().zip(&other.rows).enumerate() {
            if mine.len() != theirs.len() {
                return Err(Error::ShapeMismatch(format!(
                    "row {} width {} vs {}",
                    r,
                    mine.len(),
                    theirs.len()
                )));
            }
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += *b;
            }
        }
        self.null_transition += other.null_transition;
        Ok(())
    }

    /// Zero every cell and the null mass, keeping the shape.
    pub fn clear(&mut self) {
        for row in self.rows.iter_mut() {
            row.fill(0.0);
        }
        self.null_transition = 0.0;
    }

    /// Serialize to the stable little-endian layout shared with the
    /// training pipeline:
    ///
    /// ```text
    /// [u8 homogeneous][i32 max_distance][i32 row_count]
    /// { [i32 byte_len][byte_len bytes of f32 cells] } x row_count
    /// [f32 null_transition]
    /// ```
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&[u8::from(self.homogeneous)])?;
        writer.write_all(&self.max_distance.to_le_bytes())?;
        writer.write_all(&(self.rows.len() as i32).to_le_bytes())?;
        for row in &self.rows {
            writer.write_all(&((row.len() * 4) as i32).to_le_bytes())?;
            for &v in row {
                writer.write_all(&v.to_le_bytes())?;
            }
        }
        writer.write_all(&self.null_transition.to_le_bytes())?;
        Ok(())
    }

    /// Read a table previously written by [`JumpTable::write_to`].
    ///
    /// The layout is validated against the declared mode and bound; any
    /// disagreement is [`Error::Corrupt`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<JumpTable> {
        let mut flag = [0u8; 1];
        reader.read_exact(&mut flag)?;
        let homogeneous = match flag[0] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::Corrupt(format!("homogeneous flag {}", other)));
            }
        };
        let max_distance = read_i32(reader)?;
        if max_distance < 0 {
            return Err(Error::Corrupt(format!("max distance {}", max_distance)));
        }
        let row_count = read_i32(reader)?;
        if row_count <= 0 || (homogeneous && row_count != 1) {
            return Err(Error::Corrupt(format!(
                "row count {} (homogeneous: {})",
                row_count, homogeneous
            )));
        }
        let mut rows = Vec::with_capacity(row_count as usize);
        for r in 0..row_count as usize {
            let byte_len = read_i32(reader)?;
            if byte_len < 0 || byte_len % 4 != 0 {
                return Err(Error::Corrupt(format!("row {} byte length {}", r, byte_len)));
            }
            let width = byte_len as usize / 4;
            let expected = if homogeneous {
                2 * max_distance as usize + 1
            } else {
                r + max_distance as usize + 1
            };
            if width != expected {
                return Err(Error::Corrupt(format!(
                    "row {} width {} (expected {})",
                    r, width, expected
                )));
            }
            let mut row = vec![0.0f32; width];
            for v in row.iter_mut() {
                *v = read_f32(reader)?;
            }
            rows.push(row);
        }
        let null_transition = read_f32(reader)?;
        Ok(JumpTable {
            homogeneous,
            max_distance,
            rows,
            null_transition,
            // The layout carries no flag for this; nonzero stored mass is
            // the only durable signal.
            models_null: null_transition != 0.0,
        })
    }
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}
