//! ELLPACK sparse matrix
//!
//! Row-major storage with a fixed number of slots per row. Each slot holds a
//! column index and a value, and rows are filled front to back, so a row's
//! entries are always the first `fill[row]` slots.

use rayon::prelude::*;

use crate::error::{try_filled, RandomWalkerError, RwResult};

/// Slots per row of the Random Walker system: diagonal plus six neighbours.
pub const RANDOM_WALKER_ROW_CAPACITY: usize = 7;

/// Sparse matrix with at most `cols_per_row` non-zeros per row.
#[derive(Clone, Debug)]
pub struct EllpackMatrix {
    num_rows: usize,
    num_cols: usize,
    cols_per_row: usize,
    values: Vec<f32>,
    columns: Vec<usize>,
    fill: Vec<u8>,
}

impl EllpackMatrix {
    /// Allocate an empty `num_rows × num_cols` matrix.
    pub fn new(num_rows: usize, num_cols: usize, cols_per_row: usize) -> RwResult<Self> {
        if cols_per_row == 0 || cols_per_row > u8::MAX as usize {
            return Err(RandomWalkerError::invalid_params(format!(
                "unsupported number of non-zeros per row: {cols_per_row}"
            )));
        }
        let slots = num_rows
            .checked_mul(cols_per_row)
            .ok_or(RandomWalkerError::allocation("matrix slots", usize::MAX))?;

        let values = try_filled("matrix values", slots, 0.0f32)?;
        let columns = try_filled("matrix columns", slots, 0usize)?;
        let fill = try_filled("matrix row fill", num_rows, 0u8)?;

        Ok(Self { num_rows, num_cols, cols_per_row, values, columns, fill })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn cols_per_row(&self) -> usize {
        self.cols_per_row
    }

    /// Number of occupied slots.
    pub fn num_nonzeros(&self) -> usize {
        self.fill.iter().map(|&f| f as usize).sum()
    }

    /// Accumulate `delta` into entry `(row, col)`, claiming a free slot if needed.
    pub fn add(&mut self, row: usize, col: usize, delta: f32) -> RwResult<()> {
        let cap = self.cols_per_row;
        self.row_mut(row)
            .add(col, delta)
            .map_err(|_| RandomWalkerError::RowCapacityExceeded { row, capacity: cap })
    }

    /// Overwrite entry `(row, col)`.
    pub fn set(&mut self, row: usize, col: usize, value: f32) -> RwResult<()> {
        let cap = self.cols_per_row;
        self.row_mut(row)
            .set(col, value)
            .map_err(|_| RandomWalkerError::RowCapacityExceeded { row, capacity: cap })
    }

    /// Entry `(row, col)`, zero when absent.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.row_entries(row)
            .find(|&(c, _)| c == col)
            .map_or(0.0, |(_, v)| v)
    }

    /// Diagonal entry of `row`.
    #[inline]
    pub fn diagonal(&self, row: usize) -> f32 {
        self.get(row, row)
    }

    /// Occupied `(column, value)` pairs of `row`.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let start = row * self.cols_per_row;
        let end = start + self.fill[row] as usize;
        self.columns[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied())
    }

    /// Mutable view of a single row.
    pub fn row_mut(&mut self, row: usize) -> EllpackRowMut<'_> {
        let cap = self.cols_per_row;
        let start = row * cap;
        EllpackRowMut {
            row,
            columns: &mut self.columns[start..start + cap],
            values: &mut self.values[start..start + cap],
            fill: &mut self.fill[row],
        }
    }

    /// Parallel iterator over mutable row views; each row is visited by exactly one worker.
    pub fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = EllpackRowMut<'_>> {
        let cap = self.cols_per_row;
        self.columns
            .par_chunks_mut(cap)
            .zip(self.values.par_chunks_mut(cap))
            .zip(self.fill.par_iter_mut())
            .enumerate()
            .map(|(row, ((columns, values), fill))| EllpackRowMut { row, columns, values, fill })
    }

    /// `result = self * x`, sequentially.
    pub fn multiply(&self, x: &[f32], result: &mut [f32]) {
        debug_assert_eq!(x.len(), self.num_cols);
        debug_assert_eq!(result.len(), self.num_rows);
        for (row, out) in result.iter_mut().enumerate() {
            *out = self.row_dot(row, x);
        }
    }

    /// `result = self * x`, rows distributed over the rayon pool.
    pub fn par_multiply(&self, x: &[f32], result: &mut [f32]) {
        debug_assert_eq!(x.len(), self.num_cols);
        debug_assert_eq!(result.len(), self.num_rows);
        result
            .par_iter_mut()
            .enumerate()
            .for_each(|(row, out)| *out = self.row_dot(row, x));
    }

    #[inline(always)]
    fn row_dot(&self, row: usize, x: &[f32]) -> f32 {
        let start = row * self.cols_per_row;
        let mut sum = 0.0f32;
        for slot in start..start + self.fill[row] as usize {
            sum += self.values[slot] * x[self.columns[slot]];
        }
        sum
    }

    /// True if `get(i, j) == get(j, i)` for every stored entry.
    pub fn is_symmetric(&self) -> bool {
        if self.num_rows != self.num_cols {
            return false;
        }
        (0..self.num_rows).all(|row| self.row_entries(row).all(|(col, v)| self.get(col, row) == v))
    }
}

/// Mutable access to one row of an [`EllpackMatrix`].
#[derive(Debug)]
pub struct EllpackRowMut<'a> {
    row: usize,
    columns: &'a mut [usize],
    values: &'a mut [f32],
    fill: &'a mut u8,
}

/// Returned when a row has no free slot left.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowFull;

impl EllpackRowMut<'_> {
    pub fn index(&self) -> usize {
        self.row
    }

    fn slot(&self, col: usize) -> Option<usize> {
        self.columns[..*self.fill as usize].iter().position(|&c| c == col)
    }

    fn claim(&mut self, col: usize) -> Result<usize, RowFull> {
        let slot = *self.fill as usize;
        if slot >= self.columns.len() {
            return Err(RowFull);
        }
        self.columns[slot] = col;
        self.values[slot] = 0.0;
        *self.fill += 1;
        Ok(slot)
    }

    pub fn add(&mut self, col: usize, delta: f32) -> Result<(), RowFull> {
        let slot = match self.slot(col) {
            Some(slot) => slot,
            None => self.claim(col)?,
        };
        self.values[slot] += delta;
        Ok(())
    }

    pub fn set(&mut self, col: usize, value: f32) -> Result<(), RowFull> {
        let slot = match self.slot(col) {
            Some(slot) => slot,
            None => self.claim(col)?,
        };
        self.values[slot] = value;
        Ok(())
    }
}
