//! One rank's slice of the grid and the wavefront sweep over it.
//!
//! The segment is stored column by column. Each column holds a ghost cell
//! followed by the rank's owned rows, so that the recurrence for column `j`
//! only reads the contiguous columns `j - 1` and `j`.

use crate::error::{Error, Result};
use crate::message::{Communicator, Tag};
use std::ops::RangeInclusive;

pub struct PipelineStage {
    rank: usize,
    size: usize,
    rows: RangeInclusive<usize>,
    cols: usize,
    /// Owned rows plus the ghost row.
    height: usize,
    data: Vec<f64>,
}

impl PipelineStage {
    /// Allocate the segment for `rank` of `size`, owning the global `rows`
    /// over `cols` columns. Failure to obtain the memory is reported as an
    /// error rather than aborting, so that it can be turned into a collective
    /// decision.
    pub fn allocate(rank: usize, size: usize, rows: RangeInclusive<usize>, cols: usize) -> Result<Self> {
        let owned = rows.end() - rows.start() + 1;
        let failed = || Error::Allocation { rank, rows: owned, cols };
        let height = owned + 1;
        let len = height.checked_mul(cols).ok_or_else(failed)?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| failed())?;
        data.resize(len, 0.0);

        Ok(Self {
            rank,
            size,
            rows,
            cols,
            height,
            data,
        })
    }

    pub fn rows(&self) -> &RangeInclusive<usize> {
        &self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at a local row (0 is the ghost row, 1 the first owned row) and
    /// column.
    pub fn get(&self, local_row: usize, col: usize) -> f64 {
        self.data[col * self.height + local_row]
    }

    /// Set the fixed boundary: column 0 holds each row's global index, and
    /// on rank 0 the ghost row is the synthetic row above the grid, holding
    /// each column's index.
    pub fn initialize_boundary(&mut self) {
        let above = *self.rows.start() as f64 - 1.0;

        for (local, cell) in self.data[..self.height].iter_mut().enumerate() {
            *cell = above + local as f64;
        }
        if self.rank == 0 {
            for j in 0..self.cols {
                self.data[j * self.height] = j as f64;
            }
        }
    }

    /// One pass of the wavefront over columns `1..cols`. For each column the
    /// ghost value is received from the left neighbor, the owned rows are
    /// updated top to bottom, and the last row is sent to the right
    /// neighbor. Rank 0 uses its fixed ghost row instead of receiving.
    pub fn sweep<C: Communicator>(&mut self, comm: &C) -> Result<()> {
        let left = self.rank.checked_sub(1);
        let right = (self.rank + 1 < self.size).then_some(self.rank + 1);
        let h = self.height;

        for j in 1..self.cols {
            let (done, rest) = self.data.split_at_mut(j * h);
            let prev = &done[(j - 1) * h..];
            let column = &mut rest[..h];

            if let Some(left) = left {
                column[0] = comm.recv_scalar(left, Tag::Column(j))?;
            }
            for i in 1..h {
                column[i] = column[i - 1] + prev[i] - prev[i - 1];
            }
            if let Some(right) = right {
                comm.send_scalar(right, Tag::Column(j), column[h - 1])?;
            }
        }
        Ok(())
    }

    /// The last owned row's value in the last column. On the last rank this
    /// is the top-right corner of the grid.
    pub fn corner(&self) -> f64 {
        self.data[self.data.len() - 1]
    }

    /// What `corner` held right after boundary initialization: the row index
    /// when the corner sits in column 0, otherwise zero.
    pub fn boundary_corner(&self) -> f64 {
        if self.cols == 1 {
            *self.rows.end() as f64
        } else {
            0.0
        }
    }

    /// Overwrite the origin ghost cell (the row before the first, column 0).
    pub fn set_origin(&mut self, value: f64) {
        self.data[0] = value;
    }
}
