//! Results output formatting (PBM).

use std::io::Write;

use crate::engine::anneal::Grid;
use crate::engine::driver::SnapshotSink;
use crate::error::{HalocaError, Result};
use crate::ir::Cell;

/// Streams a ring-automaton trace as a plain (`P1`) bitmap, one row per
/// snapshot.
///
/// Format:
/// ```text
/// P1
/// # produced by haloca 8 3
/// 8 3
/// 0 0 0 0 1 0 0 0
/// 0 0 0 1 1 1 0 0
/// 0 0 1 1 0 0 1 0
/// ```
pub struct PbmTraceWriter<W: Write> {
    writer: W,
    width: usize,
    steps: usize,
    rows: usize,
}

impl<W: Write> PbmTraceWriter<W> {
    /// Write the header for a `width` x `steps` trace.
    pub fn new(mut writer: W, width: usize, steps: usize, program: &str) -> Result<Self> {
        writeln!(writer, "P1")?;
        writeln!(writer, "# produced by {} {} {}", program, width, steps)?;
        writeln!(writer, "{} {}", width, steps)?;
        Ok(Self {
            writer,
            width,
            steps,
            rows: 0,
        })
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> SnapshotSink for PbmTraceWriter<W> {
    fn record(&mut self, _step: usize, cells: &[Cell]) -> Result<()> {
        if cells.len() != self.width {
            return Err(HalocaError::Config(format!(
                "trace row has {} cells, header declares {}",
                cells.len(),
                self.width
            )));
        }
        let mut line = String::with_capacity(2 * cells.len());
        for (i, &c) in cells.iter().enumerate() {
            if i > 0 {
                line.push(' ');
            }
            line.push(if c != 0 { '1' } else { '0' });
        }
        writeln!(self.writer, "{}", line)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.rows != self.steps {
            return Err(HalocaError::Config(format!(
                "trace has {} rows, header declares {}",
                self.rows, self.steps
            )));
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Write a grid as a raw (`P4`) bitmap.
///
/// Rows are packed 8 cells per byte, most significant bit first, and padded
/// to a whole byte. Live cells are black (1).
pub fn write_pbm_p4<W: Write>(grid: &Grid, writer: &mut W, program: &str) -> Result<()> {
    writeln!(writer, "P4")?;
    writeln!(writer, "# produced by {} {} {}", program, grid.width, grid.height)?;
    writeln!(writer, "{} {}", grid.width, grid.height)?;

    let mut packed = vec![0u8; grid.width.div_ceil(8)];
    for y in 0..grid.height {
        packed.fill(0);
        for (x, &c) in grid.row(y).iter().enumerate() {
            if c != 0 {
                packed[x / 8] |= 0x80 >> (x % 8);
            }
        }
        writer.write_all(&packed)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_pbm;

    #[test]
    fn trace_header_and_rows() {
        let mut trace = PbmTraceWriter::new(Vec::new(), 4, 2, "haloca").unwrap();
        trace.record(0, &[0, 0, 1, 0]).unwrap();
        trace.record(1, &[0, 1, 1, 1]).unwrap();
        trace.finish().unwrap();
        let text = String::from_utf8(trace.into_inner()).unwrap();
        assert_eq!(text, "P1\n# produced by haloca 4 2\n4 2\n0 0 1 0\n0 1 1 1\n");
    }

    #[test]
    fn trace_rejects_wrong_row_width() {
        let mut trace = PbmTraceWriter::new(Vec::new(), 4, 1, "haloca").unwrap();
        assert!(trace.record(0, &[1, 0]).is_err());
    }

    #[test]
    fn trace_finish_checks_row_count() {
        let mut trace = PbmTraceWriter::new(Vec::new(), 2, 3, "haloca").unwrap();
        trace.record(0, &[1, 0]).unwrap();
        assert!(trace.finish().is_err());
    }

    #[test]
    fn empty_trace_is_header_only() {
        let mut trace = PbmTraceWriter::new(Vec::new(), 5, 0, "haloca").unwrap();
        trace.finish().unwrap();
        assert_eq!(trace.rows(), 0);
        let text = String::from_utf8(trace.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn p4_packs_msb_first_with_padding() {
        let grid = Grid::new(10, 1, vec![1, 0, 0, 0, 0, 0, 0, 1, 0, 1]).unwrap();
        let mut out = Vec::new();
        write_pbm_p4(&grid, &mut out, "haloca").unwrap();
        let header = b"P4\n# produced by haloca 10 1\n10 1\n";
        assert_eq!(&out[..header.len()], header);
        assert_eq!(&out[header.len()..], &[0b1000_0001, 0b0100_0000]);
    }

    #[test]
    fn reader_accepts_written_bitmaps() {
        let grid = Grid::new(3, 2, vec![1, 1, 0, 0, 0, 1]).unwrap();
        let mut raw = Vec::new();
        write_pbm_p4(&grid, &mut raw, "haloca").unwrap();
        assert_eq!(parse_pbm(&raw).unwrap().into_grid().unwrap(), grid);

        let mut trace = PbmTraceWriter::new(Vec::new(), 3, 2, "haloca").unwrap();
        trace.record(0, grid.row(0)).unwrap();
        trace.record(1, grid.row(1)).unwrap();
        trace.finish().unwrap();
        let plain = parse_pbm(&trace.into_inner()).unwrap();
        assert_eq!(plain.cells, grid.cells);
    }
}
