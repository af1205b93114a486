//! PBM bitmap parser.
//!
//! Reads plain (`P1`) and raw (`P4`) portable bitmaps into cell arrays, used
//! to load initial conditions.
//!
//! # Supported syntax
//!
//! ```text
//! P1                      (magic)
//! # comment               (anywhere between header tokens)
//! <width> <height>
//! 0 1 1 0 ...             (P1: one 0/1 per pixel, whitespace optional)
//! <raw bytes>             (P4: rows packed MSB first, padded to a byte)
//! ```
//!
//! A pixel value of 1 (black) is a live cell.

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_till};
use nom::character::complete::{digit1, multispace1, one_of};
use nom::combinator::{map, map_res, recognize, value};
use nom::multi::{count, many0_count};
use nom::sequence::preceded;
use nom::IResult;
use nom::Parser;

use crate::engine::anneal::Grid;
use crate::error::{HalocaError, Result};
use crate::ir::Cell;

/// Bitmap encoding, named by its magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PbmFormat {
    /// `P1`, ASCII digits.
    Plain,
    /// `P4`, packed bits.
    Raw,
}

/// A decoded bitmap, row-major, one cell per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<Cell>,
}

impl Bitmap {
    /// Use a single-row bitmap as a 1D domain.
    pub fn into_row(self) -> Result<Vec<Cell>> {
        if self.height != 1 {
            return Err(HalocaError::Parse(format!(
                "a 1D initial condition must be one row high, got {}",
                self.height
            )));
        }
        Ok(self.cells)
    }

    pub fn into_grid(self) -> Result<Grid> {
        Grid::new(self.width, self.height, self.cells)
    }
}

/// Parse a P1 or P4 bitmap.
pub fn parse_pbm(input: &[u8]) -> Result<Bitmap> {
    let (rest, (format, width, height)) =
        header(input).map_err(|_| parse_err("malformed PBM header"))?;
    if width == 0 || height == 0 {
        return Err(parse_err(&format!("empty bitmap ({width}x{height})")));
    }
    let len = width
        .checked_mul(height)
        .ok_or_else(|| parse_err(&format!("bitmap of {width}x{height} is too large")))?;

    let cells = match format {
        PbmFormat::Plain => plain_pixels(rest, len),
        PbmFormat::Raw => raw_pixels(rest, width, height),
    }
    .map_err(|e| parse_err(&e))?;

    tracing::debug!(?format, width, height, "parsed bitmap");
    Ok(Bitmap {
        width,
        height,
        cells,
    })
}

fn parse_err(detail: &str) -> HalocaError {
    HalocaError::Parse(format!("PBM: {detail}"))
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Whitespace and `#` comments, which may separate any two header tokens.
fn separators(input: &[u8]) -> IResult<&[u8], ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize((tag(&b"#"[..]), take_till(|c: u8| c == b'\n'))),
        ))),
    )
    .parse(input)
}

fn magic(input: &[u8]) -> IResult<&[u8], PbmFormat> {
    alt((
        value(PbmFormat::Plain, tag(&b"P1"[..])),
        value(PbmFormat::Raw, tag(&b"P4"[..])),
    ))
    .parse(input)
}

fn dimension(input: &[u8]) -> IResult<&[u8], usize> {
    preceded(
        separators,
        map_res(digit1, |digits: &[u8]| {
            std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or(())
        }),
    )
    .parse(input)
}

fn header(input: &[u8]) -> IResult<&[u8], (PbmFormat, usize, usize)> {
    (magic, dimension, dimension).parse(input)
}

// ---------------------------------------------------------------------------
// Pixel data
// ---------------------------------------------------------------------------

fn plain_pixel(input: &[u8]) -> IResult<&[u8], Cell> {
    preceded(separators, map(one_of("01"), |c| Cell::from(c == '1'))).parse(input)
}

fn plain_pixels(input: &[u8], len: usize) -> std::result::Result<Vec<Cell>, String> {
    let (_, cells) = count(plain_pixel, len)
        .parse(input)
        .map_err(|_| format!("expected {len} pixels of 0 or 1"))?;
    Ok(cells)
}

fn raw_pixels(
    input: &[u8],
    width: usize,
    height: usize,
) -> std::result::Result<Vec<Cell>, String> {
    let row_bytes = width.div_ceil(8);
    let total = row_bytes * height;
    // Exactly one whitespace byte separates the header from the raster.
    let (_, raster) = preceded(one_of(" \t\r\n"), take(total))
        .parse(input)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| {
            format!("expected {total} bytes of raster data")
        })?;

    let mut cells = Vec::with_capacity(width * height);
    for row in raster.chunks_exact(row_bytes) {
        cells.extend((0..width).map(|x| (row[x / 8] >> (7 - x % 8)) & 1));
    }
    Ok(cells)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
