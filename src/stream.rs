//! Token-level reading and writing of models.
//!
//! Both encodings share one layout: whitespace-terminated tokens, integers, floats, and bracketed
//! matrices / vectors. In binary mode tokens are terminated by a single space, integers and
//! floats are a one-byte size followed by little-endian bytes, and matrices / vectors are a
//! `FM` / `FV` token followed by their dims and raw `f32` data.

use std::io::{self, BufRead, Write};

use faer::prelude::*;

use crate::{NnetError, NnetResult, utils::fill_row_major};

/// Header written at the start of a binary model file.
pub const BINARY_HEADER: &[u8; 2] = b"\0B";

fn eof_to_format(error: io::Error) -> NnetError {
    match error.kind() {
        io::ErrorKind::UnexpectedEof => NnetError::stream("unexpected end of stream"),
        _ => NnetError::Io(error),
    }
}

pub fn write_binary_header(w: &mut dyn Write) -> NnetResult<()> {
    w.write_all(BINARY_HEADER)?;
    Ok(())
}

/// Consumes the binary header if present.
/// Returns whether the stream is binary.
pub fn read_binary_header(r: &mut dyn BufRead) -> NnetResult<bool> {
    let is_binary = r.fill_buf()?.starts_with(BINARY_HEADER);
    if is_binary {
        r.consume(BINARY_HEADER.len());
    }
    Ok(is_binary)
}

/// Skip whitespace in text mode, then report whether the stream is exhausted.
pub fn at_eof(r: &mut dyn BufRead, binary: bool) -> NnetResult<bool> {
    if !binary {
        skip_whitespace(r)?;
    }
    Ok(r.fill_buf()?.is_empty())
}

fn skip_whitespace(r: &mut dyn BufRead) -> NnetResult<()> {
    loop {
        let (n, done) = {
            let buf = r.fill_buf()?;
            let n = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            (n, n < buf.len() || buf.is_empty())
        };
        r.consume(n);
        if done {
            return Ok(());
        }
    }
}

fn read_word(r: &mut dyn BufRead) -> NnetResult<String> {
    skip_whitespace(r)?;
    let mut bytes = Vec::new();
    loop {
        let (n, done) = {
            let buf = r.fill_buf()?;
            let n = buf.iter().take_while(|b| !b.is_ascii_whitespace()).count();
            bytes.extend_from_slice(&buf[..n]);
            (n, n < buf.len() || buf.is_empty())
        };
        r.consume(n);
        if done {
            break;
        }
    }
    if bytes.is_empty() {
        return Err(NnetError::stream("unexpected end of stream"));
    }
    String::from_utf8(bytes).map_err(|_| NnetError::stream("token is not valid UTF-8"))
}

pub fn write_token(w: &mut dyn Write, _binary: bool, token: &str) -> NnetResult<()> {
    debug_assert!(!token.is_empty() && !token.contains(char::is_whitespace));
    write!(w, "{token} ")?;
    Ok(())
}

pub fn read_token(r: &mut dyn BufRead, binary: bool) -> NnetResult<String> {
    if !binary {
        return read_word(r);
    }
    let mut bytes = Vec::new();
    r.read_until(b' ', &mut bytes)?;
    match bytes.pop() {
        None => Err(NnetError::stream("unexpected end of stream")),
        Some(b' ') if !bytes.is_empty() => {
            String::from_utf8(bytes).map_err(|_| NnetError::stream("token is not valid UTF-8"))
        }
        Some(_) => Err(NnetError::stream("truncated token")),
    }
}

/// Whether the next item is a `<...>` token, without consuming it.
pub fn peek_is_token(r: &mut dyn BufRead, binary: bool) -> NnetResult<bool> {
    if !binary {
        skip_whitespace(r)?;
    }
    Ok(r.fill_buf()?.first() == Some(&b'<'))
}

pub fn expect_token(r: &mut dyn BufRead, binary: bool, expected: &str) -> NnetResult<()> {
    let token = read_token(r, binary)?;
    if token != expected {
        return Err(NnetError::stream(format!("expected token {expected}, got {token}")));
    }
    Ok(())
}

pub fn write_newline(w: &mut dyn Write, binary: bool) -> NnetResult<()> {
    if !binary {
        writeln!(w)?;
    }
    Ok(())
}

fn read_sized<const N: usize>(r: &mut dyn BufRead) -> NnetResult<[u8; N]> {
    let mut size = [0u8; 1];
    r.read_exact(&mut size).map_err(eof_to_format)?;
    if size[0] as usize != N {
        return Err(NnetError::stream(format!(
            "expected a {N}-byte value, got size marker {}",
            size[0]
        )));
    }
    let mut bytes = [0u8; N];
    r.read_exact(&mut bytes).map_err(eof_to_format)?;
    Ok(bytes)
}

fn parse_word<T: std::str::FromStr>(r: &mut dyn BufRead, what: &str) -> NnetResult<T> {
    let word = read_word(r)?;
    word.parse()
        .map_err(|_| NnetError::stream(format!("expected {what}, got {word:?}")))
}

pub fn write_i32(w: &mut dyn Write, binary: bool, value: i32) -> NnetResult<()> {
    match binary {
        true => {
            w.write_all(&[4u8])?;
            w.write_all(&value.to_le_bytes())?;
        }
        false => write!(w, "{value} ")?,
    }
    Ok(())
}

pub fn read_i32(r: &mut dyn BufRead, binary: bool) -> NnetResult<i32> {
    match binary {
        true => Ok(i32::from_le_bytes(read_sized::<4>(r)?)),
        false => parse_word(r, "an integer"),
    }
}

/// Dims are written as `i32`.
pub fn write_dim(w: &mut dyn Write, binary: bool, dim: usize) -> NnetResult<()> {
    let dim = i32::try_from(dim).map_err(|_| NnetError::stream(format!("dim {dim} too large")))?;
    write_i32(w, binary, dim)
}

pub fn read_dim(r: &mut dyn BufRead, binary: bool) -> NnetResult<usize> {
    let dim = read_i32(r, binary)?;
    usize::try_from(dim).map_err(|_| NnetError::stream(format!("negative dim {dim}")))
}

pub fn write_f32(w: &mut dyn Write, binary: bool, value: f32) -> NnetResult<()> {
    match binary {
        true => {
            w.write_all(&[4u8])?;
            w.write_all(&value.to_le_bytes())?;
        }
        false => write!(w, "{value} ")?,
    }
    Ok(())
}

pub fn read_f32(r: &mut dyn BufRead, binary: bool) -> NnetResult<f32> {
    match binary {
        true => Ok(f32::from_le_bytes(read_sized::<4>(r)?)),
        false => parse_word(r, "a float"),
    }
}

fn write_raw_f32s(w: &mut dyn Write, values: &[f32]) -> NnetResult<()> {
    if cfg!(target_endian = "little") {
        w.write_all(bytemuck::cast_slice(values))?;
    } else {
        for value in values {
            w.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_raw_f32s(r: &mut dyn BufRead, len: usize) -> NnetResult<Vec<f32>> {
    let mut bytes = vec![0u8; len * size_of::<f32>()];
    r.read_exact(&mut bytes).map_err(eof_to_format)?;
    if cfg!(target_endian = "little") {
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    } else {
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

pub fn write_matrix(w: &mut dyn Write, binary: bool, mat: MatRef<f32>) -> NnetResult<()> {
    if binary {
        write_token(w, binary, "FM")?;
        write_dim(w, binary, mat.nrows())?;
        write_dim(w, binary, mat.ncols())?;
        let mut values = Vec::new();
        crate::utils::extend_row_major(&mut values, mat);
        return write_raw_f32s(w, &values);
    }
    write!(w, " [")?;
    for i in 0..mat.nrows() {
        write!(w, "\n ")?;
        for j in 0..mat.ncols() {
            write!(w, " {}", mat[(i, j)])?;
        }
    }
    writeln!(w, " ]")?;
    Ok(())
}

/// Read a matrix whose shape the caller already knows.
pub fn read_matrix(
    r: &mut dyn BufRead,
    binary: bool,
    nrows: usize,
    ncols: usize,
) -> NnetResult<Mat<f32>> {
    let mut mat = Mat::<f32>::zeros(nrows, ncols);
    if binary {
        expect_token(r, binary, "FM")?;
        let (file_nrows, file_ncols) = (read_dim(r, binary)?, read_dim(r, binary)?);
        if (file_nrows, file_ncols) != (nrows, ncols) {
            return Err(NnetError::stream(format!(
                "expected a {nrows}x{ncols} matrix, got {file_nrows}x{file_ncols}"
            )));
        }
        let values = read_raw_f32s(r, nrows * ncols)?;
        fill_row_major(mat.as_mut(), &values);
        return Ok(mat);
    }
    expect_token(r, binary, "[")?;
    for i in 0..nrows {
        for j in 0..ncols {
            mat[(i, j)] = parse_word(r, "a matrix element")?;
        }
    }
    expect_token(r, binary, "]")?;
    Ok(mat)
}

pub fn write_vector(w: &mut dyn Write, binary: bool, values: &[f32]) -> NnetResult<()> {
    if binary {
        write_token(w, binary, "FV")?;
        write_dim(w, binary, values.len())?;
        return write_raw_f32s(w, values);
    }
    write!(w, " [")?;
    for value in values {
        write!(w, " {value}")?;
    }
    writeln!(w, " ]")?;
    Ok(())
}

pub fn read_vector(r: &mut dyn BufRead, binary: bool, dim: usize) -> NnetResult<Vec<f32>> {
    if binary {
        expect_token(r, binary, "FV")?;
        let file_dim = read_dim(r, binary)?;
        if file_dim != dim {
            return Err(NnetError::stream(format!(
                "expected a vector of dim {dim}, got {file_dim}"
            )));
        }
        return read_raw_f32s(r, dim);
    }
    expect_token(r, binary, "[")?;
    let values = (0..dim)
        .map(|_| parse_word(r, "a vector element"))
        .collect::<NnetResult<Vec<f32>>>()?;
    expect_token(r, binary, "]")?;
    Ok(values)
}
