//! Minimal NPZ codec for `f64` matrices.
//!
//! An `.npz` file is a zip archive of `.npy` arrays. Arrays are written as
//! NPY v1.0, little-endian `<f8`, C order, inside *stored* (uncompressed) zip
//! entries, which numpy's `np.load` reads directly. The reader accepts the
//! same subset: stored entries holding 2-D (or 0/1-D) `<f8` arrays.

use std::path::Path;

use crate::error::{Error, IoContext, Result};
use crate::math::matrix::Matrix;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_SIG: u32 = 0x0605_4b50;
// 1980-01-01, the zip epoch.
const DOS_DATE: u16 = (1 << 5) | 1;

/// Encodes named matrices as an NPZ archive.
pub fn encode(arrays: &[(&str, &Matrix)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for (name, matrix) in arrays {
        let file_name = format!("{name}.npy");
        let payload = encode_npy(matrix);
        let crc = crc32(&payload);
        let offset = out.len() as u32;

        put_u32(&mut out, LOCAL_HEADER_SIG);
        put_u16(&mut out, 20); // version needed
        put_u16(&mut out, 0); // flags
        put_u16(&mut out, 0); // stored
        put_u16(&mut out, 0); // mod time
        put_u16(&mut out, DOS_DATE);
        put_u32(&mut out, crc);
        put_u32(&mut out, payload.len() as u32);
        put_u32(&mut out, payload.len() as u32);
        put_u16(&mut out, file_name.len() as u16);
        put_u16(&mut out, 0); // extra
        out.extend_from_slice(file_name.as_bytes());
        out.extend_from_slice(&payload);

        put_u32(&mut central, CENTRAL_HEADER_SIG);
        put_u16(&mut central, 20); // version made by
        put_u16(&mut central, 20); // version needed
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u16(&mut central, DOS_DATE);
        put_u32(&mut central, crc);
        put_u32(&mut central, payload.len() as u32);
        put_u32(&mut central, payload.len() as u32);
        put_u16(&mut central, file_name.len() as u16);
        put_u16(&mut central, 0); // extra
        put_u16(&mut central, 0); // comment
        put_u16(&mut central, 0); // disk
        put_u16(&mut central, 0); // internal attrs
        put_u32(&mut central, 0); // external attrs
        put_u32(&mut central, offset);
        central.extend_from_slice(file_name.as_bytes());
    }

    let central_offset = out.len() as u32;
    let central_size = central.len() as u32;
    out.extend_from_slice(&central);

    put_u32(&mut out, END_OF_CENTRAL_SIG);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, arrays.len() as u16);
    put_u16(&mut out, arrays.len() as u16);
    put_u32(&mut out, central_size);
    put_u32(&mut out, central_offset);
    put_u16(&mut out, 0);
    out
}

/// Decodes every array in an NPZ archive, in archive order. Names have the
/// `.npy` suffix stripped.
pub fn decode(bytes: &[u8]) -> std::result::Result<Vec<(String, Matrix)>, String> {
    let eocd = find_end_of_central(bytes).ok_or("not a zip archive")?;
    let entries = read_u16(bytes, eocd + 10)? as usize;
    let mut pos = read_u32(bytes, eocd + 16)? as usize;

    let mut arrays = Vec::with_capacity(entries);
    for _ in 0..entries {
        if read_u32(bytes, pos)? != CENTRAL_HEADER_SIG {
            return Err("corrupt central directory".into());
        }
        let method = read_u16(bytes, pos + 10)?;
        let crc = read_u32(bytes, pos + 16)?;
        let size = read_u32(bytes, pos + 20)? as usize;
        let name_len = read_u16(bytes, pos + 28)? as usize;
        let extra_len = read_u16(bytes, pos + 30)? as usize;
        let comment_len = read_u16(bytes, pos + 32)? as usize;
        let local = read_u32(bytes, pos + 42)? as usize;
        let name = slice(bytes, pos + 46, name_len)?;
        let name = String::from_utf8_lossy(name).into_owned();
        pos += 46 + name_len + extra_len + comment_len;

        if method != 0 {
            return Err(format!("entry '{name}' is compressed; only stored entries are supported"));
        }
        if read_u32(bytes, local)? != LOCAL_HEADER_SIG {
            return Err(format!("corrupt local header for '{name}'"));
        }
        let local_name_len = read_u16(bytes, local + 26)? as usize;
        let local_extra_len = read_u16(bytes, local + 28)? as usize;
        let data = slice(bytes, local + 30 + local_name_len + local_extra_len, size)?;
        if crc32(data) != crc {
            return Err(format!("checksum mismatch in '{name}'"));
        }

        let matrix = decode_npy(data).map_err(|e| format!("{name}: {e}"))?;
        let key = name.strip_suffix(".npy").unwrap_or(&name).to_owned();
        arrays.push((key, matrix));
    }
    Ok(arrays)
}

/// Writes an NPZ file at `path`.
pub fn write_file(path: &Path, arrays: &[(&str, &Matrix)]) -> Result<()> {
    std::fs::write(path, encode(arrays)).at(path)
}

/// Reads every array of the NPZ file at `path`.
pub fn read_file(path: &Path) -> Result<Vec<(String, Matrix)>> {
    let bytes = std::fs::read(path).at(path)?;
    decode(&bytes).map_err(|e| Error::format(path, e))
}

fn encode_npy(m: &Matrix) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        m.rows, m.cols
    );
    // magic(6) + version(2) + len(2) + header, padded with spaces to 64 bytes
    // and terminated by a newline.
    let unpadded = 10 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + m.rows * m.cols * 8);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    put_u16(&mut out, header.len() as u16);
    out.extend_from_slice(header.as_bytes());
    for v in m.data.iter().flatten() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_npy(data: &[u8]) -> std::result::Result<Matrix, String> {
    if data.len() < 10 || &data[..6] != NPY_MAGIC {
        return Err("missing NPY magic".into());
    }
    let (header_len, header_start) = match data[6] {
        1 => (read_u16(data, 8)? as usize, 10),
        2 | 3 => (read_u32(data, 8)? as usize, 12),
        v => return Err(format!("unsupported NPY version {v}")),
    };
    let header = std::str::from_utf8(slice(data, header_start, header_len)?)
        .map_err(|_| "header is not UTF-8")?;

    if !header.contains("'descr': '<f8'") {
        return Err("only little-endian float64 arrays are supported".into());
    }
    if header.contains("'fortran_order': True") {
        return Err("Fortran-ordered arrays are not supported".into());
    }
    let shape = parse_shape(header)?;
    let (rows, cols) = match shape.as_slice() {
        [] => (1, 1),
        [n] => (1, *n),
        [r, c] => (*r, *c),
        _ => return Err(format!("expected at most 2 dimensions, got {}", shape.len())),
    };

    let body_len = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| format!("shape ({rows}, {cols}) is too large"))?;
    let body = slice(data, header_start + header_len, body_len)?;
    let values: Vec<f64> = body
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
        .collect();
    Matrix::from_flat(rows, cols, &values).ok_or_else(|| "data length does not match shape".into())
}

fn parse_shape(header: &str) -> std::result::Result<Vec<usize>, String> {
    let start = header.find("'shape':").ok_or("header has no shape")? + "'shape':".len();
    let rest = &header[start..];
    let open = rest.find('(').ok_or("malformed shape")?;
    let close = rest.find(')').ok_or("malformed shape")?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| format!("bad dimension '{s}'")))
        .collect()
}

fn find_end_of_central(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 22 {
        return None;
    }
    let lowest = bytes.len().saturating_sub(22 + u16::MAX as usize);
    (lowest..=bytes.len() - 22)
        .rev()
        .find(|&i| bytes[i..i + 4] == END_OF_CENTRAL_SIG.to_le_bytes())
}

fn slice(bytes: &[u8], start: usize, len: usize) -> std::result::Result<&[u8], String> {
    bytes
        .get(start..start.checked_add(len).ok_or("length overflow")?)
        .ok_or_else(|| "unexpected end of file".to_owned())
}

fn read_u16(bytes: &[u8], at: usize) -> std::result::Result<u16, String> {
    let b = slice(bytes, at, 2)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> std::result::Result<u32, String> {
    let b = slice(bytes, at, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// CRC-32 (IEEE 802.3), as required by the zip format.
fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut k = 0;
            while k < 8 {
                c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
                k += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };
    !data.iter().fold(!0u32, |c, &b| TABLE[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn values_survive_bit_for_bit() {
        let w1 = Matrix::from_data(vec![
            vec![0.1, -2.5e-300, f64::MAX],
            vec![1.0 / 3.0, -0.0, 7.0],
        ]);
        let b2 = Matrix::from_data(vec![vec![std::f64::consts::PI]]);
        let bytes = encode(&[("W1", &w1), ("b2", &b2)]);
        let arrays = decode(&bytes).unwrap();
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays[0].0, "W1");
        let bits = |m: &Matrix| m.flatten().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&arrays[0].1), bits(&w1));
        assert_eq!(arrays[1].1.shape(), (1, 1));
        assert_eq!(bits(&arrays[1].1), bits(&b2));
    }

    #[test]
    fn npy_header_is_aligned() {
        let bytes = encode_npy(&Matrix::zeros(3, 4));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');
        assert_eq!(bytes.len(), 10 + header_len + 12 * 8);
    }

    #[test]
    fn rejects_corruption() {
        let m = Matrix::zeros(2, 2);
        let mut bytes = encode(&[("W1", &m)]);
        // Flip a payload byte (past the local header, name and NPY header).
        let idx = 30 + "W1.npy".len() + 70;
        bytes[idx] ^= 0xFF;
        assert!(decode(&bytes).unwrap_err().contains("checksum"));
        assert!(decode(b"garbage").is_err());
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 4), }}\n", usize::MAX / 2);
        let mut data = NPY_MAGIC.to_vec();
        data.extend_from_slice(&[1, 0]);
        put_u16(&mut data, header.len() as u16);
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(&[0u8; 32]);
        assert!(decode_npy(&data).unwrap_err().contains("too large"));
    }
}
