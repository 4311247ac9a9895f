//! Binary payloads: git's base85 + zlib `literal`/`delta` blocks and the
//! whole-file base64 bodies found in svn patches.

use std::io::Read;

use flate2::read::ZlibDecoder;
use tracing::debug;

use crate::errors::PatchError;

use super::{BinaryPayload, FileChange, GitBinaryHunk, Planned};

/// Digit alphabet of git's base85 encoding.
const ALPHABET: &[u8; 85] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz!#$%&()*+-;<=>?@^_`{|}~";

/// Largest up-front allocation for a delta result; the size header is
/// untrusted.
const MAX_DELTA_PREALLOC: usize = 1 << 24;

fn digit_value(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u32)
}

/// Decode one line of a binary block: a length character (`A`-`Z` for
/// 1-26 bytes, `a`-`z` for 27-52) followed by groups of five digits.
pub fn decode_line(line: &str) -> Result<Vec<u8>, String> {
    let bytes = line.as_bytes();
    let (&len_char, digits) = bytes
        .split_first()
        .ok_or_else(|| "empty binary line".to_string())?;
    let len = match len_char {
        b'A'..=b'Z' => (len_char - b'A') as usize + 1,
        b'a'..=b'z' => (len_char - b'a') as usize + 27,
        other => return Err(format!("bad length character '{}'", other as char)),
    };
    if digits.len() % 5 != 0 || digits.len() / 5 * 4 < len {
        return Err(format!(
            "line carries {} digits, too few for {} bytes",
            digits.len(),
            len
        ));
    }

    let mut out = Vec::with_capacity(digits.len() / 5 * 4);
    for group in digits.chunks(5) {
        let mut acc: u64 = 0;
        for &c in group {
            let value = digit_value(c).ok_or_else(|| format!("invalid base85 digit '{}'", c as char))?;
            acc = acc * 85 + u64::from(value);
        }
        let word = u32::try_from(acc).map_err(|_| "base85 group overflows 32 bits".to_string())?;
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.truncate(len);
    Ok(out)
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| format!("zlib: {}", e))?;
    Ok(out)
}

/// Decode a `literal N` / `delta N` header and its data lines.
pub fn decode_block(header: &str, lines: &[&str]) -> Result<GitBinaryHunk, String> {
    let mut parts = header.split_whitespace();
    let kind = parts.next().unwrap_or_default();
    let size: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("bad binary block header '{}'", header))?;

    let mut compressed = Vec::new();
    for line in lines {
        compressed.extend(decode_line(line)?);
    }
    let data = inflate(&compressed)?;
    if data.len() != size {
        return Err(format!(
            "{} block inflates to {} bytes, header says {}",
            kind,
            data.len(),
            size
        ));
    }
    match kind {
        "literal" => Ok(GitBinaryHunk::Literal(data)),
        "delta" => Ok(GitBinaryHunk::Delta(data)),
        other => Err(format!("unknown binary block type '{}'", other)),
    }
}

fn read_varint(delta: &[u8], pos: &mut usize) -> Result<usize, String> {
    let mut value = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta.get(*pos).ok_or_else(|| "truncated delta header".to_string())?;
        *pos += 1;
        value |= usize::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if shift > 56 {
            return Err("delta size too large".into());
        }
    }
}

/// Apply a git delta to `base`.
///
/// The delta starts with the source and target sizes, followed by copy
/// opcodes (high bit set: offset and size bytes selected by the low bits,
/// size 0 meaning 0x10000) and insert opcodes (1-127 literal bytes).
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, String> {
    let mut pos = 0;
    let source_size = read_varint(delta, &mut pos)?;
    if source_size != base.len() {
        return Err(format!(
            "delta expects a {} byte source, file has {} bytes",
            source_size,
            base.len()
        ));
    }
    let target_size = read_varint(delta, &mut pos)?;
    // Each opcode byte yields at most 0x10000 bytes.
    let bound = delta.len().saturating_mul(0x10000).min(MAX_DELTA_PREALLOC);
    let mut out = Vec::with_capacity(target_size.min(bound));

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;
        if op & 0x80 != 0 {
            let mut next = |present: bool, shift: u32| -> Result<usize, String> {
                if !present {
                    return Ok(0);
                }
                let byte = *delta.get(pos).ok_or_else(|| "truncated copy opcode".to_string())?;
                pos += 1;
                Ok(usize::from(byte) << shift)
            };
            let mut offset = 0;
            offset |= next(op & 0x01 != 0, 0)?;
            offset |= next(op & 0x02 != 0, 8)?;
            offset |= next(op & 0x04 != 0, 16)?;
            offset |= next(op & 0x08 != 0, 24)?;
            let mut size = 0;
            size |= next(op & 0x10 != 0, 0)?;
            size |= next(op & 0x20 != 0, 8)?;
            size |= next(op & 0x40 != 0, 16)?;
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| "copy opcode reads past the source".to_string())?;
            out.extend_from_slice(&base[offset..end]);
        } else if op != 0 {
            let end = pos + usize::from(op);
            let bytes = delta
                .get(pos..end)
                .ok_or_else(|| "truncated insert opcode".to_string())?;
            out.extend_from_slice(bytes);
            pos = end;
        } else {
            return Err("unexpected delta opcode 0".into());
        }
    }

    if out.len() != target_size {
        return Err(format!(
            "delta produced {} bytes, expected {}",
            out.len(),
            target_size
        ));
    }
    Ok(out)
}

fn realize(path: &str, hunk: &GitBinaryHunk, base: &[u8]) -> Result<Vec<u8>, PatchError> {
    match hunk {
        GitBinaryHunk::Literal(data) => Ok(data.clone()),
        GitBinaryHunk::Delta(delta) => {
            apply_delta(base, delta).map_err(|detail| PatchError::conflict(path, detail))
        }
    }
}

/// Decide what a binary file patch does given the current file contents.
pub(crate) fn plan(
    path: &str,
    change: FileChange,
    current: Option<&[u8]>,
    payload: &BinaryPayload,
) -> Result<Planned, PatchError> {
    match payload {
        BinaryPayload::SvnBase64(data) => match current {
            Some(existing) if existing == data.as_slice() => Err(PatchError::conflict(
                path,
                "binary file already has the patched contents",
            )),
            _ => Ok(Planned::Write {
                path: path.to_string(),
                contents: data.clone(),
                created: current.is_none(),
            }),
        },
        BinaryPayload::Git { forward, reverse } => match (change, current) {
            (FileChange::Create, Some(_)) => {
                Err(PatchError::conflict(path, "binary file to create already exists"))
            }
            (FileChange::Create, None) => Ok(Planned::Write {
                path: path.to_string(),
                contents: realize(path, forward, &[])?,
                created: true,
            }),
            (_, None) => Err(PatchError::conflict(path, "binary file does not exist")),
            (change, Some(existing)) => {
                let new = realize(path, forward, existing)?;
                if let Some(reverse) = reverse {
                    let old = realize(path, reverse, &new)?;
                    if old != existing {
                        return Err(PatchError::conflict(
                            path,
                            "binary file contents do not match the patch",
                        ));
                    }
                }
                debug!(path, bytes = new.len(), "binary patch verified");
                if change == FileChange::Delete {
                    Ok(Planned::Delete {
                        path: path.to_string(),
                    })
                } else {
                    Ok(Planned::Write {
                        path: path.to_string(),
                        contents: new,
                        created: false,
                    })
                }
            }
        },
    }
}
