//! A second, independent decode path over the same bytes the serde bridge
//! reads: a plain forward scan that never builds an intermediate value, and
//! instead hands back the byte range a top-level dictionary key's value
//! occupies in the *original* input. This is the only way to compute a
//! torrent's infohash correctly — hashing a re-encoded copy of the `info`
//! dict produces a different digest whenever the original encoding used
//! non-canonical key order, integer formatting, or was produced by a
//! different bencode implementation entirely.

use std::ops::Range;
use crate::error::{Error, Result};

/// Returns the byte range `data[range]` occupies for the value associated
/// with `key` in the top-level bencoded dictionary. `data` must start with
/// a dictionary (`d...e`); nested structures are skipped over without being
/// interpreted.
pub fn locate_top_level_key(data: &[u8], key: &[u8]) -> Result<Range<usize>> {
    let mut pos = 0usize;
    expect(data, &mut pos, b'd')?;

    loop {
        if peek(data, pos)? == b'e' {
            return Err(Error::KeyNotFound(String::from_utf8_lossy(key).into_owned()));
        }

        // Dict keys are always bencode byte-strings; read the string content
        // itself rather than the whole `<len>:<content>` token, or it would
        // never compare equal to the bare key bytes the caller passes in.
        let this_key = read_bytestring(data, &mut pos)?;

        let value_start = pos;
        if this_key == key {
            skip_value(data, &mut pos)?;
            return Ok(value_start..pos);
        }
        skip_value(data, &mut pos)?;
    }
}

fn read_bytestring<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len_start = *pos;
    while peek(data, *pos)? != b':' {
        *pos += 1;
    }
    let len: usize = std::str::from_utf8(&data[len_start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Custom("invalid byte string length".to_string()))?;
    *pos += 1;
    if *pos + len > data.len() {
        return Err(Error::EOF);
    }
    let content = &data[*pos..*pos + len];
    *pos += len;
    Ok(content)
}

fn peek(data: &[u8], pos: usize) -> Result<u8> {
    data.get(pos).copied().ok_or(Error::EOF)
}

fn expect(data: &[u8], pos: &mut usize, byte: u8) -> Result<()> {
    let found = peek(data, *pos)?;
    if found != byte {
        return Err(Error::InvalidToken {
            expected: (byte as char).to_string(),
            found: (found as char).to_string(),
        });
    }
    *pos += 1;
    Ok(())
}

/// Advances `pos` past one complete bencoded value (integer, byte string,
/// list, or dict) starting at `data[*pos]`, without interpreting it.
fn skip_value(data: &[u8], pos: &mut usize) -> Result<()> {
    match peek(data, *pos)? {
        b'i' => {
            *pos += 1;
            while peek(data, *pos)? != b'e' {
                *pos += 1;
            }
            *pos += 1;
            Ok(())
        }
        b'l' => {
            *pos += 1;
            while peek(data, *pos)? != b'e' {
                skip_value(data, pos)?;
            }
            *pos += 1;
            Ok(())
        }
        b'd' => {
            *pos += 1;
            while peek(data, *pos)? != b'e' {
                skip_value(data, pos)?; // key
                skip_value(data, pos)?; // value
            }
            *pos += 1;
            Ok(())
        }
        b'0'..=b'9' => {
            let len_start = *pos;
            while peek(data, *pos)? != b':' {
                *pos += 1;
            }
            let len: usize = std::str::from_utf8(&data[len_start..*pos])
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Custom("invalid byte string length".to_string()))?;
            *pos += 1;
            if *pos + len > data.len() {
                return Err(Error::EOF);
            }
            *pos += len;
            Ok(())
        }
        other => Err(Error::InvalidToken {
            expected: "a valid token type".to_string(),
            found: (other as char).to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_simple_key() {
        let data = b"d4:infod6:lengthi100eee";
        let r = locate_top_level_key(data, b"info").unwrap();
        assert_eq!(&data[r], b"d6:lengthi100ee");
    }

    #[test]
    fn locates_key_after_other_entries() {
        let data = b"d8:announce3:foo4:infod4:name3:bare4:pieces3:xyze";
        let r = locate_top_level_key(data, b"info").unwrap();
        assert_eq!(&data[r], b"d4:name3:bar4:pieces3:xyze");
    }

    #[test]
    fn missing_key_is_an_error() {
        let data = b"d8:announce3:fooe";
        assert!(locate_top_level_key(data, b"info").is_err());
    }

    #[test]
    fn span_is_stable_regardless_of_surrounding_whitespace_free_bencode() {
        // Two encodings of the same info dict with different announce
        // values still yield byte-identical info spans.
        let a = b"d8:announce3:abc4:infod4:name1:xee";
        let b = b"d8:announce6:abcdef4:infod4:name1:xee";
        let ra = locate_top_level_key(a, b"info").unwrap();
        let rb = locate_top_level_key(b, b"info").unwrap();
        assert_eq!(&a[ra], &b[rb]);
    }
}
