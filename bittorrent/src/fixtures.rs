// In-memory `.torrent` construction for tests that would otherwise need a
// checked-in binary fixture file. Builds a typed value with the same shape
// `MetaInfo` decodes into and runs it through `bencode::encode_to_raw`, so
// the bytes on disk are produced the same way the rest of the crate would
// produce them, not hand-assembled bencode tokens.

use serde_derive::Serialize;
use sha1::Digest;
use std::io::Write;

#[derive(Serialize)]
struct FixtureFile<'a> {
    length: u64,
    path: Vec<&'a str>,
}

#[derive(Serialize)]
struct FixtureInfo<'a> {
    name: &'a str,
    #[serde(rename = "piece length")]
    piece_length: u32,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FixtureFile<'a>>>,
}

#[derive(Serialize)]
struct FixtureTorrent<'a> {
    announce: &'a str,
    info: FixtureInfo<'a>,
}

fn piece_hashes(contents: &[u8], piece_length: u32) -> Vec<u8> {
    let mut pieces = Vec::new();
    for chunk in contents.chunks(piece_length as usize) {
        let mut hasher = sha1::Sha1::new();
        hasher.update(chunk);
        pieces.extend_from_slice(&hasher.finalize());
    }
    pieces
}

// Deterministic, non-repeating filler so pieces don't all hash the same.
fn filler(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

// A single-file torrent of `num_pieces` pieces, the last possibly short.
pub(crate) fn single_file(name: &str, piece_length: u32, num_pieces: usize, last_len: usize) -> (Vec<u8>, u64) {
    assert!(num_pieces >= 1 && last_len > 0 && last_len <= piece_length as usize);
    let total = piece_length as u64 * (num_pieces as u64 - 1) + last_len as u64;
    let contents = filler(total as usize, 7);
    let pieces = piece_hashes(&contents, piece_length);

    let torrent = FixtureTorrent {
        announce: "http://tracker.example.com/announce",
        info: FixtureInfo {
            name,
            piece_length,
            pieces,
            length: Some(total),
            files: None,
        },
    };
    (bencode::encode_to_raw(&torrent).expect("fixture torrent encodes"), total)
}

// A multi-file torrent; `files` is `(relative path, length)` pairs, content
// hashed across the whole concatenated address space as the real format does.
pub(crate) fn multi_file(name: &str, piece_length: u32, files: &[(&str, u64)]) -> Vec<u8> {
    let total: u64 = files.iter().map(|(_, l)| l).sum();
    let contents = filler(total as usize, 13);
    let pieces = piece_hashes(&contents, piece_length);

    let fixture_files = files
        .iter()
        .map(|(path, length)| FixtureFile { length: *length, path: path.split('/').collect() })
        .collect();

    let torrent = FixtureTorrent {
        announce: "http://tracker.example.com/announce",
        info: FixtureInfo {
            name,
            piece_length,
            pieces,
            length: None,
            files: Some(fixture_files),
        },
    };
    bencode::encode_to_raw(&torrent).expect("fixture torrent encodes")
}

// Writes bencoded torrent bytes to a `NamedTempFile` with a `.torrent`
// extension (`MetaInfo::new` rejects anything else) and hands it back so the
// caller can pass its path straight to `MetaInfo::new`.
pub(crate) fn write_temp_torrent(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".torrent")
        .tempfile()
        .expect("create temp torrent file");
    file.write_all(bytes).expect("write temp torrent file");
    file
}
