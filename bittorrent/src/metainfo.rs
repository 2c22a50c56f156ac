use rand::seq::SliceRandom;
use serde_derive::{Deserialize, Serialize};
use crate::store::FileInfo;

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    BencodeError(#[from] bencode::Error),

    #[error("invalid file extension, expected .torrent")]
    InvalidExtension,

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("invalid pieces length, must be divisible by 20")]
    InvalidPiecesLength,

    #[error("file(s) with size 0")]
    FileNoSize,

    #[error("file(s) with no path")]
    FileEmptyPath,

    #[error("file has absolute path")]
    FileAbsolutePath,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct File {

    // #[serde(deserialize_with = "crate::de::path_deserialize")]
    pub path: Vec<String>,

    pub length: u64,

    #[serde(default)]
    pub md5sum: Option<String>,

}

#[derive(Clone, Deserialize, Serialize)]
pub struct Info {

    // File namepub .
    pub name: String,
    
    // String consisting of the concatenation of all 20-byte SHA1 hash values, one per piece.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    // Number of bytes in each piece (integer).
    #[serde(rename = "piece length")]
    pub piece_length: u32,

    // A 32-character hexadecimal string corresponding to the MD5 sum of the file.
    #[serde(default)]
    pub md5sum: Option<String>,
    
    // Length of the file in bytes (integer).
    #[serde(default)]
    pub length: Option<u64>,

    // A list of dictionaries, one for each file.
    #[serde(default)]
    pub files: Option<Vec<File>>,
    
    // If it is set to "1", the client MUST publish its presence to get other peers ONLY 
    // via the trackers explicitly described in the metainfo file. If this field is set to 
    // "0" or is not present, the client may obtain peer from other means, e.g. PEX peer exchange, dht.
    #[serde(default)]
    pub private: Option<u8>,

    #[serde(default)]
    #[serde(rename = "root hash")]
    pub root_hash: Option<String>,

}

impl Info {
    // Hashes the raw bytes of the info dict as they appeared in the original
    // metainfo file. Re-encoding the deserialized struct would produce a
    // different hash the moment our bencode encoder orders or formats a key
    // differently than the torrent's author did, so we locate the original
    // byte span instead of serializing self.
    fn info_hash(raw: &[u8]) -> Result<[u8; 20], MetaInfoError> {
        use sha1::Digest;
        let span = bencode::locate_top_level_key(raw, b"info")?;
        let mut hasher = sha1::Sha1::new();
        hasher.update(&raw[span]);
        Ok(hasher.finalize().into())
    }
}

#[allow(dead_code)]
#[derive(Deserialize, Clone)]
pub struct MetaInfo {
    
    // The announce URL of the tracker (string).
    #[serde(deserialize_with = "crate::de::url_deserialize")]
    pub announce: url::Url,
    
    // A dictionary that describes the file(s) of the torrent.
    pub info: Info,
    
    // sha1 hash of info dict
    #[serde(skip)] 
    pub info_hash: [u8; 20],
    
    // (optional) the string encoding format used to generate the pieces part of the info 
    // dictionary in the .torrent metafile (string).
    #[serde(default)]
    pub encoding: Option<String>,
    
    // (optional) this is an extention to the official specification, offering backwards-compatibility.
    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(deserialize_with = "crate::de::announce_list_deserialize")]
    pub announce_list: Option<Vec<Vec<url::Url>>>,
    
    // (optional) the creation time of the torrent, in standard UNIX epoch format.
    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<i64>,
    
    // (optional) free-form textual comments of the author (string).
    #[serde(default)]
    #[serde(rename = "comment")]
    pub comment: Option<String>,
    
    // (optional) name and version of the program used to create the .torrent (string).
    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,
    
}

impl MetaInfo {

    pub fn new<P: AsRef<std::path::Path>>(path: P) -> Result<MetaInfo, MetaInfoError> {
        
        if path.as_ref().extension().unwrap_or_default() != "torrent" {
            return Err(MetaInfoError::InvalidExtension);
        }

        let raw = std::fs::read(path)?;
        let mut metainfo: MetaInfo = bencode::decode_bytes(&raw)?;

        if metainfo.info.pieces.len() % 20 != 0 || metainfo.info.pieces.is_empty() {
            return Err(MetaInfoError::InvalidPiecesLength);
        }

        metainfo.info_hash = Info::info_hash(&raw)?;
        tracing::debug!("metainfo created: {:#?}", metainfo);
        Ok(metainfo)
    }

    pub fn piece_hashes(&self) -> Vec<[u8; 20]> {
        self.info.pieces
            .chunks_exact(20)
            // Safe as we have already checked length is a multiple of 20, in new.
            .map(|c| c.try_into().unwrap())
            .collect()
    }

    pub fn piece_len(&self) -> usize { self.info.piece_length as usize }

    pub fn num_pieces(&self) -> u32 { self.info.pieces.len() as u32 / 20 }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }
    
    pub fn single_file_len(&self) -> Option<u64> { self.info.length }

    pub fn total_len(&self) -> u64 {
        if let Some(files) = &self.info.files {
            files.iter().map(|f| f.length as u64).sum()
        } else {
            self.info.length.unwrap_or(0) as u64
        }
    }

    pub fn info_hash(&self) -> [u8; 20] { self.info_hash }
    
    pub fn name(&self) -> &str { &self.info.name }

    // Tracker tiers in announce order, the urls of each tier shuffled per BEP12.
    pub fn tracker_tiers(&self) -> Vec<Vec<url::Url>> {
        if let Some(announce_list) = self.announce_list.clone() {
            announce_list
                .into_iter()
                .map(|mut tier| {
                    tier.shuffle(&mut rand::thread_rng());
                    tier
                })
                .collect()
        } else {
            vec![vec![self.announce.clone()]]
        }
    }

    // Tracker tiers ready to announce to, mirroring `tracker_tiers` but
    // wrapped in the connection state each `Tracker` carries between announces.
    pub fn trackers(&self) -> Vec<Vec<crate::tracker::Tracker>> {
        self.tracker_tiers()
            .into_iter()
            .map(|tier| tier.into_iter().map(crate::tracker::Tracker::new).collect())
            .collect()
    }

    pub fn files(&self) -> Vec<FileInfo> {
        if let Some(files) = &self.info.files {
            let mut offset = 0;
            files.iter().map(|f| {
                let file_info = FileInfo {
                    path: f.path.join("/").into(),
                    length: f.length as usize,
                    offset,
                    md5sum: f.md5sum.clone(),
                };
                offset += f.length as usize;
                file_info
            }).collect()
        } else {
            vec![FileInfo {
                path: self.info.name.clone().into(),
                length: self.info.length.unwrap() as usize,
                offset: 0,
                md5sum: None,
            }]
        }
    }

    // Formatting methods.

    pub fn creation_date_fmt(&self) -> Option<String> {
        self.creation_date.map(|v| {
            let date = chrono::NaiveDateTime::from_timestamp_opt(v, 0);
            date.map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "Invalid date".to_string())
        })
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(&self.info_hash)
    }

    pub fn size_fmt(&self) -> String {
        if self.is_multi_file() {
            let size = self.info.files.as_ref().unwrap().iter()
                .map(|f| f.length)
                .sum::<u64>();
            format_size(size)
        } else {
            format_size(self.info.length.unwrap())
        }
    }
}

fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    if size > 1024.0 {
        size /= 1024.0;
        unit = "KiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "MiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "GiB";
    }
    if size > 1024.0 {
        size /= 1024.0;
        unit = "TiB";
    }
    format!("{:.2} {}", size, unit)
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("encoding", &self.encoding)
            // Change urls to strings for printing.
            .field("announce_list", &self.announce_list.as_ref().map(|v| 
                v.iter().map(|v| 
                    v.iter().map(|v| 
                        v.as_str()
                    ).collect()
                ).collect::<Vec<Vec<&str>>>()
            ))
            .field("creation_date", &self.creation_date_fmt())
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Dont want to print out the pieces field, so we implement Debug manually.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num pieces", &(&self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("md5sum", &self.md5sum)
            .field("length", &self.length)
            .field("files", &self.files)
            .field("private", &self.private)
            .field("root_hash", &self.root_hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn single_file_metainfo_fields() {
        let (bytes, total) = fixtures::single_file("small.bin", 32_768, 3, 4_096);
        let file = fixtures::write_temp_torrent(&bytes);
        let metainfo = MetaInfo::new(file.path()).unwrap();
        assert_eq!(metainfo.num_pieces(), 3);
        assert_eq!(metainfo.info.piece_length, 32_768);
        assert_eq!(metainfo.total_len(), total);
        assert_eq!(metainfo.is_multi_file(), false);
        assert_eq!(metainfo.name(), "small.bin");
    }

    #[test]
    fn multi_file_metainfo_is_flagged_multi() {
        let bytes = fixtures::multi_file("pack", 16_384, &[("a.bin", 10_000), ("b.bin", 22_000)]);
        let file = fixtures::write_temp_torrent(&bytes);
        let metainfo = MetaInfo::new(file.path()).unwrap();
        assert!(metainfo.is_multi_file());
        assert_eq!(metainfo.total_len(), 32_000);
        let files = metainfo.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].offset, 0);
        assert_eq!(files[1].offset, 10_000);
    }

    #[test]
    fn info_hash_is_stable_across_reloads() {
        // Loading the same file twice must produce the same hash; guards
        // against info_hash depending on anything derived at decode time
        // rather than the original bytes.
        let (bytes, _) = fixtures::single_file("small.bin", 32_768, 2, 100);
        let file = fixtures::write_temp_torrent(&bytes);
        let a = MetaInfo::new(file.path()).unwrap();
        let b = MetaInfo::new(file.path()).unwrap();
        assert_eq!(a.info_hash(), b.info_hash());
    }

    #[test]
    fn info_hash_is_taken_from_original_bytes_not_a_re_encoding() {
        // Build an info dict with non-canonical (not lexicographically
        // sorted) key order by hand -- something our own encoder would never
        // produce -- and confirm the hash matches SHA-1 over that exact
        // span, not over a canonicalised re-encoding of the decoded value.
        let info = b"d6:pieces20:aaaaaaaaaaaaaaaaaaaa4:name3:foo12:piece lengthi16384e6:lengthi16384ee";
        let mut raw = Vec::new();
        // `announce` must be a valid absolute URL -- `MetaInfo` parses it
        // via `url::Url::parse` before the infohash is ever computed, so a
        // placeholder like `foo` would fail decode and never reach the
        // span logic this test exists to exercise.
        raw.extend_from_slice(b"d8:announce22:http://t.test/announce4:info");
        raw.extend_from_slice(info);
        raw.push(b'e');

        let file = fixtures::write_temp_torrent(&raw);
        let metainfo = MetaInfo::new(file.path()).unwrap();

        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(info);
        let expected: [u8; 20] = hasher.finalize().into();
        assert_eq!(metainfo.info_hash(), expected);
    }

    #[test]
    fn tracker_tiers_fall_back_to_announce_when_no_announce_list() {
        let (bytes, _) = fixtures::single_file("small.bin", 32_768, 1, 100);
        let file = fixtures::write_temp_torrent(&bytes);
        let metainfo = MetaInfo::new(file.path()).unwrap();
        let tiers = metainfo.tracker_tiers();
        assert!(!tiers.is_empty());
        assert!(tiers.iter().flatten().next().is_some());
    }

    #[test]
    fn pieces_length_not_a_multiple_of_twenty_is_rejected() {
        // `pieces` deliberately 19 bytes, not a multiple of 20. `announce`
        // must still be a valid absolute URL so this actually exercises the
        // pieces-length check rather than failing earlier on URL parsing.
        let pieces = "a".repeat(19);
        let raw = format!(
            "d8:announce22:http://t.test/announce4:infod6:lengthi100e4:name3:foo12:piece lengthi100e6:pieces19:{pieces}ee"
        );
        let file = fixtures::write_temp_torrent(raw.as_bytes());
        assert!(MetaInfo::new(file.path()).is_err());
    }
}
