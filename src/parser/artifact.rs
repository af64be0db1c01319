use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// Name plus per-member path segments; `members` is None for single-file artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArtifact {
    pub name: String,
    pub members: Option<Vec<Vec<String>>>,
}

impl DecodedArtifact {
    /// Member paths joined with `/`; a single-file artifact yields its name.
    pub fn paths(&self) -> Vec<String> {
        match &self.members {
            Some(members) => members.iter().map(|segments| segments.join("/")).collect(),
            None => vec![self.name.clone()],
        }
    }
}

pub trait ArtifactDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedArtifact, DecodeError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MetaInfo {
    pub info: Info,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Info {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<MemberFile>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct MemberFile {
    pub length: i64,
    pub path: Vec<String>,
}

/// `.torrent` metadata via `serde_bencode`. Only `info.name` and `info.files[].path` are read.
pub struct BencodeDecoder;

impl ArtifactDecoder for BencodeDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedArtifact, DecodeError> {
        let meta: MetaInfo = serde_bencode::from_bytes(bytes)?;
        if meta.info.name.trim().is_empty() {
            return Err(DecodeError::MissingName);
        }
        Ok(DecodedArtifact {
            name: meta.info.name,
            members: meta
                .info
                .files
                .map(|files| files.into_iter().map(|f| f.path).collect()),
        })
    }
}

/// Paths whose extension is on the allow-list, compared case-insensitively. Order is kept.
pub fn filter_by_extension(paths: Vec<String>, extensions: &[String]) -> Vec<String> {
    let allowed: Vec<String> = extensions.iter().map(|e| e.to_lowercase()).collect();
    paths
        .into_iter()
        .filter(|p| {
            let lower = p.to_lowercase();
            allowed.iter().any(|ext| lower.ends_with(ext.as_str()))
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn encode_torrent(name: &str, members: Option<&[&[&str]]>) -> Vec<u8> {
    let files = members.map(|members| {
        members
            .iter()
            .map(|segments| MemberFile {
                length: 1,
                path: segments.iter().map(|s| s.to_string()).collect(),
            })
            .collect()
    });
    let meta = MetaInfo {
        info: Info {
            name: name.to_string(),
            files,
        },
    };
    serde_bencode::to_bytes(&meta).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractSettings;

    #[test]
    fn decodes_multi_file_artifact() {
        let members: &[&[&str]] = &[&["Season 1", "Show.S01E01.mkv"], &["notes.txt"]];
        let bytes = encode_torrent("Show", Some(members));
        let decoded = BencodeDecoder.decode(&bytes).unwrap();
        assert_eq!(decoded.name, "Show");
        assert_eq!(
            decoded.paths(),
            vec!["Season 1/Show.S01E01.mkv".to_string(), "notes.txt".to_string()]
        );
    }

    #[test]
    fn decodes_single_file_artifact() {
        let bytes = encode_torrent("Movie.2020.1080p.MP4", None);
        let decoded = BencodeDecoder.decode(&bytes).unwrap();
        assert_eq!(decoded.members, None);
        assert_eq!(decoded.paths(), vec!["Movie.2020.1080p.MP4".to_string()]);
    }

    #[test]
    fn ignores_unknown_keys() {
        let raw = b"d8:announce3:url4:infod6:lengthi5e4:name9:Movie.mkv12:piece lengthi16e6:pieces3:abcee";
        let decoded = BencodeDecoder.decode(raw).unwrap();
        assert_eq!(decoded.name, "Movie.mkv");
    }

    #[test]
    fn rejects_garbage() {
        assert!(BencodeDecoder.decode(b"not bencode").is_err());
        assert!(BencodeDecoder.decode(b"").is_err());
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let exts = ExtractSettings::default().extensions;
        let kept = filter_by_extension(
            vec![
                "a/Ep1.MKV".into(),
                "a/cover.jpg".into(),
                "a/Ep2.mp4".into(),
                "a/readme".into(),
            ],
            &exts,
        );
        assert_eq!(kept, vec!["a/Ep1.MKV".to_string(), "a/Ep2.mp4".to_string()]);
    }
}
