//! The persisted local index
//!
//! One line per filename, `filename,version,h0 h1 h2` (or
//! `filename,version,0` for a tombstone): the client's best-effort record
//! of what it last believed matched the server. Held in memory as a
//! filename-keyed map and serialized back to the line format only at
//! commit time.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{ensure, eyre};
use color_eyre::Result;

use crate::hash::BlockHash;
use crate::meta::{FileMetadata, HashList};

/// Index filename, stored at the root of the synchronized directory
pub const INDEX_FILE: &str = "index.txt";
/// Scratch name used during the atomic rewrite
pub const INDEX_TMP_FILE: &str = "index.txt.tmp";

const TOMBSTONE_FIELD: &str = "0";

/// The client's baseline snapshot, loaded at the start of a run and
/// rewritten in one pass at the end.
#[derive(Debug)]
pub struct LocalIndex {
    path: PathBuf,
    entries: BTreeMap<String, FileMetadata>,
}

impl LocalIndex {
    /// Load the index from `base_dir`, or start empty if the file does
    /// not exist (first-ever run).
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let path = base_dir.join(INDEX_FILE);
        let mut entries = BTreeMap::new();

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            for line in contents.lines() {
                if line.is_empty() {
                    continue;
                }
                let meta = decode_line(line)?;
                entries.insert(meta.filename.clone(), meta);
            }
        }

        Ok(Self { path, entries })
    }

    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&FileMetadata> {
        self.entries.get(filename)
    }

    /// Insert or replace the entry for `meta.filename`.
    pub fn set(&mut self, meta: FileMetadata) {
        self.entries.insert(meta.filename.clone(), meta);
    }

    /// Put a filename's entry back to a previously captured state.
    /// `None` means the filename had no entry.
    pub fn restore(&mut self, filename: &str, prior: Option<FileMetadata>) {
        match prior {
            Some(meta) => {
                self.entries.insert(meta.filename.clone(), meta);
            }
            None => {
                self.entries.remove(filename);
            }
        }
    }

    /// All tracked filenames, cloned so the caller can mutate while
    /// iterating.
    #[must_use]
    pub fn filenames(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileMetadata)> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the index file in one pass, via temp-file-then-rename so a
    /// crash mid-commit never leaves a torn index. Lines are written
    /// sorted by filename; readers must not rely on order.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written or renamed.
    pub fn commit(&self) -> Result<()> {
        let mut contents = String::new();
        for meta in self.entries.values() {
            contents.push_str(&encode_line(meta));
            contents.push('\n');
        }

        let tmp = self.path.with_file_name(INDEX_TMP_FILE);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn encode_line(meta: &FileMetadata) -> String {
    let hashes = match &meta.hashes {
        HashList::Tombstone => TOMBSTONE_FIELD.to_string(),
        HashList::Blocks(hashes) => hashes
            .iter()
            .map(BlockHash::to_hex)
            .collect::<Vec<_>>()
            .join(" "),
    };
    format!("{},{},{}", meta.filename, meta.version, hashes)
}

fn decode_line(line: &str) -> Result<FileMetadata> {
    let mut fields = line.splitn(3, ',');
    let filename = fields
        .next()
        .ok_or_else(|| eyre!("index line missing filename: {line:?}"))?;
    let version = fields
        .next()
        .ok_or_else(|| eyre!("index line missing version: {line:?}"))?;
    let hashes = fields
        .next()
        .ok_or_else(|| eyre!("index line missing hash list: {line:?}"))?;

    ensure!(!filename.is_empty(), "index line has empty filename: {line:?}");
    let version: u64 = version
        .parse()
        .map_err(|e| eyre!("bad version in index line {line:?}: {e}"))?;

    let hashes = if hashes.trim() == TOMBSTONE_FIELD {
        HashList::Tombstone
    } else {
        HashList::Blocks(
            hashes
                .split_whitespace()
                .map(BlockHash::parse_hex)
                .collect::<Result<Vec<_>>>()?,
        )
    };

    Ok(FileMetadata {
        filename: filename.to_string(),
        version,
        hashes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks<const N: usize>(contents: [&[u8]; N]) -> HashList {
        HashList::Blocks(contents.iter().map(|c| BlockHash::from_data(c)).collect())
    }

    #[test]
    fn test_missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = LocalIndex::load(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_commit_and_reload() {
        let dir = tempfile::tempdir().unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "a.txt".to_string(),
            version: 3,
            hashes: blocks([b"one", b"two"]),
        });
        index.set(FileMetadata {
            filename: "gone.txt".to_string(),
            version: 5,
            hashes: HashList::Tombstone,
        });
        index.set(FileMetadata {
            filename: "empty.txt".to_string(),
            version: 1,
            hashes: HashList::Blocks(Vec::new()),
        });
        index.commit().unwrap();

        let reloaded = LocalIndex::load(dir.path()).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get("a.txt").unwrap().version, 3);
        assert_eq!(reloaded.get("a.txt").unwrap().hashes, blocks([b"one", b"two"]));
        assert!(reloaded.get("gone.txt").unwrap().hashes.is_tombstone());
        assert_eq!(
            reloaded.get("empty.txt").unwrap().hashes,
            HashList::Blocks(Vec::new())
        );
    }

    #[test]
    fn test_commit_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "b.txt".to_string(),
            version: 1,
            hashes: blocks([b"b"]),
        });
        index.set(FileMetadata {
            filename: "a.txt".to_string(),
            version: 1,
            hashes: blocks([b"a"]),
        });
        index.commit().unwrap();
        let first = fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();

        let reloaded = LocalIndex::load(dir.path()).unwrap();
        reloaded.commit().unwrap();
        let second = fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("a.txt,"));
    }

    #[test]
    fn test_tombstone_line_format() {
        let line = encode_line(&FileMetadata {
            filename: "dead.txt".to_string(),
            version: 4,
            hashes: HashList::Tombstone,
        });
        assert_eq!(line, "dead.txt,4,0");

        let decoded = decode_line(&line).unwrap();
        assert!(decoded.hashes.is_tombstone());
        assert_eq!(decoded.version, 4);
    }

    #[test]
    fn test_bad_lines_fail_loudly() {
        assert!(decode_line("no-fields-here").is_err());
        assert!(decode_line("a.txt,not-a-number,0").is_err());
        assert!(decode_line("a.txt,1,zzzz").is_err());
        assert!(decode_line(",1,0").is_err());
    }

    #[test]
    fn test_restore_reverts_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = LocalIndex::load(dir.path()).unwrap();

        let original = FileMetadata {
            filename: "a.txt".to_string(),
            version: 1,
            hashes: blocks([b"old"]),
        };
        index.set(original.clone());
        index.set(FileMetadata {
            filename: "a.txt".to_string(),
            version: 1,
            hashes: blocks([b"new"]),
        });
        index.restore("a.txt", Some(original.clone()));
        assert_eq!(index.get("a.txt"), Some(&original));

        index.set(FileMetadata {
            filename: "b.txt".to_string(),
            version: 1,
            hashes: blocks([b"b"]),
        });
        index.restore("b.txt", None);
        assert!(index.get("b.txt").is_none());
    }
}
