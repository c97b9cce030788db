//! Client synchronization engine
//!
//! One run: classify every local file against the index baseline, fetch
//! the server's metadata snapshot once, reconcile file-by-file, move
//! blocks, and rewrite the index. Runs are idempotent: with no
//! intervening change, a second run makes zero mutating remote calls.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{ensure, eyre};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::chunker;
use crate::hash::BlockHash;
use crate::index::{LocalIndex, INDEX_FILE, INDEX_TMP_FILE};
use crate::meta::{FileInfo, FileMetadata, FileStatus, HashList};
use crate::remote::RemoteStore;
use crate::store::UpdateReply;

/// Outcome counts for one synchronization run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Files whose metadata (and blocks, where present) were pushed
    pub uploaded: usize,
    /// Files fetched from the server and written locally
    pub downloaded: usize,
    /// Local files removed because the server holds a tombstone
    pub removed: usize,
    /// Files already in sync
    pub unchanged: usize,
    /// Files skipped after a per-file failure; re-evaluated next run
    pub skipped: usize,
}

/// What reconciling one file actually did.
enum Outcome {
    Uploaded,
    Downloaded,
    Removed,
}

/// Per-file working state for one run.
struct LocalFile {
    info: FileInfo,
    /// Index entry as it stood before classification touched it, kept so
    /// a failed file can be rolled back and re-detected next run.
    prior: Option<FileMetadata>,
}

/// Drives one directory's synchronization against a remote store.
pub struct SyncEngine<R> {
    remote: R,
    base_dir: PathBuf,
    block_size: usize,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// # Panics
    /// Panics if `block_size` is zero.
    pub fn new(remote: R, base_dir: impl Into<PathBuf>, block_size: usize) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            remote,
            base_dir: base_dir.into(),
            block_size,
        }
    }

    /// Take back the remote store, e.g. to close a connection.
    pub fn into_remote(self) -> R {
        self.remote
    }

    /// Run one synchronization pass to best completion.
    ///
    /// A failed call for one file is logged and that file is skipped for
    /// this run; only a failed snapshot fetch or index commit aborts.
    ///
    /// # Errors
    /// Returns an error if the index cannot be loaded or committed, or if
    /// the initial metadata snapshot cannot be fetched.
    pub fn run(&mut self) -> Result<SyncReport> {
        let mut index = LocalIndex::load(&self.base_dir)?;
        let mut report = SyncReport::default();

        let local = self.classify_local(&mut index)?;
        let server_map = self.remote.file_info_map()?;
        debug!(
            local = local.len(),
            remote = server_map.len(),
            "reconciling"
        );

        // Files present locally this run.
        for (name, file) in &local {
            let outcome = match server_map.get(name) {
                None => self.push_file(&file.info, None, &mut index),
                Some(server) => {
                    let ours = &file.info.metadata;
                    if ours.version == server.version && file.info.status == FileStatus::Unchanged {
                        report.unchanged += 1;
                        continue;
                    }
                    if ours.version > server.version
                        || (ours.version == server.version
                            && file.info.status == FileStatus::Modified)
                    {
                        self.push_file(&file.info, Some(server.version), &mut index)
                    } else {
                        self.pull_file(server, &mut index)
                    }
                }
            };
            Self::settle(name, outcome, Some(&file.prior), &mut index, &mut report);
        }

        // Files the server has but this run did not classify: either a
        // pending local delete, or something to fetch fresh.
        for (name, server) in &server_map {
            if local.contains_key(name) {
                continue;
            }
            let pending_delete = index
                .get(name)
                .filter(|entry| entry.version > server.version)
                .cloned();
            let outcome = match pending_delete {
                Some(entry) => self.push_tombstone(entry, &mut index),
                None => self.pull_file(server, &mut index),
            };
            // A bumped tombstone stays in the index on failure: it
            // re-proposes itself next run and converges.
            Self::settle(name, outcome, None, &mut index, &mut report);
        }

        index.commit()?;
        Ok(report)
    }

    fn settle(
        name: &str,
        outcome: Result<Outcome>,
        prior: Option<&Option<FileMetadata>>,
        index: &mut LocalIndex,
        report: &mut SyncReport,
    ) {
        match outcome {
            Ok(Outcome::Uploaded) => report.uploaded += 1,
            Ok(Outcome::Downloaded) => report.downloaded += 1,
            Ok(Outcome::Removed) => report.removed += 1,
            Err(e) => {
                warn!(file = %name, "sync failed, will retry next run: {e:#}");
                if let Some(prior) = prior {
                    index.restore(name, prior.clone());
                }
                report.skipped += 1;
            }
        }
    }

    /// Step 1: diff the directory listing against the index baseline.
    ///
    /// Vanished files get their index entry bumped to a tombstone here;
    /// present files are classified New/Modified/Unchanged. A Modified
    /// file's hash list is rewritten now, but its version moves only on a
    /// confirmed upload.
    fn classify_local(&self, index: &mut LocalIndex) -> Result<BTreeMap<String, LocalFile>> {
        let present = list_dir(&self.base_dir)?;

        for name in index.filenames() {
            if present.contains_key(&name) {
                continue;
            }
            let bumped = match index.get(&name) {
                Some(entry) if !entry.hashes.is_tombstone() => FileMetadata {
                    filename: name.clone(),
                    version: entry.version + 1,
                    hashes: HashList::Tombstone,
                },
                _ => continue,
            };
            debug!(file = %name, "vanished locally, recording tombstone");
            index.set(bumped);
        }

        let mut local = BTreeMap::new();
        for (name, path) in present {
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(file = %name, "skipping unreadable file: {e}");
                    continue;
                }
            };
            let hashes = HashList::Blocks(chunker::hash_list(&data, self.block_size));
            let prior = index.get(&name).cloned();

            let info = match &prior {
                None => {
                    let metadata = FileMetadata {
                        filename: name.clone(),
                        version: 1,
                        hashes,
                    };
                    index.set(metadata.clone());
                    FileInfo {
                        metadata,
                        status: FileStatus::New,
                    }
                }
                Some(entry) if entry.hashes == hashes => FileInfo {
                    metadata: entry.clone(),
                    status: FileStatus::Unchanged,
                },
                Some(entry) => {
                    let metadata = FileMetadata {
                        filename: name.clone(),
                        version: entry.version,
                        hashes,
                    };
                    index.set(metadata.clone());
                    FileInfo {
                        metadata,
                        status: FileStatus::Modified,
                    }
                }
            };
            local.insert(name, LocalFile { info, prior });
        }
        Ok(local)
    }

    /// Push a file's blocks and propose its metadata.
    ///
    /// A Modified file proposes `server_version + 1`; a stale rejection
    /// degrades to accepting the server's current truth (one re-fetch, no
    /// write retry).
    fn push_file(
        &mut self,
        info: &FileInfo,
        server_version: Option<u64>,
        index: &mut LocalIndex,
    ) -> Result<Outcome> {
        let mut proposal = info.metadata.clone();
        if info.status == FileStatus::Modified {
            if let Some(server_version) = server_version {
                proposal.version = server_version + 1;
            }
        }

        self.push_blocks(&proposal)?;
        match self.remote.update_file(&proposal)? {
            UpdateReply::Accepted(version) => {
                info!(file = %proposal.filename, version, "uploaded");
                proposal.version = version;
                index.set(proposal);
                Ok(Outcome::Uploaded)
            }
            UpdateReply::Stale { current } => {
                debug!(
                    file = %proposal.filename,
                    proposed = proposal.version,
                    current,
                    "proposal was stale, accepting server truth"
                );
                self.accept_server_truth(&proposal.filename, index)
            }
        }
    }

    /// Propose a pending local deletion.
    fn push_tombstone(&mut self, entry: FileMetadata, index: &mut LocalIndex) -> Result<Outcome> {
        match self.remote.update_file(&entry)? {
            UpdateReply::Accepted(version) => {
                info!(file = %entry.filename, version, "deletion propagated");
                index.set(FileMetadata { version, ..entry });
                Ok(Outcome::Uploaded)
            }
            UpdateReply::Stale { current } => {
                debug!(
                    file = %entry.filename,
                    proposed = entry.version,
                    current,
                    "tombstone was stale, accepting server truth"
                );
                self.accept_server_truth(&entry.filename, index)
            }
        }
    }

    /// Upload the blocks the server is missing, skipping the subset it
    /// already reports as present. The hash list being proposed is the
    /// classification-time one; the file is not re-hashed here.
    fn push_blocks(&mut self, proposal: &FileMetadata) -> Result<()> {
        let Some(hashes) = proposal.hashes.as_blocks() else {
            return Ok(());
        };
        if hashes.is_empty() {
            return Ok(());
        }

        let present: HashSet<BlockHash> = self.remote.has_blocks(hashes)?.into_iter().collect();
        let path = self.base_dir.join(&proposal.filename);
        let data = fs::read(&path)?;
        let mut pushed = 0usize;
        for block in chunker::split_blocks(&data, self.block_size) {
            if present.contains(&block.hash()) {
                continue;
            }
            self.remote.put_block(block)?;
            pushed += 1;
        }
        debug!(
            file = %proposal.filename,
            pushed,
            deduplicated = hashes.len().saturating_sub(pushed),
            "blocks pushed"
        );
        Ok(())
    }

    /// The Step 3 fallback: re-fetch the server's metadata once and take
    /// its version of this file.
    fn accept_server_truth(&mut self, filename: &str, index: &mut LocalIndex) -> Result<Outcome> {
        let map = self.remote.file_info_map()?;
        match map.get(filename) {
            Some(server) => self.pull_file(server, index),
            None => Err(eyre!(
                "server rejected the update for {filename} but no longer lists it"
            )),
        }
    }

    /// Overwrite the local file (or remove it, for a tombstone) with the
    /// server's version, and record the server metadata in the index.
    fn pull_file(&mut self, server: &FileMetadata, index: &mut LocalIndex) -> Result<Outcome> {
        let path = self.base_dir.join(&server.filename);

        let Some(hashes) = server.hashes.as_blocks() else {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!(file = %server.filename, version = server.version, "removed (remote tombstone)");
            index.set(server.clone());
            return Ok(Outcome::Removed);
        };

        let mut data = Vec::new();
        for hash in hashes {
            let block = self.remote.get_block(hash)?;
            ensure!(
                block.hash() == *hash,
                "block {hash} failed its integrity check"
            );
            data.extend_from_slice(block.data());
        }
        fs::write(&path, &data)?;
        info!(file = %server.filename, version = server.version, "downloaded");
        index.set(server.clone());
        Ok(Outcome::Downloaded)
    }
}

/// Flat listing of the base directory: regular files only, minus the
/// index file, its rewrite scratch, and names the line format cannot
/// represent.
fn list_dir(base_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            warn!("skipping non-UTF-8 filename: {:?}", entry.file_name());
            continue;
        };
        if name == INDEX_FILE || name == INDEX_TMP_FILE {
            continue;
        }
        if name.contains(',') {
            warn!(file = %name, "skipping: ',' cannot appear in an index entry");
            continue;
        }
        files.insert(name, path);
    }
    Ok(files)
}

/// Offline classification: what a run would consider New, Modified,
/// Unchanged, or Deleted, without contacting the server or rewriting the
/// index.
///
/// # Errors
/// Returns an error if the index or a local file cannot be read.
pub fn classify_offline(base_dir: &Path, block_size: usize) -> Result<Vec<FileInfo>> {
    let index = LocalIndex::load(base_dir)?;
    let present = list_dir(base_dir)?;
    let mut out = Vec::new();

    for (name, path) in &present {
        let data = fs::read(path)?;
        let hashes = HashList::Blocks(chunker::hash_list(&data, block_size));
        let info = match index.get(name) {
            None => FileInfo {
                metadata: FileMetadata {
                    filename: name.clone(),
                    version: 1,
                    hashes,
                },
                status: FileStatus::New,
            },
            Some(entry) if entry.hashes == hashes => FileInfo {
                metadata: entry.clone(),
                status: FileStatus::Unchanged,
            },
            Some(entry) => FileInfo {
                metadata: FileMetadata {
                    filename: name.clone(),
                    version: entry.version,
                    hashes,
                },
                status: FileStatus::Modified,
            },
        };
        out.push(info);
    }

    for (name, entry) in index.iter() {
        if present.contains_key(name) || entry.hashes.is_tombstone() {
            continue;
        }
        out.push(FileInfo {
            metadata: FileMetadata {
                filename: name.clone(),
                version: entry.version + 1,
                hashes: HashList::Tombstone,
            },
            status: FileStatus::Deleted,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::block::Block;

    /// Remote that refuses every call; classification never touches it.
    struct Offline;

    impl RemoteStore for Offline {
        fn file_info_map(&mut self) -> Result<HashMap<String, FileMetadata>> {
            Err(eyre!("offline"))
        }
        fn update_file(&mut self, _candidate: &FileMetadata) -> Result<UpdateReply> {
            Err(eyre!("offline"))
        }
        fn get_block(&mut self, _hash: &BlockHash) -> Result<Block> {
            Err(eyre!("offline"))
        }
        fn put_block(&mut self, _block: Block) -> Result<bool> {
            Err(eyre!("offline"))
        }
        fn has_blocks(&mut self, _candidates: &[BlockHash]) -> Result<Vec<BlockHash>> {
            Err(eyre!("offline"))
        }
    }

    const BS: usize = 4;

    #[test]
    fn test_list_dir_skips_index_and_unrepresentable_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join(INDEX_FILE), "").unwrap();
        fs::write(dir.path().join(INDEX_TMP_FILE), "").unwrap();
        fs::write(dir.path().join("bad,name"), "no").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let files = list_dir(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("keep.txt"));
    }

    #[test]
    fn test_classify_new_file_gets_version_one() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fresh.txt"), "content").unwrap();

        let engine = SyncEngine::new(Offline, dir.path(), BS);
        let mut index = LocalIndex::load(dir.path()).unwrap();
        let local = engine.classify_local(&mut index).unwrap();

        let file = &local["fresh.txt"];
        assert_eq!(file.info.status, FileStatus::New);
        assert_eq!(file.info.metadata.version, 1);
        assert!(file.prior.is_none());
        assert_eq!(index.get("fresh.txt").unwrap().version, 1);
    }

    #[test]
    fn test_classify_modified_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "old!").unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "a.txt".to_string(),
            version: 3,
            hashes: HashList::Blocks(chunker::hash_list(b"old!", BS)),
        });

        fs::write(dir.path().join("a.txt"), "new!").unwrap();
        let engine = SyncEngine::new(Offline, dir.path(), BS);
        let local = engine.classify_local(&mut index).unwrap();

        let file = &local["a.txt"];
        assert_eq!(file.info.status, FileStatus::Modified);
        // The version moves only on a confirmed upload.
        assert_eq!(file.info.metadata.version, 3);
        assert_eq!(
            file.info.metadata.hashes,
            HashList::Blocks(chunker::hash_list(b"new!", BS))
        );
        assert_eq!(index.get("a.txt").unwrap().hashes, file.info.metadata.hashes);
    }

    #[test]
    fn test_classify_unchanged_leaves_index_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "same").unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        let entry = FileMetadata {
            filename: "a.txt".to_string(),
            version: 2,
            hashes: HashList::Blocks(chunker::hash_list(b"same", BS)),
        };
        index.set(entry.clone());

        let engine = SyncEngine::new(Offline, dir.path(), BS);
        let local = engine.classify_local(&mut index).unwrap();

        assert_eq!(local["a.txt"].info.status, FileStatus::Unchanged);
        assert_eq!(index.get("a.txt"), Some(&entry));
    }

    #[test]
    fn test_classify_vanished_file_bumps_to_tombstone() {
        let dir = tempfile::tempdir().unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "gone.txt".to_string(),
            version: 2,
            hashes: HashList::Blocks(chunker::hash_list(b"was here", BS)),
        });

        let engine = SyncEngine::new(Offline, dir.path(), BS);
        let local = engine.classify_local(&mut index).unwrap();

        assert!(!local.contains_key("gone.txt"));
        let entry = index.get("gone.txt").unwrap();
        assert!(entry.hashes.is_tombstone());
        assert_eq!(entry.version, 3);
    }

    #[test]
    fn test_classify_existing_tombstone_is_not_bumped_again() {
        let dir = tempfile::tempdir().unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "gone.txt".to_string(),
            version: 5,
            hashes: HashList::Tombstone,
        });

        let engine = SyncEngine::new(Offline, dir.path(), BS);
        engine.classify_local(&mut index).unwrap();

        assert_eq!(index.get("gone.txt").unwrap().version, 5);
    }

    #[test]
    fn test_classify_recreated_file_is_modified_from_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("back.txt"), "returned").unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "back.txt".to_string(),
            version: 4,
            hashes: HashList::Tombstone,
        });

        let engine = SyncEngine::new(Offline, dir.path(), BS);
        let local = engine.classify_local(&mut index).unwrap();

        let file = &local["back.txt"];
        assert_eq!(file.info.status, FileStatus::Modified);
        assert_eq!(file.info.metadata.version, 4);
        assert!(!file.info.metadata.hashes.is_tombstone());
    }

    #[test]
    fn test_classify_offline_reports_deletions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("new.txt"), "n").unwrap();

        let mut index = LocalIndex::load(dir.path()).unwrap();
        index.set(FileMetadata {
            filename: "gone.txt".to_string(),
            version: 1,
            hashes: HashList::Blocks(chunker::hash_list(b"x", BS)),
        });
        index.commit().unwrap();

        let infos = classify_offline(dir.path(), BS).unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos
            .iter()
            .any(|i| i.metadata.filename == "new.txt" && i.status == FileStatus::New));
        assert!(infos
            .iter()
            .any(|i| i.metadata.filename == "gone.txt" && i.status == FileStatus::Deleted));

        // Offline classification must not touch the index.
        let reloaded = LocalIndex::load(dir.path()).unwrap();
        assert!(!reloaded.get("gone.txt").unwrap().hashes.is_tombstone());
    }
}
