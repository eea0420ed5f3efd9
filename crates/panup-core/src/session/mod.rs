//! Durable per-upload session records.
//!
//! One pretty-printed JSON file per in-flight upload, named by the MD5 of
//! `"{local}|{dest}"`. Records are written atomically and survive process
//! termination; a record that no longer parses or no longer matches the
//! file being uploaded is discarded, never trusted.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PanupError, Result};
use crate::hash_ctx::HashState;

/// Name of the state directory under the OS temp dir.
pub const STATE_DIR_NAME: &str = "panup_upload_state";

/// In-flight upload state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub local_path: String,
    pub dest_path: String,
    pub file_size: u64,
    pub task_id: String,
    pub bucket: String,
    pub object_key: String,
    pub upload_id: String,
    pub upload_url: String,
    pub chunk_size: u64,
    /// 1-based part number → ETag of every part the object store accepted.
    #[serde(default)]
    pub parts: BTreeMap<u32, String>,
    pub mime_type: String,
    /// Opaque signing context handed back to the signing endpoint.
    #[serde(default)]
    pub auth_info: serde_json::Value,
    /// Opaque completion callback forwarded on commit.
    #[serde(default)]
    pub callback: serde_json::Value,
    /// Hash state after the last accepted part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_state: Option<HashState>,
    /// Whole-file SHA-1 observed when the session was last used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_sha1: Option<String>,
    /// Set once the object store accepted the multipart-complete request.
    #[serde(default)]
    pub committed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn key(&self) -> String {
        session_key(&self.local_path, &self.dest_path)
    }

    /// Number of parts the file splits into. An empty file is one empty part.
    pub fn part_count(&self) -> u32 {
        part_count(self.file_size, self.chunk_size)
    }

    /// First part without a recorded ETag; `part_count() + 1` when all are in.
    pub fn resume_part(&self) -> u32 {
        (1..=self.part_count())
            .find(|n| !self.parts.contains_key(n))
            .unwrap_or(self.part_count() + 1)
    }

    /// Bytes covered by the contiguous run of accepted parts.
    pub fn committed_bytes(&self) -> u64 {
        let done = self.resume_part().saturating_sub(1) as u64;
        (done * self.chunk_size).min(self.file_size)
    }

    /// ETags in part order, only valid once every part is present.
    pub fn ordered_etags(&self) -> Vec<(u32, &str)> {
        self.parts.iter().map(|(n, e)| (*n, e.as_str())).collect()
    }
}

pub fn part_count(file_size: u64, chunk_size: u64) -> u32 {
    if file_size == 0 || chunk_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size) as u32
}

/// Deterministic record key for a (local file, destination) pair.
pub fn session_key(local_path: &str, dest_path: &str) -> String {
    let digest = Md5::digest(format!("{local_path}|{dest_path}").as_bytes());
    hex::encode(digest)
}

/// Directory-backed store of [`UploadSession`] records.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    dir: PathBuf,
}

impl ResumeStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            PanupError::SessionStore(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// `<temp dir>/panup_upload_state`
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir().join(STATE_DIR_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load a record. Unreadable records are removed and reported as absent.
    pub fn load(&self, key: &str) -> Option<UploadSession> {
        let path = self.record_path(key);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cannot read upload session");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding malformed upload session");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Load the record for this attempt if it still describes the same upload.
    pub fn load_matching(
        &self,
        local_path: &str,
        dest_path: &str,
        file_size: u64,
    ) -> Option<UploadSession> {
        let key = session_key(local_path, dest_path);
        let session = self.load(&key)?;
        let matches = session.local_path == local_path
            && session.dest_path == dest_path
            && session.file_size == file_size
            && session.chunk_size > 0;
        if matches {
            return Some(session);
        }
        tracing::debug!(key, "upload session does not match current file, discarding");
        let _ = self.delete(&key);
        None
    }

    /// Stamp `updated_at` and write the record atomically.
    pub fn save(&self, session: &mut UploadSession) -> Result<()> {
        session.updated_at = Utc::now();
        let data = serde_json::to_vec_pretty(session)?;
        let path = self.record_path(&session.key());

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| {
            PanupError::SessionStore(format!("cannot persist {}: {}", path.display(), e.error))
        })?;
        Ok(())
    }

    /// Remove a record. A missing record is not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All readable records, oldest first.
    pub fn list(&self) -> Result<Vec<UploadSession>> {
        let mut sessions: Vec<UploadSession> = self
            .record_keys()?
            .iter()
            .filter_map(|key| self.load(key))
            .collect();
        sessions.sort_by_key(|s| s.updated_at);
        Ok(sessions)
    }

    /// Remove records untouched for longer than `max_age`. Returns how many
    /// were removed.
    pub fn gc(&self, max_age: std::time::Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                PanupError::SessionStore(format!("retention of {max_age:?} is out of range"))
            })?;
        let mut removed = 0;
        for key in self.record_keys()? {
            let path = self.record_path(&key);
            let stale = match std::fs::read(&path)
                .ok()
                .and_then(|d| serde_json::from_slice::<UploadSession>(&d).ok())
            {
                Some(session) => session.updated_at < cutoff,
                None => true,
            };
            if stale {
                self.delete(&key)?;
                tracing::debug!(key, "removed stale upload session");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn record_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> UploadSession {
        let now = Utc::now();
        UploadSession {
            local_path: "/data/video.mp4".into(),
            dest_path: "/backups/video.mp4".into(),
            file_size: 10 * 1024 * 1024 + 5,
            task_id: "task-1".into(),
            bucket: "ul-bucket".into(),
            object_key: "obj/key".into(),
            upload_id: "UPLOAD-1".into(),
            upload_url: "https://oss.example.com".into(),
            chunk_size: 4 * 1024 * 1024,
            parts: BTreeMap::new(),
            mime_type: "video/mp4".into(),
            auth_info: serde_json::json!("opaque-auth"),
            callback: serde_json::json!({"callbackUrl": "https://cb", "callbackBody": "x"}),
            hash_state: None,
            file_sha1: None,
            committed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn key_is_stable_md5() {
        let a = session_key("/a", "/b");
        assert_eq!(a, session_key("/a", "/b"));
        assert_eq!(a.len(), 32);
        assert_ne!(a, session_key("/a", "/c"));
    }

    #[test]
    fn part_math() {
        let mut s = sample_session();
        assert_eq!(s.part_count(), 3);
        assert_eq!(s.resume_part(), 1);
        s.parts.insert(1, "e1".into());
        s.parts.insert(3, "e3".into());
        assert_eq!(s.resume_part(), 2);
        assert_eq!(s.committed_bytes(), 4 * 1024 * 1024);
        s.parts.insert(2, "e2".into());
        assert_eq!(s.resume_part(), 4);
        assert_eq!(s.committed_bytes(), s.file_size);
        assert_eq!(part_count(0, 4096), 1);
        assert_eq!(part_count(4096, 4096), 1);
        assert_eq!(part_count(4097, 4096), 2);
    }

    #[test]
    fn save_load_round_trip_empty_parts() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();
        let mut s = sample_session();
        store.save(&mut s).unwrap();
        assert_eq!(store.load(&s.key()), Some(s));
    }

    #[test]
    fn save_load_round_trip_with_hash_state() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();

        let mut s = sample_session();
        s.parts.insert(1, "\"ETAG-1\"".into());
        s.parts.insert(2, "\"ETAG-2\"".into());
        s.hash_state = Some(HashState {
            h: [1_125_272_656, 2_794_323_374, 1_697_191_688, 2_476_193_098, 2_437_866_605],
            len_lo: 8 * 1024 * 1024,
            len_hi: 0,
            block: Vec::new(),
            block_len: 0,
        });
        s.file_sha1 = Some("da39a3ee5e6b4b0d3255bfef95601890afd80709".into());
        store.save(&mut s).unwrap();
        assert_eq!(store.load(&s.key()), Some(s.clone()));

        s.hash_state = Some(HashState {
            h: [0; 5],
            len_lo: 0,
            len_hi: 0,
            block: Vec::new(),
            block_len: 0,
        });
        store.save(&mut s).unwrap();
        assert_eq!(store.load(&s.key()), Some(s));
    }

    #[test]
    fn load_matching_discards_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();
        let mut s = sample_session();
        store.save(&mut s).unwrap();

        assert!(store
            .load_matching(&s.local_path, &s.dest_path, s.file_size + 1)
            .is_none());
        // the mismatching record is gone even for a later matching attempt
        assert!(store
            .load_matching(&s.local_path, &s.dest_path, s.file_size)
            .is_none());
    }

    #[test]
    fn malformed_record_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();
        let key = session_key("/x", "/y");
        std::fs::write(tmp.path().join(format!("{key}.json")), b"{not json").unwrap();
        assert!(store.load(&key).is_none());
        assert!(!tmp.path().join(format!("{key}.json")).exists());
    }

    #[test]
    fn delete_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();
        store.delete("nope").unwrap();
    }

    #[test]
    fn gc_removes_stale_and_broken_records() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();

        let mut fresh = sample_session();
        store.save(&mut fresh).unwrap();

        let mut old = sample_session();
        old.dest_path = "/backups/old.mp4".into();
        store.save(&mut old).unwrap();
        old.updated_at = Utc::now() - chrono::Duration::days(30);
        std::fs::write(
            tmp.path().join(format!("{}.json", old.key())),
            serde_json::to_vec(&old).unwrap(),
        )
        .unwrap();

        std::fs::write(tmp.path().join("broken.json"), b"[]").unwrap();

        let removed = store
            .gc(std::time::Duration::from_secs(7 * 24 * 3600))
            .unwrap();
        assert_eq!(removed, 2);
        let left = store.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].dest_path, fresh.dest_path);
    }

    #[test]
    fn out_of_range_retention_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let store = ResumeStore::open(tmp.path()).unwrap();
        let mut session = sample_session();
        store.save(&mut session).unwrap();

        let days = std::time::Duration::from_secs(10_000_000_000 * 86_400);
        assert!(store.gc(days).is_err());
        assert!(store.gc(std::time::Duration::from_secs(u64::MAX)).is_err());
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
