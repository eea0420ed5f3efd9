//! The upload state machine.
//!
//! `Negotiating → HashChecking → (InstantComplete | Transferring) →
//! Committing → Finalizing`. The resume record is written after every step
//! that changes what a later run could skip, so any failure leaves the
//! store describing exactly what the drive already has.

use chrono::Utc;
use md5::Md5;
use panup_core::hash_ctx::{self, Sha1Accumulator};
use panup_core::path::{VirtualPath, names_directory};
use panup_core::session::{ResumeStore, UploadSession};
use panup_remote::{
    DriveApi, ObjectRequest, ObjectTarget, PreUploadRequest, RemoteError, canonical_string,
    headers, oss_date,
};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::progress::{ProgressMeter, UploadProgress};
use crate::resolver::PathResolver;
use crate::result::{UploadError, UploadResult};

/// Read buffer for whole-file hashing and prefix re-hashing.
const READ_BUF: usize = 1024 * 1024;

type Result<T> = std::result::Result<T, UploadError>;

/// Whole-file digests, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha1: String,
}

/// Everything negotiation needs to know about one upload call.
#[derive(Debug, Clone)]
struct UploadJob {
    local_key: String,
    dest: VirtualPath,
    file_name: String,
    mime_type: String,
    size: u64,
    parent_id: String,
}

pub struct Uploader {
    drive: Arc<dyn DriveApi>,
    store: ResumeStore,
}

impl Uploader {
    /// Records older than `retention` are collected before anything else.
    pub fn new(drive: Arc<dyn DriveApi>, store: ResumeStore, retention: Option<Duration>) -> Self {
        if let Some(max_age) = retention {
            match store.gc(max_age) {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "collected stale upload sessions"),
                Err(e) => tracing::warn!(error = %e, "session cleanup failed"),
            }
        }
        Self { drive, store }
    }

    pub fn store(&self) -> &ResumeStore {
        &self.store
    }

    /// Upload `local` to the remote path `dest`.
    ///
    /// A `dest` ending in `/` names a directory and receives the local file
    /// name. Missing remote folders are created. Re-running a failed call
    /// with the same arguments resumes it.
    pub async fn upload<F>(&self, local: &Path, dest: &str, mut on_progress: F) -> UploadResult
    where
        F: FnMut(&UploadProgress) + Send,
    {
        match self.run(local, dest, &mut on_progress).await {
            Ok(data) => UploadResult::ok(data),
            Err(e) => {
                tracing::warn!(
                    file = %local.display(),
                    code = e.code(),
                    recoverable = e.is_recoverable(),
                    error = %e,
                    "upload failed"
                );
                e.into()
            }
        }
    }

    async fn run(
        &self,
        local: &Path,
        dest: &str,
        on_progress: &mut (dyn FnMut(&UploadProgress) + Send),
    ) -> Result<Map<String, Value>> {
        let started = Instant::now();

        let mut file = File::open(local).await.map_err(UploadError::FileOpen)?;
        let meta = file.metadata().await.map_err(UploadError::FileInfo)?;
        if meta.is_dir() {
            return Err(UploadError::FileInfo(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is a directory", local.display()),
            )));
        }
        let local_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                UploadError::FileInfo(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "local path has no usable file name",
                ))
            })?;

        let dest = destination(dest, local_name);
        let (Some(parent), Some(file_name)) = (dest.parent(), dest.file_name()) else {
            return Err(UploadError::State(format!("destination {dest} has no file name")));
        };
        let job = UploadJob {
            local_key: std::path::absolute(local)
                .unwrap_or_else(|_| local.to_path_buf())
                .to_string_lossy()
                .into_owned(),
            file_name: file_name.to_string(),
            mime_type: mime_guess::from_path(file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            size: meta.len(),
            parent_id: PathResolver::new(self.drive.as_ref())
                .ensure_dir(&parent)
                .await?,
            dest,
        };
        tracing::info!(
            file = %local.display(),
            dest = %job.dest,
            size = job.size,
            mime = %job.mime_type,
            "upload started"
        );

        let (mut session, mut resumed) = match self.store.load_matching(
            &job.local_key,
            job.dest.as_str(),
            job.size,
        ) {
            Some(session) => {
                tracing::info!(
                    task = %session.task_id,
                    done = session.parts.len(),
                    parts = session.part_count(),
                    "resuming session"
                );
                (session, true)
            }
            None => (self.negotiate(&job).await?, false),
        };

        let digests = file_digests(&mut file)
            .await
            .map_err(UploadError::CalculateHash)?;
        if resumed && session.file_sha1.as_deref().is_some_and(|s| s != digests.sha1) {
            tracing::warn!(task = %session.task_id, "file changed since last run");
            session = self.renegotiate(&job, &session).await?;
            resumed = false;
        }

        if session.committed {
            tracing::info!(task = %session.task_id, "already committed, finishing");
            match self.drive.finish(&session.task_id, &session.object_key).await {
                Ok(data) => {
                    let data = self.finished(&session, data);
                    on_progress(&ProgressMeter::new(job.size, job.size, started).complete("done"));
                    return Ok(data);
                }
                Err(RemoteError::Business { code, message, .. }) => {
                    tracing::warn!(code, %message, task = %session.task_id, "committed task is gone");
                    session = self.renegotiate(&job, &session).await?;
                    resumed = false;
                }
                Err(e) => return Err(UploadError::remote(UploadError::FinishUpload, e)),
            }
        }

        let instant = match self.check_hash(&session, &digests).await {
            Err(RemoteError::Business { code, message, .. }) if resumed => {
                tracing::warn!(code, %message, task = %session.task_id, "stale session");
                session = self.renegotiate(&job, &session).await?;
                self.check_hash(&session, &digests).await
            }
            other => other,
        }
        .map_err(|e| UploadError::remote(UploadError::HashVerification, e))?;

        session.file_sha1 = Some(digests.sha1);
        self.persist(&mut session)?;

        if instant {
            tracing::info!(task = %session.task_id, "content already stored");
            let data = self.finalize(&session).await?;
            let meter = ProgressMeter::new(job.size, job.size, started);
            on_progress(&meter.complete("instant upload"));
            return Ok(data);
        }

        if session.resume_part() <= session.part_count() {
            self.transfer(&mut file, &mut session, started, on_progress)
                .await?;
        }
        self.commit(&mut session).await?;

        let data = self.finalize(&session).await?;
        on_progress(&ProgressMeter::new(job.size, job.size, started).complete("done"));
        Ok(data)
    }

    async fn negotiate(&self, job: &UploadJob) -> Result<UploadSession> {
        let pre = self
            .drive
            .pre_upload(&PreUploadRequest {
                file_name: job.file_name.clone(),
                mime_type: job.mime_type.clone(),
                size: job.size,
                parent_id: job.parent_id.clone(),
            })
            .await
            .map_err(|e| UploadError::remote(UploadError::PreUpload, e))?;
        if pre.part_size == 0 {
            return Err(UploadError::PreUpload(RemoteError::Protocol(
                "pre-upload returned a zero part size".into(),
            )));
        }
        tracing::info!(task = %pre.task_id, part_size = pre.part_size, "negotiated upload");

        let now = Utc::now();
        let mut session = UploadSession {
            local_path: job.local_key.clone(),
            dest_path: job.dest.as_str().to_string(),
            file_size: job.size,
            task_id: pre.task_id,
            bucket: pre.bucket,
            object_key: pre.object_key,
            upload_id: pre.upload_id,
            upload_url: pre.upload_url,
            chunk_size: pre.part_size,
            parts: Default::default(),
            mime_type: job.mime_type.clone(),
            auth_info: pre.auth_info,
            callback: pre.callback,
            hash_state: None,
            file_sha1: None,
            committed: false,
            created_at: now,
            updated_at: now,
        };
        self.persist(&mut session)?;
        Ok(session)
    }

    async fn renegotiate(&self, job: &UploadJob, stale: &UploadSession) -> Result<UploadSession> {
        if let Err(e) = self.store.delete(&stale.key()) {
            tracing::warn!(error = %e, "could not remove stale session");
        }
        self.negotiate(job).await
    }

    async fn check_hash(
        &self,
        session: &UploadSession,
        digests: &FileDigests,
    ) -> std::result::Result<bool, RemoteError> {
        self.drive
            .update_hash(&session.task_id, &digests.md5, &digests.sha1)
            .await
    }

    async fn transfer(
        &self,
        file: &mut File,
        session: &mut UploadSession,
        started: Instant,
        on_progress: &mut (dyn FnMut(&UploadProgress) + Send),
    ) -> Result<()> {
        let first = session.resume_part();
        let count = session.part_count();
        let offset = session.committed_bytes();
        let target = target_of(session);
        tracing::info!(task = %session.task_id, first, count, offset, "transferring");

        let mut acc = restore_hash(file, session, offset)
            .await
            .map_err(UploadError::ReadFile)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(UploadError::ReadFile)?;
        let mut meter = ProgressMeter::new(session.file_size, offset, started);

        for part in first..=count {
            let start = u64::from(part - 1) * session.chunk_size;
            let len = session.chunk_size.min(session.file_size - start) as usize;
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk)
                .await
                .map_err(UploadError::ReadFile)?;

            let hash_ctx = if part == 1 {
                None
            } else {
                let state = hash_ctx::capture(&acc);
                Some(
                    hash_ctx::encode_header(&state)
                        .map_err(|e| UploadError::State(e.to_string()))?,
                )
            };
            acc.update(&chunk);

            let request = ObjectRequest::PartUpload {
                part_number: part,
                mime_type: session.mime_type.clone(),
                date: oss_date(Utc::now()),
                hash_ctx,
            };
            let part_err = |e: RemoteError| {
                UploadError::remote(|source| UploadError::UploadPart { part, source }, e)
            };
            let authorization = self
                .drive
                .sign(
                    &canonical_string(&request, &target),
                    &session.auth_info,
                    &session.task_id,
                )
                .await
                .map_err(part_err)?;
            let etag = self
                .drive
                .put_part(&target, &request, &authorization, chunk)
                .await
                .map_err(part_err)?;
            tracing::debug!(part, %etag, "part stored");

            session.parts.insert(part, etag);
            session.hash_state = Some(hash_ctx::capture(&acc));
            self.persist(session)?;
            on_progress(&meter.sample(start + len as u64));
        }
        Ok(())
    }

    async fn commit(&self, session: &mut UploadSession) -> Result<()> {
        let count = session.part_count();
        if session.parts.len() != count as usize || session.resume_part() != count + 1 {
            return Err(UploadError::State(format!(
                "cannot commit {} of {count} parts",
                session.parts.len()
            )));
        }
        let body = headers::complete_multipart_body(&session.ordered_etags());
        let request = ObjectRequest::Commit {
            content_md5: headers::content_md5(body.as_bytes()),
            callback: headers::encode_callback(&session.callback),
            date: oss_date(Utc::now()),
        };
        let target = target_of(session);
        let commit_err = |e: RemoteError| UploadError::remote(UploadError::CommitUpload, e);
        let authorization = self
            .drive
            .sign(
                &canonical_string(&request, &target),
                &session.auth_info,
                &session.task_id,
            )
            .await
            .map_err(commit_err)?;
        self.drive
            .commit(&target, &request, &authorization, body)
            .await
            .map_err(commit_err)?;
        tracing::info!(task = %session.task_id, parts = count, "multipart upload committed");

        session.committed = true;
        self.persist(session)
    }

    async fn finalize(&self, session: &UploadSession) -> Result<Map<String, Value>> {
        let data = self
            .drive
            .finish(&session.task_id, &session.object_key)
            .await
            .map_err(|e| UploadError::remote(UploadError::FinishUpload, e))?;
        Ok(self.finished(session, data))
    }

    fn finished(&self, session: &UploadSession, data: Map<String, Value>) -> Map<String, Value> {
        if let Err(e) = self.store.delete(&session.key()) {
            tracing::warn!(error = %e, "could not remove finished session");
        }
        tracing::info!(task = %session.task_id, dest = %session.dest_path, "upload finished");
        data
    }

    fn persist(&self, session: &mut UploadSession) -> Result<()> {
        self.store
            .save(session)
            .map_err(|e| UploadError::State(e.to_string()))
    }
}

/// Final remote path for an upload of `local_name` to `dest`.
pub fn destination(dest: &str, local_name: &str) -> VirtualPath {
    let path = VirtualPath::new(dest);
    if names_directory(dest) {
        path.join(local_name)
    } else {
        path
    }
}

fn target_of(session: &UploadSession) -> ObjectTarget {
    ObjectTarget {
        bucket: session.bucket.clone(),
        object_key: session.object_key.clone(),
        upload_id: session.upload_id.clone(),
        upload_url: session.upload_url.clone(),
    }
}

/// MD5 and SHA-1 of the whole file in one pass.
pub async fn file_digests(file: &mut File) -> std::io::Result<FileDigests> {
    file.seek(SeekFrom::Start(0)).await?;
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
    }
    Ok(FileDigests {
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
    })
}

/// Hash state covering exactly the first `offset` bytes of the file.
async fn restore_hash(
    file: &mut File,
    session: &UploadSession,
    offset: u64,
) -> std::io::Result<Sha1Accumulator> {
    match session.hash_state.as_ref().map(hash_ctx::restore) {
        Some(Ok(acc)) if acc.bytes_hashed() == offset => return Ok(acc),
        Some(Ok(acc)) => tracing::warn!(
            recorded = acc.bytes_hashed(),
            offset,
            "hash state does not match resume point, re-hashing"
        ),
        Some(Err(e)) => tracing::warn!(error = %e, "unusable hash state, re-hashing"),
        None if offset == 0 => return Ok(Sha1Accumulator::new()),
        None => tracing::debug!(offset, "no hash state recorded, re-hashing"),
    }

    file.seek(SeekFrom::Start(0)).await?;
    let mut acc = Sha1Accumulator::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut left = offset;
    while left > 0 {
        let want = left.min(READ_BUF as u64) as usize;
        file.read_exact(&mut buf[..want]).await?;
        acc.update(&buf[..want]);
        left -= want as u64;
    }
    Ok(acc)
}
