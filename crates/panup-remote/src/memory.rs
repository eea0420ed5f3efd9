//! In-memory drive.
//!
//! Behaves like the real service closely enough to drive the whole upload
//! engine: it keeps a folder tree, pages listings, signs canonical strings,
//! verifies every part's signature and hash context, answers re-sent parts
//! with `409 PartAlreadyExist`, and composes objects on commit. Faults can be
//! injected per part and every call is counted.

use async_trait::async_trait;
use md5::{Digest, Md5};
use panup_core::hash_ctx::{Sha1Accumulator, capture, decode_header};
use panup_core::path::ROOT_ID;
use panup_core::types::RemoteNode;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::{RemoteError, Result};
use crate::headers::{
    HASH_CTX_HEADER, ObjectRequest, assemble_headers, canonical_string, content_md5,
    encode_callback, xml_tag,
};
use crate::http::parse_part_response;
use crate::provider::DriveApi;
use crate::types::{ListPage, ObjectTarget, PreUpload, PreUploadRequest};

const BUCKET: &str = "memory-bucket";
const UPLOAD_URL: &str = "http://memory.invalid";

/// Call counters, in call order where order matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriveStats {
    pub identity_checks: usize,
    /// Directory ids passed to `list_page`, one entry per page.
    pub listed_dirs: Vec<String>,
    /// `(parent id, name, new id)` per created folder.
    pub created_folders: Vec<(String, String, String)>,
    pub pre_uploads: usize,
    pub hash_checks: usize,
    pub signs: usize,
    /// Part numbers of every PUT attempt, failed ones included.
    pub part_puts: Vec<u32>,
    pub commits: usize,
    pub finishes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartFault {
    /// Refuse the part without storing it.
    Reject,
    /// Store the part, then fail as if the response was lost.
    LoseResponse,
}

#[derive(Debug)]
struct Node {
    parent: String,
    name: String,
    is_dir: bool,
    content: Vec<u8>,
    created_at: i64,
}

#[derive(Debug)]
struct Task {
    file_name: String,
    parent_id: String,
    size: u64,
    object_key: String,
    upload_id: String,
    auth_info: Value,
    callback: Value,
    parts: BTreeMap<u32, Vec<u8>>,
    composed: Option<Vec<u8>>,
    instant_sha1: Option<String>,
    expired: bool,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, Node>,
    /// Node ids in creation order; listings follow it.
    order: Vec<String>,
    tasks: HashMap<String, Task>,
    /// Content the drive already stores, by SHA-1 hex.
    known: HashMap<String, Vec<u8>>,
    faults: HashMap<u32, PartFault>,
    next_id: u64,
    stats: DriveStats,
}

impl State {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{}", self.next_id)
    }

    fn insert_node(&mut self, parent: &str, name: &str, is_dir: bool, content: Vec<u8>) -> String {
        let id = self.next(if is_dir { "dir-" } else { "file-" });
        self.nodes.insert(
            id.clone(),
            Node {
                parent: parent.to_string(),
                name: name.to_string(),
                is_dir,
                content,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.order.push(id.clone());
        id
    }

    fn children(&self, dir_id: &str) -> Vec<RemoteNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| (id, n)))
            .filter(|(_, n)| n.parent == dir_id)
            .map(|(id, n)| to_remote(id, n))
            .collect()
    }

    fn is_dir(&self, id: &str) -> bool {
        id == ROOT_ID || self.nodes.get(id).is_some_and(|n| n.is_dir)
    }

    fn task_for_upload(&mut self, upload_id: &str) -> Result<&mut Task> {
        self.tasks
            .values_mut()
            .find(|t| t.upload_id == upload_id)
            .ok_or_else(|| RemoteError::Api {
                status: 404,
                body: "<Error><Code>NoSuchUpload</Code></Error>".into(),
            })
    }
}

fn to_remote(id: &str, n: &Node) -> RemoteNode {
    RemoteNode {
        id: id.to_string(),
        name: n.name.clone(),
        size: n.content.len() as u64,
        is_dir: n.is_dir,
        created_at: n.created_at,
        updated_at: n.created_at,
    }
}

fn sha1_hex(data: &[u8]) -> String {
    let mut acc = Sha1Accumulator::new();
    acc.update(data);
    acc.hex_digest()
}

fn etag_of(data: &[u8]) -> String {
    hex::encode_upper(Md5::digest(data))
}

/// Signature the memory drive hands out for a canonical string.
fn signature(auth_meta: &str) -> String {
    format!("OSS memory:{}", content_md5(auth_meta.as_bytes()))
}

fn business(code: i64, message: &str) -> RemoteError {
    RemoteError::Business {
        code,
        status: 400,
        message: message.to_string(),
    }
}

fn oss_error(status: u16, code: &str) -> RemoteError {
    RemoteError::Api {
        status,
        body: format!("<Error><Code>{code}</Code></Error>"),
    }
}

pub struct MemoryDrive {
    part_size: u64,
    state: Mutex<State>,
}

impl MemoryDrive {
    pub fn new(part_size: u64) -> Self {
        Self {
            part_size,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a folder. Not counted in the stats.
    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        self.lock().insert_node(parent_id, name, true, Vec::new())
    }

    /// Seed a file; its content becomes known for instant uploads.
    pub fn add_file(&self, parent_id: &str, name: &str, content: &[u8]) -> String {
        let mut state = self.lock();
        state.known.insert(sha1_hex(content), content.to_vec());
        state.insert_node(parent_id, name, false, content.to_vec())
    }

    /// Make content known to the drive without placing it in the tree.
    pub fn mark_known(&self, content: &[u8]) {
        self.lock().known.insert(sha1_hex(content), content.to_vec());
    }

    /// Fail the next PUT of `part_number` once.
    pub fn inject_part_fault(&self, part_number: u32, fault: PartFault) {
        self.lock().faults.insert(part_number, fault);
    }

    /// Expire every open task, as the service does after a while.
    pub fn expire_tasks(&self) {
        for task in self.lock().tasks.values_mut() {
            task.expired = true;
        }
    }

    pub fn stats(&self) -> DriveStats {
        self.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.lock().stats = DriveStats::default();
    }

    pub fn node(&self, id: &str) -> Option<RemoteNode> {
        let state = self.lock();
        state.nodes.get(id).map(|n| to_remote(id, n))
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().nodes.get(id).map(|n| n.content.clone())
    }

    pub fn find(&self, parent_id: &str, name: &str) -> Option<RemoteNode> {
        self.lock()
            .children(parent_id)
            .into_iter()
            .find(|n| n.name == name)
    }

    /// Part numbers currently stored for an upload.
    pub fn stored_parts(&self, upload_id: &str) -> Vec<u32> {
        self.lock()
            .tasks
            .values()
            .find(|t| t.upload_id == upload_id)
            .map(|t| t.parts.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// `(part number, ETag)` pairs of a `CompleteMultipartUpload` body.
fn parse_complete_body(body: &str) -> Option<Vec<(u32, String)>> {
    body.split("<Part>")
        .skip(1)
        .map(|part| {
            let number = xml_tag(part, "PartNumber")?.parse().ok()?;
            let etag = xml_tag(part, "ETag")?.trim_matches('"').to_string();
            Some((number, etag))
        })
        .collect()
}

#[async_trait]
impl DriveApi for MemoryDrive {
    async fn check_identity(&self) -> Result<Value> {
        self.lock().stats.identity_checks += 1;
        Ok(json!({ "nickname": "memory" }))
    }

    async fn list_page(&self, dir_id: &str, page: u32, size: u32) -> Result<ListPage> {
        let mut state = self.lock();
        state.stats.listed_dirs.push(dir_id.to_string());
        if !state.is_dir(dir_id) {
            return Err(business(41004, "directory does not exist"));
        }
        let children = state.children(dir_id);
        let total = children.len() as u64;
        let skip = (page.max(1) as usize - 1) * size as usize;
        Ok(ListPage {
            nodes: children.into_iter().skip(skip).take(size as usize).collect(),
            total: Some(total),
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let mut state = self.lock();
        if !state.is_dir(parent_id) {
            return Err(business(41004, "parent directory does not exist"));
        }
        if state.children(parent_id).iter().any(|n| n.name == name) {
            return Err(business(23008, "name already exists"));
        }
        let id = state.insert_node(parent_id, name, true, Vec::new());
        state
            .stats
            .created_folders
            .push((parent_id.to_string(), name.to_string(), id.clone()));
        Ok(id)
    }

    async fn pre_upload(&self, request: &PreUploadRequest) -> Result<PreUpload> {
        let mut state = self.lock();
        state.stats.pre_uploads += 1;
        if !state.is_dir(&request.parent_id) {
            return Err(business(41004, "parent directory does not exist"));
        }
        let task_id = state.next("task-");
        let upload_id = state.next("upload-");
        let object_key = format!("obj/{task_id}");
        let auth_info = json!(format!("auth-{task_id}"));
        let callback = json!({
            "callbackUrl": format!("{UPLOAD_URL}/callback"),
            "callbackBody": format!("task={task_id}"),
        });
        state.tasks.insert(
            task_id.clone(),
            Task {
                file_name: request.file_name.clone(),
                parent_id: request.parent_id.clone(),
                size: request.size,
                object_key: object_key.clone(),
                upload_id: upload_id.clone(),
                auth_info: auth_info.clone(),
                callback: callback.clone(),
                parts: BTreeMap::new(),
                composed: None,
                instant_sha1: None,
                expired: false,
            },
        );
        Ok(PreUpload {
            task_id,
            bucket: BUCKET.to_string(),
            object_key,
            upload_id,
            upload_url: UPLOAD_URL.to_string(),
            auth_info,
            callback,
            part_size: self.part_size,
        })
    }

    async fn update_hash(&self, task_id: &str, md5: &str, sha1: &str) -> Result<bool> {
        let mut state = self.lock();
        state.stats.hash_checks += 1;
        if md5.len() != 32 || sha1.len() != 40 {
            return Err(business(41001, "malformed digest"));
        }
        let known = state.known.contains_key(sha1);
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| business(41013, "task not found"))?;
        if task.expired {
            return Err(business(41013, "task expired"));
        }
        if known {
            task.instant_sha1 = Some(sha1.to_string());
        }
        Ok(known)
    }

    async fn sign(&self, auth_meta: &str, auth_info: &Value, task_id: &str) -> Result<String> {
        let mut state = self.lock();
        state.stats.signs += 1;
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| business(41013, "task not found"))?;
        if task.expired {
            return Err(business(41013, "task expired"));
        }
        if &task.auth_info != auth_info {
            return Err(business(41017, "auth_info does not belong to task"));
        }
        Ok(signature(auth_meta))
    }

    async fn put_part(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: Vec<u8>,
    ) -> Result<String> {
        let ObjectRequest::PartUpload { part_number, .. } = request else {
            return Err(oss_error(400, "InvalidRequest"));
        };
        let part_number = *part_number;
        let mut state = self.lock();
        state.stats.part_puts.push(part_number);

        if authorization != signature(&canonical_string(request, target)) {
            return Err(oss_error(403, "SignatureDoesNotMatch"));
        }
        let hash_ctx = assemble_headers(request, authorization)
            .into_iter()
            .find(|(name, _)| *name == HASH_CTX_HEADER)
            .map(|(_, value)| value);
        let fault = state.faults.remove(&part_number);
        if fault == Some(PartFault::Reject) {
            return Err(oss_error(500, "InternalError"));
        }

        let task = state.task_for_upload(&target.upload_id)?;
        if let Some(existing) = task.parts.get(&part_number) {
            let body = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>PartAlreadyExist</Code>\
                 <Message>part already exists</Message><PartEtag>\"{}\"</PartEtag>\
                 <PartNumber>{part_number}</PartNumber></Error>",
                etag_of(existing)
            );
            return parse_part_response(409, None, &body);
        }

        match (part_number, hash_ctx) {
            (1, None) => {}
            (1, Some(_)) | (_, None) => return Err(oss_error(400, "InvalidHashContext")),
            (n, Some(ctx)) => {
                if (1..n).any(|i| !task.parts.contains_key(&i)) {
                    return Err(oss_error(400, "InvalidPartOrder"));
                }
                let mut acc = Sha1Accumulator::new();
                for (_, data) in task.parts.range(..n) {
                    acc.update(data);
                }
                let claimed = decode_header(&ctx).map_err(|_| oss_error(400, "InvalidHashContext"))?;
                if claimed != capture(&acc) {
                    return Err(oss_error(400, "InvalidHashContext"));
                }
            }
        }

        let etag = etag_of(&body);
        task.parts.insert(part_number, body);
        if fault == Some(PartFault::LoseResponse) {
            return Err(oss_error(502, "BadGateway"));
        }
        Ok(etag)
    }

    async fn commit(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: String,
    ) -> Result<()> {
        let ObjectRequest::Commit {
            content_md5: declared_md5,
            callback,
            ..
        } = request
        else {
            return Err(oss_error(400, "InvalidRequest"));
        };
        let mut state = self.lock();
        state.stats.commits += 1;

        if authorization != signature(&canonical_string(request, target)) {
            return Err(oss_error(403, "SignatureDoesNotMatch"));
        }
        if *declared_md5 != content_md5(body.as_bytes()) {
            return Err(oss_error(400, "InvalidDigest"));
        }
        let task = state.task_for_upload(&target.upload_id)?;
        if *callback != encode_callback(&task.callback) {
            return Err(oss_error(400, "InvalidCallback"));
        }

        let listed = parse_complete_body(&body).ok_or_else(|| oss_error(400, "MalformedXML"))?;
        if listed.len() != task.parts.len() {
            return Err(oss_error(400, "InvalidPart"));
        }
        let mut composed = Vec::new();
        for (expected, (number, etag)) in (1u32..).zip(&listed) {
            let data = task
                .parts
                .get(number)
                .filter(|_| *number == expected)
                .ok_or_else(|| oss_error(400, "InvalidPartOrder"))?;
            if etag_of(data) != *etag {
                return Err(oss_error(400, "InvalidPart"));
            }
            composed.extend_from_slice(data);
        }
        if composed.len() as u64 != task.size {
            return Err(oss_error(400, "InvalidPart"));
        }
        task.composed = Some(composed);
        Ok(())
    }

    async fn finish(&self, task_id: &str, object_key: &str) -> Result<serde_json::Map<String, Value>> {
        let mut state = self.lock();
        state.stats.finishes += 1;
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| business(41013, "task not found"))?;
        if task.expired {
            return Err(business(41013, "task expired"));
        }
        if task.object_key != object_key {
            return Err(business(41018, "object key does not belong to task"));
        }
        let content = match (&task.composed, &task.instant_sha1) {
            (Some(composed), _) => composed.clone(),
            (None, Some(sha1)) => state.known.get(sha1).cloned().unwrap_or_default(),
            (None, None) => return Err(business(41020, "object not composed")),
        };
        let (parent, name) = (task.parent_id.clone(), task.file_name.clone());

        state.tasks.remove(task_id);
        state.known.insert(sha1_hex(&content), content.clone());
        let size = content.len();
        let fid = state.insert_node(&parent, &name, false, content);

        let mut data = serde_json::Map::new();
        data.insert("fid".into(), json!(fid));
        data.insert("file_name".into(), json!(name));
        data.insert("size".into(), json!(size));
        data.insert("obj_key".into(), json!(object_key));
        data.insert(
            "preview_url".into(),
            json!(format!("{UPLOAD_URL}/preview/{fid}")),
        );
        Ok(data)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
