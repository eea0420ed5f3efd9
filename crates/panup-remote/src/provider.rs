use async_trait::async_trait;

use crate::error::Result;
use crate::headers::ObjectRequest;
use crate::types::{ListPage, ObjectTarget, PreUpload, PreUploadRequest};

/// Everything the upload engine needs from the remote drive.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Validate the current credential. Returns the account data.
    async fn check_identity(&self) -> Result<serde_json::Value>;

    /// One page (1-based) of a directory's children.
    async fn list_page(&self, dir_id: &str, page: u32, size: u32) -> Result<ListPage>;

    /// Create a folder and return its identifier.
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    /// Negotiate a new upload task.
    async fn pre_upload(&self, request: &PreUploadRequest) -> Result<PreUpload>;

    /// Submit whole-file digests. `true` means the content is already stored.
    async fn update_hash(&self, task_id: &str, md5: &str, sha1: &str) -> Result<bool>;

    /// Have the drive sign a canonical string for the object store.
    async fn sign(
        &self,
        auth_meta: &str,
        auth_info: &serde_json::Value,
        task_id: &str,
    ) -> Result<String>;

    /// PUT one part. Returns its ETag.
    async fn put_part(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: Vec<u8>,
    ) -> Result<String>;

    /// POST the multipart-complete document.
    async fn commit(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: String,
    ) -> Result<()>;

    /// Register the composed object in the user's tree.
    async fn finish(
        &self,
        task_id: &str,
        object_key: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>>;

    /// Backend name for display.
    fn name(&self) -> &str;
}
