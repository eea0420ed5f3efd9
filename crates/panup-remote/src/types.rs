use panup_core::types::{RemoteNode, millis_to_secs};
use serde::{Deserialize, Serialize};

/// One page of a directory listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub nodes: Vec<RemoteNode>,
    /// Total number of children, when the service reports it.
    pub total: Option<u64>,
}

/// Parameters of the pre-upload negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreUploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub parent_id: String,
}

/// Negotiated upload parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreUpload {
    pub task_id: String,
    pub bucket: String,
    #[serde(rename = "obj_key")]
    pub object_key: String,
    pub upload_id: String,
    pub upload_url: String,
    #[serde(default)]
    pub auth_info: serde_json::Value,
    #[serde(default)]
    pub callback: serde_json::Value,
    /// Filled from the response metadata, not the data block.
    #[serde(skip)]
    pub part_size: u64,
}

impl PreUpload {
    pub fn target(&self) -> ObjectTarget {
        ObjectTarget {
            bucket: self.bucket.clone(),
            object_key: self.object_key.clone(),
            upload_id: self.upload_id.clone(),
            upload_url: self.upload_url.clone(),
        }
    }
}

/// The multipart upload an object-store request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub object_key: String,
    pub upload_id: String,
    pub upload_url: String,
}

impl ObjectTarget {
    /// URL of the object, without the multipart query.
    pub fn object_url(&self, path_style: bool) -> String {
        if path_style {
            return format!(
                "{}/{}/{}",
                self.upload_url.trim_end_matches('/'),
                self.bucket,
                self.object_key
            );
        }
        let host = self
            .upload_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("https://{}.{}/{}", self.bucket, host, self.object_key)
    }
}

/// A listing entry as the drive sends it.
#[derive(Debug, Deserialize)]
pub(crate) struct WireNode {
    pub fid: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
    pub dir: Option<bool>,
    pub file: Option<bool>,
    pub created_at: Option<i64>,
    pub l_created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub l_updated_at: Option<i64>,
}

impl From<WireNode> for RemoteNode {
    fn from(w: WireNode) -> Self {
        let is_dir = match (w.dir, w.file) {
            (Some(dir), _) => dir,
            (None, Some(file)) => !file,
            (None, None) => false,
        };
        RemoteNode {
            id: w.fid,
            name: w.file_name,
            size: w.size,
            is_dir,
            created_at: millis_to_secs(w.created_at.or(w.l_created_at).unwrap_or_default()),
            updated_at: millis_to_secs(w.updated_at.or(w.l_updated_at).unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> ObjectTarget {
        ObjectTarget {
            bucket: "ul-zb".into(),
            object_key: "k/obj".into(),
            upload_id: "U1".into(),
            upload_url: url.into(),
        }
    }

    #[test]
    fn virtual_hosted_url_strips_scheme() {
        assert_eq!(
            target("https://pds.quark.cn").object_url(false),
            "https://ul-zb.pds.quark.cn/k/obj"
        );
        assert_eq!(
            target("http://pds.quark.cn/").object_url(false),
            "https://ul-zb.pds.quark.cn/k/obj"
        );
    }

    #[test]
    fn path_style_url_keeps_host() {
        assert_eq!(
            target("http://127.0.0.1:9000/").object_url(true),
            "http://127.0.0.1:9000/ul-zb/k/obj"
        );
    }

    #[test]
    fn wire_node_conversion() {
        let node: RemoteNode = serde_json::from_value::<WireNode>(serde_json::json!({
            "fid": "abc",
            "file_name": "docs",
            "file": false,
            "l_created_at": 1_700_000_000_999i64,
            "updated_at": 1_700_000_500_000i64
        }))
        .unwrap()
        .into();
        assert!(node.is_dir);
        assert_eq!(node.created_at, 1_700_000_000);
        assert_eq!(node.updated_at, 1_700_000_500);

        let file: RemoteNode = serde_json::from_value::<WireNode>(serde_json::json!({
            "fid": "f", "file_name": "a.txt", "size": 12, "dir": false
        }))
        .unwrap()
        .into();
        assert!(!file.is_dir);
        assert_eq!(file.size, 12);
    }

    #[test]
    fn pre_upload_reads_obj_key() {
        let pre: PreUpload = serde_json::from_value(serde_json::json!({
            "task_id": "t", "bucket": "b", "obj_key": "o", "upload_id": "u",
            "upload_url": "https://x", "auth_info": "ai", "callback": {"callbackUrl": "c"}
        }))
        .unwrap();
        assert_eq!(pre.object_key, "o");
        assert_eq!(pre.part_size, 0);
        assert_eq!(pre.target().upload_id, "u");
    }
}
