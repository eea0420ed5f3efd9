//! Object-store request signing material.
//!
//! The object store accepts two request kinds during an upload: a part PUT
//! and the final multipart-complete POST. Each is signed by the drive's
//! signing endpoint over a canonical string built here, then sent with the
//! header set produced by [`assemble_headers`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

use crate::types::ObjectTarget;

/// User agent the object store expects from the web uploader.
pub const OSS_USER_AGENT: &str = "aliyun-sdk-js/6.6.1 Chrome 98.0.4758.80 on Windows 10 64-bit";

pub const HASH_CTX_HEADER: &str = "X-Oss-Hash-Ctx";

/// RFC 1123 date in GMT as used by `x-oss-date`.
pub fn oss_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRequest {
    PartUpload {
        part_number: u32,
        mime_type: String,
        date: String,
        /// Encoded hash state of all previous parts; `None` for part 1.
        hash_ctx: Option<String>,
    },
    Commit {
        /// base64 MD5 of the XML body.
        content_md5: String,
        /// base64 of the completion callback.
        callback: String,
        date: String,
    },
}

impl ObjectRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ObjectRequest::PartUpload { .. } => "PUT",
            ObjectRequest::Commit { .. } => "POST",
        }
    }
}

/// The string the signing endpoint signs for this request.
pub fn canonical_string(request: &ObjectRequest, target: &ObjectTarget) -> String {
    match request {
        ObjectRequest::PartUpload {
            part_number,
            mime_type,
            date,
            hash_ctx,
        } => {
            let hash_line = hash_ctx
                .as_deref()
                .map(|ctx| format!("x-oss-hash-ctx:{ctx}\n"))
                .unwrap_or_default();
            format!(
                "PUT\n\n{mime_type}\n{date}\nx-oss-date:{date}\n{hash_line}x-oss-user-agent:{OSS_USER_AGENT}\n/{}/{}?partNumber={part_number}&uploadId={}",
                target.bucket, target.object_key, target.upload_id
            )
        }
        ObjectRequest::Commit {
            content_md5,
            callback,
            date,
        } => format!(
            "POST\n{content_md5}\napplication/xml\n{date}\nx-oss-callback:{callback}\nx-oss-date:{date}\nx-oss-user-agent:{OSS_USER_AGENT}\n/{}/{}?uploadId={}",
            target.bucket, target.object_key, target.upload_id
        ),
    }
}

/// Full header set for a signed request.
pub fn assemble_headers(request: &ObjectRequest, authorization: &str) -> Vec<(&'static str, String)> {
    let mut headers = vec![("Authorization", authorization.to_string())];
    match request {
        ObjectRequest::PartUpload {
            mime_type,
            date,
            hash_ctx,
            ..
        } => {
            headers.push(("Content-Type", mime_type.clone()));
            headers.push(("x-oss-date", date.clone()));
            headers.push(("x-oss-user-agent", OSS_USER_AGENT.to_string()));
            if let Some(ctx) = hash_ctx {
                headers.push((HASH_CTX_HEADER, ctx.clone()));
            }
        }
        ObjectRequest::Commit {
            content_md5,
            callback,
            date,
        } => {
            headers.push(("Content-MD5", content_md5.clone()));
            headers.push(("Content-Type", "application/xml".to_string()));
            headers.push(("x-oss-callback", callback.clone()));
            headers.push(("x-oss-date", date.clone()));
            headers.push(("x-oss-user-agent", OSS_USER_AGENT.to_string()));
        }
    }
    headers
}

/// `CompleteMultipartUpload` body for the given (part number, ETag) pairs.
pub fn complete_multipart_body(parts: &[(u32, &str)]) -> String {
    let mut body = String::from("<CompleteMultipartUpload>");
    for (number, etag) in parts {
        body.push_str(&format!(
            "<Part><PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>"
        ));
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}

pub fn content_md5(body: &[u8]) -> String {
    STANDARD.encode(Md5::digest(body))
}

/// base64 of the callback blob. String blobs are sent verbatim, anything else
/// as compact JSON.
pub fn encode_callback(callback: &serde_json::Value) -> String {
    match callback {
        serde_json::Value::String(s) => STANDARD.encode(s.as_bytes()),
        other => STANDARD.encode(other.to_string().as_bytes()),
    }
}

/// Text of the first `<tag>…</tag>` element in an XML document.
pub(crate) fn xml_tag<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(&body[start..end])
}
