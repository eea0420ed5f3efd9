//! Drive client over `reqwest`.

use async_trait::async_trait;
use panup_core::config::{EndpointConfig, TimeoutConfig};
use panup_core::credentials::{Credential, CredentialPool};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RemoteError, Result};
use crate::headers::{ObjectRequest, assemble_headers, xml_tag};
use crate::liveness::Liveness;
use crate::provider::DriveApi;
use crate::types::{ListPage, ObjectTarget, PreUpload, PreUploadRequest, WireNode};

const FILE_UPLOAD_PRE: &str = "/1/clouddrive/file/upload/pre";
const FILE_UPDATE_HASH: &str = "/1/clouddrive/file/update/hash";
const FILE_UPLOAD_AUTH: &str = "/1/clouddrive/file/upload/auth";
const FILE_UPLOAD_FINISH: &str = "/1/clouddrive/file/upload/finish";
const FILE_SORT: &str = "/1/clouddrive/file/sort";
const CREATE_FOLDER: &str = "/1/clouddrive/file";
const ACCOUNT_INFO: &str = "/account/info";

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";
const WEB_ORIGIN: &str = "https://pan.quark.cn";

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 500;

pub struct HttpDrive {
    http: reqwest::Client,
    drive_url: String,
    account_url: String,
    path_style: bool,
    timeouts: TimeoutConfig,
    pool: Arc<CredentialPool>,
    liveness: Liveness,
    debug: bool,
}

impl HttpDrive {
    pub fn new(
        endpoints: &EndpointConfig,
        timeouts: &TimeoutConfig,
        pool: Arc<CredentialPool>,
        auth_check_ttl: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(ORIGIN, HeaderValue::from_static(WEB_ORIGIN));
        headers.insert(REFERER, HeaderValue::from_static("https://pan.quark.cn/list"));
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            drive_url: endpoints.drive_url.trim_end_matches('/').to_string(),
            account_url: endpoints.account_url.trim_end_matches('/').to_string(),
            path_style: endpoints.path_style,
            timeouts: timeouts.clone(),
            pool,
            liveness: Liveness::new(auth_check_ttl),
            debug: false,
        })
    }

    /// Log full response bodies at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// Validate the current token through the liveness gate, failing over
    /// to the next one if it is rejected.
    pub async fn ensure_auth(&self) -> Result<()> {
        self.liveness
            .ensure(&self.pool, |cred| self.identity_with(cred))
            .await
    }

    async fn identity_with(&self, cred: Credential) -> Result<()> {
        self.account_info(&cred).await.map(|_| ())
    }

    async fn account_info(&self, cred: &Credential) -> Result<Value> {
        let url = format!("{}{ACCOUNT_INFO}", self.account_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("fr", "pc"), ("platform", "pc")])
            .header("Cookie", cred.cookie_header())
            .timeout(self.timeouts.api())
            .send()
            .await?;
        let body = self.read_json(resp).await?;
        parse_account_info(body)
    }

    /// Read a JSON response, mapping HTTP failures to [`RemoteError::Api`].
    async fn read_json(&self, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let url = resp.url().path().to_string();
        let bytes = resp.bytes().await?;
        if self.debug {
            tracing::debug!(%url, %status, body = %String::from_utf8_lossy(&bytes), "response");
        } else {
            tracing::debug!(%url, %status, "response");
        }
        if status.is_client_error() || status.is_server_error() {
            return Err(api_error(status, &bytes));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Authenticated call on the drive host. Returns `(data, metadata)`.
    async fn drive_call(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<(Value, Value)> {
        self.ensure_auth().await?;
        let cred = self.pool.current();
        let url = format!("{}{endpoint}", self.drive_url);
        tracing::debug!(%method, endpoint, "drive request");

        let mut req = self
            .http
            .request(method, &url)
            .query(&[("pr", "ucpro"), ("fr", "pc")])
            .query(query)
            .header("Cookie", cred.cookie_header())
            .timeout(self.timeouts.api());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        let value = self.read_json(resp).await?;
        unwrap_envelope(value)
    }
}

/// Split the `{code, status, message, data, metadata}` envelope, turning a
/// business failure into [`RemoteError::Business`].
pub(crate) fn unwrap_envelope(value: Value) -> Result<(Value, Value)> {
    let code = value.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let status = value.get("status").and_then(Value::as_i64).unwrap_or(-1);
    if code != 0 || status != 200 {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(RemoteError::Business {
            code,
            status,
            message,
        });
    }
    let mut value = value;
    let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    let metadata = value
        .get_mut("metadata")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok((data, metadata))
}

fn parse_account_info(body: Value) -> Result<Value> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(false);
    let code = body.get("code").and_then(Value::as_str).unwrap_or_default();
    if !success || code != "OK" {
        return Err(RemoteError::AuthFailed(format!(
            "account check returned success={success}, code={code:?}"
        )));
    }
    match body.get("data") {
        Some(Value::Object(data)) if !data.is_empty() => Ok(Value::Object(data.clone())),
        _ => Err(RemoteError::AuthFailed("account data is empty".into())),
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> RemoteError {
    let text = String::from_utf8_lossy(body);
    // prefer the service's own message when the error body is JSON
    let message = serde_json::from_slice::<Value>(body).ok().and_then(|v| {
        ["message", "errmsg"]
            .iter()
            .find_map(|k| v.get(*k).and_then(Value::as_str).map(String::from))
            .filter(|m| !m.is_empty())
    });
    let body = match message {
        Some(m) => m,
        None if text.len() > MAX_ERROR_BODY => {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| text.is_char_boundary(*i))
                .unwrap_or(0);
            format!("{}...", &text[..cut])
        }
        None => text.into_owned(),
    };
    RemoteError::Api {
        status: status.as_u16(),
        body,
    }
}

/// Interpret the object store's answer to a part PUT.
///
/// A 409 whose body reports `PartAlreadyExist` with a `PartEtag` means an
/// earlier attempt already stored this part; its ETag is as good as a fresh
/// one.
pub fn parse_part_response(status: u16, etag_header: Option<&str>, body: &str) -> Result<String> {
    if status == 409 && body.contains("PartAlreadyExist") {
        if let Some(etag) = xml_tag(body, "PartEtag").map(|e| e.trim().trim_matches('"')) {
            if !etag.is_empty() {
                return Ok(etag.to_string());
            }
        }
    }
    if status >= 400 {
        return Err(RemoteError::Api {
            status,
            body: body.to_string(),
        });
    }
    match etag_header {
        Some(etag) if !etag.is_empty() => Ok(etag.to_string()),
        _ => Err(RemoteError::Protocol("no ETag in part response".into())),
    }
}

fn required_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| RemoteError::Protocol(format!("response has no {key}")))
}

pub(crate) fn parse_list_page(data: Value, metadata: &Value) -> Result<ListPage> {
    let list = data
        .get("list")
        .cloned()
        .ok_or_else(|| RemoteError::Protocol("listing has no list".into()))?;
    let nodes: Vec<WireNode> = serde_json::from_value(list)?;
    let total = data
        .get("total")
        .and_then(Value::as_u64)
        .or_else(|| metadata.get("_total").and_then(Value::as_u64));
    Ok(ListPage {
        nodes: nodes.into_iter().map(Into::into).collect(),
        total,
    })
}

#[async_trait]
impl DriveApi for HttpDrive {
    async fn check_identity(&self) -> Result<Value> {
        self.account_info(&self.pool.current()).await
    }

    async fn list_page(&self, dir_id: &str, page: u32, size: u32) -> Result<ListPage> {
        let query = [
            ("pdir_fid", dir_id.to_string()),
            ("_page", page.to_string()),
            ("_size", size.to_string()),
            ("_fetch_total", "1".to_string()),
            ("_fetch_sub_dirs", "0".to_string()),
            ("_sort", "file_type:asc,updated_at:desc".to_string()),
            ("fetch_all_file", "1".to_string()),
        ];
        let (data, metadata) = self
            .drive_call(reqwest::Method::GET, FILE_SORT, &query, None)
            .await?;
        parse_list_page(data, &metadata)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let body = json!({
            "pdir_fid": parent_id,
            "file_name": name,
            "dir_path": "",
            "dir_init_lock": false,
        });
        let (data, _) = self
            .drive_call(reqwest::Method::POST, CREATE_FOLDER, &[], Some(body))
            .await?;
        required_str(&data, "fid")
    }

    async fn pre_upload(&self, request: &PreUploadRequest) -> Result<PreUpload> {
        let now = chrono::Utc::now().timestamp_millis();
        let body = json!({
            "ccp_hash_update": true,
            "dir_name": "",
            "file_name": request.file_name,
            "format_type": request.mime_type,
            "l_created_at": now,
            "l_updated_at": now,
            "pdir_fid": request.parent_id,
            "size": request.size,
        });
        let (data, metadata) = self
            .drive_call(reqwest::Method::POST, FILE_UPLOAD_PRE, &[], Some(body))
            .await?;
        let mut pre: PreUpload = serde_json::from_value(data)?;
        pre.part_size = metadata
            .get("part_size")
            .and_then(Value::as_u64)
            .filter(|size| *size > 0)
            .ok_or_else(|| RemoteError::Protocol("pre-upload has no part_size".into()))?;
        Ok(pre)
    }

    async fn update_hash(&self, task_id: &str, md5: &str, sha1: &str) -> Result<bool> {
        let body = json!({ "md5": md5, "sha1": sha1, "task_id": task_id });
        let (data, _) = self
            .drive_call(reqwest::Method::POST, FILE_UPDATE_HASH, &[], Some(body))
            .await?;
        Ok(data.get("finish").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn sign(&self, auth_meta: &str, auth_info: &Value, task_id: &str) -> Result<String> {
        let body = json!({
            "auth_info": auth_info,
            "auth_meta": auth_meta,
            "task_id": task_id,
        });
        let (data, _) = self
            .drive_call(reqwest::Method::POST, FILE_UPLOAD_AUTH, &[], Some(body))
            .await?;
        required_str(&data, "auth_key")
    }

    async fn put_part(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: Vec<u8>,
    ) -> Result<String> {
        let ObjectRequest::PartUpload { part_number, .. } = request else {
            return Err(RemoteError::Protocol("put_part needs a part request".into()));
        };
        let url = target.object_url(self.path_style);
        tracing::debug!(part = part_number, bytes = body.len(), "PUT part");

        let mut req = self
            .http
            .put(&url)
            .query(&[
                ("partNumber", part_number.to_string()),
                ("uploadId", target.upload_id.clone()),
            ])
            .timeout(self.timeouts.part())
            .body(body);
        for (name, value) in assemble_headers(request, authorization) {
            req = req.header(name, value);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let text = resp.text().await?;
        parse_part_response(status, etag.as_deref(), &text)
    }

    async fn commit(
        &self,
        target: &ObjectTarget,
        request: &ObjectRequest,
        authorization: &str,
        body: String,
    ) -> Result<()> {
        let url = target.object_url(self.path_style);
        tracing::debug!(upload_id = %target.upload_id, "POST complete multipart");

        let mut req = self
            .http
            .post(&url)
            .query(&[("uploadId", target.upload_id.as_str())])
            .timeout(self.timeouts.commit())
            .body(body);
        for (name, value) in assemble_headers(request, authorization) {
            req = req.header(name, value);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            let bytes = resp.bytes().await?;
            return Err(RemoteError::Api {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(())
    }

    async fn finish(&self, task_id: &str, object_key: &str) -> Result<serde_json::Map<String, Value>> {
        let body = json!({ "obj_key": object_key, "task_id": task_id });
        let (data, _) = self
            .drive_call(reqwest::Method::POST, FILE_UPLOAD_FINISH, &[], Some(body))
            .await?;
        match data {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(serde_json::Map::new()),
            other => Err(RemoteError::Protocol(format!(
                "finish returned non-object data: {other}"
            ))),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
