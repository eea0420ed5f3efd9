//! HttpDrive against a mock drive and object store.

use panup_core::config::{EndpointConfig, TimeoutConfig};
use panup_core::credentials::CredentialPool;
use panup_remote::headers::{HASH_CTX_HEADER, complete_multipart_body, content_md5, encode_callback};
use panup_remote::{
    DriveApi, HttpDrive, ObjectRequest, ObjectTarget, PreUploadRequest, RemoteError, oss_date,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, body_string, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn drive(server: &MockServer, tokens: &[&str]) -> (HttpDrive, Arc<CredentialPool>) {
    let tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    let pool = Arc::new(CredentialPool::with_initial(&tokens, 0).unwrap());
    let endpoints = EndpointConfig {
        drive_url: server.uri(),
        account_url: server.uri(),
        path_style: true,
    };
    let drive = HttpDrive::new(
        &endpoints,
        &TimeoutConfig::default(),
        pool.clone(),
        Duration::from_secs(300),
    )
    .unwrap();
    (drive, pool)
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 0, "status": 200, "message": "ok", "data": data
    }))
}

async fn mount_account(server: &MockServer, cookie: &str, valid: bool) {
    let body = if valid {
        json!({"success": true, "code": "OK", "data": {"nickname": "tester"}})
    } else {
        json!({"success": false, "code": "NO_LOGIN", "data": {}})
    };
    Mock::given(method("GET"))
        .and(path("/account/info"))
        .and(query_param("fr", "pc"))
        .and(query_param("platform", "pc"))
        .and(header("Cookie", cookie))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn target(server: &MockServer) -> ObjectTarget {
    ObjectTarget {
        bucket: "bkt".into(),
        object_key: "obj/key".into(),
        upload_id: "UP-1".into(),
        upload_url: server.uri(),
    }
}

#[tokio::test]
async fn identity_is_checked_once_per_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"success": true, "code": "OK", "data": {"nickname": "tester"}}),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/clouddrive/file/sort"))
        .and(query_param("pr", "ucpro"))
        .and(query_param("fr", "pc"))
        .and(query_param("pdir_fid", "0"))
        .and(query_param("_page", "1"))
        .and(query_param("_size", "50"))
        .and(header("Cookie", "__pus=b; __puus=a"))
        .respond_with(ok(json!({
            "list": [
                {"fid": "d1", "file_name": "docs", "dir": true, "created_at": 1_700_000_000_000i64},
                {"fid": "f1", "file_name": "a.txt", "file": true, "size": 3}
            ],
            "total": 2
        })))
        .expect(2)
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__pus=b; __puus=a"]);
    let page = drive.list_page("0", 1, 50).await.unwrap();
    assert_eq!(page.total, Some(2));
    assert!(page.nodes[0].is_dir);
    assert_eq!(page.nodes[0].created_at, 1_700_000_000);
    assert!(!page.nodes[1].is_dir);
    drive.list_page("0", 1, 50).await.unwrap();
}

#[tokio::test]
async fn rejected_token_fails_over() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=bad", false).await;
    mount_account(&server, "__puus=good", true).await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file"))
        .and(header("Cookie", "__puus=good"))
        .and(body_partial_json(json!({
            "pdir_fid": "0", "file_name": "new", "dir_path": "", "dir_init_lock": false
        })))
        .respond_with(ok(json!({"fid": "dir-9"})))
        .expect(1)
        .mount(&server)
        .await;

    let (drive, pool) = drive(&server, &["__puus=bad", "__puus=good"]);
    assert_eq!(drive.create_folder("0", "new").await.unwrap(), "dir-9");
    assert_eq!(pool.current().index, 1);
    assert_eq!(pool.available(), 1);
}

#[tokio::test]
async fn single_rejected_token_is_exhausted() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=bad", false).await;

    let (drive, _) = drive(&server, &["__puus=bad"]);
    let err = drive.list_page("0", 1, 50).await.unwrap_err();
    assert!(matches!(err, RemoteError::AllCredentialsExhausted));
}

#[tokio::test]
async fn pre_upload_reads_data_and_part_size() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=a", true).await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/upload/pre"))
        .and(body_partial_json(json!({
            "ccp_hash_update": true,
            "dir_name": "",
            "file_name": "a.bin",
            "format_type": "application/octet-stream",
            "pdir_fid": "dir-1",
            "size": 10
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "status": 200,
            "data": {
                "task_id": "T1", "bucket": "bkt", "obj_key": "obj/key",
                "upload_id": "UP-1", "upload_url": "http://oss.example",
                "auth_info": "AI", "callback": {"callbackUrl": "cb", "callbackBody": "b"}
            },
            "metadata": {"part_size": 4194304}
        })))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let pre = drive
        .pre_upload(&PreUploadRequest {
            file_name: "a.bin".into(),
            mime_type: "application/octet-stream".into(),
            size: 10,
            parent_id: "dir-1".into(),
        })
        .await
        .unwrap();
    assert_eq!(pre.task_id, "T1");
    assert_eq!(pre.object_key, "obj/key");
    assert_eq!(pre.part_size, 4_194_304);
    assert_eq!(pre.auth_info, json!("AI"));
}

#[tokio::test]
async fn business_failure_is_not_transport() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=a", true).await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/update/hash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 41013, "status": 400, "message": "task expired"
        })))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let err = drive.update_hash("T1", "m", "s").await.unwrap_err();
    assert!(matches!(err, RemoteError::Business { code: 41013, .. }));
    assert!(!err.is_transport());
}

#[tokio::test]
async fn hash_and_sign_round_trip() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=a", true).await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/update/hash"))
        .and(body_partial_json(json!({"md5": "m", "sha1": "s", "task_id": "T1"})))
        .respond_with(ok(json!({"finish": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/upload/auth"))
        .and(body_partial_json(json!({"auth_info": "AI", "auth_meta": "PUT\n...", "task_id": "T1"})))
        .respond_with(ok(json!({"auth_key": "OSS key:sig"})))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    assert!(drive.update_hash("T1", "m", "s").await.unwrap());
    assert_eq!(
        drive.sign("PUT\n...", &json!("AI"), "T1").await.unwrap(),
        "OSS key:sig"
    );
}

#[tokio::test]
async fn part_put_sends_signed_headers() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bkt/obj/key"))
        .and(query_param("partNumber", "2"))
        .and(query_param("uploadId", "UP-1"))
        .and(header("Authorization", "OSS key:sig"))
        .and(header("Content-Type", "video/mp4"))
        .and(header(HASH_CTX_HEADER, "CTX"))
        .and(header_exists("x-oss-date"))
        .and(body_string("chunk-two"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"E2\""))
        .expect(1)
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let request = ObjectRequest::PartUpload {
        part_number: 2,
        mime_type: "video/mp4".into(),
        date: oss_date(chrono::Utc::now()),
        hash_ctx: Some("CTX".into()),
    };
    let etag = drive
        .put_part(&target(&server), &request, "OSS key:sig", b"chunk-two".to_vec())
        .await
        .unwrap();
    assert_eq!(etag, "\"E2\"");
}

#[tokio::test]
async fn part_conflict_with_etag_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/bkt/obj/key"))
        .respond_with(ResponseTemplate::new(409).set_body_string(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error>\n  <Code>PartAlreadyExist</Code>\n  \
             <Message>Part already exist.</Message>\n  <PartEtag>\"9F2C\"</PartEtag>\n  \
             <PartNumber>1</PartNumber>\n</Error>",
        ))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let request = ObjectRequest::PartUpload {
        part_number: 1,
        mime_type: "application/octet-stream".into(),
        date: oss_date(chrono::Utc::now()),
        hash_ctx: None,
    };
    let etag = drive
        .put_part(&target(&server), &request, "sig", b"x".to_vec())
        .await
        .unwrap();
    assert_eq!(etag, "9F2C");
}

#[tokio::test]
async fn part_server_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503).set_body_string("slow down"))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let request = ObjectRequest::PartUpload {
        part_number: 1,
        mime_type: "text/plain".into(),
        date: oss_date(chrono::Utc::now()),
        hash_ctx: None,
    };
    let err = drive
        .put_part(&target(&server), &request, "sig", b"x".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Api { status: 503, .. }));
    assert!(err.is_transport());
}

#[tokio::test]
async fn commit_posts_xml_with_md5() {
    let server = MockServer::start().await;
    let body = complete_multipart_body(&[(1, "\"E1\""), (2, "\"E2\"")]);
    let md5 = content_md5(body.as_bytes());
    let callback = encode_callback(&json!({"callbackUrl": "cb"}));
    Mock::given(method("POST"))
        .and(path("/bkt/obj/key"))
        .and(query_param("uploadId", "UP-1"))
        .and(header("Content-MD5", md5.as_str()))
        .and(header("Content-Type", "application/xml"))
        .and(header("x-oss-callback", callback.as_str()))
        .and(body_string(body.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_string("<CompleteMultipartUploadResult/>"))
        .expect(1)
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let request = ObjectRequest::Commit {
        content_md5: md5.clone(),
        callback: callback.clone(),
        date: oss_date(chrono::Utc::now()),
    };
    drive
        .commit(&target(&server), &request, "OSS key:c", body)
        .await
        .unwrap();
}

#[tokio::test]
async fn finish_returns_data_map() {
    let server = MockServer::start().await;
    mount_account(&server, "__puus=a", true).await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/upload/finish"))
        .and(body_partial_json(json!({"obj_key": "obj/key", "task_id": "T1"})))
        .respond_with(ok(json!({"fid": "F1", "preview_url": "http://p"})))
        .mount(&server)
        .await;

    let (drive, _) = drive(&server, &["__puus=a"]);
    let data = drive.finish("T1", "obj/key").await.unwrap();
    assert_eq!(data["fid"], "F1");
}
