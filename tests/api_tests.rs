mod common;

use std::sync::Arc;

use actix_web::{http::header, http::StatusCode, test, web, App};
use common::*;
use document_generator::{configure_api, AppConfig, AppState};
use document_generator::template::LocalTemplateStore;
use serde_json::{json, Value};
use tempfile::TempDir;

const BOUNDARY: &str = "----docgen-test-boundary";

async fn app_state(dir: &TempDir) -> AppState {
    let root = dir.path().to_path_buf();
    let config = AppConfig::from_lookup(|name| match name {
        "LOCAL_STORAGE_TEMPLATE_PATH" => Some(root.display().to_string()),
        _ => None,
    })
    .unwrap();
    let store = LocalTemplateStore::open(config.template_root.clone()).await.unwrap();
    let fetcher = Arc::new(MemoryFetcher::default().with("mem://sig.png", png(8, 4)));
    AppState::with_parts(config, Arc::new(store), engine(fetcher))
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .service(web::scope("/api/v1").configure(configure_api)),
        )
        .await
    };
}

/// Build a `multipart/form-data` body from text fields and files.
fn multipart(texts: &[(&str, &str)], files: &[(&str, &str, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in texts {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    for (name, filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(id: &str, body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri(&format!("/api/v1/templates/{id}/versions"))
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

fn invoice_template() -> Vec<u8> {
    docx(&format!(
        "{}{}",
        paragraph("Customer: {{ CUSTOMER }}"),
        paragraph("{{ SIGNATURE }}")
    ))
}

fn invoice_example() -> Vec<u8> {
    json!({"CUSTOMER": "Acme", "IMG|SIGNATURE": {"source": "mem://sig.png", "width": 20}})
        .to_string()
        .into_bytes()
}

#[actix_web::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body, json!({"status": "App is healthy"}));
}

#[actix_web::test]
async fn test_template_lifecycle_and_generation() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);

    let req = test::TestRequest::post()
        .uri("/api/v1/templates")
        .set_json(json!({"title": "Monthly Invoice", "description": "Invoice for customers"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();

    let upload = multipart(
        &[("tag", "v1.0.0"), ("message", "first release")],
        &[
            ("docx_file", "invoice.docx", invoice_template()),
            ("json_file", "invoice.json", invoice_example()),
        ],
    );
    let resp = test::call_service(&app, upload_request(&id, upload).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Act
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/docx/{id}"))
        .set_json(json!({
            "CUSTOMER": "Globex",
            "IMG|SIGNATURE": {"source": "mem://sig.png", "width": 20}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    // Assert
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
    assert_eq!(
        content_type,
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("monthly-invoice_v1.0.0.docx"), "{disposition}");

    let bytes = test::read_body(resp).await;
    let xml = document_xml(&bytes);
    assert!(xml.contains("Customer: Globex"));
    assert!(xml.contains("<w:drawing>"));
}

#[actix_web::test]
async fn test_versions_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);
    let req = test::TestRequest::post()
        .uri("/api/v1/templates")
        .set_json(json!({"title": "Letter", "description": ""}))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap().to_string();

    for tag in ["v1.0.0", "v1.1.0"] {
        let upload = multipart(
            &[("tag", tag)],
            &[
                ("docx_file", "t.docx", invoice_template()),
                ("json_file", "t.json", invoice_example()),
            ],
        );
        let resp = test::call_service(&app, upload_request(&id, upload).to_request()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{id}/versions"))
        .to_request();
    let versions: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(versions[0]["tag"], "v1.1.0");
    assert_eq!(versions[1]["tag"], "v1.0.0");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{id}/versions/v1.0.0"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{id}/versions/latest"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let duplicate = multipart(
        &[("tag", "v1.1.0")],
        &[
            ("docx_file", "t.docx", invoice_template()),
            ("json_file", "t.json", invoice_example()),
        ],
    );
    let resp = test::call_service(&app, upload_request(&id, duplicate).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[actix_web::test]
async fn test_upload_without_docx_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);
    let req = test::TestRequest::post()
        .uri("/api/v1/templates")
        .set_json(json!({"title": "Letter", "description": ""}))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap().to_string();

    let upload = multipart(&[("tag", "v1.0.0")], &[("json_file", "t.json", invoice_example())]);
    let resp = test::call_service(&app, upload_request(&id, upload).to_request()).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("docx_file"));
}

#[actix_web::test]
async fn test_body_not_matching_example_is_rejected() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);
    let req = test::TestRequest::post()
        .uri("/api/v1/templates")
        .set_json(json!({"title": "Invoice", "description": ""}))
        .to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap().to_string();
    let upload = multipart(
        &[("tag", "v1.0.0")],
        &[
            ("docx_file", "t.docx", invoice_template()),
            ("json_file", "t.json", invoice_example()),
        ],
    );
    let resp = test::call_service(&app, upload_request(&id, upload).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // Act
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/docx/{id}/v1.0.0"))
        .set_json(json!({"CUSTOMER": 7, "NOTE": "extra"}))
        .to_request();
    let resp = test::call_service(&app, req).await;

    // Assert
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "ValidationError");
    let report = &body["validation_result"];
    assert_eq!(report["missing_keys"], json!(["IMG|SIGNATURE"]));
    assert_eq!(report["extra_keys"], json!(["NOTE"]));
    assert_eq!(
        report["type_mismatches"],
        json!(["CUSTOMER (expected string, got number)"])
    );
}

#[actix_web::test]
async fn test_unknown_template_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);
    let id = uuid::Uuid::new_v4();

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/templates/{id}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/docx/{id}"))
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_empty_title_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = init_app!(app_state(&dir).await);

    let req = test::TestRequest::post()
        .uri("/api/v1/templates")
        .set_json(json!({"title": "  ", "description": "x"}))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
