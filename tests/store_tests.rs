mod common;

use common::*;
use document_generator::template::{
    CreateTemplateRequest, LocalTemplateStore, NewVersion, StoreError, TemplateStore, VersionTag,
};
use serde_json::json;
use uuid::Uuid;

fn create_request(title: &str) -> CreateTemplateRequest {
    CreateTemplateRequest {
        title: title.to_string(),
        description: "Monthly invoice".to_string(),
        labels: vec!["finance".to_string()],
    }
}

fn new_version(tag: &str) -> NewVersion {
    NewVersion {
        tag: tag.parse().unwrap(),
        message: format!("release {tag}"),
        docx: docx(&paragraph("{{ CUSTOMER }}")),
        example: json!({"CUSTOMER": "Acme"}).to_string().into_bytes(),
    }
}

#[tokio::test]
async fn test_create_and_list_templates() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();

    // Act
    let created = store.create(create_request("Invoice")).await.unwrap();
    let listed = store.list().await.unwrap();

    // Assert
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.id);
    assert_eq!(listed[0].title, "Invoice");
    assert!(listed[0].versions.is_empty());
    assert!(dir.path().join(created.id.to_string()).is_dir());
}

#[tokio::test]
async fn test_versions_are_listed_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();
    let meta = store.create(create_request("Invoice")).await.unwrap();

    for tag in ["v1.2.0", "v1.10.0", "v1.9.3"] {
        store.add_version(meta.id, new_version(tag)).await.unwrap();
    }

    let tags: Vec<String> = store
        .versions(meta.id)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.tag.to_string())
        .collect();
    assert_eq!(tags, vec!["v1.10.0", "v1.9.3", "v1.2.0"]);

    let (latest, bytes) = store.load_template(meta.id, None).await.unwrap();
    assert_eq!(latest, VersionTag::new(1, 10, 0));
    assert_eq!(bytes, docx(&paragraph("{{ CUSTOMER }}")));
}

#[tokio::test]
async fn test_duplicate_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();
    let meta = store.create(create_request("Invoice")).await.unwrap();
    store.add_version(meta.id, new_version("v1.0.0")).await.unwrap();

    let err = store.add_version(meta.id, new_version("v1.0.0")).await.unwrap_err();

    assert!(matches!(err, StoreError::DuplicateVersion { .. }), "{err:?}");
}

#[tokio::test]
async fn test_invalid_uploads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();
    let meta = store.create(create_request("Invoice")).await.unwrap();

    let mut not_a_zip = new_version("v1.0.0");
    not_a_zip.docx = b"plain text".to_vec();
    let err = store.add_version(meta.id, not_a_zip).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTemplate(_)), "{err:?}");

    let mut array_example = new_version("v1.0.0");
    array_example.example = b"[1, 2]".to_vec();
    let err = store.add_version(meta.id, array_example).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidTemplate(_)), "{err:?}");

    assert!(store.versions(meta.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_template_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();
    let meta = store.create(create_request("Invoice")).await.unwrap();

    let err = store.get(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, StoreError::TemplateNotFound(_)));

    let err = store.load_template(meta.id, None).await.unwrap_err();
    assert!(matches!(err, StoreError::NoVersions(_)));

    let err = store
        .load_template(meta.id, Some(VersionTag::new(9, 9, 9)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionNotFound { .. }));

    let err = store
        .add_version(Uuid::new_v4(), new_version("v1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TemplateNotFound(_)));
}

#[tokio::test]
async fn test_example_body_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalTemplateStore::open(dir.path()).await.unwrap();
    let meta = store.create(create_request("Invoice")).await.unwrap();
    store.add_version(meta.id, new_version("v2.0.0")).await.unwrap();

    let example = store
        .load_example(meta.id, VersionTag::new(2, 0, 0))
        .await
        .unwrap();

    assert_eq!(example.get("CUSTOMER"), Some(&json!("Acme")));
}

#[tokio::test]
async fn test_reopened_store_sees_existing_templates() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = LocalTemplateStore::open(dir.path()).await.unwrap();
        let meta = store.create(create_request("Invoice")).await.unwrap();
        store.add_version(meta.id, new_version("v1.0.0")).await.unwrap();
        meta.id
    };
    std::fs::create_dir(dir.path().join("not-a-template")).unwrap();

    let reopened = LocalTemplateStore::open(dir.path()).await.unwrap();

    let meta = reopened.get(id).await.unwrap();
    assert_eq!(meta.versions, vec![VersionTag::new(1, 0, 0)]);
    assert_eq!(reopened.list().await.unwrap().len(), 1);
    let version = reopened.version(id, VersionTag::new(1, 0, 0)).await.unwrap();
    assert_eq!(version.message, "release v1.0.0");
}
