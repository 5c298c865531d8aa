use crate::photos::{Analysis, BackendCsv, Catalog, ImageCreate, ImageUpdate};
use crate::semantic::embeddings::model_id;

fn create(file_name: &str, caption: &str, embedding: Option<Vec<f32>>) -> ImageCreate {
    ImageCreate {
        file_name: file_name.to_string(),
        file_size: 2048,
        blob_id: format!("{file_name}.blob"),
        manual_labels: vec!["Beach".to_string(), "beach".to_string()],
        analysis: Analysis {
            width: Some(640),
            height: Some(480),
            format: Some("PNG".to_string()),
            short_caption: caption.to_string(),
            ai_keywords: vec!["sand".to_string(), "water".to_string()],
            caption_embedding: embedding,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn open(dir: &tempfile::TempDir, model: &str) -> BackendCsv {
    BackendCsv::load(
        &dir.path().join("images.csv"),
        &dir.path().join("vectors.bin"),
        model_id(model),
    )
    .expect("failed to load catalog")
}

#[test]
fn test_create_and_reload() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = open(&tmp, "model-a");
    assert_eq!(catalog.total(), 0);

    let created = catalog
        .create_many(vec![
            create("a.png", "a sunny beach", Some(vec![0.1, 0.2, 0.3])),
            create("b.png", "", None),
        ])
        .unwrap();
    assert_eq!(created.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(created[0].manual_labels, vec!["beach"]);

    let reloaded = open(&tmp, "model-a");
    let snapshot = reloaded.snapshot();
    assert_eq!(snapshot.len(), 2);

    let a = &snapshot[0];
    assert_eq!(a.file_name, "a.png");
    assert_eq!(a.width, Some(640));
    assert_eq!(a.format.as_deref(), Some("PNG"));
    assert_eq!(a.ai_keywords, vec!["sand", "water"]);
    assert_eq!(a.uploaded_at, created[0].uploaded_at);
    assert_eq!(a.caption_embedding, Some(vec![0.1, 0.2, 0.3]));

    assert_eq!(snapshot[1].caption_embedding, None);

    let next = reloaded.create(create("c.png", "", None)).unwrap();
    assert_eq!(next.id, 3);
}

#[test]
fn test_embeddings_from_another_model_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    open(&tmp, "model-a")
        .create(create("a.png", "a sunny beach", Some(vec![1.0, 0.0])))
        .unwrap();

    let reloaded = open(&tmp, "model-b");
    let record = reloaded.get(1).unwrap();
    assert_eq!(record.short_caption, "a sunny beach");
    assert_eq!(record.caption_embedding, None);
}

#[test]
fn test_stale_embeddings_are_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    open(&tmp, "model-a")
        .create(create("a.png", "a sunny beach", Some(vec![1.0, 0.0])))
        .unwrap();

    // caption edited outside the app
    let csv_path = tmp.path().join("images.csv");
    let csv = std::fs::read_to_string(&csv_path).unwrap();
    std::fs::write(&csv_path, csv.replace("a sunny beach", "a rainy beach")).unwrap();

    let record = open(&tmp, "model-a").get(1).unwrap();
    assert_eq!(record.short_caption, "a rainy beach");
    assert_eq!(record.caption_embedding, None);
}

#[test]
fn test_snapshot_isolation() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = open(&tmp, "model-a");
    catalog.create(create("a.png", "", None)).unwrap();

    let before = catalog.snapshot();
    catalog.create(create("b.png", "", None)).unwrap();
    catalog
        .update(
            1,
            ImageUpdate {
                append_labels: Some(vec!["sunset".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(before[0].manual_labels, vec!["beach"]);
    assert_eq!(catalog.snapshot().len(), 2);
    assert_eq!(catalog.get(1).unwrap().manual_labels, vec!["beach", "sunset"]);
}

#[test]
fn test_update_labels() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = open(&tmp, "model-a");
    catalog.create(create("a.png", "", None)).unwrap();

    let updated = catalog
        .update(
            1,
            ImageUpdate {
                manual_labels: Some(vec!["Dog, park".to_string()]),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(updated.manual_labels, vec!["dog", "park"]);

    let updated = catalog
        .update(
            1,
            ImageUpdate {
                remove_labels: Some(vec!["PARK".to_string()]),
                append_labels: Some(vec!["dog".to_string(), "ball".to_string()]),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(updated.manual_labels, vec!["dog", "ball"]);

    assert!(catalog
        .update(99, ImageUpdate::default())
        .unwrap()
        .is_none());
}

#[test]
fn test_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = open(&tmp, "model-a");
    catalog
        .create_many(vec![create("a.png", "", None), create("b.png", "", None)])
        .unwrap();

    let removed = catalog.delete(1).unwrap().unwrap();
    assert_eq!(removed.file_name, "a.png");
    assert!(catalog.delete(1).unwrap().is_none());

    let reloaded = open(&tmp, "model-a");
    assert_eq!(reloaded.total(), 1);
    assert!(reloaded.get(1).is_none());
    assert!(reloaded.get(2).is_some());
}
