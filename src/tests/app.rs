use std::sync::Arc;

use super::support::{
    self, create_app, create_flaky_app, png, upload, BrokenCaptioner, FakeCaptioner,
};
use crate::app::{AppError, LabelUpdate};
use crate::search::SearchRequest;

#[test]
fn test_upload_batch() {
    let (app, paths, _tmp) = create_app(support::capabilities());

    let report = app
        .upload(
            &[
                upload("one.png", png(64, 48)),
                upload("notes.txt", b"hello".to_vec()),
                upload("two.PNG", png(32, 32)),
            ],
            &["Holiday".to_string(), "beach,holiday".to_string()],
        )
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].file_name, "notes.txt");

    let uploaded = &report.uploaded;
    assert_eq!(uploaded.len(), 2);
    assert_eq!(uploaded[0].id, 1);
    assert_eq!(uploaded[0].file_name, "one.png");
    assert_eq!(uploaded[0].width, Some(64));
    assert_eq!(uploaded[0].height, Some(48));
    assert_eq!(uploaded[0].format.as_deref(), Some("PNG"));
    assert_eq!(uploaded[0].manual_labels, vec!["holiday", "beach"]);
    assert_eq!(uploaded[0].short_caption, "A sunset over the beach");
    assert_eq!(uploaded[0].ocr_text, "hotel del mar");
    assert!(uploaded[0].ai_keywords.contains(&"sunset".to_string()));
    assert!(uploaded[0].caption_embedding.is_some());
    assert_eq!(uploaded[1].id, 2);

    for record in uploaded {
        assert!(paths.uploads_path.join(&record.blob_id).exists());
        let thumbnail = record.thumbnail_id.as_ref().unwrap();
        assert!(paths.uploads_path.join(thumbnail).exists());
    }

    assert_eq!(app.total(), 2);
}

#[test]
fn test_upload_nothing() {
    let (app, _paths, _tmp) = create_app(support::capabilities());
    assert!(matches!(
        app.upload(&[], &[]),
        Err(AppError::BadRequest(_))
    ));
}

#[test]
fn test_upload_without_captions() {
    let mut capabilities = support::capabilities();
    capabilities.captioner = Some(Arc::new(BrokenCaptioner));
    capabilities.ocr = None;
    let (app, _paths, _tmp) = create_app(capabilities);

    let report = app.upload(&[upload("a.png", png(8, 8))], &[]).unwrap();

    let record = &report.uploaded[0];
    assert!(record.short_caption.is_empty());
    assert!(record.ocr_text.is_empty());
    assert!(record.ai_keywords.is_empty());
    assert!(record.caption_embedding.is_none());
}

#[test]
fn test_search_uploaded() {
    let (app, _paths, _tmp) = create_app(support::capabilities());
    app.upload(&[upload("a.png", png(8, 8))], &["sunset".to_string()])
        .unwrap();

    let page = app
        .search(SearchRequest {
            query: "sunset on the beach".to_string(),
            ..Default::default()
        })
        .unwrap();

    assert_eq!(page.outcome.results.len(), 1);
    assert_eq!(page.images.len(), 1);
    assert_eq!(page.images[0].file_name, "a.png");
    // same two vocabulary words in caption and query
    assert!(page.outcome.results[0].ai > 0.99);
}

#[test]
fn test_list_newest_first() {
    let (app, _paths, _tmp) = create_app(support::capabilities());
    for name in ["a.png", "b.png", "c.png"] {
        app.upload(&[upload(name, png(4, 4))], &[]).unwrap();
    }

    let names: Vec<String> = app.list(None, 0).into_iter().map(|r| r.file_name).collect();
    assert_eq!(names, vec!["c.png", "b.png", "a.png"]);

    let names: Vec<String> = app
        .list(Some(1), 1)
        .into_iter()
        .map(|r| r.file_name)
        .collect();
    assert_eq!(names, vec!["b.png"]);
}

#[test]
fn test_delete_removes_files() {
    let (app, paths, _tmp) = create_app(support::capabilities());
    let report = app.upload(&[upload("a.png", png(8, 8))], &[]).unwrap();
    let record = &report.uploaded[0];

    let removed = app.delete(record.id).unwrap();
    assert_eq!(removed.id, record.id);
    assert!(!paths.uploads_path.join(&record.blob_id).exists());
    assert!(!paths
        .uploads_path
        .join(record.thumbnail_id.as_ref().unwrap())
        .exists());

    assert!(matches!(app.delete(record.id), Err(AppError::NotFound(_))));
    assert!(matches!(app.get(record.id), Err(AppError::NotFound(_))));
}

#[test]
fn test_update_labels() {
    let (app, _paths, _tmp) = create_app(support::capabilities());
    app.upload(&[upload("a.png", png(8, 8))], &["beach".to_string()])
        .unwrap();

    let updated = app
        .update_labels(
            1,
            LabelUpdate {
                append: Some(vec!["Sunset".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(updated.manual_labels, vec!["beach", "sunset"]);

    assert!(matches!(
        app.update_labels(1, LabelUpdate::default()),
        Err(AppError::BadRequest(_))
    ));
    assert!(matches!(
        app.update_labels(
            7,
            LabelUpdate {
                labels: Some(vec![]),
                ..Default::default()
            }
        ),
        Err(AppError::NotFound(7))
    ));
}

#[test]
fn test_reprocess() {
    let mut capabilities = support::capabilities();
    capabilities.captioner = Some(Arc::new(BrokenCaptioner));
    let (app, paths, _tmp) = create_app(capabilities);

    let report = app.upload(&[upload("a.png", png(8, 8))], &["keep".to_string()]).unwrap();
    let before = report.uploaded[0].clone();
    assert!(before.caption_embedding.is_none());

    // rebuild the app over the same directory with a working captioner
    let config = Arc::new(crate::config::Config::load_with(paths.base_path.to_str().unwrap()).unwrap());
    let mut capabilities = support::capabilities();
    capabilities.captioner = Some(Arc::new(FakeCaptioner {
        short: "A dog in the city".to_string(),
        detailed: String::new(),
    }));
    let app = crate::app::AppLocal::new(
        config,
        app.catalog.clone(),
        app.storage_mgr.clone(),
        capabilities,
    );

    let after = app.reprocess(before.id).unwrap();
    assert_eq!(after.short_caption, "A dog in the city");
    assert!(after.caption_embedding.is_some());
    assert_eq!(after.manual_labels, vec!["keep"]);
    assert_eq!(after.blob_id, before.blob_id);
    assert_ne!(after.thumbnail_id, before.thumbnail_id);
    assert!(!paths
        .uploads_path
        .join(before.thumbnail_id.as_ref().unwrap())
        .exists());

    assert!(matches!(app.reprocess(99), Err(AppError::NotFound(99))));
}

#[test]
fn test_stats_and_recent() {
    let (app, _paths, _tmp) = create_app(support::capabilities());
    app.upload(
        &[upload("a.png", png(8, 8)), upload("b.png", png(8, 8))],
        &["beach".to_string()],
    )
    .unwrap();

    let stats = app.stats();
    assert_eq!(stats.total_images, 2);
    assert_eq!(stats.format_distribution["PNG"], 2);
    assert_eq!(stats.images_with_embedding, 2);
    assert_eq!(stats.images_with_ocr, 2);
    assert_eq!(stats.top_labels[0].term, "beach");

    assert_eq!(app.recent(7).len(), 2);
}

fn stored_files(paths: &crate::app::AppPaths) -> usize {
    std::fs::read_dir(&paths.uploads_path).unwrap().count()
}

#[test]
fn test_unsaved_uploads_are_cleaned_up() {
    // batch size 1, so the second file hits the failing write
    let (app, paths, _tmp) = create_flaky_app(1);

    let report = app
        .upload(&[upload("a.png", png(8, 8)), upload("b.png", png(8, 8))], &[])
        .unwrap();

    assert_eq!(report.uploaded.len(), 1);
    assert_eq!(report.uploaded[0].file_name, "a.png");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].file_name, "b.png");
    assert!(report.failed[0].error.contains("disk full"));

    // original and thumbnail of a.png only
    assert_eq!(stored_files(&paths), 2);
    assert_eq!(app.total(), 1);
}

#[test]
fn test_failed_reprocess_keeps_old_thumbnail() {
    let (app, paths, _tmp) = create_flaky_app(1);
    let report = app.upload(&[upload("a.png", png(8, 8))], &[]).unwrap();
    let record = &report.uploaded[0];

    assert!(matches!(app.reprocess(record.id), Err(AppError::Other(_))));

    assert_eq!(stored_files(&paths), 2);
    let thumbnail = record.thumbnail_id.as_ref().unwrap();
    assert!(paths.uploads_path.join(thumbnail).exists());
    assert_eq!(app.get(record.id).unwrap().thumbnail_id, record.thumbnail_id);
}
