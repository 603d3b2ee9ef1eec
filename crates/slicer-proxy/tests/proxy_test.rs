//! End-to-end pipeline tests over in-memory collaborators.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;

use helpers::{ingest_png, serve_to_vec, wait_until, Fixture};
use slicer_core::models::{compute_slice_filename, Extension, Slice, SliceStatus};
use slicer_core::AppError;
use slicer_registry::Registry;
use slicer_storage::Storage;

#[tokio::test]
async fn test_transform_path_serves_and_persists() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200", "jpg")
        .await
        .unwrap();
    assert_eq!(transformation.filename(), "h200.jpg");

    let (served, body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();

    let expected_filename = compute_slice_filename(image.id, "h200.jpg");
    assert_eq!(served.filename, expected_filename);
    assert_eq!(served.mime, "image/jpeg");
    assert_eq!((served.width, served.height), (250, 200));
    assert_eq!(served.size, body.len() as i64);

    let produced = image::load_from_memory(&body).unwrap();
    assert_eq!(image::guess_format(&body).unwrap(), image::ImageFormat::Jpeg);
    assert_eq!(
        image::GenericImageView::dimensions(&produced),
        (250, 200)
    );

    // the persister registers the new slice asynchronously
    let registry = Arc::clone(&fixture.registry);
    let image_id = image.id;
    assert!(
        wait_until(move || registry.slice(image_id, &expected_filename).is_some()).await,
        "slice was never persisted"
    );

    let slice = fixture
        .registry
        .slice(image.id, &compute_slice_filename(image.id, "h200.jpg"))
        .unwrap();
    assert_eq!(slice.status, SliceStatus::Active);
    assert!(slice.is_valid);
    assert!(!slice.is_original);
    assert!(!slice.cropped);
    assert_eq!(slice.extension, Extension::Jpg);
    assert_eq!(slice.size, body.len() as i64);

    // tee faithfulness: the client saw exactly the bytes that were persisted
    let stored = fixture
        .storage
        .object(&image.namespace, &slice.filename)
        .unwrap();
    assert_eq!(stored.to_vec(), body);
    assert_eq!(slice.path, format!("{}/{}", image.namespace, slice.filename));
}

#[tokio::test]
async fn test_canonical_filename_is_sorted() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 900).await;

    let (transformation, _) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200_w400_q80_s50", "png")
        .await
        .unwrap();

    assert_eq!(transformation.resize.height, 200);
    assert_eq!(transformation.resize.width, 400);
    assert_eq!(transformation.resize.scale, 50);
    assert_eq!(transformation.quality, 80);
    assert_eq!(transformation.filename(), "h200_q80_s50_w400.png");
}

#[tokio::test]
async fn test_fit_is_inert_without_dimensions() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let (transformation, _) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "r90_fit", "jpg")
        .await
        .unwrap();

    assert_eq!(transformation.filename(), "r90.jpg");
}

#[tokio::test]
async fn test_upscale_is_refused_before_streaming() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let err = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h3000", "png")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TransformationRefused(_)));

    // nothing was transformed or persisted for the refused request
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(fixture.registry.create_slice_calls.load(Ordering::SeqCst), 0);

    // with upscaling enabled the same spec is accepted
    let allowing = Fixture::new(true);
    let image = ingest_png(&allowing, 500, 400).await;
    let (transformation, _) = allowing
        .state
        .proxy
        .prepare(&image.id.to_string(), "h3000", "png")
        .await
        .unwrap();
    assert_eq!(transformation.resize.height, 3000);
}

#[tokio::test]
async fn test_invalid_spec_reports_field_details() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let err = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "wxpo", "png")
        .await
        .unwrap_err();

    let details = err.details().expect("validation details");
    assert_eq!(
        details.get("segments").map(String::as_str),
        Some("no valid segments provided")
    );
}

#[tokio::test]
async fn test_bad_image_id_is_bad_input() {
    let fixture = Fixture::new(false);

    let err = fixture
        .state
        .proxy
        .prepare("definitely-not-a-uuid", "h200", "png")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadInput(_)));
}

#[tokio::test]
async fn test_unknown_and_unpublished_images_are_not_found() {
    let fixture = Fixture::new(false);

    let err = fixture
        .state
        .proxy
        .prepare(&Uuid::new_v4().to_string(), "h200", "png")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let image = ingest_png(&fixture, 500, 400).await;
    fixture.registry.depublish_image(image.id).await.unwrap();

    let err = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200", "png")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_passthrough_serves_stored_bytes_verbatim() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    // pre-materialize the derivative with recognizable bytes
    let cached = Bytes::from_static(b"pretend this is a cached png body");
    let filename = compute_slice_filename(image.id, "h200.png");
    let item = fixture
        .storage
        .put(&image.namespace, &filename, cached.clone())
        .await
        .unwrap();

    let slice = Slice {
        id: Uuid::new_v4(),
        image_id: image.id,
        width: 250,
        height: 200,
        size: cached.len() as i64,
        quality: 0,
        filename: filename.clone(),
        namespace: image.namespace.clone(),
        path: item.path,
        cropped: false,
        extension: Extension::Png,
        mime: "image/png".into(),
        created_at: Utc::now(),
        is_valid: true,
        status: SliceStatus::Active,
        is_original: false,
    };
    fixture.registry.create_slice(&slice).await.unwrap();
    let seeded_calls = fixture.registry.create_slice_calls.load(Ordering::SeqCst);

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200", "png")
        .await
        .unwrap();

    let (served, body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();

    // pass-through purity: exact bytes, no re-transformation, no new insert
    assert_eq!(body, cached.to_vec());
    assert_eq!(served.filename, filename);
    assert_eq!((served.width, served.height), (250, 200));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        fixture.registry.create_slice_calls.load(Ordering::SeqCst),
        seeded_calls
    );
}

#[tokio::test]
async fn test_replay_takes_the_passthrough_path() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200", "png")
        .await
        .unwrap();

    let (_, first_body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();

    let registry = Arc::clone(&fixture.registry);
    let image_id = image.id;
    let filename = compute_slice_filename(image.id, "h200.png");
    let lookup = filename.clone();
    assert!(wait_until(move || registry.slice(image_id, &lookup).is_some()).await);

    let (served, second_body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();

    // the second request streams the persisted object untouched
    assert_eq!(second_body, first_body);
    assert_eq!(served.filename, filename);
    assert_eq!(fixture.registry.create_slice_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_first_requests_race_cleanly() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200_w400", "png")
        .await
        .unwrap();

    // both requests must pass cache resolution before either transform
    // starts, so they genuinely race on the same missing derivative
    fixture
        .storage
        .set_download_barrier(Arc::new(tokio::sync::Barrier::new(2)));

    let state_a = Arc::clone(&fixture.state);
    let state_b = Arc::clone(&fixture.state);
    let (t_a, i_a) = (transformation.clone(), image.clone());
    let (t_b, i_b) = (transformation.clone(), image.clone());

    let (a, b) = tokio::join!(
        tokio::spawn(async move { serve_to_vec(&state_a, &t_a, &i_a).await }),
        tokio::spawn(async move { serve_to_vec(&state_b, &t_b, &i_b).await }),
    );

    let (_, body_a) = a.unwrap().unwrap();
    let (_, body_b) = b.unwrap().unwrap();

    // both clients get identical bytes
    assert_eq!(body_a, body_b);

    // both persisters run; the unique index lets exactly one insert win
    let registry = Arc::clone(&fixture.registry);
    assert!(
        wait_until(move || registry.create_slice_calls.load(Ordering::SeqCst) == 2).await,
        "both persisters should have attempted the insert"
    );
    assert_eq!(
        fixture
            .registry
            .create_slice_conflicts
            .load(Ordering::SeqCst),
        1
    );
    // one original + one derivative
    assert_eq!(fixture.registry.slice_count(image.id), 2);
}

#[tokio::test]
async fn test_degraded_registry_still_serves() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 500, 400).await;

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "h200", "png")
        .await
        .unwrap();

    fixture
        .registry
        .fail_slice_lookups
        .store(true, Ordering::SeqCst);

    let (served, body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();

    // lookup errors degrade to transforming from the original
    assert_eq!((served.width, served.height), (250, 200));
    let produced = image::load_from_memory(&body).unwrap();
    assert_eq!(image::GenericImageView::dimensions(&produced), (250, 200));
}

#[tokio::test]
async fn test_crop_spec_end_to_end() {
    let fixture = Fixture::new(false);
    let image = ingest_png(&fixture, 100, 100).await;

    let (transformation, image) = fixture
        .state
        .proxy
        .prepare(&image.id.to_string(), "cl50", "png")
        .await
        .unwrap();
    assert_eq!(transformation.filename(), "cl50.png");

    let (served, body) = serve_to_vec(&fixture.state, &transformation, &image)
        .await
        .unwrap();
    assert_eq!((served.width, served.height), (50, 100));

    // the fixture is red on the left, blue on the right; cropping the left
    // half leaves only blue pixels
    let produced = image::load_from_memory(&body).unwrap().to_rgba8();
    assert_eq!(produced.get_pixel(0, 0), &image::Rgba([0, 0, 255, 255]));

    let registry = Arc::clone(&fixture.registry);
    let image_id = image.id;
    let filename = compute_slice_filename(image.id, "cl50.png");
    let lookup = filename.clone();
    assert!(wait_until(move || registry.slice(image_id, &lookup).is_some()).await);
    assert!(fixture.registry.slice(image.id, &filename).unwrap().cropped);
}
