//! End-to-end tests for the DICOM-pyramid-backed tile and IIIF surface
//! (`wsi_pyramid::server::iiif`), exercised against a tiny real DICOM
//! series written to a temp directory by `DicomPyramidWriter`, the same
//! fixture pattern `writer::dicom::tests` uses.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use wsi_pyramid::pixel::{Compression, Image, PhotometricInterpretation, PixelFormat};
use wsi_pyramid::pyramid::ImagedVolumeParameters;
use wsi_pyramid::server::routes::build_iiif_router;
use wsi_pyramid::server::{IiifState, PyramidRegistry};
use wsi_pyramid::writer::{
    generate_uid, DicomPyramidWriter, DicomWriterConfig, FolderSink, OpticalPathTemplate,
};

/// Writes a 2-level, tile-size-4 DICOM series (8x8 then 4x4 pixels) into a
/// fresh subdirectory of `root` named `series_id`, mirroring
/// `writer::dicom::tests::test_add_level_then_complete_flush`.
async fn write_test_series(root: &std::path::Path, series_id: &str) {
    let series_dir = root.join(series_id);
    std::fs::create_dir_all(&series_dir).unwrap();
    let sink = FolderSink::new(series_dir, "instance-%04d.dcm".to_string());

    let mut writer = DicomPyramidWriter::new(
        4,
        4,
        PixelFormat::Rgb24,
        PhotometricInterpretation::Rgb,
        Compression::Jpeg,
        90,
        DicomWriterConfig {
            study_instance_uid: generate_uid(),
            series_instance_uid: generate_uid(),
            max_size: 0,
            optical_path: OpticalPathTemplate::None,
            icc_profile: None,
            imaged_volume: ImagedVolumeParameters::default(),
            background_color: None,
        },
        Box::new(sink),
    );

    writer.add_level(8, 8).await.unwrap();
    let tile = Image::allocate(PixelFormat::Rgb24, 4, 4);
    for ty in 0..2 {
        for tx in 0..2 {
            writer.encode_tile(&tile, 0, tx, ty).await.unwrap();
        }
    }
    writer.flush().await.unwrap();
}

fn test_router(root: std::path::PathBuf) -> axum::Router {
    let registry = PyramidRegistry::new(root);
    build_iiif_router(IiifState::new(registry))
}

#[tokio::test]
async fn test_pyramid_metadata_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-a").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/pyramids/series-a")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["level_count"], 1);
    assert_eq!(json["levels"][0]["width"], 8);
    assert_eq!(json["levels"][0]["height"], 8);
}

#[tokio::test]
async fn test_pyramid_metadata_unknown_series_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/pyramids/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_native_tile_defaults_to_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-b").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/pyramids/series-b/tiles/0/0/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
}

#[tokio::test]
async fn test_native_tile_honors_png_accept_header() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-c").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/pyramids/series-c/tiles/0/0/0")
                .header("accept", "image/png")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
}

#[tokio::test]
async fn test_native_tile_rejects_unsupported_accept_header() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-d").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/pyramids/series-d/tiles/0/0/0")
                .header("accept", "image/jp2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_iiif_info_json_describes_full_image() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-e").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/iiif/tiles/series-e/info.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["width"], 8);
    assert_eq!(json["height"], 8);
    assert_eq!(json["profile"], "level0");
}

#[tokio::test]
async fn test_iiif_full_region_full_size_roundtrips_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-f").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/iiif/tiles/series-f/full/full/0/default.jpg")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = wsi_pyramid::pixel::decode_tile(&body, Compression::Jpeg, 8, 8).unwrap();
    assert_eq!(decoded.width(), 8);
    assert_eq!(decoded.height(), 8);
}

#[tokio::test]
async fn test_iiif_partial_region_spans_multiple_tiles() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-g").await;
    let router = test_router(dir.path().to_path_buf());

    // Tiles are 4x4; this region straddles all four.
    let response = router
        .oneshot(
            Request::builder()
                .uri("/iiif/tiles/series-g/2,2,4,4/full/0/default.jpg")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let decoded = wsi_pyramid::pixel::decode_tile(&body, Compression::Jpeg, 4, 4).unwrap();
    assert_eq!(decoded.width(), 4);
    assert_eq!(decoded.height(), 4);
}

#[tokio::test]
async fn test_iiif_rejects_unsupported_rotation() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-h").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/iiif/tiles/series-h/full/full/90/default.jpg")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_iiif_manifest_references_image_service() {
    let dir = tempfile::tempdir().unwrap();
    write_test_series(dir.path(), "series-i").await;
    let router = test_router(dir.path().to_path_buf());

    let response = router
        .oneshot(
            Request::builder()
                .uri("/iiif/series/series-i/manifest.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["type"], "Manifest");
    let canvas = &json["items"][0];
    assert_eq!(canvas["width"], 8);
    assert_eq!(canvas["height"], 8);
}
