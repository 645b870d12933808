//! API integration tests for conversion and health endpoints.
//!
//! Tests verify:
//! - Conversion of JPEG, PNG and (mock-decoded) HEIF uploads
//! - Query parameters: scale, quality, max_size, format
//! - Error cases and their HTTP status codes
//! - Response headers

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tower::ServiceExt;

use heif_converter::codec::{DecoderSet, ImageCrateDecoder};
use heif_converter::convert::Converter;
use heif_converter::server::{create_router, RouterConfig};

use super::test_utils::{
    body_bytes, body_json, convert_request, create_test_jpeg, create_test_png, get_request,
    heif_payload, is_valid_jpeg, jpeg_dimensions, open_admission, test_converter, test_pool,
    test_router, with_declared_dimensions, BOUNDARY,
};

fn router() -> axum::Router {
    test_router(test_pool(2, test_converter()), open_admission())
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_reports_pool() {
    let response = router().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["workers"], 2);
    assert_eq!(json["queue_depth"], 0);
    assert_eq!(json["queue_capacity"], 4);
}

// =============================================================================
// Successful Conversions
// =============================================================================

#[tokio::test]
async fn test_convert_jpeg_default_scale() {
    let upload = create_test_jpeg(800, 600);
    let response = router()
        .oneshot(convert_request("/convert", "photo.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/jpeg");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=31536000"
    );

    let body = body_bytes(response).await;
    assert!(is_valid_jpeg(&body));
    assert_eq!(jpeg_dimensions(&body), (400, 300));
}

#[tokio::test]
async fn test_convert_full_resolution() {
    let upload = create_test_jpeg(320, 240);
    let response = router()
        .oneshot(convert_request("/convert?scale=1", "photo.jpeg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (320, 240));
}

#[tokio::test]
async fn test_convert_scale_above_one_is_full_resolution() {
    let upload = create_test_jpeg(320, 240);
    let response = router()
        .oneshot(convert_request("/convert?scale=2", "photo.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (320, 240));
}

#[tokio::test]
async fn test_convert_scale_floor() {
    let upload = create_test_jpeg(400, 300);
    let response = router()
        .oneshot(convert_request("/convert?scale=0.1", "photo.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (100, 100));
}

#[tokio::test]
async fn test_convert_png() {
    let upload = create_test_png(200, 160);
    let response = router()
        .oneshot(convert_request("/convert?scale=1", "image.PNG", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (200, 160));
}

#[tokio::test]
async fn test_convert_heif_half_scale() {
    let response = router()
        .oneshot(convert_request("/convert?scale=0.5", "IMG_0001.HEIC", &heif_payload()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (960, 540));
}

#[tokio::test]
async fn test_lower_quality_gives_smaller_output() {
    let upload = create_test_jpeg(640, 480);

    let low = router()
        .oneshot(convert_request("/convert?scale=1&quality=10", "a.jpg", &upload))
        .await
        .unwrap();
    let high = router()
        .oneshot(convert_request("/convert?scale=1&quality=95", "a.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(low.status(), StatusCode::OK);
    assert_eq!(high.status(), StatusCode::OK);
    let low = body_bytes(low).await;
    let high = body_bytes(high).await;
    assert!(
        low.len() < high.len(),
        "q10 {} bytes, q95 {} bytes",
        low.len(),
        high.len()
    );
}

#[tokio::test]
async fn test_invalid_query_values_fall_back() {
    let upload = create_test_jpeg(320, 240);
    let response = router()
        .oneshot(convert_request(
            "/convert?scale=abc&quality=-5&max_size=zero",
            "a.jpg",
            &upload,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Default scale still applies.
    assert_eq!(jpeg_dimensions(&body_bytes(response).await), (160, 120));
}

#[tokio::test]
async fn test_max_size_changes_adaptive_output() {
    let upload = create_test_jpeg(1200, 900);

    let small = router()
        .oneshot(convert_request("/convert?scale=1&max_size=20", "a.jpg", &upload))
        .await
        .unwrap();
    let large = router()
        .oneshot(convert_request("/convert?scale=1&max_size=2000", "a.jpg", &upload))
        .await
        .unwrap();

    let small = body_bytes(small).await;
    let large = body_bytes(large).await;
    assert!(small.len() < large.len());
}

#[tokio::test]
async fn test_json_format() {
    let upload = create_test_jpeg(320, 240);
    let response = router()
        .oneshot(convert_request("/convert?format=json", "a.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );

    let json = body_json(response).await;
    let data_url = json["data"].as_str().unwrap();
    let encoded = data_url
        .strip_prefix("data:image/jpeg;base64,")
        .expect("data URL prefix");
    let jpeg = BASE64.decode(encoded).unwrap();
    assert_eq!(jpeg_dimensions(&jpeg), (160, 120));
}

// =============================================================================
// Error Cases
// =============================================================================

#[tokio::test]
async fn test_wrong_extension_is_415() {
    let upload = create_test_jpeg(64, 64);
    let response = router()
        .oneshot(convert_request("/convert", "picture.gif", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_extension");
    assert_eq!(json["status"], 415);
}

#[tokio::test]
async fn test_wrong_magic_is_415() {
    let response = router()
        .oneshot(convert_request(
            "/convert",
            "photo.heic",
            b"this is definitely not an image file",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body_json(response).await["error"], "unsupported_format");
}

#[tokio::test]
async fn test_heif_without_decoder_is_415() {
    let converter =
        Converter::new(500).with_decoders(DecoderSet::empty().with(ImageCrateDecoder::new()));
    let router = test_router(test_pool(1, converter), open_admission());

    let response = router
        .oneshot(convert_request("/convert", "photo.heic", &heif_payload()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_truncated_image_is_400() {
    let mut upload = create_test_jpeg(64, 64);
    upload.truncate(40);
    let response = router()
        .oneshot(convert_request("/convert", "photo.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_input");
}

#[tokio::test]
async fn test_too_small_image_is_400() {
    let upload = create_test_jpeg(8, 8);
    let response = router()
        .oneshot(convert_request("/convert", "tiny.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_dimensions");
}

#[tokio::test]
async fn test_image_over_pixel_limit_is_413() {
    // A small file whose header declares 30000x30000 (900 MP).
    let upload = with_declared_dimensions(create_test_jpeg(16, 16), 30_000, 30_000);
    let response = router()
        .oneshot(convert_request("/convert", "huge.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = body_json(response).await;
    assert_eq!(json["error"], "image_too_large");
    assert_eq!(json["status"], 413);
}

#[tokio::test]
async fn test_image_over_side_limit_is_413() {
    // 21000x100 is only 2.1 MP, but one side is over the limit.
    let upload = with_declared_dimensions(create_test_jpeg(16, 16), 21_000, 100);
    let response = router()
        .oneshot(convert_request("/convert", "wide.jpg", &upload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["error"], "image_too_large");
}

#[tokio::test]
async fn test_missing_file_field_is_400() {
    let body = super::test_utils::multipart_body("upload", "a.jpg", &create_test_jpeg(32, 32));
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/convert")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "missing_file");
}

#[tokio::test]
async fn test_not_multipart_is_400() {
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/convert")
        .header("content-type", "application/octet-stream")
        .body(axum::body::Body::from(create_test_jpeg(32, 32)))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_body_over_limit_is_413() {
    let router = create_router(
        test_pool(1, test_converter()),
        open_admission(),
        RouterConfig::new()
            .with_tracing(false)
            .with_max_upload_bytes(4 * 1024),
    );
    let upload = create_test_jpeg(256, 256);
    assert!(upload.len() > 4 * 1024);

    let response = router
        .oneshot(convert_request("/convert", "big.jpg", &upload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_get_convert_is_405() {
    let response = router().oneshot(get_request("/convert")).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = router().oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
