//! Admission control integration tests.
//!
//! Tests verify:
//! - Per-client rate limiting with 429 and `Retry-After`
//! - Client keys taken from forwarding headers
//! - Global concurrency limiting with 503
//! - Slots released after every outcome
//! - The health endpoint bypasses admission

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tower::ServiceExt;

use heif_converter::admission::{Admission, ConcurrencyLimiter, RateLimiter};

use super::test_utils::{
    body_json, convert_request, convert_request_from, create_test_jpeg, gated_converter,
    get_request, heif_payload, test_converter, test_pool, test_router, Gate, ManualClock,
};

fn limited_admission(rate: f64, burst: u32, max_concurrent: usize) -> (Admission, ManualClock) {
    let clock = ManualClock::new();
    let limiter = RateLimiter::new(rate, burst).with_clock(clock.clone());
    (
        Admission::new(Arc::new(limiter), ConcurrencyLimiter::new(max_concurrent)),
        clock,
    )
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let (admission, clock) = limited_admission(1.0, 1, 10);
    let router = test_router(test_pool(1, test_converter()), admission);
    let upload = create_test_jpeg(64, 64);

    let first = router
        .clone()
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("203.0.113.7")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("203.0.113.7")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers().get("retry-after").unwrap(), "1");
    let json = body_json(second).await;
    assert_eq!(json["error"], "rate_limit_exceeded");
    assert_eq!(json["status"], 429);

    // Another client has its own bucket.
    let other = router
        .clone()
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("198.51.100.2")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    // The first client refills after a second.
    clock.advance(Duration::from_secs(1));
    let refilled = router
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("203.0.113.7")))
        .await
        .unwrap();
    assert_eq!(refilled.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_forwarded_for_uses_first_hop() {
    let (admission, _clock) = limited_admission(1.0, 1, 10);
    let router = test_router(test_pool(1, test_converter()), admission);
    let upload = create_test_jpeg(64, 64);

    let first = router
        .clone()
        .oneshot(convert_request_from(
            "/convert",
            "a.jpg",
            &upload,
            Some("203.0.113.7, 10.0.0.1"),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Same client behind a different proxy chain.
    let second = router
        .oneshot(convert_request_from(
            "/convert",
            "a.jpg",
            &upload,
            Some("203.0.113.7, 10.9.9.9"),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_requests_without_address_share_unknown_bucket() {
    let (admission, _clock) = limited_admission(1.0, 1, 10);
    let rate_limiter = admission.rate_limiter().clone();
    let router = test_router(test_pool(1, test_converter()), admission);
    let upload = create_test_jpeg(64, 64);

    let first = router
        .clone()
        .oneshot(convert_request("/convert", "a.jpg", &upload))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let second = router
        .oneshot(convert_request("/convert", "a.jpg", &upload))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(rate_limiter.len(), 1);
}

#[tokio::test]
async fn test_health_bypasses_admission() {
    let (admission, _clock) = limited_admission(1.0, 1, 1);
    let router = test_router(test_pool(1, test_converter()), admission);

    for _ in 0..5 {
        let response = router.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_concurrency_limit_returns_503() {
    let gate = Gate::new();
    let (admission, _clock) = limited_admission(100.0, 100, 1);
    let concurrency = admission.concurrency().clone();
    let router = test_router(test_pool(2, gated_converter(&gate)), admission);

    let held = {
        let router = router.clone();
        tokio::spawn(async move {
            router
                .oneshot(convert_request_from(
                    "/convert",
                    "a.heic",
                    &heif_payload(),
                    Some("10.0.0.1"),
                ))
                .await
                .unwrap()
        })
    };
    gate.wait_started(1).await;
    assert_eq!(concurrency.active(), 1);

    let rejected = router
        .clone()
        .oneshot(convert_request_from(
            "/convert",
            "a.heic",
            &heif_payload(),
            Some("10.0.0.2"),
        ))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rejected.headers().get("retry-after").unwrap(), "1");
    assert_eq!(body_json(rejected).await["error"], "at_capacity");

    gate.open();
    assert_eq!(held.await.unwrap().status(), StatusCode::OK);
    assert_eq!(concurrency.active(), 0);

    let next = router
        .oneshot(convert_request_from(
            "/convert",
            "a.heic",
            &heif_payload(),
            Some("10.0.0.2"),
        ))
        .await
        .unwrap();
    assert_eq!(next.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_slot_released_after_error_response() {
    let (admission, _clock) = limited_admission(100.0, 100, 1);
    let concurrency = admission.concurrency().clone();
    let router = test_router(test_pool(1, test_converter()), admission);

    let response = router
        .clone()
        .oneshot(convert_request("/convert", "a.gif", b"GIF89a not supported"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(concurrency.active(), 0);

    let response = router
        .oneshot(convert_request("/convert", "a.jpg", &create_test_jpeg(64, 64)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(concurrency.active(), 0);
}

#[tokio::test]
async fn test_rate_limited_request_takes_no_slot() {
    let (admission, _clock) = limited_admission(1.0, 1, 1);
    let concurrency = admission.concurrency().clone();
    let router = test_router(test_pool(1, test_converter()), admission);
    let upload = create_test_jpeg(64, 64);

    router
        .clone()
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("192.0.2.1")))
        .await
        .unwrap();
    let limited = router
        .oneshot(convert_request_from("/convert", "a.jpg", &upload, Some("192.0.2.1")))
        .await
        .unwrap();

    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(concurrency.active(), 0);
    assert_eq!(concurrency.available(), 1);
}
