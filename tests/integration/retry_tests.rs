//! Retry classification against real HTTP responses

use crate::common::{card, harness, listing_page, listing_site};
use job_harvester::storage::RunStatus;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_server_error_is_retried_up_to_attempt_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    let acme = outcome.site("acme").unwrap();
    assert!(acme.failed_site());
    assert!(acme.error.as_deref().unwrap().contains("500"));
    assert!(outcome.all_sites_failed());

    let latest = h.storage.get_latest_run().unwrap().unwrap();
    assert_eq!(latest.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    assert!(outcome.site("acme").unwrap().failed_site());
}

#[tokio::test]
async fn test_transient_failures_recover_within_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_page(&[card("Backend Engineer", "/jobs/1", "Remote")], None)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    let acme = outcome.site("acme").unwrap();
    assert!(acme.error.is_none());
    assert_eq!(acme.accepted, 1);
}

#[tokio::test]
async fn test_rate_limited_response_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[], None)))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    let acme = outcome.site("acme").unwrap();
    assert_eq!(acme.pages_visited, 1);
    assert!(!acme.failed_site());
}
