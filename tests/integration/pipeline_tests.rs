//! End-to-end pipeline tests against a mock job board

use crate::common::{card, harness, listing_page, listing_site, serve};
use job_harvester::site::TargetRole;
use job_harvester::storage::RunStatus;
use job_harvester::url::canonical_url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_listing_site_persists_each_valid_card_once() {
    let server = MockServer::start().await;
    let cards = vec![
        card("Backend Engineer", "/jobs/1", "Remote"),
        // Falls back to the second title selector
        r#"<li class="job-card"><h3>Data Analyst</h3><a class="view" href="/jobs/2">View</a><span class="location">Berlin</span></li>"#.to_string(),
        // No title under either selector
        r#"<li class="job-card"><a class="view" href="/jobs/3">View</a></li>"#.to_string(),
    ];
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&cards, None)))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    let acme = outcome.site("acme").unwrap();
    assert_eq!(acme.pages_visited, 1);
    assert_eq!(acme.records_extracted, 2);
    assert_eq!(acme.accepted, 2);
    assert_eq!(acme.dropped, 1);
    assert!(acme.error.is_none());

    assert_eq!(
        h.storage.record_counts_by_site().unwrap(),
        vec![("acme".to_string(), 2)]
    );
    let record = h
        .storage
        .get_record("job:acme:data analyst|berlin")
        .unwrap()
        .unwrap();
    assert_eq!(record.fields.title, "Data Analyst");
    assert_eq!(record.fields.link, format!("{}/jobs/2", server.uri()));
    assert_eq!(record.role, TargetRole::Listing);
    assert!(record.delisted_at.is_none());
}

#[tokio::test]
async fn test_next_link_pagination_visits_every_page() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/jobs",
        listing_page(&[card("A", "/jobs/a", "Remote")], Some("/jobs/page/2")),
    )
    .await;
    serve(
        &server,
        "/jobs/page/2",
        listing_page(&[card("B", "/jobs/b", "Remote")], Some("/jobs/page/3")),
    )
    .await;
    serve(
        &server,
        "/jobs/page/3",
        listing_page(&[card("C", "/jobs/c", "Remote")], None),
    )
    .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let outcome = h.run().await;

    let acme = outcome.site("acme").unwrap();
    assert_eq!(acme.pages_visited, 3);
    assert_eq!(acme.accepted, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_url_template_pagination_stops_on_empty_page() {
    let server = MockServer::start().await;
    for (page, body) in [
        ("1", listing_page(&[card("A", "/jobs/a", "Oslo")], None)),
        ("2", listing_page(&[card("B", "/jobs/b", "Oslo")], None)),
        ("3", listing_page(&[], None)),
    ] {
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("pg", page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let site = format!(
        r#"
[[site]]
name = "globex"
base-url = "{uri}/search"
max-pages = 10

[site.selectors]
job-list = ".job-card"
title = "h2.title"
link = "a.view"
location = ".location"

[site.pagination]
url-template = "{uri}/search?pg={{page}}"
start = 1
"#,
        uri = server.uri()
    );
    let h = harness(&site);
    let outcome = h.run().await;

    let globex = outcome.site("globex").unwrap();
    assert_eq!(globex.pages_visited, 3);
    assert_eq!(globex.accepted, 2);
}

#[tokio::test]
async fn test_detail_following_site_fetches_each_link_once() {
    let server = MockServer::start().await;
    let cards = vec![
        card("Platform Engineer", "/jobs/101", "Remote"),
        card("SRE", "/jobs/102", "Remote"),
        card("Platform Engineer", "/jobs/101?utm_source=newsletter", "Remote"),
    ];
    serve(&server, "/careers", listing_page(&cards, None)).await;
    for (id, title) in [("101", "Platform Engineer"), ("102", "Site Reliability Engineer")] {
        Mock::given(method("GET"))
            .and(path(format!("/jobs/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><body><h1 class="job-title">{}</h1><div class="description">  Keep   things running. </div></body></html>"#,
                title
            )))
            .expect(1)
            .mount(&server)
            .await;
    }

    let site = format!(
        r#"
[[site]]
name = "initech"
base-url = "{}/careers"
follow-details = true
identity = "url"

[site.selectors]
job-list = ".job-card"
title = "h2.title"
link = "a.view"

[site.detail-selectors]
title = "h1.job-title"
description = ".description"
"#,
        server.uri()
    );
    let h = harness(&site);
    let outcome = h.run().await;

    let initech = outcome.site("initech").unwrap();
    assert_eq!(initech.detail_targets, 2);
    assert_eq!(initech.skipped, 1);
    assert_eq!(initech.accepted, 2);
    assert_eq!(initech.failed, 0);

    let url = canonical_url(&format!("{}/jobs/102", server.uri())).unwrap();
    let record = h
        .storage
        .get_record(&format!("job:initech:{}", url))
        .unwrap()
        .unwrap();
    assert_eq!(record.role, TargetRole::Detail);
    assert_eq!(record.fields.title, "Site Reliability Engineer");
    assert_eq!(record.fields.description, "Keep things running.");
    assert_eq!(h.storage.count_pending().unwrap(), 0);
}

#[tokio::test]
async fn test_repeat_run_skips_seen_records() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/jobs",
        listing_page(
            &[
                card("Backend Engineer", "/jobs/1", "Remote"),
                card("Frontend Engineer", "/jobs/2", "Remote"),
            ],
            None,
        ),
    )
    .await;

    let h = harness(&listing_site("acme", &format!("{}/jobs", server.uri())));
    let first = h.run().await;
    let second = h.run().await;

    assert_eq!(first.site("acme").unwrap().accepted, 2);
    let acme = second.site("acme").unwrap();
    assert_eq!(acme.accepted, 0);
    assert_eq!(acme.skipped, 2);

    assert_eq!(h.storage.count_runs().unwrap(), 2);
    assert_eq!(h.storage.count_live_seen_keys().unwrap(), 2);
    let latest = h.storage.get_latest_run().unwrap().unwrap();
    assert_eq!(latest.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_failing_site_does_not_stop_healthy_site() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/closed"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    serve(
        &server,
        "/jobs",
        listing_page(&[card("Backend Engineer", "/jobs/1", "Remote")], None),
    )
    .await;

    let sites = format!(
        "{}{}",
        listing_site("closed", &format!("{}/closed", server.uri())),
        listing_site("acme", &format!("{}/jobs", server.uri()))
    );
    let h = harness(&sites);
    let outcome = h.run().await;

    assert!(outcome.site("closed").unwrap().failed_site());
    assert_eq!(outcome.site("acme").unwrap().accepted, 1);
    assert!(!outcome.all_sites_failed());
}
