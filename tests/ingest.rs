mod common;

use std::sync::{Arc, Mutex};

use ci_ingest::catalog::{CatalogItem, Provider, RunEvent, RunHints, RunMeta, RunNotification};
use ci_ingest::contract::{
    CatalogPage, MockCatalogSource, MockCredentialStore, MockReceiverClient, RunSubmission,
    UploaderCredentials,
};
use ci_ingest::receiver::HttpReceiverClient;
use ci_ingest::{Disposition, IngestConfig, IngestError, Ingestor};
use common::{archive, item, meta, spawn_receiver, unfinished};

fn credential_store(expected: &'static str) -> MockCredentialStore {
    let mut store = MockCredentialStore::new();
    store
        .expect_get_uploader()
        .withf(move |name| name == expected)
        .returning(|name| {
            Ok(UploaderCredentials {
                username: name.to_string(),
                password: "123".to_string(),
            })
        });
    store
}

fn source(meta: RunMeta, items: Vec<CatalogItem>) -> MockCatalogSource {
    let mut source = MockCatalogSource::new();
    source.expect_run_meta().returning(move |_| Ok(meta.clone()));
    source.expect_list_page().returning(move |_, _| {
        Ok(CatalogPage {
            items: items.clone(),
            continuation: None,
        })
    });
    source
}

fn recording_receiver() -> (MockReceiverClient, Arc<Mutex<Vec<RunSubmission>>>) {
    let submissions = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&submissions);
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().returning(move |submission| {
        record.lock().unwrap().push(submission);
        Ok(())
    });
    (receiver, submissions)
}

fn taskcluster_notification() -> RunNotification {
    RunNotification::new(Provider::Taskcluster, "G1", "web-platform-tests", "wpt")
}

#[tokio::test]
async fn uploads_one_run_per_valid_product() {
    let (receiver, submissions) = recording_receiver();
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credential_store("taskcluster")),
    )
    .unwrap();
    let source = source(
        meta(RunEvent::Unknown, "master"),
        vec![
            item("wpt-firefox-nightly-testharness-1", "0"),
            item("wpt-firefox-nightly-testharness-2", "1"),
            unfinished("wpt-chrome-dev-testharness-1", "2"),
            item("wpt-chrome-dev-reftest-1", "3"),
        ],
    );

    let report = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .expect("run is processed");
    assert_eq!(report.uploaded, vec!["firefox-nightly"]);
    assert_eq!(report.disposition(), Disposition::Processed);
    assert_eq!(report.disposition().http_status(), 200);

    let submissions = submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].sha, "abcdef0123456789");
    assert_eq!(submissions[0].username, "taskcluster");
    assert_eq!(submissions[0].result_urls.len(), 2);
    assert!(submissions[0].labels.contains("master"));
}

#[tokio::test]
async fn nothing_matching_is_no_results() {
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().times(0);
    let mut credentials = MockCredentialStore::new();
    credentials.expect_get_uploader().times(0);
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credentials),
    )
    .unwrap();
    let source = source(
        meta(RunEvent::Unknown, "master"),
        vec![item("wpt-decision-task", "0"), item("wpt-chrome-dev-stability", "1")],
    );

    let err = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap_err();
    assert!(err.is_no_results());
    assert_eq!(err.disposition(), Disposition::NoResults);
}

#[tokio::test]
async fn credentials_failure_is_fatal_before_any_upload() {
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().times(0);
    let mut credentials = MockCredentialStore::new();
    credentials
        .expect_get_uploader()
        .returning(|_| Err("TASKCLUSTER_UPLOADER_USERNAME is not set".into()));
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credentials),
    )
    .unwrap();
    let source = source(
        meta(RunEvent::Unknown, "master"),
        vec![item("wpt-chrome-dev-testharness-1", "0")],
    );

    let err = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::Credentials { ref uploader, .. } if uploader == "taskcluster"
    ));
    assert_eq!(err.disposition(), Disposition::Failed);
}

#[tokio::test]
async fn missing_sha_is_fatal_for_providers_that_need_one() {
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().times(0);
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(MockCredentialStore::new()),
    )
    .unwrap();
    let mut no_sha = meta(RunEvent::Unknown, "master");
    no_sha.head_sha = None;
    let mut source = MockCatalogSource::new();
    source.expect_run_meta().returning(move |_| Ok(no_sha.clone()));
    source.expect_list_page().times(0);

    let err = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::MissingSha { .. }));
}

#[tokio::test]
async fn catalog_failure_aborts_the_run() {
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().times(0);
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(MockCredentialStore::new()),
    )
    .unwrap();
    let mut source = MockCatalogSource::new();
    let run_meta = meta(RunEvent::Unknown, "master");
    source.expect_run_meta().returning(move |_| Ok(run_meta.clone()));
    source
        .expect_list_page()
        .returning(|_, _| Err("connection reset".into()));

    let err = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Catalog { .. }));
}

#[tokio::test]
async fn branch_policy_can_ignore_a_run() {
    let mut receiver = MockReceiverClient::new();
    receiver.expect_create_run().times(0);
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(MockCredentialStore::new()),
    )
    .unwrap();
    let mut source = MockCatalogSource::new();
    let feature_push = meta(RunEvent::Push, "my-feature");
    source.expect_run_meta().returning(move |_| Ok(feature_push.clone()));
    source.expect_list_page().times(0);

    let report = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap();
    assert!(!report.processed());
    assert_eq!(report.disposition(), Disposition::Ignored);
    assert_eq!(report.disposition().http_status(), 204);
}

#[tokio::test]
async fn an_injected_policy_replaces_the_configured_one() {
    let (receiver, submissions) = recording_receiver();
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credential_store("taskcluster")),
    )
    .unwrap()
    .with_branch_policy(Arc::new(|_: &RunMeta| true));
    let source = source(
        meta(RunEvent::Push, "my-feature"),
        vec![item("wpt-chrome-dev-testharness-1", "0")],
    );

    let report = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap();
    assert_eq!(report.uploaded, vec!["chrome-dev"]);
    assert!(submissions.lock().unwrap()[0].labels.is_empty());
}

#[tokio::test]
async fn partial_upload_failure_reports_both_sides() {
    let (upload_url, runs) = spawn_receiver(Some("/1/")).await;
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(HttpReceiverClient::new(upload_url)),
        Arc::new(credential_store("taskcluster")),
    )
    .unwrap();
    let source = source(
        meta(RunEvent::Unknown, "master"),
        vec![
            item("wpt-chrome-dev-testharness-1", "0"),
            item("wpt-firefox-nightly-testharness-1", "1"),
        ],
    );

    let report = ingestor
        .process(&taskcluster_notification(), &source)
        .await
        .unwrap();
    assert_eq!(report.uploaded, vec!["chrome-dev"]);
    assert_eq!(report.disposition(), Disposition::Failed);

    let (processed, err) = report.into_parts();
    assert!(processed);
    let err = err.expect("firefox upload failed");
    assert_eq!(err.count(), 1);
    let message = err.to_string();
    assert!(message.contains("sending 2 runs to results receiver"));
    assert!(message.contains("404"));
    assert_eq!(runs.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn pr_run_on_trunk_named_branch_then_push_run() {
    let (receiver, submissions) = recording_receiver();
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credential_store("github-actions")),
    )
    .unwrap();
    let notification =
        RunNotification::new(Provider::GithubActions, "42", "web-platform-tests", "wpt");

    let pr_source = source(
        meta(RunEvent::PullRequest, "master"),
        vec![
            archive("chrome-affected-tests", "1"),
            archive("chrome-affected-tests-without-changes", "2"),
        ],
    );
    let report = ingestor.process(&notification, &pr_source).await.unwrap();
    assert_eq!(report.uploaded, vec!["chrome-pr_base", "chrome-pr_head"]);

    let push_source = source(
        meta(RunEvent::Push, "master"),
        vec![archive("chrome-results", "3")],
    );
    let report = ingestor.process(&notification, &push_source).await.unwrap();
    assert_eq!(report.uploaded, vec!["chrome"]);

    let submissions = submissions.lock().unwrap();
    assert_eq!(submissions.len(), 3);
    for submission in submissions.iter() {
        let url = &submission.archive_urls[0];
        let is_pr = url.contains("/1/") || url.contains("/2/");
        assert_eq!(submission.labels.contains("master"), !is_pr, "{submission:?}");
        assert_eq!(
            submission.labels.contains("pr_head") || submission.labels.contains("pr_base"),
            is_pr
        );
    }
}

#[tokio::test]
async fn notification_sender_becomes_a_user_label() {
    let (receiver, submissions) = recording_receiver();
    let ingestor = Ingestor::new(
        &IngestConfig::default(),
        Arc::new(receiver),
        Arc::new(credential_store("azure")),
    )
    .unwrap();
    let notification = RunNotification::new(Provider::Azure, "123", "web-platform-tests", "wpt")
        .with_sender("octocat")
        .with_hints(RunHints {
            head_sha: Some("abcdef0123456789".to_string()),
            ..RunHints::default()
        });
    let source = source(
        meta(RunEvent::PullRequest, "refs/pull/1/merge"),
        vec![item("results", "1")],
    );

    let report = ingestor.process(&notification, &source).await.unwrap();
    assert_eq!(report.uploaded, vec!["azure-pr_head"]);
    let labels: Vec<_> = submissions.lock().unwrap()[0].labels.iter().cloned().collect();
    assert_eq!(labels, vec!["pr_head", "user:octocat"]);
}

#[tokio::test]
async fn status_runs_off_the_trunk_produce_pr_products() {
    for head_branch in [Some("my-pr-branch"), None] {
        let (receiver, submissions) = recording_receiver();
        let ingestor = Ingestor::new(
            &IngestConfig::default(),
            Arc::new(receiver),
            Arc::new(credential_store("taskcluster")),
        )
        .unwrap();
        let mut run_meta = meta(RunEvent::Unknown, "unused");
        run_meta.head_branch = head_branch.map(str::to_string);
        let source = source(
            run_meta,
            vec![
                item("wpt-chrome-dev-results", "0"),
                item("wpt-chrome-dev-results-without-changes", "1"),
            ],
        );

        let report = ingestor
            .process(&taskcluster_notification(), &source)
            .await
            .expect("status run is processed");
        assert_eq!(
            report.uploaded,
            vec!["chrome-dev-pr_base", "chrome-dev-pr_head"],
            "branch {head_branch:?}"
        );
        assert_eq!(report.disposition(), Disposition::Processed);

        let submissions = submissions.lock().unwrap();
        assert_eq!(submissions.len(), 2);
        assert!(submissions
            .iter()
            .all(|run| !run.labels.contains("master")));
    }
}
