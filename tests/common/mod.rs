#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Router};
use ci_ingest::catalog::{CatalogItem, ItemState, Locator, RepoRef, RunEvent, RunMeta};

/// A completed item whose report lives under `https://results.example.com/<id>/`.
pub fn item(name: &str, id: &str) -> CatalogItem {
    CatalogItem {
        name: name.to_string(),
        id: id.to_string(),
        state: ItemState::Completed,
        locator: Locator::Result(format!("https://results.example.com/{id}/wpt_report.json.gz")),
        screenshot: None,
    }
}

pub fn unfinished(name: &str, id: &str) -> CatalogItem {
    CatalogItem {
        state: ItemState::Other("running".to_string()),
        ..item(name, id)
    }
}

pub fn archive(name: &str, id: &str) -> CatalogItem {
    CatalogItem {
        locator: Locator::Archive(format!("https://api.example.com/artifacts/{id}/zip")),
        ..item(name, id)
    }
}

/// Run metadata for `web-platform-tests/wpt` with the given event and branch.
pub fn meta(event: RunEvent, branch: &str) -> RunMeta {
    let repository = RepoRef::new("web-platform-tests", "wpt");
    RunMeta {
        head_sha: Some("abcdef0123456789".to_string()),
        head_branch: Some(branch.to_string()),
        event,
        head_repository: Some(repository.clone()),
        base_repository: Some(repository),
        sender: None,
    }
}

/// Binds an ephemeral port, serves `router` in the background and returns the base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("listener has an address");
    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Failed to run test server");
    });
    format!("http://{addr}")
}

/// One request received by the test receiver.
#[derive(Debug, Clone)]
pub struct ReceivedRun {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl ReceivedRun {
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values(key).into_iter().next()
    }
}

#[derive(Clone)]
struct ReceiverState {
    runs: Arc<Mutex<Vec<ReceivedRun>>>,
    reject_containing: Option<&'static str>,
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    Form(fields): Form<Vec<(String, String)>>,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let run = ReceivedRun {
        authorization: header("authorization"),
        content_type: header("content-type"),
        fields,
    };
    let rejected = state.reject_containing.is_some_and(|needle| {
        run.fields
            .iter()
            .any(|(k, v)| k.ends_with("_url") && k != "callback_url" && v.contains(needle))
    });
    state.runs.lock().unwrap().push(run);
    if rejected {
        (StatusCode::NOT_FOUND, "no such artifact".to_string())
    } else {
        (StatusCode::OK, "run created".to_string())
    }
}

/// Starts a results receiver at `<base>/api/results/upload` that records every
/// request and answers 404 for runs whose locators contain `reject_containing`.
pub async fn spawn_receiver(
    reject_containing: Option<&'static str>,
) -> (String, Arc<Mutex<Vec<ReceivedRun>>>) {
    let runs = Arc::new(Mutex::new(Vec::new()));
    let state = ReceiverState {
        runs: Arc::clone(&runs),
        reject_containing,
    };
    let router = Router::new()
        .route("/api/results/upload", post(receive))
        .with_state(state);
    let base = serve(router).await;
    (format!("{base}/api/results/upload"), runs)
}
