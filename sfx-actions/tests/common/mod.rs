// Mock cluster management endpoint shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
}

impl RecordedRequest {
    /// Decoded query pairs in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (decode(k), decode(v)),
                None => (decode(pair), String::new()),
            })
            .collect()
    }
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    response: Arc<Mutex<(u16, String)>>,
}

pub struct MockCluster {
    pub base_url: String,
    state: MockState,
    server: JoinHandle<()>,
}

impl MockCluster {
    /// Starts a server answering every request with 200 and an empty body.
    pub async fn start() -> anyhow::Result<Self> {
        let state = MockState {
            requests: Arc::new(Mutex::new(Vec::new())),
            response: Arc::new(Mutex::new((200, String::new()))),
        };
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        })
    }

    /// Explorer page URL on the mock origin with the given route fragment.
    pub fn explorer_url(&self, route: &str) -> String {
        format!("{}/Explorer/index.html#{route}", self.base_url)
    }

    pub fn respond_with(&self, status: u16, body: &str) {
        *self.state.response.lock().unwrap() = (status, body.to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Polls until `count` requests have arrived or the timeout passes.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= count || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn record(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        authorization: header_value(header::AUTHORIZATION),
        accept: header_value(header::ACCEPT),
    });

    let (status, body) = state.response.lock().unwrap().clone();
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        body,
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
