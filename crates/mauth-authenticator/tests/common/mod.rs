//! In-process key service for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use mauth_core::{MAuthConfig, RetryPolicy};
use tokio::net::TcpListener;
use uuid::Uuid;

pub const APP_UUID: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
pub const OTHER_UUID: Uuid = Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222);

pub const APP_PRIVATE_KEY: &str = include_str!("../fixtures/app_private_key.pem");
pub const APP_PUBLIC_KEY: &str = include_str!("../fixtures/app_public_key.pem");
pub const OTHER_PRIVATE_KEY: &str = include_str!("../fixtures/other_private_key.pem");
pub const OTHER_PUBLIC_KEY: &str = include_str!("../fixtures/other_public_key.pem");

/// Behaviour knobs of the fake key service.
#[derive(Debug, Clone, Default)]
pub struct KeyServiceOptions {
    /// Answer this many requests with `500` before behaving normally.
    pub fail_first: usize,
    /// Value sent as `Cache-Control: max-age=N`.
    pub max_age: Option<u64>,
    /// Delay before answering.
    pub delay: Duration,
    /// Apply `delay` only to this many requests; every request when unset.
    pub delay_first: Option<usize>,
}

/// A request the key service received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HeaderMap,
}

#[derive(Debug)]
struct State {
    options: KeyServiceOptions,
    keys: HashMap<Uuid, &'static str>,
    hits: AtomicUsize,
    recorded: Mutex<Vec<RecordedRequest>>,
}

/// Handle to a running fake key service.
#[derive(Debug, Clone)]
pub struct KeyService {
    pub base_url: String,
    state: Arc<State>,
}

impl KeyService {
    /// Start a key service knowing [`APP_UUID`] and [`OTHER_UUID`].
    pub async fn start(options: KeyServiceOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            options,
            keys: HashMap::from([(APP_UUID, APP_PUBLIC_KEY), (OTHER_UUID, OTHER_PUBLIC_KEY)]),
            hits: AtomicUsize::new(0),
            recorded: Mutex::new(Vec::new()),
        });

        let server_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(Arc::clone(&state), req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    /// Every request served so far, in arrival order.
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.state.recorded.lock().unwrap().clone()
    }

    /// Configuration pointing at this service, signing as [`APP_UUID`].
    pub fn config(&self, attempts: u32) -> MAuthConfig {
        MAuthConfig::builder()
            .app_uuid(APP_UUID)
            .mauth_base_url(self.base_url.clone())
            .private_key(APP_PRIVATE_KEY)
            .retry_policy(RetryPolicy::from_attempts(attempts).unwrap())
            .build()
    }
}

async fn handle(state: Arc<State>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    let path = req.uri().path().to_owned();
    state.recorded.lock().unwrap().push(RecordedRequest {
        path: path.clone(),
        headers: req.headers().clone(),
    });

    let delayed = state.options.delay_first.is_none_or(|n| hit <= n);
    if delayed && !state.options.delay.is_zero() {
        tokio::time::sleep(state.options.delay).await;
    }

    if hit <= state.options.fail_first {
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let known = ["/mauth/v1/security_tokens/", "/mauth/v2/security_tokens/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .and_then(|rest| rest.strip_suffix(".json"))
        .and_then(|id| Uuid::parse_str(id).ok())
        .and_then(|id| state.keys.get(&id).map(|key| (id, *key)));

    let Some((app_uuid, public_key)) = known else {
        return Ok(status(StatusCode::NOT_FOUND));
    };

    let body = serde_json::json!({
        "security_token": {
            "app_uuid": app_uuid,
            "public_key_str": public_key,
            "app_name": "integration",
        }
    });
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json");
    if let Some(max_age) = state.options.max_age {
        builder = builder.header("cache-control", format!("public, max-age={max_age}"));
    }
    Ok(builder
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap())
}

fn status(code: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(code)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
