//! Loopback HTTP surface for `attachment://` URLs.
//!
//! `GET /v1/<path>` serves a legacy plaintext file, `GET /v2/<path>`
//! decrypts with the `key` query parameter. The query string is the same one
//! a [`LocalAttachmentUrl`] carries. Responses are never cached and honour
//! open-ended `Range: bytes=N-` requests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use coffer_shared::{mime, Disposition};
use coffer_store::local_url::UrlVersion;
use coffer_store::{AttachmentStore, LocalAttachmentUrl};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::ServerError;

const CACHE_CONTROL: &str = "no-cache, no-store";

#[derive(Clone)]
pub struct AppState {
    stores: Arc<HashMap<Disposition, AttachmentStore>>,
}

impl AppState {
    /// One filesystem store per disposition under `user_data`.
    pub fn new(user_data: &Path) -> Self {
        let stores = Disposition::ALL
            .into_iter()
            .map(|d| (d, AttachmentStore::new(user_data, d)))
            .collect();
        Self {
            stores: Arc::new(stores),
        }
    }

    fn store(&self, disposition: Disposition) -> Result<&AttachmentStore, ServerError> {
        self.stores
            .get(&disposition)
            .ok_or_else(|| ServerError::BadRequest(format!("no store for {disposition}")))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/v1/*path", get(serve_v1))
        .route("/v2/*path", get(serve_v2))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn serve_v1(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    serve_file(&state, UrlVersion::V1, path, params, &headers).await
}

async fn serve_v2(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    serve_file(&state, UrlVersion::V2, path, params, &headers).await
}

async fn serve_file(
    state: &AppState,
    version: UrlVersion,
    path: String,
    params: HashMap<String, String>,
    headers: &HeaderMap,
) -> Result<Response, ServerError> {
    let mut url = LocalAttachmentUrl::new(version, path);
    for (name, value) in &params {
        url.set_param(name, value)?;
    }
    let store = state.store(url.disposition)?;

    // Traversal check before anything touches the disk.
    store.resolve(&url.path)?;

    if params.contains_key("weakReference") {
        if url.disposition != Disposition::Attachment {
            return Err(ServerError::BadRequest(
                "only attachments can have weak references".to_string(),
            ));
        }
        if !store.exists(&url.path).await? {
            return Err(ServerError::NotFound(url.path));
        }
    }

    debug!(
        version = url.version.as_str(),
        disposition = %url.disposition,
        path = %url.path,
        "serving attachment"
    );

    let mut data = match url.version {
        UrlVersion::V1 => store.read_plaintext(&url.path).await?,
        UrlVersion::V2 => {
            let key = url.key.as_deref().ok_or(ServerError::MissingParam("key"))?;
            if url.size.is_none() {
                return Err(ServerError::MissingParam("size"));
            }
            store.read(&url.path, key).await?
        }
    };

    // Trim padding.
    if let Some(size) = url.size {
        data.truncate(usize::try_from(size).unwrap_or(usize::MAX));
    }

    let content_type = match url.content_type.as_deref() {
        Some(ct) if mime::is_servable_inline(ct) => ct.to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    };

    let total = data.len();
    let response = match range_start(headers) {
        None => (
            StatusCode::OK,
            [
                (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
                (header::CONTENT_TYPE, content_type),
            ],
            data,
        )
            .into_response(),
        Some(start) => {
            let start = usize::try_from(start).unwrap_or(usize::MAX).min(total);
            let body = data.split_off(start);
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CACHE_CONTROL, CACHE_CONTROL.to_string()),
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_RANGE, format!("bytes {start}-/{total}")),
                ],
                body,
            )
                .into_response()
        }
    };
    Ok(response)
}

/// Start offset of an open-ended `bytes=N-` range. Anything else is served
/// as a full response.
fn range_start(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::RANGE)?;
    let start = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.strip_suffix('-'))
        .and_then(|v| v.parse::<u64>().ok());
    if start.is_none() {
        warn!(range = ?value, "invalid range header");
    }
    start
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting attachment server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        dir: TempDir,
        router: Router,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let router = build_router(AppState::new(dir.path()));
            Self { dir, router }
        }

        fn store(&self, disposition: Disposition) -> AttachmentStore {
            AttachmentStore::new(self.dir.path(), disposition)
        }

        async fn get(&self, uri: &str, range: Option<&str>) -> Response {
            let mut request = Request::builder().uri(uri);
            if let Some(range) = range {
                request = request.header(header::RANGE, range);
            }
            self.router
                .clone()
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap()
        }
    }

    async fn body(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let fixture = Fixture::new();
        let response = fixture.get("/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serves_decrypted_attachment() {
        let fixture = Fixture::new();
        let written = fixture
            .store(Disposition::Attachment)
            .write(b"hello picture")
            .await
            .unwrap();

        let uri = format!(
            "/v2/{}?disposition=attachment&contentType=image/png&size={}&key={}",
            written.path, written.size, written.local_key
        );
        let response = fixture.get(&uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/png");
        assert_eq!(
            header_str(&response, header::CACHE_CONTROL),
            "no-cache, no-store"
        );
        assert_eq!(body(response).await, b"hello picture");
    }

    #[tokio::test]
    async fn test_size_trims_and_range_is_partial() {
        let fixture = Fixture::new();
        let written = fixture
            .store(Disposition::Attachment)
            .write(b"0123456789padding")
            .await
            .unwrap();
        let uri = format!(
            "/v2/{}?disposition=attachment&contentType=video/mp4&size=10&key={}",
            written.path, written.local_key
        );

        let full = fixture.get(&uri, None).await;
        assert_eq!(body(full).await, b"0123456789");

        let partial = fixture.get(&uri, Some("bytes=4-")).await;
        assert_eq!(partial.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_str(&partial, header::CONTENT_RANGE), "bytes 4-/10");
        assert_eq!(body(partial).await, b"456789");

        let past_end = fixture.get(&uri, Some("bytes=99-")).await;
        assert_eq!(header_str(&past_end, header::CONTENT_RANGE), "bytes 10-/10");
        assert!(body(past_end).await.is_empty());

        let closed = fixture.get(&uri, Some("bytes=0-3")).await;
        assert_eq!(closed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_v2_requires_key_and_size() {
        let fixture = Fixture::new();
        let written = fixture.store(Disposition::Attachment).write(b"x").await.unwrap();

        let no_key = fixture
            .get(&format!("/v2/{}?size=1", written.path), None)
            .await;
        assert_eq!(no_key.status(), StatusCode::BAD_REQUEST);

        let no_size = fixture
            .get(&format!("/v2/{}?key={}", written.path, written.local_key), None)
            .await;
        assert_eq!(no_size.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_v1_plaintext_and_content_type_whitelist() {
        let fixture = Fixture::new();
        let absolute = fixture
            .store(Disposition::Sticker)
            .resolve("cd/cdef0123")
            .unwrap();
        std::fs::create_dir_all(absolute.parent().unwrap()).unwrap();
        std::fs::write(&absolute, b"<html>").unwrap();

        let response = fixture
            .get("/v1/cd/cdef0123?disposition=sticker&contentType=text/html", None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, header::CONTENT_TYPE),
            "application/octet-stream"
        );
        assert_eq!(body(response).await, b"<html>");
    }

    #[tokio::test]
    async fn test_query_values_are_percent_decoded() {
        let fixture = Fixture::new();
        let written = fixture
            .store(Disposition::Attachment)
            .write(b"<svg/>")
            .await
            .unwrap();
        let url = LocalAttachmentUrl::for_descriptor(
            &coffer_store::AttachmentDescriptor::from_local_write("image/svg+xml", &written),
            Disposition::Attachment,
        )
        .unwrap()
        .to_url()
        .unwrap();
        // The UI swaps `attachment://v2` for the server origin.
        let uri = format!("/v2{}?{}", url.path(), url.query().unwrap());

        let response = fixture.get(&uri, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/svg+xml");
        assert_eq!(body(response).await, b"<svg/>");
    }

    #[tokio::test]
    async fn test_traversal_is_denied() {
        let fixture = Fixture::new();
        let response = fixture
            .get("/v1/ab/..%2F..%2F..%2Fetc%2Fpasswd?disposition=attachment", None)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_files_and_bad_disposition() {
        let fixture = Fixture::new();

        let missing = fixture.get("/v1/ab/abcdef?disposition=attachment", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let weak = fixture
            .get("/v1/ab/abcdef?disposition=attachment&weakReference=1", None)
            .await;
        assert_eq!(weak.status(), StatusCode::NOT_FOUND);

        let weak_sticker = fixture
            .get("/v1/ab/abcdef?disposition=sticker&weakReference=1", None)
            .await;
        assert_eq!(weak_sticker.status(), StatusCode::BAD_REQUEST);

        let unknown = fixture.get("/v1/ab/abcdef?disposition=root", None).await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

        let unknown_version = fixture.get("/v3/ab/abcdef", None).await;
        assert_eq!(unknown_version.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_key_is_a_server_error() {
        let fixture = Fixture::new();
        let written = fixture.store(Disposition::Attachment).write(b"x").await.unwrap();
        let uri = format!("/v2/{}?size=1&key={}", written.path, "00".repeat(32));
        let response = fixture.get(&uri, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
