//! Local HTTP fixture for download tests

use axum::body::Body;
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use std::time::Duration;

pub const REPORT_BODY: &[u8] = b"%PDF-1.4 quarterly numbers";
pub const PNG_BODY: &[u8] = b"\x89PNG\r\n\x1a\nfake image data";
pub const FINAL_BODY: &[u8] = b"content at the end of the chain";
pub const CHUNK_SIZE: usize = 1024;

/// Start the fixture on an ephemeral port and return its base URL
pub async fn spawn() -> String {
    let app = Router::new()
        .route("/files/report.pdf", get(report))
        .route("/image", get(image))
        .route("/redirect/:hops", get(redirect))
        .route("/drip/:chunks/:delay_ms", get(drip))
        .route("/broken", get(broken))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// A base URL nothing is listening on
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn report() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/pdf")], REPORT_BODY)
}

async fn image() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], PNG_BODY)
}

async fn redirect(Path(hops): Path<u32>) -> Response {
    if hops == 0 {
        ([(header::CONTENT_TYPE, "text/plain")], FINAL_BODY).into_response()
    } else {
        Redirect::temporary(&format!("/redirect/{}", hops - 1)).into_response()
    }
}

/// `chunks` blocks of `CHUNK_SIZE` bytes, one every `delay_ms`
async fn drip(Path((chunks, delay_ms)): Path<(usize, u64)>) -> impl IntoResponse {
    let delay = Duration::from_millis(delay_ms);
    let stream = futures::stream::unfold(0usize, move |sent| async move {
        if sent >= chunks {
            return None;
        }
        tokio::time::sleep(delay).await;
        Some((Ok::<_, std::io::Error>(vec![b'x'; CHUNK_SIZE]), sent + 1))
    });

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, (chunks * CHUNK_SIZE).to_string()),
        ],
        Body::from_stream(stream),
    )
}

/// Sends a few chunks, then drops the connection mid-body
async fn broken() -> impl IntoResponse {
    let stream = futures::stream::unfold(0usize, |sent| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if sent < 3 {
            Some((Ok(vec![b'y'; CHUNK_SIZE]), sent + 1))
        } else {
            Some((
                Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "boom")),
                sent + 1,
            ))
        }
    });

    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, (10 * CHUNK_SIZE).to_string()),
        ],
        Body::from_stream(stream),
    )
}
