//! DNS-over-HTTPS listener (RFC 8484): `/dns-query`, GET with a
//! base64url `dns=` parameter or POST with an
//! `application/dns-message` body.

use crate::server::handler::Handler;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

const DNS_MESSAGE: &str = "application/dns-message";

async fn serve_request(
    req: Request<Incoming>,
    handler: Arc<Handler>,
    src: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let status_response = |status: StatusCode| {
        Response::builder()
            .status(status)
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    if req.uri().path() != "/dns-query" {
        return Ok(status_response(StatusCode::NOT_FOUND));
    }

    let query_bytes: Option<Vec<u8>> = match req.method() {
        &Method::GET => req
            .uri()
            .query()
            .and_then(|q| {
                q.split('&')
                    .find_map(|pair| pair.strip_prefix("dns=").map(|v| v.to_string()))
            })
            .and_then(|b64| URL_SAFE_NO_PAD.decode(b64).ok()),
        &Method::POST => {
            let ct_ok = req
                .headers()
                .get(hyper::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.starts_with(DNS_MESSAGE))
                .unwrap_or(false);
            if !ct_ok {
                return Ok(status_response(StatusCode::UNSUPPORTED_MEDIA_TYPE));
            }
            req.into_body().collect().await.ok().map(|b| b.to_bytes().to_vec())
        }
        _ => return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED)),
    };

    let Some(query_bytes) = query_bytes else {
        return Ok(status_response(StatusCode::BAD_REQUEST));
    };

    let responses = handler.handle(&query_bytes, src, false).await;
    let Some(resp) = responses.first() else {
        return Ok(status_response(StatusCode::BAD_REQUEST));
    };
    let body = resp.to_bytes();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, DNS_MESSAGE)
        .header(hyper::header::CACHE_CONTROL, "max-age=0")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

pub async fn spawn_doh(
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    handler: Arc<Handler>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls);
    info!(%addr, "DoH listening");

    Ok(tokio::spawn(async move {
        loop {
            let (stream, src) = tokio::select! {
                _ = shutdown.recv() => break,
                accept = listener.accept() => match accept {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!(error = %e, "DoH accept failed");
                        continue;
                    }
                },
            };
            let acceptor = acceptor.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let tls_stream = match acceptor.accept(stream).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(%src, error = %e, "DoH TLS handshake failed");
                        return;
                    }
                };
                let service = service_fn(move |req| {
                    serve_request(req, handler.clone(), src)
                });
                if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(tls_stream), service)
                    .await
                {
                    debug!(%src, error = %e, "DoH connection error");
                }
            });
        }
        info!(%addr, "DoH stopped");
    }))
}
