//! HTTP listener — forwards inbound requests to healthy targets.
//!
//! `Listener` runs a hyper HTTP/1.1 server on the pool's listener port.
//! Each request takes a lease on a target and holds it until the upstream
//! response body has been read in full, so draining waits for responses
//! already in flight.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::target_group::{TargetGroup, TargetLease};

/// Reverse proxy in front of one target group.
pub struct Listener {
    listener: TcpListener,
    group: Arc<TargetGroup>,
}

impl Listener {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, group: Arc<TargetGroup>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind listener on {addr}"))?;
        Ok(Self { listener, group })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown signal is received. Spawns a tokio task
    /// per connection.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, group = %self.group.name(), "listener accepting traffic");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    let (stream, peer_addr) = match accept_result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let group = self.group.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let group = group.clone();
                            async move { Ok::<_, hyper::Error>(forward(&group, req).await) }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                            debug!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!(%addr, "listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = status;
    resp
}

/// Route one request: 503 without a healthy target, 502 on upstream failure.
async fn forward(group: &TargetGroup, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let Some(lease) = group.select() else {
        debug!(group = %group.name(), "no healthy target");
        return plain(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
    };

    // The lease lives until the upstream body has been collected.
    match proxy(&lease, req).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(
                instance = %lease.instance,
                endpoint = %lease.endpoint,
                error = %e,
                "upstream request failed"
            );
            plain(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

/// Hop-by-hop or re-framed headers not copied between hops.
fn skip_header(name: &http::HeaderName) -> bool {
    name == http::header::HOST
        || name == http::header::CONNECTION
        || name == http::header::TRANSFER_ENCODING
}

async fn proxy(
    lease: &TargetLease,
    req: Request<Incoming>,
) -> anyhow::Result<Response<Full<Bytes>>> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.context("reading request body")?.to_bytes();

    let stream = TcpStream::connect(&lease.endpoint)
        .await
        .with_context(|| format!("connecting to {}", lease.endpoint))?;
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .context("upstream handshake")?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut upstream = Request::builder().method(parts.method).uri(path);
    for (name, value) in parts.headers.iter() {
        if !skip_header(name) {
            upstream = upstream.header(name, value);
        }
    }
    let upstream = upstream
        .header(http::header::HOST, lease.endpoint.as_str())
        .body(Full::new(body))
        .context("building upstream request")?;

    let resp = sender.send_request(upstream).await.context("sending upstream request")?;
    let (mut parts, body) = resp.into_parts();
    let body = body.collect().await.context("reading upstream body")?.to_bytes();
    parts.headers.remove(http::header::TRANSFER_ENCODING);
    Ok(Response::from_parts(parts, Full::new(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use autopool_core::backend::BackendFuture;

    use crate::checker::{HealthProbe, ProbeResult};
    use crate::target_group::HealthCheckSettings;

    struct AlwaysHealthy;

    impl HealthProbe for AlwaysHealthy {
        fn probe<'a>(&'a self, _endpoint: &'a str) -> BackendFuture<'a, ProbeResult> {
            Box::pin(async { ProbeResult::Healthy })
        }
    }

    async fn upstream(reply: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| async move {
                        let body = format!("{reply} {}", req.uri().path());
                        Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(body))))
                    });
                    let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), svc).await;
                });
            }
        });
        addr
    }

    fn group(target_port: u16) -> Arc<TargetGroup> {
        let settings = HealthCheckSettings {
            healthy_threshold: 1,
            unhealthy_threshold: 1,
            timeout: Duration::from_secs(1),
        };
        Arc::new(TargetGroup::new(
            "web",
            settings,
            target_port,
            Duration::from_secs(1),
            Arc::new(AlwaysHealthy),
        ))
    }

    async fn get(addr: SocketAddr, path: &str) -> (StatusCode, String) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);
        let req = Request::builder()
            .uri(path)
            .header("host", "autopool.test")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = sender.send_request(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn start(group: Arc<TargetGroup>) -> (SocketAddr, tokio::sync::watch::Sender<bool>) {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), group).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(listener.serve(rx));
        (addr, tx)
    }

    #[tokio::test]
    async fn no_healthy_target_is_503() {
        let group = group(8000);
        group.add_target("i-1", "127.0.0.1");
        let (addr, _tx) = start(group).await;

        let (status, _) = get(addr, "/").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn forwards_to_healthy_target() {
        let upstream_addr = upstream("hello from i-1").await;
        let group = group(upstream_addr.port());
        group.add_target("i-1", "127.0.0.1");
        group.check_health().await;
        let (addr, _tx) = start(group.clone()).await;

        let (status, body) = get(addr, "/orders?id=7").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello from i-1 /orders");
        // Lease released once the response is complete.
        assert_eq!(group.targets()[0].in_flight, 0);
    }

    #[tokio::test]
    async fn unreachable_target_is_502() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = dead.local_addr().unwrap().port();
        drop(dead);

        let group = group(port);
        group.add_target("i-1", "127.0.0.1");
        group.check_health().await;
        let (addr, _tx) = start(group).await;

        let (status, _) = get(addr, "/").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn listener_shuts_down() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), group(8000)).await.unwrap();
        let (tx, rx) = tokio::sync::watch::channel(false);
        let server = tokio::spawn(listener.serve(rx));

        tx.send(true).unwrap();
        assert!(server.await.unwrap().is_ok());
    }
}
