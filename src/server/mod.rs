//! Tokio TCP server speaking HTTP/1.1 with keep-alive.
//!
//! [`Server::serve`] drives a [`Router`]; [`Server::run`] takes any
//! `Request -> Response` function.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::http::{
    Method, StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (head plus body) buffered before answering 413.
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use waypoint::config::AppConfig;
/// use waypoint::router::{Router, handler};
/// use waypoint::{Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = AppConfig::from_env()?;
///     let mut router = Router::new();
///     router.get("/", handler(|_ctx| async { Response::new(StatusCode::Ok).body("Hello!") }));
///
///     let server = Server::bind(&config.server.addr).await?;
///     server.serve(Arc::new(router), &config).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dispatches every request through `router`.
    ///
    /// A dispatch error (unresolvable middleware, invalid route pattern, a
    /// failing handler) is logged and answered with `500 Internal Server
    /// Error`; the error text is included in the body only when `app.debug` is
    /// set.
    pub async fn serve(self, router: Arc<Router>, config: &AppConfig) -> Result<(), ServerError> {
        if let Err(e) = router.compile() {
            warn!(error = %e, "route table failed to compile; affected requests will get 500");
        }
        info!(routes = router.len(), debug = config.app.debug, "serving router");
        let debug = config.app.debug;
        self.run(move |request| {
            let router = Arc::clone(&router);
            async move { respond(&router, request, debug).await }
        })
        .await
    }

    /// Accepts connections forever, one task each, answering every request
    /// with `handler`.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    error!(%error, "accept failed");
                    continue;
                }
            };
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(error) = serve_connection(stream, peer, handler).await {
                    warn!(%peer, %error, "connection dropped");
                }
            });
        }
    }
}

/// Outcome of looking at the bytes buffered so far.
enum Frame {
    /// Not enough bytes for a complete request yet.
    Partial,
    /// A complete request occupying the first `len` bytes.
    Request { request: Request, len: usize },
    /// Answer with this response, then close.
    Reject(Response),
}

fn frame(buf: &[u8]) -> Frame {
    if buf.len() > MAX_REQUEST_SIZE {
        return Frame::Reject(Response::status_page(StatusCode::PayloadTooLarge));
    }
    match Request::parse(buf) {
        Ok((mut request, head_len)) => {
            let body_len = request.content_length().unwrap_or(0);
            let len = match head_len.checked_add(body_len) {
                Some(len) if len <= MAX_REQUEST_SIZE => len,
                _ => return Frame::Reject(Response::status_page(StatusCode::PayloadTooLarge)),
            };
            if buf.len() < len {
                return Frame::Partial;
            }
            request.truncate_body(body_len);
            Frame::Request { request, len }
        }
        Err(RequestError::Incomplete) => Frame::Partial,
        Err(e) => Frame::Reject(
            Response::new(StatusCode::BadRequest).body(format!("400 Bad Request: {e}")),
        ),
    }
}

/// Serves requests from one connection until the peer hangs up or a request
/// asks for `Connection: close`.
async fn serve_connection<H, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
) -> std::io::Result<()>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    debug!(%peer, "connection opened");

    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            debug!(%peer, "connection closed by peer");
            return Ok(());
        }

        let (request, len) = match frame(&buf) {
            Frame::Partial => continue,
            Frame::Reject(response) => {
                warn!(%peer, status = response.status().as_u16(), "rejecting malformed request");
                stream.write_all(&response.keep_alive(false).into_bytes()).await?;
                return Ok(());
            }
            Frame::Request { request, len } => (request.with_remote_addr(peer), len),
        };

        let keep_alive = request.is_keep_alive();
        let head_only = *request.method() == Method::Head;
        let response = handler(request).await.keep_alive(keep_alive);
        let wire = if head_only {
            response.into_head_bytes()
        } else {
            response.into_bytes()
        };
        stream.write_all(&wire).await?;
        stream.flush().await?;
        let _ = buf.split_to(len);

        if !keep_alive {
            return Ok(());
        }
    }
}

async fn respond(router: &Router, request: Request, debug: bool) -> Response {
    let method = request.method().clone();
    let path = request.path().to_owned();
    match router.dispatch(request).await {
        Ok(response) => response,
        Err(e) => {
            error!(
                %method,
                %path,
                error = %e,
                configuration = e.is_configuration(),
                "dispatch failed"
            );
            if debug {
                Response::new(StatusCode::InternalServerError)
                    .body(format!("500 Internal Server Error\n\n{e}"))
            } else {
                Response::status_page(StatusCode::InternalServerError)
            }
        }
    }
}
