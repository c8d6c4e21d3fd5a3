//! Property-bus channel plumbing.
//!
//! The vehicle service speaks gRPC over plaintext HTTP/2. The channel is
//! driven directly through hyper: one connection multiplexes the
//! server-streaming subscription and the one-shot "send all current
//! values" call, which the server correlates through the `session_id`
//! metadata header attached to both.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use crate::SignalError;

const STREAM_METHOD: &str = "/vhal_proto.VehicleServer/StartPropertyValuesStream";
const SEND_ALL_METHOD: &str = "/vhal_proto.VehicleServer/SendAllPropertyValuesToStream";

/// An empty gRPC message: uncompressed flag plus zero length.
const EMPTY_MESSAGE: [u8; 5] = [0; 5];

/// A connectable property bus. The observer reconnects through this seam,
/// so tests can swap in a scripted bus.
#[async_trait]
pub trait PropertyBus: Send + Sync {
    /// Establish a fresh channel and subscribe to the property stream.
    async fn connect(&self) -> Result<Box<dyn PropertyStream>, SignalError>;
}

/// One live subscription on a property bus.
#[async_trait]
pub trait PropertyStream: Send {
    /// Next property batch; `Ok(None)` means the server closed the stream.
    async fn next_batch(&mut self) -> Result<Option<Bytes>, SignalError>;

    /// Ask the server to push all current property values onto this
    /// stream. Correlated to the subscription via the session header.
    async fn send_all(&mut self) -> Result<(), SignalError>;
}

/// gRPC property bus client
pub struct GrpcBus {
    host: String,
    port: u16,
    client_id: String,
}

impl GrpcBus {
    /// Create a bus client for the given endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: "evcam_signal".to_string(),
        }
    }

    /// Override the client identifier sent in channel metadata
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// One-shot TCP reachability probe, for UI status checks
    pub async fn probe(host: &str, port: u16, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl PropertyBus for GrpcBus {
    async fn connect(&self) -> Result<Box<dyn PropertyStream>, SignalError> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        let (mut sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(tcp))
            .await
            .map_err(|err| SignalError::Connect(err.to_string()))?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("property channel closed: {err}");
            }
        });

        // The session id must be unique per channel and non-empty; the
        // server keys the stream and the send-all call on it.
        let session_id = Uuid::new_v4().to_string();
        let authority = format!("{}:{}", self.host, self.port);

        let request = grpc_request(&authority, STREAM_METHOD, &session_id, &self.client_id)?;
        sender.ready().await?;
        let response = sender.send_request(request).await?;
        if response.status() != StatusCode::OK {
            return Err(SignalError::Rejected(response.status().as_u16()));
        }
        debug!(%session_id, "property stream established");

        Ok(Box::new(GrpcStream {
            sender,
            body: response.into_body(),
            buf: BytesMut::new(),
            authority,
            session_id,
            client_id: self.client_id.clone(),
        }))
    }
}

fn grpc_request(
    authority: &str,
    path: &str,
    session_id: &str,
    client_id: &str,
) -> Result<Request<Full<Bytes>>, SignalError> {
    Request::builder()
        .method(Method::POST)
        .uri(format!("http://{authority}{path}"))
        .header(http::header::CONTENT_TYPE, "application/grpc")
        .header("te", "trailers")
        .header("grpc-accept-encoding", "identity")
        .header("session_id", session_id)
        .header("client_id", client_id)
        .body(Full::new(Bytes::from_static(&EMPTY_MESSAGE)))
        .map_err(|err| SignalError::Channel(err.to_string()))
}

struct GrpcStream {
    sender: SendRequest<Full<Bytes>>,
    body: Incoming,
    buf: BytesMut,
    authority: String,
    session_id: String,
    client_id: String,
}

impl GrpcStream {
    /// Split one length-prefixed gRPC message off the receive buffer.
    fn take_message(&mut self) -> Result<Option<Bytes>, SignalError> {
        if self.buf.len() < 5 {
            return Ok(None);
        }
        if self.buf[0] != 0 {
            return Err(SignalError::Frame("compressed messages not supported".into()));
        }
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if self.buf.len() < 5 + len {
            return Ok(None);
        }
        self.buf.advance(5);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

#[async_trait]
impl PropertyStream for GrpcStream {
    async fn next_batch(&mut self) -> Result<Option<Bytes>, SignalError> {
        loop {
            if let Some(message) = self.take_message()? {
                return Ok(Some(message));
            }
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    return Err(SignalError::Frame("stream ended mid-message".into()));
                }
            }
        }
    }

    async fn send_all(&mut self) -> Result<(), SignalError> {
        let request = grpc_request(
            &self.authority,
            SEND_ALL_METHOD,
            &self.session_id,
            &self.client_id,
        )?;
        self.sender.ready().await?;
        let response = self.sender.send_request(request).await?;
        if response.status() != StatusCode::OK {
            return Err(SignalError::Rejected(response.status().as_u16()));
        }
        // Drain the unary response; its payload carries nothing we need.
        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            frame?;
        }
        Ok(())
    }
}
