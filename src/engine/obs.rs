//! obs-websocket client.
//!
//! Requests are strictly sequential: one request frame is written, then
//! frames are read until the matching response arrives (events and stale
//! responses from a timed-out request are dropped). Any transport failure or
//! timeout discards the socket, so the next call reports `NotConnected`
//! until the orchestrator reconnects.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{
    self, Envelope, Hello, Identified, Identify, Request, RequestResponse,
    CLOSE_AUTHENTICATION_FAILED, OP_EVENT, OP_HELLO, OP_IDENTIFIED, OP_IDENTIFY, OP_REQUEST,
    OP_REQUEST_RESPONSE, RPC_VERSION, STATUS_RESOURCE_NOT_FOUND,
};
use super::{EngineControl, EngineEndpoint, EngineError, PlaybackState, TrackSelectors};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WHITE: u32 = 0xFFFF_FFFF;
const BLACK: u32 = 0xFF00_0000;

/// Font settings written with every overlay update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextStyle {
    pub font: String,
    pub size: u32,
}

pub struct ObsClient {
    socket: Option<WsStream>,
    addr: String,
    request_timeout: Duration,
    text_timeout: Duration,
    text_style: TextStyle,
    expected_sources: Vec<String>,
}

impl ObsClient {
    /// `text_timeout` bounds overlay updates separately so a slow engine
    /// cannot stretch a poll cycle past the poll interval.
    pub fn new(text_style: TextStyle, request_timeout: Duration, text_timeout: Duration) -> Self {
        Self {
            socket: None,
            addr: String::new(),
            request_timeout,
            text_timeout: text_timeout.min(request_timeout),
            text_style,
            expected_sources: Vec::new(),
        }
    }

    /// Inputs that must exist in the scene; checked once per connect.
    pub fn with_expected_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn handshake(endpoint: &EngineEndpoint) -> Result<WsStream, EngineError> {
        let addr = endpoint.url();
        let as_connect = |e: EngineError| match e {
            EngineError::NotConnected => EngineError::Connect {
                addr: addr.clone(),
                reason: "connection closed during handshake".into(),
            },
            other => other,
        };

        let (mut ws, _) = connect_async(addr.as_str())
            .await
            .map_err(|e| EngineError::Connect {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        let env = read_envelope(&mut ws).await.map_err(as_connect)?;
        if env.op != OP_HELLO {
            return Err(EngineError::Protocol(format!("expected Hello, got op {}", env.op)));
        }
        let hello: Hello = serde_json::from_value(env.d)
            .map_err(|e| EngineError::Protocol(format!("bad Hello: {e}")))?;
        debug!(
            "obs-websocket {} (rpc {})",
            hello.obs_web_socket_version.as_deref().unwrap_or("?"),
            hello.rpc_version
        );

        let authentication = hello
            .authentication
            .as_ref()
            .map(|c| protocol::auth_response(&endpoint.password, &c.salt, &c.challenge));
        let auth_requested = authentication.is_some();

        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: 0,
        };
        let frame = protocol::encode(OP_IDENTIFY, &identify)
            .map_err(|e| EngineError::Protocol(e.to_string()))?;
        ws.send(Message::text(frame)).await.map_err(|e| EngineError::Connect {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

        match read_envelope(&mut ws).await {
            Ok(env) if env.op == OP_IDENTIFIED => {
                let identified: Identified = serde_json::from_value(env.d)
                    .map_err(|e| EngineError::Protocol(format!("bad Identified: {e}")))?;
                debug!("identified (rpc {})", identified.negotiated_rpc_version);
                Ok(ws)
            }
            Ok(env) => Err(EngineError::Protocol(format!("expected Identified, got op {}", env.op))),
            Err(EngineError::NotConnected) if auth_requested => {
                Err(EngineError::Auth("engine closed the connection during identify".into()))
            }
            Err(e) => Err(as_connect(e)),
        }
    }

    async fn request(
        &mut self,
        request_type: &'static str,
        data: Value,
        timeout: Duration,
    ) -> Result<RequestResponse, EngineError> {
        let Some(socket) = self.socket.as_mut() else {
            return Err(EngineError::NotConnected);
        };

        let res = match tokio::time::timeout(timeout, exchange(socket, request_type, data)).await {
            Ok(res) => res,
            Err(_) => Err(EngineError::Timeout {
                request: request_type,
                timeout,
            }),
        };

        if let Err(e) = &res {
            if e.is_connection_fault() {
                warn!("obs-websocket {request_type} failed: {e}; dropping connection");
                self.socket = None;
            }
        }
        res
    }

    async fn list_inputs(&mut self) -> Result<Vec<String>, EngineError> {
        let resp = self
            .request("GetInputList", json!({}), self.request_timeout)
            .await?;
        let data = expect_ok(resp, "GetInputList")?;
        Ok(data
            .get("inputs")
            .and_then(Value::as_array)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|i| i.get("inputName").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stream_active(&mut self) -> Result<bool, EngineError> {
        let resp = self
            .request("GetStreamStatus", json!({}), self.request_timeout)
            .await?;
        let data = expect_ok(resp, "GetStreamStatus")?;
        Ok(data.get("outputActive").and_then(Value::as_bool).unwrap_or(false))
    }
}

#[async_trait]
impl EngineControl for ObsClient {
    async fn connect(&mut self, endpoint: &EngineEndpoint) -> Result<(), EngineError> {
        self.disconnect().await;
        self.addr = endpoint.url();

        let ws = match tokio::time::timeout(self.request_timeout, Self::handshake(endpoint)).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(EngineError::Connect {
                    addr: self.addr.clone(),
                    reason: format!("handshake timed out after {:?}", self.request_timeout),
                })
            }
        };
        self.socket = Some(ws);

        if !self.expected_sources.is_empty() {
            let inputs = self.list_inputs().await?;
            for name in &self.expected_sources {
                if !inputs.iter().any(|i| i == name) {
                    warn!("input {name:?} not found in OBS; playback will skip until it exists");
                }
            }
        }
        Ok(())
    }

    async fn set_media_file(
        &mut self,
        source: &str,
        path: &Path,
        tracks: TrackSelectors,
    ) -> Result<(), EngineError> {
        let settings = json!({
            "playlist": [{"value": path.to_string_lossy(), "hidden": false, "selected": false}],
            "loop": false,
            "shuffle": false,
            "audio_track": tracks.audio,
            "sub_track": tracks.subtitle,
            "video_track": 1,
        });
        let resp = self
            .request(
                "SetInputSettings",
                json!({"inputName": source, "inputSettings": settings, "overlay": false}),
                self.request_timeout,
            )
            .await?;
        expect_media_ok(resp, "SetInputSettings", source, path)?;

        let resp = self
            .request(
                "TriggerMediaInputAction",
                json!({
                    "inputName": source,
                    "mediaAction": "OBS_WEBSOCKET_MEDIA_INPUT_ACTION_RESTART",
                }),
                self.request_timeout,
            )
            .await?;
        expect_media_ok(resp, "TriggerMediaInputAction", source, path)?;
        Ok(())
    }

    async fn playback_state(&mut self, source: &str) -> Result<PlaybackState, EngineError> {
        let resp = self
            .request(
                "GetMediaInputStatus",
                json!({"inputName": source}),
                self.request_timeout,
            )
            .await?;
        let data = match expect_ok(resp, "GetMediaInputStatus") {
            Ok(data) => data,
            Err(EngineError::SourceNotFound(_)) => {
                return Err(EngineError::SourceNotFound(source.to_string()))
            }
            Err(e) => return Err(e),
        };
        let status: protocol::MediaInputStatus = serde_json::from_value(data)
            .map_err(|e| EngineError::Protocol(format!("bad GetMediaInputStatus: {e}")))?;
        Ok(status.into_playback_state())
    }

    async fn set_text(&mut self, source: &str, text: &str) -> Result<(), EngineError> {
        let settings = json!({
            "text": text,
            "font": {"face": self.text_style.font, "size": self.text_style.size, "style": "Regular"},
            "color1": WHITE,
            "outline": true,
            "outline_size": 2,
            "outline_color": BLACK,
        });
        let resp = self
            .request(
                "SetInputSettings",
                json!({"inputName": source, "inputSettings": settings, "overlay": false}),
                self.text_timeout,
            )
            .await?;
        match expect_ok(resp, "SetInputSettings") {
            Ok(_) => Ok(()),
            Err(EngineError::SourceNotFound(_)) => Err(EngineError::SourceNotFound(source.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn ensure_output(&mut self) -> Result<(), EngineError> {
        if self.stream_active().await? {
            return Ok(());
        }
        let resp = self
            .request("StartStream", json!({}), self.request_timeout)
            .await?;
        expect_ok(resp, "StartStream")?;
        info!("OBS stream output started");
        Ok(())
    }

    async fn stop_output(&mut self) -> Result<(), EngineError> {
        if !self.stream_active().await? {
            return Ok(());
        }
        let resp = self
            .request("StopStream", json!({}), self.request_timeout)
            .await?;
        expect_ok(resp, "StopStream")?;
        info!("OBS stream output stopped");
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), ws.close(None)).await;
            debug!("disconnected from {}", self.addr);
        }
    }
}

async fn exchange(
    socket: &mut WsStream,
    request_type: &'static str,
    data: Value,
) -> Result<RequestResponse, EngineError> {
    let request_id = Uuid::new_v4().to_string();
    let frame = protocol::encode(
        OP_REQUEST,
        &Request {
            request_type,
            request_id: request_id.clone(),
            request_data: Some(data),
        },
    )
    .map_err(|e| EngineError::Protocol(e.to_string()))?;

    socket
        .send(Message::text(frame))
        .await
        .map_err(|e| EngineError::Protocol(format!("send {request_type}: {e}")))?;

    loop {
        let env = read_envelope(socket).await?;
        match env.op {
            OP_REQUEST_RESPONSE => {}
            OP_EVENT => continue,
            other => {
                debug!("ignoring op {other} while waiting for {request_type}");
                continue;
            }
        }
        let resp: RequestResponse = serde_json::from_value(env.d)
            .map_err(|e| EngineError::Protocol(format!("bad response to {request_type}: {e}")))?;
        if resp.request_id != request_id {
            debug!("dropping stale {} response", resp.request_type);
            continue;
        }
        return Ok(resp);
    }
}

/// Next JSON frame. A close frame becomes `NotConnected`, or `Auth` for the
/// dedicated authentication-failed close code.
async fn read_envelope(socket: &mut WsStream) -> Result<Envelope, EngineError> {
    loop {
        let msg = match socket.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(EngineError::Protocol(format!("receive: {e}"))),
            None => return Err(EngineError::NotConnected),
        };
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| EngineError::Protocol(format!("malformed frame: {e}")));
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    if u16::from(frame.code) == CLOSE_AUTHENTICATION_FAILED {
                        return Err(EngineError::Auth(frame.reason.to_string()));
                    }
                    debug!("engine closed connection: {} {}", u16::from(frame.code), frame.reason);
                }
                return Err(EngineError::NotConnected);
            }
            _ => continue,
        }
    }
}

fn expect_ok(resp: RequestResponse, request: &'static str) -> Result<Value, EngineError> {
    if resp.request_status.result {
        return Ok(resp.response_data.unwrap_or(Value::Null));
    }
    let comment = resp.request_status.comment.unwrap_or_default();
    if resp.request_status.code == STATUS_RESOURCE_NOT_FOUND {
        return Err(EngineError::SourceNotFound(comment));
    }
    Err(EngineError::Rejected {
        request,
        code: resp.request_status.code,
        comment,
    })
}

fn expect_media_ok(
    resp: RequestResponse,
    request: &'static str,
    source: &str,
    path: &Path,
) -> Result<(), EngineError> {
    match expect_ok(resp, request) {
        Ok(_) => Ok(()),
        Err(EngineError::SourceNotFound(_)) => Err(EngineError::SourceNotFound(source.to_string())),
        Err(EngineError::Rejected { code, comment, .. }) => Err(EngineError::MediaLoad {
            path: path.display().to_string(),
            reason: format!("code {code}: {comment}"),
        }),
        Err(e) => Err(e),
    }
}
