//! obs-websocket v5 wire types.
//!
//! Frames are JSON text messages `{"op": <u8>, "d": {...}}`. Only the subset
//! needed to drive a media source and a text source is modelled here.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{MediaState, PlaybackState};

pub const OP_HELLO: u8 = 0;
pub const OP_IDENTIFY: u8 = 1;
pub const OP_IDENTIFIED: u8 = 2;
pub const OP_EVENT: u8 = 5;
pub const OP_REQUEST: u8 = 6;
pub const OP_REQUEST_RESPONSE: u8 = 7;

pub const RPC_VERSION: u32 = 1;

/// WebSocket close code sent by the server on a bad password.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;
/// `requestStatus.code` for an unknown input/scene.
pub const STATUS_RESOURCE_NOT_FOUND: u16 = 600;

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Serialize)]
struct OutEnvelope<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

pub fn encode<T: Serialize>(op: u8, payload: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&OutEnvelope { op, d: payload })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    /// Bitmask; zero means no events are pushed to us.
    pub event_subscriptions: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<'a> {
    pub request_type: &'a str,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `GetMediaInputStatus` response body. Cursor and duration are
/// milliseconds and null while nothing is loaded.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInputStatus {
    pub media_state: String,
    #[serde(default)]
    pub media_duration: Option<i64>,
    #[serde(default)]
    pub media_cursor: Option<i64>,
}

impl MediaInputStatus {
    pub fn into_playback_state(self) -> PlaybackState {
        let ms = |v: Option<i64>| v.filter(|v| *v > 0).map(|v| Duration::from_millis(v as u64));
        PlaybackState {
            elapsed: ms(self.media_cursor).unwrap_or_default(),
            duration: ms(self.media_duration),
            media: parse_media_state(&self.media_state),
        }
    }
}

pub fn parse_media_state(raw: &str) -> MediaState {
    match raw {
        "OBS_MEDIA_STATE_NONE" => MediaState::None,
        "OBS_MEDIA_STATE_PLAYING" => MediaState::Playing,
        "OBS_MEDIA_STATE_OPENING" => MediaState::Opening,
        "OBS_MEDIA_STATE_BUFFERING" => MediaState::Buffering,
        "OBS_MEDIA_STATE_PAUSED" => MediaState::Paused,
        "OBS_MEDIA_STATE_STOPPED" => MediaState::Stopped,
        "OBS_MEDIA_STATE_ENDED" => MediaState::Ended,
        "OBS_MEDIA_STATE_ERROR" => MediaState::Error,
        _ => MediaState::Unknown,
    }
}

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    BASE64.encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_matches_published_example() {
        let auth = auth_response(
            "supersecretpassword",
            "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
            "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=",
        );
        assert_eq!(auth, "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4=");
    }

    #[test]
    fn request_frame_shape() {
        let req = Request {
            request_type: "GetMediaInputStatus",
            request_id: "abc".into(),
            request_data: Some(json!({"inputName": "Media"})),
        };
        let text = encode(OP_REQUEST, &req).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["op"], 6);
        assert_eq!(v["d"]["requestType"], "GetMediaInputStatus");
        assert_eq!(v["d"]["requestId"], "abc");
        assert_eq!(v["d"]["requestData"]["inputName"], "Media");
    }

    #[test]
    fn identify_omits_missing_auth() {
        let text = encode(
            OP_IDENTIFY,
            &Identify {
                rpc_version: RPC_VERSION,
                authentication: None,
                event_subscriptions: 0,
            },
        )
        .unwrap();
        assert_eq!(text, r#"{"op":1,"d":{"rpcVersion":1,"eventSubscriptions":0}}"#);
    }

    #[test]
    fn hello_with_challenge_parses() {
        let env: Envelope = serde_json::from_value(json!({
            "op": 0,
            "d": {
                "obsWebSocketVersion": "5.1.0",
                "rpcVersion": 1,
                "authentication": {"challenge": "c", "salt": "s"}
            }
        }))
        .unwrap();
        assert_eq!(env.op, OP_HELLO);
        let hello: Hello = serde_json::from_value(env.d).unwrap();
        assert_eq!(hello.rpc_version, 1);
        assert_eq!(hello.authentication.unwrap().salt, "s");
    }

    #[test]
    fn media_status_maps_unknown_duration() {
        let st: MediaInputStatus = serde_json::from_value(json!({
            "mediaState": "OBS_MEDIA_STATE_OPENING",
            "mediaDuration": null,
            "mediaCursor": null
        }))
        .unwrap();
        let pb = st.into_playback_state();
        assert_eq!(pb.media, MediaState::Opening);
        assert_eq!(pb.duration, None);
        assert_eq!(pb.elapsed, Duration::ZERO);

        let st: MediaInputStatus = serde_json::from_value(json!({
            "mediaState": "OBS_MEDIA_STATE_ENDED",
            "mediaDuration": 1344000,
            "mediaCursor": 1344500
        }))
        .unwrap();
        let pb = st.into_playback_state();
        assert!(pb.at_end());
        assert_eq!(pb.duration, Some(Duration::from_secs(1344)));
    }
}
