//! Packet bodies exchanged by the bundled gateway and services.

use serde::{Deserialize, Serialize};

/// A logged-in connection as seen by backend services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub channel_id: String,
    pub gate_id: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub isp: String,
    #[serde(default)]
    pub remote_ip: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// First Binary frame a mesh client sends after dialing: who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerHandshakeReq {
    pub service_id: String,
}

/// Body of a `login.signin` request sent by an end-user client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginReq {
    pub account: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResp {
    pub channel_id: String,
}

/// Tells an older connection of the same account that it has been replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KickoutNotify {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResp {
    pub message: String,
}

/// Body of a `chat.user.talk` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReq {
    #[serde(default, rename = "type")]
    pub kind: i32,
    pub body: String,
    #[serde(default)]
    pub extra: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResp {
    pub message_id: u64,
    /// Unix milliseconds.
    pub send_time: u64,
}

/// A chat message as delivered to the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePush {
    pub message_id: u64,
    #[serde(rename = "type")]
    pub kind: i32,
    pub body: String,
    #[serde(default)]
    pub extra: String,
    pub sender: String,
    pub send_time: u64,
}
