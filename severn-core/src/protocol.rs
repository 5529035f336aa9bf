//! Wire protocol: newline-delimited JSON, one object per line in both
//! directions. Durations travel as integer nanosecond counts.

use std::io;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// A client request. Unknown fields are ignored; `op` is matched
/// case-insensitively by the router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub op: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    /// Time to live in nanoseconds; only meaningful for SET.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub expires_in: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Redirect,
}

/// A server response. Optional fields are omitted when empty; `ttl` is the
/// remaining time to live in nanoseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: String::new(),
            value: String::new(),
            ttl: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            value: String::new(),
            ttl: None,
        }
    }

    pub fn redirect(message: impl Into<String>) -> Self {
        Self {
            status: Status::Redirect,
            message: message.into(),
            value: String::new(),
            ttl: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Read the next frame, skipping blank lines. `Ok(None)` means EOF.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str(trimmed)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        return Ok(Some(parsed));
    }
}

/// Write one frame followed by a newline and flush.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded =
        serde_json::to_vec(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_fields_are_omitted() {
        let encoded = serde_json::to_string(&Response::success()).unwrap();
        assert_eq!(encoded, r#"{"status":"success"}"#);
    }

    #[test]
    fn populated_response_keeps_all_fields() {
        let encoded = serde_json::to_string(
            &Response::success().with_value("v").with_ttl(1_000_000_000),
        )
        .unwrap();
        assert_eq!(encoded, r#"{"status":"success","value":"v","ttl":1000000000}"#);
    }

    #[test]
    fn request_ignores_unknown_fields() {
        let req: Request =
            serde_json::from_str(r#"{"op":"GET","key":"k","shenanigans":true}"#).unwrap();
        assert_eq!(req.op, "GET");
        assert_eq!(req.key, "k");
        assert_eq!(req.expires_in, 0);
    }

    #[test]
    fn request_parses_nanosecond_ttl() {
        let req: Request =
            serde_json::from_str(r#"{"op":"SET","key":"k","value":"v","expires_in":3600000000000}"#)
                .unwrap();
        assert_eq!(req.expires_in, 3_600_000_000_000);
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        let req = Request {
            op: "SET".into(),
            key: "k".into(),
            value: "v with spaces".into(),
            expires_in: 42,
        };
        write_frame(&mut writer, &req).await.unwrap();

        let parsed: Request = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.key, "k");
        assert_eq!(parsed.value, "v with spaces");
        assert_eq!(parsed.expires_in, 42);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"\n\n").await.unwrap();
        write_frame(&mut writer, &Response::error("nope")).await.unwrap();

        let parsed: Response = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(parsed.status, Status::Error);
        assert_eq!(parsed.message, "nope");
    }
}
