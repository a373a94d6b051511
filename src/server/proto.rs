//! Wire protocol: length-prefixed JSON frames
//!
//! Every message is a 4-byte big-endian length followed by that many bytes of
//! JSON. A clean disconnect between frames is normal; a truncated frame, a
//! zero length, or a length above [`MAX_FRAME_LEN`] is a protocol error and
//! ends the connection.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{ModelMuxError, Result};
use crate::model::FeatureValue;

/// Upper bound on a single frame. Scoring requests are small; anything this
/// large is a corrupt or hostile length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// One feature vector scored against many models.
    Score {
        model_ids: Vec<Uuid>,
        features: Vec<FeatureValue>,
    },
    /// Many feature vectors scored against one model.
    ScoreBatch {
        model_id: Uuid,
        instances: Vec<Vec<FeatureValue>>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok { scores: Vec<Vec<f64>> },
    Error { kind: String, message: String },
}

impl Response {
    pub fn from_result(result: Result<Vec<Vec<f64>>>) -> Self {
        match result {
            Ok(scores) => Response::Ok { scores },
            Err(e) => Response::Error {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Read one frame. Returns `Ok(None)` on a clean disconnect before the
/// length prefix; any mid-frame truncation or bad length is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(ModelMuxError::Protocol("zero-length frame".to_string()));
    }
    if len > MAX_FRAME_LEN {
        return Err(ModelMuxError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| ModelMuxError::Protocol("frame too large to encode".to_string()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub fn decode_request(payload: &[u8]) -> Result<Request> {
    serde_json::from_slice(payload)
        .map_err(|e| ModelMuxError::Protocol(format!("malformed request: {e}")))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let request = Request::Score {
            model_ids: vec![Uuid::new_v4()],
            features: vec![FeatureValue::Number(1.5), FeatureValue::Symbol("a".into())],
        };
        let payload = serde_json::to_vec(&request).unwrap();

        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).await.unwrap();

        let mut reader = wire.as_slice();
        let read = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(read, payload);
        assert!(matches!(decode_request(&read).unwrap(), Request::Score { .. }));
    }

    #[tokio::test]
    async fn test_clean_disconnect_is_none() {
        let mut reader: &[u8] = &[];
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_error() {
        // Length prefix promises 100 bytes, only 3 arrive.
        let mut wire = 100u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let mut reader = wire.as_slice();
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_length_is_protocol_error() {
        let wire = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ModelMuxError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_length_is_protocol_error() {
        let wire = 0u32.to_be_bytes().to_vec();
        let mut reader = wire.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ModelMuxError::Protocol(_))
        ));
    }

    #[test]
    fn test_malformed_json_is_protocol_error() {
        assert!(matches!(
            decode_request(b"{not json"),
            Err(ModelMuxError::Protocol(_))
        ));
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response =
            Response::from_result(Err(ModelMuxError::ModelNotFound(Uuid::new_v4())));
        match response {
            Response::Error { kind, .. } => assert_eq!(kind, "model_not_found"),
            Response::Ok { .. } => panic!("expected error response"),
        }
    }
}
