use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::{MAX_DAP_HEADER_LINE_BYTES, MAX_DAP_MESSAGE_BYTES};
use crate::error::{Error, Result};

/// Reads `Content-Length` framed JSON messages.
///
/// ```text
/// Content-Length: 123\r\n
/// \r\n
/// { ...json... }
/// ```
pub struct DapReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> DapReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Next message body, or `None` on a clean EOF between messages
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header_line = false;
        let mut line = String::new();

        loop {
            line.clear();
            let n = (&mut self.reader)
                .take(MAX_DAP_HEADER_LINE_BYTES as u64)
                .read_line(&mut line)
                .await?;
            if n == 0 {
                if !saw_header_line {
                    return Ok(None);
                }
                return Err(Error::Protocol("EOF while reading DAP headers".to_string()));
            }
            if !line.ends_with('\n') && n >= MAX_DAP_HEADER_LINE_BYTES {
                return Err(Error::Protocol(format!(
                    "DAP header line exceeds maximum size ({MAX_DAP_HEADER_LINE_BYTES} bytes)"
                )));
            }
            saw_header_line = true;

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                continue;
            };

            if name.eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse::<usize>().map_err(|e| {
                    Error::Protocol(format!("invalid Content-Length {value:?}: {e}"))
                })?);
            }
        }

        let Some(len) = content_length else {
            return Err(Error::Protocol(
                "DAP message missing Content-Length header".to_string(),
            ));
        };

        if len > MAX_DAP_MESSAGE_BYTES {
            return Err(Error::Protocol(format!(
                "DAP message Content-Length {len} exceeds maximum allowed size {MAX_DAP_MESSAGE_BYTES}"
            )));
        }

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(Some(serde_json::from_slice::<Value>(&buf)?))
    }
}

pub struct DapWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> DapWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let bytes = serde_json::to_vec(message)?;
        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_writer_output_is_readable() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = DapWriter::new(client);
        let mut reader = DapReader::new(server);

        let msg = json!({"seq": 1, "type": "request", "command": "threads"});
        writer.write_message(&msg).await.unwrap();
        drop(writer);

        assert_eq!(reader.read_value().await.unwrap(), Some(msg));
        assert_eq!(reader.read_value().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_header_names_are_case_insensitive() {
        let body = br#"{"seq":3,"type":"event","event":"initialized"}"#;
        let mut framed = format!("content-length: {}\r\n\r\n", body.len()).into_bytes();
        framed.extend_from_slice(body);

        let mut reader = DapReader::new(&framed[..]);
        let value = reader.read_value().await.unwrap().unwrap();
        assert_eq!(value["event"], "initialized");
    }

    #[tokio::test]
    async fn test_missing_content_length_is_rejected() {
        let framed = b"X-Other: 1\r\n\r\n{}";
        let mut reader = DapReader::new(&framed[..]);
        assert!(matches!(
            reader.read_value().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let framed = format!("Content-Length: {}\r\n\r\n", MAX_DAP_MESSAGE_BYTES + 1);
        let mut reader = DapReader::new(framed.as_bytes());
        assert!(matches!(
            reader.read_value().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_headers_are_an_error() {
        let framed = b"Content-Length: 10\r\n";
        let mut reader = DapReader::new(&framed[..]);
        assert!(reader.read_value().await.is_err());
    }
}
