//! Structured channel: the RouterOS binary API protocol.
//!
//! Sentences are sequences of length-prefixed words terminated by a zero
//! length. Replies come back as `!re` record sentences followed by `!done`,
//! or `!trap`/`!fatal` on errors. Login uses the post-6.43 plain form.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::transport::{ChannelError, Params, Record, RosAction, StructuredChannel};

enum ApiStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ApiStream {
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            ApiStream::Plain(s) => s.write_all(buf).await,
            ApiStream::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ApiStream::Plain(s) => s.flush().await,
            ApiStream::Tls(s) => s.flush().await,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            ApiStream::Plain(s) => s.read_exact(buf).await.map(|_| ()),
            ApiStream::Tls(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            ApiStream::Plain(s) => s.shutdown().await,
            ApiStream::Tls(s) => s.shutdown().await,
        }
    }
}

pub struct ApiChannel {
    stream: ApiStream,
    timeout: Duration,
}

impl ApiChannel {
    /// Opens the TCP (or TLS) stream and logs in. The whole handshake is
    /// bounded by `timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        use_tls: bool,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let handshake = async {
            let tcp = TcpStream::connect((host, port)).await?;
            let stream = if use_tls {
                tls_stream(host, tcp).await?
            } else {
                ApiStream::Plain(tcp)
            };
            let mut channel = ApiChannel { stream, timeout };
            channel.login(username, password).await?;
            Ok::<_, ChannelError>(channel)
        };
        match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(timeout)),
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> Result<(), ChannelError> {
        let words = vec![
            "/login".to_string(),
            format!("=name={username}"),
            format!("=password={password}"),
        ];
        self.write_sentence(&words).await?;
        self.read_response().await?;
        debug!("RouterOS API login accepted.");
        Ok(())
    }

    async fn write_sentence(&mut self, words: &[String]) -> Result<(), ChannelError> {
        let mut buf = Vec::new();
        for word in words {
            buf.extend_from_slice(&encode_length(word.len() as u32));
            buf.extend_from_slice(word.as_bytes());
        }
        buf.push(0);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_length(&mut self) -> Result<u32, ChannelError> {
        let mut first = [0u8; 1];
        self.stream.read_exact(&mut first).await?;
        let (mut value, extra) = length_prefix(first[0])?;
        for _ in 0..extra {
            let mut byte = [0u8; 1];
            self.stream.read_exact(&mut byte).await?;
            value = (value << 8) | u32::from(byte[0]);
        }
        Ok(value)
    }

    async fn read_sentence(&mut self) -> Result<Vec<String>, ChannelError> {
        let mut words = Vec::new();
        loop {
            let len = self.read_length().await?;
            if len == 0 {
                return Ok(words);
            }
            let mut buf = vec![0u8; len as usize];
            self.stream.read_exact(&mut buf).await?;
            words.push(String::from_utf8_lossy(&buf).into_owned());
        }
    }

    /// Reads reply sentences until `!done`, collecting `!re` records. A
    /// `!trap` is remembered and surfaced after the terminating `!done`.
    async fn read_response(&mut self) -> Result<Vec<Record>, ChannelError> {
        let mut records = Vec::new();
        let mut trap: Option<String> = None;
        loop {
            let sentence = self.read_sentence().await?;
            let Some(reply) = sentence.first() else {
                continue;
            };
            match reply.as_str() {
                "!re" => records.push(words_to_record(&sentence[1..])),
                "!done" => break,
                "!trap" => {
                    let record = words_to_record(&sentence[1..]);
                    trap = Some(
                        record
                            .get("message")
                            .cloned()
                            .unwrap_or_else(|| "unspecified trap".to_string()),
                    );
                }
                "!fatal" => {
                    let detail = sentence.get(1).cloned().unwrap_or_default();
                    return Err(ChannelError::Protocol(format!("fatal reply: {detail}")));
                }
                other => {
                    return Err(ChannelError::Protocol(format!(
                        "unexpected reply word '{other}'"
                    )));
                }
            }
        }
        match trap {
            Some(message) => Err(ChannelError::Trap(message)),
            None => Ok(records),
        }
    }

    async fn run(
        &mut self,
        path: &str,
        action: RosAction,
        params: &Params,
        filter: &Params,
    ) -> Result<Vec<Record>, ChannelError> {
        let base = format!("/{}", path.trim_matches('/'));
        let mut words = vec![format!("{base}/{action}")];
        match action {
            RosAction::Print => {
                for (key, value) in filter {
                    words.push(format!("?{key}={value}"));
                }
            }
            RosAction::Add | RosAction::Remove => {
                for (key, value) in params {
                    words.push(format!("={key}={value}"));
                }
            }
        }
        self.write_sentence(&words).await?;
        self.read_response().await
    }
}

#[async_trait::async_trait]
impl StructuredChannel for ApiChannel {
    async fn execute(
        &mut self,
        path: &str,
        action: RosAction,
        params: &Params,
        filter: &Params,
    ) -> Result<Vec<Record>, ChannelError> {
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.run(path, action, params, filter)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout(timeout)),
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

async fn tls_stream(host: &str, tcp: TcpStream) -> Result<ApiStream, ChannelError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| ChannelError::Protocol(format!("invalid TLS server name: {e}")))?;
    let stream = connector.connect(server_name, tcp).await?;
    Ok(ApiStream::Tls(Box::new(stream)))
}

/// RouterOS variable-length word length encoding.
fn encode_length(len: u32) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![
            0xF0,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ]
    }
}

/// Decodes the first byte of a length prefix into its initial value and the
/// number of continuation bytes that follow.
fn length_prefix(byte: u8) -> Result<(u32, usize), ChannelError> {
    if byte < 0x80 {
        Ok((u32::from(byte), 0))
    } else if byte & 0xC0 == 0x80 {
        Ok((u32::from(byte & 0x3F), 1))
    } else if byte & 0xE0 == 0xC0 {
        Ok((u32::from(byte & 0x1F), 2))
    } else if byte & 0xF0 == 0xE0 {
        Ok((u32::from(byte & 0x0F), 3))
    } else if byte == 0xF0 {
        Ok((0, 4))
    } else {
        Err(ChannelError::Protocol(format!(
            "reserved length control byte {byte:#04x}"
        )))
    }
}

/// Converts `=key=value` attribute words into a record.
fn words_to_record(words: &[String]) -> Record {
    let mut record = Record::new();
    for word in words {
        if let Some(rest) = word.strip_prefix('=') {
            if let Some((key, value)) = rest.split_once('=') {
                record.insert(key.to_string(), value.to_string());
            }
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(len: u32) {
        let encoded = encode_length(len);
        let (initial, extra) = length_prefix(encoded[0]).unwrap();
        assert_eq!(encoded.len(), extra + 1, "length {len}");
        let mut value = initial;
        for byte in &encoded[1..] {
            value = (value << 8) | u32::from(*byte);
        }
        assert_eq!(value, len);
    }

    #[test]
    fn length_encoding_round_trips_at_boundaries() {
        for len in [
            0, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000, 0xFFF_FFFF, 0x1000_0000,
            0x7FFF_FFFF,
        ] {
            round_trip(len);
        }
    }

    #[test]
    fn one_byte_lengths_stay_compact() {
        assert_eq!(encode_length(0x45), vec![0x45]);
        assert_eq!(encode_length(0x80), vec![0x80, 0x80]);
    }

    #[test]
    fn reserved_control_byte_is_an_error() {
        assert!(matches!(
            length_prefix(0xF8),
            Err(ChannelError::Protocol(_))
        ));
    }

    #[test]
    fn attribute_words_become_records() {
        let words = vec![
            "=.id=*7".to_string(),
            "=address=10.0.0.5".to_string(),
            "=list=WhiteList".to_string(),
            "not-an-attribute".to_string(),
        ];
        let record = words_to_record(&words);
        assert_eq!(record.get(".id").map(String::as_str), Some("*7"));
        assert_eq!(record.get("address").map(String::as_str), Some("10.0.0.5"));
        assert_eq!(record.get("list").map(String::as_str), Some("WhiteList"));
        assert_eq!(record.len(), 3);
    }
}
