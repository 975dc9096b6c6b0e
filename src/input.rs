//! Input resolution: turn whatever the client sent (file upload, URL,
//! base64 payload) into normalized `(bytes, mime type)`.

use crate::config::Settings;
use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use tracing::{debug, info};

/// The five document types the extraction pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeType {
    Pdf,
    Png,
    Jpg,
    Jpeg,
    Gif,
}

impl MimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Gif => "gif",
        }
    }

    /// IANA media type sent alongside the document in the model request.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }
}

/// Exactly one variant is present per request.
#[derive(Debug)]
pub enum DocumentInput {
    UploadedFile {
        bytes: Vec<u8>,
        /// Client-declared content type, used when sniffing is inconclusive.
        declared_type: Option<String>,
    },
    RemoteUrl(String),
    Base64Payload(String),
}

/// Raw content plus detected type, ready for the model request.
#[derive(Debug)]
pub struct NormalizedDocument {
    pub bytes: Vec<u8>,
    pub mime_type: MimeType,
}

/// Ordered magic-byte signature table, tested in sequence.
const MAGIC_SIGNATURES: [(&[u8], MimeType); 4] = [
    (b"%PDF", MimeType::Pdf),
    (b"\x89PNG", MimeType::Png),
    (b"\xff\xd8\xff", MimeType::Jpg),
    (b"GIF", MimeType::Gif),
];

/// Identify a document type from its leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<MimeType> {
    MAGIC_SIGNATURES
        .iter()
        .find(|(sig, _)| bytes.starts_with(sig))
        .map(|&(_, mime)| mime)
}

/// Map a declared content type (e.g. `application/pdf; charset=binary`)
/// to a supported mime type by substring.
pub fn mime_from_declared(content_type: &str) -> Option<MimeType> {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("pdf") {
        Some(MimeType::Pdf)
    } else if ct.contains("png") {
        Some(MimeType::Png)
    } else if ct.contains("jpeg") {
        Some(MimeType::Jpeg)
    } else if ct.contains("jpg") {
        Some(MimeType::Jpg)
    } else if ct.contains("gif") {
        Some(MimeType::Gif)
    } else {
        None
    }
}

/// Resolve a [`DocumentInput`] into a [`NormalizedDocument`].
///
/// Only the URL variant performs I/O; the other two are pure
/// transformations of the request payload.
pub async fn resolve(
    input: DocumentInput,
    client: &Client,
    settings: &Settings,
) -> Result<NormalizedDocument, ExtractError> {
    match input {
        DocumentInput::UploadedFile {
            bytes,
            declared_type,
        } => {
            check_size(bytes.len(), settings)?;

            // Content wins over what the client claims.
            let mime_type = sniff_mime(&bytes)
                .or_else(|| declared_type.as_deref().and_then(mime_from_declared))
                .ok_or_else(|| unsupported(&bytes, declared_type.as_deref()))?;

            debug!("Resolved uploaded file: {} bytes, {}", bytes.len(), mime_type.as_str());
            Ok(NormalizedDocument { bytes, mime_type })
        }

        DocumentInput::RemoteUrl(url) => {
            info!("Fetching document from URL: {}", url);

            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ExtractError::Fetch(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ExtractError::Fetch(format!(
                    "GET {} returned {}",
                    url, status
                )));
            }

            let declared = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let bytes = response
                .bytes()
                .await
                .map_err(|e| ExtractError::Fetch(e.to_string()))?;

            if bytes.len() > settings.max_document_bytes {
                return Err(ExtractError::Fetch(format!(
                    "document too large: {} bytes (limit {})",
                    bytes.len(),
                    settings.max_document_bytes
                )));
            }
            let bytes = bytes.to_vec();

            // Trust the server's content type first, then fall back to
            // sniffing the body.
            let mime_type = declared
                .as_deref()
                .and_then(mime_from_declared)
                .or_else(|| sniff_mime(&bytes))
                .ok_or_else(|| unsupported(&bytes, declared.as_deref()))?;

            debug!("Fetched {} bytes, {}", bytes.len(), mime_type.as_str());
            Ok(NormalizedDocument { bytes, mime_type })
        }

        DocumentInput::Base64Payload(payload) => {
            let bytes = BASE64.decode(payload.trim())?;
            check_size(bytes.len(), settings)?;

            // No declared type exists on this path; the magic bytes are
            // all we have.
            let mime_type = sniff_mime(&bytes).ok_or_else(|| unsupported(&bytes, None))?;

            debug!("Decoded base64 payload: {} bytes, {}", bytes.len(), mime_type.as_str());
            Ok(NormalizedDocument { bytes, mime_type })
        }
    }
}

fn check_size(len: usize, settings: &Settings) -> Result<(), ExtractError> {
    if len > settings.max_document_bytes {
        return Err(ExtractError::BadRequest(format!(
            "document too large: {} bytes (limit {})",
            len, settings.max_document_bytes
        )));
    }
    Ok(())
}

fn unsupported(bytes: &[u8], declared: Option<&str>) -> ExtractError {
    let header: Vec<u8> = bytes.iter().take(4).copied().collect();
    ExtractError::UnsupportedType(match declared {
        Some(ct) => format!("header {:02x?}, declared content type {:?}", header, ct),
        None => format!("header {:02x?}", header),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn test_sniff_all_supported_types() {
        assert_eq!(sniff_mime(b"%PDF-1.7 rest"), Some(MimeType::Pdf));
        assert_eq!(sniff_mime(PNG_HEADER), Some(MimeType::Png));
        assert_eq!(sniff_mime(b"\xff\xd8\xff\xe0JFIF"), Some(MimeType::Jpg));
        assert_eq!(sniff_mime(b"GIF89a"), Some(MimeType::Gif));
    }

    #[test]
    fn test_sniff_unknown_signature() {
        assert_eq!(sniff_mime(b"PK\x03\x04"), None);
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn test_png_magic_with_arbitrary_payload() {
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(sniff_mime(&bytes), Some(MimeType::Png));
    }

    #[test]
    fn test_declared_content_type_mapping() {
        assert_eq!(mime_from_declared("application/pdf"), Some(MimeType::Pdf));
        assert_eq!(
            mime_from_declared("image/jpeg; charset=binary"),
            Some(MimeType::Jpeg)
        );
        assert_eq!(mime_from_declared("IMAGE/PNG"), Some(MimeType::Png));
        assert_eq!(mime_from_declared("text/html"), None);
    }

    #[test]
    fn test_jpg_and_jpeg_share_media_type() {
        assert_eq!(MimeType::Jpg.media_type(), "image/jpeg");
        assert_eq!(MimeType::Jpeg.media_type(), "image/jpeg");
    }

    fn test_settings() -> Settings {
        Settings {
            api_key: "test".into(),
            model: "test-model".into(),
            port: 0,
            fetch_timeout: std::time::Duration::from_secs(1),
            max_document_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_base64_round_trip() {
        let original = {
            let mut b = b"%PDF-1.4".to_vec();
            b.extend_from_slice(&[0x00, 0x01, 0x02, 0xff]);
            b
        };
        let payload = BASE64.encode(&original);

        let doc = resolve(
            DocumentInput::Base64Payload(payload),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap();

        assert_eq!(doc.bytes, original);
        assert_eq!(doc.mime_type, MimeType::Pdf);
    }

    #[tokio::test]
    async fn test_base64_malformed_payload() {
        let err = resolve(
            DocumentInput::Base64Payload("not!!valid@@base64".into()),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::Decode(_)));
    }

    #[tokio::test]
    async fn test_base64_unsupported_content() {
        let payload = BASE64.encode(b"random bytes with no signature");
        let err = resolve(
            DocumentInput::Base64Payload(payload),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn test_upload_falls_back_to_declared_type() {
        // Truncated JPEG that defeats sniffing, but the client told us.
        let doc = resolve(
            DocumentInput::UploadedFile {
                bytes: b"\xff\xd8".to_vec(),
                declared_type: Some("image/jpeg".into()),
            },
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap();

        assert_eq!(doc.mime_type, MimeType::Jpeg);
    }

    #[tokio::test]
    async fn test_upload_sniff_beats_declared_type() {
        let doc = resolve(
            DocumentInput::UploadedFile {
                bytes: b"%PDF-1.7".to_vec(),
                declared_type: Some("image/png".into()),
            },
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap();

        assert_eq!(doc.mime_type, MimeType::Pdf);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let mut bytes = b"%PDF-1.7".to_vec();
        bytes.resize(2048, 0); // limit in test_settings is 1024

        let err = resolve(
            DocumentInput::UploadedFile {
                bytes,
                declared_type: None,
            },
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_oversized_base64_payload_rejected() {
        let mut raw = b"%PDF-1.7".to_vec();
        raw.resize(2048, 0);

        let err = resolve(
            DocumentInput::Base64Payload(BASE64.encode(&raw)),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::BadRequest(_)));
    }

    /// Serve a single canned HTTP response on an ephemeral local port.
    async fn serve_once(response: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_url_fetch_404_fails() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string(),
        )
        .await;

        let err = resolve(
            DocumentInput::RemoteUrl(url),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_url_fetch_declared_type_wins_over_sniff() {
        let body = "%PDF-1.7";
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\ncontent-type: image/png\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let doc = resolve(
            DocumentInput::RemoteUrl(url),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap();

        assert_eq!(doc.mime_type, MimeType::Png);
        assert_eq!(doc.bytes, body.as_bytes());
    }

    #[tokio::test]
    async fn test_url_fetch_oversized_body_rejected() {
        let body = "%PDF-1.7".to_string() + &"a".repeat(2040); // 2048 > 1024 limit
        let url = serve_once(format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/pdf\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let err = resolve(
            DocumentInput::RemoteUrl(url),
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_upload_undetectable_fails() {
        let err = resolve(
            DocumentInput::UploadedFile {
                bytes: b"plain text".to_vec(),
                declared_type: Some("text/plain".into()),
            },
            &Client::new(),
            &test_settings(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::UnsupportedType(_)));
    }
}
