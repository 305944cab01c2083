//! Container field uploads: mime sniffing and multipart framing.

/// Fallback when sniffing is disabled or the leading byte is unknown.
pub const OCTET_STREAM: &str = "application/octet-stream";

const SIGNATURES: &[(u8, &str)] = &[
    (0xFF, "image/jpeg"),
    (0x89, "image/png"),
    (0x47, "image/gif"),
    (0x49, "image/tiff"),
    (0x4D, "image/tiff"),
    (0x25, "application/pdf"),
    (0xD0, "application/vnd"),
    (0x46, "text/plain"),
];

/// Guess a mime type from the first byte of a file.
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    bytes
        .first()
        .and_then(|lead| SIGNATURES.iter().find(|(sig, _)| sig == lead))
        .map_or(OCTET_STREAM, |&(_, mime)| mime)
}

pub fn mime_type_for(bytes: &[u8], infer: bool) -> &'static str {
    if infer {
        sniff_mime_type(bytes)
    } else {
        OCTET_STREAM
    }
}

/// Frame a single `upload` part.
///
/// The layout is fixed by what the service accepts: a leading CRLF, an
/// unquoted disposition, and a closing boundary followed by CRLF.
pub fn multipart_body(boundary: &str, file_name: &str, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let head = format!(
        "\r\n--{boundary}\r\n\
         Content-Disposition: form-data; name=upload; filename={file_name}\r\n\
         Content-Type: {mime_type}\r\n\r\n"
    );
    let tail = format!("\r\n--{boundary}--\r\n");

    let mut body = Vec::with_capacity(head.len() + bytes.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(tail.as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_signature() {
        assert_eq!(sniff_mime_type(&[0x89, b'P', b'N', b'G']), "image/png");
        assert_eq!(mime_type_for(&[0x89, b'P'], true), "image/png");
    }

    #[test]
    fn inference_disabled_is_always_octet_stream() {
        assert_eq!(mime_type_for(&[0x89, b'P'], false), OCTET_STREAM);
        assert_eq!(mime_type_for(&[0xFF, 0xD8], false), OCTET_STREAM);
    }

    #[test]
    fn unknown_and_empty_fall_back() {
        assert_eq!(sniff_mime_type(&[0x00, 0x01]), OCTET_STREAM);
        assert_eq!(sniff_mime_type(&[]), OCTET_STREAM);
    }

    #[test]
    fn both_tiff_byte_orders() {
        assert_eq!(sniff_mime_type(b"II*\0"), "image/tiff");
        assert_eq!(sniff_mime_type(b"MM\0*"), "image/tiff");
    }

    #[test]
    fn multipart_framing_is_exact() {
        let body = multipart_body("XYZ", "a.txt", "text/plain", b"File");
        let expected = "\r\n--XYZ\r\n\
                        Content-Disposition: form-data; name=upload; filename=a.txt\r\n\
                        Content-Type: text/plain\r\n\r\n\
                        File\r\n--XYZ--\r\n";
        assert_eq!(body, expected.as_bytes());
    }

    #[test]
    fn multipart_keeps_binary_content() {
        let payload = [0x89, 0x00, 0xFF, 0x0D, 0x0A];
        let body = multipart_body("b", "x.png", "image/png", &payload);
        assert!(body.windows(payload.len()).any(|w| w == payload));
    }
}
