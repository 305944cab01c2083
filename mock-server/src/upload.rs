//! Reads the single-part `multipart/form-data` body of a container upload.
//!
//! The service tolerates a leading CRLF before the first boundary and
//! unquoted disposition parameters, so this reader does too.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn param<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k.eq_ignore_ascii_case(key)).then(|| v.trim().trim_matches('"'))
    })
}

pub fn boundary(content_type: &str) -> Option<&str> {
    let (kind, _) = content_type.split_once(';')?;
    if !kind.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    param(content_type, "boundary").filter(|b| !b.is_empty())
}

/// Extract the part named `upload`.
pub fn parse(content_type: &str, body: &[u8]) -> Option<Upload> {
    let boundary = boundary(content_type)?;
    let opening = format!("--{boundary}\r\n");
    let closing = format!("\r\n--{boundary}");

    let start = position(body, opening.as_bytes())? + opening.len();
    let part = &body[start..];
    let header_end = position(part, b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&part[..header_end]).ok()?;
    let content = &part[header_end + 4..];
    let content_end = position(content, closing.as_bytes())?;

    let mut disposition = None;
    let mut mime_type = "application/octet-stream".to_string();
    for line in headers.split("\r\n") {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-disposition") {
            disposition = Some(value.trim());
        } else if name.eq_ignore_ascii_case("content-type") {
            mime_type = value.trim().to_string();
        }
    }

    let disposition = disposition?;
    if param(disposition, "name")? != "upload" {
        return None;
    }
    Some(Upload {
        file_name: param(disposition, "filename")?.to_string(),
        mime_type,
        bytes: content[..content_end].to_vec(),
    })
}
