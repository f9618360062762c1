//! `multipart/form-data` bodies.

use std::borrow::Cow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::{BodyEncoder, ContentType};
use crate::BoxError;

const NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A multipart form, encoded in memory.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

/// A single field of a [`MultipartForm`].
#[derive(Debug, Clone)]
pub struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<ContentType>,
    value: Bytes,
}

impl Part {
    /// A text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Part {
            name: name.into(),
            file_name: None,
            content_type: None,
            value: Bytes::from(value.into()),
        }
    }

    /// A binary field.
    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Part {
            name: name.into(),
            file_name: None,
            content_type: Some(ContentType::Binary),
            value: value.into(),
        }
    }

    /// Set the file name reported for this part.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Set the content type of this part.
    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    fn write_headers(&self, buf: &mut BytesMut) {
        buf.put_slice(b"Content-Disposition: form-data; ");
        match Cow::from(utf8_percent_encode(&self.name, NAME_ENCODE_SET)) {
            Cow::Borrowed(name) => {
                buf.put_slice(b"name=\"");
                buf.put_slice(name.as_bytes());
                buf.put_slice(b"\"");
            }
            Cow::Owned(name) => {
                buf.put_slice(b"name*=utf-8''");
                buf.put_slice(name.as_bytes());
            }
        }

        if let Some(file_name) = &self.file_name {
            let escaped = file_name
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\r', "\\\r")
                .replace('\n', "\\\n");
            buf.put_slice(b"; filename=\"");
            buf.put_slice(escaped.as_bytes());
            buf.put_slice(b"\"");
        }

        if let Some(content_type) = &self.content_type {
            buf.put_slice(b"\r\nContent-Type: ");
            buf.put_slice(content_type.as_str().as_bytes());
        }
    }
}

impl MultipartForm {
    /// An empty form with a fresh boundary.
    pub fn new() -> Self {
        MultipartForm {
            boundary: boundary(),
            parts: Vec::new(),
        }
    }

    /// Add a part to the form.
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    /// Add a text field to the form.
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(Part::text(name, value))
    }

    /// The boundary separating parts.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Encode the form into a single buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in &self.parts {
            buf.put_slice(b"--");
            buf.put_slice(self.boundary.as_bytes());
            buf.put_slice(b"\r\n");
            part.write_headers(&mut buf);
            buf.put_slice(b"\r\n\r\n");
            buf.put_slice(&part.value);
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"--");
        buf.put_slice(self.boundary.as_bytes());
        buf.put_slice(b"--\r\n");
        buf.freeze()
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl BodyEncoder for MultipartForm {
    fn content_type(&self) -> ContentType {
        ContentType::Custom(format!("multipart/form-data; boundary={}", self.boundary))
    }

    fn encode(&self) -> Result<Bytes, BoxError> {
        Ok(MultipartForm::encode(self))
    }
}

fn boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let state = RandomState::new();
    let mut words = [0u64; 4];
    for word in words.iter_mut() {
        let mut hasher = state.build_hasher();
        hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
        *word = hasher.finish();
    }
    let [a, b, c, d] = words;
    format!("{a:016x}-{b:016x}-{c:016x}-{d:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_parts_between_boundaries() {
        let form = MultipartForm::new()
            .text("title", "leaves")
            .part(Part::bytes("file", &b"\x00\x01"[..]).file_name("a.bin"));
        let boundary = form.boundary().to_owned();

        let expected = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             leaves\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             \x00\x01\r\n\
             --{boundary}--\r\n"
        );
        assert_eq!(form.encode(), Bytes::from(expected));
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(MultipartForm::new().boundary(), MultipartForm::new().boundary());
        assert!(BodyEncoder::content_type(&MultipartForm::new())
            .as_str()
            .starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn non_ascii_names_are_percent_encoded() {
        let form = MultipartForm::new().text("año", "x");
        let encoded = form.encode();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.contains("name*=utf-8''a%C3%B1o"));
    }
}
