//! Streaming `multipart/form-data` bodies
//!
//! The body is never assembled in memory: text parts and delimiters are small
//! owned frames, while the media part is emitted as `chunk_size` views into the
//! job's shared buffer. The exact length is known up front so the transport
//! can send `Content-Length` and report progress against it.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use memchr::memmem;
use uuid::Uuid;

const BOUNDARY_PREFIX: &str = "----flickd";
const CRLF: &str = "\r\n";

/// Attempts before giving up on finding a boundary absent from the payload
const MAX_BOUNDARY_ATTEMPTS: usize = 8;

/// Binary part of a multipart body
#[derive(Debug, Clone)]
pub struct FilePart {
    pub name: String,
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// A multipart body ready to stream
pub struct MultipartBody {
    boundary: String,
    frames: Vec<Bytes>,
    length: u64,
}

impl std::fmt::Debug for MultipartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartBody")
            .field("boundary", &self.boundary)
            .field("frames", &self.frames.len())
            .field("length", &self.length)
            .finish()
    }
}

impl MultipartBody {
    /// Build a body from text fields and one file part
    ///
    /// Returns `None` only if no boundary absent from the payload could be
    /// generated, which for random 128-bit boundaries does not happen in
    /// practice.
    pub fn build(
        fields: &[(String, String)],
        file: FilePart,
        chunk_size: usize,
    ) -> Option<Self> {
        let boundary = (0..MAX_BOUNDARY_ATTEMPTS)
            .map(|_| generate_boundary())
            .find(|candidate| !collides(candidate, fields, &file.data))?;

        let mut frames = Vec::new();
        for (name, value) in fields {
            frames.push(Bytes::from(format!(
                "--{b}{crlf}Content-Disposition: form-data; name=\"{n}\"{crlf}{crlf}{v}{crlf}",
                b = boundary,
                crlf = CRLF,
                n = quote_name(name),
                v = value,
            )));
        }

        frames.push(Bytes::from(format!(
            "--{b}{crlf}Content-Disposition: form-data; name=\"{n}\"; filename=\"{f}\"{crlf}Content-Type: {t}{crlf}{crlf}",
            b = boundary,
            crlf = CRLF,
            n = quote_name(&file.name),
            f = quote_name(&file.filename),
            t = file.content_type,
        )));

        let chunk_size = chunk_size.max(1);
        let data = file.data;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            frames.push(data.slice(offset..end));
            offset = end;
        }

        frames.push(Bytes::from(format!("{crlf}--{b}--{crlf}", b = boundary, crlf = CRLF)));

        let length = frames.iter().map(|frame| frame.len() as u64).sum();
        Some(Self {
            boundary,
            frames,
            length,
        })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value of the `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Exact body length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Consume into a stream of frames
    pub fn into_stream(self) -> BoxStream<'static, Bytes> {
        stream::iter(self.frames).boxed()
    }
}

fn generate_boundary() -> String {
    format!("{}{}", BOUNDARY_PREFIX, Uuid::new_v4().simple())
}

fn collides(boundary: &str, fields: &[(String, String)], data: &[u8]) -> bool {
    let finder = memmem::Finder::new(boundary.as_bytes());
    finder.find(data).is_some()
        || fields.iter().any(|(name, value)| {
            finder.find(name.as_bytes()).is_some() || finder.find(value.as_bytes()).is_some()
        })
}

fn quote_name(name: &str) -> String {
    name.replace('"', "%22").replace(['\r', '\n'], " ")
}
