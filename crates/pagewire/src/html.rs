// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Document HTML returned by `render()` hooks.
//!
//! A render hook never returns a bare string: it wraps its output in a
//! [`DocumentHtml`], either escaped text, trusted markup, or a stream.

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::UsageError;

/// A web-style stream of HTML chunks.
pub type HtmlStream = BoxStream<'static, Result<Bytes, io::Error>>;

/// A byte reader producing HTML.
pub type HtmlReader = Pin<Box<dyn AsyncRead + Send>>;

/// HTML produced by a render hook.
pub struct DocumentHtml {
    body: HtmlBody,
}

pub(crate) enum HtmlBody {
    Text(String),
    WebStream(HtmlStream),
    NodeStream(HtmlReader),
}

impl HtmlBody {
    /// Reads the whole body, draining a stream if there is one.
    pub(crate) async fn read_all(self) -> io::Result<String> {
        match self {
            HtmlBody::Text(s) => Ok(s),
            HtmlBody::WebStream(mut stream) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            }
            HtmlBody::NodeStream(mut reader) => {
                let mut s = String::new();
                reader.read_to_string(&mut s).await?;
                Ok(s)
            }
        }
    }
}

impl DocumentHtml {
    /// HTML-escapes `text` and wraps it.
    pub fn escape(text: &str) -> Self {
        Self {
            body: HtmlBody::Text(escape_html(text)),
        }
    }

    /// Wraps markup that is trusted as-is.
    pub fn dangerously_skip_escape(html: impl Into<String>) -> Self {
        Self {
            body: HtmlBody::Text(html.into()),
        }
    }

    /// Wraps a stream of HTML chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Self {
            body: HtmlBody::WebStream(stream.boxed()),
        }
    }

    /// Wraps a reader producing HTML.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            body: HtmlBody::NodeStream(Box::pin(reader)),
        }
    }

    /// Joins already-built parts into one document.
    ///
    /// Streamed parts cannot be joined.
    pub fn concat<I>(parts: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = DocumentHtml>,
    {
        let mut out = String::new();
        for part in parts {
            match part.body {
                HtmlBody::Text(s) => out.push_str(&s),
                _ => return Err(UsageError::new("Cannot concatenate a streamed `DocumentHtml`")),
            }
        }
        Ok(Self {
            body: HtmlBody::Text(out),
        })
    }

    /// Returns the HTML if it is not streamed.
    pub fn as_str(&self) -> Option<&str> {
        match &self.body {
            HtmlBody::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the HTML is streamed.
    pub fn is_stream(&self) -> bool {
        !matches!(self.body, HtmlBody::Text(_))
    }

    /// Collects the whole document into a string.
    pub async fn into_string(self) -> io::Result<String> {
        self.body.read_all().await
    }

    pub(crate) fn into_body(self) -> HtmlBody {
        self.body
    }
}

impl fmt::Debug for DocumentHtml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            HtmlBody::Text(s) => f.debug_tuple("DocumentHtml").field(s).finish(),
            HtmlBody::WebStream(_) => f.write_str("DocumentHtml(<web stream>)"),
            HtmlBody::NodeStream(_) => f.write_str("DocumentHtml(<reader>)"),
        }
    }
}

/// Escapes `& < > " '` for inclusion in HTML text or attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
