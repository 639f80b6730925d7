// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! HTTP response produced by a render call.
//!
//! This module provides a platform-agnostic response type. Adapters read the
//! body through the accessor matching the form the render hook produced:
//!
//! ```rust
//! use pagewire::HttpResponse;
//!
//! let response = HttpResponse::html(200, "<h1>Hello</h1>");
//! assert_eq!(response.status_code(), 200);
//! assert_eq!(response.content_type(), "text/html");
//! assert_eq!(response.body().unwrap(), "<h1>Hello</h1>");
//! ```

use std::fmt;

use bytes::Bytes;
use futures_util::sink::{Sink, SinkExt};
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ResponseError, UsageError};
use crate::hooks::RenderedHtml;
use crate::html::{HtmlBody, HtmlReader, HtmlStream};

/// Content type of HTML responses.
pub const CONTENT_TYPE_HTML: &str = "text/html";

/// Content type of data-request responses.
pub const CONTENT_TYPE_JSON: &str = "application/json";


/// A platform-agnostic HTTP response.
pub struct HttpResponse {
    status_code: u16,
    content_type: &'static str,
    body: HtmlBody,
}

impl HttpResponse {
    /// Creates an HTML response.
    pub fn html(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            content_type: CONTENT_TYPE_HTML,
            body: HtmlBody::Text(body.into()),
        }
    }

    /// Creates a JSON response.
    pub fn json(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            content_type: CONTENT_TYPE_JSON,
            body: HtmlBody::Text(body.into()),
        }
    }

    /// Builds the response for rendered HTML, or `None` if the render hook
    /// returned no document.
    pub(crate) fn from_rendered(rendered: RenderedHtml, status_code: u16) -> Option<Self> {
        let body = rendered.html?.into_body();
        Some(Self {
            status_code,
            content_type: CONTENT_TYPE_HTML,
            body,
        })
    }

    /// HTTP status code.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Value of the `Content-Type` header.
    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Whether the body is streamed.
    pub fn is_stream(&self) -> bool {
        !matches!(self.body, HtmlBody::Text(_))
    }

    /// The body, if it is not streamed.
    pub fn body(&self) -> Result<&str, UsageError> {
        match &self.body {
            HtmlBody::Text(s) => Ok(s),
            _ => Err(UsageError::new(
                "`httpResponse.body` is not available: the `render()` hook returned a stream. Use `get_body()` or a streaming accessor instead.",
            )),
        }
    }

    /// Collects the body into a string, reading the stream if there is one.
    pub async fn get_body(self) -> Result<String, ResponseError> {
        Ok(self.body.read_all().await?)
    }

    /// The body as a web-style stream.
    pub fn get_web_stream(self) -> Result<HtmlStream, UsageError> {
        match self.body {
            HtmlBody::WebStream(stream) => Ok(stream),
            _ => Err(incompatible("get_web_stream()", "a web stream")),
        }
    }

    /// The body as a reader.
    pub fn get_node_stream(self) -> Result<HtmlReader, UsageError> {
        match self.body {
            HtmlBody::NodeStream(reader) => Ok(reader),
            _ => Err(incompatible("get_node_stream()", "a reader")),
        }
    }

    /// The body as a byte stream, whichever form the render hook produced.
    ///
    /// Server adapters use this to forward any body without buffering it.
    pub fn into_byte_stream(self) -> HtmlStream {
        match self.body {
            HtmlBody::Text(s) => stream::once(async move { Ok(Bytes::from(s)) }).boxed(),
            HtmlBody::WebStream(stream) => stream,
            HtmlBody::NodeStream(reader) => stream::try_unfold(reader, |mut reader| async move {
                let mut buf = vec![0u8; 8 * 1024];
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    return Ok::<_, std::io::Error>(None);
                }
                buf.truncate(n);
                Ok(Some((Bytes::from(buf), reader)))
            })
            .boxed(),
        }
    }

    /// Forwards a web-stream body into `sink`, then closes it.
    pub async fn pipe_to_web_writable<W>(self, mut sink: W) -> Result<(), ResponseError>
    where
        W: Sink<Bytes, Error = std::io::Error> + Unpin,
    {
        let HtmlBody::WebStream(mut stream) = self.body else {
            return Err(incompatible("pipe_to_web_writable()", "a web stream").into());
        };
        while let Some(chunk) = stream.next().await {
            sink.send(chunk?).await?;
        }
        sink.close().await?;
        Ok(())
    }

    /// Copies a reader body into `writer`, then flushes it.
    pub async fn pipe_to_node_writable<W>(self, mut writer: W) -> Result<(), ResponseError>
    where
        W: AsyncWrite + Unpin,
    {
        let HtmlBody::NodeStream(mut reader) = self.body else {
            return Err(incompatible("pipe_to_node_writable()", "a reader").into());
        };
        tokio::io::copy(&mut reader, &mut writer).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn incompatible(accessor: &str, expected: &str) -> UsageError {
    UsageError::new(format!(
        "`httpResponse.{}` requires the `render()` hook to return {} (`DocumentHtml::from_stream()` or `DocumentHtml::from_reader()`)",
        accessor, expected
    ))
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            HtmlBody::Text(s) => s.as_str(),
            HtmlBody::WebStream(_) => "<web stream>",
            HtmlBody::NodeStream(_) => "<reader>",
        };
        f.debug_struct("HttpResponse")
            .field("status_code", &self.status_code)
            .field("content_type", &self.content_type)
            .field("body", &body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::DocumentHtml;
    use futures_util::stream;

    fn rendered(html: DocumentHtml) -> RenderedHtml {
        RenderedHtml {
            html: Some(html),
            render_file_path: "/pages/a.page.server.lua".into(),
        }
    }

    #[test]
    fn test_null_html_gives_no_response() {
        let none = RenderedHtml {
            html: None,
            render_file_path: "/x".into(),
        };
        assert!(HttpResponse::from_rendered(none, 200).is_none());
    }

    #[test]
    fn test_json_response() {
        let response = HttpResponse::json(500, r#"{"serverSideError":true}"#);
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.content_type(), CONTENT_TYPE_JSON);
    }

    #[tokio::test]
    async fn test_stream_accessors() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(b"<p>streamed</p>"))];
        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::from_stream(stream::iter(chunks))), 200).unwrap();
        assert!(response.is_stream());
        assert!(response.body().is_err());
        assert_eq!(response.get_body().await.unwrap(), "<p>streamed</p>");
    }

    #[tokio::test]
    async fn test_incompatible_accessor_is_usage_error() {
        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::dangerously_skip_escape("<p/>")), 200).unwrap();
        assert!(response.get_web_stream().is_err());

        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::dangerously_skip_escape("<p/>")), 200).unwrap();
        let mut out = Vec::new();
        let err = response.pipe_to_node_writable(&mut out).await.unwrap_err();
        assert!(matches!(err, ResponseError::Usage(_)));
    }

    #[tokio::test]
    async fn test_pipe_to_node_writable() {
        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::from_reader(&b"<html/>"[..])), 200).unwrap();
        let mut out: Vec<u8> = Vec::new();
        response.pipe_to_node_writable(&mut out).await.unwrap();
        assert_eq!(out, b"<html/>");
    }

    #[tokio::test]
    async fn test_byte_stream_of_every_body() {
        let text = HttpResponse::html(200, "<p>text</p>").into_byte_stream();
        let chunks: Vec<_> = text.collect().await;
        assert_eq!(chunks.len(), 1);

        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::from_reader(&b"<html/>"[..])), 200).unwrap();
        let mut body = Vec::new();
        let mut stream = response.into_byte_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"<html/>");
    }

    #[tokio::test]
    async fn test_get_body_of_reader_and_bad_utf8() {
        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::from_reader(&b"<p>read</p>"[..])), 200).unwrap();
        assert_eq!(response.get_body().await.unwrap(), "<p>read</p>");

        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(&[0xff, 0xfe]))];
        let response =
            HttpResponse::from_rendered(rendered(DocumentHtml::from_stream(stream::iter(chunks))), 200).unwrap();
        let err = response.get_body().await.unwrap_err();
        assert!(matches!(err, ResponseError::Io(ref e) if e.kind() == std::io::ErrorKind::InvalidData));
    }
}
