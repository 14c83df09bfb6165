// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::borrow::Cow;
use std::io;

use bytes::{BufMut, BytesMut};
use minidom::Element;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::StreamHeader;
use crate::ns::STREAM as XML_STREAM_NS;

const STREAM_FOOTER: &[u8] = b"</stream:stream>";

pub(crate) fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(|c: char| matches!(c, '&' | '<' | '>' | '\'' | '"')) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// Serialises elements onto the wire, one flush per element.
pub struct XmlWriter<W> {
    inner: W,

    // The default namespace declared on the stream header.
    stream_ns: &'static str,

    tx_buffer: BytesMut,

    footer_sent: bool,
}

impl<W: AsyncWrite + Unpin> XmlWriter<W> {
    /// Wrap a byte sink for a stream whose default namespace is
    /// `stream_ns`.
    pub fn new(inner: W, stream_ns: &'static str) -> Self {
        XmlWriter {
            inner,
            stream_ns,
            tx_buffer: BytesMut::new(),
            footer_sent: false,
        }
    }

    /// The default namespace of this stream.
    pub fn stream_ns(&self) -> &'static str {
        self.stream_ns
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.footer_sent {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream footer already sent",
            ));
        }
        Ok(())
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        let data = self.tx_buffer.split();
        self.inner.write_all(&data).await?;
        self.inner.flush().await
    }

    /// Write an XML declaration and the opening `<stream:stream>` tag.
    pub async fn send_header(&mut self, header: &StreamHeader<'_>) -> io::Result<()> {
        self.check_writable()?;
        let mut head = format!(
            "<?xml version='1.0'?><stream:stream xmlns='{}' xmlns:stream='{}'",
            self.stream_ns, XML_STREAM_NS
        );
        for (name, value) in [
            ("from", &header.from),
            ("to", &header.to),
            ("id", &header.id),
        ] {
            if let Some(value) = value {
                head.push_str(&format!(" {}='{}'", name, escape(value)));
            }
        }
        head.push_str(" version='1.0'>");
        log::trace!("SEND {}", head);
        self.tx_buffer.put_slice(head.as_bytes());
        self.flush_buffer().await
    }

    /// Serialise and flush one element.
    pub async fn send(&mut self, element: &Element) -> io::Result<()> {
        self.check_writable()?;
        let mut writer = (&mut self.tx_buffer).writer();
        element
            .write_to(&mut writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        log::trace!("SEND {}", String::from_utf8_lossy(&self.tx_buffer));
        self.flush_buffer().await
    }

    /// Send a single space, which keeps NATs and the peer's read timeout
    /// at bay.
    pub async fn send_keepalive(&mut self) -> io::Result<()> {
        self.check_writable()?;
        self.tx_buffer.put_u8(b' ');
        self.flush_buffer().await
    }

    /// Send the stream footer, flush and shut the write side down.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> io::Result<()> {
        if !self.footer_sent {
            self.footer_sent = true;
            self.tx_buffer.put_slice(STREAM_FOOTER);
            self.flush_buffer().await?;
        }
        self.inner.shutdown().await
    }

    /// Return the wrapped byte sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
