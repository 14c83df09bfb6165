// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # RFC 6120 XML Streams
//!
//! **Note:** The XML stream is a low-level API which you should probably not
//! use directly.
//!
//! ## Initiating an XML stream
//!
//! Call [`initiate_stream`], which sends our stream header and waits for
//! the peer's. Then [`XmlStream::recv_features`] reads the
//! `<stream:features/>`. After STARTTLS or SASL, [`XmlStream::restart`]
//! resets the parser and exchanges headers again on the same transport.
//!
//! ## Accepting an XML stream
//!
//! Call [`accept_stream`], which waits for the peer's header, inspect it
//! and answer with [`XmlStream::send_header`].
//!
//! Once negotiation is over, [`XmlStream::split`] hands out the read and
//! write halves so they can live on different tasks.

use std::borrow::Cow;
use std::io;

use minidom::Element;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};

use crate::config::Timeouts;
use crate::error::Error;
use crate::features::StreamFeatures;
use crate::ns;
use crate::stream_error::StreamError;

mod reader;
#[cfg(test)]
mod tests;
mod writer;

pub use self::reader::XmlReader;
pub use self::writer::XmlWriter;
pub(crate) use self::writer::escape;

/// The read half of an [`XmlStream`] over `Io`.
pub type StreamReader<Io> = XmlReader<BufReader<ReadHalf<Io>>>;

/// The write half of an [`XmlStream`] over `Io`.
pub type StreamWriter<Io> = XmlWriter<WriteHalf<Io>>;

/// Contents of a `<stream:stream>` header.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader<'x> {
    /// The optional `from` attribute.
    pub from: Option<Cow<'x, str>>,

    /// The optional `to` attribute.
    pub to: Option<Cow<'x, str>>,

    /// The optional `id` attribute.
    pub id: Option<Cow<'x, str>>,
}

impl<'x> StreamHeader<'x> {
    /// A header addressed to `to`, as sent by an initiating entity.
    pub fn addressed_to(to: &'x str) -> Self {
        StreamHeader {
            to: Some(Cow::Borrowed(to)),
            ..Default::default()
        }
    }

    /// Copy borrowed contents so the header outlives its source.
    pub fn into_owned(self) -> StreamHeader<'static> {
        StreamHeader {
            from: self.from.map(|v| Cow::Owned(v.into_owned())),
            to: self.to.map(|v| Cow::Owned(v.into_owned())),
            id: self.id.map(|v| Cow::Owned(v.into_owned())),
        }
    }
}

/// A non-success state which may occur while reading from an XML stream.
#[derive(Debug)]
pub enum ReadError {
    /// The soft timeout of the stream triggered.
    ///
    /// User code should handle this by sending something into the stream
    /// which causes the peer to send data before the hard timeout triggers.
    SoftTimeout,

    /// An I/O or well-formedness error occurred.
    ///
    /// This is fatal.
    HardError(io::Error),

    /// The stream footer was received.
    ///
    /// Any future read attempts will again return this error. The stream has
    /// been closed by the peer and you should probably close it, too.
    StreamFooterReceived,
}

impl From<ReadError> for Error {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::SoftTimeout => Error::Timeout,
            ReadError::HardError(e) => Error::Io(e),
            ReadError::StreamFooterReceived => Error::Disconnected,
        }
    }
}

/// An XML stream over the transport `Io` during negotiation.
pub struct XmlStream<Io> {
    reader: StreamReader<Io>,
    writer: StreamWriter<Io>,
    timeouts: Timeouts,
    header: StreamHeader<'static>,
}

fn wrap<Io: AsyncRead + AsyncWrite + Unpin>(
    io: Io,
    stream_ns: &'static str,
) -> (StreamReader<Io>, StreamWriter<Io>) {
    let (rx, tx) = tokio::io::split(io);
    (
        XmlReader::new(BufReader::new(rx)),
        XmlWriter::new(tx, stream_ns),
    )
}

/// Initiate a new stream
///
/// Initiate a new stream using the given I/O object `io`. The default
/// XML namespace will be set to `stream_ns` and the stream header will use
/// the attributes as set in `stream_header`, along with version `1.0`.
///
/// The returned stream holds the stream header sent by the remote side.
pub async fn initiate_stream<Io: AsyncRead + AsyncWrite + Unpin>(
    io: Io,
    stream_ns: &'static str,
    stream_header: &StreamHeader<'_>,
    timeouts: Timeouts,
) -> io::Result<XmlStream<Io>> {
    let (reader, writer) = wrap(io, stream_ns);
    let mut stream = XmlStream {
        reader,
        writer,
        timeouts,
        header: StreamHeader::default(),
    };
    stream.writer.send_header(stream_header).await?;
    stream.header = stream.recv_header().await?;
    Ok(stream)
}

/// Accept a new XML stream as responder
///
/// Waits for the initiator's stream header, which is then available via
/// [`XmlStream::header`]. The caller answers with
/// [`XmlStream::send_header`].
pub async fn accept_stream<Io: AsyncRead + AsyncWrite + Unpin>(
    io: Io,
    stream_ns: &'static str,
    timeouts: Timeouts,
) -> io::Result<XmlStream<Io>> {
    let (reader, writer) = wrap(io, stream_ns);
    let mut stream = XmlStream {
        reader,
        writer,
        timeouts,
        header: StreamHeader::default(),
    };
    stream.header = stream.recv_header().await?;
    Ok(stream)
}

impl<Io: AsyncRead + AsyncWrite + Unpin> XmlStream<Io> {
    async fn recv_header(&mut self) -> io::Result<StreamHeader<'static>> {
        match tokio::time::timeout(self.timeouts.response_timeout, self.reader.recv_header()).await
        {
            Ok(header) => header,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "no stream header in time",
            )),
        }
    }

    /// The stream header received from the peer.
    pub fn header(&self) -> &StreamHeader<'static> {
        &self.header
    }

    /// The timeouts this stream was set up with.
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Send our stream header, as the responding entity.
    pub async fn send_header(&mut self, header: &StreamHeader<'_>) -> io::Result<()> {
        self.writer.send_header(header).await
    }

    /// Restart the stream on the same transport, after SASL success.
    pub async fn restart(&mut self, header: &StreamHeader<'_>) -> io::Result<()> {
        self.reader.reset();
        self.writer.send_header(header).await?;
        self.header = self.recv_header().await?;
        Ok(())
    }

    /// Wait for the initiator's new header after a restart, as the
    /// responding entity.
    pub async fn accept_restart(&mut self) -> io::Result<()> {
        self.reader.reset();
        self.header = self.recv_header().await?;
        Ok(())
    }

    /// Send one element.
    pub async fn send(&mut self, element: &Element) -> io::Result<()> {
        self.writer.send(element).await
    }

    /// Receive one element, waiting at most for the response timeout.
    ///
    /// A `<stream:error/>` is turned into [`Error::Stream`].
    pub async fn recv(&mut self) -> Result<Element, Error> {
        let element = self
            .reader
            .next_element_timeout(self.timeouts.response_timeout)
            .await?;
        if element.is("error", ns::STREAM) {
            return Err(StreamError::parse(&element)?.into());
        }
        Ok(element)
    }

    /// Receive the `<stream:features/>` which follow a stream header.
    pub async fn recv_features(&mut self) -> Result<StreamFeatures, Error> {
        let element = self.recv().await?;
        Ok(StreamFeatures::parse(&element)?)
    }

    /// Send the footer and shut down the write side.
    pub async fn close(&mut self) -> io::Result<()> {
        self.writer.close().await
    }

    /// Give the transport back, for instance to wrap it into TLS.
    ///
    /// Anything buffered but not yet parsed is lost, which is fine at the
    /// points where the protocol hands the transport over.
    pub fn into_inner(self) -> Io {
        let rx = self.reader.into_inner().into_inner();
        rx.unsplit(self.writer.into_inner())
    }

    /// Split into halves for the read loop and the senders.
    pub fn split(self) -> (StreamReader<Io>, StreamWriter<Io>) {
        (self.reader, self.writer)
    }
}
