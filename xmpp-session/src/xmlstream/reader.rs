// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::future::poll_fn;
use core::pin::Pin;
use std::borrow::Cow;
use std::io;
use std::time::Duration;

use minidom::Element;
use rxml::{Event, Namespace};
use tokio::io::AsyncBufRead;

use super::{ReadError, StreamHeader};
use crate::ns::STREAM as XML_STREAM_NS;

/// Incremental reader turning the byte stream into one [`Element`] per
/// top-level child of `<stream:stream>`.
///
/// Partially read elements are kept inside the reader, so a read may be
/// cancelled (for instance by a timeout) and resumed later without losing
/// data.
pub struct XmlReader<R> {
    parser: rxml::AsyncReader<R>,

    // Elements currently open below the stream root. The last one is the
    // innermost.
    stack: Vec<Element>,

    footer_received: bool,
}

impl<R: AsyncBufRead + Unpin> XmlReader<R> {
    /// Wrap a buffered byte source.
    pub fn new(inner: R) -> Self {
        XmlReader {
            parser: rxml::AsyncReader::wrap(inner, rxml::Parser::default()),
            stack: Vec::new(),
            footer_received: false,
        }
    }

    fn parser_mut(&mut self) -> &mut rxml::Parser {
        Pin::new(&mut self.parser).parser_pinned()
    }

    /// Forget all parser state, as required by a stream restart.
    pub fn reset(&mut self) {
        *self.parser_mut() = rxml::Parser::default();
        self.stack.clear();
        self.footer_received = false;
    }

    /// Return the wrapped byte source, dropping the parser state.
    pub fn into_inner(self) -> R {
        self.parser.into_inner().0
    }

    async fn next_event(&mut self) -> io::Result<Option<Event>> {
        // Whitespace keepalives at the stream level are not worth
        // accumulating.
        let text_buffering = !self.stack.is_empty();
        self.parser_mut().set_text_buffering(text_buffering);
        poll_fn(|cx| Pin::new(&mut self.parser).poll_read(cx)).await
    }

    /// Read the peer's `<stream:stream>` header.
    pub async fn recv_header(&mut self) -> io::Result<StreamHeader<'static>> {
        loop {
            match self.next_event().await? {
                Some(Event::StartElement(_, (ns, name), mut attrs)) => {
                    if ns != XML_STREAM_NS || name != "stream" {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "unknown stream header",
                        ));
                    }

                    match attrs.remove(Namespace::none(), "version") {
                        Some(v) => {
                            if v != "1.0" {
                                return Err(io::Error::new(
                                    io::ErrorKind::InvalidData,
                                    format!("unsupported stream version: {}", v),
                                ));
                            }
                        }
                        None => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "required `version` attribute missing",
                            ))
                        }
                    }

                    let from = attrs.remove(Namespace::none(), "from");
                    let to = attrs.remove(Namespace::none(), "to");
                    let id = attrs.remove(Namespace::none(), "id");

                    return Ok(StreamHeader {
                        from: from.map(Cow::Owned),
                        to: to.map(Cow::Owned),
                        id: id.map(Cow::Owned),
                    });
                }
                Some(Event::Text(_, _)) | Some(Event::EndElement(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "unexpected content before stream header",
                    ))
                }
                // The parser refuses a second XML declaration, so this
                // cannot loop forever.
                Some(Event::XmlDeclaration(_, _)) => (),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof before stream header",
                    ))
                }
            }
        }
    }

    /// Read the next complete top-level element.
    pub async fn next_element(&mut self) -> Result<Element, ReadError> {
        if self.footer_received {
            return Err(ReadError::StreamFooterReceived);
        }
        loop {
            let event = match self.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return Err(ReadError::HardError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "eof before stream footer",
                    )))
                }
                Err(e) => return Err(ReadError::HardError(e)),
            };
            match event {
                Event::XmlDeclaration(_, _) => (),
                Event::StartElement(_, (ns, name), attrs) => {
                    let mut builder = Element::builder(name.to_string(), ns.to_string());
                    for ((attr_ns, attr_name), value) in attrs.into_iter() {
                        // xml:lang and friends are not kept.
                        if attr_ns != *Namespace::none() {
                            continue;
                        }
                        builder = builder.attr(attr_name.to_string(), value.to_string());
                    }
                    self.stack.push(builder.build());
                }
                Event::Text(_, text) => match self.stack.last_mut() {
                    Some(parent) => {
                        parent.append_text_node(text.to_string());
                    }
                    None => {
                        if !text.trim().is_empty() {
                            return Err(ReadError::HardError(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "text at stream level",
                            )));
                        }
                        log::trace!("skipping whitespace keepalive");
                    }
                },
                Event::EndElement(_) => match self.stack.pop() {
                    None => {
                        self.footer_received = true;
                        return Err(ReadError::StreamFooterReceived);
                    }
                    Some(element) => match self.stack.last_mut() {
                        None => return Ok(element),
                        Some(parent) => {
                            parent.append_child(element);
                        }
                    },
                },
            }
        }
    }

    /// Like [`Self::next_element`], but gives up with
    /// [`ReadError::SoftTimeout`] after `timeout` without a complete
    /// element.
    pub async fn next_element_timeout(&mut self, timeout: Duration) -> Result<Element, ReadError> {
        match tokio::time::timeout(timeout, self.next_element()).await {
            Ok(result) => result,
            Err(_) => Err(ReadError::SoftTimeout),
        }
    }
}
