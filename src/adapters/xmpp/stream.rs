//! Incremental reader for an XMPP stream.
//!
//! Turns the never-ending `<stream:stream>` document into a sequence of
//! [`StreamEvent`]s: stream (re)openings, complete top-level stanzas and
//! the end of the stream. A new stream header after SASL success is just
//! another `Opened` event.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tokio::io::AsyncBufRead;

use crate::ports::BackendError;

use super::stanza::Element;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server opened (or reopened) its stream.
    Opened { id: Option<String> },
    /// A complete top-level element.
    Stanza(Element),
    /// `</stream:stream>` or end of input.
    Closed,
}

pub struct XmppReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    open: Vec<Element>,
}

impl<R: AsyncBufRead + Unpin> XmppReader<R> {
    pub fn new(inner: R) -> Self {
        let mut reader = Reader::from_reader(inner);
        // Stream restarts reopen `stream:stream` without closing it.
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            buf: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Reads until the next stream event.
    pub async fn next(&mut self) -> Result<StreamEvent, BackendError> {
        loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into_async(&mut self.buf)
                .await
                .map_err(|e| BackendError::Protocol(format!("malformed stream: {}", e)))?;

            match event {
                Event::Start(start) => {
                    let element = element_from(&start)?;
                    if element.local_name() == "stream" && element.name().starts_with("stream") {
                        self.open.clear();
                        return Ok(StreamEvent::Opened {
                            id: element.get_attr("id").map(str::to_string),
                        });
                    }
                    self.open.push(element);
                }
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    if let Some(stanza) = self.attach(element) {
                        return Ok(StreamEvent::Stanza(stanza));
                    }
                }
                Event::End(_) => match self.open.pop() {
                    Some(element) => {
                        if let Some(stanza) = self.attach(element) {
                            return Ok(StreamEvent::Stanza(stanza));
                        }
                    }
                    None => return Ok(StreamEvent::Closed),
                },
                Event::Text(text) => {
                    if let Some(parent) = self.open.last_mut() {
                        let text = text
                            .unescape()
                            .map_err(|e| BackendError::Protocol(format!("bad text: {}", e)))?;
                        parent.push_text(text.into_owned());
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = self.open.last_mut() {
                        parent.push_text(String::from_utf8_lossy(&data.into_inner()).into_owned());
                    }
                }
                Event::Eof => {
                    if !self.open.is_empty() {
                        return Err(BackendError::Protocol(
                            "stream ended inside a stanza".to_string(),
                        ));
                    }
                    return Ok(StreamEvent::Closed);
                }
                Event::Decl(_) | Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            }
        }
    }

    /// Adds a finished element to its parent, or returns it if top-level.
    fn attach(&mut self, element: Element) -> Option<Element> {
        match self.open.last_mut() {
            Some(parent) => {
                parent.push(element);
                None
            }
            None => Some(element),
        }
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, BackendError> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(|e| BackendError::Protocol(format!("bad attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| BackendError::Protocol(format!("bad attribute value: {}", e)))?;
        element.set_attr(
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        );
    }
    Ok(element)
}
