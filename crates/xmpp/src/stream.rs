//! Framing of an XMPP XML stream into top-level elements.

use {
    quick_xml::{Reader, events::Event},
    tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    tracing::trace,
};

use crate::{
    element::{Element, TreeBuilder, decode_cdata, decode_ref, decode_text, element_from_start},
    error::{Error, Result},
};

/// Any byte stream an XMPP session can run over (TCP, TLS over TCP, or an
/// in-memory duplex in tests).
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

pub type BoxedIo = Box<dyn AsyncIo>;

pub struct XmlStream {
    reader: Reader<BufReader<BoxedIo>>,
    buf: Vec<u8>,
}

impl XmlStream {
    pub fn new(io: BoxedIo) -> Self {
        Self {
            reader: Reader::from_reader(BufReader::new(io)),
            buf: Vec::new(),
        }
    }

    /// Start a fresh parser on the same transport, keeping buffered bytes.
    /// Used after SASL success, when both sides open a new stream.
    pub fn restart(self) -> Self {
        Self {
            reader: Reader::from_reader(self.reader.into_inner()),
            buf: Vec::new(),
        }
    }

    /// Give back the raw transport, e.g. to wrap it in TLS after `<proceed/>`.
    pub fn into_io(self) -> BoxedIo {
        self.reader.into_inner().into_inner()
    }

    pub async fn send(&mut self, xml: &str) -> Result<()> {
        trace!(xml = %xml, "client -> server");
        let io = self.reader.get_mut().get_mut();
        io.write_all(xml.as_bytes()).await?;
        io.flush().await?;
        Ok(())
    }

    /// Read the server's `<stream:stream>` opening tag.
    pub async fn read_header(&mut self) -> Result<Element> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into_async(&mut self.buf).await? {
                Event::Start(e) if e.local_name().as_ref() == b"stream" => {
                    return element_from_start(&e);
                },
                Event::Decl(_) | Event::Text(_) | Event::Comment(_) | Event::PI(_) => {},
                Event::Eof => return Err(Error::StreamClosed),
                other => {
                    return Err(Error::Unexpected {
                        expected: "stream header",
                        got: format!("{other:?}"),
                    });
                },
            }
        }
    }

    /// Read the next complete top-level element (stanza, features, SASL
    /// reply). A `<stream:error/>` becomes [`Error::StreamError`] and the
    /// closing `</stream:stream>` becomes [`Error::StreamClosed`].
    pub async fn read_element(&mut self) -> Result<Element> {
        let mut builder = TreeBuilder::default();
        let el = loop {
            self.buf.clear();
            match self.reader.read_event_into_async(&mut self.buf).await? {
                Event::Start(e) => builder.start(&e)?,
                Event::Empty(e) => {
                    if let Some(el) = builder.empty(&e)? {
                        break el;
                    }
                },
                Event::End(_) => {
                    if builder.is_idle() {
                        return Err(Error::StreamClosed);
                    }
                    if let Some(el) = builder.end()? {
                        break el;
                    }
                },
                Event::Text(t) => builder.text(&decode_text(&t)?),
                Event::CData(c) => builder.text(&decode_cdata(&c)?),
                Event::GeneralRef(r) => builder.text(&decode_ref(&r)?),
                Event::Eof => return Err(Error::StreamClosed),
                _ => {},
            }
        };
        trace!(name = %el.name, id = el.attr("id").unwrap_or_default(), "server -> client");

        if el.name == "error" {
            let condition = el
                .children
                .iter()
                .find(|c| c.name != "text")
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "undefined-condition".into());
            return Err(Error::StreamError(condition));
        }
        Ok(el)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.reader.get_mut().get_mut().shutdown().await?;
        Ok(())
    }
}
