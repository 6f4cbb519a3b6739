//! Wire-Format fuer TCP/TLS-Verbindungen
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+----...----+
//! | 0x0D   | Laenge (u32 LE)                   | Body      |
//! +--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt nur die Body-Bytes (ohne den 5-Byte-Header). Der Body
//! ist eine JSON-kodierte [`Message`]. Nach einem Parse-Fehler wird nicht
//! resynchronisiert; der Aufrufer schliesst die Verbindung.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;
use crate::message::Message;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Markierungs-Byte am Anfang jedes Frames
pub const FRAME_MARKER: u8 = 0x0D;

/// Header: Marker + u32-Laenge
pub const HEADER_SIZE: usize = 5;

/// Standard-maximale Body-Groesse (1 MB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Rohe Frames
// ---------------------------------------------------------------------------

/// Rahmt beliebige Body-Bytes
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(FRAME_MARKER);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Serialisiert und rahmt eine Nachricht
pub fn encode_message(message: &Message, max_body_size: usize) -> Result<Vec<u8>, WireError> {
    let body = message
        .to_json()
        .map_err(|e| WireError::Serialisierung(e.to_string()))?;
    if body.len() > max_body_size {
        return Err(WireError::FrameZuGross {
            laenge: body.len(),
            maximum: max_body_size,
        });
    }
    Ok(encode_frame(&body))
}

/// Prueft einen Header und liefert die deklarierte Body-Laenge
fn header_pruefen(header: &[u8; HEADER_SIZE], max_body_size: usize) -> Result<usize, WireError> {
    if header[0] != FRAME_MARKER {
        return Err(WireError::UngueltigeMarkierung(header[0]));
    }
    let laenge = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if laenge > max_body_size {
        return Err(WireError::FrameZuGross {
            laenge,
            maximum: max_body_size,
        });
    }
    Ok(laenge)
}

/// Fuellt `buf` vollstaendig, auch ueber mehrere Teil-Reads hinweg
///
/// 0 gelesene Bytes bedeuten: Gegenueber hat geschlossen.
async fn vollstaendig_lesen<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), WireError>
where
    R: AsyncRead + Unpin,
{
    let mut gelesen = 0;
    while gelesen < buf.len() {
        let n = reader.read(&mut buf[gelesen..]).await?;
        if n == 0 {
            return Err(WireError::ConnectionClosed);
        }
        gelesen += n;
    }
    Ok(())
}

/// Liest einen Frame und gibt die rohen Body-Bytes zurueck
///
/// # Fehler
/// - `ConnectionClosed` wenn der Stream mitten im Header oder Body endet
/// - `UngueltigeMarkierung` / `FrameZuGross` bei kaputtem Header
pub async fn read_frame_body<R>(reader: &mut R, max_body_size: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    vollstaendig_lesen(reader, &mut header).await?;
    let laenge = header_pruefen(&header, max_body_size)?;

    let mut body = vec![0u8; laenge];
    vollstaendig_lesen(reader, &mut body).await?;
    Ok(body)
}

/// Liest und deserialisiert eine einzelne Nachricht
///
/// # Fehler
/// - `ConnectionClosed` wenn die Verbindung vor Abschluss des Frames endet
/// - `Parse` wenn der Body nicht dem Nachrichtenschema entspricht
pub async fn read_message<R>(reader: &mut R, max_body_size: usize) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame_body(reader, max_body_size).await?;
    Message::from_json(&body).map_err(|e| WireError::Parse(e.to_string()))
}

/// Schreibt eine Nachricht als einen vollstaendigen Frame
///
/// Der Aufrufer muss den Writer fuer die Dauer des Aufrufs exklusiv halten.
pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    max_body_size: usize,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(message, max_body_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer `Framed`-Streams (Clients, Tests)
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_body_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_max_size(max_body_size: usize) -> Self {
        Self { max_body_size }
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = [src[0], src[1], src[2], src[3], src[4]];
        let laenge = header_pruefen(&header, self.max_body_size)?;

        let gesamt = HEADER_SIZE + laenge;
        if src.len() < gesamt {
            src.reserve(gesamt - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(laenge);
        let message = Message::from_json(&body).map_err(|e| WireError::Parse(e.to_string()))?;
        Ok(Some(message))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(msg) => Ok(Some(msg)),
            None if buf.is_empty() => Ok(None),
            None => Err(WireError::ConnectionClosed),
        }
    }
}

impl Encoder<Message> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item
            .to_json()
            .map_err(|e| WireError::Serialisierung(e.to_string()))?;
        if body.len() > self.max_body_size {
            return Err(WireError::FrameZuGross {
                laenge: body.len(),
                maximum: self.max_body_size,
            });
        }

        dst.reserve(HEADER_SIZE + body.len());
        dst.put_u8(FRAME_MARKER);
        dst.put_u32_le(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
