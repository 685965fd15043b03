//! Wire-Format fuer Client-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Ein Frame mit gueltiger Laenge aber unbekanntem `type` oder kaputtem JSON
//! wird nicht als IO-Fehler gemeldet, sondern als [`EingehenderFrame::Ungueltig`].
//! Nur Verletzungen der Frame-Groesse sind Transportfehler.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{ControlMessage, ErrorCode};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Dekodierter Frame
// ---------------------------------------------------------------------------

/// Ergebnis der Dekodierung eines vollstaendigen Frames
#[derive(Debug, Clone)]
pub enum EingehenderFrame {
    /// Gueltige Control-Nachricht
    Nachricht(ControlMessage),
    /// Frame konnte nicht als Control-Nachricht gelesen werden
    Ungueltig {
        /// `request_id` falls sie aus dem Frame gelesen werden konnte, sonst 0
        request_id: u32,
        /// Typ-Tag falls vorhanden
        typ: Option<String>,
        /// `UnknownType` fuer unbekannte Tags, sonst `InvalidRequest`
        code: ErrorCode,
        grund: String,
    },
}

/// Wertet den Payload eines Frames aus
///
/// Zuerst wird generisch als JSON geparst, damit `request_id` und `type`
/// auch bei unbekannten Nachrichtentypen fuer die Fehlerantwort erhalten
/// bleiben.
pub fn frame_auswerten(payload: &[u8]) -> EingehenderFrame {
    let wert: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(w) => w,
        Err(e) => {
            return EingehenderFrame::Ungueltig {
                request_id: 0,
                typ: None,
                code: ErrorCode::InvalidRequest,
                grund: format!("Kein gueltiges JSON: {e}"),
            }
        }
    };

    let request_id = wert
        .get("request_id")
        .and_then(serde_json::Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .unwrap_or(0);
    let typ = wert
        .get("payload")
        .and_then(|p| p.get("type"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    match serde_json::from_value::<ControlMessage>(wert) {
        Ok(nachricht) => EingehenderFrame::Nachricht(nachricht),
        Err(e) => {
            let grund = e.to_string();
            // serde meldet unbekannte Tags als "unknown variant"
            let code = if typ.is_some() && grund.starts_with("unknown variant") {
                ErrorCode::UnknownType
            } else {
                ErrorCode::InvalidRequest
            };
            EingehenderFrame::Ungueltig {
                request_id,
                typ,
                code,
                grund,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte Verbindungen
///
/// Implementiert `Encoder<ControlMessage>` und `Decoder` fuer nahtlose
/// Integration mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = EingehenderFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        Ok(Some(frame_auswerten(&payload)))
    }
}

impl Encoder<ControlMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
