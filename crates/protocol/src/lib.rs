//! stammtisch-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen, Enums und Strukturen
//! die zwischen Client und Server ausgetauscht werden, sowie den
//! Frame-Codec fuer den Transport.

pub mod control;
pub mod wire;

pub use control::{ControlMessage, ControlPayload, ErrorCode, FehlerKategorie};
pub use wire::{EingehenderFrame, FrameCodec};
