//! stammtisch-signaling – Echtzeit-Kern des Chat-Dienstes
//!
//! Dieses Crate verwaltet die Transport-Verbindungen, den Anmeldezustand
//! jeder Verbindung, Presence und Voice-Sessions sowie die Zustellung von
//! Events an die betroffenen Verbindungen.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein lokaler Task)
//!     |  (Verbindend) -> Unauthentifiziert -> Authentifiziert -> Beendet
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- AuthHandler        (Signup, Verify, Login, Token, Passwort-Reset)
//!     +-- AccountHandler     (2FA, Einladungen)
//!     +-- VoiceHandler       (Kanaele, Direktanrufe, Medien-Flags)
//!     +-- PermissionHandler  (Berechtigungsabfrage)
//!     +-- ModerationHandler  (Kick, Ban, Timeout)
//!     +-- MessageHandler     (Kanal- und Direktnachrichten)
//!
//! PresenceManager  – Wer ist online, wer ist in welchem Voice-Kontext
//! EventBroadcaster – Send-Queues aller Verbindungen, Zustellberichte
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod presence;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::{EventBroadcaster, ZustellBericht, ZustellStatus, Zustellung};
pub use connection::{ClientConnection, TrennGrund};
pub use dispatcher::{MessageDispatcher, VerbindungsZustand};
pub use error::{SignalingError, SignalingResult};
pub use presence::{PresenceManager, VoiceKontext, VoiceSession};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
