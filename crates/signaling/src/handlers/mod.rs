//! Handler fuer alle Control-Nachrichten
//!
//! Jeder Handler ist fuer einen bestimmten Nachrichtentyp zustaendig,
//! hat Zugriff auf den gemeinsamen SignalingState und liefert entweder die
//! Antwort-Payload oder einen `SignalingError`.

pub mod account_handler;
pub mod auth_handler;
pub mod message_handler;
pub mod moderation_handler;
pub mod permission_handler;
pub mod voice_handler;
