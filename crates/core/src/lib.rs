//! stammtisch-core – Gemeinsame Identifikationstypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Stammtisch-Crates gemeinsam genutzt werden.

pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use types::{ChannelId, ConnectionId, DmId, ServerId, UserName};
