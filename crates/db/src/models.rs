//! Datenmodelle der Persistenz-Schnittstelle
//!
//! Diese Typen repraesentieren gespeicherte Datensaetze.
//! Sie sind von den Protokoll-Typen getrennt und dienen als reine Datenuebertragungsobjekte.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stammtisch_core::types::{ChannelId, DmId, ServerId, UserName};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Benutzer
// ---------------------------------------------------------------------------

/// Benutzer-Datensatz (Identitaet)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenutzerRecord {
    pub username: UserName,
    pub email: String,
    pub password_hash: String,
    /// TOTP-Secret (Base32), `None` wenn nicht eingerichtet
    pub totp_secret: Option<String>,
    /// SHA-256-Digests der noch unbenutzten Backup-Codes
    pub backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl BenutzerRecord {
    /// Gibt `true` zurueck wenn ein zweiter Faktor verlangt wird
    pub fn zweiter_faktor_aktiv(&self) -> bool {
        self.totp_secret.is_some() || !self.backup_codes.is_empty()
    }
}

/// Daten zum Erstellen eines neuen Benutzers
#[derive(Debug, Clone)]
pub struct NeuerBenutzer<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Daten zum Aktualisieren eines Benutzers
///
/// `totp_secret: Some(None)` entfernt das Secret.
#[derive(Debug, Clone, Default)]
pub struct BenutzerUpdate {
    pub password_hash: Option<String>,
    pub totp_secret: Option<Option<String>>,
    pub backup_codes: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub last_login: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Server (Mandanten) und Kanaele
// ---------------------------------------------------------------------------

/// Kanal-Typ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KanalTyp {
    Voice,
    Text,
}

/// Kanal eines Servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanalRecord {
    pub id: ChannelId,
    pub name: String,
    pub typ: KanalTyp,
}

/// Server-Datensatz (Mandant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub owner: UserName,
    pub channels: Vec<KanalRecord>,
    pub created_at: DateTime<Utc>,
}

impl ServerRecord {
    pub fn kanal(&self, channel_id: ChannelId) -> Option<&KanalRecord> {
        self.channels.iter().find(|k| k.id == channel_id)
    }
}

/// Mitgliedschaft eines Benutzers in einem Server
///
/// `legacy_flags` sind Einzelrechte ausserhalb des Rollensystems
/// (z.B. `kick_members = true`). Sie werden nur fuer eine feste
/// Teilmenge von Berechtigungsnamen ausgewertet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitgliedRecord {
    pub server_id: ServerId,
    pub username: UserName,
    pub legacy_flags: HashMap<String, bool>,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Rollen
// ---------------------------------------------------------------------------

/// Rolle innerhalb eines Servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolleRecord {
    pub id: Uuid,
    pub server_id: ServerId,
    pub name: String,
    pub color: Option<String>,
    /// Rang in der Hierarchie (hoeher = hoeherrangig)
    pub position: i32,
    /// Berechtigungsname -> erteilt
    pub permissions: HashMap<String, bool>,
}

impl RolleRecord {
    /// Gibt `true` zurueck wenn die Rolle die Berechtigung explizit erteilt
    pub fn erteilt(&self, berechtigung: &str) -> bool {
        self.permissions.get(berechtigung).copied().unwrap_or(false)
    }
}

/// Daten zum Anlegen einer Rolle
#[derive(Debug, Clone)]
pub struct NeueRolle<'a> {
    pub server_id: ServerId,
    pub name: &'a str,
    pub color: Option<&'a str>,
    pub position: i32,
    pub permissions: HashMap<String, bool>,
}

// ---------------------------------------------------------------------------
// Moderation
// ---------------------------------------------------------------------------

/// Art einer Moderationsmassnahme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationsTyp {
    Kick,
    Ban,
    Timeout,
}

impl ModerationsTyp {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ModerationsTyp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Gespeicherte Moderationsmassnahme
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationsRecord {
    pub id: Uuid,
    pub server_id: ServerId,
    pub typ: ModerationsTyp,
    pub target: UserName,
    pub actor: UserName,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Bei Kick/Ban: `false` sobald eine Aufhebung gespeichert wurde
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Daten zum Erstellen einer Moderationsmassnahme
#[derive(Debug, Clone)]
pub struct NeueModeration<'a> {
    pub server_id: ServerId,
    pub typ: ModerationsTyp,
    pub target: &'a UserName,
    pub actor: &'a UserName,
    pub reason: Option<&'a str>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Direktnachrichten, Einladungen, Freundschaften
// ---------------------------------------------------------------------------

/// Direktnachrichten-Unterhaltung zwischen genau zwei Benutzern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmRecord {
    pub id: DmId,
    pub teilnehmer: (UserName, UserName),
}

/// Einladungscode eines Benutzers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EinladungRecord {
    pub code: String,
    pub inviter: UserName,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Verifikationscodes
// ---------------------------------------------------------------------------

/// Zweck eines Einmal-Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeZweck {
    EmailVerifikation,
    PasswortReset,
}

/// Einmal-Code (E-Mail-Verifikation oder Passwort-Reset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifikationsCode {
    pub code: String,
    pub zweck: CodeZweck,
    pub username: UserName,
    pub expires_at: DateTime<Utc>,
}

impl VerifikationsCode {
    pub fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        jetzt >= self.expires_at
    }
}
