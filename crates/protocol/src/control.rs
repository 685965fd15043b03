//! Control-Protokoll
//!
//! Definiert alle Steuerungsnachrichten die ueber eine Client-Verbindung
//! zwischen Client und Server ausgetauscht werden.
//!
//! ## Design
//! - Request/Response Pattern: jede Nachricht hat eine `request_id: u32`
//! - JSON-Serialisierung via serde
//! - Tagged Enums (`{"type": ..., ...}`) fuer typsichere Nachrichtentypen
//! - Server-Events (Roster, Anrufe, Presence) tragen `request_id = 0`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stammtisch_core::types::{ChannelId, DmId, ServerId, UserName};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    UnknownType,
    NotFound,
    PermissionDenied,
    Conflict,
    // Auth
    InvalidCredentials,
    InvalidCode,
    TwoFactorRequired,
    SessionExpired,
    NotAuthenticated,
    AlreadyLoggedIn,
    TooManyAttempts,
    // Moderation
    Banned,
    TimedOut,
}

/// Fehlerklasse eines Error-Codes
///
/// Bestimmt wie der Client reagieren soll; keine Klasse beendet die Verbindung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FehlerKategorie {
    /// Fehlerhafte oder fehlende Felder
    Validierung,
    /// Falsche Anmeldedaten, Token oder Codes
    Auth,
    /// Fehlende Berechtigung oder aktive Sperre
    Autorisierung,
    /// Unbekanntes Ziel
    NichtGefunden,
    /// Widerspruch zum aktuellen Zustand
    Konflikt,
    /// Persistenz oder Transport voruebergehend gestoert
    Infrastruktur,
}

impl ErrorCode {
    pub fn kategorie(self) -> FehlerKategorie {
        match self {
            Self::InvalidRequest | Self::UnknownType => FehlerKategorie::Validierung,
            Self::InvalidCredentials
            | Self::InvalidCode
            | Self::TwoFactorRequired
            | Self::SessionExpired
            | Self::NotAuthenticated
            | Self::AlreadyLoggedIn
            | Self::TooManyAttempts => FehlerKategorie::Auth,
            Self::PermissionDenied | Self::Banned | Self::TimedOut => {
                FehlerKategorie::Autorisierung
            }
            Self::NotFound => FehlerKategorie::NichtGefunden,
            Self::Conflict => FehlerKategorie::Konflikt,
            Self::InternalError => FehlerKategorie::Infrastruktur,
        }
    }
}

// ---------------------------------------------------------------------------
// Auth-Nachrichten
// ---------------------------------------------------------------------------

/// Registrierung eines neuen Accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    /// Optionaler Einladungscode (loest Auto-Freundschaft aus)
    pub invite_code: Option<String>,
}

/// Bestaetigung der E-Mail-Adresse mit dem zugesandten Code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyEmailRequest {
    pub username: String,
    pub code: String,
}

/// Login-Anfrage vom Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    /// Passwort (Klartext – wird serverseitig gehasht verglichen)
    pub password: String,
    /// TOTP- oder Backup-Code, Pflicht wenn der zweite Faktor aktiv ist
    pub two_factor_code: Option<String>,
}

/// Anmeldung mit einem zuvor ausgestellten Session-Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

/// Erfolgreiche Anmeldung – die Verbindung ist ab jetzt authentifiziert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthOkResponse {
    pub username: UserName,
    pub session_token: String,
    /// Ablaufzeit des Session-Tokens (Unix-Timestamp)
    pub expires_at: i64,
}

/// Registrierung wartet auf E-Mail-Bestaetigung
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequiredResponse {
    pub username: UserName,
    /// Ablaufzeit des Codes (Unix-Timestamp)
    pub expires_at: i64,
}

/// Passwort-Reset anfordern (Benutzername oder E-Mail)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub identifier: String,
}

/// Generische Antwort auf eine Reset-Anforderung
///
/// Identisch, egal ob der Account existiert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetRequestedResponse {
    pub message: String,
}

/// Reset-Token pruefen ohne ihn zu verbrauchen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetValidateRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetValidResponse {
    pub valid: bool,
}

/// Neues Passwort mit gueltigem Reset-Token setzen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetCompleteRequest {
    pub token: String,
    pub new_password: String,
}

/// Ergebnis der Einrichtung des zweiten Faktors (nur einmal sichtbar)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorSetupResponse {
    /// TOTP-Secret (Base32)
    pub secret: String,
    /// otpauth://-URL fuer Authenticator-Apps
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
}

/// Zweiten Faktor deaktivieren (erfordert gueltigen Code)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFactorDisableRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCreatedResponse {
    pub code: String,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Benutzer ist online gekommen oder hat die Verbindung verloren
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub username: UserName,
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

/// Medien-Zustand einer Voice-Session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub muted: bool,
    pub video: bool,
    pub screen_sharing: bool,
    pub showing_screen: bool,
}

/// Einzelnes Medien-Flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFlag {
    Muted,
    Video,
    ScreenSharing,
    ShowingScreen,
}

impl MediaFlags {
    /// Setzt ein einzelnes Flag
    pub fn setzen(&mut self, flag: MediaFlag, wert: bool) {
        match flag {
            MediaFlag::Muted => self.muted = wert,
            MediaFlag::Video => self.video = wert,
            MediaFlag::ScreenSharing => self.screen_sharing = wert,
            MediaFlag::ShowingScreen => self.showing_screen = wert,
        }
    }
}

/// Voice-Channel betreten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceJoinRequest {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
}

/// Mitglied eines Voice-Channels samt Medien-Zustand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterMember {
    pub username: UserName,
    pub flags: MediaFlags,
}

/// Vollstaendiger Roster eines Voice-Channels (kein Delta)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRosterEvent {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub members: Vec<RosterMember>,
}

/// Medien-Flag der eigenen Voice-Session setzen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFlagRequest {
    pub flag: MediaFlag,
    pub value: bool,
}

/// Medien-Zustand eines Gespraechspartners hat sich geaendert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlagsEvent {
    pub username: UserName,
    pub flags: MediaFlags,
}

/// Direktanruf starten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStartRequest {
    pub peer: UserName,
}

/// Eingehenden Anruf annehmen oder ablehnen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAnswerRequest {
    pub caller: UserName,
}

/// Anruf-Event mit dem jeweils anderen Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPeerEvent {
    pub peer: UserName,
}

/// Grund fuer das Ende eines Direktanrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEndReason {
    /// Gegenueber hat aufgelegt oder einen anderen Voice-Kontext betreten
    HungUp,
    /// Gegenueber hat die Verbindung verloren
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEndedEvent {
    pub peer: UserName,
    pub reason: CallEndReason,
}

// ---------------------------------------------------------------------------
// Berechtigungen und Moderation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionCheckRequest {
    pub server_id: ServerId,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionResultResponse {
    pub server_id: ServerId,
    pub permission: String,
    pub allowed: bool,
}

/// Art einer Moderationsmassnahme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationType {
    Kick,
    Ban,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerateRequest {
    pub server_id: ServerId,
    pub target: UserName,
    pub action: ModerationType,
    pub reason: Option<String>,
    /// Dauer in Sekunden; Pflicht fuer `timeout`, fuer `kick` und `ban` nicht erlaubt
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub server_id: ServerId,
    pub target: UserName,
    pub actor: UserName,
    pub action: ModerationType,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRevokeRequest {
    pub server_id: ServerId,
    pub target: UserName,
    pub action: ModerationType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationRevokedEvent {
    pub server_id: ServerId,
    pub target: UserName,
    pub actor: UserName,
    pub action: ModerationType,
}

// ---------------------------------------------------------------------------
// Nachrichten
// ---------------------------------------------------------------------------

/// Textnachricht an einen Kanal eines Servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessageRequest {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessageEvent {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub author: UserName,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessageRequest {
    pub dm_id: DmId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessageEvent {
    pub dm_id: DmId,
    pub author: UserName,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Bestaetigung mit Anzahl erfolgreicher Zustellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSentResponse {
    pub delivered: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping vom Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    /// Originaler Timestamp aus dem Ping
    pub echo_timestamp_ms: u64,
    /// Server-eigener Timestamp
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum
// ---------------------------------------------------------------------------

/// Alle moeglichen Control-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    // Auth (nur unauthentifiziert)
    Signup(SignupRequest),
    VerifyEmail(VerifyEmailRequest),
    Login(LoginRequest),
    Token(TokenRequest),
    PasswordResetRequest(PasswordResetRequest),
    PasswordResetValidate(PasswordResetValidateRequest),
    PasswordResetComplete(PasswordResetCompleteRequest),
    AuthOk(AuthOkResponse),
    VerificationRequired(VerificationRequiredResponse),
    PasswordResetRequested(PasswordResetRequestedResponse),
    PasswordResetValid(PasswordResetValidResponse),
    PasswordResetCompleted,

    // Account
    TwoFactorEnable,
    TwoFactorEnabled(TwoFactorSetupResponse),
    TwoFactorDisable(TwoFactorDisableRequest),
    TwoFactorDisabled,
    InviteCreate,
    InviteCreated(InviteCreatedResponse),

    // Presence
    UserOnline(PresenceEvent),
    UserOffline(PresenceEvent),

    // Voice
    VoiceJoin(VoiceJoinRequest),
    VoiceLeave,
    VoiceLeft,
    VoiceRoster(VoiceRosterEvent),
    MediaFlagSet(MediaFlagRequest),
    MediaFlagsChanged(MediaFlagsEvent),
    CallStart(CallStartRequest),
    CallAccept(CallAnswerRequest),
    CallReject(CallAnswerRequest),
    CallRinging(CallPeerEvent),
    IncomingCall(CallPeerEvent),
    CallAccepted(CallPeerEvent),
    CallRejected(CallPeerEvent),
    CallEnded(CallEndedEvent),

    // Berechtigungen und Moderation
    PermissionCheck(PermissionCheckRequest),
    PermissionResult(PermissionResultResponse),
    Moderate(ModerateRequest),
    ModerationApplied(ModerationEvent),
    ModerationRevoke(ModerationRevokeRequest),
    ModerationRevoked(ModerationRevokedEvent),

    // Nachrichten
    ChannelMessage(ChannelMessageRequest),
    ChannelMessageReceived(ChannelMessageEvent),
    DirectMessage(DirectMessageRequest),
    DirectMessageReceived(DirectMessageEvent),
    MessageSent(MessageSentResponse),

    // Keepalive und Verbindungsende
    Ping(PingMessage),
    Pong(PongMessage),
    Quit,
    Goodbye,

    // Error
    Error(ErrorResponse),
}

impl ControlPayload {
    /// Name des Typ-Tags (fuer Logging)
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::Signup(_) => "signup",
            Self::VerifyEmail(_) => "verify_email",
            Self::Login(_) => "login",
            Self::Token(_) => "token",
            Self::PasswordResetRequest(_) => "password_reset_request",
            Self::PasswordResetValidate(_) => "password_reset_validate",
            Self::PasswordResetComplete(_) => "password_reset_complete",
            Self::AuthOk(_) => "auth_ok",
            Self::VerificationRequired(_) => "verification_required",
            Self::PasswordResetRequested(_) => "password_reset_requested",
            Self::PasswordResetValid(_) => "password_reset_valid",
            Self::PasswordResetCompleted => "password_reset_completed",
            Self::TwoFactorEnable => "two_factor_enable",
            Self::TwoFactorEnabled(_) => "two_factor_enabled",
            Self::TwoFactorDisable(_) => "two_factor_disable",
            Self::TwoFactorDisabled => "two_factor_disabled",
            Self::InviteCreate => "invite_create",
            Self::InviteCreated(_) => "invite_created",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::VoiceJoin(_) => "voice_join",
            Self::VoiceLeave => "voice_leave",
            Self::VoiceLeft => "voice_left",
            Self::VoiceRoster(_) => "voice_roster",
            Self::MediaFlagSet(_) => "media_flag_set",
            Self::MediaFlagsChanged(_) => "media_flags_changed",
            Self::CallStart(_) => "call_start",
            Self::CallAccept(_) => "call_accept",
            Self::CallReject(_) => "call_reject",
            Self::CallRinging(_) => "call_ringing",
            Self::IncomingCall(_) => "incoming_call",
            Self::CallAccepted(_) => "call_accepted",
            Self::CallRejected(_) => "call_rejected",
            Self::CallEnded(_) => "call_ended",
            Self::PermissionCheck(_) => "permission_check",
            Self::PermissionResult(_) => "permission_result",
            Self::Moderate(_) => "moderate",
            Self::ModerationApplied(_) => "moderation_applied",
            Self::ModerationRevoke(_) => "moderation_revoke",
            Self::ModerationRevoked(_) => "moderation_revoked",
            Self::ChannelMessage(_) => "channel_message",
            Self::ChannelMessageReceived(_) => "channel_message_received",
            Self::DirectMessage(_) => "direct_message",
            Self::DirectMessageReceived(_) => "direct_message_received",
            Self::MessageSent(_) => "message_sent",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Quit => "quit",
            Self::Goodbye => "goodbye",
            Self::Error(_) => "error",
        }
    }
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Optionale maschinenlesbare Details
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Control-Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Jede Nachricht traegt eine `request_id` die der Client vergibt.
/// Der Server kopiert die ID in die Antwort damit der Client
/// Request und Response zuordnen kann.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Eindeutige Nachrichten-ID fuer Request/Response-Zuordnung
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: ControlPayload,
}

impl ControlMessage {
    /// Erstellt eine neue Control-Nachricht
    pub fn new(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt ein Server-Event ohne Request-Bezug
    pub fn event(payload: ControlPayload) -> Self {
        Self::new(0, payload)
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
                details: None,
            }),
        )
    }

    /// Gibt den Fehler-Code zurueck falls es sich um eine Fehler-Antwort handelt
    pub fn fehler_code(&self) -> Option<ErrorCode> {
        match &self.payload {
            ControlPayload::Error(e) => Some(e.code),
            _ => None,
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_ist_flaches_tagged_record() {
        let msg = ControlMessage::new(
            5,
            ControlPayload::Login(LoginRequest {
                username: "alice".to_string(),
                password: "geheim".to_string(),
                two_factor_code: None,
            }),
        );
        let wert: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(wert["request_id"], 5);
        assert_eq!(wert["payload"]["type"], "login");
        assert_eq!(wert["payload"]["username"], "alice");
    }

    #[test]
    fn fehlende_optionale_felder_sind_erlaubt() {
        let json = r#"{"request_id":3,"payload":{"type":"login","username":"bob","password":"pw"}}"#;
        let msg = ControlMessage::from_json(json).unwrap();
        match msg.payload {
            ControlPayload::Login(l) => {
                assert_eq!(l.username, "bob");
                assert!(l.two_factor_code.is_none());
            }
            other => panic!("Erwartet Login, erhalten {}", other.typ_name()),
        }
    }

    #[test]
    fn unbekannter_typ_ist_deserialisierungsfehler() {
        let json = r#"{"request_id":1,"payload":{"type":"teleport"}}"#;
        assert!(ControlMessage::from_json(json).is_err());
    }

    #[test]
    fn unit_varianten_serialisierung() {
        let msg = ControlMessage::new(10, ControlPayload::VoiceLeave);
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"voice_leave""#));
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert!(matches!(decoded.payload, ControlPayload::VoiceLeave));
    }

    #[test]
    fn error_response_serialisierung() {
        let msg = ControlMessage::error(42, ErrorCode::PermissionDenied, "Keine Berechtigung");
        let json = msg.to_json().unwrap();
        assert!(json.contains("PERMISSION_DENIED"));
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 42);
        assert_eq!(decoded.fehler_code(), Some(ErrorCode::PermissionDenied));
    }

    #[test]
    fn fehler_codes_haben_kategorien() {
        assert_eq!(ErrorCode::UnknownType.kategorie(), FehlerKategorie::Validierung);
        assert_eq!(ErrorCode::TwoFactorRequired.kategorie(), FehlerKategorie::Auth);
        assert_eq!(ErrorCode::TooManyAttempts.kategorie(), FehlerKategorie::Auth);
        assert_eq!(ErrorCode::Banned.kategorie(), FehlerKategorie::Autorisierung);
        assert_eq!(ErrorCode::Conflict.kategorie(), FehlerKategorie::Konflikt);
        assert_eq!(ErrorCode::InternalError.kategorie(), FehlerKategorie::Infrastruktur);
    }

    #[test]
    fn media_flag_setzen() {
        let mut flags = MediaFlags::default();
        flags.setzen(MediaFlag::ScreenSharing, true);
        assert!(flags.screen_sharing);
        assert!(!flags.muted);
        let json = serde_json::to_string(&MediaFlag::ShowingScreen).unwrap();
        assert_eq!(json, "\"showing_screen\"");
    }

    #[test]
    fn moderation_typ_klein_geschrieben() {
        let json = serde_json::to_string(&ModerationType::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
    }
}
