//! Fehlertypen fuer den Signaling-Service
//!
//! Jeder Fehler eines Handlers wird am Dispatcher in genau einen
//! Error-Frame umgewandelt. Die Verbindung bleibt dabei bestehen.

use stammtisch_auth::AuthError;
use stammtisch_db::DbError;
use stammtisch_protocol::control::{ControlMessage, ErrorCode, FehlerKategorie};
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Fehlerhafte oder fehlende Felder
    #[error("Ungueltige Anfrage: {0}")]
    Validierung(String),

    /// Nachricht vor der Anmeldung, die eine Anmeldung verlangt
    #[error("Nicht angemeldet")]
    NichtAngemeldet,

    /// Auth-Nachricht nach erfolgreicher Anmeldung
    #[error("Bereits angemeldet")]
    BereitsAngemeldet,

    /// Fehler aus dem Auth-Service
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Berechtigung fehlt
    #[error("Berechtigung verweigert: {0}")]
    ZugriffVerweigert(String),

    /// Aktiver Ban im Server
    #[error("Im Server gebannt: {0}")]
    Gebannt(String),

    /// Aktiver Timeout im Server
    #[error("Im Server stummgeschaltet: {0}")]
    ImTimeout(String),

    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Widerspruch zum aktuellen Zustand
    #[error("Konflikt: {0}")]
    Konflikt(String),

    /// Persistenz gestoert
    #[error("Datenbankfehler: {0}")]
    Datenbank(#[from] DbError),

    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    pub fn validierung(msg: impl Into<String>) -> Self {
        Self::Validierung(msg.into())
    }

    pub fn nicht_gefunden(msg: impl Into<String>) -> Self {
        Self::NichtGefunden(msg.into())
    }

    /// Wire-Code fuer die Fehlerantwort
    pub fn fehler_code(&self) -> ErrorCode {
        match self {
            Self::Validierung(_) => ErrorCode::InvalidRequest,
            Self::NichtAngemeldet => ErrorCode::NotAuthenticated,
            Self::BereitsAngemeldet => ErrorCode::AlreadyLoggedIn,
            Self::Auth(e) => auth_fehler_code(e),
            Self::ZugriffVerweigert(_) => ErrorCode::PermissionDenied,
            Self::Gebannt(_) => ErrorCode::Banned,
            Self::ImTimeout(_) => ErrorCode::TimedOut,
            Self::NichtGefunden(_) => ErrorCode::NotFound,
            Self::Konflikt(_) => ErrorCode::Conflict,
            Self::Datenbank(e) => db_fehler_code(e),
            Self::Io(_) | Self::Intern(_) => ErrorCode::InternalError,
        }
    }

    pub fn kategorie(&self) -> FehlerKategorie {
        self.fehler_code().kategorie()
    }

    /// Error-Frame fuer den Client
    ///
    /// Infrastrukturfehler verraten keine Interna; sie werden stattdessen
    /// mit `error`-Level geloggt.
    pub fn als_antwort(&self, request_id: u32) -> ControlMessage {
        let code = self.fehler_code();
        if code.kategorie() == FehlerKategorie::Infrastruktur {
            tracing::error!(request_id, fehler = %self, "Interner Fehler bei Anfrage");
            return ControlMessage::error(
                request_id,
                code,
                "Dienst voruebergehend nicht verfuegbar",
            );
        }
        ControlMessage::error(request_id, code, self.to_string())
    }
}

fn auth_fehler_code(fehler: &AuthError) -> ErrorCode {
    match fehler {
        AuthError::Validierung(_) => ErrorCode::InvalidRequest,
        AuthError::UngueltigeAnmeldedaten | AuthError::BenutzerGesperrt => {
            ErrorCode::InvalidCredentials
        }
        AuthError::ZweiterFaktorErforderlich => ErrorCode::TwoFactorRequired,
        AuthError::CodeUngueltig | AuthError::CodeAbgelaufen => ErrorCode::InvalidCode,
        AuthError::ZuVieleVersuche => ErrorCode::TooManyAttempts,
        AuthError::SessionUngueltig | AuthError::SessionAbgelaufen => ErrorCode::SessionExpired,
        AuthError::BenutzernameVergeben(_)
        | AuthError::PendingSignupExistiert(_)
        | AuthError::Konflikt(_) => ErrorCode::Conflict,
        AuthError::NichtGefunden(_) => ErrorCode::NotFound,
        AuthError::ZugriffVerweigert(_) => ErrorCode::PermissionDenied,
        AuthError::Datenbank(e) => db_fehler_code(e),
        AuthError::PasswortHashing(_) | AuthError::Mail(_) | AuthError::Intern(_) => {
            ErrorCode::InternalError
        }
    }
}

fn db_fehler_code(fehler: &DbError) -> ErrorCode {
    match fehler {
        DbError::Eindeutigkeit(_) => ErrorCode::Conflict,
        DbError::NichtGefunden(_) => ErrorCode::NotFound,
        DbError::UngueltigeDaten(_) => ErrorCode::InvalidRequest,
        DbError::NichtVerfuegbar(_) | DbError::Intern(_) => ErrorCode::InternalError,
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
