//! Fehlertypen fuer den Auth-Service

use stammtisch_db::DbError;
use thiserror::Error;

/// Alle moeglichen Fehler im Auth-Service
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Eingaben ---
    #[error("Ungueltige Eingabe: {0}")]
    Validierung(String),

    // --- Passwort ---
    #[error("Passwort-Hashing fehlgeschlagen: {0}")]
    PasswortHashing(String),

    // --- Authentifizierung ---
    #[error("Benutzername oder Passwort falsch")]
    UngueltigeAnmeldedaten,

    #[error("Zweiter Faktor erforderlich")]
    ZweiterFaktorErforderlich,

    #[error("Code ungueltig")]
    CodeUngueltig,

    #[error("Code abgelaufen")]
    CodeAbgelaufen,

    #[error("Benutzer gesperrt")]
    BenutzerGesperrt,

    #[error("Zu viele falsche Codes, bitte spaeter erneut versuchen")]
    ZuVieleVersuche,

    // --- Session ---
    #[error("Session nicht gefunden oder abgelaufen")]
    SessionUngueltig,

    #[error("Session abgelaufen")]
    SessionAbgelaufen,

    // --- Benutzerverwaltung ---
    #[error("Benutzername bereits vergeben: {0}")]
    BenutzernameVergeben(String),

    #[error("Registrierung fuer '{0}' wartet bereits auf Bestaetigung")]
    PendingSignupExistiert(String),

    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    // --- Berechtigungen und Moderation ---
    #[error("Zugriff verweigert: Berechtigung '{0}' fehlt")]
    ZugriffVerweigert(String),

    #[error("Konflikt: {0}")]
    Konflikt(String),

    // --- Infrastruktur ---
    #[error("Datenbankfehler: {0}")]
    Datenbank(#[from] DbError),

    #[error("E-Mail-Versand fehlgeschlagen: {0}")]
    Mail(String),

    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl AuthError {
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    pub fn validierung(msg: impl Into<String>) -> Self {
        Self::Validierung(msg.into())
    }
}

/// Result-Alias fuer den Auth-Service
pub type AuthResult<T> = Result<T, AuthError>;
