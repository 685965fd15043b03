//! Passwort-Hashing mit Argon2id
//!
//! Hashes werden als PHC-String gespeichert, Parameter und Salt stecken
//! im String selbst. Dazu kommen die Eingaberegeln fuer Passwoerter.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params, Version,
};

use crate::error::{AuthError, AuthResult};

pub const PASSWORT_MIN_LAENGE: usize = 8;
pub const PASSWORT_MAX_LAENGE: usize = 128;

fn argon2_instanz() -> AuthResult<Argon2<'static>> {
    // 64 MiB, 3 Iterationen, 1 Thread
    let params = Params::new(64 * 1024, 3, 1, None)
        .map_err(|e| AuthError::PasswortHashing(format!("Argon2-Parameter ungueltig: {e}")))?;
    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

/// Prueft Laenge und Inhalt eines neuen Passworts
pub fn passwort_regeln_pruefen(passwort: &str) -> AuthResult<()> {
    let laenge = passwort.chars().count();
    if laenge < PASSWORT_MIN_LAENGE {
        return Err(AuthError::validierung(format!(
            "Passwort muss mindestens {PASSWORT_MIN_LAENGE} Zeichen haben"
        )));
    }
    if laenge > PASSWORT_MAX_LAENGE {
        return Err(AuthError::validierung(format!(
            "Passwort darf hoechstens {PASSWORT_MAX_LAENGE} Zeichen haben"
        )));
    }
    if passwort.trim().is_empty() {
        return Err(AuthError::validierung("Passwort darf nicht nur aus Leerzeichen bestehen"));
    }
    Ok(())
}

/// Hasht ein Passwort mit Argon2id und zufaelligem Salt
pub fn passwort_hashen(passwort: &str) -> AuthResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    argon2_instanz()?
        .hash_password(passwort.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::PasswortHashing(e.to_string()))
}

/// Verifiziert ein Passwort gegen einen gespeicherten PHC-Hash
pub fn passwort_verifizieren(passwort: &str, hash: &str) -> AuthResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AuthError::PasswortHashing(format!("Ungueltiges Hash-Format: {e}")))?;

    match argon2_instanz()?.verify_password(passwort.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AuthError::PasswortHashing(e.to_string())),
    }
}
