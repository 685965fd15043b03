//! Zweiter Faktor: TOTP (RFC 6238) und Backup-Codes
//!
//! TOTP: SHA1, 6 Stellen, 30 Sekunden, +-1 Schritt Toleranz.
//! Backup-Codes werden nur als SHA-256-Digest gespeichert und sind einmalig.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use stammtisch_core::types::UserName;
use stammtisch_db::models::BenutzerRecord;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{AuthError, AuthResult};

const TOTP_STELLEN: usize = 6;
const TOTP_SCHRITT: u64 = 30;
const TOTP_TOLERANZ: u8 = 1;
/// 160 Bit, Standard fuer SHA1
const SECRET_LAENGE: usize = 20;

pub const BACKUP_CODE_ANZAHL: usize = 10;
const BACKUP_CODE_ZEICHEN: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const BACKUP_CODE_HAELFTE: usize = 5;

/// Ergebnis der 2FA-Einrichtung. Klartext-Codes sieht der Benutzer genau einmal.
#[derive(Debug, Clone)]
pub struct ZweiFaktorEinrichtung {
    pub secret: String,
    pub otpauth_url: String,
    pub backup_codes: Vec<String>,
    pub backup_hashes: Vec<String>,
}

/// Welcher Faktor eine Pruefung bestanden hat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaktorTreffer {
    Totp,
    /// Die uebrigen Digests nach Entfernen des verbrauchten Codes
    BackupCode { verbleibend: Vec<String> },
}

fn totp_instanz(secret: &str, issuer: &str, username: &UserName) -> AuthResult<TOTP> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| AuthError::intern(format!("TOTP-Secret ungueltig: {e}")))?;
    TOTP::new(
        Algorithm::SHA1,
        TOTP_STELLEN,
        TOTP_TOLERANZ,
        TOTP_SCHRITT,
        bytes,
        Some(issuer.to_string()),
        username.to_string(),
    )
    .map_err(|e| AuthError::intern(format!("TOTP konnte nicht erstellt werden: {e}")))
}

/// Erzeugt Secret, otpauth-URL und Backup-Codes
pub fn einrichtung_erzeugen(issuer: &str, username: &UserName) -> AuthResult<ZweiFaktorEinrichtung> {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..SECRET_LAENGE).map(|_| rng.gen::<u8>()).collect();
    let secret = Secret::Raw(bytes).to_encoded().to_string();
    let otpauth_url = totp_instanz(&secret, issuer, username)?.get_url();

    let backup_codes: Vec<String> = (0..BACKUP_CODE_ANZAHL)
        .map(|_| backup_code_generieren())
        .collect();
    let backup_hashes = backup_codes.iter().map(|c| backup_code_digest(c)).collect();

    Ok(ZweiFaktorEinrichtung {
        secret,
        otpauth_url,
        backup_codes,
        backup_hashes,
    })
}

/// Aktueller TOTP-Code zu einem Secret
pub fn totp_code_erzeugen(secret: &str, issuer: &str, username: &UserName) -> AuthResult<String> {
    totp_instanz(secret, issuer, username)?
        .generate_current()
        .map_err(|e| AuthError::intern(format!("Systemzeit ungueltig: {e}")))
}

pub fn totp_pruefen(secret: &str, issuer: &str, username: &UserName, code: &str) -> AuthResult<bool> {
    let code = code.trim();
    if code.len() != TOTP_STELLEN || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }
    totp_instanz(secret, issuer, username)?
        .check_current(code)
        .map_err(|e| AuthError::intern(format!("Systemzeit ungueltig: {e}")))
}

/// Format `XXXXX-XXXXX`
fn backup_code_generieren() -> String {
    let mut rng = rand::thread_rng();
    let mut zeichen = || BACKUP_CODE_ZEICHEN[rng.gen_range(0..BACKUP_CODE_ZEICHEN.len())] as char;
    let links: String = (0..BACKUP_CODE_HAELFTE).map(|_| zeichen()).collect();
    let rechts: String = (0..BACKUP_CODE_HAELFTE).map(|_| zeichen()).collect();
    format!("{links}-{rechts}")
}

/// Digest eines Backup-Codes; Gross/Kleinschreibung und Trennzeichen egal
pub fn backup_code_digest(code: &str) -> String {
    let normalisiert: String = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    STANDARD_NO_PAD.encode(Sha256::digest(normalisiert.as_bytes()))
}

/// Entfernt den ersten passenden Digest. `None` wenn kein Code passt.
pub fn backup_code_einloesen(digests: &[String], code: &str) -> Option<Vec<String>> {
    let gesucht = backup_code_digest(code);
    let position = digests.iter().position(|d| *d == gesucht)?;
    let mut verbleibend = digests.to_vec();
    verbleibend.remove(position);
    Some(verbleibend)
}

/// Prueft erst TOTP, dann Backup-Codes
pub fn faktor_pruefen(
    benutzer: &BenutzerRecord,
    issuer: &str,
    code: &str,
) -> AuthResult<Option<FaktorTreffer>> {
    let Some(secret) = benutzer.totp_secret.as_deref() else {
        return Ok(None);
    };
    if totp_pruefen(secret, issuer, &benutzer.username, code)? {
        return Ok(Some(FaktorTreffer::Totp));
    }
    Ok(backup_code_einloesen(&benutzer.backup_codes, code)
        .map(|verbleibend| FaktorTreffer::BackupCode { verbleibend }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "Stammtisch";

    #[test]
    fn einrichtung_liefert_zehn_codes() {
        let alice = UserName::from("alice");
        let e = einrichtung_erzeugen(ISSUER, &alice).unwrap();
        assert_eq!(e.backup_codes.len(), BACKUP_CODE_ANZAHL);
        assert_eq!(e.backup_hashes.len(), BACKUP_CODE_ANZAHL);
        assert!(e.otpauth_url.starts_with("otpauth://totp/"));
        assert!(e.backup_codes.iter().all(|c| c.len() == 11 && c.as_bytes()[5] == b'-'));
        // Klartext wird nie gespeichert
        assert!(!e.backup_hashes.contains(&e.backup_codes[0]));
    }

    #[test]
    fn aktueller_totp_code_ist_gueltig() {
        let alice = UserName::from("alice");
        let e = einrichtung_erzeugen(ISSUER, &alice).unwrap();
        let code = totp_code_erzeugen(&e.secret, ISSUER, &alice).unwrap();
        assert!(totp_pruefen(&e.secret, ISSUER, &alice, &code).unwrap());
        assert!(!totp_pruefen(&e.secret, ISSUER, &alice, "abc").unwrap());
    }

    #[test]
    fn backup_code_nur_einmal() {
        let e = einrichtung_erzeugen(ISSUER, &UserName::from("bob")).unwrap();
        let code = e.backup_codes[3].to_lowercase();

        let rest = backup_code_einloesen(&e.backup_hashes, &code).unwrap();
        assert_eq!(rest.len(), BACKUP_CODE_ANZAHL - 1);
        assert!(backup_code_einloesen(&rest, &code).is_none());
    }

    #[test]
    fn digest_ignoriert_trennzeichen() {
        assert_eq!(backup_code_digest("ABCDE-FGHJK"), backup_code_digest("abcdefghjk"));
    }
}
