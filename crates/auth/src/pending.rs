//! Ausstehende Registrierungen
//!
//! Zwischen `signup` und `verify_email` existiert ein Benutzer nur hier.
//! Pro Benutzername gibt es hoechstens einen Eintrag; Pruefen und Einfuegen
//! passieren unter demselben Lock. Ein Eintrag, dessen Code abgelaufen ist,
//! zaehlt nicht mehr und wird beim naechsten Zugriff verworfen.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stammtisch_core::types::UserName;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignup {
    pub username: UserName,
    pub email: String,
    pub password_hash: String,
    /// Bereits gepruefter Einladungscode, wird erst bei Bestaetigung verbraucht
    pub invite_code: Option<String>,
    /// Ablauf des zugehoerigen Verifikationscodes
    pub laeuft_ab_am: DateTime<Utc>,
}

impl PendingSignup {
    pub fn ist_abgelaufen(&self, jetzt: DateTime<Utc>) -> bool {
        jetzt >= self.laeuft_ab_am
    }
}

#[derive(Debug, Default)]
pub struct PendingSignups {
    eintraege: Mutex<HashMap<UserName, PendingSignup>>,
}

impl PendingSignups {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Konflikt, wenn fuer den Namen ein gueltiger Eintrag existiert. Der alte bleibt unveraendert.
    ///
    /// Ein abgelaufener Eintrag wird ersetzt und zurueckgegeben; der
    /// Aufrufer raeumt dessen Code weg.
    pub fn einfuegen(
        &self,
        signup: PendingSignup,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<Option<PendingSignup>> {
        let mut eintraege = self.eintraege.lock();
        if eintraege
            .get(&signup.username)
            .is_some_and(|alt| !alt.ist_abgelaufen(jetzt))
        {
            return Err(AuthError::PendingSignupExistiert(signup.username.to_string()));
        }
        Ok(eintraege.insert(signup.username.clone(), signup))
    }

    pub fn get(&self, username: &UserName) -> Option<PendingSignup> {
        self.eintraege.lock().get(username).cloned()
    }

    pub fn existiert(&self, username: &UserName) -> bool {
        self.eintraege.lock().contains_key(username)
    }

    pub fn entfernen(&self, username: &UserName) -> Option<PendingSignup> {
        self.eintraege.lock().remove(username)
    }

    /// Entfernt den Eintrag von `username` nur, wenn er abgelaufen ist
    pub fn abgelaufen_entfernen(
        &self,
        username: &UserName,
        jetzt: DateTime<Utc>,
    ) -> Option<PendingSignup> {
        let mut eintraege = self.eintraege.lock();
        if eintraege.get(username)?.ist_abgelaufen(jetzt) {
            eintraege.remove(username)
        } else {
            None
        }
    }

    /// Entfernt alle abgelaufenen Eintraege
    pub fn abgelaufene_entfernen(&self, jetzt: DateTime<Utc>) -> Vec<PendingSignup> {
        let mut eintraege = self.eintraege.lock();
        let namen: Vec<UserName> = eintraege
            .values()
            .filter(|s| s.ist_abgelaufen(jetzt))
            .map(|s| s.username.clone())
            .collect();
        namen
            .iter()
            .filter_map(|name| eintraege.remove(name))
            .collect()
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.lock().len()
    }
}
