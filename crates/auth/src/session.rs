//! Session-Management
//!
//! Kurzlebige Session-Tokens fuer angemeldete Benutzer. Sessions liegen im
//! Speicher und erlauben die Wiederanmeldung per `token`-Frame.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::RngCore;
use stammtisch_core::types::UserName;
use tokio::sync::RwLock;

use crate::error::{AuthError, AuthResult};

/// Intervall fuer den Cleanup-Task: 15 Minuten
const CLEANUP_INTERVALL: Duration = Duration::from_secs(15 * 60);

/// Ein aktives Session-Token
#[derive(Debug, Clone)]
pub struct Session {
    /// URL-sicheres Base64
    pub token: String,
    pub username: UserName,
    pub erstellt_am: DateTime<Utc>,
    pub laeuft_ab_am: DateTime<Utc>,
}

impl Session {
    pub fn ist_gueltig_zum(&self, jetzt: DateTime<Utc>) -> bool {
        jetzt < self.laeuft_ab_am
    }
}

/// In-Memory Session-Store mit fester Lebensdauer
#[derive(Debug)]
pub struct SessionStore {
    ttl: chrono::Duration,
    /// token -> Session
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn neu(ttl: chrono::Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Startet einen Hintergrund-Task der abgelaufene Sessions entfernt
    pub fn cleanup_starten(store: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVALL).await;
                let entfernt = store.cleanup_abgelaufene(Utc::now()).await;
                if entfernt > 0 {
                    tracing::debug!(anzahl = entfernt, "Abgelaufene Sessions bereinigt");
                }
            }
        })
    }

    pub async fn erstellen(&self, username: &UserName) -> Session {
        self.erstellen_zum(username, Utc::now()).await
    }

    pub async fn erstellen_zum(&self, username: &UserName, jetzt: DateTime<Utc>) -> Session {
        let session = Session {
            token: token_generieren(),
            username: username.clone(),
            erstellt_am: jetzt,
            laeuft_ab_am: jetzt + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        tracing::debug!(username = %username, "Neue Session erstellt");
        session
    }

    pub async fn validieren(&self, token: &str) -> AuthResult<Session> {
        self.validieren_zum(token, Utc::now()).await
    }

    /// `SessionUngueltig` fuer unbekannte, `SessionAbgelaufen` fuer alte Tokens
    pub async fn validieren_zum(&self, token: &str, jetzt: DateTime<Utc>) -> AuthResult<Session> {
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            None => Err(AuthError::SessionUngueltig),
            Some(session) if !session.ist_gueltig_zum(jetzt) => Err(AuthError::SessionAbgelaufen),
            Some(session) => Ok(session.clone()),
        }
    }

    pub async fn invalidieren(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Invalidiert alle Sessions eines Benutzers (z.B. nach Passwort-Reset)
    pub async fn alle_invalidieren(&self, username: &UserName) -> usize {
        let mut sessions = self.sessions.write().await;
        let vorher = sessions.len();
        sessions.retain(|_, s| &s.username != username);
        let entfernt = vorher - sessions.len();
        if entfernt > 0 {
            tracing::debug!(username = %username, anzahl = entfernt, "Alle Sessions invalidiert");
        }
        entfernt
    }

    pub async fn cleanup_abgelaufene(&self, jetzt: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let vorher = sessions.len();
        sessions.retain(|_, s| s.laeuft_ab_am > jetzt);
        vorher - sessions.len()
    }

    pub async fn anzahl_aktive(&self) -> usize {
        let jetzt = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.ist_gueltig_zum(jetzt))
            .count()
    }
}

/// Kryptografisch zufaelliger Token (32 Bytes, URL-sicheres Base64)
pub(crate) fn token_generieren() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::neu(chrono::Duration::hours(24))
    }

    #[tokio::test]
    async fn erstellen_und_validieren() {
        let store = store();
        let alice = UserName::from("alice");
        let session = store.erstellen(&alice).await;

        let geprueft = store.validieren(&session.token).await.unwrap();
        assert_eq!(geprueft.username, alice);
    }

    #[tokio::test]
    async fn unbekannter_token() {
        let ergebnis = store().validieren("gibt_es_nicht").await;
        assert!(matches!(ergebnis, Err(AuthError::SessionUngueltig)));
    }

    #[tokio::test]
    async fn abgelaufene_session() {
        let store = store();
        let jetzt = Utc::now();
        let session = store.erstellen_zum(&UserName::from("bob"), jetzt).await;

        let spaeter = jetzt + chrono::Duration::hours(25);
        let ergebnis = store.validieren_zum(&session.token, spaeter).await;
        assert!(matches!(ergebnis, Err(AuthError::SessionAbgelaufen)));
        assert_eq!(store.cleanup_abgelaufene(spaeter).await, 1);
    }

    #[tokio::test]
    async fn alle_sessions_eines_benutzers_invalidieren() {
        let store = store();
        let alice = UserName::from("alice");
        store.erstellen(&alice).await;
        store.erstellen(&alice).await;
        let bob = store.erstellen(&UserName::from("bob")).await;

        assert_eq!(store.alle_invalidieren(&alice).await, 2);
        assert_eq!(store.anzahl_aktive().await, 1);
        assert!(store.validieren(&bob.token).await.is_ok());
    }

    #[tokio::test]
    async fn tokens_sind_eindeutig() {
        let store = store();
        let alice = UserName::from("alice");
        let s1 = store.erstellen(&alice).await;
        let s2 = store.erstellen(&alice).await;
        assert_ne!(s1.token, s2.token);
        assert!(store.invalidieren(&s1.token).await);
        assert!(!store.invalidieren(&s1.token).await);
    }
}
