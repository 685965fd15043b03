//! Event-Broadcaster – Sendet Events an die relevanten Verbindungen
//!
//! Der Broadcaster haelt die Send-Queue jeder offenen Verbindung und
//! optional die daran gebundene Identitaet. Zugestellt wird nie
//! blockierend: eine volle oder geschlossene Queue wird im
//! [`ZustellBericht`] vermerkt und beeinflusst die anderen Empfaenger
//! nicht.
//!
//! ## Selektives Broadcasting
//! - An alle Verbindungen: `an_alle_senden`
//! - An die Verbindungen einer Mitgliederliste: `an_mitglieder_senden`
//! - An genau eine Verbindung einer Identitaet: `an_user_senden`
//!
//! Mandanten- und DM-Empfaenger loest der `SignalingState` ueber die
//! Persistenz auf und reicht sie als Mitgliederliste herein.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use stammtisch_core::types::{ConnectionId, UserName};
use stammtisch_protocol::control::ControlMessage;
use tokio::sync::mpsc;

/// Standard-Groesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Zustellbericht
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZustellStatus {
    Zugestellt,
    /// Queue voll, Nachricht verworfen
    QueueVoll,
    /// Verbindung hat ihre Queue bereits geschlossen
    Getrennt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zustellung {
    pub verbindung: ConnectionId,
    pub username: Option<UserName>,
    pub status: ZustellStatus,
}

/// Ergebnis pro Empfaenger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZustellBericht {
    pub zustellungen: Vec<Zustellung>,
}

impl ZustellBericht {
    pub fn zugestellt(&self) -> usize {
        self.zustellungen
            .iter()
            .filter(|z| z.status == ZustellStatus::Zugestellt)
            .count()
    }

    pub fn fehlgeschlagen(&self) -> usize {
        self.zustellungen.len() - self.zugestellt()
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

struct VerbindungsEintrag {
    username: Option<UserName>,
    tx: mpsc::Sender<ControlMessage>,
}

impl VerbindungsEintrag {
    fn senden(&self, id: ConnectionId, nachricht: ControlMessage) -> Zustellung {
        let status = match self.tx.try_send(nachricht) {
            Ok(()) => ZustellStatus::Zugestellt,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "Send-Queue voll – Nachricht verworfen");
                ZustellStatus::QueueVoll
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %id, "Send-Queue geschlossen (Client getrennt)");
                ZustellStatus::Getrennt
            }
        };
        Zustellung {
            verbindung: id,
            username: self.username.clone(),
            status,
        }
    }
}

struct BroadcasterInner {
    verbindungen: DashMap<ConnectionId, VerbindungsEintrag>,
    naechste_id: AtomicU64,
    queue_groesse: usize,
}

/// Zentraler Broadcaster fuer alle offenen Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

impl EventBroadcaster {
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                verbindungen: DashMap::new(),
                naechste_id: AtomicU64::new(1),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine neue, noch anonyme Verbindung
    ///
    /// Die Verbindung liest aus der zurueckgegebenen Queue und schreibt
    /// auf ihren Transport.
    pub fn verbindung_registrieren(&self) -> (ConnectionId, mpsc::Receiver<ControlMessage>) {
        let id = ConnectionId(self.inner.naechste_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        self.inner
            .verbindungen
            .insert(id, VerbindungsEintrag { username: None, tx });
        tracing::debug!(connection_id = %id, "Verbindung im Broadcaster registriert");
        (id, rx)
    }

    /// Bindet eine Identitaet an die Verbindung; `false` wenn sie schon weg ist
    pub fn binden(&self, id: ConnectionId, username: &UserName) -> bool {
        match self.inner.verbindungen.get_mut(&id) {
            Some(mut eintrag) => {
                eintrag.username = Some(username.clone());
                true
            }
            None => false,
        }
    }

    /// Entfernt die Verbindung
    ///
    /// Nur der erste Aufruf pro Verbindung liefert `Some`; der Inhalt ist
    /// die gebundene Identitaet. Darauf beruht das einmalige Aufraeumen.
    pub fn entfernen(&self, id: ConnectionId) -> Option<Option<UserName>> {
        let (_, eintrag) = self.inner.verbindungen.remove(&id)?;
        tracing::debug!(connection_id = %id, "Verbindung aus Broadcaster entfernt");
        Some(eintrag.username)
    }

    pub fn gebunden_an(&self, id: ConnectionId) -> Option<UserName> {
        self.inner
            .verbindungen
            .get(&id)
            .and_then(|e| e.username.clone())
    }

    /// Alle offenen Verbindungen einer Identitaet, aufsteigend sortiert
    pub fn verbindungen_von(&self, username: &UserName) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .inner
            .verbindungen
            .iter()
            .filter(|e| e.username.as_ref() == Some(username))
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }

    /// Sendet an eine bestimmte Verbindung
    pub fn an_verbindung_senden(
        &self,
        id: ConnectionId,
        nachricht: ControlMessage,
    ) -> Option<Zustellung> {
        self.inner
            .verbindungen
            .get(&id)
            .map(|eintrag| eintrag.senden(id, nachricht))
    }

    /// Sendet an jede offene Verbindung, ausser `ausser`
    pub fn an_alle_senden(
        &self,
        nachricht: &ControlMessage,
        ausser: Option<ConnectionId>,
    ) -> ZustellBericht {
        let zustellungen = self
            .inner
            .verbindungen
            .iter()
            .filter(|e| Some(*e.key()) != ausser)
            .map(|e| e.senden(*e.key(), nachricht.clone()))
            .collect();
        ZustellBericht { zustellungen }
    }

    /// Sendet an jede Verbindung, deren Identitaet in `mitglieder` steht
    pub fn an_mitglieder_senden(
        &self,
        mitglieder: &[UserName],
        nachricht: &ControlMessage,
        ausser: Option<ConnectionId>,
    ) -> ZustellBericht {
        let menge: HashSet<&UserName> = mitglieder.iter().collect();
        let zustellungen = self
            .inner
            .verbindungen
            .iter()
            .filter(|e| Some(*e.key()) != ausser)
            .filter(|e| e.username.as_ref().is_some_and(|u| menge.contains(u)))
            .map(|e| e.senden(*e.key(), nachricht.clone()))
            .collect();
        ZustellBericht { zustellungen }
    }

    /// Sendet an die aelteste Verbindung einer Identitaet
    ///
    /// Ohne passende Verbindung ist der Bericht leer.
    pub fn an_user_senden(&self, username: &UserName, nachricht: ControlMessage) -> ZustellBericht {
        let erste = self
            .inner
            .verbindungen
            .iter()
            .filter(|e| e.username.as_ref() == Some(username))
            .map(|e| *e.key())
            .min();

        let zustellungen = erste
            .and_then(|id| self.an_verbindung_senden(id, nachricht))
            .into_iter()
            .collect();
        ZustellBericht { zustellungen }
    }
}
