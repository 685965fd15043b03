//! Sliding-Window Rate-Limiter
//!
//! Pro Schluessel werden die Zeitpunkte der erlaubten Versuche gemerkt.
//! Ein Versuch ist erlaubt, solange im zurueckliegenden Fenster weniger als
//! `max_versuche` erlaubte Versuche liegen. Abgelehnte Versuche zaehlen nicht.
//!
//! Schluessel ohne Versuche im Fenster werden entfernt, entweder beim
//! naechsten Zugriff oder durch [`RateLimiter::aufraeumen_zum`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Konfiguration eines Rate-Limiters
#[derive(Debug, Clone, Copy)]
pub struct RateLimitKonfig {
    pub max_versuche: usize,
    pub fenster: Duration,
}

impl Default for RateLimitKonfig {
    /// 3 Versuche pro Stunde
    fn default() -> Self {
        Self {
            max_versuche: 3,
            fenster: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    konfig: RateLimitKonfig,
    versuche: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn neu(konfig: RateLimitKonfig) -> Self {
        Self {
            konfig,
            versuche: Mutex::new(HashMap::new()),
        }
    }

    pub fn erlauben(&self, schluessel: &str) -> bool {
        self.erlauben_zum(schluessel, Instant::now())
    }

    /// Prueft und verbucht einen Versuch zum Zeitpunkt `jetzt`
    pub fn erlauben_zum(&self, schluessel: &str, jetzt: Instant) -> bool {
        let mut versuche = self.versuche.lock();
        let liste = versuche.entry(schluessel.to_string()).or_default();
        veraltete_entfernen(liste, jetzt, self.konfig.fenster);
        if liste.len() >= self.konfig.max_versuche {
            return false;
        }
        liste.push_back(jetzt);
        true
    }

    pub fn gesperrt(&self, schluessel: &str) -> bool {
        self.gesperrt_zum(schluessel, Instant::now())
    }

    /// Ob der naechste Versuch abgelehnt wuerde; verbucht nichts
    pub fn gesperrt_zum(&self, schluessel: &str, jetzt: Instant) -> bool {
        let mut versuche = self.versuche.lock();
        let Some(liste) = versuche.get_mut(schluessel) else {
            return false;
        };
        veraltete_entfernen(liste, jetzt, self.konfig.fenster);
        if liste.is_empty() {
            versuche.remove(schluessel);
            return false;
        }
        liste.len() >= self.konfig.max_versuche
    }

    pub fn zuruecksetzen(&self, schluessel: &str) {
        self.versuche.lock().remove(schluessel);
    }

    /// Entfernt Schluessel ohne Versuche im aktuellen Fenster
    pub fn aufraeumen_zum(&self, jetzt: Instant) -> usize {
        let fenster = self.konfig.fenster;
        let mut versuche = self.versuche.lock();
        let vorher = versuche.len();
        versuche.retain(|_, liste| {
            veraltete_entfernen(liste, jetzt, fenster);
            !liste.is_empty()
        });
        vorher - versuche.len()
    }

    pub fn schluessel_anzahl(&self) -> usize {
        self.versuche.lock().len()
    }
}

fn veraltete_entfernen(liste: &mut VecDeque<Instant>, jetzt: Instant, fenster: Duration) {
    while let Some(&aeltester) = liste.front() {
        if jetzt.saturating_duration_since(aeltester) >= fenster {
            liste.pop_front();
        } else {
            break;
        }
    }
}
