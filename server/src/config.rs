//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stammtisch_auth::{AuthKonfig, RateLimitKonfig};
use stammtisch_signaling::SignalingConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerEinstellungen,
    pub netzwerk: NetzwerkEinstellungen,
    pub auth: AuthEinstellungen,
    /// Ohne SMTP werden Konten bei der Registrierung sofort angelegt
    pub smtp: Option<SmtpEinstellungen>,
    pub logging: LoggingEinstellungen,
    /// Server, Kanaele und Rollen, die beim Start angelegt werden
    pub seed: Vec<SeedServer>,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_verbindungen: usize,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Stammtisch".into(),
            max_verbindungen: 512,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    pub tcp_port: u16,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_groesse: usize,
    /// Trennt Verbindungen, die so lange keinen Frame geschickt haben
    pub verbindungs_timeout_sek: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 7070,
            max_frame_groesse: stammtisch_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            verbindungs_timeout_sek: 90,
        }
    }
}

/// Registrierung, Sessions, Passwort-Reset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    /// Nur wirksam wenn `[smtp]` konfiguriert ist
    pub email_verifikation_erforderlich: bool,
    pub verifikations_code_gueltig_min: i64,
    pub reset_token_gueltig_min: i64,
    pub session_gueltig_std: i64,
    pub totp_issuer: String,
    pub reset_rate_limit_max: usize,
    pub reset_rate_limit_fenster_sek: u64,
}

impl Default for AuthEinstellungen {
    fn default() -> Self {
        Self {
            email_verifikation_erforderlich: true,
            verifikations_code_gueltig_min: 15,
            reset_token_gueltig_min: 60,
            session_gueltig_std: 24,
            totp_issuer: "Stammtisch".into(),
            reset_rate_limit_max: 3,
            reset_rate_limit_fenster_sek: 60 * 60,
        }
    }
}

/// SMTP-Zugang fuer den Mail-Versand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpEinstellungen {
    pub host: String,
    #[serde(default = "smtp_standard_port")]
    pub port: u16,
    pub benutzer: String,
    pub passwort: String,
    /// Absender, z.B. `Stammtisch <noreply@example.org>`
    pub absender: String,
    /// "starttls" (Standard), "tls" oder "none"
    #[serde(default = "smtp_standard_tls")]
    pub tls: String,
}

fn smtp_standard_port() -> u16 {
    587
}

fn smtp_standard_tls() -> String {
    "starttls".into()
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// "trace", "debug", "info", "warn" oder "error"
    pub level: String,
    /// "text" oder "json"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Server (Mandant), der beim Start im Speicher angelegt wird
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedServer {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub mitglieder: Vec<String>,
    #[serde(default)]
    pub kanaele: Vec<SeedKanal>,
    #[serde(default)]
    pub rollen: Vec<SeedRolle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedKanal {
    pub name: String,
    /// "voice" oder "text"
    #[serde(default = "seed_standard_kanal_typ")]
    pub typ: String,
}

fn seed_standard_kanal_typ() -> String {
    "voice".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRolle {
    pub name: String,
    #[serde(default)]
    pub position: i32,
    /// Berechtigung -> erteilt
    #[serde(default)]
    pub berechtigungen: BTreeMap<String, bool>,
    /// Mitglieder, denen die Rolle zugewiesen wird
    #[serde(default)]
    pub mitglieder: Vec<String>,
}

const LOG_LEVEL: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATE: &[&str] = &["text", "json"];
const SMTP_TLS: &[&str] = &["starttls", "tls", "none"];

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Uebernimmt `STAMMTISCH_LOG_LEVEL` und `STAMMTISCH_LOG_FORMAT`
    pub fn umgebung_anwenden(&mut self) {
        if let Ok(level) = std::env::var("STAMMTISCH_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Ok(format) = std::env::var("STAMMTISCH_LOG_FORMAT") {
            self.logging.format = format.to_lowercase();
        }
    }

    /// Prueft Werte, die serde nicht abfangen kann
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.netzwerk.bind_adresse.trim().is_empty() {
            anyhow::bail!("netzwerk.bind_adresse darf nicht leer sein");
        }
        if self.netzwerk.tcp_port == 0 {
            anyhow::bail!("netzwerk.tcp_port darf nicht 0 sein");
        }
        if self.netzwerk.max_frame_groesse == 0 {
            anyhow::bail!("netzwerk.max_frame_groesse darf nicht 0 sein");
        }
        if self.server.max_verbindungen == 0 {
            anyhow::bail!("server.max_verbindungen darf nicht 0 sein");
        }
        if !LOG_LEVEL.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Unbekanntes Log-Level '{}'", self.logging.level);
        }
        if !LOG_FORMATE.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Unbekanntes Log-Format '{}'", self.logging.format);
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.trim().is_empty() {
                anyhow::bail!("smtp.host darf nicht leer sein");
            }
            if !SMTP_TLS.contains(&smtp.tls.as_str()) {
                anyhow::bail!("Unbekannter smtp.tls-Modus '{}'", smtp.tls);
            }
        }
        let a = &self.auth;
        if a.verifikations_code_gueltig_min <= 0
            || a.reset_token_gueltig_min <= 0
            || a.session_gueltig_std <= 0
        {
            anyhow::bail!("Gueltigkeitsdauern in [auth] muessen positiv sein");
        }
        for server in &self.seed {
            for kanal in &server.kanaele {
                if kanal.typ != "voice" && kanal.typ != "text" {
                    anyhow::bail!(
                        "Kanal '{}' in '{}': unbekannter Typ '{}'",
                        kanal.name,
                        server.name,
                        kanal.typ
                    );
                }
            }
        }
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            server_name: self.server.name.clone(),
            max_verbindungen: self.server.max_verbindungen,
            verbindungs_timeout_sek: self.netzwerk.verbindungs_timeout_sek,
            max_frame_groesse: self.netzwerk.max_frame_groesse,
            ..SignalingConfig::default()
        }
    }

    pub fn auth_konfig(&self) -> AuthKonfig {
        let a = &self.auth;
        AuthKonfig {
            email_verifikation_erforderlich: a.email_verifikation_erforderlich,
            verifikations_code_gueltig: chrono::Duration::minutes(a.verifikations_code_gueltig_min),
            reset_token_gueltig: chrono::Duration::minutes(a.reset_token_gueltig_min),
            session_gueltig: chrono::Duration::hours(a.session_gueltig_std),
            totp_issuer: a.totp_issuer.clone(),
            reset_rate_limit: RateLimitKonfig {
                max_versuche: a.reset_rate_limit_max,
                fenster: Duration::from_secs(a.reset_rate_limit_fenster_sek),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert!(cfg.validieren().is_ok());
        assert_eq!(cfg.server.max_verbindungen, 512);
        assert_eq!(cfg.tcp_bind_adresse(), "0.0.0.0:7070");
        assert!(cfg.smtp.is_none());
        assert!(cfg.seed.is_empty());
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Gildenhalle"

            [netzwerk]
            tcp_port = 9000

            [smtp]
            host = "smtp.example.org"
            benutzer = "stammtisch"
            passwort = "geheim"
            absender = "Stammtisch <noreply@example.org>"

            [[seed]]
            name = "Gilde"
            owner = "alice"
            mitglieder = ["bob"]
            kanaele = [{ name = "Lounge" }, { name = "Allgemein", typ = "text" }]

            [[seed.rollen]]
            name = "Gast"
            berechtigungen = { connect = true, send_messages = true }
            mitglieder = ["bob"]
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Gildenhalle");
        assert_eq!(cfg.netzwerk.tcp_port, 9000);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.server.max_verbindungen, 512);
        assert_eq!(cfg.netzwerk.verbindungs_timeout_sek, 90);

        let smtp = cfg.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.tls, "starttls");

        let gilde = &cfg.seed[0];
        assert_eq!(gilde.kanaele[0].typ, "voice");
        assert_eq!(gilde.kanaele[1].typ, "text");
        assert_eq!(gilde.rollen[0].berechtigungen.get("connect"), Some(&true));
        assert!(cfg.validieren().is_ok());
    }

    #[test]
    fn ungueltige_werte_abgelehnt() {
        let mut cfg = ServerConfig::default();
        cfg.netzwerk.tcp_port = 0;
        assert!(cfg.validieren().is_err());

        let mut cfg = ServerConfig::default();
        cfg.netzwerk.bind_adresse = " ".into();
        assert!(cfg.validieren().is_err());

        let mut cfg = ServerConfig::default();
        cfg.logging.level = "laut".into();
        assert!(cfg.validieren().is_err());

        let mut cfg = ServerConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.validieren().is_err());
    }

    #[test]
    fn auth_konfig_uebernimmt_werte() {
        let mut cfg = ServerConfig::default();
        cfg.auth.session_gueltig_std = 2;
        cfg.auth.reset_rate_limit_max = 5;
        let konfig = cfg.auth_konfig();
        assert_eq!(konfig.session_gueltig, chrono::Duration::hours(2));
        assert_eq!(konfig.reset_rate_limit.max_versuche, 5);
        assert_eq!(konfig.reset_rate_limit.fenster, Duration::from_secs(3600));
    }
}
