//! stammtisch-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, In-Memory-Speicher, Mail-Versand und den
//! Signaling-Server und stellt den Einstiegspunkt fuer Integrationstests
//! bereit.

pub mod config;
pub mod mail;
pub mod seed;

use std::sync::Arc;

use anyhow::{Context, Result};
use config::ServerConfig;
use mail::SmtpMail;
use stammtisch_auth::SessionStore;
use stammtisch_db::MemoryDb;
use stammtisch_signaling::{SignalingServer, SignalingState};
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    db: Arc<MemoryDb>,
}

impl Server {
    /// Prueft die Konfiguration und legt die Seed-Daten an
    pub fn neu(config: ServerConfig) -> Result<Self> {
        config.validieren()?;
        let db = Arc::new(MemoryDb::neu());
        seed::seed_laden(&db, &config.seed).context("Seed-Daten fehlerhaft")?;
        Ok(Self { config, db })
    }

    pub fn db(&self) -> &Arc<MemoryDb> {
        &self.db
    }

    /// Bindet den TCP-Port und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let adresse = self.config.tcp_bind_adresse();
        let listener = TcpListener::bind(&adresse)
            .await
            .with_context(|| format!("TCP-Port {adresse} nicht bindbar"))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(fehler = %e, "Ctrl-C-Handler nicht installierbar");
                return;
            }
            tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            let _ = shutdown_tx.send(true);
        });

        self.laufen(listener, shutdown_rx).await
    }

    /// Laeuft auf `listener` bis `shutdown_rx` `true` meldet
    pub async fn laufen(self, listener: TcpListener, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let mail = self
            .config
            .smtp
            .as_ref()
            .map(SmtpMail::neu)
            .transpose()?
            .map(Arc::new);
        if mail.is_none() {
            tracing::warn!("Kein SMTP konfiguriert – Registrierungen werden sofort angemeldet");
        }

        let state = SignalingState::neu(
            self.config.signaling_config(),
            Arc::clone(&self.db),
            mail,
            self.config.auth_konfig(),
        );
        let cleanup = SessionStore::cleanup_starten(Arc::clone(state.auth_service.sessions()));

        let adresse = listener.local_addr()?;
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %adresse,
            max_verbindungen = self.config.server.max_verbindungen,
            "Server startet"
        );

        let ergebnis = SignalingServer::neu(state, adresse)
            .mit_listener(listener, shutdown_rx)
            .await;
        cleanup.abort();

        ergebnis.context("Signaling-Server abgebrochen")?;
        tracing::info!("Server beendet");
        Ok(())
    }
}
