//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen Task mit einer `ClientConnection`.
//!
//! ## Concurrency-Modell
//! Die Persistenz-Traits verwenden async fn ohne Send-Garantie
//! (async_fn_in_trait). Alle Verbindungs-Tasks laufen deshalb in einer
//! `tokio::task::LocalSet`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stammtisch_auth::MailVersand;
use stammtisch_db::Persistenz;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinSet, LocalSet};

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// Abstand der Wartungslaeufe (abgelaufene Registrierungen, Rate-Limiter)
const WARTUNGS_INTERVALL: Duration = Duration::from_secs(60);

/// TCP-Signaling-Server
pub struct SignalingServer<D: Persistenz + 'static, M: MailVersand + 'static> {
    state: Arc<SignalingState<D, M>>,
    bind_addr: SocketAddr,
}

impl<D: Persistenz + 'static, M: MailVersand + 'static> SignalingServer<D, M> {
    pub fn neu(state: Arc<SignalingState<D, M>>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Bindet den Socket und akzeptiert Verbindungen
    ///
    /// Laeuft bis `shutdown_rx` `true` meldet. Danach wird gewartet, bis
    /// alle offenen Verbindungen aufgeraeumt haben.
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener(listener, shutdown_rx).await
    }

    /// Wie [`starten`](Self::starten), aber mit bereits gebundenem Listener
    pub async fn mit_listener(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let local = LocalSet::new();
        local.run_until(self.accept_loop(listener, shutdown_rx)).await
    }

    async fn accept_loop(
        self,
        listener: TcpListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Signaling-Server gestartet");

        let mut verbindungen = JoinSet::new();
        let mut wartung = tokio::time::interval(WARTUNGS_INTERVALL);
        wartung.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let offen = self.state.broadcaster.verbindungs_anzahl();
                            if offen >= self.state.config.max_verbindungen {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_verbindungen,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(peer = %peer_addr, fehler = %e, "TCP_NODELAY nicht gesetzt");
                            }

                            let verbindung = ClientConnection::neu(
                                Arc::clone(&self.state),
                                peer_addr.to_string(),
                            );
                            verbindungen.spawn_local(verbindung.verarbeiten(stream, shutdown_rx.clone()));
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }

                // Beendete Verbindungs-Tasks einsammeln
                Some(ergebnis) = verbindungen.join_next() => {
                    if let Err(e) = ergebnis {
                        tracing::error!(fehler = %e, "Verbindungs-Task abgebrochen");
                    }
                }

                _ = wartung.tick() => {
                    self.state.wartung().await;
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        // Offene Verbindungen haben das Signal ebenfalls bekommen
        while let Some(ergebnis) = verbindungen.join_next().await {
            if let Err(e) = ergebnis {
                tracing::error!(fehler = %e, "Verbindungs-Task abgebrochen");
            }
        }

        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}
