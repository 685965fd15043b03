//! Gemeinsame Hilfen fuer die Verbindungs-Tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use stammtisch_auth::{AuthKonfig, AuthResult, MailVersand};
use stammtisch_core::types::UserName;
use stammtisch_db::MemoryDb;
use stammtisch_protocol::control::*;
use stammtisch_protocol::wire::{EingehenderFrame, FrameCodec};
use stammtisch_signaling::{ClientConnection, SignalingConfig, SignalingState, TrennGrund};
use tokio::io::DuplexStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

#[derive(Default)]
pub struct TestMail {
    pub codes: Mutex<Vec<(UserName, String)>>,
}

impl MailVersand for TestMail {
    async fn verifikationscode_senden(&self, _e: &str, username: &UserName, code: &str) -> AuthResult<()> {
        self.codes.lock().push((username.clone(), code.to_string()));
        Ok(())
    }

    async fn reset_token_senden(&self, _e: &str, username: &UserName, token: &str) -> AuthResult<()> {
        self.codes.lock().push((username.clone(), token.to_string()));
        Ok(())
    }
}

pub type State = Arc<SignalingState<MemoryDb, TestMail>>;

pub fn state_ohne_mail() -> (State, Arc<MemoryDb>) {
    let db = Arc::new(MemoryDb::neu());
    let state = SignalingState::neu(SignalingConfig::default(), Arc::clone(&db), None, AuthKonfig::default());
    (state, db)
}

pub fn state_mit_mail() -> (State, Arc<TestMail>) {
    let db = Arc::new(MemoryDb::neu());
    let mail = Arc::new(TestMail::default());
    let state = SignalingState::neu(
        SignalingConfig::default(),
        db,
        Some(Arc::clone(&mail)),
        AuthKonfig::default(),
    );
    (state, mail)
}

pub struct TestClient {
    pub framed: Framed<DuplexStream, FrameCodec>,
    naechste_id: u32,
    _shutdown: watch::Sender<bool>,
}

impl TestClient {
    pub fn verbinden(state: &State) -> (Self, JoinHandle<TrennGrund>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let verbindung = ClientConnection::neu(Arc::clone(state), "test");
        let handle = tokio::task::spawn_local(verbindung.verarbeiten(server, shutdown_rx));
        let client = Self {
            framed: Framed::new(client, FrameCodec::new()),
            naechste_id: 1,
            _shutdown: shutdown_tx,
        };
        (client, handle)
    }

    pub async fn empfangen(&mut self) -> ControlMessage {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("Timeout beim Empfangen")
            .expect("Verbindung geschlossen")
            .expect("Lesefehler");
        match frame {
            EingehenderFrame::Nachricht(nachricht) => nachricht,
            EingehenderFrame::Ungueltig { grund, .. } => panic!("Ungueltiger Frame vom Server: {grund}"),
        }
    }

    /// Sendet eine Anfrage und wartet auf die Antwort mit derselben ID
    pub async fn anfrage(&mut self, payload: ControlPayload) -> ControlMessage {
        let id = self.naechste_id;
        self.naechste_id += 1;
        self.framed.send(ControlMessage::new(id, payload)).await.unwrap();
        loop {
            let nachricht = self.empfangen().await;
            if nachricht.request_id == id {
                return nachricht;
            }
        }
    }

    /// Wartet auf ein Event eines bestimmten Typs, andere werden uebersprungen
    pub async fn event(&mut self, typ: &str) -> ControlMessage {
        loop {
            let nachricht = self.empfangen().await;
            if nachricht.request_id == 0 && nachricht.payload.typ_name() == typ {
                return nachricht;
            }
        }
    }

    pub async fn registrieren(&mut self, name: &str) -> ControlMessage {
        self.anfrage(ControlPayload::Signup(SignupRequest {
            username: name.to_string(),
            password: "geheimes passwort".to_string(),
            email: format!("{name}@example.org"),
            invite_code: None,
        }))
        .await
    }
}

pub fn name(s: &str) -> UserName {
    UserName::from(s)
}
