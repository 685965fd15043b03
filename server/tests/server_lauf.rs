//! Start, Anmeldung ueber TCP und geordneter Shutdown

use futures_util::{SinkExt, StreamExt};
use stammtisch_protocol::control::{ControlMessage, ControlPayload, SignupRequest};
use stammtisch_protocol::wire::{EingehenderFrame, FrameCodec};
use stammtisch_server::config::{SeedServer, ServerConfig};
use stammtisch_server::Server;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

async fn naechste(framed: &mut Framed<TcpStream, FrameCodec>) -> ControlMessage {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), framed.next())
        .await
        .expect("Timeout")
        .expect("Verbindung geschlossen")
        .expect("Lesefehler");
    match frame {
        EingehenderFrame::Nachricht(n) => n,
        EingehenderFrame::Ungueltig { grund, .. } => panic!("Ungueltiger Frame: {grund}"),
    }
}

#[tokio::test]
async fn anmeldung_und_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    let server = Server::neu(ServerConfig::default()).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = async move {
        let stream = TcpStream::connect(adresse).await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        framed
            .send(ControlMessage::new(
                1,
                ControlPayload::Signup(SignupRequest {
                    username: "alice".into(),
                    password: "geheimes passwort".into(),
                    email: "alice@example.org".into(),
                    invite_code: None,
                }),
            ))
            .await
            .unwrap();
        let antwort = naechste(&mut framed).await;
        assert_eq!(antwort.request_id, 1);
        assert!(matches!(antwort.payload, ControlPayload::AuthOk(_)));

        shutdown_tx.send(true).unwrap();
        let abschied = naechste(&mut framed).await;
        assert!(matches!(abschied.payload, ControlPayload::Goodbye));
    };

    let (ergebnis, ()) = tokio::join!(server.laufen(listener, shutdown_rx), client);
    ergebnis.unwrap();
}

#[test]
fn fehlerhafte_seed_daten_verhindern_start() {
    let mut config = ServerConfig::default();
    config.seed.push(SeedServer {
        name: "Gilde".into(),
        owner: "alice".into(),
        mitglieder: Vec::new(),
        kanaele: Vec::new(),
        rollen: vec![stammtisch_server::config::SeedRolle {
            name: "Gast".into(),
            position: 0,
            berechtigungen: Default::default(),
            mitglieder: vec!["bob".into()],
        }],
    });
    assert!(Server::neu(config).is_err());
}

#[test]
fn ungueltige_konfiguration_verhindert_start() {
    let mut config = ServerConfig::default();
    config.logging.format = "xml".into();
    assert!(Server::neu(config).is_err());
}
