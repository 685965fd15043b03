//! Moderation, Kanalnachrichten und Berechtigungsabfragen ueber echte Verbindungen

mod common;

use std::collections::HashMap;

use common::{name, state_ohne_mail, TestClient};
use stammtisch_core::types::{ChannelId, ServerId};
use stammtisch_db::models::{KanalTyp, NeueRolle};
use stammtisch_db::MemoryDb;
use stammtisch_protocol::control::*;
use tokio::task::LocalSet;

struct Gilde {
    server_id: ServerId,
    voice: ChannelId,
    text: ChannelId,
}

/// alice besitzt den Server, bob ist Mitglied mit `connect` und `send_messages`
fn gilde_anlegen(db: &MemoryDb) -> Gilde {
    let server = db.server_anlegen("Gilde", &name("alice"));
    let voice = db.kanal_anlegen(server.id, "Lounge", KanalTyp::Voice).unwrap();
    let text = db.kanal_anlegen(server.id, "Allgemein", KanalTyp::Text).unwrap();
    db.mitglied_hinzufuegen(server.id, &name("bob"));
    let rolle = db.rolle_anlegen(NeueRolle {
        server_id: server.id,
        name: "Stammgast",
        color: Some("#aa8800"),
        position: 1,
        permissions: HashMap::from([
            ("connect".to_string(), true),
            ("send_messages".to_string(), true),
        ]),
    });
    db.rolle_zuweisen(&name("bob"), rolle.id).unwrap();
    Gilde {
        server_id: server.id,
        voice,
        text,
    }
}

fn moderieren(gilde: &Gilde, ziel: &str, action: ModerationType, dauer: Option<u64>) -> ControlPayload {
    ControlPayload::Moderate(ModerateRequest {
        server_id: gilde.server_id,
        target: name(ziel),
        action,
        reason: Some("Testlauf".into()),
        duration_secs: dauer,
    })
}

fn nachricht(gilde: &Gilde, text: &str) -> ControlPayload {
    ControlPayload::ChannelMessage(ChannelMessageRequest {
        server_id: gilde.server_id,
        channel_id: gilde.text,
        content: text.into(),
    })
}

#[tokio::test]
async fn ban_entfernt_aus_voice_und_sperrt() {
    LocalSet::new()
        .run_until(async {
            let (state, db) = state_ohne_mail();
            let (mut alice, _ha) = TestClient::verbinden(&state);
            let (mut bob, _hb) = TestClient::verbinden(&state);
            alice.registrieren("alice").await;
            bob.registrieren("bob").await;
            let gilde = gilde_anlegen(&db);

            let beitreten = ControlPayload::VoiceJoin(VoiceJoinRequest {
                server_id: gilde.server_id,
                channel_id: gilde.voice,
            });
            let antwort = bob.anfrage(beitreten.clone()).await;
            assert!(matches!(antwort.payload, ControlPayload::VoiceRoster(_)));

            let antwort = alice
                .anfrage(moderieren(&gilde, "bob", ModerationType::Ban, None))
                .await;
            let ControlPayload::ModerationApplied(event) = antwort.payload else {
                panic!("Erwartet moderation_applied, bekommen {:?}", antwort.payload);
            };
            assert_eq!(event.target, name("bob"));
            assert!(event.expires_at.is_none());
            assert!(state.presence.session(&name("bob")).is_none());

            let event = bob.event("moderation_applied").await;
            assert!(matches!(event.payload, ControlPayload::ModerationApplied(_)));

            let antwort = bob.anfrage(beitreten.clone()).await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::Banned));

            // Zweiter Ban auf dasselbe Ziel
            let antwort = alice
                .anfrage(moderieren(&gilde, "bob", ModerationType::Ban, None))
                .await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::Conflict));

            let antwort = alice
                .anfrage(ControlPayload::ModerationRevoke(ModerationRevokeRequest {
                    server_id: gilde.server_id,
                    target: name("bob"),
                    action: ModerationType::Ban,
                }))
                .await;
            assert!(matches!(antwort.payload, ControlPayload::ModerationRevoked(_)));

            let antwort = bob.anfrage(beitreten).await;
            assert!(matches!(antwort.payload, ControlPayload::VoiceRoster(_)));
        })
        .await;
}

#[tokio::test]
async fn timeout_sperrt_nur_nachrichten() {
    LocalSet::new()
        .run_until(async {
            let (state, db) = state_ohne_mail();
            let (mut alice, _ha) = TestClient::verbinden(&state);
            let (mut bob, _hb) = TestClient::verbinden(&state);
            alice.registrieren("alice").await;
            bob.registrieren("bob").await;
            let gilde = gilde_anlegen(&db);

            let antwort = bob.anfrage(nachricht(&gilde, "Prost!")).await;
            let ControlPayload::MessageSent(gesendet) = antwort.payload else {
                panic!("Erwartet message_sent, bekommen {:?}", antwort.payload);
            };
            assert_eq!(gesendet.delivered, 1);
            assert_eq!(gesendet.failed, 0);

            let empfangen = alice.event("channel_message_received").await;
            let ControlPayload::ChannelMessageReceived(event) = empfangen.payload else {
                unreachable!()
            };
            assert_eq!(event.author, name("bob"));
            assert_eq!(event.content, "Prost!");

            let antwort = alice
                .anfrage(moderieren(&gilde, "bob", ModerationType::Timeout, Some(600)))
                .await;
            let ControlPayload::ModerationApplied(event) = antwort.payload else {
                panic!("Erwartet moderation_applied, bekommen {:?}", antwort.payload);
            };
            assert!(event.expires_at.is_some());

            let antwort = bob.anfrage(nachricht(&gilde, "Hallo?")).await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::TimedOut));

            // Voice bleibt erlaubt
            let antwort = bob
                .anfrage(ControlPayload::VoiceJoin(VoiceJoinRequest {
                    server_id: gilde.server_id,
                    channel_id: gilde.voice,
                }))
                .await;
            assert!(matches!(antwort.payload, ControlPayload::VoiceRoster(_)));
        })
        .await;
}

#[tokio::test]
async fn moderation_ohne_recht_und_gegen_besitzer() {
    LocalSet::new()
        .run_until(async {
            let (state, db) = state_ohne_mail();
            let (mut alice, _ha) = TestClient::verbinden(&state);
            let (mut bob, _hb) = TestClient::verbinden(&state);
            alice.registrieren("alice").await;
            bob.registrieren("bob").await;
            let gilde = gilde_anlegen(&db);

            let antwort = bob
                .anfrage(moderieren(&gilde, "alice", ModerationType::Kick, None))
                .await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::PermissionDenied));

            // Kick-Recht ueber altes Mitglieds-Flag
            db.legacy_flag_setzen(gilde.server_id, &name("bob"), "kick_members", true)
                .unwrap();
            let antwort = bob
                .anfrage(moderieren(&gilde, "alice", ModerationType::Kick, None))
                .await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::PermissionDenied));

            let antwort = alice
                .anfrage(moderieren(&gilde, "carol", ModerationType::Kick, None))
                .await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::NotFound));

            let antwort = alice
                .anfrage(moderieren(&gilde, "bob", ModerationType::Kick, Some(60)))
                .await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::InvalidRequest));
        })
        .await;
}

#[tokio::test]
async fn berechtigung_abfragen() {
    LocalSet::new()
        .run_until(async {
            let (state, db) = state_ohne_mail();
            let (mut bob, _hb) = TestClient::verbinden(&state);
            bob.registrieren("bob").await;
            let gilde = gilde_anlegen(&db);

            let abfrage = |permission: &str| {
                ControlPayload::PermissionCheck(PermissionCheckRequest {
                    server_id: gilde.server_id,
                    permission: permission.into(),
                })
            };

            let antwort = bob.anfrage(abfrage("connect")).await;
            let ControlPayload::PermissionResult(ergebnis) = antwort.payload else {
                panic!("Erwartet permission_result");
            };
            assert!(ergebnis.allowed);

            let antwort = bob.anfrage(abfrage("manage_server")).await;
            let ControlPayload::PermissionResult(ergebnis) = antwort.payload else {
                panic!("Erwartet permission_result");
            };
            assert!(!ergebnis.allowed);

            let antwort = bob.anfrage(abfrage("  ")).await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::InvalidRequest));
        })
        .await;
}

#[tokio::test]
async fn direktnachricht_nur_fuer_teilnehmer() {
    LocalSet::new()
        .run_until(async {
            let (state, db) = state_ohne_mail();
            let (mut alice, _ha) = TestClient::verbinden(&state);
            let (mut bob, _hb) = TestClient::verbinden(&state);
            let (mut carol, _hc) = TestClient::verbinden(&state);
            alice.registrieren("alice").await;
            bob.registrieren("bob").await;
            carol.registrieren("carol").await;
            let dm = db.dm_anlegen(&name("alice"), &name("bob"));

            let senden = |text: &str| {
                ControlPayload::DirectMessage(DirectMessageRequest {
                    dm_id: dm,
                    content: text.into(),
                })
            };

            let antwort = alice.anfrage(senden("Servus")).await;
            let ControlPayload::MessageSent(gesendet) = antwort.payload else {
                panic!("Erwartet message_sent, bekommen {:?}", antwort.payload);
            };
            assert_eq!(gesendet.delivered, 1);
            let empfangen = bob.event("direct_message_received").await;
            assert!(matches!(empfangen.payload, ControlPayload::DirectMessageReceived(_)));

            let antwort = carol.anfrage(senden("Hallo")).await;
            assert_eq!(antwort.fehler_code(), Some(ErrorCode::PermissionDenied));
        })
        .await;
}
