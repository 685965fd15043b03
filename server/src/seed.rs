//! Startdaten fuer den In-Memory-Speicher
//!
//! Server, Kanaele und Rollen werden sonst von einem externen Dienst
//! gepflegt. Fuer den Einzelbetrieb kommen sie aus dem `[[seed]]`-Abschnitt
//! der Konfiguration. Benutzer muessen nicht existieren; sie registrieren
//! sich spaeter selbst.

use std::collections::HashMap;

use anyhow::Context;
use stammtisch_core::types::{ServerId, UserName};
use stammtisch_db::models::{KanalTyp, NeueRolle};
use stammtisch_db::MemoryDb;

use crate::config::SeedServer;

fn kanal_typ(typ: &str) -> anyhow::Result<KanalTyp> {
    match typ {
        "voice" => Ok(KanalTyp::Voice),
        "text" => Ok(KanalTyp::Text),
        anderer => anyhow::bail!("Unbekannter Kanal-Typ '{anderer}'"),
    }
}

/// Legt alle Seed-Server an
pub fn seed_laden(db: &MemoryDb, seed: &[SeedServer]) -> anyhow::Result<Vec<ServerId>> {
    let mut angelegt = Vec::with_capacity(seed.len());
    for eintrag in seed {
        let owner = UserName::from(eintrag.owner.as_str());
        let server = db.server_anlegen(&eintrag.name, &owner);

        for mitglied in &eintrag.mitglieder {
            db.mitglied_hinzufuegen(server.id, &UserName::from(mitglied.as_str()));
        }
        for kanal in &eintrag.kanaele {
            db.kanal_anlegen(server.id, &kanal.name, kanal_typ(&kanal.typ)?)
                .with_context(|| format!("Kanal '{}' nicht angelegt", kanal.name))?;
        }
        for rolle in &eintrag.rollen {
            let record = db.rolle_anlegen(NeueRolle {
                server_id: server.id,
                name: &rolle.name,
                color: None,
                position: rolle.position,
                permissions: rolle
                    .berechtigungen
                    .iter()
                    .map(|(k, v)| (k.clone(), *v))
                    .collect::<HashMap<_, _>>(),
            });
            for mitglied in &rolle.mitglieder {
                db.rolle_zuweisen(&UserName::from(mitglied.as_str()), record.id)
                    .with_context(|| {
                        format!(
                            "Rolle '{}' an {mitglied} in '{}' nicht zuweisbar",
                            rolle.name, eintrag.name
                        )
                    })?;
            }
        }

        tracing::info!(
            server_id = %server.id,
            name = %eintrag.name,
            owner = %owner,
            kanaele = eintrag.kanaele.len(),
            rollen = eintrag.rollen.len(),
            "Seed-Server angelegt"
        );
        angelegt.push(server.id);
    }
    Ok(angelegt)
}
