//! In-Memory-Backend der Persistenz-Schnittstelle
//!
//! Haelt alle Datensaetze in einem `parking_lot::Mutex`. Gedacht fuer den
//! Einzelprozess-Betrieb ohne externe Datenbank und fuer Tests.
//! Die synchronen Verwaltungsmethoden (`server_anlegen`, `rolle_zuweisen`, ...)
//! bilden die Schreibseite die sonst ein externer Dienst uebernimmt.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stammtisch_core::types::{ChannelId, DmId, ServerId, UserName};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{
    BenutzerRecord, BenutzerUpdate, CodeZweck, DmRecord, EinladungRecord, KanalRecord, KanalTyp,
    MitgliedRecord, ModerationsRecord, ModerationsTyp, NeueModeration, NeueRolle, NeuerBenutzer,
    RolleRecord, ServerRecord, VerifikationsCode,
};
use crate::repository::{
    DmRepository, FriendRepository, InviteRepository, ModerationRepository, RoleRepository,
    ServerRepository, UserRepository, VerificationRepository,
};

#[derive(Default)]
struct Tabellen {
    benutzer: HashMap<UserName, BenutzerRecord>,
    server: HashMap<ServerId, ServerRecord>,
    mitglieder: HashMap<(ServerId, UserName), MitgliedRecord>,
    rollen: HashMap<Uuid, RolleRecord>,
    rollen_zuweisungen: HashSet<(ServerId, UserName, Uuid)>,
    moderation: Vec<ModerationsRecord>,
    dms: HashMap<DmId, DmRecord>,
    einladungen: HashMap<String, EinladungRecord>,
    freundschaften: HashSet<(UserName, UserName)>,
    codes: HashMap<(CodeZweck, String), VerifikationsCode>,
}

/// Persistenz im Arbeitsspeicher
#[derive(Default)]
pub struct MemoryDb {
    tabellen: Mutex<Tabellen>,
    /// Simulierter Ausfall: alle Repository-Aufrufe schlagen fehl
    ausfall: AtomicBool,
    /// Nur das Einloesen von Einladungen schlaegt fehl
    einladungs_ausfall: AtomicBool,
}

impl MemoryDb {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Schaltet einen simulierten Ausfall des Backends ein oder aus
    pub fn ausfall_simulieren(&self, aktiv: bool) {
        self.ausfall.store(aktiv, Ordering::SeqCst);
    }

    pub fn einladungs_ausfall_simulieren(&self, aktiv: bool) {
        self.einladungs_ausfall.store(aktiv, Ordering::SeqCst);
    }

    fn verfuegbar(&self) -> DbResult<()> {
        if self.ausfall.load(Ordering::SeqCst) {
            return Err(DbError::NichtVerfuegbar("In-Memory-Backend gestoert".into()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Verwaltung (Schreibseite)
    // -----------------------------------------------------------------------

    /// Legt einen Server an; der Besitzer wird automatisch Mitglied
    pub fn server_anlegen(&self, name: &str, owner: &UserName) -> ServerRecord {
        let record = ServerRecord {
            id: ServerId::new(),
            name: name.to_string(),
            owner: owner.clone(),
            channels: Vec::new(),
            created_at: Utc::now(),
        };
        let mut t = self.tabellen.lock();
        t.server.insert(record.id, record.clone());
        drop(t);
        self.mitglied_hinzufuegen(record.id, owner);
        tracing::debug!(server_id = %record.id, name, "Server angelegt");
        record
    }

    /// Legt einen Kanal in einem bestehenden Server an
    pub fn kanal_anlegen(
        &self,
        server_id: ServerId,
        name: &str,
        typ: KanalTyp,
    ) -> DbResult<ChannelId> {
        let mut t = self.tabellen.lock();
        let server = t
            .server
            .get_mut(&server_id)
            .ok_or_else(|| DbError::nicht_gefunden(server_id.to_string()))?;
        let id = ChannelId::new();
        server.channels.push(KanalRecord {
            id,
            name: name.to_string(),
            typ,
        });
        Ok(id)
    }

    pub fn mitglied_hinzufuegen(&self, server_id: ServerId, username: &UserName) {
        let mut t = self.tabellen.lock();
        t.mitglieder
            .entry((server_id, username.clone()))
            .or_insert_with(|| MitgliedRecord {
                server_id,
                username: username.clone(),
                legacy_flags: HashMap::new(),
                joined_at: Utc::now(),
            });
    }

    pub fn mitglied_entfernen(&self, server_id: ServerId, username: &UserName) -> bool {
        let mut t = self.tabellen.lock();
        t.rollen_zuweisungen
            .retain(|(s, u, _)| !(*s == server_id && u == username));
        t.mitglieder.remove(&(server_id, username.clone())).is_some()
    }

    /// Setzt ein Einzelrecht ausserhalb des Rollensystems
    pub fn legacy_flag_setzen(
        &self,
        server_id: ServerId,
        username: &UserName,
        flag: &str,
        wert: bool,
    ) -> DbResult<()> {
        let mut t = self.tabellen.lock();
        let mitglied = t
            .mitglieder
            .get_mut(&(server_id, username.clone()))
            .ok_or_else(|| DbError::nicht_gefunden(format!("Mitglied {username}")))?;
        mitglied.legacy_flags.insert(flag.to_string(), wert);
        Ok(())
    }

    pub fn rolle_anlegen(&self, data: NeueRolle<'_>) -> RolleRecord {
        let record = RolleRecord {
            id: Uuid::new_v4(),
            server_id: data.server_id,
            name: data.name.to_string(),
            color: data.color.map(str::to_string),
            position: data.position,
            permissions: data.permissions,
        };
        self.tabellen.lock().rollen.insert(record.id, record.clone());
        record
    }

    pub fn rolle_berechtigung_setzen(
        &self,
        rolle_id: Uuid,
        berechtigung: &str,
        wert: bool,
    ) -> DbResult<()> {
        let mut t = self.tabellen.lock();
        let rolle = t
            .rollen
            .get_mut(&rolle_id)
            .ok_or_else(|| DbError::nicht_gefunden(format!("Rolle {rolle_id}")))?;
        rolle.permissions.insert(berechtigung.to_string(), wert);
        Ok(())
    }

    pub fn rolle_zuweisen(&self, username: &UserName, rolle_id: Uuid) -> DbResult<()> {
        let mut t = self.tabellen.lock();
        let server_id = t
            .rollen
            .get(&rolle_id)
            .map(|r| r.server_id)
            .ok_or_else(|| DbError::nicht_gefunden(format!("Rolle {rolle_id}")))?;
        if !t.mitglieder.contains_key(&(server_id, username.clone())) {
            return Err(DbError::UngueltigeDaten(format!(
                "{username} ist kein Mitglied von {server_id}"
            )));
        }
        t.rollen_zuweisungen
            .insert((server_id, username.clone(), rolle_id));
        Ok(())
    }

    pub fn dm_anlegen(&self, a: &UserName, b: &UserName) -> DmId {
        let record = DmRecord {
            id: DmId::new(),
            teilnehmer: (a.clone(), b.clone()),
        };
        let id = record.id;
        self.tabellen.lock().dms.insert(id, record);
        id
    }

    /// Anzahl gespeicherter Codes eines Zwecks
    pub fn code_anzahl(&self, zweck: CodeZweck) -> usize {
        self.tabellen
            .lock()
            .codes
            .keys()
            .filter(|(z, _)| *z == zweck)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Repository-Implementierungen
// ---------------------------------------------------------------------------

impl UserRepository for MemoryDb {
    async fn create(&self, data: NeuerBenutzer<'_>) -> DbResult<BenutzerRecord> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        let name = UserName::from(data.username);
        if t.benutzer.contains_key(&name) {
            return Err(DbError::Eindeutigkeit(format!("Benutzername {name}")));
        }
        let record = BenutzerRecord {
            username: name.clone(),
            email: data.email.to_string(),
            password_hash: data.password_hash.to_string(),
            totp_secret: None,
            backup_codes: Vec::new(),
            created_at: Utc::now(),
            last_login: None,
            is_active: true,
        };
        t.benutzer.insert(name, record.clone());
        Ok(record)
    }

    async fn get_by_name(&self, username: &str) -> DbResult<Option<BenutzerRecord>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .benutzer
            .get(&UserName::from(username))
            .cloned())
    }

    async fn get_by_email(&self, email: &str) -> DbResult<Option<BenutzerRecord>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .benutzer
            .values()
            .find(|b| b.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update(&self, username: &UserName, data: BenutzerUpdate) -> DbResult<BenutzerRecord> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        let record = t
            .benutzer
            .get_mut(username)
            .ok_or_else(|| DbError::nicht_gefunden(format!("Benutzer {username}")))?;
        if let Some(hash) = data.password_hash {
            record.password_hash = hash;
        }
        if let Some(secret) = data.totp_secret {
            record.totp_secret = secret;
        }
        if let Some(codes) = data.backup_codes {
            record.backup_codes = codes;
        }
        if let Some(aktiv) = data.is_active {
            record.is_active = aktiv;
        }
        if let Some(login) = data.last_login {
            record.last_login = Some(login);
        }
        Ok(record.clone())
    }
}

impl ServerRepository for MemoryDb {
    async fn get_server(&self, id: ServerId) -> DbResult<Option<ServerRecord>> {
        self.verfuegbar()?;
        Ok(self.tabellen.lock().server.get(&id).cloned())
    }

    async fn get_members(&self, id: ServerId) -> DbResult<Vec<UserName>> {
        self.verfuegbar()?;
        let t = self.tabellen.lock();
        let mut namen: Vec<UserName> = t
            .mitglieder
            .keys()
            .filter(|(s, _)| *s == id)
            .map(|(_, u)| u.clone())
            .collect();
        namen.sort();
        Ok(namen)
    }

    async fn get_member(
        &self,
        id: ServerId,
        username: &UserName,
    ) -> DbResult<Option<MitgliedRecord>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .mitglieder
            .get(&(id, username.clone()))
            .cloned())
    }
}

impl RoleRepository for MemoryDb {
    async fn get_roles_for_user(
        &self,
        server_id: ServerId,
        username: &UserName,
    ) -> DbResult<Vec<RolleRecord>> {
        self.verfuegbar()?;
        let t = self.tabellen.lock();
        let mut rollen: Vec<RolleRecord> = t
            .rollen_zuweisungen
            .iter()
            .filter(|(s, u, _)| *s == server_id && u == username)
            .filter_map(|(_, _, id)| t.rollen.get(id).cloned())
            .collect();
        rollen.sort_by(|a, b| b.position.cmp(&a.position));
        Ok(rollen)
    }
}

impl ModerationRepository for MemoryDb {
    async fn list_actions(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
    ) -> DbResult<Vec<ModerationsRecord>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .moderation
            .iter()
            .filter(|m| m.server_id == server_id && &m.target == target && m.typ == typ)
            .cloned()
            .collect())
    }

    async fn create_action(&self, data: NeueModeration<'_>) -> DbResult<ModerationsRecord> {
        self.verfuegbar()?;
        let record = ModerationsRecord {
            id: Uuid::new_v4(),
            server_id: data.server_id,
            typ: data.typ,
            target: data.target.clone(),
            actor: data.actor.clone(),
            reason: data.reason.map(str::to_string),
            expires_at: data.expires_at,
            active: true,
            created_at: Utc::now(),
        };
        self.tabellen.lock().moderation.push(record.clone());
        Ok(record)
    }

    async fn deactivate_actions(
        &self,
        server_id: ServerId,
        target: &UserName,
        typ: ModerationsTyp,
        jetzt: DateTime<Utc>,
    ) -> DbResult<u64> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        let mut geaendert = 0;
        for m in t
            .moderation
            .iter_mut()
            .filter(|m| m.server_id == server_id && &m.target == target && m.typ == typ)
            .filter(|m| m.active)
        {
            m.active = false;
            if typ == ModerationsTyp::Timeout {
                m.expires_at = Some(m.expires_at.map_or(jetzt, |e| e.min(jetzt)));
            }
            geaendert += 1;
        }
        Ok(geaendert)
    }
}

impl DmRepository for MemoryDb {
    async fn get_participants(&self, id: DmId) -> DbResult<Option<(UserName, UserName)>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .dms
            .get(&id)
            .map(|dm| dm.teilnehmer.clone()))
    }
}

impl InviteRepository for MemoryDb {
    async fn create_invite(&self, code: &str, inviter: &UserName) -> DbResult<EinladungRecord> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        if t.einladungen.contains_key(code) {
            return Err(DbError::Eindeutigkeit(format!("Einladungscode {code}")));
        }
        let record = EinladungRecord {
            code: code.to_string(),
            inviter: inviter.clone(),
            created_at: Utc::now(),
        };
        t.einladungen.insert(code.to_string(), record.clone());
        Ok(record)
    }

    async fn get_invite(&self, code: &str) -> DbResult<Option<EinladungRecord>> {
        self.verfuegbar()?;
        Ok(self.tabellen.lock().einladungen.get(code).cloned())
    }

    async fn consume_invite(&self, code: &str) -> DbResult<Option<EinladungRecord>> {
        self.verfuegbar()?;
        if self.einladungs_ausfall.load(Ordering::SeqCst) {
            return Err(DbError::NichtVerfuegbar("Einladungstabelle gestoert".into()));
        }
        Ok(self.tabellen.lock().einladungen.remove(code))
    }
}

impl FriendRepository for MemoryDb {
    async fn add_friendship(&self, a: &UserName, b: &UserName) -> DbResult<()> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        t.freundschaften.insert((a.clone(), b.clone()));
        t.freundschaften.insert((b.clone(), a.clone()));
        Ok(())
    }

    async fn are_friends(&self, a: &UserName, b: &UserName) -> DbResult<bool> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .freundschaften
            .contains(&(a.clone(), b.clone())))
    }
}

impl VerificationRepository for MemoryDb {
    async fn create_code(&self, code: VerifikationsCode) -> DbResult<()> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        let schluessel = (code.zweck, code.code.clone());
        if t.codes.contains_key(&schluessel) {
            return Err(DbError::Eindeutigkeit("Verifikationscode".into()));
        }
        t.codes.insert(schluessel, code);
        Ok(())
    }

    async fn get_code(&self, zweck: CodeZweck, code: &str) -> DbResult<Option<VerifikationsCode>> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .codes
            .get(&(zweck, code.to_string()))
            .cloned())
    }

    async fn delete_code(&self, zweck: CodeZweck, code: &str) -> DbResult<bool> {
        self.verfuegbar()?;
        Ok(self
            .tabellen
            .lock()
            .codes
            .remove(&(zweck, code.to_string()))
            .is_some())
    }

    async fn delete_codes_for_user(&self, zweck: CodeZweck, username: &UserName) -> DbResult<u64> {
        self.verfuegbar()?;
        let mut t = self.tabellen.lock();
        let vorher = t.codes.len();
        t.codes
            .retain(|(z, _), c| !(*z == zweck && &c.username == username));
        Ok((vorher - t.codes.len()) as u64)
    }
}
