//! Auth-Service
//!
//! Zentraler Einstiegspunkt fuer Registrierung (mit optionaler
//! E-Mail-Bestaetigung), Login mit zweitem Faktor, Session-Fortsetzung,
//! Passwort-Reset und Einladungen.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use stammtisch_core::types::UserName;
use stammtisch_db::{
    models::{BenutzerRecord, BenutzerUpdate, CodeZweck, NeuerBenutzer, VerifikationsCode},
    repository::{FriendRepository, InviteRepository, UserRepository, VerificationRepository},
    DbError,
};

use crate::{
    error::{AuthError, AuthResult},
    invite_service::InviteService,
    mail::MailVersand,
    password::{passwort_hashen, passwort_regeln_pruefen, passwort_verifizieren},
    pending::{PendingSignup, PendingSignups},
    rate_limit::{RateLimitKonfig, RateLimiter},
    session::{token_generieren, Session, SessionStore},
    zwei_faktor::{self, FaktorTreffer, ZweiFaktorEinrichtung},
};

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const EMAIL_MAX: usize = 254;
const CODE_VERSUCHE: usize = 5;

/// Falsche Verifikations- oder 2FA-Codes pro Benutzer und Fenster
const FEHLVERSUCHE: RateLimitKonfig = RateLimitKonfig {
    max_versuche: 5,
    fenster: std::time::Duration::from_secs(15 * 60),
};

/// Die immer gleiche Antwort auf eine Reset-Anfrage
pub const RESET_ANTWORT: &str =
    "Falls ein passendes Konto existiert, wurde eine E-Mail mit weiteren Schritten versendet.";

/// Laufzeit-Einstellungen des Auth-Service
#[derive(Debug, Clone)]
pub struct AuthKonfig {
    pub email_verifikation_erforderlich: bool,
    pub verifikations_code_gueltig: Duration,
    pub reset_token_gueltig: Duration,
    pub session_gueltig: Duration,
    pub totp_issuer: String,
    pub reset_rate_limit: RateLimitKonfig,
}

impl Default for AuthKonfig {
    fn default() -> Self {
        Self {
            email_verifikation_erforderlich: true,
            verifikations_code_gueltig: Duration::minutes(15),
            reset_token_gueltig: Duration::minutes(60),
            session_gueltig: Duration::hours(24),
            totp_issuer: "Stammtisch".to_string(),
            reset_rate_limit: RateLimitKonfig::default(),
        }
    }
}

/// Daten einer Registrierung
#[derive(Debug, Clone, Copy)]
pub struct Registrierung<'a> {
    pub username: &'a str,
    pub passwort: &'a str,
    pub email: &'a str,
    pub invite_code: Option<&'a str>,
}

#[derive(Debug)]
pub enum SignupErgebnis {
    /// Konto sofort angelegt
    Angemeldet {
        benutzer: BenutzerRecord,
        session: Session,
    },
    /// Konto wartet auf `verify_email`
    VerifikationAusstehend {
        username: UserName,
        laeuft_ab_am: DateTime<Utc>,
    },
}

pub struct AuthService<D, M>
where
    D: UserRepository + InviteRepository + FriendRepository + VerificationRepository,
    M: MailVersand,
{
    db: Arc<D>,
    mail: Option<Arc<M>>,
    konfig: AuthKonfig,
    sessions: Arc<SessionStore>,
    pending: PendingSignups,
    reset_limiter: RateLimiter,
    /// Falsche Codes, Schluessel `verifikation:<name>` bzw. `faktor:<name>`
    fehlversuche: RateLimiter,
    einladungen: InviteService<D>,
}

impl<D, M> AuthService<D, M>
where
    D: UserRepository + InviteRepository + FriendRepository + VerificationRepository,
    M: MailVersand,
{
    /// Ohne `mail` werden Konten sofort angelegt und Reset-Tokens nur geloggt
    pub fn neu(db: Arc<D>, mail: Option<Arc<M>>, konfig: AuthKonfig) -> Self {
        Self {
            einladungen: InviteService::neu(Arc::clone(&db)),
            sessions: Arc::new(SessionStore::neu(konfig.session_gueltig)),
            pending: PendingSignups::neu(),
            reset_limiter: RateLimiter::neu(konfig.reset_rate_limit),
            fehlversuche: RateLimiter::neu(FEHLVERSUCHE),
            db,
            mail,
            konfig,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn pending_signups(&self) -> &PendingSignups {
        &self.pending
    }

    // -----------------------------------------------------------------------
    // Registrierung
    // -----------------------------------------------------------------------

    pub async fn registrieren(&self, anfrage: Registrierung<'_>) -> AuthResult<SignupErgebnis> {
        username_pruefen(anfrage.username)?;
        email_pruefen(anfrage.email)?;
        passwort_regeln_pruefen(anfrage.passwort)?;

        let username = UserName::from(anfrage.username);
        let jetzt = Utc::now();
        if let Some(alt) = self.pending.abgelaufen_entfernen(&username, jetzt) {
            self.verifikation_verwerfen(&alt).await?;
        }
        if self.pending.existiert(&username) {
            return Err(AuthError::PendingSignupExistiert(username.to_string()));
        }
        if self.db.get_by_name(anfrage.username).await?.is_some() {
            return Err(AuthError::BenutzernameVergeben(username.to_string()));
        }

        let invite_code = match anfrage.invite_code {
            Some(code) => match self.einladungen.einladung_pruefen(code).await? {
                Some(einladung) => Some(einladung.code),
                None => {
                    tracing::warn!(username = %username, "Unbekannter Einladungscode wird ignoriert");
                    None
                }
            },
            None => None,
        };

        let password_hash = passwort_hashen(anfrage.passwort)?;

        match (&self.mail, self.konfig.email_verifikation_erforderlich) {
            (Some(mail), true) => {
                let laeuft_ab_am = jetzt + self.konfig.verifikations_code_gueltig;
                let ersetzt = self.pending.einfuegen(
                    PendingSignup {
                        username: username.clone(),
                        email: anfrage.email.to_string(),
                        password_hash,
                        invite_code,
                        laeuft_ab_am,
                    },
                    jetzt,
                )?;
                if let Some(alt) = ersetzt {
                    if let Err(e) = self.verifikation_verwerfen(&alt).await {
                        self.pending.entfernen(&username);
                        return Err(e);
                    }
                }

                match self
                    .verifikation_starten(mail, &username, anfrage.email, laeuft_ab_am)
                    .await
                {
                    Ok(laeuft_ab_am) => {
                        tracing::info!(username = %username, "Registrierung wartet auf Bestaetigung");
                        Ok(SignupErgebnis::VerifikationAusstehend {
                            username,
                            laeuft_ab_am,
                        })
                    }
                    Err(e) => {
                        self.pending.entfernen(&username);
                        Err(e)
                    }
                }
            }
            _ => {
                let benutzer =
                    self.benutzer_anlegen(&username, anfrage.email, &password_hash).await?;
                if let Some(code) = invite_code {
                    self.einladung_anwenden(&code, &username).await;
                }
                let session = self.sessions.erstellen(&username).await;
                tracing::info!(username = %username, "Neuer Benutzer registriert");
                Ok(SignupErgebnis::Angemeldet { benutzer, session })
            }
        }
    }

    async fn verifikation_starten(
        &self,
        mail: &M,
        username: &UserName,
        email: &str,
        laeuft_ab_am: DateTime<Utc>,
    ) -> AuthResult<DateTime<Utc>> {
        let code = self
            .code_speichern(CodeZweck::EmailVerifikation, username, laeuft_ab_am, ziffern_code)
            .await?;

        if let Err(e) = mail.verifikationscode_senden(email, username, &code).await {
            tracing::error!(username = %username, fehler = %e, "Verifikationsmail fehlgeschlagen");
            self.db.delete_code(CodeZweck::EmailVerifikation, &code).await?;
            return Err(e);
        }
        Ok(laeuft_ab_am)
    }

    /// Legt einen Einmal-Code an und wuerfelt bei Kollision neu
    async fn code_speichern(
        &self,
        zweck: CodeZweck,
        username: &UserName,
        expires_at: DateTime<Utc>,
        erzeugen: fn() -> String,
    ) -> AuthResult<String> {
        for _ in 0..CODE_VERSUCHE {
            let code = erzeugen();
            let eintrag = VerifikationsCode {
                code: code.clone(),
                zweck,
                username: username.clone(),
                expires_at,
            };
            match self.db.create_code(eintrag).await {
                Ok(()) => return Ok(code),
                Err(e) if e.ist_eindeutigkeit() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AuthError::intern("Kein freier Code gefunden"))
    }

    /// Loescht den Verifikationscode einer verworfenen Registrierung
    async fn verifikation_verwerfen(&self, signup: &PendingSignup) -> AuthResult<()> {
        self.db
            .delete_codes_for_user(CodeZweck::EmailVerifikation, &signup.username)
            .await?;
        self.fehlversuche
            .zuruecksetzen(&format!("verifikation:{}", signup.username));
        tracing::info!(username = %signup.username, "Abgelaufene Registrierung verworfen");
        Ok(())
    }

    /// Das Konto existiert zu diesem Zeitpunkt schon. Ein Fehler beim
    /// Einloesen kostet nur die Freundschaft und wird geloggt.
    async fn einladung_anwenden(&self, code: &str, username: &UserName) {
        if let Err(e) = self.einladungen.einladung_einloesen(code, username).await {
            tracing::error!(username = %username, fehler = %e, "Einladung nicht eingeloest");
        }
    }

    async fn benutzer_anlegen(
        &self,
        username: &UserName,
        email: &str,
        password_hash: &str,
    ) -> AuthResult<BenutzerRecord> {
        self.db
            .create(NeuerBenutzer {
                username: username.as_str(),
                email,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                DbError::Eindeutigkeit(_) => AuthError::BenutzernameVergeben(username.to_string()),
                other => AuthError::Datenbank(other),
            })
    }

    pub async fn email_bestaetigen(
        &self,
        username: &str,
        code: &str,
    ) -> AuthResult<(BenutzerRecord, Session)> {
        self.email_bestaetigen_zum(username, code, Utc::now()).await
    }

    /// Ein falscher Code laesst die Registrierung bestehen, bis
    /// [`FEHLVERSUCHE`] erreicht ist; dann wird sie samt Code verworfen.
    /// Ein abgelaufener Code verwirft sie sofort.
    pub async fn email_bestaetigen_zum(
        &self,
        username: &str,
        code: &str,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<(BenutzerRecord, Session)> {
        let username = UserName::from(username);
        let code = code.trim();
        let pending = self.pending.get(&username).ok_or(AuthError::CodeUngueltig)?;

        if pending.ist_abgelaufen(jetzt) {
            if let Some(alt) = self.pending.abgelaufen_entfernen(&username, jetzt) {
                self.verifikation_verwerfen(&alt).await?;
            }
            return Err(AuthError::CodeAbgelaufen);
        }

        let versuch_schluessel = format!("verifikation:{username}");
        if self.fehlversuche.gesperrt(&versuch_schluessel) {
            return Err(AuthError::ZuVieleVersuche);
        }

        let eintrag = match self.db.get_code(CodeZweck::EmailVerifikation, code).await? {
            Some(e) if e.username == username => e,
            _ => {
                tracing::debug!(username = %username, "Falscher Verifikationscode");
                self.fehlversuche.erlauben(&versuch_schluessel);
                if self.fehlversuche.gesperrt(&versuch_schluessel) {
                    if let Some(verworfen) = self.pending.entfernen(&username) {
                        self.db
                            .delete_codes_for_user(CodeZweck::EmailVerifikation, &verworfen.username)
                            .await?;
                    }
                    tracing::warn!(username = %username, "Zu viele falsche Codes, Registrierung verworfen");
                    return Err(AuthError::ZuVieleVersuche);
                }
                return Err(AuthError::CodeUngueltig);
            }
        };

        if eintrag.ist_abgelaufen(jetzt) {
            self.db.delete_code(CodeZweck::EmailVerifikation, code).await?;
            self.pending.entfernen(&username);
            tracing::info!(username = %username, "Verifikationscode abgelaufen, Registrierung verworfen");
            return Err(AuthError::CodeAbgelaufen);
        }

        let angelegt = self
            .benutzer_anlegen(&username, &pending.email, &pending.password_hash)
            .await;
        let benutzer = match angelegt {
            Ok(b) => b,
            Err(e @ AuthError::BenutzernameVergeben(_)) => {
                self.db.delete_code(CodeZweck::EmailVerifikation, code).await?;
                self.pending.entfernen(&username);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        self.db.delete_code(CodeZweck::EmailVerifikation, code).await?;
        self.pending.entfernen(&username);
        self.fehlversuche.zuruecksetzen(&versuch_schluessel);

        if let Some(invite) = pending.invite_code {
            self.einladung_anwenden(&invite, &username).await;
        }

        let session = self.sessions.erstellen(&username).await;
        tracing::info!(username = %username, "E-Mail bestaetigt, Benutzer angelegt");
        Ok((benutzer, session))
    }

    // -----------------------------------------------------------------------
    // Anmeldung
    // -----------------------------------------------------------------------

    /// Bei aktivem zweiten Faktor ohne `zweiter_faktor` gibt es
    /// `ZweiterFaktorErforderlich` und keine Session.
    pub async fn anmelden(
        &self,
        username: &str,
        passwort: &str,
        zweiter_faktor: Option<&str>,
    ) -> AuthResult<(BenutzerRecord, Session)> {
        let benutzer = self
            .db
            .get_by_name(username)
            .await?
            .ok_or(AuthError::UngueltigeAnmeldedaten)?;

        if !passwort_verifizieren(passwort, &benutzer.password_hash)? {
            tracing::warn!(username = %username, "Fehlgeschlagener Login-Versuch");
            return Err(AuthError::UngueltigeAnmeldedaten);
        }
        if !benutzer.is_active {
            return Err(AuthError::BenutzerGesperrt);
        }

        let mut update = BenutzerUpdate {
            last_login: Some(Utc::now()),
            ..Default::default()
        };

        if benutzer.zweiter_faktor_aktiv() {
            let code = zweiter_faktor.ok_or(AuthError::ZweiterFaktorErforderlich)?;
            match self.faktor_pruefen(&benutzer, code)? {
                FaktorTreffer::Totp => {}
                FaktorTreffer::BackupCode { verbleibend } => {
                    tracing::info!(
                        username = %username,
                        verbleibend = verbleibend.len(),
                        "Backup-Code verwendet"
                    );
                    update.backup_codes = Some(verbleibend);
                }
            }
        }

        let benutzer = self.db.update(&benutzer.username, update).await?;
        let session = self.sessions.erstellen(&benutzer.username).await;
        tracing::info!(username = %benutzer.username, "Benutzer angemeldet");
        Ok((benutzer, session))
    }

    /// Setzt eine bestehende Session fort
    pub async fn token_anmelden(&self, token: &str) -> AuthResult<(BenutzerRecord, Session)> {
        let session = self.sessions.validieren(token).await?;
        let benutzer = self
            .db
            .get_by_name(session.username.as_str())
            .await?
            .ok_or(AuthError::SessionUngueltig)?;

        if !benutzer.is_active {
            self.sessions.invalidieren(token).await;
            return Err(AuthError::BenutzerGesperrt);
        }
        tracing::debug!(username = %benutzer.username, "Session fortgesetzt");
        Ok((benutzer, session))
    }

    /// Prueft TOTP oder Backup-Code. Falsche Codes zaehlen pro Benutzer;
    /// ist das Limit erreicht, wird auch ein richtiger Code abgelehnt.
    fn faktor_pruefen(&self, benutzer: &BenutzerRecord, code: &str) -> AuthResult<FaktorTreffer> {
        let schluessel = format!("faktor:{}", benutzer.username);
        if self.fehlversuche.gesperrt(&schluessel) {
            tracing::warn!(username = %benutzer.username, "Zweiter Faktor gesperrt");
            return Err(AuthError::ZuVieleVersuche);
        }
        match zwei_faktor::faktor_pruefen(benutzer, &self.konfig.totp_issuer, code)? {
            Some(treffer) => {
                self.fehlversuche.zuruecksetzen(&schluessel);
                Ok(treffer)
            }
            None => {
                tracing::warn!(username = %benutzer.username, "Falscher zweiter Faktor");
                self.fehlversuche.erlauben(&schluessel);
                Err(AuthError::CodeUngueltig)
            }
        }
    }

    /// Verwirft abgelaufene Registrierungen samt Codes und leert die
    /// Versuchszaehler. Laeuft periodisch aus der Server-Wartung.
    pub async fn aufraeumen(&self) -> AuthResult<usize> {
        self.aufraeumen_zum(Utc::now(), Instant::now()).await
    }

    pub async fn aufraeumen_zum(&self, jetzt: DateTime<Utc>, jetzt_mono: Instant) -> AuthResult<usize> {
        let abgelaufen = self.pending.abgelaufene_entfernen(jetzt);
        for signup in &abgelaufen {
            self.verifikation_verwerfen(signup).await?;
        }
        let schluessel = self.reset_limiter.aufraeumen_zum(jetzt_mono)
            + self.fehlversuche.aufraeumen_zum(jetzt_mono);
        if !abgelaufen.is_empty() || schluessel > 0 {
            tracing::debug!(
                registrierungen = abgelaufen.len(),
                schluessel,
                "Auth-Wartung"
            );
        }
        Ok(abgelaufen.len())
    }

    // -----------------------------------------------------------------------
    // Passwort-Reset
    // -----------------------------------------------------------------------

    /// Liefert fuer unbekannte Konten, gedrosselte Anfragen und Erfolg dasselbe
    /// Ergebnis. Ein Token entsteht nur fuer ein existierendes Konto.
    pub async fn passwort_reset_anfordern(&self, kennung: &str) -> AuthResult<&'static str> {
        let kennung = kennung.trim();
        let schluessel = kennung.to_lowercase();

        if !self.reset_limiter.erlauben(&schluessel) {
            tracing::warn!(kennung = %schluessel, "Reset-Anfrage gedrosselt");
            return Ok(RESET_ANTWORT);
        }

        let benutzer = if kennung.contains('@') {
            self.db.get_by_email(kennung).await
        } else {
            self.db.get_by_name(kennung).await
        };
        let benutzer = match benutzer {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(fehler = %e, "Konto fuer Reset-Anfrage nicht ladbar");
                return Ok(RESET_ANTWORT);
            }
        };
        let Some(benutzer) = benutzer else {
            tracing::debug!("Reset-Anfrage fuer unbekanntes Konto");
            return Ok(RESET_ANTWORT);
        };

        let laeuft_ab_am = Utc::now() + self.konfig.reset_token_gueltig;
        let token = match self
            .code_speichern(CodeZweck::PasswortReset, &benutzer.username, laeuft_ab_am, token_generieren)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(username = %benutzer.username, fehler = %e, "Reset-Token nicht gespeichert");
                return Ok(RESET_ANTWORT);
            }
        };

        match &self.mail {
            Some(mail) => {
                if let Err(e) = mail.reset_token_senden(&benutzer.email, &benutzer.username, &token).await {
                    tracing::error!(username = %benutzer.username, fehler = %e, "Reset-Mail fehlgeschlagen");
                }
            }
            None => {
                tracing::warn!(username = %benutzer.username, "Kein Mailversand konfiguriert, Reset-Token nicht zugestellt");
            }
        }
        tracing::info!(username = %benutzer.username, "Passwort-Reset angefordert");
        Ok(RESET_ANTWORT)
    }

    pub async fn reset_token_pruefen(&self, token: &str) -> AuthResult<UserName> {
        self.reset_token_pruefen_zum(token, Utc::now()).await
    }

    pub async fn reset_token_pruefen_zum(
        &self,
        token: &str,
        jetzt: DateTime<Utc>,
    ) -> AuthResult<UserName> {
        let eintrag = self
            .db
            .get_code(CodeZweck::PasswortReset, token)
            .await?
            .ok_or(AuthError::CodeUngueltig)?;
        if eintrag.ist_abgelaufen(jetzt) {
            self.db.delete_code(CodeZweck::PasswortReset, token).await?;
            return Err(AuthError::CodeAbgelaufen);
        }
        Ok(eintrag.username)
    }

    /// Setzt das Passwort, verwirft alle Reset-Tokens und beendet alle Sessions
    pub async fn passwort_reset_abschliessen(&self, token: &str, neues_passwort: &str) -> AuthResult<UserName> {
        passwort_regeln_pruefen(neues_passwort)?;
        let username = self.reset_token_pruefen(token).await?;
        let hash = passwort_hashen(neues_passwort)?;

        self.db
            .update(
                &username,
                BenutzerUpdate {
                    password_hash: Some(hash),
                    ..Default::default()
                },
            )
            .await?;
        self.db
            .delete_codes_for_user(CodeZweck::PasswortReset, &username)
            .await?;
        let beendet = self.sessions.alle_invalidieren(&username).await;

        tracing::info!(username = %username, sessions_beendet = beendet, "Passwort zurueckgesetzt");
        Ok(username)
    }

    // -----------------------------------------------------------------------
    // Zweiter Faktor und Einladungen
    // -----------------------------------------------------------------------

    pub async fn zwei_faktor_einrichten(&self, username: &UserName) -> AuthResult<ZweiFaktorEinrichtung> {
        let benutzer = self.benutzer_laden(username).await?;
        if benutzer.zweiter_faktor_aktiv() {
            return Err(AuthError::Konflikt("Zweiter Faktor ist bereits aktiv".into()));
        }

        let einrichtung = zwei_faktor::einrichtung_erzeugen(&self.konfig.totp_issuer, username)?;
        self.db
            .update(
                username,
                BenutzerUpdate {
                    totp_secret: Some(Some(einrichtung.secret.clone())),
                    backup_codes: Some(einrichtung.backup_hashes.clone()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(username = %username, "Zweiter Faktor aktiviert");
        Ok(einrichtung)
    }

    /// Braucht einen gueltigen TOTP- oder Backup-Code
    pub async fn zwei_faktor_deaktivieren(&self, username: &UserName, code: &str) -> AuthResult<()> {
        let benutzer = self.benutzer_laden(username).await?;
        if !benutzer.zweiter_faktor_aktiv() {
            return Err(AuthError::Konflikt("Zweiter Faktor ist nicht aktiv".into()));
        }
        self.faktor_pruefen(&benutzer, code)?;

        self.db
            .update(
                username,
                BenutzerUpdate {
                    totp_secret: Some(None),
                    backup_codes: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(username = %username, "Zweiter Faktor deaktiviert");
        Ok(())
    }

    pub async fn einladung_erstellen(&self, inviter: &UserName) -> AuthResult<String> {
        Ok(self.einladungen.einladung_erstellen(inviter).await?.code)
    }

    async fn benutzer_laden(&self, username: &UserName) -> AuthResult<BenutzerRecord> {
        self.db
            .get_by_name(username.as_str())
            .await?
            .ok_or_else(|| AuthError::NichtGefunden(format!("Benutzer {username}")))
    }
}

// ---------------------------------------------------------------------------
// Eingabepruefung
// ---------------------------------------------------------------------------

/// 3 bis 32 Zeichen aus `A-Z a-z 0-9 _ . -`
pub fn username_pruefen(username: &str) -> AuthResult<()> {
    let laenge = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&laenge) {
        return Err(AuthError::validierung(format!(
            "Benutzername muss {USERNAME_MIN} bis {USERNAME_MAX} Zeichen haben"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(AuthError::validierung(
            "Benutzername darf nur Buchstaben, Ziffern, '_', '.' und '-' enthalten",
        ));
    }
    Ok(())
}

pub fn email_pruefen(email: &str) -> AuthResult<()> {
    let gueltig = email.len() <= EMAIL_MAX
        && !email.chars().any(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(lokal, domain)| !lokal.is_empty() && domain.contains('.') && !domain.contains('@'));
    if gueltig {
        Ok(())
    } else {
        Err(AuthError::validierung("E-Mail-Adresse ungueltig"))
    }
}

fn ziffern_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use stammtisch_db::MemoryDb;

    /// Merkt sich alle Mails statt sie zu versenden
    #[derive(Default)]
    struct TestMail {
        codes: Mutex<Vec<(UserName, String)>>,
        resets: Mutex<Vec<(UserName, String)>>,
    }

    impl MailVersand for TestMail {
        async fn verifikationscode_senden(&self, _e: &str, username: &UserName, code: &str) -> AuthResult<()> {
            self.codes.lock().push((username.clone(), code.to_string()));
            Ok(())
        }

        async fn reset_token_senden(&self, _e: &str, username: &UserName, token: &str) -> AuthResult<()> {
            self.resets.lock().push((username.clone(), token.to_string()));
            Ok(())
        }
    }

    fn service_mit_mail() -> (Arc<MemoryDb>, Arc<TestMail>, AuthService<MemoryDb, TestMail>) {
        let db = Arc::new(MemoryDb::neu());
        let mail = Arc::new(TestMail::default());
        let service = AuthService::neu(Arc::clone(&db), Some(Arc::clone(&mail)), AuthKonfig::default());
        (db, mail, service)
    }

    fn service_ohne_mail() -> (Arc<MemoryDb>, AuthService<MemoryDb, TestMail>) {
        let db = Arc::new(MemoryDb::neu());
        let service = AuthService::neu(Arc::clone(&db), None, AuthKonfig::default());
        (db, service)
    }

    /// Verifikationscodes laufen sofort ab
    fn service_sofort_ablaufend() -> (Arc<MemoryDb>, Arc<TestMail>, AuthService<MemoryDb, TestMail>) {
        let db = Arc::new(MemoryDb::neu());
        let mail = Arc::new(TestMail::default());
        let konfig = AuthKonfig {
            verifikations_code_gueltig: Duration::seconds(-1),
            ..AuthKonfig::default()
        };
        let service = AuthService::neu(Arc::clone(&db), Some(Arc::clone(&mail)), konfig);
        (db, mail, service)
    }

    /// Sechsstellige Codes, die alle von `richtig` abweichen
    fn falsche_codes(richtig: &str, anzahl: u32) -> Vec<String> {
        let basis: u32 = richtig.parse().unwrap();
        (1..=anzahl)
            .map(|i| format!("{:06}", (basis + i) % 1_000_000))
            .collect()
    }

    fn anfrage<'a>(username: &'a str, email: &'a str) -> Registrierung<'a> {
        Registrierung {
            username,
            passwort: "geheimes passwort",
            email,
            invite_code: None,
        }
    }

    #[tokio::test]
    async fn ohne_mail_sofort_angemeldet() {
        let (_db, service) = service_ohne_mail();
        let ergebnis = service.registrieren(anfrage("alice", "alice@example.org")).await.unwrap();
        let SignupErgebnis::Angemeldet { benutzer, session } = ergebnis else {
            panic!("Erwartet: sofort angemeldet");
        };
        assert_eq!(benutzer.username, UserName::from("alice"));
        assert!(service.token_anmelden(&session.token).await.is_ok());
    }

    #[tokio::test]
    async fn doppelte_registrierung_vor_bestaetigung_ist_konflikt() {
        let (db, mail, service) = service_mit_mail();
        let erste = service.registrieren(anfrage("alice", "alice@example.org")).await.unwrap();
        assert!(matches!(erste, SignupErgebnis::VerifikationAusstehend { .. }));
        let original = service.pending_signups().get(&UserName::from("alice")).unwrap();

        let err = service
            .registrieren(anfrage("alice", "mallory@example.org"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PendingSignupExistiert(_)));
        assert_eq!(service.pending_signups().get(&UserName::from("alice")), Some(original));
        assert_eq!(mail.codes.lock().len(), 1);
        assert!(db.get_by_name("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bestaetigung_legt_konto_an() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("bob", "bob@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();

        let falsch = if code == "000000" { "111111" } else { "000000" };
        let err = service.email_bestaetigen("bob", falsch).await.unwrap_err();
        assert!(matches!(err, AuthError::CodeUngueltig));
        assert!(service.pending_signups().existiert(&UserName::from("bob")));

        let (benutzer, _session) = service.email_bestaetigen("bob", &code).await.unwrap();
        assert_eq!(benutzer.email, "bob@example.org");
        assert!(!service.pending_signups().existiert(&UserName::from("bob")));
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 0);
    }

    #[tokio::test]
    async fn abgelaufener_code_verwirft_registrierung() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("carol", "carol@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();

        let spaeter = Utc::now() + Duration::minutes(16);
        let err = service.email_bestaetigen_zum("carol", &code, spaeter).await.unwrap_err();
        assert!(matches!(err, AuthError::CodeAbgelaufen));
        assert!(!service.pending_signups().existiert(&UserName::from("carol")));
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 0);
        assert!(db.get_by_name("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abgelaufene_registrierung_gibt_namen_frei() {
        let (db, mail, service) = service_sofort_ablaufend();
        service.registrieren(anfrage("paul", "fremd@example.org")).await.unwrap();

        let zweite = service.registrieren(anfrage("paul", "paul@example.org")).await.unwrap();
        assert!(matches!(zweite, SignupErgebnis::VerifikationAusstehend { .. }));
        let eintrag = service.pending_signups().get(&UserName::from("paul")).unwrap();
        assert_eq!(eintrag.email, "paul@example.org");
        assert_eq!(mail.codes.lock().len(), 2);
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 1);
    }

    #[tokio::test]
    async fn aufraeumen_verwirft_abgelaufene_registrierungen() {
        let (db, _mail, service) = service_sofort_ablaufend();
        service.registrieren(anfrage("quirin", "quirin@example.org")).await.unwrap();
        service.registrieren(anfrage("rosa", "rosa@example.org")).await.unwrap();
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 2);

        assert_eq!(service.aufraeumen().await.unwrap(), 2);
        assert_eq!(service.pending_signups().anzahl(), 0);
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 0);
        assert_eq!(service.aufraeumen().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zu_viele_falsche_codes_verwerfen_registrierung() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("sven", "sven@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();
        let falsche = falsche_codes(&code, FEHLVERSUCHE.max_versuche as u32);

        let (letzter, vorher) = falsche.split_last().unwrap();
        for falsch in vorher {
            let err = service.email_bestaetigen("sven", falsch).await.unwrap_err();
            assert!(matches!(err, AuthError::CodeUngueltig));
        }
        let err = service.email_bestaetigen("sven", letzter).await.unwrap_err();
        assert!(matches!(err, AuthError::ZuVieleVersuche));
        assert!(!service.pending_signups().existiert(&UserName::from("sven")));
        assert_eq!(db.code_anzahl(CodeZweck::EmailVerifikation), 0);

        // Auch der richtige Code hilft jetzt nicht mehr
        let err = service.email_bestaetigen("sven", &code).await.unwrap_err();
        assert!(matches!(err, AuthError::CodeUngueltig));
        assert!(db.get_by_name("sven").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zweiter_faktor_sperrt_nach_fehlversuchen() {
        let (_db, service) = service_ohne_mail();
        service.registrieren(anfrage("tara", "tara@example.org")).await.unwrap();
        let tara = UserName::from("tara");
        let einrichtung = service.zwei_faktor_einrichten(&tara).await.unwrap();

        for _ in 0..FEHLVERSUCHE.max_versuche {
            let err = service
                .anmelden("tara", "geheimes passwort", Some("abcdef"))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::CodeUngueltig));
        }
        let backup = &einrichtung.backup_codes[0];
        let err = service
            .anmelden("tara", "geheimes passwort", Some(backup))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ZuVieleVersuche));
        let err = service.zwei_faktor_deaktivieren(&tara, backup).await.unwrap_err();
        assert!(matches!(err, AuthError::ZuVieleVersuche));
    }

    #[tokio::test]
    async fn einladungsfehler_nach_anlage_bricht_nicht_ab() {
        let (db, service) = service_ohne_mail();
        service.registrieren(anfrage("uwe", "uwe@example.org")).await.unwrap();
        let code = service.einladung_erstellen(&UserName::from("uwe")).await.unwrap();

        db.einladungs_ausfall_simulieren(true);
        let mut mit_code = anfrage("vera", "vera@example.org");
        mit_code.invite_code = Some(&code);
        let ergebnis = service.registrieren(mit_code).await.unwrap();
        let SignupErgebnis::Angemeldet { session, .. } = ergebnis else {
            panic!("Erwartet: sofort angemeldet");
        };
        assert!(service.token_anmelden(&session.token).await.is_ok());
        assert!(!db
            .are_friends(&UserName::from("uwe"), &UserName::from("vera"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn einladungsfehler_bei_bestaetigung_bricht_nicht_ab() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("wim", "wim@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();
        service.email_bestaetigen("wim", &code).await.unwrap();
        let einladung = service.einladung_erstellen(&UserName::from("wim")).await.unwrap();

        let mut mit_code = anfrage("xenia", "xenia@example.org");
        mit_code.invite_code = Some(&einladung);
        service.registrieren(mit_code).await.unwrap();
        let code = mail.codes.lock()[1].1.clone();

        db.einladungs_ausfall_simulieren(true);
        let (benutzer, _session) = service.email_bestaetigen("xenia", &code).await.unwrap();
        assert_eq!(benutzer.username, UserName::from("xenia"));
        assert!(!service.pending_signups().existiert(&UserName::from("xenia")));
        assert!(db.get_by_name("xenia").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ungueltige_eingaben() {
        let (_db, service) = service_ohne_mail();
        for (name, email) in [("ab", "ab@example.org"), ("mit leer", "x@example.org"), ("dave", "kein-at")] {
            let err = service.registrieren(anfrage(name, email)).await.unwrap_err();
            assert!(matches!(err, AuthError::Validierung(_)), "{name} / {email}");
        }
    }

    #[tokio::test]
    async fn vergebener_name() {
        let (_db, service) = service_ohne_mail();
        service.registrieren(anfrage("erin", "erin@example.org")).await.unwrap();
        let err = service.registrieren(anfrage("erin", "erin2@example.org")).await.unwrap_err();
        assert!(matches!(err, AuthError::BenutzernameVergeben(_)));
    }

    #[tokio::test]
    async fn anmelden_mit_zweitem_faktor() {
        let (_db, service) = service_ohne_mail();
        service.registrieren(anfrage("frank", "frank@example.org")).await.unwrap();
        let frank = UserName::from("frank");
        let einrichtung = service.zwei_faktor_einrichten(&frank).await.unwrap();

        let ohne = service.anmelden("frank", "geheimes passwort", None).await.unwrap_err();
        assert!(matches!(ohne, AuthError::ZweiterFaktorErforderlich));

        let falsch = service.anmelden("frank", "geheimes passwort", Some("12345")).await.unwrap_err();
        assert!(matches!(falsch, AuthError::CodeUngueltig));

        let code = zwei_faktor::totp_code_erzeugen(&einrichtung.secret, "Stammtisch", &frank).unwrap();
        assert!(service.anmelden("frank", "geheimes passwort", Some(&code)).await.is_ok());
    }

    #[tokio::test]
    async fn backup_code_nur_einmal() {
        let (db, service) = service_ohne_mail();
        service.registrieren(anfrage("gina", "gina@example.org")).await.unwrap();
        let gina = UserName::from("gina");
        let einrichtung = service.zwei_faktor_einrichten(&gina).await.unwrap();
        let backup = einrichtung.backup_codes[0].clone();

        service.anmelden("gina", "geheimes passwort", Some(&backup)).await.unwrap();
        let gespeichert = db.get_by_name("gina").await.unwrap().unwrap();
        assert_eq!(gespeichert.backup_codes.len(), zwei_faktor::BACKUP_CODE_ANZAHL - 1);

        let zweites_mal = service.anmelden("gina", "geheimes passwort", Some(&backup)).await.unwrap_err();
        assert!(matches!(zweites_mal, AuthError::CodeUngueltig));
    }

    #[tokio::test]
    async fn zwei_faktor_deaktivieren_braucht_code() {
        let (_db, service) = service_ohne_mail();
        service.registrieren(anfrage("hans", "hans@example.org")).await.unwrap();
        let hans = UserName::from("hans");
        let einrichtung = service.zwei_faktor_einrichten(&hans).await.unwrap();

        let err = service.zwei_faktor_deaktivieren(&hans, "000000x").await.unwrap_err();
        assert!(matches!(err, AuthError::CodeUngueltig));

        service
            .zwei_faktor_deaktivieren(&hans, &einrichtung.backup_codes[1])
            .await
            .unwrap();
        assert!(service.anmelden("hans", "geheimes passwort", None).await.is_ok());
    }

    #[tokio::test]
    async fn reset_antwort_ist_immer_gleich() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("ida", "ida@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();
        service.email_bestaetigen("ida", &code).await.unwrap();

        let echt = service.passwort_reset_anfordern("ida@example.org").await.unwrap();
        let unbekannt = service.passwort_reset_anfordern("niemand@example.org").await.unwrap();
        assert_eq!(echt, unbekannt);
        assert_eq!(db.code_anzahl(CodeZweck::PasswortReset), 1);
        assert_eq!(mail.resets.lock().len(), 1);
    }

    #[tokio::test]
    async fn reset_wird_gedrosselt() {
        let (db, service) = service_ohne_mail();
        service.registrieren(anfrage("jan", "jan@example.org")).await.unwrap();

        for _ in 0..4 {
            assert_eq!(service.passwort_reset_anfordern("jan").await.unwrap(), RESET_ANTWORT);
        }
        assert_eq!(db.code_anzahl(CodeZweck::PasswortReset), 3);
    }

    #[tokio::test]
    async fn reset_abschliessen_beendet_sessions() {
        let (db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("kim", "kim@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();
        let (_, session) = service.email_bestaetigen("kim", &code).await.unwrap();

        service.passwort_reset_anfordern("kim").await.unwrap();
        service.passwort_reset_anfordern("kim").await.unwrap();
        let token = mail.resets.lock()[0].1.clone();

        assert_eq!(service.reset_token_pruefen(&token).await.unwrap(), UserName::from("kim"));
        service.passwort_reset_abschliessen(&token, "ganz neues passwort").await.unwrap();

        assert!(service.token_anmelden(&session.token).await.is_err());
        assert_eq!(db.code_anzahl(CodeZweck::PasswortReset), 0);
        assert!(service.anmelden("kim", "ganz neues passwort", None).await.is_ok());
        let alt = service.anmelden("kim", "geheimes passwort", None).await.unwrap_err();
        assert!(matches!(alt, AuthError::UngueltigeAnmeldedaten));
    }

    #[tokio::test]
    async fn abgelaufener_reset_token() {
        let (_db, mail, service) = service_mit_mail();
        service.registrieren(anfrage("lea", "lea@example.org")).await.unwrap();
        let code = mail.codes.lock()[0].1.clone();
        service.email_bestaetigen("lea", &code).await.unwrap();
        service.passwort_reset_anfordern("lea").await.unwrap();
        let token = mail.resets.lock()[0].1.clone();

        let spaeter = Utc::now() + Duration::minutes(61);
        let err = service.reset_token_pruefen_zum(&token, spaeter).await.unwrap_err();
        assert!(matches!(err, AuthError::CodeAbgelaufen));
        let danach = service.reset_token_pruefen(&token).await.unwrap_err();
        assert!(matches!(danach, AuthError::CodeUngueltig));
    }

    #[tokio::test]
    async fn einladung_bei_registrierung() {
        let (db, service) = service_ohne_mail();
        service.registrieren(anfrage("max", "max@example.org")).await.unwrap();
        let code = service.einladung_erstellen(&UserName::from("max")).await.unwrap();

        let mut mit_code = anfrage("nora", "nora@example.org");
        mit_code.invite_code = Some(&code);
        service.registrieren(mit_code).await.unwrap();
        assert!(db
            .are_friends(&UserName::from("max"), &UserName::from("nora"))
            .await
            .unwrap());

        let mut nochmal = anfrage("otto", "otto@example.org");
        nochmal.invite_code = Some(&code);
        service.registrieren(nochmal).await.unwrap();
        assert!(!db
            .are_friends(&UserName::from("max"), &UserName::from("otto"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn datenbank_ausfall_ist_infrastrukturfehler() {
        let (db, service) = service_ohne_mail();
        db.ausfall_simulieren(true);
        let err = service.anmelden("alice", "geheimes passwort", None).await.unwrap_err();
        assert!(matches!(err, AuthError::Datenbank(DbError::NichtVerfuegbar(_))));
    }
}
