//! Session-Register – Verwaltet die Identitaet aller lebenden Verbindungen
//!
//! Ein Token identifiziert genau einen logischen Teilnehmer ueber
//! Reconnects hinweg. Das Register stellt sicher, dass nie zwei lebende
//! Verbindungen denselben Token tragen: meldet sich ein Token erneut an,
//! wird die aeltere Verbindung verdraengt (die neue ist massgeblich).

use dashmap::DashMap;
use sichtruf_core::types::{SessionToken, VerbindungsId};
use sichtruf_protocol::signal::SignalNachricht;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Groesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// KlientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer registrierten Verbindung
#[derive(Clone, Debug)]
pub struct KlientSender {
    pub token: SessionToken,
    pub verbindungs_id: VerbindungsId,
    pub tx: mpsc::Sender<SignalNachricht>,
    /// Verdraengungs-Signal der Verbindungs-Task; eigener Kanal, damit
    /// eine volle Send-Queue die Zustellung nicht verhindern kann
    verdraengt_tx: Arc<watch::Sender<bool>>,
}

impl KlientSender {
    /// Signalisiert der Verbindungs-Task, dass diese Session von einer
    /// neueren Verbindung uebernommen wurde
    ///
    /// Die Task stellt daraufhin selbst `SessionEvicted` zu und beendet
    /// sich. Der watch-Kanal kann im Gegensatz zur Send-Queue nicht voll
    /// laufen, das Signal kommt also immer an.
    pub fn verdraengen(&self) {
        if self.verdraengt_tx.send(true).is_err() {
            tracing::debug!(token = %self.token, "Verbindungs-Task bereits beendet");
        }
    }

    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: SignalNachricht) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(token = %self.token, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(token = %self.token, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SessionRegister
// ---------------------------------------------------------------------------

/// Register aller lebenden Sessions, indiziert nach Token
///
/// Thread-safe via Arc + DashMap. Clone des Registers teilt den inneren
/// Zustand. Alle Mutationen laufen ueber die Operationen dieses Typs.
#[derive(Clone)]
pub struct SessionRegister {
    inner: Arc<SessionRegisterInner>,
}

struct SessionRegisterInner {
    /// Lebende Verbindungen, indiziert nach SessionToken
    sessions: DashMap<SessionToken, KlientSender>,
}

impl SessionRegister {
    /// Erstellt ein neues leeres SessionRegister
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(SessionRegisterInner {
                sessions: DashMap::new(),
            }),
        }
    }

    /// Loest einen vorgelegten Token-String zu einem SessionToken auf
    ///
    /// Fehlender oder fehlerhafter Token fuehrt zur Praegung eines
    /// frischen Tokens – nie zu einem Fehler. Ein gueltiger Token wird
    /// unveraendert zurueckgegeben (stabil ueber Reconnects).
    pub fn aufloesen(&self, vorgelegt: Option<&str>) -> SessionToken {
        match vorgelegt.and_then(SessionToken::parse) {
            Some(token) => token,
            None => {
                let token = SessionToken::neu();
                if vorgelegt.is_some() {
                    tracing::warn!(token = %token, "Fehlerhafter Token vorgelegt – frische Identitaet gepraegt");
                } else {
                    tracing::debug!(token = %token, "Frische Identitaet gepraegt");
                }
                token
            }
        }
    }

    /// Registriert eine Verbindung fuer einen Token
    ///
    /// Existiert bereits eine lebende Verbindung fuer den Token
    /// (Duplikat-Session, z.B. zweites Fenster desselben Clients), wird
    /// die neue Verbindung massgeblich; der Sender der verdraengten
    /// Verbindung wird zurueckgegeben, damit der Aufrufer sie ueber
    /// `verdraengen` schliessen lassen kann.
    pub fn registrieren(
        &self,
        token: SessionToken,
        verbindungs_id: VerbindungsId,
        tx: mpsc::Sender<SignalNachricht>,
        verdraengt_tx: Arc<watch::Sender<bool>>,
    ) -> Option<KlientSender> {
        let neuer = KlientSender {
            token,
            verbindungs_id,
            tx,
            verdraengt_tx,
        };
        let verdraengt = self.inner.sessions.insert(token, neuer);

        match &verdraengt {
            Some(alter) => {
                tracing::info!(
                    token = %token,
                    alte_verbindung = %alter.verbindungs_id,
                    neue_verbindung = %verbindungs_id,
                    "Duplikat-Session – aeltere Verbindung wird verdraengt"
                );
            }
            None => {
                tracing::info!(token = %token, verbindung = %verbindungs_id, "Session registriert");
            }
        }

        verdraengt
    }

    /// Traegt eine Session aus, aber nur wenn die schliessende Verbindung
    /// noch die registrierte ist
    ///
    /// Verhindert, dass der verspaetete Disconnect einer verdraengten
    /// Verbindung die neuere Session austraegt. Gibt `true` zurueck wenn
    /// tatsaechlich ausgetragen wurde.
    pub fn abmelden(&self, token: &SessionToken, verbindungs_id: &VerbindungsId) -> bool {
        let entfernt = self
            .inner
            .sessions
            .remove_if(token, |_, eintrag| {
                eintrag.verbindungs_id == *verbindungs_id
            })
            .is_some();

        if entfernt {
            tracing::info!(token = %token, "Session ausgetragen");
        } else {
            tracing::debug!(
                token = %token,
                verbindung = %verbindungs_id,
                "Abmeldung ignoriert – Verbindung nicht mehr registriert"
            );
        }
        entfernt
    }

    /// Gibt den Sender der lebenden Verbindung eines Tokens zurueck
    pub fn sender_von(&self, token: &SessionToken) -> Option<KlientSender> {
        self.inner.sessions.get(token).map(|e| e.value().clone())
    }

    /// Prueft ob fuer den Token eine lebende Verbindung existiert
    pub fn ist_registriert(&self, token: &SessionToken) -> bool {
        self.inner.sessions.contains_key(token)
    }

    /// Gibt die Anzahl der lebenden Sessions zurueck
    pub fn anzahl(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Gibt alle registrierten Sender zurueck (fuer Broadcasts)
    pub fn alle_sender(&self) -> Vec<KlientSender> {
        self.inner
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect()
    }
}

impl Default for SessionRegister {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
