//! Roster – Tabelle der aktuell erreichbaren Teilnehmer
//!
//! Prozessweite Abbildung SessionToken -> Anzeigename. Das Roster enthaelt
//! nie einen Eintrag fuer eine vollstaendig getrennte Verbindung; der
//! Dispatcher traegt bei jeder Registrierung ein und bei jedem (gueltigen)
//! Abmelden aus und versendet danach die volle Tabelle an alle Clients.
//! Der eigene Eintrag wird vom Empfaenger herausgefiltert, nicht hier.

use dashmap::DashMap;
use sichtruf_core::types::SessionToken;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tabelle der erreichbaren Teilnehmer
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct Roster {
    inner: Arc<DashMap<SessionToken, String>>,
}

impl Roster {
    /// Erstellt ein neues leeres Roster
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Traegt einen Teilnehmer ein oder aktualisiert seinen Anzeigenamen
    pub fn eintragen(&self, token: SessionToken, anzeige_name: impl Into<String>) {
        let name = anzeige_name.into();
        tracing::debug!(token = %token, name = %name, "Roster-Eintrag");
        self.inner.insert(token, name);
    }

    /// Entfernt einen Teilnehmer aus dem Roster
    pub fn entfernen(&self, token: &SessionToken) {
        if self.inner.remove(token).is_some() {
            tracing::debug!(token = %token, "Roster-Eintrag entfernt");
        }
    }

    /// Gibt eine schreibgeschuetzte Momentaufnahme der vollen Tabelle zurueck
    ///
    /// BTreeMap fuer deterministische Reihenfolge in Broadcasts und Tests.
    pub fn momentaufnahme(&self) -> BTreeMap<SessionToken, String> {
        self.inner
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    /// Gibt den Anzeigenamen eines Teilnehmers zurueck
    pub fn name_von(&self, token: &SessionToken) -> Option<String> {
        self.inner.get(token).map(|e| e.value().clone())
    }

    /// Prueft ob ein Teilnehmer eingetragen ist
    pub fn enthaelt(&self, token: &SessionToken) -> bool {
        self.inner.contains_key(token)
    }

    /// Gibt die Anzahl der eingetragenen Teilnehmer zurueck
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
