//! Gemeinsame Identifikationstypen fuer Sichtruf
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.
//!
//! Der `SessionToken` ist die logische Identitaet eines Clients und
//! ueberlebt Reconnects. Die `VerbindungsId` identifiziert eine einzelne
//! physische Verbindung – zwei Verbindungen desselben Clients tragen
//! denselben Token, aber verschiedene Verbindungs-IDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaker Session-Token – die dauerhafte Identitaet eines Clients
///
/// Wird beim ersten Kontakt vom Vermittler gepraegt, clientseitig
/// persistiert und bei jeder (Wieder-)Verbindung vorgelegt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionToken(pub Uuid);

impl SessionToken {
    /// Praegt einen neuen zufaelligen SessionToken
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parst einen vorgelegten Token-String
    ///
    /// Gibt `None` zurueck wenn der String kein gueltiger Token ist.
    /// Ein fehlerhafter Token wird wie ein fehlender behandelt – der
    /// Aufrufer praegt dann einen frischen (Identitaetsverlust fuehrt zu
    /// einer neuen Identitaet, nie zu einem Fehler).
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }

    /// Kurzform des Tokens fuer Anzeigenamen und Logs (erste 8 Hex-Zeichen)
    pub fn kurzform(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sitzung:{}", self.0)
    }
}

/// Eindeutige ID einer physischen Verbindung
///
/// Dient als Wache gegen verspaetete Disconnects: eine Verbindung darf
/// beim Schliessen nur dann die Session austragen, wenn sie noch die
/// aktuell registrierte Verbindung fuer diesen Token ist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerbindungsId(pub Uuid);

impl VerbindungsId {
    /// Erstellt eine neue zufaellige VerbindungsId
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for VerbindungsId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for VerbindungsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "verbindung:{}", self.0)
    }
}
