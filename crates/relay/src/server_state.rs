//! Gemeinsamer Server-Zustand fuer den Vermittlungs-Service
//!
//! Haelt Konfiguration, Session-Register, Roster und Relay als geteilte
//! Referenzen, die sicher zwischen tokio-Tasks geteilt werden koennen.

use std::sync::Arc;
use std::time::Instant;

use crate::register::SessionRegister;
use crate::relay::SignalRelay;
use crate::roster::Roster;

/// Konfiguration fuer den Vermittlungs-Service
#[derive(Debug, Clone)]
pub struct VermittlerConfig {
    /// Anzeigename des Vermittlers
    pub server_name: String,
    /// Maximale gleichzeitige Clients
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
}

impl Default for VermittlerConfig {
    fn default() -> Self {
        Self {
            server_name: "Sichtruf Vermittler".to_string(),
            max_clients: 256,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
///
/// Register und Roster sind die einzigen zwischen Clients geteilten
/// Zustaende; alle Mutationen laufen ueber ihre Operationen.
pub struct VermittlerZustand {
    /// Server-Konfiguration
    pub config: Arc<VermittlerConfig>,
    /// Session-Register (Token -> lebende Verbindung)
    pub register: SessionRegister,
    /// Roster (Token -> Anzeigename)
    pub roster: Roster,
    /// Sendekanal (gezielt + Broadcast)
    pub relay: SignalRelay,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_zeit: Instant,
}

impl VermittlerZustand {
    /// Erstellt einen neuen VermittlerZustand
    pub fn neu(config: VermittlerConfig) -> Arc<Self> {
        let register = SessionRegister::neu();
        Arc::new(Self {
            config: Arc::new(config),
            relay: SignalRelay::neu(register.clone()),
            register,
            roster: Roster::neu(),
            start_zeit: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_zeit.elapsed().as_secs()
    }
}
