//! sichtruf-relay – Vermittlungs-Service
//!
//! Dieser Crate implementiert den zentralen Vermittler fuer Sichtruf.
//! Er verwaltet TCP-Verbindungen, Session-Identitaeten, das Roster der
//! erreichbaren Teilnehmer und leitet Anruf-Signale zwischen genau zwei
//! Endpunkten weiter. Medien sieht der Vermittler nie – nur kleine,
//! opake Signal-Blobs.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (RelayServer)
//!     |
//!     v
//! KlientVerbindung (pro Verbindung ein Task)
//!     |  Handshake: Hello -> Identity, danach Anruf-Weiterleitung
//!     |
//!     v
//! VermittlungsDispatcher
//!     |
//!     +-- SessionRegister  (Token aufloesen, registrieren, verdraengen)
//!     +-- Roster           (Token -> Anzeigename, Broadcast bei Aenderung)
//!     +-- SignalRelay      (gezieltes Senden, PeerUnreachable-Meldung)
//! ```
//!
//! Nachrichten zwischen demselben geordneten Endpunkt-Paar werden in
//! Senderreihenfolge zugestellt (eine mpsc-Queue pro Client, jede
//! Verbindung leitet sequenziell weiter).

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod register;
pub mod relay;
pub mod roster;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use connection::KlientVerbindung;
pub use dispatcher::VermittlungsDispatcher;
pub use error::{RelayFehler, RelayResult};
pub use register::SessionRegister;
pub use relay::SignalRelay;
pub use roster::Roster;
pub use server_state::{VermittlerConfig, VermittlerZustand};
pub use tcp::RelayServer;
