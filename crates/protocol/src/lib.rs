//! sichtruf-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen die zwischen Client und
//! Vermittler ausgetauscht werden, sowie das Wire-Format (Frame-Codec).
//! Signal-Blobs der Peer-Verbindung werden dabei nie inspiziert, nur
//! unveraendert weitergereicht.

pub mod signal;
pub mod wire;

pub use signal::{SignalBlob, SignalNachricht, SignalPayload};
pub use wire::FrameCodec;
