//! Signal-Protokoll (TCP)
//!
//! Definiert alle Vermittlungsnachrichten die ueber die TCP-Verbindung
//! zwischen Client und Vermittler ausgetauscht werden.
//!
//! ## Design
//! - Request/Response Pattern: jede Nachricht hat eine `request_id: u32`
//! - JSON-Serialisierung via serde (TCP, nicht zeitkritisch)
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - Signal-Blobs (Offer/Answer der Peer-Verbindung) bleiben opak
//!
//! ## Richtungen
//! Adressierte Anruf-Nachrichten (`CallUser`, `AcceptCall`, ...) gehen vom
//! Client zum Vermittler und tragen ein `to`-Feld. Der Vermittler leitet
//! sie als Gegenstueck (`IncomingCall`, `CallAccepted`, ...) weiter und
//! stempelt dabei selbst das `from`-Feld aus dem Verbindungskontext –
//! ein Client kann keine fremde Absenderkennung vortaeuschen.

use serde::{Deserialize, Serialize};
use sichtruf_core::types::SessionToken;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Signal-Blob
// ---------------------------------------------------------------------------

/// Opaker Signal-Blob der Peer-Verbindung (Offer/Answer)
///
/// Der Inhalt wird weder vom Vermittler noch vom Orchestrator inspiziert,
/// nur unveraendert zwischen den beiden Endpunkten transportiert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalBlob(pub serde_json::Value);

impl SignalBlob {
    /// Erstellt einen Blob aus einem beliebigen JSON-Wert
    pub fn neu(wert: serde_json::Value) -> Self {
        Self(wert)
    }
}

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    /// Client hat noch keinen Hello/Identity-Handshake abgeschlossen
    NotEstablished,
    /// Handshake wurde doppelt gesendet
    AlreadyEstablished,
    ServerFull,
}

// ---------------------------------------------------------------------------
// Session-Nachrichten
// ---------------------------------------------------------------------------

/// Verbindungsaufbau: Client legt seinen persistierten Token vor
///
/// `token: None` (oder ein fehlerhafter Token) fuehrt zur Praegung einer
/// frischen Identitaet durch den Vermittler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Persistierter Session-Token aus frueheren Verbindungen
    pub token: Option<String>,
    /// Gewuenschter Anzeigename (None = Vermittler vergibt einen)
    pub gewuenschter_name: Option<String>,
}

/// Identitaets-Zuweisung des Vermittlers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    /// Der (bestaetigte oder frisch gepraegte) Session-Token
    pub token: SessionToken,
    /// Zugewiesener Anzeigename
    pub anzeige_name: String,
}

/// Benachrichtigung an eine verdraengte Verbindung
///
/// Wird gesendet wenn derselbe Token von einer neueren Verbindung
/// registriert wurde. Die alte Verbindung wird danach geschlossen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionNotice {
    pub grund: String,
}

// ---------------------------------------------------------------------------
// Roster
// ---------------------------------------------------------------------------

/// Vollstaendige Teilnehmerliste (Token -> Anzeigename)
///
/// Der Vermittler sendet immer die volle Tabelle; der eigene Eintrag wird
/// vom Empfaenger herausgefiltert, nicht vom Sender. Empfang derselben
/// Momentaufnahme ist idempotent – der Zustand wird ersetzt, nie gemischt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub teilnehmer: BTreeMap<SessionToken, String>,
}

// ---------------------------------------------------------------------------
// Anruf-Nachrichten (Client -> Vermittler, adressiert)
// ---------------------------------------------------------------------------

/// Anruf starten: Offer-Blob an einen Teilnehmer zustellen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallUserRequest {
    pub to: SessionToken,
    pub signal: SignalBlob,
}

/// Anruf annehmen: Answer-Blob an den Anrufer zustellen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptCallRequest {
    pub to: SessionToken,
    pub signal: SignalBlob,
}

/// Anruf ablehnen
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectCallRequest {
    pub to: SessionToken,
}

/// Anruf beenden (Auflegen)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndCallRequest {
    pub to: SessionToken,
}

// ---------------------------------------------------------------------------
// Anruf-Nachrichten (Vermittler -> Client, weitergeleitet)
// ---------------------------------------------------------------------------

/// Eingehender Anruf (weitergeleiteter Offer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingCallNotice {
    /// Vom Vermittler gestempelter Absender
    pub from: SessionToken,
    /// Anzeigename des Anrufers
    pub from_name: String,
    pub signal: SignalBlob,
}

/// Anruf wurde angenommen (weitergeleiteter Answer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAcceptedNotice {
    pub from: SessionToken,
    pub signal: SignalBlob,
}

/// Anruf wurde abgelehnt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRejectedNotice {
    pub from: SessionToken,
}

/// Gegenstelle hat aufgelegt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEndedNotice {
    pub from: SessionToken,
}

/// Zielteilnehmer ist nicht (mehr) erreichbar
///
/// Wird dem Absender einer adressierten Nachricht zurueckgemeldet wenn
/// fuer das Ziel keine lebende Verbindung registriert ist. Waehrend eines
/// ausgehenden Rufs wirkt dies wie eine Ablehnung.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerUnreachableNotice {
    pub ziel: SessionToken,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping (Client -> Vermittler oder Vermittler -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    /// Originaler Timestamp aus dem Ping
    pub echo_timestamp_ms: u64,
    /// Timestamp der antwortenden Seite
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: SignalPayload
// ---------------------------------------------------------------------------

/// Alle moeglichen Signal-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    // Session
    Hello(HelloRequest),
    Identity(IdentityResponse),
    SessionEvicted(EvictionNotice),

    // Roster
    RosterUpdate(RosterSnapshot),

    // Anrufe (Client -> Vermittler)
    CallUser(CallUserRequest),
    AcceptCall(AcceptCallRequest),
    RejectCall(RejectCallRequest),
    EndCall(EndCallRequest),

    // Anrufe (Vermittler -> Client)
    IncomingCall(IncomingCallNotice),
    CallAccepted(CallAcceptedNotice),
    CallRejected(CallRejectedNotice),
    CallEnded(CallEndedNotice),
    PeerUnreachable(PeerUnreachableNotice),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Error
    Error(ErrorResponse),
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Signal-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Signal-Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Jede Nachricht traegt eine `request_id` die der Absender vergibt.
/// Antworten (z.B. `Identity` auf `Hello`) kopieren die ID, damit die
/// Gegenseite Request und Response zuordnen kann. Weitergeleitete
/// Anruf-Nachrichten tragen die ID `0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalNachricht {
    /// Nachrichten-ID fuer Request/Response-Zuordnung
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: SignalPayload,
}

impl SignalNachricht {
    /// Erstellt eine neue Signal-Nachricht
    pub fn neu(request_id: u32, payload: SignalPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine weitergeleitete Nachricht (ohne Request-Zuordnung)
    pub fn weitergeleitet(payload: SignalPayload) -> Self {
        Self::neu(0, payload)
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::neu(request_id, SignalPayload::Ping(PingMessage { timestamp_ms }))
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::neu(
            request_id,
            SignalPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn fehler(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::neu(
            request_id,
            SignalPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_blob() -> SignalBlob {
        SignalBlob::neu(serde_json::json!({
            "type": "offer",
            "sdp": "v=0\r\no=- 46117317 2 IN IP4 127.0.0.1"
        }))
    }

    #[test]
    fn ping_roundtrip() {
        let ping = SignalNachricht::ping(1, 1234567890);
        let json = ping.to_json().unwrap();
        let decoded = SignalNachricht::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 1);
        if let SignalPayload::Ping(p) = decoded.payload {
            assert_eq!(p.timestamp_ms, 1234567890);
        } else {
            panic!("Erwartet Ping-Payload");
        }
    }

    #[test]
    fn hello_ohne_token_roundtrip() {
        let msg = SignalNachricht::neu(
            1,
            SignalPayload::Hello(HelloRequest {
                token: None,
                gewuenschter_name: None,
            }),
        );
        let json = msg.to_json().unwrap();
        let decoded = SignalNachricht::from_json(&json).unwrap();
        if let SignalPayload::Hello(h) = decoded.payload {
            assert!(h.token.is_none());
        } else {
            panic!("Erwartet Hello-Payload");
        }
    }

    #[test]
    fn signal_blob_bleibt_unveraendert() {
        let blob = test_blob();
        let msg = SignalNachricht::neu(
            7,
            SignalPayload::CallUser(CallUserRequest {
                to: SessionToken::neu(),
                signal: blob.clone(),
            }),
        );
        let json = msg.to_json().unwrap();
        let decoded = SignalNachricht::from_json(&json).unwrap();
        if let SignalPayload::CallUser(c) = decoded.payload {
            assert_eq!(c.signal, blob, "Blob muss verbatim ueberleben");
        } else {
            panic!("Erwartet CallUser-Payload");
        }
    }

    #[test]
    fn roster_snapshot_roundtrip() {
        let mut teilnehmer = BTreeMap::new();
        let a = SessionToken::neu();
        let b = SessionToken::neu();
        teilnehmer.insert(a, "Gast-a".to_string());
        teilnehmer.insert(b, "Gast-b".to_string());

        let msg = SignalNachricht::weitergeleitet(SignalPayload::RosterUpdate(RosterSnapshot {
            teilnehmer: teilnehmer.clone(),
        }));
        let json = msg.to_json().unwrap();
        let decoded = SignalNachricht::from_json(&json).unwrap();
        if let SignalPayload::RosterUpdate(r) = decoded.payload {
            assert_eq!(r.teilnehmer, teilnehmer);
        } else {
            panic!("Erwartet RosterUpdate-Payload");
        }
    }

    #[test]
    fn fehler_nachricht() {
        let msg = SignalNachricht::fehler(42, ErrorCode::NotEstablished, "Zuerst Hello senden");
        let json = msg.to_json().unwrap();
        let decoded = SignalNachricht::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 42);
        if let SignalPayload::Error(e) = decoded.payload {
            assert_eq!(e.code, ErrorCode::NotEstablished);
        } else {
            panic!("Erwartet Error-Payload");
        }
    }

    #[test]
    fn tagged_enum_nutzt_snake_case() {
        let msg = SignalNachricht::weitergeleitet(SignalPayload::SessionEvicted(EvictionNotice {
            grund: "Neuere Verbindung".into(),
        }));
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"session_evicted\""), "json: {json}");
    }

    #[test]
    fn incoming_call_traegt_absender() {
        let from = SessionToken::neu();
        let msg = SignalNachricht::weitergeleitet(SignalPayload::IncomingCall(IncomingCallNotice {
            from,
            from_name: "Gast-abc".into(),
            signal: test_blob(),
        }));
        let decoded = SignalNachricht::from_json(&msg.to_json().unwrap()).unwrap();
        if let SignalPayload::IncomingCall(n) = decoded.payload {
            assert_eq!(n.from, from);
        } else {
            panic!("Erwartet IncomingCall-Payload");
        }
    }
}
