//! Client-seitige TCP-Verbindung zum Vermittler
//!
//! Nutzt den FrameCodec aus sichtruf-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Nach dem Hello/Identity-Handshake
//! wird die Verbindung in eine Hintergrund-Task ueberfuehrt, die
//! eingehende Nachrichten in die Orchestrator-Queue speist und
//! ausgehende Nachrichten aus einer mpsc-Queue auf den Draht schreibt.
//! Server-Pings beantwortet die Task selbststaendig.

use futures_util::{SinkExt, StreamExt};
use sichtruf_core::types::SessionToken;
use sichtruf_protocol::signal::{
    HelloRequest, SignalNachricht, SignalPayload,
};
use sichtruf_protocol::wire::FrameCodec;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::error::{KlientFehler, KlientResult};
use crate::kollaborateure::TokenSpeicher;
use crate::orchestrator::OrchestratorEreignis;

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Verbindung zum Vermittler nach abgeschlossenem Handshake
pub struct VermittlerVerbindung {
    framed: Framed<TcpStream, FrameCodec>,
    token: SessionToken,
    anzeige_name: String,
}

impl VermittlerVerbindung {
    /// Baut die TCP-Verbindung auf und fuehrt den Handshake durch
    ///
    /// Der persistierte Token wird vorgelegt; die vom Vermittler
    /// bestaetigte (oder frisch gepraegte) Identitaet wird ueber den
    /// `TokenSpeicher` gesichert.
    pub async fn verbinden<S: TokenSpeicher>(
        adresse: &str,
        gewuenschter_name: Option<String>,
        speicher: &S,
    ) -> KlientResult<Self> {
        tracing::info!(adresse = %adresse, "Verbinde mit Vermittler");
        let stream = TcpStream::connect(adresse).await?;
        let mut framed = Framed::new(stream, FrameCodec::neu());

        let hello = SignalNachricht::neu(
            1,
            SignalPayload::Hello(HelloRequest {
                token: speicher.laden().await,
                gewuenschter_name,
            }),
        );
        framed.send(hello).await?;

        // Auf Identity warten, Pings nebenbei beantworten
        loop {
            match framed.next().await {
                Some(Ok(antwort)) => match antwort.payload {
                    SignalPayload::Identity(id) => {
                        speicher.speichern(&id.token.inner().to_string()).await?;
                        tracing::info!(
                            token = %id.token,
                            name = %id.anzeige_name,
                            "Handshake abgeschlossen"
                        );
                        return Ok(Self {
                            framed,
                            token: id.token,
                            anzeige_name: id.anzeige_name,
                        });
                    }
                    SignalPayload::Ping(ping) => {
                        let pong = SignalNachricht::pong(
                            antwort.request_id,
                            ping.timestamp_ms,
                            jetzt_ms(),
                        );
                        framed.send(pong).await?;
                    }
                    SignalPayload::Error(e) => {
                        return Err(KlientFehler::Vermittler {
                            code: e.code,
                            message: e.message,
                        });
                    }
                    andere => {
                        return Err(KlientFehler::UnerwarteteAntwort(format!(
                            "Erwartet Identity, erhalten: {:?}",
                            std::mem::discriminant(&andere)
                        )));
                    }
                },
                Some(Err(e)) => return Err(KlientFehler::Io(e)),
                None => return Err(KlientFehler::Getrennt),
            }
        }
    }

    /// Vom Vermittler bestaetigter Session-Token
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Zugewiesener Anzeigename
    pub fn anzeige_name(&self) -> &str {
        &self.anzeige_name
    }

    /// Ueberfuehrt die Verbindung in eine Hintergrund-Task
    ///
    /// Eingehende Nachrichten landen als [`OrchestratorEreignis::Relay`]
    /// in der Orchestrator-Queue; das zurueckgegebene Sende-Ende nimmt
    /// ausgehende Nachrichten entgegen. Die Task endet, wenn der
    /// Vermittler trennt oder beide Queue-Enden fallengelassen wurden.
    pub fn starten(
        self,
        ereignis_tx: mpsc::Sender<OrchestratorEreignis>,
    ) -> mpsc::Sender<SignalNachricht> {
        let (ausgang_tx, mut ausgang_rx) = mpsc::channel::<SignalNachricht>(64);
        let mut framed = self.framed;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = framed.next() => {
                        match frame {
                            Some(Ok(nachricht)) => match nachricht.payload {
                                SignalPayload::Ping(ping) => {
                                    let pong = SignalNachricht::pong(
                                        nachricht.request_id,
                                        ping.timestamp_ms,
                                        jetzt_ms(),
                                    );
                                    if framed.send(pong).await.is_err() {
                                        break;
                                    }
                                }
                                SignalPayload::Pong(_) => {}
                                _ => {
                                    if ereignis_tx
                                        .send(OrchestratorEreignis::Relay(nachricht))
                                        .await
                                        .is_err()
                                    {
                                        break;
                                    }
                                }
                            },
                            Some(Err(e)) => {
                                tracing::warn!(fehler = %e, "Frame-Lesefehler");
                                break;
                            }
                            None => {
                                tracing::info!("Vermittler hat die Verbindung getrennt");
                                break;
                            }
                        }
                    }

                    ausgehend = ausgang_rx.recv() => {
                        match ausgehend {
                            Some(nachricht) => {
                                if let Err(e) = framed.send(nachricht).await {
                                    tracing::warn!(fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            tracing::debug!("Verbindungs-Task beendet");
        });

        ausgang_tx
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
