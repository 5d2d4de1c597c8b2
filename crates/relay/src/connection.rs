//! Klient-Verbindung – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `KlientVerbindung` in einem eigenen
//! tokio-Task. Die Task liest Frames via `FrameCodec`, dispatcht sie an
//! den `VermittlungsDispatcher` und leert parallel die Send-Queue, in die
//! der Vermittler weitergeleitete Nachrichten fuer diesen Client legt.
//!
//! ## Keepalive
//! - Vermittler sendet alle `keepalive_sek` einen Ping
//! - Client muss innerhalb von `verbindungs_timeout_sek` irgendein Frame
//!   senden (Pong genuegt)
//! - Bei Timeout wird die Verbindung getrennt
//!
//! ## Verdraengung
//! Registriert eine neuere Verbindung denselben Session-Token, setzt der
//! Dispatcher das watch-Signal der alten Verbindung. Die Task stellt
//! daraufhin selbst `SessionEvicted` zu und beendet sich; das Signal
//! laeuft nicht ueber die Send-Queue und kann darum nicht an einer
//! vollen Queue scheitern. Die Wache in `SessionRegister::abmelden`
//! sorgt dafuer, dass der Cleanup der alten Verbindung die neuere
//! Session nicht austraegt.

use futures_util::{SinkExt, StreamExt};
use sichtruf_core::types::VerbindungsId;
use sichtruf_protocol::signal::{ErrorCode, EvictionNotice, SignalNachricht, SignalPayload};
use sichtruf_protocol::wire::FrameCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, VermittlungsDispatcher};
use crate::register::SEND_QUEUE_GROESSE;
use crate::server_state::VermittlerZustand;

/// Verarbeitet eine einzelne TCP-Verbindung
///
/// Laeuft in einem eigenen tokio-Task bis der Client trennt, die
/// Verbindung verdraengt wird oder ein Shutdown-Signal eingeht.
pub struct KlientVerbindung {
    state: Arc<VermittlerZustand>,
    peer_addr: SocketAddr,
}

impl KlientVerbindung {
    /// Erstellt eine neue KlientVerbindung
    pub fn neu(state: Arc<VermittlerZustand>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        tracing::info!(peer = %peer_addr, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::neu());

        // Send-Queue dieser Verbindung; der Dispatcher hinterlegt das
        // Sende-Ende beim Hello im SessionRegister
        let (sende_tx, mut sende_rx) = mpsc::channel::<SignalNachricht>(SEND_QUEUE_GROESSE);

        // Verdraengungs-Signal; der Dispatcher setzt es, wenn eine neuere
        // Verbindung diesen Session-Token uebernimmt
        let (verdraengt_tx, mut verdraengt_rx) = tokio::sync::watch::channel(false);
        let verdraengt_tx = Arc::new(verdraengt_tx);

        let mut ctx = DispatcherContext {
            peer_addr,
            verbindungs_id: VerbindungsId::neu(),
            token: None,
            sende_tx,
            verdraengt_tx,
        };
        let dispatcher = VermittlungsDispatcher::neu(Arc::clone(&self.state));

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        // Zeitpunkt des naechsten Ping
        let mut naechster_ping = Instant::now() + keepalive_intervall;
        let mut ping_request_id: u32 = 0;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(
                                peer = %peer_addr,
                                request_id = nachricht.request_id,
                                "Nachricht empfangen"
                            );

                            if let Some(antwort) = dispatcher.dispatch(nachricht, &mut ctx) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(
                                        peer = %peer_addr,
                                        fehler = %e,
                                        "Senden fehlgeschlagen"
                                    );
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                peer = %peer_addr,
                                fehler = %e,
                                "Frame-Lesefehler"
                            );
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Weitergeleitete Nachricht aus der Send-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(
                            peer = %peer_addr,
                            fehler = %e,
                            "Weiterleitung-Senden fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Verdraengung durch eine neuere Verbindung desselben Tokens
                Ok(()) = verdraengt_rx.changed() => {
                    if *verdraengt_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Verbindung verdraengt");
                        let hinweis = SignalNachricht::weitergeleitet(
                            SignalPayload::SessionEvicted(EvictionNotice {
                                grund: "Eine neuere Verbindung hat diese Session uebernommen"
                                    .into(),
                            }),
                        );
                        let _ = framed.send(hinweis).await;
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if jetzt >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        let ts = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64;
                        let ping = SignalNachricht::ping(ping_request_id, ts);

                        if let Err(e) = framed.send(ping).await {
                            tracing::warn!(
                                peer = %peer_addr,
                                fehler = %e,
                                "Ping-Senden fehlgeschlagen"
                            );
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = SignalNachricht::fehler(
                            0,
                            ErrorCode::InternalError,
                            "Vermittler wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        // Cleanup: Session austragen (nur wenn diese Verbindung noch die
        // registrierte ist) und Roster verteilen
        dispatcher.verbindung_beenden(&ctx);

        tracing::info!(peer = %peer_addr, "Verbindungs-Task beendet");
    }
}
