//! sichtruf-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use sichtruf_relay::{RelayServer, VermittlerConfig, VermittlerZustand};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet den Vermittler und laeuft bis zum Shutdown-Signal
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        let zustand = VermittlerZustand::neu(VermittlerConfig {
            server_name: self.config.server.name.clone(),
            max_clients: self.config.server.max_clients,
            keepalive_sek: self.config.vermittlung.keepalive_sek,
            verbindungs_timeout_sek: self.config.vermittlung.verbindungs_timeout_sek,
        });

        let bind_addr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse: {e}"))?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let relay = RelayServer::neu(zustand, bind_addr);

        let server_task = tokio::spawn(async move { relay.starten(shutdown_rx).await });

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        server_task.await??;

        Ok(())
    }
}
