use std::thread;
use std::time::Duration;

use mill_frame::error::Result;
use mill_frame::net::errors::{NetworkError, NetworkEvent};
use mill_frame::net::tcp::{
    config::TcpServerConfig, framing::LengthPrefixed, ConnectionId, PacketHandler, PacketLength,
    ServerContext, TcpServer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Echoes every length-prefixed frame back to its sender.
#[derive(Default)]
struct EchoHandler;

impl PacketHandler for EchoHandler {
    fn packet_length(&self, _conn_id: ConnectionId, buffered: &[u8]) -> PacketLength {
        LengthPrefixed::packet_length(buffered)
    }

    fn on_packet(
        &self,
        ctx: &ServerContext,
        conn_id: ConnectionId,
        packet: &[u8],
    ) -> anyhow::Result<()> {
        let body = LengthPrefixed::payload(packet);
        info!(
            conn = %conn_id,
            len = body.len(),
            "received: {}",
            String::from_utf8_lossy(body).trim_end()
        );

        // the frame still carries its header, so it goes back as is
        ctx.send_to(conn_id, packet)?;
        Ok(())
    }

    fn on_event(&self, _ctx: &ServerContext, event: NetworkEvent) {
        match event {
            NetworkEvent::ConnectionEstablished(conn_id, addr) => {
                info!(conn = %conn_id, peer = %addr, "client connected");
            }
            NetworkEvent::ConnectionClosed(conn_id) => {
                info!(conn = %conn_id, "client disconnected");
            }
            NetworkEvent::Listening(addr) => info!("echo server listening on {addr}"),
            _ => {}
        }
    }

    fn on_error(&self, _ctx: &ServerContext, conn_id: Option<ConnectionId>, error: &NetworkError) {
        match conn_id {
            Some(id) => error!(conn = %id, "connection error: {error}"),
            None => error!("server error: {error}"),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = TcpServerConfig::builder()
        .address("127.0.0.1:8080".parse().unwrap())
        .max_message_size(64 * 1024)
        .build();

    let server = TcpServer::new(config, EchoHandler)?;
    server.start()?;

    // send "\x00\x00\x00\x05hello" with any TCP client to see it echoed
    loop {
        thread::sleep(Duration::from_secs(30));
        info!(
            connections = server.connection_count(),
            pooled = server.pool_available(),
            "status"
        );
    }
}
