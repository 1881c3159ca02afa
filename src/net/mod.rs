//! Network protocol implementations.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Application                       │
//! │  ┌──────────────┐          ┌─────────────────┐              │
//! │  │  TcpServer   │────────▶│  Your Handler   │              │
//! │  │              │          │ (PacketHandler) │              │
//! │  └──────────────┘          └─────────────────┘              │
//! └────────────┬──────────────────────┬─────────────────────────┘
//!              │ start / stop         │ packet_length, on_packet,
//!              │ send_to / broadcast  │ on_connect, on_disconnect
//!              ▼                      │
//! ┌─────────────────────────────────────────────────────────────┐
//! │   acceptor thread          worker threads (one reactor each) │
//! │   ┌──────────┐            ┌──────────┐  ┌──────────┐        │
//! │   │ listener │──assign──▶│ conns 0  │  │ conns 1  │  ...   │
//! │   └──────────┘            └──────────┘  └──────────┘        │
//! └────────────┬────────────────────────────────────────────────┘
//!              │ readiness
//!              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Operating System (epoll/kqueue)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A handler never blocks on I/O: reads happen before `on_packet` is called
//! and `send_to` queues whatever the socket cannot take. See [`tcp`] for a
//! complete example.

pub mod errors;
pub mod tcp;
