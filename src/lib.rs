// Library root
// -----------
// This crate exposes the QRadar connector as a library. The binary
// (`main.rs`) wires it to a command line and an interactive menu.
//
// Module responsibilities:
// - `config`: the persisted JSON settings (QRadar connection and incident
//   platform credentials).
// - `api`: the blocking HTTP session for the QRadar REST API and response
//   normalization.
// - `ariel`: asynchronous Ariel search submission and bounded polling.
// - `batch`: splitting id lists into `id in (...)` filters.
// - `operations`: the name to handler registry every front end dispatches
//   through.
// - `platform`: forwarding offense ids to the incident platform.
// - `ui`: the terminal menu flows.
pub mod api;
pub mod ariel;
pub mod batch;
pub mod config;
pub mod error;
pub mod operations;
pub mod platform;
pub mod ui;

pub use error::{ConnectorError, ConnectorResult};
pub use operations::{Connector, Params};
