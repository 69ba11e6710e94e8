//! # Aquarius
//!
//! A streaming front-end for an LLM-driven coding agent.
//!
//! This library provides:
//! - An HTTP relay that forwards a task query to Gemini and pipes the
//!   generated text back unchanged
//! - A client that decodes the relayed bytes into typed agent events
//! - A session state machine that folds those events into UI state
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐  POST /api/generate  ┌──────────────┐   SSE    ┌──────────┐
//!   │ AgentSession │ ───────────────────▶ │    Relay     │ ───────▶ │  Gemini  │
//!   │ RelayClient  │ ◀─────────────────── │  (api::*)    │ ◀─────── │          │
//!   └──────────────┘    NDJSON bytes      └──────────────┘  text    └──────────┘
//! ```
//!
//! ## Task Flow
//! 1. The session starts an attempt and submits the query
//! 2. The relay opens an upstream stream and forwards each fragment
//! 3. The client reassembles lines into [`StreamEvent`]s
//! 4. The session folds events until `completed`, `error`, end of stream or cancel
//!
//! ## Modules
//! - `api`: relay server, rate limiting, static client hosting
//! - `llm`: upstream text generation (Gemini)
//! - `ndjson`: chunk-boundary-safe line decoding
//! - `client`: typed event stream over the relay
//! - `session`: attempt lifecycle and UI state
//! - `tracker` / `reveal`: per-group shell output reveal bookkeeping

pub mod api;
pub mod client;
pub mod config;
pub mod llm;
pub mod ndjson;
pub mod protocol;
pub mod reveal;
pub mod session;
pub mod tracker;

pub use client::RelayClient;
pub use config::Config;
pub use protocol::{LogGroup, LogLine, LogType, StreamEvent};
pub use session::{AgentSession, CredentialGate, SessionPhase, SessionState};
