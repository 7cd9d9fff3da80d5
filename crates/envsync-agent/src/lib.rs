//! # envsync-agent: The Remote Agent
//!
//! The counterpart the engine talks to on every installation. One
//! [`AgentService`] answers the typed [`AgentRequest`] protocol; three
//! carriers put it on the wire:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Remote Agent Surfaces                            │
//! │                                                                         │
//! │  envsync agent serve ──► http::AgentServer   Basic username:token      │
//! │                          GET  {path}/status                             │
//! │                          POST {path}/command  AgentRequest → Reply      │
//! │                          POST {path}/export   FetchRequest → Payload    │
//! │                          POST {path}/import   Payload → ApplyReport     │
//! │                                                                         │
//! │  envsync agent exec  ──► exec::run           stdin → stdout (ssh)      │
//! │                                                                         │
//! │  LocalTransport      ──► AgentService::dispatch (same process)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`site`] - The installation: directory tree plus site database
//! - [`tables`] - Table dumps and statement application
//! - [`media`] - Media library export and idempotent import
//! - [`archive`] - gzip'd tar packing with path-escape checks
//! - [`registry`] - Public extension/theme registry client
//! - [`auth`] - Application tokens (argon2) and roles
//! - [`service`] - Request dispatch
//! - [`http`] - axum HTTP surface
//! - [`exec`] - stdin/stdout surface for shell sessions
//! - [`config`] - Agent configuration

pub mod archive;
pub mod auth;
pub mod config;
pub mod error;
pub mod exec;
pub mod http;
pub mod media;
pub mod registry;
pub mod service;
pub mod site;
pub mod tables;

pub use auth::{Role, TokenStore};
pub use config::AgentConfig;
pub use error::{AgentError, AgentResult};
pub use http::{AgentHandle, AgentServer};
pub use registry::{HttpRegistry, MemoryRegistry, NoRegistry, RegistryClient, RegistryEntry};
pub use service::AgentService;
pub use site::Site;

pub use envsync_core::{AgentReply, AgentRequest};

/// Version reported by the status call.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
