// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The mesh agent: configuration, command dispatch, watcher supervision, the
//! serialized mutation executor and the controller connection.

pub mod agent;
pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod protocol;
pub mod supervisor;
pub mod transport;

pub use agent::{Agent, AgentContext, AgentParts, AgentSettings};
pub use config::{load_config, AgentConfig, Cli};
pub use dispatch::Dispatcher;
pub use error::{ConfigError, DispatchError, ProtocolError, TransportError};
pub use executor::{MeshExecutor, MeshJob};
pub use protocol::Command;
pub use supervisor::WatcherSupervisor;
