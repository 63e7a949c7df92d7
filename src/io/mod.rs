// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Network I/O for serving zone transfers.
//!
//! A [`PushSession`](crate::xfr::PushSession) produces the messages of
//! a transfer without touching the network. To actually serve
//! transfers, an I/O provider is needed: it accepts TCP connections,
//! reads requests, and writes each session's output as the session
//! produces it.
//!
//! The provider here runs on Tokio. It takes a [`TransferService`],
//! which bundles the state shared by all connections: the catalog, the
//! TSIG keys, and the [`Limits`] applied to each transfer.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::db::Catalog;
use crate::message::tsig::Keyring;
use crate::message::MAX_MESSAGE_LEN;

mod tokio;

pub use self::tokio::{TokioIoProvider, TokioShutdownController};

/// The default time a client has to send a complete request, and the
/// time a write may stall before the connection is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The default number of transfers that may run at once.
pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// Per-transfer limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
    /// The maximum number of AXFR and IXFR sessions running at once.
    /// Requests beyond this are refused.
    pub max_sessions: usize,

    /// The maximum size of a response message.
    pub max_message_len: usize,

    /// See [`DEFAULT_IDLE_TIMEOUT`].
    pub idle_timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_message_len: MAX_MESSAGE_LEN,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// The state shared by every connection of a running server.
///
/// The TSIG keys may be replaced while the server runs; requests
/// already accepted keep the key they were verified with.
pub struct TransferService {
    catalog: Arc<Catalog>,
    keyring: RwLock<Arc<Keyring>>,
    limits: Limits,
}

impl TransferService {
    pub fn new(catalog: Arc<Catalog>, keyring: Keyring, limits: Limits) -> Self {
        Self {
            catalog,
            keyring: RwLock::new(Arc::new(keyring)),
            limits,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Returns the current TSIG keys.
    pub fn keyring(&self) -> Arc<Keyring> {
        self.keyring.read().unwrap().clone()
    }

    pub fn set_keyring(&self, keyring: Keyring) {
        *self.keyring.write().unwrap() = Arc::new(keyring);
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}
