// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded set of sender sessions and the memory reclamation pass.

use crate::session::Session;
use hashbrown::HashMap;
use std::net::SocketAddr;
use tracing::debug;

/// Result of one [`SessionRegistry::reclaim`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Sessions with nothing pending that were dropped
    pub removed: usize,
    /// Sessions whose buffer allocation was reduced
    pub shrunk: usize,
}

impl ReclaimStats {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.shrunk == 0
    }
}

pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, Session>,
    max_sessions: usize,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.sessions.capacity()
    }

    #[must_use]
    pub fn get(&self, identity: &SocketAddr) -> Option<&Session> {
        self.sessions.get(identity)
    }

    /// Looks up the session for `identity`, creating it if there is room.
    ///
    /// At capacity a reclamation pass runs first; if that frees nothing the
    /// sender is refused and `None` is returned. Refusal is load shedding,
    /// not an error.
    pub fn find_or_create(&mut self, identity: SocketAddr) -> Option<&mut Session> {
        if !self.sessions.contains_key(&identity) {
            if self.sessions.len() >= self.max_sessions {
                self.reclaim();
                if self.sessions.len() >= self.max_sessions {
                    debug!(
                        "Session limit {} reached, dropping datagram from {}",
                        self.max_sessions, identity
                    );
                    return None;
                }
            }
            if self.sessions.try_reserve(1).is_err() {
                debug!("Can't grow session table, dropping datagram from {}", identity);
                return None;
            }
            self.sessions.insert(identity, Session::new(identity));
        }
        self.sessions.get_mut(&identity)
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.sessions.values().any(Session::has_pending)
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Drops every session with nothing pending, shrinks the buffers of the
    /// rest, then shrinks the table itself.
    pub fn reclaim(&mut self) -> ReclaimStats {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.has_pending());
        let removed = before - self.sessions.len();

        let shrunk = self
            .sessions
            .values_mut()
            .map(Session::shrink)
            .filter(|&changed| changed)
            .count();
        self.sessions.shrink_to_fit();

        let stats = ReclaimStats { removed, shrunk };
        if !stats.is_noop() {
            debug!(
                "Reclaimed {} idle sessions, shrank {} buffers, {} sessions remain",
                removed,
                shrunk,
                self.sessions.len()
            );
        }
        stats
    }
}
