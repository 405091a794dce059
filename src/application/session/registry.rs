//! Session registry: the single source of truth for connected charge points

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::application::ports::SessionEvents;
use crate::domain::{SessionHandle, SessionInfo, SessionSnapshot, SessionToken};
use crate::shared::errors::RegistryError;

use super::observer::{
    SessionEvent, SessionEventBus, SessionEventSubscriber, SessionsListener,
};

/// Thread-safe registry of live OCPP sessions, keyed by transport handle.
///
/// Writes go through `mutation`, so every observer sees changes in the
/// order they were applied and never a half-applied state. Reads go straight
/// to the map, except [`snapshot`](Self::snapshot), which returns the copy
/// published by the last mutation. The listener runs under `delivery` only,
/// taken before `mutation` is released.
pub struct SessionRegistry {
    sessions: DashMap<SessionHandle, SessionInfo>,
    mutation: Mutex<()>,
    delivery: Mutex<()>,
    published: RwLock<SessionSnapshot>,
    listener: RwLock<Option<Arc<dyn SessionsListener>>>,
    events: SessionEventBus,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            mutation: Mutex::new(()),
            delivery: Mutex::new(()),
            published: RwLock::new(SessionSnapshot::new()),
            listener: RwLock::new(None),
            events: SessionEventBus::new(),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Mutations (transport lifecycle only) ───────────────────

    pub fn on_connected(
        &self,
        handle: SessionHandle,
        info: SessionInfo,
    ) -> Result<(), RegistryError> {
        let guard = self.lock_mutation();
        if self.sessions.contains_key(&handle) {
            warn!(%handle, identifier = %info.identifier, "Duplicate session handle");
            return Err(RegistryError::DuplicateHandle(handle));
        }

        self.sessions.insert(handle, info.clone());
        let total = self.sessions.len();
        info!(
            %handle,
            identifier = %info.identifier,
            address = %info.address,
            total,
            "Session connected"
        );
        self.notify(
            guard,
            SessionEvent::Connected {
                handle,
                info,
                total,
            },
        );
        Ok(())
    }

    /// Remove a session. Unknown handles are ignored and notify nobody.
    pub fn on_disconnected(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let guard = self.lock_mutation();
        match self.sessions.remove(&handle) {
            Some((_, info)) => {
                let total = self.sessions.len();
                info!(%handle, identifier = %info.identifier, total, "Session disconnected");
                self.notify(
                    guard,
                    SessionEvent::Disconnected {
                        handle,
                        info,
                        total,
                    },
                );
            }
            None => debug!(%handle, "Disconnect for unknown session ignored"),
        }
        Ok(())
    }

    /// Drop every session. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let guard = self.lock_mutation();
        let removed = self.sessions.len();
        if removed > 0 {
            self.sessions.clear();
            info!(removed, "Session registry cleared");
            self.notify(guard, SessionEvent::Cleared { removed });
        }
        removed
    }

    /// Publish under the mutation lock, then hand over to the delivery lock
    /// so the listener may read the registry.
    fn notify(&self, mutation: MutexGuard<'_, ()>, event: SessionEvent) {
        metrics::gauge!("ocpp_sessions_connected").set(self.sessions.len() as f64);

        let snapshot = self.collect();
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.events.publish(event);

        let _delivery = self.lock_delivery();
        drop(mutation);
        if let Some(listener) = listener {
            listener.sessions_changed(&snapshot);
        }
    }

    // ── Observers ──────────────────────────────────────────────

    /// Install the single listener, replacing any previous one.
    pub fn set_listener(&self, listener: Option<Arc<dyn SessionsListener>>) {
        let _guard = self.lock_mutation();
        let replaced = std::mem::replace(
            &mut *self.listener.write().unwrap_or_else(PoisonError::into_inner),
            listener,
        );
        if replaced.is_some() {
            debug!("Sessions listener replaced");
        }
    }

    pub fn subscribe(&self) -> SessionEventSubscriber {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &SessionEventBus {
        &self.events
    }

    // ── Queries ────────────────────────────────────────────────

    /// Owned copy of the contents as of the last completed mutation.
    ///
    /// Safe to call from a listener. Listeners must not mutate the registry
    /// or replace the listener.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn collect(&self) -> SessionSnapshot {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn get(&self, handle: &SessionHandle) -> Option<SessionInfo> {
        self.sessions.get(handle).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, handle: &SessionHandle) -> bool {
        self.sessions.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Earliest connected session; ties broken by handle.
    pub fn oldest(&self) -> Option<(SessionHandle, SessionInfo)> {
        self.sessions
            .iter()
            .min_by(|a, b| {
                a.value()
                    .connected_at
                    .cmp(&b.value().connected_at)
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|entry| (*entry.key(), entry.value().clone()))
    }

    /// Resolve a display token `"<identifier> (<address>)"`.
    pub fn resolve(&self, token: &str) -> Result<SessionHandle, RegistryError> {
        let token: SessionToken = token.parse()?;
        self.unique_match(&token.to_string(), |info| token.matches(info))
    }

    /// Resolve by identifier alone, ignoring a leading `/`.
    pub fn resolve_by_identifier(&self, identifier: &str) -> Result<SessionHandle, RegistryError> {
        self.unique_match(identifier, |info| info.has_identifier(identifier))
    }

    fn unique_match(
        &self,
        query: &str,
        predicate: impl Fn(&SessionInfo) -> bool,
    ) -> Result<SessionHandle, RegistryError> {
        let matches: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        match matches.as_slice() {
            [handle] => Ok(*handle),
            [] => Err(RegistryError::NotFound(query.to_string())),
            many => Err(RegistryError::Ambiguous {
                query: query.to_string(),
                matches: many.len(),
            }),
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents for SessionRegistry {
    fn new_session(&self, handle: SessionHandle, info: SessionInfo) {
        if let Err(e) = self.on_connected(handle, info) {
            warn!(%handle, error = %e, "Rejected new session");
        }
    }

    fn lost_session(&self, handle: SessionHandle) {
        if let Err(e) = self.on_disconnected(handle) {
            warn!(%handle, error = %e, "Failed to remove session");
        }
    }
}
