use overuse_core::{FLAG_RESOURCE_OVERUSE_IO, ResourceOveruseStats};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::error::{AppError, Result};

/// Subscriber handle; dropping the receiving half detaches it.
pub type OveruseListener = UnboundedSender<ResourceOveruseStats>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Notified only about the registering uid's own overuse.
    Caller(u32),
    /// Notified about every overused package.
    System,
}

#[derive(Debug)]
struct ListenerEntry {
    scope: ListenerScope,
    flags: u32,
    listener: OveruseListener,
    /// Task that detaches the entry once the subscriber goes away.
    watcher: Option<AbortHandle>,
}

#[derive(Debug, Default)]
pub struct ListenerRegistry {
    entries: Vec<ListenerEntry>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, scope: ListenerScope, flags: u32, listener: OveruseListener) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|entry| entry.scope == scope && entry.listener.same_channel(&listener))
        {
            return Err(AppError::InvalidState(
                "listener is already registered".to_string(),
            ));
        }
        self.entries.push(ListenerEntry {
            scope,
            flags,
            listener,
            watcher: None,
        });
        Ok(())
    }

    /// Returns false when the registration is already gone.
    pub fn attach_watcher(
        &mut self,
        scope: ListenerScope,
        listener: &OveruseListener,
        watcher: AbortHandle,
    ) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|entry| entry.scope == scope && entry.listener.same_channel(listener))
        {
            Some(entry) => {
                entry.watcher = Some(watcher);
                true
            }
            None => false,
        }
    }

    /// Returns whether an entry was removed. The entry's watcher is cancelled.
    pub fn remove(&mut self, scope: ListenerScope, listener: &OveruseListener) -> bool {
        let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.scope == scope && entry.listener.same_channel(listener))
        else {
            return false;
        };
        let entry = self.entries.remove(index);
        if let Some(watcher) = entry.watcher {
            watcher.abort();
        }
        true
    }

    /// Drops every registration backed by a closed channel.
    pub fn detach(&mut self, listener: &OveruseListener) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !entry.listener.same_channel(listener));
        before - self.entries.len()
    }

    /// Listeners interested in an I/O overuse of `uid`.
    pub fn io_recipients(&self, uid: u32) -> Vec<OveruseListener> {
        self.entries
            .iter()
            .filter(|entry| entry.flags & FLAG_RESOURCE_OVERUSE_IO != 0)
            .filter(|entry| match entry.scope {
                ListenerScope::Caller(owner) => owner == uid,
                ListenerScope::System => true,
            })
            .map(|entry| entry.listener.clone())
            .collect()
    }
}
