use crate::name::Name;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(Name),
    Deleted(Name),
    Changed(Name),
}

impl FileEvent {
    pub fn name(&self) -> &Name {
        match self {
            FileEvent::Created(n) | FileEvent::Deleted(n) | FileEvent::Changed(n) => n,
        }
    }
}

/// Receives events for the exact name it was registered under.
pub trait FileListener: Send + Sync {
    fn on_event(&self, event: &FileEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<Name, Vec<(ListenerId, Arc<dyn FileListener>)>>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: Name, listener: Arc<dyn FileListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.entry(name).or_default().push((id, listener));
        id
    }

    pub fn remove(&mut self, name: &Name, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(name);
        }
        removed
    }

    /// Listeners for `name`, copied out so delivery can run unlocked.
    pub fn snapshot(&self, name: &Name) -> Vec<Arc<dyn FileListener>> {
        self.listeners
            .get(name)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.listeners.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Delivers `event` to every listener in turn. A failing listener is logged
/// and does not stop delivery to the rest.
pub fn deliver(listeners: &[Arc<dyn FileListener>], event: &FileEvent) {
    trace!("events: delivering {:?} to {} listeners", event, listeners.len());
    for listener in listeners {
        if let Err(e) = listener.on_event(event) {
            warn!("events: listener failed on {:?}: {:#}", event, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<FileEvent>>);

    impl FileListener for Recorder {
        fn on_event(&self, event: &FileEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Failing;

    impl FileListener for Failing {
        fn on_event(&self, _event: &FileEvent) -> anyhow::Result<()> {
            anyhow::bail!("listener exploded")
        }
    }

    fn name(uri: &str) -> Name {
        Name::parse(uri).unwrap()
    }

    #[test]
    fn test_keyed_by_exact_name() {
        let mut reg = ListenerRegistry::new();
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        reg.add(name("ram:///a"), rec.clone());
        assert_eq!(reg.snapshot(&name("ram:///a")).len(), 1);
        assert!(reg.snapshot(&name("ram:///a/b")).is_empty());
        assert!(reg.snapshot(&name("ram:///")).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut reg = ListenerRegistry::new();
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = reg.add(name("ram:///a"), rec);
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&name("ram:///a"), id));
        assert!(!reg.remove(&name("ram:///a"), id));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let listeners: Vec<Arc<dyn FileListener>> =
            vec![Arc::new(Failing), rec.clone(), Arc::new(Failing)];
        let event = FileEvent::Created(name("ram:///x"));
        deliver(&listeners, &event);
        assert_eq!(rec.0.lock().unwrap().as_slice(), &[event]);
    }
}
