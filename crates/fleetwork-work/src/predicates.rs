//! Watch event predicates
//!
//! Each controller only wants a subset of watch traffic: the apply and
//! lifecycle controllers react to spec changes and deletion marks, the
//! status controller reacts to status writes. A predicate decides per event;
//! [`EventFilter`] remembers the last object it admitted so updates can be
//! compared against what came before. Objects missing from a re-list were
//! deleted while the watch was down and are forgotten when the re-list ends.

use std::collections::{HashMap, HashSet};

use futures::{future, Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};

/// Admission rules for watch events
pub trait EventPredicate<K>: Send + Sync {
    /// Whether a first sighting of `obj` should trigger a reconcile
    fn create(&self, _obj: &K) -> bool {
        true
    }

    /// Whether a change from `old` to `new` should trigger a reconcile
    fn update(&self, _old: &K, _new: &K) -> bool {
        true
    }
}

/// Spec edits (generation bumps) and deletion or finalizer changes
#[derive(Clone, Copy, Debug, Default)]
pub struct GenerationChanged;

impl<K: Resource> EventPredicate<K> for GenerationChanged {
    fn update(&self, old: &K, new: &K) -> bool {
        let (old, new) = (old.meta(), new.meta());
        old.generation != new.generation
            || old.deletion_timestamp != new.deletion_timestamp
            || old.finalizers != new.finalizers
    }
}

/// Any write after the first sighting; creations are ignored
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOnly;

impl<K: Resource> EventPredicate<K> for UpdateOnly {
    fn create(&self, _obj: &K) -> bool {
        false
    }

    fn update(&self, old: &K, new: &K) -> bool {
        old.meta().resource_version != new.meta().resource_version
    }
}

/// Stateful filter applying a predicate to a stream of objects
pub struct EventFilter<K, P>
where
    K: Resource,
    K::DynamicType: Eq + std::hash::Hash,
{
    predicate: P,
    seen: HashMap<ObjectRef<K>, K>,
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K, P> EventFilter<K, P>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    P: EventPredicate<K>,
{
    /// Create a filter with no history
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            seen: HashMap::new(),
            relisted: None,
        }
    }

    /// Record `obj` and report whether it should be reconciled
    pub fn admit(&mut self, obj: &K) -> bool {
        let key = ObjectRef::from_obj(obj);
        if let Some(relisted) = self.relisted.as_mut() {
            relisted.insert(key.clone());
        }
        match self.seen.insert(key, obj.clone()) {
            None => self.predicate.create(obj),
            Some(old) => self.predicate.update(&old, obj),
        }
    }

    /// Drop history for a deleted object
    pub fn forget(&mut self, obj: &K) {
        self.seen.remove(&ObjectRef::from_obj(obj));
    }

    /// Start collecting the objects of a fresh list
    pub fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// Forget every object the finished list did not contain
    pub fn finish_relist(&mut self) {
        if let Some(relisted) = self.relisted.take() {
            self.seen.retain(|key, _| relisted.contains(key));
        }
    }

    /// Number of objects currently remembered
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no objects are remembered
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Turn watcher events into a trigger stream, dropping what the filter rejects.
///
/// Deletions never trigger: a deleted object has nothing left to reconcile
/// and its finalizer already produced an update event.
pub fn filter_events<K, P, S>(
    events: S,
    mut filter: EventFilter<K, P>,
) -> impl Stream<Item = Result<K, watcher::Error>>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    P: EventPredicate<K>,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    events.filter_map(move |event| {
        let out = match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                if filter.admit(&obj) {
                    Some(Ok(obj))
                } else {
                    tracing::trace!(object = %obj.name_any(), "event filtered");
                    None
                }
            }
            Ok(watcher::Event::Delete(obj)) => {
                filter.forget(&obj);
                None
            }
            Ok(watcher::Event::Init) => {
                filter.begin_relist();
                None
            }
            Ok(watcher::Event::InitDone) => {
                filter.finish_relist();
                None
            }
            Err(e) => Some(Err(e)),
        };
        future::ready(out)
    })
}
