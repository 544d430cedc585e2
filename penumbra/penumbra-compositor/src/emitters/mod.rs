//! Emitter registry: the set of currently enabled light emitters.
//!
//! Emitters are handed a registry handle when they are created and register
//! themselves when activated; the compositor reads one culled snapshot per frame.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use render_api::{EmitterId, LightEmitter, Rect};

/// Cloneable handle to a shared emitter set.
#[derive(Clone, Default)]
pub struct EmitterRegistry {
    inner: Arc<RwLock<BTreeMap<EmitterId, LightEmitter>>>,
}

impl std::fmt::Debug for EmitterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitterRegistry").field("len", &self.len()).finish()
    }
}

impl EmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<EmitterId, LightEmitter>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<EmitterId, LightEmitter>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Add or replace an emitter.
    pub fn register(&self, emitter: LightEmitter) {
        log::trace!("emitter {:?} registered", emitter.id);
        self.write().insert(emitter.id, emitter);
    }

    pub fn unregister(&self, id: EmitterId) -> Option<LightEmitter> {
        log::trace!("emitter {:?} unregistered", id);
        self.write().remove(&id)
    }

    /// Edit a registered emitter in place. Returns false if it is not registered.
    pub fn update(&self, id: EmitterId, f: impl FnOnce(&mut LightEmitter)) -> bool {
        match self.write().get_mut(&id) {
            Some(emitter) => {
                f(emitter);
                true
            }
            None => false,
        }
    }

    /// Register `emitter` for as long as the returned guard lives.
    pub fn activate(&self, emitter: LightEmitter) -> ActiveEmitter {
        let id = emitter.id;
        self.register(emitter);
        ActiveEmitter { registry: self.clone(), id }
    }

    pub fn contains(&self, id: EmitterId) -> bool {
        self.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emitters whose bounds intersect `frustum`, ordered by id.
    pub fn snapshot(&self, frustum: &Rect) -> Vec<LightEmitter> {
        self.read().values().filter(|e| e.bounds.intersects(frustum)).copied().collect()
    }
}

/// Activation guard; the emitter is unregistered when it is dropped.
pub struct ActiveEmitter {
    registry: EmitterRegistry,
    id: EmitterId,
}

impl ActiveEmitter {
    pub fn id(&self) -> EmitterId {
        self.id
    }

    pub fn update(&self, f: impl FnOnce(&mut LightEmitter)) -> bool {
        self.registry.update(self.id, f)
    }

    pub fn deactivate(self) {}
}

impl Drop for ActiveEmitter {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u64, x: f32, radius: f32) -> LightEmitter {
        LightEmitter::point(EmitterId(id), [x, 0.0, 0.0], [1.0; 4], radius)
    }

    #[test]
    fn snapshot_culls_against_frustum_in_id_order() {
        let registry = EmitterRegistry::new();
        registry.register(point(3, 0.0, 1.0));
        registry.register(point(1, 2.0, 1.0));
        registry.register(point(2, 50.0, 1.0));
        let frustum = Rect::from_center([0.0, 0.0], [5.0, 5.0]);
        let ids: Vec<EmitterId> = registry.snapshot(&frustum).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![EmitterId(1), EmitterId(3)]);
    }

    #[test]
    fn activation_guard_unregisters_on_drop() {
        let registry = EmitterRegistry::new();
        let active = registry.activate(point(7, 0.0, 1.0));
        assert!(registry.contains(EmitterId(7)));
        assert!(active.update(|e| e.translate_to([4.0, 0.0, 0.0])));
        let snap = registry.snapshot(&Rect::from_center([4.0, 0.0], [0.1, 0.1]));
        assert_eq!(snap.len(), 1);
        active.deactivate();
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_the_same_set() {
        let registry = EmitterRegistry::new();
        let injected = registry.clone();
        injected.register(point(1, 0.0, 1.0));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(EmitterId(1)).is_some());
        assert!(!injected.update(EmitterId(1), |_| {}));
    }
}
