/*!
    Bookkeeping shared by the interop backends.
*/

use std::collections::HashMap;

use ffmpeg_types::{Error, Result};

use crate::probe;

/**
    Ties a resource's GPU objects to the first GL context it is used on.
*/
#[derive(Debug, Default)]
pub(crate) struct ContextGuard {
    owner: Option<usize>,
}

impl ContextGuard {
    /**
        Accept `current` if it is the owning context, or adopt it if there
        is no owner yet.
    */
    pub(crate) fn bind(&mut self, current: Option<usize>) -> Result<()> {
        let current = current.ok_or_else(|| Error::unsupported("no current OpenGL context"))?;
        match self.owner {
            None => {
                self.owner = Some(current);
                Ok(())
            }
            Some(owner) if owner == current => Ok(()),
            Some(owner) => Err(Error::surface(format!(
                "interop resource belongs to GL context {owner:#x}, not {current:#x}"
            ))),
        }
    }

    /**
        [`Self::bind`] the context current on this thread.
    */
    pub(crate) fn bind_current(&mut self) -> Result<()> {
        self.bind(probe::current_context())
    }

    pub(crate) fn owner(&self) -> Option<usize> {
        self.owner
    }
}

/**
    Sharing primitives kept per renderer texture.

    A registration outlives the map call that created it and is reused by
    later maps of the same texture until it no longer fits. Unmapping only
    clears the mapped flag.
*/
#[derive(Debug)]
pub(crate) struct Registry<T> {
    entries: HashMap<u32, Entry<T>>,
}

#[derive(Debug)]
struct Entry<T> {
    value: T,
    mapped: bool,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    /**
        Returns the registration of `texture`, creating it with `register`
        if there is none or if `fits` rejects the kept one. A rejected
        registration is handed to `release` first.
    */
    pub(crate) fn obtain(
        &mut self,
        texture: u32,
        fits: impl FnOnce(&T) -> bool,
        register: impl FnOnce() -> Result<T>,
        release: impl FnOnce(T),
    ) -> Result<&mut T> {
        let kept = self.entries.get(&texture).is_some_and(|entry| fits(&entry.value));
        if !kept {
            if let Some(old) = self.entries.remove(&texture) {
                release(old.value);
            }
            let value = register()?;
            self.entries.insert(
                texture,
                Entry {
                    value,
                    mapped: false,
                },
            );
        }
        match self.entries.get_mut(&texture) {
            Some(entry) => Ok(&mut entry.value),
            None => Err(Error::surface("texture registration vanished")),
        }
    }

    /**
        Record a registration made outside [`Self::obtain`], returning the
        one it replaces.
    */
    pub(crate) fn insert(&mut self, texture: u32, value: T) -> Option<T> {
        self.entries
            .insert(
                texture,
                Entry {
                    value,
                    mapped: false,
                },
            )
            .map(|old| old.value)
    }

    pub(crate) fn set_mapped(&mut self, texture: u32) {
        if let Some(entry) = self.entries.get_mut(&texture) {
            entry.mapped = true;
        }
    }

    pub(crate) fn is_mapped(&self, texture: u32) -> bool {
        self.entries.get(&texture).is_some_and(|entry| entry.mapped)
    }

    /**
        Clear the mapped flag of `texture`, returning its registration if
        it was mapped.
    */
    pub(crate) fn unmap(&mut self, texture: u32) -> Option<&mut T> {
        match self.entries.get_mut(&texture) {
            Some(entry) if entry.mapped => {
                entry.mapped = false;
                Some(&mut entry.value)
            }
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, texture: u32) -> Option<T> {
        self.entries.remove(&texture).map(|entry| entry.value)
    }

    pub(crate) fn get(&self, texture: u32) -> Option<&T> {
        self.entries.get(&texture).map(|entry| &entry.value)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (u32, T)> + '_ {
        self.entries.drain().map(|(texture, entry)| (texture, entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_adopts_first_context() {
        let mut guard = ContextGuard::default();
        guard.bind(Some(0x10)).unwrap();
        guard.bind(Some(0x10)).unwrap();
        assert_eq!(guard.owner(), Some(0x10));
        let err = guard.bind(Some(0x20)).unwrap_err();
        assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Frame);
    }

    #[test]
    fn guard_needs_a_context() {
        let mut guard = ContextGuard::default();
        assert!(guard.bind(None).is_err());
        assert_eq!(guard.owner(), None);
    }

    /// Registers and releases per texture, tagged with the size they were made for.
    #[derive(Default)]
    struct Counter {
        registered: usize,
        released: usize,
    }

    impl Counter {
        fn map(&mut self, registry: &mut Registry<(u32, u32)>, texture: u32, size: (u32, u32)) {
            let registered = &mut self.registered;
            let released = &mut self.released;
            registry
                .obtain(
                    texture,
                    |kept| *kept == size,
                    || {
                        *registered += 1;
                        Ok(size)
                    },
                    |_| *released += 1,
                )
                .unwrap();
            registry.set_mapped(texture);
        }
    }

    #[test]
    fn registrations_survive_unmap() {
        let mut registry = Registry::default();
        let mut counter = Counter::default();
        for _ in 0..10 {
            for texture in [1, 2] {
                counter.map(&mut registry, texture, (1920, 1080));
                assert!(registry.is_mapped(texture));
                assert_eq!(registry.unmap(texture), Some(&mut (1920, 1080)));
                assert!(registry.unmap(texture).is_none());
            }
        }
        assert_eq!(counter.registered, 2);
        assert_eq!(counter.released, 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn size_change_replaces_the_registration() {
        let mut registry = Registry::default();
        let mut counter = Counter::default();
        counter.map(&mut registry, 1, (1920, 1080));
        registry.unmap(1);
        counter.map(&mut registry, 1, (1280, 720));
        registry.unmap(1);
        counter.map(&mut registry, 1, (1280, 720));
        assert_eq!(counter.registered, 2);
        assert_eq!(counter.released, 1);
        assert_eq!(registry.get(1), Some(&(1280, 720)));
    }

    #[test]
    fn failed_registration_keeps_nothing() {
        let mut registry: Registry<u32> = Registry::default();
        let err = registry
            .obtain(4, |_| true, || Err(Error::surface("refused")), |_| {})
            .unwrap_err();
        assert_eq!(err.category(), ffmpeg_types::ErrorCategory::Frame);
        assert!(registry.is_empty());
        assert!(registry.unmap(4).is_none());
        assert_eq!(registry.remove(4), None);
        assert_eq!(registry.insert(4, 7), None);
        assert_eq!(registry.insert(4, 8), Some(7));
        assert_eq!(registry.drain().collect::<Vec<_>>(), vec![(4, 8)]);
    }
}
