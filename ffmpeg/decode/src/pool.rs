/*!
    Fixed-size ring of decode surfaces.
*/

use ffmpeg_types::Result;

/**
    A surface the pool can hand out.
*/
pub trait PoolSurface {
    /**
        Returns true if nothing but the pool references this surface.
    */
    fn is_free(&self) -> bool;
}

/**
    Decode surfaces created once per stream and reused round-robin.

    All surfaces are created up front by [`SurfacePool::fill`]; the pool
    never grows afterwards. A surface is handed out again only once every
    frame that referenced it has been released.
*/
#[derive(Debug)]
pub struct SurfacePool<S> {
    surfaces: Vec<S>,
    next: usize,
}

impl<S> Default for SurfacePool<S> {
    fn default() -> Self {
        Self {
            surfaces: Vec::new(),
            next: 0,
        }
    }
}

impl<S: PoolSurface> SurfacePool<S> {
    /**
        Create `capacity` surfaces with `create`.

        If any creation fails, the surfaces created so far are dropped and
        the error is returned.
    */
    pub fn fill(capacity: usize, mut create: impl FnMut(usize) -> Result<S>) -> Result<Self> {
        let mut surfaces = Vec::with_capacity(capacity);
        for index in 0..capacity {
            surfaces.push(create(index)?);
        }
        Ok(Self { surfaces, next: 0 })
    }

    /**
        Returns the next free surface after the last one handed out.

        Returns `None` when every surface is still referenced.
    */
    pub fn acquire(&mut self) -> Option<&mut S> {
        let len = self.surfaces.len();
        let index = (0..len)
            .map(|offset| (self.next + offset) % len)
            .find(|&index| self.surfaces[index].is_free())?;
        self.next = (index + 1) % len;
        Some(&mut self.surfaces[index])
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.surfaces.iter().filter(|s| s.is_free()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.surfaces.iter()
    }

    /**
        Drop every surface. Surfaces still referenced by frames stay alive
        until those frames are released.
    */
    pub fn clear(&mut self) {
        self.surfaces.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::*;
    use ffmpeg_types::Error;

    #[derive(Debug)]
    struct Slot {
        id: usize,
        refs: Rc<Cell<usize>>,
    }

    impl PoolSurface for Slot {
        fn is_free(&self) -> bool {
            self.refs.get() == 0
        }
    }

    fn make_pool(n: usize) -> (SurfacePool<Slot>, Vec<Rc<Cell<usize>>>) {
        let refs: Vec<_> = (0..n).map(|_| Rc::new(Cell::new(0))).collect();
        let pool = SurfacePool::fill(n, |id| {
            Ok(Slot {
                id,
                refs: refs[id].clone(),
            })
        })
        .unwrap();
        (pool, refs)
    }

    #[test]
    fn round_robin() {
        let (mut pool, _) = make_pool(3);
        let ids: Vec<usize> = (0..5).map(|_| pool.acquire().unwrap().id).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn skips_referenced_surfaces() {
        let (mut pool, refs) = make_pool(3);
        refs[1].set(1);
        assert_eq!(pool.acquire().unwrap().id, 0);
        assert_eq!(pool.acquire().unwrap().id, 2);
        assert_eq!(pool.acquire().unwrap().id, 0);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn exhaustion_and_release() {
        let (mut pool, refs) = make_pool(2);
        for r in &refs {
            r.set(1);
        }
        assert!(pool.acquire().is_none());
        refs[1].set(0);
        assert_eq!(pool.acquire().unwrap().id, 1);
    }

    #[test]
    fn never_grows_past_capacity() {
        let (mut pool, refs) = make_pool(4);
        for _ in 0..100 {
            let slot = pool.acquire().unwrap();
            refs[slot.id].set(0);
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn failed_fill_creates_nothing_more() {
        let mut created = 0;
        let result: Result<SurfacePool<Slot>> = SurfacePool::fill(4, |id| {
            if id == 2 {
                return Err(Error::surface("out of video memory"));
            }
            created += 1;
            Ok(Slot {
                id,
                refs: Rc::new(Cell::new(0)),
            })
        });
        assert!(result.is_err());
        assert_eq!(created, 2);
    }

    #[test]
    fn empty_pool() {
        let mut pool: SurfacePool<Slot> = SurfacePool::default();
        assert!(pool.is_empty());
        assert!(pool.acquire().is_none());
        let (mut pool, _) = make_pool(2);
        pool.clear();
        assert!(pool.is_empty());
    }
}
