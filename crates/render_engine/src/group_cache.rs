//! Off-screen group records and the size-keyed cache that recycles them.

use std::num::NonZeroUsize;

use lru::LruCache;
use render_protocol::{ColorMatrix, FramebufferHandle, IDENTITY_MATRIX, TextureHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub width: u32,
    pub height: u32,
}

impl GroupKey {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Off-screen texture + framebuffer pair sized to one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Group {
    pub texture: TextureHandle,
    pub framebuffer: FramebufferHandle,
    pub width: u32,
    pub height: u32,
    pub color_transform: ColorMatrix,
}

impl Default for Group {
    fn default() -> Self {
        Self {
            texture: TextureHandle::default(),
            framebuffer: FramebufferHandle::default(),
            width: 0,
            height: 0,
            color_transform: IDENTITY_MATRIX,
        }
    }
}

impl Group {
    pub fn is_valid(&self) -> bool {
        self.width != 0 && self.height != 0
    }

    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.width, self.height)
    }
}

/// Exact-size cache of idle groups. One entry per key; returning a group for
/// a key that is already occupied displaces the older entry.
pub(crate) struct GroupCache {
    entries: LruCache<GroupKey, Group>,
}

impl GroupCache {
    pub(crate) fn new(max_entries: Option<usize>) -> Self {
        let entries = match max_entries.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self { entries }
    }

    pub(crate) fn take(&mut self, key: GroupKey) -> Option<Group> {
        self.entries.pop(&key)
    }

    /// Inserts `group` under its own key and hands back whichever group lost
    /// its slot, either the previous holder of the key or the eviction victim.
    pub(crate) fn put(&mut self, group: Group) -> Option<Group> {
        let displaced = self.entries.push(group.key(), group)?;
        if displaced.1.framebuffer == group.framebuffer {
            return None;
        }
        Some(displaced.1)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, key: GroupKey) -> bool {
        self.entries.contains(&key)
    }

    /// Most recently returned first.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&GroupKey, &Group)> {
        self.entries.iter()
    }

    pub(crate) fn drain(&mut self) -> Vec<Group> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some((_, group)) = self.entries.pop_lru() {
            drained.push(group);
        }
        drained
    }
}
