/*
 * Copyright (C) 2021-2024 The KMS Core Developers.
 *
 * This file is part of KMS Core.
 *
 * KMS Core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * KMS Core is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with KMS Core. If not, see <https://www.gnu.org/licenses/>.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::id::IdAllocator;

/// An immutable byte sequence with a device-scoped id (e.g. a `MODE_ID` blob's mode-info
/// payload).
#[derive(Debug)]
pub struct Blob {
    id: u32,
    data: Vec<u8>,
}

impl Blob {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Device-wide registry of [`Blob`]s, keyed by id.
///
/// The id allocator is shared with [`crate::object::ObjectRegistry`] through
/// [`Device`](crate::device::Device), so blob ids and object ids are minted from one
/// counter: ids must be unique across every object kind *and* blobs.
pub struct BlobStore {
    ids: Arc<IdAllocator>,
    blobs: Mutex<HashMap<u32, Arc<Blob>>>,
}

impl BlobStore {
    pub fn new(ids: Arc<IdAllocator>) -> Self {
        Self {
            ids,
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Copies `data` into a fresh, immutable blob and returns its id.
    pub fn register(&self, data: Vec<u8>) -> Arc<Blob> {
        let id = self.ids.alloc();
        let blob = Arc::new(Blob { id, data });
        self.blobs.lock().unwrap().insert(id, blob.clone());
        blob
    }

    pub fn find(&self, id: u32) -> Option<Arc<Blob>> {
        self.blobs.lock().unwrap().get(&id).cloned()
    }

    /// Removes the blob. Returns `false` if it was already absent (a second call for the
    /// same id is idempotent-but-false, never an error).
    pub fn delete(&self, id: u32) -> bool {
        let removed = self.blobs.lock().unwrap().remove(&id).is_some();
        if removed {
            self.ids.free(id);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_roundtrips() {
        let store = BlobStore::new(Arc::new(IdAllocator::new()));
        let blob = store.register(vec![1, 2, 3, 4]);

        let found = store.find(blob.id()).expect("blob should be registered");
        assert_eq!(found.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn delete_then_lookup_returns_absent() {
        let store = BlobStore::new(Arc::new(IdAllocator::new()));
        let blob = store.register(vec![0u8; 8]);

        assert!(store.delete(blob.id()));
        assert!(store.find(blob.id()).is_none());
        assert!(!store.delete(blob.id()), "second delete must return false");
    }
}
