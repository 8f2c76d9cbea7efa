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

//! GPU buffer objects and the device-wide, credential-keyed export map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use kms_uapi::Credentials;

/// Opaque backing memory a [`BufferObject`] is carved out of. The allocator behind this
/// is out of scope for this crate; it is treated purely as `(handle, offset)`.
pub trait MemoryProvider: Send + Sync {
    /// Opaque allocator-assigned handle for the backing memory region.
    fn handle(&self) -> u64;
    /// Byte offset of this buffer object within the region named by `handle`.
    fn offset(&self) -> u64;
}

/// A GPU-visible memory region. Invariant: `size < 2^32`.
pub struct BufferObject {
    size: u64,
    provider: Arc<dyn MemoryProvider>,
    /// Upper 32 bits: the aggregator memory slot this BO was installed at. Lower 32 bits
    /// are reserved and always zero. Assigned exactly once, by `Device::install_mapping`.
    mapping: OnceLock<u64>,
}

impl BufferObject {
    pub fn new(size: u64, provider: Arc<dyn MemoryProvider>) -> Arc<Self> {
        assert!(size < (1u64 << 32), "kms-core: buffer object size must fit in 32 bits");
        Arc::new(Self { size, provider, mapping: OnceLock::new() })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn provider(&self) -> &Arc<dyn MemoryProvider> {
        &self.provider
    }

    pub fn mapping(&self) -> Option<u64> {
        self.mapping.get().copied()
    }

    /// Installs the mapping token. Called once by `Device::install_mapping`.
    pub(crate) fn setup_mapping(&self, mapping: u64) {
        self.mapping
            .set(mapping)
            .unwrap_or_else(|_| panic!("kms-core: buffer object mapping installed twice"));
    }
}

/// Device-wide, credential-keyed export map: `export`/`import` mutate it; tokens are
/// treated as opaque 16-byte keys.
pub struct BoRegistry {
    by_creds: Mutex<HashMap<Credentials, Arc<BufferObject>>>,
}

impl BoRegistry {
    pub fn new() -> Self {
        Self { by_creds: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, bo: Arc<BufferObject>, creds: Credentials) {
        self.by_creds.lock().unwrap().insert(creds, bo);
    }

    pub fn find(&self, creds: Credentials) -> Option<Arc<BufferObject>> {
        self.by_creds.lock().unwrap().get(&creds).cloned()
    }
}

impl Default for BoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) struct TestMemoryProvider {
    pub handle: u64,
    pub offset: u64,
}

#[cfg(test)]
impl MemoryProvider for TestMemoryProvider {
    fn handle(&self) -> u64 {
        self.handle
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_then_find_roundtrips() {
        let registry = BoRegistry::new();
        let bo = BufferObject::new(4096, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        let creds: Credentials = [7u8; 16];

        registry.register(bo.clone(), creds);
        let found = registry.find(creds).expect("bo should be registered under creds");
        assert_eq!(Arc::as_ptr(&found), Arc::as_ptr(&bo));
    }

    #[test]
    fn mapping_is_installed_once() {
        let bo = BufferObject::new(4096, Arc::new(TestMemoryProvider { handle: 1, offset: 0 }));
        assert!(bo.mapping().is_none());
        bo.setup_mapping(3 << 32);
        assert_eq!(bo.mapping(), Some(3 << 32));
    }
}
