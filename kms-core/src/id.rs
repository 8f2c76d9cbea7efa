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

use std::sync::Mutex;

/// Monotonic 32-bit handle issuer with recycling.
///
/// `0` is never handed out so it can be reserved by callers as a "null object" sentinel
/// (used throughout the property system for an unset `FB_ID`/`CRTC_ID`).
pub struct IdAllocator {
    inner: Mutex<Inner>,
}

struct Inner {
    next: u32,
    freed: Vec<u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next: 1, freed: Vec::new() }),
        }
    }

    /// Allocates a fresh ID, preferring a recycled one if available.
    pub fn alloc(&self) -> u32 {
        let mut inner = self.inner.lock().unwrap();

        if let Some(id) = inner.freed.pop() {
            return id;
        }

        let id = inner.next;
        inner.next = inner
            .next
            .checked_add(1)
            .expect("kms-core: id allocator exhausted the 32-bit id space");
        id
    }

    /// Returns `id` to the free list for future recycling.
    ///
    /// Callers must ensure `id` is no longer reachable from any live reference before
    /// recycling it; the allocator itself performs no liveness tracking.
    pub fn free(&self, id: u32) {
        debug_assert_ne!(id, 0, "kms-core: attempted to free the reserved null id");
        self.inner.lock().unwrap().freed.push(id);
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_until_freed() {
        let alloc = IdAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        assert_ne!(a, b);

        alloc.free(a);
        let c = alloc.alloc();
        assert_eq!(a, c, "freed ids should be recycled before minting new ones");
    }

    #[test]
    fn never_hands_out_the_null_id() {
        let alloc = IdAllocator::new();
        assert_ne!(alloc.alloc(), 0);
    }
}
