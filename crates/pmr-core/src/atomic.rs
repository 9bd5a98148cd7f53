// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lock-free scalar cells shared between control and streaming threads.

use std::sync::atomic::{AtomicU32, Ordering};

/// An `f32` stored as its bit pattern in an [`AtomicU32`].
///
/// Loads and stores are single atomic operations, so a reader always sees a
/// whole value written by some writer and never waits on it.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_sees_latest_store() {
        let cell = AtomicF32::new(0.25);
        assert_eq!(cell.load(), 0.25);
        cell.store(-48.0);
        assert_eq!(cell.load(), -48.0);
        cell.store(f32::NEG_INFINITY);
        assert_eq!(cell.load(), f32::NEG_INFINITY);
    }
}
