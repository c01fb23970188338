//! Buffer state.
//!
//! Buffers are created with undetermined usage; the first `buffer_data`
//! through a target locks the usage (array target → vertex, element target
//! → index) for the lifetime of the buffer. Uploads land in the staging
//! pool and are mirrored to the backend immediately; the draw queue only
//! ever references the backend id.

use crate::backend::{BackendId, BufferDesc, BufferUsage, GraphicsBackend};
use crate::error::{Error, Result};
use crate::handle::{BufferHandle, BufferTag, HandleTable, MAX_BUFFERS};
use crate::pool::StagingPool;

/// Upper bound for a single buffer body; matches the staging pool size.
pub const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferTarget {
    Array,
    ElementArray,
}

impl BufferTarget {
    fn usage(self) -> BufferUsage {
        match self {
            BufferTarget::Array => BufferUsage::Vertex,
            BufferTarget::ElementArray => BufferUsage::Index,
        }
    }
}

#[derive(Debug)]
pub struct BufferEntry {
    pub usage: Option<BufferUsage>,
    pub byte_length: usize,
    pub update_seq: u64,
    pub backend_id: BackendId,
    pub staging: Option<crate::pool::Region>,
}

pub struct BufferStore {
    table: HandleTable<BufferEntry, BufferTag>,
    bound_array: Option<BufferHandle>,
    bound_element: Option<BufferHandle>,
}

impl BufferStore {
    pub fn new() -> BufferStore {
        BufferStore {
            table: HandleTable::new(MAX_BUFFERS),
            bound_array: None,
            bound_element: None,
        }
    }

    pub fn create(&mut self) -> Result<BufferHandle> {
        self.table.alloc(BufferEntry {
            usage: None,
            byte_length: 0,
            update_seq: 0,
            backend_id: 0,
            staging: None,
        })
    }

    pub fn bind(&mut self, target: BufferTarget, handle: Option<BufferHandle>) -> Result<()> {
        if let Some(h) = handle {
            self.table.get(h)?;
        }
        match target {
            BufferTarget::Array => self.bound_array = handle,
            BufferTarget::ElementArray => self.bound_element = handle,
        }
        Ok(())
    }

    pub fn bound(&self, target: BufferTarget) -> Option<BufferHandle> {
        match target {
            BufferTarget::Array => self.bound_array,
            BufferTarget::ElementArray => self.bound_element,
        }
    }

    pub fn buffer_data(
        &mut self,
        target: BufferTarget,
        bytes: &[u8],
        pool: &mut StagingPool,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let handle = self.bound(target).ok_or(Error::NoBufferBound)?;
        if bytes.len() > MAX_BUFFER_BYTES {
            return Err(Error::TooLarge("buffer data"));
        }
        let entry = self.table.get_mut(handle)?;

        let usage = target.usage();
        match entry.usage {
            None => entry.usage = Some(usage),
            Some(u) if u == usage => {}
            Some(_) => return Err(Error::WrongTarget),
        }

        // restage
        if let Some(region) = entry.staging.take() {
            pool.free(region);
        }
        let region = pool.alloc(bytes.len())?;
        pool.write(&region, bytes);
        entry.staging = Some(region);

        // mirror to the backend, recreating on size change
        if entry.backend_id != 0 && entry.byte_length != bytes.len() {
            backend.destroy_buffer(entry.backend_id);
            entry.backend_id = 0;
        }
        if entry.backend_id == 0 {
            entry.backend_id = backend.make_buffer(&BufferDesc {
                size: bytes.len(),
                usage,
            })?;
        }
        backend.update_buffer(entry.backend_id, bytes)?;

        entry.byte_length = bytes.len();
        entry.update_seq += 1;
        debug!(
            "buffer {:?} upload: {} bytes, seq {}",
            handle, entry.byte_length, entry.update_seq
        );
        Ok(())
    }

    /// Deletes the buffer: unbinds it from both targets, destroys the
    /// backend mirror and releases staging.
    pub fn delete(
        &mut self,
        handle: BufferHandle,
        pool: &mut StagingPool,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let entry = self.table.free(handle)?;
        if self.bound_array == Some(handle) {
            self.bound_array = None;
        }
        if self.bound_element == Some(handle) {
            self.bound_element = None;
        }
        if entry.backend_id != 0 {
            backend.destroy_buffer(entry.backend_id);
        }
        if let Some(region) = entry.staging {
            pool.free(region);
        }
        Ok(())
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&BufferEntry> {
        self.table.get(handle)
    }

    pub fn is_valid(&self, handle: BufferHandle) -> bool {
        self.table.is_valid(handle)
    }

    pub fn clear(&mut self, pool: &mut StagingPool, backend: &mut dyn GraphicsBackend) {
        self.bound_array = None;
        self.bound_element = None;
        self.table.clear(|entry| {
            if entry.backend_id != 0 {
                backend.destroy_buffer(entry.backend_id);
            }
            if let Some(region) = entry.staging {
                pool.free(region);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::pool::{BUFFER_POOL_BLOCK, StagingPool};

    fn fixture() -> (BufferStore, StagingPool, RecordingBackend) {
        (
            BufferStore::new(),
            StagingPool::new(BUFFER_POOL_BLOCK, 64),
            RecordingBackend::new(),
        )
    }

    #[test]
    fn usage_locks_on_first_upload() {
        let (mut store, mut pool, mut backend) = fixture();
        let b = store.create().unwrap();
        store.bind(BufferTarget::Array, Some(b)).unwrap();
        store
            .buffer_data(BufferTarget::Array, &[0; 16], &mut pool, &mut backend)
            .unwrap();

        store.bind(BufferTarget::ElementArray, Some(b)).unwrap();
        assert_eq!(
            store
                .buffer_data(BufferTarget::ElementArray, &[0; 16], &mut pool, &mut backend)
                .unwrap_err(),
            Error::WrongTarget
        );

        // re-upload through the original target keeps working
        for expected_seq in 2..5u64 {
            store
                .buffer_data(BufferTarget::Array, &[1; 16], &mut pool, &mut backend)
                .unwrap();
            assert_eq!(store.get(b).unwrap().update_seq, expected_seq);
        }
    }

    #[test]
    fn upload_requires_binding() {
        let (mut store, mut pool, mut backend) = fixture();
        assert_eq!(
            store
                .buffer_data(BufferTarget::Array, &[0; 4], &mut pool, &mut backend)
                .unwrap_err(),
            Error::NoBufferBound
        );
    }

    #[test]
    fn delete_unbinds_and_releases() {
        let (mut store, mut pool, mut backend) = fixture();
        let b = store.create().unwrap();
        store.bind(BufferTarget::Array, Some(b)).unwrap();
        store
            .buffer_data(BufferTarget::Array, &[7; 32], &mut pool, &mut backend)
            .unwrap();
        assert!(pool.blocks_in_use() > 0);

        store.delete(b, &mut pool, &mut backend).unwrap();
        assert_eq!(store.bound(BufferTarget::Array), None);
        assert_eq!(pool.blocks_in_use(), 0);
        assert_eq!(store.get(b).unwrap_err(), Error::InvalidHandle);
        assert!(backend
            .calls
            .iter()
            .any(|c| matches!(c, crate::backend::RecordedCall::DestroyBuffer(_))));
    }

    #[test]
    fn size_change_recreates_backend_mirror() {
        let (mut store, mut pool, mut backend) = fixture();
        let b = store.create().unwrap();
        store.bind(BufferTarget::Array, Some(b)).unwrap();
        store
            .buffer_data(BufferTarget::Array, &[0; 16], &mut pool, &mut backend)
            .unwrap();
        let first_id = store.get(b).unwrap().backend_id;
        store
            .buffer_data(BufferTarget::Array, &[0; 64], &mut pool, &mut backend)
            .unwrap();
        assert_ne!(store.get(b).unwrap().backend_id, first_id);
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let (mut store, mut pool, mut backend) = fixture();
        let b = store.create().unwrap();
        store.bind(BufferTarget::Array, Some(b)).unwrap();
        let huge = vec![0u8; MAX_BUFFER_BYTES + 1];
        assert_eq!(
            store
                .buffer_data(BufferTarget::Array, &huge, &mut pool, &mut backend)
                .unwrap_err(),
            Error::TooLarge("buffer data")
        );
    }
}
