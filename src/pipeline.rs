//! Pipeline cache.
//!
//! Backend pipelines are content-addressed by a 64-bit FNV-1a fingerprint
//! of the shader, primitive, index type and vertex layout. The cache is a
//! fixed-size direct-mapped table: a colliding insert evicts the previous
//! occupant and destroys it on the backend.

use crate::backend::{BackendId, GraphicsBackend, IndexType, PipelineDesc, PrimitiveMode};
use crate::error::Result;

pub const PIPELINE_CACHE_ENTRIES: usize = 64;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over a stream of words.
#[derive(Copy, Clone)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn new() -> Fingerprint {
        Fingerprint(FNV_OFFSET)
    }

    pub fn write_u32(&mut self, v: u32) {
        for b in v.to_le_bytes().iter() {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

pub fn pipeline_fingerprint(desc: &PipelineDesc<'_>) -> u64 {
    let mut f = Fingerprint::new();
    f.write_u32(desc.shader);
    f.write_u32(match desc.primitive {
        PrimitiveMode::Points => 1,
        PrimitiveMode::Lines => 2,
        PrimitiveMode::LineLoop => 3,
        PrimitiveMode::LineStrip => 4,
        PrimitiveMode::Triangles => 5,
        PrimitiveMode::TriangleStrip => 6,
        PrimitiveMode::TriangleFan => 7,
    });
    f.write_u32(match desc.index_type {
        None => 0,
        Some(IndexType::U16) => 2,
        Some(IndexType::U32) => 4,
    });
    for attr in &desc.layout.attrs {
        f.write_u32(attr.location);
        f.write_u32(attr.format as u32 + 1);
        f.write_u32(attr.buffer_slot);
        f.write_u32(attr.offset);
    }
    f.write_u32(0xffff_ffff);
    for stride in &desc.layout.strides {
        f.write_u32(*stride);
    }
    f.finish()
}

#[derive(Copy, Clone, Default)]
struct CacheEntry {
    fingerprint: u64,
    pipeline: BackendId,
    present: bool,
}

pub struct PipelineCache {
    entries: [CacheEntry; PIPELINE_CACHE_ENTRIES],
    hits: u64,
    misses: u64,
}

impl PipelineCache {
    pub fn new() -> PipelineCache {
        PipelineCache {
            entries: [CacheEntry::default(); PIPELINE_CACHE_ENTRIES],
            hits: 0,
            misses: 0,
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Looks up the pipeline for `desc`, creating (and caching) it on miss.
    /// A fingerprint collision in the direct-mapped slot evicts the old
    /// pipeline and destroys it through the backend.
    pub fn lookup_or_create(
        &mut self,
        desc: &PipelineDesc<'_>,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<BackendId> {
        let fingerprint = pipeline_fingerprint(desc);
        let slot = (fingerprint % PIPELINE_CACHE_ENTRIES as u64) as usize;
        let entry = &mut self.entries[slot];
        if entry.present && entry.fingerprint == fingerprint {
            self.hits += 1;
            return Ok(entry.pipeline);
        }

        let pipeline = backend.make_pipeline(desc)?;
        if entry.present {
            debug!(
                "pipeline cache evicting slot {} ({:#018x})",
                slot, entry.fingerprint
            );
            backend.destroy_pipeline(entry.pipeline);
        }
        *entry = CacheEntry {
            fingerprint,
            pipeline,
            present: true,
        };
        self.misses += 1;
        Ok(pipeline)
    }

    /// Destroys every cached pipeline; used at teardown and scene resets.
    pub fn clear(&mut self, backend: &mut dyn GraphicsBackend) {
        for entry in self.entries.iter_mut() {
            if entry.present {
                backend.destroy_pipeline(entry.pipeline);
                entry.present = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingBackend, VertexAttrDesc, VertexFormat, VertexLayoutDesc};

    fn layout(offset: u32) -> VertexLayoutDesc {
        VertexLayoutDesc {
            attrs: vec![VertexAttrDesc {
                location: 0,
                format: VertexFormat::Float3,
                buffer_slot: 0,
                offset,
            }],
            strides: vec![12],
        }
    }

    #[test]
    fn identical_descriptors_hit() {
        let mut cache = PipelineCache::new();
        let mut backend = RecordingBackend::new();
        let l = layout(0);
        let desc = PipelineDesc {
            shader: 1,
            primitive: PrimitiveMode::Triangles,
            index_type: Some(IndexType::U16),
            layout: &l,
        };
        let a = cache.lookup_or_create(&desc, &mut backend).unwrap();
        let b = cache.lookup_or_create(&desc, &mut backend).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.pipelines_created(), 1);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn layout_change_misses() {
        let mut cache = PipelineCache::new();
        let mut backend = RecordingBackend::new();
        let l0 = layout(0);
        let l1 = layout(4);
        let mk = |l| PipelineDesc {
            shader: 1,
            primitive: PrimitiveMode::Triangles,
            index_type: None,
            layout: l,
        };
        cache.lookup_or_create(&mk(&l0), &mut backend).unwrap();
        cache.lookup_or_create(&mk(&l1), &mut backend).unwrap();
        assert_eq!(backend.pipelines_created(), 2);
    }

    #[test]
    fn clear_destroys_cached_pipelines() {
        let mut cache = PipelineCache::new();
        let mut backend = RecordingBackend::new();
        let l = layout(0);
        let desc = PipelineDesc {
            shader: 3,
            primitive: PrimitiveMode::Lines,
            index_type: None,
            layout: &l,
        };
        let id = cache.lookup_or_create(&desc, &mut backend).unwrap();
        cache.clear(&mut backend);
        assert!(backend
            .calls
            .iter()
            .any(|c| *c == crate::backend::RecordedCall::DestroyPipeline(id)));
    }
}
