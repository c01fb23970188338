//! Native runtime core for WebGL-style guest rendering.
//!
//! A guest script (an unmodified Three.js build, typically) issues WebGL 1
//! calls through the script bridge; this crate validates them, stages the
//! data CPU-side, translates shaders to desktop GLSL, and drives an
//! abstract GPU backend with pipelines resolved from a content-addressed
//! cache. One [`Runtime`] value owns every table, pool and cache; the
//! executable entry point wires it to a concrete backend, a script engine
//! and a window pump.

#[macro_use]
extern crate log;

pub mod backend;
pub mod bridge;
pub mod buffer;
pub mod command;
pub mod error;
pub mod events;
pub mod glsl;
pub mod handle;
pub mod pipeline;
pub mod pool;
pub mod program;
pub mod shader;
pub mod texture;
pub mod webgl;

use std::time::Instant;

use crate::backend::GraphicsBackend;
use crate::bridge::{Ret, ScriptEngine};
use crate::buffer::{BufferStore, BufferTarget};
use crate::command::{CommandQueue, DrawCommand, DrawKind, DrawState};
use crate::error::Result;
use crate::events::{CallbackSlots, EventState, SourceEvent};
use crate::handle::{ContextHandle, ContextTag, HandleTable, MAX_CONTEXTS};
use crate::pipeline::PipelineCache;
use crate::pool::{
    StagingPool, BUFFER_POOL_BLOCK, BUFFER_POOL_BLOCKS, TEXTURE_POOL_BLOCK, TEXTURE_POOL_BLOCKS,
};
use crate::program::ProgramStore;
use crate::shader::ShaderStore;
use crate::texture::TextureStore;

/// Startup configuration. Values come from the process config file via
/// [`RuntimeConfig::from_config`]; absent keys fall back to the defaults.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub high_dpi: bool,
    /// Target frame rate; 0 means vsync.
    pub frame_rate: u32,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            width: 800,
            height: 600,
            title: String::new(),
            high_dpi: false,
            frame_rate: 0,
        }
    }
}

impl RuntimeConfig {
    pub fn from_config(cfg: &config::Config) -> RuntimeConfig {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            width: cfg.get::<u32>("window.width").unwrap_or(defaults.width),
            height: cfg.get::<u32>("window.height").unwrap_or(defaults.height),
            title: cfg.get::<String>("window.title").unwrap_or(defaults.title),
            high_dpi: cfg
                .get::<bool>("window.high_dpi")
                .unwrap_or(defaults.high_dpi),
            frame_rate: cfg
                .get::<u32>("window.frame_rate")
                .unwrap_or(defaults.frame_rate),
        }
    }
}

/// A guest-visible rendering context (one per canvas `getContext` call).
#[derive(Copy, Clone, Debug)]
pub struct ContextEntry {
    pub width: u32,
    pub height: u32,
}

/// The runtime instance. All entry points run on the thread that owns the
/// backend; there are no suspension points inside any exported operation.
pub struct Runtime<B: GraphicsBackend> {
    pub config: RuntimeConfig,
    start: Instant,
    pub backend: B,

    contexts: HandleTable<ContextEntry, ContextTag>,
    current_context: Option<ContextHandle>,

    pub buffers: BufferStore,
    pub shaders: ShaderStore,
    pub programs: ProgramStore,
    pub textures: TextureStore,

    pub(crate) buffer_pool: StagingPool,
    pub(crate) texture_pool: StagingPool,

    pub draw: DrawState,
    pub(crate) queue: CommandQueue,
    pub(crate) pipelines: PipelineCache,

    events: EventState,
    pub(crate) callbacks: CallbackSlots,
    frame: u64,
}

impl<B: GraphicsBackend> Runtime<B> {
    pub fn new(config: RuntimeConfig, backend: B) -> Runtime<B> {
        debug!(
            "runtime init: {}x{} (high_dpi: {}, frame_rate: {})",
            config.width, config.height, config.high_dpi, config.frame_rate
        );
        Runtime {
            config,
            start: Instant::now(),
            backend,
            contexts: HandleTable::new(MAX_CONTEXTS),
            current_context: None,
            buffers: BufferStore::new(),
            shaders: ShaderStore::new(),
            programs: ProgramStore::new(),
            textures: TextureStore::new(),
            buffer_pool: StagingPool::new(BUFFER_POOL_BLOCK, BUFFER_POOL_BLOCKS),
            texture_pool: StagingPool::new(TEXTURE_POOL_BLOCK, TEXTURE_POOL_BLOCKS),
            draw: DrawState::default(),
            queue: CommandQueue::new(),
            pipelines: PipelineCache::new(),
            events: EventState::new(),
            callbacks: CallbackSlots::new(),
            frame: 0,
        }
    }

    /// Milliseconds since runtime start (`performance.now()`).
    pub fn now_ms(&self) -> f64 {
        let elapsed = self.start.elapsed();
        elapsed.as_secs() as f64 * 1e3 + f64::from(elapsed.subsec_nanos()) / 1e6
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// `canvas.getContext("webgl")`: allocates the context on first use and
    /// hands the same one back afterwards (single-context model).
    pub fn get_context(&mut self) -> Result<ContextHandle> {
        if let Some(h) = self.current_context {
            return Ok(h);
        }
        let h = self.contexts.alloc(ContextEntry {
            width: self.config.width,
            height: self.config.height,
        })?;
        self.current_context = Some(h);
        Ok(h)
    }

    pub fn context(&self, handle: ContextHandle) -> Result<&ContextEntry> {
        self.contexts.get(handle)
    }

    /// Normalizes one platform event and delivers the resulting guest
    /// events through the engine.
    pub fn pump_event(&mut self, event: SourceEvent, engine: &mut dyn ScriptEngine) {
        if let SourceEvent::Resize { width, height } = event {
            if let Some(h) = self.current_context {
                if let Ok(ctx) = self.contexts.get_mut(h) {
                    ctx.width = width;
                    ctx.height = height;
                }
            }
        }
        self.events
            .process(event, |kind, payload| engine.dispatch_event(kind, payload));
    }

    /// Runs one animation tick: due timers fire first, then every pending
    /// animation-frame callback fires once with the frame timestamp.
    pub fn tick(&mut self, engine: &mut dyn ScriptEngine) {
        let now = self.now_ms();
        for cb in self.callbacks.take_due_timers(now) {
            engine.call(cb, &[]);
            engine.release(cb);
        }
        for cb in self.callbacks.take_frames() {
            engine.call(cb, &[Ret::Number(now)]);
            engine.release(cb);
        }
    }

    /// End-of-frame flush: texture uploads, then the queued draws.
    pub fn flush(&mut self) {
        command::flush(
            &mut self.queue,
            &self.buffers,
            &mut self.programs,
            &mut self.textures,
            &mut self.pipelines,
            &self.texture_pool,
            &mut self.backend,
        );
        self.frame += 1;
    }

    /// One frame: poll events → guest tick → flush.
    pub fn run_frame(&mut self, events: &[SourceEvent], engine: &mut dyn ScriptEngine) {
        for event in events {
            self.pump_event(*event, engine);
        }
        self.tick(engine);
        self.flush();
    }

    pub(crate) fn record_draw_arrays(&mut self, mode: u32, first: u32, count: u32) -> Result<()> {
        self.draw.program.ok_or(crate::error::Error::NoProgramBound)?;
        let command = DrawCommand {
            state: self.draw,
            element_buffer: self.buffers.bound(BufferTarget::ElementArray),
            units: self.textures.units,
            kind: DrawKind::Arrays,
            mode,
            first,
            count,
            index_type: 0,
            index_offset: 0,
        };
        self.queue.push(command);
        Ok(())
    }

    pub(crate) fn record_draw_elements(
        &mut self,
        mode: u32,
        count: u32,
        index_type: u32,
        index_offset: u32,
    ) -> Result<()> {
        self.draw.program.ok_or(crate::error::Error::NoProgramBound)?;
        let command = DrawCommand {
            state: self.draw,
            element_buffer: self.buffers.bound(BufferTarget::ElementArray),
            units: self.textures.units,
            kind: DrawKind::Elements,
            mode,
            first: 0,
            count,
            index_type,
            index_offset,
        };
        self.queue.push(command);
        Ok(())
    }

    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    /// Tears every table, pool and cache back to the initialized state;
    /// used between test scenarios and at shutdown.
    pub fn reset(&mut self, engine: &mut dyn ScriptEngine) {
        self.queue.clear();
        for cb in self.callbacks.clear() {
            engine.release(cb);
        }
        self.pipelines.clear(&mut self.backend);
        self.programs.clear(&mut self.backend);
        self.shaders.clear();
        self.buffers.clear(&mut self.buffer_pool, &mut self.backend);
        self.textures
            .clear(&mut self.texture_pool, &mut self.backend);
        self.contexts.clear(drop);
        self.current_context = None;
        self.draw = DrawState::default();
        self.events = EventState::new();
        debug!(
            "runtime reset (staging in use: {} + {} blocks)",
            self.buffer_pool.blocks_in_use(),
            self.texture_pool.blocks_in_use()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::bridge::NullEngine;

    #[test]
    fn context_is_created_once() {
        let mut rt = Runtime::new(RuntimeConfig::default(), RecordingBackend::new());
        let a = rt.get_context().unwrap();
        let b = rt.get_context().unwrap();
        assert_eq!(a, b);
        let ctx = rt.context(a).unwrap();
        assert_eq!((ctx.width, ctx.height), (800, 600));
    }

    #[test]
    fn resize_updates_context_dimensions() {
        let mut rt = Runtime::new(RuntimeConfig::default(), RecordingBackend::new());
        let mut engine = NullEngine::new();
        let ctx = rt.get_context().unwrap();
        rt.pump_event(
            SourceEvent::Resize {
                width: 1024,
                height: 768,
            },
            &mut engine,
        );
        let entry = rt.context(ctx).unwrap();
        assert_eq!((entry.width, entry.height), (1024, 768));
        assert_eq!(engine.events.len(), 1);
        assert_eq!(engine.events[0].0, "resize");
    }

    #[test]
    fn now_is_monotonic_milliseconds() {
        let rt = Runtime::new(RuntimeConfig::default(), RecordingBackend::new());
        let a = rt.now_ms();
        let b = rt.now_ms();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn frame_counter_advances_on_flush() {
        let mut rt = Runtime::new(RuntimeConfig::default(), RecordingBackend::new());
        assert_eq!(rt.frame_count(), 0);
        rt.flush();
        rt.flush();
        assert_eq!(rt.frame_count(), 2);
    }
}
