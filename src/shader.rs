//! Shader store.
//!
//! Shader objects only capture source text. `compile` is a local step that
//! checks "source present" and flips a flag; the translator produces real
//! diagnostics later, at program link, where both stages are visible.

use crate::error::{Error, Result};
use crate::glsl;
use crate::handle::{HandleTable, ShaderHandle, ShaderTag, MAX_SHADERS};

pub const MAX_INFO_LOG: usize = 4 * 1024;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

#[derive(Debug)]
pub struct ShaderEntry {
    pub kind: ShaderKind,
    pub source: String,
    pub compiled: bool,
    pub info_log: String,
}

pub struct ShaderStore {
    table: HandleTable<ShaderEntry, ShaderTag>,
}

impl ShaderStore {
    pub fn new() -> ShaderStore {
        ShaderStore {
            table: HandleTable::new(MAX_SHADERS),
        }
    }

    pub fn create(&mut self, kind: ShaderKind) -> Result<ShaderHandle> {
        self.table.alloc(ShaderEntry {
            kind,
            source: String::new(),
            compiled: false,
            info_log: String::new(),
        })
    }

    pub fn set_source(&mut self, handle: ShaderHandle, source: &str) -> Result<()> {
        if source.len() > glsl::MAX_SOURCE {
            return Err(Error::TooLarge("shader source"));
        }
        let entry = self.table.get_mut(handle)?;
        entry.source = source.to_string();
        entry.compiled = false;
        entry.info_log.clear();
        Ok(())
    }

    pub fn compile(&mut self, handle: ShaderHandle) -> Result<()> {
        let entry = self.table.get_mut(handle)?;
        if entry.source.is_empty() {
            entry.compiled = false;
            entry.info_log = "source missing".to_string();
        } else {
            entry.compiled = true;
            entry.info_log.clear();
        }
        Ok(())
    }

    pub fn compile_status(&self, handle: ShaderHandle) -> Result<bool> {
        Ok(self.table.get(handle)?.compiled)
    }

    pub fn info_log(&self, handle: ShaderHandle) -> Result<&str> {
        let log = self.table.get(handle)?.info_log.as_str();
        Ok(&log[..log.len().min(MAX_INFO_LOG)])
    }

    pub fn delete(&mut self, handle: ShaderHandle) -> Result<()> {
        self.table.free(handle).map(drop)
    }

    pub fn get(&self, handle: ShaderHandle) -> Result<&ShaderEntry> {
        self.table.get(handle)
    }

    pub fn is_valid(&self, handle: ShaderHandle) -> bool {
        self.table.is_valid(handle)
    }

    pub fn clear(&mut self) {
        self.table.clear(drop);
    }
}
