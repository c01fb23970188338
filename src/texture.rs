//! Texture manager.
//!
//! Textures stage their pixels on the CPU and defer all backend work to the
//! frame flush: a dirty texture is rebuilt there as an immutable image plus
//! a view and a sampler. Input formats collapse into three storage formats
//! (RGBA8, R8, RG8); RGB input is widened to RGBA with opaque alpha during
//! the staging copy.

use crate::backend::{
    BackendId, GraphicsBackend, ImageDesc, MagFilter, MinFilter, PixelFormat, SamplerDesc,
    SamplerKind, WrapMode,
};
use crate::error::{Error, Result};
use crate::handle::{HandleTable, TextureHandle, TextureTag, MAX_TEXTURES};
use crate::pool::StagingPool;
use crate::webgl;

pub const TEXTURE_UNITS: usize = 16;
pub const CUBE_FACES: usize = 6;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TexTarget {
    Tex2d,
    Cube,
}

impl TexTarget {
    pub fn sampler_kind(self) -> SamplerKind {
        match self {
            TexTarget::Tex2d => SamplerKind::Tex2d,
            TexTarget::Cube => SamplerKind::Cube,
        }
    }
}

/// Input format of a `texImage2D` upload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputFormat {
    Rgba,
    Rgb,
    Luminance,
    Alpha,
    LuminanceAlpha,
}

impl InputFormat {
    pub fn from_enum(value: u32) -> Result<InputFormat> {
        Ok(match value {
            webgl::RGBA => InputFormat::Rgba,
            webgl::RGB => InputFormat::Rgb,
            webgl::LUMINANCE => InputFormat::Luminance,
            webgl::ALPHA => InputFormat::Alpha,
            webgl::LUMINANCE_ALPHA => InputFormat::LuminanceAlpha,
            other => return Err(Error::InvalidEnum(other)),
        })
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            InputFormat::Rgba => 4,
            InputFormat::Rgb => 3,
            InputFormat::Luminance | InputFormat::Alpha => 1,
            InputFormat::LuminanceAlpha => 2,
        }
    }

    /// Storage family the input collapses into.
    pub fn storage(self) -> PixelFormat {
        match self {
            InputFormat::Rgba | InputFormat::Rgb => PixelFormat::Rgba8,
            InputFormat::Luminance | InputFormat::Alpha => PixelFormat::R8,
            InputFormat::LuminanceAlpha => PixelFormat::Rg8,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TexParams {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

impl Default for TexParams {
    fn default() -> TexParams {
        TexParams {
            min_filter: MinFilter::NearestMipmapLinear,
            mag_filter: MagFilter::Linear,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
        }
    }
}

#[derive(Debug)]
pub struct TextureEntry {
    pub target: Option<TexTarget>,
    pub width: u32,
    pub height: u32,
    pub storage_format: PixelFormat,
    pub params: TexParams,
    pub staging: Option<crate::pool::Region>,
    pub backend_image: BackendId,
    pub backend_view: BackendId,
    pub backend_sampler: BackendId,
    pub dirty_pixels: bool,
    pub dirty_params: bool,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TextureUnit {
    pub tex_2d: Option<TextureHandle>,
    pub cube: Option<TextureHandle>,
}

impl TextureUnit {
    pub fn bound(&self, target: TexTarget) -> Option<TextureHandle> {
        match target {
            TexTarget::Tex2d => self.tex_2d,
            TexTarget::Cube => self.cube,
        }
    }
}

pub struct TextureStore {
    table: HandleTable<TextureEntry, TextureTag>,
    pub units: [TextureUnit; TEXTURE_UNITS],
    active_unit: usize,
}

impl TextureStore {
    pub fn new() -> TextureStore {
        TextureStore {
            table: HandleTable::new(MAX_TEXTURES),
            units: [TextureUnit::default(); TEXTURE_UNITS],
            active_unit: 0,
        }
    }

    pub fn create(&mut self) -> Result<TextureHandle> {
        self.table.alloc(TextureEntry {
            target: None,
            width: 0,
            height: 0,
            storage_format: PixelFormat::Rgba8,
            params: TexParams::default(),
            staging: None,
            backend_image: 0,
            backend_view: 0,
            backend_sampler: 0,
            dirty_pixels: false,
            dirty_params: false,
        })
    }

    pub fn active_texture(&mut self, unit: usize) -> Result<()> {
        if unit >= TEXTURE_UNITS {
            return Err(Error::InvalidEnum(webgl::TEXTURE0 + unit as u32));
        }
        self.active_unit = unit;
        Ok(())
    }

    pub fn active_unit(&self) -> usize {
        self.active_unit
    }

    pub fn bind(&mut self, target: TexTarget, handle: Option<TextureHandle>) -> Result<()> {
        if let Some(h) = handle {
            let entry = self.table.get_mut(h)?;
            match entry.target {
                None => entry.target = Some(target),
                Some(t) if t == target => {}
                Some(_) => return Err(Error::WrongTarget),
            }
        }
        let unit = &mut self.units[self.active_unit];
        match target {
            TexTarget::Tex2d => unit.tex_2d = handle,
            TexTarget::Cube => unit.cube = handle,
        }
        Ok(())
    }

    pub fn bound(&self, unit: usize, target: TexTarget) -> Option<TextureHandle> {
        self.units[unit].bound(target)
    }

    fn bound_at_active(&self, target: TexTarget) -> Result<TextureHandle> {
        self.units[self.active_unit]
            .bound(target)
            .ok_or(Error::NoTextureBound)
    }

    pub fn tex_parameter(&mut self, target: TexTarget, pname: u32, value: u32) -> Result<()> {
        let handle = self.bound_at_active(target)?;
        let entry = self.table.get_mut(handle)?;
        match pname {
            webgl::TEXTURE_MIN_FILTER => {
                entry.params.min_filter = match value {
                    webgl::NEAREST => MinFilter::Nearest,
                    webgl::LINEAR => MinFilter::Linear,
                    webgl::NEAREST_MIPMAP_NEAREST => MinFilter::NearestMipmapNearest,
                    webgl::LINEAR_MIPMAP_NEAREST => MinFilter::LinearMipmapNearest,
                    webgl::NEAREST_MIPMAP_LINEAR => MinFilter::NearestMipmapLinear,
                    webgl::LINEAR_MIPMAP_LINEAR => MinFilter::LinearMipmapLinear,
                    other => return Err(Error::InvalidEnum(other)),
                }
            }
            webgl::TEXTURE_MAG_FILTER => {
                entry.params.mag_filter = match value {
                    webgl::NEAREST => MagFilter::Nearest,
                    webgl::LINEAR => MagFilter::Linear,
                    other => return Err(Error::InvalidEnum(other)),
                }
            }
            webgl::TEXTURE_WRAP_S | webgl::TEXTURE_WRAP_T => {
                let mode = match value {
                    webgl::REPEAT => WrapMode::Repeat,
                    webgl::CLAMP_TO_EDGE => WrapMode::ClampToEdge,
                    webgl::MIRRORED_REPEAT => WrapMode::MirroredRepeat,
                    other => return Err(Error::InvalidEnum(other)),
                };
                if pname == webgl::TEXTURE_WRAP_S {
                    entry.params.wrap_s = mode;
                } else {
                    entry.params.wrap_t = mode;
                }
            }
            other => {
                // parameters outside the tracked set are accepted and ignored
                debug!("ignoring texture parameter {:#x}", other);
                return Ok(());
            }
        }
        entry.dirty_params = true;
        Ok(())
    }

    /// `texImage2D`. `face` selects the cube face for cube targets (0 for
    /// 2D). Absent pixels leave the staging region zeroed, the way WebGL
    /// allocates a texture without contents.
    pub fn tex_image_2d(
        &mut self,
        target: TexTarget,
        face: usize,
        width: u32,
        height: u32,
        input_format: InputFormat,
        component_type: u32,
        pixels: Option<&[u8]>,
        pool: &mut StagingPool,
    ) -> Result<()> {
        if component_type != webgl::UNSIGNED_BYTE {
            return Err(Error::InvalidEnum(component_type));
        }
        let faces = match target {
            TexTarget::Tex2d => 1,
            TexTarget::Cube => CUBE_FACES,
        };
        if face >= faces {
            return Err(Error::InvalidValue("cube face out of range"));
        }

        let handle = self.bound_at_active(target)?;
        let entry = self.table.get_mut(handle)?;

        let storage = input_format.storage();
        let face_bytes = width as usize * height as usize * storage.bytes_per_pixel();
        if let Some(data) = pixels {
            let expected = width as usize * height as usize * input_format.bytes_per_pixel();
            if data.len() != expected {
                return Err(Error::InvalidValue("pixel data size mismatch"));
            }
        }

        // restage when geometry or format changes; face uploads into an
        // existing cube reuse the region
        let total = face_bytes * faces;
        let needs_realloc = match entry.staging {
            Some(region) => {
                region.len() != total
                    || entry.width != width
                    || entry.height != height
                    || entry.storage_format != storage
            }
            None => true,
        };
        if needs_realloc {
            if let Some(region) = entry.staging.take() {
                pool.free(region);
            }
            entry.staging = Some(pool.alloc(total)?);
        }
        entry.width = width;
        entry.height = height;
        entry.storage_format = storage;

        if let Some(data) = pixels {
            let region = entry.staging.as_ref().unwrap();
            let dst = &mut pool.slice_mut(region)[face * face_bytes..(face + 1) * face_bytes];
            convert_pixels(input_format, data, dst);
        }
        entry.dirty_pixels = true;
        Ok(())
    }

    /// Rebuilds every dirty texture on the backend: image + view from the
    /// staged pixels, sampler from the params. A mipmap min filter is
    /// coerced to its single-level equivalent since only one mip exists.
    pub fn flush_uploads(&mut self, pool: &StagingPool, backend: &mut dyn GraphicsBackend) {
        for (handle, entry) in self.table.iter_mut() {
            if !entry.dirty_pixels && !entry.dirty_params {
                continue;
            }

            if entry.dirty_pixels {
                if entry.backend_view != 0 {
                    backend.destroy_view(entry.backend_view);
                    entry.backend_view = 0;
                }
                if entry.backend_image != 0 {
                    backend.destroy_image(entry.backend_image);
                    entry.backend_image = 0;
                }
                let staging = match entry.staging {
                    Some(ref region) => region,
                    None => {
                        entry.dirty_pixels = false;
                        continue;
                    }
                };
                let desc = ImageDesc {
                    width: entry.width,
                    height: entry.height,
                    pixel_format: entry.storage_format,
                    cube: entry.target == Some(TexTarget::Cube),
                    pixels: Some(pool.slice(staging)),
                };
                entry.backend_image = match backend.make_image(&desc) {
                    Ok(id) => id,
                    Err(e) => {
                        error!("texture {:?} image upload failed: {}", handle, e);
                        entry.dirty_pixels = false;
                        entry.dirty_params = false;
                        continue;
                    }
                };
                entry.backend_view = match backend.make_view(entry.backend_image) {
                    Ok(id) => id,
                    Err(e) => {
                        error!("texture {:?} view creation failed: {}", handle, e);
                        backend.destroy_image(entry.backend_image);
                        entry.backend_image = 0;
                        entry.dirty_pixels = false;
                        entry.dirty_params = false;
                        continue;
                    }
                };
            }

            if entry.backend_sampler != 0 {
                backend.destroy_sampler(entry.backend_sampler);
                entry.backend_sampler = 0;
            }
            let desc = SamplerDesc {
                min_filter: entry.params.min_filter.without_mipmaps(),
                mag_filter: entry.params.mag_filter,
                wrap_s: entry.params.wrap_s,
                wrap_t: entry.params.wrap_t,
            };
            match backend.make_sampler(&desc) {
                Ok(id) => entry.backend_sampler = id,
                Err(e) => error!("texture {:?} sampler creation failed: {}", handle, e),
            }

            entry.dirty_pixels = false;
            entry.dirty_params = false;
        }
    }

    pub fn delete(
        &mut self,
        handle: TextureHandle,
        pool: &mut StagingPool,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let entry = self.table.free(handle)?;
        for unit in self.units.iter_mut() {
            if unit.tex_2d == Some(handle) {
                unit.tex_2d = None;
            }
            if unit.cube == Some(handle) {
                unit.cube = None;
            }
        }
        if entry.backend_view != 0 {
            backend.destroy_view(entry.backend_view);
        }
        if entry.backend_image != 0 {
            backend.destroy_image(entry.backend_image);
        }
        if entry.backend_sampler != 0 {
            backend.destroy_sampler(entry.backend_sampler);
        }
        if let Some(region) = entry.staging {
            pool.free(region);
        }
        Ok(())
    }

    pub fn get(&self, handle: TextureHandle) -> Result<&TextureEntry> {
        self.table.get(handle)
    }

    pub fn is_valid(&self, handle: TextureHandle) -> bool {
        self.table.is_valid(handle)
    }

    pub fn clear(&mut self, pool: &mut StagingPool, backend: &mut dyn GraphicsBackend) {
        self.units = [TextureUnit::default(); TEXTURE_UNITS];
        self.active_unit = 0;
        self.table.clear(|entry| {
            if entry.backend_view != 0 {
                backend.destroy_view(entry.backend_view);
            }
            if entry.backend_image != 0 {
                backend.destroy_image(entry.backend_image);
            }
            if entry.backend_sampler != 0 {
                backend.destroy_sampler(entry.backend_sampler);
            }
            if let Some(region) = entry.staging {
                pool.free(region);
            }
        });
    }
}

fn convert_pixels(input: InputFormat, src: &[u8], dst: &mut [u8]) {
    match input {
        InputFormat::Rgba | InputFormat::Luminance | InputFormat::Alpha
        | InputFormat::LuminanceAlpha => dst.copy_from_slice(src),
        InputFormat::Rgb => {
            for (s, d) in src.chunks_exact(3).zip(dst.chunks_exact_mut(4)) {
                d[0] = s[0];
                d[1] = s[1];
                d[2] = s[2];
                d[3] = 255;
            }
        }
    }
}
