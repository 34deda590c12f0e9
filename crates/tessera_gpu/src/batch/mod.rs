//! Multi-texture batch renderer
//!
//! Items are staged until the vertex capacity is reached or something forces
//! a flush (a state change, a target switch, the end of a frame). A flush
//! then:
//!
//! 1. Splits the items into texture arrays of at most `max_textures`
//!    distinct textures, preferring the unit each texture already occupies
//! 2. Splits each array into draw calls wherever the effective blend mode
//!    changes
//! 3. Packs every item into one interleaved vertex buffer and one index buffer
//! 4. Uploads both buffers once
//! 5. Binds each array's textures and issues the draws in order
//!
//! Draw calls are driven by texture and blend boundaries; buffer uploads only
//! by the number of flushes.

mod pool;

use bytemuck::{Pod, Zeroable};
use rustc_hash::FxHashMap;

use tessera_core::{
    premultiply_blend_mode, Attribute, BaseTexture, Batchable, BlendMode, Buffer, BufferKind,
    DataType, DrawMode, Geometry, IndexFormat,
};

use crate::backend::Backend;
use crate::error::Result;
use crate::renderer::Systems;
use crate::shader::Shader;
use crate::shaders::{A_COLOR, A_POSITION, A_TEXTURE_ID, A_UV};
use crate::state::State;
use crate::texture_system::BoundTexture;

pub use pool::{FramePool, Reset, ScratchPool};

/// One packed vertex as the batch program reads it
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    /// `z` carries the item's depth
    pub position: [f32; 3],
    pub uv: [f32; 2],
    /// RGBA bytes
    pub color: u32,
    /// Unit of the texture inside the draw's texture array
    pub texture_id: f32,
}

pub const VERTEX_STRIDE: u32 = std::mem::size_of::<BatchVertex>() as u32;

/// Textures one draw-call span samples from, and the unit each one uses
#[derive(Debug, Default)]
pub struct BatchTextureArray {
    pub elements: Vec<BaseTexture>,
    pub ids: Vec<u32>,
}

impl BatchTextureArray {
    pub fn count(&self) -> usize {
        self.elements.len()
    }
}

impl Reset for BatchTextureArray {
    fn reset(&mut self) {
        self.elements.clear();
        self.ids.clear();
    }
}

/// A range of indices drawn with one blend mode and one texture array
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchDrawCall {
    /// Index into this flush's texture arrays
    pub tex_array: usize,
    pub blend: BlendMode,
    /// First index
    pub start: u32,
    /// Indices drawn
    pub size: u32,
    pub mode: DrawMode,
}

impl Default for BatchDrawCall {
    fn default() -> Self {
        Self {
            tex_array: 0,
            blend: BlendMode::Normal,
            start: 0,
            size: 0,
            mode: DrawMode::Triangles,
        }
    }
}

impl Reset for BatchDrawCall {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Counters since the renderer was created
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub flushes: u64,
    pub draw_calls: u64,
    pub texture_arrays: u64,
    /// Items rejected by [`Systems::batch_render`]
    pub dropped: u64,
}

/// An item copied out of the caller's data
#[derive(Debug)]
struct StagedItem {
    vertex_start: usize,
    vertex_count: usize,
    index_start: usize,
    index_count: usize,
    color: u32,
    /// Blend mode after alpha-mode mapping
    blend: BlendMode,
    depth: f32,
    texture: BaseTexture,
}

/// Per-texture bookkeeping during one flush
#[derive(Clone, Copy, Debug, Default)]
struct SlotInfo {
    /// Tick of the texture array the texture was last added to
    batch_enabled: u32,
    /// Unit the texture is (or is about to be) bound to
    location: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default)]
struct PackCursor {
    vertex: usize,
    index: usize,
}

pub struct BatchRenderer {
    /// Vertex capacity before an implicit flush
    size: usize,
    max_textures: u32,
    shader: Shader,
    state: State,
    geometry: Geometry,
    vertex_buffer: Buffer,
    index_buffer: Buffer,

    items: Vec<StagedItem>,
    positions: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u16>,
    vertex_count: usize,
    index_count: usize,

    tick: u32,
    slots: FxHashMap<u64, SlotInfo>,
    bound: Vec<Option<u64>>,
    texture_arrays: FramePool<BatchTextureArray>,
    draw_calls: FramePool<BatchDrawCall>,
    vertex_scratch: ScratchPool<BatchVertex>,
    index_scratch: ScratchPool<u16>,
    stats: BatchStats,
}

impl BatchRenderer {
    pub fn new(shader: Shader, size: usize, max_textures: u32) -> Self {
        let vertex_buffer = Buffer::new(Vec::new(), BufferKind::Vertex, false);
        let index_buffer = Buffer::new(Vec::new(), BufferKind::Index(IndexFormat::U16), false);

        let mut geometry = Geometry::new();
        geometry
            .add_attribute(
                A_POSITION,
                &vertex_buffer,
                Attribute::new(0, 3).with_layout(VERTEX_STRIDE, 0),
            )
            .add_attribute(
                A_UV,
                &vertex_buffer,
                Attribute::new(0, 2).with_layout(VERTEX_STRIDE, 12),
            )
            .add_attribute(
                A_COLOR,
                &vertex_buffer,
                Attribute::new(0, 4)
                    .with_type(DataType::U8, true)
                    .with_layout(VERTEX_STRIDE, 20),
            )
            .add_attribute(
                A_TEXTURE_ID,
                &vertex_buffer,
                Attribute::new(0, 1).with_layout(VERTEX_STRIDE, 24),
            )
            .add_index(&index_buffer);

        Self {
            size,
            max_textures: max_textures.max(1),
            shader,
            state: State::for_2d(),
            geometry,
            vertex_buffer,
            index_buffer,
            items: Vec::new(),
            positions: Vec::new(),
            uvs: Vec::new(),
            indices: Vec::new(),
            vertex_count: 0,
            index_count: 0,
            tick: 0,
            slots: FxHashMap::default(),
            bound: Vec::new(),
            texture_arrays: FramePool::new(),
            draw_calls: FramePool::new(),
            vertex_scratch: ScratchPool::new(),
            index_scratch: ScratchPool::new(),
            stats: BatchStats::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_textures(&self) -> u32 {
        self.max_textures
    }

    pub fn shader(&self) -> &Shader {
        &self.shader
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Nothing is waiting to be drawn
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn buffered_vertices(&self) -> usize {
        self.vertex_count
    }

    pub fn buffered_items(&self) -> usize {
        self.items.len()
    }

    /// Check that `item` can be staged at all
    fn accepts(&mut self, item: &dyn Batchable) -> bool {
        let texture = item.texture();
        if !texture.valid() {
            tracing::trace!("batch: dropped item with invalid texture");
            self.stats.dropped += 1;
            return false;
        }

        let vertex_count = item.vertex_count();
        if vertex_count > self.size {
            tracing::warn!(
                "batch: dropped item with {} vertices, capacity is {}",
                vertex_count,
                self.size
            );
            self.stats.dropped += 1;
            return false;
        }
        if item.uvs().len() < vertex_count * 2 {
            tracing::warn!(
                "batch: dropped item with {} uv pairs for {} vertices",
                item.uvs().len() / 2,
                vertex_count
            );
            self.stats.dropped += 1;
            return false;
        }
        if item.indices().iter().any(|&i| i as usize >= vertex_count) {
            tracing::warn!(
                "batch: dropped item indexing past its {} vertices",
                vertex_count
            );
            self.stats.dropped += 1;
            return false;
        }
        true
    }

    fn would_overflow(&self, item: &dyn Batchable) -> bool {
        self.vertex_count + item.vertex_count() > self.size
    }

    fn stage(&mut self, item: &dyn Batchable) {
        let base = item.texture().base_texture().clone();
        let premultiplied = base.alpha_mode().is_premultiplied();
        let vertex_count = item.vertex_count();

        self.items.push(StagedItem {
            vertex_start: self.positions.len() / 2,
            vertex_count,
            index_start: self.indices.len(),
            index_count: item.indices().len(),
            color: item.tint().pack(premultiplied),
            blend: premultiply_blend_mode(premultiplied, item.blend_mode()),
            depth: item.depth(),
            texture: base,
        });
        self.positions
            .extend_from_slice(&item.vertex_data()[..vertex_count * 2]);
        self.uvs.extend_from_slice(&item.uvs()[..vertex_count * 2]);
        self.indices.extend_from_slice(item.indices());

        self.vertex_count += vertex_count;
        self.index_count += item.indices().len();
    }

    /// Assign units, split draw calls and pack the staged items
    fn build(&mut self, bound_table: &[Option<BoundTexture>]) {
        let max = self.max_textures as usize;

        self.bound.clear();
        self.bound.resize(max, None);
        for unit in (0..max).rev() {
            let uid = bound_table.get(unit).copied().flatten().map(|b| b.uid);
            self.bound[unit] = uid;
            if let Some(uid) = uid {
                self.slots.entry(uid).or_default().location = Some(unit as u32);
            }
        }

        let mut vertices = self.vertex_scratch.take(self.vertex_count);
        let mut indices = self.index_scratch.take(self.index_count);
        let mut cursor = PackCursor::default();

        self.tick = self.tick.wrapping_add(1);
        let mut array = self.texture_arrays.acquire();
        let mut start = 0;

        for i in 0..self.items.len() {
            let uid = self.items[i].texture.uid();
            if self.slots.get(&uid).map(|s| s.batch_enabled) == Some(self.tick) {
                continue;
            }

            let full = self
                .texture_arrays
                .get(array)
                .map_or(false, |a| a.count() >= max);
            if full {
                self.close_array(array, start, i, &mut vertices, &mut indices, &mut cursor);
                start = i;
                array = self.texture_arrays.acquire();
                self.tick = self.tick.wrapping_add(1);
            }

            self.slots.entry(uid).or_default().batch_enabled = self.tick;
            if let Some(a) = self.texture_arrays.get_mut(array) {
                a.elements.push(self.items[i].texture.clone());
            }
        }

        let pending = self.texture_arrays.get(array).map_or(0, |a| a.count());
        if pending > 0 {
            let finish = self.items.len();
            self.close_array(array, start, finish, &mut vertices, &mut indices, &mut cursor);
            self.tick = self.tick.wrapping_add(1);
        }

        self.vertex_buffer.update_with(|data| {
            data.clear();
            data.extend_from_slice(bytemuck::cast_slice(&vertices[..cursor.vertex]));
        });
        self.index_buffer.update_with(|data| {
            data.clear();
            data.extend_from_slice(bytemuck::cast_slice(&indices[..cursor.index]));
        });
        self.vertex_scratch.give(vertices);
        self.index_scratch.give(indices);
    }

    fn close_array(
        &mut self,
        array: usize,
        start: usize,
        finish: usize,
        vertices: &mut [BatchVertex],
        indices: &mut [u16],
        cursor: &mut PackCursor,
    ) {
        if let Some(a) = self.texture_arrays.get_mut(array) {
            bound_array(a, &mut self.bound, &mut self.slots, self.tick);
        }
        self.build_draw_calls(array, start, finish, vertices, indices, cursor);
    }

    fn build_draw_calls(
        &mut self,
        array: usize,
        start: usize,
        finish: usize,
        vertices: &mut [BatchVertex],
        indices: &mut [u16],
        cursor: &mut PackCursor,
    ) {
        let mut call = self.draw_calls.acquire();
        self.set_call(call, |c| {
            c.tex_array = array;
            c.start = cursor.index as u32;
        });

        let mut run_start = start;
        for i in start..finish {
            let blend = self.items[i].blend;
            let current = self.draw_calls.get(call).map(|c| c.blend);
            if run_start < i && current != Some(blend) {
                let end = cursor.index as u32;
                self.set_call(call, |c| c.size = end - c.start);
                run_start = i;
                call = self.draw_calls.acquire();
                self.set_call(call, |c| {
                    c.tex_array = array;
                    c.start = end;
                });
            }

            let item = &self.items[i];
            let texture_id = self
                .slots
                .get(&item.texture.uid())
                .and_then(|s| s.location)
                .unwrap_or(0);
            pack_item(
                item,
                &self.positions,
                &self.uvs,
                &self.indices,
                vertices,
                indices,
                cursor,
                texture_id as f32,
            );
            self.set_call(call, |c| c.blend = blend);
        }

        if run_start < finish {
            let end = cursor.index as u32;
            self.set_call(call, |c| c.size = end - c.start);
        }
    }

    fn set_call(&mut self, index: usize, f: impl FnOnce(&mut BatchDrawCall)) {
        if let Some(call) = self.draw_calls.get_mut(index) {
            f(call);
        }
    }

    /// Drop staged items and per-flush records, keeping allocations
    fn reset(&mut self) {
        self.items.clear();
        self.positions.clear();
        self.uvs.clear();
        self.indices.clear();
        self.vertex_count = 0;
        self.index_count = 0;
        self.slots.clear();
        self.texture_arrays.reset();
        self.draw_calls.reset();
    }
}

/// Give each texture of `array` a unit
///
/// A texture already bound where it was last seen keeps that unit. Others
/// take the lowest unit not claimed by a texture of this array.
fn bound_array(
    array: &mut BatchTextureArray,
    bound: &mut [Option<u64>],
    slots: &mut FxHashMap<u64, SlotInfo>,
    tick: u32,
) {
    let max = bound.len();
    let mut j = 0;
    array.ids.clear();

    for texture in &array.elements {
        let uid = texture.uid();
        let location = slots.get(&uid).and_then(|s| s.location);
        if let Some(unit) = location {
            if (unit as usize) < max && bound[unit as usize] == Some(uid) {
                array.ids.push(unit);
                continue;
            }
        }

        while j < max {
            let claimed = bound[j].and_then(|other| slots.get(&other)).map_or(false, |s| {
                s.batch_enabled == tick && s.location == Some(j as u32)
            });
            if !claimed {
                break;
            }
            j += 1;
        }
        if j >= max {
            tracing::warn!("batch: no free texture unit for texture {}", uid);
            array.ids.push(0);
            continue;
        }

        array.ids.push(j as u32);
        slots.entry(uid).or_default().location = Some(j as u32);
        bound[j] = Some(uid);
    }
}

#[allow(clippy::too_many_arguments)]
fn pack_item(
    item: &StagedItem,
    positions: &[f32],
    uvs: &[f32],
    staged_indices: &[u16],
    vertices: &mut [BatchVertex],
    indices: &mut [u16],
    cursor: &mut PackCursor,
    texture_id: f32,
) {
    for k in 0..item.vertex_count {
        let p = (item.vertex_start + k) * 2;
        vertices[cursor.vertex + k] = BatchVertex {
            position: [positions[p], positions[p + 1], item.depth],
            uv: [uvs[p], uvs[p + 1]],
            color: item.color,
            texture_id,
        };
    }

    let offset = cursor.vertex as u16;
    let source = &staged_indices[item.index_start..item.index_start + item.index_count];
    for (dst, &index) in indices[cursor.index..].iter_mut().zip(source) {
        *dst = index + offset;
    }

    cursor.vertex += item.vertex_count;
    cursor.index += item.index_count;
}

impl Systems {
    /// Stage `item` in the batch, flushing first if it would not fit
    ///
    /// Items with an invalid texture are skipped.
    pub fn batch_render(&mut self, backend: &mut dyn Backend, item: &dyn Batchable) -> Result<()> {
        if !self.batch.accepts(item) {
            return Ok(());
        }
        if self.batch.would_overflow(item) {
            self.flush(backend)?;
        }
        self.batch.stage(item);
        Ok(())
    }

    /// Draw everything the batch holds
    pub fn flush(&mut self, backend: &mut dyn Backend) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let Systems {
            batch,
            state,
            textures,
            shaders,
            geometry,
            ..
        } = self;

        state.set(backend, batch.state);
        textures.ensure_sampler_type(backend, batch.max_textures);
        shaders.bind(backend, textures, &batch.shader, false)?;

        batch.build(textures.bound_textures());
        geometry.bind(backend, &batch.geometry, &batch.shader.program)?;

        let mut current_array = None;
        for call in batch.draw_calls.in_use() {
            if current_array != Some(call.tex_array) {
                current_array = Some(call.tex_array);
                if let Some(array) = batch.texture_arrays.get(call.tex_array) {
                    for (texture, &unit) in array.elements.iter().zip(&array.ids) {
                        textures.bind(backend, Some(texture), unit);
                    }
                }
            }
            state.set(backend, batch.state.with_blend_mode(call.blend));
            geometry.draw(backend, &batch.geometry, call.mode, Some(call.size), call.start, None);
        }

        batch.stats.flushes += 1;
        batch.stats.draw_calls += batch.draw_calls.used() as u64;
        batch.stats.texture_arrays += batch.texture_arrays.used() as u64;
        batch.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Capabilities, Command, RecordingBackend};
    use crate::config::RendererConfig;
    use tessera_core::{AlphaMode, BaseTextureOptions, BatchElement, Color, Rectangle, Texture};

    fn systems(units: u32) -> (RecordingBackend, Systems) {
        let caps = Capabilities {
            max_texture_units: units,
            ..Capabilities::default()
        };
        let backend = RecordingBackend::new(caps);
        let systems = Systems::new(RendererConfig::default(), caps);
        (backend, systems)
    }

    fn texture() -> Texture {
        let base = BaseTexture::from_buffer(vec![255; 16], 2, 2, Default::default()).unwrap();
        Texture::from_base(base)
    }

    fn quad(texture: &Texture, x: f32) -> BatchElement {
        BatchElement::rectangle(
            texture.clone(),
            Rectangle::new(x, 0.0, 10.0, 10.0),
            tessera_core::Matrix::IDENTITY,
        )
    }

    fn draws(backend: &RecordingBackend) -> Vec<u32> {
        backend.draws().iter().map(|d| d.count).collect()
    }

    fn packed_vertices(systems: &Systems) -> Vec<BatchVertex> {
        systems
            .batch
            .vertex_buffer
            .data()
            .chunks_exact(VERTEX_STRIDE as usize)
            .map(bytemuck::pod_read_unaligned::<BatchVertex>)
            .collect()
    }

    fn vertex_uploads(backend: &RecordingBackend) -> usize {
        backend.count(|c| matches!(c, Command::UploadBuffer { .. }))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Texture arrays
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn shared_textures_make_one_draw() {
        let (mut backend, mut systems) = systems(4);
        let t1 = texture();
        let t2 = texture();

        for (i, t) in [&t1, &t1, &t2].iter().enumerate() {
            systems
                .batch_render(&mut backend, &quad(t, i as f32 * 10.0))
                .unwrap();
        }
        systems.flush(&mut backend).unwrap();

        assert_eq!(draws(&backend), vec![18]);
        assert_eq!(systems.batch.stats().texture_arrays, 1);
        let bound: Vec<u64> = systems.textures.bound_textures()[..2]
            .iter()
            .filter_map(|b| b.map(|b| b.uid))
            .collect();
        assert_eq!(
            bound,
            vec![t1.base_texture().uid(), t2.base_texture().uid()]
        );
    }

    #[test]
    fn texture_limit_splits_arrays() {
        let (mut backend, mut systems) = systems(2);
        let textures: Vec<Texture> = (0..5).map(|_| texture()).collect();

        for t in &textures {
            systems.batch_render(&mut backend, &quad(t, 0.0)).unwrap();
        }
        systems.flush(&mut backend).unwrap();

        assert_eq!(systems.batch.stats().texture_arrays, 3);
        assert_eq!(draws(&backend), vec![12, 12, 6]);
    }

    #[test]
    fn reused_texture_packs_into_fewer_arrays() {
        let (mut backend, mut systems) = systems(2);
        let a = texture();
        let b = texture();
        let c = texture();

        for t in [&a, &b, &a, &b, &c] {
            systems.batch_render(&mut backend, &quad(t, 0.0)).unwrap();
        }
        systems.flush(&mut backend).unwrap();

        assert_eq!(systems.batch.stats().texture_arrays, 2);
        assert_eq!(draws(&backend), vec![24, 6]);
    }

    #[test]
    fn texture_keeps_its_unit_across_flushes() {
        let (mut backend, mut systems) = systems(4);
        let a = texture();
        let b = texture();

        systems.batch_render(&mut backend, &quad(&a, 0.0)).unwrap();
        systems.batch_render(&mut backend, &quad(&b, 0.0)).unwrap();
        systems.flush(&mut backend).unwrap();
        backend.clear_commands();

        systems.batch_render(&mut backend, &quad(&b, 0.0)).unwrap();
        systems.flush(&mut backend).unwrap();

        assert_eq!(
            backend.count(|c| matches!(c, Command::BindTexture { .. })),
            0
        );
        assert_eq!(
            systems.textures.bound_textures()[1].map(|t| t.uid),
            Some(b.base_texture().uid())
        );
    }

    #[test]
    fn texture_ids_follow_assigned_units() {
        let (mut backend, mut systems) = systems(4);
        let a = texture();
        let b = texture();
        systems.batch_render(&mut backend, &quad(&a, 0.0)).unwrap();
        systems.batch_render(&mut backend, &quad(&b, 0.0)).unwrap();
        systems.flush(&mut backend).unwrap();

        let vertices = packed_vertices(&systems);
        assert_eq!(vertices.len(), 8);
        assert!(vertices[..4].iter().all(|v| v.texture_id == 0.0));
        assert!(vertices[4..].iter().all(|v| v.texture_id == 1.0));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Draw calls and packing
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn blend_changes_split_draw_calls() {
        let (mut backend, mut systems) = systems(4);
        let t = texture();
        let modes = [BlendMode::Normal, BlendMode::Normal, BlendMode::Add, BlendMode::Normal];

        for mode in modes {
            systems
                .batch_render(&mut backend, &quad(&t, 0.0).with_blend_mode(mode))
                .unwrap();
        }
        systems.flush(&mut backend).unwrap();

        let starts: Vec<u32> = backend.draws().iter().map(|d| d.start).collect();
        assert_eq!(draws(&backend), vec![12, 6, 6]);
        assert_eq!(starts, vec![0, 12, 18]);
    }

    #[test]
    fn one_upload_per_buffer_per_flush() {
        let (mut backend, mut systems) = systems(1);
        let t1 = texture();
        let t2 = texture();
        systems.flush(&mut backend).unwrap();
        systems.batch_render(&mut backend, &quad(&t1, 0.0)).unwrap();
        systems.flush(&mut backend).unwrap();
        backend.clear_commands();

        for t in [&t1, &t2, &t1, &t2] {
            systems.batch_render(&mut backend, &quad(t, 0.0)).unwrap();
        }
        systems.flush(&mut backend).unwrap();

        assert_eq!(backend.draws().len(), 4);
        assert_eq!(vertex_uploads(&backend), 2);
    }

    #[test]
    fn indices_are_offset_by_packed_vertices() {
        let (mut backend, mut systems) = systems(4);
        let t = texture();
        systems.batch_render(&mut backend, &quad(&t, 0.0)).unwrap();
        systems.batch_render(&mut backend, &quad(&t, 20.0)).unwrap();
        systems.flush(&mut backend).unwrap();

        let indices: Vec<u16> = systems
            .batch
            .index_buffer
            .data()
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
    }

    #[test]
    fn tint_is_premultiplied_for_premultiplied_textures() {
        let (mut backend, mut systems) = systems(4);
        let straight = BaseTexture::from_buffer(
            vec![255; 16],
            2,
            2,
            BaseTextureOptions::default().with_alpha_mode(AlphaMode::NoPremultipliedAlpha),
        )
        .unwrap();
        let straight = Texture::from_base(straight);
        let premultiplied = texture();
        let tint = Color::new(1.0, 1.0, 1.0, 0.5);

        systems
            .batch_render(&mut backend, &quad(&premultiplied, 0.0).with_tint(tint))
            .unwrap();
        systems
            .batch_render(&mut backend, &quad(&straight, 0.0).with_tint(tint))
            .unwrap();
        systems.flush(&mut backend).unwrap();

        let vertices = packed_vertices(&systems);
        assert_eq!(vertices[0].color, tint.pack(true));
        assert_eq!(vertices[4].color, tint.pack(false));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Staging
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn invalid_textures_are_dropped() {
        let (mut backend, mut systems) = systems(4);
        let empty = BaseTexture::new(None, BaseTextureOptions::default()).unwrap();
        let invalid = Texture::from_base(empty);

        systems.batch_render(&mut backend, &quad(&invalid, 0.0)).unwrap();

        assert!(systems.batch.is_empty());
        assert_eq!(systems.batch.stats().dropped, 1);
    }

    #[test]
    fn full_batch_flushes_before_staging() {
        let caps = Capabilities::default();
        let mut backend = RecordingBackend::new(caps);
        let mut systems = Systems::new(RendererConfig::default().with_batch_size(4), caps);
        let t = texture();

        systems.batch_render(&mut backend, &quad(&t, 0.0)).unwrap();
        assert!(backend.draws().is_empty());

        systems.batch_render(&mut backend, &quad(&t, 10.0)).unwrap();
        assert_eq!(backend.draws().len(), 1);
        assert_eq!(systems.batch.buffered_vertices(), 4);
    }

    #[test]
    fn depth_lands_in_z() {
        let (mut backend, mut systems) = systems(4);
        let t = texture();
        systems
            .batch_render(&mut backend, &quad(&t, 0.0).with_depth(0.25))
            .unwrap();
        systems.flush(&mut backend).unwrap();

        let vertices = packed_vertices(&systems);
        assert!(vertices.iter().all(|v| v.position[2] == 0.25));
    }

    #[test]
    fn vertex_stride_matches_layout() {
        assert_eq!(VERTEX_STRIDE, 28);
    }
}
