//! Geometry uploads and vertex layouts
//!
//! Buffers are uploaded when their `update_id` moves. Storage is reused with a
//! sub-upload while the data fits and reallocated otherwise. Vertex layouts
//! are resolved once per geometry and program pair.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use tessera_core::{
    Buffer, BufferKind, Disposal, DisposalQueue, DrawMode, Geometry, IndexFormat, ListenerId,
};

use crate::backend::{
    Backend, BufferHandle, BufferUpload, DrawCommand, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexLayout,
};
use crate::error::{RendererError, Result};
use crate::shader::Program;

#[derive(Debug)]
struct GlBuffer {
    handle: BufferHandle,
    update_id: Option<u32>,
    byte_len: usize,
}

#[derive(Clone, Debug)]
struct ResolvedBuffer {
    buffer: usize,
    stride: u32,
    instance: bool,
    attributes: SmallVec<[VertexAttribute; 4]>,
}

#[derive(Clone, Debug)]
struct ResolvedLayout {
    signature: u64,
    buffers: SmallVec<[ResolvedBuffer; 2]>,
    index: Option<(usize, IndexFormat)>,
}

pub struct GeometrySystem {
    buffers: FxHashMap<u64, GlBuffer>,
    layouts: FxHashMap<(u64, u64), ResolvedLayout>,
    active: Option<VertexLayout>,
    listener: ListenerId,
    disposals: DisposalQueue,
}

impl Default for GeometrySystem {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometrySystem {
    pub fn new() -> Self {
        Self {
            buffers: FxHashMap::default(),
            layouts: FxHashMap::default(),
            active: None,
            listener: ListenerId::unique(),
            disposals: DisposalQueue::new(),
        }
    }

    pub fn buffer_handle(&self, buffer: &Buffer) -> Option<BufferHandle> {
        self.buffers.get(&buffer.uid()).map(|b| b.handle)
    }

    pub fn managed_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Make `geometry` the input of the next draws with `program`
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        geometry: &Geometry,
        program: &Program,
    ) -> Result<()> {
        geometry.validate()?;

        let key = (geometry.uid(), program.uid());
        let signature = geometry_signature(geometry);
        let stale = self
            .layouts
            .get(&key)
            .map_or(true, |layout| layout.signature != signature);
        if stale {
            check_compatibility(geometry, program)?;
            let layout = resolve_layout(geometry, program, signature);
            self.layouts.insert(key, layout);
            if !geometry.on_dispose().is_connected(self.listener) {
                geometry
                    .on_dispose()
                    .connect_as(self.listener, self.disposals.sink(Disposal::Geometry));
            }
        }

        for buffer in &geometry.buffers {
            self.update_buffer(backend, buffer);
        }

        let Some(resolved) = self.layouts.get(&key) else {
            return Ok(());
        };
        let mut layout = VertexLayout::default();
        for rb in &resolved.buffers {
            let Some(handle) = geometry
                .buffers
                .get(rb.buffer)
                .and_then(|b| self.buffers.get(&b.uid()))
                .map(|b| b.handle)
            else {
                continue;
            };
            layout.buffers.push(VertexBufferLayout {
                buffer: handle,
                stride: rb.stride,
                instance: rb.instance,
                attributes: rb.attributes.clone(),
            });
        }
        layout.index = resolved.index.and_then(|(index, format)| {
            geometry
                .buffers
                .get(index)
                .and_then(|b| self.buffers.get(&b.uid()))
                .map(|b| (b.handle, format))
        });

        if self.active.as_ref() != Some(&layout) {
            backend.set_vertex_layout(&layout);
            self.active = Some(layout);
        }
        Ok(())
    }

    /// Upload `buffer` if its contents changed, returning its native handle
    pub fn update_buffer(&mut self, backend: &mut dyn Backend, buffer: &Buffer) -> BufferHandle {
        let listener = self.listener;
        let disposals = &self.disposals;
        let gl = self.buffers.entry(buffer.uid()).or_insert_with(|| {
            if !buffer.on_dispose().is_connected(listener) {
                buffer
                    .on_dispose()
                    .connect_as(listener, disposals.sink(Disposal::Buffer));
            }
            GlBuffer {
                handle: backend.create_buffer(buffer.kind()),
                update_id: None,
                byte_len: 0,
            }
        });

        if gl.update_id == Some(buffer.update_id()) {
            return gl.handle;
        }
        gl.update_id = Some(buffer.update_id());

        let data = buffer.data();
        if gl.byte_len >= data.len() && gl.byte_len > 0 {
            backend.upload_buffer(gl.handle, &data, BufferUpload::Sub);
        } else {
            gl.byte_len = data.len();
            backend.upload_buffer(gl.handle, &data, BufferUpload::Allocate);
        }
        gl.handle
    }

    /// Draw from the geometry bound last
    ///
    /// `size` defaults to every index (or vertex); `start` counts elements.
    pub fn draw(
        &mut self,
        backend: &mut dyn Backend,
        geometry: &Geometry,
        mode: DrawMode,
        size: Option<u32>,
        start: u32,
        instances: Option<u32>,
    ) {
        let instances = if geometry.instanced {
            instances.unwrap_or(geometry.instance_count).max(1)
        } else {
            1
        };

        let draw = match geometry.index_buffer() {
            Some(index) => {
                let format = match index.kind() {
                    BufferKind::Index(format) => format,
                    _ => IndexFormat::U16,
                };
                DrawCommand {
                    mode,
                    count: size.unwrap_or((index.len() / format.size()) as u32),
                    start,
                    index: Some(format),
                    instances,
                }
            }
            None => DrawCommand {
                mode,
                count: size.unwrap_or(geometry.vertex_count() as u32),
                start,
                index: None,
                instances,
            },
        };
        backend.draw(&draw);
    }

    /// Forget the bound layout so the next bind re-sends it
    pub fn reset(&mut self) {
        self.active = None;
    }

    pub fn dispose_buffer(&mut self, backend: &mut dyn Backend, uid: u64) {
        if let Some(gl) = self.buffers.remove(&uid) {
            backend.delete_buffer(gl.handle);
            self.active = None;
        }
    }

    pub fn dispose_geometry(&mut self, uid: u64) {
        self.layouts.retain(|(geometry, _), _| *geometry != uid);
    }

    pub fn drain_disposals(&mut self, backend: &mut dyn Backend) {
        for disposal in self.disposals.drain() {
            match disposal {
                Disposal::Buffer(uid) => self.dispose_buffer(backend, uid),
                Disposal::Geometry(uid) => self.dispose_geometry(uid),
                _ => {}
            }
        }
    }

    pub fn context_change(&mut self) {
        self.buffers.clear();
        self.layouts.clear();
        self.active = None;
        self.disposals.drain();
    }
}

/// Every attribute the program reads must exist in the geometry
pub fn check_compatibility(geometry: &Geometry, program: &Program) -> Result<()> {
    for name in program.attributes().keys() {
        if geometry.attribute(name).is_none() {
            return Err(RendererError::MissingAttribute(name.clone()));
        }
    }
    Ok(())
}

fn geometry_signature(geometry: &Geometry) -> u64 {
    let mut hasher = FxHasher::default();
    geometry.buffers.len().hash(&mut hasher);
    geometry.index_buffer().map(|b| b.uid()).hash(&mut hasher);
    for (name, a) in &geometry.attributes {
        name.hash(&mut hasher);
        (a.buffer, a.size, a.normalized, a.data_type, a.stride, a.start, a.instance).hash(&mut hasher);
    }
    hasher.finish()
}

fn resolve_layout(geometry: &Geometry, program: &Program, signature: u64) -> ResolvedLayout {
    let buffer_count = geometry.buffers.len();
    let mut temp_stride = vec![0u32; buffer_count];
    let mut temp_start = vec![0u32; buffer_count];

    let sizes: Vec<u32> = geometry
        .attributes
        .iter()
        .map(|(name, attribute)| {
            let size = attribute
                .size
                .or_else(|| program.attribute(name).map(|a| a.size))
                .unwrap_or_else(|| {
                    tracing::warn!(
                        "geometry attribute '{}' size cannot be determined (the program does not declare it)",
                        name
                    );
                    0
                });
            temp_stride[attribute.buffer] += size * attribute.data_type.size();
            size
        })
        .collect();

    let mut buffers: SmallVec<[ResolvedBuffer; 2]> = SmallVec::new();
    for ((name, attribute), size) in geometry.attributes.iter().zip(sizes) {
        let own = size * attribute.data_type.size();
        let stride = match attribute.stride {
            Some(0) => own,
            Some(stride) => stride,
            None => temp_stride[attribute.buffer],
        };
        let start = attribute.start.unwrap_or_else(|| {
            let start = temp_start[attribute.buffer];
            temp_start[attribute.buffer] += own;
            start
        });

        let Some(declared) = program.attribute(name) else {
            continue;
        };

        let slot = match buffers.iter().position(|b| b.buffer == attribute.buffer) {
            Some(slot) => slot,
            None => {
                buffers.push(ResolvedBuffer {
                    buffer: attribute.buffer,
                    stride,
                    instance: attribute.instance,
                    attributes: SmallVec::new(),
                });
                buffers.len() - 1
            }
        };
        let resolved = &mut buffers[slot];
        if resolved.stride != stride {
            tracing::warn!(
                "attribute '{}' stride {} differs from buffer stride {}",
                name,
                stride,
                resolved.stride
            );
        }
        resolved.attributes.push(VertexAttribute {
            location: declared.location,
            format: VertexFormat {
                data_type: attribute.data_type,
                size,
                normalized: attribute.normalized,
            },
            offset: start,
        });
    }

    let index = geometry.index_buffer().and_then(|index| {
        let format = match index.kind() {
            BufferKind::Index(format) => format,
            _ => IndexFormat::U16,
        };
        geometry
            .buffers
            .iter()
            .position(|b| b == index)
            .map(|slot| (slot, format))
    });

    ResolvedLayout {
        signature,
        buffers,
        index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};
    use tessera_core::{Attribute, DataType};

    fn program() -> Program {
        Program::builder("mesh", "mesh source")
            .attribute("aVertexPosition", 0, 2, DataType::F32)
            .attribute("aTextureCoord", 1, 2, DataType::F32)
            .build()
    }

    fn interleaved() -> Geometry {
        let vertices = Buffer::vertices(&[0.0; 16], false);
        let indices = Buffer::indices_u16(&[0, 1, 2, 0, 2, 3], true);
        let mut geometry = Geometry::new();
        geometry
            .add_attribute("aVertexPosition", &vertices, Attribute::new(0, 2))
            .add_attribute("aTextureCoord", &vertices, Attribute::new(0, 2))
            .add_index(&indices);
        geometry
    }

    #[test]
    fn missing_attribute_is_rejected() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();
        let mut geometry = Geometry::new();
        geometry.add_attribute(
            "aVertexPosition",
            &Buffer::vertices(&[0.0; 8], false),
            Attribute::new(0, 2),
        );

        let err = system.bind(&mut backend, &geometry, &program()).unwrap_err();
        assert_eq!(err, RendererError::MissingAttribute("aTextureCoord".to_string()));
    }

    #[test]
    fn interleaved_layout_resolves_stride_and_offsets() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();

        system.bind(&mut backend, &interleaved(), &program()).unwrap();

        let layout = backend
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::VertexLayout(layout) => Some(layout.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(layout.buffers.len(), 1);
        assert_eq!(layout.buffers[0].stride, 16);
        let offsets: Vec<u32> = layout.buffers[0].attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 8]);
        assert_eq!(layout.index.map(|(_, f)| f), Some(IndexFormat::U16));
    }

    #[test]
    fn attribute_size_comes_from_program() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();
        let vertices = Buffer::vertices(&[0.0; 16], false);
        let mut geometry = Geometry::new();
        let unsized_attribute = Attribute {
            size: None,
            ..Attribute::new(0, 0)
        };
        geometry
            .add_attribute("aVertexPosition", &vertices, unsized_attribute)
            .add_attribute("aTextureCoord", &vertices, Attribute::new(0, 2));

        system.bind(&mut backend, &geometry, &program()).unwrap();

        let layout = backend
            .commands()
            .iter()
            .find_map(|c| match c {
                Command::VertexLayout(layout) => Some(layout.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(layout.buffers[0].stride, 16);
        assert_eq!(layout.buffers[0].attributes[0].format.size, 2);
        assert_eq!(layout.buffers[0].attributes[1].offset, 8);
    }

    #[test]
    fn buffers_upload_only_when_changed() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();
        let geometry = interleaved();
        let program = program();

        system.bind(&mut backend, &geometry, &program).unwrap();
        system.bind(&mut backend, &geometry, &program).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Command::UploadBuffer { .. })), 2);

        geometry.buffers[0].update_with(|data| data.truncate(32));
        backend.clear_commands();
        system.bind(&mut backend, &geometry, &program).unwrap();
        assert_eq!(
            backend.commands(),
            &[Command::UploadBuffer {
                buffer: system.buffer_handle(&geometry.buffers[0]).unwrap(),
                len: 32,
                mode: BufferUpload::Sub,
            }]
        );
    }

    #[test]
    fn indexed_draw_counts_indices() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();
        let geometry = interleaved();
        system.bind(&mut backend, &geometry, &program()).unwrap();

        system.draw(&mut backend, &geometry, DrawMode::Triangles, None, 0, None);

        let draw = backend.draws()[0];
        assert_eq!(draw.count, 6);
        assert_eq!(draw.index, Some(IndexFormat::U16));
    }

    #[test]
    fn disposed_buffer_is_deleted() {
        let mut backend = RecordingBackend::default();
        let mut system = GeometrySystem::new();
        let geometry = interleaved();
        system.bind(&mut backend, &geometry, &program()).unwrap();

        geometry.buffers[0].dispose();
        system.drain_disposals(&mut backend);

        assert_eq!(system.managed_buffers(), 1);
        assert_eq!(backend.live_buffers(), 1);
    }
}
