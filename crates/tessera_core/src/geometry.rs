//! CPU-side vertex/index buffers and attribute layouts

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::constants::DrawMode;
use crate::error::GeometryError;
use crate::signal::{next_uid, Signal};

/// Numeric type of one attribute component
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DataType {
    #[default]
    F32,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl DataType {
    pub fn size(self) -> u32 {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::F32 | DataType::U32 | DataType::I32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// What a buffer is bound as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index(IndexFormat),
    Uniform,
}

struct BufferInner {
    uid: u64,
    data: RefCell<Vec<u8>>,
    kind: Cell<BufferKind>,
    is_static: bool,
    update_id: Cell<u32>,
    on_dispose: Signal<u64>,
}

/// Shared byte buffer with a version counter
///
/// GPU systems re-upload when the version differs from what they sent last.
#[derive(Clone)]
pub struct Buffer(Rc<BufferInner>);

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("uid", &self.0.uid)
            .field("len", &self.0.data.borrow().len())
            .field("kind", &self.0.kind.get())
            .field("update_id", &self.0.update_id.get())
            .finish()
    }
}

impl Buffer {
    pub fn new(data: Vec<u8>, kind: BufferKind, is_static: bool) -> Self {
        Self(Rc::new(BufferInner {
            uid: next_uid(),
            data: RefCell::new(data),
            kind: Cell::new(kind),
            is_static,
            update_id: Cell::new(0),
            on_dispose: Signal::new(),
        }))
    }

    pub fn vertices(data: &[f32], is_static: bool) -> Self {
        Self::new(bytemuck::cast_slice(data).to_vec(), BufferKind::Vertex, is_static)
    }

    pub fn indices_u16(data: &[u16], is_static: bool) -> Self {
        Self::new(
            bytemuck::cast_slice(data).to_vec(),
            BufferKind::Index(IndexFormat::U16),
            is_static,
        )
    }

    pub fn indices_u32(data: &[u32], is_static: bool) -> Self {
        Self::new(
            bytemuck::cast_slice(data).to_vec(),
            BufferKind::Index(IndexFormat::U32),
            is_static,
        )
    }

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn kind(&self) -> BufferKind {
        self.0.kind.get()
    }

    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    pub fn update_id(&self) -> u32 {
        self.0.update_id.get()
    }

    pub fn data(&self) -> Ref<'_, Vec<u8>> {
        self.0.data.borrow()
    }

    pub fn len(&self) -> usize {
        self.0.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.data.borrow().is_empty()
    }

    pub fn on_dispose(&self) -> &Signal<u64> {
        &self.0.on_dispose
    }

    /// Replace contents and bump the version
    pub fn update(&self, data: Vec<u8>) {
        *self.0.data.borrow_mut() = data;
        self.touch();
    }

    /// Edit contents in place and bump the version
    pub fn update_with<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        let out = f(&mut self.0.data.borrow_mut());
        self.touch();
        out
    }

    /// Bump the version without changing contents
    pub fn touch(&self) {
        self.0.update_id.set(self.0.update_id.get().wrapping_add(1));
    }

    fn set_kind(&self, kind: BufferKind) {
        self.0.kind.set(kind);
    }

    /// Release GPU copies; the buffer stays usable
    pub fn dispose(&self) {
        self.0.on_dispose.emit(&self.0.uid);
    }

    /// Release GPU copies and drop contents
    pub fn destroy(&self) {
        self.dispose();
        self.0.data.borrow_mut().clear();
    }
}

/// Where one shader input comes from
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Attribute {
    /// Index into the geometry's buffer list
    pub buffer: usize,
    /// Components; `None` is resolved from the shader
    pub size: Option<u32>,
    pub normalized: bool,
    pub data_type: DataType,
    /// Bytes between vertices; `None` is computed from the layout
    pub stride: Option<u32>,
    /// Byte offset of the first component; `None` is computed from the layout
    pub start: Option<u32>,
    pub instance: bool,
}

impl Attribute {
    pub fn new(buffer: usize, size: u32) -> Self {
        Self {
            buffer,
            size: Some(size),
            normalized: false,
            data_type: DataType::F32,
            stride: None,
            start: None,
            instance: false,
        }
    }

    pub fn with_type(mut self, data_type: DataType, normalized: bool) -> Self {
        self.data_type = data_type;
        self.normalized = normalized;
        self
    }

    pub fn with_layout(mut self, stride: u32, start: u32) -> Self {
        self.stride = Some(stride);
        self.start = Some(start);
        self
    }

    /// Bytes one vertex of this attribute occupies, if the size is known
    pub fn byte_size(&self) -> Option<u32> {
        self.size.map(|size| size * self.data_type.size())
    }
}

/// Buffers plus the attribute map describing how to read them
pub struct Geometry {
    uid: u64,
    pub buffers: Vec<Buffer>,
    index_buffer: Option<usize>,
    pub attributes: IndexMap<String, Attribute>,
    pub draw_mode: DrawMode,
    pub instanced: bool,
    pub instance_count: u32,
    on_dispose: Signal<u64>,
}

impl fmt::Debug for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geometry")
            .field("uid", &self.uid)
            .field("buffers", &self.buffers)
            .field("index_buffer", &self.index_buffer)
            .field("attributes", &self.attributes)
            .finish()
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    pub fn new() -> Self {
        Self {
            uid: next_uid(),
            buffers: Vec::new(),
            index_buffer: None,
            attributes: IndexMap::new(),
            draw_mode: DrawMode::Triangles,
            instanced: false,
            instance_count: 1,
            on_dispose: Signal::new(),
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn on_dispose(&self) -> &Signal<u64> {
        &self.on_dispose
    }

    fn buffer_slot(&mut self, buffer: &Buffer) -> usize {
        match self.buffers.iter().position(|b| b == buffer) {
            Some(index) => index,
            None => {
                self.buffers.push(buffer.clone());
                self.buffers.len() - 1
            }
        }
    }

    /// Read attribute `name` from `buffer`, adding the buffer if new
    pub fn add_attribute(&mut self, name: &str, buffer: &Buffer, mut attribute: Attribute) -> &mut Self {
        attribute.buffer = self.buffer_slot(buffer);
        if attribute.instance {
            self.instanced = true;
        }
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    /// Attach an index buffer
    pub fn add_index(&mut self, buffer: &Buffer) -> &mut Self {
        if !matches!(buffer.kind(), BufferKind::Index(_)) {
            buffer.set_kind(BufferKind::Index(IndexFormat::U16));
        }
        self.index_buffer = Some(self.buffer_slot(buffer));
        self
    }

    pub fn index_buffer(&self) -> Option<&Buffer> {
        self.index_buffer.and_then(|i| self.buffers.get(i))
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Check that every attribute points at an existing buffer
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (name, attribute) in &self.attributes {
            if attribute.buffer >= self.buffers.len() {
                return Err(GeometryError::MissingBuffer {
                    name: name.clone(),
                    index: attribute.buffer,
                });
            }
        }
        Ok(())
    }

    /// Vertex count implied by the first attribute's buffer
    pub fn vertex_count(&self) -> usize {
        let Some(attribute) = self.attributes.values().next() else {
            return 0;
        };
        let Some(buffer) = self.buffers.get(attribute.buffer) else {
            return 0;
        };
        let stride = match attribute.stride {
            Some(stride) if stride > 0 => stride,
            _ => self.buffer_stride(attribute.buffer).unwrap_or(0),
        };
        if stride == 0 {
            return 0;
        }
        buffer.len() / stride as usize
    }

    /// Bytes per vertex of all attributes reading from buffer `index`
    pub fn buffer_stride(&self, index: usize) -> Option<u32> {
        let mut stride = 0;
        for attribute in self.attributes.values().filter(|a| a.buffer == index) {
            stride += attribute.byte_size()?;
        }
        Some(stride)
    }

    /// Copy every vertex buffer into one interleaved buffer
    ///
    /// Attributes must have known sizes and buffers must hold whole 4-byte words.
    pub fn interleave(&mut self) -> Result<&mut Self, GeometryError> {
        let vertex_buffers = self.buffers.len() - usize::from(self.index_buffer.is_some());
        if vertex_buffers <= 1 {
            return Ok(self);
        }

        let mut arrays: Vec<Vec<u32>> = Vec::with_capacity(self.attributes.len());
        let mut sizes = Vec::with_capacity(self.attributes.len());
        for (name, attribute) in &self.attributes {
            let bytes = attribute
                .byte_size()
                .ok_or_else(|| GeometryError::UnknownSize(name.clone()))?;
            let buffer = self.buffers.get(attribute.buffer).ok_or_else(|| {
                GeometryError::MissingBuffer {
                    name: name.clone(),
                    index: attribute.buffer,
                }
            })?;
            let data = buffer.data();
            if bytes % 4 != 0 || data.len() % 4 != 0 {
                return Err(GeometryError::Incompatible(format!(
                    "attribute '{}' is not 4-byte aligned",
                    name
                )));
            }
            arrays.push(
                data.chunks_exact(4)
                    .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
                    .collect(),
            );
            sizes.push((bytes / 4) as usize);
        }

        let stride: usize = sizes.iter().sum();
        let total: usize = arrays.iter().map(Vec::len).sum();
        let mut out = vec![0u32; total];
        let mut little_offset = 0;
        for (array, &size) in arrays.iter().zip(&sizes) {
            for (j, word) in array.iter().enumerate() {
                out[(j / size) * stride + little_offset + j % size] = *word;
            }
            little_offset += size;
        }

        let mut start = 0;
        for attribute in self.attributes.values_mut() {
            attribute.buffer = 0;
            attribute.stride = Some(stride as u32 * 4);
            attribute.start = Some(start);
            start += attribute.byte_size().unwrap_or(0);
        }

        let index = self.index_buffer.and_then(|i| self.buffers.get(i).cloned());
        for (i, buffer) in self.buffers.iter().enumerate() {
            if Some(i) != self.index_buffer {
                buffer.destroy();
            }
        }

        self.buffers = vec![Buffer::new(
            bytemuck::cast_slice(&out).to_vec(),
            BufferKind::Vertex,
            false,
        )];
        self.index_buffer = index.map(|index| {
            self.buffers.push(index);
            1
        });
        Ok(self)
    }

    /// Concatenate geometries with identical layouts into one
    ///
    /// Index values are offset by the vertex count of the geometries before them.
    pub fn merge(geometries: &[&Geometry]) -> Result<Geometry, GeometryError> {
        let first = geometries.first().ok_or(GeometryError::Empty)?;

        for geometry in &geometries[1..] {
            if geometry.buffers.len() != first.buffers.len()
                || geometry.index_buffer != first.index_buffer
                || geometry.attributes != first.attributes
            {
                return Err(GeometryError::Incompatible(
                    "buffer layouts differ".to_string(),
                ));
            }
        }

        let mut merged: Vec<Vec<u8>> = vec![Vec::new(); first.buffers.len()];
        for geometry in geometries {
            for (out, buffer) in merged.iter_mut().zip(&geometry.buffers) {
                out.extend_from_slice(&buffer.data());
            }
        }

        if let Some(index_slot) = first.index_buffer {
            let format = match first.buffers[index_slot].kind() {
                BufferKind::Index(format) => format,
                _ => IndexFormat::U16,
            };
            let counted = (0..first.buffers.len())
                .find(|&i| i != index_slot)
                .ok_or_else(|| GeometryError::Incompatible("no vertex buffer".to_string()))?;
            let stride = first
                .buffer_stride(counted)
                .filter(|s| *s > 0)
                .ok_or_else(|| GeometryError::UnknownSize("stride".to_string()))?
                as usize;

            let out = &mut merged[index_slot];
            let mut vertex_offset = 0u32;
            let mut cursor = 0usize;
            for geometry in geometries {
                let index_len = geometry.buffers[index_slot].len();
                let slice = &mut out[cursor..cursor + index_len];
                match format {
                    IndexFormat::U16 => {
                        for chunk in slice.chunks_exact_mut(2) {
                            let v = u16::from_ne_bytes([chunk[0], chunk[1]])
                                .wrapping_add(vertex_offset as u16);
                            chunk.copy_from_slice(&v.to_ne_bytes());
                        }
                    }
                    IndexFormat::U32 => {
                        for chunk in slice.chunks_exact_mut(4) {
                            let v = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                                .wrapping_add(vertex_offset);
                            chunk.copy_from_slice(&v.to_ne_bytes());
                        }
                    }
                }
                vertex_offset += (geometry.buffers[counted].len() / stride) as u32;
                cursor += index_len;
            }
        }

        let mut out = Geometry::new();
        out.buffers = merged
            .into_iter()
            .zip(&first.buffers)
            .map(|(data, template)| Buffer::new(data, template.kind(), template.is_static()))
            .collect();
        out.index_buffer = first.index_buffer;
        out.attributes = first.attributes.clone();
        out.draw_mode = first.draw_mode;
        Ok(out)
    }

    /// Release GPU copies of the layout; buffers are untouched
    pub fn dispose(&self) {
        self.on_dispose.emit(&self.uid);
    }

    /// Release GPU copies of the layout and destroy every buffer
    pub fn destroy(self) {
        self.dispose();
        for buffer in &self.buffers {
            buffer.destroy();
        }
    }
}
