//! Programs, uniform groups and shaders
//!
//! A [`Program`] is compiled source plus the reflection data the systems need:
//! which attributes it reads (for geometry compatibility and attribute size
//! resolution), which uniforms it declares and how many texture units its
//! samplers occupy. Uniform values live in shared, versioned
//! [`UniformGroup`]s that can nest; [`ShaderSystem`] syncs them to the
//! backend.

mod sync;

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use tessera_core::{next_uid, BaseTexture, DataType, Matrix, Texture};

pub use sync::ShaderSystem;

// ─────────────────────────────────────────────────────────────────────────────
// Program
// ─────────────────────────────────────────────────────────────────────────────

/// Vertex input declared by a program
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramAttribute {
    pub location: u32,
    /// Components per vertex
    pub size: u32,
    pub data_type: DataType,
}

/// Type of a declared uniform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    UInt,
    Bool,
    Mat3,
    Mat4,
    /// Texture sampler; its value is a texture unit
    Sampler,
}

impl UniformType {
    /// `(size, alignment)` in bytes inside a std140-style uniform block
    pub fn block_layout(self) -> (u32, u32) {
        match self {
            UniformType::Float
            | UniformType::Int
            | UniformType::UInt
            | UniformType::Bool
            | UniformType::Sampler => (4, 4),
            UniformType::Vec2 | UniformType::IVec2 => (8, 8),
            UniformType::Vec3 | UniformType::IVec3 => (12, 16),
            UniformType::Vec4 | UniformType::IVec4 => (16, 16),
            UniformType::Mat3 => (48, 16),
            UniformType::Mat4 => (64, 16),
        }
    }
}

struct ProgramInner {
    uid: u64,
    name: String,
    source: String,
    attributes: IndexMap<String, ProgramAttribute>,
    uniforms: IndexMap<String, UniformType>,
    texture_units: u32,
}

/// Shader source with reflection data
///
/// Cheap to clone; clones are the same program.
#[derive(Clone)]
pub struct Program(Rc<ProgramInner>);

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("uid", &self.0.uid)
            .field("name", &self.0.name)
            .field("attributes", &self.0.attributes.len())
            .field("uniforms", &self.0.uniforms.len())
            .field("texture_units", &self.0.texture_units)
            .finish()
    }
}

impl Program {
    pub fn builder(name: &str, source: impl Into<String>) -> ProgramBuilder {
        ProgramBuilder {
            name: name.to_string(),
            source: source.into(),
            attributes: IndexMap::new(),
            uniforms: IndexMap::new(),
            texture_units: 0,
        }
    }

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn source(&self) -> &str {
        &self.0.source
    }

    /// Key under which programs with identical source are shared
    pub fn source_key(&self) -> u64 {
        source_key(&self.0.source)
    }

    pub fn attributes(&self) -> &IndexMap<String, ProgramAttribute> {
        &self.0.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&ProgramAttribute> {
        self.0.attributes.get(name)
    }

    pub fn uniforms(&self) -> &IndexMap<String, UniformType> {
        &self.0.uniforms
    }

    pub fn uniform(&self, name: &str) -> Option<UniformType> {
        self.0.uniforms.get(name).copied()
    }

    /// Texture units this program's samplers span
    pub fn texture_units(&self) -> u32 {
        self.0.texture_units
    }
}

pub(crate) fn source_key(source: &str) -> u64 {
    let mut hasher = FxHasher::default();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Describes a [`Program`] before it is created
#[derive(Clone, Debug)]
pub struct ProgramBuilder {
    name: String,
    source: String,
    attributes: IndexMap<String, ProgramAttribute>,
    uniforms: IndexMap<String, UniformType>,
    texture_units: u32,
}

impl ProgramBuilder {
    pub fn attribute(mut self, name: &str, location: u32, size: u32, data_type: DataType) -> Self {
        self.attributes.insert(
            name.to_string(),
            ProgramAttribute {
                location,
                size,
                data_type,
            },
        );
        self
    }

    pub fn uniform(mut self, name: &str, ty: UniformType) -> Self {
        self.uniforms.insert(name.to_string(), ty);
        self
    }

    /// Declare a sampler; it occupies the next texture unit
    pub fn sampler(mut self, name: &str) -> Self {
        self.uniforms.insert(name.to_string(), UniformType::Sampler);
        self.texture_units += 1;
        self
    }

    /// Declare the number of texture units sampled, for programs that index
    /// a sampler array
    pub fn texture_units(mut self, units: u32) -> Self {
        self.texture_units = self.texture_units.max(units);
        self
    }

    pub fn source_key(&self) -> u64 {
        source_key(&self.source)
    }

    pub fn build(self) -> Program {
        Program(Rc::new(ProgramInner {
            uid: next_uid(),
            name: self.name,
            source: self.source,
            attributes: self.attributes,
            uniforms: self.uniforms,
            texture_units: self.texture_units,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Uniform values
// ─────────────────────────────────────────────────────────────────────────────

/// A value uploaded to one uniform
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Int(i32),
    IVec2([i32; 2]),
    IVec3([i32; 3]),
    IVec4([i32; 4]),
    UInt(u32),
    Bool(bool),
    /// Column-major
    Mat3([f32; 9]),
    /// Column-major
    Mat4([f32; 16]),
}

impl UniformValue {
    pub fn uniform_type(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::IVec2(_) => UniformType::IVec2,
            UniformValue::IVec3(_) => UniformType::IVec3,
            UniformValue::IVec4(_) => UniformType::IVec4,
            UniformValue::UInt(_) => UniformType::UInt,
            UniformValue::Bool(_) => UniformType::Bool,
            UniformValue::Mat3(_) => UniformType::Mat3,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    /// Write the value into a uniform block at its std140 layout
    ///
    /// `out` must hold at least [`UniformType::block_layout`] bytes.
    pub fn write_block(&self, out: &mut [u8]) {
        fn put<T: bytemuck::Pod>(out: &mut [u8], at: usize, values: &[T]) {
            let bytes: &[u8] = bytemuck::cast_slice(values);
            if let Some(dst) = out.get_mut(at..at + bytes.len()) {
                dst.copy_from_slice(bytes);
            }
        }

        match self {
            UniformValue::Float(v) => put(out, 0, &[*v]),
            UniformValue::Vec2(v) => put(out, 0, v),
            UniformValue::Vec3(v) => put(out, 0, v),
            UniformValue::Vec4(v) => put(out, 0, v),
            UniformValue::Int(v) => put(out, 0, &[*v]),
            UniformValue::IVec2(v) => put(out, 0, v),
            UniformValue::IVec3(v) => put(out, 0, v),
            UniformValue::IVec4(v) => put(out, 0, v),
            UniformValue::UInt(v) => put(out, 0, &[*v]),
            UniformValue::Bool(v) => put(out, 0, &[*v as u32]),
            // mat3 columns are padded to vec4
            UniformValue::Mat3(m) => {
                for col in 0..3 {
                    put(out, col * 16, &m[col * 3..col * 3 + 3]);
                }
            }
            UniformValue::Mat4(m) => put(out, 0, m),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<[f32; 2]> for UniformValue {
    fn from(v: [f32; 2]) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<Matrix> for UniformValue {
    fn from(m: Matrix) -> Self {
        UniformValue::Mat3(m.to_array(true))
    }
}

/// One entry of a [`UniformGroup`]
#[derive(Clone, Debug, PartialEq)]
pub enum Uniform {
    Value(UniformValue),
    /// Sampler input; `None` binds the empty texture
    Texture(Option<BaseTexture>),
    /// Nested group, synced with its own dirty tracking
    Group(UniformGroup),
}

macro_rules! uniform_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Uniform {
                fn from(v: $ty) -> Self {
                    Uniform::Value(v.into())
                }
            }
        )*
    };
}

uniform_from_value!(UniformValue, f32, [f32; 2], [f32; 3], [f32; 4], i32, bool, Matrix);

impl From<BaseTexture> for Uniform {
    fn from(base: BaseTexture) -> Self {
        Uniform::Texture(Some(base))
    }
}

impl From<&Texture> for Uniform {
    fn from(texture: &Texture) -> Self {
        Uniform::Texture(Some(texture.base_texture().clone()))
    }
}

impl From<UniformGroup> for Uniform {
    fn from(group: UniformGroup) -> Self {
        Uniform::Group(group)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UniformGroup
// ─────────────────────────────────────────────────────────────────────────────

struct GroupInner {
    uid: u64,
    is_static: bool,
    entries: RefCell<IndexMap<String, Uniform>>,
    dirty_id: Cell<u32>,
}

/// Shared, versioned set of uniforms
///
/// Static groups are only re-synced when their `dirty_id` changes; call
/// [`UniformGroup::update`] after mutating values through other handles.
/// [`UniformGroup::set`] bumps the version itself.
#[derive(Clone)]
pub struct UniformGroup(Rc<GroupInner>);

impl PartialEq for UniformGroup {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for UniformGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformGroup")
            .field("uid", &self.0.uid)
            .field("static", &self.0.is_static)
            .field("entries", &self.0.entries.borrow().keys().collect::<Vec<_>>())
            .field("dirty_id", &self.0.dirty_id.get())
            .finish()
    }
}

impl UniformGroup {
    pub fn new(is_static: bool) -> Self {
        Self(Rc::new(GroupInner {
            uid: next_uid(),
            is_static,
            entries: RefCell::new(IndexMap::new()),
            dirty_id: Cell::new(0),
        }))
    }

    /// Builder-style insert for construction
    pub fn with(self, name: &str, value: impl Into<Uniform>) -> Self {
        self.0
            .entries
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self
    }

    pub fn uid(&self) -> u64 {
        self.0.uid
    }

    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    pub fn dirty_id(&self) -> u32 {
        self.0.dirty_id.get()
    }

    pub fn update(&self) {
        self.0.dirty_id.set(self.0.dirty_id.get().wrapping_add(1));
    }

    pub fn set(&self, name: &str, value: impl Into<Uniform>) {
        self.0
            .entries
            .borrow_mut()
            .insert(name.to_string(), value.into());
        self.update();
    }

    pub fn get(&self, name: &str) -> Option<Uniform> {
        self.0.entries.borrow().get(name).cloned()
    }

    pub fn value(&self, name: &str) -> Option<UniformValue> {
        match self.0.entries.borrow().get(name) {
            Some(Uniform::Value(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn entries(&self) -> Ref<'_, IndexMap<String, Uniform>> {
        self.0.entries.borrow()
    }

    /// Hash of entry names and kinds; groups with the same shape share a sync plan
    pub fn signature(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for (name, entry) in self.0.entries.borrow().iter() {
            name.hash(&mut hasher);
            std::mem::discriminant(entry).hash(&mut hasher);
        }
        hasher.finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shader
// ─────────────────────────────────────────────────────────────────────────────

/// A program plus the uniforms it is drawn with
#[derive(Clone, Debug, PartialEq)]
pub struct Shader {
    pub program: Program,
    pub uniforms: UniformGroup,
}

impl Shader {
    pub fn new(program: Program, uniforms: UniformGroup) -> Self {
        Self { program, uniforms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_declarations_count_units() {
        let program = Program::builder("test", "src")
            .attribute("aVertexPosition", 0, 2, DataType::F32)
            .sampler("uSampler")
            .sampler("mask")
            .uniform("alpha", UniformType::Float)
            .build();

        assert_eq!(program.texture_units(), 2);
        assert_eq!(program.uniform("mask"), Some(UniformType::Sampler));
        assert_eq!(program.attribute("aVertexPosition").map(|a| a.size), Some(2));
    }

    #[test]
    fn set_bumps_dirty_id() {
        let group = UniformGroup::new(true).with("alpha", 1.0);
        assert_eq!(group.dirty_id(), 0);

        group.set("alpha", 0.5);
        assert_eq!(group.dirty_id(), 1);
        assert_eq!(group.value("alpha"), Some(UniformValue::Float(0.5)));
    }

    #[test]
    fn signature_follows_shape_not_values() {
        let a = UniformGroup::new(false).with("alpha", 1.0).with("tint", [1.0, 0.0, 0.0, 1.0]);
        let b = UniformGroup::new(false).with("alpha", 0.2).with("tint", [0.0; 4]);
        let c = UniformGroup::new(false).with("alpha", 0.2);

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.signature(), c.signature());
    }

    #[test]
    fn mat3_block_pads_columns() {
        let mut out = [0u8; 48];
        UniformValue::from(Matrix::translation(3.0, 4.0)).write_block(&mut out);
        let floats: &[f32] = bytemuck::cast_slice(&out);

        assert_eq!(&floats[0..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&floats[4..7], &[0.0, 1.0, 0.0]);
        assert_eq!(&floats[8..11], &[3.0, 4.0, 1.0]);
    }
}
