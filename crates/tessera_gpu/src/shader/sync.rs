//! Program cache and uniform syncing
//!
//! For each program and uniform group shape a [`SyncPlan`] is built once: a
//! list of operations keyed by uniform type. Syncing walks the plan and only
//! calls the backend for values that differ from what was last uploaded.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::{Program, ProgramBuilder, Shader, Uniform, UniformGroup, UniformType, UniformValue};
use crate::backend::{Backend, ProgramHandle};
use crate::error::Result;
use crate::texture_system::TextureSystem;

#[derive(Clone, Debug, PartialEq)]
enum SyncOp {
    /// Recurse into a nested group
    Group(String),
    /// Bind a texture to the next unit and point the sampler at it
    Sampler(String),
    /// Upload a plain value
    Value(String),
}

/// Operations syncing one group shape into one program
#[derive(Debug, Default)]
struct SyncPlan {
    ops: Vec<SyncOp>,
}

impl SyncPlan {
    fn build(program: &Program, group: &UniformGroup) -> Self {
        let ops = group
            .entries()
            .iter()
            .filter_map(|(name, entry)| match entry {
                Uniform::Group(_) => Some(SyncOp::Group(name.clone())),
                _ => match program.uniform(name)? {
                    UniformType::Sampler => Some(SyncOp::Sampler(name.clone())),
                    _ => Some(SyncOp::Value(name.clone())),
                },
            })
            .collect();
        Self { ops }
    }
}

/// Per-context state of one program
#[derive(Debug)]
struct GlProgram {
    handle: ProgramHandle,
    /// Last values uploaded, by uniform name
    uniform_data: FxHashMap<String, UniformValue>,
    /// Dirty id of each group when last synced, by group uid
    uniform_dirty_groups: FxHashMap<u64, u32>,
    /// Plans by group signature
    plans: FxHashMap<u64, Rc<SyncPlan>>,
}

pub struct ShaderSystem {
    /// Programs by source key, shared between shaders with identical source
    cache: FxHashMap<u64, Program>,
    programs: FxHashMap<u64, GlProgram>,
    current: Option<Program>,
    /// Renderer-wide uniforms (projection) synced into every program
    globals: UniformGroup,
}

impl Default for ShaderSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderSystem {
    pub fn new() -> Self {
        Self {
            cache: FxHashMap::default(),
            programs: FxHashMap::default(),
            current: None,
            globals: UniformGroup::new(true),
        }
    }

    /// The program for `builder`'s source, creating it the first time
    pub fn program(&mut self, builder: ProgramBuilder) -> Program {
        self.cache
            .entry(builder.source_key())
            .or_insert_with(|| builder.build())
            .clone()
    }

    pub fn cached_programs(&self) -> usize {
        self.cache.len()
    }

    pub fn globals(&self) -> &UniformGroup {
        &self.globals
    }

    pub fn current(&self) -> Option<&Program> {
        self.current.as_ref()
    }

    pub fn program_handle(&self, program: &Program) -> Option<ProgramHandle> {
        self.programs.get(&program.uid()).map(|p| p.handle)
    }

    /// Make `shader` current and, unless `dont_sync`, upload its uniforms
    pub fn bind(
        &mut self,
        backend: &mut dyn Backend,
        textures: &mut TextureSystem,
        shader: &Shader,
        dont_sync: bool,
    ) -> Result<ProgramHandle> {
        let program = &shader.program;
        let handle = match self.programs.get(&program.uid()) {
            Some(gl) => gl.handle,
            None => self.generate_program(backend, program)?,
        };

        if self.current.as_ref() != Some(program) {
            backend.use_program(handle);
            self.current = Some(program.clone());
        }

        if !dont_sync {
            let mut texture_count = 0;
            self.sync_uniform_group(backend, textures, program, &shader.uniforms, &mut texture_count);
            let globals = self.globals.clone();
            self.sync_uniform_group(backend, textures, program, &globals, &mut texture_count);
        }
        Ok(handle)
    }

    /// Push changed globals into the current program
    pub fn sync_globals(&mut self, backend: &mut dyn Backend, textures: &mut TextureSystem) {
        if let Some(program) = self.current.clone() {
            let globals = self.globals.clone();
            let mut texture_count = 0;
            self.sync_uniform_group(backend, textures, &program, &globals, &mut texture_count);
        }
    }

    fn generate_program(&mut self, backend: &mut dyn Backend, program: &Program) -> Result<ProgramHandle> {
        let handle = backend.create_program(program)?;
        tracing::debug!("compiled program '{}' ({})", program.name(), program.uid());
        self.programs.insert(
            program.uid(),
            GlProgram {
                handle,
                uniform_data: FxHashMap::default(),
                uniform_dirty_groups: FxHashMap::default(),
                plans: FxHashMap::default(),
            },
        );
        Ok(handle)
    }

    /// Sync `group` unless it is static and unchanged since the last sync
    pub fn sync_uniform_group(
        &mut self,
        backend: &mut dyn Backend,
        textures: &mut TextureSystem,
        program: &Program,
        group: &UniformGroup,
        texture_count: &mut u32,
    ) {
        let Some(gl) = self.programs.get_mut(&program.uid()) else {
            return;
        };
        let synced = gl.uniform_dirty_groups.get(&group.uid()).copied();
        if group.is_static() && synced == Some(group.dirty_id()) {
            return;
        }
        gl.uniform_dirty_groups.insert(group.uid(), group.dirty_id());
        self.sync_uniforms(backend, textures, program, group, texture_count);
    }

    fn sync_uniforms(
        &mut self,
        backend: &mut dyn Backend,
        textures: &mut TextureSystem,
        program: &Program,
        group: &UniformGroup,
        texture_count: &mut u32,
    ) {
        let Some(gl) = self.programs.get_mut(&program.uid()) else {
            return;
        };
        let plan = gl
            .plans
            .entry(group.signature())
            .or_insert_with(|| Rc::new(SyncPlan::build(program, group)))
            .clone();

        for op in &plan.ops {
            match op {
                SyncOp::Group(name) => {
                    if let Some(Uniform::Group(nested)) = group.get(name) {
                        self.sync_uniform_group(backend, textures, program, &nested, texture_count);
                    }
                }
                SyncOp::Sampler(name) => {
                    let unit = *texture_count;
                    *texture_count += 1;
                    let base = match group.get(name) {
                        Some(Uniform::Texture(base)) => base,
                        _ => None,
                    };
                    textures.bind(backend, base.as_ref(), unit);
                    self.upload(backend, program, name, UniformValue::Int(unit as i32));
                }
                SyncOp::Value(name) => {
                    if let Some(value) = group.value(name) {
                        self.upload(backend, program, name, value);
                    }
                }
            }
        }
    }

    fn upload(&mut self, backend: &mut dyn Backend, program: &Program, name: &str, value: UniformValue) {
        let Some(gl) = self.programs.get_mut(&program.uid()) else {
            return;
        };
        if gl.uniform_data.get(name) == Some(&value) {
            return;
        }
        backend.set_uniform(gl.handle, name, &value);
        gl.uniform_data.insert(name.to_string(), value);
    }

    /// Release the native program of `program`
    pub fn destroy_program(&mut self, backend: &mut dyn Backend, program: &Program) {
        if let Some(gl) = self.programs.remove(&program.uid()) {
            backend.delete_program(gl.handle);
        }
        if self.current.as_ref() == Some(program) {
            self.current = None;
        }
    }

    /// Forget the current program so the next bind re-selects it
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn context_change(&mut self) {
        self.programs.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Command, RecordingBackend};
    use tessera_core::{BaseTexture, Matrix};

    fn shader(system: &mut ShaderSystem, uniforms: UniformGroup) -> Shader {
        let program = system.program(
            Program::builder("test", "test source")
                .uniform("alpha", UniformType::Float)
                .uniform("projectionMatrix", UniformType::Mat3)
                .sampler("uSampler"),
        );
        Shader::new(program, uniforms)
    }

    fn uniform_sets(backend: &RecordingBackend) -> Vec<String> {
        backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::SetUniform { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn identical_source_shares_program() {
        let mut system = ShaderSystem::new();
        let a = system.program(Program::builder("a", "same"));
        let b = system.program(Program::builder("b", "same"));

        assert_eq!(a, b);
        assert_eq!(system.cached_programs(), 1);
    }

    #[test]
    fn unchanged_values_are_not_resent() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = ShaderSystem::new();
        let shader = shader(&mut system, UniformGroup::new(false).with("alpha", 1.0));

        system.bind(&mut backend, &mut textures, &shader, false).unwrap();
        assert_eq!(uniform_sets(&backend), vec!["alpha".to_string()]);

        backend.clear_commands();
        system.bind(&mut backend, &mut textures, &shader, false).unwrap();
        assert!(uniform_sets(&backend).is_empty());

        shader.uniforms.set("alpha", 0.5);
        system.bind(&mut backend, &mut textures, &shader, false).unwrap();
        assert_eq!(uniform_sets(&backend), vec!["alpha".to_string()]);
    }

    #[test]
    fn static_groups_sync_on_dirty_id_only() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = ShaderSystem::new();
        let shader = shader(&mut system, UniformGroup::new(true));
        system.globals().set("projectionMatrix", Matrix::IDENTITY);

        system.bind(&mut backend, &mut textures, &shader, false).unwrap();
        assert_eq!(uniform_sets(&backend), vec!["projectionMatrix".to_string()]);

        backend.clear_commands();
        system.globals().set("projectionMatrix", Matrix::scaling(2.0, 2.0));
        system.sync_globals(&mut backend, &mut textures);
        assert_eq!(uniform_sets(&backend), vec!["projectionMatrix".to_string()]);
    }

    #[test]
    fn samplers_take_sequential_units() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = ShaderSystem::new();
        let base = BaseTexture::from_buffer(vec![0; 16], 2, 2, Default::default()).unwrap();
        let shader = shader(&mut system, UniformGroup::new(false).with("uSampler", base.clone()));

        system.bind(&mut backend, &mut textures, &shader, false).unwrap();

        assert_eq!(textures.bound_textures()[0].map(|b| b.uid), Some(base.uid()));
        assert!(backend.commands().iter().any(|c| matches!(
            c,
            Command::SetUniform { name, value: UniformValue::Int(0), .. } if name == "uSampler"
        )));
    }

    #[test]
    fn nested_groups_are_followed() {
        let mut backend = RecordingBackend::default();
        let mut textures = TextureSystem::new(4, 16);
        let mut system = ShaderSystem::new();
        let inner = UniformGroup::new(false).with("alpha", 0.25);
        let shader = shader(&mut system, UniformGroup::new(false).with("inner", inner));

        system.bind(&mut backend, &mut textures, &shader, false).unwrap();

        assert_eq!(uniform_sets(&backend), vec!["alpha".to_string()]);
    }
}
