use crate::error::ScriptError;
use anyhow::{Context, Result};
use rhai::{Engine, FnAccess, AST};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tracing::debug;

pub const HOOK_SCENE_LOAD: &str = "onSceneLoad";
pub const HOOK_UPDATE: &str = "update";
pub const HOOK_EXIT: &str = "exit";
pub const HOOK_INITIAL_STATE: &str = "initial_state";

/// Method spelling that Rhai reserves as a keyword, and the logger method it maps to.
const RESERVED_METHOD: &str = "print";
const RESERVED_METHOD_TARGET: &str = "out";

/// Lifecycle hooks a behaviour actually defines. Missing hooks are skipped, not errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet {
    pub scene_load: bool,
    pub update: bool,
    pub exit: bool,
    pub initial_state: bool,
}

/// A compiled behaviour shared by every instance attached from it.
///
/// Exports are the public script functions other than the hooks. Every export takes the
/// caller-invisible context as its first parameter, so the arity recorded here is the
/// number of arguments a `callFunc` caller passes.
pub struct BehaviourDefinition {
    id: String,
    ast: AST,
    hooks: HookSet,
    exports: BTreeMap<String, BTreeSet<usize>>,
}

impl BehaviourDefinition {
    pub fn compile(engine: &Engine, id: impl Into<String>, source: &str) -> Result<Self, ScriptError> {
        let id = id.into();
        let source = rewrite_print_methods(source);
        let ast = engine
            .compile(source.as_ref())
            .map_err(|err| ScriptError::Compile { id: id.clone(), message: err.to_string() })?;
        let mut hooks = HookSet::default();
        let mut exports: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for function in ast.iter_functions() {
            let params = function.params.len();
            match (function.name, params) {
                (HOOK_SCENE_LOAD, 1) => hooks.scene_load = true,
                (HOOK_UPDATE, 2) => hooks.update = true,
                (HOOK_EXIT, 1) => hooks.exit = true,
                (HOOK_INITIAL_STATE, 0) => hooks.initial_state = true,
                _ if matches!(function.access, FnAccess::Private) => {}
                (name, params) if params >= 1 => {
                    exports.entry(name.to_string()).or_default().insert(params - 1);
                }
                _ => {}
            }
        }
        debug!(behaviour = %id, exports = exports.len(), "behaviour_compiled");
        Ok(Self { id, ast, hooks, exports })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn hooks(&self) -> HookSet {
        self.hooks
    }

    pub fn exports(&self, function: &str) -> bool {
        self.exports.contains_key(function)
    }

    /// Argument counts `function` accepts, or `None` when it is not exported.
    pub fn export_arities(&self, function: &str) -> Option<&BTreeSet<usize>> {
        self.exports.get(function)
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

/// `print` is a Rhai keyword, so `logger.print(..)` does not parse. Method calls spelled
/// `.print(` are renamed to `.out(` before compiling; string literals, comments and the
/// free-standing `print(..)` statement are left alone.
fn rewrite_print_methods(source: &str) -> Cow<'_, str> {
    let bytes = source.as_bytes();
    let mut rewritten = String::new();
    let mut copied = 0;
    let mut after_dot = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_literal(bytes, i);
                after_dot = false;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'.' => {
                after_dot = true;
                i += 1;
            }
            byte if byte.is_ascii_whitespace() => i += 1,
            byte if byte.is_ascii_alphabetic() || byte == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if after_dot && &source[start..i] == RESERVED_METHOD && next_significant(bytes, i) == Some(b'(') {
                    rewritten.push_str(&source[copied..start]);
                    rewritten.push_str(RESERVED_METHOD_TARGET);
                    copied = i;
                }
                after_dot = false;
            }
            _ => {
                after_dot = false;
                i += 1;
            }
        }
    }
    if copied == 0 {
        return Cow::Borrowed(source);
    }
    rewritten.push_str(&source[copied..]);
    Cow::Owned(rewritten)
}

/// Index just past the literal opening at `start`. Quoted strings honour backslash escapes.
fn skip_literal(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            byte if byte == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past the (possibly nested) block comment opening at `start`.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn next_significant(bytes: &[u8], from: usize) -> Option<u8> {
    bytes[from..].iter().copied().find(|byte| !byte.is_ascii_whitespace())
}

impl fmt::Debug for BehaviourDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviourDefinition")
            .field("id", &self.id)
            .field("hooks", &self.hooks)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// Compiled behaviours keyed by a stable identifier. Sources are compiled once; every
/// attach shares the same definition.
#[derive(Default)]
pub struct BehaviourRegistry {
    definitions: HashMap<String, Rc<BehaviourDefinition>>,
}

impl BehaviourRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles and stores `source` under `id`. Re-registering an id replaces the
    /// definition for future attaches; existing instances keep the one they were created with.
    pub fn register_source(
        &mut self,
        engine: &Engine,
        id: &str,
        source: &str,
    ) -> Result<Rc<BehaviourDefinition>, ScriptError> {
        let definition = Rc::new(BehaviourDefinition::compile(engine, id, source)?);
        self.definitions.insert(id.to_string(), Rc::clone(&definition));
        Ok(definition)
    }

    pub fn register_file(
        &mut self,
        engine: &Engine,
        id: &str,
        path: impl AsRef<Path>,
    ) -> Result<Rc<BehaviourDefinition>> {
        let path = path.as_ref();
        let source =
            fs::read_to_string(path).with_context(|| format!("Reading behaviour script {}", path.display()))?;
        let definition = self
            .register_source(engine, id, &source)
            .with_context(|| format!("Compiling behaviour script {}", path.display()))?;
        Ok(definition)
    }

    pub fn get(&self, id: &str) -> Result<Rc<BehaviourDefinition>, ScriptError> {
        self.definitions.get(id).cloned().ok_or_else(|| ScriptError::UnknownBehaviour(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.definitions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
