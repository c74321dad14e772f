//! The embedding surface.
//!
//! A [`Runtime`] holds everything compiled Sympl code shares: the global
//! namespace tree (reflected host assemblies plus modules loaded from
//! files), the host globals table, the symbol table, and the table of
//! canonical binders that call sites draw their shared rule caches from.

use crate::analyzer::{AnalysisScope, analyze_expr, analyze_module};
use crate::binder::{Binder, BinderKey, CallSite, make_binder};
use crate::builtinops;
use crate::evaluator::execute;
use crate::intooperation::IntoOperation;
use crate::parser::{ParseConfig, parse_expr_with_config, parse_file_with_config};
use crate::reflect::{Assembly, DefaultReflector, Reflector, TypeDescriptor};
use crate::value::{Expando, Function, Symbol, TypeModel, Value};
use crate::{Error, MAX_CALL_DEPTH, MAX_PARSE_DEPTH};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Limits and cache sizes of a [`Runtime`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub max_parse_depth: usize,
    pub max_call_depth: usize,
    /// Rules kept by each call site.
    pub site_cache_size: usize,
    /// Rules kept by each canonical binder, shared by all of its sites.
    pub binder_cache_size: usize,
    /// Extension of the files `import` looks for.
    pub file_extension: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_parse_depth: MAX_PARSE_DEPTH,
            max_call_depth: MAX_CALL_DEPTH,
            site_cache_size: 10,
            binder_cache_size: 128,
            file_extension: "sympl".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    assemblies: Vec<Assembly>,
    reflector: Option<Arc<dyn Reflector>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Reflect an assembly's types into the global namespace tree.
    pub fn assembly(mut self, assembly: Assembly) -> Self {
        self.assemblies.push(assembly);
        self
    }

    /// Replace the member lookup used by every binder.
    pub fn reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn build(self) -> Runtime {
        let rt = Runtime {
            config: self.config,
            globals: Arc::new(Expando::new("globals")),
            host_globals: Arc::new(Expando::new("host")),
            symbols: Mutex::new(HashMap::new()),
            binders: Mutex::new(HashMap::new()),
            reflector: self
                .reflector
                .unwrap_or_else(|| Arc::new(DefaultReflector)),
            loading: Mutex::new(HashSet::new()),
        };
        for assembly in &self.assemblies {
            rt.add_assembly(assembly);
        }
        rt
    }
}

#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    globals: Arc<Expando>,
    host_globals: Arc<Expando>,
    symbols: Mutex<HashMap<String, Arc<Symbol>>>,
    binders: Mutex<HashMap<BinderKey, Arc<dyn Binder>>>,
    reflector: Arc<dyn Reflector>,
    /// Files whose top-level forms are currently running.
    loading: Mutex<HashSet<PathBuf>>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// The module expando behind a value, if it is one.
pub fn as_expando(value: &Value) -> Option<Arc<Expando>> {
    match value {
        Value::Dynamic(obj) => {
            let any: Arc<dyn Any + Send + Sync> = obj.clone();
            any.downcast::<Expando>().ok()
        }
        _ => None,
    }
}

/// Removes a file from the loading set when its execution ends.
struct LoadingGuard<'a> {
    loading: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.lock().remove(&self.path);
    }
}

impl Runtime {
    /// A runtime with the default configuration and no assemblies.
    pub fn new() -> Self {
        RuntimeBuilder::default().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn reflector(&self) -> &dyn Reflector {
        self.reflector.as_ref()
    }

    /// The namespace tree and loaded modules.
    pub fn globals(&self) -> &Arc<Expando> {
        &self.globals
    }

    /// Values set by the embedding host.
    pub fn host_globals(&self) -> &Arc<Expando> {
        &self.host_globals
    }

    /// The reflected shape of a value, for member and indexer lookup.
    pub fn describe(&self, value: &Value) -> Option<Arc<TypeDescriptor>> {
        builtinops::describe(value)
    }

    /// The canonical binder for `key`, created on first request.
    pub fn binder(&self, key: BinderKey) -> Arc<dyn Binder> {
        let mut binders = self.binders.lock();
        binders
            .entry(key)
            .or_insert_with_key(|key| make_binder(key.clone(), self.config.binder_cache_size))
            .clone()
    }

    /// A fresh call site dispatching through the canonical binder for `key`.
    pub fn call_site(&self, key: BinderKey) -> Arc<CallSite> {
        Arc::new(CallSite::new(self.binder(key), self.config.site_cache_size))
    }

    /// Number of distinct binders created so far.
    pub fn binder_count(&self) -> usize {
        self.binders.lock().len()
    }

    /// Intern a symbol. Names are matched case-insensitively; the first
    /// spelling seen is kept.
    pub fn make_symbol(&self, name: &str) -> Arc<Symbol> {
        self.symbols
            .lock()
            .entry(name.to_lowercase())
            .or_insert_with(|| Arc::new(Symbol::new(name)))
            .clone()
    }

    pub fn create_scope(&self, name: &str) -> Arc<Expando> {
        Arc::new(Expando::new(name))
    }

    fn parse_config(&self) -> ParseConfig {
        ParseConfig {
            max_depth: self.config.max_parse_depth,
        }
    }

    /// Add every type of `assembly` to the namespace tree, creating
    /// namespaces as needed. Types replace earlier entries of the same name.
    pub fn add_assembly(&self, assembly: &Assembly) {
        for ty in &assembly.types {
            let mut namespace = self.globals.clone();
            let mut path = String::new();
            for part in ty.namespace.split('.').filter(|part| !part.is_empty()) {
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(part);
                namespace = match namespace.get(part).as_ref().and_then(as_expando) {
                    Some(existing) => existing,
                    None => {
                        let created = Arc::new(Expando::new(path.clone()));
                        namespace.set(part, Value::Dynamic(created.clone()));
                        created
                    }
                };
            }
            namespace.set(&ty.name, Value::TypeHandle(Arc::new(TypeModel::new(ty.clone()))));
        }
        debug!(
            assembly = %assembly.name,
            types = assembly.types.len(),
            "reflected assembly into namespace tree"
        );
    }

    /// Make a typed Rust function callable from Sympl as a host global.
    pub fn register_function<Args, R, F>(&self, name: &str, f: F)
    where
        F: IntoOperation<Args, R>,
    {
        let arity = <F as IntoOperation<Args, R>>::param_types().len();
        let function = Function::native(name, arity, f.into_operation());
        self.host_globals
            .set(name, Value::Function(Arc::new(function)));
    }

    pub fn set_host_global(&self, name: &str, value: Value) {
        self.host_globals.set(name, value);
    }

    /// Run a source file as a new module named after the file's stem.
    pub fn execute_file(&self, path: impl AsRef<Path>) -> Result<Arc<Expando>, Error> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| Error::IoError(format!("{} does not name a file", path.display())))?;
        self.execute_file_as(path, &name)
    }

    /// Run a source file as a new module registered in the globals under
    /// `name` once it has executed without error.
    pub fn execute_file_as(&self, path: impl AsRef<Path>, name: &str) -> Result<Arc<Expando>, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("{}: {e}", path.display())))?;

        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if !self.loading.lock().insert(key.clone()) {
            return Err(Error::EvalError(format!(
                "circular import of {}",
                path.display()
            )));
        }
        let _guard = LoadingGuard {
            loading: &self.loading,
            path: key,
        };

        let module = self.create_scope(name);
        module.set("__file__", Value::from(path.to_string_lossy().into_owned()));

        // Nothing runs unless the whole file parses and analyzes.
        let exprs = parse_file_with_config(&source, self.parse_config())?;
        let nodes = analyze_module(self, &exprs)?;
        debug!(path = %path.display(), module = name, forms = nodes.len(), "executing file");
        for node in &nodes {
            execute(self, &module, node)?;
        }

        self.globals.set(name, Value::Dynamic(module.clone()));
        Ok(module)
    }

    /// Evaluate a single expression in `module`.
    pub fn execute_expr(&self, text: &str, module: &Arc<Expando>) -> Result<Value, Error> {
        let expr = parse_expr_with_config(text, self.parse_config())?;
        let node = analyze_expr(&expr, &AnalysisScope::module(self))?;
        execute(self, module, &node)
    }

    /// Evaluate every form of `source` in `module`, returning the last
    /// result (`nil` for empty input).
    pub fn execute_string(&self, source: &str, module: &Arc<Expando>) -> Result<Value, Error> {
        let exprs = parse_file_with_config(source, self.parse_config())?;
        let nodes = analyze_module(self, &exprs)?;
        let mut result = Value::Nil;
        for node in &nodes {
            result = execute(self, module, node)?;
        }
        Ok(result)
    }

    /// `(import path [members [renames]])` executed in `module`.
    pub fn import(
        &self,
        module: &Arc<Expando>,
        path: &[String],
        members: &[String],
        renames: &[String],
    ) -> Result<Value, Error> {
        let Some((first, rest)) = path.split_first() else {
            return Err(Error::EvalError("import needs a name".to_string()));
        };
        let last = rest.last().unwrap_or(first);
        let value = if rest.is_empty() {
            self.import_single(module, first)?
        } else {
            let mut value = self.globals.get(first).ok_or_else(|| {
                Error::MissingMember(format!("import: {first} is not a global namespace"))
            })?;
            for part in rest {
                let namespace = as_expando(&value).ok_or_else(|| {
                    Error::InvalidOperation(format!(
                        "import: {value} is not a namespace or module"
                    ))
                })?;
                value = namespace.get(part).ok_or_else(|| {
                    Error::MissingMember(format!(
                        "import: {part} is not defined in {}",
                        namespace.name()
                    ))
                })?;
            }
            value
        };

        if members.is_empty() {
            module.set(last, value);
        } else {
            for (i, member) in members.iter().enumerate() {
                let site = self.call_site(BinderKey::GetMember(member.clone()));
                let imported = site.invoke(self, std::slice::from_ref(&value))?;
                let bound_as = renames.get(i).unwrap_or(member);
                module.set(bound_as, imported);
            }
        }
        Ok(Value::Nil)
    }

    /// Globals, then host globals, then a sibling source file.
    fn import_single(&self, module: &Arc<Expando>, name: &str) -> Result<Value, Error> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value);
        }
        if let Some(value) = self.host_globals.get(name) {
            return Ok(value);
        }
        let directory = module
            .get("__file__")
            .and_then(|file| {
                file.as_str()
                    .and_then(|f| Path::new(f).parent().map(Path::to_path_buf))
            })
            .unwrap_or_default();
        let file = directory.join(format!("{name}.{}", self.config.file_extension));
        if !file.is_file() {
            return Err(Error::MissingMember(format!(
                "import: can't find {name} in globals, host globals or {}",
                file.display()
            )));
        }
        let loaded = self.execute_file_as(&file, name)?;
        Ok(Value::Dynamic(loaded))
    }
}
