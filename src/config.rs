use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    ast::Function,
    directive::{Directive, EscapeDirective},
    error::{HashlateError, HashlateResult},
    interface::{SharedMethod, StaticNamespace},
    parser,
    source::{FileSourceFactory, Source, SourceFactory, StringSource},
    value::Value,
};

/// Directive names handled by the parser itself. Custom directives may not
/// reuse them.
const BUILTIN_DIRECTIVES: [&str; 21] = [
    "if", "elseif", "else", "end", "for", "switch", "case", "default", "define", "call", "call?",
    "include", "render", "set", "setLocal", "setGlobal", "output", "break", "continue", "return",
    "escape",
];

pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Squeezes the whitespace of literal template text at compile time.
///
/// Every line is trimmed, blank lines are dropped and the rest are joined by
/// the separator. Text that does not span a line break is left alone, so
/// inline spacing around `#(expr)` survives.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compressor {
    separator: char,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::lines()
    }
}

impl Compressor {
    pub const fn new(separator: char) -> Self {
        Self { separator }
    }

    /// Joins compressed lines with `'\n'`.
    pub const fn lines() -> Self {
        Self::new('\n')
    }

    /// Joins compressed lines with a space, producing single-line output.
    pub const fn spaces() -> Self {
        Self::new(' ')
    }

    pub const fn separator(&self) -> char {
        self.separator
    }

    pub fn compress(&self, text: &str) -> String {
        if !text.contains('\n') {
            return text.to_owned();
        }
        let lines: Vec<&str> = text.split('\n').collect();
        let last = lines.len().saturating_sub(1);
        let parts: Vec<&str> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    line.trim_end()
                } else if i == last {
                    line.trim_start()
                } else {
                    line.trim()
                }
            })
            .filter(|part| !part.is_empty())
            .collect();

        let mut out = String::with_capacity(text.len());
        if parts.is_empty() {
            out.push(self.separator);
            return out;
        }
        if lines.first().is_some_and(|line| line.trim().is_empty()) {
            out.push(self.separator);
        }
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.push(self.separator);
            }
            out.push_str(part);
        }
        if lines.last().is_some_and(|line| line.trim().is_empty()) {
            out.push(self.separator);
        }
        out
    }
}

/// The plain-data part of an engine configuration.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Recompile templates whose sources changed.
    pub dev_mode: bool,
    /// Directory that template names are resolved against.
    pub base_template_path: Option<PathBuf>,
    /// Size of the byte buffer used when rendering to an `io::Write`.
    pub buffer_size: usize,
    pub compressor: Option<Compressor>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dev_mode: false,
            base_template_path: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            compressor: None,
        }
    }
}

#[derive(Debug)]
struct SharedFunctionFile {
    root: Arc<dyn Source>,
    /// The root plus everything it includes.
    watched: Vec<Arc<dyn Source>>,
}

#[derive(Debug, Default)]
struct SharedFunctions {
    functions: HashMap<String, Arc<Function>>,
    files: Vec<SharedFunctionFile>,
}

impl SharedFunctions {
    fn is_modified(&self) -> bool {
        self.files
            .iter()
            .flat_map(|file| &file.watched)
            .any(|source| source.is_modified())
    }
}

/// Everything an [`Engine`](crate::Engine) needs to compile and render.
pub struct EngineConfig {
    settings: EngineSettings,
    source_factory: Arc<dyn SourceFactory>,
    keep_blank_lines: HashSet<String>,
    directives: HashMap<String, Arc<dyn Directive>>,
    shared_objects: HashMap<String, Value>,
    shared_methods: HashMap<String, SharedMethod>,
    static_namespaces: HashMap<String, StaticNamespace>,
    shared_functions: RwLock<SharedFunctions>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(EngineSettings::default())
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("settings", &self.settings)
            .field("source_factory", &self.source_factory)
            .field("directives", &self.directives.keys().collect::<Vec<_>>())
            .field("shared_objects", &self.shared_objects.keys().collect::<Vec<_>>())
            .field("shared_methods", &self.shared_methods.keys().collect::<Vec<_>>())
            .field("static_namespaces", &self.static_namespaces.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: EngineSettings) -> Self {
        let mut directives: HashMap<String, Arc<dyn Directive>> = HashMap::new();
        directives.insert("escape".to_owned(), Arc::new(EscapeDirective));
        Self {
            settings,
            source_factory: Arc::new(FileSourceFactory),
            keep_blank_lines: ["output", "include"].into_iter().map(str::to_owned).collect(),
            directives,
            shared_objects: HashMap::new(),
            shared_methods: HashMap::new(),
            static_namespaces: HashMap::new(),
            shared_functions: RwLock::new(SharedFunctions::default()),
        }
    }

    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ---- builder setters ----

    pub const fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.settings.dev_mode = dev_mode;
        self
    }

    pub fn with_base_template_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings.base_template_path = Some(path.into());
        self
    }

    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.settings.buffer_size = buffer_size;
        self
    }

    pub const fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.settings.compressor = Some(compressor);
        self
    }

    pub fn with_source_factory<F: SourceFactory + 'static>(mut self, factory: F) -> Self {
        self.source_factory = Arc::new(factory);
        self
    }

    // ---- registration ----

    /// Makes a value visible to every render under `name`, behind the
    /// caller's data.
    pub fn add_shared_object<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) -> HashlateResult<()> {
        let name = name.into();
        if self.shared_objects.contains_key(&name) {
            return Err(HashlateError::config(format!("Shared object already exists: {name}")));
        }
        self.shared_objects.insert(name, value.into());
        Ok(())
    }

    /// Registers a host function callable from expressions as `name(args)`.
    pub fn add_shared_method<N, F>(&mut self, name: N, method: F) -> HashlateResult<()>
    where
        N: Into<String>,
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.shared_methods.contains_key(&name) {
            return Err(HashlateError::config(format!("Shared method already exists: {name}")));
        }
        self.shared_methods.insert(name, Arc::new(method));
        Ok(())
    }

    /// Registers static members reachable as `name::member`.
    pub fn add_static_namespace<N: Into<String>>(&mut self, name: N, namespace: StaticNamespace) -> HashlateResult<()> {
        let name = name.into();
        if self.static_namespaces.contains_key(&name) {
            return Err(HashlateError::config(format!("Static namespace already exists: {name}")));
        }
        self.static_namespaces.insert(name, namespace);
        Ok(())
    }

    /// Registers a custom directive used as `#name(args)`.
    pub fn add_directive<N, D>(&mut self, name: N, directive: D) -> HashlateResult<()>
    where
        N: Into<String>,
        D: Directive + 'static,
    {
        let name = name.into();
        if BUILTIN_DIRECTIVES.contains(&name.as_str()) || self.directives.contains_key(&name) {
            return Err(HashlateError::config(format!("Directive already exists: #{name}")));
        }
        if !name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        {
            return Err(HashlateError::config(format!("Invalid directive name: {name}")));
        }
        self.directives.insert(name, Arc::new(directive));
        Ok(())
    }

    /// Keeps the line a directive sits on even when nothing else is on it.
    pub fn add_blank_preserving_directive<N: Into<String>>(&mut self, name: N) -> &mut Self {
        self.keep_blank_lines.insert(name.into());
        self
    }

    /// Compiles a file of `#define` blocks and makes its functions callable
    /// from every template.
    pub fn add_shared_function(&self, file_name: &str) -> HashlateResult<()> {
        let source = self
            .source_factory
            .get_source(self.base_template_path(), file_name)?;
        self.add_shared_function_source(source)
    }

    pub fn add_shared_function_by_string(&self, content: &str) -> HashlateResult<()> {
        self.add_shared_function_source(Arc::new(StringSource::new(content, false)))
    }

    pub fn add_shared_function_source(&self, source: Arc<dyn Source>) -> HashlateResult<()> {
        let (functions, file) = self.compile_shared(source)?;
        let mut shared = self.shared_functions.write();
        for name in functions.keys() {
            if shared.functions.contains_key(name) {
                return Err(HashlateError::config(format!(
                    "Shared function already defined: {name}"
                )));
            }
        }
        debug!(
            file_name = file.root.file_name(),
            count = functions.len(),
            "registered shared functions"
        );
        shared.functions.extend(functions);
        shared.files.push(file);
        Ok(())
    }

    fn compile_shared(
        &self,
        root: Arc<dyn Source>,
    ) -> HashlateResult<(HashMap<String, Arc<Function>>, SharedFunctionFile)> {
        let unit = parser::parse_source(self, root.clone())?;
        Ok((
            unit.functions,
            SharedFunctionFile {
                root,
                watched: unit.sources,
            },
        ))
    }

    /// Re-reads every shared function file. Called in dev mode when one of
    /// them changed.
    fn reload_shared_functions(&self) -> HashlateResult<()> {
        let roots: Vec<Arc<dyn Source>> = self
            .shared_functions
            .read()
            .files
            .iter()
            .map(|file| file.root.clone())
            .collect();

        let mut fresh = SharedFunctions::default();
        for root in roots {
            let source = match root.file_name() {
                Some(file_name) => self
                    .source_factory
                    .get_source(self.base_template_path(), file_name)?,
                None => root,
            };
            let (functions, file) = self.compile_shared(source)?;
            for (name, function) in functions {
                if fresh.functions.insert(name.clone(), function).is_some() {
                    return Err(HashlateError::config(format!(
                        "Shared function already defined: {name}"
                    )));
                }
            }
            fresh.files.push(file);
        }

        warn!(count = fresh.functions.len(), "reloaded modified shared functions");
        *self.shared_functions.write() = fresh;
        Ok(())
    }

    pub(crate) fn shared_function(&self, name: &str) -> HashlateResult<Option<Arc<Function>>> {
        if self.settings.dev_mode && self.shared_functions.read().is_modified() {
            self.reload_shared_functions()?;
        }
        Ok(self.shared_functions.read().functions.get(name).cloned())
    }

    // ---- accessors ----

    pub const fn dev_mode(&self) -> bool {
        self.settings.dev_mode
    }

    pub fn base_template_path(&self) -> Option<&Path> {
        self.settings.base_template_path.as_deref()
    }

    pub const fn buffer_size(&self) -> usize {
        self.settings.buffer_size
    }

    pub const fn compressor(&self) -> Option<&Compressor> {
        self.settings.compressor.as_ref()
    }

    pub(crate) fn source_factory(&self) -> &dyn SourceFactory {
        &*self.source_factory
    }

    pub(crate) const fn keep_blank_lines(&self) -> &HashSet<String> {
        &self.keep_blank_lines
    }

    pub(crate) fn directive(&self, name: &str) -> Option<Arc<dyn Directive>> {
        self.directives.get(name).cloned()
    }

    pub(crate) const fn shared_objects(&self) -> &HashMap<String, Value> {
        &self.shared_objects
    }

    pub(crate) fn shared_method(&self, name: &str) -> Option<&SharedMethod> {
        self.shared_methods.get(name)
    }

    pub(crate) fn static_namespace(&self, name: &str) -> Option<&StaticNamespace> {
        self.static_namespaces.get(name)
    }
}
