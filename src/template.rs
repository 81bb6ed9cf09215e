use std::{
    collections::HashMap,
    fmt,
    fs::File,
    io,
    path::Path,
    sync::Arc,
};

use tracing::debug;

use crate::{
    ast::{Function, Stat},
    config::EngineConfig,
    error::HashlateResult,
    interface::Data,
    interpreter::Runtime,
    parser,
    scope::Scopes,
    source::Source,
    writer::{ByteWriter, CharWriter, Writer},
};

/// The compile-time environment of a template: the functions it defines
/// (including those of the files it includes) and every source it was built
/// from.
pub(crate) struct Env {
    config: Arc<EngineConfig>,
    functions: HashMap<String, Arc<Function>>,
    sources: Vec<Arc<dyn Source>>,
}

impl Env {
    pub(crate) fn new(
        config: Arc<EngineConfig>,
        functions: HashMap<String, Arc<Function>>,
        sources: Vec<Arc<dyn Source>>,
    ) -> Self {
        Self {
            config,
            functions,
            sources,
        }
    }

    pub(crate) const fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Looks a function up in this template first, then among the engine's
    /// shared functions.
    pub(crate) fn get_function(&self, name: &str) -> HashlateResult<Option<Arc<Function>>> {
        match self.functions.get(name) {
            Some(function) => Ok(Some(function.clone())),
            None => self.config.shared_function(name),
        }
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.sources.iter().any(|source| source.is_modified())
    }
}

/// A compiled template, ready to be rendered any number of times and from any
/// number of threads.
///
/// Templates are normally obtained from an [`Engine`](crate::Engine), which
/// caches them, but can also be compiled directly against a configuration.
///
/// # Example
///
/// ```rust
/// use hashlate::{Data, Engine};
///
/// let engine = Engine::new("doc");
/// let template = engine.get_template_by_string("Hello, #(name)!", false).unwrap();
///
/// let mut data = Data::new();
/// data.insert("name", "World");
///
/// assert_eq!(template.render_to_string(Some(&data)).unwrap(), "Hello, World!");
/// ```
pub struct Template {
    env: Env,
    body: Stat,
    name: Option<String>,
}

impl Template {
    /// Compiles `source`, eagerly parsing every file it `#include`s.
    ///
    /// # Errors
    ///
    /// Returns `HashlateError::Parse` if the template syntax is invalid,
    /// `HashlateError::MissingTemplate` if an included file does not exist and
    /// `HashlateError::Io` if a source could not be read.
    pub fn compile(config: Arc<EngineConfig>, source: Arc<dyn Source>) -> HashlateResult<Self> {
        let name = source.file_name().map(str::to_owned);
        let unit = parser::parse_source(&config, source)?;
        Ok(Self {
            env: Env::new(config, unit.functions, unit.sources),
            body: unit.body,
            name,
        })
    }

    /// The file name of the source this template was compiled from, if it has
    /// one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether any source this template was built from changed since it was
    /// compiled.
    pub fn is_modified(&self) -> bool {
        self.env.is_modified()
    }

    /// Renders into any [`Writer`]. Every other render entry point goes
    /// through here.
    ///
    /// # Errors
    ///
    /// Returns `HashlateError::Template` when an expression or directive fails
    /// at runtime, and whatever error the writer reports.
    pub fn render(&self, data: Option<&Data>, writer: &mut dyn Writer) -> HashlateResult<()> {
        let data = data.cloned().unwrap_or_default().into_inner();
        let mut rt = Runtime::new(data, self.env.config().shared_objects());
        self.body.exec(&self.env, &mut rt, Scopes::root(), writer)?;
        writer.flush()
    }

    /// Renders the template to a `String`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hashlate::Engine;
    ///
    /// let engine = Engine::new("doc");
    /// let template = engine
    ///     .get_template_by_string("#for(x : [1..3])#(x)#end", false)
    ///     .unwrap();
    /// assert_eq!(template.render_to_string(None).unwrap(), "123");
    /// ```
    pub fn render_to_string(&self, data: Option<&Data>) -> HashlateResult<String> {
        let mut writer = CharWriter::new(String::new());
        self.render(data, &mut writer)?;
        Ok(writer.into_inner())
    }

    /// Renders into a [`fmt::Write`].
    pub fn render_to_fmt<W: fmt::Write>(&self, data: Option<&Data>, out: W) -> HashlateResult<W> {
        let mut writer = CharWriter::new(out);
        self.render(data, &mut writer)?;
        Ok(writer.into_inner())
    }

    /// Renders UTF-8 bytes into an [`io::Write`], buffered with the engine's
    /// configured buffer size.
    pub fn render_to_writer<W: io::Write>(&self, data: Option<&Data>, out: W) -> HashlateResult<W> {
        let mut writer = ByteWriter::new(out, self.env.config().buffer_size());
        self.render(data, &mut writer)?;
        writer.into_inner()
    }

    /// Renders into the file at `path`, creating or truncating it.
    pub fn render_to_file<P: AsRef<Path>>(&self, data: Option<&Data>, path: P) -> HashlateResult<()> {
        let path = path.as_ref();
        debug!(template = self.name(), path = %path.display(), "rendering to file");
        let file = File::create(path)?;
        self.render_to_writer(data, file)?;
        Ok(())
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("functions", &self.env.functions.keys().collect::<Vec<_>>())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySourceFactory, SourceFactory, StringSource};

    fn compile(input: &str) -> Template {
        Template::compile(Arc::new(EngineConfig::new()), Arc::new(StringSource::new(input, false))).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_entry_points_agree() {
        let template = compile("a #(1 + 1) ü #(2.5)");
        let data = Data::new();
        let as_string = template.render_to_string(Some(&data)).unwrap();
        let as_fmt = template.render_to_fmt(None, String::new()).unwrap();
        let as_bytes = template.render_to_writer(None, Vec::new()).unwrap();
        assert_eq!(as_string, "a 2 ü 2.5");
        assert_eq!(as_fmt, as_string);
        assert_eq!(String::from_utf8(as_bytes).unwrap(), as_string);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut data = Data::new();
        data.insert("who", "file");
        compile("to #(who)").render_to_file(Some(&data), &path).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "to file");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_does_not_touch_caller_data() {
        let template = compile("#setGlobal(x = 2)#(x)");
        let mut data = Data::new();
        data.insert("x", 1);
        assert_eq!(template.render_to_string(Some(&data)).unwrap(), "2");
        assert_eq!(data.get("x").and_then(|v| v.as_i64()), Some(1));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_is_modified_tracks_includes() {
        let factory = MemorySourceFactory::new();
        factory.insert("main.html", "#include('part.html')");
        factory.insert("part.html", "part");
        let config = Arc::new(EngineConfig::new().with_source_factory(factory.clone()));
        let source = factory.get_source(None, "main.html").unwrap();
        let template = Template::compile(config, source).unwrap();
        assert_eq!(template.name(), Some("main.html"));
        assert!(!template.is_modified());

        factory.insert("part.html", "changed");
        assert!(template.is_modified());
    }
}
