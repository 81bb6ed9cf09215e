use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    config::EngineConfig,
    error::{HashlateError, HashlateResult},
    source::{Source, StringSource},
    template::Template,
};

/// Name of the engine an [`EngineRegistry`] starts with.
pub const MAIN_ENGINE_NAME: &str = "main";

/// `Engine` compiles templates through its [`EngineConfig`] and caches them.
///
/// Templates are cached under their source's cache key: the file name for file
/// and in-memory sources, the content itself for cached string sources. With
/// dev mode off a cached template is reused until it is removed explicitly;
/// with dev mode on every lookup checks whether the template or anything it
/// includes changed and recompiles it if so.
///
/// # Examples
///
/// ```
/// use hashlate::{Data, Engine, EngineConfig, MemorySourceFactory};
///
/// let files = MemorySourceFactory::new();
/// files.insert("greeting.html", "Hello, #(name)!");
///
/// let engine = Engine::with_config("site", EngineConfig::new().with_source_factory(files));
/// let template = engine.get_template("greeting.html").unwrap();
///
/// let mut data = Data::new();
/// data.insert("name", "World");
/// assert_eq!(template.render_to_string(Some(&data)).unwrap(), "Hello, World!");
/// ```
pub struct Engine {
    name: String,
    config: Arc<EngineConfig>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl Engine {
    /// Creates an engine with the default configuration, reading templates
    /// from the file system.
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self::with_config(name, EngineConfig::new())
    }

    pub fn with_config<N: Into<String>>(name: N, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Gets the template stored under `file_name`, compiling it on first use.
    ///
    /// # Errors
    ///
    /// * `HashlateError::MissingTemplate` - If the source factory has no such file
    /// * `HashlateError::Parse` - If the template or one of its includes is malformed
    pub fn get_template(&self, file_name: &str) -> HashlateResult<Arc<Template>> {
        let mut cache = self.cache.lock();
        if let Some(template) = self.cached(&cache, file_name) {
            return Ok(template);
        }
        let source = self
            .config
            .source_factory()
            .get_source(self.config.base_template_path(), file_name)?;
        self.compile_into(&mut cache, file_name.to_owned(), source)
    }

    /// Compiles template text held in memory. With `cache` set, compiling the
    /// same text again returns the same template.
    pub fn get_template_by_string(&self, content: &str, cache: bool) -> HashlateResult<Arc<Template>> {
        self.get_template_by_source(Arc::new(StringSource::new(content, cache)))
    }

    /// Compiles a template from any [`Source`], caching it under the source's
    /// cache key if it has one.
    pub fn get_template_by_source(&self, source: Arc<dyn Source>) -> HashlateResult<Arc<Template>> {
        let Some(key) = source.cache_key().map(str::to_owned) else {
            debug!(engine = %self.name, "compiling uncached template");
            return Template::compile(self.config.clone(), source).map(Arc::new);
        };
        let mut cache = self.cache.lock();
        if let Some(template) = self.cached(&cache, &key) {
            return Ok(template);
        }
        self.compile_into(&mut cache, key, source)
    }

    /// A cached template that is still usable.
    fn cached(&self, cache: &HashMap<String, Arc<Template>>, key: &str) -> Option<Arc<Template>> {
        let template = cache.get(key)?;
        if self.config.dev_mode() && template.is_modified() {
            debug!(engine = %self.name, key, "template modified, recompiling");
            return None;
        }
        debug!(engine = %self.name, key, "template cache hit");
        Some(template.clone())
    }

    fn compile_into(
        &self,
        cache: &mut HashMap<String, Arc<Template>>,
        key: String,
        source: Arc<dyn Source>,
    ) -> HashlateResult<Arc<Template>> {
        let template = Arc::new(Template::compile(self.config.clone(), source)?);
        debug!(engine = %self.name, key, "template compiled");
        cache.insert(key, template.clone());
        Ok(template)
    }

    /// Drops the cached template stored under `key`. Returns whether there was
    /// one.
    pub fn remove_template_cache(&self, key: &str) -> bool {
        self.cache.lock().remove(key).is_some()
    }

    pub fn remove_all_template_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn template_cache_size(&self) -> usize {
        self.cache.lock().len()
    }

    /// See [`EngineConfig::add_shared_function`].
    pub fn add_shared_function(&self, file_name: &str) -> HashlateResult<()> {
        self.config.add_shared_function(file_name)
    }

    /// See [`EngineConfig::add_shared_function_by_string`].
    pub fn add_shared_function_by_string(&self, content: &str) -> HashlateResult<()> {
        self.config.add_shared_function_by_string(content)
    }

    /// See [`EngineConfig::add_shared_function_source`].
    pub fn add_shared_function_source(&self, source: Arc<dyn Source>) -> HashlateResult<()> {
        self.config.add_shared_function_source(source)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("cached", &self.template_cache_size())
            .finish()
    }
}

/// Named engines of an application, one of which is the main engine.
#[derive(Debug)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<Engine>>,
    main: String,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineRegistry {
    /// Creates a registry holding a default configured engine named
    /// [`MAIN_ENGINE_NAME`].
    pub fn new() -> Self {
        let mut engines = HashMap::new();
        engines.insert(MAIN_ENGINE_NAME.to_owned(), Arc::new(Engine::new(MAIN_ENGINE_NAME)));
        Self {
            engines,
            main: MAIN_ENGINE_NAME.to_owned(),
        }
    }

    /// Creates and registers an engine.
    ///
    /// # Errors
    ///
    /// Returns `HashlateError::Config` if an engine with that name exists.
    pub fn create(&mut self, name: &str, config: EngineConfig) -> HashlateResult<Arc<Engine>> {
        if self.engines.contains_key(name) {
            return Err(HashlateError::config(format!("Engine already exists: {name}")));
        }
        let engine = Arc::new(Engine::with_config(name, config));
        self.engines.insert(name.to_owned(), engine.clone());
        debug!(engine = name, "engine created");
        Ok(engine)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        self.engines.get(name).cloned()
    }

    /// Unregisters an engine. The main engine cannot be removed.
    pub fn remove(&mut self, name: &str) -> HashlateResult<Option<Arc<Engine>>> {
        if name == self.main {
            return Err(HashlateError::config(format!("Cannot remove the main engine: {name}")));
        }
        Ok(self.engines.remove(name))
    }

    pub fn main(&self) -> HashlateResult<Arc<Engine>> {
        self.get(&self.main)
            .ok_or_else(|| HashlateError::config(format!("Main engine missing: {}", self.main)))
    }

    /// Makes a registered engine the main engine.
    pub fn set_main(&mut self, name: &str) -> HashlateResult<()> {
        if !self.engines.contains_key(name) {
            return Err(HashlateError::config(format!("Engine not found: {name}")));
        }
        name.clone_into(&mut self.main);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySourceFactory;

    fn engine_with(files: &[(&str, &str)], dev_mode: bool) -> (Engine, MemorySourceFactory) {
        let factory = MemorySourceFactory::new();
        for (name, content) in files {
            factory.insert(*name, *content);
        }
        let config = EngineConfig::new()
            .with_dev_mode(dev_mode)
            .with_source_factory(factory.clone());
        (Engine::with_config("test", config), factory)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_cache_returns_same_template() {
        let (engine, factory) = engine_with(&[("a.html", "A")], false);
        let first = engine.get_template("a.html").unwrap();
        let second = engine.get_template("a.html").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        factory.insert("a.html", "B");
        let third = engine.get_template("a.html").unwrap();
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(third.render_to_string(None).unwrap(), "A");

        assert!(engine.remove_template_cache("a.html"));
        let fourth = engine.get_template("a.html").unwrap();
        assert_eq!(fourth.render_to_string(None).unwrap(), "B");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dev_mode_recompiles_modified_include() {
        let (engine, factory) = engine_with(&[("a.html", "#include('b.html')"), ("b.html", "one")], true);
        let first = engine.get_template("a.html").unwrap();
        assert!(Arc::ptr_eq(&first, &engine.get_template("a.html").unwrap()));

        factory.insert("b.html", "two");
        let second = engine.get_template("a.html").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.render_to_string(None).unwrap(), "two");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_string_templates() {
        let (engine, _) = engine_with(&[], false);
        let cached = engine.get_template_by_string("#(1)", true).unwrap();
        assert!(Arc::ptr_eq(&cached, &engine.get_template_by_string("#(1)", true).unwrap()));
        let uncached = engine.get_template_by_string("#(1)", false).unwrap();
        assert!(!Arc::ptr_eq(&cached, &uncached));
        assert_eq!(engine.template_cache_size(), 1);
        engine.remove_all_template_cache();
        assert_eq!(engine.template_cache_size(), 0);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_error_is_not_cached() {
        let (engine, factory) = engine_with(&[("bad.html", "#if(x)")], false);
        assert!(matches!(engine.get_template("bad.html"), Err(HashlateError::Parse(_))));
        assert_eq!(engine.template_cache_size(), 0);
        factory.insert("bad.html", "#if(x)#end");
        assert!(engine.get_template("bad.html").is_ok());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_registry() {
        let mut registry = EngineRegistry::new();
        assert_eq!(registry.main().unwrap().name(), MAIN_ENGINE_NAME);

        let admin = registry.create("admin", EngineConfig::new()).unwrap();
        assert!(registry.create("admin", EngineConfig::new()).is_err());
        assert!(Arc::ptr_eq(&admin, &registry.get("admin").unwrap()));

        registry.set_main("admin").unwrap();
        assert_eq!(registry.main().unwrap().name(), "admin");
        assert!(registry.remove("admin").is_err());
        assert!(registry.set_main("nope").is_err());
        assert!(registry.remove(MAIN_ENGINE_NAME).unwrap().is_some());
        assert!(registry.get(MAIN_ENGINE_NAME).is_none());
    }
}
