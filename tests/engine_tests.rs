
use std::{fs, sync::Arc, thread, time::Duration};

use fixtures::get_engine_with_files;
use hashlate::{Data, Engine, EngineConfig, EngineRegistry, HashlateError, MAIN_ENGINE_NAME, StringSource};

#[test]
#[ntest::timeout(100)]
fn test_same_template_instance_without_dev_mode() {
    let (engine, files) = get_engine_with_files(&[("a.html", "A")], false);
    let first = engine.get_template("a.html").unwrap();
    files.insert("a.html", "B");
    let second = engine.get_template("a.html").unwrap();
    assert!(Arc::ptr_eq(&first, &second), "Cached template should be reused");
    assert_eq!(second.render_to_string(None).unwrap(), "A");
}

#[test]
#[ntest::timeout(100)]
fn test_new_template_instance_in_dev_mode() {
    let (engine, files) = get_engine_with_files(&[("a.html", "A")], true);
    let first = engine.get_template("a.html").unwrap();
    assert!(Arc::ptr_eq(&first, &engine.get_template("a.html").unwrap()));

    files.insert("a.html", "B");
    let second = engine.get_template("a.html").unwrap();
    assert!(!Arc::ptr_eq(&first, &second), "Modified template should be recompiled");
    assert_eq!(first.render_to_string(None).unwrap(), "A", "Old instance is left intact");
    assert_eq!(second.render_to_string(None).unwrap(), "B");
}

#[test]
#[ntest::timeout(100)]
fn test_uncached_sources_are_always_compiled() {
    let (engine, _) = get_engine_with_files(&[], false);
    let first = engine
        .get_template_by_source(Arc::new(StringSource::new("x", false)))
        .unwrap();
    let second = engine
        .get_template_by_source(Arc::new(StringSource::new("x", false)))
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(engine.template_cache_size(), 0);
}

#[test]
#[ntest::timeout(2000)]
fn test_file_templates_with_base_path() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("pages")).unwrap();
    fs::write(dir.path().join("pages/home.html"), "#include('_nav.html')home #(user)").unwrap();
    fs::write(dir.path().join("pages/_nav.html"), "[nav]").unwrap();

    let config = EngineConfig::new()
        .with_base_template_path(dir.path())
        .with_dev_mode(true);
    let engine = Engine::with_config("files", config);

    let mut data = Data::new();
    data.insert("user", "ann");
    let first = engine.get_template("pages/home.html").unwrap();
    assert_eq!(first.render_to_string(Some(&data)).unwrap(), "[nav]home ann");

    // Some file systems only keep whole seconds.
    thread::sleep(Duration::from_millis(1100));
    fs::write(dir.path().join("pages/_nav.html"), "[menu]").unwrap();
    let second = engine.get_template("pages/home.html").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.render_to_string(Some(&data)).unwrap(), "[menu]home ann");
}

#[test]
#[ntest::timeout(100)]
fn test_missing_file_template() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::with_config("files", EngineConfig::new().with_base_template_path(dir.path()));
    assert!(matches!(
        engine.get_template("absent.html"),
        Err(HashlateError::MissingTemplate { .. })
    ));
}

#[test]
#[ntest::timeout(1000)]
fn test_concurrent_first_access_compiles_once() {
    let (engine, _) = get_engine_with_files(&[("a.html", "#for(x : [1..3])#(x)#end")], false);
    let templates: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| engine.get_template("a.html").unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let first = templates.first().unwrap();
    assert!(templates.iter().all(|t| Arc::ptr_eq(first, t)));
    assert_eq!(engine.template_cache_size(), 1);
}

#[test]
#[ntest::timeout(100)]
fn test_engine_registry() {
    let mut registry = EngineRegistry::new();
    let main = registry.main().unwrap();
    assert_eq!(main.name(), MAIN_ENGINE_NAME);

    let mail = registry
        .create("mail", EngineConfig::new().with_dev_mode(true))
        .unwrap();
    assert!(mail.config().dev_mode());
    assert!(matches!(
        registry.create("mail", EngineConfig::new()),
        Err(HashlateError::Config { .. })
    ));

    registry.set_main("mail").unwrap();
    assert!(Arc::ptr_eq(&registry.main().unwrap(), &mail));
    assert!(registry.remove("mail").is_err(), "The main engine cannot be removed");

    registry.set_main(MAIN_ENGINE_NAME).unwrap();
    assert!(registry.remove("mail").unwrap().is_some());
    assert!(registry.get("mail").is_none());
}
