//! A directive based template engine.
//!
//! Templates mix literal text with `#` directives: `#(expr)` output,
//! `#if`/`#elseif`/`#else`, `#for`, `#switch`, `#define` functions called
//! with `#@name(..)`, `#include` and `#render` of other files, and
//! `#set`/`#setLocal`/`#setGlobal` assignments, all evaluated over a small
//! expression language.
//!
//! ```rust
//! use hashlate::{Data, Engine};
//!
//! let engine = Engine::new("doc");
//! let template = engine
//!     .get_template_by_string("#for(x : items)#(x)#(for.last ? '' : ', ')#end", true)
//!     .unwrap();
//!
//! let mut data = Data::new();
//! data.insert("items", vec!["a", "b", "c"]);
//! assert_eq!(template.render_to_string(Some(&data)).unwrap(), "a, b, c");
//! ```

mod ast;
mod config;
mod directive;
mod engine;
mod error;
mod expr;
mod interface;
mod interpreter;
mod lexer;
mod methods;
mod parser;
mod scope;
mod source;
mod template;
mod value;
mod writer;

// Public exports.
pub use ast::Location;
pub use config::{Compressor, DEFAULT_BUFFER_SIZE, EngineConfig, EngineSettings};
pub use directive::{Directive, DirectiveContext, EscapeDirective, escape_html};
pub use engine::{Engine, EngineRegistry, MAIN_ENGINE_NAME};
pub use error::{HashlateError, HashlateResult, ParseError, ParseErrorKind};
pub use interface::{Data, SharedMethod, StaticNamespace, TemplateObject};
pub use source::{FileSource, FileSourceFactory, MemorySourceFactory, Source, SourceFactory, StringSource};
pub use template::Template;
pub use value::{IntRange, ListRef, LoopStatus, MapRef, Value, ValueIter};
pub use writer::{ByteWriter, CharWriter, Writer};
