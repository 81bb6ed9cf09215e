use std::{collections::HashMap, fmt, sync::Arc};

use crate::value::Value;

/// Named input values handed to a render call. They become the root scope of
/// the render.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
#[derive(Debug, Clone, Default)]
pub struct Data {
    data: HashMap<String, Value>,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) -> &mut Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn get<N: AsRef<str>>(&self, name: N) -> Option<&Value> {
        self.data.get(name.as_ref())
    }

    pub fn contains<N: AsRef<str>>(&self, name: N) -> bool {
        self.data.contains_key(name.as_ref())
    }

    pub(crate) fn into_inner(self) -> HashMap<String, Value> {
        self.data
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Data {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            data: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// A host object exposed to templates. Field access `obj.name` and method
/// calls `obj.name(args)` are routed here when the value is not one of the
/// built-in kinds.
pub trait TemplateObject: Send + Sync + fmt::Debug {
    /// Returns `None` if the object has no such field.
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Returns `None` if the object has no such method, `Some(Err(message))`
    /// if the method failed.
    fn call(&self, _name: &str, _args: &[Value]) -> Option<Result<Value, String>> {
        None
    }

    fn display(&self) -> String {
        format!("{self:?}")
    }
}

/// A host function callable from expressions, either as a shared method
/// `name(args)` or as a static method `Namespace::name(args)`.
pub type SharedMethod = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Static members reachable through `Name::field` and `Name::method(args)`.
#[derive(Clone, Default)]
pub struct StaticNamespace {
    fields: HashMap<String, Value>,
    methods: HashMap<String, SharedMethod>,
}

impl StaticNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field<N: Into<String>, V: Into<Value>>(mut self, name: N, value: V) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_method<N, F>(mut self, name: N, method: F) -> Self
    where
        N: Into<String>,
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub(crate) fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub(crate) fn method(&self, name: &str) -> Option<&SharedMethod> {
        self.methods.get(name)
    }
}

impl fmt::Debug for StaticNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticNamespace")
            .field("fields", &self.fields)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
