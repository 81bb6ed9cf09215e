use std::{collections::HashMap, fmt, iter::Peekable, sync::Arc};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::interface::TemplateObject;

pub type ListRef = Arc<RwLock<Vec<Value>>>;
pub type MapRef = Arc<RwLock<IndexMap<String, Value>>>;

/// A dynamically typed template value.
///
/// Lists and maps are shared references: assigning a list to a second variable
/// and mutating it through `list[0] = x` or `list.add(x)` is visible through
/// both names, the same way host collections behave.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    List(ListRef),
    Map(MapRef),
    /// The lazy result of `start..end`.
    Range(IntRange),
    Iter(ValueIter),
    Status(Arc<LoopStatus>),
    Object(Arc<dyn TemplateObject>),
}

impl Value {
    pub fn list<T: Into<Self>, I: IntoIterator<Item = T>>(items: I) -> Self {
        Self::List(Arc::new(RwLock::new(items.into_iter().map(Into::into).collect())))
    }

    pub fn map<K: Into<String>, T: Into<Self>, I: IntoIterator<Item = (K, T)>>(entries: I) -> Self {
        Self::Map(Arc::new(RwLock::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )))
    }

    /// Wraps a host iterator. The iterator is consumed by the first `#for`
    /// that walks it.
    pub fn iter<I>(iter: I) -> Self
    where
        I: Iterator<Item = Self> + Send + 'static,
    {
        Self::Iter(ValueIter::new(iter))
    }

    pub fn object<T: TemplateObject + 'static>(object: T) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn str<T: AsRef<str>>(s: T) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_number(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Long(_) | Self::Float(_) | Self::Double(_)
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(s) = self { Some(s) } else { None }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(b) = self { Some(*b) } else { None }
    }

    /// Integral value of an `Int` or `Long`.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i as i64),
            Self::Long(l) => Some(*l),
            Self::Null
            | Self::Bool(_)
            | Self::Float(_)
            | Self::Double(_)
            | Self::Str(_)
            | Self::List(_)
            | Self::Map(_)
            | Self::Range(_)
            | Self::Iter(_)
            | Self::Status(_)
            | Self::Object(_) => None,
        }
    }

    #[allow(clippy::cast_precision_loss, reason = "template numbers follow host widening rules")]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(f64::from(*i)),
            Self::Long(l) => Some(*l as f64),
            Self::Float(f) => Some(f64::from(*f)),
            Self::Double(d) => Some(*d),
            Self::Null
            | Self::Bool(_)
            | Self::Str(_)
            | Self::List(_)
            | Self::Map(_)
            | Self::Range(_)
            | Self::Iter(_)
            | Self::Status(_)
            | Self::Object(_) => None,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Range(_) => "range",
            Self::Iter(_) => "iterator",
            Self::Status(_) => "loop status",
            Self::Object(_) => "object",
        }
    }

    /// Template truthiness: null, false, numeric zero, the empty string, empty
    /// collections and exhausted iterators are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Long(l) => *l != 0,
            Self::Float(f) => *f != 0.0,
            Self::Double(d) => *d != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(list) => !list.read().is_empty(),
            Self::Map(map) => !map.read().is_empty(),
            Self::Iter(iter) => iter.has_next(),
            Self::Range(_) | Self::Status(_) | Self::Object(_) => true,
        }
    }

    /// Equality used by `==` and `!=`: numbers compare by value across
    /// numeric types, everything else uses [`PartialEq`].
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ if self.is_number() && other.is_number() => self.as_f64() == other.as_f64(),
            _ => self == other,
        }
    }

    /// The string a map key or an index lookup is normalised to.
    pub(crate) fn to_key(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b) || *a.read() == *b.read(),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Iter(a), Self::Iter(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (Self::Status(a), Self::Status(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
            }
            (
                Self::Null
                | Self::Bool(_)
                | Self::Int(_)
                | Self::Long(_)
                | Self::Float(_)
                | Self::Double(_)
                | Self::Str(_)
                | Self::List(_)
                | Self::Map(_)
                | Self::Range(_)
                | Self::Iter(_)
                | Self::Status(_)
                | Self::Object(_),
                _,
            ) => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => f.write_str(itoa::Buffer::new().format(*i)),
            Self::Long(l) => f.write_str(itoa::Buffer::new().format(*l)),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Double(v) => f.write_str(&format_double(*v)),
            Self::Str(s) => f.write_str(s),
            Self::List(list) => {
                f.write_str("[")?;
                for (i, item) in list.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                f.write_str("}")
            }
            Self::Range(range) => {
                f.write_str("[")?;
                for (i, item) in range.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(itoa::Buffer::new().format(item))?;
                }
                f.write_str("]")
            }
            Self::Iter(_) => f.write_str("<iterator>"),
            Self::Status(status) => write!(f, "{status}"),
            Self::Object(object) => f.write_str(&object.display()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::Long(l) => f.debug_tuple("Long").field(l).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Self::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Self::List(list) => f.debug_tuple("List").field(&*list.read()).finish(),
            Self::Map(map) => f.debug_tuple("Map").field(&*map.read()).finish(),
            Self::Range(range) => f.debug_tuple("Range").field(range).finish(),
            Self::Iter(_) => f.write_str("Iter(..)"),
            Self::Status(status) => f.debug_tuple("Status").field(status).finish(),
            Self::Object(object) => f.debug_tuple("Object").field(object).finish(),
        }
    }
}

/// Formats a double the way the output directive prints it: integral values
/// keep a trailing `.0`, non-finite values use their names.
///
/// Finite values use the shortest round-trip form from `ryu`, which only
/// switches to scientific notation below `1e-5` or from `1e16` up. So
/// `1.5e10` prints as `15000000000.0`, not the host's `1.5E10`.
pub(crate) fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        ryu::Buffer::new().format_finite(v).to_owned()
    }
}

pub(crate) fn format_float(v: f32) -> String {
    if v.is_nan() {
        "NaN".to_owned()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else {
        ryu::Buffer::new().format_finite(v).to_owned()
    }
}

/// An inclusive integer range, walking upwards when `start <= end` and
/// downwards otherwise. Elements are computed on demand, so the size of a
/// range costs nothing until a loop walks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    start: i32,
    end: i32,
}

impl IntRange {
    pub const fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub const fn start(&self) -> i32 {
        self.start
    }

    pub const fn end(&self) -> i32 {
        self.end
    }

    const fn ascending(&self) -> bool {
        self.start <= self.end
    }

    /// Number of elements, never zero.
    pub fn size(&self) -> usize {
        let span = i64::from(self.start).abs_diff(i64::from(self.end));
        usize::try_from(span.saturating_add(1)).unwrap_or(usize::MAX)
    }

    /// The element at `index`, `None` past the end.
    pub fn get(&self, index: usize) -> Option<i32> {
        if index >= self.size() {
            return None;
        }
        let offset = i64::try_from(index).ok()?;
        let start = i64::from(self.start);
        let value = if self.ascending() {
            start.checked_add(offset)?
        } else {
            start.checked_sub(offset)?
        };
        i32::try_from(value).ok()
    }

    /// Index of `value` within the range.
    pub fn position(&self, value: i64) -> Option<usize> {
        let start = i64::from(self.start);
        let end = i64::from(self.end);
        let offset = if self.ascending() {
            if !(start..=end).contains(&value) {
                return None;
            }
            value.checked_sub(start)?
        } else {
            if !(end..=start).contains(&value) {
                return None;
            }
            start.checked_sub(value)?
        };
        usize::try_from(offset).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> {
        let range = *self;
        (0..self.size()).map_while(move |index| range.get(index))
    }
}

/// A one-shot host iterator shared between clones of the same value.
#[derive(Clone)]
pub struct ValueIter {
    inner: Arc<Mutex<Peekable<Box<dyn Iterator<Item = Value> + Send>>>>,
}

impl ValueIter {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Value> + Send + 'static,
    {
        let boxed: Box<dyn Iterator<Item = Value> + Send> = Box::new(iter);
        Self {
            inner: Arc::new(Mutex::new(boxed.peekable())),
        }
    }

    pub fn has_next(&self) -> bool {
        self.inner.lock().peek().is_some()
    }

    pub fn next_value(&self) -> Option<Value> {
        self.inner.lock().next()
    }
}

/// The `for` variable visible inside a loop body. A fresh status is bound for
/// every iteration, so a status captured by a nested loop as `for.outer` stays
/// identical to what the enclosing body sees as `for`.
#[derive(Debug)]
pub struct LoopStatus {
    index: usize,
    size: Option<usize>,
    last: Option<bool>,
    iterator_form: bool,
    outer: Value,
}

impl LoopStatus {
    pub(crate) const fn numeric(index: usize, outer: Value) -> Self {
        Self {
            index,
            size: None,
            last: None,
            iterator_form: false,
            outer,
        }
    }

    pub(crate) const fn iterator(index: usize, size: Option<usize>, last: bool, outer: Value) -> Self {
        Self {
            index,
            size,
            last: Some(last),
            iterator_form: true,
            outer,
        }
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn count(&self) -> usize {
        self.index.saturating_add(1)
    }

    pub const fn first(&self) -> bool {
        self.index == 0
    }

    pub const fn odd(&self) -> bool {
        self.count() % 2 == 1
    }

    pub const fn outer(&self) -> &Value {
        &self.outer
    }

    /// Looks up a status field by name. `None` when the field does not exist
    /// for this loop form.
    pub fn field(&self, name: &str) -> Option<Value> {
        Some(match name {
            "index" => Value::from(self.index),
            "count" => Value::from(self.count()),
            "first" => Value::Bool(self.first()),
            "odd" => Value::Bool(self.odd()),
            "even" => Value::Bool(!self.odd()),
            "outer" => self.outer.clone(),
            "last" => Value::Bool(self.last?),
            "size" if self.iterator_form => self.size.map_or(Value::Null, Value::from),
            _ => return None,
        })
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoopStatus(index={}, count={})", self.index, self.count())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Self::Long(l)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        match i32::try_from(n) {
            Ok(i) => Self::Int(i),
            Err(_) => Self::Long(i64::try_from(n).unwrap_or(i64::MAX)),
        }
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

impl<T: Into<Self>> From<IndexMap<String, T>> for Value {
    fn from(entries: IndexMap<String, T>) -> Self {
        Self::map(entries)
    }
}

impl<T: Into<Self>> From<HashMap<String, T>> for Value {
    fn from(entries: HashMap<String, T>) -> Self {
        Self::map(entries)
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use std::fmt;

    use indexmap::IndexMap;
    use serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{MapAccess, SeqAccess, Visitor},
        ser::{SerializeMap, SerializeSeq},
    };

    use super::Value;

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Null => serializer.serialize_unit(),
                Self::Bool(b) => serializer.serialize_bool(*b),
                Self::Int(i) => serializer.serialize_i32(*i),
                Self::Long(l) => serializer.serialize_i64(*l),
                Self::Float(f) => serializer.serialize_f32(*f),
                Self::Double(d) => serializer.serialize_f64(*d),
                Self::Str(s) => serializer.serialize_str(s),
                Self::List(list) => {
                    let list = list.read();
                    let mut seq = serializer.serialize_seq(Some(list.len()))?;
                    for item in list.iter() {
                        seq.serialize_element(item)?;
                    }
                    seq.end()
                }
                Self::Map(map) => {
                    let map = map.read();
                    let mut out = serializer.serialize_map(Some(map.len()))?;
                    for (key, value) in map.iter() {
                        out.serialize_entry(key, value)?;
                    }
                    out.end()
                }
                Self::Range(range) => {
                    let mut seq = serializer.serialize_seq(Some(range.size()))?;
                    for item in range.iter() {
                        seq.serialize_element(&item)?;
                    }
                    seq.end()
                }
                Self::Iter(_) | Self::Status(_) | Self::Object(_) => {
                    serializer.serialize_str(&self.to_string())
                }
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("any template value")
        }

        fn visit_unit<E>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_none<E>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
            Value::deserialize(deserializer)
        }

        fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
            Ok(Value::Bool(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
            Ok(i32::try_from(v).map_or(Value::Long(v), Value::Int))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
            Ok(i32::try_from(v).map_or_else(
                |_| i64::try_from(v).map_or(Value::Double(v as f64), Value::Long),
                Value::Int,
            ))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
            Ok(Value::Double(v))
        }

        fn visit_str<E>(self, v: &str) -> Result<Value, E> {
            Ok(Value::from(v))
        }

        fn visit_string<E>(self, v: String) -> Result<Value, E> {
            Ok(Value::from(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(item) = seq.next_element::<Value>()? {
                items.push(item);
            }
            Ok(Value::list(items))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, Value>()? {
                map.insert(key, value);
            }
            Ok(Value::map(map))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
