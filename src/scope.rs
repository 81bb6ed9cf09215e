use std::collections::HashMap;

use crate::value::Value;

/// Handle to a frame in a [`Scopes`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeId(usize);

/// Where a plain `name = value` assignment writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum AssignPolicy {
    /// Overwrite the nearest frame that already holds the name, otherwise the
    /// root frame.
    #[default]
    Wisdom,
    /// Always the current frame.
    Local,
    /// Always the root frame.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Jump {
    #[default]
    None,
    Break,
    Continue,
    Return,
}

/// Per-render control state: pending jump, assignment policy, null-safe mode.
#[derive(Debug, Default)]
pub(crate) struct Ctrl {
    jump: Jump,
    policy: AssignPolicy,
    null_safe: bool,
}

impl Ctrl {
    pub(crate) const fn jump(&self) -> Jump {
        self.jump
    }

    pub(crate) const fn is_jump(&self) -> bool {
        !matches!(self.jump, Jump::None)
    }

    pub(crate) const fn set_jump(&mut self, jump: Jump) {
        self.jump = jump;
    }

    pub(crate) const fn clear_jump(&mut self) {
        self.jump = Jump::None;
    }

    pub(crate) const fn policy(&self) -> AssignPolicy {
        self.policy
    }

    /// Installs `policy` and hands back the previous one for restoring.
    pub(crate) const fn replace_policy(&mut self, policy: AssignPolicy) -> AssignPolicy {
        std::mem::replace(&mut self.policy, policy)
    }

    pub(crate) const fn is_null_safe(&self) -> bool {
        self.null_safe
    }

    pub(crate) const fn replace_null_safe(&mut self, null_safe: bool) -> bool {
        std::mem::replace(&mut self.null_safe, null_safe)
    }
}

#[derive(Debug)]
struct Frame {
    parent: Option<ScopeId>,
    vars: HashMap<String, Value>,
}

/// The variable frames of one render.
///
/// Frames live in a stack-shaped arena: a child is pushed when a block is
/// entered and truncated away when it is left, so a [`ScopeId`] never outlives
/// the block that created it. Lookups walk parent links up to the root frame,
/// which holds the caller's data, and then fall back to the engine's shared
/// objects.
#[derive(Debug)]
pub(crate) struct Scopes<'s> {
    frames: Vec<Frame>,
    shared: &'s HashMap<String, Value>,
}

impl<'s> Scopes<'s> {
    pub(crate) fn new(data: HashMap<String, Value>, shared: &'s HashMap<String, Value>) -> Self {
        Self {
            frames: vec![Frame {
                parent: None,
                vars: data,
            }],
            shared,
        }
    }

    pub(crate) const fn root() -> ScopeId {
        ScopeId(0)
    }

    pub(crate) fn push(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.frames.len());
        self.frames.push(Frame {
            parent: Some(parent),
            vars: HashMap::new(),
        });
        id
    }

    /// Drops `scope` and every frame pushed after it.
    pub(crate) fn pop(&mut self, scope: ScopeId) {
        if scope.0 > 0 {
            self.frames.truncate(scope.0);
        }
    }

    fn frame(&self, scope: ScopeId) -> Option<&Frame> {
        self.frames.get(scope.0)
    }

    fn frame_mut(&mut self, scope: ScopeId) -> Option<&mut Frame> {
        self.frames.get_mut(scope.0)
    }

    /// Walks from `scope` to the root and returns the first frame holding `key`.
    fn find(&self, scope: ScopeId, key: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let frame = self.frame(id)?;
            if frame.vars.contains_key(key) {
                return Some(id);
            }
            current = frame.parent;
        }
        None
    }

    /// Resolves `key`, falling back to the shared objects. Missing names are null.
    pub(crate) fn get(&self, scope: ScopeId, key: &str) -> Value {
        self.find(scope, key)
            .and_then(|id| self.frame(id))
            .and_then(|frame| frame.vars.get(key))
            .or_else(|| self.shared.get(key))
            .cloned()
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn get_local(&self, scope: ScopeId, key: &str) -> Option<&Value> {
        self.frame(scope).and_then(|frame| frame.vars.get(key))
    }

    pub(crate) fn set(&mut self, scope: ScopeId, key: &str, value: Value, policy: AssignPolicy) {
        match policy {
            AssignPolicy::Wisdom => self.set_wisdom(scope, key, value),
            AssignPolicy::Local => self.set_local(scope, key, value),
            AssignPolicy::Global => self.set_global(key, value),
        }
    }

    pub(crate) fn set_wisdom(&mut self, scope: ScopeId, key: &str, value: Value) {
        let target = self.find(scope, key).unwrap_or_else(Self::root);
        self.insert(target, key, value);
    }

    pub(crate) fn set_local(&mut self, scope: ScopeId, key: &str, value: Value) {
        self.insert(scope, key, value);
    }

    pub(crate) fn set_global(&mut self, key: &str, value: Value) {
        self.insert(Self::root(), key, value);
    }

    fn insert(&mut self, scope: ScopeId, key: &str, value: Value) {
        if let Some(frame) = self.frame_mut(scope) {
            if let Some(slot) = frame.vars.get_mut(key) {
                *slot = value;
            } else {
                frame.vars.insert(key.to_owned(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(shared: &HashMap<String, Value>) -> Scopes<'_> {
        let mut data = HashMap::new();
        data.insert("x".to_owned(), Value::Int(1));
        Scopes::new(data, shared)
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lookup_walks_parents_then_shared() {
        let mut shared = HashMap::new();
        shared.insert("site".to_owned(), Value::from("hashlate"));
        let mut scopes = scopes(&shared);
        let child = scopes.push(Scopes::root());
        let grandchild = scopes.push(child);

        assert_eq!(scopes.get(grandchild, "x"), Value::Int(1));
        assert_eq!(scopes.get(grandchild, "site"), Value::from("hashlate"));
        assert_eq!(scopes.get(grandchild, "missing"), Value::Null);
        assert_eq!(scopes.find(grandchild, "x"), Some(Scopes::root()));
        assert_eq!(scopes.find(grandchild, "site"), None, "shared objects live outside the frames");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_wisdom_overwrites_nearest_holder_or_root() {
        let shared = HashMap::new();
        let mut scopes = scopes(&shared);
        let child = scopes.push(Scopes::root());
        scopes.set_local(child, "y", Value::Int(5));
        let inner = scopes.push(child);

        scopes.set(inner, "y", Value::Int(6), AssignPolicy::Wisdom);
        assert_eq!(scopes.get_local(child, "y"), Some(&Value::Int(6)));
        assert_eq!(scopes.get_local(inner, "y"), None);

        scopes.set(inner, "fresh", Value::Int(7), AssignPolicy::Wisdom);
        assert_eq!(scopes.get_local(Scopes::root(), "fresh"), Some(&Value::Int(7)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_local_and_global() {
        let shared = HashMap::new();
        let mut scopes = scopes(&shared);
        let child = scopes.push(Scopes::root());

        scopes.set(child, "x", Value::Int(2), AssignPolicy::Local);
        assert_eq!(scopes.get(child, "x"), Value::Int(2));
        assert_eq!(scopes.get(Scopes::root(), "x"), Value::Int(1));

        scopes.set(child, "g", Value::Int(3), AssignPolicy::Global);
        assert_eq!(scopes.get_local(Scopes::root(), "g"), Some(&Value::Int(3)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_pop_discards_child_frames() {
        let shared = HashMap::new();
        let mut scopes = scopes(&shared);
        let child = scopes.push(Scopes::root());
        scopes.set_local(child, "tmp", Value::Int(1));
        scopes.pop(child);

        let again = scopes.push(Scopes::root());
        assert_eq!(again, child);
        assert_eq!(scopes.get(again, "tmp"), Value::Null);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_ctrl_restores() {
        let mut ctrl = Ctrl::default();
        assert_eq!(ctrl.policy(), AssignPolicy::Wisdom);
        let previous = ctrl.replace_policy(AssignPolicy::Global);
        assert_eq!(ctrl.policy(), AssignPolicy::Global);
        ctrl.replace_policy(previous);
        assert_eq!(ctrl.policy(), AssignPolicy::Wisdom);

        ctrl.set_jump(Jump::Break);
        assert!(ctrl.is_jump());
        ctrl.clear_jump();
        assert_eq!(ctrl.jump(), Jump::None);

        assert!(!ctrl.replace_null_safe(true));
        assert!(ctrl.is_null_safe());
    }
}
