use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::{Map, Value};

/// A successful method outcome: the result plus out-of-band `extra` fields.
///
/// The worker adds `extra.time` to every reply; a method only sets the
/// fields it wants on top of that.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub result: Value,
    pub extra: Map<String, Value>,
}

impl Reply {
    pub fn new(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl From<Value> for Reply {
    fn from(result: Value) -> Self {
        Self::new(result)
    }
}

/// A callable worker method.
///
/// Methods receive the request params as-is. Returning an
/// [`ErrorObject`](crate::ErrorObject) through `anyhow` answers with that
/// exact error; any other error becomes a generic internal error.
pub type Method = Arc<dyn Fn(&Value) -> anyhow::Result<Reply> + Send + Sync>;

/// The set of methods a worker program can run, keyed by name.
///
/// Each transport receives its registry at construction, so different pools
/// can run entirely different programs side by side.
///
/// # Example
/// ```
/// use serde_json::{Value, json};
/// use shopfloor::MethodRegistry;
///
/// let methods = MethodRegistry::new().with("len", |params: &Value| {
///     Ok(json!(params.as_array().map_or(0, Vec::len)))
/// });
/// assert!(methods.contains("len"));
/// ```
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(name, method);
        self
    }

    /// Builder form of [`Self::register_reply`].
    #[must_use]
    pub fn with_reply<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.register_reply(name, method);
        self
    }

    /// Adds or replaces the method called `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register_reply(name, move |params: &Value| method(params).map(Reply::from))
    }

    /// Adds or replaces a method that sets its own `extra` fields.
    pub fn register_reply<F>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        F: Fn(&Value) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodRegistry")
            .field("methods", &names)
            .finish()
    }
}
