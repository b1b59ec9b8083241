//! # Property maps and their merge order.
//!
//! Component properties come from three sources, merged in this order (later wins):
//!
//! 1. template defaults declared at discovery time;
//! 2. matched configurations, in the order their templates are declared;
//! 3. synthetic identity properties (`component.name`, `component.id`).
//!
//! ```rust
//! use scrim::properties::{self, Identity, Properties};
//! use serde_json::json;
//!
//! let mut defaults = Properties::new();
//! defaults.insert("port".into(), json!(80));
//! let mut config = Properties::new();
//! config.insert("port".into(), json!(8080));
//!
//! let merged = properties::merge(&defaults, [&config], Identity::new("web", 7));
//! assert_eq!(merged["port"], json!(8080));
//! assert_eq!(merged["component.id"], json!(7));
//! ```

use serde_json::Value;

/// Property map; values are JSON values.
pub type Properties = serde_json::Map<String, Value>;

/// Name of the component an instance belongs to.
pub const COMPONENT_NAME: &str = "component.name";
/// Runtime-unique id of one instance.
pub const COMPONENT_ID: &str = "component.id";
/// Pid of a configuration.
pub const SERVICE_PID: &str = "service.pid";
/// Factory pid of a factory configuration.
pub const FACTORY_PID: &str = "service.factoryPid";
/// Registry ranking; higher ranks sort first.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Registry-assigned service id.
pub const SERVICE_ID: &str = "service.id";
/// Service types a registration was published under.
pub const OBJECT_CLASS: &str = "objectClass";
/// Registry scope of a registration (`singleton`, `bundle`, `prototype`).
pub const SERVICE_SCOPE: &str = "service.scope";

/// Synthetic identity properties of one instance.
#[derive(Clone, Copy, Debug)]
pub struct Identity<'a> {
    component: &'a str,
    id: u64,
}

impl<'a> Identity<'a> {
    pub fn new(component: &'a str, id: u64) -> Self {
        Self { component, id }
    }
}

/// Merges property sources with documented precedence.
pub fn merge<'a, I>(defaults: &Properties, configurations: I, identity: Identity<'_>) -> Properties
where
    I: IntoIterator<Item = &'a Properties>,
{
    let mut out = defaults.clone();
    for config in configurations {
        for (k, v) in config {
            out.insert(k.clone(), v.clone());
        }
    }
    out.insert(COMPONENT_NAME.into(), Value::from(identity.component));
    out.insert(COMPONENT_ID.into(), Value::from(identity.id));
    out
}

/// Reads an integer property, accepting integral JSON numbers and numeric strings.
pub fn integer(props: &Properties, key: &str) -> Option<Result<i64, String>> {
    let value = props.get(key)?;
    Some(match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| format!("{key}={n} is not an integer")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("{key}={s:?} is not an integer")),
        other => Err(format!("{key}={other} is not an integer")),
    })
}

/// Reads a string property.
pub fn string<'p>(props: &'p Properties, key: &str) -> Option<&'p str> {
    props.get(key).and_then(Value::as_str)
}
