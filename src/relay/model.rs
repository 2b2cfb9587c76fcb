use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Keys every emitted bug record carries, present or null.
pub const BUG_FIELDS: [&str; 27] = [
    "alias",
    "assigned_to",
    "cc",
    "classification",
    "component",
    "creation_time",
    "creator",
    "flags",
    "id",
    "is_private",
    "keywords",
    "last_change_time",
    "op_sys",
    "operating_system",
    "platform",
    "priority",
    "product",
    "qa_contact",
    "reporter",
    "resolution",
    "severity",
    "status",
    "summary",
    "url",
    "version",
    "weburl",
    "whiteboard",
];

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserRef {
    #[serde(default)]
    pub id: Option<i64>,
    pub login: String,
    #[serde(default)]
    pub real_name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NamedRef {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

/// A reference kept either as the nested object Bugzilla sends or
/// flattened to a single string for legacy consumers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Shaped<T> {
    Nested(T),
    Flat(String),
}

impl Shaped<UserRef> {
    pub fn login(&self) -> &str {
        match self {
            Self::Nested(user) => &user.login,
            Self::Flat(login) => login,
        }
    }

    pub fn flatten(&mut self) {
        if let Self::Nested(user) = self {
            if !user.login.is_empty() {
                *self = Self::Flat(user.login.clone());
            }
        }
    }
}

impl Shaped<NamedRef> {
    pub fn name(&self) -> &str {
        match self {
            Self::Nested(named) => &named.name,
            Self::Flat(name) => name,
        }
    }

    pub fn flatten(&mut self) {
        if let Self::Nested(named) = self {
            if !named.name.is_empty() {
                *self = Self::Flat(named.name.clone());
            }
        }
    }
}

/// Public projection of a Bugzilla bug. Fields outside the allow-list are
/// dropped on deserialization.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BugRecord {
    #[serde(default)]
    pub alias: Option<Value>,
    pub assigned_to: Shaped<UserRef>,
    #[serde(default)]
    pub cc: Option<Value>,
    #[serde(default)]
    pub classification: Option<Value>,
    #[serde(default)]
    pub component: Option<Shaped<NamedRef>>,
    #[serde(default)]
    pub creation_time: Option<Value>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub flags: Option<Value>,
    pub id: i64,
    #[serde(default)]
    pub is_private: Option<Value>,
    #[serde(default)]
    pub keywords: Option<Value>,
    #[serde(default)]
    pub last_change_time: Option<Value>,
    #[serde(default)]
    pub op_sys: Option<Value>,
    #[serde(default)]
    pub operating_system: Option<Value>,
    #[serde(default)]
    pub platform: Option<Value>,
    #[serde(default)]
    pub priority: Option<Value>,
    pub product: Shaped<NamedRef>,
    #[serde(default)]
    pub qa_contact: Option<UserRef>,
    pub reporter: UserRef,
    #[serde(default)]
    pub resolution: Option<Value>,
    #[serde(default)]
    pub severity: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub weburl: Option<String>,
    #[serde(default)]
    pub whiteboard: Option<Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ChangeEntry {
    pub field: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub added: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub removed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct EventRecord {
    pub action: String,
    pub target: String,
    pub user: UserRef,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
