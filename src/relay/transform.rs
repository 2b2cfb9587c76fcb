use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::{Directory, DirectoryError, IdentityResolver};
use crate::normalize::convert_datetimes;
use crate::publisher::OutboundBody;

use super::model::{BugRecord, EventRecord};
use super::RelaySettings;

const BUGZILLA_SEGMENT: &str = "bugzilla.";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topic {
    BugNew,
    BugUpdate,
}

impl Topic {
    pub fn from_destination(destination: &str) -> Self {
        if destination.contains("bug.create") {
            Self::BugNew
        } else {
            Self::BugUpdate
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BugNew => "bug.new",
            Self::BugUpdate => "bug.update",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DropReason {
    NonPublic { object_type: String },
    ProductNotAllowed { product: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPublic { object_type } => {
                write!(f, "message has no '{object_type}' field. Non public.")
            }
            Self::ProductNotAllowed { product } => {
                write!(f, "product '{product}' is not in the allowed products")
            }
        }
    }
}

#[derive(Debug)]
pub enum Classification {
    Publish { topic: Topic, body: OutboundBody },
    Dropped(DropReason),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed notification: {0}")]
    Malformed(String),
    #[error("notification {what} does not match the expected shape: {source}")]
    Projection {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Object type named by a destination such as
/// `/topic/VirtualTopic.eng.bugzilla.comment.create` (`comment`).
pub fn object_type(destination: &str) -> Option<&str> {
    let (_, rest) = destination.split_once(BUGZILLA_SEGMENT)?;
    rest.split('.').next().filter(|segment| !segment.is_empty())
}

pub fn classify<D: Directory>(
    body: Value,
    headers: &Map<String, Value>,
    settings: &RelaySettings,
    resolver: &IdentityResolver<D>,
) -> Result<Classification, TransformError> {
    let destination = headers
        .get("destination")
        .and_then(Value::as_str)
        .ok_or_else(|| TransformError::Malformed("missing destination header".to_owned()))?;
    let object = object_type(destination)
        .ok_or_else(|| {
            TransformError::Malformed(format!("destination '{destination}' names no object type"))
        })?
        .to_owned();

    let Value::Object(mut body) = body else {
        return Err(TransformError::Malformed("body is not a JSON object".to_owned()));
    };
    let Some(object_value) = body.remove(&object) else {
        return Ok(Classification::Dropped(DropReason::NonPublic { object_type: object }));
    };

    let (bug_value, mut object_dict) = if object == "bug" {
        (object_value, None)
    } else {
        let Value::Object(mut dict) = object_value else {
            return Err(TransformError::Malformed(format!("'{object}' is not a JSON object")));
        };
        let bug = dict
            .remove("bug")
            .ok_or_else(|| TransformError::Malformed(format!("'{object}' carries no bug")))?;
        (bug, Some(normalize_object(dict)))
    };

    let mut bug: BugRecord = serde_json::from_value(convert_datetimes(bug_value))
        .map_err(|source| TransformError::Projection { what: "bug", source })?;

    let product = bug.product.name();
    if !settings.products.iter().any(|allowed| allowed == product) {
        return Ok(Classification::Dropped(DropReason::ProductNotAllowed {
            product: product.to_owned(),
        }));
    }

    let event_value = body
        .remove("event")
        .ok_or_else(|| TransformError::Malformed("missing event".to_owned()))?;
    let mut event: EventRecord = serde_json::from_value(convert_datetimes(event_value))
        .map_err(|source| TransformError::Projection { what: "event", source })?;

    if settings.bz4compat {
        bz4_compat_transform(
            &mut bug,
            &mut event,
            &object,
            object_dict.as_mut(),
            &settings.weburl_base,
        );
    }

    let agent_name = resolver.resolve(&event.user.login)?;
    let mut usernames = BTreeSet::new();
    for email in affected_emails(&bug, &event, &settings.list_domain) {
        if email == event.user.login {
            continue;
        }
        if let Some(username) = resolver.resolve(&email)? {
            usernames.insert(username);
        }
    }
    if let Some(agent) = &agent_name {
        usernames.insert(agent.clone());
    }

    Ok(Classification::Publish {
        topic: Topic::from_destination(destination),
        body: OutboundBody {
            bug,
            event,
            object: object_dict.map(|dict| (object, dict)),
            headers: headers.clone(),
            agent_name,
            usernames: usernames.into_iter().collect(),
        },
    })
}

fn normalize_object(dict: Map<String, Value>) -> Map<String, Value> {
    match convert_datetimes(Value::Object(dict)) {
        Value::Object(dict) => dict,
        _ => Map::new(),
    }
}

/// Reshapes records the way Bugzilla 4 era consumers expect them.
pub fn bz4_compat_transform(
    bug: &mut BugRecord,
    event: &mut EventRecord,
    object: &str,
    object_dict: Option<&mut Map<String, Value>>,
    weburl_base: &str,
) {
    bug.assigned_to.flatten();
    if let Some(component) = bug.component.as_mut() {
        component.flatten();
    }
    bug.product.flatten();
    if bug.cc.is_none() {
        bug.cc = Some(Value::Array(Vec::new()));
    }
    if !bug.reporter.login.is_empty() {
        bug.creator = Some(bug.reporter.login.clone());
    }
    if bug.operating_system.as_ref().is_some_and(is_truthy) {
        bug.op_sys = bug.operating_system.clone();
    }
    if bug.weburl.as_deref().map_or(true, str::is_empty) {
        bug.weburl = Some(format!("{weburl_base}?id={}", bug.id));
    }

    event.who = Some(event.user.login.clone());
    for change in &mut event.changes {
        change.field_name = Some(change.field.clone());
    }

    if object == "comment" {
        if let Some(dict) = object_dict {
            dict.insert("author".to_owned(), Value::String(event.user.login.clone()));
        }
    }
}

/// Emails of everyone the change concerns, minus mailing lists.
pub fn affected_emails(bug: &BugRecord, event: &EventRecord, list_domain: &str) -> BTreeSet<String> {
    let mut emails = BTreeSet::new();
    emails.insert(event.user.login.clone());
    emails.insert(bug.reporter.login.clone());
    emails.insert(bug.assigned_to.login().to_owned());

    for change in &event.changes {
        match change.field.as_str() {
            "cc" => emails.extend(
                change
                    .added
                    .split(',')
                    .map(str::trim)
                    .filter(|email| !email.is_empty())
                    .map(str::to_owned),
            ),
            "flag.needinfo" => {
                if let Some(email) = needinfo_email(&change.added) {
                    emails.insert(email.to_owned());
                }
            }
            _ => {}
        }
    }

    emails.retain(|email| !email.is_empty() && !email.ends_with(list_domain));
    emails
}

/// Address inside a needinfo flag value such as `? (someone@example.com)`.
pub fn needinfo_email(flag_value: &str) -> Option<&str> {
    let (_, rest) = flag_value.rsplit_once('(')?;
    let (inner, _) = rest.split_once(')')?;
    Some(inner.trim()).filter(|email| !email.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
        Value::Number(_) => true,
    }
}
