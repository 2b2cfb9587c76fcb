use sha2::{Digest, Sha256};

use crate::publisher::OutboundBody;

pub const BUG_URL_BASE: &str = "https://bugzilla.redhat.com/show_bug.cgi?id=";
pub const APP_ICON_URL: &str = "https://bugzilla.redhat.com/extensions/RedHat/web/css/favicon.ico?v=0";
const LIBRAVATAR_BASE: &str = "https://seccdn.libravatar.org/avatar/";
const TITLE_MAX_CHARS: usize = 40;

/// Bugzilla components that are not packages.
const NOT_PACKAGES: [&str; 8] = [
    "distribution",
    "LiveCD",
    "LiveCD - FEL",
    "LiveCD - Games",
    "LiveCD - KDE",
    "LiveCD - LXDE",
    "LiveCD - Xfce",
    "Package Review",
];

/// One-line description of the change, e.g.
/// `adamw updated 'status' and 'cc' on RHBZ#1701391 'kernel panic on boot'`.
pub fn summary(body: &OutboundBody, user: &str) -> String {
    let id = body.bug.id;
    let title = truncated_title(body.bug.summary.as_deref().unwrap_or_default());
    let action = body.event.action.as_str();
    let target = body.event.target.as_str();

    if action == "create" {
        if target == "bug" {
            return format!("{user} filed a new bug RHBZ#{id} '{title}'");
        }
        return format!("{user} added {target} on RHBZ#{id} '{title}'");
    }

    let fields: Vec<&str> = body
        .event
        .changes
        .iter()
        .map(|change| change.field.as_str())
        .collect();
    let fields = comma_join(&fields);
    if target == "bug" {
        format!("{user} updated {fields} on RHBZ#{id} '{title}'")
    } else {
        format!("{user} updated {fields} for {target} on RHBZ#{id} '{title}'")
    }
}

pub fn comma_join(fields: &[&str]) -> String {
    let quoted: Vec<String> = fields.iter().map(|field| format!("'{field}'")).collect();
    match quoted.as_slice() {
        [] => "something unknown".to_owned(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

pub fn url(body: &OutboundBody) -> String {
    format!("{BUG_URL_BASE}{}", body.bug.id)
}

pub fn app_icon() -> &'static str {
    APP_ICON_URL
}

pub fn packages(body: &OutboundBody) -> Vec<String> {
    match component_name(body) {
        Some(component) if !NOT_PACKAGES.contains(&component) => vec![component.to_owned()],
        _ => Vec::new(),
    }
}

pub fn agent_avatar(body: &OutboundBody) -> String {
    libravatar_url(&body.event.user.login)
}

pub fn libravatar_url(email: &str) -> String {
    let digest = Sha256::digest(email.trim().to_lowercase().as_bytes());
    format!("{LIBRAVATAR_BASE}{}?s=64&d=retro", hex::encode(digest))
}

pub fn assigned_to_email(body: &OutboundBody) -> &str {
    body.bug.assigned_to.login()
}

pub fn component_name(body: &OutboundBody) -> Option<&str> {
    body.bug.component.as_ref().map(|component| component.name())
}

pub fn product_name(body: &OutboundBody) -> &str {
    body.bug.product.name()
}

fn truncated_title(title: &str) -> String {
    if title.chars().count() > TITLE_MAX_CHARS {
        let head: String = title.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        title.to_owned()
    }
}
