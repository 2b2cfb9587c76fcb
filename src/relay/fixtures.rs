//! Notifications shaped like the ones the Bugzilla push extension emits.

use serde_json::{json, Map, Value};

use crate::identity::testing::FakeDirectory;

use super::RelaySettings;

pub fn settings() -> RelaySettings {
    RelaySettings {
        products: vec!["Fedora".to_owned(), "Fedora EPEL".to_owned()],
        bz4compat: true,
        weburl_base: "https://bugzilla.redhat.com/show_bug.cgi".to_owned(),
        list_domain: "lists.fedoraproject.org".to_owned(),
        topic_prefix: None,
    }
}

pub fn directory() -> FakeDirectory {
    FakeDirectory::new()
        .with_user("dgunchev@gmail.com", "dgunchev")
        .with_user("lvrabec@redhat.com", "lv")
        .with_user("awilliam@redhat.com", "adamw")
        .with_user("peter@example.org", "peter")
}

fn headers(destination: &str) -> Map<String, Value> {
    let mut headers = Map::new();
    headers.insert("destination".to_owned(), json!(destination));
    headers.insert("timestamp".to_owned(), json!("1555619221000"));
    headers.insert("message-id".to_owned(), json!("ID:messaging-devops-broker01-1"));
    headers.insert("subscription".to_owned(), json!("/queue/fedora_from_esb"));
    headers
}

fn user(id: i64, login: &str, real_name: &str) -> Value {
    json!({"id": id, "login": login, "real_name": real_name})
}

fn bug(id: i64, product: &str, reporter: Value, assigned_to: Value) -> Value {
    json!({
        "id": id,
        "alias": [],
        "classification": "Fedora",
        "component": {"id": 130279, "name": "selinux-policy"},
        "creation_time": "2019-04-18T20:27:01",
        "flags": [],
        "is_private": false,
        "keywords": [],
        "last_change_time": "2019-04-18T20:27:01",
        "operating_system": "Unspecified",
        "platform": "x86_64",
        "priority": "unspecified",
        "product": {"id": 49, "name": product},
        "qa_contact": user(372015, "extras-qa@fedoraproject.org", "Fedora Extras Quality Assurance"),
        "reporter": reporter,
        "assigned_to": assigned_to,
        "resolution": "",
        "severity": "unspecified",
        "status": {"id": 1, "name": "NEW"},
        "summary": "SELinux is preventing touch from 'write' accesses on the directory .",
        "url": "",
        "version": {"id": 5846, "name": "30"},
        "whiteboard": "abrt_hash:4c5ad3a8"
    })
}

fn event(action: &str, target: &str, routing_key: &str, bug_id: i64, user: Value, changes: Value) -> Value {
    json!({
        "action": action,
        "target": target,
        "routing_key": routing_key,
        "bug_id": bug_id,
        "change_set": "62607.1555619221.87237",
        "rule_id": 123,
        "time": "2019-04-18T20:27:01",
        "user": user,
        "changes": changes
    })
}

pub fn bug_create() -> (Value, Map<String, Value>) {
    let reporter = user(401767, "dgunchev@gmail.com", "Doncho Gunchev");
    let body = json!({
        "bug": bug(
            1701391,
            "Fedora",
            reporter.clone(),
            user(353163, "lvrabec@redhat.com", "Lukas Vrabec"),
        ),
        "event": event("create", "bug", "bug.create", 1701391, reporter, json!([]))
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.bug.create"))
}

pub fn bug_modify() -> (Value, Map<String, Value>) {
    let body = json!({
        "bug": bug(
            1701353,
            "Fedora",
            user(282165, "upstream-release-monitoring@fedoraproject.org", "Upstream Release Monitoring"),
            user(156185, "awilliam@redhat.com", "Adam Williamson"),
        ),
        "event": event(
            "modify",
            "bug",
            "bug.modify",
            1701353,
            user(434010, "builds@example.com", "Build System"),
            json!([
                {"field": "status", "removed": "NEW", "added": "MODIFIED"},
                {"field": "bug_status", "removed": "NEW", "added": "MODIFIED"}
            ]),
        )
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.bug.modify"))
}

pub fn bug_modify_four_changes() -> (Value, Map<String, Value>) {
    let body = json!({
        "bug": bug(
            1702701,
            "Fedora",
            user(156185, "awilliam@redhat.com", "Adam Williamson"),
            user(246587, "kernel-maint@redhat.com", "Kernel Maintainer List"),
        ),
        "event": event(
            "modify",
            "bug",
            "bug.modify",
            1702701,
            user(370504, "pwhalen@redhat.com", "Paul Whalen"),
            json!([
                {"field": "status", "removed": "NEW", "added": "ASSIGNED"},
                {"field": "keywords", "removed": "", "added": "Reopened"},
                {"field": "blocks", "removed": "", "added": "1690429"},
                {"field": "flag.needinfo", "removed": "", "added": "? (jforbes@redhat.com)"}
            ]),
        )
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.bug.modify"))
}

pub fn comment_create() -> (Value, Map<String, Value>) {
    let body = json!({
        "comment": {
            "body": "qa09 and qa14 have 8 560 GB SAS drives which are RAID-6 together.",
            "creation_time": "2019-04-18T15:55:38",
            "number": 8,
            "id": 1691487,
            "is_private": false,
            "bug": bug(
                1663951,
                "Fedora",
                user(156185, "awilliam@redhat.com", "Adam Williamson"),
                user(143592, "smooge@redhat.com", "Stephen John Smoogen"),
            )
        },
        "event": event(
            "create",
            "comment",
            "comment.create",
            1663951,
            user(143592, "smooge@redhat.com", "Stephen John Smoogen"),
            json!([]),
        )
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.comment.create"))
}

pub fn attachment_create() -> (Value, Map<String, Value>) {
    let peter = user(215740, "peter@example.org", "Peter");
    let body = json!({
        "attachment": {
            "description": "File: var_log_messages",
            "file_name": "var_log_messages",
            "is_patch": false,
            "creation_time": "2019-04-18T18:01:51",
            "id": 1556193,
            "flags": [],
            "last_change_time": "2019-04-18T18:01:51",
            "content_type": "text/plain",
            "is_obsolete": false,
            "is_private": false,
            "bug": bug(
                1701353,
                "Fedora",
                peter.clone(),
                user(247906, "kernel-maint@redhat.com", "Kernel Maintainer List"),
            )
        },
        "event": event("create", "attachment", "attachment.create", 1701353, peter, json!([]))
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.attachment.create"))
}

pub fn private_message() -> (Value, Map<String, Value>) {
    let body = json!({
        "event": event(
            "modify",
            "bug",
            "bug.modify",
            1701354,
            user(156185, "awilliam@redhat.com", "Adam Williamson"),
            json!([{"field": "status", "removed": "NEW", "added": "CLOSED"}]),
        )
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.bug.modify"))
}

pub fn other_product() -> (Value, Map<String, Value>) {
    let reporter = user(156185, "awilliam@redhat.com", "Adam Williamson");
    let body = json!({
        "bug": bug(1701355, "Red Hat Enterprise Linux 8", reporter.clone(), reporter.clone()),
        "event": event("create", "bug", "bug.create", 1701355, reporter, json!([]))
    });
    (body, headers("/topic/VirtualTopic.eng.bugzilla.bug.create"))
}
