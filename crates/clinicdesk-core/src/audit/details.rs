use serde_json::{json, Map, Value};

use super::entry::{AuditAction, AuditType, FieldChange};

/// Entity identification and detail payload derived from an action's data.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Shaped {
    pub entity_id: Option<String>,
    pub entity_name: Option<String>,
    pub details: Value,
}

/// Fields that never count as a user-visible change.
const IGNORED_FIELDS: &[&str] = &["id", "updatedAt", "createdAt"];

fn text(data: &Value, field: &str) -> Option<String> {
    match data.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(data: &Value, name: &str) -> Value {
    data.get(name).cloned().unwrap_or(Value::Null)
}

fn entity_name(entry_type: AuditType, data: &Value) -> Option<String> {
    match entry_type {
        AuditType::Patient => text(data, "name").or_else(|| {
            let first = text(data, "firstName").unwrap_or_default();
            let last = text(data, "lastName").unwrap_or_default();
            let full = format!("{} {}", first, last).trim().to_string();
            (!full.is_empty()).then_some(full)
        }),
        AuditType::Employee | AuditType::Inventory => text(data, "name"),
        AuditType::User => text(data, "name").or_else(|| text(data, "email")),
        AuditType::System => text(data, "entityName"),
    }
}

/// Names of top-level fields whose values differ between two objects.
pub(crate) fn changed_fields(old: &Value, new: &Value) -> Vec<String> {
    diff(old, new).into_iter().map(|c| c.field).collect()
}

/// Per-field differences between two JSON objects, in key order.
pub(crate) fn diff(old: &Value, new: &Value) -> Vec<FieldChange> {
    let (Some(old), Some(new)) = (old.as_object(), new.as_object()) else {
        return Vec::new();
    };

    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter(|k| !IGNORED_FIELDS.contains(&k.as_str()))
        .filter_map(|k| {
            let before = old.get(k).cloned().unwrap_or(Value::Null);
            let after = new.get(k).cloned().unwrap_or(Value::Null);
            (before != after).then(|| FieldChange {
                field: k.clone(),
                old_value: before,
                new_value: after,
            })
        })
        .collect()
}

fn data_keys(data: &Value) -> Vec<String> {
    data.as_object()
        .map(|o| {
            o.keys()
                .filter(|k| !IGNORED_FIELDS.contains(&k.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn created_details(entry_type: AuditType, data: &Value, name: Option<&str>) -> Value {
    match entry_type {
        AuditType::Patient => json!({
            "patientName": name,
            "dateOfBirth": field(data, "dateOfBirth"),
            "phone": field(data, "phone"),
            "email": field(data, "email"),
        }),
        AuditType::Employee => json!({
            "employeeName": name,
            "position": field(data, "position"),
            "department": field(data, "department"),
        }),
        AuditType::Inventory => json!({
            "itemName": name,
            "category": field(data, "category"),
            "initialQuantity": field(data, "quantity"),
        }),
        AuditType::User => json!({
            "email": field(data, "email"),
            "role": field(data, "role"),
        }),
        AuditType::System => data.clone(),
    }
}

fn name_key(entry_type: AuditType) -> &'static str {
    match entry_type {
        AuditType::Patient => "patientName",
        AuditType::Employee => "employeeName",
        AuditType::Inventory => "itemName",
        AuditType::User => "userName",
        AuditType::System => "entityName",
    }
}

/// Shape the detail payload for `entry_type`/`action`.
///
/// - create: the created fields
/// - update: `changedFields` (from old/new values, else the keys of `data`)
/// - delete: the full record under `deletedRecord`
/// - system: `data` verbatim
pub(crate) fn shape(
    entry_type: AuditType,
    action: AuditAction,
    data: &Value,
    old_value: Option<&Value>,
    new_value: Option<&Value>,
) -> Shaped {
    let entity_id = text(data, "id");
    let entity_name = entity_name(entry_type, data);

    if entry_type == AuditType::System {
        return Shaped {
            entity_id,
            entity_name,
            details: data.clone(),
        };
    }

    let details = match action {
        AuditAction::Create => created_details(entry_type, data, entity_name.as_deref()),
        AuditAction::Update => {
            let fields = match (old_value, new_value) {
                (Some(old), Some(new)) => changed_fields(old, new),
                _ => data_keys(data),
            };
            let mut details = Map::new();
            details.insert(name_key(entry_type).to_string(), json!(entity_name));
            details.insert("changedFields".to_string(), json!(fields));
            Value::Object(details)
        }
        AuditAction::Delete => json!({ "deletedRecord": data }),
        AuditAction::Login | AuditAction::Logout => json!({
            "email": field(data, "email"),
            "role": field(data, "role"),
        }),
        AuditAction::Access => json!({
            "resource": data.get("resource").cloned().unwrap_or_else(|| json!(entry_type.as_str())),
        }),
        AuditAction::Export | AuditAction::Import => data.clone(),
    };

    Shaped {
        entity_id,
        entity_name,
        details,
    }
}
