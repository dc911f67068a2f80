use crate::message::MessageKind;
use serde_json::Value;

/// Extract a displayable string from a raw message payload.
///
/// Text payloads pass through verbatim. Anything else is expected to be a
/// JSON-encoded provider payload: known shape fields are probed in a fixed
/// per-kind priority, then the generic `message`/`text`/`content` fields,
/// then an empty string. A payload that fails to parse comes back verbatim.
/// Total: never panics, always returns a string.
pub fn extract_content(kind: MessageKind, raw: &str) -> String {
    if kind == MessageKind::Text {
        return raw.to_string();
    }

    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return raw.to_string(),
    };

    match kind {
        MessageKind::Image | MessageKind::Video => field(&value, "caption")
            .or_else(|| generic(&value))
            .unwrap_or_default(),
        MessageKind::Document => field(&value, "fileName")
            .map(|name| format!("Documento: {name}"))
            .or_else(|| generic(&value))
            .unwrap_or_default(),
        MessageKind::Audio => "Áudio".to_string(),
        MessageKind::Location => "Localização".to_string(),
        MessageKind::Contact => "Contato".to_string(),
        // Text is handled above; the generic probe keeps this arm total
        MessageKind::Text | MessageKind::Interactive | MessageKind::Callback => {
            generic(&value).unwrap_or_default()
        }
    }
}

fn field(value: &Value, name: &str) -> Option<String> {
    value
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn generic(value: &Value) -> Option<String> {
    ["message", "text", "content"]
        .iter()
        .find_map(|name| field(value, name))
}
