//! Identifier generation

/// Tool call id in OpenAI style (`call_<24 hex>`).
pub fn new_call_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &raw[..24])
}

/// Message id in Anthropic style (`msg_<24 hex>`).
pub fn new_message_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}", &raw[..24])
}
