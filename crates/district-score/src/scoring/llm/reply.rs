use serde::de::DeserializeOwned;

/// Locates the outermost JSON object in a model reply.
///
/// Models wrap JSON in prose or Markdown fences; everything outside the first `{` and the last
/// `}` is discarded.
pub fn extract_json_block(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

/// Parses a reply into `T`, returning `None` when no valid object can be recovered.
pub fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Option<T> {
    let block = extract_json_block(reply)?;
    serde_json::from_str(block).ok()
}
