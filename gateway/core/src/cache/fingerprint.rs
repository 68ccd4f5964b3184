//! Request fingerprints
//!
//! Only fields that change the generated text feed the hash. Caller identity,
//! request id, priority and timestamps are excluded so equal logical requests
//! from different callers share one entry.

use xxhash_rust::xxh3::xxh3_128;

use crate::request::Request;

/// Field separator; cannot appear in normalized text
const SEP: char = '\u{1f}';

/// Collapse whitespace runs and trim
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable cache key for a request
///
/// `model` is the hinted model, or `"auto"` when the router chooses.
#[must_use]
pub fn fingerprint(request: &Request) -> String {
    let model = request.model_hint.as_deref().unwrap_or("auto");
    let context = request.context.as_deref().map(normalize).unwrap_or_default();
    let sampling = request.sampling.map_or_else(
        || "model-default".to_string(),
        |s| {
            format!(
                "{:08x}/{:08x}/{}/{:08x}",
                s.temperature.to_bits(),
                s.top_p.to_bits(),
                s.top_k,
                s.repeat_penalty.to_bits()
            )
        },
    );

    let input = format!(
        "{prompt}{SEP}{context}{SEP}{model}{SEP}{sampling}{SEP}{max}{SEP}{enrich}",
        prompt = normalize(&request.prompt),
        max = request.max_tokens,
        enrich = request.enrich,
    );

    format!("{:032x}", xxh3_128(input.as_bytes()))
}

/// Cache key for retrieval results
#[must_use]
pub fn retrieval_key(query: &str, limit: usize) -> String {
    let input = format!("{}{SEP}{limit}", normalize(query));
    format!("{:032x}", xxh3_128(input.as_bytes()))
}
