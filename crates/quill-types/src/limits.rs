/// Context-window token budget for a model family.
///
/// Unknown models get a conservative default rather than an error: the
/// trimming engine degrades gracefully when the table is stale.
pub fn model_token_limit(model: &str) -> usize {
    if model.starts_with("gpt-4o") || model.starts_with("gpt-4.1") {
        128_000
    } else if model.starts_with("o1") || model.starts_with("o3") || model.starts_with("gpt-5") {
        200_000
    } else if model.starts_with("gpt-4-turbo") {
        128_000
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5-turbo-16k") {
        16_384
    } else if model.starts_with("gpt-3.5") {
        4_096
    } else {
        8_192
    }
}
