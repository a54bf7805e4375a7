//! Prompt templates used by the core. Kept in one place so operators can
//! review every instruction the bot sends.

pub const SYSTEM_PROMPT_SLACK: &str = "You are a helpful assistant working inside a Slack \
workspace. Answer concisely, use Slack-style formatting, and keep replies scoped to the \
current thread's conversation.";

pub const SYSTEM_PROMPT_DISCORD: &str = "You are a helpful assistant in a Discord server. \
Answer concisely, use Discord markdown where it helps, and keep replies scoped to the \
current thread's conversation.";

pub const SYSTEM_PROMPT_CLI: &str = "You are a helpful assistant in a terminal session. \
Answer concisely in plain text.";

pub fn default_system_prompt(platform: &str) -> &'static str {
    match platform {
        "slack" => SYSTEM_PROMPT_SLACK,
        "discord" => SYSTEM_PROMPT_DISCORD,
        _ => SYSTEM_PROMPT_CLI,
    }
}

/// Fixed preamble for the intent classification conversation.
pub const CLASSIFICATION_INSTRUCTION: &str = "You classify the user's latest message in a \
chat conversation. Decide whether the user wants a brand new image generated (new), an \
existing or attached image changed (edit), a question answered about attached images \
(vision), something image-related but unclear (ambiguous), or anything else (none). \
Consider the conversation context; a short follow-up like 'make it blue' after an image \
was generated is an edit.";

/// Final turn of the classification conversation; demands a single token.
pub const CLASSIFICATION_FINAL_INSTRUCTION: &str = "Respond with exactly one word and \
nothing else: new, edit, vision, ambiguous, or none.";

/// Annotation appended to the user message when images are attached.
pub const ATTACHMENT_FLAG: &str = "[The user attached image(s) to this message]";

/// Instruction for in-place document summarization during trimming.
pub const SUMMARIZATION_INSTRUCTION: &str = "Summarize the following document for use as \
conversation context. Preserve key facts, figures, names and conclusions. Be thorough \
but significantly shorter than the original. Output only the summary.";

/// Instruction for conversation-aware image prompt enhancement.
pub const IMAGE_PROMPT_INSTRUCTION: &str = "Rewrite the user's image request as a single \
detailed image-generation prompt. Incorporate relevant details from the conversation. \
Output only the prompt.";

/// Instruction for building an edit prompt from a description of the
/// original plus the requested change.
pub const EDIT_PROMPT_INSTRUCTION: &str = "Combine the description of the original image \
with the user's requested change into a single image prompt that keeps everything not \
mentioned unchanged. Output only the prompt.";

/// Default question when the user attaches images without asking anything.
pub const VISION_DEFAULT_QUESTION: &str = "Describe the attached image(s) in detail.";

/// User-visible notice for a thread that is already processing a request.
pub const BUSY_MESSAGE: &str =
    "Still working on your previous message in this thread - try again in a moment.";

/// Deterministic reply for an ambiguous image request with nothing attached.
pub const AMBIGUOUS_CLARIFICATION: &str = "I can generate a new image or edit the last one \
- could you say which you'd like, and what it should look like?";

/// Disclosure appended once trimming has removed history.
pub const TRIMMED_DISCLOSURE: &str =
    "(Note: older messages in this thread were summarized or removed to stay within limits.)";
