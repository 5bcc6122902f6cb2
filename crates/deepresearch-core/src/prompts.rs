//! Prompt text and user-facing messages.
//!
//! Only the structural role of these strings matters to the engine; wording
//! can change freely.

use crate::domain::Proposal;

/// Shown when an input-side guard blocks.
pub const INPUT_REFUSAL: &str =
    "I cannot process that request as it violates safety guidelines.";

/// Shown when an output-side guard blocks.
pub const OUTPUT_REFUSAL: &str =
    "We are unable to give you response as it violates our safety guidelines.";

/// Shown for requests classified as rubbish.
pub const RUBBISH_REFUSAL: &str =
    "I couldn't find a clear research question in that message. Could you rephrase what you would like researched?";

/// Shown when a human rejects an interrupt proposal.
pub const DECLINED_MESSAGE: &str =
    "Understood, the research was not started. Send a new message when you are ready.";

/// Shown when an interrupt expired before a decision arrived.
pub const EXPIRED_MESSAGE: &str =
    "The approval window for this research plan has expired. Please send your request again.";

/// Generic failure text for asynchronous tasks.
pub const PROCESSING_FAILED: &str = "processing failed";

/// Replaces search content that a content guard blocked.
pub const FILTERED_CONTENT: &str = "Content violates safety guidelines";

/// Shown when every research unit failed.
pub const NO_FINDINGS: &str = "No findings could be gathered for this request.";

pub const CLASSIFIER_PROMPT: &str = r#"You analyze research requests before any research starts.
Read the conversation history and the latest message, then reply with JSON only:
{
  "category": "simple|complex|rubbish|multitopic",
  "canonical_request": "the clearest researchable form of the request",
  "needs_interrupt": true|false,
  "rationale": "short explanation, including anything dropped",
  "sub_questions": ["optional list of distinct sub-questions"]
}
Use "rubbish" for incoherent input and "multitopic" when two or more distinct
topics are asked about. Set needs_interrupt when your rewrite drops or changes
meaningful content."#;

pub const PLANNER_PROMPT: &str = r#"Split the research request into focused sub-questions.
Prefer a single sub-question unless the request explicitly compares distinct
entities or spans clearly separate topics. Reply with a JSON array of strings only."#;

pub const FOLLOW_UP_PROMPT: &str = r#"You review findings gathered so far for a research request.
If important gaps remain, reply with a JSON array of new sub-questions that
would close them. If the findings are sufficient, reply with []."#;

pub const RESEARCHER_PROMPT: &str = r#"You research exactly one sub-question.
Use web_search to gather sources and think to reflect after each search.
Stop as soon as you can answer with evidence. Your final answer must cite
sources inline with the bracketed number shown next to each search result,
for example [1]. Do not invent sources."#;

/// Render the text a human sees when asked to approve a plan.
pub fn render_interrupt_prompt(proposal: &Proposal) -> String {
    let mut out = String::from(
        "Based on your query we are going to deep dive into the following aspects.\n\n",
    );
    out.push_str(&format!("Proposed query: {}\n", proposal.canonical_request));
    if !proposal.sub_questions.is_empty() {
        out.push('\n');
        for (i, q) in proposal.sub_questions.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, q));
        }
    }
    if !proposal.rationale.is_empty() {
        out.push_str(&format!("\nWhy: {}\n", proposal.rationale));
    }
    out.push_str("\nReply with: APPROVE | REJECT");
    out
}
