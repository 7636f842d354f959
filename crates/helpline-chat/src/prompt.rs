//! Prompt construction for answer generation and summarization.

use helpline_core::types::{ChatMessage, ConversationTurn, FaqEntry};

pub const SYSTEM_PROMPT: &str = "You are a helpful and professional customer support assistant. Your role is to:

1. Answer customer questions clearly, concisely, and professionally
2. Use the provided FAQ knowledge base when applicable
3. Maintain context from previous messages in the conversation
4. Be honest and transparent when you don't know something
5. Stay on topic and relevant to customer support inquiries
6. Be empathetic and patient with customers

Guidelines:
- If you're unsure about an answer, admit it rather than making something up
- Keep responses concise but complete (2-4 sentences ideal)
- Use a friendly, professional tone
- If the question is completely outside your knowledge, say so clearly
- Don't make promises about features or policies you're not certain about

IMPORTANT: If a user asks to speak with a human, manager, or agent, respond briefly (1 sentence) acknowledging their request. Do NOT explain the escalation process - the system handles that automatically.";

const FAQ_CONTEXT_HEADER: &str =
    "Here are some relevant FAQs that might help answer the question:";

/// System message listing retrieved FAQs, numbered from 1.
///
/// `None` when there are no FAQs.
pub fn faq_context(faqs: &[FaqEntry]) -> Option<String> {
    if faqs.is_empty() {
        return None;
    }
    let items: Vec<String> = faqs
        .iter()
        .enumerate()
        .map(|(i, faq)| format!("{}. Q: {}\n   A: {}", i + 1, faq.question, faq.answer))
        .collect();
    Some(format!("{}\n\n{}", FAQ_CONTEXT_HEADER, items.join("\n\n")))
}

/// Messages for answering `user_message`: system prompt, FAQ context,
/// prior turns, then the current message.
pub fn build_answer_prompt(
    history: &[ConversationTurn],
    faqs: &[FaqEntry],
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    if let Some(context) = faq_context(faqs) {
        messages.push(ChatMessage::system(context));
    }
    messages.extend(history.iter().map(ChatMessage::from));
    messages.push(ChatMessage::user(user_message));
    messages
}

/// Single user message asking for a 1-2 sentence summary of the transcript.
pub fn build_summary_prompt(transcript: &[ConversationTurn]) -> Vec<ChatMessage> {
    let conversation: Vec<String> = transcript
        .iter()
        .map(|turn| format!("{}: {}", turn.role.as_str().to_uppercase(), turn.content))
        .collect();
    let text = format!(
        "Summarize the following customer support conversation in 1-2 sentences, \
         focusing on the main topics discussed and any issues raised:\n\n{}\n\nSummary:",
        conversation.join("\n")
    );
    vec![ChatMessage::user(text)]
}
