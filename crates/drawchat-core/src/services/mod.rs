//! Service layer shared across clients.

mod conversations;

pub use conversations::{ConversationService, ConversationSummary, DeleteOutcome};
