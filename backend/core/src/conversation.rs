//! The conversation aggregate.
//!
//! A conversation owns an ordered live window of messages whose total token
//! cost never exceeds the model budget. Appending a message that does not fit
//! evicts the oldest live messages, FIFO, into the erased log until it does.
//! The one exception is a single message that is larger than the whole
//! budget: the window is emptied and the message is appended anyway.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChatError;
use crate::message::{Message, PromptMessage};
use crate::types::ConversationConfig;

/// Lifecycle state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Ended,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "ended" => Ok(ConversationStatus::Ended),
            other => Err(ChatError::Validation(format!(
                "unknown conversation status: {other}"
            ))),
        }
    }
}

/// Stored fields of a conversation, used to reconstitute the aggregate.
#[derive(Debug, Clone)]
pub struct ConversationParts {
    pub id: String,
    pub user_id: String,
    pub initial_system_message: Message,
    pub messages: Vec<Message>,
    pub erased_messages: Vec<Message>,
    pub status: ConversationStatus,
    pub config: ConversationConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    id: String,
    user_id: String,
    initial_system_message: Message,
    messages: Vec<Message>,
    erased_messages: Vec<Message>,
    status: ConversationStatus,
    token_usage: u32,
    config: ConversationConfig,
}

impl Conversation {
    /// Create a fresh conversation seeded with its system message.
    ///
    /// The system message goes through [`Conversation::append_message`], so
    /// it is subject to the same budget rules as every later message.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        initial_system_message: Message,
        config: ConversationConfig,
    ) -> Result<Self, ChatError> {
        let id = id.into();
        let user_id = user_id.into();

        if id.trim().is_empty() {
            return Err(ChatError::Validation("conversation id is empty".into()));
        }
        if user_id.trim().is_empty() {
            return Err(ChatError::Validation("user id is empty".into()));
        }
        config.validate()?;

        let mut conversation = Self {
            id,
            user_id,
            initial_system_message: initial_system_message.clone(),
            messages: Vec::new(),
            erased_messages: Vec::new(),
            status: ConversationStatus::Active,
            token_usage: 0,
            config,
        };
        conversation.append_message(initial_system_message)?;
        Ok(conversation)
    }

    /// Reconstitute a stored conversation. Token usage is recomputed from
    /// the live window rather than trusted from storage.
    pub fn restore(parts: ConversationParts) -> Self {
        let mut conversation = Self {
            id: parts.id,
            user_id: parts.user_id,
            initial_system_message: parts.initial_system_message,
            messages: parts.messages,
            erased_messages: parts.erased_messages,
            status: parts.status,
            token_usage: 0,
            config: parts.config,
        };
        conversation.refresh_token_usage();
        conversation
    }

    /// Append a message, evicting the oldest live messages until it fits.
    ///
    /// Returns the number of messages evicted. Fails without touching the
    /// aggregate if the conversation has ended.
    pub fn append_message(&mut self, message: Message) -> Result<usize, ChatError> {
        if self.is_ended() {
            return Err(ChatError::ConversationEnded(self.id.clone()));
        }

        let budget = self.config.model.max_tokens;
        let mut evicted = 0;
        while self.token_usage.saturating_add(message.tokens) > budget && !self.messages.is_empty()
        {
            let oldest = self.messages.remove(0);
            self.erased_messages.push(oldest);
            self.refresh_token_usage();
            evicted += 1;
        }

        if message.tokens > budget {
            debug!(
                conversation_id = %self.id,
                tokens = message.tokens,
                budget,
                "Message alone exceeds the model budget"
            );
        }

        self.messages.push(message);
        self.refresh_token_usage();

        if evicted > 0 {
            debug!(
                conversation_id = %self.id,
                evicted,
                token_usage = self.token_usage,
                "Evicted oldest messages to fit budget"
            );
        }
        Ok(evicted)
    }

    /// Mark the conversation as ended. Idempotent.
    pub fn end(&mut self) {
        self.status = ConversationStatus::Ended;
    }

    fn refresh_token_usage(&mut self) {
        self.token_usage = self
            .messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(m.tokens));
    }

    /// Project the live window into provider input, in window order.
    pub fn prompt(&self) -> Vec<PromptMessage> {
        self.messages.iter().map(PromptMessage::from).collect()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn initial_system_message(&self) -> &Message {
        &self.initial_system_message
    }

    /// The live window.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Evicted messages, oldest-evicted first.
    pub fn erased_messages(&self) -> &[Message] {
        &self.erased_messages
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        self.status == ConversationStatus::Ended
    }

    pub fn token_usage(&self) -> u32 {
        self.token_usage
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::Role;
    use crate::types::Model;

    fn config(max_tokens: u32) -> ConversationConfig {
        ConversationConfig::new(Model::new("test-model", max_tokens))
    }

    fn conversation(max_tokens: u32, system_tokens: u32) -> Conversation {
        Conversation::new(
            "conv-1",
            "user-1",
            Message::system("You are helpful.", system_tokens),
            config(max_tokens),
        )
        .unwrap()
    }

    fn live_sum(c: &Conversation) -> u32 {
        c.messages().iter().map(|m| m.tokens).sum()
    }

    #[test]
    fn new_conversation_starts_with_system_message() {
        let c = conversation(100, 10);
        assert_eq!(c.status(), ConversationStatus::Active);
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].role, Role::System);
        assert_eq!(c.token_usage(), 10);
        assert!(c.erased_messages().is_empty());
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let err = Conversation::new("c", "  ", Message::system("s", 1), config(10)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut cfg = config(10);
        cfg.temperature = -0.1;
        let err = Conversation::new("c", "u", Message::system("s", 1), cfg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn oversized_system_message_is_still_appended() {
        let c = conversation(5, 8);
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.token_usage(), 8);
        assert!(c.erased_messages().is_empty());
    }

    #[test]
    fn fourth_exchange_evicts_oldest_in_order() {
        // Budget 50, system 10, each exchange 20 tokens (user 8 + assistant 12).
        let mut c = conversation(50, 10);
        let system_id = c.messages()[0].id;

        let mut sent = Vec::new();
        for i in 0..3 {
            let u = Message::user(format!("q{i}"), 8);
            let a = Message::assistant(format!("a{i}"), 12);
            sent.push(u.id);
            sent.push(a.id);
            c.append_message(u).unwrap();
            c.append_message(a).unwrap();
        }

        // 10 + q0 + a0 = 30, q1 (38) and a1 (50) fit exactly.
        // q2: 58 > 50, evict system -> 40, q2 fits at 48.
        // a2: 60 > 50, evict q0 -> 40, still 52 > 50, evict a0 -> 28, a2 fits at 40.
        let erased: Vec<_> = c.erased_messages().iter().map(|m| m.id).collect();
        assert_eq!(erased, vec![system_id, sent[0], sent[1]]);
        assert_eq!(c.token_usage(), 40);

        let u = Message::user("q3", 8);
        let a = Message::assistant("a3", 12);
        let evicted_q3 = c.append_message(u).unwrap();
        let evicted_a3 = c.append_message(a).unwrap();

        // q3 fits at 48; a3: 60 > 50, evict q1 then a1, fits at 40.
        assert_eq!((evicted_q3, evicted_a3), (0, 2));
        let erased: Vec<_> = c.erased_messages().iter().map(|m| m.id).collect();
        assert_eq!(
            erased,
            vec![system_id, sent[0], sent[1], sent[2], sent[3]]
        );
        assert_eq!(c.token_usage(), 40);
        assert_eq!(c.token_usage(), live_sum(&c));
        assert!(c.token_usage() <= 50);
    }

    #[test]
    fn live_window_is_contiguous_suffix_plus_new_message() {
        let mut c = conversation(30, 5);
        for i in 0..6 {
            c.append_message(Message::user(format!("m{i}"), 7)).unwrap();
        }
        let before: Vec<_> = c.messages().iter().map(|m| m.id).collect();

        let new = Message::assistant("big", 20);
        let new_id = new.id;
        let evicted = c.append_message(new).unwrap();

        let after: Vec<_> = c.messages().iter().map(|m| m.id).collect();
        assert_eq!(after.last(), Some(&new_id));
        assert_eq!(&after[..after.len() - 1], &before[evicted..]);
    }

    #[test]
    fn budget_invariant_holds_for_many_appends() {
        let mut c = conversation(64, 4);
        let mut seed: u32 = 17;
        for i in 0..200 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let tokens = (seed >> 16) % 40;
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            c.append_message(Message::new(role, "x", tokens, None)).unwrap();

            assert_eq!(c.token_usage(), live_sum(&c));
            assert!(c.token_usage() <= 64);
        }
    }

    #[test]
    fn message_larger_than_budget_empties_window() {
        let mut c = conversation(20, 5);
        c.append_message(Message::user("hello", 6)).unwrap();

        let huge = Message::user("a very long paste", 35);
        let evicted = c.append_message(huge).unwrap();

        assert_eq!(evicted, 2);
        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].tokens, 35);
        assert_eq!(c.token_usage(), 35);
        assert_eq!(c.erased_messages().len(), 2);
    }

    #[test]
    fn ended_conversation_rejects_appends_unchanged() {
        let mut c = conversation(100, 10);
        c.append_message(Message::user("hi", 3)).unwrap();
        c.end();
        c.end();
        assert!(c.is_ended());

        let before_live = c.messages().to_vec();
        let before_usage = c.token_usage();
        let err = c.append_message(Message::user("again", 3)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversationEnded);
        assert_eq!(c.messages(), before_live.as_slice());
        assert_eq!(c.token_usage(), before_usage);
        assert!(c.erased_messages().is_empty());
    }

    #[test]
    fn restore_recomputes_token_usage() {
        let original = conversation(100, 10);
        let mut live = original.messages().to_vec();
        live.push(Message::user("q", 7));

        let restored = Conversation::restore(ConversationParts {
            id: original.id().to_string(),
            user_id: original.user_id().to_string(),
            initial_system_message: original.initial_system_message().clone(),
            messages: live,
            erased_messages: Vec::new(),
            status: ConversationStatus::Active,
            config: original.config().clone(),
        });
        assert_eq!(restored.token_usage(), 17);
    }

    #[test]
    fn prompt_follows_window_order() {
        let mut c = conversation(100, 1);
        c.append_message(Message::user("question", 1)).unwrap();
        c.append_message(Message::assistant("answer", 1)).unwrap();

        let roles: Vec<_> = c.prompt().iter().map(|p| p.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [ConversationStatus::Active, ConversationStatus::Ended] {
            assert_eq!(s.as_str().parse::<ConversationStatus>().unwrap(), s);
        }
    }
}
