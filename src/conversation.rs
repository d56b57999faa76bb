use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConversationError {
    #[error("question is empty")]
    EmptyQuestion,
    #[error("previous exchange is still awaiting its answer")]
    ExchangeInFlight,
    #[error("no exchange is awaiting an answer")]
    NothingPending,
}

/// One question/answer pair. `answer` is `None` while the exchange is in
/// flight and is written exactly once when the answer stream completes.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub question: String,
    pub answer: Option<String>,
}

impl Exchange {
    pub fn is_pending(&self) -> bool {
        self.answer.is_none()
    }
}

/// Append-only conversation history. At most the last exchange may be
/// pending; every earlier one has a resolved answer.
#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: Vec<Exchange>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a new pending exchange and return its index. Whitespace-only
    /// questions are rejected, as is starting a new exchange while the last
    /// one has not resolved.
    pub fn begin_exchange(&mut self, question: &str) -> Result<usize, ConversationError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ConversationError::EmptyQuestion);
        }
        if self.entries.last().is_some_and(Exchange::is_pending) {
            return Err(ConversationError::ExchangeInFlight);
        }
        self.entries.push(Exchange {
            question: question.to_string(),
            answer: None,
        });
        Ok(self.entries.len() - 1)
    }

    /// Resolve the pending exchange at the tail of the log.
    pub fn resolve_last(&mut self, answer: String) -> Result<(), ConversationError> {
        match self.entries.last_mut() {
            Some(entry) if entry.is_pending() => {
                entry.answer = Some(answer);
                Ok(())
            }
            _ => Err(ConversationError::NothingPending),
        }
    }

    /// Prior resolved answers, formatted for the backend's `message_history`
    /// field: one `Assistant: ...` block per answer, blank-line separated. A
    /// pending exchange has no answer yet and is excluded.
    pub fn history_context(&self) -> String {
        self.entries
            .iter()
            .filter_map(|entry| entry.answer.as_deref())
            .map(|answer| format!("Assistant: {}", answer))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Accumulates the in-flight answer fragment by fragment. Fragments are
/// appended verbatim in arrival order; `awaiting_first_fragment` is true
/// until the first one lands, which is when the typing indicator goes away.
#[derive(Debug, Clone)]
pub struct StreamingAnswer {
    partial: String,
    awaiting_first: bool,
}

impl StreamingAnswer {
    pub fn new() -> Self {
        StreamingAnswer {
            partial: String::new(),
            awaiting_first: true,
        }
    }

    pub fn push_fragment(&mut self, fragment: &str) {
        self.awaiting_first = false;
        self.partial.push_str(fragment);
    }

    pub fn awaiting_first_fragment(&self) -> bool {
        self.awaiting_first
    }

    pub fn partial(&self) -> &str {
        &self.partial
    }

    pub fn into_answer(self) -> String {
        self.partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_and_resolve() {
        let mut log = ConversationLog::new();
        let index = log.begin_exchange("What is X?").unwrap();
        assert_eq!(index, 0);
        assert!(log.exchanges()[0].is_pending());

        log.resolve_last("X is a thing.".to_string()).unwrap();
        assert_eq!(log.exchanges()[0].answer.as_deref(), Some("X is a thing."));
    }

    #[test]
    fn test_empty_question_rejected() {
        let mut log = ConversationLog::new();
        assert_eq!(
            log.begin_exchange("   \n\t"),
            Err(ConversationError::EmptyQuestion)
        );
        assert!(log.is_empty());
    }

    #[test]
    fn test_question_is_trimmed() {
        let mut log = ConversationLog::new();
        log.begin_exchange("  What is X?  ").unwrap();
        assert_eq!(log.exchanges()[0].question, "What is X?");
    }

    #[test]
    fn test_second_exchange_blocked_while_pending() {
        let mut log = ConversationLog::new();
        log.begin_exchange("first").unwrap();
        assert_eq!(
            log.begin_exchange("second"),
            Err(ConversationError::ExchangeInFlight)
        );
        assert_eq!(log.exchanges().len(), 1);
    }

    #[test]
    fn test_resolve_without_pending_is_an_error() {
        let mut log = ConversationLog::new();
        assert_eq!(
            log.resolve_last("orphan".to_string()),
            Err(ConversationError::NothingPending)
        );

        log.begin_exchange("q").unwrap();
        log.resolve_last("a".to_string()).unwrap();
        assert_eq!(
            log.resolve_last("again".to_string()),
            Err(ConversationError::NothingPending)
        );
    }

    #[test]
    fn test_history_context_excludes_pending() {
        let mut log = ConversationLog::new();
        log.begin_exchange("q1").unwrap();
        log.resolve_last("first answer".to_string()).unwrap();
        log.begin_exchange("q2").unwrap();
        log.resolve_last("second answer".to_string()).unwrap();
        log.begin_exchange("q3").unwrap();

        assert_eq!(
            log.history_context(),
            "Assistant: first answer\n\nAssistant: second answer"
        );
    }

    #[test]
    fn test_history_context_empty_log() {
        let log = ConversationLog::new();
        assert_eq!(log.history_context(), "");
    }

    #[test]
    fn test_fragments_concatenate_in_order() {
        let mut answer = StreamingAnswer::new();
        assert!(answer.awaiting_first_fragment());

        answer.push_fragment("Hel");
        assert!(!answer.awaiting_first_fragment());
        answer.push_fragment("lo, ");
        answer.push_fragment("world");

        assert_eq!(answer.partial(), "Hello, world");
        assert_eq!(answer.into_answer(), "Hello, world");
    }

    #[test]
    fn test_empty_fragment_still_clears_typing_flag() {
        let mut answer = StreamingAnswer::new();
        answer.push_fragment("");
        assert!(!answer.awaiting_first_fragment());
        assert_eq!(answer.partial(), "");
    }
}
