//! Error classification by message text.
//!
//! Electrum servers report failures as free-form strings, so the only
//! portable signal is the wording. All matching rules live here; no
//! other module may inspect error text. Tests pin each substring.

/// Outcome classes for a failed address operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate-limited or overloaded server; retry with backoff.
    ServerBusy,
    /// The address's history exceeds what the server will enumerate.
    /// Permanent for this address.
    TooManyTransactions,
    /// Server-side variant of the same limitation. Permanent.
    HistoryTooLarge,
    /// Anything unrecognized; retried like a transient failure.
    Generic,
}

impl ErrorClass {
    /// Terminal classes are never retried and the address's balance is
    /// reported unknown, not zero.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TooManyTransactions | Self::HistoryTooLarge)
    }
}

/// Classify an error message.
pub fn classify(message: &str) -> ErrorClass {
    if message.contains("server busy")
        || message.contains("timed out")
        || message.contains("code: -102")
    {
        return ErrorClass::ServerBusy;
    }

    if message.contains("history of > ") || message.contains("not supported") {
        return ErrorClass::TooManyTransactions;
    }

    if message.contains("history too large")
        || message.contains("history is too large")
        || message.contains("too many")
        || message.contains("too large")
        || message.contains("code: 1")
    {
        return ErrorClass::HistoryTooLarge;
    }

    ErrorClass::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_substrings() {
        assert_eq!(classify("server busy - try later"), ErrorClass::ServerBusy);
        assert_eq!(classify("Balance fetch timed out"), ErrorClass::ServerBusy);
        assert_eq!(
            classify("busy... JSON-RPC error, code: -102"),
            ErrorClass::ServerBusy
        );
    }

    #[test]
    fn too_many_transactions_substrings() {
        assert_eq!(
            classify("Addresses with history of > 1000 transactions are not supported"),
            ErrorClass::TooManyTransactions
        );
        assert_eq!(
            classify("method not supported by this server"),
            ErrorClass::TooManyTransactions
        );
    }

    #[test]
    fn history_too_large_substrings() {
        assert_eq!(classify("history too large"), ErrorClass::HistoryTooLarge);
        assert_eq!(
            classify("address history is too large"),
            ErrorClass::HistoryTooLarge
        );
        assert_eq!(classify("too many utxos"), ErrorClass::HistoryTooLarge);
        assert_eq!(classify("reply too large"), ErrorClass::HistoryTooLarge);
        assert_eq!(classify("failed, code: 1"), ErrorClass::HistoryTooLarge);
    }

    #[test]
    fn busy_wins_over_large_when_both_present() {
        // "timed out" is checked before the size rules, matching the
        // order the original classifier applied.
        assert_eq!(
            classify("history too large and request timed out"),
            ErrorClass::ServerBusy
        );
    }

    #[test]
    fn unknown_text_is_generic() {
        assert_eq!(classify("connection reset by peer"), ErrorClass::Generic);
        assert_eq!(classify(""), ErrorClass::Generic);
    }

    #[test]
    fn terminal_classes() {
        assert!(ErrorClass::TooManyTransactions.is_terminal());
        assert!(ErrorClass::HistoryTooLarge.is_terminal());
        assert!(!ErrorClass::ServerBusy.is_terminal());
        assert!(!ErrorClass::Generic.is_terminal());
    }
}
