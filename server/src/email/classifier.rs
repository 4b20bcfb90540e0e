use std::collections::HashSet;

use crate::{
    email::labels::ManagedLabels,
    error::AppResult,
    model::EmailStatus,
    prompt::{classification_system_prompt, is_affirmative, Oracle},
};

/// Durable per-user decision caches, loaded once per scan
#[derive(Debug, Default, Clone)]
pub struct SenderCaches {
    /// Message ids whose spam verdict was escalated to a permanent block
    pub confirmed_ids: HashSet<String>,
    pub spam: HashSet<String>,
    pub whitelist: HashSet<String>,
    pub ignore: HashSet<String>,
}

/// What to do when the oracle call fails. Fail-open is the default: the
/// message silently becomes not_spam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleFailurePolicy {
    FailOpen,
    FailClosed,
}

impl OracleFailurePolicy {
    pub fn from_config() -> Self {
        if crate::server_config::cfg.oracle.fail_closed {
            OracleFailurePolicy::FailClosed
        } else {
            OracleFailurePolicy::FailOpen
        }
    }
}

/// A message up for classification
#[derive(Debug)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub sender: &'a str,
    pub label_ids: &'a [String],
    /// Body preview: `Subject:`/`From:` lines plus the first N words
    pub preview: &'a str,
}

/// Outcome of one classification, with the oracle exchange kept for audit
/// logging when it was invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: EmailStatus,
    pub llm_request: Option<String>,
    pub llm_response: Option<String>,
    pub llm_sent: bool,
}

impl Classification {
    fn cached(status: EmailStatus) -> Self {
        Self {
            status,
            llm_request: None,
            llm_response: None,
            llm_sent: false,
        }
    }
}

/// Build the oracle-facing preview: subject and sender header lines plus
/// the first `max_words` words of the body.
pub fn build_preview(subject: &str, sender: &str, body: &str, max_words: usize) -> String {
    let truncated = body
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ");
    format!("Subject: {}\nFrom: {}\n\n{}", subject, sender, truncated)
}

/// Apply the priority-ordered rule chain. The ordering is a contract:
/// confirmed/spam evidence outranks ignore, which outranks whitelist, and
/// the oracle is only ever consulted when no rule matched.
pub async fn classify(
    candidate: &Candidate<'_>,
    caches: &SenderCaches,
    labels: &ManagedLabels,
    oracle: Option<&dyn Oracle>,
    prompt: &str,
    on_failure: OracleFailurePolicy,
) -> AppResult<Classification> {
    let has_label = |id: &str| candidate.label_ids.iter().any(|l| l == id);

    // 1. confirmed or cached spam never goes back to the oracle
    if caches.confirmed_ids.contains(candidate.id)
        || caches.spam.contains(candidate.sender)
        || has_label(&labels.spam)
    {
        return Ok(Classification::cached(EmailStatus::Spam));
    }

    // 2. ignored senders
    if has_label(&labels.ignore) || caches.ignore.contains(candidate.sender) {
        return Ok(Classification::cached(EmailStatus::Ignore));
    }

    // 3. whitelisted senders
    if has_label(&labels.whitelist) || caches.whitelist.contains(candidate.sender) {
        return Ok(Classification::cached(EmailStatus::Whitelist));
    }

    // 4. oracle fallback
    let Some(oracle) = oracle else {
        return Ok(Classification::cached(EmailStatus::NotSpam));
    };

    let system = classification_system_prompt(prompt);
    match oracle.complete(&system, candidate.preview).await {
        Ok(answer) => {
            let status = if is_affirmative(&answer) {
                EmailStatus::Spam
            } else {
                EmailStatus::NotSpam
            };
            Ok(Classification {
                status,
                llm_request: Some(candidate.preview.to_string()),
                llm_response: Some(answer),
                llm_sent: true,
            })
        }
        Err(e) => match on_failure {
            OracleFailurePolicy::FailOpen => {
                tracing::warn!(
                    "Oracle call failed for message {}, defaulting to not_spam: {:?}",
                    candidate.id,
                    e
                );
                Ok(Classification::cached(EmailStatus::NotSpam))
            }
            OracleFailurePolicy::FailClosed => Err(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::{test_labels, StubOracle};

    fn caches() -> SenderCaches {
        SenderCaches::default()
    }

    fn candidate<'a>(id: &'a str, sender: &'a str, label_ids: &'a [String]) -> Candidate<'a> {
        Candidate {
            id,
            sender,
            label_ids,
            preview: "Subject: hi\nFrom: someone\n\nbody",
        }
    }

    #[tokio::test]
    async fn confirmed_id_never_invokes_oracle() {
        let mut caches = caches();
        caches.confirmed_ids.insert("m1".to_string());
        let oracle = StubOracle::answering("<RESULT>NO</RESULT>");

        let result = classify(
            &candidate("m1", "a@b.c", &[]),
            &caches,
            &test_labels(),
            Some(&oracle),
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::Spam);
        assert!(!result.llm_sent);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn cached_spam_sender_outranks_whitelist_label() {
        let mut caches = caches();
        caches.spam.insert("seller@shop.example".to_string());
        let labels = test_labels();
        let label_ids = vec![labels.whitelist.clone()];

        let result = classify(
            &candidate("m2", "seller@shop.example", &label_ids),
            &caches,
            &labels,
            None,
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::Spam);
    }

    #[tokio::test]
    async fn remote_spam_label_outranks_whitelist_cache() {
        let mut caches = caches();
        caches.whitelist.insert("friend@example.com".to_string());
        let labels = test_labels();
        let label_ids = vec![labels.spam.clone()];
        let oracle = StubOracle::answering("<RESULT>NO</RESULT>");

        let result = classify(
            &candidate("m3", "friend@example.com", &label_ids),
            &caches,
            &labels,
            Some(&oracle),
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::Spam);
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn ignore_outranks_whitelist() {
        let mut caches = caches();
        caches.ignore.insert("noreply@example.com".to_string());
        caches.whitelist.insert("noreply@example.com".to_string());

        let result = classify(
            &candidate("m4", "noreply@example.com", &[]),
            &caches,
            &test_labels(),
            None,
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::Ignore);
    }

    #[tokio::test]
    async fn affirmative_oracle_answer_yields_spam_with_audit_fields() {
        let oracle = StubOracle::answering("<RESULT>YES</RESULT> promotional");

        let result = classify(
            &candidate("m5", "new@sender.example", &[]),
            &caches(),
            &test_labels(),
            Some(&oracle),
            "Identify basket spam.",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::Spam);
        assert!(result.llm_sent);
        assert_eq!(
            result.llm_response.as_deref(),
            Some("<RESULT>YES</RESULT> promotional")
        );
        assert!(result.llm_request.as_deref().unwrap().starts_with("Subject:"));
        assert_eq!(oracle.calls(), 1);
        // the fixed instruction rides along with the user prompt
        let (system, _) = oracle.last_exchange().unwrap();
        assert!(system.starts_with("Identify basket spam."));
        assert!(system.contains("<RESULT>YES</RESULT>"));
    }

    #[tokio::test]
    async fn negative_oracle_answer_yields_not_spam() {
        let oracle = StubOracle::answering("<RESULT>NO</RESULT> looks fine");

        let result = classify(
            &candidate("m6", "new@sender.example", &[]),
            &caches(),
            &test_labels(),
            Some(&oracle),
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::NotSpam);
        assert!(result.llm_sent);
    }

    #[tokio::test]
    async fn no_oracle_defaults_to_not_spam() {
        let result = classify(
            &candidate("m7", "new@sender.example", &[]),
            &caches(),
            &test_labels(),
            None,
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::NotSpam);
        assert!(!result.llm_sent);
    }

    #[tokio::test]
    async fn oracle_failure_fails_open_by_default_policy() {
        let oracle = StubOracle::failing();

        let result = classify(
            &candidate("m8", "new@sender.example", &[]),
            &caches(),
            &test_labels(),
            Some(&oracle),
            "prompt",
            OracleFailurePolicy::FailOpen,
        )
        .await
        .unwrap();

        assert_eq!(result.status, EmailStatus::NotSpam);
        assert!(!result.llm_sent);
    }

    #[tokio::test]
    async fn oracle_failure_propagates_when_fail_closed() {
        let oracle = StubOracle::failing();

        let result = classify(
            &candidate("m9", "new@sender.example", &[]),
            &caches(),
            &test_labels(),
            Some(&oracle),
            "prompt",
            OracleFailurePolicy::FailClosed,
        )
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn preview_truncates_to_word_limit() {
        let body = (0..600).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let preview = build_preview("Hello", "a@b.c", &body, 500);

        assert!(preview.starts_with("Subject: Hello\nFrom: a@b.c\n\n"));
        assert!(preview.contains("w499"));
        assert!(!preview.contains("w500"));
    }
}
