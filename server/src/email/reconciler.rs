use crate::{email::api::MailApi, email::labels::ManagedLabels, model::EmailStatus};

/// The single add/remove mutation implied by a decision: add the decision's
/// label, remove the other managed labels. not_spam mutates nothing.
pub fn plan(status: &EmailStatus, labels: &ManagedLabels) -> Option<(Vec<String>, Vec<String>)> {
    let add = labels.label_id_for(status)?;
    Some((vec![add.to_string()], labels.other_ids(status)))
}

/// Issue the planned mutation. Failures propagate; retry is not this
/// layer's job.
pub async fn apply<M: MailApi + ?Sized>(
    api: &M,
    message_id: &str,
    status: &EmailStatus,
    labels: &ManagedLabels,
) -> anyhow::Result<()> {
    if let Some((add, remove)) = plan(status, labels) {
        api.modify_labels(message_id, &add, &remove).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::{test_labels, StubMailApi};

    #[test]
    fn spam_adds_spam_and_removes_the_rest() {
        let labels = test_labels();
        let (add, remove) = plan(&EmailStatus::Spam, &labels).unwrap();
        assert_eq!(add, vec![labels.spam.clone()]);
        assert_eq!(remove, vec![labels.whitelist.clone(), labels.ignore.clone()]);
    }

    #[test]
    fn not_spam_plans_nothing() {
        assert!(plan(&EmailStatus::NotSpam, &test_labels()).is_none());
    }

    #[tokio::test]
    async fn apply_issues_exactly_one_mutation() {
        let api = StubMailApi::new();
        let labels = test_labels();

        apply(&api, "m1", &EmailStatus::Whitelist, &labels)
            .await
            .unwrap();
        apply(&api, "m2", &EmailStatus::NotSpam, &labels)
            .await
            .unwrap();

        let log = api.modify_log();
        assert_eq!(log.len(), 1);
        let (id, add, remove) = &log[0];
        assert_eq!(id, "m1");
        assert_eq!(add, &vec![labels.whitelist.clone()]);
        assert_eq!(remove, &vec![labels.spam.clone(), labels.ignore.clone()]);
    }
}
