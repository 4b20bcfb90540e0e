use std::collections::HashMap;

use anyhow::Context;
use futures::future::join_all;

use crate::{email::api::MailApi, model::EmailStatus, server_config::cfg};

/// Remote label ids for the three managed, mutually exclusive triage labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLabels {
    pub spam: String,
    pub whitelist: String,
    pub ignore: String,
}

impl ManagedLabels {
    /// The label id a decision adds; not_spam maps to no label
    pub fn label_id_for(&self, status: &EmailStatus) -> Option<&str> {
        match status {
            EmailStatus::Spam => Some(&self.spam),
            EmailStatus::Whitelist => Some(&self.whitelist),
            EmailStatus::Ignore => Some(&self.ignore),
            EmailStatus::NotSpam => None,
        }
    }

    pub fn all_ids(&self) -> [&str; 3] {
        [&self.spam, &self.whitelist, &self.ignore]
    }

    /// The managed label ids a decision removes
    pub fn other_ids(&self, status: &EmailStatus) -> Vec<String> {
        let keep = self.label_id_for(status);
        self.all_ids()
            .iter()
            .filter(|id| Some(**id) != keep)
            .map(|id| id.to_string())
            .collect()
    }
}

/// Resolve the managed labels by name, creating any that don't exist yet
pub async fn ensure_managed_labels<M: MailApi + ?Sized>(api: &M) -> anyhow::Result<ManagedLabels> {
    let existing = api.list_labels().await?;

    let find = |name: &str| {
        existing
            .iter()
            .find(|l| {
                l.name
                    .as_deref()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
            })
            .and_then(|l| l.id.clone())
    };

    let names = [
        cfg.labels.spam.as_str(),
        cfg.labels.whitelist.as_str(),
        cfg.labels.ignore.as_str(),
    ];

    let missing: Vec<&str> = names.iter().copied().filter(|n| find(n).is_none()).collect();
    let created = join_all(missing.iter().map(|name| api.create_label(name))).await;

    let mut created_ids: HashMap<&str, String> = HashMap::new();
    for (name, label) in missing.into_iter().zip(created) {
        let label = label.context(format!("Could not create label {}", name))?;
        let id = label.id.context(format!("Created label {} has no id", name))?;
        created_ids.insert(name, id);
    }

    let resolve = |name: &str| {
        find(name)
            .or_else(|| created_ids.get(name).cloned())
            .context(format!("Could not resolve label {}", name))
    };

    Ok(ManagedLabels {
        spam: resolve(names[0])?,
        whitelist: resolve(names[1])?,
        ignore: resolve(names[2])?,
    })
}
