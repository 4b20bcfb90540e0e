use anyhow::Context;

use crate::email::api::MailApi;

/// Drain a message search across continuation tokens into a flat id list.
/// Transport errors abort the listing; retry is not this layer's job.
pub async fn list_all_message_ids<M: MailApi + ?Sized>(
    api: &M,
    query: &str,
) -> anyhow::Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = api
            .list_messages(query, page_token.as_deref())
            .await
            .context("Error listing message page")?;

        ids.extend(page.ids);

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    Ok(ids)
}
