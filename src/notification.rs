pub mod condition;
pub mod log;

use error_stack::{Report, ResultExt};

use crate::error::PipelineError;
use crate::model::{Asset, NotificationRule};
use crate::storage::PipelineStore;

/// Read every active rule for `asset`, `batch_size` rows at a time.
///
/// Pages are concatenated so the caller evaluates one complete batch.
pub async fn load_active_rules(
    store: &dyn PipelineStore,
    asset: Asset,
    batch_size: u32,
) -> Result<Vec<NotificationRule>, Report<PipelineError>> {
    let batch_size = batch_size.max(1);
    let mut rules = Vec::new();
    let mut after_id = 0;

    loop {
        let page = store
            .active_rules_page(asset, after_id, batch_size)
            .await
            .change_context(PipelineError::Evaluation { asset })
            .attach_with(|| format!("after rule id {after_id}"))?;

        let fetched = page.len();
        if let Some(last) = page.last() {
            after_id = last.id;
        }
        rules.extend(page);

        if fetched < batch_size as usize {
            break;
        }
    }

    Ok(rules)
}
