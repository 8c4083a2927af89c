use super::ActionDispatcher;
use crate::context::RequestContext;
use crate::document::RecordEntry;
use groundwork_common::Result;
use tracing::debug;

impl ActionDispatcher {
    /// `get`: store every record matching the field map under its key
    pub(crate) async fn get(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let found = ctx
            .session
            .repository(entity_name)?
            .find_by(&record.fields, &[], None, None)
            .await?;

        debug!("get {} '{}': {} records", entity_name, record.key, found.len());
        ctx.identifiers.insert(record.key.clone(), found);
        Ok(())
    }
}
