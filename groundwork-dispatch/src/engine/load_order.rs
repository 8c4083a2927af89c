use super::ActionDispatcher;
use crate::context::RequestContext;
use crate::document::RecordEntry;
use groundwork_common::{Error, Result};
use tracing::debug;

impl ActionDispatcher {
    /// `loadOrder`: re-persist and flush the records stored under a key
    pub(crate) async fn load_order(
        &self,
        ctx: &mut RequestContext,
        entity_name: Option<&str>,
        record: &RecordEntry,
    ) -> Result<()> {
        let expected = match entity_name {
            Some(name) => Some(self.registry().definition(name)?.name.as_str()),
            None => None,
        };

        let stored = ctx.identifiers.require(&record.key)?.to_vec();
        for mut entity in stored {
            if let Some(expected) = expected {
                if entity.type_name() != expected {
                    return Err(Error::InvalidInput(format!(
                        "loadOrder {}: '{}' holds {} records",
                        expected,
                        record.key,
                        entity.type_name()
                    )));
                }
            }

            ctx.session.persist(&mut entity, true).await?;
            ctx.identifiers.refresh(&entity);
        }

        debug!("Flushed records under '{}'", record.key);
        Ok(())
    }
}
