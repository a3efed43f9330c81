//! Ordered steps run around every `save`.
//!
//! Pre-persist steps run before the `before_save` hook, post-persist steps after the record
//! was written and refreshed. Steps are synchronous and run in registration order; a failing
//! step aborts the save. The timestamp stamper is installed as a pre-persist step by
//! [`ModelMeta::timestamp`](crate::metadata::ModelMeta::timestamp).

use bson::Bson;
use std::sync::Arc;

use crate::{error::OdmResult, model::Model, record::Record};

/// Whether a save creates or updates the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistKind {
    Create,
    Update,
}

/// Shared context of one `save` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistContext {
    pub kind: PersistKind,
    /// One instant shared by every step of the save call.
    pub now: bson::DateTime,
}

impl PersistContext {
    pub(crate) fn new(kind: PersistKind) -> Self {
        Self {
            kind,
            now: bson::DateTime::now(),
        }
    }
}

pub type PersistStep<M> = Arc<dyn Fn(&mut Record<M>, &PersistContext) -> OdmResult<()> + Send + Sync>;

pub(crate) fn timestamp_step<M: Model>() -> PersistStep<M> {
    Arc::new(|record: &mut Record<M>, context: &PersistContext| {
        let meta = record.meta().clone();

        for (property, timestamp) in meta.timestamps() {
            let stamp = match context.kind {
                PersistKind::Create => timestamp.is_auto_create(),
                PersistKind::Update => timestamp.is_auto_update(),
            };

            if stamp {
                record.set_attribute(property, Bson::DateTime(context.now))?;
            }
        }

        Ok(())
    })
}
