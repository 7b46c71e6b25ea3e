//! Move tracking: recognizes file renames among the removed/added sets of an
//! incremental pass and retargets relations instead of dropping them.
//!
//! Matching is deliberately conservative: a fingerprint must map to exactly
//! one removed and exactly one added entity. Anything ambiguous is left to
//! the ordinary delete/create path, because mis-wiring edges is worse than
//! losing continuity.

use std::collections::HashMap;

use crate::error::Result;
use crate::store::models::CodeEntity;
use crate::store::GraphStore;

/// Runs as one transaction before removed files' entities are physically
/// deleted. Returns the entity keys recognized as moved.
pub fn retarget_and_remove(
    store: &GraphStore,
    removed: &[String],
    added: &[String],
) -> Result<Vec<String>> {
    store.with_transaction(|store| {
        // Outgoing relations of removed files are superseded either way: a
        // moved file's new location was re-extracted this pass, and a truly
        // deleted file's edges must go.
        for path in removed {
            store.delete_relations_from_file(path)?;
        }

        let removed_by_fp = group_by_fingerprint(store, removed)?;
        let added_by_fp = group_by_fingerprint(store, added)?;

        let mut moved_keys = Vec::new();
        for (fp, old_entities) in &removed_by_fp {
            if old_entities.len() != 1 {
                continue;
            }
            let Some(new_entities) = added_by_fp.get(fp) else {
                continue;
            };
            if new_entities.len() != 1 {
                continue;
            }
            let (old, new) = (&old_entities[0], &new_entities[0]);
            store.retarget_relations(&old.entity_key, &new.entity_key)?;
            store.delete_entity(&old.entity_key)?;
            tracing::debug!(
                old = %old.entity_key,
                new = %new.entity_key,
                "entity moved; relations retargeted"
            );
            moved_keys.push(old.entity_key.clone());
        }

        // Whatever was not recognized as moved is a real deletion, each
        // file's cleanup under its own save-point.
        for path in removed {
            store.with_transaction(|store| store.remove_file_rows(path))?;
        }

        Ok(moved_keys)
    })
}

fn group_by_fingerprint(
    store: &GraphStore,
    paths: &[String],
) -> Result<HashMap<String, Vec<CodeEntity>>> {
    let mut groups: HashMap<String, Vec<CodeEntity>> = HashMap::new();
    for path in paths {
        for entity in store.entities_for_file(path)? {
            groups.entry(entity.fingerprint.clone()).or_default().push(entity);
        }
    }
    Ok(groups)
}
