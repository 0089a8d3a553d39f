use crate::models::{values_equal, Changeset, Fields, Operation, Record};
use std::collections::HashMap;

/// Persisted records keyed by identifier, as loaded from the store
pub type Snapshot = HashMap<String, Record>;

/// Result of comparing fetched records with the persisted snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub changeset: Changeset,
    /// Distinct fetched ids that needed no write
    pub unchanged: usize,
}

/// Compute the inserts and updates needed to bring `persisted` up to date with `fetched`.
///
/// Fields missing from a fetched record are left alone, and nothing is ever deleted.
/// If an id appears more than once, the later record wins and the operation keeps the
/// position of the first occurrence.
pub fn diff<I>(fetched: I, persisted: &Snapshot) -> Diff
where
    I: IntoIterator<Item = Record>,
{
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Record> = HashMap::new();

    for record in fetched {
        if !latest.contains_key(&record.id) {
            order.push(record.id.clone());
        }
        latest.insert(record.id.clone(), record);
    }

    let mut result = Diff::default();

    for id in order {
        let Some(record) = latest.remove(&id) else { continue };

        match persisted.get(&id) {
            None => result.changeset.push(Operation::Insert(record)),
            Some(existing) => {
                let changed = changed_fields(&record.fields, &existing.fields);
                if changed.is_empty() {
                    result.unchanged += 1;
                } else {
                    result.changeset.push(Operation::Update {
                        id,
                        fields: changed,
                        last_modified: record.last_modified,
                    });
                }
            }
        }
    }

    result
}

/// Fields of `fresh` that are absent from or differ in `stored`
fn changed_fields(fresh: &Fields, stored: &Fields) -> Fields {
    fresh
        .iter()
        .filter(|(name, value)| !stored.get(*name).is_some_and(|old| values_equal(old, value)))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
