//! Local replica of the dispatcher's slave topology.
//!
//! DESIGN
//! ======
//! Seeded from a `listSlaves` snapshot, then kept current by applying
//! notifications as they arrive. Slaves stay in arrival order. Property
//! updates are shallow merges: each key in the update replaces the key on
//! the record. The record's `id` is never rewritten by an update.

use serde_json::{Map, Value};

use crate::protocol::{Notification, Slave, SlaveId, Source, SlaveUpdate, SourceUpdate};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlaveDirectory {
    slaves: Vec<Slave>,
}

impl SlaveDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding `slaves`. A repeated id replaces the earlier record.
    #[must_use]
    pub fn from_snapshot(slaves: Vec<Slave>) -> Self {
        let mut directory = Self::new();
        for slave in slaves {
            directory.upsert(slave);
        }
        directory
    }

    /// Apply one notification. Returns `true` if the directory changed.
    ///
    /// Removals and updates for unknown slaves, and source updates for a
    /// slave whose sources were never fetched, are ignored.
    pub fn apply(&mut self, notification: &Notification) -> bool {
        match notification {
            Notification::SlaveAdded(slave) => {
                self.upsert(slave.clone());
                true
            }
            Notification::SlaveRemoved(id) => self.remove(*id).is_some(),
            Notification::SlaveUpdated(update) => self.update_slave(update),
            Notification::SourceUpdated(update) => self.update_source(update),
        }
    }

    /// Attach a freshly fetched source list to slave `id`.
    pub fn set_sources(&mut self, id: SlaveId, sources: Vec<Source>) -> bool {
        let Some(slave) = self.get_mut(id) else {
            return false;
        };
        slave.sources = Some(sources);
        true
    }

    pub fn remove(&mut self, id: SlaveId) -> Option<Slave> {
        let index = self.slaves.iter().position(|slave| slave.id == id)?;
        Some(self.slaves.remove(index))
    }

    #[must_use]
    pub fn get(&self, id: SlaveId) -> Option<&Slave> {
        self.slaves.iter().find(|slave| slave.id == id)
    }

    #[must_use]
    pub fn slaves(&self) -> &[Slave] {
        &self.slaves
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slaves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slaves.is_empty()
    }

    fn get_mut(&mut self, id: SlaveId) -> Option<&mut Slave> {
        self.slaves.iter_mut().find(|slave| slave.id == id)
    }

    fn upsert(&mut self, slave: Slave) {
        match self.get_mut(slave.id) {
            Some(existing) => *existing = slave,
            None => self.slaves.push(slave),
        }
    }

    fn update_slave(&mut self, update: &SlaveUpdate) -> bool {
        let Some(slave) = self.get_mut(update.id) else {
            return false;
        };
        for (key, value) in &update.properties {
            match key.as_str() {
                "id" => {}
                "sources" => match serde_json::from_value(value.clone()) {
                    Ok(sources) => slave.sources = sources,
                    Err(error) => {
                        tracing::warn!(slave = %update.id, %error, "ignoring malformed sources in update");
                    }
                },
                _ => {
                    slave.properties.insert(key.clone(), value.clone());
                }
            }
        }
        true
    }

    fn update_source(&mut self, update: &SourceUpdate) -> bool {
        let source = self
            .get_mut(update.id)
            .and_then(|slave| slave.sources.as_mut())
            .and_then(|sources| sources.iter_mut().find(|source| source.address == update.addr));
        let Some(source) = source else {
            return false;
        };
        merge_source(source, &update.properties);
        true
    }
}

fn merge_source(source: &mut Source, properties: &Map<String, Value>) {
    for (key, value) in properties {
        if key == "address" {
            source.address = value.clone();
        } else {
            source.properties.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
#[path = "directory_test.rs"]
mod tests;
