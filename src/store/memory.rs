//! In-memory measurement store.

use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::sync::RwLock;

use super::{
    ExistenceCheck, HistoryLookup, MeasurementFilter, MeasurementQuery, MeasurementSink,
    StoreError,
};
use crate::types::{normalize_name, GroupKey, Measurement, MeasurementKey};

/// Chronologically ordered measurements behind a `RwLock`.
///
/// Ties on the timestamp keep insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    measurements: RwLock<Vec<Measurement>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-loaded with measurements (any order).
    pub fn with_measurements(measurements: Vec<Measurement>) -> Self {
        let repo = Self::new();
        {
            let mut guard = repo.measurements.write().unwrap_or_else(|e| e.into_inner());
            for m in measurements {
                insert_sorted(&mut guard, m);
            }
        }
        repo
    }

    pub fn len(&self) -> usize {
        self.measurements.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn insert_sorted(list: &mut Vec<Measurement>, m: Measurement) {
    let at = list.partition_point(|existing| existing.timestamp() <= m.timestamp());
    list.insert(at, m);
}

impl ExistenceCheck for InMemoryRepository {
    fn exists(
        &self,
        timestamp: NaiveDateTime,
        level: &str,
        name: &str,
    ) -> Result<bool, StoreError> {
        let key = MeasurementKey::new(timestamp, level, name);
        let guard = self.measurements.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.iter().any(|m| m.key() == key))
    }
}

impl HistoryLookup for InMemoryRepository {
    fn recent_z_scores(
        &self,
        group: &GroupKey,
        before: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<f64>, StoreError> {
        let guard = self.measurements.read().unwrap_or_else(|e| e.into_inner());
        let end = guard.partition_point(|m| m.timestamp() < before);
        let mut z_scores: Vec<f64> = guard[..end]
            .iter()
            .rev()
            .filter(|m| &m.group() == group)
            .filter_map(Measurement::z_score)
            .take(limit)
            .collect();
        z_scores.reverse();
        Ok(z_scores)
    }
}

impl MeasurementSink for InMemoryRepository {
    fn save_all(&self, measurements: &[Measurement]) -> Result<(), StoreError> {
        let mut guard = self.measurements.write().unwrap_or_else(|e| e.into_inner());

        let existing: HashSet<MeasurementKey> = guard.iter().map(Measurement::key).collect();
        let mut incoming = HashSet::with_capacity(measurements.len());
        for m in measurements {
            let key = m.key();
            if existing.contains(&key) || !incoming.insert(key.clone()) {
                return Err(StoreError::Conflict(key));
            }
        }

        for m in measurements {
            insert_sorted(&mut guard, m.clone());
        }
        Ok(())
    }
}

impl MeasurementQuery for InMemoryRepository {
    fn find_by_filter(&self, filter: &MeasurementFilter) -> Result<Vec<Measurement>, StoreError> {
        let guard = self.measurements.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.iter().filter(|m| filter.matches(m)).cloned().collect())
    }

    fn name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = normalize_name(name);
        let guard = self.measurements.read().unwrap_or_else(|e| e.into_inner());
        Ok(guard.iter().any(|m| m.name() == name))
    }
}
