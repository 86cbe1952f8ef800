//! Unbinned datasets: one row of observable values per event, with an optional category label.

use std::path::Path;

use rand::Rng;
use rand::seq::index;

use crate::error::{DatasetError, StoreError};

/// A single event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub values: Vec<f64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    observables: Vec<String>,
    label_column: Option<String>,
    events: Vec<Event>,
}

impl Dataset {
    pub fn new(observables: Vec<String>) -> Self {
        Self {
            observables,
            label_column: None,
            events: Vec::new(),
        }
    }

    pub fn with_capacity(observables: Vec<String>, capacity: usize) -> Self {
        Self {
            observables,
            label_column: None,
            events: Vec::with_capacity(capacity),
        }
    }

    pub fn observables(&self) -> &[String] {
        &self.observables
    }

    pub fn label_column(&self) -> Option<&str> {
        self.label_column.as_deref()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.observables.len());
        self.events.push(Event {
            values,
            label: None,
        });
    }

    /// Add a label column and set it to `label` for every event
    pub fn set_label(&mut self, column: &str, label: &str) {
        self.label_column = Some(column.to_string());
        for event in &mut self.events {
            event.label = Some(label.to_string());
        }
    }

    pub fn observable_index(&self, name: &str) -> Option<usize> {
        self.observables.iter().position(|o| o == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.observable_index(name)?;
        Some(self.events.iter().map(|e| e.values[idx]).collect())
    }

    fn check_compatible(&self, other: &Dataset) -> Result<(), DatasetError> {
        if self.observables != other.observables || self.label_column != other.label_column {
            let describe = |d: &Dataset| {
                let mut cols = d.observables.clone();
                cols.extend(d.label_column.clone());
                cols
            };
            return Err(DatasetError::Incompatible {
                expected: describe(self),
                found: describe(other),
            });
        }
        Ok(())
    }

    /// Append all events of `other`, which must have the same columns
    pub fn append(&mut self, other: Dataset) -> Result<(), DatasetError> {
        self.check_compatible(&other)?;
        self.events.extend(other.events);
        Ok(())
    }

    /// Merge datasets sharing the same observables into one
    pub fn merge(datasets: Vec<Dataset>) -> Result<Dataset, DatasetError> {
        let mut iter = datasets.into_iter();
        let mut merged = iter.next().ok_or(DatasetError::Empty)?;
        for dataset in iter {
            merged.append(dataset)?;
        }
        Ok(merged)
    }

    /// Keep only events for which `keep` returns true
    pub fn retain<F: FnMut(&Event) -> bool>(&mut self, keep: F) {
        self.events.retain(keep);
    }

    /// Random subset of `count` events without replacement, original order kept.
    ///
    /// Returns the dataset unchanged when it already has at most `count` events.
    pub fn sample<R: Rng + ?Sized>(mut self, count: usize, rng: &mut R) -> Dataset {
        if self.events.len() <= count {
            return self;
        }
        let mut chosen = index::sample(rng, self.events.len(), count).into_vec();
        chosen.sort_unstable();
        let mut events = std::mem::take(&mut self.events);
        let mut kept = Vec::with_capacity(count);
        for idx in chosen.into_iter().rev() {
            kept.push(events.swap_remove(idx));
        }
        kept.reverse();
        self.events = kept;
        self
    }

    /// Event indices grouped by label, in order of first appearance
    pub fn indices_by_label(&self) -> Vec<(Option<&str>, Vec<usize>)> {
        let mut groups: Vec<(Option<&str>, Vec<usize>)> = Vec::new();
        for (i, event) in self.events.iter().enumerate() {
            let label = event.label.as_deref();
            match groups.iter_mut().find(|(l, _)| *l == label) {
                Some((_, idx)) => idx.push(i),
                None => groups.push((label, vec![i])),
            }
        }
        groups
    }

    /// Write as CSV, label column last
    pub fn to_csv(&self, path: &Path) -> Result<(), StoreError> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = self.observables.clone();
        header.extend(self.label_column.clone());
        writer.write_record(&header)?;
        for event in &self.events {
            let mut record: Vec<String> = event.values.iter().map(f64::to_string).collect();
            if self.label_column.is_some() {
                record.push(event.label.clone().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Read a CSV file. `label_column`, when given, must be one of the header columns.
    pub fn from_csv(path: &Path, label_column: Option<&str>) -> Result<Dataset, StoreError> {
        let mut reader = csv::Reader::from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let label_idx = label_column.and_then(|l| header.iter().position(|h| h == l));
        let observables: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != label_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut dataset = Dataset::new(observables);
        if let Some(idx) = label_idx {
            dataset.label_column = Some(header[idx].clone());
        }
        for record in reader.records() {
            let record = record?;
            let mut values = Vec::with_capacity(dataset.observables.len());
            let mut label = None;
            for (i, field) in record.iter().enumerate() {
                if Some(i) == label_idx {
                    label = Some(field.to_string());
                } else {
                    values.push(field.trim().parse::<f64>().map_err(|e| {
                        StoreError::Io {
                            path: path.to_path_buf(),
                            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                        }
                    })?);
                }
            }
            dataset.events.push(Event { values, label });
        }
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dataset(obs: &[&str], rows: &[&[f64]]) -> Dataset {
        let mut d = Dataset::new(obs.iter().map(|s| s.to_string()).collect());
        for row in rows {
            d.push(row.to_vec());
        }
        d
    }

    #[test]
    fn test_merge_same_observables() {
        let a = dataset(&["mass"], &[&[1.0], &[2.0]]);
        let b = dataset(&["mass"], &[&[3.0]]);
        let merged = Dataset::merge(vec![a, b]).unwrap();
        assert_eq!(merged.column("mass"), Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_merge_incompatible_observables() {
        let a = dataset(&["mass"], &[&[1.0]]);
        let b = dataset(&["mass", "q2"], &[&[3.0, 1.0]]);
        let err = Dataset::merge(vec![a, b]).unwrap_err();
        assert!(matches!(err, DatasetError::Incompatible { .. }));
    }

    #[test]
    fn test_merge_label_mismatch() {
        let a = dataset(&["mass"], &[&[1.0]]);
        let mut b = dataset(&["mass"], &[&[3.0]]);
        b.set_label("category", "2012");
        assert!(Dataset::merge(vec![a, b]).is_err());
        assert_eq!(Dataset::merge(vec![]), Err(DatasetError::Empty));
    }

    #[test]
    fn test_sample_exact_count_keeps_order() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64]).collect();
        let refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let d = dataset(&["x"], &refs);
        let mut rng = StdRng::seed_from_u64(5);
        let s = d.sample(30, &mut rng);
        let xs = s.column("x").unwrap();
        assert_eq!(xs.len(), 30);
        assert!(xs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_indices_by_label() {
        let mut a = dataset(&["x"], &[&[1.0], &[2.0]]);
        a.set_label("category", "A");
        let mut b = dataset(&["x"], &[&[3.0]]);
        b.set_label("category", "B");
        let merged = Dataset::merge(vec![a, b]).unwrap();
        let groups = merged.indices_by_label();
        assert_eq!(groups, vec![(Some("A"), vec![0, 1]), (Some("B"), vec![2])]);
    }

    #[test]
    fn test_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut d = dataset(&["mass", "q2"], &[&[5279.5, 1.25], &[5300.0, 7.0]]);
        d.set_label("category", "2011");

        d.to_csv(&path).unwrap();
        let back = Dataset::from_csv(&path, Some("category")).unwrap();
        assert_eq!(back, d);
    }
}
