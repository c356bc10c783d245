//! # Label Vocabulary
//!
//! Bijection between argumentative role labels (e.g. `B-Claim`, `I-Premise`)
//! and the dense integer ids the tagger predicts.

use std::collections::BTreeMap;

use crate::error::{ActaError, Result};

/// Dense label vocabulary, fixed for the lifetime of a tagger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocab {
    labels: Vec<String>,
    label2id: BTreeMap<String, u32>,
}

impl LabelVocab {
    /// Build a vocabulary from both directions of the mapping.
    ///
    /// The two maps must describe the same bijection and the ids must be
    /// exactly `0..n`.
    pub fn new(label2id: &BTreeMap<String, u32>, id2label: &BTreeMap<u32, String>) -> Result<Self> {
        if label2id.is_empty() {
            return Err(ActaError::InvalidConfig("label2id is empty".into()));
        }
        if label2id.len() != id2label.len() {
            return Err(ActaError::InvalidConfig(format!(
                "label2id has {} entries but id2label has {}",
                label2id.len(),
                id2label.len()
            )));
        }

        let mut labels = Vec::with_capacity(id2label.len());
        for (expected, (&id, label)) in id2label.iter().enumerate() {
            if id as usize != expected {
                return Err(ActaError::InvalidConfig(format!(
                    "label ids must be dense from 0, found gap before id {id}"
                )));
            }
            match label2id.get(label) {
                Some(&back) if back == id => labels.push(label.clone()),
                Some(&back) => {
                    return Err(ActaError::InvalidConfig(format!(
                        "label {label:?} maps to {back} but id2label maps {id} to it"
                    )));
                }
                None => {
                    return Err(ActaError::InvalidConfig(format!(
                        "label {label:?} is missing from label2id"
                    )));
                }
            }
        }

        Ok(Self {
            labels,
            label2id: label2id.clone(),
        })
    }

    /// Build a vocabulary from labels listed in id order.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id2label: BTreeMap<u32, String> = labels
            .into_iter()
            .enumerate()
            .map(|(id, label)| (id as u32, label.into()))
            .collect();
        let label2id = id2label
            .iter()
            .map(|(&id, label)| (label.clone(), id))
            .collect();
        Self::new(&label2id, &id2label)
    }

    /// Number of labels (the output dimension of every head).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn id(&self, label: &str) -> Option<u32> {
        self.label2id.get(label).copied()
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    /// Labels in id order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Render a predicted id sequence as label strings.
    pub fn decode_labels(&self, ids: &[u32]) -> Result<Vec<&str>> {
        ids.iter()
            .map(|&id| {
                self.label(id).ok_or(ActaError::InvalidLabel {
                    label: i64::from(id),
                    num_labels: self.len(),
                })
            })
            .collect()
    }
}
