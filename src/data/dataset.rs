use burn::data::dataset::Dataset;

use crate::data::features::{ClassificationItem, QaFeature};

/// In-memory dataset over tokenised items (classification items or QA windows).
pub struct FeatureDataset<T> {
    items: Vec<T>,
}

impl<T> FeatureDataset<T> {
    pub fn new(items: Vec<T>) -> Self { Self { items } }
}

impl<T: Clone + Send + Sync> Dataset<T> for FeatureDataset<T> {
    fn get(&self, index: usize) -> Option<T> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub type ClassificationDataset = FeatureDataset<ClassificationItem>;
pub type QaDataset             = FeatureDataset<QaFeature>;
