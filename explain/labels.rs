use thiserror::Error;

/// Continental superpopulations in model output order.
const CONTINENTAL_LABELS: [&str; 6] = ["afr", "amr", "asj", "eas", "eur", "sas"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("label dictionary is empty")]
    Empty,
    #[error("label '{0}' appears more than once")]
    Duplicate(String),
}

/// The ordered class labels of a model: index `i` of any label axis is `names()[i]`.
///
/// Passed explicitly to everything that needs it, so concurrent runs can use different
/// label sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDictionary {
    names: Vec<String>,
}

impl LabelDictionary {
    pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
        if names.is_empty() {
            return Err(LabelError::Empty);
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(LabelError::Duplicate(name.clone()));
            }
        }
        Ok(Self { names })
    }

    /// `{0: afr, 1: amr, 2: asj, 3: eas, 4: eur, 5: sas}`
    pub fn continental() -> Self {
        Self {
            names: CONTINENTAL_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a validated dictionary.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }
}

impl Default for LabelDictionary {
    fn default() -> Self {
        Self::continental()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continental_default_order() {
        let labels = LabelDictionary::default();
        assert_eq!(labels.len(), 6);
        assert_eq!(labels.name(0), Some("afr"));
        assert_eq!(labels.name(5), Some("sas"));
        assert_eq!(labels.index_of("eur"), Some(4));
        assert_eq!(labels.name(6), None);
    }

    #[test]
    fn rejects_empty_and_repeated_labels() {
        assert_eq!(LabelDictionary::new(Vec::new()), Err(LabelError::Empty));
        let err = LabelDictionary::new(vec!["a".into(), "b".into(), "a".into()]).unwrap_err();
        assert_eq!(err, LabelError::Duplicate("a".into()));
    }
}
