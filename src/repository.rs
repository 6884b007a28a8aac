use serde::Serialize;

/// An immutable list of fully-qualified class names stored under one cache ID.
///
/// Instances are handed out as `Arc<ClassRepository>` by the manager, so two
/// lookups of the same ID observe the same allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRepository {
    id: String,
    classes: Vec<String>,
}

impl ClassRepository {
    pub fn new(id: impl Into<String>, classes: Vec<String>) -> Self {
        Self {
            id: id.into(),
            classes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.classes.iter().any(|c| c == class_name)
    }
}
