use crate::column::QualifiedColumn;

/// A set of columns proven pairwise equal by `=` predicates.
///
/// Members keep insertion order; the first member acts as the class
/// representative when compensation predicates are emitted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EquivalenceClass {
    columns: Vec<QualifiedColumn>,
}

impl EquivalenceClass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(columns: impl IntoIterator<Item = QualifiedColumn>) -> Self {
        let mut class = Self::new();
        for column in columns {
            class.add(column);
        }
        class
    }

    pub fn singleton(column: QualifiedColumn) -> Self {
        Self {
            columns: vec![column],
        }
    }

    pub fn add(&mut self, column: QualifiedColumn) {
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
    }

    pub fn contains(&self, column: &QualifiedColumn) -> bool {
        self.columns.contains(column)
    }

    pub fn intersects(&self, other: &EquivalenceClass) -> bool {
        self.columns.iter().any(|c| other.contains(c))
    }

    pub fn is_subset_of(&self, other: &EquivalenceClass) -> bool {
        self.columns.iter().all(|c| other.contains(c))
    }

    pub fn merge_from(&mut self, other: &EquivalenceClass) {
        for column in &other.columns {
            self.add(column.clone());
        }
    }

    pub fn columns(&self) -> &[QualifiedColumn] {
        &self.columns
    }

    pub fn representative(&self) -> Option<&QualifiedColumn> {
        self.columns.first()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Collapses a list of classes to its transitive closure: each class
/// absorbs every class it shares a column with, repeated until no two
/// remaining classes intersect.
pub fn full_merge(mut classes: Vec<EquivalenceClass>) -> Vec<EquivalenceClass> {
    loop {
        let mut merged_any = false;
        let mut result: Vec<EquivalenceClass> = Vec::with_capacity(classes.len());
        for class in classes {
            match result.iter_mut().find(|c| c.intersects(&class)) {
                Some(existing) => {
                    existing.merge_from(&class);
                    merged_any = true;
                }
                None => result.push(class),
            }
        }
        classes = result;
        if !merged_any {
            return classes;
        }
    }
}

/// Finds the merged class containing `column`, if any.
pub fn class_for_column<'a>(
    classes: &'a [EquivalenceClass],
    column: &QualifiedColumn,
) -> Option<&'a EquivalenceClass> {
    classes.iter().find(|c| c.contains(column))
}
