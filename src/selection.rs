//! Which company is active. Re-derived every time the company list changes.

use crate::error::CoreError;
use crate::model::{Company, CompanyId};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Unselected,
    Selected(CompanyId),
}

impl Selection {
    pub fn id(&self) -> Option<&str> {
        match self {
            Selection::Unselected => None,
            Selection::Selected(id) => Some(id),
        }
    }
}

/// Holds the selection and the ids of the last-known company list.
///
/// Never points at an id absent from that list.
#[derive(Debug, Default)]
pub struct SelectionTracker {
    state: Selection,
    known: Vec<CompanyId>,
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &Selection {
        &self.state
    }

    /// Applies a freshly loaded list.
    ///
    /// From Unselected a non-empty list selects its first company. When the
    /// selected company vanished, the company now at its old position (or
    /// the last one) takes over; an empty list unselects.
    pub fn on_companies_loaded(&mut self, companies: &[Company]) -> &Selection {
        let ids: Vec<CompanyId> = companies.iter().map(|c| c.id.clone()).collect();
        let next = match &self.state {
            _ if ids.is_empty() => Selection::Unselected,
            Selection::Unselected => Selection::Selected(ids[0].clone()),
            Selection::Selected(id) if ids.contains(id) => Selection::Selected(id.clone()),
            Selection::Selected(id) => {
                let old_index = self.known.iter().position(|k| k == id).unwrap_or(0);
                let index = old_index.min(ids.len() - 1);
                debug!(gone = %id, next = %ids[index], "selected company disappeared");
                Selection::Selected(ids[index].clone())
            }
        };
        self.state = next;
        self.known = ids;
        &self.state
    }

    /// Selects `id` if it is in the last-known list.
    pub fn select(&mut self, id: &str) -> Result<&Selection, CoreError> {
        if !self.known.iter().any(|k| k == id) {
            return Err(CoreError::NotFound(format!("company {id}")));
        }
        self.state = Selection::Selected(id.to_string());
        Ok(&self.state)
    }

    /// Forgets everything, e.g. when the session user changes.
    pub fn reset(&mut self) {
        self.state = Selection::Unselected;
        self.known.clear();
    }
}
