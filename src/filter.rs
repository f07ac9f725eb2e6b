//! Company filtering: free-text search plus structured predicates.
//!
//! Stateless; callers rerun [`apply`] whenever the list or the options change.

use crate::model::{Company, FilterOptions};

/// Companies matching `query` and every active predicate in `options`, in
/// input order. With a blank query and no active predicate the input comes
/// back unchanged.
pub fn apply(companies: &[Company], query: &str, options: &FilterOptions) -> Vec<Company> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() && options.is_empty() {
        return companies.to_vec();
    }
    companies
        .iter()
        .filter(|c| matches_text(c, &needle) && matches_options(c, options))
        .cloned()
        .collect()
}

/// Case-insensitive match on name, email addresses, phones and contact names.
pub fn matches_text(company: &Company, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let hit = |s: &str| s.to_lowercase().contains(needle);
    hit(&company.name)
        || company.emails.iter().any(|e| hit(&e.email))
        || company.phones.iter().any(|p| hit(&p.phone))
        || company.contacts.iter().any(|c| hit(&c.name))
}

pub fn matches_options(company: &Company, options: &FilterOptions) -> bool {
    if !options.job_positions.is_empty()
        && !options
            .job_positions
            .iter()
            .any(|p| company.job_positions.contains(p))
    {
        return false;
    }
    if options.urgency.is_some_and(|u| u != company.urgency) {
        return false;
    }
    if options.has_in_progress && !company.has_in_progress_states() {
        return false;
    }
    if let Some(label) = &options.in_progress_state {
        // The current status label or any recorded sub-state.
        let found = company.in_progress.as_deref() == Some(label.as_str())
            || company
                .in_progress_states
                .iter()
                .any(|s| &s.description == label);
        if !found {
            return false;
        }
    }
    if let Some(selector) = &options.selector {
        if company.selector.as_deref() != Some(selector.as_str()) {
            return false;
        }
    }
    true
}
