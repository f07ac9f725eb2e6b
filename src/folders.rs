//! Folder hierarchy: grouping companies by folder, expand/collapse state,
//! and the folder-level writes.

use crate::error::CoreError;
use crate::model::{Company, Folder, FolderId};
use crate::mutation::{MutationCoordinator, Operation, Outcome};
use std::collections::{HashMap, HashSet};

/// One folder and the companies filed under it.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderBucket {
    pub folder: Folder,
    pub expanded: bool,
    pub companies: Vec<Company>,
}

/// Companies partitioned into unfiled and one bucket per known folder, in
/// folder catalog order. Input order is kept inside every group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouping {
    pub unfiled: Vec<Company>,
    pub folders: Vec<FolderBucket>,
}

impl Grouping {
    pub fn bucket(&self, folder_id: &str) -> Option<&FolderBucket> {
        self.folders.iter().find(|b| b.folder.id == folder_id)
    }
}

/// Per-folder expanded flags. Folders start collapsed and only change on
/// [`FolderTree::toggle`]; nothing here is persisted.
#[derive(Debug, Clone, Default)]
pub struct FolderTree {
    expanded: HashSet<FolderId>,
}

impl FolderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, folder_id: &str) -> bool {
        self.expanded.contains(folder_id)
    }

    /// Flips the flag and returns the new value.
    pub fn toggle(&mut self, folder_id: &str) -> bool {
        if self.expanded.remove(folder_id) {
            false
        } else {
            self.expanded.insert(folder_id.to_string());
            true
        }
    }

    /// Drops flags of folders that no longer exist.
    pub fn retain_known(&mut self, folders: &[Folder]) {
        let known: HashSet<&str> = folders.iter().map(|f| f.id.as_str()).collect();
        self.expanded.retain(|id| known.contains(id.as_str()));
    }

    /// A `folder_id` that names no folder in `folders` counts as unfiled.
    pub fn group(&self, companies: &[Company], folders: &[Folder]) -> Grouping {
        let mut by_folder: HashMap<&str, Vec<Company>> =
            folders.iter().map(|f| (f.id.as_str(), Vec::new())).collect();
        let mut unfiled = Vec::new();
        for company in companies {
            match company
                .folder_id
                .as_deref()
                .and_then(|id| by_folder.get_mut(id))
            {
                Some(bucket) => bucket.push(company.clone()),
                None => unfiled.push(company.clone()),
            }
        }
        let folders = folders
            .iter()
            .map(|folder| FolderBucket {
                companies: by_folder.remove(folder.id.as_str()).unwrap_or_default(),
                expanded: self.is_expanded(&folder.id),
                folder: folder.clone(),
            })
            .collect();
        Grouping { unfiled, folders }
    }
}

/// Sets or clears the folder of one company. Only `folder_id` is written.
pub async fn move_company_to_folder(
    coordinator: &MutationCoordinator,
    company_id: &str,
    folder_id: Option<&str>,
) -> Result<Outcome, CoreError> {
    coordinator
        .run(Operation::MoveCompanyToFolder {
            company_id: company_id.to_string(),
            folder_id: folder_id.map(str::to_string),
        })
        .await
}

/// Unfiles every member, then removes the folder, as one operation.
pub async fn delete_folder(
    coordinator: &MutationCoordinator,
    folder_id: &str,
) -> Result<Outcome, CoreError> {
    coordinator
        .run(Operation::DeleteFolder {
            id: folder_id.to_string(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, name: &str) -> Folder {
        Folder {
            id: id.into(),
            name: name.into(),
            color: None,
            user_id: "u1".into(),
        }
    }

    fn company(id: &str, folder_id: Option<&str>) -> Company {
        Company {
            id: id.into(),
            name: id.into(),
            folder_id: folder_id.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn folders_start_collapsed_and_toggle() {
        let mut tree = FolderTree::new();
        assert!(!tree.is_expanded("f1"));
        assert!(tree.toggle("f1"));
        assert!(tree.is_expanded("f1"));
        assert!(!tree.toggle("f1"));
        assert!(!tree.is_expanded("f1"));
    }

    #[test]
    fn groups_by_folder_with_missing_folders_unfiled() {
        let mut tree = FolderTree::new();
        tree.toggle("f2");
        let folders = vec![folder("f1", "Tech"), folder("f2", "Finance")];
        let companies = vec![
            company("c1", Some("f1")),
            company("c2", None),
            company("c3", Some("ghost")),
            company("c4", Some("f1")),
        ];
        let grouping = tree.group(&companies, &folders);

        let unfiled: Vec<_> = grouping.unfiled.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(unfiled, vec!["c2", "c3"]);
        let tech = grouping.bucket("f1").unwrap();
        let ids: Vec<_> = tech.companies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c4"]);
        assert!(!tech.expanded);
        let finance = grouping.bucket("f2").unwrap();
        assert!(finance.companies.is_empty());
        assert!(finance.expanded);
        assert!(grouping.bucket("ghost").is_none());
    }

    #[test]
    fn stale_flags_are_dropped() {
        let mut tree = FolderTree::new();
        tree.toggle("f1");
        tree.toggle("gone");
        tree.retain_known(&[folder("f1", "Tech")]);
        assert!(tree.is_expanded("f1"));
        assert!(!tree.is_expanded("gone"));
    }
}
