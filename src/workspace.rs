//! Session-scoped facade over the cache, the coordinator and the derived
//! view state. Presentation code talks to this type only.

use crate::aggregate::AggregateBuilder;
use crate::cache::{Descriptor, QueryCache, QueryState, Subscription};
use crate::error::CoreError;
use crate::events::{CoreEvent, EventBus};
use crate::filter;
use crate::folders::{self, FolderTree, Grouping};
use crate::gateway::Gateway;
use crate::model::{CatalogKind, Company, FilterOptions, UserId};
use crate::mutation::{MutationCoordinator, Operation, Outcome};
use crate::selection::{Selection, SelectionTracker};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Workspace {
    gateway: Arc<dyn Gateway>,
    cache: QueryCache,
    events: EventBus,
    /// `None` while nobody is signed in: reads are empty and writes refused.
    coordinator: Option<MutationCoordinator>,
    selection: SelectionTracker,
    tree: FolderTree,
}

impl Workspace {
    pub fn new(gateway: Arc<dyn Gateway>, user_id: Option<UserId>) -> Self {
        let cache = QueryCache::new(Arc::new(AggregateBuilder::new(gateway.clone())));
        let events = EventBus::default();
        let mut ws = Self {
            gateway,
            cache,
            events,
            coordinator: None,
            selection: SelectionTracker::new(),
            tree: FolderTree::new(),
        };
        ws.coordinator = user_id.map(|u| ws.coordinator_for(u));
        ws
    }

    fn coordinator_for(&self, user_id: UserId) -> MutationCoordinator {
        MutationCoordinator::new(
            self.gateway.clone(),
            self.cache.clone(),
            self.events.clone(),
            user_id,
        )
    }

    pub fn user_id(&self) -> Option<&str> {
        self.coordinator.as_ref().map(|c| c.user_id())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Switches the session user. Cached data and view state of the
    /// previous user are dropped.
    pub async fn set_user(&mut self, user_id: Option<UserId>) {
        if self.user_id() == user_id.as_deref() {
            return;
        }
        info!(user = ?user_id, "session user changed");
        self.cache.clear().await;
        self.selection.reset();
        self.tree = FolderTree::new();
        self.coordinator = user_id.map(|u| self.coordinator_for(u));
    }

    fn require_user(&self) -> Result<&MutationCoordinator, CoreError> {
        self.coordinator
            .as_ref()
            .ok_or_else(|| CoreError::validation("no user signed in"))
    }

    pub async fn run(&self, op: Operation) -> Result<Outcome, CoreError> {
        self.require_user()?.run(op).await
    }

    /// Live view of one descriptor; `None` without a user.
    pub async fn subscribe(&self, descriptor: &Descriptor) -> Option<Subscription> {
        self.user_id()?;
        Some(self.cache.subscribe(descriptor).await)
    }

    /// Settled company list for the session user. Also re-derives the
    /// selection from whatever data the cache now holds.
    pub async fn companies(&mut self) -> QueryState {
        let Some(user_id) = self.user_id() else {
            return QueryState::default();
        };
        let state = self.cache.fetch(&Descriptor::companies(user_id)).await;
        if let Some(companies) = state.data.as_ref().and_then(|d| d.as_companies()) {
            self.selection.on_companies_loaded(companies);
        }
        state
    }

    pub async fn folders(&self) -> QueryState {
        match self.user_id() {
            Some(user_id) => self.cache.fetch(&Descriptor::folders(user_id)).await,
            None => QueryState::default(),
        }
    }

    pub async fn catalog(&self, kind: CatalogKind) -> QueryState {
        match self.user_id() {
            Some(user_id) => self.cache.fetch(&Descriptor::catalog(kind, user_id)).await,
            None => QueryState::default(),
        }
    }

    pub async fn messages(&self, company_id: &str) -> QueryState {
        if self.user_id().is_none() {
            return QueryState::default();
        }
        self.cache.fetch(&Descriptor::messages(company_id)).await
    }

    /// Messages of the selected company; empty state when nothing is selected.
    pub async fn active_messages(&self) -> QueryState {
        match self.selection.current().id() {
            Some(id) => self.messages(id).await,
            None => QueryState::default(),
        }
    }

    pub fn selection(&self) -> &Selection {
        self.selection.current()
    }

    pub fn select(&mut self, company_id: &str) -> Result<&Selection, CoreError> {
        self.selection.select(company_id)
    }

    pub async fn filtered_companies(&mut self, query: &str, options: &FilterOptions) -> Vec<Company> {
        let state = self.companies().await;
        let companies = state
            .data
            .as_ref()
            .and_then(|d| d.as_companies())
            .unwrap_or_default();
        filter::apply(companies, query, options)
    }

    /// Filtered companies grouped by folder.
    pub async fn grouped(&mut self, query: &str, options: &FilterOptions) -> Grouping {
        let companies = self.filtered_companies(query, options).await;
        let folders = self.folders().await;
        let folders = folders
            .data
            .as_ref()
            .and_then(|d| d.as_folders())
            .unwrap_or_default();
        self.tree.retain_known(folders);
        self.tree.group(&companies, folders)
    }

    pub fn is_folder_expanded(&self, folder_id: &str) -> bool {
        self.tree.is_expanded(folder_id)
    }

    pub fn toggle_folder(&mut self, folder_id: &str) -> bool {
        self.tree.toggle(folder_id)
    }

    pub async fn move_company_to_folder(
        &self,
        company_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Outcome, CoreError> {
        folders::move_company_to_folder(self.require_user()?, company_id, folder_id).await
    }

    pub async fn delete_folder(&self, folder_id: &str) -> Result<Outcome, CoreError> {
        folders::delete_folder(self.require_user()?, folder_id).await
    }

    /// Asks whichever surface owns the editor to open `message_id`.
    pub fn request_message_edit(&self, message_id: &str) {
        debug!(message_id, "edit requested");
        self.events.emit(CoreEvent::EditMessageRequested {
            message_id: message_id.to_string(),
        });
    }
}
