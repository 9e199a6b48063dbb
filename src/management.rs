//! Agent management
//!
//! Orchestrates create/update/delete/share of agents against a host-supplied
//! `AgentService`. Each mutation runs through a `Command`, which tracks
//! whether it is in flight and fires success/error hooks; the hooks emit the
//! user-visible notifications. Caching, retries and invalidation policy
//! belong to the service.

use crate::error::{ChatError, Result};
use crate::notify::Notifier;
use crate::types::{
    AgentDescriptor, AvatarType, Notification, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Predefined personality tags offered by the agent form
pub const PERSONALITY_TAGS: &[&str] = &[
    "Formal",
    "Creative",
    "Technical",
    "Friendly",
    "Professional",
    "Concise",
    "Detailed",
    "Humorous",
    "Serious",
    "Analytical",
];

/// Host-supplied agent backend
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Every agent visible to the current user
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>>;

    async fn create_agent(&self, draft: AgentDraft) -> Result<AgentDescriptor>;

    async fn update_agent(&self, id: &str, agent: AgentDescriptor) -> Result<AgentDescriptor>;

    async fn delete_agent(&self, id: &str) -> Result<()>;

    /// Make an agent public or private
    async fn share_agent(&self, id: &str, is_public: bool) -> Result<AgentDescriptor>;

    /// Generate an avatar from a prompt, returning its URL
    async fn generate_avatar(&self, id: &str, prompt: &str) -> Result<String>;

    /// Upload avatar image bytes, returning the stored URL
    async fn upload_avatar(&self, id: &str, image: Vec<u8>) -> Result<String>;
}

/// An asynchronous operation with in-flight tracking
#[async_trait]
pub trait Command<A: Send + 'static, T>: Send + Sync {
    /// Run the operation, firing the success or error hooks
    async fn execute(&self, args: A) -> Result<T>;

    /// Whether any execution is currently running
    fn is_in_flight(&self) -> bool;
}

type Mutation<A, T> = Box<dyn Fn(A) -> BoxFuture<'static, Result<T>> + Send + Sync>;
type SuccessHook<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&ChatError) + Send + Sync>;

/// `Command` built from an async closure plus hooks
pub struct MutationCommand<A, T> {
    name: String,
    mutation: Mutation<A, T>,
    on_success: Vec<SuccessHook<T>>,
    on_error: Vec<ErrorHook>,
    in_flight: AtomicUsize,
}

impl<A, T> MutationCommand<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, mutation: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            mutation: Box::new(move |args: A| mutation(args).boxed()),
            on_success: Vec::new(),
            on_error: Vec::new(),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Add a hook run after every successful execution
    pub fn on_success(mut self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success.push(Box::new(hook));
        self
    }

    /// Add a hook run after every failed execution
    pub fn on_error(mut self, hook: impl Fn(&ChatError) + Send + Sync + 'static) -> Self {
        self.on_error.push(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Decrements the in-flight counter even if the execution is dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<A, T> Command<A, T> for MutationCommand<A, T>
where
    A: Send + 'static,
    T: Send + 'static,
{
    async fn execute(&self, args: A) -> Result<T> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _guard = InFlightGuard(&self.in_flight);
            (self.mutation)(args).await
        };

        match &result {
            Ok(value) => {
                tracing::debug!(command = %self.name, "Command succeeded");
                for hook in &self.on_success {
                    hook(value);
                }
            }
            Err(e) => {
                tracing::warn!(command = %self.name, error = %e, "Command failed");
                for hook in &self.on_error {
                    hook(e);
                }
            }
        }
        result
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

/// Form state for an agent that does not exist yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub system_instruction: String,
    pub temperature: f32,
    pub model: String,
    #[serde(default)]
    pub personality_tags: Vec<String>,
    /// Prompt for avatar generation after creation
    #[serde(default)]
    pub avatar_prompt: String,
    /// Image to upload as avatar after creation; wins over the prompt
    #[serde(skip)]
    pub avatar_image: Option<Vec<u8>>,
}

impl Default for AgentDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            system_instruction: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            model: DEFAULT_MODEL.to_string(),
            personality_tags: Vec::new(),
            avatar_prompt: String::new(),
            avatar_image: None,
        }
    }
}

impl AgentDraft {
    /// Name and system instruction are required
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.system_instruction.trim().is_empty() {
            return Err(ChatError::Validation(
                "Agent name and system instruction are required.".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which agents the list shows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentFilter {
    #[default]
    All,
    /// Agents owned by the current user
    Own,
    /// Public agents owned by someone else
    Public,
}

impl AgentFilter {
    pub fn matches(&self, agent: &AgentDescriptor) -> bool {
        match self {
            AgentFilter::All => true,
            AgentFilter::Own => agent.is_owner,
            AgentFilter::Public => agent.is_public && !agent.is_owner,
        }
    }
}

/// Number of agents per filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCounts {
    pub all: usize,
    pub own: usize,
    pub public: usize,
}

/// Default avatar generation prompt for an agent name
pub fn default_avatar_prompt(agent_name: &str) -> String {
    format!("A professional avatar for an AI agent named {}", agent_name)
}

/// State and operations behind the agent management screens
pub struct AgentManager {
    service: Arc<dyn AgentService>,
    notifier: Arc<dyn Notifier>,

    agents: Vec<AgentDescriptor>,
    loading: bool,
    load_error: Option<String>,
    filter: AgentFilter,

    draft: AgentDraft,
    /// Agent open in the edit form
    editing: Option<AgentDescriptor>,
    generating_avatar: bool,

    create_cmd: MutationCommand<AgentDraft, AgentDescriptor>,
    update_cmd: MutationCommand<AgentDescriptor, AgentDescriptor>,
    delete_cmd: MutationCommand<String, ()>,
    share_cmd: MutationCommand<(String, bool), AgentDescriptor>,
}

impl AgentManager {
    pub fn new(service: Arc<dyn AgentService>, notifier: Arc<dyn Notifier>) -> Self {
        let create_cmd = {
            let svc = Arc::clone(&service);
            let ok = Arc::clone(&notifier);
            let err = Arc::clone(&notifier);
            MutationCommand::new("create_agent", move |draft: AgentDraft| {
                let svc = Arc::clone(&svc);
                async move { svc.create_agent(draft).await }
            })
            .on_success(move |agent: &AgentDescriptor| {
                ok.notify(Notification::info(
                    "Agent created",
                    format!("Agent \"{}\" was created successfully.", agent.name),
                ))
            })
            .on_error(move |e| {
                err.notify(Notification::error(
                    "Create failed",
                    format!("Could not create the agent: {}", e),
                ))
            })
        };

        let update_cmd = {
            let svc = Arc::clone(&service);
            let ok = Arc::clone(&notifier);
            let err = Arc::clone(&notifier);
            MutationCommand::new("update_agent", move |agent: AgentDescriptor| {
                let svc = Arc::clone(&svc);
                async move {
                    let id = agent.id.clone();
                    svc.update_agent(&id, agent).await
                }
            })
            .on_success(move |agent: &AgentDescriptor| {
                ok.notify(Notification::info(
                    "Agent updated",
                    format!("Agent \"{}\" was updated successfully.", agent.name),
                ))
            })
            .on_error(move |e| {
                err.notify(Notification::error(
                    "Update failed",
                    format!("Could not update the agent: {}", e),
                ))
            })
        };

        let delete_cmd = {
            let svc = Arc::clone(&service);
            let ok = Arc::clone(&notifier);
            let err = Arc::clone(&notifier);
            MutationCommand::new("delete_agent", move |id: String| {
                let svc = Arc::clone(&svc);
                async move { svc.delete_agent(&id).await }
            })
            .on_success(move |_: &()| {
                ok.notify(Notification::info(
                    "Agent deleted",
                    "The agent was deleted successfully.",
                ))
            })
            .on_error(move |e| {
                err.notify(Notification::error(
                    "Delete failed",
                    format!("Could not delete the agent: {}", e),
                ))
            })
        };

        let share_cmd = {
            let svc = Arc::clone(&service);
            let ok = Arc::clone(&notifier);
            let err = Arc::clone(&notifier);
            MutationCommand::new("share_agent", move |(id, is_public): (String, bool)| {
                let svc = Arc::clone(&svc);
                async move { svc.share_agent(&id, is_public).await }
            })
            .on_success(move |agent: &AgentDescriptor| {
                let notification = if agent.is_public {
                    Notification::info(
                        "Agent shared",
                        format!("Agent \"{}\" is now available to all users.", agent.name),
                    )
                } else {
                    Notification::info(
                        "Agent private",
                        format!("Agent \"{}\" is now private.", agent.name),
                    )
                };
                ok.notify(notification)
            })
            .on_error(move |e| {
                err.notify(Notification::error(
                    "Sharing failed",
                    format!("Could not change the sharing state: {}", e),
                ))
            })
        };

        Self {
            service,
            notifier,
            agents: Vec::new(),
            loading: false,
            load_error: None,
            filter: AgentFilter::All,
            draft: AgentDraft::default(),
            editing: None,
            generating_avatar: false,
            create_cmd,
            update_cmd,
            delete_cmd,
            share_cmd,
        }
    }

    // ─── Roster ──────────────────────────────────────────────────

    /// Reload the agent list; failures are kept in `load_error`
    pub async fn refresh(&mut self) -> bool {
        self.loading = true;
        let result = self.service.list_agents().await;
        self.loading = false;

        match result {
            Ok(agents) => {
                tracing::debug!(count = agents.len(), "Agents loaded");
                self.agents = agents;
                self.load_error = None;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load agents");
                self.load_error = Some(e.to_string());
                false
            }
        }
    }

    /// Agents matching the current filter
    pub fn agents(&self) -> Vec<&AgentDescriptor> {
        self.agents.iter().filter(|a| self.filter.matches(a)).collect()
    }

    /// Every loaded agent regardless of filter
    pub fn all_agents(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn filter(&self) -> AgentFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: AgentFilter) {
        self.filter = filter;
    }

    pub fn filter_counts(&self) -> FilterCounts {
        FilterCounts {
            all: self.agents.len(),
            own: self.agents.iter().filter(|a| AgentFilter::Own.matches(a)).count(),
            public: self
                .agents
                .iter()
                .filter(|a| AgentFilter::Public.matches(a))
                .count(),
        }
    }

    /// Whether any mutation is running
    pub fn is_busy(&self) -> bool {
        self.create_cmd.is_in_flight()
            || self.update_cmd.is_in_flight()
            || self.delete_cmd.is_in_flight()
            || self.share_cmd.is_in_flight()
            || self.generating_avatar
    }

    // ─── Forms ───────────────────────────────────────────────────

    pub fn draft(&self) -> &AgentDraft {
        &self.draft
    }

    pub fn draft_mut(&mut self) -> &mut AgentDraft {
        &mut self.draft
    }

    pub fn reset_draft(&mut self) {
        self.draft = AgentDraft::default();
    }

    /// Open `agent` in the edit form
    pub fn begin_edit(&mut self, agent: AgentDescriptor) {
        self.editing = Some(agent);
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn editing(&self) -> Option<&AgentDescriptor> {
        self.editing.as_ref()
    }

    pub fn editing_mut(&mut self) -> Option<&mut AgentDescriptor> {
        self.editing.as_mut()
    }

    fn tags_mut(&mut self) -> &mut Vec<String> {
        match self.editing.as_mut() {
            Some(agent) => &mut agent.personality_tags,
            None => &mut self.draft.personality_tags,
        }
    }

    /// Add or remove `tag` on the agent being edited (or the draft)
    pub fn toggle_tag(&mut self, tag: &str) {
        let tags = self.tags_mut();
        if let Some(pos) = tags.iter().position(|t| t == tag) {
            tags.remove(pos);
        } else {
            tags.push(tag.to_string());
        }
    }

    /// Add a free-form tag; blank and duplicate tags are ignored
    pub fn add_custom_tag(&mut self, tag: &str) -> bool {
        let tag = tag.trim();
        let tags = self.tags_mut();
        if tag.is_empty() || tags.iter().any(|t| t == tag) {
            return false;
        }
        tags.push(tag.to_string());
        true
    }

    pub fn remove_tag(&mut self, tag: &str) {
        self.tags_mut().retain(|t| t != tag);
    }

    // ─── Mutations ───────────────────────────────────────────────

    /// Create an agent from the draft
    ///
    /// After creation the draft's avatar image is uploaded, or an avatar is
    /// generated from its prompt. Avatar failures do not undo the creation.
    pub async fn create_agent(&mut self) -> Option<AgentDescriptor> {
        if let Err(e) = self.draft.validate() {
            self.notifier
                .notify(Notification::error("Error", e.to_string()));
            return None;
        }

        let mut draft = self.draft.clone();
        if draft.description.as_deref().is_some_and(|d| d.trim().is_empty()) {
            draft.description = None;
        }
        let avatar_image = draft.avatar_image.take();
        let avatar_prompt = draft.avatar_prompt.trim().to_string();

        let mut created = self.create_cmd.execute(draft).await.ok()?;

        if let Some(image) = avatar_image {
            match self.service.upload_avatar(&created.id, image).await {
                Ok(url) => {
                    created.avatar_url = Some(url);
                    created.avatar_type = AvatarType::Uploaded;
                }
                Err(e) => self.notifier.notify(Notification::error(
                    "Avatar upload failed",
                    format!("Could not upload the avatar: {}", e),
                )),
            }
        } else if !avatar_prompt.is_empty() {
            match self.service.generate_avatar(&created.id, &avatar_prompt).await {
                Ok(url) => {
                    created.avatar_url = Some(url);
                    created.avatar_type = AvatarType::Generated;
                    created.avatar_prompt = Some(avatar_prompt);
                }
                Err(e) => self.notifier.notify(Notification::error(
                    "Avatar generation failed",
                    format!("Could not generate the avatar: {}", e),
                )),
            }
        }

        self.reset_draft();
        self.refresh().await;
        Some(created)
    }

    /// Save the agent open in the edit form
    pub async fn update_agent(&mut self) -> Option<AgentDescriptor> {
        let agent = self.editing.clone()?;
        let updated = self.update_cmd.execute(agent).await.ok()?;
        self.editing = None;
        self.refresh().await;
        Some(updated)
    }

    /// Delete an agent by id
    pub async fn delete_agent(&mut self, id: &str) -> bool {
        if self.delete_cmd.execute(id.to_string()).await.is_err() {
            return false;
        }
        if self.editing.as_ref().is_some_and(|a| a.id == id) {
            self.editing = None;
        }
        self.refresh().await;
        true
    }

    /// Flip an agent between public and private
    pub async fn toggle_share(&mut self, agent: &AgentDescriptor) -> Option<AgentDescriptor> {
        let shared = self
            .share_cmd
            .execute((agent.id.clone(), !agent.is_public))
            .await
            .ok()?;
        self.refresh().await;
        Some(shared)
    }

    /// Generate an avatar for the agent being edited
    ///
    /// Uses the draft's avatar prompt, or a default prompt built from the
    /// agent's name.
    pub async fn generate_avatar(&mut self) -> Option<String> {
        let agent = self.editing.as_ref()?;
        let id = agent.id.clone();
        let prompt = match self.draft.avatar_prompt.trim() {
            "" => default_avatar_prompt(&agent.name),
            custom => custom.to_string(),
        };

        self.generating_avatar = true;
        let result = self.service.generate_avatar(&id, &prompt).await;
        self.generating_avatar = false;

        match result {
            Ok(url) => {
                if let Some(agent) = self.editing.as_mut() {
                    agent.avatar_url = Some(url.clone());
                    agent.avatar_type = AvatarType::Generated;
                    agent.avatar_prompt = Some(prompt);
                }
                self.notifier.notify(Notification::info(
                    "Avatar generated",
                    "The avatar was generated successfully.",
                ));
                Some(url)
            }
            Err(e) => {
                self.notifier.notify(Notification::error(
                    "Avatar generation failed",
                    format!("Could not generate the avatar: {}", e),
                ));
                None
            }
        }
    }

    /// Upload an avatar image for the agent being edited
    pub async fn upload_avatar(&mut self, image: Vec<u8>) -> Option<String> {
        let id = self.editing.as_ref()?.id.clone();
        match self.service.upload_avatar(&id, image).await {
            Ok(url) => {
                if let Some(agent) = self.editing.as_mut() {
                    agent.avatar_url = Some(url.clone());
                    agent.avatar_type = AvatarType::Uploaded;
                }
                self.notifier.notify(Notification::info(
                    "Avatar uploaded",
                    "The avatar was uploaded successfully.",
                ));
                Some(url)
            }
            Err(e) => {
                self.notifier.notify(Notification::error(
                    "Avatar upload failed",
                    format!("Could not upload the avatar: {}", e),
                ));
                None
            }
        }
    }
}

/// In-memory agent service for testing and offline use
///
/// Agents created here are owned by the caller. `set_failure` makes every
/// subsequent call fail with a service error.
#[derive(Default)]
pub struct MemoryAgentService {
    agents: RwLock<Vec<AgentDescriptor>>,
    failure: RwLock<Option<String>>,
}

impl MemoryAgentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the service with existing agents
    pub fn with_agents(agents: Vec<AgentDescriptor>) -> Self {
        Self {
            agents: RwLock::new(agents),
            failure: RwLock::new(None),
        }
    }

    /// Fail every call with `reason` (or stop failing with `None`)
    pub async fn set_failure(&self, reason: Option<&str>) {
        *self.failure.write().await = reason.map(str::to_string);
    }

    async fn check(&self) -> Result<()> {
        match self.failure.read().await.as_ref() {
            Some(reason) => Err(ChatError::Service(reason.clone())),
            None => Ok(()),
        }
    }

    async fn modify<F>(&self, id: &str, f: F) -> Result<AgentDescriptor>
    where
        F: FnOnce(&mut AgentDescriptor),
    {
        self.check().await?;
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("Agent not found: {}", id)))?;
        f(agent);
        Ok(agent.clone())
    }
}

#[async_trait]
impl AgentService for MemoryAgentService {
    async fn list_agents(&self) -> Result<Vec<AgentDescriptor>> {
        self.check().await?;
        Ok(self.agents.read().await.clone())
    }

    async fn create_agent(&self, draft: AgentDraft) -> Result<AgentDescriptor> {
        self.check().await?;
        let agent = AgentDescriptor {
            description: draft.description,
            system_instruction: draft.system_instruction,
            model: draft.model,
            temperature: Some(draft.temperature),
            personality_tags: draft.personality_tags,
            is_owner: true,
            ..AgentDescriptor::new(format!("agent-{}", uuid::Uuid::new_v4()), draft.name)
        };
        self.agents.write().await.push(agent.clone());
        Ok(agent)
    }

    async fn update_agent(&self, id: &str, agent: AgentDescriptor) -> Result<AgentDescriptor> {
        self.modify(id, |stored| {
            *stored = AgentDescriptor {
                id: stored.id.clone(),
                ..agent
            }
        })
        .await
    }

    async fn delete_agent(&self, id: &str) -> Result<()> {
        self.check().await?;
        let mut agents = self.agents.write().await;
        let before = agents.len();
        agents.retain(|a| a.id != id);
        if agents.len() == before {
            return Err(ChatError::NotFound(format!("Agent not found: {}", id)));
        }
        Ok(())
    }

    async fn share_agent(&self, id: &str, is_public: bool) -> Result<AgentDescriptor> {
        self.modify(id, |agent| agent.is_public = is_public).await
    }

    async fn generate_avatar(&self, id: &str, prompt: &str) -> Result<String> {
        let url = format!("memory://avatars/{}/generated", id);
        let stored_url = url.clone();
        let prompt = prompt.to_string();
        self.modify(id, move |agent| {
            agent.avatar_url = Some(stored_url);
            agent.avatar_type = AvatarType::Generated;
            agent.avatar_prompt = Some(prompt);
        })
        .await?;
        Ok(url)
    }

    async fn upload_avatar(&self, id: &str, image: Vec<u8>) -> Result<String> {
        if image.is_empty() {
            return Err(ChatError::Validation("Avatar image is empty".to_string()));
        }
        let url = format!("memory://avatars/{}/uploaded", id);
        let stored_url = url.clone();
        self.modify(id, move |agent| {
            agent.avatar_url = Some(stored_url);
            agent.avatar_type = AvatarType::Uploaded;
        })
        .await?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryNotifier;
    use crate::types::NotificationVariant;

    fn seeded() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor {
                is_owner: true,
                ..AgentDescriptor::new("mine", "Mine")
            },
            AgentDescriptor {
                is_owner: true,
                is_public: true,
                ..AgentDescriptor::new("mine-shared", "Mine Shared")
            },
            AgentDescriptor {
                is_public: true,
                ..AgentDescriptor::new("theirs", "Theirs")
            },
        ]
    }

    fn manager(
        service: MemoryAgentService,
    ) -> (AgentManager, Arc<MemoryAgentService>, Arc<MemoryNotifier>) {
        let service = Arc::new(service);
        let notifier = Arc::new(MemoryNotifier::new());
        let manager = AgentManager::new(service.clone(), notifier.clone());
        (manager, service, notifier)
    }

    #[tokio::test]
    async fn test_command_hooks_and_in_flight() {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let s = successes.clone();
        let f = failures.clone();

        let cmd = MutationCommand::new("double", |n: i32| async move {
            if n < 0 {
                Err(ChatError::Validation("negative".to_string()))
            } else {
                Ok(n * 2)
            }
        })
        .on_success(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        })
        .on_error(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(cmd.name(), "double");
        assert!(!cmd.is_in_flight());
        assert_eq!(cmd.execute(21).await.unwrap(), 42);
        assert!(cmd.execute(-1).await.is_err());
        assert!(!cmd.is_in_flight());
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_command_in_flight_while_pending() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let g = gate.clone();
        let cmd = Arc::new(MutationCommand::new("wait", move |_: ()| {
            let g = g.clone();
            async move {
                g.notified().await;
                Ok(())
            }
        }));

        let running = cmd.clone();
        let handle = tokio::spawn(async move { running.execute(()).await });
        tokio::task::yield_now().await;
        assert!(cmd.is_in_flight());

        gate.notify_one();
        handle.await.unwrap().unwrap();
        assert!(!cmd.is_in_flight());
    }

    #[test]
    fn test_draft_defaults_and_validation() {
        let draft = AgentDraft::default();
        assert_eq!(draft.model, "gpt-4o");
        assert!((draft.temperature - 0.7).abs() < f32::EPSILON);
        assert!(draft.validate().is_err());

        let draft = AgentDraft {
            name: "Ana".to_string(),
            system_instruction: "Be helpful".to_string(),
            ..Default::default()
        };
        assert!(draft.validate().is_ok());
    }

    #[tokio::test]
    async fn test_filters_and_counts() {
        let (mut manager, _, _) = manager(MemoryAgentService::with_agents(seeded()));
        assert!(manager.refresh().await);

        assert_eq!(
            manager.filter_counts(),
            FilterCounts {
                all: 3,
                own: 2,
                public: 1
            }
        );
        manager.set_filter(AgentFilter::Public);
        let names: Vec<_> = manager.agents().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Theirs"]);

        manager.set_filter(AgentFilter::Own);
        assert_eq!(manager.agents().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_recorded() {
        let (mut manager, service, _) = manager(MemoryAgentService::new());
        service.set_failure(Some("offline")).await;

        assert!(!manager.refresh().await);
        assert!(manager.load_error().unwrap().contains("offline"));
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_create_requires_name_and_instruction() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::new());
        manager.draft_mut().name = "Ana".to_string();

        assert!(manager.create_agent().await.is_none());
        let last = notifier.last().unwrap();
        assert_eq!(last.variant, NotificationVariant::Destructive);
        assert!(last.description.contains("required"));
    }

    #[tokio::test]
    async fn test_create_with_generated_avatar() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::new());
        {
            let draft = manager.draft_mut();
            draft.name = "Ana".to_string();
            draft.system_instruction = "Be helpful".to_string();
            draft.description = Some("  ".to_string());
            draft.avatar_prompt = "a friendly owl".to_string();
        }
        manager.toggle_tag("Friendly");

        let created = manager.create_agent().await.unwrap();
        assert_eq!(created.avatar_type, AvatarType::Generated);
        assert_eq!(created.avatar_prompt.as_deref(), Some("a friendly owl"));
        assert!(created.description.is_none());
        assert_eq!(created.personality_tags, vec!["Friendly"]);

        assert_eq!(manager.draft(), &AgentDraft::default());
        assert_eq!(manager.all_agents().len(), 1);
        assert_eq!(
            manager.all_agents()[0].avatar_url.as_deref(),
            created.avatar_url.as_deref()
        );
        assert_eq!(notifier.notifications()[0].title, "Agent created");
    }

    #[tokio::test]
    async fn test_create_with_uploaded_avatar() {
        let (mut manager, _, _) = manager(MemoryAgentService::new());
        {
            let draft = manager.draft_mut();
            draft.name = "Bob".to_string();
            draft.system_instruction = "Build".to_string();
            draft.avatar_prompt = "ignored".to_string();
            draft.avatar_image = Some(vec![0x89, 0x50, 0x4e, 0x47]);
        }
        let created = manager.create_agent().await.unwrap();
        assert_eq!(created.avatar_type, AvatarType::Uploaded);
        assert!(created.avatar_prompt.is_none());
    }

    #[tokio::test]
    async fn test_create_failure_notifies() {
        let (mut manager, service, notifier) = manager(MemoryAgentService::new());
        service.set_failure(Some("quota exceeded")).await;
        {
            let draft = manager.draft_mut();
            draft.name = "Ana".to_string();
            draft.system_instruction = "Be helpful".to_string();
        }

        assert!(manager.create_agent().await.is_none());
        let last = notifier.last().unwrap();
        assert_eq!(last.title, "Create failed");
        assert!(last.description.contains("quota exceeded"));
        assert_eq!(manager.draft().name, "Ana");
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::with_agents(seeded()));
        manager.refresh().await;

        let mut agent = manager.all_agents()[0].clone();
        agent.name = "Renamed".to_string();
        manager.begin_edit(agent);
        manager.toggle_tag("Formal");
        manager.toggle_tag("Formal");
        assert!(manager.add_custom_tag("Poetic"));
        assert!(!manager.add_custom_tag("Poetic"));
        assert!(!manager.add_custom_tag("  "));

        let updated = manager.update_agent().await.unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.personality_tags, vec!["Poetic"]);
        assert!(manager.editing().is_none());
        assert_eq!(manager.all_agents()[0].name, "Renamed");
        assert!(manager.draft().personality_tags.is_empty());

        assert!(manager.delete_agent("mine").await);
        assert_eq!(manager.all_agents().len(), 2);
        assert!(!manager.delete_agent("mine").await);
        assert_eq!(notifier.last().unwrap().title, "Delete failed");
    }

    #[tokio::test]
    async fn test_update_without_editing_is_noop() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::new());
        assert!(manager.update_agent().await.is_none());
        assert!(notifier.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_share() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::with_agents(seeded()));
        manager.refresh().await;

        let agent = manager.all_agents()[0].clone();
        assert!(!agent.is_public);

        let shared = manager.toggle_share(&agent).await.unwrap();
        assert!(shared.is_public);
        assert_eq!(notifier.last().unwrap().title, "Agent shared");

        let private = manager.toggle_share(&shared).await.unwrap();
        assert!(!private.is_public);
        assert_eq!(notifier.last().unwrap().title, "Agent private");
    }

    #[tokio::test]
    async fn test_generate_avatar_default_prompt() {
        let (mut manager, _, _) = manager(MemoryAgentService::with_agents(seeded()));
        manager.refresh().await;
        assert!(manager.generate_avatar().await.is_none());

        manager.begin_edit(manager.all_agents()[0].clone());
        let url = manager.generate_avatar().await.unwrap();

        let editing = manager.editing().unwrap();
        assert_eq!(editing.avatar_url.as_deref(), Some(url.as_str()));
        assert_eq!(
            editing.avatar_prompt.as_deref(),
            Some("A professional avatar for an AI agent named Mine")
        );
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_upload_avatar_errors_notify() {
        let (mut manager, _, notifier) = manager(MemoryAgentService::with_agents(seeded()));
        manager.refresh().await;
        manager.begin_edit(manager.all_agents()[0].clone());

        assert!(manager.upload_avatar(Vec::new()).await.is_none());
        assert_eq!(notifier.last().unwrap().title, "Avatar upload failed");

        let url = manager.upload_avatar(vec![1, 2, 3]).await.unwrap();
        assert!(url.ends_with("/uploaded"));
        assert_eq!(
            manager.editing().unwrap().avatar_type,
            AvatarType::Uploaded
        );
    }

    #[test]
    fn test_memory_service_unknown_agent() {
        let service = MemoryAgentService::with_agents(seeded());
        tokio_test::block_on(async {
            let err = service.share_agent("missing", true).await.unwrap_err();
            assert!(matches!(err, ChatError::NotFound(_)));
            assert!(service.delete_agent("missing").await.is_err());

            let updated = service
                .update_agent("theirs", AgentDescriptor::new("ignored", "Renamed"))
                .await
                .unwrap();
            assert_eq!(updated.id, "theirs");
            assert_eq!(updated.name, "Renamed");
        });
    }

    #[test]
    fn test_personality_tags() {
        assert_eq!(PERSONALITY_TAGS.len(), 10);
        assert!(PERSONALITY_TAGS.contains(&"Analytical"));
    }
}
