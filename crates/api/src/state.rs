use std::sync::Arc;

use careline_domain::chat::ChatService;
use careline_domain::notify::SideEffectNotifier;
use careline_domain::ports::notify::{CrmPublisher, NotificationStore};
use careline_domain::ports::profiles::PatientProfiles;
use careline_domain::ports::roles::RoleDirectory;
use careline_infra::auth::JwtVerifier;
use careline_infra::config::AppConfig;
use careline_infra::crm::HttpCrmPublisher;
use careline_infra::repositories::{
    InMemoryChatRepository, InMemoryNotificationStore, InMemoryPatientProfiles,
    InMemoryRoleDirectory,
};

use crate::realtime::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub chat: ChatService,
    pub roles: Arc<dyn RoleDirectory>,
    pub profiles: Arc<dyn PatientProfiles>,
    pub verifier: JwtVerifier,
    pub realtime: Arc<RealtimeHub>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let crm = HttpCrmPublisher::from_config(&config)
            .map_err(|err| anyhow::anyhow!("crm client init failed: {err}"))?;
        let roles = InMemoryRoleDirectory::seeded_with_admins(config.seeded_admin_ids());
        Ok(Self::assemble(
            config,
            Arc::new(InMemoryNotificationStore::new()),
            Arc::new(crm),
            Arc::new(roles),
            Arc::new(InMemoryPatientProfiles::new()),
        ))
    }

    /// Wiring entry point shared with tests, which substitute their own
    /// stores and side-effect collaborators.
    pub fn assemble(
        config: AppConfig,
        notifications: Arc<dyn NotificationStore>,
        crm: Arc<dyn CrmPublisher>,
        roles: Arc<dyn RoleDirectory>,
        profiles: Arc<dyn PatientProfiles>,
    ) -> Self {
        let notifier = SideEffectNotifier::new(notifications, crm);
        let chat = ChatService::new(Arc::new(InMemoryChatRepository::new()), notifier);
        let verifier = JwtVerifier::new(config.jwt_secret.clone());
        let realtime = Arc::new(RealtimeHub::new(config.realtime_channel_capacity));
        Self {
            config,
            chat,
            roles,
            profiles,
            verifier,
            realtime,
        }
    }
}
