#![allow(dead_code)]

use approval_engine::{
    ApprovalEngine, ApproverDirectory, Clock, EngineConfig, ManualClock, MemoryNotifier,
    RequestStatus, StaticDirectory,
};
use approval_store::InMemoryApprovalStore;
use approval_types::*;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

pub struct Harness {
    pub engine: ApprovalEngine,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<MemoryNotifier>,
    pub company: CompanyId,
    /// Member of the configured admin role
    pub admin: UserId,
}

pub fn admin_role() -> String {
    EngineConfig::default().admin_role
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_directory(StaticDirectory::new())
    }

    pub fn with_directory(directory: StaticDirectory) -> Self {
        let admin = UserId::generate();
        let directory = directory.with_role(admin_role(), vec![admin]);
        Self::from_directory(Arc::new(directory), admin)
    }

    /// Engine over any directory; `admin` should be in [`admin_role`]
    pub fn from_directory(directory: Arc<dyn ApproverDirectory>, admin: UserId) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let notifier = Arc::new(MemoryNotifier::new());
        let engine = ApprovalEngine::new(Arc::new(InMemoryApprovalStore::new()), directory)
            .with_clock(clock.clone())
            .with_notifier(notifier.clone());

        Self {
            engine,
            clock,
            notifier,
            company: CompanyId::generate(),
            admin,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }

    /// Template with one fixed user per level, 24h SLA each
    pub fn chain(&self, approvers: &[UserId]) -> NewTemplate {
        approvers.iter().enumerate().fold(
            NewTemplate::new(self.company, "expense", "expense_claim"),
            |template, (i, user)| template.with_level(WorkflowLevel::user(i as u32 + 1, *user, 24)),
        )
    }

    pub async fn register(&self, template: NewTemplate) -> WorkflowTemplate {
        self.engine.register_template(template, None).await.unwrap()
    }

    pub async fn create(
        &self,
        template: &WorkflowTemplate,
        amount: Option<Amount>,
    ) -> ApprovalRequest {
        let mut context = RequestContext::new(self.company, UserId::generate());
        if let Some(amount) = amount {
            context = context.with_amount(amount);
        }
        self.engine
            .create_request(
                Some(template.id),
                &template.entity_type,
                &format!("DOC-{}", RequestId::generate()),
                context,
            )
            .await
            .unwrap()
    }

    pub async fn status(&self, request_id: RequestId) -> RequestStatus {
        self.engine.get_status(request_id).await.unwrap()
    }

    pub async fn audit_names(&self, request_id: RequestId) -> Vec<&'static str> {
        self.engine
            .audit_trail(request_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action.as_str())
            .collect()
    }
}
