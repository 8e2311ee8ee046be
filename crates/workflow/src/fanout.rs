use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use stagegate_core::domain::approval::ApprovalRequest;
use stagegate_core::domain::notification::{decision_recipients, Notification, NotificationKind};
use stagegate_core::domain::project::Project;
use stagegate_db::repositories::NotificationRepository;
use stagegate_notify::NotificationTransport;

/// Persists and delivers notifications around lifecycle events. Everything
/// here is advisory: a failed row insert or delivery is logged at WARN and
/// the workflow carries on, so a flaky webhook can never undo a decision.
#[derive(Clone)]
pub struct NotificationFanout {
    notifications: Arc<dyn NotificationRepository>,
    transport: Arc<dyn NotificationTransport>,
}

impl NotificationFanout {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self { notifications, transport }
    }

    /// Tells the assigned reviewer a request awaits them.
    pub async fn request_created(&self, request: &ApprovalRequest) {
        let notification = Notification::new(
            request.requested_to.clone(),
            request.requested_by.clone(),
            NotificationKind::RequestCreated,
            Some(request.id.clone()),
            request.project_id.clone(),
            format!("`{}` requested your approval: {}", request.requested_by, request.title),
            Utc::now(),
        );
        self.dispatch(notification).await;
    }

    /// Announces a terminal decision: the requester always hears about the
    /// verdict; when the decision moved the project phase, subscribed
    /// project members hear about the phase change.
    pub async fn decision_made(
        &self,
        request: &ApprovalRequest,
        project: Option<&Project>,
        phase_changed: bool,
    ) {
        let verdict = request.status.as_str();
        let sender =
            request.decided_by.clone().unwrap_or_else(|| request.requested_to.clone());
        let decision_message = format!("Your approval `{}` was {}", request.title, verdict);
        let phase_message = match project {
            Some(project) => format!(
                "Project `{}` moved to {} after approval `{}`",
                project.name,
                project.current_phase.as_str(),
                request.id
            ),
            None => format!("Project phase changed after approval `{}`", request.id),
        };

        for (index, recipient) in
            decision_recipients(request, project, phase_changed).into_iter().enumerate()
        {
            // The requester is always first; everyone after them is a
            // phase-change subscriber.
            let (kind, message) = if index == 0 {
                (NotificationKind::DecisionMade, decision_message.clone())
            } else {
                (NotificationKind::PhaseChanged, phase_message.clone())
            };

            let notification = Notification::new(
                recipient,
                sender.clone(),
                kind,
                Some(request.id.clone()),
                request.project_id.clone(),
                message,
                Utc::now(),
            );
            self.dispatch(notification).await;
        }
    }

    async fn dispatch(&self, notification: Notification) {
        if let Err(error) = self.notifications.append(&notification).await {
            warn!(
                event_name = "notification.persist_failed",
                notification_id = %notification.id.as_str(),
                recipient = %notification.recipient,
                error = %error,
                "notification row was not stored"
            );
        }

        if let Err(error) = self.transport.deliver(&notification).await {
            warn!(
                event_name = "notification.delivery_failed",
                notification_id = %notification.id.as_str(),
                recipient = %notification.recipient,
                transport = self.transport.name(),
                error = %error,
                "notification delivery failed, continuing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use stagegate_core::domain::approval::{
        ApprovalKind, ApprovalRequest, DecisionOutcome, NewApprovalRequest, Priority,
    };
    use stagegate_core::domain::notification::NotificationKind;
    use stagegate_core::domain::project::{Project, ProjectId, ProjectMember, ProjectPhase};
    use stagegate_core::domain::user::UserId;
    use stagegate_db::repositories::{InMemoryStore, NotificationRepository};
    use stagegate_notify::InMemoryTransport;

    use super::NotificationFanout;

    fn decided_request() -> ApprovalRequest {
        let request = ApprovalRequest::create(
            NewApprovalRequest {
                project_id: Some(ProjectId("proj-1".to_string())),
                kind: ApprovalKind::StageTransition,
                title: "Move to testing".to_string(),
                description: None,
                requested_by: UserId("pm-ana".to_string()),
                requested_to: UserId("client-cy".to_string()),
                priority: Priority::Medium,
                due_date: None,
                attachments: Vec::new(),
            },
            Utc::now(),
        )
        .expect("create");
        let record = request
            .prepare_decision(
                UserId("client-cy".to_string()),
                DecisionOutcome::Approve,
                None,
                None,
                Utc::now(),
            )
            .expect("decision");
        request.with_decision(record)
    }

    fn project() -> Project {
        Project::new(
            ProjectId("proj-1".to_string()),
            "Agency site relaunch".to_string(),
            ProjectPhase::Testing,
            vec![
                ProjectMember {
                    user_id: UserId("dev-bo".to_string()),
                    notify_on_phase_change: true,
                },
                ProjectMember {
                    user_id: UserId("dev-li".to_string()),
                    notify_on_phase_change: false,
                },
            ],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn decision_fanout_persists_and_delivers_to_requester_and_subscribers() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        let fanout = NotificationFanout::new(Arc::new(store.clone()), Arc::new(transport.clone()));

        fanout.decision_made(&decided_request(), Some(&project()), true).await;

        let delivered = transport.delivered().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].recipient, UserId("pm-ana".to_string()));
        assert_eq!(delivered[0].sender_id, UserId("client-cy".to_string()));
        assert!(!delivered[0].is_read);
        assert_eq!(delivered[0].kind, NotificationKind::DecisionMade);
        assert_eq!(delivered[1].recipient, UserId("dev-bo".to_string()));
        assert_eq!(delivered[1].kind, NotificationKind::PhaseChanged);

        let stored = store
            .list_for_recipient(&UserId("pm-ana".to_string()), 10)
            .await
            .expect("stored rows");
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn rejection_without_phase_change_notifies_requester_only() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        let fanout = NotificationFanout::new(Arc::new(store), Arc::new(transport.clone()));

        fanout.decision_made(&decided_request(), Some(&project()), false).await;

        let delivered = transport.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient, UserId("pm-ana".to_string()));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed_and_rows_still_persist() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        transport.fail_with("webhook unreachable").await;
        let fanout = NotificationFanout::new(Arc::new(store.clone()), Arc::new(transport.clone()));

        fanout.decision_made(&decided_request(), Some(&project()), true).await;

        assert!(transport.delivered().await.is_empty());
        let stored = store
            .list_for_recipient(&UserId("dev-bo".to_string()), 10)
            .await
            .expect("stored rows");
        assert_eq!(stored.len(), 1, "persistence is independent of delivery");
    }

    #[tokio::test]
    async fn request_created_targets_the_reviewer() {
        let store = InMemoryStore::new();
        let transport = InMemoryTransport::new();
        let fanout = NotificationFanout::new(Arc::new(store), Arc::new(transport.clone()));

        let request = ApprovalRequest::create(
            NewApprovalRequest {
                project_id: None,
                kind: ApprovalKind::Generic,
                title: "Budget sign-off".to_string(),
                description: None,
                requested_by: UserId("pm-ana".to_string()),
                requested_to: UserId("admin-eve".to_string()),
                priority: Priority::High,
                due_date: None,
                attachments: Vec::new(),
            },
            Utc::now(),
        )
        .expect("create");

        fanout.request_created(&request).await;

        let delivered = transport.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].recipient, UserId("admin-eve".to_string()));
        assert_eq!(delivered[0].kind, NotificationKind::RequestCreated);
    }
}
