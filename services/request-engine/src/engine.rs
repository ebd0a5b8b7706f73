//! The request state machine.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use ledger::CreditLedger;
use notifier::NotificationDispatcher;
use persistence::cache::{invalidate_quietly, CacheInvalidator, EntityKind};
use persistence::Store;
use types::errors::{CoreError, RequestError};
use types::ids::{RequestId, ServiceTypeId, UserId};
use types::notification::PushKind;
use types::request::{Actor, Request, RequestStatus, RevisionKind, Role};
use types::service::{AttributeResponse, Priority};

use crate::validate::validate_responses;

/// Input for opening a request.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub service_type_id: ServiceTypeId,
    /// Numeric priority level, 1 (low) to 3 (high)
    pub priority_level: u8,
    pub attribute_responses: Vec<AttributeResponse>,
}

/// The request lifecycle engine.
#[derive(Clone)]
pub struct RequestEngine {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    dispatcher: NotificationDispatcher,
    cache: Arc<dyn CacheInvalidator>,
}

impl RequestEngine {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: CreditLedger,
        dispatcher: NotificationDispatcher,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            store,
            ledger,
            dispatcher,
            cache,
        }
    }

    /// Open a request: validate the intake answers, price it, debit the
    /// client's active subscription and persist the PENDING row.
    ///
    /// The debit and the insert succeed or fail together: an insert failure
    /// triggers a compensating credit.
    pub async fn create(&self, actor: Actor, input: CreateRequest) -> Result<Request, CoreError> {
        require_role(actor, Role::Client, "create a request")?;

        let service_type = self
            .store
            .service_type(input.service_type_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or(RequestError::ServiceTypeNotFound {
                service_type_id: input.service_type_id,
            })?;

        let priority = Priority::from_level(input.priority_level)?;
        validate_responses(&service_type.attributes, &input.attribute_responses)?;

        let now = Utc::now();
        let subscription = self.ledger.require_active(actor.user_id, now).await?;
        let surcharge = service_type.priority_costs.surcharge(priority);
        let cost = pricing::creation_cost(
            service_type.base_credit_cost,
            priority,
            &service_type.priority_costs,
        );

        self.ledger.debit(subscription.id, cost).await?;

        let request = Request::new(
            actor.user_id,
            service_type.id,
            subscription.id,
            priority,
            service_type.base_credit_cost,
            surcharge,
            input.attribute_responses,
            now,
        );

        if let Err(err) = self.store.insert_request(request.clone()).await {
            // Undo the spend so the pair remains all-or-nothing.
            if let Err(refund_err) = self.ledger.credit(subscription.id, cost).await {
                warn!(%refund_err, "compensating credit failed after insert failure");
            }
            return Err(err.into());
        }

        info!(request_id = %request.id, client_id = %actor.user_id, cost, "request created");
        self.invalidate_request(&request);
        self.notify_quietly(
            actor.user_id,
            PushKind::General,
            "Request received",
            format!("Your request was received and {} credits were debited", cost),
            Some(request_link(&request)),
        )
        .await;

        Ok(request)
    }

    /// Claim a pending, unassigned request for a provider.
    ///
    /// The claim itself is one conditional update; when two providers race,
    /// the loser sees `AlreadyClaimed` rather than a generic failure so the
    /// caller can move on to another job.
    pub async fn claim(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        require_role(actor, Role::Provider, "claim a request")?;

        if !self.store.claim_request(request_id, actor.user_id).await? {
            // Zero rows matched. Look at the row to say why: a competing
            // provider beat us to it, or it was never claimable.
            let request = self.fetch(request_id).await?;
            if request.provider_id.is_some() && !request.status.is_terminal() {
                return Err(RequestError::AlreadyClaimed { request_id }.into());
            }
            return Err(RequestError::InvalidTransition {
                from: request.status,
                requested: RequestStatus::Approved,
            }
            .into());
        }

        let request = self.fetch(request_id).await?;

        info!(%request_id, provider_id = %actor.user_id, "request claimed");
        self.invalidate_request(&request);
        self.notify_quietly(
            request.client_id,
            PushKind::Assignment,
            "Provider assigned",
            "A provider accepted your request",
            Some(request_link(&request)),
        )
        .await;

        Ok(request)
    }

    /// Provider starts working: APPROVED → IN_PROGRESS.
    pub async fn start(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_assigned_provider(actor, &request, "start work")?;

        let request = self
            .apply_transition(request, RequestStatus::Approved, RequestStatus::InProgress)
            .await?;

        self.notify_quietly(
            request.client_id,
            PushKind::StatusChange,
            "Work started",
            "Your request is now in progress",
            Some(request_link(&request)),
        )
        .await;
        Ok(request)
    }

    /// Provider hands over the work product: IN_PROGRESS → DELIVERED.
    pub async fn deliver(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_assigned_provider(actor, &request, "deliver")?;

        let request = self
            .apply_transition(request, RequestStatus::InProgress, RequestStatus::Delivered)
            .await?;

        self.notify_quietly(
            request.client_id,
            PushKind::StatusChange,
            "Request delivered",
            "Your request was delivered; review and approve or ask for changes",
            Some(request_link(&request)),
        )
        .await;
        Ok(request)
    }

    /// Client accepts the delivery: DELIVERED → COMPLETED.
    pub async fn approve(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_owning_client(actor, &request, "approve")?;

        let mut updated = request;
        updated.completed_at = Some(Utc::now());
        let updated = self
            .apply_transition(updated, RequestStatus::Delivered, RequestStatus::Completed)
            .await?;

        if let Some(provider_id) = updated.provider_id {
            self.notify_quietly(
                provider_id,
                PushKind::StatusChange,
                "Request approved",
                "The client accepted your delivery",
                Some(request_link(&updated)),
            )
            .await;
        }
        Ok(updated)
    }

    /// Client asks for changes on a delivery: DELIVERED → REVISION_REQUESTED.
    ///
    /// The revision is priced against the package quota of the client's
    /// active subscription. A paid revision debits the unit cost before the
    /// row moves; if the debit fails the request stays DELIVERED.
    pub async fn request_revision(
        &self,
        actor: Actor,
        request_id: RequestId,
        feedback: impl Into<String>,
    ) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_owning_client(actor, &request, "request a revision")?;

        if request.status != RequestStatus::Delivered {
            return Err(RequestError::InvalidTransition {
                from: request.status,
                requested: RequestStatus::RevisionRequested,
            }
            .into());
        }

        let now = Utc::now();
        let subscription = self.ledger.require_active(actor.user_id, now).await?;
        let package = self
            .store
            .package(subscription.package_id)
            .await?
            .ok_or_else(|| types::errors::StorageError::Backend {
                message: format!("package {} missing for subscription", subscription.package_id),
            })?;

        let charge = pricing::classify_revision(
            request.current_revision_count,
            package.max_free_revisions,
            package.paid_revision_unit_cost,
        );

        if charge.kind == RevisionKind::Paid {
            self.ledger.debit(subscription.id, charge.cost).await?;
        }

        let mut updated = request;
        updated.record_revision(charge.kind, charge.cost);
        updated.status = RequestStatus::RevisionRequested;

        if !self
            .store
            .update_request_if_status(updated.clone(), RequestStatus::Delivered)
            .await?
        {
            // Lost the row race after a successful debit: give it back.
            if charge.kind == RevisionKind::Paid {
                if let Err(refund_err) = self.ledger.credit(subscription.id, charge.cost).await {
                    warn!(%refund_err, "compensating credit failed after revision race");
                }
            }
            let current = self.current_status(request_id).await?;
            return Err(RequestError::InvalidTransition {
                from: current,
                requested: RequestStatus::RevisionRequested,
            }
            .into());
        }

        info!(
            %request_id,
            kind = ?charge.kind,
            cost = charge.cost,
            revision = updated.current_revision_count,
            "revision requested"
        );
        self.invalidate_request(&updated);
        if let Some(provider_id) = updated.provider_id {
            self.notify_quietly(
                provider_id,
                PushKind::Message,
                "Revision requested",
                feedback.into(),
                Some(request_link(&updated)),
            )
            .await;
        }

        Ok(updated)
    }

    /// Provider picks a revision back up: REVISION_REQUESTED → IN_PROGRESS.
    pub async fn resume(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_assigned_provider(actor, &request, "resume work")?;

        let request = self
            .apply_transition(
                request,
                RequestStatus::RevisionRequested,
                RequestStatus::InProgress,
            )
            .await?;

        self.notify_quietly(
            request.client_id,
            PushKind::StatusChange,
            "Revision started",
            "The provider started on your revision",
            Some(request_link(&request)),
        )
        .await;
        Ok(request)
    }

    /// Cancel a non-terminal request and refund its full cost.
    ///
    /// Clients cancel their own requests, admins cancel anything, and a
    /// provider may only decline a still-unassigned PENDING request. The
    /// refund goes back to the subscription the request was debited from.
    /// Work product has not been accepted, so the whole `credit_cost`
    /// returns.
    pub async fn cancel(&self, actor: Actor, request_id: RequestId) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;

        if request.status.is_terminal() {
            return Err(RequestError::InvalidTransition {
                from: request.status,
                requested: RequestStatus::Cancelled,
            }
            .into());
        }

        match actor.role {
            Role::Admin => {}
            Role::Client if request.client_id == actor.user_id => {}
            Role::Provider if request.status == RequestStatus::Pending => {}
            role => {
                return Err(RequestError::Forbidden {
                    role,
                    action: "cancel this request".to_string(),
                }
                .into());
            }
        }

        let from = request.status;
        let request = self
            .apply_transition(request, from, RequestStatus::Cancelled)
            .await?;

        self.ledger
            .credit(request.subscription_id, request.credit_cost)
            .await?;
        info!(%request_id, refunded = request.credit_cost, "request cancelled");

        if request.client_id != actor.user_id {
            self.notify_quietly(
                request.client_id,
                PushKind::StatusChange,
                "Request cancelled",
                format!("Your request was cancelled; {} credits were refunded", request.credit_cost),
                Some(request_link(&request)),
            )
            .await;
        }
        if let Some(provider_id) = request.provider_id {
            if provider_id != actor.user_id {
                self.notify_quietly(
                    provider_id,
                    PushKind::StatusChange,
                    "Request cancelled",
                    "The request you were working on was cancelled",
                    Some(request_link(&request)),
                )
                .await;
            }
        }

        Ok(request)
    }

    /// Rate a completed request, once.
    pub async fn rate(
        &self,
        actor: Actor,
        request_id: RequestId,
        stars: u8,
    ) -> Result<Request, CoreError> {
        let request = self.fetch(request_id).await?;
        require_owning_client(actor, &request, "rate")?;

        if !(1..=5).contains(&stars) {
            return Err(RequestError::ValidationFailed {
                question: "rating".to_string(),
                reason: format!("{} is out of the 1-5 range", stars),
            }
            .into());
        }
        if request.status != RequestStatus::Completed {
            return Err(RequestError::ValidationFailed {
                question: "rating".to_string(),
                reason: "only completed requests can be rated".to_string(),
            }
            .into());
        }
        if request.rating.is_some() {
            return Err(RequestError::ValidationFailed {
                question: "rating".to_string(),
                reason: "request was already rated".to_string(),
            }
            .into());
        }

        let mut updated = request;
        updated.rating = Some(stars);
        let updated = self
            .apply_transition(updated, RequestStatus::Completed, RequestStatus::Completed)
            .await?;

        if let Some(provider_id) = updated.provider_id {
            self.notify_quietly(
                provider_id,
                PushKind::General,
                "New rating",
                format!("A client rated your work {} out of 5", stars),
                Some(request_link(&updated)),
            )
            .await;
        }
        Ok(updated)
    }

    /// Fetch a request or report it missing.
    async fn fetch(&self, request_id: RequestId) -> Result<Request, CoreError> {
        self.store
            .request(request_id)
            .await?
            .ok_or_else(|| RequestError::RequestNotFound { request_id }.into())
    }

    async fn current_status(&self, request_id: RequestId) -> Result<RequestStatus, CoreError> {
        Ok(self.fetch(request_id).await?.status)
    }

    /// Move a row to `new_status` guarded on `expected`; a lost race is an
    /// `InvalidTransition` against whatever the row holds now.
    async fn apply_transition(
        &self,
        mut request: Request,
        expected: RequestStatus,
        new_status: RequestStatus,
    ) -> Result<Request, CoreError> {
        if request.status != expected {
            return Err(RequestError::InvalidTransition {
                from: request.status,
                requested: new_status,
            }
            .into());
        }

        request.status = new_status;
        if !self
            .store
            .update_request_if_status(request.clone(), expected)
            .await?
        {
            let current = self.current_status(request.id).await?;
            return Err(RequestError::InvalidTransition {
                from: current,
                requested: new_status,
            }
            .into());
        }

        info!(request_id = %request.id, from = %expected, to = %new_status, "transition applied");
        self.invalidate_request(&request);
        Ok(request)
    }

    fn invalidate_request(&self, request: &Request) {
        invalidate_quietly(
            self.cache.as_ref(),
            EntityKind::Request,
            &request.id.to_string(),
            &[
                format!("client:{}", request.client_id),
                format!("service:{}", request.service_type_id),
            ],
        );
    }

    /// Notifications are a side effect of an already-committed mutation and
    /// must never fail it.
    async fn notify_quietly(
        &self,
        user_id: UserId,
        kind: PushKind,
        title: &str,
        message: impl Into<String>,
        link: Option<String>,
    ) {
        if let Err(err) = self
            .dispatcher
            .notify(user_id, kind, title, message.into(), link)
            .await
        {
            warn!(%user_id, %err, "notification side effect failed");
        }
    }
}

fn request_link(request: &Request) -> String {
    format!("/requests/{}", request.id)
}

fn require_role(actor: Actor, role: Role, action: &str) -> Result<(), RequestError> {
    if actor.role != role {
        return Err(RequestError::Forbidden {
            role: actor.role,
            action: action.to_string(),
        });
    }
    Ok(())
}

fn require_assigned_provider(
    actor: Actor,
    request: &Request,
    action: &str,
) -> Result<(), RequestError> {
    require_role(actor, Role::Provider, action)?;
    if request.provider_id != Some(actor.user_id) {
        return Err(RequestError::Forbidden {
            role: actor.role,
            action: format!("{} on a request assigned to another provider", action),
        });
    }
    Ok(())
}

fn require_owning_client(actor: Actor, request: &Request, action: &str) -> Result<(), RequestError> {
    require_role(actor, Role::Client, action)?;
    if request.client_id != actor.user_id {
        return Err(RequestError::Forbidden {
            role: actor.role,
            action: format!("{} another client's request", action),
        });
    }
    Ok(())
}
