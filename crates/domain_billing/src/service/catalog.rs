//! Catalog commands

use tracing::instrument;

use core_kernel::{ActorContext, FeeTemplateId};

use crate::catalog::{
    resolve_applicable_template, FeeCategory, FeeTemplate, NewFeeCategory, NewFeeTemplate,
    StudentProfile, TemplateAmendment, TriggerContext,
};
use crate::command::CommandResult;
use crate::error::BillingError;
use crate::store::{committed, ChangeSet};

use super::LedgerService;

impl LedgerService {
    #[instrument(skip(self, request, actor), fields(name = %request.name))]
    pub async fn create_category(
        &self,
        request: NewFeeCategory,
        actor: &dyn ActorContext,
    ) -> CommandResult<FeeCategory> {
        let result = self.try_create_category(request, actor).await;
        self.finish("create_category", result, |c| format!("Created fee category {}", c.name))
    }

    async fn try_create_category(
        &self,
        request: NewFeeCategory,
        actor: &dyn ActorContext,
    ) -> Result<FeeCategory, BillingError> {
        let category = FeeCategory::create(request, actor.current_actor().id, self.now())?;
        let mut changes = ChangeSet::new();
        changes.insert(category.clone());
        self.commit(changes).await?;
        Ok(committed(category))
    }

    #[instrument(skip(self, request, actor), fields(name = %request.name, category_id = %request.category_id))]
    pub async fn create_template(
        &self,
        request: NewFeeTemplate,
        actor: &dyn ActorContext,
    ) -> CommandResult<FeeTemplate> {
        let result = self.try_create_template(request, actor).await;
        self.finish("create_template", result, |t| {
            format!("Created fee template {} ({})", t.name, t.id)
        })
    }

    async fn try_create_template(
        &self,
        request: NewFeeTemplate,
        actor: &dyn ActorContext,
    ) -> Result<FeeTemplate, BillingError> {
        let category = self
            .store
            .get_category(request.category_id)
            .await?
            .ok_or_else(|| BillingError::not_found("FeeCategory", request.category_id))?;
        if !category.is_active {
            return Err(BillingError::invalid(format!(
                "fee category {} is inactive",
                category.name
            )));
        }

        let template = FeeTemplate::create(request, actor.current_actor().id, self.now())?;
        let mut changes = ChangeSet::new();
        changes.insert(template.clone());
        self.commit(changes).await?;
        Ok(committed(template))
    }

    /// Publishes a new revision of a template and closes the current one
    ///
    /// Fees already assigned keep pointing at the revision they were created
    /// from. Returns the new revision.
    #[instrument(skip(self, changes, actor), fields(template_id = %template_id))]
    pub async fn amend_template(
        &self,
        template_id: FeeTemplateId,
        changes: TemplateAmendment,
        actor: &dyn ActorContext,
    ) -> CommandResult<FeeTemplate> {
        let changes = &changes;
        let result = self
            .with_retry("amend_template", move || self.try_amend_template(template_id, changes, actor))
            .await;
        self.finish("amend_template", result, |t| {
            format!("Template {} is now at revision {}", t.name, t.template_version)
        })
    }

    async fn try_amend_template(
        &self,
        template_id: FeeTemplateId,
        amendment: &TemplateAmendment,
        actor: &dyn ActorContext,
    ) -> Result<FeeTemplate, BillingError> {
        let mut current = self.load_template(template_id).await?;
        let next = current.amend(
            amendment.clone(),
            actor.current_actor().id,
            self.today(),
            self.now(),
        )?;

        let mut changes = ChangeSet::new();
        changes.update(current).insert(next.clone());
        self.commit(changes).await?;
        Ok(committed(next))
    }

    #[instrument(skip(self, actor), fields(template_id = %template_id, actor_id = %actor.current_actor().id))]
    pub async fn deactivate_template(
        &self,
        template_id: FeeTemplateId,
        actor: &dyn ActorContext,
    ) -> CommandResult<FeeTemplate> {
        let result = self
            .with_retry("deactivate_template", move || self.try_deactivate_template(template_id))
            .await;
        self.finish("deactivate_template", result, |t| format!("Deactivated template {}", t.name))
    }

    async fn try_deactivate_template(&self, template_id: FeeTemplateId) -> Result<FeeTemplate, BillingError> {
        let mut template = self.load_template(template_id).await?;
        template.deactivate()?;
        let mut changes = ChangeSet::new();
        changes.update(template.clone());
        self.commit(changes).await?;
        Ok(committed(template))
    }

    /// Finds the one template that applies to a student for a trigger
    #[instrument(skip(self, profile, trigger), fields(student_id = %profile.student_id))]
    pub async fn resolve_template(
        &self,
        profile: &StudentProfile,
        trigger: &TriggerContext,
    ) -> Result<FeeTemplate, BillingError> {
        let templates = self.store.list_templates().await?;
        resolve_applicable_template(&templates, profile, trigger, self.today()).cloned()
    }
}
