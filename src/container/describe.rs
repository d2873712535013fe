//! Read-only views for building forms.

use super::WorkflowContainer;
use super::request::TEMPLATE_NAME_KEY;
use crate::error::{WorkflowError, WorkflowResult};
use crate::materialize::target_for;
use crate::template::{scanner, template_names};
use crate::types::{ActiveSelection, FormView, JobSlot, TemplateDescription};

const IDLE_MESSAGE: &str = "Select a workflow to update, or create a new one";

impl WorkflowContainer {
    /// Every template name known to the job store.
    pub fn template_names(&self) -> WorkflowResult<Vec<String>> {
        template_names(self.jobs.as_ref())
    }

    /// A template's job names and its unbound parameters.
    pub fn describe_template(&self, template_name: &str) -> WorkflowResult<TemplateDescription> {
        let template_name = template_name.trim();
        if template_name.is_empty() {
            return Err(WorkflowError::blank(TEMPLATE_NAME_KEY));
        }
        let jobs = self.resolve_template(template_name)?;
        Ok(TemplateDescription {
            template_name: template_name.to_string(),
            parameters: scanner::scan_jobs(&jobs),
            jobs: jobs.into_iter().map(|job| job.name).collect(),
        })
    }

    /// Form for the staged selection.
    ///
    /// The create form needs `template_name`. The update form lists the
    /// template's current jobs and parameters with the instance's recorded
    /// values filled in. A staged instance that no longer exists reads as idle.
    pub fn describe_active(&self, template_name: Option<&str>) -> WorkflowResult<FormView> {
        match self.active_selection() {
            ActiveSelection::None => Ok(idle()),
            ActiveSelection::CreateNew => {
                let template_name = template_name
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| WorkflowError::blank(TEMPLATE_NAME_KEY))?;
                let description = self.describe_template(template_name)?;
                Ok(FormView::Create {
                    template_name: description.template_name,
                    jobs: description
                        .jobs
                        .into_iter()
                        .map(|template_job| JobSlot {
                            template_job,
                            target: None,
                        })
                        .collect(),
                    parameters: description.parameters,
                })
            }
            ActiveSelection::Instance(name) => {
                let Some(instance) = self.registry.get(&name) else {
                    return Ok(idle());
                };
                // The template may have lost its jobs since; show what remains.
                let jobs = self.template_jobs(&instance.template_name)?;
                let mut parameters = scanner::scan_jobs(&jobs);
                for (name, value) in parameters.iter_mut() {
                    *value = instance.job_parameters.get(name).cloned();
                }
                Ok(FormView::Update {
                    instance_name: instance.instance_name.clone(),
                    template_name: instance.template_name.clone(),
                    jobs: jobs
                        .into_iter()
                        .map(|job| JobSlot {
                            target: target_for(&instance.related_jobs, &job.name)
                                .map(String::from),
                            template_job: job.name,
                        })
                        .collect(),
                    parameters,
                    status: instance.status.clone(),
                })
            }
        }
    }
}

fn idle() -> FormView {
    FormView::Idle {
        msg: IDLE_MESSAGE.to_string(),
    }
}
