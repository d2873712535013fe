//! Integration tests for the workflow container control plane.
//!
//! These tests drive every control-plane operation against the in-memory job
//! store and registry storage, including injected host failures.

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use template_workflows::container::{FormRequest, WorkflowContainer};
use template_workflows::error::{ErrorCode, WorkflowError};
use template_workflows::gate::Gate;
use template_workflows::store::definition::marker_element;
use template_workflows::store::{JobStore, MemoryJobStore, MemoryRegistryStore};
use template_workflows::types::{
    ActiveSelection, CheckLevel, FormView, InstanceStatus, JobSlot, TemplateMarker,
};

const BUILD_BODY: &str =
    "  <command>make @@TARGET@@</command>\n  <childProjects>nightly-test</childProjects>";
const TEST_BODY: &str = "  <command>run-tests --env @@ENV@@</command>";

fn template_definition(template: &str, starting: bool, body: &str) -> String {
    let mut marker = TemplateMarker::new(template);
    if starting {
        marker = marker.starting();
    }
    format!(
        "<project>\n  <properties>\n    {}\n  </properties>\n  <disabled>true</disabled>\n{}\n</project>\n",
        marker_element(&marker),
        body
    )
}

struct Fixture {
    jobs: Arc<MemoryJobStore>,
    persistence: Arc<MemoryRegistryStore>,
    gate: Arc<Gate>,
    container: WorkflowContainer,
}

impl Fixture {
    /// Reload the container from what was persisted.
    fn reopen(&self) -> WorkflowContainer {
        WorkflowContainer::open(
            "project",
            self.jobs.clone(),
            self.persistence.clone(),
            Arc::clone(&self.gate),
        )
        .expect("Failed to reopen container")
    }

    fn job(&self, name: &str) -> template_workflows::types::JobHandle {
        self.jobs
            .get_job(name)
            .expect("job store read failed")
            .unwrap_or_else(|| panic!("job {} missing", name))
    }
}

/// A store holding the two-job `nightly` template and an empty container.
fn setup() -> Fixture {
    let jobs = Arc::new(MemoryJobStore::new());
    jobs.put_job(
        "nightly-build",
        &template_definition("nightly", true, BUILD_BODY),
    );
    jobs.put_job(
        "nightly-test",
        &template_definition("nightly", false, TEST_BODY),
    );
    let persistence = Arc::new(MemoryRegistryStore::new());
    let gate = Arc::new(Gate::new(Duration::from_millis(200)));
    let container = WorkflowContainer::open(
        "project",
        jobs.clone(),
        persistence.clone(),
        Arc::clone(&gate),
    )
    .expect("Failed to open container");
    Fixture {
        jobs,
        persistence,
        gate,
        container,
    }
}

fn create_form(instance: &str) -> FormRequest {
    FormRequest::create("nightly", instance)
        .job("nightly-build", &format!("{}-build", instance))
        .job("nightly-test", &format!("{}-test", instance))
        .param("TARGET", "release")
        .param("ENV", "qa")
}

fn update_form(instance: &str, env: &str) -> FormRequest {
    FormRequest::update(instance)
        .job("nightly-build", &format!("{}-build", instance))
        .job("nightly-test", &format!("{}-test", instance))
        .param("TARGET", "release")
        .param("ENV", env)
}

mod create_tests {
    use super::*;

    #[test]
    fn create_materializes_jobs_and_records_instance() {
        let f = setup();

        let report = f
            .container
            .submit(&create_form("team-a"))
            .expect("create failed");

        assert_eq!(report.created, vec!["team-a-build", "team-a-test"]);
        assert!(report.reused.is_empty());
        assert_eq!(report.message(), "Workflow 'team-a' created");

        let build = f.job("team-a-build");
        assert!(build.enabled);
        assert!(build.definition.contains("<command>make release</command>"));
        assert!(build.definition.contains("<childProjects>team-a-test</childProjects>"));
        assert!(f.jobs.template_marker(&build).is_none());
        assert!(f.job("team-a-test").definition.contains("--env qa"));

        let instance = f.container.instance("team-a").expect("instance missing");
        assert_eq!(instance.template_name, "nightly");
        assert_eq!(instance.related_jobs["nightly-build"], "team-a-build");
        assert_eq!(instance.job_parameters["ENV"], "qa");
        assert!(instance.was_created_by_instance("team-a-build"));
        assert!(instance.was_created_by_instance("team-a-test"));
        assert_eq!(instance.status, InstanceStatus::Active);

        assert_eq!(
            f.container.active_selection(),
            ActiveSelection::Instance("team-a".into())
        );
        assert_eq!(f.persistence.save_count(), 1);
    }

    #[test]
    fn create_reuses_existing_job_untouched() {
        let f = setup();
        f.jobs.put_job("team-a-test", "<project>hand made</project>");

        let report = f
            .container
            .submit(&create_form("team-a"))
            .expect("create failed");

        assert_eq!(report.created, vec!["team-a-build"]);
        assert_eq!(report.reused, vec!["team-a-test"]);
        assert_eq!(
            f.job("team-a-test").definition,
            "<project>hand made</project>"
        );
        let instance = f.container.instance("team-a").unwrap();
        assert!(!instance.was_created_by_instance("team-a-test"));
    }

    #[test]
    fn create_without_reuse_rejects_existing_job() {
        let f = setup();
        f.jobs.put_job("team-a-test", "<project/>");

        let err = f
            .container
            .submit(&create_form("team-a").allow_existing(false))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert_eq!(err.field(), Some("template.nightly-test"));
        assert!(f.jobs.get_job("team-a-build").unwrap().is_none());
        assert!(f.container.instance("team-a").is_none());
    }

    #[test]
    fn create_rejects_template_job_as_target() {
        let f = setup();
        let form = create_form("team-a").job("nightly-test", "nightly-build");

        let err = f.container.submit(&form).unwrap_err();

        assert!(matches!(err, WorkflowError::Validation { .. }));
        assert!(err.to_string().contains("building block"));
        assert_eq!(f.jobs.len(), 2);
    }

    #[test]
    fn missing_parameter_fails_without_side_effects() {
        let f = setup();
        let form = FormRequest::create("nightly", "team-a")
            .job("nightly-build", "team-a-build")
            .job("nightly-test", "team-a-test")
            .param("TARGET", "release");

        let err = f.container.submit(&form).unwrap_err();

        assert_eq!(err.field(), Some("template.ENV"));
        assert_eq!(f.jobs.len(), 2);
        assert!(f.container.instances().is_empty());
        assert_eq!(f.persistence.save_count(), 0);
        assert_eq!(f.container.active_selection(), ActiveSelection::None);
    }

    #[test]
    fn blank_instance_name_is_rejected() {
        let f = setup();
        let form = create_form("team-a").with("template.templateInstanceName", "  ");

        let err = f.container.submit(&form).unwrap_err();
        assert_eq!(err.field(), Some("template.templateInstanceName"));
    }

    #[test]
    fn duplicate_instance_name_is_rejected_case_insensitively() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();

        let err = f.container.submit(&create_form("TEAM-A")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert_eq!(err.to_string(), "Workflow already defined with name: 'TEAM-A'");
    }

    #[test]
    fn two_jobs_cannot_share_a_target() {
        let f = setup();
        let form = create_form("team-a").job("nightly-test", "team-a-build");

        let err = f.container.submit(&form).unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationFailed);
        assert!(f.jobs.get_job("team-a-build").unwrap().is_none());
    }

    #[test]
    fn unknown_template_is_not_found() {
        let f = setup();
        let form = FormRequest::create("weekly", "team-a");

        let err = f.container.submit(&form).unwrap_err();
        assert!(matches!(err, WorkflowError::TemplateNotFound(_)));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let f = setup();
        let form = create_form("team-a").with("template.operation", "rename");

        let err = f.container.submit(&form).unwrap_err();
        assert_eq!(err.field(), Some("template.operation"));
    }

    #[test]
    fn host_failure_mid_create_records_degraded_instance() {
        let f = setup();
        f.jobs.fail_writes_to("team-a-test");

        let err = f.container.submit(&create_form("team-a")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::HostSystemError);
        let instance = f.container.instance("team-a").expect("degraded instance missing");
        assert!(instance.status.is_degraded());
        assert!(instance.was_created_by_instance("team-a-build"));
        assert!(!instance.was_created_by_instance("team-a-test"));
        assert_eq!(f.persistence.save_count(), 1);

        // Delete cleans up what the failed create left behind.
        f.jobs.clear_failures();
        let report = f.container.delete_instance("team-a").unwrap();
        assert_eq!(report.deleted_jobs, vec!["team-a-build"]);
        assert!(f.jobs.get_job("team-a-build").unwrap().is_none());
    }

    #[test]
    fn host_failure_on_first_job_records_nothing() {
        let f = setup();
        f.jobs.fail_writes_to("team-a-build");

        let err = f.container.submit(&create_form("team-a")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::HostSystemError);
        assert!(f.container.instance("team-a").is_none());
        assert_eq!(f.persistence.save_count(), 0);
    }
}

mod update_tests {
    use super::*;

    #[test]
    fn update_rewrites_jobs_and_preserves_disabled_state() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let test_job = f.job("team-a-test");
        f.jobs.set_enabled(&test_job, false).unwrap();

        let report = f
            .container
            .submit(&update_form("team-a", "prod"))
            .expect("update failed");

        assert_eq!(report.updated, vec!["team-a-build", "team-a-test"]);
        assert_eq!(report.message(), "Workflow 'team-a' updated");
        let test_job = f.job("team-a-test");
        assert!(!test_job.enabled);
        assert!(test_job.definition.contains("--env prod"));
        assert!(f.job("team-a-build").enabled);

        let instance = f.container.instance("team-a").unwrap();
        assert_eq!(instance.job_parameters["ENV"], "prod");
        assert!(instance.was_created_by_instance("team-a-test"));
        assert!(instance.updated_at >= instance.created_at);
    }

    #[test]
    fn update_of_unknown_instance_is_not_found() {
        let f = setup();
        let err = f
            .container
            .submit(&update_form("ghost", "qa"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InstanceNotFound(_)));
    }

    #[test]
    fn update_cannot_switch_template() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let form = update_form("team-a", "qa").with("template.templateName", "weekly");

        let err = f.container.submit(&form).unwrap_err();

        assert_eq!(err.field(), Some("template.templateName"));
    }

    #[test]
    fn update_with_missing_target_job_is_not_found() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let job = f.job("team-a-test");
        f.jobs.delete_job(&job).unwrap();

        let err = f
            .container
            .submit(&update_form("team-a", "prod"))
            .unwrap_err();

        assert!(matches!(err, WorkflowError::JobNotFound(_)));
        let instance = f.container.instance("team-a").unwrap();
        assert!(instance.status.is_degraded());
    }
}

mod update_all_tests {
    use super::*;

    #[test]
    fn bulk_refresh_reports_partial_success() {
        let f = setup();
        for name in ["a", "b", "c"] {
            f.container.submit(&create_form(name)).unwrap();
        }
        f.jobs.put_job(
            "nightly-test",
            &template_definition("nightly", false, "  <command>run-tests-v2 @@ENV@@</command>"),
        );
        f.jobs.fail_writes_to("b-test");
        let saves_before = f.persistence.save_count();

        let summary = f.container.update_all().expect("update_all failed");

        assert_eq!(summary.updated, vec!["a", "c"]);
        assert_eq!(summary.not_updated.len(), 1);
        assert_eq!(summary.not_updated[0].instance, "b");
        assert_eq!(
            summary.message(),
            "1 workflows have not been updated: b (I/O error writing job 'b-test'); \
             2 workflows have been updated: a, c"
        );
        assert!(f.job("a-test").definition.contains("run-tests-v2 qa"));
        assert!(f.job("c-test").definition.contains("run-tests-v2 qa"));
        assert!(!f.job("b-test").definition.contains("run-tests-v2"));
        assert_eq!(f.persistence.save_count(), saves_before + 1);

        let b = f.container.instance("b").unwrap();
        assert_eq!(
            b.status,
            InstanceStatus::Degraded {
                failed_job: "b-test".into(),
                reason: "I/O error writing job 'b-test'".into(),
            }
        );

        f.jobs.clear_failures();
        let summary = f.container.update_all().unwrap();
        assert_eq!(summary.updated, vec!["a", "b", "c"]);
        assert_eq!(f.container.instance("b").unwrap().status, InstanceStatus::Active);
    }

    #[test]
    fn instance_of_removed_template_is_not_updated() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        for name in ["nightly-build", "nightly-test"] {
            let job = f.job(name);
            f.jobs.delete_job(&job).unwrap();
        }

        let summary = f.container.update_all().unwrap();

        assert!(summary.updated.is_empty());
        assert_eq!(summary.not_updated[0].instance, "team-a");
        assert!(summary.not_updated[0].reason.contains("nightly"));
        assert!(f.container.instance("team-a").is_some());
    }

    #[test]
    fn refresh_continues_past_instance_with_deleted_template() {
        let f = setup();
        f.jobs.put_job(
            "weekly-report",
            &template_definition("weekly", true, "  <command>report</command>"),
        );
        f.container.submit(&create_form("a")).unwrap();
        f.container
            .submit(&FormRequest::create("weekly", "b").job("weekly-report", "b-report"))
            .unwrap();
        f.container.submit(&create_form("c")).unwrap();
        let template_job = f.job("weekly-report");
        f.jobs.delete_job(&template_job).unwrap();

        let summary = f.container.update_all().unwrap();

        assert_eq!(summary.updated, vec!["a", "c"]);
        assert_eq!(summary.not_updated.len(), 1);
        assert_eq!(summary.not_updated[0].instance, "b");
        assert!(f.jobs.get_job("b-report").unwrap().is_some());
    }

    #[test]
    fn empty_registry_has_nothing_to_update() {
        let f = setup();
        let summary = f.container.update_all().unwrap();
        assert_eq!(summary.message(), "No workflows to update");
        assert_eq!(f.persistence.save_count(), 0);
    }
}

mod delete_tests {
    use super::*;

    #[test]
    fn delete_removes_only_created_jobs() {
        let f = setup();
        f.jobs.put_job("team-a-test", "<project>shared</project>");
        f.container.submit(&create_form("team-a")).unwrap();

        let report = f.container.delete_instance("Team-A").expect("delete failed");

        assert_eq!(report.deleted_jobs, vec!["team-a-build"]);
        assert_eq!(report.kept_jobs, vec!["team-a-test"]);
        assert_eq!(report.message(), "Workflow 'team-a' deleted");
        assert!(f.jobs.get_job("team-a-build").unwrap().is_none());
        assert!(f.jobs.get_job("team-a-test").unwrap().is_some());
        assert!(f.container.instance("team-a").is_none());
        assert!(f.reopen().instance("team-a").is_none());
    }

    #[test]
    fn delete_refused_while_building() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let before = f.container.instance("team-a").unwrap();
        f.jobs.set_queued("team-a-build", true);
        f.jobs.set_building("team-a-test", true);

        let err = f.container.delete_instance("team-a").unwrap_err();

        assert_eq!(err.code(), ErrorCode::PreconditionFailed);
        assert_eq!(err.to_string(), "Job team-a-test is currently building");
        let after = f.container.instance("team-a").expect("instance removed");
        assert_eq!(after.as_ref(), before.as_ref());
        assert!(f.jobs.get_job("team-a-build").unwrap().is_some());
    }

    #[test]
    fn delete_refused_while_queued() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        f.jobs.set_queued("team-a-test", true);

        let err = f.container.delete_instance("team-a").unwrap_err();

        assert_eq!(err.to_string(), "Job team-a-test is in the build queue");
    }

    #[test]
    fn host_failure_keeps_instance() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        f.jobs.fail_writes_to("team-a-test");

        let err = f.container.delete_instance("team-a").unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to delete team-a-test, please delete it manually"
        );
        assert!(f.container.instance("team-a").is_some());
    }

    #[test]
    fn delete_of_unknown_instance_is_not_found() {
        let f = setup();
        let err = f.container.delete_instance("ghost").unwrap_err();
        assert_eq!(err.to_string(), "Workflow not found: ghost");
    }
}

mod execute_tests {
    use super::*;

    #[test]
    fn execute_schedules_starting_jobs() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();

        let report = f.container.execute_workflow("team-a").expect("execute failed");

        assert_eq!(report.scheduled, vec!["team-a-build"]);
        assert_eq!(report.message(), "'team-a-build' scheduled");
        assert_eq!(f.jobs.scheduled(), vec!["team-a-build"]);
        assert!(f.job("team-a-build").queued);
    }

    #[test]
    fn execute_without_starting_jobs_fails() {
        let f = setup();
        f.jobs.put_job(
            "nightly-build",
            &template_definition("nightly", false, BUILD_BODY),
        );
        f.container.submit(&create_form("team-a")).unwrap();

        let err = f.container.execute_workflow("team-a").unwrap_err();

        assert!(matches!(err, WorkflowError::NoStartingJobs(_)));
        assert!(f.jobs.scheduled().is_empty());
    }

    #[test]
    fn execute_unknown_instance_is_not_found() {
        let f = setup();
        let err = f.container.execute_workflow("ghost").unwrap_err();
        assert!(matches!(err, WorkflowError::InstanceNotFound(_)));
    }
}

mod gate_tests {
    use super::*;

    /// Hold `gate` on another thread until the returned sender is used.
    fn hold(gate: Arc<Gate>) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _guard = gate.acquire("holder").expect("holder failed to acquire");
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv().unwrap();
        (release_tx, handle)
    }

    #[test]
    fn submit_times_out_while_gate_is_held() {
        let f = setup();
        let (release, holder) = hold(Arc::clone(&f.gate));

        let start = Instant::now();
        let err = f.container.submit(&create_form("team-a")).unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(err.code(), ErrorCode::LockTimeout);
        assert!(f.jobs.get_job("team-a-build").unwrap().is_none());
        assert!(f.container.instances().is_empty());

        release.send(()).unwrap();
        holder.join().unwrap();
        assert!(f.container.submit(&create_form("team-a")).is_ok());
    }

    #[test]
    fn shared_gate_serializes_containers() {
        let f = setup();
        let other = WorkflowContainer::open(
            "other-project",
            f.jobs.clone(),
            f.persistence.clone(),
            Arc::clone(&f.gate),
        )
        .unwrap();
        let (release, holder) = hold(Arc::clone(f.container.gate()));

        let err = other.update_all().unwrap_err();
        assert!(matches!(err, WorkflowError::LockTimeout { .. }));

        release.send(()).unwrap();
        holder.join().unwrap();
    }

    #[test]
    fn read_operations_do_not_wait_for_gate() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let (release, holder) = hold(Arc::clone(&f.gate));

        let start = Instant::now();
        assert_eq!(f.container.instances().len(), 1);
        assert!(f.container.validate_instance_name("team-b").result);
        assert!(f.container.describe_template("nightly").is_ok());
        assert!(start.elapsed() < Duration::from_millis(200));

        release.send(()).unwrap();
        holder.join().unwrap();
    }
}

mod validation_tests {
    use super::*;

    #[test]
    fn job_name_checks() {
        let f = setup();
        f.jobs.put_job("plain", "<project/>");
        let c = &f.container;

        assert_eq!(c.validate_job_name("", true).unwrap().level, CheckLevel::Error);
        assert_eq!(c.validate_job_name("fresh", true).unwrap().level, CheckLevel::Info);
        assert_eq!(c.validate_job_name("fresh", true).unwrap().msg, "Valid name");

        let reuse = c.validate_job_name("Plain", true).unwrap();
        assert_eq!(reuse.level, CheckLevel::Warning);
        assert!(reuse.result);

        let no_reuse = c.validate_job_name("plain", false).unwrap();
        assert_eq!(no_reuse.level, CheckLevel::Error);
        assert_eq!(no_reuse.msg, "Job already defined with name: 'plain'");

        let template_job = c.validate_job_name("nightly-build", true).unwrap();
        assert!(!template_job.result);
    }

    #[test]
    fn instance_name_checks() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();

        assert!(f.container.validate_instance_name("team-b").result);
        assert!(!f.container.validate_instance_name(" ").result);
        let taken = f.container.validate_instance_name("TEAM-A");
        assert!(!taken.result);
        assert_eq!(taken.msg, "Workflow already defined with name: 'team-a'");
    }

    #[test]
    fn job_running_checks() {
        let f = setup();
        f.jobs.put_job("busy", "<project/>");
        f.jobs.set_building("busy", true);

        assert!(f.container.validate_job_is_not_running("idle-or-missing").unwrap().result);
        let busy = f.container.validate_job_is_not_running("busy").unwrap();
        assert!(!busy.result);
        assert_eq!(busy.msg, "Job busy is currently building");
    }
}

mod describe_tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn describe_template_lists_jobs_and_parameters() {
        let f = setup();

        let description = f.container.describe_template("Nightly").unwrap();

        assert_eq!(description.jobs, vec!["nightly-build", "nightly-test"]);
        assert_eq!(
            description.parameters,
            BTreeMap::from([("ENV".to_string(), None), ("TARGET".to_string(), None)])
        );
        assert_eq!(f.container.template_names().unwrap(), vec!["nightly"]);
    }

    #[test]
    fn describe_active_follows_selection() {
        let f = setup();
        let c = &f.container;

        assert!(matches!(c.describe_active(None).unwrap(), FormView::Idle { .. }));

        c.set_active_instance(ActiveSelection::parse("template.createNewTemplate"))
            .unwrap();
        assert!(c.describe_active(None).is_err());
        match c.describe_active(Some("nightly")).unwrap() {
            FormView::Create { jobs, parameters, .. } => {
                assert_eq!(jobs.len(), 2);
                assert!(jobs.iter().all(|slot| slot.target.is_none()));
                assert_eq!(parameters.len(), 2);
            }
            other => panic!("expected create form, got {:?}", other),
        }

        c.submit(&create_form("team-a")).unwrap();
        match c.describe_active(None).unwrap() {
            FormView::Update {
                instance_name,
                jobs,
                parameters,
                ..
            } => {
                assert_eq!(instance_name, "team-a");
                assert_eq!(
                    jobs[0],
                    JobSlot {
                        template_job: "nightly-build".into(),
                        target: Some("team-a-build".into()),
                    }
                );
                assert_eq!(parameters["ENV"], Some("qa".to_string()));
            }
            other => panic!("expected update form, got {:?}", other),
        }

        c.delete_instance("team-a").unwrap();
        assert!(matches!(c.describe_active(None).unwrap(), FormView::Idle { .. }));
    }

    #[test]
    fn project_description_counts_instances() {
        let f = setup();
        assert_eq!(
            f.container.project_description(),
            "This project does not have any associated workflows"
        );
        f.container.submit(&create_form("a")).unwrap();
        f.container.submit(&create_form("b")).unwrap();
        assert_eq!(
            f.container.project_description(),
            "This project has 2 associated workflows"
        );
    }
}

mod persistence_tests {
    use super::*;

    #[test]
    fn registry_survives_reopen() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        f.container.submit(&create_form("team-b")).unwrap();

        let reopened = f.reopen();

        let before: Vec<_> = f.container.instances();
        let after: Vec<_> = reopened.instances();
        assert_eq!(after.len(), 2);
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.as_ref(), b.as_ref());
        }
    }

    #[test]
    fn containers_keep_separate_registries() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();

        let other = WorkflowContainer::open(
            "other-project",
            f.jobs.clone(),
            f.persistence.clone(),
            Arc::clone(&f.gate),
        )
        .unwrap();

        assert!(other.instances().is_empty());
        assert!(other.validate_instance_name("team-a").result);
    }

    #[test]
    fn failed_save_rolls_back_create() {
        let f = setup();
        f.persistence.fail_saves(true);

        let err = f.container.submit(&create_form("team-a")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::HostSystemError);
        assert!(f.container.instance("team-a").is_none());
        assert!(f.container.validate_instance_name("team-a").result);

        // The jobs stayed in the store, so a retry reuses them.
        f.persistence.fail_saves(false);
        let report = f
            .container
            .submit(&create_form("team-a"))
            .expect("retried create failed");
        assert_eq!(report.reused, vec!["team-a-build", "team-a-test"]);
        assert_eq!(f.reopen().instances().len(), 1);
    }

    #[test]
    fn failed_save_rolls_back_bulk_refresh() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        let before = f.container.instance("team-a").unwrap();
        f.persistence.fail_saves(true);

        let err = f.container.update_all().unwrap_err();

        assert_eq!(err.code(), ErrorCode::HostSystemError);
        assert_eq!(f.container.instance("team-a").unwrap(), before);
    }

    #[test]
    fn failed_save_keeps_deleted_instance() {
        let f = setup();
        f.container.submit(&create_form("team-a")).unwrap();
        f.persistence.fail_saves(true);

        assert!(f.container.delete_instance("team-a").is_err());
        assert!(f.container.instance("team-a").is_some());
    }
}

mod recovery_tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use template_workflows::error::WorkflowResult;
    use template_workflows::types::JobHandle;

    /// Memory store whose marker strips and deletes can be broken per job.
    #[derive(Default)]
    struct FlakyJobStore {
        inner: MemoryJobStore,
        broken_strips: Mutex<HashSet<String>>,
        broken_deletes: Mutex<HashSet<String>>,
    }

    impl FlakyJobStore {
        fn break_strip(&self, name: &str) {
            self.broken_strips.lock().insert(name.to_string());
        }

        fn break_delete(&self, name: &str) {
            self.broken_deletes.lock().insert(name.to_string());
        }

        fn heal(&self) {
            self.broken_strips.lock().clear();
            self.broken_deletes.lock().clear();
        }

        fn job(&self, name: &str) -> Option<JobHandle> {
            self.inner.get_job(name).expect("job store read failed")
        }
    }

    impl JobStore for FlakyJobStore {
        fn list_jobs(&self) -> WorkflowResult<Vec<JobHandle>> {
            self.inner.list_jobs()
        }

        fn get_job(&self, name: &str) -> WorkflowResult<Option<JobHandle>> {
            self.inner.get_job(name)
        }

        fn create_job(&self, name: &str, definition: &str) -> WorkflowResult<JobHandle> {
            self.inner.create_job(name, definition)
        }

        fn update_job(&self, job: &JobHandle, definition: &str) -> WorkflowResult<JobHandle> {
            self.inner.update_job(job, definition)
        }

        fn set_enabled(&self, job: &JobHandle, enabled: bool) -> WorkflowResult<()> {
            self.inner.set_enabled(job, enabled)
        }

        fn remove_template_marker(&self, job: &JobHandle) -> WorkflowResult<()> {
            if self.broken_strips.lock().contains(&job.name) {
                return Err(WorkflowError::Host(format!("I/O error saving job '{}'", job.name)));
            }
            self.inner.remove_template_marker(job)
        }

        fn delete_job(&self, job: &JobHandle) -> WorkflowResult<()> {
            if self.broken_deletes.lock().contains(&job.name) {
                return Err(WorkflowError::Host(format!("I/O error deleting job '{}'", job.name)));
            }
            self.inner.delete_job(job)
        }

        fn schedule_job(&self, job: &JobHandle) -> WorkflowResult<()> {
            self.inner.schedule_job(job)
        }
    }

    fn flaky_setup() -> (Arc<FlakyJobStore>, WorkflowContainer) {
        let jobs = Arc::new(FlakyJobStore::default());
        jobs.inner.put_job(
            "nightly-build",
            &template_definition("nightly", true, BUILD_BODY),
        );
        jobs.inner.put_job(
            "nightly-test",
            &template_definition("nightly", false, TEST_BODY),
        );
        let container = WorkflowContainer::open(
            "project",
            jobs.clone(),
            Arc::new(MemoryRegistryStore::new()),
            Arc::new(Gate::new(Duration::from_millis(200))),
        )
        .expect("Failed to open container");
        (jobs, container)
    }

    #[test]
    fn degraded_create_is_finished_by_update() {
        let f = setup();
        f.jobs.fail_writes_to("team-a-test");
        f.container.submit(&create_form("team-a")).unwrap_err();
        f.jobs.clear_failures();

        let report = f
            .container
            .submit(&update_form("team-a", "qa"))
            .expect("update of degraded workflow failed");

        assert_eq!(report.created, vec!["team-a-test"]);
        assert_eq!(report.updated, vec!["team-a-build"]);
        let instance = f.container.instance("team-a").unwrap();
        assert_eq!(instance.status, InstanceStatus::Active);
        assert!(instance.was_created_by_instance("team-a-test"));
        assert!(f.job("team-a-test").enabled);

        let report = f.container.delete_instance("team-a").unwrap();
        assert_eq!(report.deleted_jobs, vec!["team-a-build", "team-a-test"]);
    }

    #[test]
    fn unfinished_job_is_removed_and_recreated_by_bulk_refresh() {
        let (jobs, container) = flaky_setup();
        jobs.break_strip("team-a-test");

        let err = container.submit(&create_form("team-a")).unwrap_err();

        assert_eq!(err.code(), ErrorCode::HostSystemError);
        assert!(jobs.job("team-a-test").is_none());
        let instance = container.instance("team-a").unwrap();
        assert!(instance.status.is_degraded());
        assert!(!instance.was_created_by_instance("team-a-test"));

        jobs.heal();
        let summary = container.update_all().unwrap();

        assert_eq!(summary.updated, vec!["team-a"]);
        let instance = container.instance("team-a").unwrap();
        assert_eq!(instance.status, InstanceStatus::Active);
        assert!(instance.was_created_by_instance("team-a-test"));
        let test_job = jobs.job("team-a-test").expect("job not recreated");
        assert!(jobs.template_marker(&test_job).is_none());
    }

    #[test]
    fn unremovable_unfinished_job_belongs_to_instance() {
        let (jobs, container) = flaky_setup();
        jobs.break_strip("team-a-test");
        jobs.break_delete("team-a-test");

        container.submit(&create_form("team-a")).unwrap_err();

        let instance = container.instance("team-a").unwrap();
        assert!(instance.was_created_by_instance("team-a-build"));
        assert!(instance.was_created_by_instance("team-a-test"));
        let stray = jobs.job("team-a-test").unwrap();
        assert!(jobs.template_marker(&stray).is_some());

        // The leftover marker does not add a job to the template.
        let description = container.describe_template("nightly").unwrap();
        assert_eq!(description.jobs, vec!["nightly-build", "nightly-test"]);
        container
            .submit(&create_form("team-b"))
            .expect("template unusable after failed create");
        let summary = container.update_all().unwrap();
        assert_eq!(summary.updated, vec!["team-b"]);
        assert_eq!(summary.not_updated[0].instance, "team-a");

        jobs.heal();
        let summary = container.update_all().unwrap();
        assert_eq!(summary.updated, vec!["team-a", "team-b"]);
        let stray = jobs.job("team-a-test").unwrap();
        assert!(jobs.template_marker(&stray).is_none());

        let report = container.delete_instance("team-a").unwrap();
        assert_eq!(report.deleted_jobs, vec!["team-a-build", "team-a-test"]);
        assert!(jobs.job("team-a-test").is_none());
    }
}
