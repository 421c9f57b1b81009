//! One request, end to end.
//!
//! Attachments are resolved first, then the stages run strictly in
//! order: generate, provision, assemble, publish, Pages. The first fatal
//! failure stops the run; whatever already happened (a repository, a
//! commit) stays in place and is described in the report. The report is
//! then delivered, and a delivery failure never changes the outcome.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::assemble::{LicenseTemplate, ReadmeTemplate, assemble};
use crate::attachments;
use crate::error::{DeliveryError, PagesError};
use crate::generate::CodeGenerator;
use crate::github::{GitHubApi, pages_url};
use crate::pages::{PageProbe, PagesActivator, PagesConfig};
use crate::provision::{ProvisionConfig, RepositoryProvisioner, repository_name};
use crate::publish::{CommitPublisher, commit_message};
use crate::report::OutcomeReporter;
use crate::retry::RetryPolicy;
use crate::types::{EvaluationReport, GenerationRequest, PagesStatus, Stage};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Account or organization that owns the generated repositories.
    pub owner: String,
    pub repo_prefix: String,
    pub license_holder: String,
    pub provision: ProvisionConfig,
    pub pages: PagesConfig,
    /// Applied to every GitHub call.
    pub github_retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo_prefix: "repo-".to_string(),
            license_holder: owner.to_string(),
            provision: ProvisionConfig::default(),
            pages: PagesConfig::default(),
            github_retry: RetryPolicy::default(),
        }
    }
}

/// Result of [`Pipeline::run`].
#[derive(Debug)]
pub struct PipelineRun {
    pub report: EvaluationReport,
    /// `None` when the request carried no evaluation URL.
    pub delivery: Option<Result<(), DeliveryError>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    generator: Arc<dyn CodeGenerator>,
    provisioner: RepositoryProvisioner,
    publisher: CommitPublisher,
    activator: PagesActivator,
    reporter: OutcomeReporter,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn CodeGenerator>,
        github: Arc<dyn GitHubApi>,
        probe: Arc<dyn PageProbe>,
        reporter: OutcomeReporter,
    ) -> Self {
        let provisioner = RepositoryProvisioner::new(
            github.clone(),
            config.github_retry.clone(),
            config.provision.clone(),
        );
        let publisher = CommitPublisher::new(github.clone(), config.github_retry.clone());
        let activator = PagesActivator::new(github, probe, config.github_retry.clone(), config.pages.clone());
        Self {
            config,
            generator,
            provisioner,
            publisher,
            activator,
            reporter,
        }
    }

    /// Run every stage for `request` and deliver the report.
    ///
    /// `cancel` only interrupts the Pages wait.
    pub async fn run(&self, request: &GenerationRequest, cancel: CancellationToken) -> PipelineRun {
        let span = tracing::info_span!(
            "pipeline",
            task = %request.task,
            round = request.round,
            nonce = %request.nonce
        );
        async {
            let mut report = EvaluationReport::begin(request);
            self.deploy(request, &cancel, &mut report).await;
            report.finish();
            tracing::info!(
                status = ?report.status,
                stage = %report.stage,
                commit = report.commit_sha.as_deref().unwrap_or("-"),
                "Pipeline finished"
            );

            let delivery = match &request.evaluation_url {
                Some(url) => Some(self.reporter.report(url, &report).await),
                None => None,
            };
            PipelineRun { report, delivery }
        }
        .instrument(span)
        .await
    }

    async fn deploy(&self, request: &GenerationRequest, cancel: &CancellationToken, report: &mut EvaluationReport) {
        let resolved = attachments::resolve(&request.attachments);
        report.attachment_errors = resolved.errors.iter().map(ToString::to_string).collect();

        let generated = match self.generator.generate(request, &resolved.attachments).await {
            Ok(files) => files,
            Err(e) => return self.stop(report, Stage::Generation, &e),
        };
        // Decoded bytes are only needed by the generator.
        drop(resolved);

        let handle = match repository_name(&self.config.repo_prefix, &request.task) {
            Ok(name) => match self.provisioner.ensure(&self.config.owner, &name).await {
                Ok(handle) => handle,
                Err(e) => return self.stop(report, Stage::Provisioning, &e),
            },
            Err(e) => return self.stop(report, Stage::Provisioning, &e),
        };
        report.record_repository(&handle);

        let license = LicenseTemplate {
            year: Utc::now().year(),
            holder: self.config.license_holder.clone(),
        };
        let readme = ReadmeTemplate {
            title: request.task.clone(),
            brief: request.brief.clone(),
            round: request.round,
            pages_url: pages_url(&handle.owner, &handle.name),
        };
        let files = match assemble(&generated, &license, &readme) {
            Ok(files) => files,
            Err(e) => return self.stop(report, Stage::Assembly, &e),
        };

        let commit = match self.publisher.publish(&handle, &files, &commit_message(request)).await {
            Ok(commit) => commit,
            Err(e) => return self.stop(report, Stage::Publish, &e),
        };
        report.record_commit(&commit);

        match self.activator.activate(&handle, cancel).await {
            Ok(outcome) => {
                report.record_pages(&outcome.url, &outcome.status);
                if let PagesStatus::TimedOut { attempts, waited_ms } = outcome.status {
                    report.fail(
                        Stage::Pages,
                        format!("Pages site not live after {attempts} probes over {waited_ms} ms"),
                    );
                }
            }
            Err(e) => {
                if let PagesError::Cancelled { url, attempts } = &e {
                    report.record_pages(url, &PagesStatus::Polling { attempts: *attempts });
                }
                self.stop(report, Stage::Pages, &e);
            }
        }
    }

    fn stop(&self, report: &mut EvaluationReport, stage: Stage, error: &dyn std::error::Error) {
        tracing::error!(stage = %stage, error = %error, "Pipeline stage failed");
        report.fail(stage, error.to_string());
    }
}
