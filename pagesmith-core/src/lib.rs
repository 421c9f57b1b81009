//! Brief-to-GitHub-Pages deployment pipeline.
//!
//! A [`GenerationRequest`] flows through attachment decoding, LLM code
//! generation, repository provisioning, file assembly, a single atomic
//! commit, Pages activation and finally an [`EvaluationReport`] posted to
//! the caller's webhook. GitHub, the LLM and the page probe sit behind
//! traits so every stage can run against the in-memory [`fakes`].

pub mod assemble;
pub mod attachments;
pub mod error;
pub mod fakes;
pub mod generate;
pub mod github;
pub mod llm;
pub mod pages;
pub mod pipeline;
pub mod provision;
pub mod publish;
pub mod report;
pub mod retry;
pub mod types;

pub use error::{
    ApiError, AssemblyError, AttachmentDecodeError, DeliveryError, GenerationError, PagesError,
    ProvisioningError, PublishError, Retryable,
};
pub use generate::{CodeGenerator, GenerationConfig, LlmCodeGenerator};
pub use github::{GitHubApi, GitHubClient};
pub use pages::{HttpProbe, PageProbe, PagesConfig};
pub use pipeline::{Pipeline, PipelineConfig, PipelineRun};
pub use provision::ProvisionConfig;
pub use report::OutcomeReporter;
pub use retry::RetryPolicy;
pub use types::{
    AttachmentSource, EvaluationReport, GenerationRequest, Outcome, PagesStatus, Stage,
};
