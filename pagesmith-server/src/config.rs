//! Service configuration from flags and environment.

use std::time::Duration;

use clap::Parser;
use pagesmith_core::github::DEFAULT_API_BASE;
use pagesmith_core::llm::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use pagesmith_core::{GenerationConfig, PagesConfig, PipelineConfig, ProvisionConfig, RetryPolicy};

#[derive(Parser, Debug, Clone)]
#[command(name = "pagesmith-server", about = "Turn a brief into a live GitHub Pages site")]
pub struct ServiceConfig {
    /// Address to listen on
    #[arg(long, env = "PAGESMITH_ADDR", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Shared secret every request must carry
    #[arg(long, env = "SECRET_KEY", hide_env_values = true)]
    pub secret: String,

    /// Account (or organization) that owns generated repositories
    #[arg(long, env = "GITHUB_USERNAME")]
    pub github_owner: String,

    /// Token with repo and pages scope
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: String,

    #[arg(long, env = "GITHUB_API_BASE", default_value = DEFAULT_API_BASE)]
    pub github_api_base: String,

    /// Owner is an organization rather than the token's user
    #[arg(long, env = "GITHUB_ORG")]
    pub github_org: bool,

    /// Prefix for generated repository names
    #[arg(long, env = "PAGESMITH_REPO_PREFIX", default_value = "repo-")]
    pub repo_prefix: String,

    /// Create repositories as private
    #[arg(long, env = "PAGESMITH_PRIVATE")]
    pub private: bool,

    /// Copyright holder in the injected LICENSE (defaults to the owner)
    #[arg(long, env = "PAGESMITH_LICENSE_HOLDER")]
    pub license_holder: Option<String>,

    /// Anthropic API key (or set ANTHROPIC_API_KEY env var)
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Claude model to use
    #[arg(long, env = "PAGESMITH_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "PAGESMITH_LLM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub llm_endpoint: String,

    #[arg(long, env = "PAGESMITH_MAX_TOKENS", default_value_t = 16_000)]
    pub max_tokens: u32,

    /// Seconds to wait for the model
    #[arg(long, env = "PAGESMITH_GENERATION_TIMEOUT", default_value_t = 120)]
    pub generation_timeout_secs: u64,

    /// Seconds to wait for the Pages site to come up
    #[arg(long, env = "PAGESMITH_PAGES_DEADLINE", default_value_t = 180)]
    pub pages_deadline_secs: u64,

    #[arg(long, env = "PAGESMITH_PAGES_INTERVAL", default_value_t = 3)]
    pub pages_interval_secs: u64,

    #[arg(long, env = "PAGESMITH_PAGES_MAX_ATTEMPTS", default_value_t = 60)]
    pub pages_max_attempts: u32,

    /// Attempts per GitHub call, including the first
    #[arg(long, env = "PAGESMITH_GITHUB_RETRIES", default_value_t = 4)]
    pub github_retries: u32,

    /// Attempts to deliver the evaluation report
    #[arg(long, env = "PAGESMITH_REPORT_RETRIES", default_value_t = 3)]
    pub report_retries: u32,

    #[arg(long, env = "PAGESMITH_REPORT_TIMEOUT", default_value_t = 10)]
    pub report_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            owner: self.github_owner.clone(),
            repo_prefix: self.repo_prefix.clone(),
            license_holder: self
                .license_holder
                .clone()
                .unwrap_or_else(|| self.github_owner.clone()),
            provision: ProvisionConfig {
                private: self.private,
                description: Some("Generated static site".to_string()),
                organization: self.github_org,
            },
            pages: PagesConfig {
                deadline: Duration::from_secs(self.pages_deadline_secs),
                poll_interval: Duration::from_secs(self.pages_interval_secs),
                max_attempts: self.pages_max_attempts,
                ..PagesConfig::default()
            },
            github_retry: RetryPolicy::default().with_max_attempts(self.github_retries),
        }
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            model: self.model.clone(),
            endpoint: self.llm_endpoint.clone(),
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.generation_timeout_secs),
        }
    }

    pub fn report_retry(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.report_retries)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ServiceConfig {
        let mut args = vec![
            "pagesmith-server",
            "--secret",
            "s3cret",
            "--github-owner",
            "octo",
            "--github-token",
            "ghp_x",
            "--api-key",
            "sk-x",
        ];
        args.extend_from_slice(extra);
        ServiceConfig::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = parse(&[]);
        assert_eq!(config.listen_addr, "0.0.0.0:8000");
        assert_eq!(config.github_api_base, "https://api.github.com");

        let pipeline = config.pipeline();
        assert_eq!(pipeline.repo_prefix, "repo-");
        assert_eq!(pipeline.license_holder, "octo");
        assert!(!pipeline.provision.private);
        assert_eq!(pipeline.pages.deadline, Duration::from_secs(180));
        assert_eq!(pipeline.pages.poll_interval, Duration::from_secs(3));
        assert_eq!(pipeline.pages.max_attempts, 60);
        assert_eq!(pipeline.github_retry.max_attempts, 4);
        assert_eq!(config.report_retry().max_attempts, 3);
        assert_eq!(config.generation().timeout, Duration::from_secs(120));
    }

    #[test]
    fn overrides_flow_into_the_pipeline() {
        let config = parse(&["--private", "--license-holder", "Octo Inc", "--pages-deadline-secs", "30"]);
        let pipeline = config.pipeline();
        assert!(pipeline.provision.private);
        assert_eq!(pipeline.license_holder, "Octo Inc");
        assert_eq!(pipeline.pages.deadline, Duration::from_secs(30));
    }
}
