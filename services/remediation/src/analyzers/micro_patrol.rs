//! Micro-check patrol
//!
//! A swarm of small, synchronous checks over the messaging substrate. Each
//! check is cheap and independent; the patrol runs them all and collects
//! their findings into one result.

use super::{names, Analyzer};
use crate::error::AnalyzerError;
use crate::types::{AnalyzerResult, Issue, Severity};
use async_trait::async_trait;
use message_router::MessageRouter;
use std::sync::Arc;
use tracing::debug;

pub trait MicroCheck: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> Vec<Issue>;
}

/// Routes whose target endpoint is not registered
pub struct DanglingRouteCheck {
    router: MessageRouter,
}

impl DanglingRouteCheck {
    pub fn new(router: MessageRouter) -> Self {
        Self { router }
    }
}

impl MicroCheck for DanglingRouteCheck {
    fn name(&self) -> &str {
        "dangling-routes"
    }

    fn run(&self) -> Vec<Issue> {
        let endpoints = self.router.endpoints();
        self.router
            .routes()
            .routes()
            .into_iter()
            .filter(|route| !endpoints.contains(&route.target_endpoint_id))
            .map(|route| {
                Issue::new(
                    names::MICRO_PATROL,
                    format!("dangling-route-{}-{}", route.channel, route.message_type),
                    Severity::Medium,
                    format!(
                        "Route {} targets unregistered endpoint {}",
                        route.key(),
                        route.target_endpoint_id
                    ),
                )
                .with_data("check", "dangling-routes")
                .with_data("channel", route.channel.as_str())
                .with_data("messageType", route.message_type.as_str())
                .with_data("endpointId", route.target_endpoint_id.as_str())
            })
            .collect()
    }
}

/// Fallback enabled while no default channel is configured
pub struct FallbackWithoutDefaultCheck {
    router: MessageRouter,
}

impl FallbackWithoutDefaultCheck {
    pub fn new(router: MessageRouter) -> Self {
        Self { router }
    }
}

impl MicroCheck for FallbackWithoutDefaultCheck {
    fn name(&self) -> &str {
        "fallback-without-default"
    }

    fn run(&self) -> Vec<Issue> {
        let config = self.router.config();
        let has_default = config
            .default_channel
            .as_deref()
            .is_some_and(|channel| !channel.is_empty());

        if config.allow_fallback && !has_default {
            return vec![Issue::new(
                names::MICRO_PATROL,
                "fallback-without-default",
                Severity::Low,
                "Routing fallback is enabled but no default channel is configured",
            )
            .with_data("check", "fallback-without-default")];
        }
        Vec::new()
    }
}

pub struct MicroPatrolAnalyzer {
    checks: Vec<Arc<dyn MicroCheck>>,
}

impl MicroPatrolAnalyzer {
    pub fn new(checks: Vec<Arc<dyn MicroCheck>>) -> Self {
        Self { checks }
    }

    /// Patrol with the routing checks
    pub fn for_router(router: &MessageRouter) -> Self {
        Self::new(vec![
            Arc::new(DanglingRouteCheck::new(router.clone())),
            Arc::new(FallbackWithoutDefaultCheck::new(router.clone())),
        ])
    }
}

#[async_trait]
impl Analyzer for MicroPatrolAnalyzer {
    fn name(&self) -> &str {
        names::MICRO_PATROL
    }

    async fn analyze(&self) -> Result<AnalyzerResult, AnalyzerError> {
        let mut result = AnalyzerResult::new(names::MICRO_PATROL);
        for check in &self.checks {
            let findings = check.run();
            debug!("Micro check {} found {} issues", check.name(), findings.len());
            for issue in findings {
                result.push_issue(issue);
            }
        }
        Ok(result)
    }
}
