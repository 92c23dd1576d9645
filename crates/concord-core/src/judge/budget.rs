use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_cost_usd: f64,
    pub max_latency_ms: u64,
    /// Outbound calls (model, embedding, verifier) per evaluation.
    pub max_requests: u32,
    pub max_tokens_per_request: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_cost_usd: 1.0,
            max_latency_ms: 120_000,
            max_requests: 16,
            max_tokens_per_request: 8_192,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetViolation {
    TokenCap,
    RequestCap,
    Exhausted,
}

impl BudgetViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenCap => "token_cap",
            Self::RequestCap => "request_cap",
            Self::Exhausted => "budget_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub requests: u32,
    pub exceeded: bool,
}

/// Cumulative cost/latency tracker for one evaluation.
#[derive(Debug, Clone)]
pub struct BudgetEnforcer {
    config: BudgetConfig,
    cost_usd: f64,
    latency_ms: u64,
    requests: u32,
    exceeded: bool,
}

impl BudgetEnforcer {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            cost_usd: 0.0,
            latency_ms: 0,
            requests: 0,
            exceeded: false,
        }
    }

    /// Pre-flight check for one outbound request.
    pub fn check_request(&self, estimated_tokens: u64) -> Result<(), BudgetViolation> {
        if self.exceeded {
            return Err(BudgetViolation::Exhausted);
        }
        if self.requests >= self.config.max_requests {
            return Err(BudgetViolation::RequestCap);
        }
        if estimated_tokens > self.config.max_tokens_per_request {
            return Err(BudgetViolation::TokenCap);
        }
        Ok(())
    }

    /// Adds one method's spend. `outbound` counts it as a request.
    pub fn record(&mut self, cost_usd: f64, latency_ms: u64, outbound: bool) {
        self.cost_usd += cost_usd.max(0.0);
        self.latency_ms += latency_ms;
        if outbound {
            self.requests += 1;
        }
        if !self.exceeded
            && (self.cost_usd > self.config.max_cost_usd
                || self.latency_ms > self.config.max_latency_ms)
        {
            self.exceeded = true;
            info!(
                cost_usd = self.cost_usd,
                latency_ms = self.latency_ms,
                max_cost_usd = self.config.max_cost_usd,
                max_latency_ms = self.config.max_latency_ms,
                "evaluation budget exceeded"
            );
        }
    }

    pub fn is_budget_exceeded(&self) -> bool {
        self.exceeded
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            cost_usd: self.cost_usd,
            latency_ms: self.latency_ms,
            requests: self.requests,
            exceeded: self.exceeded,
        }
    }
}
