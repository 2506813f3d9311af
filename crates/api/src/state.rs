use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::BTreeMap;
use std::sync::Arc;

use scheduler_dispatcher::program::ProgramAgent;
use scheduler_dispatcher::{DispatchService, Reconciler};

const CONSUMER: &str = "consumer";

/// 本进程托管的程序
#[derive(Default)]
pub struct Programs {
    agents: BTreeMap<String, Arc<ProgramAgent>>,
    local_consumer: Option<i64>,
}

impl Programs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: Arc<ProgramAgent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    /// 进程内消费者的成员id
    pub fn with_local_consumer(mut self, consumer_id: i64) -> Self {
        self.local_consumer = Some(consumer_id);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ProgramAgent>> {
        self.agents.get(name)
    }

    pub fn consumer(&self) -> Option<&Arc<ProgramAgent>> {
        self.agents.get(CONSUMER)
    }

    pub fn is_local_consumer(&self, consumer_id: i64) -> bool {
        self.local_consumer == Some(consumer_id) && self.consumer().is_some()
    }
}

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub dispatch: Arc<DispatchService>,
    pub reconciler: Arc<Reconciler>,
    pub programs: Arc<Programs>,
    pub metrics: Option<PrometheusHandle>,
}
