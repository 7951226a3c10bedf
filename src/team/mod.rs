//! Team scheduler: assigns tasks across a team's agents and propagates
//! `Start`/`Stop` lifecycle calls across the roster.

use crate::agent::{AgentHandle, AgentState};
use crate::task::Task;
use crate::{RatchetError, Result};

/// A lead agent plus its non-lead members. Assignment prefers an idle
/// member, falls back to the first non-stopped member, and finally the
/// lead as the assignee of last resort.
pub struct Team {
    pub id: String,
    pub lead: AgentHandle,
    pub members: Vec<AgentHandle>,
}

impl Team {
    pub fn new(id: impl Into<String>, lead: AgentHandle, members: Vec<AgentHandle>) -> Self {
        Self { id: id.into(), lead, members }
    }

    /// Idle-first / first-non-stopped / lead assignment rule.
    pub async fn assign_task(&self, task: Task) -> Result<()> {
        for member in &self.members {
            if member.state().await == AgentState::Idle {
                return member.assign_task(task);
            }
        }
        for member in &self.members {
            if member.state().await != AgentState::Stopped {
                return member.assign_task(task);
            }
        }
        if self.lead.state().await != AgentState::Stopped {
            return self.lead.assign_task(task);
        }
        Err(RatchetError::Capacity(format!("team {} has no agent available to accept task", self.id)))
    }

    /// Starts every member before the lead; the first failure aborts
    /// immediately without starting the rest.
    pub async fn start(&self) -> Result<()> {
        for member in &self.members {
            member.start().await?;
        }
        self.lead.start().await?;
        Ok(())
    }

    /// Stops every member, then the lead, collecting every result rather
    /// than aborting on the first failure.
    pub async fn stop(&self) -> Vec<(String, Result<()>)> {
        let mut results: Vec<(String, Result<()>)> = self
            .members
            .iter()
            .map(|m| (m.id.clone(), Self::stop_one(m)))
            .collect();
        results.push((self.lead.id.clone(), Self::stop_one(&self.lead)));
        results
    }

    fn stop_one(handle: &AgentHandle) -> Result<()> {
        handle.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, Personality};
    use crate::bus::MessageBus;
    use crate::provider::MockProvider;
    use crate::store::InMemoryTaskStore;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn personality(role: &str) -> Personality {
        Personality {
            role: role.into(),
            system_prompt: "system".into(),
            preferred_model: "mock".into(),
        }
    }

    fn build_agent(id: &str, is_lead: bool) -> AgentHandle {
        let provider = Arc::new(MockProvider::new(id));
        let store: Arc<dyn crate::store::TaskStore> = Arc::new(InMemoryTaskStore::new());
        let bus = Arc::new(MessageBus::new());
        let tools: Arc<dyn crate::tools::ToolDispatcher> = Arc::new(ToolRegistry::new());
        Agent::new(id, personality("member"), is_lead, Some("team-1".into()), provider, tools, store, bus)
    }

    #[tokio::test]
    async fn assigns_to_idle_member_before_lead() {
        let lead = build_agent("lead", true);
        let member = build_agent("member", false);
        let team = Team::new("team-1", lead, vec![member]);

        // Without starting either agent the member stays Idle, so
        // assignment should prefer it over the lead.
        team.assign_task(Task::new("t", "d")).await.unwrap();
    }

    #[tokio::test]
    async fn falls_back_to_lead_when_all_members_stopped() {
        let member = build_agent("member", false);
        let lead = build_agent("lead", true);
        member.start().await.unwrap();
        member.stop();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let team = Team::new("team-1", lead, vec![member]);
        team.assign_task(Task::new("t", "d")).await.unwrap();
    }

    #[tokio::test]
    async fn fails_when_every_agent_is_stopped() {
        let member = build_agent("member", false);
        let lead = build_agent("lead", true);
        member.start().await.unwrap();
        lead.start().await.unwrap();
        member.stop();
        lead.stop();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let team = Team::new("team-1", lead, vec![member]);
        assert!(team.assign_task(Task::new("t", "d")).await.is_err());
    }

    #[tokio::test]
    async fn start_fails_fast_on_first_stopped_member() {
        let member = build_agent("member", false);
        let lead = build_agent("lead", true);
        member.start().await.unwrap();
        member.stop();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let team = Team::new("team-1", lead, vec![member]);
        assert!(team.start().await.is_err());
    }

    #[tokio::test]
    async fn stop_collects_results_for_every_agent() {
        let member = build_agent("member", false);
        let lead = build_agent("lead", true);
        let team = Team::new("team-1", lead, vec![member]);
        let results = team.stop().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
