//! Case-insensitive lookup of configured agents, teams, and swarms.

use std::collections::BTreeMap;

use crate::settings::{AgentSettings, Settings, SwarmSettings, TeamSettings};

/// A team as seen from the roster: its configured id plus settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeamRef<'a> {
    pub id: &'a str,
    pub settings: &'a TeamSettings,
}

impl<'a> TeamRef<'a> {
    pub fn leader(&self) -> &'a str {
        &self.settings.leader
    }

    pub fn has_member(&self, agent: &str) -> bool {
        self.settings
            .agents
            .iter()
            .any(|a| a.eq_ignore_ascii_case(agent))
    }

    pub fn display_name(&self) -> &'a str {
        self.settings.name.as_deref().unwrap_or(self.id)
    }
}

/// Lookup tables keyed by lowercased id. Values keep the configured id.
#[derive(Debug, Clone)]
pub struct Roster {
    default_agent: String,
    agents: BTreeMap<String, (String, AgentSettings)>,
    teams: BTreeMap<String, (String, TeamSettings)>,
    swarms: BTreeMap<String, (String, SwarmSettings)>,
}

impl Roster {
    /// Builds the roster. The default agent is always present, even when
    /// the settings do not list it.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut agents: BTreeMap<String, (String, AgentSettings)> = settings
            .agents
            .iter()
            .map(|(id, a)| (id.to_lowercase(), (id.clone(), a.clone())))
            .collect();
        agents
            .entry(settings.default_agent.to_lowercase())
            .or_insert_with(|| (settings.default_agent.clone(), AgentSettings::default()));

        let default_agent = agents
            .get(&settings.default_agent.to_lowercase())
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| settings.default_agent.clone());

        Self {
            default_agent,
            agents,
            teams: settings
                .teams
                .iter()
                .map(|(id, t)| (id.to_lowercase(), (id.clone(), t.clone())))
                .collect(),
            swarms: settings
                .swarms
                .iter()
                .map(|(id, s)| (id.to_lowercase(), (id.clone(), s.clone())))
                .collect(),
        }
    }

    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    /// Configured id of an agent, matched case-insensitively.
    pub fn agent(&self, name: &str) -> Option<&str> {
        self.agents
            .get(&name.to_lowercase())
            .map(|(id, _)| id.as_str())
    }

    pub fn agent_settings(&self, name: &str) -> Option<&AgentSettings> {
        self.agents.get(&name.to_lowercase()).map(|(_, a)| a)
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.values().map(|(id, _)| id.as_str())
    }

    pub fn team(&self, name: &str) -> Option<TeamRef<'_>> {
        self.teams
            .get(&name.to_lowercase())
            .map(|(id, settings)| TeamRef { id, settings })
    }

    /// First team (by id) that lists `agent` as a member.
    pub fn team_of(&self, agent: &str) -> Option<TeamRef<'_>> {
        self.teams
            .values()
            .map(|(id, settings)| TeamRef { id, settings })
            .find(|t| t.has_member(agent))
    }

    /// Configured id and settings of a swarm.
    pub fn swarm(&self, name: &str) -> Option<(&str, &SwarmSettings)> {
        self.swarms
            .get(&name.to_lowercase())
            .map(|(id, s)| (id.as_str(), s))
    }

    pub fn swarm_ids(&self) -> impl Iterator<Item = &str> {
        self.swarms.values().map(|(id, _)| id.as_str())
    }
}
