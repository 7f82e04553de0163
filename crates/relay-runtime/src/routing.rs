//! Deciding which lane handles a claimed work item.
//!
//! Precedence for ordinary items:
//!
//! 1. the explicit `target` field
//! 2. a leading `@identity` token in the body (removed from the message)
//! 3. a team resolves to its leader
//! 4. the configured default agent
//!
//! Mention-derived items always go to their target agent.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use relay_core::Roster;
use relay_models::{ConversationId, WorkItem, WorkKind};
use tracing::{debug, warn};

fn leading_mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*@([A-Za-z0-9][A-Za-z0-9_-]*)(?:\s+(.*))?$").expect("valid routing regex")
    })
}

/// Splits `@name rest` into the name and the remaining text.
pub fn leading_mention(body: &str) -> Option<(&str, &str)> {
    let caps = leading_mention_pattern().captures(body)?;
    let name = caps.get(1)?.as_str();
    let rest = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((name, rest))
}

/// Key of a sequential lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneKey {
    Agent(String),
    Swarm(String),
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::Agent(id) => write!(f, "agent:{}", id),
            LaneKey::Swarm(id) => write!(f, "swarm:{}", id),
        }
    }
}

/// Where and how a work item is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// An ordinary turn. `team` is set when the agent belongs to a team, in
    /// which case its reply starts a conversation.
    Agent {
        agent: String,
        team: Option<String>,
        message: String,
    },
    /// A teammate message inside a running conversation.
    Mention {
        agent: String,
        conversation_id: ConversationId,
    },
    /// A swarm trigger; `trigger` is the text after the swarm mention.
    Swarm { swarm: String, trigger: String },
}

impl Route {
    pub fn lane(&self) -> LaneKey {
        match self {
            Route::Agent { agent, .. } | Route::Mention { agent, .. } => {
                LaneKey::Agent(agent.to_lowercase())
            }
            Route::Swarm { swarm, .. } => LaneKey::Swarm(swarm.to_lowercase()),
        }
    }

    /// The agent or swarm that runs the item.
    pub fn identity(&self) -> &str {
        match self {
            Route::Agent { agent, .. } | Route::Mention { agent, .. } => agent,
            Route::Swarm { swarm, .. } => swarm,
        }
    }
}

enum Identity {
    Agent(String),
    Team(String),
    Swarm(String),
}

#[derive(Debug, Clone)]
pub struct Router {
    roster: Arc<Roster>,
}

impl Router {
    pub fn new(roster: Arc<Roster>) -> Self {
        Self { roster }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    fn identify(&self, name: &str) -> Option<Identity> {
        if let Some(agent) = self.roster.agent(name) {
            return Some(Identity::Agent(agent.to_string()));
        }
        if let Some(team) = self.roster.team(name) {
            return Some(Identity::Team(team.id.to_string()));
        }
        self.roster
            .swarm(name)
            .map(|(id, _)| Identity::Swarm(id.to_string()))
    }

    fn agent_route(&self, agent: &str, message: String) -> Route {
        Route::Agent {
            agent: agent.to_string(),
            team: self.roster.team_of(agent).map(|t| t.id.to_string()),
            message,
        }
    }

    pub fn route(&self, item: &WorkItem) -> Route {
        if let WorkKind::Mention { conversation_id, .. } = &item.kind {
            let agent = item
                .target
                .as_deref()
                .and_then(|t| self.roster.agent(t))
                .unwrap_or_else(|| {
                    warn!(work_id = %item.id, target = ?item.target, "mention for unknown agent, using default");
                    self.roster.default_agent()
                });
            return Route::Mention {
                agent: agent.to_string(),
                conversation_id: conversation_id.clone(),
            };
        }

        let explicit = item.target.as_deref().and_then(|t| {
            let identity = self.identify(t);
            if identity.is_none() {
                debug!(work_id = %item.id, target = t, "unknown target, falling back to body");
            }
            identity
        });

        let (identity, message) = match explicit {
            Some(identity) => (Some(identity), item.body.trim().to_string()),
            None => match leading_mention(&item.body) {
                Some((name, rest)) => match self.identify(name) {
                    Some(identity) => (Some(identity), rest.to_string()),
                    None => (None, item.body.trim().to_string()),
                },
                None => (None, item.body.trim().to_string()),
            },
        };

        match identity {
            Some(Identity::Swarm(swarm)) => Route::Swarm {
                swarm,
                trigger: message,
            },
            Some(Identity::Team(team)) => {
                let leader = self
                    .roster
                    .team(&team)
                    .map(|t| t.leader())
                    .and_then(|leader| self.roster.agent(leader))
                    .unwrap_or_else(|| self.roster.default_agent())
                    .to_string();
                Route::Agent {
                    agent: leader,
                    team: Some(team),
                    message,
                }
            }
            Some(Identity::Agent(agent)) => self.agent_route(&agent, message),
            None => self.agent_route(self.roster.default_agent(), message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Settings;

    fn make_router() -> Router {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "default_agent": "assistant",
            "agents": { "assistant": {}, "lead": {}, "coder": {}, "writer": {} },
            "teams": { "dev": { "agents": ["lead", "coder"], "leader": "lead" } },
            "swarms": { "triage": { "prompt": "{{items}}" } }
        }))
        .unwrap();
        Router::new(Arc::new(Roster::from_settings(&settings)))
    }

    #[test]
    fn test_leading_mention() {
        assert_eq!(leading_mention("@coder fix it"), Some(("coder", "fix it")));
        assert_eq!(leading_mention("  @coder\nline two"), Some(("coder", "line two")));
        assert_eq!(leading_mention("@coder"), Some(("coder", "")));
        assert_eq!(leading_mention("ask @coder"), None);
        assert_eq!(leading_mention("me@example.com"), None);
    }

    #[test]
    fn test_default_agent() {
        let route = make_router().route(&WorkItem::new("discord", "alice", "hello"));
        assert_eq!(
            route,
            Route::Agent {
                agent: "assistant".into(),
                team: None,
                message: "hello".into()
            }
        );
        assert_eq!(route.lane(), LaneKey::Agent("assistant".into()));
    }

    #[test]
    fn test_leading_agent_mention_is_stripped() {
        let route = make_router().route(&WorkItem::new("discord", "alice", "@Writer draft a post"));
        assert_eq!(
            route,
            Route::Agent {
                agent: "writer".into(),
                team: None,
                message: "draft a post".into()
            }
        );
    }

    #[test]
    fn test_explicit_target_wins() {
        let item = WorkItem::new("http", "alice", "@writer hi").with_target("coder");
        match make_router().route(&item) {
            Route::Agent { agent, team, message } => {
                assert_eq!(agent, "coder");
                assert_eq!(team.as_deref(), Some("dev"));
                assert_eq!(message, "@writer hi");
            }
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[test]
    fn test_team_resolves_to_leader() {
        let route = make_router().route(&WorkItem::new("discord", "alice", "@dev plan the release"));
        assert_eq!(
            route,
            Route::Agent {
                agent: "lead".into(),
                team: Some("dev".into()),
                message: "plan the release".into()
            }
        );
    }

    #[test]
    fn test_unknown_mention_goes_to_default_unchanged() {
        let route = make_router().route(&WorkItem::new("discord", "alice", "@nobody are you there"));
        assert_eq!(
            route,
            Route::Agent {
                agent: "assistant".into(),
                team: None,
                message: "@nobody are you there".into()
            }
        );
    }

    #[test]
    fn test_swarm_gets_its_own_lane() {
        let route = make_router().route(&WorkItem::new("discord", "alice", "@triage owner/repo"));
        assert_eq!(
            route,
            Route::Swarm {
                swarm: "triage".into(),
                trigger: "owner/repo".into()
            }
        );
        assert_eq!(route.lane(), LaneKey::Swarm("triage".into()));
        assert_ne!(route.lane(), LaneKey::Agent("triage".into()));
    }

    #[test]
    fn test_mention_item_goes_to_target() {
        let origin = WorkItem::new("discord", "alice", "plan");
        let conversation_id = ConversationId::new();
        let item = WorkItem::mention(&origin, conversation_id.clone(), "lead", "Coder", "do it");
        assert_eq!(
            make_router().route(&item),
            Route::Mention {
                agent: "coder".into(),
                conversation_id
            }
        );
    }

    #[test]
    fn test_lane_display() {
        assert_eq!(LaneKey::Agent("coder".into()).to_string(), "agent:coder");
        assert_eq!(LaneKey::Swarm("triage".into()).to_string(), "swarm:triage");
    }
}
