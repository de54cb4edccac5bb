//! Skill types.
//!
//! A skill is a named, phase-tagged behavioral instruction block injected
//! into an agent's effective instructions. Query-phase skills shape how a
//! specialist works; response-phase skills shape how results are
//! synthesized; `both` applies to each.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillPhase {
    Query,
    Response,
    Both,
}

impl SkillPhase {
    pub fn applies_to_query(self) -> bool {
        matches!(self, SkillPhase::Query | SkillPhase::Both)
    }

    pub fn applies_to_response(self) -> bool {
        matches!(self, SkillPhase::Response | SkillPhase::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkillPhase::Query => "query",
            SkillPhase::Response => "response",
            SkillPhase::Both => "both",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub phase: SkillPhase,
    pub content: String,
}

/// Listing entry without the full content body.
#[derive(Debug, Clone, Serialize)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub phase: SkillPhase,
}

impl From<&Skill> for SkillInfo {
    fn from(skill: &Skill) -> Self {
        Self {
            name: skill.name.clone(),
            description: skill.description.clone(),
            tags: skill.tags.clone(),
            phase: skill.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_applicability() {
        assert!(SkillPhase::Query.applies_to_query());
        assert!(!SkillPhase::Query.applies_to_response());
        assert!(SkillPhase::Response.applies_to_response());
        assert!(!SkillPhase::Response.applies_to_query());
        assert!(SkillPhase::Both.applies_to_query());
        assert!(SkillPhase::Both.applies_to_response());
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SkillPhase::Both).unwrap(),
            "\"both\""
        );
    }
}
