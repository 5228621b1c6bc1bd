//! Router: classifies the input and picks the route.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_core::error::DomainError;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use talespin_rules::{ActionDescriptor, ActionType};
use tracing::debug;

use super::{Stage, StageContext, preamble};
use crate::domain::route::{self, RouteClass, RouteDecision};
use crate::domain::turn_state::{StageName, TurnState};

/// Model refinement of the keyword classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterReply {
    pub route: String,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub item: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
}

struct RouterContract {
    heuristic: RouteDecision,
}

impl ResponseContract for RouterContract {
    type Output = RouterReply;

    fn name(&self) -> &'static str {
        StageName::Router.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"route": "action" | "talk", "action_type": "attack|sneak|persuade|intimidate|investigate|travel|use_item|steal|athletics|generic" | null, "target": string | null, "item": string | null, "destination": string | null}"#
    }

    fn validate(&self, output: RouterReply) -> Result<RouterReply, String> {
        match output.route.as_str() {
            "talk" => Ok(output),
            "action" => match output.action_type.as_deref().map(ActionType::from_label) {
                Some(Some(_)) => Ok(output),
                _ => Err(format!("unknown action_type {:?}", output.action_type)),
            },
            other => Err(format!("unknown route {other}")),
        }
    }

    fn fallback(&self) -> RouterReply {
        let action = self.heuristic.action.as_ref();
        RouterReply {
            route: self.heuristic.class.as_str().to_owned(),
            action_type: action.map(|a| a.action_type.as_str().to_owned()),
            target: action.and_then(|a| a.target.clone()),
            item: action.and_then(|a| a.item.clone()),
            destination: action.and_then(|a| a.destination.clone()),
        }
    }
}

fn decision_from(reply: RouterReply, input: &str, rationale: String) -> RouteDecision {
    let Some(action_type) = reply.action_type.as_deref().and_then(ActionType::from_label) else {
        return RouteDecision::talk(rationale);
    };
    if reply.route != "action" {
        return RouteDecision::talk(rationale);
    }
    let mut action = ActionDescriptor::new(action_type, input.trim());
    action.target = reply.target.filter(|t| !t.trim().is_empty());
    action.item = reply.item.filter(|i| !i.trim().is_empty());
    action.destination = reply
        .destination
        .map(|d| d.trim().to_lowercase().replace(' ', "_"))
        .filter(|d| !d.is_empty());
    RouteDecision::action(action, rationale)
}

/// Classifies the player's input.
pub struct RouterStage;

#[async_trait]
impl Stage for RouterStage {
    fn name(&self) -> StageName {
        StageName::Router
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let heuristic = route::classify(&turn.user_input);
        let decision = if heuristic.class == RouteClass::Meta || !ctx.config.router_llm {
            heuristic
        } else {
            let prompt = Prompt::new(
                format!(
                    "{} Classify the player's input as a mechanically relevant action or as talk.",
                    preamble(ctx, turn)
                ),
                format!(
                    "Player input: {}\nKeyword guess: {} ({})",
                    turn.user_input,
                    heuristic.class.as_str(),
                    heuristic.rationale
                ),
            );
            let contract = RouterContract {
                heuristic: heuristic.clone(),
            };
            let completion = ctx
                .llm
                .complete(&prompt, &contract, LlmRole::Router, &mut turn.warnings)
                .await;
            if completion.is_fallback() {
                heuristic
            } else {
                let mut refined =
                    decision_from(completion.value, &turn.user_input, "model classification".into());
                refined.refined = true;
                refined
            }
        };

        let decision = route::sanitize(decision, &turn.snapshot);
        debug!(
            route = decision.class.as_str(),
            action = ?decision.action_label(),
            rationale = %decision.rationale,
            "input routed"
        );
        turn.route = Some(decision);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use talespin_llm::LlmRole;
    use talespin_test_support::{ScriptedLlm, UnreachableLlm};
    use talespin_world_state::domain::events::CharacterRole;

    use super::*;
    use crate::stages::testing;

    #[tokio::test]
    async fn test_model_refines_keyword_guess() {
        // Arrange
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Router,
            r#"{"route": "action", "action_type": "persuade", "target": "dock master"}"#,
        ));
        let ctx = testing::context(llm.clone());
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "maybe the dock master would listen to reason");

        // Act
        RouterStage.run(&ctx, &mut turn).await.unwrap();

        // Assert
        let decision = turn.route.unwrap();
        assert!(decision.refined);
        let action = decision.action.unwrap();
        assert_eq!(action.action_type, ActionType::Persuade);
        assert_eq!(action.target.as_deref(), Some("dock master"));
        assert!(turn.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_model_falls_back_to_keywords() {
        let llm = Arc::new(UnreachableLlm::new());
        let ctx = testing::context(llm.clone());
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "attack the guard");

        RouterStage.run(&ctx, &mut turn).await.unwrap();

        let decision = turn.route.unwrap();
        assert_eq!(decision.class, RouteClass::Action);
        assert!(!decision.refined);
        assert_eq!(llm.call_count(), 2);
        assert_eq!(turn.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_meta_never_reaches_the_model() {
        let llm = Arc::new(UnreachableLlm::new());
        let ctx = testing::context(llm.clone());
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "/status");

        RouterStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.route_class(), RouteClass::Meta);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_use_of_unheld_item_is_downgraded() {
        let llm = Arc::new(UnreachableLlm::new());
        let mut ctx = testing::context(llm);
        ctx.config.router_llm = false;
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "use the lockpick");

        RouterStage.run(&ctx, &mut turn).await.unwrap();

        let action = turn.route.unwrap().action.unwrap();
        assert_eq!(action.action_type, ActionType::Generic);
        assert!(turn.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_incapacitated_player_is_routed_to_talk() {
        // Arrange
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Router,
            r#"{"route": "action", "action_type": "attack", "target": "guard"}"#,
        ));
        let ctx = testing::context(llm);
        let mut player = testing::seed("Ada", CharacterRole::Player, "docks");
        player.hit_points = 0;
        let mut turn = testing::turn(&[player], "attack the guard");

        // Act
        RouterStage.run(&ctx, &mut turn).await.unwrap();

        // Assert
        let decision = turn.route.unwrap();
        assert_eq!(decision.class, RouteClass::Talk);
        assert!(decision.action.is_none());
        assert_eq!(decision.rationale, "player is incapacitated");
    }
}
