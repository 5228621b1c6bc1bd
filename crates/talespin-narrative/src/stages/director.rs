//! Director: gathers lore context and briefs the narrator.

use async_trait::async_trait;
use serde::Deserialize;
use talespin_content::RetrievalQuery;
use talespin_core::error::DomainError;
use talespin_core::warnings::WarningCode;
use talespin_llm::{LlmRole, Prompt, ResponseContract};
use tracing::warn;

use super::{Stage, StageContext, preamble};
use crate::domain::route::RouteClass;
use crate::domain::turn_state::{DirectorNotes, StageName, TurnState};

#[derive(Debug, Clone, Deserialize)]
pub struct DirectorReply {
    pub focus: String,
    pub pacing: String,
    #[serde(default)]
    pub must_mention: Vec<String>,
    #[serde(default)]
    pub avoid: Vec<String>,
}

struct DirectorContract {
    fallback: DirectorNotes,
}

impl ResponseContract for DirectorContract {
    type Output = DirectorReply;

    fn name(&self) -> &'static str {
        StageName::Director.as_str()
    }

    fn schema_hint(&self) -> &'static str {
        r#"{"focus": string, "pacing": "brisk|measured|slow", "must_mention": [string], "avoid": [string]}"#
    }

    fn validate(&self, output: DirectorReply) -> Result<DirectorReply, String> {
        if output.focus.trim().is_empty() || output.pacing.trim().is_empty() {
            Err("focus and pacing are required".into())
        } else {
            Ok(output)
        }
    }

    fn fallback(&self) -> DirectorReply {
        DirectorReply {
            focus: self.fallback.focus.clone(),
            pacing: self.fallback.pacing.clone(),
            must_mention: self.fallback.must_mention.clone(),
            avoid: self.fallback.avoid.clone(),
        }
    }
}

fn retrieval_text(turn: &TurnState) -> String {
    let mut text = turn.user_input.clone();
    if let Some(scene) = &turn.scene {
        text.push(' ');
        text.push_str(&scene.location_name);
        for name in &scene.present {
            text.push(' ');
            text.push_str(name);
        }
    }
    text
}

/// Retrieves context and decides what the narration must cover.
pub struct DirectorStage;

#[async_trait]
impl Stage for DirectorStage {
    fn name(&self) -> StageName {
        StageName::Director
    }

    async fn run(&self, ctx: &StageContext, turn: &mut TurnState) -> Result<(), DomainError> {
        let query = RetrievalQuery {
            text: retrieval_text(turn),
            time_period: turn.snapshot.campaign().time_period.clone(),
            token_budget: ctx.config.context_token_budget,
            top_k: ctx.config.retrieval_top_k,
        };
        match ctx.retriever.retrieve(&query).await {
            Ok(snippets) => turn.context = snippets,
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without context");
                turn.warnings.push(
                    self.name().as_str(),
                    WarningCode::RetrievalUnavailable,
                    e.to_string(),
                );
            }
        }

        let facts = turn.mechanical_facts();
        let fallback = DirectorNotes {
            focus: facts
                .first()
                .cloned()
                .unwrap_or_else(|| format!("respond to: {}", turn.user_input)),
            pacing: if turn.route_class() == RouteClass::Action {
                "brisk".to_owned()
            } else {
                "measured".to_owned()
            },
            must_mention: facts.clone(),
            avoid: vec!["revealing anyone's secret agenda".to_owned()],
        };
        let prompt = Prompt::new(
            format!(
                "{} Brief the narrator: what to focus on, how fast, what to include and avoid.",
                preamble(ctx, turn)
            ),
            format!(
                "Player: {}\nEstablished: {}\nBeat: {}\nScene: {}\nLore: {}",
                turn.user_input,
                facts.join("; "),
                turn.arc.as_ref().map_or("", |a| a.beat.as_str()),
                turn.scene
                    .as_ref()
                    .map(|s| format!("{} at {}, {}", s.location_name, s.time_of_day, s.mood))
                    .unwrap_or_default(),
                turn.context
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        );
        let contract = DirectorContract { fallback };
        let reply = ctx
            .llm
            .complete(&prompt, &contract, LlmRole::Director, &mut turn.warnings)
            .await
            .value;

        // Mechanical facts are not negotiable.
        let mut must_mention = reply.must_mention;
        for fact in facts {
            if !must_mention.contains(&fact) {
                must_mention.push(fact);
            }
        }
        turn.director = Some(DirectorNotes {
            focus: reply.focus,
            pacing: reply.pacing,
            must_mention,
            avoid: reply.avoid,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use talespin_content::{LoreRetriever, RetrievalError, Snippet, SnippetKind};
    use talespin_test_support::{ScriptedLlm, UnreachableLlm};
    use talespin_world_state::domain::events::CharacterRole;

    use super::*;
    use crate::stages::testing;

    struct BrokenIndex;

    #[async_trait]
    impl LoreRetriever for BrokenIndex {
        async fn retrieve(&self, _query: &RetrievalQuery) -> Result<Vec<Snippet>, RetrievalError> {
            Err(RetrievalError::Unavailable("index offline".into()))
        }
    }

    struct OneSnippet;

    #[async_trait]
    impl LoreRetriever for OneSnippet {
        async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Snippet>, RetrievalError> {
            assert_eq!(query.time_period, "gaslight");
            Ok(vec![Snippet {
                source_id: "fog".into(),
                kind: SnippetKind::Lore,
                text: "Fog rolls in.".into(),
                score: 1.0,
            }])
        }
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_no_context() {
        let mut ctx = testing::context(Arc::new(UnreachableLlm::new()));
        ctx.retriever = Arc::new(BrokenIndex);
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "look around");

        DirectorStage.run(&ctx, &mut turn).await.unwrap();

        assert!(turn.context.is_empty());
        assert_eq!(turn.warnings.count_of(WarningCode::RetrievalUnavailable), 1);
        assert_eq!(turn.warnings.count_of(WarningCode::LlmFallback), 1);
        assert!(turn.director.is_some());
    }

    #[tokio::test]
    async fn test_model_brief_is_used_with_context() {
        let llm = Arc::new(ScriptedLlm::new().reply(
            LlmRole::Director,
            r#"{"focus": "the fog", "pacing": "slow", "must_mention": ["fog"], "avoid": []}"#,
        ));
        let mut ctx = testing::context(llm);
        ctx.retriever = Arc::new(OneSnippet);
        let player = testing::seed("Ada", CharacterRole::Player, "docks");
        let mut turn = testing::turn(&[player], "look around");

        DirectorStage.run(&ctx, &mut turn).await.unwrap();

        assert_eq!(turn.context.len(), 1);
        let notes = turn.director.unwrap();
        assert_eq!(notes.focus, "the fog");
        assert_eq!(notes.must_mention, vec!["fog".to_owned()]);
        assert!(turn.warnings.is_empty());
    }
}
