//! The compiled stage topology.
//!
//! Built once at startup and shared immutably by every turn. Each route maps
//! to an ordered subset of the topology; compilation rejects routes that
//! would run stages out of order or twice.

use std::collections::HashMap;

use talespin_core::error::DomainError;

use crate::domain::route::RouteClass;
use crate::domain::turn_state::StageName;
use crate::stages::Stage;
use crate::stages::arc_planner::ArcPlannerStage;
use crate::stages::companion::CompanionReactionStage;
use crate::stages::director::DirectorStage;
use crate::stages::encounter::EncounterStage;
use crate::stages::mechanic::MechanicStage;
use crate::stages::narrator::NarratorStage;
use crate::stages::router::RouterStage;
use crate::stages::scene_frame::SceneFrameStage;
use crate::stages::suggestions::SuggestionRefinerStage;
use crate::stages::validator::NarrativeValidatorStage;
use crate::stages::world_sim::WorldSimStage;

/// The stages after the router, in topological order.
pub const TOPOLOGY: [StageName; 10] = [
    StageName::Mechanic,
    StageName::Encounter,
    StageName::WorldSim,
    StageName::CompanionReaction,
    StageName::ArcPlanner,
    StageName::SceneFrame,
    StageName::Director,
    StageName::Narrator,
    StageName::NarrativeValidator,
    StageName::SuggestionRefiner,
];

/// Router, per-route stage paths and nothing else; commit is separate.
pub struct StageGraph {
    router: Box<dyn Stage>,
    stages: Vec<Box<dyn Stage>>,
    paths: HashMap<RouteClass, Vec<usize>>,
}

impl StageGraph {
    /// Compiles the standard topology: `Meta` runs nothing, `Talk` skips the
    /// mechanic, `Action` runs everything.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the standard routes do not fit the
    /// standard stages, which would be a programming error.
    pub fn compile() -> Result<Self, DomainError> {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(MechanicStage),
            Box::new(EncounterStage),
            Box::new(WorldSimStage),
            Box::new(CompanionReactionStage),
            Box::new(ArcPlannerStage),
            Box::new(SceneFrameStage),
            Box::new(DirectorStage),
            Box::new(NarratorStage),
            Box::new(NarrativeValidatorStage),
            Box::new(SuggestionRefinerStage),
        ];
        let talk: Vec<StageName> = TOPOLOGY[1..].to_vec();
        Self::from_parts(
            Box::new(RouterStage),
            stages,
            &[
                (RouteClass::Meta, Vec::new()),
                (RouteClass::Talk, talk),
                (RouteClass::Action, TOPOLOGY.to_vec()),
            ],
        )
    }

    /// Compiles a custom set of stages and routes.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a route names a stage that is not
    /// present, lists stages out of topological order, or a route class is
    /// missing.
    pub fn from_parts(
        router: Box<dyn Stage>,
        stages: Vec<Box<dyn Stage>>,
        routes: &[(RouteClass, Vec<StageName>)],
    ) -> Result<Self, DomainError> {
        let rank = |name: StageName| TOPOLOGY.iter().position(|n| *n == name);
        if let Some(pair) = stages.windows(2).find(|w| rank(w[0].name()) >= rank(w[1].name())) {
            return Err(DomainError::Validation(format!(
                "stage {} is registered after {}",
                pair[1].name(),
                pair[0].name()
            )));
        }

        let mut paths = HashMap::new();
        for (class, names) in routes {
            let mut path = Vec::with_capacity(names.len());
            for name in names {
                let index = stages
                    .iter()
                    .position(|s| s.name() == *name)
                    .ok_or_else(|| {
                        DomainError::Validation(format!(
                            "route {} names unregistered stage {name}",
                            class.as_str()
                        ))
                    })?;
                if path.last().is_some_and(|last| *last >= index) {
                    return Err(DomainError::Validation(format!(
                        "route {} runs {name} out of order",
                        class.as_str()
                    )));
                }
                path.push(index);
            }
            paths.insert(*class, path);
        }
        for class in [RouteClass::Meta, RouteClass::Talk, RouteClass::Action] {
            if !paths.contains_key(&class) {
                return Err(DomainError::Validation(format!(
                    "route {} is not defined",
                    class.as_str()
                )));
            }
        }
        Ok(Self {
            router,
            stages,
            paths,
        })
    }

    /// The routing stage.
    #[must_use]
    pub fn router(&self) -> &dyn Stage {
        self.router.as_ref()
    }

    /// The stages a route runs, in order.
    pub fn path(&self, route: RouteClass) -> impl Iterator<Item = &dyn Stage> {
        self.paths
            .get(&route)
            .into_iter()
            .flatten()
            .map(|index| self.stages[*index].as_ref())
    }

    /// Names of the stages a route runs.
    #[must_use]
    pub fn path_names(&self, route: RouteClass) -> Vec<StageName> {
        self.path(route).map(Stage::name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_routes() {
        let graph = StageGraph::compile().unwrap();

        assert!(graph.path_names(RouteClass::Meta).is_empty());
        assert_eq!(graph.path_names(RouteClass::Action), TOPOLOGY.to_vec());
        let talk = graph.path_names(RouteClass::Talk);
        assert!(!talk.contains(&StageName::Mechanic));
        assert_eq!(talk.first(), Some(&StageName::Encounter));
        assert_eq!(talk.last(), Some(&StageName::SuggestionRefiner));
        assert_eq!(graph.router().name(), StageName::Router);
    }

    #[test]
    fn test_out_of_order_route_is_rejected() {
        let result = StageGraph::from_parts(
            Box::new(RouterStage),
            vec![Box::new(NarratorStage), Box::new(SuggestionRefinerStage)],
            &[
                (RouteClass::Meta, Vec::new()),
                (RouteClass::Talk, vec![StageName::SuggestionRefiner, StageName::Narrator]),
                (RouteClass::Action, Vec::new()),
            ],
        );

        assert!(matches!(result, Err(DomainError::Validation(msg)) if msg.contains("out of order")));
    }

    #[test]
    fn test_unregistered_stage_is_rejected() {
        let result = StageGraph::from_parts(
            Box::new(RouterStage),
            vec![Box::new(NarratorStage)],
            &[
                (RouteClass::Meta, Vec::new()),
                (RouteClass::Talk, vec![StageName::Director]),
                (RouteClass::Action, Vec::new()),
            ],
        );

        assert!(matches!(result, Err(DomainError::Validation(msg)) if msg.contains("unregistered")));
    }
}
