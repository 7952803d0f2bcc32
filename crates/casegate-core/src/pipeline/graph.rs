//! The fixed stage graph as an explicit edge table.
//!
//! Stage slots are numbered in pipeline order: slot 0 is qualification,
//! slots `1..=N` are the analysis stages and slot `N + 1` is the review gate.

use casegate_types::run::RunStatus;
use casegate_types::ticket::DecisionStatus;

/// Condition an edge is taken under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    Qualified,
    Disqualified,
    Decision(DecisionStatus),
}

impl Guard {
    /// `Always` edges accept any outcome.
    fn admits(&self, outcome: Guard) -> bool {
        *self == Guard::Always || *self == outcome
    }
}

/// What the engine does to traverse an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    /// Load the subject profile into the payload.
    Intake,
    /// Execute the stage in this slot.
    Stage(usize),
    /// Fold in a reviewer decision.
    Resume,
    /// Loop back after a revision request.
    ReEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: RunStatus,
    pub guard: Guard,
    pub to: RunStatus,
    pub via: Via,
}

/// Edge table for a pipeline with `analysis_count` analysis stages.
#[derive(Debug, Clone)]
pub struct StageGraph {
    edges: Vec<Edge>,
    analysis_count: u32,
}

impl StageGraph {
    pub fn new(analysis_count: u32) -> Self {
        let n = analysis_count;
        let gate_slot = n as usize + 1;
        let mut edges = vec![
            Edge {
                from: RunStatus::Created,
                guard: Guard::Always,
                to: RunStatus::Running,
                via: Via::Intake,
            },
            Edge {
                from: RunStatus::Running,
                guard: Guard::Qualified,
                to: RunStatus::Routing,
                via: Via::Stage(0),
            },
            Edge {
                from: RunStatus::Running,
                guard: Guard::Disqualified,
                to: RunStatus::Disqualified,
                via: Via::Stage(0),
            },
            Edge {
                from: RunStatus::Routing,
                guard: Guard::Always,
                to: if n == 0 {
                    RunStatus::PendingReview
                } else {
                    RunStatus::Analyzing(1)
                },
                via: Via::Stage(1),
            },
        ];

        for k in 1..n {
            edges.push(Edge {
                from: RunStatus::Analyzing(k),
                guard: Guard::Always,
                to: RunStatus::Analyzing(k + 1),
                via: Via::Stage(k as usize + 1),
            });
        }
        if n > 0 {
            edges.push(Edge {
                from: RunStatus::Analyzing(n),
                guard: Guard::Always,
                to: RunStatus::PendingReview,
                via: Via::Stage(gate_slot),
            });
        }

        for decision in DecisionStatus::ALL {
            edges.push(Edge {
                from: RunStatus::PendingReview,
                guard: Guard::Decision(decision),
                to: decision.into(),
                via: Via::Resume,
            });
        }
        edges.push(Edge {
            from: RunStatus::RevisionRequested,
            guard: Guard::Always,
            to: RunStatus::Routing,
            via: Via::ReEntry,
        });

        Self {
            edges,
            analysis_count,
        }
    }

    pub fn analysis_count(&self) -> u32 {
        self.analysis_count
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// How the engine leaves `from`. All edges out of a state share one
    /// `via`; `None` for terminal states.
    pub fn via(&self, from: RunStatus) -> Option<Via> {
        self.edges.iter().find(|e| e.from == from).map(|e| e.via)
    }

    /// Target of the edge out of `from` admitted by `outcome`.
    pub fn next(&self, from: RunStatus, outcome: Guard) -> Option<RunStatus> {
        self.edges
            .iter()
            .find(|e| e.from == from && e.guard.admits(outcome))
            .map(|e| e.to)
    }

    /// Every state reachable from `created`, in discovery order.
    pub fn reachable_states(&self) -> Vec<RunStatus> {
        let mut seen = vec![RunStatus::Created];
        let mut cursor = 0;
        while cursor < seen.len() {
            let from = seen[cursor];
            for edge in self.edges.iter().filter(|e| e.from == from) {
                if !seen.contains(&edge.to) {
                    seen.push(edge.to);
                }
            }
            cursor += 1;
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_stage_graph_path() {
        let graph = StageGraph::new(2);
        assert_eq!(
            graph.next(RunStatus::Created, Guard::Always),
            Some(RunStatus::Running)
        );
        assert_eq!(
            graph.next(RunStatus::Running, Guard::Qualified),
            Some(RunStatus::Routing)
        );
        assert_eq!(
            graph.next(RunStatus::Running, Guard::Disqualified),
            Some(RunStatus::Disqualified)
        );
        assert_eq!(
            graph.next(RunStatus::Routing, Guard::Always),
            Some(RunStatus::Analyzing(1))
        );
        assert_eq!(
            graph.next(RunStatus::Analyzing(1), Guard::Always),
            Some(RunStatus::Analyzing(2))
        );
        assert_eq!(
            graph.next(RunStatus::Analyzing(2), Guard::Always),
            Some(RunStatus::PendingReview)
        );
        assert_eq!(graph.via(RunStatus::Analyzing(2)), Some(Via::Stage(3)));
    }

    #[test]
    fn test_decision_edges_and_revision_loop() {
        let graph = StageGraph::new(2);
        for decision in DecisionStatus::ALL {
            assert_eq!(
                graph.next(RunStatus::PendingReview, Guard::Decision(decision)),
                Some(RunStatus::from(decision))
            );
        }
        assert_eq!(
            graph.next(RunStatus::RevisionRequested, Guard::Always),
            Some(RunStatus::Routing)
        );
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        let graph = StageGraph::new(3);
        for status in [
            RunStatus::Disqualified,
            RunStatus::Approved,
            RunStatus::Rejected,
        ] {
            assert!(graph.via(status).is_none());
            assert!(graph.edges().iter().all(|e| e.from != status));
        }
    }

    #[test]
    fn test_reachable_states_cover_the_pipeline() {
        let graph = StageGraph::new(2);
        let reachable = graph.reachable_states();
        assert_eq!(reachable.len(), 10);
        for status in [
            RunStatus::Created,
            RunStatus::Running,
            RunStatus::Routing,
            RunStatus::Disqualified,
            RunStatus::Analyzing(1),
            RunStatus::Analyzing(2),
            RunStatus::PendingReview,
            RunStatus::Approved,
            RunStatus::Rejected,
            RunStatus::RevisionRequested,
        ] {
            assert!(reachable.contains(&status), "{status} not reachable");
        }
        assert!(!reachable.contains(&RunStatus::Analyzing(3)));
    }

    #[test]
    fn test_no_analysis_stages_routes_straight_to_review() {
        let graph = StageGraph::new(0);
        assert_eq!(
            graph.next(RunStatus::Routing, Guard::Always),
            Some(RunStatus::PendingReview)
        );
        assert_eq!(graph.via(RunStatus::Routing), Some(Via::Stage(1)));
    }
}
