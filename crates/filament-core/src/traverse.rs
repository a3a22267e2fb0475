//! # Traversal Engine
//!
//! The configurable fold-based search over a graph snapshot.
//!
//! A search is a fold: the caller supplies a step function and an initial
//! accumulator, the engine walks identifiers reachable from the start within
//! `max_depth` hops, and the step function both transforms the accumulator
//! and steers navigation (`Continue`/`Skip`/`Stop`).
//!
//! The step function runs on every visited identifier, the start included
//! (depth 0, empty path, `Null` arrival-link metadata); `max_depth` bounds
//! hops beyond the start.

use crate::graph::Graph;
use crate::{FilamentError, Identifier, LinkKey, Metadata};
use std::collections::{BTreeSet, VecDeque};

// =============================================================================
// OPTIONS
// =============================================================================

/// Navigation order of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalOrder {
    /// Process all identifiers at distance d before any at distance d+1.
    #[default]
    Breadth,
    /// Follow one neighbor chain, backtracking when a branch is exhausted.
    Depth,
}

/// Loop-safety constraint of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopDetection {
    /// No constraint. May not terminate on cyclic graphs when `max_depth`
    /// exceeds reachability.
    None,
    /// Each link is traversed at most once per direction of use; an
    /// identifier may still be reached again via a distinct link.
    Link,
    /// Each identifier is visited at most once; first discovery wins.
    #[default]
    Identifier,
}

/// Search options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub order: TraversalOrder,
    /// Hops beyond the start identifier. 0 visits the start only.
    pub max_depth: usize,
    pub loop_detection: LoopDetection,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            order: TraversalOrder::Breadth,
            max_depth: 0,
            loop_detection: LoopDetection::Identifier,
        }
    }
}

impl SearchOptions {
    /// Breadth-first search to the given depth with default loop detection.
    #[must_use]
    pub fn depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }
}

// =============================================================================
// STEP PROTOCOL
// =============================================================================

/// Verdict of a step function invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    /// Accept the accumulator and navigate this identifier's neighbors.
    Continue,
    /// Accept the accumulator but do not navigate past this identifier.
    Skip,
    /// Accept the accumulator and terminate the entire search.
    Stop,
}

/// One hop of the path leading to a visited identifier.
///
/// `link_metadata` is the metadata of the link used to arrive at this entry
/// during the traversal; `Null` for the start identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct PathNode {
    pub identifier: Identifier,
    pub metadata: Metadata,
    pub link_metadata: Metadata,
}

/// What the step function sees at each visited identifier.
///
/// `path` runs from the immediate neighbor that led here back toward the
/// start, nearest first, excluding the current identifier.
#[derive(Debug)]
pub struct StepContext<'a> {
    pub identifier: &'a Identifier,
    pub metadata: &'a Metadata,
    pub link_metadata: &'a Metadata,
    pub path: &'a [PathNode],
}

// =============================================================================
// SEARCH
// =============================================================================

/// A pending visit.
struct Frame {
    identifier: Identifier,
    link_metadata: Metadata,
    path: Vec<PathNode>,
    depth: usize,
}

/// Fold over the identifiers reachable from `start`.
///
/// Returns the final accumulator, or `IdentifierNotFound` if `start` does
/// not exist in the graph. The step function may fail; its error aborts the
/// search and is returned unchanged.
pub fn search<A, F>(
    graph: &Graph,
    mut step: F,
    initial: A,
    start: &Identifier,
    options: &SearchOptions,
) -> Result<A, FilamentError>
where
    F: FnMut(&StepContext<'_>, A) -> Result<(StepControl, A), FilamentError>,
{
    if !graph.contains_identifier(start) {
        return Err(FilamentError::IdentifierNotFound(start.clone()));
    }

    let mut acc = initial;
    let mut visited: BTreeSet<Identifier> = BTreeSet::new();
    let mut used_links: BTreeSet<(Identifier, Identifier)> = BTreeSet::new();
    let mut frontier: VecDeque<Frame> = VecDeque::new();

    if options.loop_detection == LoopDetection::Identifier {
        visited.insert(start.clone());
    }
    frontier.push_back(Frame {
        identifier: start.clone(),
        link_metadata: Metadata::Null,
        path: Vec::new(),
        depth: 0,
    });

    loop {
        let next = match options.order {
            TraversalOrder::Breadth => frontier.pop_front(),
            TraversalOrder::Depth => frontier.pop_back(),
        };
        let Some(frame) = next else {
            break;
        };

        let metadata = graph.metadata(&frame.identifier).cloned().unwrap_or_default();
        let context = StepContext {
            identifier: &frame.identifier,
            metadata: &metadata,
            link_metadata: &frame.link_metadata,
            path: &frame.path,
        };
        let (control, next_acc) = step(&context, acc)?;
        acc = next_acc;

        match control {
            StepControl::Stop => return Ok(acc),
            StepControl::Skip => continue,
            StepControl::Continue => {}
        }
        if frame.depth >= options.max_depth {
            continue;
        }

        // Path seen by the children of this frame: this identifier first,
        // then everything that led here.
        let mut child_path = Vec::with_capacity(frame.path.len() + 1);
        child_path.push(PathNode {
            identifier: frame.identifier.clone(),
            metadata,
            link_metadata: frame.link_metadata.clone(),
        });
        child_path.extend(frame.path.iter().cloned());

        // A stack pops in reverse push order; flip ascending neighbor order
        // so both navigation orders visit neighbors deterministically
        // smallest-first.
        let neighbors: Vec<&Identifier> = match options.order {
            TraversalOrder::Breadth => graph.neighbors(&frame.identifier).collect(),
            TraversalOrder::Depth => graph.neighbors(&frame.identifier).rev().collect(),
        };

        for neighbor in neighbors {
            match options.loop_detection {
                LoopDetection::Identifier => {
                    if !visited.insert(neighbor.clone()) {
                        continue;
                    }
                }
                LoopDetection::Link => {
                    let direction = (frame.identifier.clone(), neighbor.clone());
                    if !used_links.insert(direction) {
                        continue;
                    }
                }
                LoopDetection::None => {}
            }

            let link_metadata = LinkKey::new(frame.identifier.clone(), neighbor.clone())
                .and_then(|key| graph.link_metadata(&key).cloned())
                .unwrap_or_default();

            frontier.push_back(Frame {
                identifier: neighbor.clone(),
                link_metadata,
                path: child_path.clone(),
                depth: frame.depth + 1,
            });
        }
    }

    Ok(acc)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{MutationEngine, PublishEntry, PublishOptions};

    fn id(s: &str) -> Identifier {
        Identifier::new(s)
    }

    /// Path graph a - b - c - d with distinct metadata per node and link.
    fn path_graph() -> Graph {
        let entries = vec![
            PublishEntry::identifier("a", Metadata::str("ma")),
            PublishEntry::identifier("b", Metadata::str("mb")),
            PublishEntry::identifier("c", Metadata::str("mc")),
            PublishEntry::identifier("d", Metadata::str("md")),
            PublishEntry::link("a", "b", Metadata::str("ab")),
            PublishEntry::link("b", "c", Metadata::str("bc")),
            PublishEntry::link("c", "d", Metadata::str("cd")),
        ];
        let (graph, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("seed");
        graph
    }

    /// Cycle a - b - c - a.
    fn cycle_graph() -> Graph {
        let entries = vec![
            PublishEntry::link("a", "b", Metadata::Null),
            PublishEntry::link("b", "c", Metadata::Null),
            PublishEntry::link("a", "c", Metadata::Null),
        ];
        let (graph, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("seed");
        graph
    }

    /// Collect visited identifier names in visit order.
    fn collect_visits(graph: &Graph, start: &str, options: &SearchOptions) -> Vec<String> {
        search(
            graph,
            |ctx, mut acc: Vec<String>| {
                acc.push(ctx.identifier.as_str().to_string());
                Ok((StepControl::Continue, acc))
            },
            Vec::new(),
            &id(start),
            options,
        )
        .expect("search")
    }

    #[test]
    fn missing_start_is_not_found() {
        let graph = path_graph();
        let result = search(
            &graph,
            |_, acc: ()| Ok((StepControl::Continue, acc)),
            (),
            &id("ghost"),
            &SearchOptions::default(),
        );
        assert!(matches!(result, Err(FilamentError::IdentifierNotFound(_))));
    }

    #[test]
    fn zero_depth_visits_start_only() {
        let graph = path_graph();
        let visits = collect_visits(&graph, "a", &SearchOptions::default());
        assert_eq!(visits, vec!["a"]);
    }

    #[test]
    fn zero_depth_observes_start_metadata() {
        let graph = path_graph();
        let acc = search(
            &graph,
            |ctx, _| Ok((StepControl::Continue, ctx.metadata.clone())),
            Metadata::Null,
            &id("a"),
            &SearchOptions::default(),
        )
        .expect("search");
        assert_eq!(acc, Metadata::str("ma"));
    }

    #[test]
    fn depth_bound_limits_reach() {
        let graph = path_graph();

        let one = collect_visits(&graph, "a", &SearchOptions::depth(1));
        assert_eq!(one, vec!["a", "b"]);

        let two = collect_visits(&graph, "a", &SearchOptions::depth(2));
        assert_eq!(two, vec!["a", "b", "c"]);
    }

    #[test]
    fn breadth_order_is_level_order() {
        let graph = path_graph();
        let visits = collect_visits(&graph, "b", &SearchOptions::depth(2));
        // b's neighbors a and c at depth 1, then d at depth 2.
        assert_eq!(visits, vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn depth_order_follows_branches() {
        // Star with two arms: a-b-c and a-d-e.
        let entries = vec![
            PublishEntry::link("a", "b", Metadata::Null),
            PublishEntry::link("b", "c", Metadata::Null),
            PublishEntry::link("a", "d", Metadata::Null),
            PublishEntry::link("d", "e", Metadata::Null),
        ];
        let (graph, _) =
            MutationEngine::apply(&Graph::new(), &entries, &PublishOptions::persistent())
                .expect("seed");

        let options = SearchOptions {
            order: TraversalOrder::Depth,
            max_depth: 3,
            loop_detection: LoopDetection::Identifier,
        };
        let visits = collect_visits(&graph, "a", &options);
        assert_eq!(visits, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn identifier_loop_detection_visits_each_once() {
        let graph = cycle_graph();
        let options = SearchOptions {
            max_depth: 50,
            ..SearchOptions::default()
        };
        let mut visits = collect_visits(&graph, "a", &options);
        visits.sort();
        assert_eq!(visits, vec!["a", "b", "c"]);
    }

    #[test]
    fn no_loop_detection_revisits_start() {
        let graph = cycle_graph();
        let options = SearchOptions {
            max_depth: 3,
            loop_detection: LoopDetection::None,
            ..SearchOptions::default()
        };
        let visits = collect_visits(&graph, "a", &options);
        assert!(visits.iter().filter(|name| name.as_str() == "a").count() > 1);
    }

    #[test]
    fn link_loop_detection_allows_distinct_links_to_same_identifier() {
        let graph = cycle_graph();
        let options = SearchOptions {
            max_depth: 10,
            loop_detection: LoopDetection::Link,
            ..SearchOptions::default()
        };
        let visits = collect_visits(&graph, "a", &options);

        // c is reachable via a-c and via a-b-c: two distinct links, two visits.
        assert_eq!(visits.iter().filter(|name| name.as_str() == "c").count(), 2);
        // But no link direction is ever reused, so the walk terminates.
        assert!(visits.len() <= 1 + 2 * graph.link_count());
    }

    #[test]
    fn skip_prunes_navigation_but_search_continues() {
        let graph = path_graph();
        let acc = search(
            &graph,
            |ctx, mut acc: Vec<String>| {
                acc.push(ctx.identifier.as_str().to_string());
                if ctx.identifier.as_str() == "b" {
                    Ok((StepControl::Skip, acc))
                } else {
                    Ok((StepControl::Continue, acc))
                }
            },
            Vec::new(),
            &id("a"),
            &SearchOptions::depth(3),
        )
        .expect("search");
        // b is visited but never expanded, so c and d stay unreachable.
        assert_eq!(acc, vec!["a", "b"]);
    }

    #[test]
    fn stop_terminates_immediately() {
        let graph = path_graph();
        let acc = search(
            &graph,
            |ctx, mut acc: Vec<String>| {
                acc.push(ctx.identifier.as_str().to_string());
                if ctx.identifier.as_str() == "b" {
                    Ok((StepControl::Stop, acc))
                } else {
                    Ok((StepControl::Continue, acc))
                }
            },
            Vec::new(),
            &id("a"),
            &SearchOptions::depth(3),
        )
        .expect("search");
        assert_eq!(acc, vec!["a", "b"]);
    }

    #[test]
    fn path_runs_nearest_first_and_carries_link_metadata() {
        let graph = path_graph();
        let paths = search(
            &graph,
            |ctx, mut acc: Vec<(String, Vec<String>, String)>| {
                acc.push((
                    ctx.identifier.as_str().to_string(),
                    ctx.path
                        .iter()
                        .map(|node| node.identifier.as_str().to_string())
                        .collect(),
                    match ctx.link_metadata {
                        Metadata::Str(s) => s.clone(),
                        _ => String::new(),
                    },
                ));
                Ok((StepControl::Continue, acc))
            },
            Vec::new(),
            &id("a"),
            &SearchOptions::depth(3),
        )
        .expect("search");

        let by_name = |name: &str| {
            paths
                .iter()
                .find(|(n, _, _)| n == name)
                .cloned()
                .expect("visited")
        };

        let (_, path_a, link_a) = by_name("a");
        assert!(path_a.is_empty());
        assert!(link_a.is_empty());

        let (_, path_c, link_c) = by_name("c");
        assert_eq!(path_c, vec!["b", "a"]);
        assert_eq!(link_c, "bc");

        let (_, path_d, _) = by_name("d");
        assert_eq!(path_d, vec!["c", "b", "a"]);
    }

    #[test]
    fn step_error_aborts_search() {
        let graph = path_graph();
        let result = search(
            &graph,
            |ctx, acc: ()| {
                if ctx.identifier.as_str() == "b" {
                    Err(FilamentError::Callback("boom".to_string()))
                } else {
                    Ok((StepControl::Continue, acc))
                }
            },
            (),
            &id("a"),
            &SearchOptions::depth(3),
        );
        assert!(matches!(result, Err(FilamentError::Callback(_))));
    }
}
