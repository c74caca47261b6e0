//! Prerequisite graph validation
//!
//! Strips edges that point at template placeholders, at the lesson itself, at
//! lessons that do not exist, or that repeat an earlier entry. Cycles are
//! reported and never broken automatically.

use crate::report::{PassSummary, Summarize};
use lessonstore_common::config::DEFAULT_PLACEHOLDER_PREFIXES;
use lessonstore_common::db::load_lesson_rows;
use lessonstore_common::document::{encode_prerequisites, LessonDocument};
use lessonstore_common::{uuid_utils, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use tracing::{info, warn};

/// Identifier prefixes reserved for template content
///
/// Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderPolicy {
    prefixes: Vec<String>,
}

impl PlaceholderPolicy {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_placeholder(&self, id: &str) -> bool {
        let id = id.to_lowercase();
        self.prefixes.iter().any(|p| id.starts_with(p.as_str()))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER_PREFIXES)
    }
}

/// Why a prerequisite edge was removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StripReason {
    Placeholder,
    SelfReference,
    Dangling,
    Repeated,
}

impl fmt::Display for StripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StripReason::Placeholder => "placeholder",
            StripReason::SelfReference => "self-reference",
            StripReason::Dangling => "dangling",
            StripReason::Repeated => "repeated",
        };
        f.write_str(name)
    }
}

/// A removed prerequisite edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedEdge {
    pub lesson_id: String,
    pub target: String,
    pub reason: StripReason,
}

impl fmt::Display for StrippedEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.lesson_id, self.target, self.reason)
    }
}

/// Every lesson taking part in a prerequisite cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleViolation {
    pub lesson_id: String,
    /// Members of the cycle, sorted
    pub cycle: Vec<String>,
}

impl fmt::Display for CycleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is in cycle [{}]", self.lesson_id, self.cycle.join(", "))
    }
}

/// Outcome of a prerequisite pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrerequisiteReport {
    pub lessons_checked: usize,
    pub edges_checked: usize,
    pub edges_kept: usize,
    pub lessons_changed: usize,
    pub stripped: Vec<StrippedEdge>,
    pub cycles: Vec<CycleViolation>,
    pub errored: usize,
}

impl PrerequisiteReport {
    pub fn count(&self, reason: StripReason) -> usize {
        self.stripped.iter().filter(|e| e.reason == reason).count()
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

impl Summarize for PrerequisiteReport {
    fn summary(&self) -> PassSummary {
        PassSummary {
            repaired: self.lessons_changed,
            deleted: self.stripped.len(),
            skipped: self.edges_kept,
            errored: self.errored + self.cycles.len(),
            ..PassSummary::new("validate-prereqs")
        }
    }
}

/// Filter one lesson's prerequisite list
///
/// Identifiers are compared by [`uuid_utils::identity_key`], so `known` holds
/// identity keys. Kept entries are returned verbatim and in their original
/// order. With `known = None` the dangling check is skipped.
pub fn filter_prerequisites(
    lesson_id: &str,
    prerequisites: &[String],
    known: Option<&HashSet<String>>,
    policy: &PlaceholderPolicy,
) -> (Vec<String>, Vec<StrippedEdge>) {
    let mut kept = Vec::new();
    let mut stripped = Vec::new();
    let mut seen = HashSet::new();
    let lesson_key = uuid_utils::identity_key(lesson_id);

    for target in prerequisites {
        let key = uuid_utils::identity_key(target);
        let reason = if policy.is_placeholder(target) {
            Some(StripReason::Placeholder)
        } else if key == lesson_key {
            Some(StripReason::SelfReference)
        } else if !seen.insert(key.clone()) {
            Some(StripReason::Repeated)
        } else if known.is_some_and(|k| !k.contains(&key)) {
            Some(StripReason::Dangling)
        } else {
            None
        };

        match reason {
            Some(reason) => stripped.push(StrippedEdge {
                lesson_id: lesson_id.to_string(),
                target: target.clone(),
                reason,
            }),
            None => kept.push(target.clone()),
        }
    }

    (kept, stripped)
}

/// Strongly connected components of the prerequisite graph that form cycles
///
/// Returns one violation per lesson in a cycle, sorted by lesson id. A lesson
/// listing itself counts as a cycle of one.
pub fn detect_cycles(edges: &BTreeMap<String, Vec<String>>) -> Vec<CycleViolation> {
    let mut nodes: BTreeSet<&str> = BTreeSet::new();
    for (lesson, targets) in edges {
        nodes.insert(lesson);
        nodes.extend(targets.iter().map(String::as_str));
    }
    let nodes: Vec<&str> = nodes.into_iter().collect();
    let position = |id: &str| nodes.binary_search(&id).ok();

    let adjacency: Vec<Vec<usize>> = nodes
        .iter()
        .map(|node| {
            edges
                .get(*node)
                .map(|targets| targets.iter().filter_map(|t| position(t.as_str())).collect())
                .unwrap_or_default()
        })
        .collect();

    let mut violations = Vec::new();
    for component in strongly_connected(&adjacency) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&v| adjacency[v].contains(&v));
        if !is_cycle {
            continue;
        }

        let mut members: Vec<String> = component.iter().map(|&v| nodes[v].to_string()).collect();
        members.sort();
        for member in &members {
            violations.push(CycleViolation {
                lesson_id: member.clone(),
                cycle: members.clone(),
            });
        }
    }

    violations.sort_by(|a, b| a.lesson_id.cmp(&b.lesson_id));
    violations
}

/// Tarjan's algorithm with an explicit call stack
fn strongly_connected(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    for start in 0..n {
        if index[start].is_some() {
            continue;
        }

        index[start] = Some(next_index);
        lowlink[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;
        let mut call: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(&(v, child)) = call.last() {
            if child < adjacency[v].len() {
                if let Some(frame) = call.last_mut() {
                    frame.1 += 1;
                }
                let w = adjacency[v][child];
                match index[w] {
                    None => {
                        index[w] = Some(next_index);
                        lowlink[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    }
                    Some(w_index) if on_stack[w] => {
                        lowlink[v] = lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if index[v] == Some(lowlink[v]) {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

/// Validates prerequisite edges
pub struct PrerequisiteGraphValidator;

impl PrerequisiteGraphValidator {
    /// Document stage: strip placeholder, self and repeated edges in place
    ///
    /// Dangling edges cannot be judged before the corpus is stored.
    pub fn validate_documents(docs: &mut [LessonDocument], policy: &PlaceholderPolicy) -> PrerequisiteReport {
        let mut report = PrerequisiteReport::default();

        for doc in docs.iter_mut() {
            report.lessons_checked += 1;
            report.edges_checked += doc.prerequisites.len();

            let (kept, stripped) = filter_prerequisites(&doc.lesson_id, &doc.prerequisites, None, policy);
            report.edges_kept += kept.len();
            if !stripped.is_empty() {
                report.lessons_changed += 1;
                doc.prerequisites = kept;
                report.stripped.extend(stripped);
            }
        }

        for edge in &report.stripped {
            info!("  Stripped {}", edge);
        }
        report
    }

    /// Store stage: strip invalid edges from every stored lesson in one transaction
    ///
    /// With `check_cycles`, the surviving graph is searched for cycles. Found
    /// cycles are reported; the stripped edges are committed regardless.
    pub async fn validate_store(
        pool: &SqlitePool,
        policy: &PlaceholderPolicy,
        check_cycles: bool,
    ) -> Result<PrerequisiteReport> {
        info!("=== Prerequisite validation ===");
        let mut tx = pool.begin().await?;

        let rows = load_lesson_rows(&mut tx).await?;
        let known: HashSet<String> = rows.iter().map(|r| uuid_utils::identity_key(&r.lesson_id)).collect();
        let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut report = PrerequisiteReport::default();

        for row in &rows {
            report.lessons_checked += 1;

            let prerequisites = match row.prerequisite_ids() {
                Ok(prerequisites) => prerequisites,
                Err(e) => {
                    warn!(
                        row_id = row.row_id,
                        lesson_id = %row.lesson_id,
                        "Prerequisites not decodable, left unchanged: {}",
                        e
                    );
                    report.errored += 1;
                    continue;
                }
            };
            report.edges_checked += prerequisites.len();

            let (kept, stripped) =
                filter_prerequisites(&row.lesson_id, &prerequisites, Some(&known), policy);
            report.edges_kept += kept.len();

            if !stripped.is_empty() || row.prerequisites.is_none() {
                sqlx::query("UPDATE lessons SET prerequisites = ? WHERE id = ?")
                    .bind(encode_prerequisites(&kept)?)
                    .bind(row.row_id)
                    .execute(&mut *tx)
                    .await?;
            }
            if !stripped.is_empty() {
                report.lessons_changed += 1;
                report.stripped.extend(stripped);
            }

            edges
                .entry(uuid_utils::identity_key(&row.lesson_id))
                .or_default()
                .extend(kept.iter().map(|target| uuid_utils::identity_key(target)));
        }

        tx.commit().await?;

        for edge in &report.stripped {
            info!("  Stripped {}", edge);
        }

        if check_cycles {
            report.cycles = detect_cycles(&edges);
            for violation in &report.cycles {
                warn!("  Cycle: {}", violation);
            }
        }

        info!(
            stripped = report.stripped.len(),
            placeholder = report.count(StripReason::Placeholder),
            dangling = report.count(StripReason::Dangling),
            cycles = report.cycles.len(),
            "Prerequisite validation complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn graph(edges: &[(&str, &str)]) -> BTreeMap<String, Vec<String>> {
        let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, to) in edges {
            graph.entry(from.to_string()).or_default().push(to.to_string());
        }
        graph
    }

    #[test]
    fn test_placeholder_matching_is_case_insensitive() {
        let policy = PlaceholderPolicy::default();
        assert!(policy.is_placeholder("bt000000-0000-4000-8000-000000000001"));
        assert!(policy.is_placeholder("BT000000-0000-4000-8000-000000000001"));
        assert!(!policy.is_placeholder("a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d"));
    }

    #[test]
    fn test_empty_prefixes_ignored() {
        let policy = PlaceholderPolicy::new(["", "  ", "TMPL-"]);
        assert_eq!(policy.prefixes(), &["tmpl-".to_string()]);
        assert!(!policy.is_placeholder("anything"));
    }

    #[test]
    fn test_filter_reasons_and_order() {
        let known: HashSet<String> = ["L1", "L2", "L3"].iter().map(|s| s.to_string()).collect();
        let policy = PlaceholderPolicy::default();
        let (kept, stripped) = filter_prerequisites(
            "L1",
            &ids(&["L3", "bt000000-x", "L1", "L2", "L3", "L9"]),
            Some(&known),
            &policy,
        );

        assert_eq!(kept, ids(&["L3", "L2"]));
        let reasons: Vec<StripReason> = stripped.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec![
                StripReason::Placeholder,
                StripReason::SelfReference,
                StripReason::Repeated,
                StripReason::Dangling
            ]
        );
    }

    #[test]
    fn test_spellings_of_one_uuid_compare_equal() {
        let lesson = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";
        let target = "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d6e";
        let known: HashSet<String> = [lesson, target].iter().map(|s| s.to_string()).collect();
        let braced = format!("{{{}}}", target);
        let upper = target.to_uppercase();
        let own = lesson.to_uppercase();

        let (kept, stripped) = filter_prerequisites(
            lesson,
            &ids(&[braced.as_str(), upper.as_str(), own.as_str()]),
            Some(&known),
            &PlaceholderPolicy::default(),
        );

        assert_eq!(kept, vec![braced.clone()]);
        let reasons: Vec<StripReason> = stripped.iter().map(|e| e.reason).collect();
        assert_eq!(reasons, vec![StripReason::Repeated, StripReason::SelfReference]);
    }

    #[test]
    fn test_document_stage_keeps_unknown_targets() {
        let policy = PlaceholderPolicy::default();
        let (kept, stripped) = filter_prerequisites("L1", &ids(&["L9"]), None, &policy);
        assert_eq!(kept, ids(&["L9"]));
        assert!(stripped.is_empty());
    }

    #[test]
    fn test_acyclic_graph_has_no_violations() {
        let edges = graph(&[("C", "B"), ("B", "A"), ("C", "A")]);
        assert!(detect_cycles(&edges).is_empty());
    }

    #[test]
    fn test_cycle_members_reported() {
        let edges = graph(&[("A", "C"), ("B", "A"), ("C", "B"), ("D", "A")]);
        let violations = detect_cycles(&edges);

        let lessons: Vec<&str> = violations.iter().map(|v| v.lesson_id.as_str()).collect();
        assert_eq!(lessons, vec!["A", "B", "C"]);
        assert!(violations.iter().all(|v| v.cycle == ids(&["A", "B", "C"])));
    }

    #[test]
    fn test_self_loop_is_cycle() {
        let edges = graph(&[("A", "A"), ("B", "A")]);
        let violations = detect_cycles(&edges);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].cycle, ids(&["A"]));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let names: Vec<String> = (0..20_000).map(|i| format!("L{:05}", i)).collect();
        let mut edges = BTreeMap::new();
        for pair in names.windows(2) {
            edges.insert(pair[0].clone(), vec![pair[1].clone()]);
        }
        assert!(detect_cycles(&edges).is_empty());

        let last = names.len() - 1;
        edges.insert(names[last].clone(), vec![names[last - 2].clone()]);
        let violations = detect_cycles(&edges);
        assert_eq!(violations.len(), 3);
        assert_eq!(violations[0].cycle, names[last - 2..].to_vec());
    }
}
