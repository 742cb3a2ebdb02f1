//! Static workflow validation
//!
//! Every check runs and all findings are collected. Graph checks (cycles and
//! reachability) follow every edge type: linear, success, failure and
//! conditional branch targets.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::entity::{Workflow, WorkflowStep, CONDITION_PARAM};
use super::error::WorkflowError;
use super::expression::ExpressionEngine;
use super::template::TemplateEngine;

/// Outcome of validating a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Convert into a `Result`, joining all errors into one validation error
    pub fn into_result(self) -> Result<(), WorkflowError> {
        if self.valid {
            Ok(())
        } else {
            Err(WorkflowError::validation(self.errors.join("; ")))
        }
    }
}

/// Pure validator over workflow definitions
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn validate(workflow: &Workflow) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        check_step_count(workflow, &mut errors);
        check_duplicates(workflow, &mut errors);

        let ids: HashSet<&str> = workflow.steps().iter().map(WorkflowStep::id).collect();

        let entry_exists = ids.contains(workflow.entry_step_id());
        if !entry_exists && !workflow.is_empty() {
            errors.push(format!(
                "Entry step '{}' does not exist",
                workflow.entry_step_id()
            ));
        }

        check_references(workflow, &ids, &mut errors);

        // Graph traversals need a starting point
        if entry_exists {
            let graph = StepGraph::new(workflow, &ids);
            errors.extend(graph.find_cycles(workflow.entry_step_id()));
            errors.extend(graph.find_unreachable(workflow.entry_step_id()));
        }

        for step in workflow.steps() {
            collect_step_warnings(step, &mut warnings);
        }

        ValidationResult::from_findings(errors, warnings)
    }
}

fn check_step_count(workflow: &Workflow, errors: &mut Vec<String>) {
    if workflow.is_empty() {
        errors.push("Workflow must contain at least one step".to_string());
    } else if workflow.step_count() > workflow.max_steps() {
        errors.push(format!(
            "Workflow has {} steps, exceeding maxSteps of {}",
            workflow.step_count(),
            workflow.max_steps()
        ));
    }
}

fn check_duplicates(workflow: &Workflow, errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();

    for step in workflow.steps() {
        if !seen.insert(step.id()) && reported.insert(step.id()) {
            errors.push(format!("Duplicate step id '{}'", step.id()));
        }
    }
}

fn check_references(workflow: &Workflow, ids: &HashSet<&str>, errors: &mut Vec<String>) {
    for step in workflow.steps() {
        let edges = [
            ("nextStepId", step.next_step_id()),
            ("onSuccess", step.on_success()),
            ("onFailure", step.on_failure()),
        ];

        let branches = step
            .branch_targets()
            .into_iter()
            .map(|target| ("branch target", Some(target)));

        for (field, target) in edges.into_iter().chain(branches) {
            if let Some(target) = target {
                if !ids.contains(target) {
                    errors.push(format!(
                        "Step '{}' references non-existent step '{}' in {}",
                        step.id(),
                        target,
                        field
                    ));
                }
            }
        }
    }
}

fn collect_step_warnings(step: &WorkflowStep, warnings: &mut Vec<String>) {
    if step.retry().is_some_and(|retry| retry.max_attempts == 0) {
        warnings.push(format!(
            "Step '{}' has retry.maxAttempts of 0; it will be attempted once",
            step.id()
        ));
    }

    if !step.is_conditional() {
        return;
    }

    if step.next_step_id().is_some() || step.on_success().is_some() {
        warnings.push(format!(
            "Conditional step '{}' declares nextStepId/onSuccess, which are ignored in favor of its branches",
            step.id()
        ));
    }

    match step.params().get(CONDITION_PARAM).and_then(|c| c.as_str()) {
        None => warnings.push(format!(
            "Conditional step '{}' has no condition",
            step.id()
        )),
        // Templated conditions can only be checked once resolved
        Some(condition) if TemplateEngine::has_placeholders(condition) => {
            if !is_single_placeholder(condition) {
                warnings.push(format!(
                    "Conditional step '{}' embeds placeholders in its condition; substituted values are parsed as expression syntax, reference paths directly instead",
                    step.id()
                ));
            }
        }
        Some(condition) => {
            if let Err(e) = ExpressionEngine::parse(condition) {
                warnings.push(format!(
                    "Conditional step '{}' has a condition that does not parse ({}); it will evaluate to false",
                    step.id(),
                    e
                ));
            }
        }
    }
}

/// A condition supplied whole by one placeholder, e.g. `{{input.rule}}`
fn is_single_placeholder(condition: &str) -> bool {
    let trimmed = condition.trim();
    trimmed.starts_with("{{")
        && trimmed.ends_with("}}")
        && TemplateEngine::extract_paths(trimmed).len() == 1
}

/// Adjacency view over existing steps; dangling edges are dropped
struct StepGraph<'a> {
    edges: HashMap<&'a str, Vec<&'a str>>,
    order: Vec<&'a str>,
}

impl<'a> StepGraph<'a> {
    fn new(workflow: &'a Workflow, ids: &HashSet<&str>) -> Self {
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut order = Vec::new();

        for step in workflow.steps() {
            if edges.contains_key(step.id()) {
                continue;
            }
            let targets = step
                .outgoing_edges()
                .into_iter()
                .filter(|target| ids.contains(target))
                .collect();
            edges.insert(step.id(), targets);
            order.push(step.id());
        }

        Self { edges, order }
    }

    fn successors(&self, id: &str) -> &[&'a str] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterative depth-first search; each frame holds a step and the index
    /// of its next successor to explore
    fn find_cycles(&self, entry: &'a str) -> Vec<String> {
        let mut cycles = Vec::new();
        let mut visited = HashSet::from([entry]);
        let mut on_path = HashMap::from([(entry, 0usize)]);
        let mut frames: Vec<(&'a str, usize)> = vec![(entry, 0)];

        while let Some(frame) = frames.last_mut() {
            let id = frame.0;
            let next = self.successors(id).get(frame.1).copied();
            frame.1 += 1;

            let Some(next) = next else {
                frames.pop();
                on_path.remove(id);
                continue;
            };

            if let Some(&position) = on_path.get(next) {
                let mut path: Vec<&str> = frames[position..].iter().map(|(s, _)| *s).collect();
                path.push(next);
                cycles.push(format!("Cycle detected: {}", path.join(" -> ")));
            } else if visited.insert(next) {
                on_path.insert(next, frames.len());
                frames.push((next, 0));
            }
        }

        cycles
    }

    fn find_unreachable(&self, entry: &'a str) -> Vec<String> {
        let mut visited = HashSet::from([entry]);
        let mut queue = VecDeque::from([entry]);

        while let Some(id) = queue.pop_front() {
            for next in self.successors(id) {
                if visited.insert(*next) {
                    queue.push_back(*next);
                }
            }
        }

        self.order
            .iter()
            .filter(|id| !visited.contains(*id))
            .map(|id| format!("Step '{}' is unreachable from entry step '{}'", id, entry))
            .collect()
    }
}
