//! Compiles a [`PipelineDefinition`] into ordered stages.
//!
//! A task's stage is one more than the highest stage among its
//! dependencies, and 0 for tasks without any. This is longest-path
//! numbering: independent branches that reach the same depth share a
//! stage and run in parallel.

use super::{PipelineDefinition, TaskNode};
use crate::errors::{ConfigurationError, CycleDetectedError};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A task with its compiler-assigned stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTask {
    /// The declaration.
    pub node: TaskNode,
    /// The assigned stage.
    pub stage: usize,
    /// Dependencies with duplicates removed, in declaration order.
    pub dependencies: Vec<String>,
}

impl CompiledTask {
    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }
}

/// The immutable, stage-ordered form of a pipeline.
#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    name: String,
    tasks: Vec<CompiledTask>,
    index: HashMap<String, usize>,
    stages: Vec<Vec<String>>,
    gates: BTreeMap<u32, String>,
}

impl CompiledPipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns task names grouped by stage; within a stage, in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// Returns all tasks in declaration order.
    #[must_use]
    pub fn tasks(&self) -> &[CompiledTask] {
        &self.tasks
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the pipeline has no tasks. Never true once compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns the task named `name`.
    #[must_use]
    pub fn task(&self, name: &str) -> Option<&CompiledTask> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    /// Returns the stage of `name`.
    #[must_use]
    pub fn stage_of(&self, name: &str) -> Option<usize> {
        self.task(name).map(|task| task.stage)
    }

    /// Returns the quality gate numbered `number`.
    #[must_use]
    pub fn gate(&self, number: u32) -> Option<&CompiledTask> {
        self.gates.get(&number).and_then(|name| self.task(name))
    }

    /// Iterates over quality gates by ascending gate number.
    pub fn gates(&self) -> impl Iterator<Item = &CompiledTask> {
        self.gates.values().filter_map(|name| self.task(name))
    }

    /// Returns every task `name` transitively depends on.
    #[must_use]
    pub fn ancestors(&self, name: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            if let Some(task) = self.task(current) {
                for dep in &task.dependencies {
                    if seen.insert(dep.clone()) {
                        stack.push(dep);
                    }
                }
            }
        }
        seen
    }
}

/// Validates `definition` and assigns stages.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] for an empty pipeline, duplicate
/// names, self or unknown dependencies, inconsistent gate metadata, or a
/// dependency cycle.
pub fn compile(definition: &PipelineDefinition) -> Result<CompiledPipeline, ConfigurationError> {
    if definition.tasks.is_empty() {
        return Err(ConfigurationError::coded(
            "CONFIG-EMPTY",
            definition.name.clone(),
            "Pipeline has no tasks",
        ));
    }

    let mut index = HashMap::new();
    for (i, task) in definition.tasks.iter().enumerate() {
        if index.insert(task.name.clone(), i).is_some() {
            return Err(ConfigurationError::coded(
                "CONFIG-DUPLICATE",
                &task.name,
                format!("Task '{}' is declared more than once", task.name),
            ));
        }
    }

    let mut dependencies: Vec<Vec<String>> = Vec::with_capacity(definition.tasks.len());
    for task in &definition.tasks {
        let mut deps: Vec<String> = Vec::new();
        for dep in &task.dependencies {
            if dep == &task.name {
                return Err(ConfigurationError::coded(
                    "CONFIG-SELF_DEP",
                    &task.name,
                    format!("Task '{}' cannot depend on itself", task.name),
                ));
            }
            if !index.contains_key(dep) {
                return Err(ConfigurationError::coded(
                    "CONFIG-MISSING_DEP",
                    &task.name,
                    format!("Task '{}' depends on unknown task '{dep}'", task.name),
                )
                .with_tasks(vec![task.name.clone(), dep.clone()]));
            }
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        dependencies.push(deps);
    }

    let gates = validate_gates(definition)?;
    let order = topological_order(definition, &index, &dependencies)?;

    let mut stage_of = vec![0usize; definition.tasks.len()];
    for &i in &order {
        stage_of[i] = dependencies[i]
            .iter()
            .map(|dep| stage_of[index[dep]] + 1)
            .max()
            .unwrap_or(0);
    }

    let stage_count = stage_of.iter().max().map_or(0, |max| max + 1);
    let mut stages = vec![Vec::new(); stage_count];
    let tasks: Vec<CompiledTask> = definition
        .tasks
        .iter()
        .zip(dependencies)
        .zip(&stage_of)
        .map(|((node, dependencies), &stage)| {
            stages[stage].push(node.name.clone());
            CompiledTask {
                node: node.clone(),
                stage,
                dependencies,
            }
        })
        .collect();

    tracing::debug!(
        pipeline = %definition.name,
        tasks = tasks.len(),
        stages = stages.len(),
        "Compiled pipeline"
    );

    Ok(CompiledPipeline {
        name: definition.name.clone(),
        tasks,
        index,
        stages,
        gates,
    })
}

fn validate_gates(definition: &PipelineDefinition) -> Result<BTreeMap<u32, String>, ConfigurationError> {
    let mut gates = BTreeMap::new();
    for task in &definition.tasks {
        match (&task.gate, task.is_quality_gate()) {
            (None, true) => {
                return Err(ConfigurationError::coded(
                    "CONFIG-GATE",
                    &task.name,
                    format!("Quality gate '{}' has no gate number", task.name),
                ));
            }
            (Some(_), false) => {
                return Err(ConfigurationError::coded(
                    "CONFIG-GATE",
                    &task.name,
                    format!("Task '{}' carries gate metadata but is not a quality gate", task.name),
                ));
            }
            (Some(gate), true) => {
                if let Some(audited) = &gate.audits {
                    if definition.task(audited).is_none() {
                        return Err(ConfigurationError::coded(
                            "CONFIG-GATE",
                            &task.name,
                            format!("Quality gate '{}' audits unknown task '{audited}'", task.name),
                        ));
                    }
                }
                if let Some(other) = gates.insert(gate.number, task.name.clone()) {
                    return Err(ConfigurationError::coded(
                        "CONFIG-GATE",
                        &task.name,
                        format!(
                            "Gate number {} is used by both '{other}' and '{}'",
                            gate.number, task.name
                        ),
                    ));
                }
            }
            (None, false) => {}
        }
    }
    Ok(gates)
}

/// Returns task indices with every dependency before its dependents.
fn topological_order(
    definition: &PipelineDefinition,
    index: &HashMap<String, usize>,
    dependencies: &[Vec<String>],
) -> Result<Vec<usize>, CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut in_progress = HashSet::new();
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(definition.tasks.len());

    for i in 0..definition.tasks.len() {
        if !visited.contains(&i) {
            dfs(i, definition, index, dependencies, &mut visited, &mut in_progress, &mut path, &mut order)?;
        }
    }
    Ok(order)
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    node: usize,
    definition: &PipelineDefinition,
    index: &HashMap<String, usize>,
    dependencies: &[Vec<String>],
    visited: &mut HashSet<usize>,
    in_progress: &mut HashSet<usize>,
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), CycleDetectedError> {
    visited.insert(node);
    in_progress.insert(node);
    path.push(node);

    for dep in &dependencies[node] {
        let dep = index[dep];
        if in_progress.contains(&dep) {
            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|&n| definition.tasks[n].name.clone())
                .collect();
            cycle.push(definition.tasks[dep].name.clone());
            return Err(CycleDetectedError::new(cycle));
        }
        if !visited.contains(&dep) {
            dfs(dep, definition, index, dependencies, visited, in_progress, path, order)?;
        }
    }

    path.pop();
    in_progress.remove(&node);
    order.push(node);
    Ok(())
}
