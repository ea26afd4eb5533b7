//! The produces/consumes graph between templates.
//!
//! Shared by the validator, which needs its errors, and the executor, which
//! needs its topological order and transitive dependents.

use std::collections::{BTreeSet, HashMap, VecDeque};

use super::types::{is_reserved_parameter_name, Pipeline};
use crate::error::PipelineLogicError;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Parameter name -> index of the template producing it.
    producers: HashMap<String, usize>,
    /// Template index -> indices of templates it waits on.
    dependencies: Vec<BTreeSet<usize>>,
    /// Template index -> indices of templates waiting on it.
    dependents: Vec<BTreeSet<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph and check that every consumed parameter is available.
    pub fn build(pipeline: &Pipeline) -> Result<Self, PipelineLogicError> {
        let mut producers: HashMap<String, usize> = HashMap::new();
        for (index, template) in pipeline.templates.iter().enumerate() {
            let parameter = &template.resulting_parameter_name;
            if let Some(&first) = producers.get(parameter) {
                return Err(PipelineLogicError::ParameterProducedTwice {
                    parameter: parameter.clone(),
                    first: pipeline.templates[first].name.clone(),
                    second: template.name.clone(),
                });
            }
            if pipeline.parameter(parameter).is_some_and(|p| p.is_input) {
                return Err(PipelineLogicError::InputParameterProduced {
                    parameter: parameter.clone(),
                    template: template.name.clone(),
                });
            }
            producers.insert(parameter.clone(), index);
        }

        let count = pipeline.templates.len();
        let mut dependencies = vec![BTreeSet::new(); count];
        let mut dependents = vec![BTreeSet::new(); count];

        for (index, template) in pipeline.templates.iter().enumerate() {
            for name in &template.dependent_parameter_names {
                if is_reserved_parameter_name(name) {
                    continue;
                }
                match producers.get(name) {
                    Some(&producer) => {
                        dependencies[index].insert(producer);
                        dependents[producer].insert(index);
                    }
                    None if pipeline.parameter(name).is_some_and(|p| p.is_input) => {}
                    None => {
                        return Err(PipelineLogicError::MissingParameter {
                            template: template.name.clone(),
                            parameter: name.clone(),
                        })
                    }
                }
            }
        }

        let mut graph = Self {
            producers,
            dependencies,
            dependents,
            order: Vec::new(),
        };
        graph.order = graph.topological_order(pipeline)?;

        for output in pipeline.output_parameters() {
            if !output.is_input && !graph.producers.contains_key(&output.name) {
                return Err(PipelineLogicError::OutputNotProduced(output.name.clone()));
            }
        }

        Ok(graph)
    }

    /// Kahn's algorithm; ties resolved by declaration order.
    fn topological_order(&self, pipeline: &Pipeline) -> Result<Vec<usize>, PipelineLogicError> {
        let mut remaining: Vec<usize> = self.dependencies.iter().map(BTreeSet::len).collect();
        let mut ready: VecDeque<usize> = (0..remaining.len()).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(remaining.len());

        while let Some(index) = ready.pop_front() {
            order.push(index);
            for &dependent in &self.dependents[index] {
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() == remaining.len() {
            Ok(order)
        } else {
            Err(PipelineLogicError::CircularDependency(self.find_cycle(pipeline, &remaining)))
        }
    }

    /// Walk dependencies among unresolved templates until one repeats.
    fn find_cycle(&self, pipeline: &Pipeline, remaining: &[usize]) -> Vec<String> {
        let Some(start) = remaining.iter().position(|&r| r > 0) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let Some(&next) = self.dependencies[current].iter().find(|&&d| remaining[d] > 0) else {
                break;
            };
            if let Some(position) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> = path[position..]
                    .iter()
                    .map(|&i| pipeline.templates[i].name.clone())
                    .collect();
                cycle.push(pipeline.templates[next].name.clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|&i| pipeline.templates[i].name.clone()).collect()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn producer_of(&self, parameter: &str) -> Option<usize> {
        self.producers.get(parameter).copied()
    }

    pub fn dependencies(&self, template: usize) -> &BTreeSet<usize> {
        &self.dependencies[template]
    }

    pub fn dependents(&self, template: usize) -> &BTreeSet<usize> {
        &self.dependents[template]
    }

    /// Every template that directly or indirectly consumes the output of `template`.
    pub fn transitive_dependents(&self, template: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents[template].iter().copied().collect();
        while let Some(index) = queue.pop_front() {
            if seen.insert(index) {
                queue.extend(self.dependents[index].iter().copied());
            }
        }
        seen
    }
}
