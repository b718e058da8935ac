//! `TaskPlanner`: size estimation, chunk/no-chunk decision, and (when the
//! prompt suggests ordering between subtasks) dependency analysis with a
//! topological sort, grounded on `planning::decomposer`'s title-to-id
//! dependency resolution and `loop::manager::validate_dependency_graph`'s
//! DFS cycle check.

mod dependency;
mod sizing;

pub use dependency::{DependencyAnalysis, DependencyEdge};
pub use sizing::{SizeCategory, SizeEstimation};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Single,
    Sequential,
    Parallel,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingRecommendation {
    pub should_chunk: bool,
    pub subtask_prompts: Vec<String>,
    pub execution_mode: ExecutionStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub size_estimation: SizeEstimation,
    pub chunking_recommendation: ChunkingRecommendation,
    pub execution_strategy: ExecutionStrategy,
    pub dependency_analysis: Option<DependencyAnalysis>,
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub auto_chunk: bool,
    pub min_subtasks: usize,
    pub max_subtasks: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            auto_chunk: true,
            min_subtasks: 2,
            max_subtasks: 10,
        }
    }
}

pub struct TaskPlanner {
    config: PlannerConfig,
}

impl TaskPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Build a full `ExecutionPlan` for a prompt: estimate size, decide
    /// whether to chunk, and (if chunked) analyze dependencies between the
    /// extracted subtasks.
    pub fn plan(&self, prompt: &str) -> ExecutionPlan {
        let plan_id = Uuid::new_v4().to_string();
        let size_estimation = sizing::estimate_size(prompt);
        let subtask_prompts = sizing::extract_subtasks(prompt);

        let has_enough_subtasks =
            subtask_prompts.len() >= self.config.min_subtasks && subtask_prompts.len() <= self.config.max_subtasks;
        let indicator_count = sizing::count_decomposition_indicators(prompt);
        let size_warrants_chunking = matches!(size_estimation.size_category, SizeCategory::M | SizeCategory::L | SizeCategory::Xl);

        let should_chunk =
            self.config.auto_chunk && has_enough_subtasks && (size_warrants_chunking || indicator_count >= 2);

        let dependency_analysis = if should_chunk { Some(dependency::analyze(&subtask_prompts)) } else { None };

        let execution_mode = if !should_chunk {
            ExecutionStrategy::Single
        } else if let Some(analysis) = &dependency_analysis {
            if analysis.has_cycles {
                ExecutionStrategy::Sequential
            } else if analysis.edges.is_empty() {
                ExecutionStrategy::Parallel
            } else {
                ExecutionStrategy::Sequential
            }
        } else {
            ExecutionStrategy::Parallel
        };

        ExecutionPlan {
            plan_id,
            size_estimation,
            chunking_recommendation: ChunkingRecommendation {
                should_chunk,
                subtask_prompts,
                execution_mode,
            },
            execution_strategy: execution_mode,
            dependency_analysis,
        }
    }
}
