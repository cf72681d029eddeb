//! Applying a parameter vector to an isolated design context.

use async_trait::async_trait;
use serde::Serialize;

use crate::compute::evolution::EvaluationError;
use crate::schema::ParamVector;

use super::{DesignMutator, EvaluationContext};

/// Name of the file written into every evaluation directory.
pub const PARAMETER_FILE: &str = "parameters.json";

#[derive(Serialize)]
struct DesignFile<'a> {
    evaluation: u64,
    project: &'a str,
    target: Option<&'a str>,
    pattern: Option<&'a str>,
    parameters: &'a ParamVector,
}

/// Writes the parameter vector to `parameters.json` in the evaluation
/// directory, where the simulation script picks it up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterFileWriter;

#[async_trait]
impl DesignMutator for ParameterFileWriter {
    async fn apply(
        &self,
        context: &EvaluationContext,
        params: &ParamVector,
    ) -> Result<(), EvaluationError> {
        let file = DesignFile {
            evaluation: context.id,
            project: &context.project_name,
            target: context.target.as_deref(),
            pattern: context.pattern.as_deref(),
            parameters: params,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| EvaluationError::Design(e.to_string()))?;

        let path = context.work_dir.join(PARAMETER_FILE);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| EvaluationError::Design(format!("{}: {e}", path.display())))
    }
}
