//! Per-dimension quality gates
//!
//! Thin wrappers over the validator derives that collapse the error
//! tree into one message per dimension, the shape the fan-out workers
//! record.

use validator::Validate;

use crate::models::storage::{KnowledgeGraphData, TimelineData, VectorData};

fn flatten(errors: validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let codes: Vec<&str> = errs.iter().map(|e| e.code.as_ref()).collect();
            format!("{}: {}", field, codes.join(","))
        })
        .collect();
    parts.sort_unstable();
    parts.join("; ")
}

pub fn validate_timeline(data: &TimelineData) -> Result<(), String> {
    data.validate().map_err(flatten)
}

pub fn validate_knowledge(data: &KnowledgeGraphData) -> Result<(), String> {
    data.validate().map_err(flatten)
}

pub fn validate_vector(data: &VectorData) -> Result<(), String> {
    data.validate().map_err(flatten)
}
