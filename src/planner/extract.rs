//! Pulls an execution plan out of raw model output.
//!
//! Models wrap the plan in reasoning, prose and code fences, and sometimes
//! produce no plan at all. Everything that can go wrong here degrades to an
//! empty plan; the caller never sees an error.

use crate::types::ExecutionPlan;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Error, Debug)]
pub enum ExtractionFailure {
    #[error("no JSON object found in model output")]
    NoJsonObject,

    #[error("model output is not a valid plan: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("model output is JSON but not an object")]
    NotAnObject,
}

/// Locates the plan object in model output, honouring a reasoning delimiter.
#[derive(Clone, Debug)]
pub struct PlanExtractor {
    delimiter: Option<Regex>,
}

impl PlanExtractor {
    /// `delimiter` is matched case-insensitively; an empty one disables it.
    pub fn new(delimiter: &str) -> Self {
        let delimiter = if delimiter.is_empty() {
            None
        } else {
            RegexBuilder::new(&regex::escape(delimiter))
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { delimiter }
    }

    /// The region from the first `{` to the last `}` after the delimiter
    /// (or in the whole text when the delimiter is absent).
    pub fn carve<'a>(&self, text: &'a str) -> Option<&'a str> {
        let region = match self.delimiter.as_ref().and_then(|re| re.find(text)) {
            Some(marker) => &text[marker.end()..],
            None => text,
        };
        let start = region.find('{')?;
        let end = region.rfind('}')?;
        if start < end {
            Some(region[start..=end].trim())
        } else {
            None
        }
    }

    pub fn try_extract(&self, text: &str) -> Result<ExecutionPlan, ExtractionFailure> {
        let candidate = self.carve(text).ok_or(ExtractionFailure::NoJsonObject)?;
        trace!(candidate = %candidate, "Carved candidate plan object.");
        let value: Value = serde_json::from_str(candidate)?;
        if !value.is_object() {
            return Err(ExtractionFailure::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Best-effort plan; an empty plan when nothing usable is found.
    pub fn extract(&self, text: &str) -> ExecutionPlan {
        match self.try_extract(text) {
            Ok(plan) => {
                debug!(task_count = plan.len(), "Extracted execution plan.");
                plan
            }
            Err(failure) => {
                warn!(error = %failure, raw_len = text.len(), "Plan extraction failed; continuing with an empty plan.");
                trace!(raw = %text, "Unusable model output.");
                ExecutionPlan::empty()
            }
        }
    }
}
