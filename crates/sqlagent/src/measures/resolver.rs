use serde::{Deserialize, Serialize};

use super::AliasIndex;
use crate::models::MeasureConfig;

/// Outcome of resolving free-text measure mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub matched: Vec<MeasureConfig>,
    pub unmatched: Vec<String>,
}

impl Resolution {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Exact, normalized alias matching. `matched` is deduplicated by code in
/// first-seen order; `unmatched` keeps the caller's original strings.
pub fn resolve<S: AsRef<str>>(candidates: &[S], index: &AliasIndex) -> Resolution {
    let mut resolution = Resolution::default();

    for candidate in candidates {
        let candidate = candidate.as_ref();
        match index.by_alias(candidate) {
            Some(config) => {
                if !resolution
                    .matched
                    .iter()
                    .any(|existing| existing.code == config.code)
                {
                    resolution.matched.push(config.clone());
                }
            }
            None => {
                if !resolution.unmatched.iter().any(|seen| seen == candidate) {
                    resolution.unmatched.push(candidate.to_string());
                }
            }
        }
    }

    resolution
}
