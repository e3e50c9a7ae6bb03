//! Component exceptions: priority adjustments requested by the target system
//!
//! An exception carries `<component-path>=<signed delta>`, e.g. `/g3t1_1=-5`.

use std::num::IntErrorKind;

use bsn_common::{ComponentError, ComponentId, TermKind};

use crate::state::StrategyStore;

/// Parsed exception content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityAdjustment {
    pub component: ComponentId,
    /// Requested change, saturated to the `i64` range
    pub delta: i64,
}

impl PriorityAdjustment {
    pub fn parse(content: &str) -> Result<Self, ComponentError> {
        let malformed = || ComponentError::MalformedException(content.to_string());

        let (path, delta) = content.trim().split_once('=').ok_or_else(malformed)?;
        let component = ComponentId::from_path(path)?;
        let delta = parse_delta(delta.trim()).ok_or_else(malformed)?;

        Ok(Self { component, delta })
    }

    /// Priority key this adjustment addresses (`R_G3_T1_1`)
    pub fn term(&self) -> String {
        format!(
            "{}{}",
            TermKind::Reliability.prefix().unwrap_or_default(),
            self.component.term_suffix()
        )
    }

    /// Apply to the store, returning the new priority
    pub fn apply(&self, store: &mut StrategyStore) -> Result<i32, ComponentError> {
        store
            .adjust_priority(&self.term(), self.delta)
            .ok_or_else(|| ComponentError::UnknownComponent(self.component.path()))
    }
}

/// Signed integer of any magnitude, saturated to `i64`
fn parse_delta(text: &str) -> Option<i64> {
    match text.parse::<i64>() {
        Ok(delta) => Some(delta),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i64::MAX),
            IntErrorKind::NegOverflow => Some(i64::MIN),
            _ => None,
        },
    }
}

impl std::str::FromStr for PriorityAdjustment {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
