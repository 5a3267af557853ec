//! Check registry.
//!
//! Every check that runs after primary-key resolution implements [`Check`]
//! and is looked up here. Checks are independent: each reads the same
//! deduplicated view and returns its own findings.

use dqsentinel_core::{DqError, Finding, Result, SeasonalityProfile, SentinelConfig};

use crate::backfill::BackfillCheck;
use crate::cadence::CadenceCheck;
use crate::index::{ContextIndex, DedupedView};
use crate::level_shift::LevelShiftCheck;
use crate::mixup::UnitPriceMixupCheck;
use crate::pk::TimezoneShiftCheck;
use crate::seasonality::SeasonalityCheck;

/// Everything a check may read.
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    /// File being checked
    pub source_file: &'a str,

    /// Deduplicated records of the file
    pub view: &'a DedupedView,

    /// Run-wide calendar and promo lookups
    pub context: &'a ContextIndex,

    /// Thresholds
    pub config: &'a SentinelConfig,
}

/// What a check produced.
#[derive(Debug, Clone, Default)]
pub struct CheckOutput {
    /// Findings, in any order
    pub findings: Vec<Finding>,

    /// Backfilled fraction, set by the backfill check only
    pub pct_backfilled: Option<f64>,

    /// Weekly-total autocorrelation, set by the seasonality check only
    pub seasonality: Option<SeasonalityProfile>,
}

/// A detector over the deduplicated view.
///
/// Returning `Err` marks an operational failure, not a data-quality finding.
pub trait Check: Send + Sync {
    /// Stable check name.
    fn name(&self) -> &'static str;

    /// Run the check.
    fn run(&self, input: &CheckInput<'_>) -> Result<CheckOutput>;
}

/// Registry for checks.
pub struct CheckRegistry {
    checks: Vec<Box<dyn Check>>,
}

impl CheckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Registry with every built-in check.
    pub fn standard() -> Self {
        let checks: Vec<Box<dyn Check>> = vec![
            Box::new(TimezoneShiftCheck),
            Box::new(CadenceCheck),
            Box::new(BackfillCheck),
            Box::new(LevelShiftCheck),
            Box::new(UnitPriceMixupCheck),
            Box::new(SeasonalityCheck),
        ];
        Self { checks }
    }

    /// Register a check. Names must be unique.
    pub fn register(&mut self, check: Box<dyn Check>) -> Result<()> {
        if self.get(check.name()).is_some() {
            return Err(DqError::Other(format!("Check already registered: {}", check.name())));
        }
        self.checks.push(check);
        Ok(())
    }

    /// Unregister a check.
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn Check>> {
        let pos = self.checks.iter().position(|c| c.name() == name)?;
        Some(self.checks.remove(pos))
    }

    /// Get a check by name.
    pub fn get(&self, name: &str) -> Option<&dyn Check> {
        self.checks.iter().find(|c| c.name() == name).map(|c| c.as_ref())
    }

    /// Names of all registered checks, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Iterate over registered checks.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Check> {
        self.checks.iter().map(|c| c.as_ref())
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.names())
            .finish()
    }
}
