//! Pipeline-of-phase-groups data structure, validated once at
//! construction.
//!
//! A [`PhaseGroup`] is an unordered set of capabilities executed
//! concurrently behind one barrier; a [`Pipeline`] is an ordered sequence
//! of groups. The builder checks every inter-phase data dependency before
//! anything runs, so a run can never hit a "missing input" surprise that
//! was knowable up front.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::capability::Capability;
use crate::error::PipelineError;

// ── Phase group ──────────────────────────────────────────────────

/// A set of capabilities with no dependencies among each other, run
/// concurrently and joined at a barrier.
pub struct PhaseGroup {
    name: String,
    members: Vec<Arc<dyn Capability>>,
}

impl PhaseGroup {
    /// Create an empty, named phase group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    /// Add a capability to the group.
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.members.push(capability);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Arc<dyn Capability>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl std::fmt::Debug for PhaseGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseGroup")
            .field("name", &self.name)
            .field(
                "members",
                &self.members.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ── Pipeline ─────────────────────────────────────────────────────

/// An ordered sequence of phase groups with checked inter-phase data
/// dependencies. Construct through [`Pipeline::builder`].
#[derive(Debug)]
pub struct Pipeline {
    phases: Vec<PhaseGroup>,
    seed_keys: Vec<String>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn phases(&self) -> &[PhaseGroup] {
        &self.phases
    }

    /// Pre-run input keys the caller must supply to `run`.
    pub fn seed_keys(&self) -> &[String] {
        &self.seed_keys
    }

    /// Total number of capabilities across all phases.
    pub fn capability_count(&self) -> usize {
        self.phases.iter().map(PhaseGroup::len).sum()
    }
}

// ── Builder ──────────────────────────────────────────────────────

/// Builds and validates a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    phases: Vec<PhaseGroup>,
    seed_keys: Vec<String>,
}

impl PipelineBuilder {
    /// Declare a pre-run input key (source data injected before start,
    /// with no producer inside the pipeline).
    pub fn seed_key(mut self, key: impl Into<String>) -> Self {
        self.seed_keys.push(key.into());
        self
    }

    /// Append a phase group; phases execute in the order added.
    pub fn phase(mut self, group: PhaseGroup) -> Self {
        self.phases.push(group);
        self
    }

    /// Validate the definition and produce a runnable pipeline.
    ///
    /// Every violation is a [`PipelineError::Configuration`] raised here,
    /// before any capability executes:
    /// - an empty phase group,
    /// - duplicate capability names,
    /// - two producers (or a producer and a seed) sharing an output key,
    /// - a required key produced within the same phase,
    /// - a required key produced only in a later phase,
    /// - a required key with no producer and no seed declaration.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.phases.is_empty() {
            return Err(PipelineError::Configuration(
                "pipeline has no phases".into(),
            ));
        }

        // Map every produced key to the phase that produces it, rejecting
        // duplicate producers as we go.
        let mut producers: HashMap<String, usize> = HashMap::new();
        let mut names: HashSet<String> = HashSet::new();
        let seed_set: HashSet<&str> = self.seed_keys.iter().map(String::as_str).collect();

        for (idx, phase) in self.phases.iter().enumerate() {
            if phase.is_empty() {
                return Err(PipelineError::Configuration(format!(
                    "phase {idx} (`{}`) has no capabilities",
                    phase.name()
                )));
            }
            for cap in phase.members() {
                if !names.insert(cap.name().to_string()) {
                    return Err(PipelineError::Configuration(format!(
                        "duplicate capability name `{}`",
                        cap.name()
                    )));
                }
                let key = cap.produces().to_string();
                if seed_set.contains(key.as_str()) {
                    return Err(PipelineError::Configuration(format!(
                        "capability `{}` produces seed key `{key}`",
                        cap.name()
                    )));
                }
                if producers.insert(key.clone(), idx).is_some() {
                    return Err(PipelineError::Configuration(format!(
                        "artifact key `{key}` has more than one producer"
                    )));
                }
            }
        }

        // Check every required key against seeds and producer phases.
        for (idx, phase) in self.phases.iter().enumerate() {
            for cap in phase.members() {
                for key in cap.requires() {
                    if seed_set.contains(key.as_str()) {
                        continue;
                    }
                    match producers.get(&key) {
                        Some(&producer_phase) if producer_phase < idx => {}
                        Some(&producer_phase) if producer_phase == idx => {
                            return Err(PipelineError::Configuration(format!(
                                "capability `{}` requires `{key}`, produced within the same \
                                 phase {idx}; move the consumer to a later phase",
                                cap.name()
                            )));
                        }
                        Some(&producer_phase) => {
                            return Err(PipelineError::Configuration(format!(
                                "capability `{}` in phase {idx} requires `{key}`, which is \
                                 only produced in later phase {producer_phase}",
                                cap.name()
                            )));
                        }
                        None => {
                            return Err(PipelineError::Configuration(format!(
                                "capability `{}` requires `{key}`, which no earlier phase \
                                 produces and no seed declares",
                                cap.name()
                            )));
                        }
                    }
                }
            }
        }

        Ok(Pipeline {
            phases: self.phases,
            seed_keys: self.seed_keys,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
