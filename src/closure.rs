//! Recursive closure over consumers.
//!
//! Wave 1 runs with the initial criteria. Each later wave searches for the
//! consumers newly discovered by the previous one. The coordinator alone owns
//! `ever_seen`; a symbol enters a frontier at most once, which bounds the run
//! on cyclic call graphs.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::criteria::{RecursiveFrontierCriteria, SearchCriteria};
use crate::usage::{EdgeMap, UsageRecord};

pub const DEFAULT_MAX_DEPTH: u32 = 5;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelClosure {
    /// level → package → provider → consumers
    pub levels: BTreeMap<u32, BTreeMap<String, EdgeMap>>,
    /// package → level → provider → consumers
    pub packages: BTreeMap<String, BTreeMap<u32, EdgeMap>>,
    pub provider_to_consumers: EdgeMap,
    pub consumer_to_providers: EdgeMap,
    /// Every consumer that has entered a frontier. Never shrinks.
    pub ever_seen: BTreeSet<String>,
    pub consumer_package: BTreeMap<String, String>,
    pub consumer_levels: BTreeMap<String, BTreeSet<u32>>,
}

impl LevelClosure {
    fn record_level(&mut self, level: u32, records: &[UsageRecord]) {
        let mut by_package = BTreeMap::new();
        for record in records {
            if record.provider_to_consumers.is_empty() {
                continue;
            }
            let package = record.package.name.clone();
            for (provider, consumers) in &record.provider_to_consumers {
                self.provider_to_consumers
                    .entry(provider.clone())
                    .or_default()
                    .extend(consumers.iter().cloned());
                for consumer in consumers {
                    self.consumer_to_providers
                        .entry(consumer.clone())
                        .or_default()
                        .insert(provider.clone());
                    self.consumer_levels
                        .entry(consumer.clone())
                        .or_default()
                        .insert(level);
                    self.consumer_package
                        .insert(consumer.clone(), package.clone());
                }
            }
            self.packages
                .entry(package.clone())
                .or_default()
                .insert(level, record.provider_to_consumers.clone());
            by_package.insert(package, record.provider_to_consumers.clone());
        }
        self.levels.insert(level, by_package);
    }

    /// `package symbol`, or `<other> symbol` for consumers outside the corpus.
    pub fn label(&self, symbol: &str) -> String {
        let package = self
            .consumer_package
            .get(symbol)
            .map(String::as_str)
            .unwrap_or("<other>");
        format!("{package} {symbol}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A wave discovered no consumer outside `ever_seen`.
    Exhausted { level: u32 },
    /// The depth bound was reached.
    MaxDepth { level: u32 },
}

#[derive(Debug, Clone)]
pub struct ClosureOutcome {
    pub closure: LevelClosure,
    /// Records of wave 1, i.e. the plain (non-recursive) result.
    pub first_wave: Vec<UsageRecord>,
    pub termination: Termination,
    pub waves: u32,
}

pub struct ClosureEngine {
    max_depth: u32,
}

impl Default for ClosureEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl ClosureEngine {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth: max_depth.max(1),
        }
    }

    /// Runs waves until no new consumer appears or `max_depth` is reached.
    ///
    /// `run_wave` scans the whole corpus with the given criteria and returns
    /// only once every package of the wave is done.
    pub fn run<F>(&self, initial: Arc<dyn SearchCriteria>, mut run_wave: F) -> ClosureOutcome
    where
        F: FnMut(u32, &Arc<dyn SearchCriteria>) -> Vec<UsageRecord>,
    {
        let mut closure = LevelClosure::default();
        let mut first_wave = None;
        let mut criteria = initial;
        let mut level = 1;

        let termination = loop {
            info!(level, "starting wave");
            let records = run_wave(level, &criteria);

            let fresh: HashSet<String> = records
                .iter()
                .flat_map(UsageRecord::consumers)
                .filter(|c| !closure.ever_seen.contains(*c))
                .map(str::to_string)
                .collect();
            info!(
                level,
                packages = records.iter().filter(|r| r.has_usage()).count(),
                new_consumers = fresh.len(),
                "wave finished"
            );

            if first_wave.is_none() {
                first_wave = Some(records.clone());
            }
            if fresh.is_empty() {
                break Termination::Exhausted { level };
            }
            if level >= self.max_depth {
                break Termination::MaxDepth { level };
            }

            closure.record_level(level, &records);
            closure.ever_seen.extend(fresh.iter().cloned());
            criteria = Arc::new(RecursiveFrontierCriteria::new(fresh));
            level += 1;
        };

        ClosureOutcome {
            closure,
            first_wave: first_wave.unwrap_or_default(),
            termination,
            waves: level,
        }
    }
}
