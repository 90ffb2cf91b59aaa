//! Work partitioning
//!
//! Splits the descriptor set into a parallel partition and a serial
//! partition of dispatch units, according to the run's parallel settings.

use std::fmt;

use crate::config::{ParallelConfig, ParallelScope};
use crate::models::TestUnitDescriptor;

/// Scheduler progress over the whole descriptor set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleState {
    Unscheduled,
    Partitioned,
    Dispatched,
    Aggregated,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleState::Unscheduled => "unscheduled",
            ScheduleState::Partitioned => "partitioned",
            ScheduleState::Dispatched => "dispatched",
            ScheduleState::Aggregated => "aggregated",
        };
        f.write_str(name)
    }
}

/// Smallest piece of work handed to a worker
///
/// Descriptors inside a unit always run in sequence on one worker.
#[derive(Clone, Debug)]
pub struct DispatchUnit {
    /// Position within its partition; results are aggregated in this order
    pub index: usize,
    pub descriptors: Vec<TestUnitDescriptor>,
}

impl DispatchUnit {
    fn single(index: usize, descriptor: TestUnitDescriptor) -> Self {
        Self {
            index,
            descriptors: vec![descriptor],
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Parallel and serial work for one run
#[derive(Clone, Debug, Default)]
pub struct Partition {
    pub parallel: Vec<DispatchUnit>,
    /// Runs on a single worker after the parallel partition drains
    pub serial: Vec<DispatchUnit>,
}

impl Partition {
    pub fn unit_count(&self) -> usize {
        self.parallel.len() + self.serial.len()
    }

    pub fn descriptor_count(&self) -> usize {
        self.parallel
            .iter()
            .chain(self.serial.iter())
            .map(DispatchUnit::len)
            .sum()
    }
}

/// Partition descriptors for dispatch
///
/// With parallelism disabled every descriptor becomes its own serial unit
/// and the scope is ignored. Otherwise non-parallelizable descriptors go to
/// the serial partition and the rest are grouped by scope: one unit per
/// descriptor at method scope, one unit per class (first appearance order)
/// at class scope.
pub fn partition(descriptors: Vec<TestUnitDescriptor>, config: &ParallelConfig) -> Partition {
    let mut result = Partition::default();

    if !config.enabled {
        result.serial = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, d)| DispatchUnit::single(index, d))
            .collect();
        return result;
    }

    let (parallel, serial): (Vec<_>, Vec<_>) =
        descriptors.into_iter().partition(|d| d.parallelizable);

    result.serial = serial
        .into_iter()
        .enumerate()
        .map(|(index, d)| DispatchUnit::single(index, d))
        .collect();

    result.parallel = match config.scope {
        ParallelScope::Method => parallel
            .into_iter()
            .enumerate()
            .map(|(index, d)| DispatchUnit::single(index, d))
            .collect(),
        ParallelScope::Class => group_by_class(parallel),
    };

    result
}

fn group_by_class(descriptors: Vec<TestUnitDescriptor>) -> Vec<DispatchUnit> {
    let mut units: Vec<DispatchUnit> = Vec::new();
    for descriptor in descriptors {
        let existing = units.iter_mut().find(|unit| {
            unit.descriptors.first().is_some_and(|first| {
                first.module == descriptor.module && first.class_name == descriptor.class_name
            })
        });
        match existing {
            Some(unit) => unit.descriptors.push(descriptor),
            None => {
                let index = units.len();
                units.push(DispatchUnit::single(index, descriptor));
            }
        }
    }
    units
}
