//! # Transition Table
//!
//! Explicit `(state, event_type) -> transition` data. A transition has an
//! optional guard, ordered activities, and either a fixed target state or a
//! list of conditional branches evaluated after the activities ran.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::activities::Activity;
use super::context::InstanceOf;
use super::definition::{SagaDefinition, SagaState};

pub type GuardFn<D> = fn(&InstanceOf<D>, &<D as SagaDefinition>::Event) -> bool;
pub type Predicate<D> = fn(&InstanceOf<D>) -> bool;

/// Named precondition; a failing guard leaves the instance untouched
pub struct Guard<D: SagaDefinition> {
    pub name: &'static str,
    check: GuardFn<D>,
}

impl<D: SagaDefinition> Guard<D> {
    pub fn allows(&self, instance: &InstanceOf<D>, event: &D::Event) -> bool {
        (self.check)(instance, event)
    }
}

pub struct Branch<D: SagaDefinition> {
    pub name: &'static str,
    predicate: Predicate<D>,
    activities: Vec<Arc<dyn Activity<D>>>,
    target: D::State,
}

impl<D: SagaDefinition> Branch<D> {
    pub fn when(name: &'static str, predicate: Predicate<D>, target: D::State) -> Self {
        Self {
            name,
            predicate,
            activities: Vec::new(),
            target,
        }
    }

    /// Catch-all branch; put it last
    pub fn otherwise(target: D::State) -> Self {
        Self::when("otherwise", |_| true, target)
    }

    pub fn with_activity(mut self, activity: Arc<dyn Activity<D>>) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn target(&self) -> D::State {
        self.target
    }

    pub fn activities(&self) -> &[Arc<dyn Activity<D>>] {
        &self.activities
    }

    pub fn matches(&self, instance: &InstanceOf<D>) -> bool {
        (self.predicate)(instance)
    }
}

pub enum Outcome<D: SagaDefinition> {
    To(D::State),
    /// First matching branch wins
    Conditional(Vec<Branch<D>>),
}

pub struct Transition<D: SagaDefinition> {
    guard: Option<Guard<D>>,
    activities: Vec<Arc<dyn Activity<D>>>,
    outcome: Outcome<D>,
}

impl<D: SagaDefinition> Transition<D> {
    pub fn to(target: D::State) -> Self {
        Self {
            guard: None,
            activities: Vec::new(),
            outcome: Outcome::To(target),
        }
    }

    pub fn branching(branches: Vec<Branch<D>>) -> Self {
        Self {
            guard: None,
            activities: Vec::new(),
            outcome: Outcome::Conditional(branches),
        }
    }

    pub fn guarded(mut self, name: &'static str, check: GuardFn<D>) -> Self {
        self.guard = Some(Guard { name, check });
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn Activity<D>>) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn guard(&self) -> Option<&Guard<D>> {
        self.guard.as_ref()
    }

    pub fn activities(&self) -> &[Arc<dyn Activity<D>>] {
        &self.activities
    }

    pub fn outcome(&self) -> &Outcome<D> {
        &self.outcome
    }

    /// Every state this transition can lead to
    pub fn targets(&self) -> Vec<D::State> {
        match &self.outcome {
            Outcome::To(state) => vec![*state],
            Outcome::Conditional(branches) => branches.iter().map(Branch::target).collect(),
        }
    }

    /// Pick the branch to take: extra activities plus the target state
    pub fn select(&self, instance: &InstanceOf<D>) -> Option<(&[Arc<dyn Activity<D>>], D::State)> {
        match &self.outcome {
            Outcome::To(state) => {
                let none: &[Arc<dyn Activity<D>>] = &[];
                Some((none, *state))
            }
            Outcome::Conditional(branches) => branches
                .iter()
                .find(|b| b.matches(instance))
                .map(|b| (b.activities(), b.target)),
        }
    }
}

pub struct TransitionTable<D: SagaDefinition> {
    entries: HashMap<D::State, HashMap<&'static str, Transition<D>>>,
}

impl<D: SagaDefinition> Default for TransitionTable<D> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<D: SagaDefinition> TransitionTable<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; each `(state, event_type)` pair may appear once
    pub fn on(mut self, state: D::State, event_type: &'static str, transition: Transition<D>) -> Self {
        let by_event = self.entries.entry(state).or_default();
        debug_assert!(
            !by_event.contains_key(event_type),
            "duplicate transition for {state:?} on {event_type}"
        );
        by_event.insert(event_type, transition);
        self
    }

    pub fn get(&self, state: D::State, event_type: &str) -> Option<&Transition<D>> {
        self.entries.get(&state)?.get(event_type)
    }

    pub fn contains(&self, state: D::State, event_type: &str) -> bool {
        self.get(state, event_type).is_some()
    }

    /// Message types the table reacts to, sorted
    pub fn event_types(&self) -> BTreeSet<&'static str> {
        self.entries
            .values()
            .flat_map(|by_event| by_event.keys().copied())
            .collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (D::State, &'static str, &Transition<D>)> {
        self.entries.iter().flat_map(|(state, by_event)| {
            by_event
                .iter()
                .map(move |(event_type, transition)| (*state, *event_type, transition))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no terminal state has an outgoing entry
    pub fn terminal_states_absorb(&self) -> bool {
        self.entries.keys().all(|s| !s.is_terminal())
    }
}

impl<D: SagaDefinition> fmt::Debug for TransitionTable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .entries()
            .map(|(s, e, _)| format!("{} --{}-->", s.as_str(), e))
            .collect();
        keys.sort();
        f.debug_struct("TransitionTable")
            .field("entries", &keys)
            .finish()
    }
}
